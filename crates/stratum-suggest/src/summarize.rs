use std::collections::BTreeMap;

use serde_json::Value;
use stratum_core::{ModuleSet, ModuleSummary};

use crate::dispatch::{Accumulator, Dispatcher, Prompt};
use crate::error::DispatchError;
use crate::merge;
use crate::parse::parse_module_records;
use crate::prompt;

/// Turns requirement text into a module decomposition.
pub struct Summarizer<'a> {
    dispatcher: &'a Dispatcher,
}

impl<'a> Summarizer<'a> {
    pub fn new(dispatcher: &'a Dispatcher) -> Self {
        Self { dispatcher }
    }

    /// Ask the model for the modules the requirements imply, chunk by chunk,
    /// and fold records naming the same module into one.
    pub async fn decompose(&self, requirements: &str) -> Result<ModuleSet, DispatchError> {
        let part_prompt =
            |part: usize, total: usize| prompt::module_identification_prompt(part, total);
        let acc = self
            .dispatcher
            .dispatch(
                Prompt::User(requirements.to_string()),
                parse_module_records,
                merge::extend,
                Some(&part_prompt),
                Accumulator::new(),
            )
            .await?;

        if !acc.failed.is_empty() {
            log::warn!("{} chunks produced no module list", acc.failed.len());
        }
        let modules = aggregate(acc.into_value().unwrap_or_default());
        log::info!("decomposition produced {} modules", modules.len());
        Ok(modules)
    }
}

/// Merge records by module name: list fields union in first-seen order and
/// the first non-empty `target_path` is kept.
pub fn aggregate(records: Vec<Value>) -> ModuleSet {
    let mut by_name: BTreeMap<String, ModuleSummary> = BTreeMap::new();
    for record in &records {
        let Some(next) = ModuleSummary::from_value(record, None) else {
            log::warn!("dropping module record without a name: {record}");
            continue;
        };
        match by_name.get_mut(&next.module_name) {
            Some(existing) => absorb(existing, next),
            None => {
                by_name.insert(next.module_name.clone(), next);
            }
        }
    }
    by_name.into_values().collect()
}

fn absorb(existing: &mut ModuleSummary, next: ModuleSummary) {
    union(&mut existing.responsibilities, next.responsibilities);
    union(&mut existing.key_apis, next.key_apis);
    union(&mut existing.data_inputs, next.data_inputs);
    union(&mut existing.data_outputs, next.data_outputs);
    union(&mut existing.depends_on, next.depends_on);
    union(&mut existing.shape_problems, next.shape_problems);
    if existing.target_path.is_empty() {
        existing.target_path = next.target_path;
    }
}

fn union(into: &mut Vec<String>, items: Vec<String>) {
    for item in items {
        if !into.contains(&item) {
            into.push(item);
        }
    }
}
