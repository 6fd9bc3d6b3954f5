//! Model-assisted repair of modules the structural scan flagged.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};
use stratum_core::graph::ModuleGraph;
use stratum_core::report::{IssueSummary, ValidationReport};
use stratum_core::store::{ModuleStore, ReportSink};
use stratum_core::{conventions, ModuleSet, ModuleSummary};

use crate::dispatch::{Accumulator, Dispatcher, Prompt};
use crate::error::ValidationError;
use crate::merge;
use crate::parse;
use crate::prompt;
use crate::validate::{RetryPolicy, Validator};

/// Fields a fix reply may replace. `module_name` is never taken from the reply.
const FIXABLE_FIELDS: [&str; 6] = [
    "responsibilities",
    "key_apis",
    "data_inputs",
    "data_outputs",
    "depends_on",
    "target_path",
];

const MAX_RELATED: usize = 5;

/// What one fix round did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FixRound {
    pub round: usize,
    /// Modules a fix was requested for, in request order.
    pub attempted: Vec<String>,
    /// Modules whose corrected summary was stored.
    pub fixed: Vec<String>,
    /// Modules with no usable reply after every attempt.
    pub failed: Vec<String>,
    pub issues_before: usize,
    pub issues_after: usize,
    /// The round made things worse and its summaries were restored.
    pub rolled_back: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FixOutcome {
    pub rounds: Vec<FixRound>,
    pub report: ValidationReport,
    pub issues: IssueSummary,
}

/// Repairs flagged modules round by round, re-validating only what changed.
///
/// Each round asks the model for a corrected summary of every stored module
/// with structural problems, stores the accepted ones and runs a scoped
/// validation over them. A round that raises the issue count is rolled back
/// and ends the run.
pub struct Fixer<'a> {
    dispatcher: &'a Dispatcher,
    store: &'a dyn ModuleStore,
    sink: &'a dyn ReportSink,
    retry: RetryPolicy,
    max_rounds: usize,
    issue_limit: usize,
}

impl<'a> Fixer<'a> {
    pub fn new(
        dispatcher: &'a Dispatcher,
        store: &'a dyn ModuleStore,
        sink: &'a dyn ReportSink,
    ) -> Self {
        Self {
            dispatcher,
            store,
            sink,
            retry: RetryPolicy::default(),
            max_rounds: 3,
            issue_limit: 3,
        }
    }

    /// Per-module reply attempts, and the wait between them. Also used for
    /// the AI review when no previous report exists.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_rounds(mut self, rounds: usize) -> Self {
        self.max_rounds = rounds.max(1);
        self
    }

    /// Issues quoted per module prompt, most actionable first.
    pub fn with_issue_limit(mut self, limit: usize) -> Self {
        self.issue_limit = limit.max(1);
        self
    }

    /// Fix, starting from the sink's last report (a full validation runs
    /// first when there is none).
    pub async fn fix(&self, requirements: &str) -> Result<FixOutcome, ValidationError> {
        let validator = Validator::new(self.dispatcher, self.store)
            .with_sink(self.sink)
            .with_retry(self.retry);

        let mut report = match self.sink.read_previous() {
            Some(report) => report,
            None => {
                log::info!("no previous report, validating before fixing");
                validator.validate(requirements, None).await?.report
            }
        };
        let mut issues = IssueSummary::from_report(&report);
        let mut rounds = Vec::new();

        for round in 1..=self.max_rounds {
            let all = self.store.load_all()?;
            let graph = ModuleGraph::build(&all);
            let targets = self.targets(&report, &all, &graph);
            if targets.is_empty() {
                log::info!("no fixable structure issues left");
                break;
            }
            log::info!("fix round {round}: {} modules", targets.len());

            let mut fixed = ModuleSet::new();
            let mut failed = Vec::new();
            for (name, problems) in &targets {
                let Some(module) = all.get(name) else {
                    continue;
                };
                match self.fix_module(module, problems, &all, &graph).await {
                    Some(summary) => {
                        fixed.insert(summary);
                    }
                    None => failed.push(name.clone()),
                }
            }

            let mut record = FixRound {
                round,
                attempted: targets.into_iter().map(|(name, _)| name).collect(),
                fixed: fixed.names().map(str::to_string).collect(),
                failed,
                issues_before: issues.total_issues,
                issues_after: issues.total_issues,
                rolled_back: false,
            };
            if fixed.is_empty() {
                log::warn!("fix round {round}: no module could be fixed");
                rounds.push(record);
                break;
            }

            let originals = all.scoped(&record.fixed);
            self.store.save(&fixed)?;
            let outcome = validator
                .validate(requirements, Some(record.fixed.as_slice()))
                .await?;
            record.issues_after = outcome.issues.total_issues;

            if outcome.issues.total_issues > issues.total_issues {
                log::warn!(
                    "fix round {round} raised issues from {} to {}, restoring {} modules",
                    issues.total_issues,
                    outcome.issues.total_issues,
                    originals.len()
                );
                self.store.save(&originals)?;
                self.sink.write(&report)?;
                record.rolled_back = true;
                rounds.push(record);
                break;
            }

            log::info!(
                "fix round {round}: {} fixed, issues {} -> {}",
                record.fixed.len(),
                issues.total_issues,
                outcome.issues.total_issues
            );
            report = outcome.report;
            issues = outcome.issues;
            rounds.push(record);
        }

        Ok(FixOutcome {
            rounds,
            report,
            issues,
        })
    }

    /// Stored modules with structural problems, dependencies first when the
    /// graph allows it, each with its quoted issues.
    fn targets(
        &self,
        report: &ValidationReport,
        all: &ModuleSet,
        graph: &ModuleGraph,
    ) -> Vec<(String, Vec<String>)> {
        let flagged: BTreeMap<&str, &Vec<String>> = report
            .structure_scan
            .iter()
            .filter(|(name, problems)| !problems.is_empty() && all.contains(name))
            .map(|(name, problems)| (name.as_str(), problems))
            .collect();

        let order: Vec<String> = match graph.topological_order() {
            Some(order) => order,
            None => all.names().map(str::to_string).collect(),
        };
        order
            .into_iter()
            .filter_map(|name| {
                let problems = flagged.get(name.as_str())?;
                let quoted = prioritized(problems, boundary_notes(report, &name), self.issue_limit);
                Some((name, quoted))
            })
            .collect()
    }

    async fn fix_module(
        &self,
        module: &ModuleSummary,
        problems: &[String],
        all: &ModuleSet,
        graph: &ModuleGraph,
    ) -> Option<ModuleSummary> {
        let related = related_modules(module, all, graph);
        let system = prompt::fix_prompt(module, problems, &related);
        let user = format!("Fix issues for module: {}", module.module_name);
        let attempts = self.retry.max_attempts.max(1);

        for attempt in 1..=attempts {
            let outcome = self
                .dispatcher
                .dispatch(
                    Prompt::SystemUser {
                        system: system.clone(),
                        user: user.clone(),
                    },
                    |text: &str| Ok::<_, String>(parse::extract_object(text)),
                    merge::first_non_empty,
                    None,
                    Accumulator::new(),
                )
                .await;

            match outcome {
                Ok(acc) => match acc.into_value().and_then(|reply| apply_fix(module, &reply)) {
                    Some(summary) => return Some(summary),
                    None => log::warn!(
                        "{}: attempt {attempt}/{attempts}: reply holds no module fields",
                        module.module_name
                    ),
                },
                Err(e) => log::warn!("{}: attempt {attempt}/{attempts}: {e}", module.module_name),
            }
            if attempt < attempts {
                tokio::time::sleep(self.retry.delay).await;
            }
        }
        log::error!("giving up on {} after {attempts} attempts", module.module_name);
        None
    }
}

/// Structural problems first (shape, then undefined dependencies, then the
/// rest), boundary notes last, at most `limit` of them.
fn prioritized(problems: &[String], notes: Vec<String>, limit: usize) -> Vec<String> {
    let rank = |p: &String| {
        if p.contains(" should ") {
            0
        } else if p.starts_with("undefined dependency") {
            1
        } else {
            2
        }
    };
    let mut ordered: Vec<String> = problems.to_vec();
    ordered.sort_by_key(rank);
    ordered.extend(notes);
    ordered.truncate(limit);
    ordered
}

/// Merge and split suggestions that name `module`, phrased for its fix prompt.
fn boundary_notes(report: &ValidationReport, module: &str) -> Vec<String> {
    let analysis = &report.boundary_analysis;
    let mut notes = Vec::new();
    for merge in &analysis.merge_suggestions {
        if merge.modules.iter().any(|m| m == module) {
            let others: Vec<&str> = merge
                .modules
                .iter()
                .map(String::as_str)
                .filter(|m| *m != module)
                .collect();
            notes.push(format!(
                "boundary: consider merging with {} ({})",
                others.join(", "),
                merge.reason
            ));
        }
    }
    for split in analysis.split_suggestions.iter().filter(|s| s.module == module) {
        notes.push(format!("boundary: consider splitting ({})", split.reason));
    }
    notes
}

/// Dependencies and dependents of `module`, topped up with same-base-name
/// siblings when there are fewer than three.
fn related_modules(module: &ModuleSummary, all: &ModuleSet, graph: &ModuleGraph) -> Vec<Value> {
    let name = module.module_name.as_str();
    let mut related = Vec::new();
    let mut seen: Vec<&str> = vec![name];

    let neighbors = graph
        .dependencies(name)
        .map(|n| (n, "depended_on"))
        .chain(graph.dependents(name).map(|n| (n, "depends_on_this")));
    for (other, relationship) in neighbors {
        if seen.contains(&other) {
            continue;
        }
        if let Some(summary) = all.get(other) {
            related.push(prompt::related_entry(summary, relationship));
            seen.push(other);
        }
    }

    if related.len() < 3 {
        let base = conventions::base_name(name);
        for other in all.iter() {
            let other_name = other.module_name.as_str();
            if !seen.contains(&other_name) && conventions::base_name(other_name) == base {
                related.push(prompt::related_entry(other, "similar_name"));
                seen.push(other_name);
            }
        }
    }
    related.truncate(MAX_RELATED);
    related
}

/// Overlay the reply's non-null module fields on the stored record.
///
/// `None` when the reply carries none of them. The stored name always wins.
pub fn apply_fix(original: &ModuleSummary, reply: &Map<String, Value>) -> Option<ModuleSummary> {
    let updates: Vec<(&str, &Value)> = FIXABLE_FIELDS
        .iter()
        .filter_map(|field| reply.get(*field).filter(|v| !v.is_null()).map(|v| (*field, v)))
        .collect();
    if updates.is_empty() {
        return None;
    }
    if let Some(named) = reply.get("module_name").and_then(Value::as_str) {
        if named.trim() != original.module_name {
            log::warn!(
                "fix for {} names {named:?}; keeping the stored name",
                original.module_name
            );
        }
    }

    let mut merged = match serde_json::to_value(original) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    for (field, value) in updates {
        merged.insert(field.to_string(), value.clone());
    }
    merged.insert(
        "module_name".to_string(),
        Value::String(original.module_name.clone()),
    );
    ModuleSummary::from_value(&Value::Object(merged), Some(&original.module_name))
}
