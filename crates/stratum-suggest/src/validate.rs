use std::time::Duration;

use serde_json::{Map, Value};
use stratum_core::boundary::{self, BoundaryThresholds};
use stratum_core::graph::ModuleGraph;
use stratum_core::report::{self, IssueSummary, ValidationReport};
use stratum_core::store::{ModuleStore, ReportSink};
use stratum_core::structure;
use stratum_core::{ModuleSet, PipelineSettings};

use crate::dispatch::{Accumulator, DispatchConfig, Dispatcher, Prompt};
use crate::error::ValidationError;
use crate::merge;
use crate::parse;
use crate::prompt;

/// How often the AI review is attempted and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &PipelineSettings) -> Self {
        Self {
            max_attempts: settings.retry_attempts.max(1),
            delay: Duration::from_millis(settings.retry_delay_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationOutcome {
    pub report: ValidationReport,
    pub issues: IssueSummary,
}

/// One validation run: structural scan, boundary analysis and AI review
/// folded into a single report.
pub struct Validator<'a> {
    dispatcher: &'a Dispatcher,
    store: &'a dyn ModuleStore,
    sink: Option<&'a dyn ReportSink>,
    retry: RetryPolicy,
    review_token_ceiling: usize,
    thresholds: BoundaryThresholds,
}

impl<'a> Validator<'a> {
    pub fn new(dispatcher: &'a Dispatcher, store: &'a dyn ModuleStore) -> Self {
        Self {
            dispatcher,
            store,
            sink: None,
            retry: RetryPolicy::default(),
            review_token_ceiling: PipelineSettings::default().review_token_ceiling,
            thresholds: BoundaryThresholds::default(),
        }
    }

    pub fn with_sink(mut self, sink: &'a dyn ReportSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_review_token_ceiling(mut self, ceiling: usize) -> Self {
        self.review_token_ceiling = ceiling;
        self
    }

    pub fn with_thresholds(mut self, thresholds: BoundaryThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Validate every stored module, or only `scope` when given.
    ///
    /// A scoped run skips the AI review and keeps the previous report's
    /// entries for modules outside the scope. An unscoped run with no stored
    /// modules is an error; anything the model gets wrong is not.
    pub async fn validate(
        &self,
        requirements: &str,
        scope: Option<&[String]>,
    ) -> Result<ValidationOutcome, ValidationError> {
        let all = self.store.load_all()?;
        let previous = match (scope, self.sink) {
            (Some(_), Some(sink)) => sink.read_previous(),
            _ => None,
        };

        let checked = match scope {
            Some(names) => self.store.load_scoped(names)?,
            None if all.is_empty() => return Err(ValidationError::NoModules),
            None => all.clone(),
        };
        log::info!("validating {} of {} modules", checked.len(), all.len());

        let mut structure_scan = structure::scan_modules(checked.iter(), &all);
        if let Some(prev) = &previous {
            for (name, problems) in &prev.structure_scan {
                if !checked.contains(name) && !structure_scan.contains_key(name) {
                    structure_scan.insert(name.clone(), problems.clone());
                }
            }
        }

        let graph = ModuleGraph::build(&all);
        let boundary_analysis = boundary::analyze_with(&all, &graph, &self.thresholds);
        if !boundary_analysis.cycles.is_empty() {
            log::warn!("{} dependency cycles found", boundary_analysis.cycles.len());
        }

        let ai_review = match scope {
            None => self.review(requirements, &all, &boundary_analysis).await,
            Some(_) => previous
                .map(|prev| prev.ai_review)
                .filter(report::review_is_usable)
                .unwrap_or_else(report::review_failed),
        };

        let report = ValidationReport {
            ai_review,
            structure_scan,
            boundary_analysis,
        };
        let issues = IssueSummary::from_report(&report);
        log::info!(
            "validation found {} issues ({} structural)",
            issues.total_issues,
            issues.structure_issues
        );

        if let Some(sink) = self.sink {
            sink.write(&report)?;
        }
        Ok(ValidationOutcome { report, issues })
    }

    async fn review(
        &self,
        requirements: &str,
        modules: &ModuleSet,
        analysis: &boundary::BoundaryAnalysis,
    ) -> Map<String, Value> {
        let mut material = prompt::review_material(requirements, modules);
        let tokens = self.dispatcher.count_tokens(&material);
        if tokens > self.review_token_ceiling {
            log::warn!(
                "review material is {tokens} tokens (ceiling {}), sending abbreviated summaries",
                self.review_token_ceiling
            );
            material = prompt::abbreviated_material(requirements, modules);
        }

        // One request per chunk; the retry loop below is the only repetition.
        let dispatcher = self.dispatcher.with_config(DispatchConfig {
            continuation_steps: 1,
            ..self.dispatcher.config().clone()
        });
        let part_prompt =
            |part: usize, total: usize| prompt::review_chunk_prompt(part, total, Some(analysis));

        for attempt in 1..=self.retry.max_attempts {
            let outcome = dispatcher
                .dispatch(
                    Prompt::User(material.clone()),
                    |text: &str| Ok::<_, String>(parse::extract_object(text)),
                    merge::first_non_empty,
                    Some(&part_prompt),
                    Accumulator::new(),
                )
                .await;

            match outcome {
                Ok(acc) => match acc.into_value() {
                    Some(review) if report::review_is_usable(&review) => {
                        log::info!("AI review usable after {attempt} attempt(s)");
                        return review;
                    }
                    _ => log::warn!(
                        "attempt {attempt}/{}: review lacks \"{}\"",
                        self.retry.max_attempts,
                        report::REQUIRED_REVIEW_FIELD
                    ),
                },
                Err(e) => log::warn!("attempt {attempt}/{}: {e}", self.retry.max_attempts),
            }

            if attempt < self.retry.max_attempts {
                tokio::time::sleep(self.retry.delay).await;
            }
        }

        log::error!("AI review failed after {} attempts", self.retry.max_attempts);
        report::review_failed()
    }
}
