//! Advisory boundary analysis: which modules look like they should be merged
//! and which look like they should be split.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::conventions;
use crate::graph::ModuleGraph;
use crate::ModuleSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundaryThresholds {
    pub max_dependencies: usize,
    pub max_dependents: usize,
    pub max_responsibilities: usize,
}

impl Default for BoundaryThresholds {
    fn default() -> Self {
        Self {
            max_dependencies: 5,
            max_dependents: 5,
            max_responsibilities: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MergeCause {
    OverlappingResponsibilities,
    Cycle,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MergeSuggestion {
    pub modules: Vec<String>,
    pub cause: MergeCause,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overlapping: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SplitMetric {
    Dependencies,
    Dependents,
    Responsibilities,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SplitSuggestion {
    pub module: String,
    pub metric: SplitMetric,
    pub count: usize,
    pub threshold: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct BoundaryAnalysis {
    #[serde(default)]
    pub cycles: Vec<Vec<String>>,
    #[serde(default)]
    pub merge_suggestions: Vec<MergeSuggestion>,
    #[serde(default)]
    pub split_suggestions: Vec<SplitSuggestion>,
}

pub fn analyze(modules: &ModuleSet, graph: &ModuleGraph) -> BoundaryAnalysis {
    analyze_with(modules, graph, &BoundaryThresholds::default())
}

pub fn analyze_with(
    modules: &ModuleSet,
    graph: &ModuleGraph,
    thresholds: &BoundaryThresholds,
) -> BoundaryAnalysis {
    let cycles = graph.find_cycles();

    let mut merge_suggestions = overlap_merges(modules);
    for cycle in cycles.iter().filter(|c| c.len() > 1) {
        merge_suggestions.push(MergeSuggestion {
            modules: cycle.clone(),
            cause: MergeCause::Cycle,
            reason: format!("circular dependency: {} -> {}", cycle.join(" -> "), cycle[0]),
            overlapping: vec![],
        });
    }

    let split_suggestions = split_candidates(modules, graph, thresholds);

    log::info!(
        "boundary analysis: {} cycles, {} merge suggestions, {} split suggestions",
        cycles.len(),
        merge_suggestions.len(),
        split_suggestions.len()
    );
    BoundaryAnalysis {
        cycles,
        merge_suggestions,
        split_suggestions,
    }
}

/// Group by base name (layer suffix stripped) and flag groups whose members
/// share a responsibility, compared case-insensitively.
fn overlap_merges(modules: &ModuleSet) -> Vec<MergeSuggestion> {
    let mut groups: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for module in modules.iter() {
        groups
            .entry(conventions::base_name(&module.module_name))
            .or_default()
            .push(&module.module_name);
    }

    let mut out = Vec::new();
    for members in groups.values().filter(|m| m.len() > 1) {
        // key -> (first spelling seen, modules listing it)
        let mut shared: Vec<(String, String, BTreeSet<&str>)> = Vec::new();
        for name in members {
            let Some(module) = modules.get(name) else {
                continue;
            };
            for resp in &module.responsibilities {
                let key = resp.trim().to_lowercase();
                if key.is_empty() {
                    continue;
                }
                match shared.iter_mut().find(|(k, _, _)| *k == key) {
                    Some((_, _, owners)) => {
                        owners.insert(*name);
                    }
                    None => shared.push((key, resp.trim().to_string(), BTreeSet::from([*name]))),
                }
            }
        }

        let overlapping: Vec<String> = shared
            .into_iter()
            .filter(|(_, _, owners)| owners.len() > 1)
            .map(|(_, text, _)| text)
            .collect();
        if overlapping.is_empty() {
            continue;
        }
        let cited: Vec<&str> = overlapping.iter().take(3).map(String::as_str).collect();
        out.push(MergeSuggestion {
            modules: members.iter().map(|m| m.to_string()).collect(),
            cause: MergeCause::OverlappingResponsibilities,
            reason: format!(
                "similar names with overlapping responsibilities: {}",
                cited.join(", ")
            ),
            overlapping,
        });
    }
    out
}

fn split_candidates(
    modules: &ModuleSet,
    graph: &ModuleGraph,
    thresholds: &BoundaryThresholds,
) -> Vec<SplitSuggestion> {
    let mut out = Vec::new();
    for module in modules.iter() {
        let name = &module.module_name;
        let checks = [
            (
                SplitMetric::Dependencies,
                graph.out_degree(name),
                thresholds.max_dependencies,
                "too many dependencies",
            ),
            (
                SplitMetric::Dependents,
                graph.in_degree(name),
                thresholds.max_dependents,
                "depended on by too many modules",
            ),
            (
                SplitMetric::Responsibilities,
                module.responsibilities.len(),
                thresholds.max_responsibilities,
                "too many responsibilities",
            ),
        ];
        for (metric, count, threshold, label) in checks {
            if count > threshold {
                out.push(SplitSuggestion {
                    module: name.clone(),
                    metric,
                    count,
                    threshold,
                    reason: format!("{label} ({count})"),
                });
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ModuleSummary;
    use pretty_assertions::assert_eq;

    fn run(modules: &ModuleSet) -> BoundaryAnalysis {
        analyze(modules, &ModuleGraph::build(modules))
    }

    #[test]
    fn overlapping_siblings_are_merge_candidates() {
        let modules: ModuleSet = [
            ModuleSummary::new("UserController")
                .with_responsibilities(["Validate user input", "Render profile"]),
            ModuleSummary::new("UserService")
                .with_responsibilities(["validate USER input ", "Apply discounts"]),
            ModuleSummary::new("OrderService").with_responsibilities(["Render profile"]),
        ]
        .into_iter()
        .collect();

        let analysis = run(&modules);
        assert_eq!(
            analysis.merge_suggestions,
            vec![MergeSuggestion {
                modules: vec!["UserController".into(), "UserService".into()],
                cause: MergeCause::OverlappingResponsibilities,
                reason: "similar names with overlapping responsibilities: Validate user input"
                    .into(),
                overlapping: vec!["Validate user input".into()],
            }]
        );
    }

    #[test]
    fn cycle_members_are_merge_candidates() {
        let modules: ModuleSet = [
            ModuleSummary::new("AService").with_dependencies(["BService"]),
            ModuleSummary::new("BService").with_dependencies(["AService"]),
        ]
        .into_iter()
        .collect();

        let analysis = run(&modules);
        assert_eq!(analysis.cycles, vec![vec!["AService", "BService"]]);
        assert_eq!(analysis.merge_suggestions.len(), 1);
        assert_eq!(analysis.merge_suggestions[0].cause, MergeCause::Cycle);
        assert_eq!(
            analysis.merge_suggestions[0].reason,
            "circular dependency: AService -> BService -> AService"
        );
    }

    #[test]
    fn each_cycle_through_a_shared_module_gets_a_merge() {
        let modules: ModuleSet = [
            ModuleSummary::new("AService").with_dependencies(["BService", "CService"]),
            ModuleSummary::new("BService").with_dependencies(["DService"]),
            ModuleSummary::new("CService").with_dependencies(["DService"]),
            ModuleSummary::new("DService").with_dependencies(["AService"]),
        ]
        .into_iter()
        .collect();

        let reasons: Vec<String> = run(&modules)
            .merge_suggestions
            .into_iter()
            .filter(|m| m.cause == MergeCause::Cycle)
            .map(|m| m.reason)
            .collect();
        assert_eq!(
            reasons,
            vec![
                "circular dependency: AService -> BService -> DService -> AService",
                "circular dependency: AService -> CService -> DService -> AService",
            ]
        );
    }

    #[test]
    fn six_dependencies_trigger_split() {
        let deps: Vec<String> = (0..6).map(|i| format!("Dep{i}Model")).collect();
        let modules: ModuleSet = [ModuleSummary::new("HubService").with_dependencies(deps)]
            .into_iter()
            .collect();

        let analysis = run(&modules);
        assert_eq!(
            analysis.split_suggestions,
            vec![SplitSuggestion {
                module: "HubService".into(),
                metric: SplitMetric::Dependencies,
                count: 6,
                threshold: 5,
                reason: "too many dependencies (6)".into(),
            }]
        );
    }

    #[test]
    fn fan_in_and_responsibilities_are_reported_independently() {
        let mut modules: ModuleSet = (0..6)
            .map(|i| ModuleSummary::new(format!("Caller{i}Service")).with_dependencies(["CoreUtil"]))
            .collect();
        modules.insert(
            ModuleSummary::new("CoreUtil").with_responsibilities((0..9).map(|i| format!("job {i}"))),
        );

        let analysis = run(&modules);
        let metrics: Vec<(String, SplitMetric, usize)> = analysis
            .split_suggestions
            .iter()
            .map(|s| (s.module.clone(), s.metric, s.count))
            .collect();
        assert_eq!(
            metrics,
            vec![
                ("CoreUtil".to_string(), SplitMetric::Dependents, 6),
                ("CoreUtil".to_string(), SplitMetric::Responsibilities, 9),
            ]
        );
    }

    #[test]
    fn at_threshold_is_not_flagged() {
        let deps: Vec<String> = (0..5).map(|i| format!("Dep{i}Model")).collect();
        let modules: ModuleSet = [ModuleSummary::new("HubService").with_dependencies(deps)]
            .into_iter()
            .collect();
        assert!(run(&modules).split_suggestions.is_empty());
    }
}
