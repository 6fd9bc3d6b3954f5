use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use crate::boundary::BoundaryAnalysis;

/// Top-level field every usable AI review must carry.
pub const REQUIRED_REVIEW_FIELD: &str = "functional_coverage";

/// Result of one validation run.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ValidationReport {
    /// Structured review from the model, or [`review_failed`] when none was usable.
    #[serde(default)]
    pub ai_review: Map<String, Value>,
    /// Structural problems per module; clean modules are absent.
    #[serde(default)]
    pub structure_scan: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub boundary_analysis: BoundaryAnalysis,
}

/// Placeholder review used when the model never produced a usable answer.
pub fn review_failed() -> Map<String, Value> {
    let value = json!({
        "functional_coverage": {
            "conclusion": "❓",
            "explanation": "validation failed"
        },
        "missing_or_redundant_modules": {"missing": [], "redundant": []},
        "overlapping_responsibilities": [],
        "undefined_dependencies": [],
        "suggestions": ["AI review could not be completed; check the structural scan and boundary analysis"]
    });
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

pub fn review_is_usable(review: &Map<String, Value>) -> bool {
    review.contains_key(REQUIRED_REVIEW_FIELD)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, schemars::JsonSchema)]
pub struct IssueSummary {
    pub total_issues: usize,
    pub structure_issues: usize,
    pub overlapping: usize,
    pub undefined: usize,
    pub missing: usize,
    pub redundant: usize,
}

impl IssueSummary {
    pub fn from_report(report: &ValidationReport) -> Self {
        let review = &report.ai_review;
        let structure_issues = report.structure_scan.values().map(Vec::len).sum();
        let overlapping = array_len(review.get("overlapping_responsibilities"));
        let undefined = array_len(review.get("undefined_dependencies"));
        let modules = review.get("missing_or_redundant_modules");
        let missing = array_len(modules.and_then(|m| m.get("missing")));
        let redundant = array_len(modules.and_then(|m| m.get("redundant")));

        Self {
            total_issues: structure_issues + overlapping + undefined + missing + redundant,
            structure_issues,
            overlapping,
            undefined,
            missing,
            redundant,
        }
    }
}

fn array_len(value: Option<&Value>) -> usize {
    value.and_then(Value::as_array).map_or(0, Vec::len)
}
