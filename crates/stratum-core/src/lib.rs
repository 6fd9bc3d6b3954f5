pub mod boundary;
pub mod conventions;
mod error;
pub mod graph;
pub mod report;
pub mod store;
pub mod structure;

pub use error::{CoreError, Result};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::PathBuf;

// --- Types ---

/// Architectural role of a module, inferred from its name suffix.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
    schemars::JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Presentation,
    BusinessLogic,
    DataAccess,
    Model,
    Utility,
    Testing,
    Infrastructure,
    #[default]
    Unknown,
}

impl Layer {
    pub fn as_str(self) -> &'static str {
        match self {
            Layer::Presentation => "presentation",
            Layer::BusinessLogic => "business_logic",
            Layer::DataAccess => "data_access",
            Layer::Model => "model",
            Layer::Utility => "utility",
            Layer::Testing => "testing",
            Layer::Infrastructure => "infrastructure",
            Layer::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One module of a proposed decomposition, as produced by the model and
/// persisted as `full_summary.json`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, schemars::JsonSchema)]
pub struct ModuleSummary {
    pub module_name: String,
    /// Always recomputed from `module_name` on ingestion.
    #[serde(default)]
    pub layer: Layer,
    #[serde(default)]
    pub responsibilities: Vec<String>,
    #[serde(default)]
    pub key_apis: Vec<String>,
    #[serde(default)]
    pub data_inputs: Vec<String>,
    #[serde(default)]
    pub data_outputs: Vec<String>,
    /// Declared dependency names, unique, in first-seen order.
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub target_path: String,
    /// Problems found while coercing a loosely-typed record.
    #[serde(skip)]
    pub shape_problems: Vec<String>,
}

const LIST_FIELDS: [&str; 5] = [
    "responsibilities",
    "key_apis",
    "data_inputs",
    "data_outputs",
    "depends_on",
];

impl ModuleSummary {
    pub fn new(name: impl Into<String>) -> Self {
        let module_name = name.into();
        Self {
            layer: conventions::infer_layer(&module_name),
            module_name,
            ..Default::default()
        }
    }

    pub fn with_responsibilities<I, S>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.responsibilities = items.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_dependencies<I, S>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = Vec::new();
        for dep in items {
            push_unique(&mut self.depends_on, dep.into());
        }
        self
    }

    /// Fill every field the structural scan requires with placeholder content.
    pub fn complete(mut self) -> Self {
        let name = self.module_name.clone();
        if self.responsibilities.len() < 2 {
            self.responsibilities = vec![format!("Own {name} state"), format!("Expose {name} API")];
        }
        if self.key_apis.is_empty() {
            self.key_apis = vec![format!("{name}::handle")];
        }
        if self.data_inputs.is_empty() {
            self.data_inputs = vec!["request".to_string()];
        }
        if self.data_outputs.is_empty() {
            self.data_outputs = vec!["response".to_string()];
        }
        if self.target_path.is_empty() {
            self.target_path = conventions::target_path(&name).unwrap_or("src/").to_string();
        }
        self
    }

    /// Coerce a loosely-typed JSON record into a summary.
    ///
    /// List fields accept a list, a single string or null. Anything that had
    /// to be coerced is noted in `shape_problems`. Returns `None` when the
    /// record is not an object or carries no name at all.
    pub fn from_value(value: &Value, fallback_name: Option<&str>) -> Option<Self> {
        let obj = value.as_object()?;
        let name = obj
            .get("module_name")
            .or_else(|| obj.get("name"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .or(fallback_name)?
            .to_string();

        let mut summary = ModuleSummary::new(name);
        for field in LIST_FIELDS {
            let items = coerce_list(obj.get(field), field, &mut summary.shape_problems);
            match field {
                "responsibilities" => summary.responsibilities = items,
                "key_apis" => summary.key_apis = items,
                "data_inputs" => summary.data_inputs = items,
                "data_outputs" => summary.data_outputs = items,
                _ => {
                    for dep in items {
                        push_unique(&mut summary.depends_on, dep);
                    }
                }
            }
        }
        summary.target_path = obj
            .get("target_path")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Some(summary)
    }
}

fn push_unique(list: &mut Vec<String>, item: String) {
    if !item.is_empty() && !list.contains(&item) {
        list.push(item);
    }
}

fn coerce_list(value: Option<&Value>, field: &str, problems: &mut Vec<String>) -> Vec<String> {
    match value {
        None | Some(Value::Null) => vec![],
        Some(Value::String(s)) => {
            problems.push(format!("{field} should be an array"));
            if s.trim().is_empty() {
                vec![]
            } else {
                vec![s.clone()]
            }
        }
        Some(Value::Array(items)) => {
            let mut out = Vec::with_capacity(items.len());
            let mut mixed = false;
            for item in items {
                match item {
                    Value::String(s) => out.push(s.clone()),
                    Value::Null => {}
                    other => {
                        mixed = true;
                        out.push(other.to_string());
                    }
                }
            }
            if mixed {
                problems.push(format!("{field} should contain only strings"));
            }
            out
        }
        Some(other) => {
            problems.push(format!("{field} should be an array"));
            vec![other.to_string()]
        }
    }
}

/// The two shapes module collections arrive in: keyed by name, or a plain list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ModuleContainer {
    List(Vec<Value>),
    ById(serde_json::Map<String, Value>),
}

impl ModuleContainer {
    /// Resolve into the canonical name-keyed set. Records that cannot be read
    /// as a module are logged and skipped.
    pub fn into_module_set(self) -> ModuleSet {
        let mut set = ModuleSet::new();
        match self {
            ModuleContainer::List(items) => {
                for item in &items {
                    match ModuleSummary::from_value(item, None) {
                        Some(summary) => {
                            set.insert(summary);
                        }
                        None => log::warn!("skipping module record without a name: {item}"),
                    }
                }
            }
            ModuleContainer::ById(map) => {
                for (key, item) in &map {
                    match ModuleSummary::from_value(item, Some(key)) {
                        Some(summary) => {
                            set.insert(summary);
                        }
                        None => log::warn!("skipping module record '{key}': not an object"),
                    }
                }
            }
        }
        set
    }
}

/// Canonical module collection, keyed and ordered by module name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ModuleSet {
    modules: BTreeMap<String, ModuleSummary>,
}

impl ModuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a module, replacing any module with the same name.
    pub fn insert(&mut self, mut summary: ModuleSummary) -> Option<ModuleSummary> {
        summary.layer = conventions::infer_layer(&summary.module_name);
        self.modules.insert(summary.module_name.clone(), summary)
    }

    pub fn get(&self, name: &str) -> Option<&ModuleSummary> {
        self.modules.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModuleSummary> {
        self.modules.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    /// Modules whose names appear in `scope`. Unknown names are ignored.
    pub fn scoped(&self, scope: &[String]) -> ModuleSet {
        self.iter()
            .filter(|m| scope.contains(&m.module_name))
            .cloned()
            .collect()
    }
}

impl FromIterator<ModuleSummary> for ModuleSet {
    fn from_iter<T: IntoIterator<Item = ModuleSummary>>(iter: T) -> Self {
        let mut set = ModuleSet::new();
        for summary in iter {
            set.insert(summary);
        }
        set
    }
}

impl<'de> Deserialize<'de> for ModuleSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        ModuleContainer::deserialize(deserializer).map(ModuleContainer::into_module_set)
    }
}

// --- AI Settings ---

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AiSettings {
    pub provider: String,
    pub api_key: String,
    pub model: String,
    #[serde(default)]
    pub pipeline: PipelineSettings,
}

/// Bounds and knobs for the chunked completion pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineSettings {
    pub max_input_tokens: usize,
    pub max_chunks: usize,
    pub chars_per_token: usize,
    pub review_token_ceiling: usize,
    pub retry_attempts: usize,
    pub retry_delay_ms: u64,
    pub continuation_steps: usize,
    pub mock: bool,
    /// `tokenizer.json` for exact token counts; word segmentation otherwise.
    pub tokenizer_path: Option<PathBuf>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_input_tokens: 15_000,
            max_chunks: 10,
            chars_per_token: 4,
            review_token_ceiling: 100_000,
            retry_attempts: 3,
            retry_delay_ms: 10_000,
            continuation_steps: 3,
            mock: false,
            tokenizer_path: None,
        }
    }
}

/// Resolve the global settings directory (~/.stratum/).
pub fn stratum_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".stratum")
}

fn settings_path() -> PathBuf {
    stratum_dir().join("settings.json")
}

/// Read settings, falling back to defaults on a missing or malformed file.
/// `STRATUM_MOCK_LLM` forces the mock completion service.
pub fn read_settings() -> AiSettings {
    let path = settings_path();
    let mut settings: AiSettings = if path.exists() {
        fs::read_to_string(&path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    } else {
        AiSettings::default()
    };
    if mock_forced() {
        settings.pipeline.mock = true;
    }
    settings
}

pub fn write_settings(settings: &AiSettings) -> Result<()> {
    fs::create_dir_all(stratum_dir())?;
    let json = serde_json::to_string_pretty(settings)?;
    fs::write(settings_path(), json)?;
    Ok(())
}

fn mock_forced() -> bool {
    std::env::var("STRATUM_MOCK_LLM")
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

pub fn ai_configured(settings: &AiSettings) -> bool {
    !settings.provider.is_empty()
        && !settings.model.is_empty()
        && (settings.provider == "ollama" || !settings.api_key.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn list_container_resolves_by_name() {
        let raw = json!([
            {"module_name": "UserService", "depends_on": ["UserRepository"]},
            {"module_name": "UserRepository"}
        ]);
        let set: ModuleSet = serde_json::from_value(raw).unwrap();
        assert_eq!(set.names().collect::<Vec<_>>(), vec!["UserRepository", "UserService"]);
        assert_eq!(set.get("UserService").unwrap().layer, Layer::BusinessLogic);
    }

    #[test]
    fn keyed_container_uses_key_when_name_missing() {
        let raw = json!({
            "OrderController": {"responsibilities": ["Accept orders", "Render receipts"]},
            "ignored": 42
        });
        let set: ModuleSet = serde_json::from_value(raw).unwrap();
        assert_eq!(set.len(), 1);
        let module = set.get("OrderController").unwrap();
        assert_eq!(module.layer, Layer::Presentation);
        assert_eq!(module.responsibilities.len(), 2);
    }

    #[test]
    fn loose_fields_are_coerced_and_noted() {
        let raw = json!({
            "module_name": "CartService",
            "depends_on": "CartRepository",
            "key_apis": null,
            "responsibilities": ["Price cart", {"nested": true}]
        });
        let module = ModuleSummary::from_value(&raw, None).unwrap();
        assert_eq!(module.depends_on, vec!["CartRepository"]);
        assert!(module.key_apis.is_empty());
        assert_eq!(
            module.shape_problems,
            vec![
                "responsibilities should contain only strings".to_string(),
                "depends_on should be an array".to_string(),
            ]
        );
    }

    #[test]
    fn duplicate_dependencies_keep_first_order() {
        let module = ModuleSummary::new("AService").with_dependencies(["B", "A", "B", ""]);
        assert_eq!(module.depends_on, vec!["B", "A"]);
    }

    #[test]
    fn declared_layer_is_never_trusted() {
        let raw = json!([{"module_name": "UserController", "layer": "model"}]);
        let set: ModuleSet = serde_json::from_value(raw).unwrap();
        assert_eq!(set.get("UserController").unwrap().layer, Layer::Presentation);
    }

    #[test]
    fn pipeline_settings_fill_defaults() {
        let settings: AiSettings = serde_json::from_value(json!({
            "provider": "openai",
            "apiKey": "k",
            "model": "gpt-4o",
            "pipeline": {"maxChunks": 4}
        }))
        .unwrap();
        assert_eq!(settings.pipeline.max_chunks, 4);
        assert_eq!(settings.pipeline.max_input_tokens, 15_000);
        assert!(ai_configured(&settings));
    }

    #[test]
    fn ollama_needs_no_key() {
        let settings = AiSettings {
            provider: "ollama".into(),
            model: "llama3".into(),
            ..Default::default()
        };
        assert!(ai_configured(&settings));
        assert!(!ai_configured(&AiSettings::default()));
    }
}
