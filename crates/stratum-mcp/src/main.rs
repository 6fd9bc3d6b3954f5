use std::path::{Path, PathBuf};
use std::sync::Arc;

use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    schemars, tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt,
};
use serde::Deserialize;
use serde_json::json;
use stratum_core::graph::ModuleGraph;
use stratum_core::store::{read_requirements, DirectoryStore, JsonFileSink, ModuleStore};
use stratum_core::{boundary, conventions, AiSettings, ModuleSet};
use stratum_suggest::{Dispatcher, FixOutcome, Fixer, RetryPolicy, Summarizer, Validator};

// --- Request types ---

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct CheckModuleRequest {
    /// Module name, e.g. "OrderService"
    name: String,
    /// Names of the modules it depends on
    depends_on: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct ValidateRequest {
    /// Validate only these modules. Omit to validate everything, including the AI review.
    scope: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct FixRequest {
    /// Upper bound on fix rounds (default 3)
    max_rounds: Option<usize>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct DecomposeRequest {
    /// Requirement text. Omit to read every *.md file in the requirements directory.
    requirements: Option<String>,
}

// --- Workspace ---

/// Everything a tool call touches, rooted at one data directory:
/// `modules/<Name>/full_summary.json`, `requirements/*.md` and
/// `reports/validation.json`.
struct Workspace {
    root: PathBuf,
    store: DirectoryStore,
    sink: JsonFileSink,
    settings: AiSettings,
    dispatcher: Dispatcher,
}

impl Workspace {
    fn open(root: PathBuf, settings: AiSettings) -> Self {
        Self {
            store: DirectoryStore::new(root.join("modules")),
            sink: JsonFileSink::new(root.join("reports").join("validation.json")),
            dispatcher: stratum_suggest::dispatcher_from_settings(&settings),
            settings,
            root,
        }
    }

    fn requirements_dir(&self) -> PathBuf {
        self.root.join("requirements")
    }

    fn requirements(&self, given: Option<String>) -> Result<String, String> {
        match given {
            Some(text) if !text.trim().is_empty() => Ok(text),
            _ => read_requirements(&self.requirements_dir()).map_err(|e| e.to_string()),
        }
    }

    fn modules(&self) -> Result<ModuleSet, String> {
        self.store.load_all().map_err(|e| e.to_string())
    }

    async fn fix(&self, max_rounds: Option<usize>) -> Result<FixOutcome, String> {
        let requirements = self.requirements(None)?;
        let mut fixer = Fixer::new(&self.dispatcher, &self.store, &self.sink)
            .with_retry(RetryPolicy::from_settings(&self.settings.pipeline));
        if let Some(rounds) = max_rounds {
            fixer = fixer.with_max_rounds(rounds);
        }
        fixer.fix(&requirements).await.map_err(|e| e.to_string())
    }
}

fn data_dir() -> PathBuf {
    std::env::var_os("STRATUM_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("data"))
}

// --- Server ---

#[derive(Clone)]
pub struct StratumServer {
    tool_router: ToolRouter<Self>,
    workspace: Arc<Workspace>,
}

#[tool_router]
impl StratumServer {
    fn new(workspace: Workspace) -> Self {
        Self {
            tool_router: Self::tool_router(),
            workspace: Arc::new(workspace),
        }
    }

    #[tool(description = "Show the layer conventions: suffixes, API formats, target paths and allowed dependencies per layer")]
    fn get_conventions(&self) -> Result<CallToolResult, McpError> {
        Ok(CallToolResult::success(vec![Content::text(conventions::render())]))
    }

    #[tool(
        description = "Check a module name and its dependencies against the conventions. Returns the inferred layer, whether the name is valid, the suggested target path and every dependency-rule violation."
    )]
    fn check_module(
        &self,
        Parameters(req): Parameters<CheckModuleRequest>,
    ) -> Result<CallToolResult, McpError> {
        let deps = req.depends_on.unwrap_or_default();
        Ok(CallToolResult::success(vec![Content::text(pretty(
            &module_check(&req.name, &deps),
        ))]))
    }

    #[tool(description = "List stored modules with their layer and dependencies")]
    fn list_modules(&self) -> Result<CallToolResult, McpError> {
        match self.workspace.modules() {
            Ok(modules) if modules.is_empty() => Ok(CallToolResult::success(vec![Content::text(
                "No modules found. Use decompose_requirements to create them.",
            )])),
            Ok(modules) => Ok(CallToolResult::success(vec![Content::text(module_listing(
                &modules,
            ))])),
            Err(e) => Ok(CallToolResult::error(vec![Content::text(format!(
                "Failed to load modules: {e}"
            ))])),
        }
    }

    #[tool(
        description = "Analyze the stored modules without the AI review: dependency cycles, merge and split suggestions, undefined dependencies and a dependency-first build order when the graph is acyclic."
    )]
    fn analyze_boundaries(&self) -> Result<CallToolResult, McpError> {
        match self.workspace.modules() {
            Ok(modules) => Ok(CallToolResult::success(vec![Content::text(pretty(
                &boundary_overview(&modules),
            ))])),
            Err(e) => Ok(CallToolResult::error(vec![Content::text(format!(
                "Failed to load modules: {e}"
            ))])),
        }
    }

    #[tool(
        description = "Validate the architecture: structural scan, boundary analysis and (when unscoped) an AI review of requirements plus module summaries. Writes the report to reports/validation.json and returns it with an issue summary."
    )]
    async fn validate_architecture(
        &self,
        Parameters(req): Parameters<ValidateRequest>,
    ) -> Result<CallToolResult, McpError> {
        let ws = &self.workspace;
        let requirements = match ws.requirements(None) {
            Ok(text) => text,
            Err(e) => {
                return Ok(CallToolResult::error(vec![Content::text(format!(
                    "Failed to read requirements: {e}"
                ))]))
            }
        };
        let pipeline = &ws.settings.pipeline;
        let validator = Validator::new(&ws.dispatcher, &ws.store)
            .with_sink(&ws.sink)
            .with_retry(RetryPolicy::from_settings(pipeline))
            .with_review_token_ceiling(pipeline.review_token_ceiling);

        match validator.validate(&requirements, req.scope.as_deref()).await {
            Ok(outcome) => Ok(CallToolResult::success(vec![Content::text(pretty(&json!({
                "issues": outcome.issues,
                "report": outcome.report,
            })))])),
            Err(e) => Ok(CallToolResult::error(vec![Content::text(format!(
                "Validation failed: {e}"
            ))])),
        }
    }

    #[tool(
        description = "Ask the model to repair modules flagged by the last validation (missing fields, undefined dependencies, layering violations), store the corrected summaries and re-validate just those modules. Repeats for a few rounds; a round that adds issues is rolled back."
    )]
    async fn fix_structure(
        &self,
        Parameters(req): Parameters<FixRequest>,
    ) -> Result<CallToolResult, McpError> {
        match self.workspace.fix(req.max_rounds).await {
            Ok(outcome) => Ok(CallToolResult::success(vec![Content::text(pretty(
                &fix_overview(&outcome),
            ))])),
            Err(e) => Ok(CallToolResult::error(vec![Content::text(format!(
                "Fixing failed: {e}"
            ))])),
        }
    }

    #[tool(
        description = "Ask the model for the modules the requirements imply and store them, replacing stored modules of the same name. Long requirements are sent in parts."
    )]
    async fn decompose_requirements(
        &self,
        Parameters(req): Parameters<DecomposeRequest>,
    ) -> Result<CallToolResult, McpError> {
        let ws = &self.workspace;
        let requirements = match ws.requirements(req.requirements) {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                return Ok(CallToolResult::error(vec![Content::text(format!(
                    "No requirements given and no *.md files in {}",
                    ws.requirements_dir().display()
                ))]))
            }
            Err(e) => {
                return Ok(CallToolResult::error(vec![Content::text(format!(
                    "Failed to read requirements: {e}"
                ))]))
            }
        };

        let modules = match Summarizer::new(&ws.dispatcher).decompose(&requirements).await {
            Ok(modules) => modules,
            Err(e) => {
                return Ok(CallToolResult::error(vec![Content::text(format!(
                    "Decomposition failed: {e}"
                ))]))
            }
        };
        if modules.is_empty() {
            return Ok(CallToolResult::error(vec![Content::text(
                "The model returned no usable modules; nothing was stored.",
            )]));
        }
        let stored = match ws.store.save(&modules) {
            Ok(stored) => stored,
            Err(e) => {
                return Ok(CallToolResult::error(vec![Content::text(format!(
                    "Failed to store modules: {e}"
                ))]))
            }
        };
        Ok(CallToolResult::success(vec![Content::text(format!(
            "Stored {stored} of {} modules:\n{}",
            modules.len(),
            module_listing(&modules)
        ))]))
    }
}

#[tool_handler]
impl ServerHandler for StratumServer {
    fn get_info(&self) -> ServerInfo {
        let instructions = format!("{INSTRUCTIONS}\n\n{}", conventions::render());
        ServerInfo {
            instructions: Some(instructions.into()),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

// --- Helpers ---

fn pretty(value: &serde_json::Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("Serialization error: {e}"))
}

fn module_check(name: &str, deps: &[String]) -> serde_json::Value {
    let violations: Vec<String> = conventions::validate_dependencies(name, deps)
        .iter()
        .map(ToString::to_string)
        .collect();
    let name_problem = conventions::validate_name(name).err();
    json!({
        "name": name,
        "layer": conventions::infer_layer(name),
        "module_type": conventions::module_type(name),
        "valid_name": name_problem.is_none(),
        "name_problem": name_problem,
        "target_path": conventions::target_path(name),
        "violations": violations,
    })
}

fn module_listing(modules: &ModuleSet) -> String {
    modules
        .iter()
        .map(|m| {
            if m.depends_on.is_empty() {
                format!("{} ({})", m.module_name, m.layer.as_str())
            } else {
                format!(
                    "{} ({}) -> {}",
                    m.module_name,
                    m.layer.as_str(),
                    m.depends_on.join(", ")
                )
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn boundary_overview(modules: &ModuleSet) -> serde_json::Value {
    let graph = ModuleGraph::build(modules);
    let analysis = boundary::analyze(modules, &graph);
    json!({
        "modules": graph.len(),
        "cycles": analysis.cycles,
        "merge_suggestions": analysis.merge_suggestions,
        "split_suggestions": analysis.split_suggestions,
        "undefined_dependencies": graph.undefined_dependencies(),
        "build_order": graph.topological_order(),
    })
}

fn fix_overview(outcome: &FixOutcome) -> serde_json::Value {
    json!({
        "rounds": outcome.rounds,
        "issues": outcome.issues,
        "remaining_structure_issues": outcome.report.structure_scan,
    })
}

const INSTRUCTIONS: &str = r#"stratum turns requirement documents into a layered module decomposition and validates it before any code is written.

## Data
Everything lives under the data directory ($STRATUM_DATA_DIR, default ./data):
- `requirements/*.md`: requirement documents, read in name order
- `modules/<ModuleName>/full_summary.json`: one summary per module (module_name, responsibilities, key_apis, data_inputs, data_outputs, depends_on, target_path)
- `reports/validation.json`: the latest validation report

## Workflow
1. `decompose_requirements` to propose modules from the requirements.
2. `list_modules` and `check_module` to inspect names and dependencies.
3. `analyze_boundaries` for cycles and merge/split suggestions (no model call).
4. `validate_architecture` for the full report. Pass `scope` to re-check a few modules without a new AI review.
5. `fix_structure` to have the model repair the modules the report flags, then re-validate them.

Module names must end in a layer suffix, and dependencies must follow the layering rules below."#;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let root = data_dir();
    log::info!("serving {}", display_root(&root));
    let workspace = Workspace::open(root, stratum_core::read_settings());

    let service = StratumServer::new(workspace)
        .serve(rmcp::transport::io::stdio())
        .await
        .inspect_err(|e| log::error!("MCP server error: {e}"))?;
    service.waiting().await?;
    log::info!("stratum MCP server stopped");
    Ok(())
}

fn display_root(root: &Path) -> String {
    root.canonicalize()
        .unwrap_or_else(|_| root.to_path_buf())
        .display()
        .to_string()
}
