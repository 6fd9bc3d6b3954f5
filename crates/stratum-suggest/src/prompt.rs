use serde_json::{json, Value};

use stratum_core::boundary::BoundaryAnalysis;
use stratum_core::{conventions, ModuleSet, ModuleSummary};

// --- Decomposition ---

pub fn module_identification_prompt(part: usize, total: usize) -> String {
    format!(
        "You are a senior software architect assistant. You are reading part {part} of {total} \
of a system architecture and requirements document.\n\n\
{conventions}\n\n\
Identify every module that is either described explicitly or logically required to implement \
the system, including implied components. A login feature, for example, needs an AuthController, \
an AuthService and an AuthRepository.\n\n\
For each module return:\n\
- module_name (following the naming conventions above)\n\
- responsibilities\n\
- key_apis (in the API format of the module's layer)\n\
- data_inputs\n\
- data_outputs\n\
- depends_on (names of other modules)\n\
- target_path (suggested relative path)\n\n\
Also add test modules ([Module]Test, [Feature]IntegrationTest) for business and data-access \
modules, and configuration or provider modules the system needs.\n\n\
Return the result as a JSON array of objects. Do not wrap it in markdown. Do not skip any \
functionality; create placeholder modules if unsure.",
        conventions = conventions::render()
    )
}

// --- Review ---

pub fn validator_prompt(part: usize, total: usize, boundary: Option<&BoundaryAnalysis>) -> String {
    let mut out = format!(
        "You are a senior system architect and reviewer.\n\
You are reading part {part} of {total} of a combined system architecture and requirements document.\n\n\
{conventions}\n\n\
Analyze the architecture for coherence, completeness and quality. Focus on:\n\
1. Whether all required functionality is covered\n\
2. Missing or redundant modules\n\
3. Overlapping responsibilities between modules\n\
4. Undefined dependencies (modules referenced but not defined)\n\
5. Layer structure: controllers depend only on services, services on data access, API formats \
match their layer\n\
6. Test coverage: every module has test modules, key APIs are covered, unit/integration/e2e \
tests are planned\n\
7. Specific, actionable suggestions\n",
        conventions = conventions::render()
    );

    if let Some(analysis) = boundary {
        let merges = serde_json::to_string_pretty(&analysis.merge_suggestions).unwrap_or_default();
        let splits = serde_json::to_string_pretty(&analysis.split_suggestions).unwrap_or_default();
        out.push_str(&format!(
            "\nAdditional architectural concerns to address:\n\n\
Potential module merges to consider:\n{merges}\n\n\
Potential module splits to consider:\n{splits}\n\n\
For overlapping modules, say explicitly which should be merged or how their responsibilities \
should be divided.\n"
        ));
    }

    out.push_str(
        "\nReturn a structured JSON object in exactly this format, with no explanation outside it:\n\n\
{\n\
  \"functional_coverage\": {\"conclusion\": \"✅ or ❌\", \"explanation\": \"...\"},\n\
  \"missing_or_redundant_modules\": {\"missing\": [\"...\"], \"redundant\": [\"...\"]},\n\
  \"overlapping_responsibilities\": [\"module A vs module B\"],\n\
  \"undefined_dependencies\": [\"ModuleX\"],\n\
  \"layer_violations\": [\"...\"],\n\
  \"api_format_issues\": [\"...\"],\n\
  \"test_coverage_issues\": [\"...\"],\n\
  \"suggestions\": [\"...\"]\n\
}\n\n\
Return ONLY the JSON object.",
    );
    out
}

/// System prompt for one review chunk: the opening part asks the model to
/// wait for the rest, the final part asks for the JSON answer.
pub fn review_chunk_prompt(part: usize, total: usize, boundary: Option<&BoundaryAnalysis>) -> String {
    if total <= 1 {
        validator_prompt(1, 1, boundary)
    } else if part <= 1 {
        format!(
            "{}\n\nIMPORTANT: the document arrives in {total} parts. Wait until you have received \
all of them before answering.",
            validator_prompt(part, total, boundary)
        )
    } else if part == total {
        format!(
            "{}\n\nThis is the final part. Analyze everything you have received and answer in the \
JSON format above.",
            validator_prompt(part, total, boundary)
        )
    } else {
        format!("Receiving part {part}/{total}. Wait until all parts have arrived before answering.")
    }
}

// --- Structure fixes ---

/// Compact context for a module related to the one being fixed.
pub fn related_entry(module: &ModuleSummary, relationship: &str) -> Value {
    let responsibilities: Vec<&String> = module.responsibilities.iter().take(3).collect();
    let key_apis: Vec<&String> = module.key_apis.iter().take(3).collect();
    json!({
        "module_name": module.module_name,
        "relationship": relationship,
        "responsibilities": responsibilities,
        "key_apis": key_apis,
    })
}

/// System prompt asking for a corrected summary of one module.
pub fn fix_prompt(module: &ModuleSummary, issues: &[String], related: &[Value]) -> String {
    let api_format = conventions::convention(module.layer)
        .map_or("the format of its layer", |c| c.api_format);
    let current = json!({
        "module_name": module.module_name,
        "responsibilities": module.responsibilities.iter().take(3).collect::<Vec<_>>(),
        "key_apis": module.key_apis.iter().take(3).collect::<Vec<_>>(),
        "data_inputs": module.data_inputs,
        "data_outputs": module.data_outputs,
        "depends_on": module.depends_on,
        "target_path": module.target_path,
    });
    let issues: String = issues.iter().map(|i| format!("- {i}\n")).collect();

    let mut out = format!(
        "You are a senior system architect fixing one module of a layered architecture.\n\n\
{conventions}\n\n\
Fix the module \"{name}\". It belongs to the {layer} layer; its key APIs should be: {api_format}.\n\n\
## CURRENT SUMMARY\n```json\n{current}\n```\n\n\
## DETECTED ISSUES\n{issues}",
        conventions = conventions::render(),
        name = module.module_name,
        layer = module.layer,
        current = serde_json::to_string_pretty(&current).unwrap_or_default(),
    );
    if !related.is_empty() {
        out.push_str(&format!(
            "\n## RELATED MODULES\n```json\n{}\n```\n",
            serde_json::to_string_pretty(related).unwrap_or_default()
        ));
    }
    out.push_str(
        "\n## INSTRUCTIONS\n\
1. Resolve every detected issue without changing what the module is for.\n\
2. Keep module_name exactly as it is.\n\
3. Give at least two responsibilities and non-empty key_apis, data_inputs, data_outputs and \
target_path.\n\
4. Only depend on modules the layering rules allow; drop dependencies on modules that do not \
exist unless they are clearly required.\n\n\
Return ONLY a JSON object with the fields module_name, responsibilities, key_apis, \
data_inputs, data_outputs, depends_on and target_path.",
    );
    out
}

// --- Review material ---

fn full_entry(module: &ModuleSummary) -> Value {
    json!({
        "module_name": module.module_name,
        "layer": module.layer,
        "responsibilities": module.responsibilities,
        "key_apis": module.key_apis,
        "data_inputs": module.data_inputs,
        "data_outputs": module.data_outputs,
        "depends_on": module.depends_on,
        "target_path": module.target_path,
    })
}

fn brief_entry(module: &ModuleSummary) -> Value {
    let responsibilities: Vec<&String> = module.responsibilities.iter().take(3).collect();
    json!({
        "module_name": module.module_name,
        "layer": module.layer,
        "responsibilities": responsibilities,
        "depends_on": module.depends_on,
    })
}

/// Requirements followed by every module summary, in name order.
pub fn review_material(requirements: &str, modules: &ModuleSet) -> String {
    let entries: Vec<Value> = modules.iter().map(full_entry).collect();
    format!(
        "{requirements}\n\nSummaries:\n{}",
        serde_json::to_string_pretty(&entries).unwrap_or_default()
    )
}

/// Like [`review_material`] but keeps only the first three responsibilities
/// and the dependencies of each module.
pub fn abbreviated_material(requirements: &str, modules: &ModuleSet) -> String {
    let entries: Vec<Value> = modules.iter().map(brief_entry).collect();
    format!(
        "{requirements}\n\nSummaries (abbreviated):\n{}",
        serde_json::to_string_pretty(&entries).unwrap_or_default()
    )
}
