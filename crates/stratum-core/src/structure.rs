//! Deterministic per-module checks: naming, required fields and dependency
//! layering. Runs without any model involvement.

use std::collections::BTreeMap;

use crate::conventions;
use crate::{ModuleSet, ModuleSummary};

/// Problems found in one module, in a stable order. Empty when the module is clean.
///
/// `index` is the full module set, used to resolve dependency names.
pub fn check_module(module: &ModuleSummary, index: &ModuleSet) -> Vec<String> {
    let mut problems = Vec::new();

    if let Err(reason) = conventions::validate_name(&module.module_name) {
        problems.push(format!("invalid module name: {reason}"));
    }

    match module.responsibilities.len() {
        0 => problems.push("missing responsibilities".to_string()),
        1 => problems.push("too few responsibilities".to_string()),
        _ => {}
    }
    for (field, items) in [
        ("key_apis", &module.key_apis),
        ("data_inputs", &module.data_inputs),
        ("data_outputs", &module.data_outputs),
    ] {
        if items.is_empty() {
            problems.push(format!("missing {field}"));
        }
    }
    if module.target_path.trim().is_empty() {
        problems.push("missing target_path".to_string());
    }

    problems.extend(module.shape_problems.iter().cloned());

    if !module.depends_on.is_empty() {
        problems.extend(
            conventions::validate_dependencies(&module.module_name, &module.depends_on)
                .iter()
                .map(ToString::to_string),
        );
    }
    for dep in &module.depends_on {
        if *dep != module.module_name && !index.contains(dep) {
            problems.push(format!("undefined dependency: {dep}"));
        }
    }
    problems
}

/// Run [`check_module`] over `modules`, keeping only modules with problems.
pub fn scan_modules<'a>(
    modules: impl IntoIterator<Item = &'a ModuleSummary>,
    index: &ModuleSet,
) -> BTreeMap<String, Vec<String>> {
    let mut scan = BTreeMap::new();
    for module in modules {
        let problems = check_module(module, index);
        if !problems.is_empty() {
            log::debug!("{}: {} structural problems", module.module_name, problems.len());
            scan.insert(module.module_name.clone(), problems);
        }
    }
    scan
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn layered() -> ModuleSet {
        [
            ModuleSummary::new("Controller").with_dependencies(["Service"]).complete(),
            ModuleSummary::new("Service").with_dependencies(["Repository"]).complete(),
            ModuleSummary::new("Repository").complete(),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn layered_modules_are_clean() {
        let modules = layered();
        assert!(scan_modules(modules.iter(), &modules).is_empty());
    }

    #[test]
    fn back_edge_adds_exactly_one_violation() {
        let mut modules = layered();
        modules.insert(
            ModuleSummary::new("Repository")
                .with_dependencies(["Controller"])
                .complete(),
        );
        let scan = scan_modules(modules.iter(), &modules);
        assert_eq!(
            scan,
            BTreeMap::from([(
                "Repository".to_string(),
                vec!["Invalid dependency: 'Repository' (data_access) cannot depend on 'Controller' (presentation)"
                    .to_string()]
            )])
        );
    }

    #[test]
    fn problems_come_in_fixed_order() {
        let raw = json!({
            "module_name": "userThing",
            "responsibilities": "Do stuff",
            "depends_on": ["GhostService"]
        });
        let module = ModuleSummary::from_value(&raw, None).unwrap();
        let index: ModuleSet = [module.clone()].into_iter().collect();
        let problems = check_module(&module, &index);
        assert_eq!(
            problems,
            vec![
                "invalid module name: Module name must start with an uppercase letter",
                "too few responsibilities",
                "missing key_apis",
                "missing data_inputs",
                "missing data_outputs",
                "missing target_path",
                "responsibilities should be an array",
                "Cannot validate dependencies for module 'userThing' with unknown layer",
                "undefined dependency: GhostService",
            ]
        );
    }

    #[test]
    fn self_dependency_is_not_undefined() {
        let module = ModuleSummary::new("LoopService")
            .with_dependencies(["LoopService"])
            .complete();
        let index: ModuleSet = [module.clone()].into_iter().collect();
        assert!(check_module(&module, &index).is_empty());
    }
}
