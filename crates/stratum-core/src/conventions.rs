//! Architecture conventions: the seven layers, the name suffixes that place a
//! module in a layer, and the layers each layer may depend on.
//!
//! The table is process-wide and immutable. Everything that classifies a
//! module (structural scan, boundary analysis, review prompts) reads it from
//! here.

use std::fmt;

use crate::Layer;

pub struct LayerConvention {
    pub layer: Layer,
    /// Recognized module-name suffixes, e.g. `Controller` in `UserController`.
    pub suffixes: &'static [&'static str],
    pub responsibilities: &'static str,
    pub api_format: &'static str,
    pub target_path: &'static str,
    /// Layers a module of this layer may depend on.
    pub may_depend_on: &'static [Layer],
}

/// Layers in priority order. Suffix ties resolve to the earlier entry.
pub const LAYERS: [LayerConvention; 7] = [
    LayerConvention {
        layer: Layer::Presentation,
        suffixes: &["Controller", "Page", "View", "Component"],
        responsibilities: "Handle user interaction, input validation, and response formatting",
        api_format: "REST/GraphQL endpoints, UI components",
        target_path: "app/controllers/",
        may_depend_on: &[
            Layer::Presentation,
            Layer::BusinessLogic,
            Layer::Model,
            Layer::Utility,
        ],
    },
    LayerConvention {
        layer: Layer::BusinessLogic,
        suffixes: &["Service", "Manager", "Orchestrator", "Processor"],
        responsibilities: "Implement business rules, orchestrate operations",
        api_format: "Method calls with domain objects",
        target_path: "services/",
        may_depend_on: &[
            Layer::BusinessLogic,
            Layer::DataAccess,
            Layer::Model,
            Layer::Utility,
        ],
    },
    LayerConvention {
        layer: Layer::DataAccess,
        suffixes: &["Repository", "DAO", "Store", "Persistence"],
        responsibilities: "Data access, storage, and retrieval",
        api_format: "CRUD operations, query methods",
        target_path: "data/repositories/",
        may_depend_on: &[Layer::DataAccess, Layer::Model, Layer::Utility],
    },
    LayerConvention {
        layer: Layer::Model,
        suffixes: &["Model", "Entity", "DTO", "Schema"],
        responsibilities: "Define data structures and domain objects",
        api_format: "Properties, minimal behavior",
        target_path: "models/",
        may_depend_on: &[Layer::Model, Layer::Utility],
    },
    LayerConvention {
        layer: Layer::Utility,
        suffixes: &["Util", "Helper", "Utils", "Common"],
        responsibilities: "Provide shared functionality and utilities",
        api_format: "Static utility methods",
        target_path: "utils/",
        may_depend_on: &[Layer::Utility],
    },
    LayerConvention {
        layer: Layer::Testing,
        suffixes: &["Test", "Mock", "Fixture", "TestCase"],
        responsibilities: "Test application components",
        api_format: "Test methods",
        target_path: "tests/",
        may_depend_on: &[
            Layer::Testing,
            Layer::Presentation,
            Layer::BusinessLogic,
            Layer::DataAccess,
            Layer::Model,
            Layer::Utility,
            Layer::Infrastructure,
        ],
    },
    LayerConvention {
        layer: Layer::Infrastructure,
        suffixes: &["Config", "Module", "Provider", "Factory"],
        responsibilities: "Configure system components and infrastructure",
        api_format: "Configuration methods",
        target_path: "config/",
        may_depend_on: &[Layer::Infrastructure, Layer::Utility],
    },
];

/// Layering rules in prose, for review prompts and MCP instructions.
pub const RULES: &str = "\
1. Presentation modules (controllers, pages, views) call the business layer. They never reach \
into repositories or other data-access modules directly.\n\
2. Business-logic modules (services, managers) own the rules and orchestrate data access. \
They never depend on presentation modules.\n\
3. Data-access modules depend only on models and utilities.\n\
4. Models are plain data: they depend on nothing but other models and utilities.\n\
5. Utilities are leaves. A utility that needs another layer is misplaced.\n\
6. Infrastructure (config, providers, factories) depends only on itself and utilities.\n\
7. Test modules may depend on anything.\n\
8. Every module name starts with an uppercase letter and ends with its layer suffix.\n\
9. Every dependency names a module that exists in the decomposition.";

pub fn convention(layer: Layer) -> Option<&'static LayerConvention> {
    LAYERS.iter().find(|c| c.layer == layer)
}

/// Longest recognized suffix of `name`, with the convention it belongs to.
pub fn match_suffix(name: &str) -> Option<(&'static LayerConvention, &'static str)> {
    let mut best: Option<(&'static LayerConvention, &'static str)> = None;
    for convention in LAYERS.iter() {
        for suffix in convention.suffixes {
            if !name.ends_with(suffix) {
                continue;
            }
            if best.map_or(true, |(_, current)| suffix.len() > current.len()) {
                best = Some((convention, suffix));
            }
        }
    }
    best
}

pub fn infer_layer(name: &str) -> Layer {
    match_suffix(name).map_or(Layer::Unknown, |(c, _)| c.layer)
}

/// The suffix that classified `name`, e.g. `Repository`.
pub fn module_type(name: &str) -> Option<&'static str> {
    match_suffix(name).map(|(_, suffix)| suffix)
}

pub fn target_path(name: &str) -> Option<&'static str> {
    match_suffix(name).map(|(c, _)| c.target_path)
}

/// `name` without its layer suffix; names without one come back unchanged.
pub fn base_name(name: &str) -> &str {
    match module_type(name) {
        Some(suffix) => &name[..name.len() - suffix.len()],
        None => name,
    }
}

pub fn all_suffixes() -> impl Iterator<Item = &'static str> {
    LAYERS.iter().flat_map(|c| c.suffixes.iter().copied())
}

pub fn may_depend(from: Layer, to: Layer) -> bool {
    convention(from).is_some_and(|c| c.may_depend_on.contains(&to))
}

/// Check a module name against the naming conventions.
pub fn validate_name(name: &str) -> Result<(), String> {
    let Some(first) = name.chars().next() else {
        return Err("Module name cannot be empty".to_string());
    };
    if !first.is_uppercase() {
        return Err("Module name must start with an uppercase letter".to_string());
    }
    if infer_layer(name) == Layer::Unknown {
        let suffixes: Vec<&str> = all_suffixes().collect();
        return Err(format!(
            "Module name must end with one of these suffixes: {}",
            suffixes.join(", ")
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyViolation {
    /// The module itself has no layer, so none of its dependencies can be checked.
    UnknownModuleLayer { module: String },
    UnknownDependencyLayer { dependency: String },
    Forbidden {
        module: String,
        module_layer: Layer,
        dependency: String,
        dependency_layer: Layer,
    },
}

impl fmt::Display for DependencyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyViolation::UnknownModuleLayer { module } => write!(
                f,
                "Cannot validate dependencies for module '{module}' with unknown layer"
            ),
            DependencyViolation::UnknownDependencyLayer { dependency } => {
                write!(f, "Dependency '{dependency}' has unknown layer")
            }
            DependencyViolation::Forbidden {
                module,
                module_layer,
                dependency,
                dependency_layer,
            } => write!(
                f,
                "Invalid dependency: '{module}' ({module_layer}) cannot depend on '{dependency}' ({dependency_layer})"
            ),
        }
    }
}

/// Check each dependency's layer against what `name`'s layer may depend on.
pub fn validate_dependencies<S: AsRef<str>>(name: &str, deps: &[S]) -> Vec<DependencyViolation> {
    let module_layer = infer_layer(name);
    if module_layer == Layer::Unknown {
        return vec![DependencyViolation::UnknownModuleLayer {
            module: name.to_string(),
        }];
    }

    let mut violations = Vec::new();
    for dep in deps {
        let dep = dep.as_ref();
        let dep_layer = infer_layer(dep);
        if dep_layer == Layer::Unknown {
            violations.push(DependencyViolation::UnknownDependencyLayer {
                dependency: dep.to_string(),
            });
        } else if !may_depend(module_layer, dep_layer) {
            violations.push(DependencyViolation::Forbidden {
                module: name.to_string(),
                module_layer,
                dependency: dep.to_string(),
                dependency_layer: dep_layer,
            });
        }
    }
    violations
}

/// Render the convention table as prompt text.
pub fn render() -> String {
    let mut out = String::with_capacity(2048);
    out.push_str("## Architecture Conventions\n");
    for c in LAYERS.iter() {
        out.push_str("- ");
        out.push_str(c.layer.as_str());
        out.push_str(": suffixes ");
        out.push_str(&c.suffixes.join("/"));
        out.push_str("; ");
        out.push_str(c.responsibilities);
        out.push_str("; API: ");
        out.push_str(c.api_format);
        out.push_str("; path: ");
        out.push_str(c.target_path);
        out.push_str("; may depend on: ");
        let allowed: Vec<&str> = c.may_depend_on.iter().map(|l| l.as_str()).collect();
        out.push_str(&allowed.join(", "));
        out.push('\n');
    }
    out.push_str("\n## Layering Rules\n");
    out.push_str(RULES);
    out
}
