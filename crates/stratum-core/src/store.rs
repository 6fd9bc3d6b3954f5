use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use crate::report::ValidationReport;
use crate::{ModuleSet, ModuleSummary, Result};

const SUMMARY_FILE: &str = "full_summary.json";

/// Where module summaries live between pipeline steps.
pub trait ModuleStore: Send + Sync {
    fn load_all(&self) -> Result<ModuleSet>;

    /// Only the named modules. Names with no stored summary are ignored.
    fn load_scoped(&self, names: &[String]) -> Result<ModuleSet> {
        Ok(self.load_all()?.scoped(names))
    }

    /// Write every module of `modules`, replacing stored summaries of the
    /// same name. Returns how many were written.
    fn save(&self, modules: &ModuleSet) -> Result<usize>;
}

/// Where validation reports go, and where the previous one is read back from.
pub trait ReportSink: Send + Sync {
    fn read_previous(&self) -> Option<ValidationReport>;
    fn write(&self, report: &ValidationReport) -> Result<()>;
}

// --- Directory store ---

/// One directory per module: `<root>/<ModuleName>/full_summary.json`.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `None` for names that cannot be a single directory under the root.
    fn summary_path(&self, name: &str) -> Option<PathBuf> {
        is_storable_name(name).then(|| self.root.join(name).join(SUMMARY_FILE))
    }

    /// The directory name is the module name; a record naming some other
    /// module is stored under the wrong key and is skipped.
    fn load_one(&self, name: &str) -> Option<ModuleSummary> {
        let Some(path) = self.summary_path(name) else {
            log::warn!("ignoring module name {name:?}: not a plain directory name");
            return None;
        };
        let raw = fs::read_to_string(&path).ok()?;
        let value: Value = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("skipping {}: {e}", path.display());
                return None;
            }
        };
        let summary = ModuleSummary::from_value(&value, Some(name));
        match summary {
            None => {
                log::warn!("skipping {}: not a module record", path.display());
                None
            }
            Some(summary) if summary.module_name != name => {
                log::warn!(
                    "skipping {}: record names {:?}, not {name:?}",
                    path.display(),
                    summary.module_name
                );
                None
            }
            found => found,
        }
    }
}

/// ASCII letters, digits, `_` and `-` only, so the name is always exactly one
/// path component under the store root.
fn is_storable_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl ModuleStore for DirectoryStore {
    fn load_all(&self) -> Result<ModuleSet> {
        if !self.root.exists() {
            return Ok(ModuleSet::new());
        }
        let mut names: Vec<String> = fs::read_dir(&self.root)?
            .filter_map(|entry| {
                let entry = entry.ok()?;
                if !entry.file_type().ok()?.is_dir() {
                    return None;
                }
                Some(entry.file_name().to_string_lossy().to_string())
            })
            .collect();
        names.sort();

        let modules: ModuleSet = names.iter().filter_map(|n| self.load_one(n)).collect();
        log::debug!("loaded {} modules from {}", modules.len(), self.root.display());
        Ok(modules)
    }

    fn load_scoped(&self, names: &[String]) -> Result<ModuleSet> {
        Ok(names.iter().filter_map(|n| self.load_one(n)).collect())
    }

    /// Modules whose names are not plain directory names are skipped with a
    /// warning.
    fn save(&self, modules: &ModuleSet) -> Result<usize> {
        let mut written = 0;
        for module in modules.iter() {
            let Some(path) = self.summary_path(&module.module_name) else {
                log::warn!(
                    "not saving module {:?}: name must be letters, digits, '_' or '-'",
                    module.module_name
                );
                continue;
            };
            let json = serde_json::to_string_pretty(module)?;
            write_atomic(&path, &json)?;
            written += 1;
        }
        log::info!("saved {written} module summaries to {}", self.root.display());
        Ok(written)
    }
}

// --- Report sink ---

#[derive(Debug, Clone)]
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ReportSink for JsonFileSink {
    fn read_previous(&self) -> Option<ValidationReport> {
        let raw = fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(report) => Some(report),
            Err(e) => {
                log::warn!("ignoring unreadable report {}: {e}", self.path.display());
                None
            }
        }
    }

    fn write(&self, report: &ValidationReport) -> Result<()> {
        let json = serde_json::to_string_pretty(report)?;
        write_atomic(&self.path, &json)
    }
}

/// Temp file + rename, so readers never see a half-written file.
fn write_atomic(path: &Path, data: &str) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = dir.join(format!(".{file_name}.tmp"));
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Concatenate the `*.md` requirement documents in `dir`, sorted by path,
/// separated by blank lines.
pub fn read_requirements(dir: &Path) -> Result<String> {
    let pattern = dir.join("*.md");
    let mut paths: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())?
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(e) => {
                log::warn!("skipping unreadable requirement entry: {e}");
                None
            }
        })
        .collect();
    paths.sort();

    let mut docs = Vec::with_capacity(paths.len());
    for path in &paths {
        docs.push(fs::read_to_string(path)?);
    }
    if docs.is_empty() {
        log::warn!("no requirement documents under {}", dir.display());
    }
    Ok(docs.join("\n\n"))
}
