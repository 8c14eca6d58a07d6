//! Module discovery and health scanning
//!
//! The registry is an explicit list of module descriptors: either the
//! configured `modules` list or one discovery pass over `modules_root`.
//! Nothing is imported or cached between invocations.

pub mod import_probe;

use crate::config::Config;
use crate::error::{MendError, Result};
use crate::repair::{self, Issue, RouterSettings};
use crate::syntax::{self, ValidationResult};
use crate::util::resolve_module_dir;
use crate::workspace::read_source;
use import_probe::{ImportProbe, ProbeOutcome};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleDescriptor {
    pub name: String,
    pub dir: PathBuf,
    /// The file that gets validated and repaired
    pub entry: PathBuf,
}

/// Reject names that could escape the module root.
pub fn validate_module_name(name: &str) -> Result<()> {
    resolve_module_dir(Path::new(""), name)
        .map(|_| ())
        .map_err(|reason| MendError::InvalidModuleName(format!("{:?}: {}", name, reason)))
}

#[derive(Debug, Clone)]
pub struct ModuleRegistry {
    root: PathBuf,
    entry_file: String,
    modules: Vec<ModuleDescriptor>,
}

impl ModuleRegistry {
    pub fn from_config(config: &Config) -> Result<Self> {
        match &config.modules {
            Some(names) => Self::from_names(&config.modules_root, &config.entry_file, names),
            None => Self::discover(&config.modules_root, &config.entry_file),
        }
    }

    /// Every immediate sub-directory of `root` that has an `entry_file`.
    ///
    /// An unreadable root is the one fatal error; unreadable children are
    /// logged and skipped.
    pub fn discover(root: &Path, entry_file: &str) -> Result<Self> {
        fs::read_dir(root).map_err(|source| MendError::Discovery {
            path: root.to_path_buf(),
            source,
        })?;

        let mut modules = Vec::new();
        let walker = WalkDir::new(root)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Skipping unreadable entry under {}: {}", root.display(), err);
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name == "__pycache__" || name.starts_with('.') {
                continue;
            }
            let entry_path = entry.path().join(entry_file);
            if !entry_path.exists() {
                debug!("{} has no {}, not a module", name, entry_file);
                continue;
            }
            modules.push(ModuleDescriptor {
                name,
                dir: entry.path().to_path_buf(),
                entry: entry_path,
            });
        }

        Ok(Self {
            root: root.to_path_buf(),
            entry_file: entry_file.to_string(),
            modules,
        })
    }

    /// Registry from a static list. Names are validated, existence is not:
    /// a missing module shows up as a per-module error when it is read.
    pub fn from_names(root: &Path, entry_file: &str, names: &[String]) -> Result<Self> {
        let mut modules = Vec::with_capacity(names.len());
        for name in names {
            modules.push(descriptor_for(root, entry_file, name)?);
        }
        modules.sort_by(|a, b| a.name.cmp(&b.name));
        modules.dedup_by(|a, b| a.name == b.name);
        Ok(Self {
            root: root.to_path_buf(),
            entry_file: entry_file.to_string(),
            modules,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn modules(&self) -> &[ModuleDescriptor] {
        &self.modules
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Descriptor for `name`, whether or not discovery listed it.
    pub fn descriptor(&self, name: &str) -> Result<ModuleDescriptor> {
        if let Some(found) = self.modules.iter().find(|m| m.name == name) {
            return Ok(found.clone());
        }
        let desc = descriptor_for(&self.root, &self.entry_file, name)?;
        if !desc.dir.is_dir() {
            return Err(MendError::ModuleNotFound(name.to_string()));
        }
        Ok(desc)
    }
}

fn descriptor_for(root: &Path, entry_file: &str, name: &str) -> Result<ModuleDescriptor> {
    validate_module_name(name)?;
    let dir = resolve_module_dir(root, name).map_err(MendError::InvalidModuleName)?;
    Ok(ModuleDescriptor {
        name: name.to_string(),
        entry: dir.join(entry_file),
        dir,
    })
}

/// A module's entry file as it is on disk right now.
#[derive(Debug, Clone)]
pub struct SourceModule {
    pub name: String,
    pub path: PathBuf,
    pub content: String,
    pub validation: ValidationResult,
}

impl SourceModule {
    pub fn load(desc: &ModuleDescriptor) -> Result<Self> {
        let content = read_source(&desc.entry)?;
        let validation = syntax::validate(&content);
        Ok(Self {
            name: desc.name.clone(),
            path: desc.entry.clone(),
            content,
            validation,
        })
    }

    pub fn is_valid(&self) -> bool {
        self.validation.is_valid
    }

    pub fn issues(&self, settings: &RouterSettings) -> Vec<Issue> {
        match &self.validation.error {
            Some(err) => vec![Issue::from_syntax(err)],
            None => repair::detect_issues(&self.content, settings),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleHealth {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Parse,
    Import,
    Io,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleStatus {
    pub module: String,
    pub health: ModuleHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ModuleStatus {
    fn healthy(module: &str) -> Self {
        Self {
            module: module.to_string(),
            health: ModuleHealth::Healthy,
            failure: None,
            error: None,
        }
    }

    fn unhealthy(module: &str, failure: FailureKind, error: String) -> Self {
        Self {
            module: module.to_string(),
            health: ModuleHealth::Unhealthy,
            failure: Some(failure),
            error: Some(error),
        }
    }
}

/// Checks each module independently: parse first, then (optionally) a
/// real import.
#[derive(Debug, Clone, Default)]
pub struct ModuleScanner {
    probe: Option<ImportProbe>,
}

impl ModuleScanner {
    pub fn new(probe: Option<ImportProbe>) -> Self {
        Self { probe }
    }

    pub fn from_config(config: &Config) -> Self {
        let probe = config
            .import_check
            .enabled
            .then(|| ImportProbe::from_config(&config.import_check));
        Self::new(probe)
    }

    pub fn check(&self, desc: &ModuleDescriptor) -> ModuleStatus {
        let module = match SourceModule::load(desc) {
            Ok(module) => module,
            Err(err) => return ModuleStatus::unhealthy(&desc.name, FailureKind::Io, err.to_string()),
        };
        if let Some(err) = &module.validation.error {
            return ModuleStatus::unhealthy(&desc.name, FailureKind::Parse, err.to_string());
        }

        match self.probe.as_ref().map(|p| p.probe(&desc.name)) {
            Some(ProbeOutcome::Failed(msg)) => {
                ModuleStatus::unhealthy(&desc.name, FailureKind::Import, msg)
            }
            _ => ModuleStatus::healthy(&desc.name),
        }
    }

    pub fn scan_all(&self, registry: &ModuleRegistry) -> Vec<ModuleStatus> {
        registry.modules().iter().map(|desc| self.check(desc)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tree(modules: &[(&str, &str)]) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, source) in modules {
            let module_dir = dir.path().join(name);
            fs::create_dir_all(&module_dir).unwrap();
            fs::write(module_dir.join("__init__.py"), source).unwrap();
        }
        dir
    }

    #[test]
    fn test_discover_sorts_and_filters() {
        let dir = tree(&[("users", "x = 1\n"), ("listings", "y = 2\n")]);
        fs::create_dir_all(dir.path().join("__pycache__")).unwrap();
        fs::create_dir_all(dir.path().join("static")).unwrap();
        fs::write(dir.path().join("README.md"), "docs").unwrap();

        let registry = ModuleRegistry::discover(dir.path(), "__init__.py").unwrap();
        let names: Vec<&str> = registry.modules().iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["listings", "users"]);
    }

    #[test]
    fn test_discover_root_without_modules_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("static")).unwrap();
        let registry = ModuleRegistry::discover(dir.path(), "__init__.py").unwrap();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_discover_missing_root_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = ModuleRegistry::discover(&dir.path().join("nope"), "__init__.py").unwrap_err();
        assert!(matches!(err, MendError::Discovery { .. }));
        assert!(err.is_infrastructure());
    }

    #[test]
    fn test_validate_module_name() {
        assert!(validate_module_name("listings").is_ok());
        assert!(matches!(
            validate_module_name("../etc"),
            Err(MendError::InvalidModuleName(_))
        ));
    }

    #[test]
    fn test_descriptor_for_unknown_module() {
        let dir = tree(&[("listings", "x = 1\n")]);
        let registry = ModuleRegistry::discover(dir.path(), "__init__.py").unwrap();
        assert!(matches!(
            registry.descriptor("ghost"),
            Err(MendError::ModuleNotFound(_))
        ));
        assert_eq!(registry.descriptor("listings").unwrap().name, "listings");
    }

    #[test]
    fn test_scan_reports_each_module() {
        let dir = tree(&[("good", "x = 1\n"), ("bad", "x = 'abc\n")]);
        let registry = ModuleRegistry::discover(dir.path(), "__init__.py").unwrap();
        let statuses = ModuleScanner::default().scan_all(&registry);
        assert_eq!(statuses.len(), 2);
        let bad = statuses.iter().find(|s| s.module == "bad").unwrap();
        assert_eq!(bad.health, ModuleHealth::Unhealthy);
        assert_eq!(bad.failure, Some(FailureKind::Parse));
        let good = statuses.iter().find(|s| s.module == "good").unwrap();
        assert_eq!(good.health, ModuleHealth::Healthy);
    }

    #[test]
    fn test_entry_file_that_is_a_directory_is_an_io_failure() {
        let dir = tree(&[("ok", "x = 1\n")]);
        fs::create_dir_all(dir.path().join("broken").join("__init__.py")).unwrap();
        let registry = ModuleRegistry::discover(dir.path(), "__init__.py").unwrap();
        assert_eq!(registry.len(), 2);
        let statuses = ModuleScanner::default().scan_all(&registry);
        let broken = statuses.iter().find(|s| s.module == "broken").unwrap();
        assert_eq!(broken.failure, Some(FailureKind::Io));
    }
}
