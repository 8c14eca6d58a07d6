//! Configuration management for api-mender
//!
//! Settings live in a TOML file. Lookup order: an explicit `--config`
//! path, `./mender.toml`, then `~/.config/api-mender/config.toml`.
//! Environment variables override individual fields.

use crate::error::{MendError, Result};
use crate::repair::strings::DEFAULT_MAX_ITERATIONS;
use crate::repair::RouterSettings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

const LOCAL_CONFIG_FILE: &str = "mender.toml";

/// Fixer modules that live inside the module tree and must never be
/// rewritten by the repair pass.
pub const DEFAULT_EXCLUDED_MODULES: &[&str] = &[
    "api_consistency",
    "api_fixer",
    "enhanced_string_fixer",
    "fix_all_modules",
    "fix_module",
    "fixer_script",
    "module_checker",
    "module_fixer",
    "operation_id_fixer",
    "string_fixer",
    "string_fixer2",
    "string_fixer3",
    "string_literal_fixer",
    "health_check",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding one sub-directory per API module
    pub modules_root: PathBuf,
    /// File inside each module directory that gets validated and repaired
    pub entry_file: String,
    /// Static module list. When unset, modules are discovered from `modules_root`.
    pub modules: Option<Vec<String>>,
    /// Modules reported as skipped and never written
    pub exclude: Vec<String>,
    pub max_repair_iterations: usize,
    pub router: RouterSettings,
    pub import_check: ImportCheckConfig,
    pub server: ServerConfig,
    /// Default staging directory for `stage`/`promote`
    pub staging_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            modules_root: PathBuf::from("src/app/apis"),
            entry_file: "__init__.py".to_string(),
            modules: None,
            exclude: DEFAULT_EXCLUDED_MODULES.iter().map(|m| m.to_string()).collect(),
            max_repair_iterations: DEFAULT_MAX_ITERATIONS,
            router: RouterSettings::default(),
            import_check: ImportCheckConfig::default(),
            server: ServerConfig::default(),
            staging_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportCheckConfig {
    /// Run a real interpreter import per module during health checks
    pub enabled: bool,
    pub python: String,
    /// Dotted package that module names are appended to
    pub module_prefix: String,
    /// Directory the interpreter runs in (so the package is importable)
    pub working_dir: Option<PathBuf>,
    pub timeout_secs: u64,
}

impl Default for ImportCheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            python: "python3".to_string(),
            module_prefix: "app.apis".to_string(),
            working_dir: None,
            timeout_secs: 10,
        }
    }
}

impl ImportCheckConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8700".to_string(),
        }
    }
}

impl Config {
    /// Get the user config file path
    fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("api-mender").join("config.toml"))
    }

    /// Load config from the first location that exists, or return defaults.
    ///
    /// An explicit path must exist and parse. Implicit files that fail to
    /// parse are reported and ignored.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => Self::load_implicit(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn load_implicit() -> Self {
        let candidates = [Some(PathBuf::from(LOCAL_CONFIG_FILE)), Self::user_config_path()];
        for path in candidates.into_iter().flatten() {
            if !path.is_file() {
                continue;
            }
            match Self::from_file(&path) {
                Ok(config) => {
                    debug!("Loaded config from {}", path.display());
                    return config;
                }
                Err(err) => {
                    warn!("Ignoring unreadable config {}: {}. Defaults were loaded.", path.display(), err);
                    return Self::default();
                }
            }
        }
        Self::default()
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| MendError::io(path, e))?;
        Self::parse(&content).map_err(|e| MendError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Apply `MENDER_*` overrides. `lookup` is `std::env::var` outside tests.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(root) = lookup("MENDER_MODULES_ROOT").filter(|v| !v.trim().is_empty()) {
            self.modules_root = PathBuf::from(root);
        }
        if let Some(bind) = lookup("MENDER_BIND").filter(|v| !v.trim().is_empty()) {
            self.server.bind = bind;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.entry_file.trim().is_empty() || self.entry_file.contains(['/', '\\']) {
            return Err(MendError::Config(format!(
                "entry_file must be a plain file name, got {:?}",
                self.entry_file
            )));
        }
        if self.max_repair_iterations == 0 {
            return Err(MendError::Config(
                "max_repair_iterations must be at least 1".to_string(),
            ));
        }
        if self.router.variable.trim().is_empty() || self.router.class_name.trim().is_empty() {
            return Err(MendError::Config(
                "router.variable and router.class_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_excluded(&self, module: &str) -> bool {
        self.exclude.iter().any(|m| m == module)
    }

    /// Config rooted at `modules_root` with everything else default.
    pub fn for_root(modules_root: impl Into<PathBuf>) -> Self {
        Self {
            modules_root: modules_root.into(),
            ..Self::default()
        }
    }
}
