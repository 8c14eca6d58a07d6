//! Real interpreter import check
//!
//! Syntax can be fine while the module still fails at import time
//! (missing dependency, bad relative import, exception at module level).
//! Those failures are reported, never repaired.

use crate::config::ImportCheckConfig;
use crate::util::{run_command_with_timeout, truncate};
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;
use tracing::warn;

const IMPORT_SNIPPET: &str = "import importlib, sys; importlib.import_module(sys.argv[1])";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Imported,
    /// Interpreter ran and the import raised; carries the last error line
    Failed(String),
    /// Interpreter could not be started or timed out
    Unavailable(String),
}

#[derive(Debug, Clone)]
pub struct ImportProbe {
    python: String,
    module_prefix: String,
    working_dir: Option<PathBuf>,
    timeout: Duration,
}

impl ImportProbe {
    pub fn from_config(config: &ImportCheckConfig) -> Self {
        Self {
            python: config.python.clone(),
            module_prefix: config.module_prefix.clone(),
            working_dir: config.working_dir.clone(),
            timeout: config.timeout(),
        }
    }

    pub fn import_path(&self, module: &str) -> String {
        if self.module_prefix.is_empty() {
            module.to_string()
        } else {
            format!("{}.{}", self.module_prefix, module)
        }
    }

    pub fn probe(&self, module: &str) -> ProbeOutcome {
        let import_path = self.import_path(module);
        let mut cmd = Command::new(&self.python);
        cmd.arg("-c").arg(IMPORT_SNIPPET).arg(&import_path);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let result = match run_command_with_timeout(&mut cmd, self.timeout) {
            Ok(result) => result,
            Err(err) => {
                warn!("Import probe for {} could not run: {}", import_path, err);
                return ProbeOutcome::Unavailable(err);
            }
        };

        if result.timed_out {
            warn!(
                "Import probe for {} timed out after {}s",
                import_path,
                self.timeout.as_secs()
            );
            return ProbeOutcome::Unavailable(format!(
                "Import timed out after {}s",
                self.timeout.as_secs()
            ));
        }

        match result.status {
            Some(status) if status.success() => ProbeOutcome::Imported,
            _ => {
                let last_line = result
                    .stderr
                    .lines()
                    .rev()
                    .find(|l| !l.trim().is_empty())
                    .unwrap_or("import failed")
                    .trim();
                ProbeOutcome::Failed(truncate(last_line, 300))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe_with(python: &str) -> ImportProbe {
        ImportProbe::from_config(&ImportCheckConfig {
            enabled: true,
            python: python.to_string(),
            module_prefix: "app.apis".to_string(),
            working_dir: None,
            timeout_secs: 5,
        })
    }

    #[test]
    fn test_import_path_joins_prefix() {
        assert_eq!(probe_with("python3").import_path("listings"), "app.apis.listings");
    }

    #[test]
    fn test_missing_interpreter_is_unavailable() {
        let outcome = probe_with("definitely-not-a-python-binary").probe("listings");
        assert!(matches!(outcome, ProbeOutcome::Unavailable(_)));
    }
}
