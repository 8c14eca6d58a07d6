//! Report shapes returned by the orchestrator
//!
//! These serialise directly as the HTTP response bodies and the CLI's
//! JSON output.

use crate::repair::operation_id::{ConflictLocation, OperationIdChange};
use crate::repair::{FixRecord, FixStatus, Issue};
use crate::scan::{ModuleHealth, ModuleStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub module: String,
    pub is_valid: bool,
    pub issues: Vec<Issue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Issue lists for every module, with valid/invalid totals.
#[derive(Debug, Clone, Serialize)]
pub struct CheckAllReport {
    pub run_id: String,
    pub total_modules: usize,
    pub valid_modules: usize,
    pub invalid_modules: usize,
    pub modules_with_issues: usize,
    pub results: Vec<CheckReport>,
}

impl CheckAllReport {
    pub fn new(run_id: String, results: Vec<CheckReport>) -> Self {
        let valid_modules = results.iter().filter(|r| r.is_valid).count();
        Self {
            run_id,
            total_modules: results.len(),
            valid_modules,
            invalid_modules: results.len() - valid_modules,
            modules_with_issues: results
                .iter()
                .filter(|r| !r.issues.is_empty() || r.error.is_some())
                .count(),
            results,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModuleReport {
    pub module: String,
    pub status: FixStatus,
    pub message: String,
    pub fixes: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub records: Vec<FixRecord>,
}

impl ModuleReport {
    pub fn new(module: &str, status: FixStatus, message: impl Into<String>) -> Self {
        Self {
            module: module.to_string(),
            status,
            message: message.into(),
            fixes: Vec::new(),
            records: Vec::new(),
        }
    }

    pub fn fixed(module: &str, message: impl Into<String>, records: Vec<FixRecord>) -> Self {
        Self {
            module: module.to_string(),
            status: FixStatus::Fixed,
            message: message.into(),
            fixes: records.iter().map(|r| r.description.clone()).collect(),
            records,
        }
    }

    pub fn error(module: &str, message: impl Into<String>) -> Self {
        Self::new(module, FixStatus::Error, message)
    }

    pub fn skipped(module: &str) -> Self {
        Self::new(module, FixStatus::Skipped, "Module is excluded from repair")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub total_modules: usize,
    pub fixed_modules: usize,
    pub modules_without_issues: usize,
    pub modules_with_errors: usize,
    pub skipped_modules: usize,
}

impl Tally {
    pub fn record(&mut self, status: FixStatus) {
        self.total_modules += 1;
        match status {
            FixStatus::Fixed => self.fixed_modules += 1,
            FixStatus::NoIssues => self.modules_without_issues += 1,
            FixStatus::Unfixable | FixStatus::Error => self.modules_with_errors += 1,
            FixStatus::Skipped => self.skipped_modules += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsistencyReport {
    pub run_id: String,
    #[serde(flatten)]
    pub tally: Tally,
    pub results: Vec<ModuleReport>,
}

impl ConsistencyReport {
    pub fn new(run_id: String, results: Vec<ModuleReport>) -> Self {
        let mut tally = Tally::default();
        for result in &results {
            tally.record(result.status);
        }
        Self {
            run_id,
            tally,
            results,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RouterFixReport {
    pub module: String,
    pub status: FixStatus,
    pub had_router_import: bool,
    pub had_router_definition: bool,
    pub has_route_decorators: bool,
    pub message: String,
    pub fixes: Vec<String>,
}

impl RouterFixReport {
    pub fn bare(module: &str, status: FixStatus, message: impl Into<String>) -> Self {
        Self {
            module: module.to_string(),
            status,
            had_router_import: false,
            had_router_definition: false,
            has_route_decorators: false,
            message: message.into(),
            fixes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RouterBatchReport {
    pub run_id: String,
    #[serde(flatten)]
    pub tally: Tally,
    pub results: Vec<RouterFixReport>,
}

impl RouterBatchReport {
    pub fn new(run_id: String, results: Vec<RouterFixReport>) -> Self {
        let mut tally = Tally::default();
        for result in &results {
            tally.record(result.status);
        }
        Self {
            run_id,
            tally,
            results,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanError {
    pub module: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OperationIdScanReport {
    pub run_id: String,
    pub dry_run: bool,
    pub files_scanned: usize,
    pub duplicate_count: usize,
    pub conflicts: BTreeMap<String, Vec<ConflictLocation>>,
    /// Applied renames, or proposed ones when `dry_run` is set
    pub changes: Vec<OperationIdChange>,
    pub modules_fixed: Vec<String>,
    pub remaining_duplicates: usize,
    pub errors: Vec<ScanError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallHealth {
    Healthy,
    Unhealthy,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: OverallHealth,
    pub total_modules: usize,
    pub healthy_count: usize,
    pub unhealthy_count: usize,
    pub healthy_modules: Vec<String>,
    pub unhealthy_modules: Vec<ModuleStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn from_statuses(statuses: Vec<ModuleStatus>) -> Self {
        let total_modules = statuses.len();
        let (healthy, unhealthy): (Vec<_>, Vec<_>) = statuses
            .into_iter()
            .partition(|s| s.health == ModuleHealth::Healthy);
        let status = if unhealthy.is_empty() {
            OverallHealth::Healthy
        } else {
            OverallHealth::Unhealthy
        };
        Self {
            status,
            total_modules,
            healthy_count: healthy.len(),
            unhealthy_count: unhealthy.len(),
            healthy_modules: healthy.into_iter().map(|s| s.module).collect(),
            unhealthy_modules: unhealthy,
            error: None,
            checked_at: Utc::now(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: OverallHealth::Error,
            total_modules: 0,
            healthy_count: 0,
            unhealthy_count: 0,
            healthy_modules: Vec::new(),
            unhealthy_modules: Vec::new(),
            error: Some(error.into()),
            checked_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModuleConsistency {
    pub module: String,
    pub has_router_import: bool,
    pub has_router_definition: bool,
    pub has_endpoints: bool,
    pub has_models: bool,
    pub has_error_handling: bool,
    pub has_operation_ids: bool,
    pub is_consistent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsistencyCheckReport {
    pub run_id: String,
    pub total_modules: usize,
    pub consistent_modules: usize,
    pub consistency_percentage: f64,
    pub modules: Vec<ModuleConsistency>,
}

impl ConsistencyCheckReport {
    pub fn new(run_id: String, modules: Vec<ModuleConsistency>) -> Self {
        let total_modules = modules.len();
        let consistent_modules = modules.iter().filter(|m| m.is_consistent).count();
        let consistency_percentage = if total_modules == 0 {
            100.0
        } else {
            (consistent_modules as f64 / total_modules as f64 * 1000.0).round() / 10.0
        };
        Self {
            run_id,
            total_modules,
            consistent_modules,
            consistency_percentage,
            modules,
        }
    }
}
