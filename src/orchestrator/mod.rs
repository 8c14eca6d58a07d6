//! Repair orchestration
//!
//! Every entry point reads modules fresh from disk, runs the requested
//! repairers, re-validates, and only then writes. Per-module failures end
//! up in the report; only discovery and configuration problems are
//! returned as errors.
//!
//! Flow per module: detect -> repair -> revalidate -> persist or report.

use crate::config::Config;
use crate::error::{MendError, Result};
use crate::repair::operation_id::{self, RouteFile};
use crate::repair::{
    FixStatus, OperationIdRepairer, RouterDefinitionRepairer, StringLiteralRepairer,
};
use crate::report::{
    CheckAllReport, CheckReport, ConsistencyCheckReport, ConsistencyReport, HealthReport, ModuleConsistency,
    ModuleReport, OperationIdScanReport, RouterBatchReport, RouterFixReport, ScanError,
};
use crate::scan::{self, ModuleDescriptor, ModuleRegistry, ModuleScanner, SourceModule};
use crate::syntax;
use crate::workspace::{read_source, write_atomic, FileLocks};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::OnceLock;
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;


/// Which repairers a fix request runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FixType {
    #[default]
    All,
    StringLiterals,
    Routers,
    OperationIds,
}

impl FixType {
    fn strings(self) -> bool {
        matches!(self, FixType::All | FixType::StringLiterals)
    }

    fn routers(self) -> bool {
        matches!(self, FixType::All | FixType::Routers)
    }

    fn operation_ids(self) -> bool {
        matches!(self, FixType::All | FixType::OperationIds)
    }
}

pub struct Orchestrator {
    config: Config,
    locks: FileLocks,
    strings: StringLiteralRepairer,
    router: RouterDefinitionRepairer,
    operation_ids: OperationIdRepairer,
    scanner: ModuleScanner,
}

fn new_run_id() -> String {
    Uuid::new_v4().to_string()
}

impl Orchestrator {
    pub fn new(config: Config) -> Self {
        Self::with_locks(config, FileLocks::default())
    }

    pub fn with_locks(config: Config, locks: FileLocks) -> Self {
        Self {
            strings: StringLiteralRepairer::new(config.max_repair_iterations),
            router: RouterDefinitionRepairer::new(config.router.clone()),
            operation_ids: OperationIdRepairer::new(config.router.variable.clone()),
            scanner: ModuleScanner::from_config(&config),
            locks,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Locks guarding module files; anything else writing to the live
    /// tree takes them too.
    pub fn locks(&self) -> &FileLocks {
        &self.locks
    }

    pub fn registry(&self) -> Result<ModuleRegistry> {
        ModuleRegistry::from_config(&self.config)
    }

    /// `Ok(Err(report))` when the module does not exist: that is a
    /// per-module outcome, not a request error.
    fn lookup(&self, name: &str) -> Result<std::result::Result<ModuleDescriptor, String>> {
        scan::validate_module_name(name)?;
        match self.registry()?.descriptor(name) {
            Ok(desc) => Ok(Ok(desc)),
            Err(MendError::ModuleNotFound(module)) => {
                Ok(Err(format!("Module not found: {}", module)))
            }
            Err(err) => Err(err),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    //  CHECKS
    // ═══════════════════════════════════════════════════════════════════════

    pub fn check_module(&self, name: &str) -> Result<CheckReport> {
        let desc = match self.lookup(name)? {
            Ok(desc) => desc,
            Err(message) => {
                return Ok(CheckReport {
                    module: name.to_string(),
                    is_valid: false,
                    issues: Vec::new(),
                    error: Some(message),
                })
            }
        };
        Ok(self.check_descriptor(&desc))
    }

    /// `check_module` for every module. Read-only, so excluded modules
    /// are listed too.
    pub fn check_all_modules(&self) -> Result<CheckAllReport> {
        let run_id = new_run_id();
        let _span = info_span!("check_all_modules", run_id = %run_id).entered();
        let registry = self.registry()?;
        let results = registry
            .modules()
            .iter()
            .map(|desc| self.check_descriptor(desc))
            .collect();
        let report = CheckAllReport::new(run_id, results);
        info!(
            "Checked {} modules: {} valid, {} invalid, {} with issues",
            report.total_modules,
            report.valid_modules,
            report.invalid_modules,
            report.modules_with_issues
        );
        Ok(report)
    }

    fn check_descriptor(&self, desc: &ModuleDescriptor) -> CheckReport {
        match SourceModule::load(desc) {
            Ok(module) => CheckReport {
                module: desc.name.clone(),
                is_valid: module.is_valid(),
                issues: module.issues(&self.config.router),
                error: None,
            },
            Err(err) => CheckReport {
                module: desc.name.clone(),
                is_valid: false,
                issues: Vec::new(),
                error: Some(err.to_string()),
            },
        }
    }

    pub fn health_check(&self) -> HealthReport {
        let _span = info_span!("health_check", run_id = %new_run_id()).entered();
        match self.registry() {
            Ok(registry) => {
                let report = HealthReport::from_statuses(self.scanner.scan_all(&registry));
                info!(
                    "Health check: {}/{} modules healthy",
                    report.healthy_count, report.total_modules
                );
                report
            }
            Err(err) => {
                error!("Health check could not list modules: {}", err);
                HealthReport::failed(err.to_string())
            }
        }
    }

    pub fn consistency_check(&self) -> Result<ConsistencyCheckReport> {
        let run_id = new_run_id();
        let _span = info_span!("consistency_check", run_id = %run_id).entered();
        let registry = self.registry()?;
        let modules = registry
            .modules()
            .iter()
            .filter(|desc| !self.config.is_excluded(&desc.name))
            .map(|desc| self.module_consistency(desc))
            .collect();
        let report = ConsistencyCheckReport::new(run_id, modules);
        info!(
            "Consistency: {}/{} modules consistent ({}%)",
            report.consistent_modules, report.total_modules, report.consistency_percentage
        );
        Ok(report)
    }

    fn module_consistency(&self, desc: &ModuleDescriptor) -> ModuleConsistency {
        let mut entry = ModuleConsistency {
            module: desc.name.clone(),
            has_router_import: false,
            has_router_definition: false,
            has_endpoints: false,
            has_models: false,
            has_error_handling: false,
            has_operation_ids: false,
            is_consistent: false,
            error: None,
        };
        let source = match read_source(&desc.entry) {
            Ok(source) => source,
            Err(err) => {
                entry.error = Some(err.to_string());
                return entry;
            }
        };
        if let Some(err) = syntax::validate(&source).error {
            entry.error = Some(err.to_string());
            return entry;
        }

        let inspection = self.router.inspect(&source);
        let routes = self.operation_ids.routes(&source);
        entry.has_router_import = inspection.has_router_import;
        entry.has_router_definition = inspection.has_router_definition;
        entry.has_endpoints = !routes.is_empty();
        entry.has_operation_ids = routes.iter().all(|r| r.operation_id.is_some());
        entry.has_models = models_pattern().is_some_and(|re| re.is_match(&source));
        entry.has_error_handling = error_handling_pattern().is_some_and(|re| re.is_match(&source));
        entry.is_consistent = entry.has_router_import
            && entry.has_router_definition
            && entry.has_endpoints
            && entry.has_operation_ids;
        entry
    }

    // ═══════════════════════════════════════════════════════════════════════
    //  SINGLE-MODULE FIXES
    // ═══════════════════════════════════════════════════════════════════════

    pub fn fix_module_syntax(&self, name: &str) -> Result<ModuleReport> {
        self.fix_module(name, FixType::StringLiterals)
    }

    pub fn fix_operation_ids(&self, name: &str) -> Result<ModuleReport> {
        self.fix_module(name, FixType::OperationIds)
    }

    pub fn fix_module(&self, name: &str, fix_type: FixType) -> Result<ModuleReport> {
        let _span = info_span!("fix_module", module = %name, run_id = %new_run_id()).entered();
        let desc = match self.lookup(name)? {
            Ok(desc) => desc,
            Err(message) => return Ok(ModuleReport::error(name, message)),
        };
        if self.config.is_excluded(&desc.name) {
            debug!("{} is excluded from repair", desc.name);
            return Ok(ModuleReport::skipped(&desc.name));
        }

        let mut used = if fix_type.operation_ids() {
            self.seed_operation_ids(fix_type.strings())?
        } else {
            HashSet::new()
        };
        Ok(self.repair_module(&desc, fix_type, &mut used))
    }

    pub fn fix_router(&self, name: &str) -> Result<RouterFixReport> {
        let _span = info_span!("fix_router", module = %name, run_id = %new_run_id()).entered();
        let desc = match self.lookup(name)? {
            Ok(desc) => desc,
            Err(message) => return Ok(RouterFixReport::bare(name, FixStatus::Error, message)),
        };
        Ok(self.repair_router(&desc))
    }

    // ═══════════════════════════════════════════════════════════════════════
    //  BATCHES
    // ═══════════════════════════════════════════════════════════════════════

    pub fn fix_all_modules_syntax(&self) -> Result<ConsistencyReport> {
        self.fix_all(FixType::StringLiterals)
    }

    pub fn fix_all(&self, fix_type: FixType) -> Result<ConsistencyReport> {
        let run_id = new_run_id();
        let _span = info_span!("fix_all", run_id = %run_id, ?fix_type).entered();
        let registry = self.registry()?;
        if registry.is_empty() {
            warn!("No modules with a {} under {}", self.config.entry_file, registry.root().display());
        }
        info!("Repairing {} modules under {}", registry.len(), registry.root().display());

        let mut used = if fix_type.operation_ids() {
            self.seed_operation_ids(fix_type.strings())?
        } else {
            HashSet::new()
        };

        let results = registry
            .modules()
            .iter()
            .map(|desc| {
                if self.config.is_excluded(&desc.name) {
                    ModuleReport::skipped(&desc.name)
                } else {
                    self.repair_module(desc, fix_type, &mut used)
                }
            })
            .collect();

        let report = ConsistencyReport::new(run_id, results);
        info!(
            "Repair finished: {} fixed, {} clean, {} errors, {} skipped",
            report.tally.fixed_modules,
            report.tally.modules_without_issues,
            report.tally.modules_with_errors,
            report.tally.skipped_modules
        );
        Ok(report)
    }

    pub fn fix_all_routers(&self) -> Result<RouterBatchReport> {
        let run_id = new_run_id();
        let _span = info_span!("fix_all_routers", run_id = %run_id).entered();
        let registry = self.registry()?;
        let results = registry
            .modules()
            .iter()
            .map(|desc| self.repair_router(desc))
            .collect();
        Ok(RouterBatchReport::new(run_id, results))
    }

    /// Find operation IDs shared across modules and rename all but one.
    pub fn scan_operation_ids(&self, dry_run: bool) -> Result<OperationIdScanReport> {
        let run_id = new_run_id();
        let _span = info_span!("operation_id_scan", run_id = %run_id, dry_run).entered();
        let registry = self.registry()?;
        let (files, mut errors) = self.snapshot_routes(&registry);

        let conflicts = operation_id::find_duplicates(&files);
        let planned = operation_id::plan_duplicate_remaps(&files);
        info!(
            "Found {} duplicated operation IDs across {} files; {} renames planned",
            conflicts.len(),
            files.len(),
            planned.len()
        );

        if dry_run {
            return Ok(OperationIdScanReport {
                run_id,
                dry_run,
                files_scanned: files.len(),
                duplicate_count: conflicts.len(),
                remaining_duplicates: conflicts.len(),
                conflicts,
                changes: planned,
                modules_fixed: Vec::new(),
                errors,
            });
        }

        let mut modules_fixed = Vec::new();
        let mut applied = Vec::new();
        for file in &files {
            let mine: Vec<_> = planned.iter().filter(|c| c.module == file.module).collect();
            if mine.is_empty() {
                continue;
            }
            let updated = operation_id::apply_remaps(file, &mine);
            if !syntax::validate(&updated).is_valid {
                errors.push(ScanError {
                    module: file.module.clone(),
                    error: "Renaming operation IDs would break the module".to_string(),
                });
                continue;
            }
            let written = self.locks.with_file(&file.path, || {
                if read_source(&file.path)? != file.source {
                    return Ok(false);
                }
                write_atomic(&file.path, &updated)?;
                Ok(true)
            });
            match written {
                Ok(true) => {
                    info!("Renamed {} operation ID(s) in {}", mine.len(), file.module);
                    modules_fixed.push(file.module.clone());
                    applied.extend(mine.into_iter().cloned());
                }
                Ok(false) => errors.push(ScanError {
                    module: file.module.clone(),
                    error: "Module changed on disk during the scan; not rewritten".to_string(),
                }),
                Err(err) => {
                    warn!("Could not rewrite {}: {}", file.module, err);
                    errors.push(ScanError {
                        module: file.module.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }

        let (after, _) = self.snapshot_routes(&registry);
        let remaining_duplicates = operation_id::find_duplicates(&after).len();

        Ok(OperationIdScanReport {
            run_id,
            dry_run,
            files_scanned: files.len(),
            duplicate_count: conflicts.len(),
            conflicts,
            changes: applied,
            modules_fixed,
            remaining_duplicates,
            errors,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    //  INTERNALS
    // ═══════════════════════════════════════════════════════════════════════

    /// Route snapshot of every parseable module. Excluded modules are
    /// included read-only so their IDs are respected.
    fn snapshot_routes(&self, registry: &ModuleRegistry) -> (Vec<RouteFile>, Vec<ScanError>) {
        let mut files = Vec::new();
        let mut errors = Vec::new();
        for desc in registry.modules() {
            let source = match read_source(&desc.entry) {
                Ok(source) => source,
                Err(err) => {
                    errors.push(ScanError {
                        module: desc.name.clone(),
                        error: err.to_string(),
                    });
                    continue;
                }
            };
            if let Some(err) = syntax::validate(&source).error {
                errors.push(ScanError {
                    module: desc.name.clone(),
                    error: format!("Syntax error, fix syntax first: {}", err),
                });
                continue;
            }
            files.push(RouteFile {
                module: desc.name.clone(),
                path: desc.entry.clone(),
                routes: self.operation_ids.routes(&source),
                source,
                writable: !self.config.is_excluded(&desc.name),
            });
        }
        (files, errors)
    }

    /// IDs already taken across the module set. With `close_strings`,
    /// modules that only fail on an unterminated string contribute the
    /// explicit IDs they will have once this run repairs them.
    fn seed_operation_ids(&self, close_strings: bool) -> Result<HashSet<String>> {
        let registry = self.registry()?;
        let (files, _) = self.snapshot_routes(&registry);
        let mut used = operation_id::seed_used_ids(&files);
        if !close_strings {
            return Ok(used);
        }

        let pending = registry.modules().iter().filter(|desc| {
            !self.config.is_excluded(&desc.name) && !files.iter().any(|f| f.module == desc.name)
        });
        for desc in pending {
            let Ok(source) = read_source(&desc.entry) else {
                continue;
            };
            let validation = syntax::validate(&source);
            let Some(line) = validation.error_line().filter(|_| validation.is_unterminated_string())
            else {
                continue;
            };
            let repaired = self.strings.repair(&source, line);
            if repaired.status != FixStatus::Fixed {
                continue;
            }
            let explicit = self
                .operation_ids
                .routes(&repaired.new_source)
                .into_iter()
                .filter_map(|route| route.operation_id);
            used.extend(explicit);
        }
        Ok(used)
    }

    fn repair_module(
        &self,
        desc: &ModuleDescriptor,
        fix_type: FixType,
        used: &mut HashSet<String>,
    ) -> ModuleReport {
        let outcome = self
            .locks
            .with_file(&desc.entry, || self.repair_locked(desc, fix_type, used));
        match outcome {
            Ok(report) => report,
            Err(err) => {
                warn!("{}: {}", desc.name, err);
                ModuleReport::error(&desc.name, err.to_string())
            }
        }
    }

    fn repair_locked(
        &self,
        desc: &ModuleDescriptor,
        fix_type: FixType,
        used: &mut HashSet<String>,
    ) -> Result<ModuleReport> {
        let original = read_source(&desc.entry)?;
        let mut current = original.clone();
        let mut records = Vec::new();

        let validation = syntax::validate(&current);
        if let Some(err) = &validation.error {
            if !fix_type.strings() {
                return Ok(ModuleReport::new(
                    &desc.name,
                    FixStatus::Unfixable,
                    format!("Module has syntax errors; fix syntax first: {}", err),
                ));
            }
            if !validation.is_unterminated_string() {
                return Ok(ModuleReport::new(
                    &desc.name,
                    FixStatus::Unfixable,
                    format!("Syntax error is not an unterminated string: {}", err),
                ));
            }
            let result = self.strings.repair(&current, err.line);
            if result.status != FixStatus::Fixed {
                info!("{}: {} ({})", desc.name, result.status.as_str(), result.message);
                return Ok(ModuleReport::new(&desc.name, result.status, result.message));
            }
            current = result.new_source;
            records.extend(result.records);
        }

        if fix_type.routers() {
            let result = self.router.repair(&current);
            if result.applied {
                current = result.new_source;
                records.extend(result.records);
            }
        }

        if fix_type.operation_ids() {
            let result = self.operation_ids.repair(&current, used);
            if result.applied {
                current = result.new_source;
                records.extend(result.records);
            }
        }

        if records.is_empty() || current == original {
            return Ok(ModuleReport::new(&desc.name, FixStatus::NoIssues, "No issues found"));
        }

        if let Some(err) = syntax::validate(&current).error {
            return Ok(ModuleReport::new(
                &desc.name,
                FixStatus::Unfixable,
                format!("Repaired content still fails validation: {}", err),
            ));
        }

        write_atomic(&desc.entry, &current)?;
        info!("{}: applied {} fix(es)", desc.name, records.len());
        Ok(ModuleReport::fixed(
            &desc.name,
            format!("Applied {} fix(es)", records.len()),
            records,
        ))
    }

    fn repair_router(&self, desc: &ModuleDescriptor) -> RouterFixReport {
        if self.config.is_excluded(&desc.name) {
            return RouterFixReport::bare(
                &desc.name,
                FixStatus::Skipped,
                "Module is excluded from repair",
            );
        }
        let outcome = self.locks.with_file(&desc.entry, || {
            let source = read_source(&desc.entry)?;
            let before = self.router.inspect(&source);
            let result = self.router.repair(&source);
            if result.applied {
                write_atomic(&desc.entry, &result.new_source)?;
                info!("{}: router repaired", desc.name);
            }
            Ok(RouterFixReport {
                module: desc.name.clone(),
                status: result.status,
                had_router_import: before.has_router_import,
                had_router_definition: before.has_router_definition,
                has_route_decorators: before.has_route_decorators,
                fixes: result.fixes(),
                message: result.message,
            })
        });
        outcome.unwrap_or_else(|err| {
            warn!("{}: {}", desc.name, err);
            RouterFixReport::bare(&desc.name, FixStatus::Error, err.to_string())
        })
    }
}

fn models_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bBaseModel\b").ok()).as_ref()
}

fn error_handling_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bHTTPException\b").ok()).as_ref()
}
