//! HTTP surface
//!
//! JSON in, JSON out. Orchestration is blocking filesystem and parser
//! work, so every handler hands it to tokio's blocking pool.
//!
//! Status policy: per-module failures are 200 with `status: "error"` in the
//! body, bad module names are 400, and an unreadable module root is 500.

use crate::error::MendError;
use crate::orchestrator::{FixType, Orchestrator};
use crate::report::{
    CheckAllReport, CheckReport, ConsistencyCheckReport, ConsistencyReport, ModuleReport, OperationIdScanReport,
    OverallHealth, RouterBatchReport, RouterFixReport,
};
use anyhow::Context;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ModuleRequest {
    pub module: String,
}

#[derive(Debug, Deserialize)]
pub struct FixModuleRequest {
    pub module: String,
    #[serde(default)]
    pub fix_type: FixType,
}

#[derive(Debug, Default, Deserialize)]
pub struct ScanRequest {
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug)]
pub enum ApiError {
    Mend(MendError),
    Join(String),
}

impl From<MendError> for ApiError {
    fn from(err: MendError) -> Self {
        ApiError::Mend(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Mend(err @ MendError::InvalidModuleName(_)) => {
                warn!("Rejected request: {}", err);
                (StatusCode::BAD_REQUEST, err.to_string())
            }
            ApiError::Mend(err) => {
                error!("Request failed: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            ApiError::Join(msg) => {
                error!("Worker task failed: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

async fn run_blocking<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Orchestrator) -> crate::error::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let orchestrator = Arc::clone(&state.orchestrator);
    tokio::task::spawn_blocking(move || f(&orchestrator))
        .await
        .map_err(|e| ApiError::Join(e.to_string()))?
        .map_err(ApiError::from)
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/check-module", post(check_module))
        .route("/check-all-modules", post(check_all_modules))
        .route("/fix-module-syntax", post(fix_module_syntax))
        .route("/fix-all-modules-syntax", post(fix_all_modules_syntax))
        .route("/fix-module", post(fix_module))
        .route("/fix-router", post(fix_router))
        .route("/fix-all-routers", post(fix_all_routers))
        .route("/fix-operation-ids", post(fix_operation_ids))
        .route("/operation-id-fixer-scan", post(operation_id_scan))
        .route("/consistency-check", post(consistency_check))
        .route("/health-check", get(health_check))
        .route("/health-check/", get(health_check))
        .with_state(state)
}

pub async fn serve(orchestrator: Orchestrator, bind: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(AppState::new(orchestrator)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("Could not listen for ctrl-c: {}", err);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

// ═══════════════════════════════════════════════════════════════════════════
//  HANDLERS
// ═══════════════════════════════════════════════════════════════════════════

async fn check_module(
    State(state): State<AppState>,
    Json(req): Json<ModuleRequest>,
) -> ApiResult<CheckReport> {
    run_blocking(&state, move |o| o.check_module(&req.module)).await.map(Json)
}

async fn check_all_modules(State(state): State<AppState>) -> ApiResult<CheckAllReport> {
    run_blocking(&state, |o| o.check_all_modules()).await.map(Json)
}

async fn fix_module_syntax(
    State(state): State<AppState>,
    Json(req): Json<ModuleRequest>,
) -> ApiResult<ModuleReport> {
    run_blocking(&state, move |o| o.fix_module_syntax(&req.module)).await.map(Json)
}

async fn fix_all_modules_syntax(State(state): State<AppState>) -> ApiResult<ConsistencyReport> {
    run_blocking(&state, |o| o.fix_all_modules_syntax()).await.map(Json)
}

async fn fix_module(
    State(state): State<AppState>,
    Json(req): Json<FixModuleRequest>,
) -> ApiResult<ModuleReport> {
    run_blocking(&state, move |o| o.fix_module(&req.module, req.fix_type))
        .await
        .map(Json)
}

async fn fix_router(
    State(state): State<AppState>,
    Json(req): Json<ModuleRequest>,
) -> ApiResult<RouterFixReport> {
    run_blocking(&state, move |o| o.fix_router(&req.module)).await.map(Json)
}

async fn fix_all_routers(State(state): State<AppState>) -> ApiResult<RouterBatchReport> {
    run_blocking(&state, |o| o.fix_all_routers()).await.map(Json)
}

async fn fix_operation_ids(
    State(state): State<AppState>,
    Json(req): Json<ModuleRequest>,
) -> ApiResult<ModuleReport> {
    run_blocking(&state, move |o| o.fix_operation_ids(&req.module)).await.map(Json)
}

async fn operation_id_scan(
    State(state): State<AppState>,
    req: Option<Json<ScanRequest>>,
) -> ApiResult<OperationIdScanReport> {
    let dry_run = req.map(|Json(r)| r.dry_run).unwrap_or(false);
    run_blocking(&state, move |o| o.scan_operation_ids(dry_run)).await.map(Json)
}

async fn consistency_check(State(state): State<AppState>) -> ApiResult<ConsistencyCheckReport> {
    run_blocking(&state, |o| o.consistency_check()).await.map(Json)
}

async fn health_check(State(state): State<AppState>) -> Response {
    match run_blocking(&state, |o| Ok(o.health_check())).await {
        Ok(report) if report.status == OverallHealth::Error => {
            (StatusCode::INTERNAL_SERVER_ERROR, Json(report)).into_response()
        }
        Ok(report) => Json(report).into_response(),
        Err(err) => err.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::repair::FixStatus;
    use crate::workspace::FileLocks;
    use std::fs;
    use tempfile::TempDir;

    fn state_with(modules: &[(&str, &str)]) -> (TempDir, AppState) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("apis");
        fs::create_dir_all(&root).unwrap();
        for (name, source) in modules {
            fs::create_dir_all(root.join(name)).unwrap();
            fs::write(root.join(name).join("__init__.py"), source).unwrap();
        }
        let orchestrator =
            Orchestrator::with_locks(Config::for_root(&root), FileLocks::new(dir.path().join("locks")));
        (dir, AppState::new(orchestrator))
    }

    fn module(name: &str) -> Json<ModuleRequest> {
        Json(ModuleRequest {
            module: name.to_string(),
        })
    }

    #[tokio::test]
    async fn test_fix_module_syntax_returns_report() {
        let (dir, state) = state_with(&[("properties", "description = \"Luxury home\n")]);
        let Json(report) = fix_module_syntax(State(state), module("properties")).await.unwrap();
        assert_eq!(report.status, FixStatus::Fixed);
        assert_eq!(report.fixes, vec!["Fixed unterminated string at line 1"]);
        assert_eq!(
            fs::read_to_string(dir.path().join("apis/properties/__init__.py")).unwrap(),
            "description = \"Luxury home\"\n"
        );
    }

    #[tokio::test]
    async fn test_invalid_module_name_is_400() {
        let (_dir, state) = state_with(&[]);
        let response = check_module(State(state), module("../etc")).await.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_missing_module_is_200_with_error_status() {
        let (_dir, state) = state_with(&[("listings", "x = 1\n")]);
        let result = fix_module_syntax(State(state), module("ghost")).await;
        let Ok(Json(report)) = result else {
            panic!("expected a report");
        };
        assert_eq!(report.status, FixStatus::Error);
    }

    #[tokio::test]
    async fn test_batch_with_broken_module_is_200() {
        let (dir, state) = state_with(&[
            ("mod1", "x = 'abc\n"),
            ("mod2", "y = 1\n"),
            ("mod4", "z = 'q\n"),
            ("mod5", "w = 2\n"),
        ]);
        fs::create_dir_all(dir.path().join("apis/mod3/__init__.py")).unwrap();

        let response = fix_all_modules_syntax(State(state.clone())).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let Json(report) = fix_all_modules_syntax(State(state)).await.unwrap();
        assert_eq!(report.results.len(), 5);
    }

    #[tokio::test]
    async fn test_check_all_modules_reports_totals() {
        let (_dir, state) = state_with(&[("listings", "x = 'abc\n"), ("users", "y = 1\n")]);
        let Json(report) = check_all_modules(State(state)).await.unwrap();
        assert_eq!(report.total_modules, 2);
        assert_eq!(report.valid_modules, 1);
        assert_eq!(report.invalid_modules, 1);
    }

    #[tokio::test]
    async fn test_check_all_modules_on_missing_root_is_500() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::with_locks(
            Config::for_root(dir.path().join("missing")),
            FileLocks::new(dir.path().join("locks")),
        );
        let response = check_all_modules(State(AppState::new(orchestrator)))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_health_check_on_missing_root_is_500() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::with_locks(
            Config::for_root(dir.path().join("missing")),
            FileLocks::new(dir.path().join("locks")),
        );
        let response = health_check(State(AppState::new(orchestrator))).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_health_check_ok() {
        let (_dir, state) = state_with(&[("listings", "x = 1\n")]);
        let response = health_check(State(state)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_scan_without_body_defaults_to_apply() {
        let (_dir, state) = state_with(&[("listings", "x = 1\n")]);
        let Json(report) = operation_id_scan(State(state), None).await.unwrap();
        assert!(!report.dry_run);
        assert_eq!(report.files_scanned, 1);
    }

    #[test]
    fn test_fix_module_request_defaults_to_all() {
        let req: FixModuleRequest = serde_json::from_str(r#"{"module": "listings"}"#).unwrap();
        assert_eq!(req.fix_type, FixType::All);
        let req: FixModuleRequest =
            serde_json::from_str(r#"{"module": "listings", "fix_type": "operation_ids"}"#).unwrap();
        assert_eq!(req.fix_type, FixType::OperationIds);
    }

    #[test]
    fn test_router_builds() {
        let (_dir, state) = state_with(&[]);
        let _ = router(state);
    }
}
