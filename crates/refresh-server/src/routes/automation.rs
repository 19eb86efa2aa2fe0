use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use refresh_core::ports::LogStore;
use refresh_core::scheduler::RunNowResult;
use refresh_core::update_log::Outcome;
use serde::Deserialize;

use crate::error::AppError;
use crate::routes::clamp_limit;
use crate::state::AppState;

/// POST /api/automation/start
pub async fn start(State(app): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    if !app.scheduler.start() {
        return Err(AppError::conflict("automation scheduler is already running"));
    }
    Ok(Json(serde_json::json!({
        "status": "running",
        "message": "Automation scheduler started",
    })))
}

/// POST /api/automation/stop — halts at the next profile boundary.
pub async fn stop(State(app): State<AppState>) -> Json<serde_json::Value> {
    let message = if app.scheduler.stop() {
        "Stop requested; any run in flight will finish first"
    } else {
        "Automation is not running"
    };
    Json(serde_json::json!({ "status": "stopped", "message": message }))
}

/// POST /api/automation/run-now
pub async fn run_now(
    State(app): State<AppState>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    match app.scheduler.run_now() {
        RunNowResult::Triggered => Ok((
            StatusCode::ACCEPTED,
            Json(serde_json::json!({
                "status": "running_now",
                "message": "Maintenance pass started",
            })),
        )),
        RunNowResult::AlreadyInProgress => Err(AppError::conflict(
            "a maintenance pass is already in progress",
        )),
    }
}

/// GET /api/automation/status
pub async fn status(State(app): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let scheduler = app.scheduler.clone();
    let status = tokio::task::spawn_blocking(move || scheduler.status())
        .await
        .map_err(AppError::join)??;

    let mut body = serde_json::to_value(&status)?;
    body["summary"] = serde_json::Value::from(status.headline());
    Ok(Json(body))
}

#[derive(Deserialize)]
pub struct LogsQuery {
    pub limit: Option<usize>,
}

/// GET /api/automation/logs — recent runs as log lines.
pub async fn logs(
    State(app): State<AppState>,
    Query(q): Query<LogsQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let store = app.store.clone();
    let limit = clamp_limit(q.limit, 50, 200);
    let entries = tokio::task::spawn_blocking(move || store.recent(limit))
        .await
        .map_err(AppError::join)??;

    let lines: Vec<serde_json::Value> = entries
        .iter()
        .map(|e| {
            let level = match e.outcome {
                Outcome::Failure => "ERROR",
                Outcome::Warning => "WARN",
                Outcome::Success | Outcome::NoChange => "INFO",
            };
            let message = if e.detail.is_empty() {
                format!("Profile {} {}", e.username, e.outcome)
            } else {
                e.detail.clone()
            };
            serde_json::json!({
                "timestamp": e.executed_at,
                "level": level,
                "message": message,
                "profile_id": e.profile_id,
                "username": e.username,
                "duration_ms": e.duration_ms,
                "outcome": e.outcome,
            })
        })
        .collect();
    Ok(Json(serde_json::json!({ "logs": lines })))
}
