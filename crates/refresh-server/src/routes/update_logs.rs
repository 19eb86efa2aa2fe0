use axum::extract::{Query, State};
use axum::Json;
use refresh_core::store::LogQuery;
use refresh_core::update_log::{LogSummary, Outcome, UpdateLogEntry};
use serde::Deserialize;

use crate::error::AppError;
use crate::routes::clamp_limit;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct UpdateLogsQuery {
    pub outcome: Option<String>,
    /// Profile id or username.
    pub profile: Option<String>,
    pub limit: Option<usize>,
}

/// GET /api/update-logs?outcome=&profile=&limit=
pub async fn list_logs(
    State(app): State<AppState>,
    Query(q): Query<UpdateLogsQuery>,
) -> Result<Json<Vec<UpdateLogEntry>>, AppError> {
    let outcome = q
        .outcome
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::parse::<Outcome>)
        .transpose()?;
    let limit = clamp_limit(q.limit, 100, 200);
    let store = app.store.clone();
    let logs = tokio::task::spawn_blocking(move || {
        let profile_id = match q.profile.as_deref().filter(|s| !s.is_empty()) {
            Some(reference) => Some(store.resolve(reference)?.id),
            None => None,
        };
        store.query_logs(&LogQuery {
            profile_id,
            outcome,
            since: None,
            limit: Some(limit),
        })
    })
    .await
    .map_err(AppError::join)??;
    Ok(Json(logs))
}

#[derive(Deserialize)]
pub struct SummaryQuery {
    pub days: Option<i64>,
}

/// GET /api/update-logs/summary?days=7
pub async fn summary(
    State(app): State<AppState>,
    Query(q): Query<SummaryQuery>,
) -> Result<Json<LogSummary>, AppError> {
    let days = q.days.unwrap_or(7);
    if !(1..=365).contains(&days) {
        return Err(AppError::bad_request("days must be between 1 and 365"));
    }
    let since = chrono::Utc::now() - chrono::Duration::days(days);
    let store = app.store.clone();
    let summary = tokio::task::spawn_blocking(move || store.summary(Some(since), 10))
        .await
        .map_err(AppError::join)??;
    Ok(Json(summary))
}
