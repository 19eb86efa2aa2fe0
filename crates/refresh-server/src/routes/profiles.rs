use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use refresh_core::ports::{LogStore, ProfileStore};
use refresh_core::profile::{ProfilePatch, ProfileView};
use refresh_core::update_log::UpdateLogEntry;
use serde::Deserialize;

use crate::error::AppError;
use crate::routes::clamp_limit;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateProfileBody {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// GET /api/profiles
pub async fn list_profiles(State(app): State<AppState>) -> Result<Json<Vec<ProfileView>>, AppError> {
    let store = app.store.clone();
    let profiles = tokio::task::spawn_blocking(move || store.list())
        .await
        .map_err(AppError::join)??;
    Ok(Json(profiles.into_iter().map(ProfileView::from).collect()))
}

/// POST /api/profiles — seals the password before it is stored.
pub async fn create_profile(
    State(app): State<AppState>,
    Json(body): Json<CreateProfileBody>,
) -> Result<(StatusCode, Json<ProfileView>), AppError> {
    if body.password.is_empty() {
        return Err(AppError::bad_request("password must not be empty"));
    }
    let store = app.store.clone();
    let profile = tokio::task::spawn_blocking(move || {
        let created = store.create_profile(body.username.trim(), &body.password, body.notes)?;
        match body.is_active {
            Some(false) => store.update_profile(
                created.id,
                ProfilePatch {
                    is_active: Some(false),
                    ..Default::default()
                },
            ),
            _ => Ok(created),
        }
    })
    .await
    .map_err(AppError::join)??;

    tracing::info!(profile_id = profile.id, username = %profile.username, "profile created");
    Ok((StatusCode::CREATED, Json(profile.into())))
}

/// GET /api/profiles/{id} — `id` may also be a username.
pub async fn get_profile(
    State(app): State<AppState>,
    Path(reference): Path<String>,
) -> Result<Json<ProfileView>, AppError> {
    let store = app.store.clone();
    let profile = tokio::task::spawn_blocking(move || store.resolve(&reference))
        .await
        .map_err(AppError::join)??;
    Ok(Json(profile.into()))
}

/// PATCH /api/profiles/{id}
pub async fn update_profile(
    State(app): State<AppState>,
    Path(reference): Path<String>,
    Json(patch): Json<ProfilePatch>,
) -> Result<Json<ProfileView>, AppError> {
    if patch.password.as_deref() == Some("") {
        return Err(AppError::bad_request("password must not be empty"));
    }
    let store = app.store.clone();
    let profile = tokio::task::spawn_blocking(move || {
        let id = store.resolve(&reference)?.id;
        store.update_profile(id, patch)
    })
    .await
    .map_err(AppError::join)??;
    Ok(Json(profile.into()))
}

/// DELETE /api/profiles/{id} — refused while a run is in flight. Logs stay.
pub async fn delete_profile(
    State(app): State<AppState>,
    Path(reference): Path<String>,
) -> Result<StatusCode, AppError> {
    let store = app.store.clone();
    let id = tokio::task::spawn_blocking(move || {
        let id = store.resolve(&reference)?.id;
        store.delete_profile(id).map(|()| id)
    })
    .await
    .map_err(AppError::join)??;
    tracing::info!(profile_id = id, "profile deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct ProfileLogsQuery {
    pub limit: Option<usize>,
}

/// GET /api/profiles/{id}/logs
pub async fn profile_logs(
    State(app): State<AppState>,
    Path(reference): Path<String>,
    Query(q): Query<ProfileLogsQuery>,
) -> Result<Json<Vec<UpdateLogEntry>>, AppError> {
    let store = app.store.clone();
    let limit = clamp_limit(q.limit, 100, 200);
    let logs = tokio::task::spawn_blocking(move || {
        let id = store.resolve(&reference)?.id;
        store.for_profile(id, limit)
    })
    .await
    .map_err(AppError::join)??;
    Ok(Json(logs))
}
