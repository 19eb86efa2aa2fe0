use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use refresh_core::error::RefreshError;

// ---------------------------------------------------------------------------
// Internal sentinels
// ---------------------------------------------------------------------------

/// Carries an explicit 409 through the `anyhow::Error` chain.
#[derive(Debug)]
struct ConflictError(String);

impl std::fmt::Display for ConflictError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ConflictError {}

/// Carries an explicit 400 through the `anyhow::Error` chain.
#[derive(Debug)]
struct BadRequestError(String);

impl std::fmt::Display for BadRequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for BadRequestError {}

// ---------------------------------------------------------------------------
// AppError
// ---------------------------------------------------------------------------

/// Unified error type for HTTP responses.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self(BadRequestError(msg.into()).into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self(ConflictError(msg.into()).into())
    }

    pub fn join(e: tokio::task::JoinError) -> Self {
        Self(anyhow::anyhow!("task join error: {e}"))
    }

    fn status(&self) -> StatusCode {
        if self.0.downcast_ref::<ConflictError>().is_some() {
            return StatusCode::CONFLICT;
        }
        if self.0.downcast_ref::<BadRequestError>().is_some() {
            return StatusCode::BAD_REQUEST;
        }
        let Some(e) = self.0.downcast_ref::<RefreshError>() else {
            return StatusCode::INTERNAL_SERVER_ERROR;
        };
        match e {
            RefreshError::ProfileNotFound(_) | RefreshError::UnknownProfile(_) => {
                StatusCode::NOT_FOUND
            }
            RefreshError::ProfileExists(_) | RefreshError::ProfileBusy(_) => StatusCode::CONFLICT,
            RefreshError::InvalidTransition { .. } | RefreshError::ProfileInactive(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            RefreshError::NotInitialized
            | RefreshError::InvalidUsername(_)
            | RefreshError::InvalidStatus(_)
            | RefreshError::InvalidOutcome(_)
            | RefreshError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            RefreshError::AgeNotInstalled => StatusCode::SERVICE_UNAVAILABLE,
            RefreshError::Store(_)
            | RefreshError::SealFailed(_)
            | RefreshError::OpenFailed(_)
            | RefreshError::Notify(_)
            | RefreshError::Io(_)
            | RefreshError::Yaml(_)
            | RefreshError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
