use thiserror::Error;

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("not initialized: run 'refresh init'")]
    NotInitialized,

    #[error("profile not found: {0}")]
    ProfileNotFound(u64),

    #[error("profile not found: {0}")]
    UnknownProfile(String),

    #[error("profile already exists: {0}")]
    ProfileExists(String),

    #[error("invalid username '{0}': must be non-empty and contain no whitespace")]
    InvalidUsername(String),

    #[error("invalid status: {0}")]
    InvalidStatus(String),

    #[error("invalid outcome: {0}")]
    InvalidOutcome(String),

    #[error("invalid transition from {from} to {to}: {reason}")]
    InvalidTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("profile {0} has a run in flight")]
    ProfileBusy(u64),

    #[error("profile {0} is inactive")]
    ProfileInactive(u64),

    #[error("store error: {0}")]
    Store(String),

    #[error("age is not installed: install it from https://github.com/FiloSottile/age")]
    AgeNotInstalled,

    #[error("credential encryption failed: {0}")]
    SealFailed(String),

    #[error("credential decryption failed: {0}")]
    OpenFailed(String),

    #[error("notification failed: {0}")]
    Notify(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RefreshError>;
