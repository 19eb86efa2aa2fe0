//! Collaborator contracts consumed by the orchestrator.
//!
//! Stores are synchronous: redb commits are short and the scheduler is a
//! single task. Everything that talks to the outside world (generator,
//! browser, notifier) is async and is expected to enforce its own timeout.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::classify::CollaboratorError;
use crate::error::Result;
use crate::profile::{FieldMap, Profile, ProfileId, ProfileStatus};
use crate::scheduler::PassSummary;
use crate::update_log::UpdateLogEntry;

// ---------------------------------------------------------------------------
// Secret
// ---------------------------------------------------------------------------

/// A decrypted credential. Never printed, never serialized.
#[derive(Clone)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

// ---------------------------------------------------------------------------
// Stores
// ---------------------------------------------------------------------------

pub trait ProfileStore: Send + Sync {
    fn list_active(&self) -> Result<Vec<Profile>>;

    fn list(&self) -> Result<Vec<Profile>>;

    fn get(&self, id: ProfileId) -> Result<Profile>;

    /// Write `status`, rejecting transitions the state machine forbids.
    fn set_status(&self, id: ProfileId, status: ProfileStatus) -> Result<()>;

    /// Record a terminal status together with run bookkeeping.
    fn record_finish(
        &self,
        id: ProfileId,
        status: ProfileStatus,
        finished_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Merge applied field values into the profile's stored content.
    fn merge_content(&self, id: ProfileId, applied: &FieldMap) -> Result<()>;

    fn decrypt_credential(&self, id: ProfileId) -> std::result::Result<Secret, CollaboratorError>;
}

pub trait LogStore: Send + Sync {
    /// Append one entry and return it with its assigned id.
    fn append(&self, entry: UpdateLogEntry) -> Result<UpdateLogEntry>;

    /// Newest first.
    fn recent(&self, limit: usize) -> Result<Vec<UpdateLogEntry>>;

    /// Newest first, for a single profile.
    fn for_profile(&self, id: ProfileId, limit: usize) -> Result<Vec<UpdateLogEntry>>;
}

// ---------------------------------------------------------------------------
// Content generator
// ---------------------------------------------------------------------------

/// What the generator is told about a profile.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileContext {
    pub profile_id: ProfileId,
    pub username: String,
    pub notes: Option<String>,
    /// Values applied on earlier runs.
    pub content: FieldMap,
}

impl From<&Profile> for ProfileContext {
    fn from(profile: &Profile) -> Self {
        Self {
            profile_id: profile.id,
            username: profile.username.clone(),
            notes: profile.notes.clone(),
            content: profile.content.clone(),
        }
    }
}

#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, ctx: &ProfileContext) -> std::result::Result<FieldMap, CollaboratorError>;
}

// ---------------------------------------------------------------------------
// Browser driver
// ---------------------------------------------------------------------------

/// Identity handed to the driver for one call.
#[derive(Debug, Clone)]
pub struct Session {
    pub profile_id: ProfileId,
    pub username: String,
    pub secret: Secret,
}

#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn read_current_field(
        &self,
        session: &Session,
        field: &str,
    ) -> std::result::Result<String, CollaboratorError>;

    async fn apply_field(
        &self,
        session: &Session,
        field: &str,
        value: &str,
    ) -> std::result::Result<(), CollaboratorError>;
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct FailureNotice {
    pub profile_id: ProfileId,
    pub username: String,
    pub executed_at: DateTime<Utc>,
    pub detail: String,
}

/// Best effort. Callers log and drop errors.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_failure(&self, notice: &FailureNotice) -> Result<()>;

    async fn notify_summary(&self, summary: &PassSummary) -> Result<()>;
}
