//! Profile record and its status state machine.
//!
//! Transitions: `Idle | Completed | NoChange | Error → Running → Completed | NoChange | Error`
//!
//! Terminal statuses are audit state, not blocking state: a profile in
//! `Error` is dispatched again on its next eligible tick. The only way out of
//! a terminal status is back through `Running`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::RefreshError;

pub type ProfileId = u64;

/// Field name → value, ordered so logs and prompts are stable.
pub type FieldMap = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// ProfileStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProfileStatus {
    Idle,
    Running,
    Completed,
    NoChange,
    Error,
}

impl ProfileStatus {
    pub fn all() -> &'static [ProfileStatus] {
        &[
            ProfileStatus::Idle,
            ProfileStatus::Running,
            ProfileStatus::Completed,
            ProfileStatus::NoChange,
            ProfileStatus::Error,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProfileStatus::Idle => "Idle",
            ProfileStatus::Running => "Running",
            ProfileStatus::Completed => "Completed",
            ProfileStatus::NoChange => "NoChange",
            ProfileStatus::Error => "Error",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProfileStatus::Completed | ProfileStatus::NoChange | ProfileStatus::Error
        )
    }

    /// The transition table. Everything not listed here is illegal.
    pub fn can_transition_to(self, next: ProfileStatus) -> bool {
        match (self, next) {
            (ProfileStatus::Running, to) => to.is_terminal(),
            (_, ProfileStatus::Running) => true,
            _ => false,
        }
    }

    /// Validate `self → next`, returning the target on success.
    pub fn transition(self, next: ProfileStatus) -> Result<ProfileStatus, RefreshError> {
        if self.can_transition_to(next) {
            return Ok(next);
        }
        let reason = match (self, next) {
            (ProfileStatus::Running, ProfileStatus::Running) => "a run is already in flight",
            (ProfileStatus::Running, ProfileStatus::Idle) => "a run must end in a terminal status",
            (_, ProfileStatus::Idle) => "idle is only the creation status",
            _ => "terminal statuses are only reached from running",
        };
        Err(RefreshError::InvalidTransition {
            from: self.to_string(),
            to: next.to_string(),
            reason: reason.to_string(),
        })
    }
}

impl fmt::Display for ProfileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProfileStatus {
    type Err = RefreshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProfileStatus::all()
            .iter()
            .copied()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| RefreshError::InvalidStatus(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: ProfileId,
    pub username: String,
    /// Armored ciphertext; opened only inside a run.
    pub sealed_credential: String,
    pub is_active: bool,
    pub status: ProfileStatus,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_success_at: Option<DateTime<Utc>>,
    /// Earliest time a scheduled pass may dispatch this profile again.
    #[serde(default)]
    pub next_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
    /// Last values this system applied, fed back to the generator as context.
    #[serde(default)]
    pub content: FieldMap,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// Build a new `Idle` profile. The store assigns the real id on insert.
    pub fn new(username: impl Into<String>, sealed_credential: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            username: username.into(),
            sealed_credential: sealed_credential.into(),
            is_active: true,
            status: ProfileStatus::Idle,
            last_run_at: None,
            last_success_at: None,
            next_run_at: None,
            notes: None,
            content: FieldMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Due for a scheduled pass at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_run_at.is_none_or(|at| at <= now)
    }
}

/// Outward-facing profile: everything except the sealed credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileView {
    pub id: ProfileId,
    pub username: String,
    pub is_active: bool,
    pub status: ProfileStatus,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub content: FieldMap,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Profile> for ProfileView {
    fn from(p: Profile) -> Self {
        Self {
            id: p.id,
            username: p.username,
            is_active: p.is_active,
            status: p.status,
            last_run_at: p.last_run_at,
            last_success_at: p.last_success_at,
            next_run_at: p.next_run_at,
            notes: p.notes,
            content: p.content,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

/// Admin edits. `None` leaves a field untouched; an empty `notes` clears it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfilePatch {
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub notes: Option<String>,
    /// New plaintext password; sealed before it is stored.
    #[serde(default)]
    pub password: Option<String>,
}

pub fn validate_username(username: &str) -> Result<(), RefreshError> {
    if username.is_empty() || username.chars().any(char::is_whitespace) {
        return Err(RefreshError::InvalidUsername(username.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
