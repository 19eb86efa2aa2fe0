//! One run for one profile.
//!
//! ```text
//! (a) decrypt credential ──► (b) generate content ──► (c) read live values ──► (d) apply changed fields
//! ```
//!
//! Each step is wrapped in [`RunExecutor::attempt`], which classifies a
//! failure, consults [`retry::decide`] and re-enters *that* step after the
//! backoff. Nothing escapes: every path ends in a [`RunReport`] carrying a
//! terminal status.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::classify::CollaboratorError;
use crate::clock::{elapsed_ms, Clock};
use crate::ports::{BrowserDriver, ContentGenerator, ProfileContext, ProfileStore, Secret, Session};
use crate::profile::{FieldMap, Profile, ProfileId, ProfileStatus};
use crate::retry::{self, ErrorCategory, RetryDecision};

// ---------------------------------------------------------------------------
// RunReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub profile_id: ProfileId,
    /// Always terminal: `Completed`, `NoChange` or `Error`.
    pub status: ProfileStatus,
    /// Fields that were applied, including on an errored run.
    pub applied: FieldMap,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Category of the first failure that ended the run or a field.
    pub category: Option<ErrorCategory>,
    pub detail: String,
}

/// Run step, for logs.
#[derive(Debug, Clone, Copy)]
enum Step<'a> {
    Decrypt,
    Generate,
    Read(&'a str),
    Apply(&'a str),
}

impl std::fmt::Display for Step<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Step::Decrypt => f.write_str("decrypt"),
            Step::Generate => f.write_str("generate"),
            Step::Read(field) => write!(f, "read:{field}"),
            Step::Apply(field) => write!(f, "apply:{field}"),
        }
    }
}

// ---------------------------------------------------------------------------
// RunExecutor
// ---------------------------------------------------------------------------

pub struct RunExecutor {
    profiles: Arc<dyn ProfileStore>,
    generator: Arc<dyn ContentGenerator>,
    driver: Arc<dyn BrowserDriver>,
    clock: Arc<dyn Clock>,
}

impl RunExecutor {
    pub fn new(
        profiles: Arc<dyn ProfileStore>,
        generator: Arc<dyn ContentGenerator>,
        driver: Arc<dyn BrowserDriver>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            profiles,
            generator,
            driver,
            clock,
        }
    }

    /// Perform one run. The profile must already be `Running`.
    pub async fn run(&self, profile: &Profile) -> RunReport {
        let started_at = self.clock.now();
        let mut applied = FieldMap::new();
        let result = self.execute(profile, &mut applied).await;
        let duration_ms = elapsed_ms(started_at, self.clock.now());

        let (status, category, detail) = match result {
            Ok(Finished::NoChange) => (
                ProfileStatus::NoChange,
                None,
                "All fields already up to date".to_string(),
            ),
            Ok(Finished::Completed) => (
                ProfileStatus::Completed,
                None,
                format!(
                    "Updated {} field(s): {}",
                    applied.len(),
                    applied.keys().cloned().collect::<Vec<_>>().join(", ")
                ),
            ),
            Err(failures) => {
                let category = failures.first().map(CollaboratorError::category);
                let mut detail = failures
                    .iter()
                    .map(CollaboratorError::detail)
                    .collect::<Vec<_>>()
                    .join("; ");
                if !applied.is_empty() {
                    detail.push_str(&format!(
                        " (applied: {})",
                        applied.keys().cloned().collect::<Vec<_>>().join(", ")
                    ));
                }
                (ProfileStatus::Error, category, detail)
            }
        };

        info!(
            profile_id = profile.id,
            status = %status,
            duration_ms,
            applied = applied.len(),
            "run finished"
        );

        RunReport {
            profile_id: profile.id,
            status,
            applied,
            started_at,
            duration_ms,
            category,
            detail,
        }
    }

    async fn execute(
        &self,
        profile: &Profile,
        applied: &mut FieldMap,
    ) -> Result<Finished, Vec<CollaboratorError>> {
        let id = profile.id;

        // (a) decrypt
        let secret = self
            .attempt(id, Step::Decrypt, move || self.decrypt(id))
            .await
            .map_err(|e| vec![e])?;

        // (b) generate
        let ctx = ProfileContext::from(profile);
        let ctx = &ctx;
        let generator = &self.generator;
        let generated = self
            .attempt(id, Step::Generate, move || generator.generate(ctx))
            .await
            .map_err(|e| vec![e])?;

        let session = Session {
            profile_id: id,
            username: profile.username.clone(),
            secret,
        };
        let session = &session;
        let driver = &self.driver;
        let mut failures = Vec::new();

        // (c) compare against live values
        let mut changed: Vec<(&str, &str)> = Vec::new();
        for (field, value) in &generated {
            let field = field.as_str();
            match self
                .attempt(id, Step::Read(field), move || {
                    driver.read_current_field(session, field)
                })
                .await
            {
                Ok(live) if live.trim() == value.trim() => {
                    debug!(profile_id = id, field, "field unchanged, skipping");
                }
                Ok(_) => changed.push((field, value.as_str())),
                Err(err) => {
                    let abort = err.category() == ErrorCategory::CredentialRejected;
                    failures.push(err);
                    if abort {
                        return Err(failures);
                    }
                }
            }
        }

        if changed.is_empty() && failures.is_empty() {
            return Ok(Finished::NoChange);
        }

        // (d) apply
        for (field, value) in changed {
            match self
                .attempt(id, Step::Apply(field), move || {
                    driver.apply_field(session, field, value)
                })
                .await
            {
                Ok(()) => {
                    applied.insert(field.to_string(), value.to_string());
                }
                Err(err) => {
                    let abort = err.category() == ErrorCategory::CredentialRejected;
                    failures.push(err);
                    if abort {
                        break;
                    }
                }
            }
        }

        if failures.is_empty() {
            Ok(Finished::Completed)
        } else {
            Err(failures)
        }
    }

    async fn decrypt(&self, id: ProfileId) -> Result<Secret, CollaboratorError> {
        let profiles = Arc::clone(&self.profiles);
        tokio::task::spawn_blocking(move || profiles.decrypt_credential(id))
            .await
            .unwrap_or_else(|e| Err(CollaboratorError::Credential(e.to_string())))
    }

    /// Run `op` until it succeeds or the retry policy for its failure gives up.
    ///
    /// The attempt counter is per step; the policy is looked up from the
    /// category of the latest failure.
    async fn attempt<T, F, Fut>(
        &self,
        profile_id: ProfileId,
        step: Step<'_>,
        mut op: F,
    ) -> Result<T, CollaboratorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CollaboratorError>>,
    {
        let mut attempt = 1u32;
        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            let category = err.category();
            match retry::decide(category, attempt) {
                RetryDecision::RetryAfter(delay) => {
                    warn!(
                        profile_id,
                        %step,
                        attempt,
                        %category,
                        delay_secs = delay.as_secs(),
                        error = %err,
                        "step failed, retrying"
                    );
                    self.clock.sleep(delay).await;
                    attempt += 1;
                }
                RetryDecision::GiveUp => {
                    warn!(profile_id, %step, attempt, %category, error = %err, "step failed, giving up");
                    return Err(err);
                }
            }
        }
    }
}

enum Finished {
    Completed,
    NoChange,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
