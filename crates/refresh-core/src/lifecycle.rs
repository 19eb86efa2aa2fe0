//! Dispatch and finish bookkeeping for the profile state machine.
//!
//! `begin` is the only way into `Running`. The terminal write (`finish`, or
//! `write_terminal` when retried later) and startup recovery are the only
//! ways out, so every started run ends in exactly one terminal status.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::clock::{elapsed_ms, Clock};
use crate::config::SchedulerConfig;
use crate::error::{RefreshError, Result};
use crate::executor::RunReport;
use crate::ports::{LogStore, ProfileStore};
use crate::profile::{FieldMap, Profile, ProfileId, ProfileStatus};
use crate::update_log::{Outcome, UpdateLogEntry};

pub const INTERRUPTED_DETAIL: &str = "Run was interrupted before completion";

const FINISH_ATTEMPTS: u32 = 3;
const FINISH_RETRY_DELAY: Duration = Duration::from_secs(1);

pub struct Lifecycle {
    profiles: Arc<dyn ProfileStore>,
    clock: Arc<dyn Clock>,
    cadence: chrono::Duration,
    error_cooldown: chrono::Duration,
}

impl Lifecycle {
    pub fn new(profiles: Arc<dyn ProfileStore>, clock: Arc<dyn Clock>, config: &SchedulerConfig) -> Self {
        Self {
            profiles,
            clock,
            cadence: config.cadence(),
            error_cooldown: config.error_cooldown(),
        }
    }

    /// Move profile `id` into `Running`. Re-reads the activation flag: a
    /// profile deactivated mid-pass is refused.
    pub fn begin(&self, id: ProfileId) -> Result<Profile> {
        let mut profile = self.profiles.get(id)?;
        if !profile.is_active {
            return Err(RefreshError::ProfileInactive(id));
        }
        self.profiles.set_status(id, ProfileStatus::Running)?;
        profile.status = ProfileStatus::Running;
        Ok(profile)
    }

    /// Record the terminal status from `report` and schedule the next run,
    /// retrying a failed store write a few times before giving up.
    pub async fn finish(&self, report: &RunReport) -> Result<()> {
        let mut attempt = 1;
        loop {
            match self.write_terminal(report) {
                Ok(()) => return Ok(()),
                Err(e) if attempt < FINISH_ATTEMPTS => {
                    warn!(
                        profile_id = report.profile_id,
                        attempt,
                        error = %e,
                        "terminal status write failed, retrying"
                    );
                    self.clock.sleep(FINISH_RETRY_DELAY).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One terminal write. Repeatable: the status is only written while the
    /// profile is still `Running`, and merging applied content is idempotent.
    pub fn write_terminal(&self, report: &RunReport) -> Result<()> {
        let now = self.clock.now();
        if self.profiles.get(report.profile_id)?.status == ProfileStatus::Running {
            let rest = match report.status {
                ProfileStatus::Error => self.error_cooldown,
                _ => self.cadence,
            };
            self.profiles
                .record_finish(report.profile_id, report.status, now, now + rest)?;
        }
        self.profiles.merge_content(report.profile_id, &report.applied)
    }

    /// Close out runs left `Running` by a process that died mid-run.
    ///
    /// Each gets an `Error` status and one `Failure` log entry, so the
    /// one-entry-per-started-run invariant survives a crash.
    pub fn recover_interrupted(&self, logs: &dyn LogStore) -> Result<usize> {
        let now = self.clock.now();
        let mut recovered = 0;
        for profile in self.profiles.list()? {
            if profile.status != ProfileStatus::Running {
                continue;
            }
            self.profiles.record_finish(
                profile.id,
                ProfileStatus::Error,
                now,
                now + self.error_cooldown,
            )?;
            let duration_ms = elapsed_ms(profile.updated_at, now);
            logs.append(UpdateLogEntry {
                id: 0,
                profile_id: profile.id,
                username: profile.username.clone(),
                executed_at: now,
                outcome: Outcome::Failure,
                duration_ms,
                fields_edited: FieldMap::new(),
                detail: INTERRUPTED_DETAIL.to_string(),
            })?;
            warn!(profile_id = profile.id, "recovered interrupted run");
            recovered += 1;
        }
        if recovered > 0 {
            info!(recovered, "startup recovery complete");
        }
        Ok(recovered)
    }
}
