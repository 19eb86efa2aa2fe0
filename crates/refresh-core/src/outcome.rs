use std::sync::Arc;

use tokio_util::task::TaskTracker;
use tracing::{error, warn};

use crate::error::Result;
use crate::executor::RunReport;
use crate::ports::{FailureNotice, LogStore, Notifier};
use crate::profile::{Profile, ProfileStatus};
use crate::update_log::{Outcome, UpdateLogEntry};

/// Log outcome for a terminal run status.
pub fn outcome_for(status: ProfileStatus) -> Outcome {
    match status {
        ProfileStatus::Completed => Outcome::Success,
        ProfileStatus::NoChange => Outcome::NoChange,
        _ => Outcome::Failure,
    }
}

/// Writes the one log entry for a run and raises the failure notification.
pub struct OutcomeLogger {
    logs: Arc<dyn LogStore>,
    notifier: Arc<dyn Notifier>,
    tasks: TaskTracker,
}

impl OutcomeLogger {
    /// Notification tasks are spawned on `tasks` so the host can wait for
    /// them before shutting its runtime down.
    pub fn new(logs: Arc<dyn LogStore>, notifier: Arc<dyn Notifier>, tasks: TaskTracker) -> Self {
        Self {
            logs,
            notifier,
            tasks,
        }
    }

    pub fn record(&self, profile: &Profile, report: &RunReport) -> Result<UpdateLogEntry> {
        let outcome = outcome_for(report.status);
        let entry = self.logs.append(UpdateLogEntry {
            id: 0,
            profile_id: profile.id,
            username: profile.username.clone(),
            executed_at: report.started_at,
            outcome,
            duration_ms: report.duration_ms,
            fields_edited: report.applied.clone(),
            detail: report.detail.clone(),
        })?;

        if outcome == Outcome::Failure {
            error!(
                profile_id = profile.id,
                username = %profile.username,
                detail = %report.detail,
                "run failed"
            );
            self.notify_failure(FailureNotice {
                profile_id: profile.id,
                username: profile.username.clone(),
                executed_at: entry.executed_at,
                detail: entry.detail.clone(),
            });
        }
        Ok(entry)
    }

    /// Fire and forget: never awaited by the run path.
    fn notify_failure(&self, notice: FailureNotice) {
        let notifier = Arc::clone(&self.notifier);
        self.tasks.spawn(async move {
            if let Err(e) = notifier.notify_failure(&notice).await {
                warn!(profile_id = notice.profile_id, error = %e, "failure notification not delivered");
            }
        });
    }
}
