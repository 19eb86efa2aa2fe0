//! The control loop.
//!
//! One background task walks the active profiles strictly one at a time,
//! with a mandatory pause between profiles. Control-plane calls (`start`,
//! `stop`, `run_now`, `status`) only touch atomics and a `Notify`, so they
//! return immediately whatever the loop is doing.
//!
//! A stop is honoured at profile boundaries only: before the next dispatch
//! and during the inter-profile delay. A run that has begun always reaches
//! a logged terminal status.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Notify};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::error::{RefreshError, Result};
use crate::executor::{RunExecutor, RunReport};
use crate::lifecycle::Lifecycle;
use crate::outcome::{outcome_for, OutcomeLogger};
use crate::ports::{BrowserDriver, ContentGenerator, LogStore, Notifier, ProfileStore};
use crate::profile::{ProfileId, ProfileStatus};
use crate::update_log::Outcome;

const EVENT_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PassTrigger {
    Scheduled,
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassSummary {
    pub trigger: PassTrigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub dispatched: usize,
    pub success: usize,
    pub no_change: usize,
    pub failure: usize,
    /// Active profiles not dispatched: not yet due, deactivated or already running.
    pub skipped: usize,
    pub stopped_early: bool,
}

impl PassSummary {
    fn new(trigger: PassTrigger, started_at: DateTime<Utc>) -> Self {
        Self {
            trigger,
            started_at,
            finished_at: None,
            dispatched: 0,
            success: 0,
            no_change: 0,
            failure: 0,
            skipped: 0,
            stopped_early: false,
        }
    }

    fn record(&mut self, outcome: Outcome) {
        self.dispatched += 1;
        match outcome {
            Outcome::Success => self.success += 1,
            Outcome::NoChange => self.no_change += 1,
            Outcome::Failure | Outcome::Warning => self.failure += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentRun {
    pub profile_id: ProfileId,
    pub username: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub pass_in_progress: bool,
    pub stop_requested: bool,
    pub active_count: usize,
    pub status_counts: BTreeMap<String, usize>,
    pub current_profile: Option<CurrentRun>,
    pub last_pass: Option<PassSummary>,
}

impl SchedulerStatus {
    /// One-line human description of what the scheduler is doing.
    pub fn headline(&self) -> &'static str {
        match (self.pass_in_progress, self.stop_requested, self.running) {
            (true, true, _) => "Maintenance pass is running but will stop at the next profile boundary",
            (true, false, _) => "Maintenance pass is currently running",
            (false, _, true) => "Scheduler is running (waiting for the next tick)",
            (false, _, false) => "Automation is not running",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunNowResult {
    Triggered,
    AlreadyInProgress,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchedulerEvent {
    LoopStarted,
    LoopStopped,
    PassStarted {
        trigger: PassTrigger,
    },
    ProfileStatus {
        profile_id: ProfileId,
        username: String,
        status: ProfileStatus,
    },
    RunLogged {
        profile_id: ProfileId,
        outcome: Outcome,
        detail: String,
    },
    PassFinished {
        summary: PassSummary,
    },
}

/// Everything the loop talks to.
pub struct Collaborators {
    pub profiles: Arc<dyn ProfileStore>,
    pub logs: Arc<dyn LogStore>,
    pub generator: Arc<dyn ContentGenerator>,
    pub driver: Arc<dyn BrowserDriver>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Cheap to clone; all clones share one loop.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    config: SchedulerConfig,
    profiles: Arc<dyn ProfileStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    executor: RunExecutor,
    lifecycle: Lifecycle,
    outcomes: OutcomeLogger,

    loop_running: AtomicBool,
    stop_requested: AtomicBool,
    pass_active: AtomicBool,
    run_now_pending: AtomicBool,
    wake: Notify,
    pass_lock: tokio::sync::Mutex<()>,
    current: Mutex<Option<CurrentRun>>,
    last_pass: Mutex<Option<PassSummary>>,
    events: broadcast::Sender<SchedulerEvent>,
    /// Loop task, one-shot passes and notification deliveries.
    tasks: TaskTracker,
    /// Runs whose terminal status could not be written; retried before each pass.
    stranded: Mutex<BTreeMap<ProfileId, RunReport>>,
}

enum Dispatch {
    Ran(Outcome),
    Skipped,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, deps: Collaborators) -> Self {
        let executor = RunExecutor::new(
            Arc::clone(&deps.profiles),
            deps.generator,
            deps.driver,
            Arc::clone(&deps.clock),
        );
        let lifecycle = Lifecycle::new(Arc::clone(&deps.profiles), Arc::clone(&deps.clock), &config);
        let tasks = TaskTracker::new();
        let outcomes = OutcomeLogger::new(deps.logs, Arc::clone(&deps.notifier), tasks.clone());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                config,
                profiles: deps.profiles,
                notifier: deps.notifier,
                clock: deps.clock,
                executor,
                lifecycle,
                outcomes,
                loop_running: AtomicBool::new(false),
                stop_requested: AtomicBool::new(false),
                pass_active: AtomicBool::new(false),
                run_now_pending: AtomicBool::new(false),
                wake: Notify::new(),
                pass_lock: tokio::sync::Mutex::new(()),
                current: Mutex::new(None),
                last_pass: Mutex::new(None),
                events,
                tasks,
                stranded: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    /// Start the background loop. Returns `false` if it was already running,
    /// including while a requested stop is still draining.
    pub fn start(&self) -> bool {
        let inner = &self.inner;
        if inner.loop_running.swap(true, Ordering::SeqCst) {
            return false;
        }
        inner.stop_requested.store(false, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        self.inner.tasks.spawn(async move { inner.run_loop().await });
        true
    }

    /// Request a halt at the next profile boundary. Returns `false` if there
    /// was nothing to stop.
    pub fn stop(&self) -> bool {
        let inner = &self.inner;
        if !inner.loop_running.load(Ordering::SeqCst) && !inner.pass_active.load(Ordering::SeqCst) {
            return false;
        }
        inner.stop_requested.store(true, Ordering::SeqCst);
        inner.wake.notify_one();
        info!("scheduler stop requested");
        true
    }

    /// Trigger an out-of-band pass over every active profile. The tick
    /// schedule is left untouched.
    pub fn run_now(&self) -> RunNowResult {
        let inner = &self.inner;
        if inner.pass_active.load(Ordering::SeqCst)
            || inner
                .run_now_pending
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
        {
            return RunNowResult::AlreadyInProgress;
        }

        if inner.loop_running.load(Ordering::SeqCst) && !inner.stop_requested.load(Ordering::SeqCst) {
            inner.wake.notify_one();
        } else {
            let inner = Arc::clone(&self.inner);
            self.inner.tasks.spawn(async move {
                inner.run_pass(PassTrigger::Manual).await;
                if !inner.loop_running.load(Ordering::SeqCst) {
                    inner.stop_requested.store(false, Ordering::SeqCst);
                }
            });
        }
        info!("manual pass triggered");
        RunNowResult::Triggered
    }

    /// Run one pass inline and return its summary.
    pub async fn run_pass(&self, trigger: PassTrigger) -> PassSummary {
        self.inner.run_pass(trigger).await
    }

    pub fn is_running(&self) -> bool {
        self.inner.loop_running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> Result<SchedulerStatus> {
        let inner = &self.inner;
        let profiles = inner.profiles.list()?;
        let mut status_counts: BTreeMap<String, usize> = ProfileStatus::all()
            .iter()
            .map(|s| (s.to_string(), 0))
            .collect();
        for p in &profiles {
            *status_counts.entry(p.status.to_string()).or_default() += 1;
        }
        Ok(SchedulerStatus {
            running: inner.loop_running.load(Ordering::SeqCst),
            pass_in_progress: inner.pass_active.load(Ordering::SeqCst),
            stop_requested: inner.stop_requested.load(Ordering::SeqCst),
            active_count: profiles.iter().filter(|p| p.is_active).count(),
            status_counts,
            current_profile: lock(&inner.current).clone(),
            last_pass: lock(&inner.last_pass).clone(),
        })
    }

    /// Wait up to `timeout` for the loop, one-shot passes and outstanding
    /// notifications to finish. Returns `false` if the wait timed out.
    ///
    /// The loop only exits after [`stop`](Self::stop), so hosts call that first.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let tasks = &self.inner.tasks;
        tasks.close();
        let drained = tokio::time::timeout(timeout, tasks.wait()).await.is_ok();
        tasks.reopen();
        drained
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.inner.events.subscribe()
    }

    /// Close out runs a previous process left `Running`.
    pub fn recover_interrupted(&self, logs: &dyn LogStore) -> Result<usize> {
        self.inner.lifecycle.recover_interrupted(logs)
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Loop internals
// ---------------------------------------------------------------------------

impl Inner {
    fn emit(&self, event: SchedulerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn stopping(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Sleep for `delay`, ending early only on a stop request. A wake-up left
    /// over from an earlier stop or `run_now` does not shorten the pause.
    async fn pause(&self, delay: Duration) {
        let sleep = self.clock.sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return,
                _ = self.wake.notified() => {
                    if self.stopping() {
                        return;
                    }
                }
            }
        }
    }

    fn still_active(&self, id: ProfileId) -> bool {
        self.profiles.get(id).map(|p| p.is_active).unwrap_or(false)
    }

    /// Retry terminal writes that failed in an earlier pass.
    fn heal_stranded(&self) {
        let pending: Vec<RunReport> = lock(&self.stranded).values().cloned().collect();
        for report in pending {
            match self.lifecycle.write_terminal(&report) {
                Ok(()) => {
                    lock(&self.stranded).remove(&report.profile_id);
                    info!(profile_id = report.profile_id, status = %report.status, "terminal status recorded late");
                }
                Err(e) => {
                    warn!(profile_id = report.profile_id, error = %e, "terminal status still not recorded");
                }
            }
        }
    }

    async fn run_loop(self: Arc<Self>) {
        info!(
            tick_secs = self.config.tick_interval().as_secs(),
            delay_secs = self.config.inter_profile_delay().as_secs(),
            "scheduler loop started"
        );
        self.emit(SchedulerEvent::LoopStarted);

        let mut next_tick = self.clock.now();
        loop {
            if self.stopping() {
                break;
            }
            let now = self.clock.now();
            if self.run_now_pending.load(Ordering::SeqCst) {
                self.run_pass(PassTrigger::Manual).await;
                continue;
            }
            if now >= next_tick {
                self.run_pass(PassTrigger::Scheduled).await;
                next_tick = self.clock.now() + chrono::Duration::from_std(self.config.tick_interval())
                    .unwrap_or_else(|_| chrono::Duration::seconds(1));
                continue;
            }
            let wait = (next_tick - now).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = self.clock.sleep(wait) => {}
                _ = self.wake.notified() => {}
            }
        }

        self.run_now_pending.store(false, Ordering::SeqCst);
        self.stop_requested.store(false, Ordering::SeqCst);
        self.loop_running.store(false, Ordering::SeqCst);
        self.emit(SchedulerEvent::LoopStopped);
        info!("scheduler loop stopped");
    }

    async fn run_pass(&self, trigger: PassTrigger) -> PassSummary {
        let _guard = self.pass_lock.lock().await;
        self.pass_active.store(true, Ordering::SeqCst);
        if trigger == PassTrigger::Manual {
            self.run_now_pending.store(false, Ordering::SeqCst);
        }
        self.heal_stranded();

        let mut summary = PassSummary::new(trigger, self.clock.now());
        self.emit(SchedulerEvent::PassStarted { trigger });

        let candidates = match self.profiles.list_active() {
            Ok(list) => list,
            Err(e) => {
                error!(error = %e, "could not list active profiles");
                Vec::new()
            }
        };
        let now = self.clock.now();
        let (due, not_due): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .partition(|p| trigger == PassTrigger::Manual || p.is_due(now));
        summary.skipped += not_due.len();
        debug!(?trigger, due = due.len(), skipped = summary.skipped, "pass started");

        // Set once a run has been logged; cleared when the pause is taken.
        let mut pending_delay = false;
        for profile in &due {
            if pending_delay {
                if !self.still_active(profile.id) {
                    debug!(profile_id = profile.id, "deactivated since pass start, skipping");
                    summary.skipped += 1;
                    continue;
                }
                self.pause(self.config.inter_profile_delay()).await;
                pending_delay = false;
            }
            if self.stopping() {
                summary.stopped_early = true;
                break;
            }
            match self.dispatch(profile.id).await {
                Dispatch::Ran(outcome) => {
                    summary.record(outcome);
                    pending_delay = true;
                }
                Dispatch::Skipped => summary.skipped += 1,
            }
        }

        summary.finished_at = Some(self.clock.now());
        *lock(&self.last_pass) = Some(summary.clone());
        self.emit(SchedulerEvent::PassFinished {
            summary: summary.clone(),
        });
        info!(
            ?trigger,
            dispatched = summary.dispatched,
            success = summary.success,
            no_change = summary.no_change,
            failure = summary.failure,
            stopped_early = summary.stopped_early,
            "pass finished"
        );

        if !summary.stopped_early && summary.dispatched > 0 {
            let notifier = Arc::clone(&self.notifier);
            let sent = summary.clone();
            self.tasks.spawn(async move {
                if let Err(e) = notifier.notify_summary(&sent).await {
                    warn!(error = %e, "summary notification not delivered");
                }
            });
        }

        self.pass_active.store(false, Ordering::SeqCst);
        summary
    }

    /// Begin, execute, finish and log one profile.
    async fn dispatch(&self, id: ProfileId) -> Dispatch {
        let profile = match self.lifecycle.begin(id) {
            Ok(p) => p,
            Err(RefreshError::ProfileInactive(_)) => {
                debug!(profile_id = id, "deactivated since pass start, skipping");
                return Dispatch::Skipped;
            }
            Err(e) => {
                warn!(profile_id = id, error = %e, "dispatch refused");
                return Dispatch::Skipped;
            }
        };

        *lock(&self.current) = Some(CurrentRun {
            profile_id: id,
            username: profile.username.clone(),
            started_at: self.clock.now(),
        });
        self.emit(SchedulerEvent::ProfileStatus {
            profile_id: id,
            username: profile.username.clone(),
            status: ProfileStatus::Running,
        });
        info!(profile_id = id, username = %profile.username, "run started");

        let report = self.executor.run(&profile).await;

        if let Err(e) = self.lifecycle.finish(&report).await {
            error!(profile_id = id, error = %e, "could not record terminal status, retrying before the next pass");
            lock(&self.stranded).insert(id, report.clone());
        }
        self.emit(SchedulerEvent::ProfileStatus {
            profile_id: id,
            username: profile.username.clone(),
            status: report.status,
        });

        let outcome = match self.outcomes.record(&profile, &report) {
            Ok(entry) => entry.outcome,
            Err(e) => {
                error!(profile_id = id, error = %e, "could not append update log");
                outcome_for(report.status)
            }
        };
        self.emit(SchedulerEvent::RunLogged {
            profile_id: id,
            outcome,
            detail: report.detail.clone(),
        });

        *lock(&self.current) = None;
        Dispatch::Ran(outcome)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::CollaboratorError;
    use crate::ports::Secret;
    use crate::profile::{FieldMap, Profile};
    use crate::testing::{fields, Harness, MemoryStore};
    use std::sync::atomic::AtomicUsize;

    fn wait_secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    async fn wait_until<F: Fn() -> bool>(cond: F) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    fn seed(h: &Harness, names: &[&str]) -> Vec<ProfileId> {
        names
            .iter()
            .map(|name| {
                let id = h.store.add_profile(name, true);
                h.driver.set_live(id, "bio", "old");
                id
            })
            .collect()
    }

    #[tokio::test]
    async fn pass_is_sequential_with_delay_between_profiles_only() {
        let h = Harness::new();
        h.generator.respond(fields(&[("bio", "new")]));
        let ids = seed(&h, &["a", "b", "c"]);

        let summary = h.scheduler().run_pass(PassTrigger::Scheduled).await;
        assert_eq!(summary.dispatched, 3);
        assert_eq!(summary.success, 3);
        assert!(!summary.stopped_early);
        assert_eq!(h.clock.sleeps(), vec![wait_secs(15), wait_secs(15)]);

        let logged: Vec<_> = h.store.logs().iter().map(|l| l.profile_id).collect();
        assert_eq!(logged, ids);
    }

    #[tokio::test]
    async fn inactive_profiles_are_never_dispatched() {
        let h = Harness::new();
        h.generator.respond(fields(&[("bio", "new")]));
        let active = h.store.add_profile("on", true);
        let inactive = h.store.add_profile("off", false);

        let scheduler = h.scheduler();
        scheduler.run_pass(PassTrigger::Scheduled).await;
        scheduler.run_pass(PassTrigger::Manual).await;

        assert!(h.store.status_history(inactive).is_empty());
        assert!(h.store.logs().iter().all(|l| l.profile_id == active));
        assert_eq!(h.store.profile(inactive).status, ProfileStatus::Idle);
    }

    #[tokio::test]
    async fn profile_deactivated_mid_pass_is_skipped() {
        let h = Harness::new();
        h.generator.respond(fields(&[("bio", "new")]));
        let ids = seed(&h, &["a", "b"]);
        h.driver.on_apply(ids[0], {
            let store = Arc::clone(&h.store);
            let target = ids[1];
            move || store.set_active(target, false)
        });

        let summary = h.scheduler().run_pass(PassTrigger::Scheduled).await;
        assert_eq!(summary.dispatched, 1);
        assert_eq!(summary.skipped, 1);
        assert!(h.store.status_history(ids[1]).is_empty());
        assert!(h.clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn skipped_profile_costs_no_extra_delay() {
        let h = Harness::new();
        h.generator.respond(fields(&[("bio", "new")]));
        let ids = seed(&h, &["a", "b", "c"]);
        h.driver.on_apply(ids[0], {
            let store = Arc::clone(&h.store);
            let target = ids[1];
            move || store.set_active(target, false)
        });

        let summary = h.scheduler().run_pass(PassTrigger::Scheduled).await;
        assert_eq!(summary.dispatched, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(h.clock.sleeps(), vec![wait_secs(15)]);
        let logged: Vec<_> = h.store.logs().iter().map(|l| l.profile_id).collect();
        assert_eq!(logged, vec![ids[0], ids[2]]);
    }

    #[tokio::test]
    async fn each_run_sets_one_terminal_status_and_one_log() {
        let h = Harness::new();
        h.generator.respond(fields(&[("bio", "new")]));
        let ids = seed(&h, &["a"]);
        h.driver
            .script_apply("bio", Err(CollaboratorError::Navigation("timeout".into())));
        h.driver
            .script_apply("bio", Err(CollaboratorError::Navigation("timeout".into())));

        h.scheduler().run_pass(PassTrigger::Manual).await;

        assert_eq!(
            h.store.status_history(ids[0]),
            vec![ProfileStatus::Running, ProfileStatus::Completed]
        );
        assert_eq!(h.store.logs().len(), 1);
        assert_eq!(h.store.logs()[0].outcome, Outcome::Success);
    }

    #[tokio::test]
    async fn scheduled_pass_skips_profiles_not_yet_due() {
        let h = Harness::new();
        h.generator.respond(fields(&[("bio", "new")]));
        seed(&h, &["a"]);
        let scheduler = h.scheduler();

        let first = scheduler.run_pass(PassTrigger::Scheduled).await;
        assert_eq!(first.dispatched, 1);
        let second = scheduler.run_pass(PassTrigger::Scheduled).await;
        assert_eq!(second.dispatched, 0);
        assert_eq!(second.skipped, 1);
        let manual = scheduler.run_pass(PassTrigger::Manual).await;
        assert_eq!(manual.dispatched, 1);
    }

    #[tokio::test]
    async fn errored_profile_is_retried_after_cooldown() {
        let h = Harness::new();
        h.generator
            .fail(CollaboratorError::Generation("rate limited".into()));
        seed(&h, &["a"]);
        let scheduler = h.scheduler();

        assert_eq!(scheduler.run_pass(PassTrigger::Scheduled).await.failure, 1);
        h.clock.advance(chrono::Duration::minutes(61));
        h.generator.respond(fields(&[("bio", "new")]));
        assert_eq!(scheduler.run_pass(PassTrigger::Scheduled).await.success, 1);
    }

    #[tokio::test]
    async fn completed_pass_sends_summary_notification() {
        let h = Harness::new();
        h.generator.respond(fields(&[("bio", "new")]));
        seed(&h, &["a", "b"]);

        h.scheduler().run_pass(PassTrigger::Manual).await;
        h.notifier.wait_for_summaries(1, Duration::from_secs(2)).await;
        let summaries = h.notifier.summaries();
        assert_eq!(summaries[0].dispatched, 2);
    }

    #[tokio::test]
    async fn empty_pass_sends_no_summary() {
        let h = Harness::new();
        h.scheduler().run_pass(PassTrigger::Scheduled).await;
        tokio::task::yield_now().await;
        assert!(h.notifier.summaries().is_empty());
    }

    #[tokio::test]
    async fn stop_during_third_profile_halts_before_the_fourth() {
        let h = Harness::new();
        h.generator.respond(fields(&[("bio", "new")]));
        let ids = seed(&h, &["p1", "p2", "p3", "p4", "p5"]);
        let gate = h.driver.gate_apply(ids[2]);

        let scheduler = h.scheduler();
        assert!(scheduler.start());
        gate.entered().await;

        assert_eq!(
            scheduler.status().unwrap().current_profile.map(|c| c.profile_id),
            Some(ids[2])
        );
        assert!(scheduler.stop());
        gate.release();

        wait_until(|| !scheduler.is_running()).await;

        let logged: Vec<_> = h.store.logs().iter().map(|l| l.profile_id).collect();
        assert_eq!(logged, ids[..3].to_vec());
        assert_eq!(h.store.profile(ids[2]).status, ProfileStatus::Completed);
        assert!(h.store.status_history(ids[3]).is_empty());
        let last = scheduler.status().unwrap().last_pass.unwrap();
        assert!(last.stopped_early);
        assert_eq!(last.dispatched, 3);
    }

    #[tokio::test]
    async fn stop_then_restart_still_spaces_profiles() {
        let h = Harness::new();
        h.generator.respond(fields(&[("bio", "new")]));
        let first = seed(&h, &["a"])[0];
        let gate = h.driver.gate_apply(first);
        let scheduler = h.scheduler();

        // Stop lands while the only profile is mid-run, so nothing is
        // waiting on the wake-up when it is sent.
        assert!(scheduler.start());
        gate.entered().await;
        assert!(scheduler.stop());
        gate.release();
        wait_until(|| !scheduler.is_running()).await;

        h.clock.hold_sleeps_of(wait_secs(15));
        seed(&h, &["b", "c"]);
        assert!(scheduler.start());
        wait_until(|| h.store.logs().len() == 2).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.store.logs().len(), 2, "c must wait out the inter-profile delay");

        assert!(scheduler.stop());
        wait_until(|| !scheduler.is_running()).await;
        assert_eq!(h.store.logs().len(), 2);
        assert!(scheduler.status().unwrap().last_pass.unwrap().stopped_early);
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_reports_state() {
        let h = Harness::new();
        let scheduler = h.scheduler();
        assert!(!scheduler.stop());
        assert!(scheduler.start());
        assert!(!scheduler.start());
        assert!(scheduler.status().unwrap().running);
        assert!(scheduler.stop());
        wait_until(|| !scheduler.is_running()).await;
        let status = scheduler.status().unwrap();
        assert!(!status.stop_requested);
        assert_eq!(status.headline(), "Automation is not running");
    }

    #[tokio::test]
    async fn run_now_without_loop_runs_one_manual_pass() {
        let h = Harness::new();
        h.generator.respond(fields(&[("bio", "new")]));
        seed(&h, &["a"]);
        let scheduler = h.scheduler();

        assert_eq!(scheduler.run_now(), RunNowResult::Triggered);
        wait_until(|| h.store.logs().len() == 1).await;
        wait_until(|| !scheduler.status().unwrap().pass_in_progress).await;
        assert!(!scheduler.is_running());
        assert_eq!(
            scheduler.status().unwrap().last_pass.unwrap().trigger,
            PassTrigger::Manual
        );
    }

    #[tokio::test]
    async fn run_now_during_a_pass_is_already_in_progress() {
        let h = Harness::new();
        h.generator.respond(fields(&[("bio", "new")]));
        let ids = seed(&h, &["a"]);
        let gate = h.driver.gate_apply(ids[0]);
        let scheduler = h.scheduler();

        assert_eq!(scheduler.run_now(), RunNowResult::Triggered);
        gate.entered().await;
        assert_eq!(scheduler.run_now(), RunNowResult::AlreadyInProgress);
        assert!(scheduler.status().unwrap().pass_in_progress);
        gate.release();
        wait_until(|| !scheduler.status().unwrap().pass_in_progress).await;
        assert_eq!(h.store.logs().len(), 1);
    }

    #[tokio::test]
    async fn run_now_wakes_a_running_loop() {
        let h = Harness::new();
        h.generator.respond(fields(&[("bio", "new")]));
        seed(&h, &["a"]);
        let scheduler = h.scheduler();
        scheduler.start();
        wait_until(|| h.store.logs().len() == 1).await;
        wait_until(|| !scheduler.status().unwrap().pass_in_progress).await;

        // Not due again for a week, so only a manual pass reaches it. Empty
        // scheduled passes keep ticking, so retry until one is not active.
        let mut triggered = false;
        for _ in 0..200 {
            if scheduler.run_now() == RunNowResult::Triggered {
                triggered = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(triggered);
        wait_until(|| h.store.logs().len() == 2).await;
        scheduler.stop();
        wait_until(|| !scheduler.is_running()).await;
    }

    #[tokio::test]
    async fn runs_never_overlap_for_one_profile() {
        let h = Harness::new();
        h.generator.respond(fields(&[("bio", "new")]));
        let ids = seed(&h, &["a", "b"]);
        let scheduler = h.scheduler();
        for _ in 0..3 {
            scheduler.run_pass(PassTrigger::Manual).await;
        }
        for id in ids {
            let history = h.store.status_history(id);
            assert_eq!(history.len(), 6);
            for pair in history.chunks(2) {
                assert_eq!(pair[0], ProfileStatus::Running);
                assert!(pair[1].is_terminal());
            }
        }
    }

    #[tokio::test]
    async fn status_counts_every_status() {
        let h = Harness::new();
        h.generator.respond(fields(&[("bio", "new")]));
        seed(&h, &["a"]);
        h.store.add_profile("off", false);
        let scheduler = h.scheduler();
        scheduler.run_pass(PassTrigger::Manual).await;

        let status = scheduler.status().unwrap();
        assert_eq!(status.active_count, 1);
        assert_eq!(status.status_counts["Completed"], 1);
        assert_eq!(status.status_counts["Idle"], 1);
        assert_eq!(status.status_counts["Running"], 0);
        assert!(status.current_profile.is_none());
    }

    #[tokio::test]
    async fn events_follow_the_run() {
        let h = Harness::new();
        h.generator.respond(fields(&[("bio", "new")]));
        seed(&h, &["a"]);
        let scheduler = h.scheduler();
        let mut rx = scheduler.subscribe();
        scheduler.run_pass(PassTrigger::Manual).await;

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(serde_json::to_value(&event).unwrap()["type"].as_str().unwrap().to_string());
        }
        assert_eq!(
            kinds,
            vec!["pass_started", "profile_status", "profile_status", "run_logged", "pass_finished"]
        );
    }

    /// Fails `record_finish` a set number of times, then delegates.
    struct FlakyFinish {
        inner: Arc<MemoryStore>,
        failures: AtomicUsize,
    }

    impl FlakyFinish {
        fn new(inner: Arc<MemoryStore>, failures: usize) -> Arc<Self> {
            Arc::new(Self {
                inner,
                failures: AtomicUsize::new(failures),
            })
        }
    }

    impl ProfileStore for FlakyFinish {
        fn list_active(&self) -> Result<Vec<Profile>> {
            self.inner.list_active()
        }

        fn list(&self) -> Result<Vec<Profile>> {
            self.inner.list()
        }

        fn get(&self, id: ProfileId) -> Result<Profile> {
            self.inner.get(id)
        }

        fn set_status(&self, id: ProfileId, status: ProfileStatus) -> Result<()> {
            self.inner.set_status(id, status)
        }

        fn record_finish(
            &self,
            id: ProfileId,
            status: ProfileStatus,
            finished_at: DateTime<Utc>,
            next_run_at: DateTime<Utc>,
        ) -> Result<()> {
            let failing = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(RefreshError::Store("disk full".into()));
            }
            self.inner.record_finish(id, status, finished_at, next_run_at)
        }

        fn merge_content(&self, id: ProfileId, applied: &FieldMap) -> Result<()> {
            self.inner.merge_content(id, applied)
        }

        fn decrypt_credential(&self, id: ProfileId) -> std::result::Result<Secret, CollaboratorError> {
            self.inner.decrypt_credential(id)
        }
    }

    fn outcomes(h: &Harness) -> Vec<Outcome> {
        h.store.logs().iter().map(|l| l.outcome).collect()
    }

    #[tokio::test]
    async fn failed_terminal_write_is_retried_within_the_run() {
        let h = Harness::new();
        h.generator.respond(fields(&[("bio", "new")]));
        let id = seed(&h, &["a"])[0];
        let scheduler = h.scheduler_with(FlakyFinish::new(Arc::clone(&h.store), 1));

        let first = scheduler.run_pass(PassTrigger::Manual).await;
        assert_eq!(first.success, 1);
        assert_eq!(h.store.profile(id).status, ProfileStatus::Completed);

        let second = scheduler.run_pass(PassTrigger::Manual).await;
        assert_eq!(second.dispatched, 1);
        assert_eq!(scheduler.recover_interrupted(&*h.store).unwrap(), 0);
        assert_eq!(outcomes(&h), vec![Outcome::Success, Outcome::Success]);
    }

    #[tokio::test]
    async fn stranded_run_is_closed_before_the_next_pass() {
        let h = Harness::new();
        h.generator.respond(fields(&[("bio", "new")]));
        let id = seed(&h, &["a"])[0];
        let scheduler = h.scheduler_with(FlakyFinish::new(Arc::clone(&h.store), 3));

        scheduler.run_pass(PassTrigger::Manual).await;
        assert_eq!(h.store.profile(id).status, ProfileStatus::Running);
        assert_eq!(outcomes(&h), vec![Outcome::Success]);

        let second = scheduler.run_pass(PassTrigger::Manual).await;
        assert_eq!(second.dispatched, 1);
        assert_eq!(second.skipped, 0);
        assert_eq!(h.store.profile(id).status, ProfileStatus::Completed);
        assert_eq!(scheduler.recover_interrupted(&*h.store).unwrap(), 0);
        assert_eq!(outcomes(&h), vec![Outcome::Success, Outcome::Success]);
        assert_eq!(
            h.store.status_history(id),
            vec![
                ProfileStatus::Running,
                ProfileStatus::Completed,
                ProfileStatus::Running,
                ProfileStatus::Completed
            ]
        );
    }

    #[tokio::test]
    async fn drain_waits_for_failure_and_summary_notifications() {
        let h = Harness::new();
        h.generator
            .fail(CollaboratorError::Generation("rate limited".into()));
        let id = seed(&h, &["a"])[0];
        let scheduler = h.scheduler();

        let summary = scheduler.run_pass(PassTrigger::Manual).await;
        assert_eq!(summary.failure, 1);
        assert!(scheduler.drain(Duration::from_secs(2)).await);

        let failures = h.notifier.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].profile_id, id);
        assert_eq!(h.notifier.summaries().len(), 1);
    }

    #[tokio::test]
    async fn drain_waits_for_the_loop_to_finish_its_run() {
        let h = Harness::new();
        h.generator.respond(fields(&[("bio", "new")]));
        let id = seed(&h, &["a"])[0];
        let gate = h.driver.gate_apply(id);
        let scheduler = h.scheduler();

        scheduler.start();
        gate.entered().await;
        scheduler.stop();
        assert!(!scheduler.drain(Duration::from_millis(20)).await);
        gate.release();
        assert!(scheduler.drain(Duration::from_secs(2)).await);

        assert!(!scheduler.is_running());
        assert_eq!(h.store.profile(id).status, ProfileStatus::Completed);
        assert_eq!(outcomes(&h), vec![Outcome::Success]);
    }
}
