//! In-memory collaborators for unit tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio_util::task::TaskTracker;

use crate::classify::CollaboratorError;
use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::error::{RefreshError, Result};
use crate::executor::RunExecutor;
use crate::lifecycle::Lifecycle;
use crate::outcome::OutcomeLogger;
use crate::ports::{
    BrowserDriver, ContentGenerator, FailureNotice, LogStore, Notifier, ProfileContext,
    ProfileStore, Secret, Session,
};
use crate::profile::{FieldMap, Profile, ProfileId, ProfileStatus};
use crate::scheduler::{Collaborators, PassSummary, Scheduler};
use crate::update_log::UpdateLogEntry;
use crate::vault::CredentialVault;

pub(crate) fn fields(pairs: &[(&str, &str)]) -> FieldMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

async fn eventually<F: Fn() -> bool>(cond: F, timeout: Duration) {
    tokio::time::timeout(timeout, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// ---------------------------------------------------------------------------
// PlainVault
// ---------------------------------------------------------------------------

pub(crate) struct PlainVault;

impl CredentialVault for PlainVault {
    fn seal(&self, plaintext: &str) -> Result<String> {
        Ok(format!("sealed:{plaintext}"))
    }

    fn open(&self, sealed: &str) -> Result<Secret> {
        sealed
            .strip_prefix("sealed:")
            .map(Secret::new)
            .ok_or_else(|| RefreshError::OpenFailed("not sealed by PlainVault".into()))
    }
}

// ---------------------------------------------------------------------------
// RecordingClock
// ---------------------------------------------------------------------------

/// Virtual time. `sleep` records the request, jumps the clock forward and
/// yields for a millisecond of real time so loops cannot spin hot. A held
/// duration never elapses.
pub(crate) struct RecordingClock {
    now: Mutex<DateTime<Utc>>,
    sleeps: Mutex<Vec<Duration>>,
    held: Mutex<Option<Duration>>,
}

impl RecordingClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Utc::now()),
            sleeps: Mutex::new(Vec::new()),
            held: Mutex::new(None),
        }
    }

    /// Sleeps of exactly `duration` block forever from now on.
    pub fn hold_sleeps_of(&self, duration: Duration) {
        *self.held.lock().unwrap() = Some(duration);
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }

    pub fn advance(&self, by: chrono::Duration) {
        *self.now.lock().unwrap() += by;
    }
}

#[async_trait]
impl Clock for RecordingClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        let held = *self.held.lock().unwrap() == Some(duration);
        if held {
            std::future::pending::<()>().await;
        }
        self.advance(chrono::Duration::from_std(duration).unwrap());
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct MemoryStore {
    profiles: Mutex<BTreeMap<ProfileId, Profile>>,
    logs: Mutex<Vec<UpdateLogEntry>>,
    history: Mutex<Vec<(ProfileId, ProfileStatus)>>,
    decrypt_failures: Mutex<HashMap<ProfileId, String>>,
    decrypt_calls: AtomicUsize,
    next_id: AtomicU64,
}

impl MemoryStore {
    pub fn add_profile(&self, username: &str, active: bool) -> ProfileId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut profile = Profile::new(username, format!("sealed:pw-{username}"));
        profile.id = id;
        profile.is_active = active;
        self.profiles.lock().unwrap().insert(id, profile);
        id
    }

    pub fn profile(&self, id: ProfileId) -> Profile {
        self.profiles.lock().unwrap()[&id].clone()
    }

    pub fn set_active(&self, id: ProfileId, active: bool) {
        if let Some(p) = self.profiles.lock().unwrap().get_mut(&id) {
            p.is_active = active;
        }
    }

    pub fn fail_decrypt(&self, id: ProfileId, message: &str) {
        self.decrypt_failures
            .lock()
            .unwrap()
            .insert(id, message.to_string());
    }

    pub fn decrypt_calls(&self) -> usize {
        self.decrypt_calls.load(Ordering::SeqCst)
    }

    /// Every log entry in append order.
    pub fn logs(&self) -> Vec<UpdateLogEntry> {
        self.logs.lock().unwrap().clone()
    }

    /// Every status written for `id`, in order.
    pub fn status_history(&self, id: ProfileId) -> Vec<ProfileStatus> {
        self.history
            .lock()
            .unwrap()
            .iter()
            .filter(|(pid, _)| *pid == id)
            .map(|(_, s)| *s)
            .collect()
    }

    fn modify<F: FnOnce(&mut Profile) -> Result<()>>(&self, id: ProfileId, f: F) -> Result<()> {
        let mut profiles = self.profiles.lock().unwrap();
        let profile = profiles
            .get_mut(&id)
            .ok_or(RefreshError::ProfileNotFound(id))?;
        f(profile)
    }
}

impl ProfileStore for MemoryStore {
    fn list_active(&self) -> Result<Vec<Profile>> {
        Ok(self.list()?.into_iter().filter(|p| p.is_active).collect())
    }

    fn list(&self) -> Result<Vec<Profile>> {
        Ok(self.profiles.lock().unwrap().values().cloned().collect())
    }

    fn get(&self, id: ProfileId) -> Result<Profile> {
        self.profiles
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(RefreshError::ProfileNotFound(id))
    }

    fn set_status(&self, id: ProfileId, status: ProfileStatus) -> Result<()> {
        self.modify(id, |p| {
            p.status = p.status.transition(status)?;
            Ok(())
        })?;
        self.history.lock().unwrap().push((id, status));
        Ok(())
    }

    fn record_finish(
        &self,
        id: ProfileId,
        status: ProfileStatus,
        finished_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> Result<()> {
        self.modify(id, |p| {
            p.status = p.status.transition(status)?;
            p.last_run_at = Some(finished_at);
            p.next_run_at = Some(next_run_at);
            p.updated_at = finished_at;
            Ok(())
        })?;
        self.history.lock().unwrap().push((id, status));
        Ok(())
    }

    fn merge_content(&self, id: ProfileId, applied: &FieldMap) -> Result<()> {
        self.modify(id, |p| {
            p.content.extend(applied.clone());
            Ok(())
        })
    }

    fn decrypt_credential(&self, id: ProfileId) -> std::result::Result<Secret, CollaboratorError> {
        self.decrypt_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.decrypt_failures.lock().unwrap().get(&id) {
            return Err(CollaboratorError::from_category(
                crate::retry::ErrorCategory::CredentialRejected,
                "",
                message.clone(),
            ));
        }
        let profile = self
            .get(id)
            .map_err(|e| CollaboratorError::Credential(e.to_string()))?;
        PlainVault
            .open(&profile.sealed_credential)
            .map_err(|e| CollaboratorError::Credential(e.to_string()))
    }
}

impl LogStore for MemoryStore {
    fn append(&self, mut entry: UpdateLogEntry) -> Result<UpdateLogEntry> {
        let mut logs = self.logs.lock().unwrap();
        entry.id = logs.len() as u64 + 1;
        logs.push(entry.clone());
        Ok(entry)
    }

    fn recent(&self, limit: usize) -> Result<Vec<UpdateLogEntry>> {
        Ok(self.logs().into_iter().rev().take(limit).collect())
    }

    fn for_profile(&self, id: ProfileId, limit: usize) -> Result<Vec<UpdateLogEntry>> {
        Ok(self
            .logs()
            .into_iter()
            .rev()
            .filter(|l| l.profile_id == id)
            .take(limit)
            .collect())
    }
}

// ---------------------------------------------------------------------------
// ScriptedGenerator
// ---------------------------------------------------------------------------

pub(crate) struct ScriptedGenerator {
    response: Mutex<std::result::Result<FieldMap, CollaboratorError>>,
    calls: AtomicUsize,
}

impl ScriptedGenerator {
    fn new() -> Self {
        Self {
            response: Mutex::new(Ok(FieldMap::new())),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn respond(&self, content: FieldMap) {
        *self.response.lock().unwrap() = Ok(content);
    }

    pub fn fail(&self, err: CollaboratorError) {
        *self.response.lock().unwrap() = Err(err);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        _ctx: &ProfileContext,
    ) -> std::result::Result<FieldMap, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.response.lock().unwrap().clone()
    }
}

// ---------------------------------------------------------------------------
// ScriptedDriver
// ---------------------------------------------------------------------------

/// Pauses one apply call until the test releases it.
pub(crate) struct Gate {
    entered: Notify,
    release: Notify,
}

impl Gate {
    pub async fn entered(&self) {
        tokio::time::timeout(Duration::from_secs(5), self.entered.notified())
            .await
            .expect("gated apply never started");
    }

    pub fn release(&self) {
        self.release.notify_one();
    }
}

type Hook = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
pub(crate) struct ScriptedDriver {
    live: Mutex<HashMap<(ProfileId, String), String>>,
    read_errors: Mutex<HashMap<String, VecDeque<CollaboratorError>>>,
    apply_results: Mutex<HashMap<String, VecDeque<std::result::Result<(), CollaboratorError>>>>,
    hooks: Mutex<HashMap<ProfileId, Hook>>,
    gates: Mutex<HashMap<ProfileId, Arc<Gate>>>,
    read_calls: AtomicUsize,
    apply_calls: AtomicUsize,
}

impl ScriptedDriver {
    pub fn set_live(&self, id: ProfileId, field: &str, value: &str) {
        self.live
            .lock()
            .unwrap()
            .insert((id, field.to_string()), value.to_string());
    }

    pub fn live(&self, id: ProfileId, field: &str) -> Option<String> {
        self.live
            .lock()
            .unwrap()
            .get(&(id, field.to_string()))
            .cloned()
    }

    /// Queue the result of the next apply of `field` on any profile.
    pub fn script_apply(&self, field: &str, result: std::result::Result<(), CollaboratorError>) {
        self.apply_results
            .lock()
            .unwrap()
            .entry(field.to_string())
            .or_default()
            .push_back(result);
    }

    /// Queue a failure for the next read of `field` on any profile.
    pub fn script_read(&self, field: &str, result: std::result::Result<(), CollaboratorError>) {
        if let Err(err) = result {
            self.read_errors
                .lock()
                .unwrap()
                .entry(field.to_string())
                .or_default()
                .push_back(err);
        }
    }

    pub fn on_apply<F: Fn() + Send + Sync + 'static>(&self, id: ProfileId, hook: F) {
        self.hooks.lock().unwrap().insert(id, Box::new(hook));
    }

    /// The next apply on profile `id` blocks until the gate is released.
    pub fn gate_apply(&self, id: ProfileId) -> Arc<Gate> {
        let gate = Arc::new(Gate {
            entered: Notify::new(),
            release: Notify::new(),
        });
        self.gates.lock().unwrap().insert(id, Arc::clone(&gate));
        gate
    }

    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::SeqCst)
    }

    pub fn apply_calls(&self) -> usize {
        self.apply_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserDriver for ScriptedDriver {
    async fn read_current_field(
        &self,
        session: &Session,
        field: &str,
    ) -> std::result::Result<String, CollaboratorError> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self
            .read_errors
            .lock()
            .unwrap()
            .get_mut(field)
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }
        Ok(self.live(session.profile_id, field).unwrap_or_default())
    }

    async fn apply_field(
        &self,
        session: &Session,
        field: &str,
        value: &str,
    ) -> std::result::Result<(), CollaboratorError> {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gates.lock().unwrap().remove(&session.profile_id);
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        if let Some(hook) = self.hooks.lock().unwrap().get(&session.profile_id) {
            hook();
        }
        let scripted = self
            .apply_results
            .lock()
            .unwrap()
            .get_mut(field)
            .and_then(VecDeque::pop_front);
        if let Some(Err(err)) = scripted {
            return Err(err);
        }
        self.set_live(session.profile_id, field, value);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RecordingNotifier
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct RecordingNotifier {
    failures: Mutex<Vec<FailureNotice>>,
    summaries: Mutex<Vec<PassSummary>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn fail_deliveries(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn failures(&self) -> Vec<FailureNotice> {
        self.failures.lock().unwrap().clone()
    }

    pub fn summaries(&self) -> Vec<PassSummary> {
        self.summaries.lock().unwrap().clone()
    }

    pub async fn wait_for_failures(&self, n: usize, timeout: Duration) {
        eventually(|| self.failures.lock().unwrap().len() >= n, timeout).await;
    }

    pub async fn wait_for_summaries(&self, n: usize, timeout: Duration) {
        eventually(|| self.summaries.lock().unwrap().len() >= n, timeout).await;
    }

    fn outcome(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RefreshError::Notify("webhook returned 500".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_failure(&self, notice: &FailureNotice) -> Result<()> {
        self.failures.lock().unwrap().push(notice.clone());
        self.outcome()
    }

    async fn notify_summary(&self, summary: &PassSummary) -> Result<()> {
        self.summaries.lock().unwrap().push(summary.clone());
        self.outcome()
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub(crate) struct Harness {
    pub store: Arc<MemoryStore>,
    pub generator: Arc<ScriptedGenerator>,
    pub driver: Arc<ScriptedDriver>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<RecordingClock>,
    pub config: SchedulerConfig,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::default()),
            generator: Arc::new(ScriptedGenerator::new()),
            driver: Arc::new(ScriptedDriver::default()),
            notifier: Arc::new(RecordingNotifier::default()),
            clock: Arc::new(RecordingClock::new()),
            config: SchedulerConfig::default(),
        }
    }

    pub fn executor(&self) -> RunExecutor {
        RunExecutor::new(
            self.store.clone(),
            self.generator.clone(),
            self.driver.clone(),
            self.clock.clone(),
        )
    }

    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle::new(self.store.clone(), self.clock.clone(), &self.config)
    }

    pub fn outcome_logger(&self) -> OutcomeLogger {
        OutcomeLogger::new(self.store.clone(), self.notifier.clone(), TaskTracker::new())
    }

    pub fn scheduler(&self) -> Scheduler {
        self.scheduler_with(self.store.clone())
    }

    /// Scheduler whose profile store is `profiles`; logs still go to `self.store`.
    pub fn scheduler_with(&self, profiles: Arc<dyn ProfileStore>) -> Scheduler {
        Scheduler::new(
            self.config.clone(),
            Collaborators {
                profiles,
                logs: self.store.clone(),
                generator: self.generator.clone(),
                driver: self.driver.clone(),
                notifier: self.notifier.clone(),
                clock: self.clock.clone(),
            },
        )
    }
}
