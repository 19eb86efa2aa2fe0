use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use refresh_core::browser::CommandBrowserDriver;
use refresh_core::clock::SystemClock;
use refresh_core::config::Config;
use refresh_core::generator::HttpContentGenerator;
use refresh_core::ports::LogStore;
use refresh_core::scheduler::{Collaborators, PassSummary, PassTrigger, Scheduler};
use refresh_core::store::RedbStore;
use refresh_core::vault::AgeVault;
use refresh_core::{notify, paths};

/// How long a one-shot pass waits for its notifications before returning.
const NOTIFY_GRACE: Duration = Duration::from_secs(30);

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub root: PathBuf,
    pub config: Arc<Config>,
    pub store: Arc<RedbStore>,
    pub scheduler: Scheduler,
}

impl AppState {
    /// Open the store under `root` and wire the configured collaborators.
    pub fn open(root: PathBuf) -> anyhow::Result<Self> {
        let config = Config::load(&root)?;
        for w in config.validate() {
            tracing::warn!("config: {}", w.message);
        }

        let vault = AgeVault::from_config(&root, &config);
        let store = Arc::new(RedbStore::open(&paths::db_path(&root), Box::new(vault))?);
        let scheduler = Scheduler::new(
            config.scheduler.clone(),
            Collaborators {
                profiles: store.clone(),
                logs: store.clone(),
                generator: Arc::new(HttpContentGenerator::from_config(&config.generator)?),
                driver: Arc::new(CommandBrowserDriver::from_config(&config.browser)),
                notifier: notify::from_config(&config.notifier)?,
                clock: Arc::new(SystemClock),
            },
        );
        Ok(Self::from_parts(root, config, store, scheduler))
    }

    pub fn from_parts(
        root: PathBuf,
        config: Config,
        store: Arc<RedbStore>,
        scheduler: Scheduler,
    ) -> Self {
        Self {
            root,
            config: Arc::new(config),
            store,
            scheduler,
        }
    }

    /// Close out runs a crashed process left `Running`.
    pub fn recover(&self) -> anyhow::Result<usize> {
        let logs: &dyn LogStore = &*self.store;
        Ok(self.scheduler.recover_interrupted(logs)?)
    }

    /// One foreground manual pass: recover, run every active profile, then
    /// wait for failure and summary notifications to be delivered.
    pub async fn run_once(&self) -> anyhow::Result<PassSummary> {
        let recovered = self.recover()?;
        if recovered > 0 {
            tracing::warn!(recovered, "closed out interrupted runs from a previous process");
        }
        let summary = self.scheduler.run_pass(PassTrigger::Manual).await;
        if !self.scheduler.drain(NOTIFY_GRACE).await {
            tracing::warn!("some notifications were still pending at exit");
        }
        Ok(summary)
    }
}
