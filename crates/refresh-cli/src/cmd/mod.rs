pub mod init;
pub mod logs;
pub mod profile;
pub mod run_once;
pub mod serve;
pub mod status;

use anyhow::Context;
use refresh_core::config::Config;
use refresh_core::store::RedbStore;
use refresh_core::vault::AgeVault;
use refresh_core::paths;
use std::path::Path;

/// Open the profile store under `root` with the configured vault.
pub(crate) fn open_store(root: &Path) -> anyhow::Result<RedbStore> {
    let config = Config::load(root)?;
    let vault = AgeVault::from_config(root, &config);
    RedbStore::open(&paths::db_path(root), Box::new(vault))
        .context("failed to open the profile database (is `refresh serve` running?)")
}
