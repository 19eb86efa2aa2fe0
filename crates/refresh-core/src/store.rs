//! Persistent storage for profiles and update logs using redb.
//!
//! # Table design
//!
//! ```text
//! profiles : u64 id                                  -> JSON Profile
//! logs     : [ executed_at_ms BE (8) | log id BE (8) ] -> JSON UpdateLogEntry
//! meta     : &str counter name                        -> u64
//! ```
//!
//! The log key puts the timestamp in the high bytes, so byte order is
//! chronological order and a reverse scan yields newest-first without
//! sorting. Every profile mutation is a read-modify-write inside one write
//! transaction; redb serializes writers, so a concurrent reader never sees
//! a half-applied update.

use std::path::Path;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition, WriteTransaction};
use tracing::debug;

use crate::classify::CollaboratorError;
use crate::error::{RefreshError, Result};
use crate::ports::{LogStore, ProfileStore, Secret};
use crate::profile::{
    validate_username, FieldMap, Profile, ProfileId, ProfilePatch, ProfileStatus,
};
use crate::update_log::{LogSummary, Outcome, UpdateLogEntry};
use crate::vault::CredentialVault;

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

const PROFILES: TableDefinition<u64, &[u8]> = TableDefinition::new("profiles");
const LOGS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("logs");
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

const NEXT_PROFILE_ID: &str = "next_profile_id";
const NEXT_LOG_ID: &str = "next_log_id";

fn db_err(e: impl std::fmt::Display) -> RefreshError {
    RefreshError::Store(e.to_string())
}

fn log_key(ts: DateTime<Utc>, id: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    let ms = ts.timestamp_millis().max(0) as u64;
    key[..8].copy_from_slice(&ms.to_be_bytes());
    key[8..].copy_from_slice(&id.to_be_bytes());
    key
}

fn next_id(wt: &WriteTransaction, counter: &str) -> Result<u64> {
    let mut meta = wt.open_table(META).map_err(db_err)?;
    let next = meta.get(counter).map_err(db_err)?.map(|v| v.value()).unwrap_or(0) + 1;
    meta.insert(counter, next).map_err(db_err)?;
    Ok(next)
}

// ---------------------------------------------------------------------------
// LogQuery
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct LogQuery {
    pub profile_id: Option<ProfileId>,
    pub outcome: Option<Outcome>,
    /// Only entries executed at or after this instant.
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

// ---------------------------------------------------------------------------
// RedbStore
// ---------------------------------------------------------------------------

pub struct RedbStore {
    db: Database,
    vault: Box<dyn CredentialVault>,
}

impl RedbStore {
    /// Open or create the database at `path`, creating all tables.
    pub fn open(path: &Path, vault: Box<dyn CredentialVault>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            crate::io::ensure_dir(parent)?;
        }
        let db = Database::create(path).map_err(db_err)?;
        let wt = db.begin_write().map_err(db_err)?;
        wt.open_table(PROFILES).map_err(db_err)?;
        wt.open_table(LOGS).map_err(db_err)?;
        wt.open_table(META).map_err(db_err)?;
        wt.commit().map_err(db_err)?;
        Ok(Self { db, vault })
    }

    /// Run `f` against profile `id` and persist the result atomically.
    fn modify<F>(&self, id: ProfileId, f: F) -> Result<Profile>
    where
        F: FnOnce(&mut Profile) -> Result<()>,
    {
        let wt = self.db.begin_write().map_err(db_err)?;
        let result = (|| -> Result<Profile> {
            let mut table = wt.open_table(PROFILES).map_err(db_err)?;
            let mut profile: Profile = match table.get(id).map_err(db_err)? {
                Some(v) => serde_json::from_slice(v.value())?,
                None => return Err(RefreshError::ProfileNotFound(id)),
            };
            f(&mut profile)?;
            let bytes = serde_json::to_vec(&profile)?;
            table.insert(id, bytes.as_slice()).map_err(db_err)?;
            Ok(profile)
        })();
        match result {
            Ok(profile) => {
                wt.commit().map_err(db_err)?;
                Ok(profile)
            }
            Err(e) => {
                wt.abort().map_err(db_err)?;
                Err(e)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Profile admin
    // -----------------------------------------------------------------------

    /// Seal `password` and insert a new `Idle` profile.
    pub fn create_profile(
        &self,
        username: &str,
        password: &str,
        notes: Option<String>,
    ) -> Result<Profile> {
        validate_username(username)?;
        if self.find_by_username(username)?.is_some() {
            return Err(RefreshError::ProfileExists(username.to_string()));
        }
        let sealed = self.vault.seal(password)?;
        let mut profile = Profile::new(username, sealed);
        profile.notes = notes.filter(|n| !n.trim().is_empty());

        let wt = self.db.begin_write().map_err(db_err)?;
        profile.id = next_id(&wt, NEXT_PROFILE_ID)?;
        {
            let mut table = wt.open_table(PROFILES).map_err(db_err)?;
            let bytes = serde_json::to_vec(&profile)?;
            table.insert(profile.id, bytes.as_slice()).map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        debug!(profile_id = profile.id, username, "profile created");
        Ok(profile)
    }

    pub fn update_profile(&self, id: ProfileId, patch: ProfilePatch) -> Result<Profile> {
        let sealed = match patch.password.as_deref() {
            Some(password) => Some(self.vault.seal(password)?),
            None => None,
        };
        self.modify(id, |p| {
            if let Some(active) = patch.is_active {
                p.is_active = active;
            }
            if let Some(notes) = patch.notes {
                p.notes = Some(notes).filter(|n| !n.trim().is_empty());
            }
            if let Some(sealed) = sealed {
                p.sealed_credential = sealed;
            }
            p.updated_at = Utc::now();
            Ok(())
        })
    }

    /// Delete a profile. Its log history stays.
    pub fn delete_profile(&self, id: ProfileId) -> Result<()> {
        let wt = self.db.begin_write().map_err(db_err)?;
        let result = (|| -> Result<()> {
            let mut table = wt.open_table(PROFILES).map_err(db_err)?;
            let status = match table.get(id).map_err(db_err)? {
                Some(v) => serde_json::from_slice::<Profile>(v.value())?.status,
                None => return Err(RefreshError::ProfileNotFound(id)),
            };
            if status == ProfileStatus::Running {
                return Err(RefreshError::ProfileBusy(id));
            }
            table.remove(id).map_err(db_err)?;
            Ok(())
        })();
        match result {
            Ok(()) => wt.commit().map_err(db_err),
            Err(e) => {
                wt.abort().map_err(db_err)?;
                Err(e)
            }
        }
    }

    pub fn find_by_username(&self, username: &str) -> Result<Option<Profile>> {
        Ok(self.list()?.into_iter().find(|p| p.username == username))
    }

    /// Resolve a CLI/API reference: a numeric id or a username.
    pub fn resolve(&self, reference: &str) -> Result<Profile> {
        if let Ok(id) = reference.parse::<ProfileId>() {
            return self.get(id);
        }
        self.find_by_username(reference)?
            .ok_or_else(|| RefreshError::UnknownProfile(reference.to_string()))
    }

    // -----------------------------------------------------------------------
    // Log queries
    // -----------------------------------------------------------------------

    /// Newest-first scan with optional profile/outcome filters.
    pub fn query_logs(&self, query: &LogQuery) -> Result<Vec<UpdateLogEntry>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(LOGS).map_err(db_err)?;
        let limit = query.limit.unwrap_or(usize::MAX);

        let mut result = Vec::new();
        for entry in table.iter().map_err(db_err)?.rev() {
            if result.len() >= limit {
                break;
            }
            let (_, v) = entry.map_err(db_err)?;
            let log: UpdateLogEntry = serde_json::from_slice(v.value())?;
            if query.since.is_some_and(|since| log.executed_at < since) {
                break;
            }
            if query.profile_id.is_some_and(|id| id != log.profile_id) {
                continue;
            }
            if query.outcome.is_some_and(|o| o != log.outcome) {
                continue;
            }
            result.push(log);
        }
        Ok(result)
    }

    pub fn summary(&self, since: Option<DateTime<Utc>>, recent_limit: usize) -> Result<LogSummary> {
        let all = self.query_logs(&LogQuery {
            since,
            ..Default::default()
        })?;
        Ok(LogSummary::from_entries(&all, recent_limit))
    }
}

// ---------------------------------------------------------------------------
// ProfileStore
// ---------------------------------------------------------------------------

impl ProfileStore for RedbStore {
    fn list_active(&self) -> Result<Vec<Profile>> {
        Ok(self.list()?.into_iter().filter(|p| p.is_active).collect())
    }

    /// All profiles in id order.
    fn list(&self) -> Result<Vec<Profile>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(PROFILES).map_err(db_err)?;
        let mut result = Vec::new();
        for entry in table.iter().map_err(db_err)? {
            let (_, v) = entry.map_err(db_err)?;
            result.push(serde_json::from_slice(v.value())?);
        }
        Ok(result)
    }

    fn get(&self, id: ProfileId) -> Result<Profile> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(PROFILES).map_err(db_err)?;
        let guard = table
            .get(id)
            .map_err(db_err)?
            .ok_or(RefreshError::ProfileNotFound(id))?;
        Ok(serde_json::from_slice(guard.value())?)
    }

    fn set_status(&self, id: ProfileId, status: ProfileStatus) -> Result<()> {
        self.modify(id, |p| {
            p.status = p.status.transition(status)?;
            p.updated_at = Utc::now();
            Ok(())
        })?;
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
            if matches!(status, ProfileStatus::Completed | ProfileStatus::NoChange) {
                p.last_success_at = Some(finished_at);
            }
            p.next_run_at = Some(next_run_at);
            p.updated_at = finished_at;
            Ok(())
        })?;
        Ok(())
    }

    fn merge_content(&self, id: ProfileId, applied: &FieldMap) -> Result<()> {
        if applied.is_empty() {
            return Ok(());
        }
        self.modify(id, |p| {
            p.content
                .extend(applied.iter().map(|(k, v)| (k.clone(), v.clone())));
            p.updated_at = Utc::now();
            Ok(())
        })?;
        Ok(())
    }

    fn decrypt_credential(&self, id: ProfileId) -> std::result::Result<Secret, CollaboratorError> {
        let profile = self
            .get(id)
            .map_err(|e| CollaboratorError::Credential(e.to_string()))?;
        self.vault
            .open(&profile.sealed_credential)
            .map_err(|e| CollaboratorError::Credential(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// LogStore
// ---------------------------------------------------------------------------

impl LogStore for RedbStore {
    fn append(&self, mut entry: UpdateLogEntry) -> Result<UpdateLogEntry> {
        let wt = self.db.begin_write().map_err(db_err)?;
        entry.id = next_id(&wt, NEXT_LOG_ID)?;
        {
            let mut table = wt.open_table(LOGS).map_err(db_err)?;
            let key = log_key(entry.executed_at, entry.id);
            let bytes = serde_json::to_vec(&entry)?;
            table
                .insert(key.as_slice(), bytes.as_slice())
                .map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(entry)
    }

    fn recent(&self, limit: usize) -> Result<Vec<UpdateLogEntry>> {
        self.query_logs(&LogQuery {
            limit: Some(limit),
            ..Default::default()
        })
    }

    fn for_profile(&self, id: ProfileId, limit: usize) -> Result<Vec<UpdateLogEntry>> {
        self.query_logs(&LogQuery {
            profile_id: Some(id),
            limit: Some(limit),
            ..Default::default()
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
