//! Maintenance orchestrator for a fleet of remote profiles.
//!
//! The crate decides *when* each profile is refreshed, *how* each class of
//! collaborator failure is handled, *which* status each profile is in, and
//! *what* is durably recorded. Content generation, browser driving,
//! credential decryption and notification delivery sit behind the traits in
//! [`ports`]; concrete adapters live in [`generator`], [`browser`],
//! [`vault`] and [`notify`].
//!
//! ```text
//! Scheduler ──► Lifecycle::begin ──► RunExecutor ──► Lifecycle::finish ──► OutcomeLogger
//!                                    │  classify
//!                                    └► retry
//! ```

pub mod browser;
pub mod classify;
pub mod clock;
pub mod config;
pub mod error;
pub mod executor;
pub mod generator;
pub mod io;
pub mod lifecycle;
pub mod notify;
pub mod outcome;
pub mod paths;
pub mod ports;
pub mod profile;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod update_log;
pub mod vault;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{RefreshError, Result};
