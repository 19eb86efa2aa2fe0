//! Retry/backoff policy keyed by error category.
//!
//! | Category           | attempts | delays      |
//! |--------------------|----------|-------------|
//! | CredentialRejected | 1        |             |
//! | Navigation         | 3        | 60s, 120s   |
//! | StructureMismatch  | 3        | 30s, 60s    |
//! | GenerationFailed   | 1        |             |
//! | FieldSave          | 3        | 30s, 60s    |
//!
//! Delays are consumed left to right across attempts; the last one repeats.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    CredentialRejected,
    Navigation,
    StructureMismatch,
    GenerationFailed,
    FieldSave,
}

impl ErrorCategory {
    /// Stable name written into log detail text.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::CredentialRejected => "CredentialRejected",
            ErrorCategory::Navigation => "Navigation",
            ErrorCategory::StructureMismatch => "StructureMismatch",
            ErrorCategory::GenerationFailed => "GenerationFailed",
            ErrorCategory::FieldSave => "FieldSave",
        }
    }

    pub fn policy(self) -> RetryPolicy {
        match self {
            ErrorCategory::CredentialRejected | ErrorCategory::GenerationFailed => {
                RetryPolicy::fail_fast()
            }
            ErrorCategory::Navigation => RetryPolicy::new(3, &[60, 120]),
            ErrorCategory::StructureMismatch | ErrorCategory::FieldSave => {
                RetryPolicy::new(3, &[30, 60])
            }
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    delays_secs: &'static [u64],
}

impl RetryPolicy {
    const fn new(max_attempts: u32, delays_secs: &'static [u64]) -> Self {
        Self {
            max_attempts,
            delays_secs,
        }
    }

    const fn fail_fast() -> Self {
        Self::new(1, &[])
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    fn delay_after(&self, attempt: u32) -> Duration {
        let idx = (attempt.saturating_sub(1) as usize).min(self.delays_secs.len().saturating_sub(1));
        Duration::from_secs(self.delays_secs.get(idx).copied().unwrap_or(0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Decide what to do after attempt number `attempt` (1-based) failed with `category`.
pub fn decide(category: ErrorCategory, attempt: u32) -> RetryDecision {
    let policy = category.policy();
    if attempt < policy.max_attempts {
        RetryDecision::RetryAfter(policy.delay_after(attempt))
    } else {
        RetryDecision::GiveUp
    }
}
