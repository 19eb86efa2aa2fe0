//! Collaborator failure taxonomy and the heuristics that classify raw
//! failure text into it.
//!
//! Adapters that receive a typed failure (a driver reply with a known
//! `kind`, a generator HTTP error) build the matching [`CollaboratorError`]
//! directly. Adapters that only see free text (subprocess stderr, an
//! unrecognised `kind`) go through [`classify_message`].

use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

use crate::retry::ErrorCategory;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    #[error("credential rejected: {0}")]
    Credential(String),

    #[error("content generation failed: {0}")]
    Generation(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("page structure mismatch: {0}")]
    Structure(String),

    #[error("field '{field}' was not saved: {message}")]
    Save { field: String, message: String },
}

impl CollaboratorError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            CollaboratorError::Credential(_) => ErrorCategory::CredentialRejected,
            CollaboratorError::Generation(_) => ErrorCategory::GenerationFailed,
            CollaboratorError::Navigation(_) => ErrorCategory::Navigation,
            CollaboratorError::Structure(_) => ErrorCategory::StructureMismatch,
            CollaboratorError::Save { .. } => ErrorCategory::FieldSave,
        }
    }

    /// Build the error for `category`. `field` is only used for `FieldSave`.
    pub fn from_category(category: ErrorCategory, field: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        match category {
            ErrorCategory::CredentialRejected => {
                CollaboratorError::Credential(friendly_credential_reason(&message))
            }
            ErrorCategory::GenerationFailed => CollaboratorError::Generation(message),
            ErrorCategory::Navigation => CollaboratorError::Navigation(message),
            ErrorCategory::StructureMismatch => CollaboratorError::Structure(message),
            ErrorCategory::FieldSave => CollaboratorError::Save {
                field: field.to_string(),
                message,
            },
        }
    }

    /// Classify free text, falling back to `default` when no heuristic matches.
    pub fn from_message(message: &str, field: &str, default: ErrorCategory) -> Self {
        let category = classify_message(message).unwrap_or(default);
        Self::from_category(category, field, message)
    }

    /// Log detail form: `<Category>: <message>`.
    pub fn detail(&self) -> String {
        format!("{}: {}", self.category(), self)
    }
}

// ---------------------------------------------------------------------------
// Heuristics
// ---------------------------------------------------------------------------

struct Pattern {
    re: Regex,
    category: ErrorCategory,
    reason: Option<&'static str>,
}

fn patterns() -> &'static [Pattern] {
    static PATTERNS: OnceLock<Vec<Pattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let table: &[(&str, ErrorCategory, Option<&'static str>)] = &[
            (
                r"invalid credentials|wrong username|wrong password|incorrect password",
                ErrorCategory::CredentialRejected,
                Some("Invalid username or password"),
            ),
            (
                r"still on login page",
                ErrorCategory::CredentialRejected,
                Some("Could not access account (check credentials)"),
            ),
            (
                r"account (temporarily )?locked|suspended",
                ErrorCategory::CredentialRejected,
                Some("Account is locked or suspended"),
            ),
            (
                r"too many (login |failed )?attempts",
                ErrorCategory::CredentialRejected,
                Some("Too many failed login attempts"),
            ),
            (
                r"captcha",
                ErrorCategory::CredentialRejected,
                Some("CAPTCHA verification required"),
            ),
            (
                r"login failed|redirected to (an )?error page",
                ErrorCategory::CredentialRejected,
                None,
            ),
            // Before navigation: a missing element often reports a timeout too.
            (
                r"element not found|no such element|selector|not visible",
                ErrorCategory::StructureMismatch,
                None,
            ),
            (
                r"time(d)? ?out|network|unreachable|connection (refused|reset)|dns",
                ErrorCategory::Navigation,
                None,
            ),
        ];
        table
            .iter()
            .map(|(pattern, category, reason)| Pattern {
                re: Regex::new(&format!("(?i){pattern}")).unwrap(),
                category: *category,
                reason: *reason,
            })
            .collect()
    })
}

/// First matching category for `message`, if any heuristic applies.
pub fn classify_message(message: &str) -> Option<ErrorCategory> {
    patterns()
        .iter()
        .find(|p| p.re.is_match(message))
        .map(|p| p.category)
}

/// Human reason for a credential failure, or the raw text when none applies.
pub fn friendly_credential_reason(message: &str) -> String {
    patterns()
        .iter()
        .filter(|p| p.category == ErrorCategory::CredentialRejected)
        .find(|p| p.re.is_match(message))
        .and_then(|p| p.reason)
        .map(str::to_string)
        .unwrap_or_else(|| message.to_string())
}
