//! Browser automation through an external driver process.
//!
//! Each read or apply spawns the configured command, writes one JSON
//! request to its stdin and reads one JSON reply from stdout:
//!
//! ```text
//! -> {"action":"read","username":"...","password":"...","field":"ideal_client"}
//! <- {"ok":true,"value":"current text"}
//! <- {"ok":false,"kind":"credential","message":"Invalid credentials"}
//! ```
//!
//! `kind` is one of `credential`, `navigation`, `structure` or `save`. A
//! missing or unknown kind, a non-zero exit without a reply, or garbage on
//! stdout is classified from the message text.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::classify::CollaboratorError;
use crate::config::BrowserConfig;
use crate::ports::{BrowserDriver, Session};
use crate::retry::ErrorCategory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum Action {
    Read,
    Apply,
}

impl Action {
    /// Category used when a failure cannot be classified.
    fn fallback(self) -> ErrorCategory {
        match self {
            Action::Read => ErrorCategory::Navigation,
            Action::Apply => ErrorCategory::FieldSave,
        }
    }
}

#[derive(Serialize)]
struct DriverRequest<'a> {
    action: Action,
    username: &'a str,
    password: &'a str,
    field: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct DriverReply {
    ok: bool,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

pub struct CommandBrowserDriver {
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandBrowserDriver {
    pub fn new(command: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            args,
            timeout,
        }
    }

    pub fn from_config(config: &BrowserConfig) -> Self {
        Self::new(
            config.command.clone(),
            config.args.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    async fn call(
        &self,
        session: &Session,
        action: Action,
        field: &str,
        value: Option<&str>,
    ) -> Result<Option<String>, CollaboratorError> {
        let request = DriverRequest {
            action,
            username: &session.username,
            password: session.secret.expose(),
            field,
            value,
        };
        let payload = serde_json::to_vec(&request).map_err(|e| {
            CollaboratorError::from_category(action.fallback(), field, format!("encode request: {e}"))
        })?;

        debug!(profile_id = session.profile_id, ?action, field, "driver call");
        match tokio::time::timeout(self.timeout, self.exchange(&payload)).await {
            Ok(Ok((success, stdout, stderr))) => interpret(action, field, success, &stdout, &stderr),
            Ok(Err(e)) => Err(CollaboratorError::Navigation(format!(
                "failed to run browser driver '{}': {e}",
                self.command
            ))),
            Err(_) => Err(CollaboratorError::Navigation(format!(
                "browser driver timed out after {}s",
                self.timeout.as_secs()
            ))),
        }
    }

    /// Spawn the driver, feed `payload` and collect its output.
    async fn exchange(&self, payload: &[u8]) -> std::io::Result<(bool, String, String)> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(payload).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        Ok((
            output.status.success(),
            String::from_utf8_lossy(&output.stdout).into_owned(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ))
    }
}

fn interpret(
    action: Action,
    field: &str,
    success: bool,
    stdout: &str,
    stderr: &str,
) -> Result<Option<String>, CollaboratorError> {
    // Drivers may log to stdout; the reply is the last non-empty line.
    let last_line = stdout.lines().rev().find(|l| !l.trim().is_empty());
    let reply = last_line.and_then(|l| serde_json::from_str::<DriverReply>(l.trim()).ok());

    match reply {
        Some(r) if r.ok => Ok(r.value),
        Some(r) => {
            let message = r
                .message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| "driver reported a failure".to_string());
            Err(match r.kind.as_deref().and_then(kind_category) {
                Some(category) => CollaboratorError::from_category(category, field, message),
                None => CollaboratorError::from_message(&message, field, action.fallback()),
            })
        }
        None => {
            let text = if stderr.trim().is_empty() { stdout } else { stderr };
            let message = text.trim();
            let message = if message.is_empty() {
                if success {
                    "driver produced no reply".to_string()
                } else {
                    "driver exited with an error".to_string()
                }
            } else {
                message.chars().take(500).collect()
            };
            Err(CollaboratorError::from_message(&message, field, action.fallback()))
        }
    }
}

fn kind_category(kind: &str) -> Option<ErrorCategory> {
    match kind {
        "credential" => Some(ErrorCategory::CredentialRejected),
        "navigation" => Some(ErrorCategory::Navigation),
        "structure" => Some(ErrorCategory::StructureMismatch),
        "save" => Some(ErrorCategory::FieldSave),
        _ => None,
    }
}

#[async_trait]
impl BrowserDriver for CommandBrowserDriver {
    async fn read_current_field(
        &self,
        session: &Session,
        field: &str,
    ) -> Result<String, CollaboratorError> {
        let value = self.call(session, Action::Read, field, None).await?;
        Ok(value.unwrap_or_default())
    }

    async fn apply_field(
        &self,
        session: &Session,
        field: &str,
        value: &str,
    ) -> Result<(), CollaboratorError> {
        self.call(session, Action::Apply, field, Some(value)).await?;
        Ok(())
    }
}
