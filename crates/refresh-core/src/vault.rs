//! Credential sealing with the `age` binary.
//!
//! Passwords are stored as ASCII-armored age ciphertext inside the profile
//! record. Sealing encrypts to every public key in the recipients file;
//! opening needs one matching private identity (an age key or an SSH key).

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::config::Config;
use crate::error::{RefreshError, Result};
use crate::ports::Secret;

pub trait CredentialVault: Send + Sync {
    /// Encrypt `plaintext`, returning armored ciphertext.
    fn seal(&self, plaintext: &str) -> Result<String>;

    fn open(&self, sealed: &str) -> Result<Secret>;
}

// ---------------------------------------------------------------------------
// AGE binary and identity resolution
// ---------------------------------------------------------------------------

fn age_bin() -> Result<PathBuf> {
    which::which("age").map_err(|_| RefreshError::AgeNotInstalled)
}

/// Resolve the default identity path (private key for decryption).
/// Tries `~/.ssh/id_ed25519`, then `~/.ssh/id_rsa`.
pub fn default_identity() -> Option<PathBuf> {
    let home = home::home_dir()?;
    let candidates = [
        home.join(".ssh").join("id_ed25519"),
        home.join(".ssh").join("id_rsa"),
    ];
    candidates.into_iter().find(|p| p.exists())
}

// ---------------------------------------------------------------------------
// AgeVault
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AgeVault {
    recipients: PathBuf,
    identity: Option<PathBuf>,
}

impl AgeVault {
    pub fn new(recipients: PathBuf, identity: Option<PathBuf>) -> Self {
        Self {
            recipients,
            identity,
        }
    }

    pub fn from_config(root: &Path, config: &Config) -> Self {
        let identity = config.vault.identity.clone().or_else(default_identity);
        Self::new(config.recipients_path(root), identity)
    }

    fn run(&self, args: &[&str], input: &[u8]) -> std::result::Result<Vec<u8>, String> {
        let age_bin = age_bin().map_err(|e| e.to_string())?;
        let mut child = Command::new(&age_bin)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| e.to_string())?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input).map_err(|e| e.to_string())?;
        }

        let output = child.wait_with_output().map_err(|e| e.to_string())?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(stderr.trim().to_string());
        }
        Ok(output.stdout)
    }
}

impl CredentialVault for AgeVault {
    fn seal(&self, plaintext: &str) -> Result<String> {
        age_bin()?;
        if !self.recipients.exists() {
            return Err(RefreshError::SealFailed(format!(
                "recipients file not found: {}",
                self.recipients.display()
            )));
        }
        let recipients = self.recipients.to_str().unwrap_or("");
        let out = self
            .run(
                &["--encrypt", "--armor", "--recipients-file", recipients],
                plaintext.as_bytes(),
            )
            .map_err(RefreshError::SealFailed)?;
        String::from_utf8(out).map_err(|e| RefreshError::SealFailed(e.to_string()))
    }

    fn open(&self, sealed: &str) -> Result<Secret> {
        let identity = self.identity.as_deref().ok_or_else(|| {
            RefreshError::OpenFailed("no identity configured and none found in ~/.ssh".into())
        })?;
        let out = self
            .run(
                &["--decrypt", "--identity", identity.to_str().unwrap_or("")],
                sealed.as_bytes(),
            )
            .map_err(RefreshError::OpenFailed)?;
        let plaintext =
            String::from_utf8(out).map_err(|e| RefreshError::OpenFailed(e.to_string()))?;
        Ok(Secret::new(plaintext))
    }
}
