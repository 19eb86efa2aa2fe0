use crate::error::{RefreshError, Result};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// SchedulerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between scheduler ticks.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    /// Mandatory pause after one profile's logged outcome before the next dispatch.
    #[serde(default = "default_inter_profile_delay")]
    pub inter_profile_delay_secs: u64,
    /// How long a profile rests after a successful or no-op run.
    #[serde(default = "default_cadence_hours")]
    pub cadence_hours: u64,
    /// How long a profile rests after an errored run.
    #[serde(default = "default_error_cooldown")]
    pub error_cooldown_minutes: u64,
    /// Start the loop as soon as the server comes up.
    #[serde(default)]
    pub autostart: bool,
}

fn default_tick_interval() -> u64 {
    10
}

fn default_inter_profile_delay() -> u64 {
    15
}

fn default_cadence_hours() -> u64 {
    7 * 24
}

fn default_error_cooldown() -> u64 {
    60
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            inter_profile_delay_secs: default_inter_profile_delay(),
            cadence_hours: default_cadence_hours(),
            error_cooldown_minutes: default_error_cooldown(),
            autostart: false,
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }

    pub fn inter_profile_delay(&self) -> Duration {
        Duration::from_secs(self.inter_profile_delay_secs)
    }

    pub fn cadence(&self) -> chrono::Duration {
        chrono::Duration::hours(self.cadence_hours as i64)
    }

    pub fn error_cooldown(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.error_cooldown_minutes as i64)
    }
}

// ---------------------------------------------------------------------------
// GeneratorConfig
// ---------------------------------------------------------------------------

/// A profile field the generator is asked to produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    /// Values longer than this are trimmed before they reach the browser.
    #[serde(default)]
    pub max_chars: Option<usize>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, max_chars: Option<usize>) -> Self {
        Self {
            name: name.into(),
            max_chars,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// OpenAI-compatible chat completions endpoint.
    #[serde(default = "default_generator_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_generator_model")]
    pub model: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_generator_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_fields")]
    pub fields: Vec<FieldSpec>,
}

fn default_generator_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_generator_model() -> String {
    "gpt-4-turbo".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_generator_timeout() -> u64 {
    60
}

fn default_fields() -> Vec<FieldSpec> {
    vec![
        FieldSpec::new("ideal_client", Some(600)),
        FieldSpec::new("how_can_help", Some(360)),
        FieldSpec::new("empathy_invitation", Some(360)),
    ]
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            endpoint: default_generator_endpoint(),
            model: default_generator_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_generator_timeout(),
            fields: default_fields(),
        }
    }
}

// ---------------------------------------------------------------------------
// BrowserConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Driver executable; receives one JSON request on stdin per call.
    #[serde(default = "default_browser_command")]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Upper bound for a single read or apply call.
    #[serde(default = "default_browser_timeout")]
    pub timeout_secs: u64,
}

fn default_browser_command() -> String {
    "refresh-browser-driver".to_string()
}

fn default_browser_timeout() -> u64 {
    180
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            command: default_browser_command(),
            args: Vec::new(),
            timeout_secs: default_browser_timeout(),
        }
    }
}

// ---------------------------------------------------------------------------
// VaultConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Private identity used to open sealed credentials.
    /// Defaults to `~/.ssh/id_ed25519` or `~/.ssh/id_rsa`.
    #[serde(default)]
    pub identity: Option<PathBuf>,
    /// Recipients file used to seal credentials.
    /// Defaults to `.refresh/recipients.txt`.
    #[serde(default)]
    pub recipients: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// NotifierConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// Failure and summary notifications are POSTed here. Unset means log only.
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_notifier_timeout")]
    pub timeout_secs: u64,
}

fn default_notifier_timeout() -> u64 {
    10
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: default_notifier_timeout(),
        }
    }
}

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    8000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

fn default_version() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            scheduler: SchedulerConfig::default(),
            generator: GeneratorConfig::default(),
            browser: BrowserConfig::default(),
            vault: VaultConfig::default(),
            notifier: NotifierConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Config {
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(RefreshError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    /// Recipients file for sealing, resolved against `root`.
    pub fn recipients_path(&self, root: &Path) -> PathBuf {
        match &self.vault.recipients {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => root.join(p),
            None => paths::recipients_path(root),
        }
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.scheduler.tick_interval_secs == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "scheduler.tick_interval_secs is 0; 1 second is used instead".into(),
            });
        }

        if self.scheduler.inter_profile_delay_secs < 5 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "scheduler.inter_profile_delay_secs={} is aggressive for a rate-sensitive site",
                    self.scheduler.inter_profile_delay_secs
                ),
            });
        }

        if self.generator.fields.is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "generator.fields is empty; every run would end as no-change".into(),
            });
        }

        let mut seen = std::collections::HashSet::new();
        for field in &self.generator.fields {
            if field.name.trim().is_empty() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: "generator.fields contains an empty field name".into(),
                });
            } else if !seen.insert(field.name.as_str()) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!("generator field '{}' is listed twice", field.name),
                });
            }
            if field.max_chars == Some(0) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("generator field '{}' has max_chars=0", field.name),
                });
            }
        }

        if self.browser.command.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "browser.command is empty".into(),
            });
        }

        if let Some(url) = &self.notifier.webhook_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("notifier.webhook_url '{url}' is not an http(s) URL"),
                });
            }
        }

        warnings
    }
}
