//! Typed configuration loaded from `config/default.toml`.
//!
//! Every section falls back to defaults, so an empty file is a valid
//! configuration.  Secrets are never stored here: fields ending in `_env`
//! name the environment variable that holds the value.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

use intentflow_core::{EventType, UserContext};
use intentflow_engine::{ApprovalGate, EngineConfig};

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingSection,
    pub llm: LlmSection,
    pub engine: EngineSection,
    pub server: ServerSection,
    pub store: StoreSection,
    pub workflows: WorkflowsSection,
    pub notifications: NotificationsSection,
    pub transcription: TranscriptionSection,
    pub users: Vec<UserContext>,
    pub monitors: Vec<MonitorSection>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self { level: "info".into() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// `anthropic`, `openai` or `ollama`.
    pub provider: String,
    /// Empty means the provider's default model.
    pub model: String,
    pub base_url: Option<String>,
    pub api_key_env: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "anthropic".into(),
            model: String::new(),
            base_url: None,
            api_key_env: "ANTHROPIC_API_KEY".into(),
            temperature: intentflow_agent::GENERATION_TEMPERATURE,
            max_tokens: 1024,
            request_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub approval_gate: ApprovalGate,
    /// Cap on every workflow's own timeout.
    pub max_timeout_ms: Option<u64>,
    /// Finished executions older than this are dropped from memory.
    pub retain_finished_secs: u64,
    /// Unanswered approval requests are cancelled after this long.  `0`
    /// keeps them waiting forever.
    pub approval_ttl_secs: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            approval_gate: ApprovalGate::default(),
            max_timeout_ms: None,
            retain_finished_secs: 3600,
            approval_ttl_secs: 24 * 60 * 60,
        }
    }
}

impl EngineSection {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            approval_gate: self.approval_gate,
            max_timeout: self.max_timeout_ms.map(Duration::from_millis),
            approval_ttl: (self.approval_ttl_secs > 0)
                .then(|| Duration::from_secs(self.approval_ttl_secs)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Address of the approval endpoint; unset disables it.
    pub bind: Option<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: Some("127.0.0.1:8787".into()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub path: PathBuf,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/intentflow.db"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkflowsSection {
    /// JSON or TOML, chosen by extension.
    pub path: PathBuf,
}

impl Default for WorkflowsSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("config/workflows.json"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NotificationsSection {
    /// When unset, notifications are only logged.
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TranscriptionSection {
    pub endpoint: Option<String>,
    pub api_key_env: Option<String>,
}

/// One `[[monitors]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorSection {
    pub user: String,
    pub source: EventType,
    pub provider: ProviderSection,
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderSection {
    Feed {
        url: String,
        #[serde(default)]
        token_env: Option<String>,
    },
    Calendar {
        name: String,
        cron: String,
        title: String,
    },
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Read a configuration file.  A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

/// Read a non-empty environment variable, returning `None` if unset or empty.
pub fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.llm.provider, "anthropic");
        assert_eq!(config.llm.api_key_env, "ANTHROPIC_API_KEY");
        assert_eq!(config.store.path, PathBuf::from("data/intentflow.db"));
        assert_eq!(config.engine.approval_gate, ApprovalGate::WorkflowAndIntent);
        let engine = config.engine.engine_config();
        assert_eq!(engine.approval_ttl, Some(Duration::from_secs(86_400)));
        assert_eq!(config.server.bind.as_deref(), Some("127.0.0.1:8787"));
        assert!(config.users.is_empty() && config.monitors.is_empty());
    }

    #[test]
    fn parses_full_config() {
        let config = AppConfig::parse(
            r#"
            [llm]
            provider = "openai"
            model = "gpt-4o"
            api_key_env = "OPENAI_API_KEY"
            temperature = 0.0

            [engine]
            approval_gate = "workflow"
            max_timeout_ms = 60000
            approval_ttl_secs = 0

            [server]
            bind = "0.0.0.0:9000"

            [[users]]
            userId = "u1"
            permissions = { canScheduleAppointments = true }
            preferences = { autoApprove = { appointments = true }, notificationChannels = ["sms"] }

            [[monitors]]
            user = "u1"
            source = "email"
            poll_interval_secs = 120
            provider.kind = "feed"
            provider.url = "https://mail.example.com/inbox"
            provider.token_env = "MAIL_TOKEN"

            [[monitors]]
            user = "u1"
            source = "calendar"
            provider.kind = "calendar"
            provider.name = "meds"
            provider.cron = "0 8 * * *"
            provider.title = "Morning pills"
            "#,
        )
        .unwrap();

        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.llm.temperature, 0.0);
        let engine = config.engine.engine_config();
        assert_eq!(engine.approval_gate, ApprovalGate::Workflow);
        assert_eq!(engine.max_timeout, Some(Duration::from_secs(60)));
        assert_eq!(engine.approval_ttl, None);
        assert_eq!(config.server.bind.as_deref(), Some("0.0.0.0:9000"));

        let user = &config.users[0];
        assert!(user.permissions.can_schedule_appointments);
        assert!(user.preferences.auto_approve.appointments);

        assert_eq!(config.monitors.len(), 2);
        assert_eq!(config.monitors[0].poll_interval_secs, Some(120));
        assert!(matches!(
            &config.monitors[0].provider,
            ProviderSection::Feed { token_env: Some(env), .. } if env == "MAIL_TOKEN"
        ));
        assert!(matches!(config.monitors[1].provider, ProviderSection::Calendar { .. }));
    }

    #[test]
    fn shipped_config_parses() {
        let config = AppConfig::parse(include_str!("../../../config/default.toml")).unwrap();
        assert_eq!(config.users[0].user_id, "demo");
        assert_eq!(config.monitors.len(), 2);
        assert_eq!(config.engine.retain_finished_secs, 3600);
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.workflows.path, PathBuf::from("config/workflows.json"));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[llm\nprovider = 1").unwrap();
        assert!(AppConfig::load(&path).is_err());
    }
}
