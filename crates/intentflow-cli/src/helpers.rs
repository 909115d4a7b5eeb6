//! Shared helpers for the subcommands: tracing setup and wiring of the
//! library services from configuration.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::info;
use tracing_subscriber::EnvFilter;

use intentflow_agent::{LlmClient, LlmClientConfig, LlmProvider};
use intentflow_engine::{LogNotifier, Notifier, WebhookNotifier};
use intentflow_monitor::{
    CalendarProvider, EventProvider, HttpFeedProvider, HttpTranscriber, MonitorConfig, Transcriber,
};
use intentflow_store::Database;

use crate::config::{
    LlmSection, MonitorSection, NotificationsSection, ProviderSection, StoreSection,
    TranscriptionSection, env_non_empty,
};

const DEFAULT_MODEL_ANTHROPIC: &str = "claude-sonnet-4-20250514";
const DEFAULT_MODEL_OPENAI: &str = "gpt-4o";
const DEFAULT_MODEL_OLLAMA: &str = "qwen2.5:latest";
const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Install the global subscriber.  `RUST_LOG` wins over `default_level`.
pub fn init_tracing(default_level: &str, json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

// ---------------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------------

/// Build the LLM client described by `[llm]`.
pub fn build_llm_client(section: &LlmSection) -> Result<LlmClient> {
    let is_ollama = section.provider.eq_ignore_ascii_case("ollama");
    let provider: LlmProvider = section
        .provider
        .parse()
        .with_context(|| format!("unsupported llm provider `{}`", section.provider))?;

    let api_key = match env_non_empty(&section.api_key_env) {
        Some(key) => key,
        // Local Ollama accepts any bearer token.
        None if is_ollama => "ollama".to_owned(),
        None => bail!(
            "no API key for provider `{}`: set {} in the environment or .env",
            section.provider,
            section.api_key_env
        ),
    };

    let model = match (section.model.is_empty(), provider, is_ollama) {
        (false, _, _) => section.model.clone(),
        (true, _, true) => DEFAULT_MODEL_OLLAMA.to_owned(),
        (true, LlmProvider::Anthropic, _) => DEFAULT_MODEL_ANTHROPIC.to_owned(),
        (true, LlmProvider::OpenAI, _) => DEFAULT_MODEL_OPENAI.to_owned(),
    };

    let mut config = match provider {
        LlmProvider::Anthropic => LlmClientConfig::anthropic(api_key, model),
        LlmProvider::OpenAI => LlmClientConfig::openai(api_key, model),
    };
    if let Some(url) = &section.base_url {
        config = config.with_base_url(url.clone());
    } else if is_ollama {
        config = config.with_base_url(OLLAMA_BASE_URL);
    }
    config = config
        .with_temperature(section.temperature)
        .with_max_tokens(section.max_tokens)
        .with_request_timeout(Duration::from_secs(section.request_timeout_secs));

    info!(
        provider = provider.as_str(),
        model = %config.default_model,
        base_url = %config.base_url,
        "llm client configured"
    );
    LlmClient::new(config).context("failed to create llm client")
}

/// Open the SQLite store, creating its directory when needed.
pub async fn open_store(section: &StoreSection) -> Result<Database> {
    if let Some(dir) = section.path.parent()
        && !dir.as_os_str().is_empty()
        && !dir.exists()
    {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create data directory {}", dir.display()))?;
    }
    let db = Database::open_and_migrate(section.path.clone())
        .await
        .with_context(|| format!("failed to open database {}", section.path.display()))?;
    info!(path = %section.path.display(), "store initialized");
    Ok(db)
}

pub fn build_notifier(section: &NotificationsSection) -> Result<Arc<dyn Notifier>> {
    match &section.webhook_url {
        Some(url) => Ok(Arc::new(
            WebhookNotifier::new(url).context("invalid notifications.webhook_url")?,
        )),
        None => Ok(Arc::new(LogNotifier)),
    }
}

pub fn build_transcriber(section: &TranscriptionSection) -> Result<Option<Arc<dyn Transcriber>>> {
    let Some(endpoint) = &section.endpoint else {
        return Ok(None);
    };
    let mut transcriber = HttpTranscriber::new(endpoint).context("invalid transcription.endpoint")?;
    if let Some(key) = section.api_key_env.as_deref().and_then(env_non_empty) {
        transcriber = transcriber.with_api_key(key);
    }
    Ok(Some(Arc::new(transcriber)))
}

/// Turn one `[[monitors]]` entry into a monitor config.
pub fn build_monitor_config(section: &MonitorSection) -> Result<MonitorConfig> {
    let provider: Arc<dyn EventProvider> = match &section.provider {
        ProviderSection::Feed { url, token_env } => {
            let name = format!("{}-{}", section.source, section.user);
            let mut feed = HttpFeedProvider::new(name, url)?;
            if let Some(env) = token_env {
                let token = env_non_empty(env)
                    .with_context(|| format!("feed token variable {env} is not set"))?;
                feed = feed.with_bearer_token(token);
            }
            Arc::new(feed)
        }
        ProviderSection::Calendar { name, cron, title } => {
            Arc::new(CalendarProvider::new(name.clone(), cron, title.clone())?)
        }
    };

    let mut config = MonitorConfig::new(section.source, provider);
    if let Some(secs) = section.poll_interval_secs {
        config = config.with_poll_interval(Duration::from_secs(secs));
    }
    Ok(config)
}
