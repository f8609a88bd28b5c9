//! Server configuration and shared handler state

use std::sync::Arc;
use std::time::Duration;

use crate::ai::AiService;
use crate::mail::Notifier;
use crate::relay::{ConnectionRegistry, ModerationPolicy};
use crate::store::Store;
use crate::tasks::TaskPool;

/// Runtime configuration, read from the environment at startup.
#[derive(Clone)]
pub struct Config {
    /// Address to bind, e.g. `0.0.0.0:5000`
    pub bind_address: String,
    /// sqlx SQLite URL
    pub database_url: String,
    pub llm: LlmConfig,
    pub smtp: SmtpConfig,
    /// Outbound frames queued per realtime connection before frames are dropped
    pub relay_peer_buffer: usize,
    /// Max background tasks running at once
    pub task_concurrency: usize,
    /// bcrypt cost for new password hashes
    pub password_cost: u32,
    /// Fallback tracing filter when RUST_LOG is unset
    pub log_filter: String,
}

/// Chat-completion collaborator settings.
///
/// An Azure-style deployment is used when both endpoint and deployment are
/// set; otherwise `model` (or the OpenAI default when only a key is present)
/// goes through genai. With neither, AI features report "not configured".
#[derive(Clone, Default)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub endpoint: Option<String>,
    pub deployment: Option<String>,
    pub api_version: String,
    pub model: Option<String>,
    pub timeout: Duration,
}

#[derive(Clone, Default)]
pub struct SmtpConfig {
    pub sender: Option<String>,
    pub host: Option<String>,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_LLM_TIMEOUT_SECS: u64 = 20;
pub const DEFAULT_AZURE_API_VERSION: &str = "2024-02-15-preview";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

impl Config {
    /// Build [`Config`] from process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build [`Config`] from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let parse = |key: &str| get(key).and_then(|v| v.trim().parse::<u64>().ok());

        let bind_address = get("MEND_BIND").unwrap_or_else(|| {
            let port = get("PORT")
                .and_then(|p| p.trim().parse::<u16>().ok())
                .unwrap_or(DEFAULT_PORT);
            format!("0.0.0.0:{}", port)
        });

        let endpoint = get("OPENAI_ENDPOINT");
        let deployment = get("OPENAI_DEPLOYMENT");
        let api_key = get("OPENAI_API_KEY");
        let model = get("LLM_MODEL").or_else(|| {
            // A bare OpenAI key without an Azure deployment means the public API.
            match (&api_key, &endpoint) {
                (Some(_), None) => Some(DEFAULT_OPENAI_MODEL.to_string()),
                _ => None,
            }
        });

        Self {
            bind_address,
            database_url: get("DATABASE_URL").unwrap_or_else(|| "sqlite://mend.db".to_string()),
            llm: LlmConfig {
                api_key,
                endpoint,
                deployment,
                api_version: get("OPENAI_API_VERSION")
                    .unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_string()),
                model,
                timeout: Duration::from_secs(
                    parse("LLM_TIMEOUT_SECS").unwrap_or(DEFAULT_LLM_TIMEOUT_SECS),
                ),
            },
            smtp: SmtpConfig {
                sender: get("SMTP_SENDER"),
                host: get("SMTP_HOST"),
                port: get("SMTP_PORT")
                    .and_then(|p| p.trim().parse().ok())
                    .unwrap_or(587),
                username: get("SMTP_USERNAME"),
                password: get("SMTP_PASSWORD"),
            },
            relay_peer_buffer: parse("RELAY_PEER_BUFFER").unwrap_or(64).max(1) as usize,
            task_concurrency: parse("TASK_CONCURRENCY").unwrap_or(32).max(1) as usize,
            password_cost: parse("BCRYPT_COST")
                .map(|c| c.clamp(4, 31) as u32)
                .unwrap_or(bcrypt::DEFAULT_COST),
            log_filter: get("MEND_LOG").unwrap_or_else(|| "info,tower_http=info".to_string()),
        }
    }
}

/// App state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub ai: Arc<AiService>,
    pub mailer: Arc<dyn Notifier>,
    pub registry: Arc<ConnectionRegistry>,
    pub moderation: Arc<ModerationPolicy>,
    pub tasks: Arc<TaskPool>,
}

impl AppState {
    /// Wire collaborators together; the registry and task pool are built here
    /// so every handler and connection shares one instance of each.
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        ai: AiService,
        mailer: Arc<dyn Notifier>,
    ) -> Self {
        let registry = ConnectionRegistry::new(config.relay_peer_buffer);
        let tasks = TaskPool::new(config.task_concurrency);
        Self {
            config: Arc::new(config),
            store,
            ai: Arc::new(ai),
            mailer,
            registry: Arc::new(registry),
            moderation: Arc::new(ModerationPolicy::default()),
            tasks: Arc::new(tasks),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let config = config_from(&[]);
        assert_eq!(config.bind_address, "0.0.0.0:5000");
        assert_eq!(config.database_url, "sqlite://mend.db");
        assert_eq!(config.llm.timeout, Duration::from_secs(20));
        assert!(config.llm.model.is_none());
        assert!(config.llm.endpoint.is_none());
        assert_eq!(config.smtp.port, 587);
        assert_eq!(config.relay_peer_buffer, 64);
        assert_eq!(config.password_cost, bcrypt::DEFAULT_COST);
    }

    #[test]
    fn port_fallback_and_explicit_bind() {
        assert_eq!(config_from(&[("PORT", "8080")]).bind_address, "0.0.0.0:8080");
        let config = config_from(&[("PORT", "8080"), ("MEND_BIND", "127.0.0.1:9000")]);
        assert_eq!(config.bind_address, "127.0.0.1:9000");
    }

    #[test]
    fn bare_openai_key_selects_default_model() {
        let config = config_from(&[("OPENAI_API_KEY", "sk-test")]);
        assert_eq!(config.llm.model.as_deref(), Some(DEFAULT_OPENAI_MODEL));
    }

    #[test]
    fn azure_deployment_does_not_pick_a_genai_model() {
        let config = config_from(&[
            ("OPENAI_API_KEY", "key"),
            ("OPENAI_ENDPOINT", "https://example.openai.azure.com"),
            ("OPENAI_DEPLOYMENT", "gpt-35-turbo"),
        ]);
        assert!(config.llm.model.is_none());
        assert_eq!(config.llm.api_version, DEFAULT_AZURE_API_VERSION);
    }

    #[test]
    fn blank_values_are_ignored() {
        let config = config_from(&[("SMTP_HOST", "  "), ("RELAY_PEER_BUFFER", "0")]);
        assert!(config.smtp.host.is_none());
        assert_eq!(config.relay_peer_buffer, 1);
    }
}
