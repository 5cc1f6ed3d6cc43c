use anyhow::{bail, Context, Result};
use chatgate_core::{Credentials, GatewayConfig, RetryConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_API_ID: &str = "CHATGATE_API_ID";
pub const ENV_API_HASH: &str = "CHATGATE_API_HASH";
pub const ENV_BASE_URL: &str = "CHATGATE_BASE_URL";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub gateway: GatewaySection,

    #[serde(default)]
    pub export: ExportSection,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct GatewaySection {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_id: Option<i64>,

    #[serde(default)]
    pub api_hash: Option<String>,

    #[serde(default = "default_session_name")]
    pub session_name: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub retry: RetrySection,
}

// api_hash stays out of logs
impl std::fmt::Debug for GatewaySection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewaySection")
            .field("base_url", &self.base_url)
            .field("api_id", &self.api_id)
            .field("api_hash", &self.api_hash.as_ref().map(|_| "<redacted>"))
            .field("session_name", &self.session_name)
            .field("timeout_secs", &self.timeout_secs)
            .field("retry", &self.retry)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportSection {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8081/".to_string()
}

fn default_session_name() -> String {
    "chatgate".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_id: None,
            api_hash: None,
            session_name: default_session_name(),
            timeout_secs: default_timeout_secs(),
            retry: RetrySection::default(),
        }
    }
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl Default for ExportSection {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

impl ServerConfig {
    /// Load the config file (defaults if it doesn't exist), then apply environment overrides.
    pub fn load(config_path: &Path) -> Result<Self> {
        let mut config: Self = if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .context("Failed to read configuration file")?;
            toml::from_str(&content).context("Failed to parse configuration file")?
        } else {
            tracing::info!("Configuration file not found, using defaults");
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Override gateway settings from the environment. `lookup` abstracts `std::env::var`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(api_id) = lookup(ENV_API_ID) {
            self.gateway.api_id = Some(
                api_id
                    .trim()
                    .parse()
                    .with_context(|| format!("{} must be an integer", ENV_API_ID))?,
            );
        }
        if let Some(api_hash) = lookup(ENV_API_HASH) {
            self.gateway.api_hash = Some(api_hash);
        }
        if let Some(base_url) = lookup(ENV_BASE_URL) {
            self.gateway.base_url = base_url;
        }
        Ok(())
    }

    /// Build the session provider configuration. Credentials are required here.
    pub fn gateway_config(&self) -> Result<GatewayConfig> {
        let gateway = &self.gateway;

        let (Some(api_id), Some(api_hash)) = (gateway.api_id, gateway.api_hash.clone()) else {
            bail!(
                "Gateway credentials missing: set gateway.api_id and gateway.api_hash or {} and {}",
                ENV_API_ID,
                ENV_API_HASH
            );
        };

        let base_url = url::Url::parse(&gateway.base_url)
            .with_context(|| format!("Invalid gateway base_url: {}", gateway.base_url))?;

        Ok(GatewayConfig {
            base_url,
            credentials: Credentials {
                api_id,
                api_hash,
                session_name: gateway.session_name.clone(),
            },
            timeout: Duration::from_secs(gateway.timeout_secs),
            retry_config: RetryConfig {
                max_retries: gateway.retry.max_retries,
                initial_backoff: Duration::from_millis(gateway.retry.initial_backoff_ms),
                max_backoff: Duration::from_millis(gateway.retry.max_backoff_ms),
                ..RetryConfig::default()
            },
        })
    }
}
