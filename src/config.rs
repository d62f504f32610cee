//! Runtime configuration, loaded from the environment (with `.env`
//! support) and falling back to the deployment defaults.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use tracing::info;
use url::Url;

use crate::error::ConfigError;

const DEFAULT_SCENARIO_URL: &str = "http://localhost:8093";
const DEFAULT_NLU_URL: &str = "http://localhost:8098";
const DEFAULT_LLM_URL: &str = "https://api.openai.com/v1";
const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";

/// Knobs the engine itself consumes.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Hard cap on consecutive auto-advances per inbound message; a cyclic
    /// graph fails with a step-limit error instead of spinning.
    pub max_cascade_steps: usize,
    /// Timeout applied to `api-request` nodes that declare none.
    pub default_api_timeout_ms: u64,
    /// Base URLs for `api-request` nodes addressing a named `service`
    /// instead of a full URL.
    pub service_urls: HashMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_cascade_steps: 64,
            default_api_timeout_ms: 30_000,
            service_urls: HashMap::new(),
        }
    }
}

/// Full runtime configuration for the binary.
#[derive(Debug, Clone)]
pub struct Config {
    pub scenario_service_url: Url,
    pub nlu_service_url: Url,
    pub llm_base_url: Url,
    pub llm_model: String,
    pub llm_api_key: Option<String>,
    pub scenario_timeout: Duration,
    pub nlu_timeout: Duration,
    pub llm_timeout: Duration,
    pub scenario_cache_ttl: Duration,
    pub session_ttl: Duration,
    pub engine: EngineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scenario_service_url: Url::parse(DEFAULT_SCENARIO_URL).expect("default url"),
            nlu_service_url: Url::parse(DEFAULT_NLU_URL).expect("default url"),
            llm_base_url: Url::parse(DEFAULT_LLM_URL).expect("default url"),
            llm_model: DEFAULT_LLM_MODEL.to_string(),
            llm_api_key: None,
            scenario_timeout: Duration::from_secs(5),
            nlu_timeout: Duration::from_secs(10),
            llm_timeout: Duration::from_secs(30),
            scenario_cache_ttl: Duration::from_secs(300),
            session_ttl: Duration::from_secs(1800),
            engine: EngineConfig::default(),
        }
    }
}

fn env_url(key: &str, default: &Url) -> Result<Url, ConfigError> {
    match env::var(key) {
        Ok(raw) => Url::parse(&raw).map_err(|e| ConfigError(format!("{key}: {e}"))),
        Err(_) => Ok(default.clone()),
    }
}

fn env_secs(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| ConfigError(format!("{key}: {e}"))),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Reads the configuration from the process environment; a `.env` file
    /// in the working directory is loaded first when present.
    pub fn from_env() -> Result<Self, ConfigError> {
        if dotenvy::dotenv().is_ok() {
            info!("loaded .env from working directory");
        }

        let defaults = Config::default();
        let mut config = Config {
            scenario_service_url: env_url("SCENARIO_SERVICE_URL", &defaults.scenario_service_url)?,
            nlu_service_url: env_url("NLU_SERVICE_URL", &defaults.nlu_service_url)?,
            llm_base_url: env_url("LLM_BASE_URL", &defaults.llm_base_url)?,
            llm_model: env::var("LLM_MODEL").unwrap_or(defaults.llm_model),
            llm_api_key: env::var("LLM_API_KEY").ok(),
            scenario_timeout: env_secs("SCENARIO_TIMEOUT_SECS", defaults.scenario_timeout)?,
            nlu_timeout: env_secs("NLU_TIMEOUT_SECS", defaults.nlu_timeout)?,
            llm_timeout: env_secs("LLM_TIMEOUT_SECS", defaults.llm_timeout)?,
            scenario_cache_ttl: env_secs("SCENARIO_CACHE_TTL_SECS", defaults.scenario_cache_ttl)?,
            session_ttl: env_secs("SESSION_TTL_SECS", defaults.session_ttl)?,
            engine: defaults.engine,
        };

        if let Ok(raw) = env::var("CASCADE_STEP_LIMIT") {
            config.engine.max_cascade_steps = raw
                .parse()
                .map_err(|e| ConfigError(format!("CASCADE_STEP_LIMIT: {e}")))?;
        }

        // API_SERVICE_URL_BANK_API=http://... registers the base URL for
        // api-request nodes targeting `service: bank-api`.
        for (key, value) in env::vars() {
            if let Some(name) = key.strip_prefix("API_SERVICE_URL_") {
                let alias = name.to_lowercase().replace('_', "-");
                config.engine.service_urls.insert(alias, value);
            }
        }

        Ok(config)
    }
}
