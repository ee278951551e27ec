use std::env;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the rulebook ingestion server.
#[derive(Debug, Clone)]
pub struct Config {
    /// API key for the hosted index, document store, and answering service.
    pub openai_api_key: String,
    /// Base URL of the OpenAI-compatible API (including the `/v1` segment).
    pub openai_base_url: String,
    /// Model used when answering questions against a rulebook index.
    pub answer_model: String,
    /// API key for the page extraction model.
    pub gemini_api_key: String,
    /// Base URL of the Gemini generative language API.
    pub gemini_base_url: String,
    /// Extraction model identifier.
    pub gemini_model: String,
    /// Base URL of the Supabase project backing rows and assets.
    pub supabase_url: String,
    /// Service key used for PostgREST and storage calls.
    pub supabase_service_key: String,
    /// Storage bucket holding raw documents and thumbnails.
    pub storage_bucket: String,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
    /// Number of page documents uploaded concurrently inside one batch.
    pub upload_concurrency: usize,
    /// Attempts per page document before the batch fails.
    pub upload_max_attempts: u32,
    /// Linear backoff base between attempts.
    pub upload_backoff: Duration,
    /// Upper bound on waiting for the index to finish attaching a batch.
    pub index_attach_timeout: Duration,
    /// Poll interval while waiting on an index attachment.
    pub index_attach_poll: Duration,
    /// Age after which an unfinished ingestion is reported as stale.
    pub stale_ingest_after: Duration,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            openai_api_key: load_env("OPENAI_API_KEY")?,
            openai_base_url: load_env_optional("OPENAI_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".into()),
            answer_model: load_env_optional("ANSWER_MODEL").unwrap_or_else(|| "gpt-5.1".into()),
            gemini_api_key: load_env("GEMINI_API_KEY")?,
            gemini_base_url: load_env_optional("GEMINI_BASE_URL")
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com".into()),
            gemini_model: load_env_optional("GEMINI_MODEL")
                .unwrap_or_else(|| "gemini-2.5-flash".into()),
            supabase_url: load_env("SUPABASE_URL")?,
            supabase_service_key: load_env("SUPABASE_SERVICE_KEY")?,
            storage_bucket: load_env_optional("STORAGE_BUCKET")
                .unwrap_or_else(|| "rulebooks".into()),
            server_port: parse_optional("SERVER_PORT")?,
            upload_concurrency: parse_optional("UPLOAD_CONCURRENCY")?
                .unwrap_or(5usize)
                .max(1),
            upload_max_attempts: parse_optional("UPLOAD_MAX_ATTEMPTS")?
                .unwrap_or(3u32)
                .max(1),
            upload_backoff: Duration::from_millis(
                parse_optional("UPLOAD_BACKOFF_MS")?.unwrap_or(1000),
            ),
            index_attach_timeout: Duration::from_secs(
                parse_optional("INDEX_ATTACH_TIMEOUT_SECS")?.unwrap_or(120),
            ),
            index_attach_poll: Duration::from_millis(
                parse_optional("INDEX_ATTACH_POLL_MS")?.unwrap_or(1000),
            ),
            stale_ingest_after: Duration::from_secs(
                parse_optional::<u64>("STALE_INGEST_MINUTES")?.unwrap_or(15) * 60,
            ),
        })
    }
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_optional<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() {
    dotenvy::dotenv().ok();
    let config = Config::from_env().expect("Failed to load config from environment");
    tracing::debug!(
        openai_base_url = %config.openai_base_url,
        gemini_model = %config.gemini_model,
        supabase_url = %config.supabase_url,
        bucket = %config.storage_bucket,
        server_port = ?config.server_port,
        upload_concurrency = config.upload_concurrency,
        "Loaded configuration"
    );
    CONFIG.set(config).expect("Failed to set config");
}
