use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Endpoint the runtime listens on when nobody says otherwise.
pub const DEFAULT_RUNTIME_URL: &str = "http://127.0.0.1:11434";
pub const DEFAULT_MODEL: &str = "qwen2.5:0.5b";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Failed to read config: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration for WebAssess
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WebAssessConfig {
    /// Inference runtime location and startup policy
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Model selection
    #[serde(default)]
    pub model: ModelConfig,

    /// Recursive analysis settings
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Model download settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Target fetch settings
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Operator-specified endpoint. When set, the runtime is never auto-started.
    #[serde(default)]
    pub url: Option<String>,

    /// Executable looked up on PATH and spawned as `<executable> serve`
    #[serde(default = "default_runtime_executable")]
    pub executable: String,

    /// Local endpoint probed (and started) when `url` is not set
    #[serde(default = "default_runtime_url")]
    pub default_url: String,

    /// Timeout of a single liveness probe
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// How long to wait for a spawned runtime to become reachable
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    /// First delay between post-spawn probes; doubles up to `max_backoff_ms`
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            url: None,
            executable: default_runtime_executable(),
            default_url: default_runtime_url(),
            probe_timeout_ms: default_probe_timeout_ms(),
            startup_timeout_secs: default_startup_timeout_secs(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RuntimeConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model name and tag, e.g. "qwen2.5:0.5b"
    #[serde(default = "default_model_name")]
    pub name: String,

    /// Allow pulling the model from the internet if it is not present
    #[serde(default)]
    pub allow_download: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            allow_download: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Segments at or below this many bytes are never split further
    #[serde(default = "default_min_split_len")]
    pub min_split_len: usize,

    /// Concurrent model invocations allowed against the runtime (1..=4)
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            min_split_len: default_min_split_len(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Pull status records buffered between the decoder and the consumer
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// Wall-clock limit for a whole model pull
    #[serde(default = "default_download_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            queue_depth: default_queue_depth(),
            timeout_secs: default_download_timeout_secs(),
        }
    }
}

impl DownloadConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_runtime_executable() -> String {
    "ollama".to_string()
}
fn default_runtime_url() -> String {
    DEFAULT_RUNTIME_URL.to_string()
}
fn default_probe_timeout_ms() -> u64 {
    2_000
}
fn default_startup_timeout_secs() -> u64 {
    30
}
fn default_initial_backoff_ms() -> u64 {
    250
}
fn default_max_backoff_ms() -> u64 {
    4_000
}
fn default_model_name() -> String {
    DEFAULT_MODEL.to_string()
}
fn default_min_split_len() -> usize {
    100
}
fn default_max_concurrency() -> usize {
    2
}
fn default_queue_depth() -> usize {
    32
}
fn default_download_timeout_secs() -> u64 {
    3_600
}
fn default_fetch_timeout_secs() -> u64 {
    30
}
fn default_user_agent() -> String {
    concat!("webassess/", env!("CARGO_PKG_VERSION")).to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

/// Configuration manager: defaults, config file, then environment overrides
pub struct ConfigManager {
    config: WebAssessConfig,
    config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration with the following precedence:
    /// 1. Environment variables (.env file)
    /// 2. Config file (explicit path, ./.webassess.toml, ~/.webassess/config.toml)
    /// 3. Sensible defaults
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_dotenv();

        let (config, config_path) = match explicit_path {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound(path.display().to_string()));
                }
                (Self::read_toml_file(path)?, Some(path.to_path_buf()))
            }
            None => Self::load_config_file()?,
        };

        let config = Self::apply_env_overrides(config);
        Self::validate_config(&config)?;

        match config_path {
            Some(ref path) => info!("Config file: {}", path.display()),
            None => info!("Config file: none (using defaults)"),
        }

        Ok(Self {
            config,
            config_path,
        })
    }

    pub fn from_config(config: WebAssessConfig) -> Result<Self, ConfigError> {
        Self::validate_config(&config)?;
        Ok(Self {
            config,
            config_path: None,
        })
    }

    fn load_dotenv() {
        if Path::new(".env").exists() {
            if let Err(e) = dotenv::from_filename(".env") {
                warn!("Failed to load .env file: {}", e);
            }
            return;
        }

        if let Some(home) = dirs::home_dir() {
            let home_env = home.join(".webassess.env");
            if home_env.exists() {
                if let Err(e) = dotenv::from_path(&home_env) {
                    warn!("Failed to load .webassess.env: {}", e);
                }
            }
        }
    }

    /// Search order:
    /// 1. ./.webassess.toml (current directory)
    /// 2. ~/.webassess/config.toml (user config)
    /// 3. Use defaults
    fn load_config_file() -> Result<(WebAssessConfig, Option<PathBuf>), ConfigError> {
        let local_config = Path::new(".webassess.toml");
        if local_config.exists() {
            let config = Self::read_toml_file(local_config)?;
            return Ok((config, Some(local_config.to_path_buf())));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".webassess").join("config.toml");
            if user_config.exists() {
                let config = Self::read_toml_file(&user_config)?;
                return Ok((config, Some(user_config)));
            }
        }

        Ok((WebAssessConfig::default(), None))
    }

    pub fn read_toml_file(path: &Path) -> Result<WebAssessConfig, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    pub fn apply_env_overrides(mut config: WebAssessConfig) -> WebAssessConfig {
        if let Ok(url) = std::env::var("WEBASSESS_RUNTIME_URL") {
            if !url.trim().is_empty() {
                config.runtime.url = Some(url);
            }
        }
        if let Ok(executable) = std::env::var("WEBASSESS_RUNTIME_EXECUTABLE") {
            config.runtime.executable = executable;
        }
        if let Ok(secs) = std::env::var("WEBASSESS_STARTUP_TIMEOUT_SECS") {
            if let Ok(secs) = secs.parse() {
                config.runtime.startup_timeout_secs = secs;
            }
        }
        if let Ok(model) = std::env::var("WEBASSESS_MODEL") {
            config.model.name = model;
        }
        if let Ok(allow) = std::env::var("WEBASSESS_ALLOW_DOWNLOAD") {
            config.model.allow_download = matches!(allow.to_lowercase().as_str(), "1" | "true");
        }
        if let Ok(len) = std::env::var("WEBASSESS_MIN_SPLIT_LEN") {
            if let Ok(len) = len.parse() {
                config.analysis.min_split_len = len;
            }
        }
        if let Ok(n) = std::env::var("WEBASSESS_MAX_CONCURRENCY") {
            if let Ok(n) = n.parse() {
                config.analysis.max_concurrency = n;
            }
        }
        if let Ok(level) = std::env::var("WEBASSESS_LOG_LEVEL") {
            config.logging.level = level;
        }

        config
    }

    pub fn validate_config(config: &WebAssessConfig) -> Result<(), ConfigError> {
        if let Some(url) = &config.runtime.url {
            validate_url("runtime.url", url)?;
        }
        validate_url("runtime.default_url", &config.runtime.default_url)?;

        if config.runtime.executable.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "runtime.executable must not be empty".to_string(),
            ));
        }
        if config.runtime.initial_backoff_ms == 0
            || config.runtime.initial_backoff_ms > config.runtime.max_backoff_ms
        {
            return Err(ConfigError::ValidationError(format!(
                "runtime.initial_backoff_ms ({}) must be between 1 and max_backoff_ms ({})",
                config.runtime.initial_backoff_ms, config.runtime.max_backoff_ms
            )));
        }
        if config.model.name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "model.name must not be empty".to_string(),
            ));
        }
        if config.analysis.min_split_len == 0 {
            return Err(ConfigError::ValidationError(
                "analysis.min_split_len must be at least 1".to_string(),
            ));
        }
        if !(1..=4).contains(&config.analysis.max_concurrency) {
            return Err(ConfigError::ValidationError(format!(
                "analysis.max_concurrency must be between 1 and 4, got {}",
                config.analysis.max_concurrency
            )));
        }
        if config.download.queue_depth == 0 {
            return Err(ConfigError::ValidationError(
                "download.queue_depth must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn config(&self) -> &WebAssessConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut WebAssessConfig {
        &mut self.config
    }

    pub fn into_config(self) -> WebAssessConfig {
        self.config
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }
}

fn validate_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(value)
        .map_err(|e| ConfigError::ValidationError(format!("{} '{}': {}", field, value, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::ValidationError(format!(
            "{} '{}': unsupported scheme '{}'",
            field, value, other
        ))),
    }
}
