//! Process configuration loaded from TOML.
//!
//! Shape and loading discipline: a manager struct holds the path and the
//! most recently loaded, validated config; `load()` reads the file, parses
//! it, validates it, and only then replaces the cached value — a config that
//! fails validation never clobbers a previously good one.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::defaults::*;
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    /// `tracing`'s filter directives don't have a `fatal` level; it maps to
    /// `error` there, the closest tracing equivalent.
    pub fn as_tracing_level(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error | LogLevel::Fatal => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    Local,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimiterConfig {
    #[serde(default = "default_rate_limiter_enabled")]
    pub enabled: bool,
    #[serde(default = "default_rate_limiter_limit")]
    pub limit: u32,
    #[serde(default = "default_rate_limiter_burst")]
    pub burst: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            enabled: default_rate_limiter_enabled(),
            limit: default_rate_limiter_limit(),
            burst: default_rate_limiter_burst(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HttpConfig {
    #[serde(default = "default_http_port")]
    pub port: u16,
    #[serde(default)]
    pub trusted_origins: Vec<String>,
    #[serde(default)]
    pub rate_limiter: RateLimiterConfig,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: default_http_port(),
            trusted_origins: Vec::new(),
            rate_limiter: RateLimiterConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PostgresConfig {
    pub host: String,
    #[serde(default = "default_postgres_port")]
    pub port: u16,
    pub database: String,
    pub user: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InfluxDbConfig {
    pub host: String,
    #[serde(default = "default_influxdb_port")]
    pub port: u16,
    #[serde(default)]
    pub token: String,
    pub org: String,
    pub bucket: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RedisConfig {
    pub host: String,
    #[serde(default = "default_redis_port")]
    pub port: u16,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheConfig {
    #[serde(default = "default_cache_kind")]
    pub kind: CacheKind,
    #[serde(default = "default_cache_ttl_seconds")]
    pub ttl_seconds: u64,
}

fn default_cache_kind() -> CacheKind {
    CacheKind::Local
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            kind: default_cache_kind(),
            ttl_seconds: default_cache_ttl_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub user: String,
    /// Ciphertext, as produced by `Preferences::crypt_values` / `Crypter::encrypt`.
    pub password_crypt: String,
    pub sender: String,
    #[serde(default = "default_smtp_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatBotConfig {
    pub token: String,
    /// Comma-separated chat ids.
    #[serde(default)]
    pub chat_ids: String,
    #[serde(default = "default_chatbot_enabled")]
    pub enabled: bool,
}

impl ChatBotConfig {
    pub fn chat_id_list(&self) -> Vec<&str> {
        self.chat_ids
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// Scheduler and session-cache tuning, not named individually above but
/// required to run those components.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    #[serde(default = "default_scheduler_tick_seconds")]
    pub scheduler_tick_seconds: u64,
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    #[serde(default = "default_session_sweep_interval_seconds")]
    pub session_sweep_interval_seconds: u64,
    #[serde(default = "default_graceful_shutdown_timeout_seconds")]
    pub graceful_shutdown_timeout_seconds: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scheduler_tick_seconds: default_scheduler_tick_seconds(),
            worker_pool_size: default_worker_pool_size(),
            session_sweep_interval_seconds: default_session_sweep_interval_seconds(),
            graceful_shutdown_timeout_seconds: default_graceful_shutdown_timeout_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Exactly 32 bytes, used to key the `Crypter`.
    pub secret: String,
    #[serde(default)]
    pub http: HttpConfig,
    pub postgres: PostgresConfig,
    pub influxdb: InfluxDbConfig,
    pub redis: RedisConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    pub smtp: SmtpConfig,
    pub chatbot: ChatBotConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl Config {
    pub fn log_level(&self) -> crate::Result<LogLevel> {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "fatal" => Ok(LogLevel::Fatal),
            other => Err(AppError::invalid(format!("unrecognized log level '{other}'")).into()),
        }
    }

    pub fn environment(&self) -> crate::Result<Environment> {
        match self.environment.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            other => Err(AppError::invalid(format!("unrecognized environment '{other}'")).into()),
        }
    }

    pub fn secret_bytes(&self) -> crate::Result<[u8; 32]> {
        let bytes = self.secret.as_bytes();
        if bytes.len() != 32 {
            return Err(AppError::invalid(format!(
                "config secret must be exactly 32 bytes, got {}",
                bytes.len()
            ))
            .into());
        }
        let mut fixed = [0u8; 32];
        fixed.copy_from_slice(bytes);
        Ok(fixed)
    }

    /// Validate the full configuration surface.
    pub fn validate(&self) -> crate::Result<()> {
        self.log_level()?;
        self.environment()?;
        self.secret_bytes()?;

        if self.http.port == 0 {
            return Err(AppError::invalid("http.port must be nonzero").into());
        }
        if self.http.rate_limiter.enabled && self.http.rate_limiter.limit == 0 {
            return Err(
                AppError::invalid("http.rate_limiter.limit must be > 0 when enabled").into(),
            );
        }

        if self.postgres.host.is_empty() {
            return Err(AppError::invalid("postgres.host cannot be empty").into());
        }
        if self.influxdb.host.is_empty() {
            return Err(AppError::invalid("influxdb.host cannot be empty").into());
        }
        if self.redis.host.is_empty() {
            return Err(AppError::invalid("redis.host cannot be empty").into());
        }

        if self.smtp.enabled {
            if self.smtp.host.is_empty() {
                return Err(AppError::invalid("smtp.host cannot be empty when smtp.enabled").into());
            }
            if self.smtp.sender.is_empty() {
                return Err(
                    AppError::invalid("smtp.sender cannot be empty when smtp.enabled").into(),
                );
            }
        }

        if self.chatbot.enabled && self.chatbot.token.is_empty() {
            return Err(
                AppError::invalid("chatbot.token cannot be empty when chatbot.enabled").into(),
            );
        }

        if self.engine.scheduler_tick_seconds == 0 {
            return Err(AppError::invalid("engine.scheduler_tick_seconds must be > 0").into());
        }
        if self.engine.worker_pool_size == 0 {
            return Err(AppError::invalid("engine.worker_pool_size must be > 0").into());
        }

        Ok(())
    }

    pub fn http_listen_addr(&self) -> crate::Result<SocketAddr> {
        format!("0.0.0.0:{}", self.http.port)
            .parse()
            .map_err(|e| AppError::invalid(format!("invalid http listen address: {e}")).into())
    }
}

/// Loads, validates, and caches a [`Config`] from a TOML file: load, then
/// validate, then cache.
pub struct ConfigManager {
    config_path: PathBuf,
    config: Option<Config>,
}

impl ConfigManager {
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            config: None,
        }
    }

    /// Reads and validates the config file, caching it only on success.
    pub fn load(&mut self) -> crate::Result<&Config> {
        let content = std::fs::read_to_string(&self.config_path)
            .map_err(|e| AppError::invalid(format!("failed to read config file: {e}")))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| AppError::invalid(format!("failed to parse config file: {e}")))?;
        config.validate()?;
        tracing::debug!(
            path = %self.config_path.display(),
            environment = %config.environment,
            http_port = config.http.port,
            "loaded configuration"
        );
        self.config = Some(config);
        Ok(self.config.as_ref().expect("just inserted"))
    }

    pub fn get(&self) -> crate::Result<&Config> {
        self.config
            .as_ref()
            .ok_or_else(|| AppError::internal("config accessed before load()").into())
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> String {
        r#"
secret = "01234567890123456789012345678901"

[postgres]
host = "localhost"
database = "monitoring"
user = "monitoring"

[influxdb]
host = "localhost"
org = "acme"
bucket = "metrics"

[redis]
host = "localhost"

[smtp]
host = "smtp.example.com"
user = "alerts"
password_crypt = "deadbeef"
sender = "alerts@example.com"

[chatbot]
token = "bot-token"
"#
        .to_string()
    }

    #[test]
    fn valid_config_parses_and_validates() {
        let config: Config = toml::from_str(&sample_toml()).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.log_level().unwrap(), LogLevel::Info);
        assert_eq!(config.http.port, 8080);
    }

    #[test]
    fn wrong_length_secret_fails_validation() {
        let mut config: Config = toml::from_str(&sample_toml()).unwrap();
        config.secret = "too-short".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn manager_load_caches_only_on_success() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(sample_toml().as_bytes()).unwrap();

        let mut manager = ConfigManager::new(file.path());
        assert!(manager.get().is_err());
        manager.load().unwrap();
        assert_eq!(manager.get().unwrap().postgres.host, "localhost");
    }

    #[test]
    fn chatbot_chat_id_list_splits_and_trims() {
        let mut config: Config = toml::from_str(&sample_toml()).unwrap();
        config.chatbot.chat_ids = " 1, 2 ,3".to_string();
        assert_eq!(config.chatbot.chat_id_list(), vec!["1", "2", "3"]);
    }
}
