//! Configuration loading for the reminder service.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `REMINDERS_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::ClockMode;
use crate::gateway::serwersms::{DEFAULT_BASE_URL, DEFAULT_SENDER_NAME};
use crate::notification::SmsLocale;

const ENV_PREFIX: &str = "REMINDERS_";

/// Upper bound for `WORKER_PENDING_STALE_AFTER_SECONDS`.
pub const MAX_PENDING_STALE_AFTER_SECONDS: u64 = 86_400;
/// Upper bound for `QUEUE_VISIBILITY_TIMEOUT_SECONDS`.
pub const MAX_VISIBILITY_TIMEOUT_SECONDS: u64 = 43_200;
/// Upper bound for `QUEUE_RETRY_MAX_SECONDS`.
pub const MAX_RETRY_SECONDS: u64 = 86_400;

/// Application configuration derived from `REMINDERS_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    #[serde(default)]
    pub sms_locale: SmsLocale,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub matcher: MatcherConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
}

/// SMS gateway connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct GatewayConfig {
    /// API host; `/messages/send_sms.json` is appended
    ///
    /// Environment variable: `REMINDERS_GATEWAY_BASE_URL`
    #[serde(default = "default_gateway_base_url")]
    pub base_url: String,

    /// Bearer token (required outside `local`/`test` profiles)
    ///
    /// Environment variable: `REMINDERS_GATEWAY_API_TOKEN`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,

    /// Environment variable: `REMINDERS_GATEWAY_SENDER_NAME`
    #[serde(default = "default_gateway_sender_name")]
    pub sender_name: String,

    /// Environment variable: `REMINDERS_GATEWAY_TIMEOUT_MS`
    #[serde(default = "default_gateway_timeout_ms")]
    pub timeout_ms: u64,
}

/// Matcher tick settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct MatcherConfig {
    #[serde(default = "default_matcher_tick_interval_seconds")]
    pub tick_interval_seconds: u64,
    /// How UTC instants are mapped onto Central European wall-clock time
    #[serde(default)]
    pub clock: ClockMode,
}

/// Delivery worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct WorkerConfig {
    /// Delay between receives when the queue was empty
    #[serde(default = "default_worker_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Maximum messages received per batch
    #[serde(default = "default_worker_batch_size")]
    pub batch_size: usize,
    /// Sleep before every gateway call
    #[serde(default = "default_worker_pacing_ms")]
    pub pacing_ms: u64,
    /// Age after which a pending log row left by a crashed attempt may be reclaimed
    #[serde(default = "default_worker_pending_stale_after_seconds")]
    pub pending_stale_after_seconds: u64,
}

/// Delivery queue settings. Redelivery backoff is owned by the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct QueueConfig {
    #[serde(default = "default_queue_name")]
    pub name: String,
    #[serde(default = "default_queue_visibility_timeout_seconds")]
    pub visibility_timeout_seconds: u64,
    /// Deliveries before a message is dead-lettered
    #[serde(default = "default_queue_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_queue_retry_base_seconds")]
    pub retry_base_seconds: u64,
    #[serde(default = "default_queue_retry_max_seconds")]
    pub retry_max_seconds: u64,
    #[serde(default = "default_queue_retry_jitter_factor")]
    pub retry_jitter_factor: f64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            sms_locale: SmsLocale::default(),
            gateway: GatewayConfig::default(),
            matcher: MatcherConfig::default(),
            worker: WorkerConfig::default(),
            queue: QueueConfig::default(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_gateway_base_url(),
            api_token: None,
            sender_name: default_gateway_sender_name(),
            timeout_ms: default_gateway_timeout_ms(),
        }
    }
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            tick_interval_seconds: default_matcher_tick_interval_seconds(),
            clock: ClockMode::default(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_worker_poll_interval_ms(),
            batch_size: default_worker_batch_size(),
            pacing_ms: default_worker_pacing_ms(),
            pending_stale_after_seconds: default_worker_pending_stale_after_seconds(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: default_queue_name(),
            visibility_timeout_seconds: default_queue_visibility_timeout_seconds(),
            max_attempts: default_queue_max_attempts(),
            retry_base_seconds: default_queue_retry_base_seconds(),
            retry_max_seconds: default_queue_retry_max_seconds(),
            retry_jitter_factor: default_queue_retry_jitter_factor(),
        }
    }
}

impl AppConfig {
    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if config.gateway.api_token.is_some() {
            config.gateway.api_token = Some("[REDACTED]".to_string());
        }
        serde_json::to_string_pretty(&config)
    }

    /// True for profiles that may run without gateway credentials.
    pub fn is_development_profile(&self) -> bool {
        matches!(self.profile.as_str(), "local" | "test")
    }

    /// Validates the configuration, returning an error if required settings are missing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::MissingDatabaseUrl);
        }

        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            return Err(ConfigError::InvalidLogFormat {
                value: self.log_format.clone(),
            });
        }

        if !self.is_development_profile()
            && self
                .gateway
                .api_token
                .as_deref()
                .is_none_or(|token| token.trim().is_empty())
        {
            return Err(ConfigError::MissingGatewayToken);
        }

        self.gateway.validate()?;
        self.matcher.validate()?;
        self.worker.validate()?;
        self.queue.validate()?;

        // A received batch must be settled before its lease runs out.
        let batch_ms = (self.worker.batch_size as u64)
            .saturating_mul(self.worker.pacing_ms.saturating_add(self.gateway.timeout_ms));
        if self.queue.visibility_timeout_seconds.saturating_mul(1000) < batch_ms {
            return Err(ConfigError::VisibilityTimeoutTooShort {
                visibility_seconds: self.queue.visibility_timeout_seconds,
                batch_ms,
            });
        }

        Ok(())
    }
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Err(source) = url::Url::parse(&self.base_url) {
            return Err(ConfigError::InvalidGatewayUrl {
                value: self.base_url.clone(),
                source,
            });
        }
        if self.sender_name.trim().is_empty() {
            return Err(ConfigError::MissingSenderName);
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::InvalidGatewayTimeout {
                value: self.timeout_ms,
            });
        }
        Ok(())
    }
}

impl MatcherConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_seconds < 10 || self.tick_interval_seconds > 300 {
            return Err(ConfigError::InvalidMatcherTickInterval {
                value: self.tick_interval_seconds,
            });
        }
        Ok(())
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 || self.batch_size > 100 {
            return Err(ConfigError::InvalidWorkerBatchSize {
                value: self.batch_size,
            });
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidWorkerPollInterval {
                value: self.poll_interval_ms,
            });
        }
        if self.pending_stale_after_seconds == 0
            || self.pending_stale_after_seconds > MAX_PENDING_STALE_AFTER_SECONDS
        {
            return Err(ConfigError::InvalidPendingStaleAfter {
                value: self.pending_stale_after_seconds,
            });
        }
        Ok(())
    }
}

impl QueueConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::MissingQueueName);
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidQueueMaxAttempts {
                value: self.max_attempts,
            });
        }
        if self.visibility_timeout_seconds == 0
            || self.visibility_timeout_seconds > MAX_VISIBILITY_TIMEOUT_SECONDS
        {
            return Err(ConfigError::InvalidQueueVisibilityTimeout {
                value: self.visibility_timeout_seconds,
            });
        }
        if self.retry_max_seconds > MAX_RETRY_SECONDS {
            return Err(ConfigError::InvalidQueueRetryMax {
                value: self.retry_max_seconds,
            });
        }
        if self.retry_base_seconds > self.retry_max_seconds {
            return Err(ConfigError::InvalidQueueRetryBounds {
                base: self.retry_base_seconds,
                max: self.retry_max_seconds,
            });
        }
        if !(0.0..=1.0).contains(&self.retry_jitter_factor) {
            return Err(ConfigError::InvalidQueueRetryJitter {
                value: self.retry_jitter_factor,
            });
        }
        Ok(())
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "postgresql://localhost:5432/reminders".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_gateway_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_gateway_sender_name() -> String {
    DEFAULT_SENDER_NAME.to_string()
}

fn default_gateway_timeout_ms() -> u64 {
    10_000
}

fn default_matcher_tick_interval_seconds() -> u64 {
    60 // 1 minute
}

fn default_worker_poll_interval_ms() -> u64 {
    1000
}

fn default_worker_batch_size() -> usize {
    10
}

fn default_worker_pacing_ms() -> u64 {
    200
}

fn default_worker_pending_stale_after_seconds() -> u64 {
    300 // 5 minutes
}

fn default_queue_name() -> String {
    "notifications".to_string()
}

fn default_queue_visibility_timeout_seconds() -> u64 {
    180 // 3 minutes
}

fn default_queue_max_attempts() -> u32 {
    4
}

fn default_queue_retry_base_seconds() -> u64 {
    30
}

fn default_queue_retry_max_seconds() -> u64 {
    900 // 15 minutes
}

fn default_queue_retry_jitter_factor() -> f64 {
    0.1 // 10% jitter
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("database URL is empty; set REMINDERS_DATABASE_URL")]
    MissingDatabaseUrl,
    #[error("log format must be 'json' or 'pretty', got '{value}'")]
    InvalidLogFormat { value: String },
    #[error("SMS gateway API token is missing; set REMINDERS_GATEWAY_API_TOKEN")]
    MissingGatewayToken,
    #[error("invalid SMS gateway URL '{value}': {source}")]
    InvalidGatewayUrl {
        value: String,
        source: url::ParseError,
    },
    #[error("SMS sender name must not be empty")]
    MissingSenderName,
    #[error("SMS gateway timeout must be positive, got {value}")]
    InvalidGatewayTimeout { value: u64 },
    #[error("invalid SMS locale: {message}")]
    InvalidSmsLocale { message: String },
    #[error("invalid matcher clock: {message}")]
    InvalidClockMode { message: String },
    #[error("matcher tick interval must be between 10 and 300 seconds, got {value}")]
    InvalidMatcherTickInterval { value: u64 },
    #[error("worker batch size must be between 1 and 100, got {value}")]
    InvalidWorkerBatchSize { value: usize },
    #[error("worker poll interval must be positive, got {value}")]
    InvalidWorkerPollInterval { value: u64 },
    #[error("pending log stale window must be between 1 and 86400 seconds, got {value}")]
    InvalidPendingStaleAfter { value: u64 },
    #[error("queue name must not be empty")]
    MissingQueueName,
    #[error("queue max attempts must be at least 1, got {value}")]
    InvalidQueueMaxAttempts { value: u32 },
    #[error("queue visibility timeout must be between 1 and 43200 seconds, got {value}")]
    InvalidQueueVisibilityTimeout { value: u64 },
    #[error("queue retry max seconds must be at most 86400, got {value}")]
    InvalidQueueRetryMax { value: u64 },
    #[error(
        "queue visibility timeout ({visibility_seconds}s) is shorter than one worker batch ({batch_ms}ms)"
    )]
    VisibilityTimeoutTooShort {
        visibility_seconds: u64,
        batch_ms: u64,
    },
    #[error("queue retry base seconds ({base}) cannot be greater than max seconds ({max})")]
    InvalidQueueRetryBounds { base: u64, max: u64 },
    #[error("queue retry jitter factor must be between 0.0 and 1.0, got {value}")]
    InvalidQueueRetryJitter { value: f64 },
}

/// Loads configuration using layered `.env` files and `REMINDERS_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads and validates configuration.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = take_string(&mut layered, "PROFILE").unwrap_or(profile_hint);

        let sms_locale = match take_string(&mut layered, "SMS_LOCALE") {
            Some(value) => value
                .parse()
                .map_err(|message| ConfigError::InvalidSmsLocale { message })?,
            None => SmsLocale::default(),
        };

        let clock = match take_string(&mut layered, "MATCHER_CLOCK") {
            Some(value) => value
                .parse()
                .map_err(|message| ConfigError::InvalidClockMode { message })?,
            None => ClockMode::default(),
        };

        let config = AppConfig {
            profile,
            log_level: take_string(&mut layered, "LOG_LEVEL").unwrap_or_else(default_log_level),
            log_format: take_string(&mut layered, "LOG_FORMAT").unwrap_or_else(default_log_format),
            database_url: take_string(&mut layered, "DATABASE_URL")
                .unwrap_or_else(default_database_url),
            db_max_connections: take_parsed(&mut layered, "DB_MAX_CONNECTIONS")
                .unwrap_or_else(default_db_max_connections),
            db_acquire_timeout_ms: take_parsed(&mut layered, "DB_ACQUIRE_TIMEOUT_MS")
                .unwrap_or_else(default_db_acquire_timeout_ms),
            sms_locale,
            gateway: GatewayConfig {
                base_url: take_string(&mut layered, "GATEWAY_BASE_URL")
                    .unwrap_or_else(default_gateway_base_url),
                api_token: take_string(&mut layered, "GATEWAY_API_TOKEN")
                    .map(|token| token.trim().to_string()),
                sender_name: take_string(&mut layered, "GATEWAY_SENDER_NAME")
                    .unwrap_or_else(default_gateway_sender_name),
                timeout_ms: take_parsed(&mut layered, "GATEWAY_TIMEOUT_MS")
                    .unwrap_or_else(default_gateway_timeout_ms),
            },
            matcher: MatcherConfig {
                tick_interval_seconds: take_parsed(&mut layered, "MATCHER_TICK_INTERVAL_SECONDS")
                    .unwrap_or_else(default_matcher_tick_interval_seconds),
                clock,
            },
            worker: WorkerConfig {
                poll_interval_ms: take_parsed(&mut layered, "WORKER_POLL_INTERVAL_MS")
                    .unwrap_or_else(default_worker_poll_interval_ms),
                batch_size: take_parsed(&mut layered, "WORKER_BATCH_SIZE")
                    .unwrap_or_else(default_worker_batch_size),
                pacing_ms: take_parsed(&mut layered, "WORKER_PACING_MS")
                    .unwrap_or_else(default_worker_pacing_ms),
                pending_stale_after_seconds: take_parsed(
                    &mut layered,
                    "WORKER_PENDING_STALE_AFTER_SECONDS",
                )
                .unwrap_or_else(default_worker_pending_stale_after_seconds),
            },
            queue: QueueConfig {
                name: take_string(&mut layered, "QUEUE_NAME").unwrap_or_else(default_queue_name),
                visibility_timeout_seconds: take_parsed(
                    &mut layered,
                    "QUEUE_VISIBILITY_TIMEOUT_SECONDS",
                )
                .unwrap_or_else(default_queue_visibility_timeout_seconds),
                max_attempts: take_parsed(&mut layered, "QUEUE_MAX_ATTEMPTS")
                    .unwrap_or_else(default_queue_max_attempts),
                retry_base_seconds: take_parsed(&mut layered, "QUEUE_RETRY_BASE_SECONDS")
                    .unwrap_or_else(default_queue_retry_base_seconds),
                retry_max_seconds: take_parsed(&mut layered, "QUEUE_RETRY_MAX_SECONDS")
                    .unwrap_or_else(default_queue_retry_max_seconds),
                retry_jitter_factor: take_parsed(&mut layered, "QUEUE_RETRY_JITTER_FACTOR")
                    .unwrap_or_else(default_queue_retry_jitter_factor),
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var(format!("{ENV_PREFIX}PROFILE"))
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn take_string(values: &mut BTreeMap<String, String>, key: &str) -> Option<String> {
    values.remove(key).filter(|v| !v.trim().is_empty())
}

fn take_parsed<T: std::str::FromStr>(values: &mut BTreeMap<String, String>, key: &str) -> Option<T> {
    values.remove(key).and_then(|v| v.trim().parse().ok())
}
