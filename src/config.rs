//! Configuration for the queue, retry, and worker layers.
//!
//! Every component takes its tunables from an explicit [`ForgeConfig`] passed
//! to its constructor; there is no process-wide configuration singleton.
//! Values can be loaded from the environment with [`ForgeConfig::from_env`]
//! or set programmatically through the builder methods.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for the queue store, retry policy, and worker pool.
#[derive(Debug, Clone)]
pub struct ForgeConfig {
    // Store settings
    /// Whether to use the durable Redis store instead of the in-memory one.
    pub use_redis: bool,
    /// Redis connection URL.
    pub redis_url: String,
    /// Advisory connection pool size for deployments fronting Redis with a
    /// proxy. The store itself uses one multiplexed connection.
    pub redis_pool_size: usize,
    /// Name of the task list; also the prefix for result and batch keys.
    pub queue_name: String,

    // Worker settings
    /// Number of worker tasks to spawn.
    pub num_workers: usize,
    /// Hard timeout for processing a single task, including retries.
    pub task_timeout: Duration,
    /// How long an idle worker sleeps when the queue is empty.
    pub poll_interval: Duration,
    /// How long a worker backs off after a store error or failed health probe.
    pub error_backoff: Duration,

    // Retry settings
    /// Total backend invocations allowed for transient failures.
    pub retry_attempts: u32,
    /// Minimum wait between retry attempts.
    pub retry_min_wait: Duration,
    /// Maximum wait between retry attempts.
    pub retry_max_wait: Duration,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            use_redis: false,
            redis_url: "redis://localhost:6379/0".to_string(),
            redis_pool_size: 10,
            queue_name: "audio_tasks".to_string(),
            num_workers: 3,
            task_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(1),
            error_backoff: Duration::from_secs(5),
            retry_attempts: 3,
            retry_min_wait: Duration::from_secs(4),
            retry_max_wait: Duration::from_secs(10),
        }
    }
}

impl ForgeConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `USE_REDIS`: Use the durable Redis store (default: false)
    /// - `REDIS_URL`: Redis connection URL (default: redis://localhost:6379/0)
    /// - `REDIS_POOL_SIZE`: Advisory connection pool size (default: 10)
    /// - `QUEUE_NAME`: Task list name (default: audio_tasks)
    /// - `NUM_WORKERS`: Number of workers (default: 3)
    /// - `TASK_TIMEOUT`: Per-task timeout in seconds (default: 300)
    /// - `RETRY_ATTEMPTS`: Backend invocations for transient errors (default: 3)
    /// - `RETRY_MIN_WAIT`: Minimum retry backoff in seconds (default: 4)
    /// - `RETRY_MAX_WAIT`: Maximum retry backoff in seconds (default: 10)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value or the
    /// resulting configuration fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("USE_REDIS") {
            config.use_redis = parse_env_bool(&val, "USE_REDIS")?;
        }

        if let Ok(val) = std::env::var("REDIS_URL") {
            config.redis_url = val;
        }

        if let Ok(val) = std::env::var("REDIS_POOL_SIZE") {
            config.redis_pool_size = parse_env_value(&val, "REDIS_POOL_SIZE")?;
        }

        if let Ok(val) = std::env::var("QUEUE_NAME") {
            config.queue_name = val;
        }

        if let Ok(val) = std::env::var("NUM_WORKERS") {
            config.num_workers = parse_env_value(&val, "NUM_WORKERS")?;
        }

        if let Ok(val) = std::env::var("TASK_TIMEOUT") {
            let secs: u64 = parse_env_value(&val, "TASK_TIMEOUT")?;
            config.task_timeout = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("RETRY_ATTEMPTS") {
            config.retry_attempts = parse_env_value(&val, "RETRY_ATTEMPTS")?;
        }

        if let Ok(val) = std::env::var("RETRY_MIN_WAIT") {
            let secs: u64 = parse_env_value(&val, "RETRY_MIN_WAIT")?;
            config.retry_min_wait = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("RETRY_MAX_WAIT") {
            let secs: u64 = parse_env_value(&val, "RETRY_MAX_WAIT")?;
            config.retry_max_wait = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_workers == 0 {
            return Err(ConfigError::ValidationFailed(
                "num_workers must be greater than 0".to_string(),
            ));
        }

        if self.task_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "task_timeout must be greater than 0".to_string(),
            ));
        }

        if self.retry_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "retry_attempts must be greater than 0".to_string(),
            ));
        }

        if self.retry_min_wait > self.retry_max_wait {
            return Err(ConfigError::ValidationFailed(
                "retry_min_wait must not exceed retry_max_wait".to_string(),
            ));
        }

        if self.queue_name.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "queue_name cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Sets whether the durable Redis store is used.
    pub fn with_use_redis(mut self, use_redis: bool) -> Self {
        self.use_redis = use_redis;
        self
    }

    /// Sets the Redis URL.
    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = url.into();
        self
    }

    /// Sets the queue name.
    pub fn with_queue_name(mut self, name: impl Into<String>) -> Self {
        self.queue_name = name.into();
        self
    }

    /// Sets the number of workers.
    pub fn with_num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    /// Sets the per-task timeout.
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    /// Sets the idle poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the error backoff interval.
    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    /// Sets the retry attempt count.
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    /// Sets the minimum and maximum retry backoff.
    pub fn with_retry_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.retry_min_wait = min;
        self.retry_max_wait = max;
        self
    }
}

/// Parses an environment variable value into the target type.
fn parse_env_value<T: FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parses a boolean environment variable (accepts true/false/1/0).
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean, got '{}'", value),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ForgeConfig::default();

        assert!(!config.use_redis);
        assert_eq!(config.redis_url, "redis://localhost:6379/0");
        assert_eq!(config.queue_name, "audio_tasks");
        assert_eq!(config.num_workers, 3);
        assert_eq!(config.task_timeout, Duration::from_secs(300));
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.retry_min_wait, Duration::from_secs(4));
        assert_eq!(config.retry_max_wait, Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = ForgeConfig::new()
            .with_use_redis(true)
            .with_redis_url("redis://queue:6380/1")
            .with_queue_name("tts_jobs")
            .with_num_workers(8)
            .with_task_timeout(Duration::from_secs(60))
            .with_poll_interval(Duration::from_millis(250))
            .with_retry_attempts(5)
            .with_retry_backoff(Duration::from_secs(1), Duration::from_secs(30));

        assert!(config.use_redis);
        assert_eq!(config.redis_url, "redis://queue:6380/1");
        assert_eq!(config.queue_name, "tts_jobs");
        assert_eq!(config.num_workers, 8);
        assert_eq!(config.task_timeout, Duration::from_secs(60));
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.retry_attempts, 5);
        assert_eq!(config.retry_max_wait, Duration::from_secs(30));
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let config = ForgeConfig::new().with_num_workers(0);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("num_workers"));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = ForgeConfig::new().with_task_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_backoff() {
        let config =
            ForgeConfig::new().with_retry_backoff(Duration::from_secs(10), Duration::from_secs(4));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("retry_min_wait"));
    }

    #[test]
    fn test_parse_env_bool() {
        assert!(parse_env_bool("true", "K").unwrap());
        assert!(parse_env_bool("1", "K").unwrap());
        assert!(!parse_env_bool("false", "K").unwrap());
        assert!(!parse_env_bool("no", "K").unwrap());
        assert!(parse_env_bool("maybe", "K").is_err());
    }

    #[test]
    fn test_parse_env_value_error_names_key() {
        let err = parse_env_value::<u32>("abc", "NUM_WORKERS").unwrap_err();
        assert!(err.to_string().contains("NUM_WORKERS"));
    }
}
