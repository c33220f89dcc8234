//! Configuration for the orchestration runtime
//!
//! One aggregate [`RuntimeConfig`] covers every tunable: the master agent's
//! conversational surface, retry/backoff, admission control, session TTLs,
//! and anomaly thresholds. Instances are built explicitly and passed down at
//! construction time; nothing reads configuration from globals.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{OrchestratorError, Result};

/// Master agent conversational configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterConfig {
    /// Greeting prefixed to the first reply of a session when the intent is
    /// unclear
    pub greeting: String,

    /// Reply used when a guardrail refuses the input
    pub fallback_message: String,

    /// Phrases that trigger the input guardrail
    pub banned_phrases: Vec<String>,

    /// How many history turns are embedded into a dispatched request context
    pub context_window: usize,

    /// Deadline for a routed sub-agent request
    pub request_timeout: Duration,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            greeting: "Hello! Thanks for calling.".to_string(),
            fallback_message: "I'm sorry, I can't help with that request.".to_string(),
            banned_phrases: vec![],
            request_timeout: Duration::from_secs(10),
            context_window: 6,
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries
    pub max_retries: usize,

    /// Exponential backoff multiplier
    pub backoff_multiplier: f32,

    /// Jitter to add randomness to retries
    pub jitter: bool,

    /// Initial retry delay
    pub initial_delay: Duration,

    /// Maximum retry delay
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Admission control configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed per identifier per window
    pub max_requests: usize,

    /// Optional burst allowance on top of `max_requests`
    pub burst_size: Option<usize>,

    /// Window length
    pub window: Duration,

    /// Idle buckets older than this are swept
    pub stale_after: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window: Duration::from_secs(60),
            burst_size: None,
            stale_after: Duration::from_secs(600),
        }
    }
}

/// Session lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Cap on retained history entries per session
    pub history_cap: usize,

    /// TTL for ephemeral sessions
    pub ephemeral_ttl: Duration,

    /// TTL for ordinary sessions
    pub session_ttl: Duration,

    /// TTL for long-term sessions
    pub long_term_ttl: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history_cap: 50,
            ephemeral_ttl: Duration::from_secs(300),
            session_ttl: Duration::from_secs(3600),
            long_term_ttl: Duration::from_secs(86_400 * 30),
        }
    }
}

/// Anomaly detection thresholds, each a percentage above baseline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Latency increase (%) over baseline flagged as a spike
    pub latency_threshold_pct: f64,

    /// Error-rate increase (%) over baseline flagged as a spike
    pub error_threshold_pct: f64,

    /// Timeout-count increase (%) over baseline flagged
    pub timeout_threshold_pct: f64,

    /// Message-volume deviation (%) from baseline flagged as unusual
    pub volume_threshold_pct: f64,

    /// Aggregation window for current metrics
    pub window: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(300),
            latency_threshold_pct: 50.0,
            error_threshold_pct: 100.0,
            timeout_threshold_pct: 100.0,
            volume_threshold_pct: 200.0,
        }
    }
}

/// Aggregate runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub master: MasterConfig,
    pub retry: RetryConfig,
    pub rate_limit: RateLimitConfig,
    pub session: SessionConfig,
    pub monitor: MonitorConfig,
}

/// Configuration builder
pub struct ConfigBuilder {
    config: RuntimeConfig,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
        }
    }

    pub fn greeting(mut self, greeting: impl Into<String>) -> Self {
        self.config.master.greeting = greeting.into();
        self
    }

    pub fn fallback_message(mut self, message: impl Into<String>) -> Self {
        self.config.master.fallback_message = message.into();
        self
    }

    pub fn banned_phrases(mut self, phrases: Vec<String>) -> Self {
        self.config.master.banned_phrases = phrases;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.master.request_timeout = timeout;
        self
    }

    pub fn max_retries(mut self, retries: usize) -> Self {
        self.config.retry.max_retries = retries;
        self
    }

    pub fn rate_limit(mut self, max_requests: usize, window: Duration) -> Self {
        self.config.rate_limit.max_requests = max_requests;
        self.config.rate_limit.window = window;
        self
    }

    pub fn history_cap(mut self, cap: usize) -> Self {
        self.config.session.history_cap = cap;
        self
    }

    pub fn build(self) -> RuntimeConfig {
        self.config
    }
}

/// Load configuration from environment variables, starting from defaults.
pub fn from_env() -> RuntimeConfig {
    let mut config = RuntimeConfig::default();

    if let Ok(greeting) = std::env::var("SWITCHBOARD_GREETING") {
        config.master.greeting = greeting;
    }

    if let Ok(timeout) = std::env::var("SWITCHBOARD_REQUEST_TIMEOUT_MS") {
        if let Ok(ms) = timeout.parse::<u64>() {
            config.master.request_timeout = Duration::from_millis(ms);
        }
    }

    if let Ok(retries) = std::env::var("SWITCHBOARD_MAX_RETRIES") {
        if let Ok(n) = retries.parse::<usize>() {
            config.retry.max_retries = n;
        }
    }

    if let Ok(max) = std::env::var("SWITCHBOARD_RATE_LIMIT") {
        if let Ok(n) = max.parse::<usize>() {
            config.rate_limit.max_requests = n;
        }
    }

    config
}

/// Load configuration from a TOML file.
pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<RuntimeConfig> {
    let contents = std::fs::read_to_string(path)?;
    toml::from_str(&contents).map_err(|e| OrchestratorError::Config(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = RuntimeConfig::default();
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.rate_limit.max_requests, 60);
        assert!(config.session.session_ttl > config.session.ephemeral_ttl);
        assert_eq!(config.master.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn builder_overrides() {
        let config = ConfigBuilder::new()
            .greeting("Welcome to Acme Hotels.")
            .banned_phrases(vec!["forbidden".to_string()])
            .request_timeout(Duration::from_millis(500))
            .rate_limit(5, Duration::from_secs(1))
            .history_cap(10)
            .build();

        assert_eq!(config.master.greeting, "Welcome to Acme Hotels.");
        assert_eq!(config.master.banned_phrases.len(), 1);
        assert_eq!(config.master.request_timeout, Duration::from_millis(500));
        assert_eq!(config.rate_limit.max_requests, 5);
        assert_eq!(config.session.history_cap, 10);
    }

    #[test]
    fn toml_round_trip() {
        let config = ConfigBuilder::new().greeting("Hi there.").build();
        let serialized = toml::to_string(&config).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("switchboard.toml");
        std::fs::write(&path, serialized).unwrap();

        let loaded = from_file(&path).unwrap();
        assert_eq!(loaded.master.greeting, "Hi there.");
        assert_eq!(loaded.retry.max_retries, config.retry.max_retries);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = from_file("/nonexistent/switchboard.toml").unwrap_err();
        assert!(matches!(err, OrchestratorError::Io(_)));
    }
}
