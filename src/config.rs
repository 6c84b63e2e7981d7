// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for connections and caches.
//!
//! Configuration can be constructed programmatically or deserialized from
//! YAML/JSON. Durations are human-readable strings (`"5s"`, `"250ms"`) parsed
//! with `humantime`; an unparseable duration falls back to a preset
//! (the startup retry schedule for connections, 30s for reloads).
//!
//! # Configuration Structure
//!
//! ```text
//! RedisConfig                       # one per process, shared by every cache
//! ├── url: String
//! ├── connection_timeout: String
//! └── max_connect_attempts / initial_backoff / max_backoff / backoff_factor
//!
//! CacheOptions                      # one per cache
//! ├── key: String                   # store key (value) or hash key (hash)
//! ├── topic: String                 # bus topic carrying announcements
//! └── reload_timeout: Option<String>
//!
//! ValueCacheOptions
//! ├── (CacheOptions, flattened)
//! └── load: bool                    # load eagerly at construction
//! ```
//!
//! # YAML Example
//!
//! ```yaml
//! redis:
//!   url: "redis://cache.internal:6379"
//!   connection_timeout: "5s"
//!
//! feature_flags:
//!   key: "flags"
//!   topic: "flags:events"
//!   reload_timeout: "10s"
//!   load: true
//! ```

use crate::error::{ReplicaError, Result};
use crate::resilience::RetryConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_RELOAD_TIMEOUT: Duration = Duration::from_secs(30);

// ═══════════════════════════════════════════════════════════════════════════════
// RedisConfig: how the shared handles are opened
// ═══════════════════════════════════════════════════════════════════════════════

/// Connection settings for the Redis instance holding the authoritative state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis URL, e.g. `"redis://localhost:6379"`.
    pub url: String,

    /// Timeout for a single connection attempt.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: String,

    /// Attempts before giving up on opening a handle.
    #[serde(default = "default_max_connect_attempts")]
    pub max_connect_attempts: usize,

    /// First retry delay.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff: String,

    /// Ceiling for the retry delay.
    #[serde(default = "default_max_backoff")]
    pub max_backoff: String,

    /// Multiplier applied to the delay after each failed attempt.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

fn default_connection_timeout() -> String {
    humantime::format_duration(RetryConfig::default().connection_timeout).to_string()
}

fn default_max_connect_attempts() -> usize {
    RetryConfig::default().max_attempts
}

fn default_initial_backoff() -> String {
    humantime::format_duration(RetryConfig::default().initial_delay).to_string()
}

fn default_max_backoff() -> String {
    humantime::format_duration(RetryConfig::default().max_delay).to_string()
}

fn default_backoff_factor() -> f64 {
    RetryConfig::default().backoff_factor
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            connection_timeout: default_connection_timeout(),
            max_connect_attempts: default_max_connect_attempts(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

impl RedisConfig {
    /// Config pointing at `url` with fast-failing retries, for tests.
    pub fn for_testing(url: &str) -> Self {
        let retry = RetryConfig::testing();
        Self {
            url: url.to_string(),
            connection_timeout: "500ms".to_string(),
            max_connect_attempts: retry.max_attempts,
            initial_backoff: "10ms".to_string(),
            max_backoff: "100ms".to_string(),
            backoff_factor: retry.backoff_factor,
        }
    }

    /// Build the retry policy used when opening handles.
    ///
    /// Handles are opened at startup, so a value that does not parse falls
    /// back to the [`RetryConfig::startup`] schedule.
    pub fn retry_config(&self) -> RetryConfig {
        let defaults = RetryConfig::startup();
        RetryConfig {
            max_attempts: self.max_connect_attempts.max(1),
            initial_delay: parse_or(&self.initial_backoff, defaults.initial_delay),
            max_delay: parse_or(&self.max_backoff, defaults.max_delay),
            backoff_factor: if self.backoff_factor >= 1.0 {
                self.backoff_factor
            } else {
                defaults.backoff_factor
            },
            connection_timeout: parse_or(&self.connection_timeout, defaults.connection_timeout),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CacheOptions: one entry per cache
// ═══════════════════════════════════════════════════════════════════════════════

/// Options shared by both cache variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheOptions {
    /// Store key (value cache) or hash key (hash cache).
    pub key: String,

    /// Bus topic on which this cache's announcements travel.
    pub topic: String,

    /// How long `initialize` waits for its own reload to round-trip.
    ///
    /// `None` waits forever: a lost announcement then stalls `initialize`
    /// indefinitely.
    #[serde(default = "default_reload_timeout")]
    pub reload_timeout: Option<String>,
}

fn default_reload_timeout() -> Option<String> {
    Some("30s".to_string())
}

impl CacheOptions {
    /// Options with the default reload timeout.
    pub fn new(key: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            topic: topic.into(),
            reload_timeout: default_reload_timeout(),
        }
    }

    /// Short reload timeout, for tests.
    pub fn for_testing(key: &str, topic: &str) -> Self {
        Self {
            key: key.to_string(),
            topic: topic.to_string(),
            reload_timeout: Some("2s".to_string()),
        }
    }

    /// Replace the reload timeout (`None` disables it).
    pub fn with_reload_timeout(mut self, timeout: Option<&str>) -> Self {
        self.reload_timeout = timeout.map(str::to_string);
        self
    }

    /// Parse the reload timeout. Unparseable values fall back to 30 seconds.
    pub fn reload_timeout_duration(&self) -> Option<Duration> {
        self.reload_timeout
            .as_deref()
            .map(|raw| parse_or(raw, DEFAULT_RELOAD_TIMEOUT))
    }

    /// Reject empty keys and topics.
    pub fn validate(&self) -> Result<()> {
        if self.key.is_empty() {
            return Err(ReplicaError::Config("cache key must be a non-empty string".into()));
        }
        if self.topic.is_empty() {
            return Err(ReplicaError::Config("cache topic must be a non-empty string".into()));
        }
        Ok(())
    }
}

/// Options for a value cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueCacheOptions {
    #[serde(flatten)]
    pub cache: CacheOptions,

    /// Load the current value from the store during construction.
    #[serde(default = "default_true")]
    pub load: bool,
}

fn default_true() -> bool {
    true
}

impl ValueCacheOptions {
    /// Options that load eagerly, with the default reload timeout.
    pub fn new(key: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            cache: CacheOptions::new(key, topic),
            load: true,
        }
    }

    /// Short reload timeout, for tests.
    pub fn for_testing(key: &str, topic: &str) -> Self {
        Self {
            cache: CacheOptions::for_testing(key, topic),
            load: true,
        }
    }

    /// Skip (or request) the eager load at construction.
    pub fn with_load(mut self, load: bool) -> Self {
        self.load = load;
        self
    }
}

fn parse_or(raw: &str, fallback: Duration) -> Duration {
    humantime::parse_duration(raw).unwrap_or(fallback)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_config_default() {
        let config = RedisConfig::default();
        assert_eq!(config.url, "redis://127.0.0.1:6379");
        assert_eq!(config.connection_timeout, "5s");
        assert_eq!(config.initial_backoff, "100ms");
        assert_eq!(config.max_backoff, "30s");
        assert_eq!(config.max_connect_attempts, 10);
    }

    #[test]
    fn test_redis_retry_config_parsing() {
        let config = RedisConfig {
            url: "redis://host:6379".to_string(),
            connection_timeout: "2s".to_string(),
            max_connect_attempts: 4,
            initial_backoff: "50ms".to_string(),
            max_backoff: "1m".to_string(),
            backoff_factor: 3.0,
        };
        let retry = config.retry_config();
        assert_eq!(retry.max_attempts, 4);
        assert_eq!(retry.initial_delay, Duration::from_millis(50));
        assert_eq!(retry.max_delay, Duration::from_secs(60));
        assert_eq!(retry.backoff_factor, 3.0);
        assert_eq!(retry.connection_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_redis_retry_config_invalid_fallback() {
        let config = RedisConfig {
            connection_timeout: "soon".to_string(),
            max_connect_attempts: 0,
            backoff_factor: 0.5,
            ..Default::default()
        };
        let retry = config.retry_config();
        let startup = RetryConfig::startup();
        assert_eq!(retry.connection_timeout, startup.connection_timeout);
        assert_eq!(retry.max_attempts, 1);
        assert_eq!(retry.backoff_factor, startup.backoff_factor);
        // Parseable defaults are kept
        assert_eq!(retry.initial_delay, Duration::from_millis(100));
    }

    #[test]
    fn test_reload_timeout_various_formats() {
        let test_cases = [
            ("5s", Duration::from_secs(5)),
            ("1m", Duration::from_secs(60)),
            ("500ms", Duration::from_millis(500)),
            ("2min", Duration::from_secs(120)),
        ];

        for (input, expected) in test_cases {
            let options = CacheOptions::new("k", "t").with_reload_timeout(Some(input));
            assert_eq!(
                options.reload_timeout_duration(),
                Some(expected),
                "Failed for input: {}",
                input
            );
        }
    }

    #[test]
    fn test_reload_timeout_invalid_fallback() {
        let options = CacheOptions::new("k", "t").with_reload_timeout(Some("invalid"));
        assert_eq!(options.reload_timeout_duration(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_reload_timeout_disabled() {
        let options = CacheOptions::new("k", "t").with_reload_timeout(None);
        assert_eq!(options.reload_timeout_duration(), None);
    }

    #[test]
    fn test_validate_rejects_empty_key_and_topic() {
        assert!(CacheOptions::new("k", "t").validate().is_ok());

        let err = CacheOptions::new("", "t").validate().unwrap_err();
        assert!(matches!(err, ReplicaError::Config(_)));

        let err = CacheOptions::new("k", "").validate().unwrap_err();
        assert!(err.to_string().contains("topic"));
    }

    #[test]
    fn test_value_cache_options_default_load() {
        let options = ValueCacheOptions::new("k", "t");
        assert!(options.load);
        assert!(!options.with_load(false).load);
    }

    #[test]
    fn test_value_cache_options_json_flattened() {
        let json = r#"{"key":"flags","topic":"flags:events","load":false}"#;
        let parsed: ValueCacheOptions = serde_json::from_str(json).unwrap();

        assert_eq!(parsed.cache.key, "flags");
        assert_eq!(parsed.cache.topic, "flags:events");
        assert!(!parsed.load);
        // Missing reload_timeout takes the default
        assert_eq!(parsed.cache.reload_timeout.as_deref(), Some("30s"));
    }

    #[test]
    fn test_cache_options_json_null_timeout() {
        let json = r#"{"key":"users","topic":"users:events","reload_timeout":null}"#;
        let parsed: CacheOptions = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.reload_timeout_duration(), None);
    }

    #[test]
    fn test_redis_config_json_roundtrip() {
        let config = RedisConfig::for_testing("redis://127.0.0.1:7000");
        let json = serde_json::to_string(&config).unwrap();
        let parsed: RedisConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.url, "redis://127.0.0.1:7000");
        assert_eq!(parsed.connection_timeout, "500ms");
        assert_eq!(parsed.max_connect_attempts, 3);
    }

    #[test]
    fn test_redis_config_json_defaults() {
        let parsed: RedisConfig = serde_json::from_str(r#"{"url":"redis://x:1"}"#).unwrap();
        assert_eq!(parsed.initial_backoff, "100ms");
        assert_eq!(parsed.max_backoff, "30s");
        assert_eq!(parsed.backoff_factor, 2.0);
    }
}
