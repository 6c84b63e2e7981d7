// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for replicated caches.
//!
//! Errors are categorized by where they originate (construction, caller input,
//! the backing store, the bus) and carry enough context to be logged without
//! the surrounding call site.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `Store` | Yes | Redis command rejected, connection dropped mid-transaction |
//! | `Connection` | Yes | Producer or consumer handle could not be established |
//! | `Subscription` | Yes | The bus subscription closed underneath a replica |
//! | `ReloadTimeout` | Yes | `initialize` did not observe its own reload in time |
//! | `Config` | No | Invalid key, topic, URL or options |
//! | `Validation` | No | Codec hooks returned a malformed shape |
//! | `Codec` | No | A stored value could not be revived |
//! | `Decode` | No | Malformed bus envelope |
//! | `Shutdown` | No | The replica was dropped while a caller waited on it |
//!
//! # Where errors surface
//!
//! Errors from direct calls (`set`, `delete`, `clear`, `load`, `initialize`)
//! are returned to the caller. Errors that originate in inbound replication
//! (a reload triggered by another process, a malformed envelope) are never
//! raised inside the delivery task; they are handed to the replica's error
//! listeners instead.

use thiserror::Error;

/// Result type alias for replica operations.
pub type Result<T> = std::result::Result<T, ReplicaError>;

/// Errors that can occur while constructing or operating a replica.
#[derive(Error, Debug)]
pub enum ReplicaError {
    /// Backing store command or transaction failure.
    ///
    /// Raised to the direct caller of a store-touching operation, or to the
    /// error listeners when it happens while handling a reload announcement.
    #[error("Store error ({operation}): {message}")]
    Store {
        operation: String,
        message: String,
        #[source]
        source: Option<redis::RedisError>,
    },

    /// A long-lived handle (producer or consumer) could not be opened.
    #[error("Connection error ({direction}): {message}")]
    Connection { direction: String, message: String },

    /// Invalid construction input: empty topic or key, bad URL, bad options.
    ///
    /// Not retryable - fix the configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Codec hooks produced a malformed shape, or a command argument list
    /// is unusable. Raised before any command is sent.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A stored string could not be turned back into a domain value (or a
    /// domain value could not be serialized).
    #[error("Codec error: {0}")]
    Codec(String),

    /// A bus message is not a valid envelope.
    #[error("Envelope decode error: {0}")]
    Decode(String),

    /// The initialize barrier did not resolve within the configured timeout.
    ///
    /// The store write and announcement may still have been applied; only
    /// the local confirmation is missing.
    #[error("Reload barrier timed out on topic {topic} after {timeout_ms}ms")]
    ReloadTimeout { topic: String, timeout_ms: u64 },

    /// The bus stopped delivering messages for a topic.
    #[error("Subscription error ({topic}): {message}")]
    Subscription { topic: String, message: String },

    /// The replica was dropped while an operation was waiting on it.
    #[error("Replica shut down")]
    Shutdown,
}

impl ReplicaError {
    /// Create a store error from a redis::RedisError
    pub fn store(operation: impl Into<String>, source: redis::RedisError) -> Self {
        Self::Store {
            operation: operation.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a store error without source
    pub fn store_msg(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Store {
            operation: operation.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a codec error from any displayable cause.
    pub fn codec(cause: impl std::fmt::Display) -> Self {
        Self::Codec(cause.to_string())
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store { .. } => true,
            Self::Connection { .. } => true,
            Self::Subscription { .. } => true,
            Self::ReloadTimeout { .. } => true,
            Self::Config(_) => false,
            Self::Validation(_) => false,
            Self::Codec(_) => false,
            Self::Decode(_) => false,
            Self::Shutdown => false,
        }
    }

    /// Short label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Store { .. } => "store",
            Self::Connection { .. } => "connection",
            Self::Config(_) => "config",
            Self::Validation(_) => "validation",
            Self::Codec(_) => "codec",
            Self::Decode(_) => "decode",
            Self::ReloadTimeout { .. } => "reload_timeout",
            Self::Subscription { .. } => "subscription",
            Self::Shutdown => "shutdown",
        }
    }
}

impl From<redis::RedisError> for ReplicaError {
    fn from(e: redis::RedisError) -> Self {
        Self::store("unknown", e)
    }
}
