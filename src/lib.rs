//! # Replica Cache
//!
//! In-process caches of Redis-held state, kept consistent across any number
//! of processes by replaying small mutation announcements over pub/sub.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────── process A ───────────────┐      ┌──────── process B ────────┐
//! │  ValueCache / HashCache                 │      │  ValueCache / HashCache   │
//! │        │ set / delete / initialize      │      │        ▲                  │
//! │        ▼                                │      │        │ reduce + notify  │
//! │  Replica ──► Store: MULTI write+PUBLISH─┼──┐   │  Replica (message loop)   │
//! │     ▲                                   │  │   │        ▲                  │
//! │     └── message loop ◄── Bus ◄──────────┼──┼───┼── Bus ─┘                  │
//! └─────────────────────────────────────────┘  │   └───────────────────────────┘
//!                                              ▼
//!                                 Redis (authoritative copy + channel)
//! ```
//!
//! Writes go to the store and are announced in the same transaction. Every
//! replica on the topic, the writer included, applies the announcement
//! through the same pure reducer, so all of them see the same operations in
//! the same order.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use replica_cache::{Connections, HashCache, CacheOptions, RedisConfig};
//! use std::collections::HashMap;
//!
//! #[tokio::main]
//! async fn main() -> replica_cache::Result<()> {
//!     let connections = Connections::redis(RedisConfig::default())?;
//!     let flags: HashCache<bool> =
//!         HashCache::new(&connections, CacheOptions::new("flags", "flags:events")).await?;
//!
//!     flags.on_error(|e| eprintln!("replication failed: {e}"));
//!     flags.initialize(&HashMap::from([("beta".to_string(), false)])).await?;
//!     flags.set("beta", &true).await?;
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod caches;
pub mod codec;
pub mod config;
pub mod connection;
pub mod envelope;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod replica;
pub mod resilience;
pub mod store;

// Re-exports for convenience
pub use caches::{HashCache, ValueCache};
pub use codec::{FieldCodec, JsonCodec, ValueCodec};
pub use config::{CacheOptions, RedisConfig, ValueCacheOptions};
pub use connection::Connections;
pub use envelope::{Envelope, OpTag};
pub use error::{ReplicaError, Result};
pub use memory::MemoryBackend;
pub use replica::{ListenerId, Operation, Replica, ReplicaVariant};
pub use store::{Command, Reply};
