// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Single-value cache.
//!
//! One store key holds one serialized value. The in-memory state is `None`
//! until something is loaded, and again after a clear.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> replica_cache::Result<()> {
//! use replica_cache::caches::ValueCache;
//! use replica_cache::config::{RedisConfig, ValueCacheOptions};
//! use replica_cache::connection::Connections;
//!
//! let connections = Connections::redis(RedisConfig::default())?;
//! let limits: ValueCache<u32> =
//!     ValueCache::new(&connections, ValueCacheOptions::new("rate-limit", "rate-limit:events")).await?;
//!
//! limits.set(&500).await?;
//! # Ok(())
//! # }
//! ```

use crate::codec::{JsonCodec, ValueArgs, ValueCodec};
use crate::config::ValueCacheOptions;
use crate::connection::Connections;
use crate::envelope::OpTag;
use crate::error::{ReplicaError, Result};
use crate::replica::{ListenerId, Operation, Replica, ReplicaVariant, VariantOperation};
use crate::store::{single_reply, Command, Reply};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::marker::PhantomData;
use tokio::sync::watch;

/// Reducer for a single stored value.
pub struct ValueReducer<T, C> {
    key: String,
    codec: C,
    _value: PhantomData<fn() -> T>,
}

impl<T, C> ValueReducer<T, C> {
    pub fn new(key: impl Into<String>, codec: C) -> Self {
        Self {
            key: key.into(),
            codec,
            _value: PhantomData,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }
}

impl<T, C> ReplicaVariant for ValueReducer<T, C>
where
    T: Clone + Send + Sync + 'static,
    C: ValueCodec<T>,
{
    type State = Option<T>;
    type Load = Option<String>;
    /// Serialized value.
    type Set = String;
    type Delete = ();

    fn kind(&self) -> &'static str {
        "value"
    }

    fn initial_state(&self) -> Option<T> {
        None
    }

    fn supports(&self, tag: OpTag) -> bool {
        tag != OpTag::Delete
    }

    fn load_commands(&self) -> Vec<Command> {
        vec![Command::Get {
            key: self.key.clone(),
        }]
    }

    fn clear_commands(&self) -> Vec<Command> {
        vec![Command::Del {
            key: self.key.clone(),
        }]
    }

    fn parse_load(&self, replies: Vec<Reply>) -> Result<Option<String>> {
        single_reply(replies, "GET")?.into_value()
    }

    fn reduce(&self, state: &Option<T>, operation: VariantOperation<Self>) -> Result<Option<T>> {
        match operation {
            Operation::Load(raw) => raw.map(|raw| self.codec.revive(&raw)).transpose(),
            Operation::Set(raw) => self.codec.revive(&raw).map(Some),
            Operation::Clear => Ok(None),
            Operation::Delete(()) => Ok(state.clone()),
        }
    }
}

/// A replicated single value of type `T`.
pub struct ValueCache<T, C = JsonCodec>
where
    T: Clone + Send + Sync + 'static,
    C: ValueCodec<T>,
{
    replica: Replica<ValueReducer<T, C>>,
}

impl<T> ValueCache<T, JsonCodec>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Create a JSON-encoded value cache.
    pub async fn new(connections: &Connections, options: ValueCacheOptions) -> Result<Self> {
        Self::with_codec(connections, options, JsonCodec).await
    }
}

impl<T, C> ValueCache<T, C>
where
    T: Clone + Send + Sync + 'static,
    C: ValueCodec<T>,
{
    /// Create a value cache with a custom codec.
    ///
    /// Subscribes before returning and, if `options.load` is set, reads the
    /// current value from the store.
    pub async fn with_codec(connections: &Connections, options: ValueCacheOptions, codec: C) -> Result<Self> {
        options.cache.validate()?;
        let reload_timeout = options.cache.reload_timeout_duration();
        let variant = ValueReducer::new(options.cache.key, codec);
        let replica = Replica::new(connections, options.cache.topic, variant, reload_timeout).await?;

        if options.load {
            replica.load().await?;
        }
        Ok(Self { replica })
    }

    pub fn key(&self) -> &str {
        self.replica.variant().key()
    }

    pub fn topic(&self) -> &str {
        self.replica.topic()
    }

    /// Current value, `None` if absent or not loaded.
    pub fn get(&self) -> Option<T> {
        self.replica.get()
    }

    pub fn state_receiver(&self) -> watch::Receiver<Option<T>> {
        self.replica.state_receiver()
    }

    pub fn subscribe(&self, listener: impl Fn(&Option<T>) + Send + Sync + 'static) -> ListenerId {
        self.replica.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.replica.unsubscribe(id)
    }

    pub fn on_error(&self, listener: impl Fn(&ReplicaError) + Send + Sync + 'static) -> ListenerId {
        self.replica.on_error(listener)
    }

    /// Re-read the value from the store (local only).
    pub async fn load(&self) -> Result<()> {
        self.replica.load().await
    }

    /// Replace the stored value and wait until this cache has reloaded it.
    pub async fn initialize(&self, value: &T) -> Result<()> {
        let args = self.compose(value)?;
        self.replica
            .initialize(vec![Command::Set {
                key: self.key().to_string(),
                args: args.into_args(),
            }])
            .await
    }

    /// Delete the stored value; with `broadcast`, every replica resets to `None`.
    pub async fn clear(&self, broadcast: bool) -> Result<()> {
        self.replica.clear(broadcast).await
    }

    /// Store `value` and announce it. Visible locally once the announcement
    /// comes back.
    pub async fn set(&self, value: &T) -> Result<()> {
        let args = self.compose(value)?;
        let payload = Value::String(args.value().to_string());
        let write = Command::Set {
            key: self.key().to_string(),
            args: args.into_args(),
        };
        self.replica.publish(OpTag::Set, Some(payload), vec![write]).await
    }

    /// Leave the topic.
    pub async fn shutdown(&self) -> Result<()> {
        self.replica.shutdown().await
    }

    fn compose(&self, value: &T) -> Result<ValueArgs> {
        ValueArgs::from_composed(self.replica.variant().codec().compose(value)?)
    }
}
