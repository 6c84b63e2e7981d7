// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Field cache over one store hash.
//!
//! The in-memory state is a map from field key to value. A `load` replaces
//! the whole map with what the store holds: fields removed elsewhere
//! disappear rather than lingering.
//!
//! Field names pass through the codec both ways, so the key used in memory
//! may differ from the field name stored in the hash (see
//! [`FieldCodec::compose_field`] and [`FieldCodec::revive_field`]).

use crate::codec::{FieldArgs, FieldCodec, JsonCodec};
use crate::config::CacheOptions;
use crate::connection::Connections;
use crate::error::{ReplicaError, Result};
use crate::replica::{ListenerId, Operation, Replica, ReplicaVariant, VariantOperation};
use crate::envelope::OpTag;
use crate::store::{single_reply, Command, Reply};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::marker::PhantomData;
use tokio::sync::watch;

/// Reducer for a hash of fields.
pub struct HashReducer<T, C> {
    key: String,
    codec: C,
    _value: PhantomData<fn() -> T>,
}

impl<T, C> HashReducer<T, C> {
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

impl<T, C: FieldCodec<T>> HashReducer<T, C> {
    fn revive(&self, field: &str, raw: &str) -> Result<(String, T)> {
        Ok((self.codec.revive_field(field), self.codec.revive_value(raw)?))
    }
}

impl<T, C> ReplicaVariant for HashReducer<T, C>
where
    T: Clone + Send + Sync + 'static,
    C: FieldCodec<T>,
{
    type State = HashMap<String, T>;
    /// Raw field/value pairs.
    type Load = Vec<(String, String)>;
    /// Raw `[field, value]`.
    type Set = (String, String);
    /// Raw field name.
    type Delete = String;

    fn kind(&self) -> &'static str {
        "hash"
    }

    fn initial_state(&self) -> HashMap<String, T> {
        HashMap::new()
    }

    fn load_commands(&self) -> Vec<Command> {
        vec![Command::HGetAll {
            key: self.key.clone(),
        }]
    }

    fn clear_commands(&self) -> Vec<Command> {
        vec![Command::Del {
            key: self.key.clone(),
        }]
    }

    fn parse_load(&self, replies: Vec<Reply>) -> Result<Vec<(String, String)>> {
        single_reply(replies, "HGETALL")?.into_fields()
    }

    fn reduce(
        &self,
        state: &HashMap<String, T>,
        operation: VariantOperation<Self>,
    ) -> Result<HashMap<String, T>> {
        match operation {
            Operation::Load(fields) => fields
                .iter()
                .map(|(field, raw)| self.revive(field, raw))
                .collect(),
            Operation::Set((field, raw)) => {
                let (key, value) = self.revive(&field, &raw)?;
                let mut next = state.clone();
                next.insert(key, value);
                Ok(next)
            }
            Operation::Delete(field) => {
                let mut next = state.clone();
                next.remove(&self.codec.revive_field(&field));
                Ok(next)
            }
            Operation::Clear => Ok(HashMap::new()),
        }
    }
}

/// A replicated map of fields to values of type `T`.
pub struct HashCache<T, C = JsonCodec>
where
    T: Clone + Send + Sync + 'static,
    C: FieldCodec<T>,
{
    replica: Replica<HashReducer<T, C>>,
}

impl<T> HashCache<T, JsonCodec>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Create a JSON-encoded hash cache. Nothing is loaded yet.
    pub async fn new(connections: &Connections, options: CacheOptions) -> Result<Self> {
        Self::with_codec(connections, options, JsonCodec).await
    }
}

impl<T, C> HashCache<T, C>
where
    T: Clone + Send + Sync + 'static,
    C: FieldCodec<T>,
{
    pub async fn with_codec(connections: &Connections, options: CacheOptions, codec: C) -> Result<Self> {
        options.validate()?;
        let reload_timeout = options.reload_timeout_duration();
        let variant = HashReducer::new(options.key, codec);
        let replica = Replica::new(connections, options.topic, variant, reload_timeout).await?;
        Ok(Self { replica })
    }

    pub fn key(&self) -> &str {
        self.replica.variant().key()
    }

    pub fn topic(&self) -> &str {
        self.replica.topic()
    }

    /// Snapshot of every field.
    pub fn get(&self) -> HashMap<String, T> {
        self.replica.get()
    }

    /// Current value of one field.
    pub fn get_field(&self, key: &str) -> Option<T> {
        self.state_receiver().borrow().get(key).cloned()
    }

    pub fn state_receiver(&self) -> watch::Receiver<HashMap<String, T>> {
        self.replica.state_receiver()
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&HashMap<String, T>) + Send + Sync + 'static,
    ) -> ListenerId {
        self.replica.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.replica.unsubscribe(id)
    }

    pub fn on_error(&self, listener: impl Fn(&ReplicaError) + Send + Sync + 'static) -> ListenerId {
        self.replica.on_error(listener)
    }

    /// Re-read the hash from the store (local only).
    pub async fn load(&self) -> Result<()> {
        self.replica.load().await
    }

    /// Replace the whole hash with `values` and wait until this cache has
    /// reloaded it.
    ///
    /// Every value is composed before anything is written, so a codec
    /// failure leaves the store untouched. An empty map just clears.
    pub async fn initialize(&self, values: &HashMap<String, T>) -> Result<()> {
        let mut args = Vec::with_capacity(values.len() * 2);
        for (field, value) in values {
            args.extend(self.compose(field, value)?.into_args());
        }

        let writes = if args.is_empty() {
            Vec::new()
        } else {
            vec![Command::HSet {
                key: self.key().to_string(),
                args,
            }]
        };
        self.replica.initialize(writes).await
    }

    /// Delete the hash; with `broadcast`, every replica resets to empty.
    pub async fn clear(&self, broadcast: bool) -> Result<()> {
        self.replica.clear(broadcast).await
    }

    /// Store one field and announce it.
    pub async fn set(&self, field: &str, value: &T) -> Result<()> {
        let args = self.compose(field, value)?;
        let payload = Value::from(vec![args.field().to_string(), args.value().to_string()]);
        let write = Command::HSet {
            key: self.key().to_string(),
            args: args.into_args(),
        };
        self.replica.publish(OpTag::Set, Some(payload), vec![write]).await
    }

    /// Remove one field and announce it. Deleting a missing field is a no-op
    /// for the state.
    pub async fn delete(&self, field: &str) -> Result<()> {
        let stored = self.replica.variant().codec().compose_field(field);
        let write = Command::HDel {
            key: self.key().to_string(),
            fields: vec![stored.clone()],
        };
        self.replica
            .publish(OpTag::Delete, Some(Value::String(stored)), vec![write])
            .await
    }

    /// Leave the topic.
    pub async fn shutdown(&self) -> Result<()> {
        self.replica.shutdown().await
    }

    fn compose(&self, field: &str, value: &T) -> Result<FieldArgs> {
        let codec = self.replica.variant().codec();
        FieldArgs::from_composed(codec.compose(field, value)?, &codec.compose_field(field))
    }
}
