// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process store and bus.
//!
//! [`MemoryBackend`] stands in for a Redis instance: one shared key space plus
//! one pub/sub fan-out. Several [`Connections`] built from the same backend
//! behave like several processes talking to the same server, which is how the
//! replication protocol is tested without Docker.
//!
//! Transactions run under one lock: every command is validated first, then
//! writes are applied, then any `PUBLISH` in the batch is delivered. Delivery
//! order therefore matches transaction order across all connections.
//!
//! # Fault injection
//!
//! - [`fail_next`](MemoryBackend::fail_next): reject the next `n` transactions
//! - [`fail_reads`](MemoryBackend::fail_reads): reject read-only transactions
//! - [`drop_announcements`](MemoryBackend::drop_announcements): apply writes
//!   but silently lose every `PUBLISH`
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> replica_cache::Result<()> {
//! use replica_cache::memory::MemoryBackend;
//! use replica_cache::store::Command;
//!
//! let backend = MemoryBackend::new();
//! let connections = backend.connections();
//!
//! let store = connections.producer().await?;
//! store.exec(vec![Command::Set { key: "k".into(), args: vec!["1".into()] }]).await?;
//! assert_eq!(backend.string("k").await.as_deref(), Some("1"));
//! # Ok(())
//! # }
//! ```

use crate::bus::{Bus, SubscriberId, Subscription};
use crate::connection::{Connections, Connector};
use crate::error::{ReplicaError, Result};
use crate::metrics;
use crate::store::{BoxFuture, Command, Reply, Store};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, trace};

#[derive(Default)]
struct MemoryData {
    strings: HashMap<String, String>,
    hashes: HashMap<String, BTreeMap<String, String>>,
    routes: HashMap<String, Vec<(SubscriberId, mpsc::UnboundedSender<Vec<u8>>)>>,
    next_subscriber: SubscriberId,
    executed: Vec<Command>,
    fail_remaining: usize,
    fail_reads: bool,
    drop_announcements: bool,
}

impl MemoryData {
    fn apply(&mut self, command: &Command) -> Reply {
        match command {
            Command::Get { key } => match self.strings.get(key) {
                Some(value) => Reply::Value(value.clone()),
                None => Reply::Nil,
            },
            Command::Set { key, args } => {
                // Extra SET options (EX, NX, ...) are accepted and ignored.
                self.strings.insert(key.clone(), args[0].clone());
                Reply::Status
            }
            Command::Del { key } => {
                let string = self.strings.remove(key).is_some();
                let hash = self.hashes.remove(key).is_some();
                Reply::Integer((string || hash) as i64)
            }
            Command::HGetAll { key } => Reply::Fields(
                self.hashes
                    .get(key)
                    .map(|hash| hash.iter().map(|(f, v)| (f.clone(), v.clone())).collect())
                    .unwrap_or_default(),
            ),
            Command::HSet { key, args } => {
                let hash = self.hashes.entry(key.clone()).or_default();
                let mut added = 0;
                for pair in args.chunks(2) {
                    if hash.insert(pair[0].clone(), pair[1].clone()).is_none() {
                        added += 1;
                    }
                }
                Reply::Integer(added)
            }
            Command::HDel { key, fields } => {
                let mut removed = 0;
                if let Some(hash) = self.hashes.get_mut(key) {
                    for field in fields {
                        if hash.remove(field).is_some() {
                            removed += 1;
                        }
                    }
                    if hash.is_empty() {
                        self.hashes.remove(key);
                    }
                }
                Reply::Integer(removed)
            }
            Command::Publish { topic, payload } => Reply::Integer(self.deliver(topic, payload)),
        }
    }

    fn deliver(&mut self, topic: &str, payload: &[u8]) -> i64 {
        if self.drop_announcements {
            trace!(topic = %topic, "Dropping announcement");
            return 0;
        }
        match self.routes.get_mut(topic) {
            Some(subscribers) => {
                subscribers.retain(|(_, tx)| tx.send(payload.to_vec()).is_ok());
                subscribers.len() as i64
            }
            None => 0,
        }
    }
}

/// Shared in-process key space and pub/sub.
///
/// Cloning is cheap and every clone sees the same data.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    data: Arc<Mutex<MemoryData>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh provider over this backend, like a new process connecting.
    pub fn connections(&self) -> Arc<Connections> {
        Arc::new(Connections::new(MemoryConnector {
            backend: self.clone(),
        }))
    }

    /// Current string value at `key`.
    pub async fn string(&self, key: &str) -> Option<String> {
        self.data.lock().await.strings.get(key).cloned()
    }

    /// Current hash at `key` (empty if absent).
    pub async fn hash(&self, key: &str) -> BTreeMap<String, String> {
        self.data.lock().await.hashes.get(key).cloned().unwrap_or_default()
    }

    /// Every command executed so far, in order (rejected batches excluded).
    pub async fn executed_commands(&self) -> Vec<Command> {
        self.data.lock().await.executed.clone()
    }

    /// Reject the next `n` transactions with a store error.
    pub async fn fail_next(&self, n: usize) {
        self.data.lock().await.fail_remaining = n;
    }

    /// Reject (`true`) or allow (`false`) every read-only transaction.
    pub async fn fail_reads(&self, fail: bool) {
        self.data.lock().await.fail_reads = fail;
    }

    /// Lose (`true`) or deliver (`false`) every published announcement.
    pub async fn drop_announcements(&self, drop: bool) {
        self.data.lock().await.drop_announcements = drop;
    }

    /// Number of subscribers still registered on `topic`.
    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.data
            .lock()
            .await
            .routes
            .get(topic)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Close every subscription on `topic`, as if the server dropped them.
    pub async fn close_subscriptions(&self, topic: &str) {
        if let Some(subscribers) = self.data.lock().await.routes.remove(topic) {
            debug!(topic = %topic, count = subscribers.len(), "Closed subscriptions");
        }
    }

    async fn exec(&self, commands: Vec<Command>) -> Result<Vec<Reply>> {
        let start = Instant::now();
        let mut data = self.data.lock().await;

        let read_only = commands
            .iter()
            .all(|c| matches!(c, Command::Get { .. } | Command::HGetAll { .. }));
        let injected = if data.fail_remaining > 0 {
            data.fail_remaining -= 1;
            true
        } else {
            data.fail_reads && read_only
        };
        if injected {
            metrics::record_store_exec(commands.len(), start.elapsed(), false);
            return Err(ReplicaError::store_msg("EXEC", "injected failure"));
        }
        for command in &commands {
            command.validate()?;
        }

        let replies = commands.iter().map(|command| data.apply(command)).collect();
        data.executed.extend(commands.iter().cloned());
        metrics::record_store_exec(commands.len(), start.elapsed(), true);
        Ok(replies)
    }
}

/// Opens [`MemoryStore`] / [`MemoryBus`] handles over a [`MemoryBackend`].
pub struct MemoryConnector {
    backend: MemoryBackend,
}

impl Connector for MemoryConnector {
    fn connect_store(&self) -> BoxFuture<'_, Arc<dyn Store>> {
        Box::pin(async move {
            Ok(Arc::new(MemoryStore {
                backend: self.backend.clone(),
            }) as Arc<dyn Store>)
        })
    }

    fn connect_bus(&self, _producer: Arc<dyn Store>) -> BoxFuture<'_, Arc<dyn Bus>> {
        Box::pin(async move {
            Ok(Arc::new(MemoryBus {
                backend: self.backend.clone(),
            }) as Arc<dyn Bus>)
        })
    }
}

/// [`Store`] handle on a [`MemoryBackend`].
pub struct MemoryStore {
    backend: MemoryBackend,
}

impl Store for MemoryStore {
    fn exec(&self, commands: Vec<Command>) -> BoxFuture<'_, Vec<Reply>> {
        Box::pin(self.backend.exec(commands))
    }
}

/// [`Bus`] handle on a [`MemoryBackend`].
pub struct MemoryBus {
    backend: MemoryBackend,
}

impl Bus for MemoryBus {
    fn subscribe(&self, topic: &str) -> BoxFuture<'_, Subscription> {
        let topic = topic.to_string();
        Box::pin(async move {
            let (tx, rx) = mpsc::unbounded_channel();
            let mut data = self.backend.data.lock().await;
            data.next_subscriber += 1;
            let id = data.next_subscriber;
            data.routes.entry(topic.clone()).or_default().push((id, tx));
            debug!(topic = %topic, subscriber = id, "Subscribed");
            Ok(Subscription {
                id,
                topic,
                messages: rx,
            })
        })
    }

    fn unsubscribe(&self, topic: &str, id: SubscriberId) -> BoxFuture<'_, ()> {
        let topic = topic.to_string();
        Box::pin(async move {
            let mut data = self.backend.data.lock().await;
            if let Some(subscribers) = data.routes.get_mut(&topic) {
                subscribers.retain(|(sid, _)| *sid != id);
                if subscribers.is_empty() {
                    data.routes.remove(&topic);
                }
            }
            Ok(())
        })
    }

    fn publish(&self, topic: &str, payload: Vec<u8>) -> BoxFuture<'_, ()> {
        let topic = topic.to_string();
        Box::pin(async move {
            self.backend.data.lock().await.deliver(&topic, &payload);
            Ok(())
        })
    }
}
