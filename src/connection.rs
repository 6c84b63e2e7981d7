// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Connection provider and the Redis-backed store and bus.
//!
//! Every cache in a process shares one [`Connections`] value, passed in
//! explicitly at construction. It caches at most two long-lived handles,
//! one per direction, each opened on first use:
//!
//! - **producer** ([`Store`]): transactions, reads and announcements
//! - **consumer** ([`Bus`]): topic subscriptions
//!
//! ```text
//!                 Connections
//!        ┌─────────────┴─────────────┐
//!   producer()                   consumer()
//!   RedisStore                   RedisBus
//!   (ConnectionManager,          (pub/sub sink + stream,
//!    MULTI/EXEC pipelines)        dispatcher task → per-subscriber channels)
//! ```
//!
//! Opening a handle retries with exponential backoff (see
//! [`RetryConfig`](crate::resilience::RetryConfig)). The Redis
//! `ConnectionManager` reconnects on its own after that; the pub/sub
//! connection does not, and when it drops every subscription channel closes.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> replica_cache::Result<()> {
//! use replica_cache::config::RedisConfig;
//! use replica_cache::connection::Connections;
//! use std::sync::Arc;
//!
//! let connections = Arc::new(Connections::redis(RedisConfig::default())?);
//!
//! // Handles are lazy - this opens the producer
//! let store = connections.producer().await?;
//! # Ok(())
//! # }
//! ```

use crate::bus::{Bus, SubscriberId, Subscription};
use crate::config::RedisConfig;
use crate::error::{ReplicaError, Result};
use crate::metrics;
use crate::resilience::{retry_with_backoff, RetryConfig};
use crate::store::{BoxFuture, Command, Reply, Store};
use dashmap::DashMap;
use futures::StreamExt;
use redis::aio::{ConnectionManager, PubSubSink, PubSubStream};
use redis::Client;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Opens the two long-lived handles for a backend.
pub trait Connector: Send + Sync + 'static {
    /// Open the producer handle.
    fn connect_store(&self) -> BoxFuture<'_, Arc<dyn Store>>;

    /// Open the consumer handle. `producer` is the already-open store,
    /// used by backends that publish through it.
    fn connect_bus(&self, producer: Arc<dyn Store>) -> BoxFuture<'_, Arc<dyn Bus>>;
}

/// Process-wide provider of the shared producer and consumer handles.
pub struct Connections {
    connector: Box<dyn Connector>,
    producer: OnceCell<Arc<dyn Store>>,
    consumer: OnceCell<Arc<dyn Bus>>,
    opened: AtomicUsize,
}

impl Connections {
    /// Create a provider over any backend. Nothing is opened yet.
    pub fn new(connector: impl Connector) -> Self {
        Self {
            connector: Box::new(connector),
            producer: OnceCell::new(),
            consumer: OnceCell::new(),
            opened: AtomicUsize::new(0),
        }
    }

    /// Create a provider for a Redis instance.
    ///
    /// Fails with `Config` if the URL is invalid; does not connect.
    pub fn redis(config: RedisConfig) -> Result<Self> {
        Ok(Self::new(RedisConnector::new(&config)?))
    }

    /// The producer handle, opened on first call.
    pub async fn producer(&self) -> Result<Arc<dyn Store>> {
        self.producer
            .get_or_try_init(|| async move {
                let result = self.connector.connect_store().await;
                metrics::record_connection("producer", result.is_ok());
                if result.is_ok() {
                    self.opened.fetch_add(1, Ordering::Relaxed);
                }
                result
            })
            .await
            .map(Arc::clone)
    }

    /// The consumer handle, opened on first call (opens the producer too).
    pub async fn consumer(&self) -> Result<Arc<dyn Bus>> {
        if let Some(bus) = self.consumer.get() {
            return Ok(Arc::clone(bus));
        }

        let producer = self.producer().await?;
        self.consumer
            .get_or_try_init(|| async move {
                let result = self.connector.connect_bus(producer).await;
                metrics::record_connection("consumer", result.is_ok());
                if result.is_ok() {
                    self.opened.fetch_add(1, Ordering::Relaxed);
                }
                result
            })
            .await
            .map(Arc::clone)
    }

    /// How many handles have been opened so far (0, 1 or 2).
    pub fn opened_handles(&self) -> usize {
        self.opened.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Redis
// =============================================================================

/// Opens Redis handles with retry.
pub struct RedisConnector {
    client: Client,
    retry: RetryConfig,
}

impl RedisConnector {
    pub fn new(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| ReplicaError::Config(format!("Invalid Redis URL: {}", e)))?;
        Ok(Self {
            client,
            retry: config.retry_config(),
        })
    }
}

impl Connector for RedisConnector {
    fn connect_store(&self) -> BoxFuture<'_, Arc<dyn Store>> {
        Box::pin(async move {
            let conn = retry_with_backoff(&self.retry, "producer", || {
                self.client.get_connection_manager()
            })
            .await
            .map_err(|e| ReplicaError::Connection {
                direction: "producer".to_string(),
                message: format!(
                    "Connection failed after {} attempts: {}",
                    e.attempts, e.last_error
                ),
            })?;

            info!("Opened Redis producer connection");
            Ok(Arc::new(RedisStore::new(conn)) as Arc<dyn Store>)
        })
    }

    fn connect_bus(&self, producer: Arc<dyn Store>) -> BoxFuture<'_, Arc<dyn Bus>> {
        Box::pin(async move {
            let pubsub = retry_with_backoff(&self.retry, "consumer", || {
                self.client.get_async_pubsub()
            })
            .await
            .map_err(|e| ReplicaError::Connection {
                direction: "consumer".to_string(),
                message: format!(
                    "Connection failed after {} attempts: {}",
                    e.attempts, e.last_error
                ),
            })?;

            info!("Opened Redis pub/sub connection");
            let (sink, stream) = pubsub.split();
            Ok(Arc::new(RedisBus::new(sink, stream, producer)) as Arc<dyn Bus>)
        })
    }
}

/// [`Store`] over a multiplexed Redis connection.
///
/// `ConnectionManager` is Clone and shares one socket, so each transaction
/// works on a cheap clone.
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

impl Store for RedisStore {
    fn exec(&self, commands: Vec<Command>) -> BoxFuture<'_, Vec<Reply>> {
        Box::pin(async move {
            for command in &commands {
                command.validate()?;
            }
            if commands.is_empty() {
                return Ok(Vec::new());
            }

            let mut pipe = redis::pipe();
            pipe.atomic();
            for command in &commands {
                append_command(&mut pipe, command);
            }

            let start = Instant::now();
            let mut conn = self.conn.clone();
            let result: redis::RedisResult<Vec<redis::Value>> = pipe.query_async(&mut conn).await;
            metrics::record_store_exec(commands.len(), start.elapsed(), result.is_ok());

            let values = result.map_err(|e| ReplicaError::store("EXEC", e))?;
            if values.len() != commands.len() {
                return Err(ReplicaError::store_msg(
                    "EXEC",
                    format!("expected {} replies, got {}", commands.len(), values.len()),
                ));
            }

            commands
                .iter()
                .zip(values.iter())
                .map(|(command, value)| reply_from_value(command, value))
                .collect()
        })
    }
}

fn append_command(pipe: &mut redis::Pipeline, command: &Command) {
    match command {
        Command::Get { key } => {
            pipe.cmd("GET").arg(key);
        }
        Command::Set { key, args } => {
            pipe.cmd("SET").arg(key).arg(args);
        }
        Command::Del { key } => {
            pipe.cmd("DEL").arg(key);
        }
        Command::HGetAll { key } => {
            pipe.cmd("HGETALL").arg(key);
        }
        Command::HSet { key, args } => {
            pipe.cmd("HSET").arg(key).arg(args);
        }
        Command::HDel { key, fields } => {
            pipe.cmd("HDEL").arg(key).arg(fields);
        }
        Command::Publish { topic, payload } => {
            pipe.cmd("PUBLISH").arg(topic).arg(payload.as_slice());
        }
    }
}

fn reply_from_value(command: &Command, value: &redis::Value) -> Result<Reply> {
    let name = command.name();
    match command {
        Command::Get { .. } => {
            let value: Option<String> =
                redis::from_redis_value(value).map_err(|e| ReplicaError::store(name, e))?;
            Ok(value.map(Reply::Value).unwrap_or(Reply::Nil))
        }
        Command::HGetAll { .. } => {
            let fields: HashMap<String, String> =
                redis::from_redis_value(value).map_err(|e| ReplicaError::store(name, e))?;
            let mut fields: Vec<(String, String)> = fields.into_iter().collect();
            fields.sort();
            Ok(Reply::Fields(fields))
        }
        Command::Set { .. } => Ok(Reply::Status),
        Command::Del { .. }
        | Command::HSet { .. }
        | Command::HDel { .. }
        | Command::Publish { .. } => {
            let n: i64 =
                redis::from_redis_value(value).map_err(|e| ReplicaError::store(name, e))?;
            Ok(Reply::Integer(n))
        }
    }
}

type Routes = Arc<DashMap<String, Vec<(SubscriberId, mpsc::UnboundedSender<Vec<u8>>)>>>;

/// [`Bus`] over one Redis pub/sub connection.
///
/// A dispatcher task drains the message stream and routes each message to
/// the subscribers of its channel. Publishing goes through the producer,
/// since a connection in subscribe mode cannot issue PUBLISH.
pub struct RedisBus {
    sink: Mutex<PubSubSink>,
    routes: Routes,
    producer: Arc<dyn Store>,
    next_id: AtomicU64,
    dispatcher: JoinHandle<()>,
}

impl RedisBus {
    pub fn new(sink: PubSubSink, stream: PubSubStream, producer: Arc<dyn Store>) -> Self {
        let routes: Routes = Arc::new(DashMap::new());
        let dispatcher = tokio::spawn(dispatch(stream, Arc::clone(&routes)));
        Self {
            sink: Mutex::new(sink),
            routes,
            producer,
            next_id: AtomicU64::new(1),
            dispatcher,
        }
    }

    /// Remove one subscriber; returns true if the topic has none left.
    fn remove_route(&self, topic: &str, id: SubscriberId) -> bool {
        let now_empty = match self.routes.get_mut(topic) {
            Some(mut subscribers) => {
                subscribers.retain(|(sid, _)| *sid != id);
                subscribers.is_empty()
            }
            None => return false,
        };
        if now_empty {
            self.routes.remove_if(topic, |_, subscribers| subscribers.is_empty());
        }
        now_empty
    }
}

impl Drop for RedisBus {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

async fn dispatch(mut stream: PubSubStream, routes: Routes) {
    while let Some(msg) = stream.next().await {
        let topic = msg.get_channel_name();
        let payload = msg.get_payload_bytes();
        if let Some(mut subscribers) = routes.get_mut(topic) {
            subscribers.retain(|(_, tx)| tx.send(payload.to_vec()).is_ok());
        } else {
            debug!(topic = %topic, "Message for topic without local subscribers");
        }
    }

    warn!("Redis pub/sub connection closed, closing all subscriptions");
    routes.clear();
}

impl Bus for RedisBus {
    fn subscribe(&self, topic: &str) -> BoxFuture<'_, Subscription> {
        let topic = topic.to_string();
        Box::pin(async move {
            let (tx, rx) = mpsc::unbounded_channel();
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            // The sink lock orders route changes with their SUBSCRIBE/UNSUBSCRIBE,
            // so an UNSUBSCRIBE for an emptied topic cannot land after a newer SUBSCRIBE.
            let mut sink = self.sink.lock().await;
            // Route first so nothing published after SUBSCRIBE is acknowledged is missed.
            self.routes.entry(topic.clone()).or_default().push((id, tx));

            if let Err(e) = sink.subscribe(&topic).await {
                self.remove_route(&topic, id);
                return Err(ReplicaError::store("SUBSCRIBE", e));
            }

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
            let mut sink = self.sink.lock().await;
            if self.remove_route(&topic, id) {
                sink.unsubscribe(&topic)
                    .await
                    .map_err(|e| ReplicaError::store("UNSUBSCRIBE", e))?;
                debug!(topic = %topic, "Unsubscribed");
            }
            Ok(())
        })
    }

    fn publish(&self, topic: &str, payload: Vec<u8>) -> BoxFuture<'_, ()> {
        let topic = topic.to_string();
        Box::pin(async move {
            self.producer
                .exec(vec![Command::Publish { topic, payload }])
                .await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_connections_rejects_bad_url() {
        let config = RedisConfig {
            url: "not a url".to_string(),
            ..Default::default()
        };
        let err = Connections::redis(config).err().unwrap();
        assert!(matches!(err, ReplicaError::Config(_)));
    }

    #[test]
    fn test_redis_connections_lazy() {
        let connections = Connections::redis(RedisConfig::default()).unwrap();
        assert_eq!(connections.opened_handles(), 0);
    }

    #[tokio::test]
    async fn test_redis_connect_failure_is_connection_error() {
        // Nothing listens on port 1
        let connections = Connections::redis(RedisConfig::for_testing("redis://127.0.0.1:1")).unwrap();
        let err = connections.producer().await.err().unwrap();
        assert!(matches!(err, ReplicaError::Connection { .. }));
        assert_eq!(connections.opened_handles(), 0);
    }

    #[test]
    fn test_reply_from_value_get() {
        let get = Command::Get { key: "k".into() };
        assert_eq!(reply_from_value(&get, &redis::Value::Nil).unwrap(), Reply::Nil);
        assert_eq!(
            reply_from_value(&get, &redis::Value::BulkString(b"\"v\"".to_vec())).unwrap(),
            Reply::Value("\"v\"".into())
        );
    }

    #[test]
    fn test_reply_from_value_hgetall_sorted() {
        let cmd = Command::HGetAll { key: "h".into() };
        let raw = redis::Value::Array(vec![
            redis::Value::BulkString(b"b".to_vec()),
            redis::Value::BulkString(b"2".to_vec()),
            redis::Value::BulkString(b"a".to_vec()),
            redis::Value::BulkString(b"1".to_vec()),
        ]);
        assert_eq!(
            reply_from_value(&cmd, &raw).unwrap(),
            Reply::Fields(vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string()),
            ])
        );
    }

    #[test]
    fn test_reply_from_value_integer() {
        let cmd = Command::Del { key: "k".into() };
        assert_eq!(
            reply_from_value(&cmd, &redis::Value::Int(1)).unwrap(),
            Reply::Integer(1)
        );
    }
}
