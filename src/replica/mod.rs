// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replica engine.
//!
//! A [`Replica`] owns one in-memory state value and keeps it equal to the
//! authoritative copy in the store by applying every announcement published on
//! its topic, its own included:
//!
//! ```text
//!   caller                      store (MULTI/EXEC)             every replica
//!   set(v) ──compose──► [SET key v, PUBLISH topic {set, v}] ──► message loop
//!                                                                  │ reduce
//!                                                                  ▼
//!                                                            state + listeners
//! ```
//!
//! A local write never touches local state directly; it only becomes visible
//! when its announcement comes back through the subscription. That keeps
//! every replica on the same topic applying the same operations in the same
//! order.
//!
//! # Variants
//!
//! What the state looks like, how it is read back from the store, and how each
//! operation changes it is defined by a [`ReplicaVariant`]. The two built-in
//! variants live in [`crate::caches`].
//!
//! # Initialization
//!
//! [`Replica::initialize`] clears the store, writes the new contents together
//! with a `load` announcement, then waits on a reload barrier until this
//! replica has re-read the store and applied the result. Change listeners are
//! notified before the barrier releases. The wait is bounded by the
//! configured reload timeout; with no timeout, a lost announcement stalls the
//! caller forever.

mod barrier;
mod handler;
mod types;

pub use types::{ChangeListener, ErrorListener, ListenerId, Operation};

use crate::bus::{Bus, SubscriberId};
use crate::connection::Connections;
use crate::envelope::{Envelope, OpTag};
use crate::error::{ReplicaError, Result};
use crate::metrics;
use crate::store::{Command, Reply, Store};
use barrier::ReloadBarriers;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Operation type for a variant.
pub type VariantOperation<V> = Operation<
    <V as ReplicaVariant>::Load,
    <V as ReplicaVariant>::Set,
    <V as ReplicaVariant>::Delete,
>;

/// Shape and semantics of one kind of replicated state.
pub trait ReplicaVariant: Sized + Send + Sync + 'static {
    /// In-memory state.
    type State: Clone + Send + Sync + 'static;
    /// Result of a full store read.
    type Load: Send + 'static;
    /// `set` announcement payload.
    type Set: DeserializeOwned + Send + 'static;
    /// `delete` announcement payload.
    type Delete: DeserializeOwned + Send + 'static;

    /// Short name for logs and metrics.
    fn kind(&self) -> &'static str;

    /// Empty state, before the first load and after a clear.
    fn initial_state(&self) -> Self::State;

    /// Whether this variant applies `tag`. Unsupported tags are ignored like
    /// unknown ones.
    fn supports(&self, _tag: OpTag) -> bool {
        true
    }

    /// Commands that read the full state, run as one transaction.
    fn load_commands(&self) -> Vec<Command>;

    /// Commands that remove the state from the store.
    fn clear_commands(&self) -> Vec<Command>;

    /// Turn the replies of [`load_commands`](Self::load_commands) into a load payload.
    fn parse_load(&self, replies: Vec<Reply>) -> Result<Self::Load>;

    /// Compute the next state. Must not have side effects.
    fn reduce(&self, state: &Self::State, operation: VariantOperation<Self>) -> Result<Self::State>;
}

/// State shared between a [`Replica`] handle and its message loop.
pub(crate) struct Shared<V: ReplicaVariant> {
    topic: String,
    variant: V,
    store: Arc<dyn Store>,
    bus: Arc<dyn Bus>,
    subscriber: SubscriberId,
    state: watch::Sender<V::State>,
    /// Held across read, reduce, replace and notify.
    apply_lock: Mutex<()>,
    change_listeners: DashMap<ListenerId, ChangeListener<V::State>>,
    error_listeners: DashMap<ListenerId, ErrorListener>,
    next_listener: AtomicU64,
    barriers: ReloadBarriers,
    reload_timeout: Option<Duration>,
}

impl<V: ReplicaVariant> Shared<V> {
    /// Read the full state from the store and apply it as a load.
    async fn load(&self) -> Result<()> {
        let start = Instant::now();
        let _guard = self.apply_lock.lock().await;

        let replies = self.store.exec(self.variant.load_commands()).await?;
        let payload = self.variant.parse_load(replies)?;
        self.apply_locked(Operation::Load(payload))?;

        metrics::record_reload(&self.topic, start.elapsed());
        Ok(())
    }

    async fn apply(&self, operation: VariantOperation<V>) -> Result<()> {
        let _guard = self.apply_lock.lock().await;
        self.apply_locked(operation)
    }

    /// Caller holds `apply_lock`.
    fn apply_locked(&self, operation: VariantOperation<V>) -> Result<()> {
        let tag = operation.tag();
        let next = {
            let current = self.state.borrow();
            self.variant.reduce(&current, operation)?
        };
        self.state.send_replace(next.clone());

        metrics::record_operation_applied(&self.topic, self.variant.kind(), tag.as_str());
        debug!(topic = %self.topic, op = %tag, "Applied operation");

        let listeners: Vec<ChangeListener<V::State>> = self
            .change_listeners
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for listener in listeners {
            listener(&next);
        }
        Ok(())
    }

    /// Report a failure of the inbound path to error listeners.
    fn emit_error(&self, err: &ReplicaError) {
        if err.is_retryable() {
            warn!(topic = %self.topic, error = %err, retryable = true, "Replication error");
        } else {
            error!(topic = %self.topic, error = %err, "Replication error");
        }
        metrics::record_replication_error(&self.topic, err.kind());

        let listeners: Vec<ErrorListener> = self
            .error_listeners
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for listener in listeners {
            listener(err);
        }
    }

    fn next_listener_id(&self) -> ListenerId {
        ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed))
    }
}

/// A locally cached replica of store state, kept current over the bus.
pub struct Replica<V: ReplicaVariant> {
    shared: Arc<Shared<V>>,
    task: JoinHandle<()>,
}

impl<V: ReplicaVariant> Replica<V> {
    /// Subscribe to `topic` and start applying announcements.
    ///
    /// Opens the shared handles if needed. The subscription is active when
    /// this returns, so any announcement published afterwards is applied.
    /// The state starts as [`ReplicaVariant::initial_state`].
    pub async fn new(
        connections: &Connections,
        topic: impl Into<String>,
        variant: V,
        reload_timeout: Option<Duration>,
    ) -> Result<Self> {
        let topic = topic.into();
        if topic.is_empty() {
            return Err(ReplicaError::Config("topic must be a non-empty string".into()));
        }

        let store = connections.producer().await?;
        let bus = connections.consumer().await?;
        let subscription = bus.subscribe(&topic).await?;

        let (state, _) = watch::channel(variant.initial_state());
        let shared = Arc::new(Shared {
            barriers: ReloadBarriers::new(topic.clone()),
            topic,
            variant,
            store,
            bus,
            subscriber: subscription.id,
            state,
            apply_lock: Mutex::new(()),
            change_listeners: DashMap::new(),
            error_listeners: DashMap::new(),
            next_listener: AtomicU64::new(1),
            reload_timeout,
        });

        info!(topic = %shared.topic, kind = shared.variant.kind(), "Replica subscribed");
        let task = tokio::spawn(handler::run_message_loop(
            Arc::clone(&shared),
            subscription.messages,
        ));

        Ok(Self { shared, task })
    }

    pub fn topic(&self) -> &str {
        &self.shared.topic
    }

    pub fn variant(&self) -> &V {
        &self.shared.variant
    }

    /// Snapshot of the current state.
    pub fn get(&self) -> V::State {
        self.shared.state.borrow().clone()
    }

    /// Watch channel following every state change.
    pub fn state_receiver(&self) -> watch::Receiver<V::State> {
        self.shared.state.subscribe()
    }

    /// Register a change listener. It sees every applied change once, in order.
    pub fn subscribe(&self, listener: impl Fn(&V::State) + Send + Sync + 'static) -> ListenerId {
        let id = self.shared.next_listener_id();
        self.shared.change_listeners.insert(id, Arc::new(listener));
        metrics::set_listener_count(&self.shared.topic, self.shared.change_listeners.len());
        id
    }

    /// Remove a change or error listener. Returns whether it was registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let removed = self.shared.change_listeners.remove(&id).is_some()
            || self.shared.error_listeners.remove(&id).is_some();
        metrics::set_listener_count(&self.shared.topic, self.shared.change_listeners.len());
        removed
    }

    /// Register an error listener for failures of inbound replication.
    pub fn on_error(&self, listener: impl Fn(&ReplicaError) + Send + Sync + 'static) -> ListenerId {
        let id = self.shared.next_listener_id();
        self.shared.error_listeners.insert(id, Arc::new(listener));
        id
    }

    /// Read the full state from the store and apply it locally, without
    /// announcing anything.
    pub async fn load(&self) -> Result<()> {
        self.shared.load().await
    }

    /// Replace the store contents with `writes` and wait until this replica
    /// has reloaded them.
    ///
    /// Fails with `ReloadTimeout` if the reload does not complete in time, or
    /// with the store error if the triggered reload could not read the store.
    pub async fn initialize(&self, writes: Vec<Command>) -> Result<()> {
        let shared = &self.shared;
        shared.store.exec(shared.variant.clear_commands()).await?;

        let reload_id = uuid::Uuid::new_v4().to_string();
        let pending = shared.barriers.register(reload_id.clone());

        if let Err(e) = self
            .publish(OpTag::Load, Some(Value::String(reload_id.clone())), writes)
            .await
        {
            shared.barriers.cancel(&reload_id);
            return Err(e);
        }

        shared.barriers.wait(pending, shared.reload_timeout).await?;
        info!(topic = %shared.topic, reload_id = %reload_id, "Replica initialized");
        Ok(())
    }

    /// Remove the state from the store.
    ///
    /// With `broadcast`, every replica (this one included) resets to the empty
    /// state. Without it, no replica is told, local state included.
    pub async fn clear(&self, broadcast: bool) -> Result<()> {
        let commands = self.shared.variant.clear_commands();
        if broadcast {
            self.publish(OpTag::Clear, None, commands).await
        } else {
            self.shared.store.exec(commands).await.map(|_| ())
        }
    }

    /// Execute `writes` and announce `tag`/`payload` in one transaction.
    pub async fn publish(&self, tag: OpTag, payload: Option<Value>, mut writes: Vec<Command>) -> Result<()> {
        let topic = &self.shared.topic;
        let bytes = Envelope::new(tag, payload).encode()?;
        writes.push(Command::Publish {
            topic: topic.clone(),
            payload: bytes,
        });

        let result = self.shared.store.exec(writes).await.map(|_| ());
        metrics::record_publish(topic, tag.as_str(), result.is_ok());
        result
    }

    /// Stop applying announcements and leave the topic.
    ///
    /// Dropping the replica does the same, but the unsubscribe is spawned
    /// onto the current runtime and its result is only logged. Outside a
    /// runtime the route stays until the bus handle goes away.
    pub async fn shutdown(&self) -> Result<()> {
        self.task.abort();
        self.shared
            .bus
            .unsubscribe(&self.shared.topic, self.shared.subscriber)
            .await?;
        debug!(topic = %self.shared.topic, "Replica shut down");
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn pending_reloads(&self) -> usize {
        self.shared.barriers.pending_count()
    }
}

impl<V: ReplicaVariant> Drop for Replica<V> {
    fn drop(&mut self) {
        self.task.abort();

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let bus = Arc::clone(&self.shared.bus);
            let topic = self.shared.topic.clone();
            let subscriber = self.shared.subscriber;
            handle.spawn(async move {
                if let Err(e) = bus.unsubscribe(&topic, subscriber).await {
                    warn!(topic = %topic, error = %e, "Unsubscribe on drop failed");
                }
            });
        }
    }
}
