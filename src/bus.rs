// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Publish/subscribe bus capability.
//!
//! A [`Bus`] delivers every message published on a topic to every current
//! subscriber of that topic, including subscribers in the publishing process,
//! in publish order. Payloads are opaque bytes; replicas put a JSON
//! [`Envelope`](crate::envelope::Envelope) in them.
//!
//! Each call to [`Bus::subscribe`] gets its own [`Subscription`] channel, so
//! several replicas in one process can listen on the same topic. The channel
//! closing means the bus lost its connection and nothing more will arrive.

use crate::store::BoxFuture;
use tokio::sync::mpsc;

/// Identifies one subscriber on a bus.
pub type SubscriberId = u64;

/// An ordered stream of raw messages for one topic.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriberId,
    pub topic: String,
    pub messages: mpsc::UnboundedReceiver<Vec<u8>>,
}

/// Topic-scoped publish/subscribe over opaque payloads.
pub trait Bus: Send + Sync + 'static {
    /// Start receiving messages published on `topic`.
    ///
    /// The subscription is active when the returned future resolves.
    fn subscribe(&self, topic: &str) -> BoxFuture<'_, Subscription>;

    /// Stop delivering to subscriber `id` on `topic`.
    fn unsubscribe(&self, topic: &str, id: SubscriberId) -> BoxFuture<'_, ()>;

    /// Publish `payload` to every subscriber of `topic`.
    fn publish(&self, topic: &str, payload: Vec<u8>) -> BoxFuture<'_, ()>;
}
