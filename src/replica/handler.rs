//! Inbound message loop.
//!
//! One task per replica drains its subscription and handles each message to
//! completion before taking the next, so operations are applied in delivery
//! order. Nothing in here returns an error to a caller: failures go to the
//! replica's error listeners, and a failed reload also fails the `initialize`
//! call waiting on it.

use super::{Operation, ReplicaVariant, Shared, VariantOperation};
use crate::envelope::{Envelope, OpTag};
use crate::error::{ReplicaError, Result};
use crate::metrics;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info_span, trace, warn, Instrument};

/// Run until the subscription closes or the task is aborted.
pub(super) async fn run_message_loop<V: ReplicaVariant>(
    shared: Arc<Shared<V>>,
    mut messages: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    let span = info_span!("replica", topic = %shared.topic, kind = shared.variant.kind());

    async move {
        trace!("Message loop started");

        while let Some(bytes) = messages.recv().await {
            shared.handle_message(&bytes).await;
        }

        warn!("Bus subscription closed");
        let closed = || ReplicaError::Subscription {
            topic: shared.topic.clone(),
            message: "bus subscription closed".into(),
        };
        shared.emit_error(&closed());
        shared.barriers.fail_all(closed);
    }
    .instrument(span)
    .await
}

impl<V: ReplicaVariant> Shared<V> {
    async fn handle_message(&self, bytes: &[u8]) {
        let envelope = match Envelope::decode(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                metrics::record_message_received(&self.topic, "malformed");
                self.emit_error(&e);
                return;
            }
        };
        metrics::record_message_received(&self.topic, &envelope.op);

        let tag = match envelope.tag() {
            Some(tag) if self.variant.supports(tag) => tag,
            _ => {
                warn!(op = %envelope.op, "Ignoring unknown operation");
                return;
            }
        };

        if tag == OpTag::Load {
            self.handle_reload(&envelope).await;
            return;
        }

        let result = match decode_operation::<V>(tag, &envelope) {
            Ok(operation) => self.apply(operation).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            self.emit_error(&e);
        }
    }

    /// Re-read the store, then release the matching `initialize` barrier.
    async fn handle_reload(&self, envelope: &Envelope) {
        // Older publishers send no reload id
        let reload_id: Option<String> = envelope.payload_as().ok().flatten();

        match self.load().await {
            Ok(()) => {
                if let Some(id) = reload_id {
                    self.barriers.resolve(&id, Ok(()));
                }
            }
            Err(e) => {
                self.emit_error(&e);
                if let Some(id) = reload_id {
                    self.barriers.resolve(&id, Err(e));
                }
            }
        }
    }
}

/// Typed operation for a non-load tag.
fn decode_operation<V: ReplicaVariant>(tag: OpTag, envelope: &Envelope) -> Result<VariantOperation<V>> {
    Ok(match tag {
        OpTag::Clear => Operation::Clear,
        OpTag::Set => Operation::Set(envelope.payload_as()?),
        OpTag::Delete => Operation::Delete(envelope.payload_as()?),
        OpTag::Load => {
            return Err(ReplicaError::Decode(
                "load is handled by a store read, not a payload".into(),
            ))
        }
    })
}
