// Background reader: splits incoming frames into push messages and acks.
use respmux_wire::{MessageKind, PubSubMessage, Value, is_push_frame};
use std::sync::Arc;

use super::Inner;
use super::correlator::Ack;
use crate::error::PubSubError;

#[derive(Debug)]
pub(crate) enum Frame {
    Push(PubSubMessage),
    // Looked like a push but did not decode; dropped.
    Malformed(respmux_wire::Error),
    Ack(Ack),
}

pub(crate) fn classify(value: Value) -> Frame {
    if let Value::Error(message) = value {
        return Frame::Ack(Err(PubSubError::Rejected(message)));
    }
    if !is_push_frame(&value) {
        return Frame::Ack(Ok(()));
    }
    match PubSubMessage::from_value(&value) {
        Ok(message) => Frame::Push(message),
        Err(err) => Frame::Malformed(err),
    }
}

pub(crate) async fn run_reader(inner: Arc<Inner>) {
    loop {
        let decoded = tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => return,
            decoded = inner.conn.decode() => decoded,
        };
        let value = match decoded {
            Ok(value) => value,
            Err(err) if err.is_timeout() => {
                t_counter!("respmux_pubsub_read_timeouts_total").increment(1);
                continue;
            }
            Err(err) => {
                tracing::debug!(error = %err, "pubsub reader stopping");
                let _ = inner.terminate(Some(Arc::new(err))).await;
                return;
            }
        };
        match classify(value) {
            Frame::Push(message) => route(&inner, message).await,
            Frame::Malformed(err) => {
                t_counter!("respmux_pubsub_malformed_total").increment(1);
                tracing::warn!(error = %err, "dropping malformed push frame");
            }
            Frame::Ack(ack) => {
                t_counter!("respmux_pubsub_acks_total").increment(1);
                inner.correlator.forward(ack, &inner.shutdown).await;
            }
        }
    }
}

// Delivery happens under the shared registry lock, so a sink that returns
// from unsubscribe receives nothing further.
async fn route(inner: &Inner, message: PubSubMessage) {
    let registries = inner.registries.read().await;
    let Some(registries) = registries.as_ref() else {
        return;
    };
    let sinks = match message.kind {
        MessageKind::Message => registries.channels.sinks(&message.channel),
        MessageKind::PMessage => registries.patterns.sinks(message.routing_key()),
    };
    if sinks.is_empty() {
        tracing::debug!(key = message.routing_key(), "no sinks for published message");
        return;
    }
    let kind = message.kind.as_str();
    for sink in sinks {
        tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => return,
            delivered = sink.deliver(message.clone()) => {
                if delivered {
                    t_counter!("respmux_pubsub_routed_total", "kind" => kind).increment(1);
                } else {
                    t_counter!("respmux_pubsub_dropped_total").increment(1);
                    tracing::debug!(
                        sink = sink.id(),
                        channel = %message.channel,
                        "sink receiver dropped; skipping"
                    );
                }
            }
        }
    }
}
