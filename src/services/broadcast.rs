//! Broadcast fan-out — one serialization, independent per-target delivery.
//!
//! DESIGN
//! ======
//! Each connection owns a bounded mpsc queue drained by its socket task.
//! Rooms hold only the sending half, so delivery is a non-blocking
//! `try_send` of a shared, pre-serialized payload. A full or closed queue on
//! one target is logged and skipped; it never aborts the rest of the fan-out
//! and never reaches the operation that triggered it.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::protocol::ServerMessage;

/// Serialized outbound message shared by every target of a fan-out.
pub type Outbound = Arc<str>;

/// Sending half of a connection's outbound queue.
pub type OutboundTx = mpsc::Sender<Outbound>;

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("outbound queue full")]
    Full,
    #[error("connection closed")]
    Closed,
}

/// Counts from one fan-out, for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    pub delivered: usize,
    pub failed: usize,
}

/// Serialize a message once for delivery to many targets.
#[must_use]
pub fn encode(message: &ServerMessage) -> Option<Outbound> {
    match serde_json::to_string(message) {
        Ok(json) => Some(Arc::from(json)),
        Err(e) => {
            error!(error = %e, "broadcast: failed to serialize message");
            None
        }
    }
}

/// Enqueue a payload on one connection without waiting.
///
/// # Errors
///
/// Returns `DeliveryError` when the queue is full or its receiver is gone.
pub fn deliver(tx: &OutboundTx, payload: Outbound) -> Result<(), DeliveryError> {
    tx.try_send(payload).map_err(|e| match e {
        mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
        mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
    })
}

/// Deliver `message` to every `(participant_id, queue)` target.
pub fn fan_out<'a, I>(targets: I, message: &ServerMessage) -> FanOut
where
    I: IntoIterator<Item = (&'a str, &'a OutboundTx)>,
{
    let mut report = FanOut::default();
    let Some(payload) = encode(message) else {
        return report;
    };

    for (participant_id, tx) in targets {
        match deliver(tx, Arc::clone(&payload)) {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                report.failed += 1;
                warn!(participant_id, error = %e, "broadcast: delivery failed");
            }
        }
    }

    debug!(delivered = report.delivered, failed = report.failed, "broadcast: fan-out complete");
    report
}

/// Deliver `message` to one connection's queue, behind anything already
/// queued for it.
pub fn send_to(participant_id: &str, tx: &OutboundTx, message: &ServerMessage) -> FanOut {
    fan_out([(participant_id, tx)], message)
}

#[cfg(test)]
#[path = "broadcast_test.rs"]
mod tests;
