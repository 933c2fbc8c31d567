//! In-process domain events.
//!
//! Services emit events over a bounded mpsc channel; a background task
//! consumes them for the audit log. Event delivery is best-effort: a failed
//! send is logged and never fails the originating operation.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Events emitted by the orchestration core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Design events
    DesignCompleted(Uuid),
    DesignOrdered(Uuid),

    // Order events
    OrderCreated(Uuid),
    OrderCancelled(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },

    // Payment events
    PaymentInitialized {
        order_id: Uuid,
        gateway_order_id: String,
    },
    PaymentReceived {
        order_id: Uuid,
        amount: Decimal,
    },
    PaymentChallenged(Uuid),
    PaymentFailed {
        order_id: Uuid,
        reason: String,
    },
    RefundProcessed {
        order_id: Uuid,
        amount: Decimal,
    },

    // Fulfillment events
    FabricOrdersCreated {
        order_id: Uuid,
        count: usize,
    },
    FabricOrderStatusChanged {
        order_fabric_id: Uuid,
        old_status: String,
        new_status: String,
    },
    FabricStockReserved {
        fabric_id: Uuid,
        meters: Decimal,
    },
    FabricStockRestored {
        fabric_id: Uuid,
        meters: Decimal,
    },

    // Tailoring events
    AssignmentCreated {
        order_id: Uuid,
        tailor_id: Uuid,
    },
    AssignmentCompleted(Uuid),
    QualityCheckRecorded {
        order_id: Uuid,
        passed: bool,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event; failures are reported to the caller but callers treat
    /// them as non-fatal.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Fire-and-forget send used from the middle of request handling.
    pub async fn send_logged(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "event delivery failed");
        }
    }
}

/// Background consumer; currently an audit logger.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        info!(event = ?event, "domain event");
    }
    info!("event channel closed, processor exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_after_receiver_drop_reports_error() {
        let (tx, rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);
        drop(rx);
        assert!(sender.send(Event::OrderCreated(Uuid::new_v4())).await.is_err());
    }
}
