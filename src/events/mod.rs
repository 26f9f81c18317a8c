use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Thin wrapper over the event channel handed to every service.
#[derive(Clone, Debug)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Creates a bounded channel and returns both ends.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Events are published after commit; a closed channel must not fail the request.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "dropping domain event");
        }
    }
}

/// Domain events emitted after each committed state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    OrderPlaced {
        order_id: Uuid,
        user_id: Uuid,
        payment_method: String,
        final_total: i64,
    },
    OrderPaid {
        order_id: Uuid,
        payment_id: Option<String>,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    OrderCancelled {
        order_id: Uuid,
        refunded: i64,
    },
    OrderItemCancelled {
        order_id: Uuid,
        item_id: Uuid,
        refunded: i64,
    },
    ItemCancellationRequested {
        order_id: Uuid,
        item_id: Uuid,
    },
    ItemReturnRequested {
        order_id: Uuid,
        item_id: Uuid,
    },
    ItemReviewed {
        order_id: Uuid,
        item_id: Uuid,
        kind: String,
        approved: bool,
    },
    ReturnRequested {
        order_id: Uuid,
    },
    ReturnApproved {
        order_id: Uuid,
        refunded: i64,
    },
    ReturnRejected {
        order_id: Uuid,
    },
    StockAdjusted {
        book_id: Uuid,
        delta: i32,
        stock: i32,
    },
    WalletCredited {
        wallet_id: Uuid,
        amount: i64,
        reference: String,
    },
    WalletDebited {
        wallet_id: Uuid,
        amount: i64,
        reference: String,
    },
    CouponApplied {
        user_id: Uuid,
        code: String,
    },
    CouponRemoved {
        user_id: Uuid,
    },
    CouponConsumed {
        user_id: Uuid,
        coupon_id: Uuid,
        order_id: Uuid,
    },
}

/// Drains the channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderPlaced {
                order_id,
                payment_method,
                final_total,
                ..
            } => info!(
                order_id = %order_id,
                payment_method = %payment_method,
                final_total = final_total,
                "order placed"
            ),
            Event::OrderCancelled { order_id, refunded } => {
                info!(order_id = %order_id, refunded = refunded, "order cancelled")
            }
            Event::ReturnApproved { order_id, refunded } => {
                info!(order_id = %order_id, refunded = refunded, "order return approved")
            }
            other => debug!(event = ?other, "domain event"),
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_fails_once_receiver_dropped() {
        let (sender, rx) = EventSender::channel(4);
        sender
            .send(Event::ReturnRequested { order_id: Uuid::new_v4() })
            .await
            .unwrap();
        drop(rx);

        assert!(sender
            .send(Event::ReturnRejected { order_id: Uuid::new_v4() })
            .await
            .is_err());
        sender.send_or_log(Event::CouponRemoved { user_id: Uuid::new_v4() }).await;
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(Event::OrderCancelled {
            order_id: Uuid::nil(),
            refunded: 900,
        })
        .unwrap();
        assert_eq!(json["type"], "order_cancelled");
        assert_eq!(json["refunded"], 900);
    }
}
