use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Handle for emitting domain events from services.
///
/// Sending is fire-and-forget from the caller's perspective; a full or
/// closed channel is reported as an error string and callers log it as a
/// warning rather than failing the request.
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

// The events that can occur in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated(Uuid),
    OrderPaid(Uuid),
    OrderDelivered(Uuid),
    OrderDeleted(Uuid),
    CouponCreated(Uuid),
    CouponDeleted(Uuid),
}

/// Drains the event channel, logging each event. Runs as a background task
/// for the lifetime of the process.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::OrderCreated(order_id) => {
                info!("Order created: {}", order_id);
            }
            Event::OrderPaid(order_id) => {
                info!("Order paid: {}", order_id);
            }
            Event::OrderDelivered(order_id) => {
                info!("Order delivered: {}", order_id);
            }
            Event::OrderDeleted(order_id) => {
                info!("Order deleted and stock returned: {}", order_id);
            }
            Event::CouponCreated(coupon_id) => {
                info!("Coupon created: {}", coupon_id);
            }
            Event::CouponDeleted(coupon_id) => {
                info!("Coupon deleted: {}", coupon_id);
            }
        }
    }

    warn!("Event processing loop has ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_delivers_to_processing_loop() {
        let (tx, rx) = mpsc::channel(8);
        let sender = EventSender::new(tx);
        let handle = tokio::spawn(process_events(rx));

        sender
            .send(Event::OrderCreated(Uuid::new_v4()))
            .await
            .unwrap();
        drop(sender);

        // Loop exits once all senders are gone
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn send_fails_after_receiver_dropped() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);

        assert!(sender
            .send(Event::OrderDeleted(Uuid::new_v4()))
            .await
            .is_err());
    }
}
