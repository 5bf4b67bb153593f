use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::entities::amendment::AmendmentKind;
use crate::entities::contract::ContractStatus;

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

    /// Sends an event after its transaction committed. A dropped receiver
    /// cannot undo the committed change, so failures are only logged.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "Event dropped after commit");
        }
    }
}

/// Facts published after an allocation-engine operation commits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    LotsAllocated {
        contract_item_id: Uuid,
        quantity: i32,
        lots: Vec<i64>,
    },
    AllocationReleased {
        contract_item_id: Uuid,
        quantity: i32,
    },
    ContractActivated {
        contract_id: Uuid,
        status: ContractStatus,
    },
    ContractPaymentConfirmed(Uuid),
    ContractClosed {
        contract_id: Uuid,
        status: ContractStatus,
    },
    AmendmentApplied {
        amendment_id: Uuid,
        contract_id: Uuid,
        kind: AmendmentKind,
    },
    AmendmentReverted {
        amendment_id: Uuid,
        contract_id: Uuid,
        kind: AmendmentKind,
    },
    /// Monthly monetary delta for the billing integration. Negative on
    /// reverts and reductions.
    BillingDeltaComputed {
        contract_id: Uuid,
        amendment_id: Uuid,
        monthly_delta: Decimal,
        computed_at: DateTime<Utc>,
    },
}

/// Handlers implementing this trait will process events asynchronously.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: Event) -> Result<(), String>;
}

/// Drains the channel and distributes each event to every handler.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, handlers: Vec<Arc<dyn EventHandler>>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::BillingDeltaComputed {
                contract_id,
                amendment_id,
                monthly_delta,
                ..
            } => info!(
                contract_id = %contract_id,
                amendment_id = %amendment_id,
                monthly_delta = %monthly_delta,
                "Billing delta ready"
            ),
            other => info!("Received event: {:?}", other),
        }

        let results = join_all(handlers.iter().map(|h| h.handle_event(event.clone()))).await;
        for e in results.into_iter().filter_map(Result::err) {
            error!(error = %e, "Event handler failed");
        }
    }

    warn!("Event processing loop has ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder(Mutex<Vec<Event>>);

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle_event(&self, event: Event) -> Result<(), String> {
            self.0.lock().map_err(|e| e.to_string())?.push(event);
            Ok(())
        }
    }

    #[tokio::test]
    async fn handlers_receive_every_event() {
        let (tx, rx) = mpsc::channel(8);
        let sender = EventSender::new(tx);
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));

        sender
            .send(Event::ContractPaymentConfirmed(Uuid::nil()))
            .await
            .unwrap();
        sender
            .send(Event::AllocationReleased {
                contract_item_id: Uuid::nil(),
                quantity: 3,
            })
            .await
            .unwrap();
        drop(sender);

        process_events(rx, vec![recorder.clone() as Arc<dyn EventHandler>]).await;

        assert_eq!(recorder.0.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn send_or_log_tolerates_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        EventSender::new(tx)
            .send_or_log(Event::ContractPaymentConfirmed(Uuid::nil()))
            .await;
    }
}
