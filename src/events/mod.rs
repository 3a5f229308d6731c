use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

/// In-process notifications emitted by ledger mutations and the metrics
/// pipeline. Consumers subscribe through the processor task; senders never
/// block on slow consumers beyond the channel capacity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    StoreCreated(Uuid),
    OrderCreated(Uuid),
    OrderLineAdded {
        order_id: Uuid,
        line_id: Uuid,
        quantity: i32,
    },
    OrderLineUpdated {
        order_id: Uuid,
        line_id: Uuid,
    },
    OrderLineRemoved {
        order_id: Uuid,
        line_id: Uuid,
    },
    PaymentRecorded {
        order_id: Uuid,
        payment_id: Uuid,
        amount: Decimal,
    },
    /// Balance reached zero; `paid_on` has been stamped.
    OrderPaid {
        order_id: Uuid,
        paid_on: NaiveDate,
    },
    MetricUpserted {
        store_id: Uuid,
        date: NaiveDate,
        kind: String,
    },
    JobDispatched {
        entry_id: Uuid,
        task: String,
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

    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {e}"))
    }
}

/// Creates an event channel with the given capacity.
pub fn channel(capacity: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender::new(tx), rx)
}

/// Drains the event channel, logging each event. Runs until every sender is
/// dropped.
pub fn spawn_event_processor(mut receiver: mpsc::Receiver<Event>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            info!(?event, "domain event");
        }
    })
}
