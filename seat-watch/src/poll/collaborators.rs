//! Interfaces to the services the poll loop hands results to.

use async_trait::async_trait;
use tracing::info;

use crate::changes::{ChangeEvent, ChangeSummary};
use crate::domain::{SeatClass, SeatLabels, TrainRecord};
use crate::listing::QueryTarget;

/// Receives the change events of each cycle.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(
        &self,
        target: &QueryTarget,
        events: &[ChangeEvent],
    ) -> Result<(), NotificationError>;
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Attempts to book a train that matched the order criteria.
#[async_trait]
pub trait OrderCollaborator: Send + Sync {
    /// Try to book `record` in one of `seat_classes`, in preference order.
    async fn attempt(
        &self,
        target: &QueryTarget,
        record: &TrainRecord,
        seat_classes: &[SeatClass],
    ) -> Result<OrderOutcome, OrderError>;
}

/// How an order attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderOutcome {
    Booked {
        order_id: String,
        seat_class: SeatClass,
    },
    /// The service declined; the reason is for logging.
    NotBooked(String),
}

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("session expired")]
    SessionExpired,
    #[error("order submission failed: {0}")]
    Submission(String),
}

/// Notification sink that writes events to the log.
#[derive(Debug, Clone, Default)]
pub struct LogSink {
    labels: SeatLabels,
}

impl LogSink {
    pub fn new(labels: SeatLabels) -> Self {
        Self { labels }
    }
}

#[async_trait]
impl NotificationSink for LogSink {
    async fn notify(
        &self,
        target: &QueryTarget,
        events: &[ChangeEvent],
    ) -> Result<(), NotificationError> {
        info!(%target, changes = %ChangeSummary::of(events), "Seat availability changed");
        for event in events {
            let seat = self.labels.label_for(event.seat_class());
            match event.previous() {
                Some(previous) => info!(
                    train = event.train_code(),
                    seat,
                    %previous,
                    current = %event.current(),
                    "{event}"
                ),
                None => info!(
                    train = event.train_code(),
                    seat,
                    current = %event.current(),
                    "{event}"
                ),
            }
        }
        Ok(())
    }
}
