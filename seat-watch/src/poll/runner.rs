//! The poll loop.
//!
//! One cycle is: borrow an egress, run one listing query, decode it into a
//! snapshot, diff against the previous snapshot, hand events to the
//! notification sink, try orders when new seats appeared, return the egress
//! and report the outcome to the pacing controller. [`PollLoop::run`] repeats
//! cycles, waiting as the pacing controller says, until it is stopped, the
//! daily quota runs out (under [`QuotaPolicy::Stop`]) or an order succeeds.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::changes::{self, ChangeSummary};
use crate::domain::{Snapshot, TrainRecord};
use crate::egress::{EgressRotator, SharedRotator};
use crate::listing::{ListingSource, QueryTarget, RecordParser};
use crate::pacing::{Clock, Failure, FailureKind, PacingController, PacingMode, SystemClock};

use super::collaborators::{NotificationSink, OrderCollaborator, OrderOutcome};
use super::criteria::OrderCriteria;

/// Longest uninterrupted sleep while paused; the stop flag is checked
/// between slices.
const PAUSE_SLICE: Duration = Duration::from_secs(1);

/// What to do once the daily quota is spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaPolicy {
    /// Sleep, then check again. Resumes after the local date rolls over.
    #[default]
    Pause,
    /// Return from [`PollLoop::run`].
    Stop,
}

/// Loop behaviour settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub quota_policy: QuotaPolicy,
    /// Sleep between quota checks under [`QuotaPolicy::Pause`] (seconds).
    pub pause_secs: u64,
    /// Most trains to try ordering in one cycle.
    pub max_order_attempts: usize,
}

impl RunConfig {
    pub fn pause(&self) -> Duration {
        Duration::from_secs(self.pause_secs)
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            quota_policy: QuotaPolicy::Pause,
            pause_secs: 60,
            max_order_attempts: 3,
        }
    }
}

/// Why [`PollLoop::run`] returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The stop flag was set.
    Cancelled,
    /// The daily quota ran out under [`QuotaPolicy::Stop`].
    DailyLimit,
    /// An order went through.
    Booked { train_code: String, order_id: String },
}

/// Result of one query cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The query succeeded.
    Polled { trains: usize, changes: ChangeSummary },
    /// The query failed and was reported to the pacing controller.
    Failed(Failure),
    /// New seats appeared and an order went through.
    Booked { train_code: String, order_id: String },
}

/// Polls one (route, date) target.
pub struct PollLoop<S, C: Clock = SystemClock> {
    target: QueryTarget,
    source: S,
    parser: RecordParser,
    pacing: PacingController<C>,
    egress: SharedRotator,
    sink: Arc<dyn NotificationSink>,
    orders: Option<Arc<dyn OrderCollaborator>>,
    criteria: OrderCriteria,
    run: RunConfig,
    previous: Option<Snapshot>,
    stop: Arc<AtomicBool>,
}

impl<S: ListingSource, C: Clock> PollLoop<S, C> {
    pub fn new(
        target: QueryTarget,
        source: S,
        parser: RecordParser,
        pacing: PacingController<C>,
        egress: SharedRotator,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            target,
            source,
            parser,
            pacing,
            egress,
            sink,
            orders: None,
            criteria: OrderCriteria::default(),
            run: RunConfig::default(),
            previous: None,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Try orders through `orders` when new seats appear.
    pub fn with_orders(mut self, orders: Arc<dyn OrderCollaborator>, criteria: OrderCriteria) -> Self {
        self.orders = Some(orders);
        self.criteria = criteria;
        self
    }

    pub fn with_run_config(mut self, run: RunConfig) -> Self {
        self.run = run;
        self
    }

    /// Use an externally owned stop flag.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    /// Handle that stops the loop at the next iteration boundary.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn target(&self) -> &QueryTarget {
        &self.target
    }

    pub fn pacing(&self) -> &PacingController<C> {
        &self.pacing
    }

    /// The snapshot from the last successful cycle.
    pub fn previous(&self) -> Option<&Snapshot> {
        self.previous.as_ref()
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Poll until stopped, out of quota under [`QuotaPolicy::Stop`], or
    /// booked.
    pub async fn run(&mut self) -> StopReason {
        info!(route = %self.target, "Polling started");

        loop {
            if self.stopped() {
                info!(route = %self.target, "Polling cancelled");
                return StopReason::Cancelled;
            }

            if self.pacing.should_stop() {
                if self.pacing.mode() == PacingMode::Banned {
                    let cooldown = self.pacing.get_interval();
                    warn!(
                        route = %self.target,
                        cooldown_secs = cooldown.as_secs(),
                        "Banned, waiting out cooldown"
                    );
                    self.pause(cooldown).await;
                    continue;
                }

                match self.run.quota_policy {
                    QuotaPolicy::Stop => {
                        warn!(route = %self.target, "Daily limit reached, stopping");
                        return StopReason::DailyLimit;
                    }
                    QuotaPolicy::Pause => {
                        debug!(pause_secs = self.run.pause_secs, "Daily limit reached, pausing");
                        self.pause(self.run.pause()).await;
                        continue;
                    }
                }
            }

            self.pacing.wait_interval().await;

            if let CycleOutcome::Booked {
                train_code,
                order_id,
            } = self.run_cycle().await
            {
                return StopReason::Booked {
                    train_code,
                    order_id,
                };
            }
        }
    }

    /// Run exactly one query cycle, without waiting first.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let lease = EgressRotator::lease_from(&self.egress).await;

        let result = self.source.query(&self.target, lease.egress()).await;
        self.egress.lock().await.release(lease, result.is_ok());

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                warn!(route = %self.target, error = %e, "Query failed");
                let failure = e.failure();
                self.pacing.on_failure(&failure);
                return CycleOutcome::Failed(failure);
            }
        };
        self.pacing.on_success();

        let captured_at = self.pacing.clock().now();
        let snapshot = self
            .parser
            .parse_listing(&response, self.target.date, captured_at);
        let events = changes::diff(&snapshot, self.previous.as_ref());
        let summary = ChangeSummary::of(&events);

        debug!(
            route = %self.target,
            trains = snapshot.len(),
            changes = %summary,
            status = %self.pacing.status(),
            "Cycle complete"
        );

        if !events.is_empty() {
            if let Err(e) = self.sink.notify(&self.target, &events).await {
                warn!(error = %e, "Notification failed");
            }
        }

        let booked = if summary.has_new_availability() {
            self.try_orders(&snapshot).await
        } else {
            None
        };

        let trains = snapshot.len();
        self.previous = Some(snapshot);

        match booked {
            Some((train_code, order_id)) => CycleOutcome::Booked {
                train_code,
                order_id,
            },
            None => CycleOutcome::Polled {
                trains,
                changes: summary,
            },
        }
    }

    /// Offer matching trains to the order collaborator. Returns the booked
    /// train code and order id.
    async fn try_orders(&mut self, snapshot: &Snapshot) -> Option<(String, String)> {
        let orders = self.orders.clone()?;

        let candidates: Vec<&TrainRecord> = self
            .criteria
            .filter(snapshot)
            .into_iter()
            .take(self.run.max_order_attempts)
            .collect();

        for record in candidates {
            let code = record.code().unwrap_or_default().to_string();
            let classes = self.criteria.matching_classes(record);
            info!(train = %code, "Attempting order");

            match orders.attempt(&self.target, record, &classes).await {
                Ok(OrderOutcome::Booked {
                    order_id,
                    seat_class,
                }) => {
                    info!(train = %code, %seat_class, %order_id, "Order booked");
                    return Some((code, order_id));
                }
                Ok(OrderOutcome::NotBooked(reason)) => {
                    warn!(train = %code, %reason, "Order not booked");
                }
                Err(e) => {
                    warn!(train = %code, error = %e, "Order failed");
                    self.pacing
                        .on_failure(&Failure::new(FailureKind::Rejected).with_message(e.to_string()));
                }
            }
        }

        None
    }

    /// Sleep for `duration`, returning early when the stop flag is set.
    async fn pause(&self, duration: Duration) {
        let deadline = tokio::time::Instant::now() + duration;
        while !self.stopped() {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep((deadline - now).min(PAUSE_SLICE)).await;
        }
    }
}
