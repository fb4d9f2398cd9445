//! Alert events consumer
//!
//! Decodes alert events from the consumer group, keeps the ones meant for the
//! channel this service serves and hands each to the notifier on its own task.
//! Every message is acknowledged exactly once whatever the dispatch outcome, so
//! a single bad event never blocks its partition.

use super::group::{
    ConsumerError, ConsumerGroup, ConsumerState, GroupHandler, GroupSession, InboundMessage,
    PartitionClaim,
};
use crate::metrics::{ConsumerMetrics, METRICS_NAMESPACE};
use crate::models::{AlertEvent, TELEGRAM_METHOD};
use crate::services::{DispatchError, Notifier};
use async_trait::async_trait;
use opentelemetry_config::TraceContextExtractor;
use prometheus::Registry;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn, Instrument};

/// When a relevant message is acknowledged relative to its dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckMode {
    /// Ack once the dispatch task finished, whatever its outcome
    #[default]
    AfterDispatch,
    /// Ack as soon as the dispatch task is spawned
    OnReceipt,
}

impl FromStr for AckMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "after_dispatch" => Ok(AckMode::AfterDispatch),
            "on_receipt" => Ok(AckMode::OnReceipt),
            other => Err(format!(
                "unknown ack mode {:?} (expected after_dispatch or on_receipt)",
                other
            )),
        }
    }
}

impl fmt::Display for AckMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AckMode::AfterDispatch => f.write_str("after_dispatch"),
            AckMode::OnReceipt => f.write_str("on_receipt"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AlertConsumerConfig {
    pub topics: Vec<String>,
    /// Notification method this consumer serves
    pub notification_method: String,
    pub ack_mode: AckMode,
    /// Upper bound on concurrent dispatch tasks; 0 means unbounded
    pub max_in_flight_dispatches: usize,
    /// How long `run` waits for the group to leave its session on shutdown
    pub shutdown_grace: Duration,
}

impl Default for AlertConsumerConfig {
    fn default() -> Self {
        Self {
            topics: vec!["alerts".to_string()],
            notification_method: TELEGRAM_METHOD.to_string(),
            ack_mode: AckMode::default(),
            max_in_flight_dispatches: 0,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

/// Group handler serving alert partitions
pub struct AlertClaimHandler {
    notifier: Arc<dyn Notifier>,
    method: String,
    ack_mode: AckMode,
    permits: Option<Arc<Semaphore>>,
    tracker: TaskTracker,
    extractor: TraceContextExtractor,
    state: Arc<watch::Sender<ConsumerState>>,
    metrics: ConsumerMetrics,
}

impl AlertClaimHandler {
    async fn handle_message(&self, session: &GroupSession, message: InboundMessage) {
        self.metrics.messages_received_total.inc();

        let event = match message.payload.as_deref().map(AlertEvent::from_slice) {
            Some(Ok(event)) => event,
            Some(Err(e)) => {
                warn!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    error = %e,
                    "Dropping malformed alert event"
                );
                self.metrics.messages_malformed_total.inc();
                session.mark_message(&message);
                return;
            }
            None => {
                warn!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    "Dropping alert event with empty payload"
                );
                self.metrics.messages_malformed_total.inc();
                session.mark_message(&message);
                return;
            }
        };

        if !event.targets(&self.method) {
            debug!(
                request_id = %event.request_id,
                methods = ?event.notification_methods,
                "Skipping alert event for other channels"
            );
            self.metrics.messages_skipped_total.inc();
            session.mark_message(&message);
            return;
        }

        let permit = match &self.permits {
            Some(permits) => {
                tokio::select! {
                    biased;
                    // Left unacknowledged; the next owner of the partition gets it
                    _ = session.cancelled() => return,
                    acquired = permits.clone().acquire_owned() => acquired.ok(),
                }
            }
            None => None,
        };

        let span = tracing::info_span!(
            "alert_dispatch",
            request_id = %event.request_id,
            client_id = %event.client_id,
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
        );
        self.extractor.attach(&span, &message.headers);

        match self.ack_mode {
            AckMode::AfterDispatch => {
                let session = session.clone();
                self.spawn_dispatch(event, span, permit, move || {
                    session.mark_message(&message)
                });
            }
            AckMode::OnReceipt => {
                self.spawn_dispatch(event, span, permit, || {});
                session.mark_message(&message);
            }
        }
    }

    fn spawn_dispatch<F>(
        &self,
        event: AlertEvent,
        span: tracing::Span,
        permit: Option<OwnedSemaphorePermit>,
        on_done: F,
    ) where
        F: FnOnce() + Send + 'static,
    {
        let notifier = self.notifier.clone();
        let metrics = self.metrics.clone();
        metrics.dispatches_total.inc();
        metrics.dispatches_in_flight.inc();

        self.tracker.spawn(
            async move {
                match notifier.notify(&event).await {
                    Ok(()) => {
                        metrics.deliveries_total.inc();
                        info!("Alert notification delivered");
                    }
                    Err(e) => {
                        metrics.delivery_failures_total.inc();
                        log_dispatch_failure(&e);
                    }
                }
                on_done();
                metrics.dispatches_in_flight.dec();
                drop(permit);
            }
            .instrument(span),
        );
    }
}

fn log_dispatch_failure(err: &DispatchError) {
    match err {
        DispatchError::Resolve { source, .. } if source.is_not_found() => {
            warn!(error = %err, "No destination for alert; notification dropped");
        }
        _ => error!(error = %err, "Alert notification failed; notification dropped"),
    }
}

#[async_trait]
impl GroupHandler for AlertClaimHandler {
    async fn setup(&self, session: &GroupSession) -> Result<(), ConsumerError> {
        info!(
            generation = session.generation(),
            partitions = session.assignment().len(),
            "Alert consumer ready"
        );
        self.state.send_replace(ConsumerState::Ready);
        Ok(())
    }

    async fn cleanup(&self, session: &GroupSession) -> Result<(), ConsumerError> {
        debug!(generation = session.generation(), "Alert consumer session ended");
        self.state.send_replace(ConsumerState::Rebalancing);
        Ok(())
    }

    async fn consume_claim(
        &self,
        session: GroupSession,
        mut claim: PartitionClaim,
    ) -> Result<(), ConsumerError> {
        debug!(topic = %claim.topic(), partition = claim.partition(), "Claim started");

        loop {
            let message = tokio::select! {
                biased;
                _ = session.cancelled() => break,
                next = claim.next() => match next {
                    Some(message) => message,
                    None => break,
                },
            };
            self.handle_message(&session, message).await;
        }

        debug!(topic = %claim.topic(), partition = claim.partition(), "Claim finished");
        Ok(())
    }
}

/// Drives an [`AlertClaimHandler`] through a [`ConsumerGroup`] until shutdown
pub struct AlertEventsConsumer {
    group: Arc<dyn ConsumerGroup>,
    topics: Vec<String>,
    handler: Arc<AlertClaimHandler>,
    state: Arc<watch::Sender<ConsumerState>>,
    registry: Registry,
    metrics: ConsumerMetrics,
    tracker: TaskTracker,
    shutdown_grace: Duration,
}

impl AlertEventsConsumer {
    pub fn new(
        group: Arc<dyn ConsumerGroup>,
        notifier: Arc<dyn Notifier>,
        config: AlertConsumerConfig,
    ) -> Result<Self, ConsumerError> {
        let (state, _) = watch::channel(ConsumerState::Initialized);
        let state = Arc::new(state);
        let registry = Registry::new_custom(Some(METRICS_NAMESPACE.to_string()), None)?;
        let metrics = ConsumerMetrics::new(&registry)?;
        let tracker = TaskTracker::new();

        let permits = (config.max_in_flight_dispatches > 0)
            .then(|| Arc::new(Semaphore::new(config.max_in_flight_dispatches)));

        let handler = Arc::new(AlertClaimHandler {
            notifier,
            method: config.notification_method,
            ack_mode: config.ack_mode,
            permits,
            tracker: tracker.clone(),
            extractor: TraceContextExtractor::new(),
            state: state.clone(),
            metrics: metrics.clone(),
        });

        Ok(Self {
            group,
            topics: config.topics,
            handler,
            state,
            registry,
            metrics,
            tracker,
            shutdown_grace: config.shutdown_grace,
        })
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    /// Wait until the first session is set up; `false` if the consumer closed first
    pub async fn wait_ready(&self) -> bool {
        let mut rx = self.state.subscribe();
        let ready = rx
            .wait_for(|s| matches!(s, ConsumerState::Ready | ConsumerState::Closed))
            .await
            .map(|state| *state == ConsumerState::Ready)
            .unwrap_or(false);
        ready
    }

    pub fn metrics(&self) -> &ConsumerMetrics {
        &self.metrics
    }

    /// Registry holding the consumer metrics, for the `/metrics` endpoint
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Wait for already-spawned dispatches; `false` if `timeout` elapsed first
    pub async fn wait_for_in_flight(&self, timeout: Duration) -> bool {
        self.tracker.close();
        let drained = tokio::time::timeout(timeout, self.tracker.wait())
            .await
            .is_ok();
        if !drained {
            warn!(
                in_flight = self.tracker.len(),
                "Dispatches still running after drain timeout"
            );
        }
        drained
    }

    /// Consume until `shutdown` is cancelled (returns `Ok`) or the group fails.
    ///
    /// Spawned dispatches are never aborted; see [`Self::wait_for_in_flight`].
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), ConsumerError> {
        self.state.send_replace(ConsumerState::Joining);
        info!(
            topics = ?self.topics,
            method = %self.handler.method,
            ack_mode = %self.handler.ack_mode,
            "Starting alert consumer"
        );

        let (err_tx, mut err_rx) = mpsc::channel::<ConsumerError>(1);
        let group = self.group.clone();
        let topics = self.topics.clone();
        let handler: Arc<dyn GroupHandler> = self.handler.clone();
        let token = shutdown.clone();

        let mut join_loop = tokio::spawn(async move {
            while !token.is_cancelled() {
                if let Err(e) = group.consume(&topics, handler.clone(), &token).await {
                    if token.is_cancelled() {
                        debug!(error = %e, "Ignoring consumer group error during shutdown");
                    } else {
                        let _ = err_tx.send(e).await;
                    }
                    return;
                }
                tokio::task::yield_now().await;
            }
        });

        tokio::select! {
            biased;

            Some(err) = err_rx.recv() => {
                error!(error = %err, "Consumer group failed");
                self.state.send_replace(ConsumerState::Closed);
                Err(err)
            }

            _ = shutdown.cancelled() => {
                info!("Shutdown requested, stopping alert consumer");
                if tokio::time::timeout(self.shutdown_grace, &mut join_loop).await.is_err() {
                    warn!("Consumer group session did not end within grace period");
                    join_loop.abort();
                }
                self.close_group().await;
                Ok(())
            }

            joined = &mut join_loop => match joined {
                Err(e) => {
                    error!(error = %e, "Consumer join loop failed");
                    self.state.send_replace(ConsumerState::Closed);
                    Err(ConsumerError::JoinLoop(e.to_string()))
                }
                // Only exits cleanly once shutdown was requested
                Ok(()) => {
                    self.close_group().await;
                    Ok(())
                }
            },
        }
    }

    async fn close_group(&self) {
        if let Err(e) = self.group.close().await {
            warn!(error = %e, "Failed to close consumer group");
        }
        self.state.send_replace(ConsumerState::Closed);
        info!("Alert consumer stopped");
    }
}
