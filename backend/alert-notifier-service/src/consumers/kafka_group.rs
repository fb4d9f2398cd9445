//! Kafka consumer group backed by rdkafka
//!
//! Runs with `enable.auto.commit=true` and `enable.auto.offset.store=false`:
//! acknowledging a message stores `offset + 1` for its partition and the
//! background auto-commit publishes it.

use super::group::{
    ConsumerError, ConsumerGroup, GroupHandler, GroupSession, InboundMessage, MessageAcker,
    PartitionClaim,
};
use async_trait::async_trait;
use futures::StreamExt;
use rdkafka::consumer::{Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::message::{Headers, Message};
use rdkafka::{ClientConfig, ClientContext, TopicPartitionList};
use dashmap::DashMap;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Connection and membership settings for the group
#[derive(Debug, Clone)]
pub struct KafkaGroupConfig {
    pub brokers: String,
    pub group_id: String,
    pub session_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub max_poll_interval_ms: u64,
    /// Messages buffered per partition claim before polling pauses
    pub claim_buffer: usize,
}

impl Default for KafkaGroupConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            group_id: "alert-notifier".to_string(),
            session_timeout_ms: 20_000,
            heartbeat_interval_ms: 6_000,
            max_poll_interval_ms: 300_000,
            claim_buffer: 256,
        }
    }
}

impl KafkaGroupConfig {
    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &self.group_id)
            .set("partition.assignment.strategy", "roundrobin")
            .set("auto.offset.reset", "earliest")
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false")
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", self.session_timeout_ms.to_string())
            .set("heartbeat.interval.ms", self.heartbeat_interval_ms.to_string())
            .set("max.poll.interval.ms", self.max_poll_interval_ms.to_string());
        config
    }
}

#[derive(Debug)]
enum GroupEvent {
    Assigned(Vec<(String, i32)>),
    Revoked,
}

/// Forwards rebalance callbacks to the polling task
struct GroupContext {
    events: mpsc::UnboundedSender<GroupEvent>,
}

impl ClientContext for GroupContext {}

impl ConsumerContext for GroupContext {
    fn pre_rebalance<'a>(&self, rebalance: &Rebalance<'a>) {
        if let Rebalance::Revoke(partitions) = rebalance {
            info!(partitions = partitions.count(), "Partitions revoked");
            let _ = self.events.send(GroupEvent::Revoked);
        }
    }

    fn post_rebalance<'a>(&self, rebalance: &Rebalance<'a>) {
        match rebalance {
            Rebalance::Assign(partitions) => {
                info!(partitions = partitions.count(), "Partitions assigned");
                let _ = self.events.send(GroupEvent::Assigned(pairs(partitions)));
            }
            Rebalance::Revoke(_) => {}
            Rebalance::Error(e) => warn!(error = %e, "Rebalance error"),
        }
    }
}

type GroupConsumer = StreamConsumer<GroupContext>;

/// Offsets of one partition within a session
#[derive(Debug, Default)]
struct PartitionOffsets {
    in_flight: BTreeSet<i64>,
    highest_acked: Option<i64>,
    stored: Option<i64>,
}

impl PartitionOffsets {
    /// Record an ack and return the next offset to store, if it moved forward.
    ///
    /// Acks may arrive out of order; the stored offset never passes a message
    /// that is still in flight.
    fn ack(&mut self, offset: i64) -> Option<i64> {
        self.in_flight.remove(&offset);
        let highest = self.highest_acked.map_or(offset, |h| h.max(offset));
        self.highest_acked = Some(highest);

        let next = match self.in_flight.first() {
            Some(&lowest) => lowest,
            None => highest + 1,
        };
        if self.stored.map_or(true, |stored| next > stored) {
            self.stored = Some(next);
            Some(next)
        } else {
            None
        }
    }
}

/// Stores offsets on the shared consumer
struct OffsetStore {
    consumer: Arc<GroupConsumer>,
    partitions: DashMap<(String, i32), PartitionOffsets>,
}

impl OffsetStore {
    fn new(consumer: Arc<GroupConsumer>) -> Self {
        Self {
            consumer,
            partitions: DashMap::new(),
        }
    }

    /// Register a message handed to a claim
    fn track(&self, message: &InboundMessage) {
        self.partitions
            .entry((message.topic.clone(), message.partition))
            .or_default()
            .in_flight
            .insert(message.offset);
    }
}

impl MessageAcker for OffsetStore {
    fn mark_message(&self, message: &InboundMessage) {
        let next = self
            .partitions
            .entry((message.topic.clone(), message.partition))
            .or_default()
            .ack(message.offset);
        let Some(next) = next else { return };

        // Fails once the partition has moved to another member; the new owner
        // re-reads from the last committed offset.
        if let Err(e) = self
            .consumer
            .store_offset(&message.topic, message.partition, next)
        {
            warn!(
                topic = %message.topic,
                partition = message.partition,
                offset = next,
                error = %e,
                "Failed to store offset"
            );
        }
    }
}

pub struct KafkaConsumerGroup {
    consumer: Arc<GroupConsumer>,
    events: Mutex<mpsc::UnboundedReceiver<GroupEvent>>,
    claim_buffer: usize,
    generation: AtomicU64,
    subscribed: AtomicBool,
    closed: AtomicBool,
}

impl KafkaConsumerGroup {
    pub fn new(config: &KafkaGroupConfig) -> Result<Self, ConsumerError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let consumer: GroupConsumer = config
            .client_config()
            .create_with_context(GroupContext { events: tx })?;

        info!(
            brokers = %config.brokers,
            group_id = %config.group_id,
            "Kafka consumer group created"
        );

        Ok(Self {
            consumer: Arc::new(consumer),
            events: Mutex::new(rx),
            claim_buffer: config.claim_buffer.max(1),
            generation: AtomicU64::new(0),
            subscribed: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    fn subscribe_once(&self, topics: &[String]) -> Result<(), ConsumerError> {
        if self.subscribed.load(Ordering::SeqCst) {
            return Ok(());
        }
        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.consumer.subscribe(&topic_refs)?;
        self.subscribed.store(true, Ordering::SeqCst);
        info!(topics = ?topics, "Subscribed to topics");
        Ok(())
    }

    async fn open_session(
        &self,
        assignment: Vec<(String, i32)>,
        handler: &Arc<dyn GroupHandler>,
        shutdown: &CancellationToken,
    ) -> Result<ActiveSession, ConsumerError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let offsets = Arc::new(OffsetStore::new(self.consumer.clone()));
        let session = GroupSession::new(
            generation,
            assignment,
            shutdown.child_token(),
            offsets.clone(),
        );

        handler.setup(&session).await?;
        debug!(generation, "Group session started");

        Ok(ActiveSession {
            session,
            offsets,
            claims: HashMap::new(),
            tasks: JoinSet::new(),
        })
    }
}

/// Session bookkeeping owned by the polling task
struct ActiveSession {
    session: GroupSession,
    offsets: Arc<OffsetStore>,
    claims: HashMap<(String, i32), mpsc::Sender<InboundMessage>>,
    tasks: JoinSet<Result<(), ConsumerError>>,
}

impl ActiveSession {
    fn feed(
        &mut self,
        message: &InboundMessage,
        handler: &Arc<dyn GroupHandler>,
        buffer: usize,
    ) -> mpsc::Sender<InboundMessage> {
        let key = (message.topic.clone(), message.partition);
        if let Some(tx) = self.claims.get(&key) {
            return tx.clone();
        }

        let (tx, rx) = mpsc::channel(buffer);
        let claim = PartitionClaim::new(message.topic.clone(), message.partition, rx);
        let handler = handler.clone();
        let session = self.session.clone();
        self.tasks
            .spawn(async move { handler.consume_claim(session, claim).await });
        self.claims.insert(key, tx.clone());
        tx
    }

    /// Cancel the session, wait for every claim to return, then run cleanup
    async fn finish(mut self, handler: &Arc<dyn GroupHandler>) -> Result<(), ConsumerError> {
        self.session.end();
        self.claims.clear();

        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Partition claim ended with error"),
                Err(e) => warn!(error = %e, "Partition claim task failed"),
            }
        }

        handler.cleanup(&self.session).await?;
        debug!(generation = self.session.generation(), "Group session ended");
        Ok(())
    }
}

#[async_trait]
impl ConsumerGroup for KafkaConsumerGroup {
    async fn consume(
        &self,
        topics: &[String],
        handler: Arc<dyn GroupHandler>,
        shutdown: &CancellationToken,
    ) -> Result<(), ConsumerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ConsumerError::Closed);
        }
        self.subscribe_once(topics)?;

        let mut events = self.events.lock().await;
        let mut stream = self
            .consumer
            .stream()
            .map(|polled| polled.map(|message| to_inbound(&message)));
        let mut active: Option<ActiveSession> = None;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                Some(event) = events.recv() => match event {
                    GroupEvent::Assigned(assignment) => {
                        if active.is_none() {
                            active = Some(self.open_session(assignment, &handler, shutdown).await?);
                        }
                    }
                    GroupEvent::Revoked => {
                        if active.is_some() {
                            break;
                        }
                    }
                },

                polled = stream.next() => match polled {
                    Some(Ok(message)) => {
                        if active.is_none() {
                            let assignment = pairs(&self.consumer.assignment()?);
                            active = Some(self.open_session(assignment, &handler, shutdown).await?);
                        }
                        let Some(current) = active.as_mut() else { continue };
                        let tx = current.feed(&message, &handler, self.claim_buffer);
                        current.offsets.track(&message);

                        tokio::select! {
                            sent = tx.send(message) => {
                                if sent.is_err() {
                                    debug!("Partition claim already returned; message left for redelivery");
                                }
                            }
                            _ = shutdown.cancelled() => break,
                        }
                    }
                    Some(Err(e)) => {
                        if let Some(current) = active.take() {
                            current.finish(&handler).await?;
                        }
                        return Err(e.into());
                    }
                    None => {
                        if let Some(current) = active.take() {
                            current.finish(&handler).await?;
                        }
                        return Err(ConsumerError::Closed);
                    }
                },
            }
        }

        if let Some(current) = active.take() {
            current.finish(&handler).await?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), ConsumerError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.consumer.unsubscribe();
        info!("Left consumer group");
        Ok(())
    }
}

fn pairs(partitions: &TopicPartitionList) -> Vec<(String, i32)> {
    partitions
        .elements()
        .iter()
        .map(|elem| (elem.topic().to_string(), elem.partition()))
        .collect()
}

fn to_inbound<M: Message>(message: &M) -> InboundMessage {
    let headers = message
        .headers()
        .map(|headers| {
            headers
                .iter()
                .filter_map(|header| {
                    let value = std::str::from_utf8(header.value?).ok()?;
                    Some((header.key.to_string(), value.to_string()))
                })
                .collect()
        })
        .unwrap_or_default();

    InboundMessage {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        payload: message.payload().map(<[u8]>::to_vec),
        headers,
    }
}
