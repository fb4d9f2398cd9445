//! Consumer-group runtime seam
//!
//! A [`ConsumerGroup`] owns the broker connection and drives a [`GroupHandler`]
//! through one session per rebalance epoch: `setup` once the assignment is
//! active, one `consume_claim` per assigned partition, and `cleanup` once the
//! assignment is revoked. Handlers acknowledge messages through the session.

use async_trait::async_trait;
use rdkafka::error::KafkaError;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Consumer lifecycle errors
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),

    #[error("handler error: {0}")]
    Handler(String),

    #[error("consumer group is closed")]
    Closed,

    #[error("consumer join loop failed: {0}")]
    JoinLoop(String),

    #[error("metrics registration failed: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Observable lifecycle of an alert consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Initialized,
    Joining,
    Ready,
    Rebalancing,
    Closed,
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConsumerState::Initialized => "initialized",
            ConsumerState::Joining => "joining",
            ConsumerState::Ready => "ready",
            ConsumerState::Rebalancing => "rebalancing",
            ConsumerState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// A message handed to a partition claim, detached from the client buffers
#[derive(Debug, Clone, Default)]
pub struct InboundMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Option<Vec<u8>>,
    /// UTF-8 headers only; binary header values are dropped
    pub headers: HashMap<String, String>,
}

/// Marks messages as processed so the group can commit past them
pub trait MessageAcker: Send + Sync {
    fn mark_message(&self, message: &InboundMessage);
}

/// One rebalance epoch of group membership
#[derive(Clone)]
pub struct GroupSession {
    generation: u64,
    assignment: Vec<(String, i32)>,
    cancel: CancellationToken,
    acker: Arc<dyn MessageAcker>,
}

impl GroupSession {
    pub fn new(
        generation: u64,
        assignment: Vec<(String, i32)>,
        cancel: CancellationToken,
        acker: Arc<dyn MessageAcker>,
    ) -> Self {
        Self {
            generation,
            assignment,
            cancel,
            acker,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Topic/partition pairs owned by this member for the session
    pub fn assignment(&self) -> &[(String, i32)] {
        &self.assignment
    }

    /// Acknowledge a message. Safe to call after the session ended.
    pub fn mark_message(&self, message: &InboundMessage) {
        self.acker.mark_message(message);
    }

    /// End the session; claims observe it through [`GroupSession::cancelled`]
    pub fn end(&self) {
        self.cancel.cancel();
    }

    /// Resolves once the session is over (revocation or shutdown)
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

/// Ordered message feed for a single assigned partition
pub struct PartitionClaim {
    topic: String,
    partition: i32,
    messages: mpsc::Receiver<InboundMessage>,
}

impl PartitionClaim {
    pub fn new(topic: impl Into<String>, partition: i32, messages: mpsc::Receiver<InboundMessage>) -> Self {
        Self {
            topic: topic.into(),
            partition,
            messages,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    /// Next message, or `None` once the group stops feeding this claim
    pub async fn next(&mut self) -> Option<InboundMessage> {
        self.messages.recv().await
    }
}

/// Callbacks driven by a [`ConsumerGroup`]
#[async_trait]
pub trait GroupHandler: Send + Sync {
    /// Assignment became active
    async fn setup(&self, _session: &GroupSession) -> Result<(), ConsumerError> {
        Ok(())
    }

    /// Assignment is being revoked; all claims have returned
    async fn cleanup(&self, _session: &GroupSession) -> Result<(), ConsumerError> {
        Ok(())
    }

    /// Serve one partition until the session is cancelled
    async fn consume_claim(
        &self,
        session: GroupSession,
        claim: PartitionClaim,
    ) -> Result<(), ConsumerError>;
}

#[async_trait]
pub trait ConsumerGroup: Send + Sync {
    /// Join the group and serve a single session.
    ///
    /// Returns `Ok(())` when the session ends by revocation or because
    /// `shutdown` was cancelled; callers re-enter to rejoin.
    async fn consume(
        &self,
        topics: &[String],
        handler: Arc<dyn GroupHandler>,
        shutdown: &CancellationToken,
    ) -> Result<(), ConsumerError>;

    /// Leave the group
    async fn close(&self) -> Result<(), ConsumerError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingAcker(Mutex<Vec<i64>>);

    impl MessageAcker for RecordingAcker {
        fn mark_message(&self, message: &InboundMessage) {
            self.0.lock().unwrap().push(message.offset);
        }
    }

    #[test]
    fn test_session_marks_through_acker() {
        let acker = Arc::new(RecordingAcker::default());
        let session = GroupSession::new(
            1,
            vec![("alerts".to_string(), 0)],
            CancellationToken::new(),
            acker.clone(),
        );

        session.mark_message(&InboundMessage {
            offset: 7,
            ..Default::default()
        });

        assert_eq!(*acker.0.lock().unwrap(), vec![7]);
        assert_eq!(session.assignment(), &[("alerts".to_string(), 0)]);
    }

    #[tokio::test]
    async fn test_claim_ends_when_feed_closes() {
        let (tx, rx) = mpsc::channel(1);
        let mut claim = PartitionClaim::new("alerts", 3, rx);
        tx.send(InboundMessage::default()).await.unwrap();
        drop(tx);

        assert!(claim.next().await.is_some());
        assert!(claim.next().await.is_none());
        assert_eq!(claim.partition(), 3);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConsumerState::Rebalancing.to_string(), "rebalancing");
    }
}
