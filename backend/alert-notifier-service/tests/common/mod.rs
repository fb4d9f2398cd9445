//! Shared test doubles for the consumer and dispatcher tests
#![allow(dead_code)]

use alert_notifier_service::consumers::{
    ConsumerError, ConsumerGroup, GroupHandler, GroupSession, InboundMessage, MessageAcker,
    PartitionClaim,
};
use alert_notifier_service::models::{AlertEvent, Destination};
use alert_notifier_service::services::{
    DeliveryError, DeliverySender, DestinationResolver, DispatchError, Notifier, ResolveError,
};
use async_trait::async_trait;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const TOPIC: &str = "alerts";

pub fn alert_payload(methods: &[&str], client_id: &str, request_id: Uuid) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "notificationMethods": methods,
        "ts": "2024-01-01T00:00:00Z",
        "requestID": request_id,
        "clientID": client_id,
        "messageType": "audio",
    }))
    .unwrap()
}

pub fn message(offset: i64, payload: Option<Vec<u8>>) -> InboundMessage {
    InboundMessage {
        topic: TOPIC.to_string(),
        partition: 0,
        offset,
        payload,
        headers: HashMap::new(),
    }
}

/// Poll `cond` until it holds, failing the test after two seconds
pub async fn wait_until<F: Fn() -> bool>(cond: F) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[derive(Default)]
pub struct RecordingAcker {
    offsets: Mutex<Vec<i64>>,
}

impl RecordingAcker {
    pub fn offsets(&self) -> Vec<i64> {
        self.offsets.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.offsets.lock().unwrap().len()
    }
}

impl MessageAcker for RecordingAcker {
    fn mark_message(&self, message: &InboundMessage) {
        self.offsets.lock().unwrap().push(message.offset);
    }
}

pub enum Script {
    /// Serve one session on partition 0 with these messages.
    /// With `revoke`, the session ends once every message is acked;
    /// otherwise it stays open until shutdown.
    Deliver {
        messages: Vec<InboundMessage>,
        revoke: bool,
    },
    /// Fail the join with this error
    Fail(ConsumerError),
    /// Panic inside the join
    Panic,
}

/// In-memory consumer group that plays scripted sessions, then idles
#[derive(Default)]
pub struct ScriptedGroup {
    scripts: Mutex<VecDeque<Script>>,
    pub acker: Arc<RecordingAcker>,
    consume_calls: AtomicUsize,
    closed: AtomicBool,
}

impl ScriptedGroup {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            ..Default::default()
        }
    }

    pub fn consume_calls(&self) -> usize {
        self.consume_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConsumerGroup for ScriptedGroup {
    async fn consume(
        &self,
        _topics: &[String],
        handler: Arc<dyn GroupHandler>,
        shutdown: &CancellationToken,
    ) -> Result<(), ConsumerError> {
        let generation = self.consume_calls.fetch_add(1, Ordering::SeqCst) as u64 + 1;
        let script = self.scripts.lock().unwrap().pop_front();
        let (messages, revoke) = match script {
            Some(Script::Fail(err)) => return Err(err),
            Some(Script::Panic) => panic!("scripted consumer group panic"),
            Some(Script::Deliver { messages, revoke }) => (messages, revoke),
            None => (Vec::new(), false),
        };

        let session = GroupSession::new(
            generation,
            vec![(TOPIC.to_string(), 0)],
            shutdown.child_token(),
            self.acker.clone(),
        );
        handler.setup(&session).await?;

        let (tx, rx) = mpsc::channel(messages.len().max(1));
        let claim = tokio::spawn({
            let handler = handler.clone();
            let session = session.clone();
            async move {
                handler
                    .consume_claim(session, PartitionClaim::new(TOPIC, 0, rx))
                    .await
            }
        });

        let expected_acks = self.acker.count() + messages.len();
        for message in messages {
            let _ = tx.send(message).await;
        }

        if revoke {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = async {
                    while self.acker.count() < expected_acks {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                    }
                } => {}
            }
        } else {
            shutdown.cancelled().await;
        }

        session.end();
        let _ = claim.await;
        handler.cleanup(&session).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), ConsumerError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Resolver backed by a fixed map
#[derive(Default)]
pub struct StubResolver {
    destinations: HashMap<String, Destination>,
    backend_down: bool,
}

impl StubResolver {
    pub fn with(client_id: &str, destination: &str) -> Self {
        let mut destinations = HashMap::new();
        destinations.insert(client_id.to_string(), Destination::new(destination));
        Self {
            destinations,
            backend_down: false,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            destinations: HashMap::new(),
            backend_down: true,
        }
    }
}

#[async_trait]
impl DestinationResolver for StubResolver {
    async fn get_destination(&self, client_id: &str) -> Result<Destination, ResolveError> {
        if self.backend_down {
            return Err(ResolveError::Backend("connection refused".to_string()));
        }
        self.destinations
            .get(client_id)
            .cloned()
            .ok_or_else(|| ResolveError::NotFound(client_id.to_string()))
    }
}

/// Sender that records every call and optionally fails
#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<(Destination, AlertEvent)>>,
    fail_with_transport: bool,
}

impl RecordingSender {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail_with_transport: true,
        }
    }

    pub fn sent(&self) -> Vec<(Destination, AlertEvent)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl DeliverySender for RecordingSender {
    async fn send(
        &self,
        destination: &Destination,
        event: &AlertEvent,
    ) -> Result<(), DeliveryError> {
        self.sent
            .lock()
            .unwrap()
            .push((destination.clone(), event.clone()));
        if self.fail_with_transport {
            return Err(DeliveryError::Transport("connection reset".to_string()));
        }
        Ok(())
    }
}

/// Notifier that records events and can hold each call until released
pub struct GatedNotifier {
    started: Mutex<Vec<AlertEvent>>,
    finished: AtomicUsize,
    gate: Option<Semaphore>,
    fail: bool,
}

impl GatedNotifier {
    /// Completes immediately
    pub fn open() -> Self {
        Self {
            started: Mutex::new(Vec::new()),
            finished: AtomicUsize::new(0),
            gate: None,
            fail: false,
        }
    }

    /// Every call waits for a [`GatedNotifier::release`] permit
    pub fn closed() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::open()
        }
    }

    /// Completes immediately with a resolve failure
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::open()
        }
    }

    pub fn release(&self, calls: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(calls);
        }
    }

    pub fn started(&self) -> usize {
        self.started.lock().unwrap().len()
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for GatedNotifier {
    async fn notify(&self, event: &AlertEvent) -> Result<(), DispatchError> {
        self.started.lock().unwrap().push(event.clone());
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        self.finished.fetch_add(1, Ordering::SeqCst);

        if self.fail {
            return Err(DispatchError::Resolve {
                client_id: event.client_id.clone(),
                source: ResolveError::NotFound(event.client_id.clone()),
            });
        }
        Ok(())
    }
}
