mod common;

use alert_notifier_service::consumers::{
    AckMode, AlertConsumerConfig, AlertEventsConsumer, ConsumerError, ConsumerState,
};
use alert_notifier_service::models::{AlertEvent, Destination};
use alert_notifier_service::services::{NotificationDispatcher, Notifier};
use common::{
    alert_payload, message, wait_until, GatedNotifier, RecordingSender, Script, ScriptedGroup,
    StubResolver,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

struct Harness {
    group: Arc<ScriptedGroup>,
    consumer: Arc<AlertEventsConsumer>,
    shutdown: CancellationToken,
    run: JoinHandle<Result<(), ConsumerError>>,
}

impl Harness {
    fn start(scripts: Vec<Script>, notifier: Arc<dyn Notifier>, config: AlertConsumerConfig) -> Self {
        let group = Arc::new(ScriptedGroup::new(scripts));
        let consumer = Arc::new(AlertEventsConsumer::new(group.clone(), notifier, config).unwrap());
        let shutdown = CancellationToken::new();
        let run = tokio::spawn({
            let consumer = consumer.clone();
            let shutdown = shutdown.clone();
            async move { consumer.run(shutdown).await }
        });
        Self {
            group,
            consumer,
            shutdown,
            run,
        }
    }

    async fn stop(self) -> Result<(), ConsumerError> {
        self.shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), self.run)
            .await
            .expect("run did not return after cancellation")
            .expect("run task panicked")
    }
}

fn config(ack_mode: AckMode) -> AlertConsumerConfig {
    AlertConsumerConfig {
        ack_mode,
        shutdown_grace: Duration::from_secs(1),
        ..AlertConsumerConfig::default()
    }
}

fn deliver(messages: Vec<alert_notifier_service::consumers::InboundMessage>) -> Script {
    Script::Deliver {
        messages,
        revoke: false,
    }
}

#[tokio::test]
async fn test_other_channels_are_skipped_and_acked() {
    let notifier = Arc::new(GatedNotifier::open());
    let payload = alert_payload(&["email", "sms"], "abc123", Uuid::new_v4());
    let harness = Harness::start(
        vec![deliver(vec![message(0, Some(payload))])],
        notifier.clone(),
        config(AckMode::AfterDispatch),
    );

    let acker = harness.group.acker.clone();
    wait_until(|| acker.offsets() == vec![0]).await;
    assert_eq!(notifier.started(), 0);

    let metrics = harness.consumer.metrics();
    assert_eq!(metrics.messages_received_total.get(), 1);
    assert_eq!(metrics.messages_skipped_total.get(), 1);
    assert_eq!(metrics.dispatches_total.get(), 0);
    harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_malformed_and_empty_payloads_are_acked() {
    let notifier = Arc::new(GatedNotifier::open());
    let harness = Harness::start(
        vec![deliver(vec![
            message(0, Some(b"{not json".to_vec())),
            message(1, None),
            message(2, Some(br#"{"notificationMethods":["telegram"]}"#.to_vec())),
        ])],
        notifier.clone(),
        config(AckMode::AfterDispatch),
    );

    let acker = harness.group.acker.clone();
    wait_until(|| acker.count() == 3).await;
    assert_eq!(acker.offsets(), vec![0, 1, 2]);
    assert_eq!(notifier.started(), 0);
    assert_eq!(harness.consumer.metrics().messages_malformed_total.get(), 3);
    harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_relevant_event_is_sent_to_resolved_destination() {
    let sender = Arc::new(RecordingSender::default());
    let dispatcher = Arc::new(NotificationDispatcher::new(
        Arc::new(StubResolver::with("abc123", "chat-42")),
        sender.clone(),
    ));
    let request_id = Uuid::new_v4();
    let payload = alert_payload(&["telegram"], "abc123", request_id);
    let original = AlertEvent::from_slice(&payload).unwrap();

    let mut traced = message(0, Some(payload));
    traced.headers.insert(
        "traceparent".to_string(),
        "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01".to_string(),
    );

    let harness = Harness::start(
        vec![deliver(vec![traced])],
        dispatcher,
        config(AckMode::AfterDispatch),
    );

    let acker = harness.group.acker.clone();
    wait_until(|| acker.count() == 1).await;

    let sent = sender.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, Destination::new("chat-42"));
    assert_eq!(sent[0].1, original);
    assert_eq!(harness.consumer.metrics().deliveries_total.get(), 1);
    harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_request_id_is_dispatched_twice() {
    let sender = Arc::new(RecordingSender::default());
    let dispatcher = Arc::new(NotificationDispatcher::new(
        Arc::new(StubResolver::with("abc123", "42")),
        sender.clone(),
    ));
    let payload = alert_payload(&["telegram"], "abc123", Uuid::new_v4());

    let harness = Harness::start(
        vec![deliver(vec![
            message(0, Some(payload.clone())),
            message(1, Some(payload)),
        ])],
        dispatcher,
        config(AckMode::AfterDispatch),
    );

    let acker = harness.group.acker.clone();
    wait_until(|| acker.count() == 2).await;
    assert_eq!(sender.count(), 2);

    let metrics = harness.consumer.metrics();
    assert_eq!(metrics.dispatches_total.get(), 2);
    assert_eq!(metrics.deliveries_total.get(), 2);
    assert_eq!(metrics.delivery_failures_total.get(), 0);
    harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_failed_dispatch_is_still_acked() {
    let notifier = Arc::new(GatedNotifier::failing());
    let payload = alert_payload(&["telegram"], "unknown", Uuid::new_v4());
    let harness = Harness::start(
        vec![deliver(vec![message(0, Some(payload))])],
        notifier.clone(),
        config(AckMode::AfterDispatch),
    );

    let acker = harness.group.acker.clone();
    wait_until(|| acker.count() == 1).await;
    let metrics = harness.consumer.metrics();
    assert_eq!(metrics.delivery_failures_total.get(), 1);
    assert_eq!(metrics.dispatches_in_flight.get(), 0);
    harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_cancellation_with_idle_claim_returns_ok() {
    let notifier = Arc::new(GatedNotifier::open());
    let harness = Harness::start(vec![], notifier.clone(), config(AckMode::AfterDispatch));

    assert!(harness.consumer.wait_ready().await);
    assert_eq!(harness.consumer.state(), ConsumerState::Ready);

    let consumer = harness.consumer.clone();
    let group = harness.group.clone();
    harness.stop().await.unwrap();

    assert_eq!(consumer.state(), ConsumerState::Closed);
    assert!(group.is_closed());
    assert_eq!(notifier.started(), 0);
}

#[tokio::test]
async fn test_cancellation_stops_buffered_messages() {
    let notifier = Arc::new(GatedNotifier::closed());
    let harness = Harness::start(
        vec![deliver(vec![
            message(0, Some(alert_payload(&["telegram"], "a", Uuid::new_v4()))),
            message(1, Some(alert_payload(&["telegram"], "b", Uuid::new_v4()))),
            message(2, Some(alert_payload(&["telegram"], "c", Uuid::new_v4()))),
        ])],
        notifier.clone(),
        AlertConsumerConfig {
            max_in_flight_dispatches: 1,
            ..config(AckMode::AfterDispatch)
        },
    );

    // Offset 0 holds the only permit, offset 1 waits for it, offset 2 is still queued
    let consumer = harness.consumer.clone();
    wait_until(|| notifier.started() == 1).await;
    wait_until(|| consumer.metrics().messages_received_total.get() == 2).await;

    let acker = harness.group.acker.clone();
    harness.stop().await.unwrap();
    notifier.release(3);
    assert!(consumer.wait_for_in_flight(Duration::from_secs(2)).await);

    assert_eq!(notifier.started(), 1);
    assert_eq!(consumer.metrics().messages_received_total.get(), 2);
    assert_eq!(consumer.metrics().dispatches_total.get(), 1);
    assert_eq!(acker.offsets(), vec![0]);
}

#[tokio::test]
async fn test_message_waiting_for_permit_is_neither_dispatched_nor_acked() {
    let notifier = Arc::new(GatedNotifier::closed());
    let harness = Harness::start(
        vec![deliver(vec![
            message(0, Some(alert_payload(&["telegram"], "a", Uuid::new_v4()))),
            message(1, Some(alert_payload(&["telegram"], "b", Uuid::new_v4()))),
        ])],
        notifier.clone(),
        AlertConsumerConfig {
            max_in_flight_dispatches: 1,
            ..config(AckMode::OnReceipt)
        },
    );

    let consumer = harness.consumer.clone();
    let acker = harness.group.acker.clone();
    wait_until(|| consumer.metrics().messages_received_total.get() == 2).await;
    // On receipt: offset 0 is acked as soon as its dispatch is spawned
    assert_eq!(acker.offsets(), vec![0]);

    harness.stop().await.unwrap();
    notifier.release(2);
    assert!(consumer.wait_for_in_flight(Duration::from_secs(2)).await);

    assert_eq!(notifier.started(), 1);
    assert_eq!(notifier.finished(), 1);
    assert_eq!(acker.offsets(), vec![0]);
}

#[tokio::test]
async fn test_join_loop_panic_is_returned_as_error() {
    let notifier = Arc::new(GatedNotifier::open());
    let group = Arc::new(ScriptedGroup::new(vec![Script::Panic]));
    let consumer =
        AlertEventsConsumer::new(group.clone(), notifier, config(AckMode::AfterDispatch)).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(2), consumer.run(CancellationToken::new()))
        .await
        .expect("run did not return");

    assert!(matches!(result, Err(ConsumerError::JoinLoop(_))));
    assert!(!group.is_closed());
    assert_eq!(consumer.state(), ConsumerState::Closed);
}

#[tokio::test]
async fn test_group_error_is_returned_without_closing() {
    let notifier = Arc::new(GatedNotifier::open());
    let group = Arc::new(ScriptedGroup::new(vec![Script::Fail(ConsumerError::Handler(
        "broker unreachable".to_string(),
    ))]));
    let consumer =
        AlertEventsConsumer::new(group.clone(), notifier, config(AckMode::AfterDispatch)).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(2), consumer.run(CancellationToken::new()))
        .await
        .expect("run did not return");

    assert!(matches!(result, Err(ConsumerError::Handler(msg)) if msg == "broker unreachable"));
    assert!(!group.is_closed());
    assert_eq!(consumer.state(), ConsumerState::Closed);
    assert!(!consumer.wait_ready().await);
}

#[tokio::test]
async fn test_after_dispatch_acks_only_when_dispatch_finishes() {
    let notifier = Arc::new(GatedNotifier::closed());
    let payload = alert_payload(&["telegram"], "abc123", Uuid::new_v4());
    let harness = Harness::start(
        vec![deliver(vec![message(0, Some(payload))])],
        notifier.clone(),
        config(AckMode::AfterDispatch),
    );

    wait_until(|| notifier.started() == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(harness.group.acker.count(), 0);

    notifier.release(1);
    let acker = harness.group.acker.clone();
    wait_until(|| acker.offsets() == vec![0]).await;
    harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_on_receipt_acks_before_dispatch_finishes() {
    let notifier = Arc::new(GatedNotifier::closed());
    let payload = alert_payload(&["telegram"], "abc123", Uuid::new_v4());
    let harness = Harness::start(
        vec![deliver(vec![message(0, Some(payload))])],
        notifier.clone(),
        config(AckMode::OnReceipt),
    );

    let acker = harness.group.acker.clone();
    wait_until(|| acker.offsets() == vec![0]).await;
    assert_eq!(notifier.finished(), 0);

    notifier.release(1);
    wait_until(|| notifier.finished() == 1).await;
    assert_eq!(acker.count(), 1);
    harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_partition_loop_does_not_wait_for_dispatch() {
    let notifier = Arc::new(GatedNotifier::closed());
    let harness = Harness::start(
        vec![deliver(vec![
            message(0, Some(alert_payload(&["telegram"], "a", Uuid::new_v4()))),
            message(1, Some(alert_payload(&["telegram"], "b", Uuid::new_v4()))),
            message(2, Some(alert_payload(&["telegram"], "c", Uuid::new_v4()))),
        ])],
        notifier.clone(),
        config(AckMode::AfterDispatch),
    );

    // All three are in flight at once although none has finished
    wait_until(|| notifier.started() == 3).await;
    notifier.release(3);
    let acker = harness.group.acker.clone();
    wait_until(|| acker.count() == 3).await;
    harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_in_flight_cap_limits_concurrent_dispatches() {
    let notifier = Arc::new(GatedNotifier::closed());
    let harness = Harness::start(
        vec![deliver(vec![
            message(0, Some(alert_payload(&["telegram"], "a", Uuid::new_v4()))),
            message(1, Some(alert_payload(&["telegram"], "b", Uuid::new_v4()))),
        ])],
        notifier.clone(),
        AlertConsumerConfig {
            max_in_flight_dispatches: 1,
            ..config(AckMode::AfterDispatch)
        },
    );

    wait_until(|| notifier.started() == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(notifier.started(), 1);

    notifier.release(1);
    wait_until(|| notifier.started() == 2).await;
    notifier.release(1);
    let acker = harness.group.acker.clone();
    wait_until(|| acker.count() == 2).await;
    harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_rejoins_after_rebalance() {
    let notifier = Arc::new(GatedNotifier::open());
    let harness = Harness::start(
        vec![
            Script::Deliver {
                messages: vec![message(
                    0,
                    Some(alert_payload(&["telegram"], "a", Uuid::new_v4())),
                )],
                revoke: true,
            },
            deliver(vec![message(
                1,
                Some(alert_payload(&["telegram"], "b", Uuid::new_v4())),
            )]),
        ],
        notifier.clone(),
        config(AckMode::AfterDispatch),
    );

    let acker = harness.group.acker.clone();
    wait_until(|| acker.offsets() == vec![0, 1]).await;
    assert_eq!(notifier.finished(), 2);
    assert!(harness.group.consume_calls() >= 2);

    let consumer = harness.consumer.clone();
    wait_until(|| consumer.state() == ConsumerState::Ready).await;
    harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_wait_for_in_flight_drains_spawned_dispatches() {
    let notifier = Arc::new(GatedNotifier::closed());
    let payload = alert_payload(&["telegram"], "abc123", Uuid::new_v4());
    let harness = Harness::start(
        vec![deliver(vec![message(0, Some(payload))])],
        notifier.clone(),
        config(AckMode::AfterDispatch),
    );

    wait_until(|| notifier.started() == 1).await;
    let consumer = harness.consumer.clone();
    let acker = harness.group.acker.clone();
    harness.stop().await.unwrap();

    // Cancellation does not abort the dispatch
    assert!(!consumer.wait_for_in_flight(Duration::from_millis(20)).await);
    notifier.release(1);
    assert!(consumer.wait_for_in_flight(Duration::from_secs(2)).await);
    assert_eq!(notifier.finished(), 1);
    assert_eq!(acker.offsets(), vec![0]);
}
