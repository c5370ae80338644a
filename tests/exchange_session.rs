mod common;

use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::sleep;

use amqp_exchange::config::ConnectionConfig;
use amqp_exchange::exchange::{ExchangeError, ExchangeSession, Role, SessionState, TransportError};
use amqp_exchange::message::{DestinationRef, Message};
use common::{FakeBroker, FakeTransport};

const ROUND_TRIP_BODY: &str = "Message with String Data";

fn config(attempts: u32) -> ConnectionConfig {
    ConnectionConfig {
        max_connection_attempts: attempts,
        ..ConnectionConfig::default()
    }
}

fn sender(broker: &FakeBroker, address: &str) -> ExchangeSession<FakeTransport> {
    ExchangeSession::new(
        config(3),
        DestinationRef::queue(address).unwrap(),
        Role::Sender,
        broker.transport(),
    )
    .unwrap()
}

fn receiver(broker: &FakeBroker, address: &str) -> ExchangeSession<FakeTransport> {
    ExchangeSession::new(
        config(3),
        DestinationRef::queue(address).unwrap(),
        Role::Receiver,
        broker.transport(),
    )
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_round_trip_through_queue() {
    let broker = FakeBroker::new();

    let mut producer = sender(&broker, "Q/test");
    let ack = producer.send(Message::new(ROUND_TRIP_BODY)).await.unwrap();
    assert_eq!(ack.destination, "Q/test");
    assert_eq!(broker.depth("Q/test"), 1);

    let mut consumer = receiver(&broker, "Q/test");
    let message = consumer.receive().await.unwrap();

    assert_eq!(message.body_text(), Some(ROUND_TRIP_BODY));
    assert_eq!(consumer.pending_outcome(), Some(&message));
    assert_eq!(broker.depth("Q/test"), 0);
    assert_eq!(broker.accepts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_send_yields_one_ack_and_no_duplicates() {
    let broker = FakeBroker::new();
    let mut producer = sender(&broker, "Q/test");

    producer.send(Message::new("first")).await.unwrap();
    let err = producer.send(Message::new("second")).await.unwrap_err();

    assert_eq!(
        err,
        ExchangeError::InvalidState {
            state: SessionState::Closed,
            operation: "send",
        }
    );
    assert_eq!(broker.sends(), 1);
    assert_eq!(broker.depth("Q/test"), 1);
    assert_eq!(broker.close_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_send_waits_for_drain_before_close() {
    let broker = FakeBroker::new();
    let mut producer = sender(&broker, "Q/test").with_drain_delay(Duration::from_millis(2000));

    let started = tokio::time::Instant::now();
    producer.send(Message::new("hello")).await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(2000));
    assert_eq!(producer.state(), SessionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_cuts_drain_short() {
    let broker = FakeBroker::new();
    let (cancel_tx, cancel_rx) = oneshot::channel();
    let mut producer = sender(&broker, "Q/test")
        .with_drain_delay(Duration::from_secs(60))
        .with_cancellation(cancel_rx);

    let started = tokio::time::Instant::now();
    let (result, _) = tokio::join!(producer.send(Message::new("hello")), async move {
        sleep(Duration::from_millis(100)).await;
        cancel_tx.send(()).unwrap();
    });

    // already settled by the broker, so the send still counts
    assert!(result.is_ok());
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(producer.state(), SessionState::Closed);
    assert_eq!(broker.depth("Q/test"), 1);
    assert_eq!(broker.close_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_receive_closes_exactly_once() {
    let broker = FakeBroker::new();
    broker.publish("Q/test", Message::new("hello"));

    let mut consumer = receiver(&broker, "Q/test");
    consumer.receive().await.unwrap();
    assert_eq!(broker.close_calls(), 1);

    consumer.close().await;
    assert_eq!(broker.close_calls(), 1);
    assert_eq!(consumer.state(), SessionState::Closed);

    let err = consumer.receive().await.unwrap_err();
    assert!(matches!(err, ExchangeError::InvalidState { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_receive_waits_for_late_message() {
    let broker = FakeBroker::new();
    let mut consumer = receiver(&broker, "Q/late");

    let publisher = broker.clone();
    let (received, _) = tokio::join!(consumer.receive(), async move {
        sleep(Duration::from_secs(30)).await;
        publisher.publish("Q/late", Message::new("finally"));
    });

    assert_eq!(received.unwrap().body_text(), Some("finally"));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_waiting_receive() {
    let broker = FakeBroker::new();
    let (cancel_tx, cancel_rx) = oneshot::channel();
    let mut consumer = receiver(&broker, "Q/empty").with_cancellation(cancel_rx);

    let (result, _) = tokio::join!(consumer.receive(), async move {
        sleep(Duration::from_millis(500)).await;
        cancel_tx.send(()).unwrap();
    });

    assert_eq!(result.unwrap_err(), ExchangeError::Cancelled);
    assert_eq!(consumer.state(), SessionState::Closed);
    assert_eq!(broker.close_calls(), 1);
    assert_eq!(broker.accepts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_backoff() {
    let broker = FakeBroker::new();
    broker.refuse_first(u32::MAX);
    let (cancel_tx, cancel_rx) = oneshot::channel();
    let mut producer = ExchangeSession::new(
        config(5),
        DestinationRef::queue("Q/test").unwrap(),
        Role::Sender,
        broker.transport(),
    )
    .unwrap()
    .with_cancellation(cancel_rx);

    // attempts at t=0 and t=1000ms, then a 2000ms wait that gets cancelled
    let (result, _) = tokio::join!(producer.send(Message::new("hello")), async move {
        sleep(Duration::from_millis(1500)).await;
        cancel_tx.send(()).unwrap();
    });

    assert_eq!(result.unwrap_err(), ExchangeError::Cancelled);
    assert_eq!(broker.connect_attempts(), 2);
    assert_eq!(broker.close_calls(), 1);
    assert_eq!(broker.sends(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_cancel_sender_does_not_cancel() {
    let broker = FakeBroker::new();
    broker.publish("Q/test", Message::new("kept"));
    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
    drop(cancel_tx);

    let mut consumer = receiver(&broker, "Q/test").with_cancellation(cancel_rx);
    let message = consumer.receive().await.unwrap();
    assert_eq!(message.body_text(), Some("kept"));
}

#[tokio::test(start_paused = true)]
async fn test_receive_timeout() {
    let broker = FakeBroker::new();
    let mut consumer =
        receiver(&broker, "Q/empty").with_receive_timeout(Some(Duration::from_millis(750)));

    let err = consumer.receive().await.unwrap_err();

    assert_eq!(err, ExchangeError::Timeout(Duration::from_millis(750)));
    assert_eq!(consumer.state(), SessionState::Closed);
    assert_eq!(broker.close_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_broker_accepting_third_attempt() {
    let broker = FakeBroker::new();
    broker.refuse_first(2);
    let mut producer = sender(&broker, "Q/test");

    producer.connect().await.unwrap();
    assert_eq!(producer.state(), SessionState::Connected);
    assert_eq!(producer.attempt_count(), 3);

    let ack = producer.send(Message::new("after retries")).await.unwrap();
    assert_eq!(ack.attempts, 3);
    assert_eq!(broker.connect_attempts(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_exhaustion_never_makes_extra_attempt() {
    for attempts in 1..=6 {
        let broker = FakeBroker::new();
        broker.refuse_first(u32::MAX);
        let mut producer = ExchangeSession::new(
            config(attempts),
            DestinationRef::queue("Q/test").unwrap(),
            Role::Sender,
            broker.transport(),
        )
        .unwrap();

        let err = producer.send(Message::new("hello")).await.unwrap_err();

        assert_eq!(
            err,
            ExchangeError::ConnectionExhausted {
                attempts,
                last_error: TransportError::Connect("connection refused".into()),
            }
        );
        assert_eq!(broker.connect_attempts(), attempts);
        assert_eq!(producer.state(), SessionState::Closed);
        assert_eq!(broker.close_calls(), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_rejected_send_is_fatal() {
    let broker = FakeBroker::new();
    broker.reject_sends("amqp:resource-limit-exceeded");
    let mut producer = sender(&broker, "Q/test");

    let err = producer.send(Message::new("hello")).await.unwrap_err();

    assert_eq!(
        err,
        ExchangeError::ProtocolRejected("amqp:resource-limit-exceeded".into())
    );
    assert_eq!(broker.sends(), 1);
    assert_eq!(broker.depth("Q/test"), 0);
    assert_eq!(producer.state(), SessionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_topic_publish_and_subscribe() {
    let broker = FakeBroker::new();
    let topic = DestinationRef::topic("T/tutorial").unwrap();

    let mut subscriber = ExchangeSession::new(
        config(1),
        topic.clone(),
        Role::Receiver,
        broker.transport(),
    )
    .unwrap();
    let mut publisher =
        ExchangeSession::new(config(1), topic, Role::Sender, broker.transport()).unwrap();

    let (received, sent) = tokio::join!(subscriber.receive(), async {
        sleep(Duration::from_millis(100)).await;
        publisher.send(Message::new(ROUND_TRIP_BODY)).await
    });

    assert!(sent.is_ok());
    assert_eq!(received.unwrap().body_text(), Some(ROUND_TRIP_BODY));
}
