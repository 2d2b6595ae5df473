//! # Relay Delivery Failure Tests
//!
//! How a running relay reacts when the collection endpoint misbehaves after a
//! successful startup probe.

use std::time::Duration;

use lib_famup::{Relay, RelayError, StopReason};
use tokio_util::sync::CancellationToken;

use project_tests::support::{MockCollector, Reply, beast_producer, beast_record, settings};

fn two_batches() -> Vec<Vec<u8>> {
    vec![
        beast_record(b'2', 1, 10, &[0x5d, 0x48, 0x40, 0xd6, 0x20, 0x2c, 0xc3]),
        beast_record(b'2', 2, 20, &[0x5d, 0x48, 0x40, 0xd6, 0x20, 0x2c, 0xc4]),
    ]
}

#[tokio::test]
async fn test_midrun_401_is_fatal() {
    let collector = MockCollector::start(vec![Reply::Status(200), Reply::Status(401)]).await;
    let (feed_port, producer) =
        beast_producer(two_batches(), Duration::from_millis(50), Duration::from_secs(3)).await;

    let relay = Relay::start(settings(feed_port, collector.port()))
        .await
        .unwrap();
    let err = relay.run(&CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, RelayError::Unauthorized(_)));
    assert_eq!(collector.posts().len(), 1);
    producer.abort();
}

#[tokio::test]
async fn test_rejected_posts_are_not_retried_and_loop_continues() {
    let collector = MockCollector::start(vec![Reply::Status(200), Reply::Status(500)]).await;
    let (feed_port, producer) = beast_producer(
        two_batches(),
        Duration::from_millis(100),
        Duration::from_millis(200),
    )
    .await;

    let relay = Relay::start(settings(feed_port, collector.port()))
        .await
        .unwrap();
    let sink = relay.sink();
    let reason = relay.run(&CancellationToken::new()).await.unwrap();
    producer.await.unwrap();

    // The 500 did not stop the loop; the feed closing did.
    assert_eq!(reason, StopReason::FeedLost);
    assert_eq!(sink.current_version(), 2);
    let posts = collector.posts();
    assert_eq!(posts.len(), 2);
    assert_ne!(posts[0].data(), posts[1].data());
}

#[tokio::test]
async fn test_transport_failures_exhaust_delivery_path() {
    let collector =
        MockCollector::start(vec![Reply::Status(200), Reply::Hangup, Reply::Hangup]).await;
    let (feed_port, producer) = beast_producer(
        two_batches(),
        Duration::from_millis(100),
        Duration::from_secs(3),
    )
    .await;

    let mut settings = settings(feed_port, collector.port());
    settings.max_delivery_failures = 2;

    let relay = Relay::start(settings).await.unwrap();
    let reason = relay.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(reason, StopReason::DeliveryLost);
    assert_eq!(collector.posts().len(), 2);
    producer.abort();
}
