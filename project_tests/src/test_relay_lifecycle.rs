//! # Relay Lifecycle Integration Tests
//!
//! Starts real relays against a local Beast producer and a scripted collection
//! endpoint, then checks startup failures, end-to-end delivery and the
//! different ways a running relay stops.

use std::time::Duration;

use lib_famup::feed::FeedError;
use lib_famup::{DeliveryError, Relay, SetupError, StopReason};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use project_tests::support::{MockCollector, Reply, beast_producer, beast_record, closed_port, settings};

const DF17: [u8; 14] = [
    0x8d, 0x48, 0x40, 0xd6, 0x20, 0x2c, 0xc3, 0x71, 0xc3, 0x2c, 0xe0, 0x57, 0x60, 0x98,
];

#[tokio::test]
async fn test_unreachable_feed_fails_setup() {
    let collector = MockCollector::start(vec![]).await;
    let feed_port = closed_port();

    let err = Relay::start(settings(feed_port, collector.port()))
        .await
        .unwrap_err();

    assert!(matches!(err, SetupError::Feed(FeedError::Connect { .. })));
    let text = err.to_string();
    assert!(text.contains(&format!("127.0.0.1:{}", feed_port)), "{}", text);
    assert!(text.contains("is dump1090 running?"), "{}", text);
    assert!(collector.requests().is_empty());
}

#[tokio::test]
async fn test_probe_401_never_enters_loop() {
    let collector = MockCollector::start(vec![Reply::Status(401)]).await;
    let (feed_port, producer) = beast_producer(
        vec![beast_record(b'3', 1, 100, &DF17)],
        Duration::from_millis(10),
        Duration::from_millis(200),
    )
    .await;

    let err = Relay::start(settings(feed_port, collector.port()))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SetupError::Delivery(DeliveryError::Unauthorized { .. })
    ));

    tokio::time::sleep(Duration::from_millis(100)).await;
    let requests = collector.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "GET");
    producer.abort();
}

#[tokio::test]
async fn test_frames_reach_collector_then_feed_loss_stops() {
    let collector = MockCollector::start(vec![]).await;
    let (feed_port, producer) = beast_producer(
        vec![
            beast_record(b'3', 0x0102_0304_0506, 0xc8, &DF17),
            beast_record(b'1', 0x1a, 0x1a, &[0x12, 0x34]),
        ],
        Duration::from_millis(50),
        Duration::from_millis(150),
    )
    .await;

    let relay = Relay::start(settings(feed_port, collector.port()))
        .await
        .unwrap();
    let sink = relay.sink();
    let reason = relay.run(&CancellationToken::new()).await.unwrap();
    producer.await.unwrap();

    assert_eq!(reason, StopReason::FeedLost);

    let requests = collector.requests();
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[0].header("authorization"), Some("Basic c3RhdGlvbjpzM2NyZXQ="));

    // One POST per published version, never one per tick.
    let posts = collector.posts();
    assert!(!posts.is_empty());
    assert_eq!(posts.len() as u64, sink.current_version());

    let mut hexes = Vec::new();
    for post in &posts {
        let doc: Value = serde_json::from_str(&post.data().unwrap()).unwrap();
        assert_eq!(doc["station"]["maxRangeNm"], 300.0);
        for frame in doc["frames"].as_array().unwrap() {
            hexes.push(frame["hex"].as_str().unwrap().to_string());
        }
    }
    assert_eq!(hexes, vec!["8d4840d6202cc371c32ce0576098".to_string(), "1234".to_string()]);

    // The last POST carried exactly what the sink holds now.
    assert_eq!(
        posts.last().unwrap().data().unwrap(),
        sink.current_payload().to_string()
    );
}

#[tokio::test]
async fn test_idle_feed_posts_nothing_and_cancel_stops() {
    let collector = MockCollector::start(vec![]).await;
    let (feed_port, producer) = beast_producer(vec![], Duration::ZERO, Duration::from_secs(5)).await;

    let relay = Relay::start(settings(feed_port, collector.port()))
        .await
        .unwrap();
    let feed = relay.feed_gauge();
    assert_eq!(feed.connections(), 1);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        trigger.cancel();
    });

    let reason = relay.run(&cancel).await.unwrap();
    assert_eq!(reason, StopReason::Cancelled);
    assert!(collector.posts().is_empty());
    assert_eq!(feed.connections(), 0);
    producer.abort();
}
