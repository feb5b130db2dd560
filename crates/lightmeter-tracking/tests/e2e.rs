// SPDX-FileCopyrightText: 2026 Lightmeter Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests of the tracking pipeline.
//!
//! Each test runs a real tracker on a temp workspace through
//! `TrackerHarness`, feeds it Postfix-shaped records and asserts on the
//! published results. Tests are independent and order-insensitive.

use lightmeter_config::NodeType;
use lightmeter_core::{MessageDirection, Record, ResultKey, SmtpStatus};
use lightmeter_test_utils::{RecordBuilder, TrackerHarness};

fn bounced_recipient_log(b: &RecordBuilder) -> Vec<Record> {
    vec![
        b.connect("client1", "1.2.3.4"),
        b.noqueue_reject(),
        b.cleanup("A1", "id1@sender.com"),
        b.mail_queued("A1", "user", "sender.com", 512, 1),
        b.bounced("A1", "invalid.email", "example.com", "5.1.1"),
        b.bounce_created("A1", "B1"),
        b.mail_queued("B1", "", "", 900, 1),
        b.sent("B1", "user", "sender.com"),
        b.removed("A1"),
        b.removed("B1"),
        b.disconnect("client1", 0, 0),
    ]
}

// ---- Scenario 1: Single-hop bounced recipient ----

#[tokio::test]
async fn test_bounced_recipient_and_its_notification() {
    let mut harness = TrackerHarness::builder().build().await.unwrap();
    let b = RecordBuilder::new("mx.sender.com");

    harness.publish_all(bounced_recipient_log(&b)).await.unwrap();
    let results = harness.wait_for_results(2).await.unwrap();
    assert_eq!(results.len(), 2);

    let bounce = &results[0];
    assert_eq!(bounce.sender().as_deref(), Some("user@sender.com"));
    assert_eq!(bounce.recipient().as_deref(), Some("invalid.email@example.com"));
    assert_eq!(bounce.status(), Some(SmtpStatus::Bounced));
    assert_eq!(bounce.text(ResultKey::ResultDsn), Some("5.1.1"));
    assert_eq!(bounce.direction(), Some(MessageDirection::Outbound));
    assert_eq!(bounce.text(ResultKey::QueueMessageId), Some("id1@sender.com"));

    let notification = &results[1];
    assert_eq!(notification.sender().as_deref(), Some(""));
    assert_eq!(notification.recipient().as_deref(), Some("user@sender.com"));
    assert_eq!(notification.status(), Some(SmtpStatus::Sent));
    assert_eq!(notification.text(ResultKey::ResultDsn), Some("2.0.0"));
    assert_eq!(notification.direction(), Some(MessageDirection::Outbound));

    harness.finish().await.unwrap();
    let counts = harness.counts().await.unwrap();
    assert!(counts.is_empty(), "leftover rows: {counts:?}");
}

// ---- Scenario 2: Deferred then delivered ----

#[tokio::test]
async fn test_deferred_then_sent_in_order() {
    let mut harness = TrackerHarness::builder().build().await.unwrap();
    let b = RecordBuilder::new("mx");

    harness
        .publish_all([
            b.connect("client", "1.2.3.4"),
            b.mail_accepted("Q", "client", "1.2.3.4"),
            b.cleanup("Q", "m1@sender.com"),
            b.mail_queued("Q", "user", "sender.com", 1024, 1),
            b.deferred("Q", "rcpt", "example.com"),
            b.sent("Q", "rcpt", "example.com"),
            b.removed("Q"),
            b.disconnect("client", 0, 0),
        ])
        .await
        .unwrap();

    let results = harness.wait_for_results(2).await.unwrap();
    let statuses: Vec<_> = results.iter().map(|r| r.status()).collect();
    assert_eq!(statuses, vec![Some(SmtpStatus::Deferred), Some(SmtpStatus::Sent)]);
    for result in &results {
        assert_eq!(result.text(ResultKey::QueueMessageId), Some("m1@sender.com"));
        assert_eq!(result.sender().as_deref(), Some("user@sender.com"));
        assert_eq!(result.text(ResultKey::ConnectionClientHostname), Some("client"));
    }

    harness.finish().await.unwrap();
    assert!(harness.counts().await.unwrap().is_empty());
}

// ---- Scenario 3: Locally delivered inbound ----

#[tokio::test]
async fn test_local_delivery_is_incoming() {
    let mut harness = TrackerHarness::builder().build().await.unwrap();
    let b = RecordBuilder::new("mail.our.tld");

    harness
        .publish_all([
            b.connect("sender.example.com", "203.0.113.7"),
            b.mail_accepted("Q1", "sender.example.com", "203.0.113.7"),
            b.mail_queued("Q1", "someone", "example.com", 2048, 1),
            b.delivered_locally("Q1", "local", "our.tld"),
            b.removed("Q1"),
        ])
        .await
        .unwrap();

    let results = harness.wait_for_results(1).await.unwrap();
    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert_eq!(result.direction(), Some(MessageDirection::Incoming));
    assert_eq!(result.recipient().as_deref(), Some("local@our.tld"));
    assert_eq!(result.text(ResultKey::ResultDeliveryServer), Some("mail.our.tld"));

    harness.stop().await.unwrap();
}

// ---- Scenario 4: Multi-hop relay with gap ----

#[tokio::test]
async fn test_relay_gap_resolves_when_upstream_arrives() {
    let mut harness = TrackerHarness::builder()
        .with_node_type(NodeType::Multi)
        .build()
        .await
        .unwrap();
    let node_a = RecordBuilder::new("node-a");
    let node_b = RecordBuilder::new("node-b");

    harness
        .publish_all([
            node_b.mail_queued("Q2", "user", "sender.com", 700, 1),
            node_b.sent("Q2", "rcpt", "example.com"),
            node_b.removed("Q2"),
        ])
        .await
        .unwrap();
    harness.settle().await;
    assert!(harness.results().is_empty(), "published before the upstream hop was read");

    harness
        .publish_all([
            node_a.connect("client", "1.2.3.4"),
            node_a.mail_accepted("Q1", "client", "1.2.3.4"),
            node_a.mail_queued("Q1", "user", "sender.com", 650, 1),
            node_a.sent_queued("Q1", "rcpt", "example.com", "Q2", true, 10025),
            node_a.removed("Q1"),
            node_a.disconnect("client", 1, 1),
        ])
        .await
        .unwrap();

    let results = harness.wait_for_results(1).await.unwrap();
    harness.settle().await;
    assert_eq!(harness.results().len(), 1);

    let result = &results[0];
    assert_eq!(result.recipient().as_deref(), Some("rcpt@example.com"));
    assert_eq!(result.text(ResultKey::QueueDeliveryName), Some("Q2"));
    assert_eq!(result.status(), Some(SmtpStatus::Sent));

    harness.finish().await.unwrap();
    let counts = harness.counts().await.unwrap();
    assert_eq!(counts.results, 0);
    assert_eq!(counts.prenotification_results, 0);
}

// ---- Scenario 5: Unsupported payload dropped ----

#[tokio::test]
async fn test_warning_leaves_no_trace() {
    let mut harness = TrackerHarness::builder().build().await.unwrap();
    let b = RecordBuilder::new("mx");

    harness
        .publish_all([b.warning("hostname verification failed")])
        .await
        .unwrap();
    harness.settle().await;
    harness.finish().await.unwrap();

    assert!(harness.results().is_empty());
    assert!(harness.counts().await.unwrap().is_empty());
}

// ---- Scenario 6: Replay idempotence ----

#[tokio::test]
async fn test_replayed_log_publishes_nothing_new() {
    let mut harness = TrackerHarness::builder().build().await.unwrap();
    let b = RecordBuilder::new("mx.sender.com");
    let log = bounced_recipient_log(&b);

    harness.publish_all(log.clone()).await.unwrap();
    harness.publish_all(log).await.unwrap();

    harness.wait_for_results(2).await.unwrap();
    harness.settle().await;
    harness.finish().await.unwrap();

    assert_eq!(harness.results().len(), 2);
    let counts = harness.counts().await.unwrap();
    assert!(counts.is_empty(), "leftover rows: {counts:?}");
}

#[tokio::test]
async fn test_replay_after_restart_publishes_nothing_new() {
    let mut harness = TrackerHarness::builder().build().await.unwrap();
    let b = RecordBuilder::new("mx.sender.com");
    let log = bounced_recipient_log(&b);

    harness.publish_all(log.clone()).await.unwrap();
    harness.wait_for_results(2).await.unwrap();
    harness.restart().await.unwrap();

    harness.publish_all(log).await.unwrap();
    harness.settle().await;
    harness.finish().await.unwrap();
    assert_eq!(harness.results().len(), 2);
}

// ---- Boundary behaviors ----

#[tokio::test]
async fn test_disconnect_without_connect_is_ignored() {
    let mut harness = TrackerHarness::builder().build().await.unwrap();
    let b = RecordBuilder::new("mx");

    harness
        .publish_all([b.disconnect("client", 1, 1), b.removed("NEVERSEEN")])
        .await
        .unwrap();
    harness.finish().await.unwrap();

    assert!(harness.results().is_empty());
    assert!(harness.counts().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_results_wait_for_queue_removal() {
    let mut harness = TrackerHarness::builder().build().await.unwrap();
    let b = RecordBuilder::new("mx");

    harness
        .publish_all([
            b.connect("client", "1.2.3.4"),
            b.mail_accepted("Q1", "client", "1.2.3.4"),
            b.mail_queued("Q1", "user", "sender.com", 100, 1),
            b.sent("Q1", "rcpt", "example.com"),
        ])
        .await
        .unwrap();
    harness.settle().await;
    assert!(harness.results().is_empty());

    harness.publish_all([b.removed("Q1")]).await.unwrap();
    let results = harness.wait_for_results(1).await.unwrap();
    assert_eq!(results[0].int64(ResultKey::ResultDeliveryFileLine), Some(4));

    harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_pending_results_survive_a_restart() {
    let mut harness = TrackerHarness::builder().build().await.unwrap();
    let b = RecordBuilder::new("mx");

    harness
        .publish_all([
            b.connect("client", "1.2.3.4"),
            b.mail_accepted("Q1", "client", "1.2.3.4"),
            b.mail_queued("Q1", "user", "sender.com", 100, 1),
            b.sent("Q1", "rcpt", "example.com"),
        ])
        .await
        .unwrap();
    harness.restart().await.unwrap();

    harness
        .publish_all([b.removed("Q1"), b.disconnect("client", 0, 0)])
        .await
        .unwrap();
    let results = harness.wait_for_results(1).await.unwrap();
    assert_eq!(results[0].sender().as_deref(), Some("user@sender.com"));

    harness.finish().await.unwrap();
    assert!(harness.counts().await.unwrap().is_empty());
}

// ---- Log splitting and result shape ----

fn summary(result: &lightmeter_core::DeliveryResult) -> String {
    format!(
        "{:?}|{:?}|{:?}|{:?}|{:?}|{:?}",
        result.sender(),
        result.recipient(),
        result.status(),
        result.text(ResultKey::ResultDsn),
        result.text(ResultKey::QueueMessageId),
        result.direction(),
    )
}

async fn run_split(records: &[Record], at: usize) -> Vec<String> {
    let mut harness = TrackerHarness::builder().build().await.unwrap();
    harness.publish_all(records[..at].to_vec()).await.unwrap();
    harness.settle().await;
    harness.publish_all(records[at..].to_vec()).await.unwrap();

    let results = harness.wait_for_results(2).await.unwrap();
    harness.finish().await.unwrap();
    let mut summaries: Vec<_> = results.iter().map(summary).collect();
    summaries.sort();
    summaries
}

#[tokio::test]
async fn test_splitting_the_log_anywhere_gives_the_same_results() {
    let b = RecordBuilder::new("mx.sender.com");
    let records = bounced_recipient_log(&b);
    let whole = run_split(&records, records.len()).await;
    assert_eq!(whole.len(), 2);

    for at in 1..records.len() {
        assert_eq!(run_split(&records, at).await, whole, "split at {at}");
    }
}

#[tokio::test]
async fn test_delay_parts_stay_within_total_delay() {
    let mut harness = TrackerHarness::builder().build().await.unwrap();
    let b = RecordBuilder::new("mx");

    harness
        .publish_all([
            b.connect("client", "1.2.3.4"),
            b.mail_accepted("Q", "client", "1.2.3.4"),
            b.mail_queued("Q", "user", "sender.com", 1024, 2),
            b.deferred("Q", "rcpt", "example.com"),
            b.sent("Q", "rcpt", "example.com"),
            b.sent("Q", "other", "example.com"),
            b.removed("Q"),
            b.disconnect("client", 0, 0),
        ])
        .await
        .unwrap();

    let results = harness.wait_for_results(3).await.unwrap();
    for result in results.iter().filter(|r| r.status() == Some(SmtpStatus::Sent)) {
        let total = result.float64(ResultKey::ResultDelay).unwrap();
        let parts: f64 = [
            ResultKey::ResultDelaySmtpd,
            ResultKey::ResultDelayCleanup,
            ResultKey::ResultDelayQmgr,
            ResultKey::ResultDelaySmtp,
        ]
        .into_iter()
        .map(|key| result.float64(key).unwrap())
        .sum();
        assert!(parts <= total + 0.5, "parts {parts} over total {total}");
    }

    harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_single_node_results_carry_connection_begin() {
    let mut harness = TrackerHarness::builder()
        .with_node_type(NodeType::Single)
        .build()
        .await
        .unwrap();
    let b = RecordBuilder::new("mail.our.tld");

    harness
        .publish_all([
            b.connect("sender.example.com", "203.0.113.7"),
            b.mail_accepted("Q1", "sender.example.com", "203.0.113.7"),
            b.mail_queued("Q1", "someone", "example.com", 2048, 2),
            b.delivered_locally("Q1", "alice", "our.tld"),
            b.bounced("Q1", "bob", "example.com", "5.1.1"),
            b.removed("Q1"),
            b.disconnect("sender.example.com", 0, 0),
        ])
        .await
        .unwrap();

    let results = harness.wait_for_results(2).await.unwrap();
    for result in &results {
        assert!(result.contains(ResultKey::ConnectionBegin), "{result:?}");
    }

    harness.stop().await.unwrap();
}
