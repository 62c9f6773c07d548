// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Integration tests for the message bus: registry consistency, priority
//! ordering, broadcast fan-out, request/reply and expiry handling.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use murmur_bus::{Bus, BusError, Message, Participant, BROADCAST};

/// Participant that records every message it receives.
struct Recorder {
    id: String,
    seen: Mutex<Vec<Message>>,
}

impl Recorder {
    fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn seen_types(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.message_type.clone())
            .collect()
    }

    fn seen_count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl Participant for Recorder {
    fn id(&self) -> &str {
        &self.id
    }
    async fn handle_message(&self, message: Message) {
        self.seen.lock().unwrap().push(message);
    }
}

/// Participant that answers `ping` with `pong`.
struct Echo {
    id: String,
    bus: Arc<Bus>,
}

#[async_trait]
impl Participant for Echo {
    fn id(&self) -> &str {
        &self.id
    }
    async fn handle_message(&self, message: Message) {
        if message.message_type == "ping" {
            let reply = message.create_reply(json!({"pong": true}), Some("pong"));
            let _ = self.bus.send(reply).await;
        }
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn duplicate_registration_is_rejected_without_index_changes() {
    let bus = Bus::new();
    let p1 = Recorder::new("p1");
    bus.register(vec!["a".into(), "b".into()], p1.clone())
        .unwrap();

    let p1_again = Recorder::new("p1");
    let err = bus
        .register(vec!["c".into()], p1_again.clone())
        .unwrap_err();
    assert_eq!(err, BusError::Duplicate("p1".into()));

    // The rejected registration must not have touched the index.
    assert!(bus.find_by_capability("c").is_empty());
    assert_eq!(bus.find_by_capability("a"), vec!["p1".to_string()]);
}

#[tokio::test]
async fn capability_index_follows_registration_lifecycle() {
    let bus = Bus::new();
    let p1 = Recorder::new("p1");
    let p2 = Recorder::new("p2");
    bus.register(vec!["files".into(), "net".into()], p1.clone())
        .unwrap();
    bus.register(vec!["files".into()], p2.clone()).unwrap();

    let mut files = bus.find_by_capability("files");
    files.sort();
    assert_eq!(files, vec!["p1".to_string(), "p2".to_string()]);
    assert_eq!(bus.find_by_capability("net"), vec!["p1".to_string()]);

    bus.unregister("p1").unwrap();
    assert_eq!(bus.find_by_capability("files"), vec!["p2".to_string()]);
    assert!(bus.find_by_capability("net").is_empty());
}

#[tokio::test]
async fn unregister_unknown_returns_not_found() {
    let bus = Bus::new();
    assert_eq!(
        bus.unregister("ghost").unwrap_err(),
        BusError::NotFound("ghost".into())
    );
}

#[tokio::test]
async fn find_by_capabilities_intersection_and_union() {
    let bus = Bus::new();
    let p1 = Recorder::new("p1");
    let p2 = Recorder::new("p2");
    bus.register(vec!["a".into(), "b".into()], p1.clone())
        .unwrap();
    bus.register(vec!["b".into(), "c".into()], p2.clone())
        .unwrap();

    let both = bus.find_by_capabilities(&["a".into(), "b".into()], true);
    assert_eq!(both, vec!["p1".to_string()]);

    let mut any = bus.find_by_capabilities(&["a".into(), "c".into()], false);
    any.sort();
    assert_eq!(any, vec!["p1".to_string(), "p2".to_string()]);

    assert!(bus.find_by_capabilities(&[], true).is_empty());
}

#[tokio::test]
async fn dead_weak_reference_is_garbage_collected() {
    let bus = Bus::new();
    let p1 = Recorder::new("p1");
    bus.register(vec!["x".into()], p1.clone()).unwrap();
    drop(p1);

    assert!(bus.participants().is_empty());
    // The sweep also repaired the capability index.
    assert!(bus.find_by_capability("x").is_empty());
}

// ── Ordering ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn higher_priority_is_delivered_first() {
    let bus = Bus::new();
    let sink = Recorder::new("sink");
    bus.register(vec![], sink.clone()).unwrap();

    // Enqueue before the dispatcher runs so ordering is decided by the queue.
    bus.send(
        Message::new("t", "sink", "low", json!({})).with_priority(2),
    )
    .await
    .unwrap();
    bus.send(
        Message::new("t", "sink", "high", json!({})).with_priority(9),
    )
    .await
    .unwrap();
    bus.send(
        Message::new("t", "sink", "mid", json!({})).with_priority(5),
    )
    .await
    .unwrap();

    bus.start();
    bus.wait_idle().await;
    bus.stop();

    assert_eq!(sink.seen_types(), vec!["high", "mid", "low"]);
}

#[tokio::test]
async fn same_priority_is_fifo() {
    let bus = Bus::new();
    let sink = Recorder::new("sink");
    bus.register(vec![], sink.clone()).unwrap();

    for name in ["first", "second", "third"] {
        bus.send(Message::new("t", "sink", name, json!({})))
            .await
            .unwrap();
    }

    bus.start();
    bus.wait_idle().await;
    bus.stop();

    assert_eq!(sink.seen_types(), vec!["first", "second", "third"]);
}

// ── Broadcast ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn broadcast_reaches_everyone_except_the_sender() {
    let bus = Bus::new();
    let p1 = Recorder::new("p1");
    let p2 = Recorder::new("p2");
    let p3 = Recorder::new("p3");
    bus.register(vec![], p1.clone()).unwrap();
    bus.register(vec![], p2.clone()).unwrap();
    bus.register(vec![], p3.clone()).unwrap();
    bus.start();

    bus.send(Message::new("p1", BROADCAST, "status.update", json!({})))
        .await
        .unwrap();
    bus.wait_idle().await;
    bus.stop();

    assert_eq!(p1.seen_count(), 0, "sender must not hear its own broadcast");
    assert_eq!(p2.seen_count(), 1);
    assert_eq!(p3.seen_count(), 1);
}

// ── Expiry ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn expired_message_is_rejected_at_send() {
    let bus = Bus::new();
    let sink = Recorder::new("sink");
    bus.register(vec![], sink.clone()).unwrap();
    bus.start();

    let mut msg = Message::new("t", "sink", "late", json!({}));
    msg.expires_at = Some(chrono::Utc::now() - chrono::Duration::seconds(5));
    let err = bus.send(msg).await.unwrap_err();
    assert!(matches!(err, BusError::Expired(_)));

    bus.wait_idle().await;
    bus.stop();
    assert_eq!(sink.seen_count(), 0);
}

#[tokio::test]
async fn message_expiring_in_the_queue_is_dropped_at_dequeue() {
    let bus = Bus::new();
    let sink = Recorder::new("sink");
    bus.register(vec![], sink.clone()).unwrap();

    // Valid at send, expired by the time the dispatcher starts.
    let msg = Message::new("t", "sink", "soon", json!({}))
        .expires_in(Duration::from_millis(20));
    bus.send(msg).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    bus.start();
    bus.wait_idle().await;
    bus.stop();
    assert_eq!(sink.seen_count(), 0);
}

// ── Request / reply ───────────────────────────────────────────────────────────

#[tokio::test]
async fn request_reply_round_trip() {
    let bus = Bus::new();
    let echo = Arc::new(Echo {
        id: "echo".to_string(),
        bus: bus.clone(),
    });
    bus.register(vec![], echo.clone()).unwrap();
    bus.start();

    let reply = bus
        .request_reply("tester", "echo", "ping", json!({}), Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(reply.message_type, "pong");
    assert_eq!(reply.content["pong"], json!(true));
    bus.stop();
}

#[tokio::test]
async fn request_reply_times_out_when_nobody_answers() {
    let bus = Bus::new();
    let mute = Recorder::new("mute");
    bus.register(vec![], mute.clone()).unwrap();
    bus.start();

    let err = bus
        .request_reply(
            "tester",
            "mute",
            "ping",
            json!({}),
            Duration::from_millis(50),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::ReplyTimeout(_)));
    bus.stop();
}

#[tokio::test]
async fn late_reply_goes_to_listeners_only() {
    let bus = Bus::new();
    let requester = Recorder::new("requester");
    let mute = Recorder::new("mute");
    bus.register(vec![], requester.clone()).unwrap();
    bus.register(vec![], mute.clone()).unwrap();
    bus.start();

    let heard: Arc<Mutex<Vec<Message>>> = Arc::new(Mutex::new(Vec::new()));
    let heard_clone = heard.clone();
    bus.subscribe(
        "task.response",
        Arc::new(move |msg| {
            let heard = heard_clone.clone();
            Box::pin(async move {
                heard.lock().unwrap().push(msg);
            })
        }),
    );

    let request = Message::new("requester", "mute", "task.request", json!({}));
    let request_id = request.message_id.clone();
    let err = bus
        .send_and_wait(request, Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::ReplyTimeout(_)));

    // The reply arrives after the waiter was removed.
    let mut late = Message::new("mute", "requester", "task.response", json!({"done": true}));
    late.reply_to = Some(request_id);
    bus.send(late).await.unwrap();
    bus.wait_idle().await;
    bus.stop();

    assert_eq!(heard.lock().unwrap().len(), 1, "listener sees the late reply once");
    assert_eq!(
        requester.seen_count(),
        0,
        "late reply must not be handed to the requester's handler"
    );
}

// ── Listeners ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn wildcard_and_prefix_listeners_fire() {
    let bus = Bus::new();
    let sink = Recorder::new("sink");
    bus.register(vec![], sink.clone()).unwrap();
    bus.start();

    let all_count = Arc::new(Mutex::new(0usize));
    let task_count = Arc::new(Mutex::new(0usize));

    let c = all_count.clone();
    bus.subscribe(
        "*",
        Arc::new(move |_| {
            let c = c.clone();
            Box::pin(async move {
                *c.lock().unwrap() += 1;
            })
        }),
    );
    let c = task_count.clone();
    bus.subscribe(
        "task.*",
        Arc::new(move |_| {
            let c = c.clone();
            Box::pin(async move {
                *c.lock().unwrap() += 1;
            })
        }),
    );

    bus.send(Message::new("t", "sink", "task.request", json!({})))
        .await
        .unwrap();
    bus.send(Message::new("t", "sink", "status.update", json!({})))
        .await
        .unwrap();
    bus.wait_idle().await;
    bus.stop();

    assert_eq!(*all_count.lock().unwrap(), 2);
    assert_eq!(*task_count.lock().unwrap(), 1);
}

#[tokio::test]
async fn unsubscribed_listener_stops_firing() {
    let bus = Bus::new();
    let sink = Recorder::new("sink");
    bus.register(vec![], sink.clone()).unwrap();
    bus.start();

    let count = Arc::new(Mutex::new(0usize));
    let c = count.clone();
    let sub = bus.subscribe(
        "tick",
        Arc::new(move |_| {
            let c = c.clone();
            Box::pin(async move {
                *c.lock().unwrap() += 1;
            })
        }),
    );

    bus.send(Message::new("t", "sink", "tick", json!({})))
        .await
        .unwrap();
    bus.wait_idle().await;

    assert!(bus.unsubscribe(sub));
    assert!(!bus.unsubscribe(sub), "second unsubscribe is a no-op");

    bus.send(Message::new("t", "sink", "tick", json!({})))
        .await
        .unwrap();
    bus.wait_idle().await;
    bus.stop();

    assert_eq!(*count.lock().unwrap(), 1);
}

#[tokio::test]
async fn unknown_receiver_is_dropped_before_listeners() {
    let bus = Bus::new();
    bus.start();

    let count = Arc::new(Mutex::new(0usize));
    let c = count.clone();
    bus.subscribe(
        "*",
        Arc::new(move |_| {
            let c = c.clone();
            Box::pin(async move {
                *c.lock().unwrap() += 1;
            })
        }),
    );

    bus.send(Message::new("t", "nobody", "task.request", json!({})))
        .await
        .unwrap();
    bus.wait_idle().await;
    bus.stop();

    assert_eq!(
        *count.lock().unwrap(),
        0,
        "unknown-receiver messages are dropped before listener dispatch"
    );
}
