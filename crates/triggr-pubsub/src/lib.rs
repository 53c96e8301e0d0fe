// Copyright 2024 Algorealm Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![warn(missing_docs)]
//! # Triggr Pub/Sub Module 🕸️
//!
//! A topic-indexed subscriber registry. Subscribers are explicit bounded
//! outbound queues, one per WebSocket connection; the bus is a pure
//! routing table. Overflow drops the oldest frame for that subscriber
//! and marks it degraded until the next successful delivery.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;

use triggr_types::{ChangeRecord, ProjectId, WsPayload};
use triggr_utils::metric::Metrics;

/// Identifies one WebSocket connection in the routing table.
pub type ConnectionId = u64;

struct SubscriberInner {
    queue: Mutex<VecDeque<String>>,
    notify: Notify,
    degraded: AtomicBool,
    closed: AtomicBool,
    capacity: usize,
}

/// The outbound queue feeding a single WebSocket connection.
///
/// Cloning shares the queue; the bus holds clones per subscribed topic
/// while the connection task drains the original.
#[derive(Clone)]
pub struct Subscriber {
    inner: Arc<SubscriberInner>,
}

impl Subscriber {
    /// Creates a subscriber with a queue bounded to `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(SubscriberInner {
                queue: Mutex::new(VecDeque::with_capacity(capacity)),
                notify: Notify::new(),
                degraded: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Enqueues a frame, dropping the oldest one (and marking the
    /// subscriber degraded) on overflow. Returns whether a frame was
    /// dropped.
    pub fn push(&self, frame: String) -> bool {
        let dropped = {
            let mut queue = self.inner.queue.lock();
            let dropped = if queue.len() >= self.inner.capacity {
                queue.pop_front();
                true
            } else {
                false
            };
            queue.push_back(frame);
            dropped
        };
        if dropped {
            self.inner.degraded.store(true, Ordering::Relaxed);
        }
        self.inner.notify.notify_one();
        dropped
    }

    /// Dequeues the next frame, waiting until one arrives or the
    /// subscriber is closed.
    pub async fn recv(&self) -> Option<String> {
        loop {
            if let Some(frame) = self.inner.queue.lock().pop_front() {
                return Some(frame);
            }
            if self.inner.closed.load(Ordering::Relaxed) {
                return None;
            }
            self.inner.notify.notified().await;
        }
    }

    /// Dequeues the next frame without waiting.
    pub fn try_recv(&self) -> Option<String> {
        self.inner.queue.lock().pop_front()
    }

    /// Records a successful delivery, clearing the degraded flag.
    pub fn mark_delivered(&self) {
        self.inner.degraded.store(false, Ordering::Relaxed);
    }

    /// Whether the queue overflowed since the last successful delivery.
    pub fn is_degraded(&self) -> bool {
        self.inner.degraded.load(Ordering::Relaxed)
    }

    /// Closes the subscriber; `recv` returns `None` once drained.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Relaxed);
        self.inner.notify.notify_waiters();
    }

    /// Whether the subscriber was closed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Relaxed)
    }

    /// Frames currently queued.
    pub fn len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.queue.lock().is_empty()
    }
}

type TopicKey = (ProjectId, String);

/// The topic → subscribers routing table.
///
/// Subscription commands mutate the table only; fan-out takes the read
/// lock and never performs I/O while holding it.
pub struct PubSubBus {
    topics: RwLock<HashMap<TopicKey, Vec<(ConnectionId, Subscriber)>>>,
    metrics: Metrics,
}

impl PubSubBus {
    /// Creates an empty bus.
    pub fn new(metrics: Metrics) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            metrics,
        }
    }

    /// Registers `subscriber` for a topic.
    pub fn subscribe(
        &self,
        project_id: &str,
        topic: &str,
        conn: ConnectionId,
        subscriber: Subscriber,
    ) {
        let mut topics = self.topics.write();
        let entry = topics
            .entry((project_id.to_string(), topic.to_string()))
            .or_default();
        if !entry.iter().any(|(id, _)| *id == conn) {
            entry.push((conn, subscriber));
        }
    }

    /// Removes a connection's subscription from one topic.
    pub fn unsubscribe(&self, project_id: &str, topic: &str, conn: ConnectionId) {
        let mut topics = self.topics.write();
        let key = (project_id.to_string(), topic.to_string());
        if let Some(entry) = topics.get_mut(&key) {
            entry.retain(|(id, _)| *id != conn);
            if entry.is_empty() {
                topics.remove(&key);
            }
        }
    }

    /// Removes a connection from every topic, on disconnect.
    pub fn drop_connection(&self, conn: ConnectionId) {
        let mut topics = self.topics.write();
        topics.retain(|_, entry| {
            entry.retain(|(id, _)| *id != conn);
            !entry.is_empty()
        });
    }

    /// Tears down every topic of a project, closing its subscribers.
    /// Used when the project is deleted.
    pub fn drop_project(&self, project_id: &str) {
        let mut topics = self.topics.write();
        topics.retain(|(project, _), entry| {
            if project == project_id {
                for (_, subscriber) in entry.iter() {
                    subscriber.close();
                }
                false
            } else {
                true
            }
        });
    }

    /// Number of live `(topic, connection)` registrations.
    pub fn subscription_count(&self) -> usize {
        self.topics.read().values().map(Vec::len).sum()
    }

    /// Fans a committed change out to all matching subscribers.
    ///
    /// The payload is serialized once per topic; each subscriber gets the
    /// same frame pushed onto its bounded queue.
    pub fn publish(&self, change: &ChangeRecord) {
        for topic in change.topics() {
            let frame = {
                let payload = WsPayload {
                    op: change.op.to_string(),
                    topic: topic.clone(),
                    doc: change.doc.clone(),
                };
                match serde_json::to_string(&payload) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::error!("Unserializable ws payload: {e}");
                        continue;
                    }
                }
            };
            let topics = self.topics.read();
            let Some(subscribers) =
                topics.get(&(change.project_id.clone(), topic))
            else {
                continue;
            };
            for (conn, subscriber) in subscribers {
                if subscriber.push(frame.clone()) {
                    self.metrics.subscriber_overflow_drops.inc();
                    tracing::debug!(
                        conn = %conn,
                        "Subscriber queue overflowed, dropped oldest frame"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use triggr_types::{ChangeOp, DocMetadata, Document};

    fn change(op: ChangeOp, doc_id: &str) -> ChangeRecord {
        ChangeRecord {
            project_id: "p".into(),
            op,
            collection: "users".into(),
            doc_id: doc_id.into(),
            doc: Document {
                id: doc_id.into(),
                data: json!({"score": 1}),
                metadata: DocMetadata::new(5),
            },
        }
    }

    fn bus() -> PubSubBus {
        PubSubBus::new(Metrics::shared().unwrap())
    }

    #[tokio::test]
    async fn fan_out_reaches_collection_and_document_topics() {
        let bus = bus();
        let coll_sub = Subscriber::new(8);
        let doc_sub = Subscriber::new(8);
        bus.subscribe("p", "collection:users:change", 1, coll_sub.clone());
        bus.subscribe("p", "document:users:u1:change", 2, doc_sub.clone());

        bus.publish(&change(ChangeOp::Insert, "u1"));

        let frame = coll_sub.recv().await.unwrap();
        let payload: WsPayload = serde_json::from_str(&frame).unwrap();
        assert_eq!(payload.op, "insert");
        assert_eq!(payload.topic, "collection:users:change");

        let frame = doc_sub.recv().await.unwrap();
        let payload: WsPayload = serde_json::from_str(&frame).unwrap();
        assert_eq!(payload.topic, "document:users:u1:change");

        // a change to another document misses the document subscriber
        bus.publish(&change(ChangeOp::Update, "u2"));
        assert!(doc_sub.is_empty());
        assert_eq!(coll_sub.len(), 1);
    }

    #[tokio::test]
    async fn other_projects_do_not_cross_over() {
        let bus = bus();
        let sub = Subscriber::new(8);
        bus.subscribe("other", "collection:users:change", 1, sub.clone());
        bus.publish(&change(ChangeOp::Insert, "u1"));
        assert!(sub.is_empty());
    }

    #[tokio::test]
    async fn overflow_drops_oldest_and_degrades() {
        let sub = Subscriber::new(256);
        for i in 0..300 {
            sub.push(format!("frame-{i}"));
        }
        assert_eq!(sub.len(), 256);
        assert!(sub.is_degraded());
        // the oldest 44 frames are gone
        assert_eq!(sub.recv().await.unwrap(), "frame-44");

        sub.mark_delivered();
        assert!(!sub.is_degraded());
    }

    #[tokio::test]
    async fn unsubscribe_and_drop_connection_stop_delivery() {
        let bus = bus();
        let sub = Subscriber::new(8);
        bus.subscribe("p", "collection:users:change", 1, sub.clone());
        bus.subscribe("p", "document:users:u1:change", 1, sub.clone());
        assert_eq!(bus.subscription_count(), 2);

        bus.unsubscribe("p", "collection:users:change", 1);
        assert_eq!(bus.subscription_count(), 1);

        bus.drop_connection(1);
        assert_eq!(bus.subscription_count(), 0);
        bus.publish(&change(ChangeOp::Insert, "u1"));
        assert!(sub.is_empty());
    }

    #[tokio::test]
    async fn dropping_a_project_closes_its_subscribers() {
        let bus = bus();
        let sub = Subscriber::new(8);
        bus.subscribe("p", "collection:users:change", 1, sub.clone());
        bus.drop_project("p");
        assert!(sub.is_closed());
        assert_eq!(bus.subscription_count(), 0);
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn recv_drains_before_reporting_closed() {
        let sub = Subscriber::new(8);
        sub.push("one".into());
        sub.close();
        assert_eq!(sub.recv().await.as_deref(), Some("one"));
        assert_eq!(sub.recv().await, None);
    }
}
