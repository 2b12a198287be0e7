//! Bounded, drop-oldest delivery queue handed to each connected
//! subscriber, and the producer key that groups subscribers sharing
//! one sampling timer ("Stream subscription").

use chrono::{DateTime, Utc};
use daq_core::{GatewayError, StreamType};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// Default bound on a subscriber's inbound queue.
pub const DEFAULT_QUEUE_DEPTH: usize = 64;
/// Default grace window for resuming a dropped connection's
/// subscriptions ("Recovery").
pub const DEFAULT_RESUME_GRACE_SECS: u64 = 30;

/// One sample delivered to a subscriber, tagged with enough identity
/// to demultiplex it client-side and feed it onto the duplex wire.
#[derive(Debug, Clone)]
pub struct StreamMessage {
 pub equipment_id: String,
 pub stream_type: StreamType,
 pub sampled_at: DateTime<Utc>,
 pub data: Option<Value>,
 pub error: Option<GatewayError>,
}

/// Identifies one producer: a (equipment, stream type, interval)
/// triple. Every subscriber asking for the same triple shares the
/// same timer and sampler ("many subscribers may share one
/// producer").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProducerKey {
 pub equipment_id: String,
 pub stream_type: StreamType,
 pub interval_ms: u64,
}

/// A subscriber's single inbound queue. One of these is created when a
/// client attaches to the multiplexer and lasts until it disconnects;
/// every active subscription for that client funnels messages into it.
pub struct SubscriberQueue {
 capacity: usize,
 inner: Mutex<VecDeque<StreamMessage>>,
 notify: Notify,
 closed: AtomicBool,
 overflow_counts: DashMap<(String, StreamType), u64>,
}

impl SubscriberQueue {
 pub fn new(capacity: usize) -> Self {
 Self {
 capacity,
 inner: Mutex::new(VecDeque::with_capacity(capacity)),
 notify: Notify::new(),
 closed: AtomicBool::new(false),
 overflow_counts: DashMap::new(),
 }
 }

 /// Pushes a message, dropping the oldest queued one if at capacity
 /// and recording the overflow against the subscription responsible
 /// ("the oldest queued message is dropped").
 pub fn push(&self, msg: StreamMessage) {
 let mut inner = self.inner.lock();
 if inner.len() >= self.capacity {
 inner.pop_front();
 *self.overflow_counts.entry((msg.equipment_id.clone(), msg.stream_type)).or_insert(0) += 1;
 }
 inner.push_back(msg);
 drop(inner);
 self.notify.notify_one();
 }

 /// Waits for and pops the next message, or returns `None` once the
 /// queue has been closed and drained.
 pub async fn recv(&self) -> Option<StreamMessage> {
 loop {
 {
 let mut inner = self.inner.lock();
 if let Some(msg) = inner.pop_front() {
 return Some(msg);
 }
 if self.closed.load(Ordering::SeqCst) {
 return None;
 }
 }
 self.notify.notified().await;
 }
 }

 pub fn close(&self) {
 self.closed.store(true, Ordering::SeqCst);
 self.notify.notify_one();
 }

 pub fn overflow_count(&self, equipment_id: &str, stream_type: StreamType) -> u64 {
 self.overflow_counts.get(&(equipment_id.to_string(), stream_type)).map(|v| *v).unwrap_or(0)
 }
}
