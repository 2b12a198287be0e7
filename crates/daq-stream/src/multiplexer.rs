//! Producer fan-out and subscriber bookkeeping for the Stream
//! Multiplexer.
//!
//! One producer task runs per distinct (equipment, stream type,
//! interval) triple; every subscriber asking for that same triple
//! shares it. A subscriber's queue is independent of which producers
//! feed it, so `start`/`stop` only ever touch producer membership.

use crate::subscription::{ProducerKey, StreamMessage, SubscriberQueue, DEFAULT_QUEUE_DEPTH, DEFAULT_RESUME_GRACE_SECS};
use daq_core::{GatewayError, GatewayResult, StreamType};
use daq_session::SnapshotSampler;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Builds the one-shot sampler for a (equipment, stream type, params)
/// request. Supplied by the composition root, which knows how to turn
/// a stream type into a concrete `daq_driver::Operation` against a
/// running `daq_session::SessionWorkerHandle`.
pub type SamplerFactory = Arc<dyn Fn(&str, StreamType, Option<Value>) -> GatewayResult<SnapshotSampler> + Send + Sync>;

struct ProducerHandle {
 subscribers: Mutex<HashSet<String>>,
 task: JoinHandle<()>,
}

#[derive(Clone)]
struct SavedSubscription {
 equipment_id: String,
 stream_type: StreamType,
 interval_ms: u64,
 params: Option<Value>,
}

struct GraceEntry {
 disconnected_at: Instant,
 subscriptions: Vec<SavedSubscription>,
}

/// Fans sampled instrument telemetry out to any number of subscribed
/// duplex connections, deduplicating identical subscriptions onto one
/// shared timer.
pub struct StreamMultiplexer {
 producers: DashMap<ProducerKey, ProducerHandle>,
 queues: DashMap<String, Arc<SubscriberQueue>>,
 active: DashMap<(String, String, StreamType), ProducerKey>,
 grace: DashMap<String, GraceEntry>,
 grace_window: Duration,
 queue_depth: usize,
 sampler_factory: SamplerFactory,
 shutdown_tx: watch::Sender<bool>,
}

impl StreamMultiplexer {
 pub fn new(sampler_factory: SamplerFactory) -> Arc<Self> {
 Self::with_config(sampler_factory, Duration::from_secs(DEFAULT_RESUME_GRACE_SECS), DEFAULT_QUEUE_DEPTH)
 }

 pub fn with_config(sampler_factory: SamplerFactory, grace_window: Duration, queue_depth: usize) -> Arc<Self> {
 let (shutdown_tx, _rx) = watch::channel(false);
 Arc::new(Self {
 producers: DashMap::new(),
 queues: DashMap::new(),
 active: DashMap::new(),
 grace: DashMap::new(),
 grace_window,
 queue_depth,
 sampler_factory,
 shutdown_tx,
 })
 }

 /// Attaches a new duplex connection, returning the queue it should
 /// drain to get its stream data. Must be called before `start` or
 /// `resume` for this `subscriber_id`.
 pub fn register_subscriber(&self, subscriber_id: &str) -> Arc<SubscriberQueue> {
 let queue = Arc::new(SubscriberQueue::new(self.queue_depth));
 self.queues.insert(subscriber_id.to_string(), queue.clone());
 queue
 }

 /// Detaches a connection, closing its queue and retaining its
 /// active subscriptions for the resume grace window.
 pub fn unregister_subscriber(&self, subscriber_id: &str) {
 if let Some((_, queue)) = self.queues.remove(subscriber_id) {
 queue.close();
 }

 let keys: Vec<(String, String, StreamType)> =
 self.active.iter().filter(|e| e.key().0 == subscriber_id).map(|e| e.key().clone()).collect();

 let mut saved = Vec::with_capacity(keys.len());
 for key in keys {
 if let Some((_, producer_key)) = self.active.remove(&key) {
 self.detach(&producer_key, subscriber_id);
 saved.push(SavedSubscription {
 equipment_id: key.1,
 stream_type: key.2,
 interval_ms: producer_key.interval_ms,
 params: None,
 });
 }
 }

 if !saved.is_empty() {
 self.grace.insert(subscriber_id.to_string(), GraceEntry { disconnected_at: Instant::now(), subscriptions: saved });
 }
 }

 /// Starts (or atomically replaces) a subscription. Starting an
 /// already-active `(equipment_id, stream_type)` pair with
 /// different parameters tears down the old producer attachment
 /// first ("atomically replaces the prior one").
 pub fn start(
 self: &Arc<Self>,
 subscriber_id: &str,
 equipment_id: &str,
 stream_type: StreamType,
 interval_ms: u64,
 params: Option<Value>,
 ) -> GatewayResult<()> {
 if !self.queues.contains_key(subscriber_id) {
 return Err(GatewayError::bad_request("subscriber is not registered"));
 }
 if interval_ms == 0 {
 return Err(GatewayError::bad_request("interval_ms must be greater than zero"));
 }

 let sub_key = (subscriber_id.to_string(), equipment_id.to_string(), stream_type);
 if let Some((_, old_key)) = self.active.remove(&sub_key) {
 self.detach(&old_key, subscriber_id);
 }

 let key = ProducerKey { equipment_id: equipment_id.to_string(), stream_type, interval_ms };
 if self.producers.get(&key).is_none() {
 let sampler = (self.sampler_factory)(equipment_id, stream_type, params)?;
 let handle = self.spawn_producer(key.clone(), sampler);
 self.producers.entry(key.clone()).or_insert(handle);
 }
 if let Some(producer) = self.producers.get(&key) {
 producer.subscribers.lock().insert(subscriber_id.to_string());
 }
 self.active.insert(sub_key, key);
 Ok(())
 }

 /// Stops one subscription. No-op if it was not active.
 pub fn stop(&self, subscriber_id: &str, equipment_id: &str, stream_type: StreamType) {
 let sub_key = (subscriber_id.to_string(), equipment_id.to_string(), stream_type);
 if let Some((_, key)) = self.active.remove(&sub_key) {
 self.detach(&key, subscriber_id);
 }
 }

 /// Restarts every subscription `subscriber_id` held before its
 /// transport dropped, provided it reconnects within the grace
 /// window ("Recovery"). Returns how many were restored.
 pub fn resume(self: &Arc<Self>, subscriber_id: &str) -> GatewayResult<usize> {
 let entry = self
.grace
.remove(subscriber_id)
.map(|(_, e)| e)
.ok_or_else(|| GatewayError::not_found("no subscriptions available to resume"))?;

 if entry.disconnected_at.elapsed() > self.grace_window {
 return Err(GatewayError::not_found("resume grace window has expired"));
 }
 if !self.queues.contains_key(subscriber_id) {
 return Err(GatewayError::bad_request("subscriber must register before resuming"));
 }

 let count = entry.subscriptions.len();
 for sub in entry.subscriptions {
 self.start(subscriber_id, &sub.equipment_id, sub.stream_type, sub.interval_ms, sub.params)?;
 }
 info!(subscriber_id, restored = count, "resumed subscriptions after reconnect");
 Ok(count)
 }

 pub fn overflow_count(&self, subscriber_id: &str, equipment_id: &str, stream_type: StreamType) -> u64 {
 self.queues.get(subscriber_id).map(|q| q.overflow_count(equipment_id, stream_type)).unwrap_or(0)
 }

 fn detach(&self, key: &ProducerKey, subscriber_id: &str) {
 let Some(producer) = self.producers.get(key) else { return };
 let mut subs = producer.subscribers.lock();
 subs.remove(subscriber_id);
 let empty = subs.is_empty();
 drop(subs);
 if empty {
 producer.task.abort();
 drop(producer);
 self.producers.remove(key);
 debug!(equipment_id = %key.equipment_id, stream_type = %key.stream_type, "producer torn down, no subscribers remain");
 }
 }

 /// Spawns the periodic sampling task for one producer key. The
 /// timer uses `MissedTickBehavior::Skip`: a tick that runs long
 /// drops the missed ticks rather than bursting to catch up, which
 /// bounds skew instead of compounding lateness ("skew
 /// introduced by sampling or scheduling latency must not
 /// compound").
 fn spawn_producer(self: &Arc<Self>, key: ProducerKey, sampler: SnapshotSampler) -> ProducerHandle {
 let this = self.clone();
 let task_key = key.clone();
 let task = tokio::spawn(async move {
 let mut ticker = tokio::time::interval(Duration::from_millis(task_key.interval_ms));
 ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
 loop {
 ticker.tick().await;

 let subs: Vec<String> = match this.producers.get(&task_key) {
 Some(p) => p.subscribers.lock().iter().cloned().collect(),
 None => break,
 };
 if subs.is_empty() {
 continue;
 }

 let result = sampler.sample().await;
 let (data, error) = match result {
 Ok(v) => (Some(v), None),
 Err(e) => (None, Some(e)),
 };
 let msg = StreamMessage {
 equipment_id: task_key.equipment_id.clone(),
 stream_type: task_key.stream_type,
 sampled_at: chrono::Utc::now(),
 data,
 error,
 };
 for subscriber_id in subs {
 if let Some(q) = this.queues.get(&subscriber_id) {
 q.push(msg.clone());
 }
 }
 }
 });
 ProducerHandle { subscribers: Mutex::new(HashSet::new()), task }
 }

 /// Periodically sweeps grace entries whose window has lapsed
 /// without a resume, so a client that never reconnects does not
 /// leak its saved subscription list forever.
 pub fn spawn_grace_reaper(self: &Arc<Self>, interval: Duration) {
 let this = self.clone();
 let mut shutdown = this.shutdown_tx.subscribe();
 tokio::spawn(async move {
 let mut ticker = tokio::time::interval(interval);
 loop {
 tokio::select! {
 _ = ticker.tick() => {
 let expired: Vec<String> = this
.grace
.iter()
.filter(|e| e.disconnected_at.elapsed() > this.grace_window)
.map(|e| e.key().clone())
.collect();
 for subscriber_id in expired {
 this.grace.remove(&subscriber_id);
 }
 }
 _ = shutdown.changed() => {
 info!("stream multiplexer grace reaper shutting down");
 break;
 }
 }
 }
 });
 }

 pub fn shutdown(&self) {
 let _ = self.shutdown_tx.send(true);
 }
}
