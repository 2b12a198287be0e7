//! Session Worker: owns one connected instrument, serialises all
//! access to it, and caches its last-observed telemetry.
//!
//! The driver's transport handle is accessed only from inside the
//! worker's own task ("Shared resources"); every other
//! component touches the worker only through [`SessionWorkerHandle`].

use daq_core::{ErrorKind, GatewayError, GatewayResult, InstrumentIdentity, OperatingMode, Telemetry};
use daq_driver::{Driver, Operation};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Notify};
use tracing::{debug, info, warn};

/// Cool-down window after two consecutive transport errors before a
/// single probe is attempted.
pub const DEFAULT_DEGRADED_COOLDOWN: Duration = Duration::from_secs(5);
/// Default bound on the worker's request queue ("Back-pressure").
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// What a queued request asks the driver to do. Named-state save/recall
/// ( persisted `equipment_states`) rides the same FIFO as normal
/// operations since the driver is owned exclusively by the worker task.
enum WorkerJob {
 Execute(Operation),
 Snapshot,
 Restore(Value),
}

impl WorkerJob {
 fn name(&self) -> &str {
 match self {
 WorkerJob::Execute(op) => op.name(),
 WorkerJob::Snapshot => "snapshot_state",
 WorkerJob::Restore(_) => "restore_state",
 }
 }
}

struct QueuedRequest {
 id: u64,
 job: WorkerJob,
 session_id: Option<String>,
 deadline: Duration,
 respond_to: oneshot::Sender<GatewayResult<Value>>,
}

struct WorkerQueue {
 items: VecDeque<QueuedRequest>,
 processing: Option<u64>,
 closed: bool,
 capacity: usize,
 close_ack: Vec<oneshot::Sender<()>>,
}

/// A pending, possibly-cancellable request submitted to a worker.
pub struct PendingRequest {
 pub id: u64,
 receiver: oneshot::Receiver<GatewayResult<Value>>,
}

impl PendingRequest {
 pub async fn await_result(self) -> GatewayResult<Value> {
 match self.receiver.await {
 Ok(result) => result,
 Err(_) => Err(GatewayError::internal("worker dropped the request without responding")),
 }
 }
}

/// Cloneable, cheap-to-pass-around reference to a running worker task.
#[derive(Clone)]
pub struct SessionWorkerHandle {
 pub equipment_id: String,
 queue: Arc<Mutex<WorkerQueue>>,
 notify: Arc<Notify>,
 next_id: Arc<AtomicU64>,
 telemetry: Arc<RwLock<Telemetry>>,
 identity: Arc<RwLock<InstrumentIdentity>>,
}

impl SessionWorkerHandle {
 /// Submits a request and returns a cancellable handle to it without
 /// waiting for completion.
 pub fn submit(
 &self,
 operation: Operation,
 session_id: Option<String>,
 deadline: Duration,
 ) -> GatewayResult<PendingRequest> {
 self.enqueue(WorkerJob::Execute(operation), session_id, deadline)
 }

 /// Enqueues and awaits one operation.
 pub async fn execute(
 &self,
 operation: Operation,
 session_id: Option<String>,
 deadline: Duration,
 ) -> GatewayResult<Value> {
 self.submit(operation, session_id, deadline)?.await_result().await
 }

 /// Enqueues a request to capture the driver's current named-state
 /// snapshot (`snapshot_state`).
 pub async fn execute_snapshot(&self, session_id: Option<String>, deadline: Duration) -> GatewayResult<Value> {
 self.enqueue(WorkerJob::Snapshot, session_id, deadline)?.await_result().await
 }

 /// Enqueues a request to restore a previously captured snapshot
 /// (`restore_state`).
 pub async fn execute_restore(&self, state: Value, session_id: Option<String>, deadline: Duration) -> GatewayResult<Value> {
 self.enqueue(WorkerJob::Restore(state), session_id, deadline)?.await_result().await
 }

 fn enqueue(&self, job: WorkerJob, session_id: Option<String>, deadline: Duration) -> GatewayResult<PendingRequest> {
 let mut queue = self.queue.lock();
 if queue.closed {
 return Err(GatewayError::cancelled("worker is closed"));
 }
 if queue.items.len() >= queue.capacity {
 return Err(GatewayError::busy("worker request queue is at capacity"));
 }
 let id = self.next_id.fetch_add(1, Ordering::SeqCst);
 let (tx, rx) = oneshot::channel();
 queue.items.push_back(QueuedRequest {
 id,
 job,
 session_id,
 deadline,
 respond_to: tx,
 });
 drop(queue);
 self.notify.notify_one();
 Ok(PendingRequest { id, receiver: rx })
 }

 /// Returns a sampler bound to one fixed operation, matching the
 /// `subscribe_snapshot(stream_type, params) -> snapshot_callable`
 /// contract: invoking it performs exactly one sampling
 /// operation by enqueueing it like any other request, so stream
 /// samples interleave with explicit requests in enqueue order.
 pub fn subscribe_snapshot(&self, operation: Operation, deadline: Duration) -> SnapshotSampler {
 SnapshotSampler { handle: self.clone(), operation, deadline }
 }

 /// Cancels a not-yet-started request. Advisory if it already
 /// started ("Cancellation").
 pub fn cancel(&self, request_id: u64) -> bool {
 let mut queue = self.queue.lock();
 if queue.processing == Some(request_id) {
 return false;
 }
 if let Some(pos) = queue.items.iter().position(|r| r.id == request_id) {
 let req = queue.items.remove(pos).unwrap();
 let _ = req.respond_to.send(Err(GatewayError::cancelled("request cancelled before it started")));
 true
 } else {
 false
 }
 }

 /// Reads the cached telemetry without enqueueing anything — the
 /// path the Alarm Engine and status endpoints use (
 /// "never issues a fresh wire operation from the evaluation path").
 pub fn cached_telemetry(&self) -> Telemetry {
 self.telemetry.read().clone()
 }

 pub fn identity(&self) -> InstrumentIdentity {
 self.identity.read().clone()
 }

 /// Signals the worker to drain and stop, and waits for it to
 /// finish draining (`close`).
 pub async fn close(&self) {
 let rx = {
 let mut queue = self.queue.lock();
 let (tx, rx) = oneshot::channel();
 if queue.closed {
 // Already closing/closed: still wait on a fresh ack so
 // concurrent callers all observe completion.
 queue.close_ack.push(tx);
 Some(rx)
 } else {
 queue.closed = true;
 queue.close_ack.push(tx);
 Some(rx)
 }
 };
 self.notify.notify_one();
 if let Some(rx) = rx {
 let _ = rx.await;
 }
 }
}

/// A closure-like value that performs one sampling operation when
/// invoked.
#[derive(Clone)]
pub struct SnapshotSampler {
 handle: SessionWorkerHandle,
 operation: Operation,
 deadline: Duration,
}

impl SnapshotSampler {
 pub async fn sample(&self) -> GatewayResult<Value> {
 self.handle.execute(self.operation.clone(), None, self.deadline).await
 }
}

/// Owns the driver and runs the FIFO processing loop. Spawned once per
/// connected instrument.
pub struct SessionWorker {
 driver: Box<dyn Driver>,
 queue: Arc<Mutex<WorkerQueue>>,
 notify: Arc<Notify>,
 telemetry: Arc<RwLock<Telemetry>>,
 identity: Arc<RwLock<InstrumentIdentity>>,
 consecutive_errors: u32,
 degraded_until: Option<Instant>,
}

impl SessionWorker {
 /// Spawns the worker task and returns a handle to it.
 pub fn spawn(
 identity: InstrumentIdentity,
 driver: Box<dyn Driver>,
 queue_capacity: usize,
 ) -> SessionWorkerHandle {
 let queue = Arc::new(Mutex::new(WorkerQueue {
 items: VecDeque::new(),
 processing: None,
 closed: false,
 capacity: queue_capacity,
 close_ack: Vec::new(),
 }));
 let notify = Arc::new(Notify::new());
 let telemetry = Arc::new(RwLock::new(Telemetry { connected: true, health_score: 1.0,..Default::default() }));
 let identity = Arc::new(RwLock::new(identity));

 let handle = SessionWorkerHandle {
 equipment_id: identity.read().id.clone(),
 queue: queue.clone(),
 notify: notify.clone(),
 next_id: Arc::new(AtomicU64::new(1)),
 telemetry: telemetry.clone(),
 identity: identity.clone(),
 };

 let mut worker = SessionWorker {
 driver,
 queue,
 notify,
 telemetry,
 identity,
 consecutive_errors: 0,
 degraded_until: None,
 };
 tokio::spawn(async move { worker.run().await });
 handle
 }

 async fn run(&mut self) {
 let equipment_id = self.identity.read().id.clone();
 loop {
 let next = {
 let mut queue = self.queue.lock();
 queue.items.pop_front()
 };

 let Some(req) = next else {
 if self.queue.lock().closed {
 break;
 }
 self.notify.notified().await;
 continue;
 };

 self.queue.lock().processing = Some(req.id);
 self.process(req).await;
 self.queue.lock().processing = None;
 }

 self.drain_and_close(&equipment_id).await;
 }

 async fn process(&mut self, req: QueuedRequest) {
 if let Some(until) = self.degraded_until {
 if Instant::now() < until {
 let _ = req.respond_to.send(Err(GatewayError::instrument_unavailable(
 "instrument worker is degraded, retry after cool-down",
 )));
 return;
 }
 // Cool-down elapsed: probe before processing the request.
 match self.driver.identify().await {
 Ok(_) => {
 self.consecutive_errors = 0;
 self.degraded_until = None;
 info!(equipment_id = %req_equipment(&self.identity), "degraded probe succeeded, worker recovered");
 }
 Err(e) => {
 self.degraded_until = Some(Instant::now() + DEFAULT_DEGRADED_COOLDOWN);
 let _ = req.respond_to.send(Err(GatewayError::instrument_unavailable(format!(
 "probe failed: {e}"
 ))));
 return;
 }
 }
 }

 let session_id = req.session_id.clone();
 let job_name = req.job.name().to_string();
 let result = match &req.job {
 WorkerJob::Execute(op) => tokio::time::timeout(req.deadline, self.driver.execute(op.clone())).await,
 WorkerJob::Snapshot => tokio::time::timeout(req.deadline, self.driver.snapshot_state()).await,
 WorkerJob::Restore(state) => {
 tokio::time::timeout(req.deadline, self.driver.restore_state(state.clone()))
.await
.map(|r| r.map(|_| Value::Null))
 }
 };

 match result {
 Ok(Ok(value)) => {
 self.consecutive_errors = 0;
 if matches!(req.job, WorkerJob::Execute(_)) {
 self.update_telemetry(&value);
 }
 debug!(session_id = ?session_id, op = %job_name, "operation succeeded");
 let _ = req.respond_to.send(Ok(value));
 }
 Ok(Err(e)) => {
 self.register_transport_error(&e);
 let _ = req.respond_to.send(Err(e));
 }
 Err(_) => {
 let e = GatewayError::timeout(format!("{job_name} exceeded its deadline"));
 self.register_transport_error(&e);
 let _ = req.respond_to.send(Err(e));
 }
 }
 }

 /// Transport-level errors (timeout, I/O, parse failure) also set
 /// the worker's health flag; two in a row mark it degraded.
 /// `bad_request`/`permission_denied` do not count — they
 /// indicate caller error, not instrument failure.
 fn register_transport_error(&mut self, error: &GatewayError) {
 let counts = matches!(
 error.kind,
 ErrorKind::Timeout | ErrorKind::ParseError | ErrorKind::InstrumentUnavailable | ErrorKind::Internal
 );
 if !counts {
 return;
 }
 self.consecutive_errors += 1;
 let mut telemetry = self.telemetry.write();
 telemetry.health_score = (1.0 - self.consecutive_errors as f64 * 0.5).max(0.0);
 drop(telemetry);
 if self.consecutive_errors >= 2 {
 self.degraded_until = Some(Instant::now() + DEFAULT_DEGRADED_COOLDOWN);
 warn!("worker marked degraded after {} consecutive transport errors", self.consecutive_errors);
 }
 }

 fn update_telemetry(&self, value: &Value) {
 let mut telemetry = self.telemetry.write();
 telemetry.connected = true;
 telemetry.sampled_at_ms = chrono::Utc::now().timestamp_millis();
 telemetry.health_score = 1.0;

 if let Some(channels) = value.get("channels").and_then(|v| v.as_array()) {
 telemetry.channels.clear();
 for (i, ch) in channels.iter().enumerate() {
 let voltage = ch.get("voltage").and_then(|v| v.as_f64()).unwrap_or(0.0);
 let current = ch.get("current").and_then(|v| v.as_f64()).unwrap_or(0.0);
 let enabled = ch.get("enabled").and_then(|v| v.as_bool()).unwrap_or(false);
 telemetry.channels.push(daq_core::ChannelReading::new(voltage, current, enabled));
 if i == 0 {
 telemetry.mode = match ch.get("mode").and_then(|v| v.as_str()) {
 Some("cv") => Some(OperatingMode::ConstantVoltage),
 Some("cc") => Some(OperatingMode::ConstantCurrent),
 Some("off") => Some(OperatingMode::Off),
 _ => telemetry.mode,
 };
 }
 }
 }
 if let Some(obj) = value.as_object() {
 for (k, v) in obj {
 if k == "channels" {
 continue;
 }
 if let Some(n) = v.as_f64() {
 telemetry.aux.insert(k.clone(), n);
 }
 }
 }
 }

 async fn drain_and_close(&mut self, equipment_id: &str) {
 let (remaining, acks): (Vec<QueuedRequest>, Vec<oneshot::Sender<()>>) = {
 let mut queue = self.queue.lock();
 (queue.items.drain(..).collect(), queue.close_ack.drain(..).collect())
 };
 for req in remaining {
 let _ = req.respond_to.send(Err(GatewayError::cancelled("session_closed")));
 }
 *self.telemetry.write() = Telemetry::disconnected(chrono::Utc::now().timestamp_millis());
 for ack in acks {
 let _ = ack.send();
 }
 info!(equipment_id = %equipment_id, "session worker closed");
 }
}

fn req_equipment(identity: &Arc<RwLock<InstrumentIdentity>>) -> String {
 identity.read().id.clone()
}

#[cfg(test)]
mod tests {
 use super::*;
 use async_trait::async_trait;
 use daq_core::{CapabilityMap, InstrumentType, TransportDescriptor};
 use daq_driver::trait_def::Identification;
 use serde_json::json;
 use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

 struct CountingDriver {
 calls: Arc<AtomicU32>,
 fail_n_times: u32,
 }

 #[async_trait]
 impl Driver for CountingDriver {
 async fn identify(&mut self) -> GatewayResult<Identification> {
 Ok(Identification {
 vendor: "Mock".into(),
 model: "M1".into(),
 serial: "S1".into(),
 firmware: "1.0".into(),
 })
 }

 fn capabilities(&self) -> CapabilityMap {
 CapabilityMap::default()
 }

 async fn execute(&mut self, operation: Operation) -> GatewayResult<Value> {
 let n = self.calls.fetch_add(1, AtomicOrdering::SeqCst);
 if n < self.fail_n_times {
 return Err(GatewayError::timeout("simulated transport timeout"));
 }
 let _ = operation;
 Ok(json!({"channels": [{"voltage": 5.0, "current": 0.5, "enabled": true, "mode": "cv"}]}))
 }
 }

 fn identity() -> InstrumentIdentity {
 InstrumentIdentity::new(
 InstrumentType::PowerSupply,
 "Mock",
 "M1",
 "S1",
 "1.0",
 TransportDescriptor::Mock { label: "test".into() },
 CapabilityMap::default(),
 )
 }

 #[tokio::test]
 async fn execute_round_trips_through_the_queue() {
 let driver = Box::new(CountingDriver { calls: Arc::new(AtomicU32::new(0)), fail_n_times: 0 });
 let handle = SessionWorker::spawn(identity(), driver, DEFAULT_QUEUE_CAPACITY);
 let result = handle
.execute(Operation::GetReadings { channel: None }, None, Duration::from_secs(1))
.await
.unwrap();
 assert_eq!(result["channels"][0]["voltage"], 5.0);
 }

 #[tokio::test]
 async fn two_consecutive_errors_mark_worker_degraded() {
 let driver = Box::new(CountingDriver { calls: Arc::new(AtomicU32::new(0)), fail_n_times: 10 });
 let handle = SessionWorker::spawn(identity(), driver, DEFAULT_QUEUE_CAPACITY);

 let first = handle.execute(Operation::GetReadings { channel: None }, None, Duration::from_secs(1)).await;
 assert!(first.is_err());
 let second = handle.execute(Operation::GetReadings { channel: None }, None, Duration::from_secs(1)).await;
 assert!(second.is_err());

 let third = handle.execute(Operation::GetReadings { channel: None }, None, Duration::from_secs(1)).await;
 let err = third.unwrap_err();
 assert_eq!(err.kind, ErrorKind::InstrumentUnavailable);
 }

 #[tokio::test]
 async fn cached_telemetry_updates_after_successful_execute() {
 let driver = Box::new(CountingDriver { calls: Arc::new(AtomicU32::new(0)), fail_n_times: 0 });
 let handle = SessionWorker::spawn(identity(), driver, DEFAULT_QUEUE_CAPACITY);
 handle.execute(Operation::GetReadings { channel: None }, None, Duration::from_secs(1)).await.unwrap();
 let telemetry = handle.cached_telemetry();
 assert_eq!(telemetry.channels[0].voltage, 5.0);
 }

 #[tokio::test]
 async fn close_drains_queue_with_cancelled_errors() {
 let driver = Box::new(CountingDriver { calls: Arc::new(AtomicU32::new(0)), fail_n_times: 0 });
 let handle = SessionWorker::spawn(identity(), driver, DEFAULT_QUEUE_CAPACITY);
 handle.close().await;
 let result = handle.execute(Operation::GetReadings { channel: None }, None, Duration::from_secs(1)).await;
 assert!(result.is_err());
 }

 #[tokio::test]
 async fn cancel_removes_not_yet_started_request() {
 let driver = Box::new(CountingDriver { calls: Arc::new(AtomicU32::new(0)), fail_n_times: 0 });
 let handle = SessionWorker::spawn(identity(), driver, DEFAULT_QUEUE_CAPACITY);
 let pending = handle
.submit(Operation::GetReadings { channel: None }, None, Duration::from_secs(1))
.unwrap();
 let id = pending.id;
 // There's a race in a real system between submit and cancel; in
 // this unit test the queue has not been drained yet because we
 // have not yielded to the worker task.
 let cancelled = handle.cancel(id);
 if cancelled {
 let err = pending.await_result().await.unwrap_err();
 assert_eq!(err.kind, ErrorKind::Cancelled);
 }
 }
}
