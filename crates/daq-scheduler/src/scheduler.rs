//! The monotonic priority queue and firing loop.

use crate::cron_adapter;
use crate::model::{JobPatch, NewJob, Schedule, ScheduledJob};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use daq_core::{GatewayError, GatewayResult};
use daq_driver::Operation;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

/// Synthetic session identifier scheduled jobs dispatch under — a
/// system session with its own permissions, distinct from any
/// connected client.
pub const SYSTEM_SESSION_ID: &str = "sys_scheduler";

/// Default interval between priority-queue sweeps. Fine relative to
/// realistic job periods (seconds-to-hours), coarse enough not to spin.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(500);

/// Submits one fired job's operation as if it were an external
/// request — through the Lock Arbiter, under the system session.
/// Implemented by the composition root, keeping this crate free of any
/// direct dependency on `daq-session`.
#[async_trait]
pub trait JobDispatcher: Send + Sync {
 async fn dispatch(&self, equipment_id: &str, operation: Operation, system_session_id: &str) -> GatewayResult<Value>;
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey(DateTime<Utc>, String);

/// Computes the first fire time strictly after `after` for a schedule,
/// used both at creation and whenever a schedule is edited.
fn compute_next_fire(schedule: &Schedule, after: DateTime<Utc>) -> GatewayResult<Option<DateTime<Utc>>> {
 match schedule {
 Schedule::OneShot { at } => Ok(if *at > after { Some(*at) } else { None }),
 Schedule::Interval { period_s } => {
 if *period_s <= 0.0 {
 return Err(GatewayError::bad_request("interval period_s must be positive"));
 }
 Ok(Some(after + chrono::Duration::milliseconds((*period_s * 1000.0) as i64)))
 }
 Schedule::Cron { expression } => cron_adapter::next_match(expression, after),
 }
}

pub struct Scheduler {
 jobs: DashMap<String, ScheduledJob>,
 queue: Mutex<BinaryHeap<Reverse<QueueKey>>>,
 dispatcher: Arc<dyn JobDispatcher>,
 shutdown_tx: watch::Sender<bool>,
}

impl Scheduler {
 pub fn new(dispatcher: Arc<dyn JobDispatcher>) -> Arc<Self> {
 let (shutdown_tx, _rx) = watch::channel(false);
 Arc::new(Self { jobs: DashMap::new(), queue: Mutex::new(BinaryHeap::new()), dispatcher, shutdown_tx })
 }

 pub fn create(&self, input: NewJob) -> GatewayResult<ScheduledJob> {
 let now = Utc::now();
 let next = compute_next_fire(&input.schedule, now)?;
 let job = ScheduledJob {
 id: format!("job_{}", Uuid::new_v4().simple()),
 equipment_id: input.equipment_id,
 operation: input.operation,
 schedule: input.schedule,
 enabled: true,
 next_fire_at: next,
 last_fired_at: None,
 last_error: None,
 created_at: now,
 updated_at: now,
 };
 if let Some(t) = next {
 self.queue.lock().push(Reverse(QueueKey(t, job.id.clone())));
 }
 self.jobs.insert(job.id.clone(), job.clone());
 Ok(job)
 }

 pub fn update(&self, job_id: &str, patch: JobPatch) -> GatewayResult<ScheduledJob> {
 let mut entry = self.jobs.get_mut(job_id).ok_or_else(|| GatewayError::not_found("job not found"))?;
 if let Some(operation) = patch.operation {
 entry.operation = operation;
 }
 if let Some(schedule) = patch.schedule {
 entry.schedule = schedule;
 }
 let next = compute_next_fire(&entry.schedule, Utc::now())?;
 entry.next_fire_at = next;
 entry.updated_at = Utc::now();
 let job = entry.clone();
 drop(entry);
 if let Some(t) = next {
 self.queue.lock().push(Reverse(QueueKey(t, job_id.to_string())));
 }
 Ok(job)
 }

 /// Re-enabling recomputes `next_fire_at` from the current time
 /// rather than resuming a stale schedule.
 pub fn enable(&self, job_id: &str) -> GatewayResult<()> {
 let mut entry = self.jobs.get_mut(job_id).ok_or_else(|| GatewayError::not_found("job not found"))?;
 entry.enabled = true;
 let next = compute_next_fire(&entry.schedule, Utc::now())?;
 entry.next_fire_at = next;
 entry.updated_at = Utc::now();
 drop(entry);
 if let Some(t) = next {
 self.queue.lock().push(Reverse(QueueKey(t, job_id.to_string())));
 }
 Ok(())
 }

 pub fn disable(&self, job_id: &str) -> GatewayResult<()> {
 let mut entry = self.jobs.get_mut(job_id).ok_or_else(|| GatewayError::not_found("job not found"))?;
 entry.enabled = false;
 entry.next_fire_at = None;
 entry.updated_at = Utc::now();
 Ok(())
 }

 pub fn delete(&self, job_id: &str) -> GatewayResult<()> {
 self.jobs.remove(job_id).ok_or_else(|| GatewayError::not_found("job not found"))?;
 Ok(())
 }

 pub fn list_jobs(&self) -> Vec<ScheduledJob> {
 self.jobs.iter().map(|e| e.value().clone()).collect()
 }

 /// Restores jobs persisted from a prior run, preserving their ids
 /// and re-queuing any still-enabled job at its recorded
 /// `next_fire_at` rather than recomputing it ( startup load).
 pub fn seed(&self, jobs: Vec<ScheduledJob>) {
 for job in jobs {
 if job.enabled {
 if let Some(t) = job.next_fire_at {
 self.queue.lock().push(Reverse(QueueKey(t, job.id.clone())));
 }
 }
 self.jobs.insert(job.id.clone(), job);
 }
 }

 pub fn next_fire(&self, job_id: &str) -> GatewayResult<Option<DateTime<Utc>>> {
 self.jobs.get(job_id).map(|j| j.next_fire_at).ok_or_else(|| GatewayError::not_found("job not found"))
 }

 /// Pops and fires every queue entry whose time has arrived. Stale
 /// entries (superseded by an edit, or left behind by a disable)
 /// are discarded silently — the authoritative `next_fire_at` lives
 /// on the job record, the heap entry is only a hint.
 pub async fn fire_due(&self) {
 let now = Utc::now();
 loop {
 let due = {
 let mut q = self.queue.lock();
 match q.peek() {
 Some(Reverse(key)) if key.0 <= now => q.pop().map(|Reverse(k)| k),
 _ => None,
 }
 };
 let Some(key) = due else { break };
 self.fire_one(&key.1, key.0).await;
 }
 }

 async fn fire_one(&self, job_id: &str, scheduled_for: DateTime<Utc>) {
 let snapshot = match self.jobs.get(job_id) {
 Some(j) if j.enabled && j.next_fire_at == Some(scheduled_for) => j.clone(),
 _ => return,
 };

 let result = self.dispatcher.dispatch(&snapshot.equipment_id, snapshot.operation.clone(), SYSTEM_SESSION_ID).await;
 let now = Utc::now();
 match &result {
 Ok(_) => info!(job_id, equipment_id = %snapshot.equipment_id, "scheduled job fired"),
 Err(e) => warn!(job_id, equipment_id = %snapshot.equipment_id, error = %e, "scheduled job failed"),
 }

 // Reschedule, catching up at most once if the wall clock jumped
 // past more than one occurrence ("at most one
 // catch-up invocation per schedule").
 let next = match &snapshot.schedule {
 Schedule::OneShot {.. } => None,
 Schedule::Interval { period_s } => {
 let period = chrono::Duration::milliseconds((*period_s * 1000.0) as i64);
 let mut candidate = scheduled_for + period;
 if candidate <= now {
 candidate = now + period;
 }
 Some(candidate)
 }
 Schedule::Cron { expression } => match cron_adapter::next_match(expression, now) {
 Ok(t) => t,
 Err(e) => {
 warn!(job_id, error = %e, "failed to compute next cron fire after an already-validated expression");
 None
 }
 },
 };

 if let Some(mut job) = self.jobs.get_mut(job_id) {
 job.last_fired_at = Some(now);
 job.last_error = result.err().map(|e| e.to_string());
 job.next_fire_at = next;
 job.updated_at = now;
 if next.is_none() && matches!(snapshot.schedule, Schedule::OneShot {.. }) {
 job.enabled = false;
 }
 }
 if let Some(t) = next {
 self.queue.lock().push(Reverse(QueueKey(t, job_id.to_string())));
 }
 }

 pub fn spawn_loop(self: &Arc<Self>, tick_interval: Duration) {
 let this = self.clone();
 let mut shutdown = this.shutdown_tx.subscribe();
 tokio::spawn(async move {
 let mut ticker = tokio::time::interval(tick_interval);
 loop {
 tokio::select! {
 _ = ticker.tick() => this.fire_due().await,
 _ = shutdown.changed() => {
 info!("scheduler firing loop shutting down");
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

#[cfg(test)]
mod tests {
 use super::*;
 use std::sync::atomic::{AtomicUsize, Ordering};

 struct CountingDispatcher {
 calls: Arc<AtomicUsize>,
 fail: bool,
 }

 #[async_trait]
 impl JobDispatcher for CountingDispatcher {
 async fn dispatch(&self, _equipment_id: &str, _operation: Operation, session_id: &str) -> GatewayResult<Value> {
 assert_eq!(session_id, SYSTEM_SESSION_ID);
 self.calls.fetch_add(1, Ordering::SeqCst);
 if self.fail {
 return Err(GatewayError::instrument_unavailable("simulated failure"));
 }
 Ok(serde_json::json!({}))
 }
 }

 fn new_job(schedule: Schedule) -> NewJob {
 NewJob { equipment_id: "eq_1".into(), operation: Operation::GetReadings { channel: None }, schedule }
 }

 #[tokio::test]
 async fn one_shot_job_fires_once_then_retires() {
 let calls = Arc::new(AtomicUsize::new(0));
 let scheduler = Scheduler::new(Arc::new(CountingDispatcher { calls: calls.clone(), fail: false }));
 let at = Utc::now() - chrono::Duration::seconds(1);
 let job = scheduler.create(new_job(Schedule::OneShot { at })).unwrap();
 scheduler.fire_due().await;
 assert_eq!(calls.load(Ordering::SeqCst), 1);
 let after = scheduler.jobs.get(&job.id).unwrap().clone();
 assert!(!after.enabled);
 assert!(after.next_fire_at.is_none());

 scheduler.fire_due().await;
 assert_eq!(calls.load(Ordering::SeqCst), 1);
 }

 #[tokio::test]
 async fn interval_job_reschedules_after_firing() {
 let calls = Arc::new(AtomicUsize::new(0));
 let scheduler = Scheduler::new(Arc::new(CountingDispatcher { calls: calls.clone(), fail: false }));
 let job = scheduler.create(new_job(Schedule::Interval { period_s: 0.01 })).unwrap();
 tokio::time::sleep(Duration::from_millis(20)).await;
 scheduler.fire_due().await;
 assert_eq!(calls.load(Ordering::SeqCst), 1);
 let after = scheduler.next_fire(&job.id).unwrap();
 assert!(after.is_some());
 }

 #[tokio::test]
 async fn large_wall_clock_jump_catches_up_only_once() {
 let calls = Arc::new(AtomicUsize::new(0));
 let scheduler = Scheduler::new(Arc::new(CountingDispatcher { calls: calls.clone(), fail: false }));
 scheduler.create(new_job(Schedule::Interval { period_s: 1.0 })).unwrap();
 tokio::time::sleep(Duration::from_millis(1100)).await;
 scheduler.fire_due().await;
 assert_eq!(calls.load(Ordering::SeqCst), 1);
 // Nothing else is due yet; a second immediate sweep must not fire again.
 scheduler.fire_due().await;
 assert_eq!(calls.load(Ordering::SeqCst), 1);
 }

 #[tokio::test]
 async fn failed_dispatch_is_recorded_but_still_reschedules() {
 let calls = Arc::new(AtomicUsize::new(0));
 let scheduler = Scheduler::new(Arc::new(CountingDispatcher { calls: calls.clone(), fail: true }));
 let job = scheduler.create(new_job(Schedule::Interval { period_s: 0.01 })).unwrap();
 tokio::time::sleep(Duration::from_millis(20)).await;
 scheduler.fire_due().await;
 let after = scheduler.jobs.get(&job.id).unwrap().clone();
 assert!(after.last_error.is_some());
 assert!(after.next_fire_at.is_some());
 }

 #[tokio::test]
 async fn disabling_prevents_the_stale_queue_entry_from_firing() {
 let calls = Arc::new(AtomicUsize::new(0));
 let scheduler = Scheduler::new(Arc::new(CountingDispatcher { calls: calls.clone(), fail: false }));
 let job = scheduler.create(new_job(Schedule::OneShot { at: Utc::now() })).unwrap();
 scheduler.disable(&job.id).unwrap();
 tokio::time::sleep(Duration::from_millis(5)).await;
 scheduler.fire_due().await;
 assert_eq!(calls.load(Ordering::SeqCst), 0);
 }

 #[test]
 fn create_rejects_non_positive_interval() {
 let scheduler = Scheduler::new(Arc::new(CountingDispatcher { calls: Arc::new(AtomicUsize::new(0)), fail: false }));
 let err = scheduler.create(new_job(Schedule::Interval { period_s: 0.0 })).unwrap_err();
 assert_eq!(err.kind, daq_core::ErrorKind::BadRequest);
 }
}
