//! Lock Arbiter: exclusive/observer locks, queued waiters, and the
//! activity-driven reaper.

use chrono::{DateTime, Utc};
use daq_core::{ErrorDetails, GatewayError, GatewayResult};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const MAX_EVENTS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
 Exclusive,
 Observer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRecord {
 pub equipment_id: String,
 pub session_id: String,
 pub mode: LockMode,
 pub acquired_at: DateTime<Utc>,
 pub last_activity: DateTime<Utc>,
 pub timeout_s: u64,
}

impl LockRecord {
 fn expired(&self, now: DateTime<Utc>) -> bool {
 self.timeout_s > 0
 && now.signed_duration_since(self.last_activity).num_seconds() >= self.timeout_s as i64
 }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
 pub equipment_id: String,
 pub session_id: String,
 pub mode: LockMode,
 pub enqueued_at: DateTime<Utc>,
 pub position: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LockEvent {
 Expired { equipment_id: String, session_id: String },
 ObserversDemoted { equipment_id: String, demoted_sessions: Vec<String> },
 Promoted { equipment_id: String, session_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
 Refreshed,
 Observer,
 Locked,
 Queued { position: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
 Released,
 NotHeld,
}

#[derive(Default)]
struct EquipmentLockState {
 exclusive: Option<LockRecord>,
 observers: std::collections::HashMap<String, LockRecord>,
 queue: VecDeque<QueueEntry>,
}

impl EquipmentLockState {
 fn renumber_queue(&mut self) {
 for (i, entry) in self.queue.iter_mut().enumerate() {
 entry.position = i;
 }
 }

 fn queue_length(&self) -> usize {
 self.queue.len()
 }
}

/// Grants/queues exclusive and observer locks per instrument, expires
/// idle locks, and classifies commands as control vs read (the
/// classifier itself lives in `daq-driver::operation`).
pub struct LockArbiter {
 equipment: DashMap<String, Mutex<EquipmentLockState>>,
 events: Mutex<VecDeque<LockEvent>>,
 default_queue_timeout_s: u64,
 shutdown_tx: watch::Sender<bool>,
}

impl LockArbiter {
 pub fn new(default_queue_timeout_s: u64) -> Arc<Self> {
 let (shutdown_tx, _rx) = watch::channel(false);
 Arc::new(Self {
 equipment: DashMap::new(),
 events: Mutex::new(VecDeque::new()),
 default_queue_timeout_s,
 shutdown_tx,
 })
 }

 fn push_event(&self, event: LockEvent) {
 let mut events = self.events.lock();
 if events.len() >= MAX_EVENTS {
 events.pop_front();
 }
 events.push_back(event);
 }

 pub fn recent_events(&self) -> Vec<LockEvent> {
 self.events.lock().iter().cloned().collect()
 }

 /// Acquires a lock for `session_id` on `equipment_id` (
 /// `acquire`).
 pub fn acquire(
 &self,
 equipment_id: &str,
 session_id: &str,
 mode: LockMode,
 timeout_s: u64,
 queue_if_busy: bool,
 ) -> GatewayResult<AcquireOutcome> {
 let now = Utc::now();
 let entry = self
.equipment
.entry(equipment_id.to_string())
.or_insert_with(|| Mutex::new(EquipmentLockState::default()));
 let mut state = entry.lock();

 if let Some(existing) = state.exclusive.clone() {
 if existing.session_id == session_id {
 state.exclusive = Some(LockRecord {
 last_activity: now,
 timeout_s,
..existing
 });
 return Ok(AcquireOutcome::Refreshed);
 }
 }
 if let Some(existing) = state.observers.get(session_id).cloned() {
 if mode == LockMode::Observer {
 state.observers.insert(
 session_id.to_string(),
 LockRecord { last_activity: now, timeout_s,..existing },
 );
 return Ok(AcquireOutcome::Refreshed);
 }
 }

 match mode {
 LockMode::Observer => {
 if let Some(holder) = &state.exclusive {
 if holder.session_id != session_id {
 return Err(GatewayError::conflict(
 "equipment is exclusively locked by another session",
 holder.session_id.clone(),
 )
.with_details(ErrorDetails {
 holder_session_id: Some(holder.session_id.clone()),
 queue_length: Some(state.queue_length()),
..Default::default()
 }));
 }
 }
 state.observers.insert(
 session_id.to_string(),
 LockRecord {
 equipment_id: equipment_id.to_string(),
 session_id: session_id.to_string(),
 mode: LockMode::Observer,
 acquired_at: now,
 last_activity: now,
 timeout_s,
 },
 );
 Ok(AcquireOutcome::Observer)
 }
 LockMode::Exclusive => {
 if state.exclusive.is_none() {
 let demoted: Vec<String> = state.observers.keys().cloned().collect();
 state.observers.clear();
 state.exclusive = Some(LockRecord {
 equipment_id: equipment_id.to_string(),
 session_id: session_id.to_string(),
 mode: LockMode::Exclusive,
 acquired_at: now,
 last_activity: now,
 timeout_s,
 });
 if !demoted.is_empty() {
 self.push_event(LockEvent::ObserversDemoted {
 equipment_id: equipment_id.to_string(),
 demoted_sessions: demoted,
 });
 }
 return Ok(AcquireOutcome::Locked);
 }
 let holder = state.exclusive.clone().unwrap();
 if !queue_if_busy {
 return Err(GatewayError::conflict(
 "equipment is exclusively locked by another session",
 holder.session_id.clone(),
 )
.with_details(ErrorDetails {
 holder_session_id: Some(holder.session_id.clone()),
 queue_length: Some(state.queue_length()),
..Default::default()
 }));
 }
 if !state.queue.iter().any(|q| q.session_id == session_id) {
 state.queue.push_back(QueueEntry {
 equipment_id: equipment_id.to_string(),
 session_id: session_id.to_string(),
 mode,
 enqueued_at: now,
 position: 0,
 });
 state.renumber_queue();
 }
 let position = state
.queue
.iter()
.position(|q| q.session_id == session_id)
.unwrap_or(0);
 Ok(AcquireOutcome::Queued { position })
 }
 }
 }

 /// Releases `session_id`'s lock on `equipment_id`. Only the owner
 /// may release unless `force`. Promotes the queue head on release.
 pub fn release(&self, equipment_id: &str, session_id: &str, force: bool) -> GatewayResult<ReleaseOutcome> {
 let Some(entry) = self.equipment.get(equipment_id) else {
 return Ok(ReleaseOutcome::NotHeld);
 };
 let mut state = entry.lock();

 let mut released = false;
 if let Some(holder) = state.exclusive.clone() {
 if holder.session_id == session_id || force {
 state.exclusive = None;
 released = true;
 } else {
 return Err(GatewayError::permission_denied(
 "only the lock holder may release it",
 ));
 }
 }
 if state.observers.remove(session_id).is_some() {
 released = true;
 }
 if !released {
 return Ok(ReleaseOutcome::NotHeld);
 }

 if state.exclusive.is_none() {
 if let Some(next) = state.queue.pop_front() {
 state.renumber_queue();
 let now = Utc::now();
 state.exclusive = Some(LockRecord {
 equipment_id: equipment_id.to_string(),
 session_id: next.session_id.clone(),
 mode: LockMode::Exclusive,
 acquired_at: now,
 last_activity: now,
 timeout_s: self.default_queue_timeout_s,
 });
 self.push_event(LockEvent::Promoted {
 equipment_id: equipment_id.to_string(),
 session_id: next.session_id,
 });
 }
 }
 Ok(ReleaseOutcome::Released)
 }

 /// Refreshes last-activity; returns whether `session_id` currently
 /// owns the exclusive lock.
 pub fn touch(&self, equipment_id: &str, session_id: &str) -> bool {
 let Some(entry) = self.equipment.get(equipment_id) else {
 return false;
 };
 let mut state = entry.lock();
 let now = Utc::now();
 let mut owns_exclusive = false;
 if let Some(lock) = state.exclusive.as_mut() {
 if lock.session_id == session_id {
 lock.last_activity = now;
 owns_exclusive = true;
 }
 }
 if let Some(lock) = state.observers.get_mut(session_id) {
 lock.last_activity = now;
 }
 owns_exclusive
 }

 pub fn can_control(&self, equipment_id: &str, session_id: &str) -> bool {
 self.equipment
.get(equipment_id)
.map(|e| {
 e.lock()
.exclusive
.as_ref()
.map(|l| l.session_id == session_id)
.unwrap_or(false)
 })
.unwrap_or(false)
 }

 pub fn can_observe(&self, equipment_id: &str, session_id: &str) -> bool {
 self.equipment
.get(equipment_id)
.map(|e| {
 let state = e.lock();
 state.exclusive.as_ref().map(|l| l.session_id == session_id).unwrap_or(false)
 || state.observers.contains_key(session_id)
 })
.unwrap_or(false)
 }

 pub fn holder(&self, equipment_id: &str) -> Option<String> {
 self.equipment
.get(equipment_id)
.and_then(|e| e.lock().exclusive.as_ref().map(|l| l.session_id.clone()))
 }

 pub fn queue_length(&self, equipment_id: &str) -> usize {
 self.equipment.get(equipment_id).map(|e| e.lock().queue_length()).unwrap_or(0)
 }

 /// Snapshot of the queued waiters for one piece of equipment, in
 /// position order (`GET /locks/{equipment_id}/queue`).
 pub fn queue_entries(&self, equipment_id: &str) -> Vec<QueueEntry> {
 self.equipment
.get(equipment_id)
.map(|e| e.lock().queue.iter().cloned().collect())
.unwrap_or_default()
 }

 /// Releases every lock `session_id` holds, across all equipment.
 /// Used when a client session ends.
 pub fn release_all_for(&self, session_id: &str) -> usize {
 let mut n = 0;
 for entry in self.equipment.iter() {
 let equipment_id = entry.key().clone();
 if matches!(self.release(&equipment_id, session_id, true), Ok(ReleaseOutcome::Released)) {
 n += 1;
 }
 }
 n
 }

 /// Scans every equipment's locks once, releasing anything whose
 /// `last_activity + timeout_s < now`. Called by the background
 /// reaper at a fixed interval (default 10s).
 pub fn reap_expired(&self) {
 let now = Utc::now();
 for entry in self.equipment.iter() {
 let equipment_id = entry.key().clone();
 let mut state = entry.value().lock();

 if let Some(lock) = state.exclusive.clone() {
 if lock.expired(now) {
 state.exclusive = None;
 self.push_event(LockEvent::Expired {
 equipment_id: equipment_id.clone(),
 session_id: lock.session_id.clone(),
 });
 if let Some(next) = state.queue.pop_front() {
 state.renumber_queue();
 state.exclusive = Some(LockRecord {
 equipment_id: equipment_id.clone(),
 session_id: next.session_id.clone(),
 mode: LockMode::Exclusive,
 acquired_at: now,
 last_activity: now,
 timeout_s: self.default_queue_timeout_s,
 });
 self.push_event(LockEvent::Promoted {
 equipment_id: equipment_id.clone(),
 session_id: next.session_id,
 });
 }
 debug!(equipment_id = %equipment_id, "exclusive lock expired");
 }
 }
 let expired_observers: Vec<String> = state
.observers
.iter()
.filter(|(_, l)| l.expired(now))
.map(|(k, _)| k.clone())
.collect();
 for session_id in expired_observers {
 state.observers.remove(&session_id);
 self.push_event(LockEvent::Expired { equipment_id: equipment_id.clone(), session_id });
 }
 }
 }

 /// Spawns the background reaper loop on the current tokio runtime.
 pub fn spawn_reaper(self: &Arc<Self>, interval: Duration) {
 let this = self.clone();
 let mut shutdown = this.shutdown_tx.subscribe();
 tokio::spawn(async move {
 let mut ticker = tokio::time::interval(interval);
 loop {
 tokio::select! {
 _ = ticker.tick() => this.reap_expired(),
 _ = shutdown.changed() => {
 info!("lock arbiter reaper shutting down");
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

 #[test]
 fn acquire_exclusive_on_unlocked_equipment_succeeds() {
 let arbiter = LockArbiter::new(300);
 let outcome = arbiter.acquire("eq_1", "s_a", LockMode::Exclusive, 300, false).unwrap();
 assert_eq!(outcome, AcquireOutcome::Locked);
 assert!(arbiter.can_control("eq_1", "s_a"));
 }

 #[test]
 fn second_session_conflict_reports_holder() {
 let arbiter = LockArbiter::new(300);
 arbiter.acquire("eq_1", "s_a", LockMode::Exclusive, 300, false).unwrap();
 let err = arbiter.acquire("eq_1", "s_b", LockMode::Exclusive, 300, false).unwrap_err();
 assert_eq!(err.kind, daq_core::ErrorKind::Conflict);
 assert_eq!(err.details.unwrap().holder_session_id.as_deref(), Some("s_a"));
 }

 #[test]
 fn queue_then_release_promotes_next() {
 let arbiter = LockArbiter::new(300);
 arbiter.acquire("eq_1", "s_a", LockMode::Exclusive, 300, false).unwrap();
 let outcome = arbiter.acquire("eq_1", "s_b", LockMode::Exclusive, 300, true).unwrap();
 assert_eq!(outcome, AcquireOutcome::Queued { position: 0 });

 arbiter.release("eq_1", "s_a", false).unwrap();
 assert!(arbiter.can_control("eq_1", "s_b"));
 assert!(!arbiter.can_control("eq_1", "s_a"));
 }

 #[test]
 fn exclusive_acquire_clears_and_demotes_observers() {
 let arbiter = LockArbiter::new(300);
 arbiter.acquire("eq_1", "s_observer", LockMode::Observer, 300, false).unwrap();
 assert!(arbiter.can_observe("eq_1", "s_observer"));

 arbiter.acquire("eq_1", "s_owner", LockMode::Exclusive, 300, false).unwrap();
 assert!(!arbiter.can_observe("eq_1", "s_observer"));
 let events = arbiter.recent_events();
 assert!(events
.iter()
.any(|e| matches!(e, LockEvent::ObserversDemoted {.. })));
 }

 #[test]
 fn observer_conflicts_with_other_sessions_exclusive() {
 let arbiter = LockArbiter::new(300);
 arbiter.acquire("eq_1", "s_a", LockMode::Exclusive, 300, false).unwrap();
 let err = arbiter.acquire("eq_1", "s_b", LockMode::Observer, 300, false).unwrap_err();
 assert_eq!(err.kind, daq_core::ErrorKind::Conflict);
 }

 #[test]
 fn can_control_implies_can_observe() {
 let arbiter = LockArbiter::new(300);
 arbiter.acquire("eq_1", "s_a", LockMode::Exclusive, 300, false).unwrap();
 assert!(arbiter.can_control("eq_1", "s_a"));
 assert!(arbiter.can_observe("eq_1", "s_a"));
 }

 #[test]
 fn acquire_then_release_from_unlocked_is_a_noop() {
 let arbiter = LockArbiter::new(300);
 arbiter.acquire("eq_1", "s_a", LockMode::Exclusive, 300, false).unwrap();
 arbiter.release("eq_1", "s_a", false).unwrap();
 assert!(!arbiter.can_control("eq_1", "s_a"));
 assert_eq!(arbiter.holder("eq_1"), None);
 }

 #[test]
 fn zero_timeout_never_expires() {
 let arbiter = LockArbiter::new(300);
 arbiter.acquire("eq_1", "s_a", LockMode::Exclusive, 0, false).unwrap();
 arbiter.reap_expired();
 assert!(arbiter.can_control("eq_1", "s_a"));
 }

 #[test]
 fn release_all_for_releases_every_equipment() {
 let arbiter = LockArbiter::new(300);
 arbiter.acquire("eq_1", "s_a", LockMode::Exclusive, 300, false).unwrap();
 arbiter.acquire("eq_2", "s_a", LockMode::Exclusive, 300, false).unwrap();
 let n = arbiter.release_all_for("s_a");
 assert_eq!(n, 2);
 assert!(!arbiter.can_control("eq_1", "s_a"));
 assert!(!arbiter.can_control("eq_2", "s_a"));
 }

 #[test]
 fn refresh_same_session_returns_refreshed() {
 let arbiter = LockArbiter::new(300);
 arbiter.acquire("eq_1", "s_a", LockMode::Exclusive, 300, false).unwrap();
 let outcome = arbiter.acquire("eq_1", "s_a", LockMode::Exclusive, 600, false).unwrap();
 assert_eq!(outcome, AcquireOutcome::Refreshed);
 }
}
