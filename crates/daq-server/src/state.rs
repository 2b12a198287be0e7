//! Composition root state: the equipment registry plus every
//! component it shares with the HTTP and duplex surfaces.
//!
//! The equipment registry is the one piece of shared state that the
//! Alarm Engine's `TelemetrySource`, the Scheduler's `JobDispatcher`,
//! and the Stream Multiplexer's `SamplerFactory` all close over, so it
//! is built before any of them and handed in as an `Arc` — each of
//! those crates is deliberately unaware of `daq-session`'s worker type
//! and only sees the closures it needs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tracing::warn;

use daq_alarm::AlarmEngine;
use daq_core::{GatewayError, GatewayResult, InstrumentIdentity, StreamType, Telemetry};
use daq_driver::Operation;
use daq_scheduler::{JobDispatcher, Scheduler};
use daq_session::{ClientSessionRegistry, LockArbiter, LockMode, SessionWorkerHandle};
use daq_storage::StateStore;
use daq_stream::StreamMultiplexer;

use crate::config::Settings;

/// Registry of connected instruments, keyed by `InstrumentIdentity::id`.
/// Shared (never cloned) across every component that needs to reach a
/// running worker.
pub type EquipmentRegistry = DashMap<String, SessionWorkerHandle>;

/// Turns one fired job into a worker call under the scheduler's
/// synthetic session, bypassing lock enforcement the way the system
/// session is meant to.
pub struct SchedulerDispatcher {
 pub equipment: Arc<EquipmentRegistry>,
 pub command_timeout: Duration,
}

#[async_trait]
impl JobDispatcher for SchedulerDispatcher {
 async fn dispatch(&self, equipment_id: &str, operation: Operation, system_session_id: &str) -> GatewayResult<Value> {
 let handle = self
.equipment
.get(equipment_id)
.map(|e| e.clone())
.ok_or_else(|| GatewayError::not_found("scheduled job's equipment is not connected"))?;
 handle.execute(operation, Some(system_session_id.to_string()), self.command_timeout).await
 }
}

/// Builds the `TelemetrySource` closure the Alarm Engine evaluates
/// against — cached telemetry only, never a fresh wire operation
///.
pub fn telemetry_source(equipment: Arc<EquipmentRegistry>) -> daq_alarm::TelemetrySource {
 Arc::new(move |equipment_id: &str| equipment.get(equipment_id).map(|h| h.cached_telemetry()))
}

/// Builds the `SamplerFactory` closure the Stream Multiplexer uses to
/// turn `(equipment_id, stream_type, params)` into a one-shot sampler
/// against the matching worker.
pub fn sampler_factory(equipment: Arc<EquipmentRegistry>, command_timeout: Duration) -> daq_stream::SamplerFactory {
 Arc::new(move |equipment_id: &str, stream_type: StreamType, params: Option<Value>| {
 let handle = equipment
.get(equipment_id)
.map(|e| e.clone())
.ok_or_else(|| GatewayError::not_found("equipment is not connected"))?;
 let channel = params
.as_ref()
.and_then(|p| p.get("channel"))
.and_then(|c| c.as_u64())
.map(|c| c as u32);
 let operation = match stream_type {
 StreamType::Readings => Operation::GetReadings { channel },
 StreamType::Waveform => Operation::GetWaveform { channel: channel.unwrap_or(0) },
 StreamType::Measurements => Operation::GetMeasurements { channel: channel.unwrap_or(0) },
 };
 Ok(handle.subscribe_snapshot(operation, command_timeout))
 })
}

/// Everything the HTTP and WebSocket handlers share, wrapped in an
/// `Arc` for axum's `State` extractor.
pub struct AppState {
 pub settings: Settings,
 pub equipment: Arc<EquipmentRegistry>,
 pub sessions: Arc<ClientSessionRegistry>,
 pub locks: Arc<LockArbiter>,
 pub streams: Arc<StreamMultiplexer>,
 pub alarms: Arc<AlarmEngine>,
 pub scheduler: Arc<Scheduler>,
 pub storage: StateStore,
}

impl AppState {
 /// Looks up a connected instrument's worker handle, the lookup
 /// every equipment-scoped handler starts with.
 pub fn worker(&self, equipment_id: &str) -> GatewayResult<SessionWorkerHandle> {
 self.equipment
.get(equipment_id)
.map(|e| e.clone())
.ok_or_else(|| GatewayError::not_found(format!("unknown equipment id '{equipment_id}'")))
 }

 pub fn identity(&self, equipment_id: &str) -> GatewayResult<InstrumentIdentity> {
 Ok(self.worker(equipment_id)?.identity())
 }

 pub fn telemetry(&self, equipment_id: &str) -> GatewayResult<Telemetry> {
 Ok(self.worker(equipment_id)?.cached_telemetry())
 }

 /// Enforces the lock a command needs, when `--enforce-locks` is
 /// set ("Command classification"): control operations
 /// require the caller hold the exclusive lock, read operations
 /// require at least an observer lock. Disabled by default so the
 /// mock backend is usable without a session handshake.
 pub fn authorize(&self, equipment_id: &str, session_id: Option<&str>, operation: &Operation) -> GatewayResult<()> {
 if !self.settings.enforce_locks {
 return Ok(());
 }
 let session_id = session_id
.ok_or_else(|| GatewayError::permission_denied("a session_id is required while lock enforcement is on"))?;
 let authorized = if operation.is_control() {
 self.locks.can_control(equipment_id, session_id)
 } else {
 self.locks.can_observe(equipment_id, session_id)
 };
 if !authorized {
 return Err(GatewayError::permission_denied(format!(
 "session '{session_id}' does not hold the lock '{}' requires",
 operation.name()
 )));
 }
 self.locks.touch(equipment_id, session_id);
 Ok(())
 }

 /// Persists the current alarm definitions and scheduled jobs,
 /// called after every mutating alarm/scheduler request (
 /// "Persisted state layout").
 pub async fn persist_alarms(&self) {
 if let Err(e) = self.storage.save_collection("alarms.json", &self.alarms.list_alarms()).await {
 warn!(error = %e, "failed to persist alarms.json");
 }
 }

 pub async fn persist_jobs(&self) {
 if let Err(e) = self.storage.save_collection("schedule.json", &self.scheduler.list_jobs()).await {
 warn!(error = %e, "failed to persist schedule.json");
 }
 }

 /// Removes a disconnected instrument's registration and releases
 /// every lock held on it.
 pub async fn disconnect(&self, equipment_id: &str) -> GatewayResult<()> {
 let (_, handle) = self
.equipment
.remove(equipment_id)
.ok_or_else(|| GatewayError::not_found(format!("unknown equipment id '{equipment_id}'")))?;
 handle.close().await;
 for session_id in self.session_ids_holding(equipment_id) {
 let _ = self.locks.release(equipment_id, &session_id, true);
 }
 Ok(())
 }

 fn session_ids_holding(&self, equipment_id: &str) -> Vec<String> {
 let mut ids: Vec<String> = self
.locks
.queue_entries(equipment_id)
.into_iter()
.map(|q| q.session_id)
.collect();
 if let Some(holder) = self.locks.holder(equipment_id) {
 ids.push(holder);
 }
 ids
 }

 /// Ends a client session: releases its locks, unsubscribes any
 /// duplex streams, and drops its record ("Ending a
 /// session... unsubscribes all streams for that session").
 pub fn end_session(&self, session_id: &str) -> bool {
 self.streams.unregister_subscriber(session_id);
 self.sessions.end(session_id)
 }

 pub fn acquire_lock(
 &self,
 equipment_id: &str,
 session_id: &str,
 mode: LockMode,
 timeout_s: u64,
 queue_if_busy: bool,
 ) -> GatewayResult<daq_session::AcquireOutcome> {
 if !self.equipment.contains_key(equipment_id) {
 return Err(GatewayError::not_found(format!("unknown equipment id '{equipment_id}'")));
 }
 self.locks.acquire(equipment_id, session_id, mode, timeout_s, queue_if_busy)
 }

 /// Executes one operation against a connected instrument's worker,
 /// enforcing the authorization rule and its deadline (
 /// `POST /equipment/{id}/command`).
 pub async fn execute_command(
 &self,
 equipment_id: &str,
 operation: Operation,
 session_id: Option<String>,
 ) -> GatewayResult<Value> {
 self.authorize(equipment_id, session_id.as_deref(), &operation)?;
 let handle = self.worker(equipment_id)?;
 let deadline = Duration::from_millis(self.settings.command_timeout_ms);
 handle.execute(operation, session_id, deadline).await
 }

 pub async fn save_equipment_state(&self, equipment_id: &str, state_id: &str) -> GatewayResult<()> {
 let handle = self.worker(equipment_id)?;
 let deadline = Duration::from_millis(self.settings.command_timeout_ms);
 let snapshot = handle.execute_snapshot(None, deadline).await?;
 self.storage
.save_equipment_state(equipment_id, state_id, &snapshot)
.await
.map_err(|e| GatewayError::internal(format!("failed to persist equipment state: {e}")))
 }

 pub async fn restore_equipment_state(&self, equipment_id: &str, state_id: &str) -> GatewayResult<()> {
 let handle = self.worker(equipment_id)?;
 let state = self
.storage
.load_equipment_state(equipment_id, state_id)
.await
.map_err(|e| GatewayError::internal(format!("failed to load persisted equipment state: {e}")))?
.ok_or_else(|| GatewayError::not_found(format!("no saved state '{state_id}' for '{equipment_id}'")))?;
 let deadline = Duration::from_millis(self.settings.command_timeout_ms);
 handle.execute_restore(state, None, deadline).await?;
 Ok(())
 }
}
