//! Alarm Engine: sampling loop, CRUD, and the debounce/dedup state
//! machine.

use crate::model::{AlarmDefinition, AlarmEvent, AlarmKind, AlarmPatch, AlarmStatistics, EventFilter, EventStatus, Transition};
use crate::notify::{dispatch, NotificationChannel};
use chrono::{DateTime, Utc};
use daq_core::{GatewayError, GatewayResult, Telemetry};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

/// Default sampling interval for alarm evaluation ("At a
/// fixed interval (default 1 s)").
pub const DEFAULT_EVAL_INTERVAL: Duration = Duration::from_secs(1);

/// Reads a Session Worker's cached telemetry without touching the
/// wire. Supplied by the composition root so this crate never learns
/// about session/driver machinery ("must never block on wire
/// I/O").
pub type TelemetrySource = Arc<dyn Fn(&str) -> Option<Telemetry> + Send + Sync>;

/// Input to `create` — the generated fields (`id`, timestamps) are
/// assigned by the engine.
#[derive(Debug, Clone)]
pub struct NewAlarm {
 pub equipment_id: String,
 pub parameter: String,
 pub kind: AlarmKind,
 pub deadband: f64,
 pub delay_seconds: f64,
 pub auto_clear: bool,
 pub description: Option<String>,
}

struct PendingState {
 first_true_at: DateTime<Utc>,
 value: f64,
}

pub struct AlarmEngine {
 alarms: DashMap<String, AlarmDefinition>,
 events: DashMap<String, AlarmEvent>,
 /// alarm_id -> id of its currently open (pending/active/acknowledged) event.
 open_event: DashMap<String, String>,
 pending: DashMap<String, PendingState>,
 telemetry_source: TelemetrySource,
 channels: Vec<Box<dyn NotificationChannel>>,
 shutdown_tx: watch::Sender<bool>,
}

impl AlarmEngine {
 pub fn new(telemetry_source: TelemetrySource, channels: Vec<Box<dyn NotificationChannel>>) -> Arc<Self> {
 let (shutdown_tx, _rx) = watch::channel(false);
 Arc::new(Self {
 alarms: DashMap::new(),
 events: DashMap::new(),
 open_event: DashMap::new(),
 pending: DashMap::new(),
 telemetry_source,
 channels,
 shutdown_tx,
 })
 }

 /// Rejects parameter names that resolve to nothing at creation
 /// time, rather than discovering the mistake silently during
 /// evaluation ( Open Question decision).
 fn validate_parameter(&self, equipment_id: &str, parameter: &str) -> GatewayResult<()> {
 if Telemetry::is_known_parameter(parameter) {
 return Ok(());
 }
 if let Some(telemetry) = (self.telemetry_source)(equipment_id) {
 if telemetry.aux.keys().any(|k| k.eq_ignore_ascii_case(parameter)) {
 return Ok(());
 }
 }
 Err(GatewayError::bad_request(format!("unknown alarm parameter '{parameter}'")))
 }

 /// Restores alarm definitions persisted from a prior run, preserving
 /// their ids. Evaluation state (pending/open-event) starts fresh;
 /// a still-active condition simply re-raises on the next sweep
 /// ( startup load).
 pub fn seed(&self, definitions: Vec<AlarmDefinition>) {
 for def in definitions {
 self.alarms.insert(def.id.clone(), def);
 }
 }

 pub fn create(&self, input: NewAlarm) -> GatewayResult<AlarmDefinition> {
 self.validate_parameter(&input.equipment_id, &input.parameter)?;
 let now = Utc::now();
 let def = AlarmDefinition {
 id: format!("alarm_{}", Uuid::new_v4().simple()),
 equipment_id: input.equipment_id,
 parameter: input.parameter,
 kind: input.kind,
 deadband: input.deadband,
 delay_seconds: input.delay_seconds,
 auto_clear: input.auto_clear,
 enabled: true,
 description: input.description,
 created_at: now,
 updated_at: now,
 };
 self.alarms.insert(def.id.clone(), def.clone());
 Ok(def)
 }

 pub fn update(&self, alarm_id: &str, patch: AlarmPatch) -> GatewayResult<AlarmDefinition> {
 let equipment_id = self
.alarms
.get(alarm_id)
.map(|d| d.equipment_id.clone())
.ok_or_else(|| GatewayError::not_found("alarm not found"))?;
 if let Some(parameter) = &patch.parameter {
 self.validate_parameter(&equipment_id, parameter)?;
 }

 let mut entry = self.alarms.get_mut(alarm_id).ok_or_else(|| GatewayError::not_found("alarm not found"))?;
 if let Some(parameter) = patch.parameter {
 entry.parameter = parameter;
 }
 if let Some(kind) = patch.kind {
 entry.kind = kind;
 }
 if let Some(deadband) = patch.deadband {
 entry.deadband = deadband;
 }
 if let Some(delay_seconds) = patch.delay_seconds {
 entry.delay_seconds = delay_seconds;
 }
 if let Some(auto_clear) = patch.auto_clear {
 entry.auto_clear = auto_clear;
 }
 if let Some(description) = patch.description {
 entry.description = description;
 }
 entry.updated_at = Utc::now();
 Ok(entry.clone())
 }

 pub fn enable(&self, alarm_id: &str) -> GatewayResult<()> {
 let mut entry = self.alarms.get_mut(alarm_id).ok_or_else(|| GatewayError::not_found("alarm not found"))?;
 entry.enabled = true;
 entry.updated_at = Utc::now();
 Ok(())
 }

 /// Disabling resets any in-progress debounce so re-enabling starts
 /// the raising condition fresh rather than replaying stale timing.
 pub fn disable(&self, alarm_id: &str) -> GatewayResult<()> {
 let mut entry = self.alarms.get_mut(alarm_id).ok_or_else(|| GatewayError::not_found("alarm not found"))?;
 entry.enabled = false;
 entry.updated_at = Utc::now();
 drop(entry);
 self.pending.remove(alarm_id);
 Ok(())
 }

 pub fn delete(&self, alarm_id: &str) -> GatewayResult<()> {
 self.alarms.remove(alarm_id).ok_or_else(|| GatewayError::not_found("alarm not found"))?;
 self.pending.remove(alarm_id);
 Ok(())
 }

 pub async fn acknowledge(&self, event_id: &str, actor: impl Into<String>, note: Option<String>) -> GatewayResult<AlarmEvent> {
 let event = {
 let mut e = self.events.get_mut(event_id).ok_or_else(|| GatewayError::not_found("event not found"))?;
 if e.status != EventStatus::Active {
 return Err(GatewayError::bad_request("only an active event can be acknowledged"));
 }
 e.status = EventStatus::Acknowledged;
 e.acknowledged_by = Some(actor.into());
 e.acknowledged_note = note;
 e.last_seen_at = Utc::now();
 e.clone()
 };
 dispatch(&self.channels, &event, Transition::Acknowledged).await;
 Ok(event)
 }

 /// Manual clear, unconditional regardless of `auto_clear`.
 pub async fn clear(&self, alarm_id: &str) -> GatewayResult<AlarmEvent> {
 let event_id = self
.open_event
.get(alarm_id)
.map(|e| e.clone())
.ok_or_else(|| GatewayError::not_found("no open event for this alarm"))?;
 let event = {
 let mut e = self
.events
.get_mut(&event_id)
.ok_or_else(|| GatewayError::internal("alarm event index inconsistent"))?;
 e.status = EventStatus::Cleared;
 e.cleared_at = Some(Utc::now());
 e.last_seen_at = Utc::now();
 e.clone()
 };
 self.open_event.remove(alarm_id);
 self.pending.remove(alarm_id);
 dispatch(&self.channels, &event, Transition::Cleared).await;
 Ok(event)
 }

 pub fn list_alarms(&self) -> Vec<AlarmDefinition> {
 self.alarms.iter().map(|e| e.value().clone()).collect()
 }

 pub fn list_events(&self, filter: &EventFilter) -> Vec<AlarmEvent> {
 self.events.iter().map(|e| e.value().clone()).filter(|e| filter.matches(e)).collect()
 }

 pub fn statistics(&self) -> AlarmStatistics {
 let mut stats = AlarmStatistics {
 total_alarms: self.alarms.len(),
 enabled_alarms: self.alarms.iter().filter(|e| e.enabled).count(),
..Default::default()
 };
 for event in self.events.iter() {
 match event.status {
 EventStatus::Pending => stats.pending_events += 1,
 EventStatus::Active => stats.active_events += 1,
 EventStatus::Acknowledged => stats.acknowledged_events += 1,
 EventStatus::Cleared => stats.cleared_events += 1,
 }
 }
 stats
 }

 /// One full sweep over every enabled alarm ("Sampling").
 pub async fn evaluate_once(&self) {
 let alarm_ids: Vec<String> = self.alarms.iter().filter(|e| e.enabled).map(|e| e.key().clone()).collect();
 for alarm_id in alarm_ids {
 self.evaluate_alarm(&alarm_id).await;
 }
 }

 async fn evaluate_alarm(&self, alarm_id: &str) {
 let def = match self.alarms.get(alarm_id) {
 Some(d) if d.enabled => d.clone(),
 _ => return,
 };
 let telemetry = match (self.telemetry_source)(&def.equipment_id) {
 Some(t) if t.connected => t,
 _ => return,
 };
 let Some(value) = telemetry.resolve_parameter(&def.parameter) else {
 debug!(alarm_id, parameter = %def.parameter, "parameter not resolvable this tick");
 return;
 };

 let open_event_id = self.open_event.get(alarm_id).map(|e| e.clone());
 match open_event_id {
 None => self.evaluate_no_open_event(&def, value).await,
 Some(event_id) => self.evaluate_open_event(&def, alarm_id, &event_id, value).await,
 }
 }

 async fn evaluate_no_open_event(&self, def: &AlarmDefinition, value: f64) {
 if !def.kind.is_raising(value) {
 return;
 }
 let now = Utc::now();
 if def.delay_seconds <= 0.0 {
 let event = AlarmEvent {
 id: format!("evt_{}", Uuid::new_v4().simple()),
 alarm_id: def.id.clone(),
 equipment_id: def.equipment_id.clone(),
 parameter: def.parameter.clone(),
 status: EventStatus::Active,
 raised_at: now,
 last_seen_at: now,
 last_value: value,
 acknowledged_by: None,
 acknowledged_note: None,
 cleared_at: None,
 };
 self.events.insert(event.id.clone(), event.clone());
 self.open_event.insert(def.id.clone(), event.id.clone());
 info!(alarm_id = %def.id, value, "alarm raised");
 dispatch(&self.channels, &event, Transition::Raised).await;
 } else {
 let event = AlarmEvent {
 id: format!("evt_{}", Uuid::new_v4().simple()),
 alarm_id: def.id.clone(),
 equipment_id: def.equipment_id.clone(),
 parameter: def.parameter.clone(),
 status: EventStatus::Pending,
 raised_at: now,
 last_seen_at: now,
 last_value: value,
 acknowledged_by: None,
 acknowledged_note: None,
 cleared_at: None,
 };
 self.events.insert(event.id.clone(), event.clone());
 self.open_event.insert(def.id.clone(), event.id.clone());
 self.pending.insert(def.id.clone(), PendingState { first_true_at: now, value });
 }
 }

 async fn evaluate_open_event(&self, def: &AlarmDefinition, alarm_id: &str, event_id: &str, value: f64) {
 let status = match self.events.get(event_id) {
 Some(e) => e.status,
 None => {
 self.open_event.remove(alarm_id);
 return;
 }
 };

 match status {
 EventStatus::Pending => {
 if def.kind.is_raising(value) {
 let elapsed_s = self
.pending
.get(alarm_id)
.map(|p| (Utc::now() - p.first_true_at).num_milliseconds() as f64 / 1000.0)
.unwrap_or(0.0);
 if elapsed_s >= def.delay_seconds {
 let event = {
 let mut e = self.events.get_mut(event_id).expect("open_event index is consistent");
 e.status = EventStatus::Active;
 e.last_value = value;
 e.last_seen_at = Utc::now();
 e.clone()
 };
 self.pending.remove(alarm_id);
 info!(alarm_id, value, "alarm debounce satisfied, now active");
 dispatch(&self.channels, &event, Transition::Raised).await;
 } else if let Some(mut e) = self.events.get_mut(event_id) {
 e.last_value = value;
 e.last_seen_at = Utc::now();
 }
 } else {
 // Falling before delay elapses cancels without emission
 // ("Debounce").
 self.events.remove(event_id);
 self.open_event.remove(alarm_id);
 self.pending.remove(alarm_id);
 }
 }
 EventStatus::Active | EventStatus::Acknowledged => {
 if let Some(mut e) = self.events.get_mut(event_id) {
 e.last_value = value;
 e.last_seen_at = Utc::now();
 }
 if def.auto_clear && def.kind.is_clearing(value, def.deadband) {
 let event = {
 let mut e = self.events.get_mut(event_id).expect("open_event index is consistent");
 e.status = EventStatus::Cleared;
 e.cleared_at = Some(Utc::now());
 e.clone()
 };
 self.open_event.remove(alarm_id);
 info!(alarm_id, value, "alarm auto-cleared");
 dispatch(&self.channels, &event, Transition::Cleared).await;
 }
 }
 EventStatus::Cleared => {
 self.open_event.remove(alarm_id);
 }
 }
 }

 /// Spawns the periodic evaluation loop on the current runtime.
 pub fn spawn_loop(self: &Arc<Self>, interval: Duration) {
 let this = self.clone();
 let mut shutdown = this.shutdown_tx.subscribe();
 tokio::spawn(async move {
 let mut ticker = tokio::time::interval(interval);
 loop {
 tokio::select! {
 _ = ticker.tick() => this.evaluate_once().await,
 _ = shutdown.changed() => {
 info!("alarm engine evaluation loop shutting down");
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
 use daq_core::ChannelReading;

 fn telemetry_with_voltage(v: f64) -> Telemetry {
 Telemetry {
 connected: true,
 channels: vec![ChannelReading::new(v, 0.0, true)],
 health_score: 1.0,
..Default::default()
 }
 }

 fn source(voltage: Arc<std::sync::Mutex<f64>>) -> TelemetrySource {
 Arc::new(move |_eq| Some(telemetry_with_voltage(*voltage.lock().unwrap())))
 }

 fn new_alarm(hi: f64) -> NewAlarm {
 NewAlarm {
 equipment_id: "eq_1".into(),
 parameter: "voltage".into(),
 kind: AlarmKind::ThresholdHigh { hi },
 deadband: 0.5,
 delay_seconds: 0.0,
 auto_clear: true,
 description: None,
 }
 }

 #[test]
 fn rejects_unknown_parameter_at_creation() {
 let engine = AlarmEngine::new(Arc::new(|_| None), vec![]);
 let mut alarm = new_alarm(10.0);
 alarm.parameter = "bogus_field".into();
 let err = engine.create(alarm).unwrap_err();
 assert_eq!(err.kind, daq_core::ErrorKind::BadRequest);
 }

 #[tokio::test]
 async fn immediate_raise_with_zero_delay_creates_active_event() {
 let voltage = Arc::new(std::sync::Mutex::new(12.0));
 let engine = AlarmEngine::new(source(voltage), vec![]);
 let def = engine.create(new_alarm(10.0)).unwrap();
 engine.evaluate_once().await;
 let events = engine.list_events(&EventFilter::default());
 assert_eq!(events.len(), 1);
 assert_eq!(events[0].status, EventStatus::Active);
 assert_eq!(events[0].alarm_id, def.id);
 }

 #[tokio::test]
 async fn debounce_delays_activation_until_elapsed() {
 let voltage = Arc::new(std::sync::Mutex::new(12.0));
 let mut alarm = new_alarm(10.0);
 alarm.delay_seconds = 10.0;
 let engine = AlarmEngine::new(source(voltage), vec![]);
 engine.create(alarm).unwrap();
 engine.evaluate_once().await;
 let events = engine.list_events(&EventFilter::default());
 assert_eq!(events[0].status, EventStatus::Pending);
 }

 #[tokio::test]
 async fn falling_before_debounce_cancels_without_event() {
 let voltage = Arc::new(std::sync::Mutex::new(12.0));
 let mut alarm = new_alarm(10.0);
 alarm.delay_seconds = 10.0;
 let engine = AlarmEngine::new(source(voltage.clone()), vec![]);
 engine.create(alarm).unwrap();
 engine.evaluate_once().await;
 *voltage.lock().unwrap() = 5.0;
 engine.evaluate_once().await;
 assert!(engine.list_events(&EventFilter::default()).is_empty());
 }

 #[tokio::test]
 async fn dedup_keeps_one_event_while_condition_persists() {
 let voltage = Arc::new(std::sync::Mutex::new(12.0));
 let engine = AlarmEngine::new(source(voltage), vec![]);
 engine.create(new_alarm(10.0)).unwrap();
 engine.evaluate_once().await;
 engine.evaluate_once().await;
 engine.evaluate_once().await;
 assert_eq!(engine.list_events(&EventFilter::default()).len(), 1);
 }

 #[tokio::test]
 async fn auto_clear_transitions_active_event_once_below_deadband() {
 let voltage = Arc::new(std::sync::Mutex::new(12.0));
 let engine = AlarmEngine::new(source(voltage.clone()), vec![]);
 engine.create(new_alarm(10.0)).unwrap();
 engine.evaluate_once().await;
 *voltage.lock().unwrap() = 9.0;
 engine.evaluate_once().await;
 let events = engine.list_events(&EventFilter::default());
 assert_eq!(events[0].status, EventStatus::Cleared);
 }

 #[tokio::test]
 async fn acknowledge_then_manual_clear() {
 let voltage = Arc::new(std::sync::Mutex::new(12.0));
 let engine = AlarmEngine::new(source(voltage), vec![]);
 let def = engine.create(new_alarm(10.0)).unwrap();
 engine.evaluate_once().await;
 let event_id = engine.list_events(&EventFilter::default())[0].id.clone();
 let acked = engine.acknowledge(&event_id, "operator_1", Some("investigating".into())).await.unwrap();
 assert_eq!(acked.status, EventStatus::Acknowledged);
 let cleared = engine.clear(&def.id).await.unwrap();
 assert_eq!(cleared.status, EventStatus::Cleared);
 }

 #[tokio::test]
 async fn statistics_counts_by_status() {
 let voltage = Arc::new(std::sync::Mutex::new(12.0));
 let engine = AlarmEngine::new(source(voltage), vec![]);
 engine.create(new_alarm(10.0)).unwrap();
 engine.evaluate_once().await;
 let stats = engine.statistics();
 assert_eq!(stats.total_alarms, 1);
 assert_eq!(stats.active_events, 1);
 }
}
