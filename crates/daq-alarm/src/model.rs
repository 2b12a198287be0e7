//! Alarm definitions, events, and the threshold predicate table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The four predicate shapes an alarm can evaluate against a single
/// numeric parameter ( predicate table).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlarmKind {
 ThresholdHigh { hi: f64 },
 ThresholdLow { lo: f64 },
 InRange { lo: f64, hi: f64 },
 OutOfRange { lo: f64, hi: f64 },
}

impl AlarmKind {
 /// The raising condition, ignoring deadband and debounce.
 pub fn is_raising(&self, v: f64) -> bool {
 match *self {
 AlarmKind::ThresholdHigh { hi } => v > hi,
 AlarmKind::ThresholdLow { lo } => v < lo,
 AlarmKind::InRange { lo, hi } => v >= lo && v <= hi,
 AlarmKind::OutOfRange { lo, hi } => v < lo || v > hi,
 }
 }

 /// The clearing condition with deadband `d` applied as hysteresis
 /// around the raising boundary ("Clears when").
 pub fn is_clearing(&self, v: f64, d: f64) -> bool {
 match *self {
 AlarmKind::ThresholdHigh { hi } => v < hi - d,
 AlarmKind::ThresholdLow { lo } => v > lo + d,
 AlarmKind::InRange { lo, hi } => v < lo - d || v > hi + d,
 AlarmKind::OutOfRange { lo, hi } => v >= lo + d && v <= hi - d,
 }
 }
}

/// A configured alarm rule bound to one equipment and one resolvable
/// parameter name ("canonical names + aux keys").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmDefinition {
 pub id: String,
 pub equipment_id: String,
 pub parameter: String,
 pub kind: AlarmKind,
 /// Hysteresis band applied only to clearing, never to raising.
 #[serde(default)]
 pub deadband: f64,
 /// Seconds a raising condition must persist before the event goes
 /// active ("Debounce").
 #[serde(default)]
 pub delay_seconds: f64,
 #[serde(default = "default_true")]
 pub auto_clear: bool,
 #[serde(default = "default_true")]
 pub enabled: bool,
 #[serde(default)]
 pub description: Option<String>,
 pub created_at: DateTime<Utc>,
 pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
 true
}

/// Mutable fields accepted by `update` ( operations table).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlarmPatch {
 pub parameter: Option<String>,
 pub kind: Option<AlarmKind>,
 pub deadband: Option<f64>,
 pub delay_seconds: Option<f64>,
 pub auto_clear: Option<bool>,
 pub description: Option<Option<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
 /// Raising condition observed, waiting out the debounce delay.
 Pending,
 /// Debounce satisfied; a live alarm condition.
 Active,
 /// Active, but a human has acknowledged it.
 Acknowledged,
 /// No longer in the raising condition (auto or manual clear).
 Cleared,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmEvent {
 pub id: String,
 pub alarm_id: String,
 pub equipment_id: String,
 pub parameter: String,
 pub status: EventStatus,
 pub raised_at: DateTime<Utc>,
 pub last_seen_at: DateTime<Utc>,
 pub last_value: f64,
 #[serde(default)]
 pub acknowledged_by: Option<String>,
 #[serde(default)]
 pub acknowledged_note: Option<String>,
 #[serde(default)]
 pub cleared_at: Option<DateTime<Utc>>,
}

/// Filter accepted by `list_events` ("list_events(filter)").
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventFilter {
 pub equipment_id: Option<String>,
 pub alarm_id: Option<String>,
 pub status: Option<EventStatus>,
}

impl EventFilter {
 pub fn matches(&self, event: &AlarmEvent) -> bool {
 if let Some(eq) = &self.equipment_id {
 if eq != &event.equipment_id {
 return false;
 }
 }
 if let Some(alarm_id) = &self.alarm_id {
 if alarm_id != &event.alarm_id {
 return false;
 }
 }
 if let Some(status) = &self.status {
 if *status != event.status {
 return false;
 }
 }
 true
 }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AlarmStatistics {
 pub total_alarms: usize,
 pub enabled_alarms: usize,
 pub pending_events: usize,
 pub active_events: usize,
 pub acknowledged_events: usize,
 pub cleared_events: usize,
}

/// The transition a notification channel is told about (
/// "emits `(event, transition)`").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
 Raised,
 Acknowledged,
 Cleared,
}
