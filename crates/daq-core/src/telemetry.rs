//! Cached telemetry snapshots held by a Session Worker.
//!
//! A [`Telemetry`] snapshot is the worker's last-observed state; the
//! Alarm Engine and the status endpoints read this cache and never
//! trigger a fresh wire operation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-channel electrical reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelReading {
 pub voltage: f64,
 pub current: f64,
 pub power: f64,
 pub enabled: bool,
}

impl ChannelReading {
 pub fn new(voltage: f64, current: f64, enabled: bool) -> Self {
 Self {
 voltage,
 current,
 power: voltage * current,
 enabled,
 }
 }
}

/// Operating mode reported by a power supply or load in response to a
/// `get_readings` call ( mock physical-consistency law).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
 /// Output disabled.
 Off,
 /// Constant voltage regulation.
 ConstantVoltage,
 /// Constant current regulation.
 ConstantCurrent,
}

/// Cached telemetry for one instrument, refreshed by whichever
/// operation the worker last executed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Telemetry {
 pub connected: bool,
 pub channels: Vec<ChannelReading>,
 pub mode: Option<OperatingMode>,
 pub temperature_c: Option<f64>,
 /// 0.0 (unhealthy).. 1.0 (fully healthy), derived from consecutive
 /// transport error counters ( failure model).
 pub health_score: f64,
 /// Any other numeric status fields a driver exposes (e.g. scope
 /// trigger state counters); alarm parameter resolution can target
 /// these by name.
 #[serde(default)]
 pub aux: BTreeMap<String, f64>,
 /// Timestamp (unix millis) this snapshot was taken.
 pub sampled_at_ms: i64,
}

impl Telemetry {
 pub fn disconnected(sampled_at_ms: i64) -> Self {
 Self {
 connected: false,
 health_score: 0.0,
 sampled_at_ms,
..Default::default()
 }
 }

 /// Resolves a named parameter to a numeric value, per the canonical
 /// set {voltage, current, power, temperature} (first channel) plus
 /// any key present in `aux`, matched case-insensitively.
 pub fn resolve_parameter(&self, name: &str) -> Option<f64> {
 let lower = name.to_ascii_lowercase();
 match lower.as_str() {
 "voltage" => self.channels.first().map(|c| c.voltage),
 "current" => self.channels.first().map(|c| c.current),
 "power" => self.channels.first().map(|c| c.power),
 "temperature" => self.temperature_c,
 other => self
.aux
.iter()
.find(|(k, _)| k.to_ascii_lowercase() == other)
.map(|(_, v)| *v),
 }
 }

 /// True if `name` resolves to a known canonical field or an aux key,
 /// used at alarm-creation time to reject unknown parameters eagerly.
 pub fn is_known_parameter(name: &str) -> bool {
 matches!(
 name.to_ascii_lowercase().as_str(),
 "voltage" | "current" | "power" | "temperature"
 )
 }
}

#[cfg(test)]
mod tests {
 use super::*;

 #[test]
 fn resolves_canonical_parameter_case_insensitively() {
 let mut t = Telemetry::default();
 t.channels.push(ChannelReading::new(5.0, 0.5, true));
 assert_eq!(t.resolve_parameter("Voltage"), Some(5.0));
 assert_eq!(t.resolve_parameter("VOLTAGE"), Some(5.0));
 }

 #[test]
 fn resolves_aux_key_case_insensitively() {
 let mut t = Telemetry::default();
 t.aux.insert("trigger_count".into(), 42.0);
 assert_eq!(t.resolve_parameter("Trigger_Count"), Some(42.0));
 assert_eq!(t.resolve_parameter("missing"), None);
 }
}
