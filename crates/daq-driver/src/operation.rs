//! Closed operation vocabulary.
//!
//! A free-form name plus kwargs bag would let callers construct
//! operations the drivers below don't implement, so this is a tagged
//! union whose variants are exactly the operations this gateway
//! supports. An operation that doesn't match one of these variants
//! fails to deserialize, which turns into `bad_request` at the
//! dispatch boundary rather than deep inside a driver.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "parameters", rename_all = "snake_case")]
pub enum Operation {
 SetVoltage {
 value: f64,
 #[serde(default)]
 channel: Option<u32>,
 },
 SetCurrent {
 value: f64,
 #[serde(default)]
 channel: Option<u32>,
 },
 SetOutput {
 enabled: bool,
 #[serde(default)]
 channel: Option<u32>,
 },
 SetMode {
 mode: String,
 },
 SetInput {
 enabled: bool,
 },
 SetResistance {
 value: f64,
 },
 SetPower {
 value: f64,
 },
 GetReadings {
 #[serde(default)]
 channel: Option<u32>,
 },
 GetWaveform {
 channel: u32,
 },
 GetMeasurements {
 channel: u32,
 },
 SetTimebase {
 scale: f64,
 offset: f64,
 },
 SetChannel {
 channel: u32,
 enabled: bool,
 scale: f64,
 offset: f64,
 coupling: String,
 #[serde(default)]
 probe: Option<f64>,
 },
 SetTrigger {
 source: String,
 mode: String,
 level: f64,
 slope: String,
 coupling: String,
 },
 TriggerRun,
 TriggerStop,
 TriggerSingle,
 Autoscale,
 /// Re-issues `identify`; used by the worker's degraded-state
 /// probe and exposed as an explicit operation so tests
 /// can exercise it through the same dispatch path as everything
 /// else.
 Identify,
}

impl Operation {
 /// The bare operation name, as used for command classification
 /// and logging.
 pub fn name(&self) -> &'static str {
 match self {
 Operation::SetVoltage {.. } => "set_voltage",
 Operation::SetCurrent {.. } => "set_current",
 Operation::SetOutput {.. } => "set_output",
 Operation::SetMode {.. } => "set_mode",
 Operation::SetInput {.. } => "set_input",
 Operation::SetResistance {.. } => "set_resistance",
 Operation::SetPower {.. } => "set_power",
 Operation::GetReadings {.. } => "get_readings",
 Operation::GetWaveform {.. } => "get_waveform",
 Operation::GetMeasurements {.. } => "get_measurements",
 Operation::SetTimebase {.. } => "set_timebase",
 Operation::SetChannel {.. } => "set_channel",
 Operation::SetTrigger {.. } => "set_trigger",
 Operation::TriggerRun => "trigger_run",
 Operation::TriggerStop => "trigger_stop",
 Operation::TriggerSingle => "trigger_single",
 Operation::Autoscale => "autoscale",
 Operation::Identify => "identify",
 }
 }

 /// True for control operations its prefix/substring
 /// classification: `set_`, `reset`, `clear`, `save`, `recall`,
 /// `calibrate`, `autoscale`, `trigger_*`. Everything else is a
 /// read operation.
 pub fn is_control(&self) -> bool {
 is_control_name(self.name())
 }
}

/// Standalone classifier usable before an `Operation` has been parsed
/// (e.g. at the gateway, to pick an error kind for an unrecognised
/// action string before validation even reaches `Operation`).
pub fn is_control_name(name: &str) -> bool {
 const CONTROL_PREFIXES: &[&str] = &[
 "set_", "reset", "clear", "save", "recall", "calibrate", "autoscale", "trigger_",
 ];
 CONTROL_PREFIXES.iter().any(|p| name.starts_with(p))
}

#[cfg(test)]
mod tests {
 use super::*;

 #[test]
 fn set_prefixed_operations_are_control() {
 assert!(is_control_name("set_voltage"));
 assert!(is_control_name("trigger_run"));
 assert!(is_control_name("autoscale"));
 assert!(is_control_name("calibrate_offset"));
 }

 #[test]
 fn reads_are_not_control() {
 assert!(!is_control_name("get_readings"));
 assert!(!is_control_name("get_waveform"));
 assert!(!is_control_name("identify"));
 }

 #[test]
 fn operation_classification_matches_name() {
 let op = Operation::SetVoltage { value: 5.0, channel: None };
 assert_eq!(op.name(), "set_voltage");
 assert!(op.is_control());

 let op = Operation::GetReadings { channel: None };
 assert!(!op.is_control());
 }

 #[test]
 fn unknown_action_fails_to_deserialize() {
 let json = serde_json::json!({"action": "format_disk", "parameters": {}});
 let result: Result<Operation, _> = serde_json::from_value(json);
 assert!(result.is_err());
 }
}
