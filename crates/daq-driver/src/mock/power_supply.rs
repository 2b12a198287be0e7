//! Mock programmable power supply.
//!
//! Implements the physically-consistent response law from :
//! given a set voltage `V_set`, current limit `I_lim`, output-enabled
//! flag, and a simulated load resistance `R`, the reported `(V, I,
//! mode)` follow a piecewise law:
//!
//! - output disabled: `(0, 0, off)`
//! - `V_set / R <= I_lim`: `(V_set + noise, V_set / R + noise, CV)`
//! - otherwise: `(I_lim * R + noise, I_lim + noise, CC)`
//!
//! The simulated load resistance is not part of the wire vocabulary
//! ( doesn't expose it); tests attach it directly via
//! [`MockPowerSupply::set_simulated_load`] to model a real resistor on
//! the bench.

use super::rng::MockRng;
use crate::operation::Operation;
use crate::trait_def::{Driver, Identification};
use async_trait::async_trait;
use daq_core::{CapabilityMap, GatewayError, GatewayResult, OperatingMode};
use serde_json::{json, Value};

struct ChannelState {
 voltage_set: f64,
 current_limit: f64,
 output_enabled: bool,
 simulated_load_ohms: f64,
}

impl Default for ChannelState {
 fn default() -> Self {
 Self {
 voltage_set: 0.0,
 current_limit: 0.0,
 output_enabled: false,
 simulated_load_ohms: 1_000_000.0,
 }
 }
}

pub struct MockPowerSupply {
 vendor: String,
 model: String,
 serial: String,
 firmware: String,
 capabilities: CapabilityMap,
 channels: Vec<ChannelState>,
 noise_amplitude: f64,
 rng: MockRng,
}

impl MockPowerSupply {
 pub fn new(model: impl Into<String>, capabilities: CapabilityMap, seed: Option<u64>) -> Self {
 let n = capabilities.channel_count.unwrap_or(1).max(1) as usize;
 Self {
 vendor: "MockInstruments".into(),
 model: model.into(),
 serial: "MOCK-PSU-0001".into(),
 firmware: "1.0.0".into(),
 capabilities,
 channels: (0..n).map(|_| ChannelState::default()).collect(),
 noise_amplitude: 0.01,
 rng: MockRng::new(seed),
 }
 }

 /// Attaches a simulated resistive load to `channel` for tests.
 pub fn set_simulated_load(&mut self, channel: u32, ohms: f64) {
 if let Some(ch) = self.channels.get_mut(channel as usize) {
 ch.simulated_load_ohms = ohms.max(1e-6);
 }
 }

 fn channel_mut(&mut self, channel: Option<u32>) -> GatewayResult<&mut ChannelState> {
 let idx = channel.unwrap_or(0) as usize;
 self.channels
.get_mut(idx)
.ok_or_else(|| GatewayError::bad_request(format!("no such channel {idx}")))
 }

 fn reading(&self, ch: &ChannelState) -> (f64, f64, OperatingMode) {
 if !ch.output_enabled {
 return (0.0, 0.0, OperatingMode::Off);
 }
 let load_current = ch.voltage_set / ch.simulated_load_ohms;
 if load_current <= ch.current_limit {
 let v = ch.voltage_set + self.rng.noise(self.noise_amplitude);
 let i = load_current + self.rng.noise(self.noise_amplitude * 0.1);
 (v, i, OperatingMode::ConstantVoltage)
 } else {
 let i = ch.current_limit + self.rng.noise(self.noise_amplitude * 0.1);
 let v = ch.current_limit * ch.simulated_load_ohms + self.rng.noise(self.noise_amplitude);
 (v, i, OperatingMode::ConstantCurrent)
 }
 }

 fn readings_json(&self, channel: Option<u32>) -> Value {
 let indices: Vec<usize> = match channel {
 Some(c) => vec![c as usize],
 None => (0..self.channels.len()).collect(),
 };
 let channels: Vec<Value> = indices
.into_iter()
.filter_map(|i| self.channels.get(i).map(|ch| (i, ch)))
.map(|(i, ch)| {
 let (v, i_meas, mode) = self.reading(ch);
 json!({
 "channel": i,
 "voltage": v,
 "current": i_meas,
 "power": v * i_meas,
 "mode": match mode {
 OperatingMode::Off => "off",
 OperatingMode::ConstantVoltage => "cv",
 OperatingMode::ConstantCurrent => "cc",
 },
 "enabled": ch.output_enabled,
 })
 })
.collect();
 json!({ "channels": channels })
 }
}

#[async_trait]
impl Driver for MockPowerSupply {
 async fn identify(&mut self) -> GatewayResult<Identification> {
 Ok(Identification {
 vendor: self.vendor.clone(),
 model: self.model.clone(),
 serial: self.serial.clone(),
 firmware: self.firmware.clone(),
 })
 }

 fn capabilities(&self) -> CapabilityMap {
 self.capabilities.clone()
 }

 async fn execute(&mut self, operation: Operation) -> GatewayResult<Value> {
 match operation {
 Operation::SetVoltage { value, channel } => {
 self.capabilities
.check_voltage(value)
.map_err(|e| GatewayError::bad_request(e))?;
 let ch = self.channel_mut(channel)?;
 ch.voltage_set = value;
 Ok(json!({"voltage": value}))
 }
 Operation::SetCurrent { value, channel } => {
 self.capabilities
.check_current(value)
.map_err(|e| GatewayError::bad_request(e))?;
 let ch = self.channel_mut(channel)?;
 ch.current_limit = value;
 Ok(json!({"current": value}))
 }
 Operation::SetOutput { enabled, channel } => {
 let ch = self.channel_mut(channel)?;
 ch.output_enabled = enabled;
 Ok(json!({"enabled": enabled}))
 }
 Operation::GetReadings { channel } => Ok(self.readings_json(channel)),
 Operation::GetMeasurements { channel } => Ok(self.readings_json(Some(channel))),
 Operation::Identify => {
 let id = self.identify().await?;
 Ok(json!({
 "vendor": id.vendor, "model": id.model,
 "serial": id.serial, "firmware": id.firmware,
 }))
 }
 other => Err(GatewayError::bad_request(format!(
 "operation {} not supported by power supply driver",
 other.name()
 ))),
 }
 }
}

#[cfg(test)]
mod tests {
 use super::*;

 fn psu() -> MockPowerSupply {
 let caps = CapabilityMap {
 max_voltage: Some(30.0),
 max_current: Some(3.0),
 channel_count: Some(1),
..Default::default()
 };
 MockPowerSupply::new("E3631A-mock", caps, Some(7))
 }

 #[tokio::test]
 async fn cv_mode_reports_voltage_and_current_consistent_with_the_load() {
 let mut p = psu();
 p.set_simulated_load(0, 10.0);
 p.execute(Operation::SetVoltage { value: 5.0, channel: None }).await.unwrap();
 p.execute(Operation::SetCurrent { value: 3.0, channel: None }).await.unwrap();
 p.execute(Operation::SetOutput { enabled: true, channel: None }).await.unwrap();

 let result = p.execute(Operation::GetReadings { channel: None }).await.unwrap();
 let ch0 = &result["channels"][0];
 let voltage = ch0["voltage"].as_f64().unwrap();
 let current = ch0["current"].as_f64().unwrap();
 assert!((voltage - 5.0).abs() < 0.1, "voltage was {voltage}");
 assert!((current - 0.5).abs() < 0.05, "current was {current}");
 assert_eq!(ch0["mode"], "cv");
 }

 #[tokio::test]
 async fn cc_mode_when_load_would_exceed_limit() {
 let mut p = psu();
 p.set_simulated_load(0, 1.0);
 p.execute(Operation::SetVoltage { value: 10.0, channel: None }).await.unwrap();
 p.execute(Operation::SetCurrent { value: 2.0, channel: None }).await.unwrap();
 p.execute(Operation::SetOutput { enabled: true, channel: None }).await.unwrap();

 let result = p.execute(Operation::GetReadings { channel: None }).await.unwrap();
 let ch0 = &result["channels"][0];
 assert_eq!(ch0["mode"], "cc");
 let current = ch0["current"].as_f64().unwrap();
 assert!((current - 2.0).abs() < 0.05);
 }

 #[tokio::test]
 async fn output_disabled_reads_zero() {
 let mut p = psu();
 p.execute(Operation::SetVoltage { value: 12.0, channel: None }).await.unwrap();
 let result = p.execute(Operation::GetReadings { channel: None }).await.unwrap();
 let ch0 = &result["channels"][0];
 assert_eq!(ch0["voltage"], 0.0);
 assert_eq!(ch0["current"], 0.0);
 assert_eq!(ch0["mode"], "off");
 }

 #[tokio::test]
 async fn voltage_above_capability_is_bad_request_without_wire_io() {
 let mut p = psu();
 let before = p.channels[0].voltage_set;
 let err = p
.execute(Operation::SetVoltage { value: 100.0, channel: None })
.await
.unwrap_err();
 assert_eq!(err.kind, daq_core::ErrorKind::BadRequest);
 assert_eq!(p.channels[0].voltage_set, before);
 }
}
