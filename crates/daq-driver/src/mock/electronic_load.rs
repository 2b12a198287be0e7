//! Mock electronic load.
//!
//! Sinks current from a simulated source voltage under one of three
//! regulation modes (constant current, constant resistance, constant
//! power); symmetric to [`super::power_supply::MockPowerSupply`] but
//! from the sink's side of the bus.

use super::rng::MockRng;
use crate::operation::Operation;
use crate::trait_def::{Driver, Identification};
use async_trait::async_trait;
use daq_core::{CapabilityMap, GatewayError, GatewayResult};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq)]
enum LoadMode {
 ConstantCurrent,
 ConstantResistance,
 ConstantPower,
}

pub struct MockElectronicLoad {
 vendor: String,
 model: String,
 serial: String,
 firmware: String,
 capabilities: CapabilityMap,
 mode: LoadMode,
 current_set: f64,
 resistance_set: f64,
 power_set: f64,
 input_enabled: bool,
 simulated_source_voltage: f64,
 noise_amplitude: f64,
 rng: MockRng,
}

impl MockElectronicLoad {
 pub fn new(model: impl Into<String>, capabilities: CapabilityMap, seed: Option<u64>) -> Self {
 Self {
 vendor: "MockInstruments".into(),
 model: model.into(),
 serial: "MOCK-LOAD-0001".into(),
 firmware: "1.0.0".into(),
 capabilities,
 mode: LoadMode::ConstantCurrent,
 current_set: 0.0,
 resistance_set: 1_000_000.0,
 power_set: 0.0,
 input_enabled: false,
 simulated_source_voltage: 0.0,
 noise_amplitude: 0.01,
 rng: MockRng::new(seed),
 }
 }

 pub fn set_simulated_source_voltage(&mut self, volts: f64) {
 self.simulated_source_voltage = volts;
 }

 fn reading(&self) -> (f64, f64) {
 if !self.input_enabled || self.simulated_source_voltage <= 0.0 {
 return (0.0, 0.0);
 }
 let v = self.simulated_source_voltage;
 let current = match self.mode {
 LoadMode::ConstantCurrent => self.current_set,
 LoadMode::ConstantResistance => v / self.resistance_set.max(1e-6),
 LoadMode::ConstantPower => self.power_set / v,
 };
 (
 v + self.rng.noise(self.noise_amplitude),
 current + self.rng.noise(self.noise_amplitude * 0.1),
 )
 }
}

#[async_trait]
impl Driver for MockElectronicLoad {
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
 Operation::SetMode { mode } => {
 self.mode = match mode.to_ascii_lowercase().as_str() {
 "cc" | "constant_current" => LoadMode::ConstantCurrent,
 "cr" | "constant_resistance" => LoadMode::ConstantResistance,
 "cp" | "constant_power" => LoadMode::ConstantPower,
 other => {
 return Err(GatewayError::bad_request(format!("unknown load mode {other}")))
 }
 };
 Ok(json!({"mode": mode}))
 }
 Operation::SetCurrent { value,.. } => {
 self.capabilities
.check_current(value)
.map_err(|e| GatewayError::bad_request(e))?;
 self.current_set = value;
 Ok(json!({"current": value}))
 }
 Operation::SetResistance { value } => {
 if value <= 0.0 {
 return Err(GatewayError::bad_request("resistance must be positive"));
 }
 self.resistance_set = value;
 Ok(json!({"resistance": value}))
 }
 Operation::SetPower { value } => {
 if let Some(max) = self.capabilities.max_power {
 if value > max {
 return Err(GatewayError::bad_request(format!(
 "power {value} exceeds capability max {max}"
 )));
 }
 }
 self.power_set = value;
 Ok(json!({"power": value}))
 }
 Operation::SetInput { enabled } => {
 self.input_enabled = enabled;
 Ok(json!({"enabled": enabled}))
 }
 Operation::GetReadings {.. } | Operation::GetMeasurements {.. } => {
 let (v, i) = self.reading();
 Ok(json!({
 "channels": [{
 "channel": 0,
 "voltage": v,
 "current": i,
 "power": v * i,
 "enabled": self.input_enabled,
 }]
 }))
 }
 Operation::Identify => {
 let id = self.identify().await?;
 Ok(json!({
 "vendor": id.vendor, "model": id.model,
 "serial": id.serial, "firmware": id.firmware,
 }))
 }
 other => Err(GatewayError::bad_request(format!(
 "operation {} not supported by electronic load driver",
 other.name()
 ))),
 }
 }
}

#[cfg(test)]
mod tests {
 use super::*;

 fn load() -> MockElectronicLoad {
 let caps = CapabilityMap {
 max_current: Some(10.0),
 max_power: Some(100.0),
..Default::default()
 };
 MockElectronicLoad::new("EL34143A-mock", caps, Some(3))
 }

 #[tokio::test]
 async fn constant_current_mode_sinks_set_current() {
 let mut l = load();
 l.set_simulated_source_voltage(12.0);
 l.execute(Operation::SetCurrent { value: 2.0, channel: None }).await.unwrap();
 l.execute(Operation::SetInput { enabled: true }).await.unwrap();
 let result = l.execute(Operation::GetReadings { channel: None }).await.unwrap();
 let current = result["channels"][0]["current"].as_f64().unwrap();
 assert!((current - 2.0).abs() < 0.05);
 }

 #[tokio::test]
 async fn input_disabled_reads_zero() {
 let mut l = load();
 l.set_simulated_source_voltage(12.0);
 l.execute(Operation::SetCurrent { value: 2.0, channel: None }).await.unwrap();
 let result = l.execute(Operation::GetReadings { channel: None }).await.unwrap();
 assert_eq!(result["channels"][0]["current"], 0.0);
 }
}
