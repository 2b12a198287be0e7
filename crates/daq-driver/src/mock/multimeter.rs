//! Mock digital multimeter: a single-channel read-only instrument that
//! reports a noisy value around a configurable simulated input.

use super::rng::MockRng;
use crate::operation::Operation;
use crate::trait_def::{Driver, Identification};
use async_trait::async_trait;
use daq_core::{CapabilityMap, GatewayError, GatewayResult};
use serde_json::{json, Value};

pub struct MockMultimeter {
 vendor: String,
 model: String,
 serial: String,
 firmware: String,
 capabilities: CapabilityMap,
 mode: String,
 simulated_value: f64,
 noise_amplitude: f64,
 rng: MockRng,
}

impl MockMultimeter {
 pub fn new(model: impl Into<String>, capabilities: CapabilityMap, seed: Option<u64>) -> Self {
 Self {
 vendor: "MockInstruments".into(),
 model: model.into(),
 serial: "MOCK-DMM-0001".into(),
 firmware: "1.0.0".into(),
 capabilities,
 mode: "voltage_dc".into(),
 simulated_value: 0.0,
 noise_amplitude: 0.005,
 rng: MockRng::new(seed),
 }
 }

 pub fn set_simulated_value(&mut self, value: f64) {
 self.simulated_value = value;
 }
}

#[async_trait]
impl Driver for MockMultimeter {
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
 self.mode = mode.clone();
 Ok(json!({"mode": mode}))
 }
 Operation::GetReadings {.. } | Operation::GetMeasurements {.. } => {
 let value = self.simulated_value + self.rng.noise(self.noise_amplitude);
 Ok(json!({"mode": self.mode, "value": value}))
 }
 Operation::Identify => {
 let id = self.identify().await?;
 Ok(json!({
 "vendor": id.vendor, "model": id.model,
 "serial": id.serial, "firmware": id.firmware,
 }))
 }
 other => Err(GatewayError::bad_request(format!(
 "operation {} not supported by multimeter driver",
 other.name()
 ))),
 }
 }
}

#[cfg(test)]
mod tests {
 use super::*;

 #[tokio::test]
 async fn reading_centers_on_simulated_value() {
 let mut m = MockMultimeter::new("34465A-mock", CapabilityMap::default(), Some(1));
 m.set_simulated_value(3.3);
 let result = m.execute(Operation::GetReadings { channel: None }).await.unwrap();
 let value = result["value"].as_f64().unwrap();
 assert!((value - 3.3).abs() < 0.05);
 }
}
