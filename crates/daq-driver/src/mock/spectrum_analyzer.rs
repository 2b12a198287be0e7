//! Mock spectrum analyzer: reports a simulated noise floor plus a
//! configurable set of spectral peaks across `get_measurements`.

use super::rng::MockRng;
use crate::operation::Operation;
use crate::trait_def::{Driver, Identification};
use async_trait::async_trait;
use daq_core::{CapabilityMap, GatewayError, GatewayResult};
use serde_json::{json, Value};

pub struct MockSpectrumAnalyzer {
 vendor: String,
 model: String,
 serial: String,
 firmware: String,
 capabilities: CapabilityMap,
 center_freq_hz: f64,
 span_hz: f64,
 peaks: Vec<(f64, f64)>,
 noise_floor_dbm: f64,
 rng: MockRng,
}

impl MockSpectrumAnalyzer {
 pub fn new(model: impl Into<String>, capabilities: CapabilityMap, seed: Option<u64>) -> Self {
 Self {
 vendor: "MockInstruments".into(),
 model: model.into(),
 serial: "MOCK-SA-0001".into(),
 firmware: "1.0.0".into(),
 capabilities,
 center_freq_hz: 1e6,
 span_hz: 1e6,
 peaks: vec![(1e6, -20.0)],
 noise_floor_dbm: -90.0,
 rng: MockRng::new(seed),
 }
 }

 pub fn set_simulated_peaks(&mut self, peaks: Vec<(f64, f64)>) {
 self.peaks = peaks;
 }
}

#[async_trait]
impl Driver for MockSpectrumAnalyzer {
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
 Operation::SetTimebase { scale, offset: _ } => {
 self.span_hz = scale;
 Ok(json!({"span_hz": scale}))
 }
 Operation::GetMeasurements {.. } | Operation::GetReadings {.. } => {
 let peak = self
.peaks
.iter()
.cloned()
.max_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
.unwrap_or((self.center_freq_hz, self.noise_floor_dbm));
 let noise = self.rng.noise(0.5);
 Ok(json!({
 "center_freq_hz": self.center_freq_hz,
 "span_hz": self.span_hz,
 "peak_freq_hz": peak.0,
 "peak_amplitude_dbm": peak.1 + noise,
 "noise_floor_dbm": self.noise_floor_dbm,
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
 "operation {} not supported by spectrum analyzer driver",
 other.name()
 ))),
 }
 }
}
