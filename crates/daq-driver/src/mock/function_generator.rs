//! Mock function generator: accepts the output-shaping commands and
//! reports them back via `get_readings` (there is no physical signal
//! to sample, so readings reflect the programmed setpoints).

use crate::operation::Operation;
use crate::trait_def::{Driver, Identification};
use async_trait::async_trait;
use daq_core::{CapabilityMap, GatewayError, GatewayResult};
use serde_json::{json, Value};

pub struct MockFunctionGenerator {
 vendor: String,
 model: String,
 serial: String,
 firmware: String,
 capabilities: CapabilityMap,
 voltage: f64,
 output_enabled: bool,
 mode: String,
}

impl MockFunctionGenerator {
 pub fn new(model: impl Into<String>, capabilities: CapabilityMap) -> Self {
 Self {
 vendor: "MockInstruments".into(),
 model: model.into(),
 serial: "MOCK-FGEN-0001".into(),
 firmware: "1.0.0".into(),
 capabilities,
 voltage: 0.0,
 output_enabled: false,
 mode: "sine".into(),
 }
 }
}

#[async_trait]
impl Driver for MockFunctionGenerator {
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
 Operation::SetVoltage { value,.. } => {
 self.capabilities
.check_voltage(value)
.map_err(|e| GatewayError::bad_request(e))?;
 self.voltage = value;
 Ok(json!({"voltage": value}))
 }
 Operation::SetMode { mode } => {
 self.mode = mode.clone();
 Ok(json!({"mode": mode}))
 }
 Operation::SetOutput { enabled,.. } => {
 self.output_enabled = enabled;
 Ok(json!({"enabled": enabled}))
 }
 Operation::GetReadings {.. } => Ok(json!({
 "voltage": self.voltage,
 "mode": self.mode,
 "enabled": self.output_enabled,
 })),
 Operation::Identify => {
 let id = self.identify().await?;
 Ok(json!({
 "vendor": id.vendor, "model": id.model,
 "serial": id.serial, "firmware": id.firmware,
 }))
 }
 other => Err(GatewayError::bad_request(format!(
 "operation {} not supported by function generator driver",
 other.name()
 ))),
 }
 }
}
