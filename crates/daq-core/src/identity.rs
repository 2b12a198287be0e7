//! Instrument identity and capability maps.
//!
//! An [`InstrumentIdentity`] is created on connect and lives until
//! disconnect ("Instrument identity"). The id is derived
//! deterministically from the transport resource string so that
//! reconnecting to the same resource yields the same identifier.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// The kind of instrument behind a [`InstrumentIdentity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentType {
 Oscilloscope,
 PowerSupply,
 ElectronicLoad,
 Multimeter,
 FunctionGenerator,
 SpectrumAnalyzer,
}

impl InstrumentType {
 pub fn as_str(&self) -> &'static str {
 match self {
 InstrumentType::Oscilloscope => "oscilloscope",
 InstrumentType::PowerSupply => "power_supply",
 InstrumentType::ElectronicLoad => "electronic_load",
 InstrumentType::Multimeter => "multimeter",
 InstrumentType::FunctionGenerator => "function_generator",
 InstrumentType::SpectrumAnalyzer => "spectrum_analyzer",
 }
 }
}

/// Transport a session worker uses to reach an instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportDescriptor {
 Serial { port: String, baud: u32 },
 Usb { vendor_id: u16, product_id: u16, serial: Option<String> },
 Tcp { host: String, port: u16 },
 Mock { label: String },
}

impl TransportDescriptor {
 /// The resource string this descriptor was parsed from, reconstructed
 /// canonically so identical resources hash to the same instrument id.
 pub fn resource_string(&self) -> String {
 match self {
 TransportDescriptor::Serial { port, baud } => format!("serial://{port}@{baud}"),
 TransportDescriptor::Usb { vendor_id, product_id, serial } => match serial {
 Some(s) => format!("usb://{vendor_id:04x}:{product_id:04x}/{s}"),
 None => format!("usb://{vendor_id:04x}:{product_id:04x}"),
 },
 TransportDescriptor::Tcp { host, port } => format!("tcp://{host}:{port}"),
 TransportDescriptor::Mock { label } => format!("mock://{label}"),
 }
 }
}

/// Machine-readable bounds and feature flags honoured by input validation
/// at the driver dispatch boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityMap {
 pub max_voltage: Option<f64>,
 pub max_current: Option<f64>,
 pub max_power: Option<f64>,
 pub channel_count: Option<u32>,
 pub max_sample_rate_hz: Option<f64>,
 pub min_voltage: Option<f64>,
 pub min_current: Option<f64>,
 /// Additional named numeric/boolean bounds not covered above, e.g.
 /// `"max_timebase_s"` for a scope or `"max_resistance_ohm"` for a load.
 #[serde(default)]
 pub extra: BTreeMap<String, f64>,
}

impl CapabilityMap {
 /// Validates `value` against `max_voltage`/`min_voltage` if present.
 pub fn check_voltage(&self, value: f64) -> Result<(), String> {
 if let Some(max) = self.max_voltage {
 if value > max {
 return Err(format!("voltage {value} exceeds capability max {max}"));
 }
 }
 if let Some(min) = self.min_voltage {
 if value < min {
 return Err(format!("voltage {value} below capability min {min}"));
 }
 }
 Ok(())
 }

 pub fn check_current(&self, value: f64) -> Result<(), String> {
 if let Some(max) = self.max_current {
 if value > max {
 return Err(format!("current {value} exceeds capability max {max}"));
 }
 }
 if let Some(min) = self.min_current {
 if value < min {
 return Err(format!("current {value} below capability min {min}"));
 }
 }
 Ok(())
 }

 pub fn check_channel(&self, channel: u32) -> Result<(), String> {
 match self.channel_count {
 Some(n) if channel >= n => {
 Err(format!("channel {channel} out of range (0..{n})"))
 }
 _ => Ok(()),
 }
 }
}

/// Stable identity of one connected instrument, created on connect and
/// retired on disconnect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentIdentity {
 pub id: String,
 pub instrument_type: InstrumentType,
 pub vendor: String,
 pub model: String,
 pub serial: String,
 pub firmware: String,
 pub transport: TransportDescriptor,
 pub capabilities: CapabilityMap,
}

impl InstrumentIdentity {
 /// Derives a stable instrument id from the transport resource string
 /// plus model, so the same physical instrument reconnecting on the
 /// same bus gets the same id (: "derived deterministically
 /// from the transport resource string").
 pub fn derive_id(transport: &TransportDescriptor, model: &str) -> String {
 let mut hasher = Sha256::new();
 hasher.update(transport.resource_string().as_bytes());
 hasher.update(b"|");
 hasher.update(model.as_bytes());
 let digest = hasher.finalize();
 format!("eq_{:x}", digest)[..19].to_string()
 }

 pub fn new(
 instrument_type: InstrumentType,
 vendor: impl Into<String>,
 model: impl Into<String>,
 serial: impl Into<String>,
 firmware: impl Into<String>,
 transport: TransportDescriptor,
 capabilities: CapabilityMap,
 ) -> Self {
 let model = model.into();
 let id = Self::derive_id(&transport, &model);
 Self {
 id,
 instrument_type,
 vendor: vendor.into(),
 model,
 serial: serial.into(),
 firmware: firmware.into(),
 transport,
 capabilities,
 }
 }
}

#[cfg(test)]
mod tests {
 use super::*;

 #[test]
 fn same_resource_and_model_yield_same_id() {
 let t1 = TransportDescriptor::Mock { label: "psu-1".into() };
 let t2 = TransportDescriptor::Mock { label: "psu-1".into() };
 let a = InstrumentIdentity::derive_id(&t1, "E36313A");
 let b = InstrumentIdentity::derive_id(&t2, "E36313A");
 assert_eq!(a, b);
 }

 #[test]
 fn different_resource_yields_different_id() {
 let t1 = TransportDescriptor::Mock { label: "psu-1".into() };
 let t2 = TransportDescriptor::Mock { label: "psu-2".into() };
 let a = InstrumentIdentity::derive_id(&t1, "E36313A");
 let b = InstrumentIdentity::derive_id(&t2, "E36313A");
 assert_ne!(a, b);
 }

 #[test]
 fn capability_map_rejects_out_of_range_voltage() {
 let caps = CapabilityMap {
 max_voltage: Some(30.0),
..Default::default()
 };
 assert!(caps.check_voltage(30.0).is_ok());
 assert!(caps.check_voltage(30.1).is_err());
 }
}
