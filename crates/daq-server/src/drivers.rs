//! Maps a connect request onto a transport descriptor and a concrete
//! driver for `POST /equipment/connect`.
//!
//! Only the mock backend is wired up (`--transport mock`, the default).
//! `--transport real` is accepted by the CLI but rejected here until a
//! physical transport is implemented, rather than silently falling
//! back to simulation.

use daq_core::{CapabilityMap, GatewayError, GatewayResult, InstrumentType, TransportDescriptor};
use daq_driver::{
 Driver, MockElectronicLoad, MockFunctionGenerator, MockMultimeter, MockOscilloscope,
 MockPowerSupply, MockSpectrumAnalyzer,
};

use crate::config::TransportBackend;

/// Parses the canonical resource strings `TransportDescriptor::resource_string`
/// produces back into a descriptor, the inverse operation connect needs.
pub fn parse_resource_string(resource: &str) -> GatewayResult<TransportDescriptor> {
 if let Some(label) = resource.strip_prefix("mock://") {
 return Ok(TransportDescriptor::Mock { label: label.to_string() });
 }
 if let Some(rest) = resource.strip_prefix("serial://") {
 let (port, baud) = rest
.rsplit_once('@')
.ok_or_else(|| GatewayError::bad_request("serial resource must be serial://port@baud"))?;
 let baud: u32 = baud
.parse()
.map_err(|_| GatewayError::bad_request("serial baud rate must be an integer"))?;
 return Ok(TransportDescriptor::Serial { port: port.to_string(), baud });
 }
 if let Some(rest) = resource.strip_prefix("tcp://") {
 let (host, port) = rest
.rsplit_once(':')
.ok_or_else(|| GatewayError::bad_request("tcp resource must be tcp://host:port"))?;
 let port: u16 = port
.parse()
.map_err(|_| GatewayError::bad_request("tcp port must be an integer"))?;
 return Ok(TransportDescriptor::Tcp { host: host.to_string(), port });
 }
 if let Some(rest) = resource.strip_prefix("usb://") {
 let (ids, serial) = match rest.split_once('/') {
 Some((ids, serial)) => (ids, Some(serial.to_string())),
 None => (rest, None),
 };
 let (vendor, product) = ids
.split_once(':')
.ok_or_else(|| GatewayError::bad_request("usb resource must be usb://vvvv:pppp[/serial]"))?;
 let vendor_id = u16::from_str_radix(vendor, 16)
.map_err(|_| GatewayError::bad_request("usb vendor id must be 4 hex digits"))?;
 let product_id = u16::from_str_radix(product, 16)
.map_err(|_| GatewayError::bad_request("usb product id must be 4 hex digits"))?;
 return Ok(TransportDescriptor::Usb { vendor_id, product_id, serial });
 }
 Err(GatewayError::bad_request(format!("unrecognised resource string '{resource}'")))
}

/// Reasonable bounds for a freshly connected instrument that didn't
/// override `capabilities` on its connect request, taken from the
/// defaults each mock driver's own tests exercise it against.
pub fn default_capabilities(instrument_type: InstrumentType) -> CapabilityMap {
 match instrument_type {
 InstrumentType::PowerSupply => CapabilityMap {
 max_voltage: Some(30.0),
 max_current: Some(3.0),
 channel_count: Some(1),
..Default::default()
 },
 InstrumentType::ElectronicLoad => CapabilityMap {
 max_current: Some(10.0),
 max_power: Some(100.0),
..Default::default()
 },
 InstrumentType::Oscilloscope => CapabilityMap { channel_count: Some(2),..Default::default() },
 InstrumentType::Multimeter => CapabilityMap::default(),
 InstrumentType::FunctionGenerator => CapabilityMap { max_voltage: Some(10.0),..Default::default() },
 InstrumentType::SpectrumAnalyzer => CapabilityMap::default(),
 }
}

/// Builds the driver backing a newly connected instrument. `seed`
/// fixes the mock's pseudo-random jitter for reproducible tests; a
/// real deployment leaves it `None`.
pub fn build_driver(
 backend: TransportBackend,
 instrument_type: InstrumentType,
 model: &str,
 capabilities: CapabilityMap,
 seed: Option<u64>,
) -> GatewayResult<Box<dyn Driver>> {
 match backend {
 TransportBackend::Real => Err(GatewayError::bad_request(
 "the real transport backend is not wired up in this deployment; connect with --transport mock",
 )),
 TransportBackend::Mock => Ok(match instrument_type {
 InstrumentType::PowerSupply => Box::new(MockPowerSupply::new(model, capabilities, seed)),
 InstrumentType::ElectronicLoad => Box::new(MockElectronicLoad::new(model, capabilities, seed)),
 InstrumentType::Oscilloscope => Box::new(MockOscilloscope::new(model, capabilities, seed)),
 InstrumentType::Multimeter => Box::new(MockMultimeter::new(model, capabilities, seed)),
 InstrumentType::FunctionGenerator => Box::new(MockFunctionGenerator::new(model, capabilities)),
 InstrumentType::SpectrumAnalyzer => Box::new(MockSpectrumAnalyzer::new(model, capabilities, seed)),
 }),
 }
}

#[cfg(test)]
mod tests {
 use super::*;

 #[test]
 fn parses_mock_resource() {
 let d = parse_resource_string("mock://psu-1").unwrap();
 assert_eq!(d, TransportDescriptor::Mock { label: "psu-1".into() });
 }

 #[test]
 fn parses_serial_resource() {
 let d = parse_resource_string("serial://COM3@9600").unwrap();
 assert_eq!(d, TransportDescriptor::Serial { port: "COM3".into(), baud: 9600 });
 }

 #[test]
 fn parses_tcp_resource() {
 let d = parse_resource_string("tcp://192.168.1.5:5025").unwrap();
 assert_eq!(d, TransportDescriptor::Tcp { host: "192.168.1.5".into(), port: 5025 });
 }

 #[test]
 fn parses_usb_resource_with_and_without_serial() {
 let d = parse_resource_string("usb://0957:1755").unwrap();
 assert_eq!(d, TransportDescriptor::Usb { vendor_id: 0x0957, product_id: 0x1755, serial: None });
 let d = parse_resource_string("usb://0957:1755/MY53").unwrap();
 assert_eq!(
 d,
 TransportDescriptor::Usb { vendor_id: 0x0957, product_id: 0x1755, serial: Some("MY53".into()) }
 );
 }

 #[test]
 fn rejects_unknown_scheme() {
 assert!(parse_resource_string("gpib://1").is_err());
 }

 #[test]
 fn real_backend_is_rejected() {
 let err = build_driver(
 TransportBackend::Real,
 InstrumentType::PowerSupply,
 "X",
 CapabilityMap::default(),
 None,
 )
.unwrap_err();
 assert_eq!(err.kind, daq_core::ErrorKind::BadRequest);
 }
}
