//! JSON request/response DTOs for the HTTP surface.
//!
//! These are plain data shapes; the gateway crate (`daq-server`) maps
//! them onto the component operations. Keeping them here, rather than
//! in `daq-server`, lets any future client crate depend on the wire
//! contract without pulling in axum.

use daq_core::{CapabilityMap, GatewayError, InstrumentType};
use daq_driver::Operation;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoverRequest {}

#[derive(Debug, Clone, Serialize)]
pub struct DiscoverResponse {
 pub resources: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectRequest {
 pub resource_string: String,
 pub equipment_type: InstrumentType,
 pub model: String,
 /// Overrides the driver's own default bounds, e.g. `{max_voltage:
 /// 30, max_current: 3, channels: 1}` ( scenario 1).
 #[serde(default)]
 pub capabilities: Option<CapabilityMap>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectResponse {
 pub equipment_id: String,
 pub status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct DisconnectResponse {
 pub equipment_id: String,
 pub status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct EquipmentIdentityDto {
 pub equipment_id: String,
 pub instrument_type: InstrumentType,
 pub vendor: String,
 pub model: String,
 pub serial: String,
 pub firmware: String,
 pub capabilities: CapabilityMap,
}

#[derive(Debug, Clone, Serialize)]
pub struct EquipmentStatusResponse {
 pub connected: bool,
 pub firmware_version: String,
 pub capabilities: CapabilityMap,
 pub telemetry: Value,
}

/// Body for `POST /equipment/{id}/command`.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandRequest {
 pub command_id: String,
 #[serde(flatten)]
 pub operation: Operation,
 #[serde(default)]
 pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandResponse {
 pub command_id: String,
 pub success: bool,
 #[serde(skip_serializing_if = "Option::is_none")]
 pub data: Option<Value>,
 #[serde(skip_serializing_if = "Option::is_none")]
 pub error: Option<GatewayError>,
}

impl CommandResponse {
 pub fn ok(command_id: String, data: Value) -> Self {
 Self { command_id, success: true, data: Some(data), error: None }
 }

 pub fn err(command_id: String, error: GatewayError) -> Self {
 Self { command_id, success: false, data: None, error: Some(error) }
 }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LockRequest {
 pub equipment_id: String,
 pub session_id: String,
 #[serde(default)]
 pub mode: LockModeDto,
 #[serde(default = "default_lock_timeout")]
 pub timeout_s: u64,
 #[serde(default)]
 pub queue_if_busy: bool,
}

fn default_lock_timeout() -> u64 {
 300
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockModeDto {
 #[default]
 Exclusive,
 Observer,
}

#[derive(Debug, Clone, Serialize)]
pub struct LockResponse {
 pub outcome: String,
 #[serde(skip_serializing_if = "Option::is_none")]
 pub position: Option<usize>,
 #[serde(skip_serializing_if = "Option::is_none")]
 pub holder_session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
 pub error: GatewayError,
}

#[cfg(test)]
mod tests {
 use super::*;

 #[test]
 fn command_request_flattens_operation_fields() {
 let json = serde_json::json!({
 "command_id": "c1",
 "action": "set_voltage",
 "parameters": {"value": 5.0},
 "session_id": "s1",
 });
 let req: CommandRequest = serde_json::from_value(json).unwrap();
 assert_eq!(req.command_id, "c1");
 assert_eq!(req.operation.name(), "set_voltage");
 }
}
