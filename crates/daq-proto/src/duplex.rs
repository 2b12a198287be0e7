//! Typed JSON messages on the duplex (WebSocket) surface.

use chrono::{DateTime, Utc};
use daq_core::GatewayError;
pub use daq_core::StreamType;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client-to-server messages on the duplex channel.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
 StartStream {
 equipment_id: String,
 stream_type: StreamType,
 interval_ms: u64,
 #[serde(default)]
 params: Option<Value>,
 },
 StopStream {
 equipment_id: String,
 stream_type: StreamType,
 },
 /// Restarts every subscription this session held before a
 /// reconnect, within the multiplexer's grace window (
 /// "Recovery").
 Resume,
 Ping,
}

/// Server-to-client messages on the duplex channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
 StreamStarted {
 equipment_id: String,
 stream_type: StreamType,
 },
 StreamStopped {
 equipment_id: String,
 stream_type: StreamType,
 },
 StreamData {
 equipment_id: String,
 stream_type: StreamType,
 sampled_at: DateTime<Utc>,
 #[serde(skip_serializing_if = "Option::is_none")]
 data: Option<Value>,
 #[serde(skip_serializing_if = "Option::is_none")]
 error: Option<GatewayError>,
 },
 /// Notifies an observer that its lock was demoted because another
 /// session acquired exclusive ( Open Question (a)).
 LockEvent {
 equipment_id: String,
 event: String,
 },
 Pong,
 Error {
 error: GatewayError,
 },
}

#[cfg(test)]
mod tests {
 use super::*;

 #[test]
 fn start_stream_parses_from_json() {
 let json = serde_json::json!({
 "type": "start_stream",
 "equipment_id": "eq_1",
 "stream_type": "readings",
 "interval_ms": 200,
 });
 let msg: ClientMessage = serde_json::from_value(json).unwrap();
 matches!(msg, ClientMessage::StartStream {.. });
 }

 #[test]
 fn stream_data_serializes_tagged() {
 let msg = ServerMessage::StreamData {
 equipment_id: "eq_1".into(),
 stream_type: StreamType::Readings,
 sampled_at: Utc::now(),
 data: Some(serde_json::json!({"voltage": 5.0})),
 error: None,
 };
 let json = serde_json::to_value(&msg).unwrap();
 assert_eq!(json["type"], "stream_data");
 }
}
