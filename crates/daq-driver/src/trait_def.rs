//! The `Driver` trait every instrument implementation satisfies.
//!
//! Drivers are purely request/response against the transport: they
//! hold no concurrency state and are not safe for concurrent entry
//!. The Session Worker is the sole caller and guarantees
//! at most one `execute` in flight at a time, so `&mut self` is
//! sufficient here — no interior mutability is needed inside a driver.
//!
//! Shared wire-protocol primitives (write/query framing) belong in a
//! helper value composed into a concrete driver, not in a base class
//! ("Class hierarchy of drivers").

use crate::operation::Operation;
use async_trait::async_trait;
use daq_core::{CapabilityMap, GatewayResult};
use serde_json::Value;

/// Identity fields a driver reports for `identify`.
#[derive(Debug, Clone, PartialEq)]
pub struct Identification {
 pub vendor: String,
 pub model: String,
 pub serial: String,
 pub firmware: String,
}

/// One connected instrument's command dialect.
#[async_trait]
pub trait Driver: Send {
 /// Queries vendor/model/serial/firmware from the instrument. Also
 /// used as the worker's post-degraded-state probe.
 async fn identify(&mut self) -> GatewayResult<Identification>;

 /// Machine-readable bounds honoured by input validation.
 fn capabilities(&self) -> CapabilityMap;

 /// Executes one operation against the wire and returns its result
 /// value. Implementations must validate operation parameters
 /// against `capabilities` and return `bad_request` *without*
 /// touching the wire when a range is violated.
 async fn execute(&mut self, operation: Operation) -> GatewayResult<Value>;

 /// Optional: captures enough driver state to later `restore_state`
 /// it. Instruments that don't support save/recall return
 /// `bad_request`.
 async fn snapshot_state(&mut self) -> GatewayResult<Value> {
 Err(daq_core::GatewayError::bad_request(
 "this driver does not support state snapshots",
 ))
 }

 async fn restore_state(&mut self, _state: Value) -> GatewayResult<()> {
 Err(daq_core::GatewayError::bad_request(
 "this driver does not support state restore",
 ))
 }
}
