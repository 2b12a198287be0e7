//! Centralized error taxonomy for the instrument gateway.
//!
//! `GatewayError` is the one error type every component boundary
//! returns. It never leaks component-internal error types across an
//! `async` task boundary (a worker panic, for instance, is converted to
//! `ErrorKind::Internal` rather than propagated as a panic payload).
//!
//! ## Error Categories
//!
//! The ten kinds in [`ErrorKind`] are closed by design: new failure
//! modes should be mapped onto one of these rather than extending the
//! enum, since clients key retry/backoff behaviour off `kind`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed taxonomy of user-visible failure categories.
///
/// See. Kept as a fieldless enum (rather than folding details
/// into variants) so it serializes to a single JSON string and is easy
/// for clients to switch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
 /// Malformed input, out-of-range parameters before any side effect.
 BadRequest,
 /// Unknown equipment/session/alarm/job identifier.
 NotFound,
 /// Lock held by another session.
 Conflict,
 /// Caller lacks the lock a control command requires.
 PermissionDenied,
 /// Queue at capacity; caller may retry.
 Busy,
 /// Operation exceeded its deadline.
 Timeout,
 /// Worker degraded or disconnected; retry after cool-down.
 InstrumentUnavailable,
 /// Instrument returned data the driver could not parse.
 ParseError,
 /// Operation cancelled before completion.
 Cancelled,
 /// Unclassified failure; always logged with context.
 Internal,
}

impl ErrorKind {
 pub fn as_str(&self) -> &'static str {
 match self {
 ErrorKind::BadRequest => "bad_request",
 ErrorKind::NotFound => "not_found",
 ErrorKind::Conflict => "conflict",
 ErrorKind::PermissionDenied => "permission_denied",
 ErrorKind::Busy => "busy",
 ErrorKind::Timeout => "timeout",
 ErrorKind::InstrumentUnavailable => "instrument_unavailable",
 ErrorKind::ParseError => "parse_error",
 ErrorKind::Cancelled => "cancelled",
 ErrorKind::Internal => "internal",
 }
 }
}

impl std::fmt::Display for ErrorKind {
 fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
 write!(f, "{}", self.as_str())
 }
}

/// Extra, kind-specific context surfaced to the caller.
///
/// For lock conflicts this carries the current holder and queue length
/// ("For lock conflicts, `details` includes the current
/// holder's session identifier and queue length").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
 #[serde(skip_serializing_if = "Option::is_none")]
 pub holder_session_id: Option<String>,
 #[serde(skip_serializing_if = "Option::is_none")]
 pub queue_length: Option<usize>,
 #[serde(skip_serializing_if = "Option::is_none")]
 pub retry_after_ms: Option<u64>,
 #[serde(flatten, skip_serializing_if = "serde_json::Map::is_empty")]
 pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The error type returned across every component boundary.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct GatewayError {
 pub kind: ErrorKind,
 pub message: String,
 #[serde(default, skip_serializing_if = "Option::is_none")]
 pub details: Option<ErrorDetails>,
}

impl GatewayError {
 pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
 Self {
 kind,
 message: message.into(),
 details: None,
 }
 }

 pub fn with_details(mut self, details: ErrorDetails) -> Self {
 self.details = Some(details);
 self
 }

 pub fn bad_request(message: impl Into<String>) -> Self {
 Self::new(ErrorKind::BadRequest, message)
 }

 pub fn not_found(message: impl Into<String>) -> Self {
 Self::new(ErrorKind::NotFound, message)
 }

 pub fn conflict(message: impl Into<String>, holder_session_id: impl Into<String>) -> Self {
 Self::new(ErrorKind::Conflict, message).with_details(ErrorDetails {
 holder_session_id: Some(holder_session_id.into()),
..Default::default()
 })
 }

 pub fn permission_denied(message: impl Into<String>) -> Self {
 Self::new(ErrorKind::PermissionDenied, message)
 }

 pub fn busy(message: impl Into<String>) -> Self {
 Self::new(ErrorKind::Busy, message)
 }

 pub fn timeout(message: impl Into<String>) -> Self {
 Self::new(ErrorKind::Timeout, message)
 }

 pub fn instrument_unavailable(message: impl Into<String>) -> Self {
 Self::new(ErrorKind::InstrumentUnavailable, message)
 }

 pub fn parse_error(message: impl Into<String>) -> Self {
 Self::new(ErrorKind::ParseError, message)
 }

 pub fn cancelled(message: impl Into<String>) -> Self {
 Self::new(ErrorKind::Cancelled, message)
 }

 pub fn internal(message: impl Into<String>) -> Self {
 Self::new(ErrorKind::Internal, message)
 }
}

/// Convenience alias used throughout the workspace.
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
 use super::*;

 #[test]
 fn serializes_kind_as_snake_case_string() {
 let json = serde_json::to_string(&ErrorKind::InstrumentUnavailable).unwrap();
 assert_eq!(json, "\"instrument_unavailable\"");
 }

 #[test]
 fn conflict_carries_holder_and_queue_length() {
 let err = GatewayError::conflict("locked", "session-a").with_details(ErrorDetails {
 holder_session_id: Some("session-a".into()),
 queue_length: Some(2),
..Default::default()
 });
 let details = err.details.unwrap();
 assert_eq!(details.holder_session_id.as_deref(), Some("session-a"));
 assert_eq!(details.queue_length, Some(2));
 }

 #[test]
 fn display_matches_kind_and_message() {
 let err = GatewayError::bad_request("voltage out of range");
 assert_eq!(err.to_string(), "bad_request: voltage out of range");
 }
}
