//! Maps [`GatewayError`] onto an HTTP status and JSON body (
//! "Errors"), the one place `ErrorKind` is translated into transport
//! terms.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use daq_core::{ErrorKind, GatewayError};
use daq_proto::ErrorResponse;

pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
 fn from(e: GatewayError) -> Self {
 ApiError(e)
 }
}

impl IntoResponse for ApiError {
 fn into_response(self) -> Response {
 let status = match self.0.kind {
 ErrorKind::BadRequest | ErrorKind::ParseError => StatusCode::BAD_REQUEST,
 ErrorKind::NotFound => StatusCode::NOT_FOUND,
 ErrorKind::Conflict => StatusCode::CONFLICT,
 ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
 ErrorKind::Busy => StatusCode::TOO_MANY_REQUESTS,
 ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
 ErrorKind::InstrumentUnavailable => StatusCode::SERVICE_UNAVAILABLE,
 ErrorKind::Cancelled => StatusCode::CONFLICT,
 ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
 };
 (status, Json(ErrorResponse { error: self.0 })).into_response()
 }
}

pub type ApiResult<T> = Result<T, ApiError>;
