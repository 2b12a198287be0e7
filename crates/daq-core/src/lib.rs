//! Shared identity, capability, telemetry and error types for the
//! instrument gateway.
//!
//! Every other crate in the workspace depends on this one and nothing
//! else; it holds no component logic, only the data shapes and the
//! error taxonomy that cross component boundaries.

pub mod error;
pub mod identity;
pub mod stream;
pub mod telemetry;

pub use error::{ErrorDetails, ErrorKind, GatewayError, GatewayResult};
pub use identity::{CapabilityMap, InstrumentIdentity, InstrumentType, TransportDescriptor};
pub use stream::StreamType;
pub use telemetry::{ChannelReading, OperatingMode, Telemetry};
