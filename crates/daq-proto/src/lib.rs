//! Wire DTOs for the instrument gateway's JSON request/response and
//! duplex message surfaces. Shared by the gateway and any
//! future client crate.

pub mod duplex;
pub mod request;

pub use duplex::{ClientMessage, ServerMessage, StreamType};
pub use request::{
 CommandRequest, CommandResponse, ConnectRequest, ConnectResponse, DiscoverRequest,
 DiscoverResponse, DisconnectResponse, EquipmentIdentityDto, EquipmentStatusResponse,
 ErrorResponse, LockModeDto, LockRequest, LockResponse,
};
