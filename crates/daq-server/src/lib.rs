//! Composition root for the instrument gateway: configuration, shared
//! application state, and the HTTP/duplex Request Gateway.
//!
//! Kept as a library, with `main.rs` a thin binary shim, so integration
//! tests can build a full `Router` against an in-process mock fleet
//! without spawning the real process.

pub mod config;
pub mod drivers;
pub mod error_response;
pub mod routes;
pub mod state;
pub mod ws;

pub use config::{Cli, Settings, TransportBackend};
pub use state::AppState;
