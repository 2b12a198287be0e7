//! `Driver` trait, closed operation vocabulary, and mock instrument
//! drivers.
//!
//! Driver implementations hold no concurrency state: the Session
//! Worker is the sole caller and is responsible for serialising all
//! access.

pub mod mock;
pub mod operation;
pub mod trait_def;

pub use mock::{
 MockElectronicLoad, MockFunctionGenerator, MockMultimeter, MockOscilloscope,
 MockPowerSupply, MockSpectrumAnalyzer, WaveformKind,
};
pub use operation::{is_control_name, Operation};
pub use trait_def::{Driver, Identification};
