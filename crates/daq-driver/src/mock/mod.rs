//! Mock drivers, required for testing without physical hardware
//!. Each mock is wired purely through the same `Driver`
//! trait real drivers use, so the Session Worker cannot tell them
//! apart.

mod electronic_load;
mod function_generator;
mod multimeter;
mod oscilloscope;
mod power_supply;
pub(crate) mod rng;
mod spectrum_analyzer;

pub use electronic_load::MockElectronicLoad;
pub use function_generator::MockFunctionGenerator;
pub use multimeter::MockMultimeter;
pub use oscilloscope::{MockOscilloscope, WaveformKind};
pub use power_supply::MockPowerSupply;
pub use spectrum_analyzer::MockSpectrumAnalyzer;
