//! Stream type vocabulary shared by the wire protocol (`daq-proto`) and
//! the Stream Multiplexer (`daq-stream`), "Stream subscription".

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamType {
 Readings,
 Waveform,
 Measurements,
}

impl StreamType {
 pub fn as_str(&self) -> &'static str {
 match self {
 StreamType::Readings => "readings",
 StreamType::Waveform => "waveform",
 StreamType::Measurements => "measurements",
 }
 }
}

impl std::fmt::Display for StreamType {
 fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
 write!(f, "{}", self.as_str())
 }
}
