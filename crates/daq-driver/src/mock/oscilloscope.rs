//! Mock oscilloscope.
//!
//! Generates a selectable waveform (sine/square/triangle/noise) at a
//! configurable frequency and amplitude with a configurable sample
//! count.

use super::rng::MockRng;
use crate::operation::Operation;
use crate::trait_def::{Driver, Identification};
use async_trait::async_trait;
use daq_core::{CapabilityMap, GatewayError, GatewayResult};
use serde_json::{json, Value};
use std::f64::consts::PI;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WaveformKind {
 Sine,
 Square,
 Triangle,
 Noise,
}

impl WaveformKind {
 fn parse(s: &str) -> GatewayResult<Self> {
 match s.to_ascii_lowercase().as_str() {
 "sine" => Ok(WaveformKind::Sine),
 "square" => Ok(WaveformKind::Square),
 "triangle" => Ok(WaveformKind::Triangle),
 "noise" => Ok(WaveformKind::Noise),
 other => Err(GatewayError::bad_request(format!("unknown waveform kind {other}"))),
 }
 }
}

struct ChannelConfig {
 enabled: bool,
 scale: f64,
 offset: f64,
 coupling: String,
 probe: f64,
 waveform: WaveformKind,
 frequency_hz: f64,
 amplitude: f64,
}

impl Default for ChannelConfig {
 fn default() -> Self {
 Self {
 enabled: false,
 scale: 1.0,
 offset: 0.0,
 coupling: "dc".into(),
 probe: 1.0,
 waveform: WaveformKind::Sine,
 frequency_hz: 1_000.0,
 amplitude: 1.0,
 }
 }
}

pub struct MockOscilloscope {
 vendor: String,
 model: String,
 serial: String,
 firmware: String,
 capabilities: CapabilityMap,
 channels: Vec<ChannelConfig>,
 sample_count: usize,
 timebase_scale: f64,
 timebase_offset: f64,
 triggered: bool,
 rng: MockRng,
}

impl MockOscilloscope {
 pub fn new(model: impl Into<String>, capabilities: CapabilityMap, seed: Option<u64>) -> Self {
 let n = capabilities.channel_count.unwrap_or(2).max(1) as usize;
 Self {
 vendor: "MockInstruments".into(),
 model: model.into(),
 serial: "MOCK-SCOPE-0001".into(),
 firmware: "1.0.0".into(),
 capabilities,
 channels: (0..n).map(|_| ChannelConfig::default()).collect(),
 sample_count: 1_000,
 timebase_scale: 1e-3,
 timebase_offset: 0.0,
 triggered: false,
 rng: MockRng::new(seed),
 }
 }

 /// Configures the simulated signal on `channel`; test-only, not
 /// part of the wire vocabulary.
 pub fn set_simulated_signal(&mut self, channel: u32, kind: WaveformKind, frequency_hz: f64, amplitude: f64) {
 if let Some(ch) = self.channels.get_mut(channel as usize) {
 ch.waveform = kind;
 ch.frequency_hz = frequency_hz;
 ch.amplitude = amplitude;
 }
 }

 pub fn set_sample_count(&mut self, n: usize) {
 self.sample_count = n.max(1);
 }

 fn sample_waveform(&self, ch: &ChannelConfig) -> Vec<f64> {
 let dt = self.timebase_scale / (self.sample_count as f64 / 10.0).max(1.0);
 (0..self.sample_count)
.map(|i| {
 let t = i as f64 * dt + self.timebase_offset;
 let phase = 2.0 * PI * ch.frequency_hz * t;
 let base = match ch.waveform {
 WaveformKind::Sine => phase.sin(),
 WaveformKind::Square => if phase.sin() >= 0.0 { 1.0 } else { -1.0 },
 WaveformKind::Triangle => {
 let frac = (phase / (2.0 * PI)).rem_euclid(1.0);
 4.0 * (frac - 0.5).abs() - 1.0
 }
 WaveformKind::Noise => self.rng.uniform(-1.0, 1.0),
 };
 ch.amplitude * base + ch.offset
 })
.collect()
 }
}

#[async_trait]
impl Driver for MockOscilloscope {
 async fn identify(&mut self) -> GatewayResult<Identification> {
 Ok(Identification {
 vendor: self.vendor.clone(),
 model: self.model.clone(),
 serial: self.serial.clone(),
 firmware: self.firmware.clone(),
 })
 }

 fn capabilities(&self) -> CapabilityMap {
 self.capabilities.clone()
 }

 async fn execute(&mut self, operation: Operation) -> GatewayResult<Value> {
 match operation {
 Operation::SetTimebase { scale, offset } => {
 if scale <= 0.0 {
 return Err(GatewayError::bad_request("timebase scale must be positive"));
 }
 self.timebase_scale = scale;
 self.timebase_offset = offset;
 Ok(json!({"scale": scale, "offset": offset}))
 }
 Operation::SetChannel { channel, enabled, scale, offset, coupling, probe } => {
 self.capabilities.check_channel(channel).map_err(|e| GatewayError::bad_request(e))?;
 let ch = self
.channels
.get_mut(channel as usize)
.ok_or_else(|| GatewayError::bad_request(format!("no such channel {channel}")))?;
 ch.enabled = enabled;
 ch.scale = scale;
 ch.offset = offset;
 ch.coupling = coupling.clone();
 ch.probe = probe.unwrap_or(1.0);
 Ok(json!({"channel": channel, "enabled": enabled}))
 }
 Operation::SetTrigger { source, mode, level, slope, coupling } => {
 Ok(json!({"source": source, "mode": mode, "level": level, "slope": slope, "coupling": coupling}))
 }
 Operation::TriggerRun => {
 self.triggered = true;
 Ok(json!({"status": "running"}))
 }
 Operation::TriggerStop => {
 self.triggered = false;
 Ok(json!({"status": "stopped"}))
 }
 Operation::TriggerSingle => {
 self.triggered = true;
 Ok(json!({"status": "single"}))
 }
 Operation::Autoscale => {
 for ch in &mut self.channels {
 ch.scale = ch.amplitude.max(0.001);
 }
 Ok(json!({"status": "autoscaled"}))
 }
 Operation::GetWaveform { channel } => {
 self.capabilities.check_channel(channel).map_err(|e| GatewayError::bad_request(e))?;
 let ch = self
.channels
.get(channel as usize)
.ok_or_else(|| GatewayError::bad_request(format!("no such channel {channel}")))?;
 if !ch.enabled {
 return Err(GatewayError::bad_request(format!("channel {channel} is not enabled")));
 }
 let samples = self.sample_waveform(ch);
 Ok(json!({
 "channel": channel,
 "sample_count": samples.len(),
 "timebase_scale": self.timebase_scale,
 "samples": samples,
 }))
 }
 Operation::GetMeasurements { channel } => {
 self.capabilities.check_channel(channel).map_err(|e| GatewayError::bad_request(e))?;
 let ch = self
.channels
.get(channel as usize)
.ok_or_else(|| GatewayError::bad_request(format!("no such channel {channel}")))?;
 let samples = self.sample_waveform(ch);
 let vpp = samples.iter().cloned().fold(f64::MIN, f64::max)
 - samples.iter().cloned().fold(f64::MAX, f64::min);
 let mean = samples.iter().sum::<f64>() / samples.len() as f64;
 Ok(json!({"channel": channel, "vpp": vpp, "mean": mean, "frequency_hz": ch.frequency_hz}))
 }
 Operation::Identify => {
 let id = self.identify().await?;
 Ok(json!({
 "vendor": id.vendor, "model": id.model,
 "serial": id.serial, "firmware": id.firmware,
 }))
 }
 other => Err(GatewayError::bad_request(format!(
 "operation {} not supported by oscilloscope driver",
 other.name()
 ))),
 }
 }
}

#[cfg(test)]
mod tests {
 use super::*;

 fn scope() -> MockOscilloscope {
 let caps = CapabilityMap { channel_count: Some(2),..Default::default() };
 MockOscilloscope::new("MSO-mock", caps, Some(11))
 }

 #[tokio::test]
 async fn get_waveform_respects_sample_count() {
 let mut s = scope();
 s.set_sample_count(256);
 s.set_simulated_signal(0, WaveformKind::Sine, 1_000.0, 2.0);
 s.execute(Operation::SetChannel {
 channel: 0, enabled: true, scale: 1.0, offset: 0.0, coupling: "dc".into(), probe: None,
 }).await.unwrap();
 let result = s.execute(Operation::GetWaveform { channel: 0 }).await.unwrap();
 assert_eq!(result["sample_count"], 256);
 assert_eq!(result["samples"].as_array().unwrap().len(), 256);
 }

 #[tokio::test]
 async fn disabled_channel_waveform_is_bad_request() {
 let mut s = scope();
 let err = s.execute(Operation::GetWaveform { channel: 0 }).await.unwrap_err();
 assert_eq!(err.kind, daq_core::ErrorKind::BadRequest);
 }

 #[tokio::test]
 async fn unknown_channel_is_bad_request() {
 let mut s = scope();
 let err = s.execute(Operation::GetWaveform { channel: 9 }).await.unwrap_err();
 assert_eq!(err.kind, daq_core::ErrorKind::BadRequest);
 }
}
