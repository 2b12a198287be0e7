//! CLI flags and layered configuration.
//!
//! Flags are parsed with `clap`'s derive API; any flag left at its
//! default is then overlaid with `DAQ_*` environment variables and an
//! optional TOML file via `figment`, so a deployment can pin most
//! settings in a config file and override just one with an env var.

use clap::Parser;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "daq-server")]
#[command(about = "Laboratory instrument gateway: sessions, locks, streaming, alarms and scheduling over HTTP/WebSocket")]
pub struct Cli {
 /// Path to an optional TOML settings file, layered under CLI flags.
 #[arg(long)]
 pub config: Option<PathBuf>,

 /// Address the HTTP/WebSocket gateway listens on.
 #[arg(long)]
 pub listen: Option<String>,

 /// Directory holding equipment state snapshots, alarms.json and schedule.json.
 #[arg(long)]
 pub data_dir: Option<PathBuf>,

 /// Transport backend for newly connected equipment.
 #[arg(long, value_enum)]
 pub transport: Option<TransportBackend>,

 /// Default per-operation deadline, in milliseconds.
 #[arg(long)]
 pub command_timeout_ms: Option<u64>,

 /// Default lock acquisition timeout, in seconds (0 = never expires).
 #[arg(long)]
 pub lock_timeout_s: Option<u64>,

 /// Require a session identifier and a held lock for control commands.
 #[arg(long)]
 pub enforce_locks: bool,

 /// `tracing` filter directive, e.g. "info" or "daq_session=debug,info".
 #[arg(long)]
 pub log_level: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TransportBackend {
 Mock,
 Real,
}

/// Fully-resolved settings the composition root builds `AppState` from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
 pub listen: String,
 pub data_dir: PathBuf,
 pub transport: TransportBackend,
 pub command_timeout_ms: u64,
 pub lock_timeout_s: u64,
 pub enforce_locks: bool,
 pub log_level: String,
}

impl Default for Settings {
 fn default() -> Self {
 Self {
 listen: "127.0.0.1:8080".to_string(),
 data_dir: PathBuf::from("./data"),
 transport: TransportBackend::Mock,
 command_timeout_ms: 5_000,
 lock_timeout_s: 300,
 enforce_locks: false,
 log_level: "info".to_string(),
 }
 }
}

/// Layers defaults < TOML file < environment (`DAQ_*`) < explicit CLI
/// flags, in that order.
pub fn load_settings(cli: &Cli) -> anyhow::Result<Settings> {
 let mut figment = Figment::from(Serialized::defaults(Settings::default()));

 if let Some(path) = &cli.config {
 figment = figment.merge(Toml::file(path));
 }
 figment = figment.merge(Env::prefixed("DAQ_"));

 if let Some(listen) = &cli.listen {
 figment = figment.merge(Serialized::default("listen", listen));
 }
 if let Some(data_dir) = &cli.data_dir {
 figment = figment.merge(Serialized::default("data_dir", data_dir));
 }
 if let Some(transport) = cli.transport {
 figment = figment.merge(Serialized::default("transport", transport));
 }
 if let Some(timeout) = cli.command_timeout_ms {
 figment = figment.merge(Serialized::default("command_timeout_ms", timeout));
 }
 if let Some(timeout) = cli.lock_timeout_s {
 figment = figment.merge(Serialized::default("lock_timeout_s", timeout));
 }
 if cli.enforce_locks {
 figment = figment.merge(Serialized::default("enforce_locks", true));
 }
 if let Some(level) = &cli.log_level {
 figment = figment.merge(Serialized::default("log_level", level));
 }

 figment.extract().map_err(|e| anyhow::anyhow!("failed to load configuration: {e}"))
}

#[cfg(test)]
mod tests {
 use super::*;

 fn bare_cli() -> Cli {
 Cli {
 config: None,
 listen: None,
 data_dir: None,
 transport: None,
 command_timeout_ms: None,
 lock_timeout_s: None,
 enforce_locks: false,
 log_level: None,
 }
 }

 #[test]
 fn defaults_apply_with_no_overrides() {
 let settings = load_settings(&bare_cli()).unwrap();
 assert_eq!(settings.listen, "127.0.0.1:8080");
 assert_eq!(settings.transport, TransportBackend::Mock);
 assert!(!settings.enforce_locks);
 }

 #[test]
 fn explicit_cli_flag_overrides_default() {
 let mut cli = bare_cli();
 cli.listen = Some("0.0.0.0:9000".to_string());
 cli.enforce_locks = true;
 let settings = load_settings(&cli).unwrap();
 assert_eq!(settings.listen, "0.0.0.0:9000");
 assert!(settings.enforce_locks);
 }

 #[test]
 fn environment_overrides_default_but_not_explicit_cli() {
 std::env::set_var("DAQ_LOCK_TIMEOUT_S", "42");
 let settings = load_settings(&bare_cli()).unwrap();
 assert_eq!(settings.lock_timeout_s, 42);
 std::env::remove_var("DAQ_LOCK_TIMEOUT_S");
 }
}
