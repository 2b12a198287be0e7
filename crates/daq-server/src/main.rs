//! Binary entry point: parses CLI flags, loads layered configuration,
//! wires the composition root, and serves the HTTP/duplex gateway.
//!
//! Exit codes follows: 0 normal shutdown, 1 configuration
//! error, 2 transport backend unavailable, 64 bad arguments.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use daq_alarm::AlarmEngine;
use daq_scheduler::Scheduler;
use daq_server::config::{Cli, Settings, TransportBackend};
use daq_server::routes;
use daq_server::state::{sampler_factory, telemetry_source, AppState, SchedulerDispatcher};
use daq_session::{ClientSessionRegistry, LockArbiter};
use daq_storage::StateStore;
use daq_stream::StreamMultiplexer;

fn main() -> ExitCode {
 let cli = match Cli::try_parse() {
 Ok(cli) => cli,
 Err(e) => {
 eprintln!("{e}");
 return ExitCode::from(64);
 }
 };

 let settings = match daq_server::config::load_settings(&cli) {
 Ok(s) => s,
 Err(e) => {
 eprintln!("configuration error: {e}");
 return ExitCode::from(1);
 }
 };

 if settings.transport == TransportBackend::Real {
 eprintln!("the real transport backend is not wired up in this deployment");
 return ExitCode::from(2);
 }

 init_tracing(&settings.log_level);

 let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
 Ok(rt) => rt,
 Err(e) => {
 eprintln!("failed to start the async runtime: {e}");
 return ExitCode::from(1);
 }
 };

 match runtime.block_on(run(settings)) {
 Ok(()) => ExitCode::SUCCESS,
 Err(e) => {
 tracing::error!(error = %e, "gateway exited with an error");
 ExitCode::from(1)
 }
 }
}

fn init_tracing(log_level: &str) {
 let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
 tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

async fn run(settings: Settings) -> anyhow::Result<()> {
 let storage = StateStore::new(settings.data_dir.clone());
 storage.ensure_dirs().await?;

 let equipment = Arc::new(daq_server::state::EquipmentRegistry::new());
 let locks = LockArbiter::new(settings.lock_timeout_s);
 locks.spawn_reaper(Duration::from_secs(10));

 let sessions = Arc::new(ClientSessionRegistry::new(locks.clone()));

 let command_timeout = Duration::from_millis(settings.command_timeout_ms);
 let streams = StreamMultiplexer::new(sampler_factory(equipment.clone(), command_timeout));
 streams.spawn_grace_reaper(Duration::from_secs(10));

 let alarms = AlarmEngine::new(telemetry_source(equipment.clone()), Vec::new());
 let persisted_alarms: Vec<daq_alarm::AlarmDefinition> = storage.load_collection("alarms.json").await;
 alarms.seed(persisted_alarms);
 alarms.spawn_loop(daq_alarm::DEFAULT_EVAL_INTERVAL);

 let dispatcher = Arc::new(SchedulerDispatcher { equipment: equipment.clone(), command_timeout });
 let scheduler = Scheduler::new(dispatcher);
 let persisted_jobs: Vec<daq_scheduler::ScheduledJob> = storage.load_collection("schedule.json").await;
 scheduler.seed(persisted_jobs);
 scheduler.spawn_loop(daq_scheduler::DEFAULT_TICK_INTERVAL);

 let state = Arc::new(AppState { settings: settings.clone(), equipment, sessions, locks, streams, alarms, scheduler, storage });

 let app = routes::router(state);
 let listener = tokio::net::TcpListener::bind(&settings.listen).await?;
 tracing::info!(listen = %settings.listen, "instrument gateway listening");
 axum::serve(listener, app).await?;
 Ok(())
}
