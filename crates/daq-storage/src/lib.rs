//! Small JSON file persistence under a data directory (
//! "Persisted state layout").
//!
//! Three shapes are persisted:
//!
//! - `equipment_states/{equipment_id}_{state_id}.json` — named driver
//! state snapshots ( `snapshot_state`/`restore_state`).
//! - `alarms.json` — alarm definitions (owned and written by
//! `daq-alarm`, read here at startup).
//! - `schedule.json` — scheduled jobs (owned by `daq-scheduler`).
//!
//! The core reads these files at startup and ignores malformed
//! entries with a logged warning rather than refusing to start; a
//! single corrupt entry must not take down the whole gateway.

pub mod state_store;

pub use state_store::StateStore;
