//! Scheduler: a monotonic priority queue of one-shot,
//! interval, and cron jobs, dispatched through the Lock Arbiter under
//! a synthetic system session.

pub mod cron_adapter;
pub mod model;
pub mod scheduler;

pub use model::{JobPatch, NewJob, Schedule, ScheduledJob};
pub use scheduler::{JobDispatcher, Scheduler, DEFAULT_TICK_INTERVAL, SYSTEM_SESSION_ID};
