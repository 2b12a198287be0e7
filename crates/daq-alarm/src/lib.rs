//! Alarm Engine: threshold evaluation over cached
//! telemetry only, with debounce, hysteresis, deduplication, and
//! best-effort external notification.

pub mod engine;
pub mod model;
pub mod notify;

pub use engine::{AlarmEngine, NewAlarm, TelemetrySource, DEFAULT_EVAL_INTERVAL};
pub use model::{AlarmDefinition, AlarmEvent, AlarmKind, AlarmPatch, AlarmStatistics, EventFilter, EventStatus, Transition};
pub use notify::{dispatch, NotificationChannel};
