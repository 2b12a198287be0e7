//! Scheduled job model.

use chrono::{DateTime, Utc};
use daq_driver::Operation;
use serde::{Deserialize, Serialize};

/// Recurrence rule for a scheduled job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
 OneShot { at: DateTime<Utc> },
 Interval { period_s: f64 },
 /// Standard five-field expression: minute hour day-of-month month
 /// day-of-week.
 Cron { expression: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
 pub id: String,
 pub equipment_id: String,
 pub operation: Operation,
 pub schedule: Schedule,
 pub enabled: bool,
 pub next_fire_at: Option<DateTime<Utc>>,
 pub last_fired_at: Option<DateTime<Utc>>,
 pub last_error: Option<String>,
 pub created_at: DateTime<Utc>,
 pub updated_at: DateTime<Utc>,
}

/// Input to `create` — generated fields (`id`, timestamps, initial
/// `next_fire_at`) are assigned by the scheduler.
#[derive(Debug, Clone)]
pub struct NewJob {
 pub equipment_id: String,
 pub operation: Operation,
 pub schedule: Schedule,
}

#[derive(Debug, Clone, Default)]
pub struct JobPatch {
 pub operation: Option<Operation>,
 pub schedule: Option<Schedule>,
}
