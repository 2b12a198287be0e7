//! External notification dispatch ("Notifications").
//!
//! Channels are best-effort collaborators: a failing channel is logged
//! and skipped, never allowed to block or fail the evaluation loop.

use crate::model::{AlarmEvent, Transition};
use async_trait::async_trait;
use daq_core::GatewayResult;
use tracing::warn;

#[async_trait]
pub trait NotificationChannel: Send + Sync {
 fn name(&self) -> &str;
 async fn notify(&self, event: &AlarmEvent, transition: Transition) -> GatewayResult<()>;
}

/// Fans one transition out to every registered channel, swallowing and
/// logging individual failures.
pub async fn dispatch(channels: &[Box<dyn NotificationChannel>], event: &AlarmEvent, transition: Transition) {
 for channel in channels {
 if let Err(e) = channel.notify(event, transition).await {
 warn!(channel = channel.name(), alarm_id = %event.alarm_id, error = %e, "notification channel failed");
 }
 }
}

#[cfg(test)]
mod tests {
 use super::*;
 use chrono::Utc;
 use daq_core::GatewayError;
 use std::sync::atomic::{AtomicUsize, Ordering};
 use std::sync::Arc;

 struct CountingChannel {
 calls: Arc<AtomicUsize>,
 fail: bool,
 }

 #[async_trait]
 impl NotificationChannel for CountingChannel {
 fn name(&self) -> &str {
 "counting"
 }

 async fn notify(&self, _event: &AlarmEvent, _transition: Transition) -> GatewayResult<()> {
 self.calls.fetch_add(1, Ordering::SeqCst);
 if self.fail {
 return Err(GatewayError::internal("simulated channel failure"));
 }
 Ok(())
 }
 }

 fn sample_event() -> AlarmEvent {
 AlarmEvent {
 id: "evt_1".into(),
 alarm_id: "alarm_1".into(),
 equipment_id: "eq_1".into(),
 parameter: "voltage".into(),
 status: crate::model::EventStatus::Active,
 raised_at: Utc::now(),
 last_seen_at: Utc::now(),
 last_value: 5.0,
 acknowledged_by: None,
 acknowledged_note: None,
 cleared_at: None,
 }
 }

 #[tokio::test]
 async fn a_failing_channel_does_not_stop_the_others() {
 let calls_a = Arc::new(AtomicUsize::new(0));
 let calls_b = Arc::new(AtomicUsize::new(0));
 let channels: Vec<Box<dyn NotificationChannel>> = vec![
 Box::new(CountingChannel { calls: calls_a.clone(), fail: true }),
 Box::new(CountingChannel { calls: calls_b.clone(), fail: false }),
 ];
 dispatch(&channels, &sample_event(), Transition::Raised).await;
 assert_eq!(calls_a.load(Ordering::SeqCst), 1);
 assert_eq!(calls_b.load(Ordering::SeqCst), 1);
 }
}
