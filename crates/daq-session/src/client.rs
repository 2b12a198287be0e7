//! Client Session Registry: tracks connected clients and associates
//! locks with a session.

use crate::lock::LockArbiter;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSession {
 pub session_id: String,
 pub client_name: Option<String>,
 pub origin: Option<String>,
 pub created_at: DateTime<Utc>,
 pub last_activity: DateTime<Utc>,
 pub timeout_s: u64,
 #[serde(default)]
 pub metadata: Value,
}

impl ClientSession {
 pub fn expired(&self, now: DateTime<Utc>) -> bool {
 self.timeout_s > 0
 && now.signed_duration_since(self.last_activity).num_seconds() >= self.timeout_s as i64
 }
}

/// Tracks connected clients; ending a session releases all its locks
/// (delegated to a shared [`LockArbiter`]). Stream unsubscription on
/// end is the caller's (gateway's) responsibility since the multiplexer
/// lives in a separate crate with no dependency on this one.
pub struct ClientSessionRegistry {
 sessions: DashMap<String, ClientSession>,
 locks: Arc<LockArbiter>,
}

impl ClientSessionRegistry {
 pub fn new(locks: Arc<LockArbiter>) -> Self {
 Self { sessions: DashMap::new(), locks }
 }

 pub fn create(
 &self,
 client_name: Option<String>,
 origin: Option<String>,
 timeout_s: u64,
 metadata: Option<Value>,
 ) -> String {
 let session_id = format!("sess_{}", Uuid::new_v4().simple());
 let now = Utc::now();
 self.sessions.insert(
 session_id.clone(),
 ClientSession {
 session_id: session_id.clone(),
 client_name,
 origin,
 created_at: now,
 last_activity: now,
 timeout_s,
 metadata: metadata.unwrap_or(Value::Null),
 },
 );
 info!(session_id = %session_id, "client session created");
 session_id
 }

 pub fn lookup(&self, session_id: &str) -> Option<ClientSession> {
 self.sessions.get(session_id).map(|s| s.clone())
 }

 pub fn touch(&self, session_id: &str) -> bool {
 if let Some(mut s) = self.sessions.get_mut(session_id) {
 s.last_activity = Utc::now();
 true
 } else {
 false
 }
 }

 /// Ends a session: releases all its locks and removes the record.
 /// Returns false if the session didn't exist.
 pub fn end(&self, session_id: &str) -> bool {
 let existed = self.sessions.remove(session_id).is_some();
 if existed {
 self.locks.release_all_for(session_id);
 info!(session_id = %session_id, "client session ended");
 }
 existed
 }

 /// Sweeps and ends every session whose timeout has elapsed,
 /// returning the ids ended.
 pub fn cleanup_expired(&self) -> Vec<String> {
 let now = Utc::now();
 let expired: Vec<String> = self
.sessions
.iter()
.filter(|e| e.expired(now))
.map(|e| e.session_id.clone())
.collect();
 for id in &expired {
 self.end(id);
 }
 expired
 }

 pub fn count(&self) -> usize {
 self.sessions.len()
 }
}

#[cfg(test)]
mod tests {
 use super::*;

 fn registry() -> ClientSessionRegistry {
 ClientSessionRegistry::new(LockArbiter::new(300))
 }

 #[test]
 fn create_and_lookup_round_trips() {
 let reg = registry();
 let id = reg.create(Some("bench-1".into()), None, 600, None);
 let session = reg.lookup(&id).unwrap();
 assert_eq!(session.client_name.as_deref(), Some("bench-1"));
 }

 #[test]
 fn ending_session_releases_its_locks() {
 let locks = LockArbiter::new(300);
 let reg = ClientSessionRegistry::new(locks.clone());
 let id = reg.create(None, None, 600, None);
 locks.acquire("eq_1", &id, crate::lock::LockMode::Exclusive, 300, false).unwrap();
 assert!(locks.can_control("eq_1", &id));

 reg.end(&id);
 assert!(!locks.can_control("eq_1", &id));
 assert!(reg.lookup(&id).is_none());
 }

 #[test]
 fn cleanup_expired_removes_timed_out_sessions() {
 let reg = registry();
 let id = reg.create(None, None, 0, None);
 {
 let mut s = reg.sessions.get_mut(&id).unwrap();
 s.timeout_s = 1;
 s.last_activity = Utc::now() - chrono::Duration::seconds(10);
 }
 let expired = reg.cleanup_expired();
 assert_eq!(expired, vec![id]);
 }

 #[test]
 fn zero_timeout_session_never_expires() {
 let reg = registry();
 let id = reg.create(None, None, 0, None);
 {
 let mut s = reg.sessions.get_mut(&id).unwrap();
 s.last_activity = Utc::now() - chrono::Duration::seconds(100_000);
 }
 let expired = reg.cleanup_expired();
 assert!(expired.is_empty());
 }
}
