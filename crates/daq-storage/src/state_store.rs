use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::warn;

const EQUIPMENT_STATES_DIR: &str = "equipment_states";

/// A thin wrapper over a data directory. Each method is a single
/// read-or-write of one JSON file; there is no in-memory cache here —
/// callers (the alarm/scheduler/session crates) own the authoritative
/// in-memory state and use this only to persist and to bootstrap it at
/// startup.
#[derive(Debug, Clone)]
pub struct StateStore {
 data_dir: PathBuf,
}

impl StateStore {
 pub fn new(data_dir: impl Into<PathBuf>) -> Self {
 Self { data_dir: data_dir.into() }
 }

 pub fn data_dir(&self) -> &Path {
 &self.data_dir
 }

 /// Creates `equipment_states/` under the data directory if absent.
 pub async fn ensure_dirs(&self) -> anyhow::Result<()> {
 tokio::fs::create_dir_all(self.data_dir.join(EQUIPMENT_STATES_DIR)).await?;
 Ok(())
 }

 fn equipment_state_path(&self, equipment_id: &str, state_id: &str) -> PathBuf {
 self.data_dir
.join(EQUIPMENT_STATES_DIR)
.join(format!("{equipment_id}_{state_id}.json"))
 }

 pub async fn save_equipment_state(
 &self,
 equipment_id: &str,
 state_id: &str,
 state: &Value,
 ) -> anyhow::Result<()> {
 self.ensure_dirs().await?;
 let path = self.equipment_state_path(equipment_id, state_id);
 let bytes = serde_json::to_vec_pretty(state)?;
 tokio::fs::write(&path, bytes).await?;
 Ok(())
 }

 pub async fn load_equipment_state(
 &self,
 equipment_id: &str,
 state_id: &str,
 ) -> anyhow::Result<Option<Value>> {
 let path = self.equipment_state_path(equipment_id, state_id);
 match tokio::fs::read(&path).await {
 Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
 Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
 Err(e) => Err(e.into()),
 }
 }

 /// Lists the named state ids saved for `equipment_id`.
 pub async fn list_equipment_states(&self, equipment_id: &str) -> anyhow::Result<Vec<String>> {
 let dir = self.data_dir.join(EQUIPMENT_STATES_DIR);
 let mut out = Vec::new();
 let mut entries = match tokio::fs::read_dir(&dir).await {
 Ok(e) => e,
 Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
 Err(e) => return Err(e.into()),
 };
 let prefix = format!("{equipment_id}_");
 while let Some(entry) = entries.next_entry().await? {
 let name = entry.file_name().to_string_lossy().into_owned();
 if let Some(rest) = name.strip_prefix(&prefix) {
 if let Some(state_id) = rest.strip_suffix(".json") {
 out.push(state_id.to_string());
 }
 }
 }
 Ok(out)
 }

 /// Loads a top-level JSON array from `filename` under the data
 /// directory, skipping (and logging) any element that fails to
 /// deserialize as `T` rather than failing the whole load (
 /// "ignores malformed entries with a logged warning").
 pub async fn load_collection<T: DeserializeOwned>(&self, filename: &str) -> Vec<T> {
 let path = self.data_dir.join(filename);
 let bytes = match tokio::fs::read(&path).await {
 Ok(b) => b,
 Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
 Err(e) => {
 warn!(file = %path.display(), error = %e, "failed to read persisted collection");
 return Vec::new();
 }
 };
 let raw: Vec<Value> = match serde_json::from_slice(&bytes) {
 Ok(v) => v,
 Err(e) => {
 warn!(file = %path.display(), error = %e, "persisted collection is not a JSON array, ignoring");
 return Vec::new();
 }
 };
 raw.into_iter()
.filter_map(|entry| match serde_json::from_value::<T>(entry.clone()) {
 Ok(item) => Some(item),
 Err(e) => {
 warn!(file = %path.display(), error = %e, entry = %entry, "skipping malformed entry");
 None
 }
 })
.collect()
 }

 /// Overwrites `filename` with the JSON array serialisation of
 /// `items`.
 pub async fn save_collection<T: Serialize>(&self, filename: &str, items: &[T]) -> anyhow::Result<()> {
 tokio::fs::create_dir_all(self.data_dir()).await?;
 let path = self.data_dir.join(filename);
 let bytes = serde_json::to_vec_pretty(items)?;
 tokio::fs::write(&path, bytes).await?;
 Ok(())
 }
}

#[cfg(test)]
mod tests {
 use super::*;
 use serde::Deserialize;

 #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
 struct Thing {
 id: String,
 value: f64,
 }

 #[tokio::test]
 async fn round_trips_equipment_state() {
 let dir = tempfile::tempdir().unwrap();
 let store = StateStore::new(dir.path());
 let state = serde_json::json!({"voltage_set": 5.0});
 store.save_equipment_state("eq_1", "startup", &state).await.unwrap();
 let loaded = store.load_equipment_state("eq_1", "startup").await.unwrap();
 assert_eq!(loaded, Some(state));
 }

 #[tokio::test]
 async fn missing_equipment_state_is_none() {
 let dir = tempfile::tempdir().unwrap();
 let store = StateStore::new(dir.path());
 assert_eq!(store.load_equipment_state("eq_x", "s").await.unwrap(), None);
 }

 #[tokio::test]
 async fn collection_round_trips() {
 let dir = tempfile::tempdir().unwrap();
 let store = StateStore::new(dir.path());
 let items = vec![Thing { id: "a".into(), value: 1.0 }, Thing { id: "b".into(), value: 2.0 }];
 store.save_collection("alarms.json", &items).await.unwrap();
 let loaded: Vec<Thing> = store.load_collection("alarms.json").await;
 assert_eq!(loaded, items);
 }

 #[tokio::test]
 async fn malformed_entries_are_skipped_not_fatal() {
 let dir = tempfile::tempdir().unwrap();
 let path = dir.path().join("alarms.json");
 tokio::fs::write(&path, r#"[{"id":"a","value":1.0},{"id":"b"}]"#)
.await
.unwrap();
 let store = StateStore::new(dir.path());
 let loaded: Vec<Thing> = store.load_collection("alarms.json").await;
 assert_eq!(loaded, vec![Thing { id: "a".into(), value: 1.0 }]);
 }

 #[tokio::test]
 async fn list_equipment_states_filters_by_prefix() {
 let dir = tempfile::tempdir().unwrap();
 let store = StateStore::new(dir.path());
 store.save_equipment_state("eq_1", "a", &serde_json::json!({})).await.unwrap();
 store.save_equipment_state("eq_1", "b", &serde_json::json!({})).await.unwrap();
 store.save_equipment_state("eq_2", "c", &serde_json::json!({})).await.unwrap();
 let mut states = store.list_equipment_states("eq_1").await.unwrap();
 states.sort();
 assert_eq!(states, vec!["a".to_string(), "b".to_string()]);
 }
}
