//! End-to-end HTTP surface tests against an in-process router with the
//! mock transport backend ("Concrete scenarios").

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use daq_alarm::AlarmEngine;
use daq_scheduler::Scheduler;
use daq_server::config::{Settings, TransportBackend};
use daq_server::routes;
use daq_server::state::{sampler_factory, telemetry_source, AppState, SchedulerDispatcher, EquipmentRegistry};
use daq_session::{ClientSessionRegistry, LockArbiter};
use daq_storage::StateStore;
use daq_stream::StreamMultiplexer;

async fn test_state() -> Arc<AppState> {
 let data_dir = tempfile::tempdir().unwrap().into_path();
 let storage = StateStore::new(&data_dir);
 storage.ensure_dirs().await.unwrap();

 let equipment = Arc::new(EquipmentRegistry::new());
 let locks = LockArbiter::new(300);
 let sessions = Arc::new(ClientSessionRegistry::new(locks.clone()));
 let command_timeout = Duration::from_millis(500);
 let streams = StreamMultiplexer::new(sampler_factory(equipment.clone(), command_timeout));
 let alarms = AlarmEngine::new(telemetry_source(equipment.clone()), Vec::new());
 let dispatcher = Arc::new(SchedulerDispatcher { equipment: equipment.clone(), command_timeout });
 let scheduler = Scheduler::new(dispatcher);

 let settings = Settings {
 listen: "127.0.0.1:0".into(),
 data_dir,
 transport: TransportBackend::Mock,
 command_timeout_ms: 500,
 lock_timeout_s: 300,
 enforce_locks: true,
 log_level: "error".into(),
 };

 Arc::new(AppState { settings, equipment, sessions, locks, streams, alarms, scheduler, storage })
}

async fn body_json(response: axum::response::Response) -> Value {
 let bytes = response.into_body().collect().await.unwrap().to_bytes();
 serde_json::from_slice(&bytes).unwrap()
}

async fn post(router: &axum::Router, path: &str, body: Value) -> (StatusCode, Value) {
 let req = Request::post(path)
.header("content-type", "application/json")
.body(Body::from(body.to_string()))
.unwrap();
 let resp = router.clone().oneshot(req).await.unwrap();
 let status = resp.status();
 (status, body_json(resp).await)
}

async fn get(router: &axum::Router, path: &str) -> (StatusCode, Value) {
 let req = Request::get(path).body(Body::empty()).unwrap();
 let resp = router.clone().oneshot(req).await.unwrap();
 let status = resp.status();
 (status, body_json(resp).await)
}

/// A mock power supply under a simulated 10 ohm load reports
/// voltage/current consistent with the CV law.
#[tokio::test]
async fn connect_lock_set_voltage_and_read_back() {
 let state = test_state().await;
 let router = routes::router(state.clone());

 let (status, connect) = post(
 &router,
 "/equipment/connect",
 json!({
 "resource_string": "mock://psu-1",
 "equipment_type": "power_supply",
 "model": "PSU-2400",
 "capabilities": {"max_voltage": 30.0, "max_current": 3.0, "channel_count": 1},
 }),
 )
.await;
 assert_eq!(status, StatusCode::OK);
 let equipment_id = connect["equipment_id"].as_str().unwrap().to_string();

 let (status, session) = post(&router, "/sessions", json!({"timeout_s": 300})).await;
 assert_eq!(status, StatusCode::OK);
 let session_id = session["session_id"].as_str().unwrap().to_string();

 let (status, acquire) = post(
 &router,
 "/locks/acquire",
 json!({"equipment_id": equipment_id, "session_id": session_id, "mode": "exclusive"}),
 )
.await;
 assert_eq!(status, StatusCode::OK);
 assert_eq!(acquire["outcome"], "locked");

 let (status, resp) = post(
 &router,
 &format!("/equipment/{equipment_id}/command"),
 json!({"command_id": "c1", "action": "set_voltage", "parameters": {"value": 5.0}, "session_id": session_id}),
 )
.await;
 assert_eq!(status, StatusCode::OK);
 assert_eq!(resp["success"], true);

 let (_, resp) = post(
 &router,
 &format!("/equipment/{equipment_id}/command"),
 json!({"command_id": "c2", "action": "set_current", "parameters": {"value": 3.0}, "session_id": session_id}),
 )
.await;
 assert_eq!(resp["success"], true);

 let (_, resp) = post(
 &router,
 &format!("/equipment/{equipment_id}/command"),
 json!({"command_id": "c3", "action": "set_output", "parameters": {"enabled": true}, "session_id": session_id}),
 )
.await;
 assert_eq!(resp["success"], true);

 let (_, resp) = post(
 &router,
 &format!("/equipment/{equipment_id}/command"),
 json!({"command_id": "c4", "action": "get_readings", "parameters": {}, "session_id": session_id}),
 )
.await;
 assert_eq!(resp["success"], true);
 let data = &resp["data"];
 assert_eq!(data["channels"][0]["mode"], "cv");
}

/// A control command from a session that doesn't hold the exclusive
/// lock fails `permission_denied` with the holder.
async fn connected_equipment(router: &axum::Router) -> String {
 let (_, connect) = post(
 router,
 "/equipment/connect",
 json!({"resource_string": "mock://psu-2", "equipment_type": "power_supply", "model": "PSU-2400"}),
 )
.await;
 connect["equipment_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn control_without_the_lock_is_permission_denied() {
 let state = test_state().await;
 let router = routes::router(state.clone());
 let equipment_id = connected_equipment(&router).await;

 let (_, session_a) = post(&router, "/sessions", json!({})).await;
 let session_a = session_a["session_id"].as_str().unwrap().to_string();
 let (_, session_b) = post(&router, "/sessions", json!({})).await;
 let session_b = session_b["session_id"].as_str().unwrap().to_string();

 let (status, acquire) = post(
 &router,
 "/locks/acquire",
 json!({"equipment_id": equipment_id, "session_id": session_a, "mode": "exclusive"}),
 )
.await;
 assert_eq!(status, StatusCode::OK);
 assert_eq!(acquire["outcome"], "locked");

 let (status, resp) = post(
 &router,
 &format!("/equipment/{equipment_id}/command"),
 json!({"command_id": "c1", "action": "set_voltage", "parameters": {"value": 1.0}, "session_id": session_b}),
 )
.await;
 assert_eq!(status, StatusCode::OK);
 assert_eq!(resp["success"], false);
 assert_eq!(resp["error"]["kind"], "permission_denied");
}

/// A queued exclusive request is promoted once the holder releases,
/// and the previous holder loses control.
#[tokio::test]
async fn queued_exclusive_is_promoted_on_release() {
 let state = test_state().await;
 let router = routes::router(state.clone());
 let equipment_id = connected_equipment(&router).await;

 let (_, session_a) = post(&router, "/sessions", json!({})).await;
 let session_a = session_a["session_id"].as_str().unwrap().to_string();
 let (_, session_b) = post(&router, "/sessions", json!({})).await;
 let session_b = session_b["session_id"].as_str().unwrap().to_string();

 post(&router, "/locks/acquire", json!({"equipment_id": equipment_id, "session_id": session_a, "mode": "exclusive"}))
.await;

 let (_, queued) = post(
 &router,
 "/locks/acquire",
 json!({"equipment_id": equipment_id, "session_id": session_b, "mode": "exclusive", "queue_if_busy": true}),
 )
.await;
 assert_eq!(queued["outcome"], "queued");
 assert_eq!(queued["position"], 0);

 post(&router, "/locks/release", json!({"equipment_id": equipment_id, "session_id": session_a})).await;

 assert!(state.locks.can_control(&equipment_id, &session_b));
 assert!(!state.locks.can_control(&equipment_id, &session_a));
}

/// Out-of-range input never reaches the wire: `bad_request`, not a
/// driver-level error ("Boundary behaviours").
#[tokio::test]
async fn set_voltage_above_capability_is_bad_request_before_any_wire_io() {
 let state = test_state().await;
 let router = routes::router(state.clone());
 let equipment_id = connected_equipment(&router).await;

 let (_, session) = post(&router, "/sessions", json!({})).await;
 let session_id = session["session_id"].as_str().unwrap().to_string();
 post(&router, "/locks/acquire", json!({"equipment_id": equipment_id, "session_id": session_id, "mode": "exclusive"}))
.await;

 let (status, resp) = post(
 &router,
 &format!("/equipment/{equipment_id}/command"),
 json!({"command_id": "c1", "action": "set_voltage", "parameters": {"value": 999.0}, "session_id": session_id}),
 )
.await;
 assert_eq!(status, StatusCode::OK);
 assert_eq!(resp["success"], false);
 assert_eq!(resp["error"]["kind"], "bad_request");
}

#[tokio::test]
async fn alarm_crud_round_trips_through_http() {
 let state = test_state().await;
 let router = routes::router(state.clone());
 let equipment_id = connected_equipment(&router).await;

 let (status, alarm) = post(
 &router,
 "/alarms",
 json!({
 "equipment_id": equipment_id,
 "parameter": "voltage",
 "kind": {"kind": "threshold_high", "hi": 10.0},
 "deadband": 0.5,
 "delay_seconds": 2.0,
 }),
 )
.await;
 assert_eq!(status, StatusCode::OK);
 let alarm_id = alarm["id"].as_str().unwrap().to_string();

 let (status, list) = get(&router, "/alarms").await;
 assert_eq!(status, StatusCode::OK);
 assert_eq!(list.as_array().unwrap().len(), 1);

 let req = Request::delete(format!("/alarms/{alarm_id}")).body(Body::empty()).unwrap();
 let resp = router.clone().oneshot(req).await.unwrap();
 assert_eq!(resp.status(), StatusCode::OK);

 let (_, list) = get(&router, "/alarms").await;
 assert_eq!(list.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn unknown_equipment_status_is_not_found() {
 let state = test_state().await;
 let router = routes::router(state);
 let req = Request::get("/equipment/does-not-exist/status").body(Body::empty()).unwrap();
 let resp = router.oneshot(req).await.unwrap();
 assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
