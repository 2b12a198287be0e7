//! HTTP handlers for the equipment, session, lock, alarm, and
//! scheduler surfaces. The duplex (WebSocket) surface lives
//! in [`crate::ws`].

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use daq_alarm::{AlarmDefinition, AlarmEvent, AlarmKind, AlarmPatch, AlarmStatistics, EventFilter, EventStatus, NewAlarm};
use daq_core::InstrumentType;
use daq_proto::{
 CommandRequest, CommandResponse, ConnectRequest, ConnectResponse, DiscoverResponse, DisconnectResponse,
 EquipmentIdentityDto, EquipmentStatusResponse, LockModeDto, LockRequest, LockResponse,
};
use daq_scheduler::{JobPatch, NewJob, Schedule, ScheduledJob};
use daq_session::{AcquireOutcome, LockMode, QueueEntry, ReleaseOutcome};

use crate::drivers;
use crate::error_response::{ApiError, ApiResult};
use crate::state::AppState;
use crate::ws::duplex_handler;

pub fn router(state: Arc<AppState>) -> Router {
 Router::new()
.route("/stream", get(duplex_handler))
.route("/equipment", get(list_equipment))
.route("/equipment/discover", post(discover))
.route("/equipment/connect", post(connect))
.route("/equipment/:id", get(equipment_identity))
.route("/equipment/:id/disconnect", post(disconnect))
.route("/equipment/:id/status", get(equipment_status))
.route("/equipment/:id/command", post(command))
.route("/equipment/:id/state/:state_id", post(save_state))
.route("/equipment/:id/state/:state_id/restore", post(restore_state))
.route("/sessions", post(create_session))
.route("/sessions/:id", delete(end_session))
.route("/sessions/:id/touch", post(touch_session))
.route("/locks/acquire", post(acquire_lock))
.route("/locks/release", post(release_lock))
.route("/locks/:equipment_id/queue", get(lock_queue))
.route("/alarms", get(list_alarms).post(create_alarm))
.route("/alarms/statistics", get(alarm_statistics))
.route("/alarms/events", get(list_events))
.route("/alarms/events/:event_id/acknowledge", post(acknowledge_event))
.route("/alarms/:id", patch(update_alarm).delete(delete_alarm))
.route("/alarms/:id/enable", post(enable_alarm))
.route("/alarms/:id/disable", post(disable_alarm))
.route("/alarms/:id/clear", post(clear_alarm))
.route("/jobs", get(list_jobs).post(create_job))
.route("/jobs/:id", patch(update_job).delete(delete_job))
.route("/jobs/:id/enable", post(enable_job))
.route("/jobs/:id/disable", post(disable_job))
.route("/jobs/:id/next_fire", get(job_next_fire))
.with_state(state)
}

// ---- Equipment ----------------------------------------------------

async fn list_equipment(State(state): State<Arc<AppState>>) -> Json<Vec<EquipmentIdentityDto>> {
 let out = state
.equipment
.iter()
.map(|e| identity_dto(e.value().identity()))
.collect();
 Json(out)
}

/// The mock backend has no physical bus to enumerate, so discovery
/// returns a small fixed catalogue of resource strings a caller can
/// connect to (`POST /equipment/discover`).
async fn discover(State(state): State<Arc<AppState>>) -> Json<DiscoverResponse> {
 let catalogue = [
 "mock://psu-1",
 "mock://load-1",
 "mock://scope-1",
 "mock://dmm-1",
 "mock://fgen-1",
 "mock://specan-1",
 ];
 let resources = catalogue
.into_iter()
.filter(|r| !state.equipment.iter().any(|e| e.value().identity().transport.resource_string() == *r))
.map(str::to_string())
.collect();
 Json(DiscoverResponse { resources })
}

async fn connect(State(state): State<Arc<AppState>>, Json(req): Json<ConnectRequest>) -> ApiResult<Json<ConnectResponse>> {
 let transport = drivers::parse_resource_string(&req.resource_string)?;
 let capabilities = req.capabilities.unwrap_or_else(|| drivers::default_capabilities(req.equipment_type));
 let identity = daq_core::InstrumentIdentity::new(
 req.equipment_type,
 vendor_for(req.equipment_type),
 req.model.clone(),
 format!("SN-{}", &identity_suffix(&req.resource_string)),
 "1.0.0",
 transport,
 capabilities.clone(),
 );

 if state.equipment.contains_key(&identity.id) {
 return Err(ApiError(daq_core::GatewayError::conflict(
 "equipment is already connected",
 "existing connection",
 )));
 }

 let driver = drivers::build_driver(state.settings.transport, req.equipment_type, &req.model, capabilities, None)?;
 let handle = daq_session::SessionWorker::spawn(identity.clone(), driver, daq_session::worker::DEFAULT_QUEUE_CAPACITY);
 state.equipment.insert(identity.id.clone(), handle);

 Ok(Json(ConnectResponse { equipment_id: identity.id, status: "connected" }))
}

fn vendor_for(instrument_type: InstrumentType) -> &'static str {
 match instrument_type {
 InstrumentType::PowerSupply => "Keysight",
 InstrumentType::ElectronicLoad => "Chroma",
 InstrumentType::Oscilloscope => "Rigol",
 InstrumentType::Multimeter => "Keysight",
 InstrumentType::FunctionGenerator => "Siglent",
 InstrumentType::SpectrumAnalyzer => "Rohde & Schwarz",
 }
}

fn identity_suffix(resource_string: &str) -> String {
 resource_string.rsplit(['/', ':', '@']).next().unwrap_or(resource_string).to_string()
}

fn identity_dto(identity: daq_core::InstrumentIdentity) -> EquipmentIdentityDto {
 EquipmentIdentityDto {
 equipment_id: identity.id,
 instrument_type: identity.instrument_type,
 vendor: identity.vendor,
 model: identity.model,
 serial: identity.serial,
 firmware: identity.firmware,
 capabilities: identity.capabilities,
 }
}

async fn equipment_identity(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Json<EquipmentIdentityDto>> {
 Ok(Json(identity_dto(state.identity(&id)?)))
}

async fn disconnect(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Json<DisconnectResponse>> {
 state.disconnect(&id).await?;
 Ok(Json(DisconnectResponse { equipment_id: id, status: "disconnected" }))
}

async fn equipment_status(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Json<EquipmentStatusResponse>> {
 let identity = state.identity(&id)?;
 let telemetry = state.telemetry(&id)?;
 Ok(Json(EquipmentStatusResponse {
 connected: telemetry.connected,
 firmware_version: identity.firmware,
 capabilities: identity.capabilities,
 telemetry: serde_json::to_value(&telemetry).unwrap_or(Value::Null),
 }))
}

async fn command(
 State(state): State<Arc<AppState>>,
 Path(id): Path<String>,
 Json(req): Json<CommandRequest>,
) -> Json<CommandResponse> {
 match state.execute_command(&id, req.operation, req.session_id).await {
 Ok(value) => Json(CommandResponse::ok(req.command_id, value)),
 Err(e) => Json(CommandResponse::err(req.command_id, e)),
 }
}

async fn save_state(State(state): State<Arc<AppState>>, Path((id, state_id)): Path<(String, String)>) -> ApiResult<Json<Value>> {
 state.save_equipment_state(&id, &state_id).await?;
 Ok(Json(serde_json::json!({"status": "saved"})))
}

async fn restore_state(State(state): State<Arc<AppState>>, Path((id, state_id)): Path<(String, String)>) -> ApiResult<Json<Value>> {
 state.restore_equipment_state(&id, &state_id).await?;
 Ok(Json(serde_json::json!({"status": "restored"})))
}

// ---- Client sessions ------------------------------------------------

#[derive(Debug, Deserialize)]
struct CreateSessionRequest {
 #[serde(default)]
 client_name: Option<String>,
 #[serde(default)]
 origin: Option<String>,
 #[serde(default = "default_session_timeout")]
 timeout_s: u64,
 #[serde(default)]
 metadata: Option<Value>,
}

fn default_session_timeout() -> u64 {
 300
}

#[derive(Debug, Serialize)]
struct CreateSessionResponse {
 session_id: String,
}

async fn create_session(State(state): State<Arc<AppState>>, Json(req): Json<CreateSessionRequest>) -> Json<CreateSessionResponse> {
 let session_id = state.sessions.create(req.client_name, req.origin, req.timeout_s, req.metadata);
 Json(CreateSessionResponse { session_id })
}

async fn end_session(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
 if !state.end_session(&id) {
 return Err(ApiError(daq_core::GatewayError::not_found("unknown session id")));
 }
 Ok(Json(serde_json::json!({"status": "ended"})))
}

async fn touch_session(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
 if !state.sessions.touch(&id) {
 return Err(ApiError(daq_core::GatewayError::not_found("unknown session id")));
 }
 Ok(Json(serde_json::json!({"status": "touched"})))
}

// ---- Locks ----------------------------------------------------------

async fn acquire_lock(State(state): State<Arc<AppState>>, Json(req): Json<LockRequest>) -> ApiResult<Json<LockResponse>> {
 let mode = match req.mode {
 LockModeDto::Exclusive => LockMode::Exclusive,
 LockModeDto::Observer => LockMode::Observer,
 };
 let outcome = state.acquire_lock(&req.equipment_id, &req.session_id, mode, req.timeout_s, req.queue_if_busy)?;
 Ok(Json(match outcome {
 AcquireOutcome::Locked => LockResponse { outcome: "locked".into(), position: None, holder_session_id: None },
 AcquireOutcome::Refreshed => LockResponse { outcome: "refreshed".into(), position: None, holder_session_id: None },
 AcquireOutcome::Observer => LockResponse { outcome: "observer".into(), position: None, holder_session_id: None },
 AcquireOutcome::Queued { position } => {
 LockResponse { outcome: "queued".into(), position: Some(position), holder_session_id: state.locks.holder(&req.equipment_id) }
 }
 }))
}

#[derive(Debug, Deserialize)]
struct ReleaseLockRequest {
 equipment_id: String,
 session_id: String,
}

async fn release_lock(State(state): State<Arc<AppState>>, Json(req): Json<ReleaseLockRequest>) -> ApiResult<Json<Value>> {
 let outcome = state.locks.release(&req.equipment_id, &req.session_id, false)?;
 Ok(Json(serde_json::json!({"released": outcome == ReleaseOutcome::Released})))
}

async fn lock_queue(State(state): State<Arc<AppState>>, Path(equipment_id): Path<String>) -> Json<Vec<QueueEntry>> {
 Json(state.locks.queue_entries(&equipment_id))
}

// ---- Alarms -----------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CreateAlarmRequest {
 equipment_id: String,
 parameter: String,
 kind: AlarmKind,
 #[serde(default)]
 deadband: f64,
 #[serde(default)]
 delay_seconds: f64,
 #[serde(default = "default_true")]
 auto_clear: bool,
 #[serde(default)]
 description: Option<String>,
}

fn default_true() -> bool {
 true
}

async fn list_alarms(State(state): State<Arc<AppState>>) -> Json<Vec<AlarmDefinition>> {
 Json(state.alarms.list_alarms())
}

async fn create_alarm(State(state): State<Arc<AppState>>, Json(req): Json<CreateAlarmRequest>) -> ApiResult<Json<AlarmDefinition>> {
 let def = state.alarms.create(NewAlarm {
 equipment_id: req.equipment_id,
 parameter: req.parameter,
 kind: req.kind,
 deadband: req.deadband,
 delay_seconds: req.delay_seconds,
 auto_clear: req.auto_clear,
 description: req.description,
 })?;
 state.persist_alarms().await;
 Ok(Json(def))
}

async fn update_alarm(State(state): State<Arc<AppState>>, Path(id): Path<String>, Json(patch): Json<AlarmPatch>) -> ApiResult<Json<AlarmDefinition>> {
 let def = state.alarms.update(&id, patch)?;
 state.persist_alarms().await;
 Ok(Json(def))
}

async fn delete_alarm(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
 state.alarms.delete(&id)?;
 state.persist_alarms().await;
 Ok(Json(serde_json::json!({"status": "deleted"})))
}

async fn enable_alarm(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
 state.alarms.enable(&id)?;
 state.persist_alarms().await;
 Ok(Json(serde_json::json!({"status": "enabled"})))
}

async fn disable_alarm(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
 state.alarms.disable(&id)?;
 state.persist_alarms().await;
 Ok(Json(serde_json::json!({"status": "disabled"})))
}

async fn clear_alarm(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Json<AlarmEvent>> {
 Ok(Json(state.alarms.clear(&id).await?))
}

async fn alarm_statistics(State(state): State<Arc<AppState>>) -> Json<AlarmStatistics> {
 Json(state.alarms.statistics())
}

#[derive(Debug, Deserialize)]
struct EventFilterQuery {
 equipment_id: Option<String>,
 alarm_id: Option<String>,
 status: Option<EventStatus>,
}

async fn list_events(State(state): State<Arc<AppState>>, Query(q): Query<EventFilterQuery>) -> Json<Vec<AlarmEvent>> {
 let filter = EventFilter { equipment_id: q.equipment_id, alarm_id: q.alarm_id, status: q.status };
 Json(state.alarms.list_events(&filter))
}

#[derive(Debug, Deserialize)]
struct AcknowledgeRequest {
 actor: String,
 #[serde(default)]
 note: Option<String>,
}

async fn acknowledge_event(
 State(state): State<Arc<AppState>>,
 Path(event_id): Path<String>,
 Json(req): Json<AcknowledgeRequest>,
) -> ApiResult<Json<AlarmEvent>> {
 Ok(Json(state.alarms.acknowledge(&event_id, req.actor, req.note).await?))
}

// ---- Scheduler --------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CreateJobRequest {
 equipment_id: String,
 operation: daq_driver::Operation,
 schedule: Schedule,
}

async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<Vec<ScheduledJob>> {
 Json(state.scheduler.list_jobs())
}

async fn create_job(State(state): State<Arc<AppState>>, Json(req): Json<CreateJobRequest>) -> ApiResult<Json<ScheduledJob>> {
 let job = state.scheduler.create(NewJob { equipment_id: req.equipment_id, operation: req.operation, schedule: req.schedule })?;
 state.persist_jobs().await;
 Ok(Json(job))
}

#[derive(Debug, Deserialize, Default)]
struct UpdateJobRequest {
 operation: Option<daq_driver::Operation>,
 schedule: Option<Schedule>,
}

async fn update_job(State(state): State<Arc<AppState>>, Path(id): Path<String>, Json(req): Json<UpdateJobRequest>) -> ApiResult<Json<ScheduledJob>> {
 let job = state.scheduler.update(&id, JobPatch { operation: req.operation, schedule: req.schedule })?;
 state.persist_jobs().await;
 Ok(Json(job))
}

async fn delete_job(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
 state.scheduler.delete(&id)?;
 state.persist_jobs().await;
 Ok(Json(serde_json::json!({"status": "deleted"})))
}

async fn enable_job(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
 state.scheduler.enable(&id)?;
 state.persist_jobs().await;
 Ok(Json(serde_json::json!({"status": "enabled"})))
}

async fn disable_job(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
 state.scheduler.disable(&id)?;
 state.persist_jobs().await;
 Ok(Json(serde_json::json!({"status": "disabled"})))
}

async fn job_next_fire(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
 let next = state.scheduler.next_fire(&id)?;
 Ok(Json(serde_json::json!({"next_fire_at": next})))
}
