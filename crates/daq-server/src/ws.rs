//! Duplex (WebSocket) handler: stream control/data messages (
//! "Duplex message surface"). One socket maps to one client session,
//! created on first connect unless an existing `session_id` is passed
//! as a query parameter and still alive.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use daq_proto::{ClientMessage, ServerMessage};

use crate::state::AppState;

/// Connection is closed once neither direction has produced traffic
/// for this long ("The channel is heartbeated").
const HEARTBEAT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
pub struct DuplexQuery {
 session_id: Option<String>,
}

pub async fn duplex_handler(
 ws: WebSocketUpgrade,
 Query(query): Query<DuplexQuery>,
 State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
 ws.on_upgrade(move |socket| handle_socket(socket, state, query.session_id))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, requested_session: Option<String>) {
 let session_id = match requested_session.filter(|id| state.sessions.lookup(id).is_some()) {
 Some(id) => id,
 None => state.sessions.create(None, None, 300, None),
 };
 debug!(session_id = %session_id, "duplex connection established");

 let queue = state.streams.register_subscriber(&session_id);
 let (mut sink, mut stream) = socket.split();
 let mut last_activity = Instant::now();

 loop {
 let idle_deadline = last_activity + HEARTBEAT_WINDOW;
 tokio::select! {
 incoming = stream.next() => {
 match incoming {
 Some(Ok(Message::Text(text))) => {
 last_activity = Instant::now();
 state.sessions.touch(&session_id);
 if let Some(reply) = dispatch_client_message(&state, &session_id, &text) {
 if send(&mut sink, reply).await.is_err() {
 break;
 }
 }
 }
 Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
 last_activity = Instant::now();
 }
 Some(Ok(Message::Close(_))) | None => break,
 Some(Ok(Message::Binary(_))) => {
 let err = ServerMessage::Error {
 error: daq_core::GatewayError::bad_request("binary frames are not supported"),
 };
 if send(&mut sink, err).await.is_err() {
 break;
 }
 }
 Some(Err(e)) => {
 warn!(session_id = %session_id, error = %e, "duplex read error");
 break;
 }
 }
 }
 sample = queue.recv() => {
 match sample {
 Some(msg) => {
 let reply = ServerMessage::StreamData {
 equipment_id: msg.equipment_id,
 stream_type: msg.stream_type,
 sampled_at: msg.sampled_at,
 data: msg.data,
 error: msg.error,
 };
 if send(&mut sink, reply).await.is_err() {
 break;
 }
 }
 None => break,
 }
 }
 _ = tokio::time::sleep_until(idle_deadline) => {
 debug!(session_id = %session_id, "duplex connection idle, closing");
 break;
 }
 }
 }

 state.streams.unregister_subscriber(&session_id);
 debug!(session_id = %session_id, "duplex connection closed");
}

/// Handles one parsed client message, returning the immediate reply if
/// any (stream data keeps arriving independently through the queue).
fn dispatch_client_message(state: &Arc<AppState>, session_id: &str, text: &str) -> Option<ServerMessage> {
 let msg: ClientMessage = match serde_json::from_str(text) {
 Ok(m) => m,
 Err(e) => {
 return Some(ServerMessage::Error {
 error: daq_core::GatewayError::bad_request(format!("malformed duplex message: {e}")),
 })
 }
 };

 Some(match msg {
 ClientMessage::StartStream { equipment_id, stream_type, interval_ms, params } => {
 match state.streams.start(session_id, &equipment_id, stream_type, interval_ms, params) {
 Ok(()) => ServerMessage::StreamStarted { equipment_id, stream_type },
 Err(error) => ServerMessage::Error { error },
 }
 }
 ClientMessage::StopStream { equipment_id, stream_type } => {
 state.streams.stop(session_id, &equipment_id, stream_type);
 ServerMessage::StreamStopped { equipment_id, stream_type }
 }
 ClientMessage::Resume => match state.streams.resume(session_id) {
 Ok(_restored) => ServerMessage::Pong,
 Err(error) => ServerMessage::Error { error },
 },
 ClientMessage::Ping => ServerMessage::Pong,
 })
}

async fn send(
 sink: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
 msg: ServerMessage,
) -> Result<(), axum::Error> {
 let text = serde_json::to_string(&msg).unwrap_or_else(|_| "{\"type\":\"error\"}".to_string());
 sink.send(Message::Text(text)).await
}
