//! In-process fake board server for integration tests.
//!
//! Serves the three snapshot endpoints and a STOMP-over-WebSocket endpoint
//! on an ephemeral port. Tests seed boards, publish envelopes to topics,
//! drop live sockets, and wait on connection statistics.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use retroboard_client::stomp::{parse_frame, StompCommand, StompFrame};
use retroboard_client::{BoardSession, ReconnectConfig, StaticToken, SyncConfig};
use retroboard_core::envelope::Envelope;
use retroboard_core::topics::EventTopic;
use retroboard_store::BoardSnapshot;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Upper bound for every `wait_*` helper.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Counters observed by the fake server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    /// Successful STOMP handshakes.
    pub handshakes: usize,
    /// Handshakes answered with an ERROR frame.
    pub rejected: usize,
    /// Sockets that have ended, for any reason.
    pub closed: usize,
    pub subscribe_frames: usize,
    pub unsubscribe_frames: usize,
    pub disconnect_frames: usize,
    /// Subscriptions currently registered across all live sockets.
    pub active_subscriptions: usize,
    /// REST snapshot requests served (including failures).
    pub rest_requests: usize,
}

#[derive(Debug, Clone)]
enum Outbound {
    Publish { destination: String, body: String },
    DropAll,
}

struct ServerState {
    token: Mutex<Option<String>>,
    boards: Mutex<HashMap<String, BoardSnapshot>>,
    rest_failure: Mutex<Option<StatusCode>>,
    rest_delay: Mutex<Option<Duration>>,
    outbound: broadcast::Sender<Outbound>,
    stats: watch::Sender<Stats>,
}

impl ServerState {
    fn bump(&self, update: impl FnOnce(&mut Stats)) {
        self.stats.send_modify(update);
    }

    fn authorized(&self, presented: Option<&str>) -> bool {
        match self.token.lock().unwrap().as_deref() {
            None => true,
            Some(expected) => presented
                .and_then(|v| v.strip_prefix("Bearer "))
                .is_some_and(|t| t == expected),
        }
    }
}

pub struct FakeBoardServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    task: JoinHandle<()>,
}

impl FakeBoardServer {
    /// Start a server that requires `token` (or nothing, when `None`).
    pub async fn start(token: Option<&str>) -> Self {
        let (outbound, _) = broadcast::channel(64);
        let (stats, _) = watch::channel(Stats::default());
        let state = Arc::new(ServerState {
            token: Mutex::new(token.map(str::to_string)),
            boards: Mutex::new(HashMap::new()),
            rest_failure: Mutex::new(None),
            rest_delay: Mutex::new(None),
            outbound,
            stats,
        });

        let app = Router::new()
            .route("/api/team/{team}/{resource}", get(get_collection))
            .route("/websocket", get(ws_handler))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state, task }
    }

    pub fn api_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/websocket", self.addr)
    }

    /// Config pointing at this server, with fast reconnects.
    pub fn config(&self) -> SyncConfig {
        SyncConfig {
            api_url: self.api_url(),
            ws_url: self.ws_url(),
            request_timeout: Duration::from_secs(5),
            reconnect: ReconnectConfig {
                initial_delay: Duration::from_millis(20),
                max_delay: Duration::from_millis(200),
                multiplier: 2.0,
            },
            resnapshot_on_reconnect: true,
        }
    }

    pub fn session(&self, token: Option<&str>) -> BoardSession {
        self.session_with(self.config(), token)
    }

    pub fn session_with(&self, config: SyncConfig, token: Option<&str>) -> BoardSession {
        let tokens = Arc::new(StaticToken::new(token.map(str::to_string)));
        BoardSession::new(&config, tokens).unwrap()
    }

    /// Replace what the REST endpoints return for `team_id`.
    pub fn seed(&self, team_id: &str, board: BoardSnapshot) {
        self.state
            .boards
            .lock()
            .unwrap()
            .insert(team_id.to_string(), board);
    }

    /// Make every REST call answer `status` until cleared with `None`.
    pub fn fail_rest(&self, status: Option<StatusCode>) {
        *self.state.rest_failure.lock().unwrap() = status;
    }

    /// Hold every REST response this long after the board has been read.
    pub fn delay_rest(&self, delay: Option<Duration>) {
        *self.state.rest_delay.lock().unwrap() = delay;
    }

    pub fn set_token(&self, token: Option<&str>) {
        *self.state.token.lock().unwrap() = token.map(str::to_string);
    }

    pub fn publish(&self, topic: EventTopic, team_id: &str, envelope: &Envelope) {
        self.publish_raw(topic, team_id, &serde_json::to_string(envelope).unwrap());
    }

    /// Publish an arbitrary body, well-formed or not.
    pub fn publish_raw(&self, topic: EventTopic, team_id: &str, body: &str) {
        let _ = self.state.outbound.send(Outbound::Publish {
            destination: topic.destination(team_id),
            body: body.to_string(),
        });
    }

    /// Kill every live socket without a STOMP goodbye.
    pub fn drop_connections(&self) {
        let _ = self.state.outbound.send(Outbound::DropAll);
    }

    pub fn stats(&self) -> Stats {
        self.state.stats.borrow().clone()
    }

    /// Wait until the server statistics satisfy `predicate`.
    pub async fn wait_for_stats(&self, predicate: impl FnMut(&Stats) -> bool) -> Stats {
        let mut rx = self.state.stats.subscribe();
        let stats = tokio::time::timeout(WAIT_TIMEOUT, rx.wait_for(predicate))
            .await
            .expect("timed out waiting for server stats")
            .expect("stats channel closed");
        stats.clone()
    }
}

impl Drop for FakeBoardServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ---------------------------------------------------------------------------
// REST
// ---------------------------------------------------------------------------

async fn get_collection(
    State(state): State<Arc<ServerState>>,
    Path((team, resource)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    // Read before counting, so a counted request has already seen the board.
    let board = state
        .boards
        .lock()
        .unwrap()
        .get(&team)
        .cloned()
        .unwrap_or_default();
    state.bump(|s| s.rest_requests += 1);

    let presented = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if !state.authorized(presented) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if let Some(status) = *state.rest_failure.lock().unwrap() {
        return (status, "snapshot unavailable").into_response();
    }

    let delay = *state.rest_delay.lock().unwrap();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    match resource.as_str() {
        "thoughts" => Json(board.thoughts).into_response(),
        "action-item" => Json(board.action_items).into_response(),
        "columns" => Json(board.column_titles).into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

// ---------------------------------------------------------------------------
// STOMP over WebSocket
// ---------------------------------------------------------------------------

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<ServerState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<ServerState>) {
    let (mut sink, mut stream) = socket.split();
    let mut outbound = state.outbound.subscribe();
    let mut subscriptions: HashMap<String, String> = HashMap::new();
    let mut message_seq = 0u64;

    loop {
        tokio::select! {
            msg = stream.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                };
                let Ok(Some(frame)) = parse_frame(text.as_str()) else {
                    continue;
                };
                match frame.command {
                    StompCommand::Connect | StompCommand::Stomp => {
                        if state.authorized(frame.header("Authorization")) {
                            let reply = StompFrame::connected("1.2").with_header("session", "fake");
                            if sink.send(Message::Text(reply.encode().into())).await.is_err() {
                                break;
                            }
                            state.bump(|s| s.handshakes += 1);
                        } else {
                            let reply = StompFrame::error("Invalid token");
                            let _ = sink.send(Message::Text(reply.encode().into())).await;
                            state.bump(|s| s.rejected += 1);
                            break;
                        }
                    }
                    StompCommand::Subscribe => {
                        let (Some(id), Some(destination)) =
                            (frame.header("id"), frame.header("destination"))
                        else {
                            continue;
                        };
                        let added = subscriptions
                            .insert(id.to_string(), destination.to_string())
                            .is_none();
                        state.bump(|s| {
                            s.subscribe_frames += 1;
                            if added {
                                s.active_subscriptions += 1;
                            }
                        });
                    }
                    StompCommand::Unsubscribe => {
                        let removed = frame
                            .header("id")
                            .and_then(|id| subscriptions.remove(id))
                            .is_some();
                        state.bump(|s| {
                            s.unsubscribe_frames += 1;
                            if removed {
                                s.active_subscriptions -= 1;
                            }
                        });
                    }
                    StompCommand::Disconnect => {
                        state.bump(|s| s.disconnect_frames += 1);
                        break;
                    }
                    _ => {}
                }
            }

            out = outbound.recv() => {
                match out {
                    Ok(Outbound::Publish { destination, body }) => {
                        for (id, dest) in &subscriptions {
                            if *dest != destination {
                                continue;
                            }
                            message_seq += 1;
                            let frame = StompFrame::message(
                                &destination,
                                id,
                                &message_seq.to_string(),
                                &body,
                            );
                            if sink.send(Message::Text(frame.encode().into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(Outbound::DropAll) | Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                }
            }
        }
    }

    let remaining = subscriptions.len();
    state.bump(|s| {
        s.active_subscriptions -= remaining;
        s.closed += 1;
    });
}
