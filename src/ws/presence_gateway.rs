use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{
    ClientMessage, ErrorMessage, HeartbeatMessage, JoinCaseMessage, LeaveCaseMessage,
    ServerMessage, ViewersUpdatedMessage,
};
use crate::relay::CountUpdate;
use crate::store::StoreError;
use crate::AppState;

/// Outbound queue depth per connection.
const OUTBOUND_CAPACITY: usize = 64;

#[derive(Debug)]
pub enum GatewayError {
    Validation(String),
    Store(StoreError),
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayError::Validation(msg) => write!(f, "{}", msg),
            GatewayError::Store(e) => write!(f, "{}", e),
        }
    }
}

impl From<StoreError> for GatewayError {
    fn from(e: StoreError) -> Self {
        GatewayError::Store(e)
    }
}

/// What the connection remembers about its own viewer, so disconnects can be
/// cleaned up. The backing store stays authoritative; this is only a shadow.
#[derive(Clone, Debug)]
struct ViewerShadow {
    case_reference: String,
    session_id: String,
    user_id: String,
}

/// Presence WebSocket handler
pub async fn presence_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    info!("New presence connection attempt");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle one presence connection from upgrade to close.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let connection_id = Uuid::new_v4().to_string();
    state.n_connections.fetch_add(1, Ordering::Relaxed);
    info!("Presence connection established with connection_id: {}", connection_id);

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Single writer task drains the outbound queue, so event handlers and
    // the room forwarder never contend on the socket sink.
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(OUTBOUND_CAPACITY);
    let mut writer_task = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if ws_tx.send(msg).await.is_err() {
                break;
            }
        }
    });

    let mut session = PresenceSession::new(state.clone(), connection_id.clone(), outbound_tx);

    loop {
        tokio::select! {
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => session.handle_text(&text).await,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!("Presence socket error on connection {}: {}", connection_id, e);
                        break;
                    }
                }
            }
            _ = &mut writer_task => break,
        }
    }

    session.cleanup().await;
    writer_task.abort();
    state.n_connections.fetch_sub(1, Ordering::Relaxed);
    info!("Presence connection {} terminated", connection_id);
}

/// Per-connection event state machine: Connected, optionally Viewing(case),
/// then Disconnected. A socket moves between cases only via an explicit
/// leave-then-join sequence driven by the client.
struct PresenceSession {
    state: Arc<AppState>,
    connection_id: String,
    outbound: mpsc::Sender<Message>,
    shadow: Option<ViewerShadow>,
    forward_task: Option<JoinHandle<()>>,
}

impl PresenceSession {
    fn new(state: Arc<AppState>, connection_id: String, outbound: mpsc::Sender<Message>) -> Self {
        Self {
            state,
            connection_id,
            outbound,
            shadow: None,
            forward_task: None,
        }
    }

    /// Parse and dispatch one incoming frame. Failures are answered with an
    /// `error` message; nothing here may tear down the socket.
    async fn handle_text(&mut self, text: &str) {
        let message: ClientMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Malformed presence message on connection {}: {}", self.connection_id, e);
                self.send_error(format!("malformed message: {}", e)).await;
                return;
            }
        };

        let result = match message {
            ClientMessage::JoinCase(join) => self.handle_join(join).await,
            ClientMessage::Heartbeat(heartbeat) => self.handle_heartbeat(heartbeat).await,
            ClientMessage::LeaveCase(leave) => self.handle_leave(leave).await,
        };

        if let Err(e) = result {
            warn!("Presence event failed on connection {}: {}", self.connection_id, e);
            self.send_error(e.to_string()).await;
        }
    }

    async fn handle_join(&mut self, join: JoinCaseMessage) -> Result<(), GatewayError> {
        require_field(&join.case_reference, "caseReference")?;
        require_field(&join.session_id, "sessionId")?;
        require_field(&join.user_id, "userId")?;

        if let Some(shadow) = &self.shadow {
            if shadow.case_reference != join.case_reference {
                return Err(GatewayError::Validation(format!(
                    "already viewing case {}; send leave-case first",
                    shadow.case_reference
                )));
            }
        }

        self.state
            .registry
            .add_viewer(&join.case_reference, &join.user_id, &join.session_id)
            .await?;

        // Re-joining the same case replaces the previous subscription, so a
        // duplicate join never double-delivers broadcasts.
        if let Some(task) = self.forward_task.take() {
            task.abort();
        }
        let room_rx = self.state.rooms.subscribe(&join.case_reference).await;
        self.forward_task = Some(spawn_forwarder(
            room_rx,
            self.outbound.clone(),
            self.connection_id.clone(),
        ));

        self.shadow = Some(ViewerShadow {
            case_reference: join.case_reference.clone(),
            session_id: join.session_id.clone(),
            user_id: join.user_id.clone(),
        });

        debug!(
            "Connection {} joined case {} as session {}",
            self.connection_id, join.case_reference, join.session_id
        );

        self.broadcast_count(&join.case_reference).await
    }

    async fn handle_heartbeat(&mut self, heartbeat: HeartbeatMessage) -> Result<(), GatewayError> {
        require_field(&heartbeat.case_reference, "caseReference")?;
        require_field(&heartbeat.session_id, "sessionId")?;

        let refreshed = self
            .state
            .registry
            .refresh_heartbeat(&heartbeat.case_reference, &heartbeat.session_id)
            .await?;

        if !refreshed {
            // The record lapsed between heartbeats. Re-establish it from the
            // shadow; a socket that never joined has no user to re-register.
            if let Some(shadow) = &self.shadow {
                if shadow.case_reference == heartbeat.case_reference
                    && shadow.session_id == heartbeat.session_id
                {
                    debug!(
                        "Re-registering lapsed viewer session {} on case {}",
                        heartbeat.session_id, heartbeat.case_reference
                    );
                    self.state
                        .registry
                        .add_viewer(&shadow.case_reference, &shadow.user_id, &shadow.session_id)
                        .await?;
                }
            }
        }

        self.send(ServerMessage::HeartbeatAck).await;
        Ok(())
    }

    async fn handle_leave(&mut self, leave: LeaveCaseMessage) -> Result<(), GatewayError> {
        require_field(&leave.case_reference, "caseReference")?;
        require_field(&leave.session_id, "sessionId")?;

        self.state
            .registry
            .remove_viewer(&leave.case_reference, &leave.session_id)
            .await?;

        if let Some(task) = self.forward_task.take() {
            task.abort();
        }
        if self
            .shadow
            .as_ref()
            .is_some_and(|s| s.case_reference == leave.case_reference)
        {
            self.shadow = None;
        }

        debug!(
            "Connection {} left case {} (session {})",
            self.connection_id, leave.case_reference, leave.session_id
        );

        self.broadcast_count(&leave.case_reference).await
    }

    /// Disconnect cleanup. A connection that never joined a case performs no
    /// registry mutation and no broadcast.
    async fn cleanup(&mut self) {
        if let Some(task) = self.forward_task.take() {
            task.abort();
        }
        let Some(shadow) = self.shadow.take() else {
            return;
        };

        if let Err(e) = self
            .state
            .registry
            .remove_viewer(&shadow.case_reference, &shadow.session_id)
            .await
        {
            warn!(
                "Failed to remove viewer on disconnect of connection {}: {}",
                self.connection_id, e
            );
            return;
        }

        if let Err(e) = self.broadcast_count(&shadow.case_reference).await {
            warn!(
                "Failed to rebroadcast count after disconnect of connection {}: {}",
                self.connection_id, e
            );
        }
    }

    /// Recompute the total viewer count (self included) and fan it out to
    /// the local group plus the cross-instance relay.
    async fn broadcast_count(&self, case_reference: &str) -> Result<(), GatewayError> {
        let viewer_count = self.state.registry.count_viewers(case_reference, "").await?;

        let message = ServerMessage::ViewersUpdated(ViewersUpdatedMessage {
            case_reference: case_reference.to_string(),
            viewer_count,
        });
        self.state.rooms.broadcast(case_reference, message).await;

        self.state
            .relay
            .publish(&CountUpdate {
                case_reference: case_reference.to_string(),
                viewer_count,
                origin: self.state.instance_id.clone(),
            })
            .await;

        Ok(())
    }

    async fn send(&self, message: ServerMessage) {
        match serde_json::to_string(&message) {
            Ok(text) => {
                let _ = self.outbound.send(Message::Text(text)).await;
            }
            Err(e) => warn!("Failed to serialize server message: {}", e),
        }
    }

    async fn send_error(&self, message: String) {
        self.send(ServerMessage::Error(ErrorMessage { message })).await;
    }
}

fn require_field(value: &str, name: &str) -> Result<(), GatewayError> {
    if value.trim().is_empty() {
        return Err(GatewayError::Validation(format!("{} must not be empty", name)));
    }
    Ok(())
}

/// Forward room broadcasts onto the connection's outbound queue.
fn spawn_forwarder(
    mut room_rx: broadcast::Receiver<ServerMessage>,
    outbound: mpsc::Sender<Message>,
    connection_id: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match room_rx.recv().await {
                Ok(message) => {
                    let Ok(text) = serde_json::to_string(&message) else {
                        continue;
                    };
                    if outbound.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        "Connection {} lagged behind, skipped {} broadcasts",
                        connection_id, skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
