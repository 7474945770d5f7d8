use super::protocol as ws_protocol;
use crate::auth::jwt::AccessTokenService;
use crate::broadcast::BroadcastRouter;
use crate::channel::{SessionChannel, SubscribeError};
use crate::error::{ErrorCode, RelayError};
use crate::presence::PresenceTracker;
use crate::store::WorkflowStore;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use chrono::Utc;
use runbook_common::protocol::ws::WsMessage;
use runbook_common::types::UserInfo;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

pub const HEARTBEAT_INTERVAL_MS: u64 = 15_000;
pub const HEARTBEAT_TIMEOUT_MS: u64 = 10_000;
pub const MAX_FRAME_BYTES: usize = 262_144;

#[derive(Clone)]
pub struct CollabRouterState {
    pub jwt_service: Arc<AccessTokenService>,
    pub store: WorkflowStore,
    pub presence: PresenceTracker,
    pub router: BroadcastRouter,
}

pub fn router(state: CollabRouterState) -> Router {
    Router::new().route("/v1/ws/{workflow_id}", get(ws_upgrade)).with_state(state)
}

pub async fn ws_upgrade(
    Path(workflow_id): Path<Uuid>,
    State(state): State<CollabRouterState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    // Reject obviously-dead workflows before paying for the upgrade. The
    // authorization decision itself waits for the hello frame.
    match state.store.find_workflow(workflow_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return RelayError::from_code(ErrorCode::NotFound).into_response(),
        Err(error) => {
            warn!(error = ?error, workflow_id = %workflow_id, "workflow lookup failed before upgrade");
            return RelayError::from_code(ErrorCode::NotFound).into_response();
        }
    }

    ws.max_frame_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| handle_socket(state, workflow_id, socket))
}

async fn handle_socket(state: CollabRouterState, workflow_id: Uuid, mut socket: WebSocket) {
    let user = match socket.recv().await {
        Some(Ok(Message::Text(raw_message))) => {
            match ws_protocol::decode_message(&raw_message) {
                Ok(WsMessage::Hello { access_token }) => {
                    match state.jwt_service.validate_access_token(&access_token) {
                        Ok(authenticated) => {
                            UserInfo::new(authenticated.user_id, authenticated.email)
                        }
                        Err(error) => {
                            warn!(error = ?error, workflow_id = %workflow_id, "rejecting websocket with invalid token");
                            let _ = ws_protocol::send_ws_message(
                                &mut socket,
                                &WsMessage::Error {
                                    code: ErrorCode::AuthInvalidToken.as_str().to_string(),
                                    message: ErrorCode::AuthInvalidToken
                                        .default_message()
                                        .to_string(),
                                    retryable: false,
                                },
                            )
                            .await;
                            let _ = socket.send(Message::Close(None)).await;
                            return;
                        }
                    }
                }
                _ => {
                    let _ = ws_protocol::send_ws_message(
                        &mut socket,
                        &WsMessage::Error {
                            code: "COLLAB_HELLO_REQUIRED".to_string(),
                            message: "first WebSocket message must be a hello frame".to_string(),
                            retryable: false,
                        },
                    )
                    .await;
                    let _ = socket.send(Message::Close(None)).await;
                    return;
                }
            }
        }
        _ => return,
    };

    let (outbound_sender, mut outbound_receiver) = mpsc::unbounded_channel::<WsMessage>();
    let mut channel = SessionChannel::new(
        user,
        state.store.clone(),
        state.presence.clone(),
        state.router.clone(),
    );

    // A refused subscribe closes the connection without an error frame; the
    // HTTP boundary is where callers get actionable rejections.
    if let Err(error) = channel.subscribe(workflow_id, outbound_sender).await {
        match error {
            SubscribeError::NotFound => {
                info!(workflow_id = %workflow_id, "closing websocket: workflow vanished before subscribe");
            }
            SubscribeError::Forbidden => {
                info!(
                    workflow_id = %workflow_id,
                    user_id = %channel.user().id,
                    "closing websocket: caller lacks edit access"
                );
            }
        }
        let _ = socket.send(Message::Close(None)).await;
        return;
    }

    if ws_protocol::send_ws_message(
        &mut socket,
        &WsMessage::HelloAck { server_time: Utc::now().to_rfc3339() },
    )
    .await
    .is_err()
    {
        channel.unsubscribe().await;
        return;
    }

    // Heartbeat: server pings every HEARTBEAT_INTERVAL_MS, disconnects if no
    // pong arrives within HEARTBEAT_TIMEOUT_MS of the next tick.
    let mut heartbeat_interval =
        tokio::time::interval(std::time::Duration::from_millis(HEARTBEAT_INTERVAL_MS));
    heartbeat_interval.reset(); // skip immediate first tick
    let mut last_pong = Instant::now();
    let heartbeat_timeout =
        std::time::Duration::from_millis(HEARTBEAT_INTERVAL_MS + HEARTBEAT_TIMEOUT_MS);

    loop {
        tokio::select! {
            _ = heartbeat_interval.tick() => {
                if last_pong.elapsed() > heartbeat_timeout {
                    warn!(
                        workflow_id = %workflow_id,
                        user_id = %channel.user().id,
                        "heartbeat timeout, disconnecting"
                    );
                    break;
                }
                if socket.send(Message::Ping(vec![].into())).await.is_err() {
                    break;
                }
            }
            maybe_outbound = outbound_receiver.recv() => {
                match maybe_outbound {
                    Some(outbound_message) => {
                        if ws_protocol::send_ws_message(&mut socket, &outbound_message).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            maybe_message = socket.recv() => {
                let Some(message) = maybe_message else {
                    break;
                };

                match message {
                    Ok(Message::Text(raw_message)) => {
                        let inbound = match ws_protocol::decode_message(&raw_message) {
                            Ok(message) => message,
                            Err(_) => {
                                if ws_protocol::send_ws_message(
                                    &mut socket,
                                    &WsMessage::Error {
                                        code: "COLLAB_INVALID_MESSAGE".to_string(),
                                        message: "invalid websocket frame payload".to_string(),
                                        retryable: false,
                                    },
                                )
                                .await
                                .is_err()
                                {
                                    break;
                                }
                                continue;
                            }
                        };

                        match inbound {
                            WsMessage::WorkflowMetadataUpdate { field, value, .. } => {
                                channel.handle_metadata_update(field, value).await;
                            }
                            WsMessage::StepUpdate { step_index, step_data, .. } => {
                                channel.handle_step_update(step_index, step_data).await;
                            }
                            WsMessage::Autosave { title, steps } => {
                                channel.handle_autosave(title, steps).await;
                            }
                            _ => {
                                if ws_protocol::send_ws_message(
                                    &mut socket,
                                    &WsMessage::Error {
                                        code: "COLLAB_UNSUPPORTED_MESSAGE".to_string(),
                                        message: "message type is not supported by this relay build"
                                            .to_string(),
                                        retryable: true,
                                    },
                                )
                                .await
                                .is_err()
                                {
                                    break;
                                }
                            }
                        }
                    }
                    Ok(Message::Ping(payload)) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Pong(_)) => {
                        last_pong = Instant::now();
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        }
    }

    channel.unsubscribe().await;
}
