// WebSocket endpoint for realtime feedback rooms.
//
// Connection lifecycle: upgrade, then a `hello` frame carrying the access
// token must arrive within AUTH_TIMEOUT_MS. After the `hello_ack` the
// connection may join any number of report rooms; every join re-checks the
// caller's access to that report. Room frames (typing state, new-feedback
// hints, read acks) only flow between members of the same room.
//
// The socket never carries authoritative content: `new_feedback` frames are
// invalidation hints and clients reconcile against the REST log.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
    Router,
};
use chrono::Utc;
use civica_common::protocol::ws::WsMessage;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    auth::{jwt::JwtAccessTokenService, middleware::AuthenticatedUser},
    error::{request_id_from_headers_or_generate, with_request_id_scope, ErrorCode},
    presence::TypingTracker,
    rooms::RoomRouter,
    store::{reports::can_access, FeedbackStore, ReportDirectory},
    validation::{check_ws_frame_size, MAX_WS_FRAME_BYTES},
};

/// How long a freshly-upgraded socket may sit silent before the relay gives
/// up waiting for its `hello` frame.
pub const AUTH_TIMEOUT_MS: u64 = 5_000;
const HEARTBEAT_INTERVAL_MS: u64 = 15_000;
const HEARTBEAT_TIMEOUT_MS: u64 = 10_000;

#[derive(Clone)]
pub struct WsRouterState {
    pub jwt: Arc<JwtAccessTokenService>,
    pub rooms: RoomRouter,
    pub typing: TypingTracker,
    pub reports: ReportDirectory,
    pub feedback: FeedbackStore,
}

pub fn router(state: WsRouterState) -> Router {
    Router::new().route("/v1/ws", get(ws_upgrade)).with_state(state)
}

async fn ws_upgrade(
    State(state): State<WsRouterState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let request_id = request_id_from_headers_or_generate(&headers);
    ws.max_frame_size(MAX_WS_FRAME_BYTES).on_upgrade(move |socket| async move {
        with_request_id_scope(request_id, handle_socket(state, socket)).await;
    })
}

async fn handle_socket(state: WsRouterState, mut socket: WebSocket) {
    let Some(user) = await_hello(&state.jwt, &mut socket).await else {
        return;
    };

    let hello_ack = WsMessage::HelloAck { server_time: Utc::now().to_rfc3339() };
    if send_ws_message(&mut socket, &hello_ack).await.is_err() {
        return;
    }

    let (outbound_sender, mut outbound_receiver) = mpsc::unbounded_channel::<WsMessage>();
    let connection_id = state
        .rooms
        .register(user.user_id, user.name.clone(), user.role, user.department, outbound_sender)
        .await;
    debug!(connection_id = %connection_id, user_id = %user.user_id, "websocket connected");

    // Heartbeat: server pings every HEARTBEAT_INTERVAL_MS, disconnects if no
    // pong arrives within HEARTBEAT_TIMEOUT_MS.
    let mut heartbeat_interval =
        tokio::time::interval(std::time::Duration::from_millis(HEARTBEAT_INTERVAL_MS));
    heartbeat_interval.reset(); // skip immediate first tick
    let mut last_pong = Instant::now();
    let heartbeat_timeout = std::time::Duration::from_millis(HEARTBEAT_TIMEOUT_MS);

    loop {
        tokio::select! {
            _ = heartbeat_interval.tick() => {
                if last_pong.elapsed() > heartbeat_timeout {
                    warn!(
                        connection_id = %connection_id,
                        user_id = %user.user_id,
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
                        if send_ws_message(&mut socket, &outbound_message).await.is_err() {
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
                        if let Err(reason) = check_ws_frame_size(raw_message.as_bytes()) {
                            let frame = ws_error(ErrorCode::PayloadTooLarge, reason, None);
                            if send_ws_message(&mut socket, &frame).await.is_err() {
                                break;
                            }
                            continue;
                        }

                        let inbound = match serde_json::from_str::<WsMessage>(&raw_message) {
                            Ok(message) => message,
                            Err(_) => {
                                let frame = ws_error(
                                    ErrorCode::ValidationFailed,
                                    "invalid websocket frame payload",
                                    None,
                                );
                                if send_ws_message(&mut socket, &frame).await.is_err() {
                                    break;
                                }
                                continue;
                            }
                        };

                        let reply = dispatch_frame(&state, connection_id, &user, inbound).await;
                        if let Some(frame) = reply {
                            if send_ws_message(&mut socket, &frame).await.is_err() {
                                break;
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

    disconnect_cleanup(&state, connection_id, user.user_id).await;
}

/// Waits for the mandatory `hello` frame and validates its token. Any other
/// first frame, a bad token, or AUTH_TIMEOUT_MS of silence closes the socket.
async fn await_hello(
    jwt: &JwtAccessTokenService,
    socket: &mut WebSocket,
) -> Option<AuthenticatedUser> {
    let first_frame = tokio::time::timeout(
        std::time::Duration::from_millis(AUTH_TIMEOUT_MS),
        socket.recv(),
    )
    .await;

    let raw_message = match first_frame {
        Ok(Some(Ok(Message::Text(raw_message)))) => raw_message,
        Ok(_) => return None,
        Err(_) => {
            let frame = ws_error(
                ErrorCode::AuthInvalidToken,
                "hello frame did not arrive in time",
                None,
            );
            let _ = send_ws_message(socket, &frame).await;
            let _ = socket.send(Message::Close(None)).await;
            return None;
        }
    };

    let token = match serde_json::from_str::<WsMessage>(&raw_message) {
        Ok(WsMessage::Hello { token }) => token,
        _ => {
            let frame = ws_error(
                ErrorCode::ValidationFailed,
                "first WebSocket message must be a hello frame",
                None,
            );
            let _ = send_ws_message(socket, &frame).await;
            let _ = socket.send(Message::Close(None)).await;
            return None;
        }
    };

    match jwt.validate_access_token(&token) {
        Ok(access) => Some(AuthenticatedUser::from(access)),
        Err(error) => {
            debug!(error = %error, "websocket hello rejected");
            let frame = ws_error(ErrorCode::AuthInvalidToken, "invalid access token", None);
            let _ = send_ws_message(socket, &frame).await;
            let _ = socket.send(Message::Close(None)).await;
            None
        }
    }
}

/// Routes one inbound frame to its handler. Returns the frame to send back to
/// the caller, if any; room broadcasts happen inside the handlers.
async fn dispatch_frame(
    state: &WsRouterState,
    connection_id: Uuid,
    user: &AuthenticatedUser,
    inbound: WsMessage,
) -> Option<WsMessage> {
    match inbound {
        WsMessage::JoinReport { report_id } => {
            Some(unwrap_reply(handle_join_report(state, connection_id, user, report_id).await))
        }
        WsMessage::LeaveReport { report_id } => {
            handle_leave_report(state, connection_id, user, report_id).await;
            None
        }
        WsMessage::Typing { report_id } => {
            handle_typing(state, connection_id, user, report_id).await.err()
        }
        WsMessage::StopTyping { report_id } => {
            handle_stop_typing(state, connection_id, user, report_id).await.err()
        }
        WsMessage::MarkFeedbackRead { report_id } => Some(unwrap_reply(
            handle_mark_feedback_read(state, connection_id, user, report_id).await,
        )),
        _ => Some(ws_error(
            ErrorCode::ValidationFailed,
            "frame type is not accepted from clients",
            None,
        )),
    }
}

fn unwrap_reply(result: Result<WsMessage, WsMessage>) -> WsMessage {
    match result {
        Ok(frame) | Err(frame) => frame,
    }
}

async fn handle_join_report(
    state: &WsRouterState,
    connection_id: Uuid,
    user: &AuthenticatedUser,
    report_id: Uuid,
) -> Result<WsMessage, WsMessage> {
    let report = match state.reports.find(report_id).await {
        Ok(Some(report)) => report,
        Ok(None) => {
            return Err(ws_error(ErrorCode::NotFound, "report not found", Some(report_id)));
        }
        Err(error) => {
            warn!(error = ?error, report_id = %report_id, "report lookup failed during join");
            return Err(ws_error(
                ErrorCode::PersistenceFailed,
                "could not verify report access",
                Some(report_id),
            ));
        }
    };

    if !can_access(&report, user) {
        return Err(ws_error(
            ErrorCode::AuthForbidden,
            "caller may not access this report",
            Some(report_id),
        ));
    }

    // Joining twice is a no-op; `joined_report` is sent either way so clients
    // can treat it as a sync point after reconnects.
    state
        .rooms
        .join(connection_id, report_id)
        .await
        .map_err(|_| ws_error(ErrorCode::InternalError, "connection no longer registered", Some(report_id)))?;

    Ok(WsMessage::JoinedReport { report_id })
}

async fn handle_leave_report(
    state: &WsRouterState,
    connection_id: Uuid,
    user: &AuthenticatedUser,
    report_id: Uuid,
) {
    // Clear typing state before membership goes away so the stop-typing frame
    // still reaches the remaining members.
    if state.typing.clear_typing(report_id, user.user_id).await {
        state
            .rooms
            .broadcast_to_report_excluding_connection(
                report_id,
                WsMessage::UserStopTyping { report_id, user_id: user.user_id },
                connection_id,
            )
            .await;
    }
    state.rooms.leave(connection_id, report_id).await;
}

async fn handle_typing(
    state: &WsRouterState,
    connection_id: Uuid,
    user: &AuthenticatedUser,
    report_id: Uuid,
) -> Result<(), WsMessage> {
    require_room_membership(state, connection_id, report_id).await?;

    let newly_typing = state.typing.mark_typing(report_id, user.user_id, &user.name).await;
    // Repeat frames only refresh the TTL; members already saw the start.
    if newly_typing {
        state
            .rooms
            .broadcast_to_report_excluding_connection(
                report_id,
                WsMessage::UserTyping {
                    report_id,
                    user_id: user.user_id,
                    user_name: user.name.clone(),
                },
                connection_id,
            )
            .await;
    }
    Ok(())
}

async fn handle_stop_typing(
    state: &WsRouterState,
    connection_id: Uuid,
    user: &AuthenticatedUser,
    report_id: Uuid,
) -> Result<(), WsMessage> {
    require_room_membership(state, connection_id, report_id).await?;

    if state.typing.clear_typing(report_id, user.user_id).await {
        state
            .rooms
            .broadcast_to_report_excluding_connection(
                report_id,
                WsMessage::UserStopTyping { report_id, user_id: user.user_id },
                connection_id,
            )
            .await;
    }
    Ok(())
}

async fn handle_mark_feedback_read(
    state: &WsRouterState,
    connection_id: Uuid,
    user: &AuthenticatedUser,
    report_id: Uuid,
) -> Result<WsMessage, WsMessage> {
    require_room_membership(state, connection_id, report_id).await?;

    match state.feedback.mark_read(report_id, user.user_id).await {
        Ok(marked) => {
            debug!(report_id = %report_id, user_id = %user.user_id, marked, "feedback marked read");
            Ok(WsMessage::FeedbackMarkedRead { report_id })
        }
        Err(error) => {
            warn!(error = ?error, report_id = %report_id, "mark read failed");
            Err(ws_error(
                ErrorCode::PersistenceFailed,
                "could not persist read receipts",
                Some(report_id),
            ))
        }
    }
}

async fn require_room_membership(
    state: &WsRouterState,
    connection_id: Uuid,
    report_id: Uuid,
) -> Result<(), WsMessage> {
    if state.rooms.is_member(connection_id, report_id).await {
        Ok(())
    } else {
        Err(ws_error(
            ErrorCode::AuthForbidden,
            "join the report before sending room frames",
            Some(report_id),
        ))
    }
}

/// Tears down a closed connection: leaves every room and clears any typing
/// state, announcing the stop to remaining members.
async fn disconnect_cleanup(state: &WsRouterState, connection_id: Uuid, user_id: Uuid) {
    let left_rooms = state.rooms.unregister(connection_id).await;
    let cleared = state.typing.clear_user(&left_rooms, user_id).await;
    for report_id in cleared {
        state
            .rooms
            .broadcast_to_report(
                report_id,
                WsMessage::UserStopTyping { report_id, user_id },
            )
            .await;
    }
    debug!(connection_id = %connection_id, user_id = %user_id, "websocket disconnected");
}

async fn send_ws_message(socket: &mut WebSocket, message: &WsMessage) -> Result<(), ()> {
    let encoded = serde_json::to_string(message).map_err(|_| ())?;
    socket.send(Message::Text(encoded.into())).await.map_err(|_| ())
}

fn ws_error(code: ErrorCode, message: impl Into<String>, report_id: Option<Uuid>) -> WsMessage {
    WsMessage::Error {
        code: code.as_str().to_string(),
        message: message.into(),
        retryable: code.retryable(),
        report_id,
    }
}
