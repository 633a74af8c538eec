//! services/api/src/web/ws_handler.rs
//!
//! This is the main entry point and control loop for a WebSocket reading session.
//! It owns the reader's `StoryEngine` and delegates timed transitions to the
//! auto-advance task.

use crate::web::{
    auto_advance_task::auto_advance_process,
    protocol::{delay_ms, ClientMessage, ServerMessage},
    state::{AppState, ReadingSession},
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    Extension,
};
use futures::{
    stream::{SplitSink, StreamExt},
    Sink, SinkExt,
};
use guardian_kids_core::{AutoAdvance, PortError};
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// A message sink shared between the session loop and its auto-advance task.
pub type SharedSink<S> = Arc<Mutex<S>>;

pub type WsSender = SharedSink<SplitSink<WebSocket, Message>>;

/// The handler for upgrading HTTP requests to WebSocket connections.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state, user_id))
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>, user_id: Uuid) {
    info!("New WebSocket connection established for user: {}", user_id);

    // The sender is wrapped in an Arc<Mutex<>> to allow for shared mutable access across tasks.
    let (sender, mut receiver) = socket.split();
    let ws_sender: WsSender = Arc::new(Mutex::new(sender));

    // --- 1. Initialization Phase ---
    let session_lock: Arc<Mutex<ReadingSession>> = match receiver.next().await {
        Some(Ok(Message::Text(init_json))) => match serde_json::from_str::<ClientMessage>(&init_json) {
            Ok(ClientMessage::Init { story_id }) => {
                info!("Initializing reading session for story: {}", story_id);
                match ReadingSession::open(&app_state, user_id, story_id).await {
                    Ok(session) => Arc::new(Mutex::new(session)),
                    Err(e) => {
                        error!("Failed to open story {}: {:?}", story_id, e);
                        send_error(&ws_sender, "Failed to load the story.", &e).await;
                        return;
                    }
                }
            }
            _ => {
                error!("First message was not a valid Init message.");
                return;
            }
        },
        _ => {
            error!("Client disconnected before sending Init message.");
            return;
        }
    };

    {
        let session = session_lock.lock().await;
        match announce_position(&session, &ws_sender).await {
            Ok(pending) => spawn_auto_advance(
                &app_state,
                &session_lock,
                &ws_sender,
                pending,
                session.cancellation_token.clone(),
            ),
            Err(()) => return,
        }
    }

    // --- 2. Main Message Loop ---
    loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => {
                if handle_text_message(&text, &app_state, &session_lock, &ws_sender)
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Some(Ok(Message::Close(_))) => {
                info!("Client sent close message.");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!("WebSocket receive error: {}", e);
                break;
            }
            None => {
                info!("Client disconnected.");
                break;
            }
        }
    }

    // --- 3. Cleanup ---
    session_lock.lock().await.cancellation_token.cancel();
    info!("WebSocket connection closed.");
}

/// Handles one `ClientMessage`. An `Err` means the client can no longer be reached.
async fn handle_text_message(
    text: &str,
    app_state: &Arc<AppState>,
    session_lock: &Arc<Mutex<ReadingSession>>,
    ws_sender: &WsSender,
) -> Result<(), ()> {
    let client_msg = match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!("Failed to deserialize client message: {}", e);
            return Ok(());
        }
    };

    // Messages are handled one at a time under the session lock, so a
    // repeated choice finds the reader already moved and is ignored.
    let mut session = session_lock.lock().await;
    match client_msg {
        ClientMessage::Choose { choice_id } => {
            info!("Choose message received for choice {}.", choice_id);
            if session.needs_generation(choice_id) {
                send_message(ws_sender, &ServerMessage::Generating).await?;
            }
            // The running auto-advance is only cancelled once the reader has actually moved.
            match session
                .choose_and_rearm(&app_state.branch_writer(), choice_id)
                .await
            {
                Ok(Some(token)) => {
                    let pending = announce_position(&session, ws_sender).await?;
                    spawn_auto_advance(app_state, session_lock, ws_sender, pending, token);
                }
                Ok(None) => {
                    let msg = ServerMessage::Error {
                        message: "That choice is not available here.".to_string(),
                        retryable: false,
                    };
                    send_message(ws_sender, &msg).await?;
                }
                Err(e) => {
                    error!("Failed to follow choice {}: {:?}", choice_id, e);
                    send_error(ws_sender, "Failed to continue the story.", &e).await;
                }
            }
        }
        ClientMessage::Restart => {
            info!("Restart message received.");
            let token = session.reset_cancellation();
            session.engine.restart().await;
            let pending = announce_position(&session, ws_sender).await?;
            spawn_auto_advance(app_state, session_lock, ws_sender, pending, token);
        }
        ClientMessage::Init { .. } => {
            warn!("Received subsequent Init message, which is ignored.");
        }
    }
    Ok(())
}

/// Sends the reader's current position and, if the node moves on by itself,
/// the scheduled auto-advance. Returns that auto-advance.
pub async fn announce_position<S>(
    session: &ReadingSession,
    ws_sender: &SharedSink<S>,
) -> Result<Option<AutoAdvance>, ()>
where
    S: Sink<Message> + Unpin + Send,
    S::Error: Display,
{
    send_message(ws_sender, &ServerMessage::position(&session.engine)).await?;

    let pending = session.engine.pending_auto_advance();
    if let Some(pending) = &pending {
        let msg = ServerMessage::AutoAdvanceScheduled {
            choice_id: pending.choice.id,
            delay_ms: delay_ms(pending.delay),
        };
        send_message(ws_sender, &msg).await?;
    }
    Ok(pending)
}

pub async fn send_message<S>(ws_sender: &SharedSink<S>, msg: &ServerMessage) -> Result<(), ()>
where
    S: Sink<Message> + Unpin + Send,
    S::Error: Display,
{
    let json = match serde_json::to_string(msg) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize server message: {}", e);
            return Ok(());
        }
    };
    ws_sender
        .lock()
        .await
        .send(Message::Text(json.into()))
        .await
        .map_err(|e| error!("Failed to send message to client: {}", e))
}

/// Reports a failed port call. Generation failures are marked retryable.
pub async fn send_error<S>(ws_sender: &SharedSink<S>, message: &str, error: &PortError)
where
    S: Sink<Message> + Unpin + Send,
    S::Error: Display,
{
    let msg = ServerMessage::Error {
        message: message.to_string(),
        retryable: matches!(error, PortError::Generation(_)),
    };
    let _ = send_message(ws_sender, &msg).await;
}

fn spawn_auto_advance(
    app_state: &Arc<AppState>,
    session_lock: &Arc<Mutex<ReadingSession>>,
    ws_sender: &WsSender,
    pending: Option<AutoAdvance>,
    token: CancellationToken,
) {
    let Some(pending) = pending else {
        return;
    };
    let app_state = app_state.clone();
    let session_lock = session_lock.clone();
    let ws_sender = ws_sender.clone();
    tokio::spawn(async move {
        if let Err(e) = auto_advance_process(app_state, session_lock, ws_sender, pending, token).await {
            error!("Auto-advance process failed: {:?}", e);
        }
    });
}
