//! services/api/src/web/auto_advance_task.rs
//!
//! This module contains the asynchronous "worker" function that moves a reader
//! past linear beats once their delay has passed.

use crate::web::{
    protocol::ServerMessage,
    state::{AppState, ReadingSession},
    ws_handler::{announce_position, send_error, send_message, SharedSink},
};
use axum::extract::ws::Message;
use futures::Sink;
use guardian_kids_core::{
    engine::wait_for_auto_advance,
    ports::{PortError, PortResult},
    AutoAdvance,
};
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How many times one auto-advance is attempted while generation keeps failing.
pub const MAX_AUTO_ADVANCE_ATTEMPTS: usize = 3;

/// Waits out `pending`, follows it, and keeps going while the new node is
/// itself a linear beat.
///
/// It is designed to be gracefully cancelled via a `CancellationToken`: a
/// cancelled wait performs no transition. A generation failure is reported as
/// retryable and the same transition is tried again after another delay.
pub async fn auto_advance_process<S>(
    app_state: Arc<AppState>,
    session_lock: Arc<Mutex<ReadingSession>>,
    ws_sender: SharedSink<S>,
    pending: AutoAdvance,
    cancellation_token: CancellationToken,
) -> PortResult<()>
where
    S: Sink<Message> + Unpin + Send,
    S::Error: Display,
{
    let mut pending = pending;
    let mut attempts = 0;
    loop {
        if !wait_for_auto_advance(&pending, &cancellation_token).await {
            debug!("Auto-advance cancelled.");
            return Ok(());
        }

        let mut session = session_lock.lock().await;
        // The reader may have acted while we were waiting for the lock.
        if cancellation_token.is_cancelled() {
            return Ok(());
        }

        let choice_id = pending.choice.id;
        if session.needs_generation(choice_id) {
            send(&ws_sender, &ServerMessage::Generating).await?;
        }
        attempts += 1;
        match session.choose(&app_state.branch_writer(), choice_id).await {
            Ok(true) => {
                info!("Auto-advanced along choice {}.", choice_id);
                attempts = 0;
            }
            Ok(false) => return Ok(()),
            Err(e @ PortError::Generation(_)) if attempts < MAX_AUTO_ADVANCE_ATTEMPTS => {
                warn!(
                    "Auto-advance along choice {} failed (attempt {}), retrying: {}",
                    choice_id, attempts, e
                );
                send_error(&ws_sender, "Failed to continue the story.", &e).await;
                continue;
            }
            Err(e) => {
                send_error(&ws_sender, "Failed to continue the story.", &e).await;
                return Err(e);
            }
        }

        match announce_position(&session, &ws_sender).await {
            Ok(Some(next)) => pending = next,
            Ok(None) => return Ok(()),
            Err(()) => return Err(disconnected()),
        }
    }
}

async fn send<S>(ws_sender: &SharedSink<S>, msg: &ServerMessage) -> PortResult<()>
where
    S: Sink<Message> + Unpin + Send,
    S::Error: Display,
{
    send_message(ws_sender, msg).await.map_err(|_| disconnected())
}

fn disconnected() -> PortError {
    PortError::Unexpected("Client disconnected during auto-advance.".to_string())
}
