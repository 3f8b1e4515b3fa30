//! Drives a turn: CLI output -> reducer -> store

use std::sync::Arc;
use std::time::Duration;

use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use uuid::Uuid;

use crate::claude::{mentions_login, ClaudeError, ClaudeProcess, ResultMessage};
use crate::sessions::SessionRegistry;
use crate::store::EntityStore;

use super::reducer::{TurnPhase, TurnReducer, TurnUpdate};
use super::record::FinalizedMessage;

/// How long the CLI may keep running after its `result` before it is terminated
const EXIT_AFTER_RESULT: Duration = Duration::from_secs(2);

/// Where a turn's side effects go
pub(crate) struct TurnContext {
    pub conversation_id: Uuid,
    pub store: Arc<dyn EntityStore>,
    pub registry: SessionRegistry,
}

/// How a turn ended
#[derive(Debug)]
pub struct TurnOutcome {
    /// Finalized assistant message, if the turn produced text or tool calls
    pub message: Option<FinalizedMessage>,
    /// Store id of `message`; `None` if saving it failed
    pub message_id: Option<Uuid>,
    pub session_id: Option<String>,
    pub result: Option<ResultMessage>,
    pub cancelled: bool,
    /// Reported after the partial message has been finalized
    pub error: Option<ClaudeError>,
}

impl TurnOutcome {
    pub fn is_success(&self) -> bool {
        !self.cancelled && self.error.is_none()
    }
}

/// Caller's side of a running turn. Dropping it cancels the turn.
pub struct TurnHandle {
    conversation_id: Uuid,
    cancel_tx: watch::Sender<bool>,
    updates: mpsc::UnboundedReceiver<TurnUpdate>,
    task: JoinHandle<TurnOutcome>,
}

impl TurnHandle {
    pub fn conversation_id(&self) -> Uuid {
        self.conversation_id
    }

    /// Stop reading and terminate the CLI. Idempotent.
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    /// Next UI update; `None` once the turn has finished
    pub async fn next_update(&mut self) -> Option<TurnUpdate> {
        self.updates.recv().await
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the turn to end. Updates not yet read are discarded.
    pub async fn wait(mut self) -> Result<TurnOutcome, ClaudeError> {
        Ok((&mut self.task).await?)
    }
}

impl Drop for TurnHandle {
    fn drop(&mut self) {
        if !self.task.is_finished() {
            self.cancel_tx.send_replace(true);
        }
    }
}

pub(crate) fn spawn_turn(process: ClaudeProcess, reducer: TurnReducer, ctx: TurnContext) -> TurnHandle {
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let (updates_tx, updates) = mpsc::unbounded_channel();
    let conversation_id = ctx.conversation_id;
    let task = tokio::spawn(run_turn(process, reducer, ctx, cancel_rx, updates_tx));
    TurnHandle {
        conversation_id,
        cancel_tx,
        updates,
        task,
    }
}

async fn cancelled(rx: &mut watch::Receiver<bool>) {
    // A closed channel means the handle is gone, which cancels too
    let _ = rx.wait_for(|cancelled| *cancelled).await;
}

async fn run_turn(
    mut process: ClaudeProcess,
    mut reducer: TurnReducer,
    ctx: TurnContext,
    mut cancel_rx: watch::Receiver<bool>,
    updates: mpsc::UnboundedSender<TurnUpdate>,
) -> TurnOutcome {
    let mut stream_error = None;
    let mut result_seen = false;

    loop {
        tokio::select! {
            biased;

            _ = cancelled(&mut cancel_rx) => {
                process.cancel();
                break;
            }

            line = process.next_line() => match line {
                Ok(Some(line)) => {
                    for update in reducer.apply_line(&line) {
                        if let TurnUpdate::SessionStarted { session_id, .. } = &update {
                            if let Err(e) = ctx.registry.record_session_id(ctx.conversation_id, session_id) {
                                tracing::warn!("Failed to record session id {}: {}", session_id, e);
                            }
                        }
                        // The receiver may be gone; the turn still completes
                        let _ = updates.send(update);
                    }
                    // `result` ends the turn whether or not the CLI exits
                    if reducer.phase() == TurnPhase::Finalizing {
                        result_seen = true;
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!("Turn stream ended with error: {}", e);
                    stream_error = Some(e);
                    break;
                }
            },
        }
    }

    let was_cancelled = process.is_cancelled();
    if was_cancelled {
        if let Err(e) = process.shutdown().await {
            tracing::warn!("Failed to reap cancelled Claude process: {}", e);
        }
    }

    reducer.end_stream();
    let session_id = reducer.session_id().map(str::to_string);
    let result = reducer.result().cloned();
    let message = reducer.finalize();

    let mut error = stream_error;
    let mut message_id = None;
    if let Some(message) = &message {
        match ctx.store.save_finalized_message(ctx.conversation_id, message) {
            Ok(stored) => message_id = Some(stored.id),
            Err(e) => {
                tracing::error!("Failed to save assistant message: {}", e);
                error.get_or_insert(ClaudeError::Store(e));
            }
        }
    }

    if error.is_none() && !was_cancelled {
        error = result.as_ref().and_then(result_error);
    }

    if result_seen {
        reap_after_result(&mut process).await;
    }

    TurnOutcome {
        message,
        message_id,
        session_id,
        result,
        cancelled: was_cancelled,
        error,
    }
}

/// Let the CLI exit on its own after `result`, terminating it if it lingers.
/// Anything it prints or reports from here on no longer affects the turn.
async fn reap_after_result(process: &mut ClaudeProcess) {
    let exited = tokio::time::timeout(EXIT_AFTER_RESULT, async {
        loop {
            match process.next_line().await {
                Ok(Some(line)) => tracing::debug!("Ignoring output after result: {}", line),
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!("Claude exited uncleanly after its result: {}", e);
                    break;
                }
            }
        }
    })
    .await;

    if exited.is_err() {
        tracing::debug!("Claude still running after its result, terminating it");
        process.cancel();
        if let Err(e) = process.shutdown().await {
            tracing::warn!("Failed to reap Claude process: {}", e);
        }
    }
}

fn result_error(result: &ResultMessage) -> Option<ClaudeError> {
    if !result.is_error {
        return None;
    }
    let detail = result.error_summary();
    if mentions_login(&detail) {
        return Some(ClaudeError::NotLoggedIn);
    }
    Some(ClaudeError::TurnFailed {
        subtype: result.subtype.clone(),
        detail,
    })
}
