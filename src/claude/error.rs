//! Errors surfaced by a turn

use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ClaudeError {
    #[error("Claude CLI not found. Install it from https://claude.ai/download")]
    ExecutableNotFound,

    #[error("working directory does not exist: {0}")]
    InvalidWorkingDirectory(PathBuf),

    #[error("failed to start Claude CLI at {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed reading Claude CLI output: {0}")]
    Io(#[from] std::io::Error),

    #[error("Claude CLI exited with code {exit_code}: {stderr}")]
    ProcessError { exit_code: i32, stderr: String },

    #[error("Not logged in. Run 'claude login' in your terminal.")]
    NotLoggedIn,

    #[error("Claude reported {subtype}: {detail}")]
    TurnFailed { subtype: String, detail: String },

    #[error("conversation {0} not found")]
    ConversationNotFound(Uuid),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("turn task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

const LOGIN_HINTS: &[&str] = &[
    "not logged in",
    "please run /login",
    "claude login",
    "invalid api key",
];

/// True if CLI diagnostic text says the user must log in
pub fn mentions_login(text: &str) -> bool {
    let text = text.to_lowercase();
    LOGIN_HINTS.iter().any(|hint| text.contains(hint))
}

impl ClaudeError {
    /// Error for a non-zero exit with diagnostic output
    pub fn from_exit(exit_code: i32, stderr: String) -> Self {
        if mentions_login(&stderr) {
            Self::NotLoggedIn
        } else {
            Self::ProcessError { exit_code, stderr }
        }
    }
}
