//! Headless driver for the Claude Code CLI.
//!
//! Spawns `claude -p ... --output-format stream-json`, decodes the event
//! stream, rebuilds streamed assistant turns and keeps each conversation
//! attached to its CLI session across turns.

pub mod claude;
pub mod config;
pub mod conversation;
pub mod sessions;
pub mod store;
pub mod turn;

pub use claude::{ClaudeError, CliLocator, WireMessage};
pub use config::{Config, PermissionMode};
pub use conversation::{Conversation, TurnOptions};
pub use sessions::SessionRegistry;
pub use store::{EntityStore, JsonFileStore, MemoryStore};
pub use turn::{TurnHandle, TurnOutcome, TurnUpdate};
