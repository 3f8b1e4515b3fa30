//! Entity store for conversations and their finalized messages
//!
//! The turn machinery only needs to save finished messages and read/write
//! a conversation's session id; everything else here serves the CLI front
//! end and transcript forks.

mod file;
mod memory;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::turn::FinalizedMessage;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error while {operation} at {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse store at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("conversation {0} not found")]
    ConversationNotFound(Uuid),

    #[error("store lock poisoned")]
    Poisoned,
}

impl StoreError {
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: Uuid,
    pub title: String,
    pub project_path: PathBuf,
    pub worktree_path: Option<PathBuf>,
    /// Session id issued by the CLI; `None` until the first init event
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationRecord {
    /// Worktree if the conversation has one, else the project directory
    pub fn working_directory(&self) -> &Path {
        self.worktree_path.as_deref().unwrap_or(&self.project_path)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub message: FinalizedMessage,
}

/// Persistence collaborator. Implementations serialize access internally.
pub trait EntityStore: Send + Sync {
    fn create_conversation(
        &self,
        title: &str,
        project_path: &Path,
    ) -> Result<ConversationRecord, StoreError>;

    fn conversation(&self, id: Uuid) -> Result<Option<ConversationRecord>, StoreError>;

    fn conversations(&self) -> Result<Vec<ConversationRecord>, StoreError>;

    fn set_worktree(&self, id: Uuid, worktree: Option<&Path>) -> Result<(), StoreError>;

    fn save_finalized_message(
        &self,
        conversation_id: Uuid,
        message: &FinalizedMessage,
    ) -> Result<StoredMessage, StoreError>;

    /// Create a conversation already holding `messages`, kept as-is with
    /// their timestamps. One write: either all of it lands or none of it.
    fn import_conversation(
        &self,
        title: &str,
        project_path: &Path,
        messages: Vec<StoredMessage>,
    ) -> Result<ConversationRecord, StoreError>;

    /// Messages in insertion order
    fn messages(&self, conversation_id: Uuid) -> Result<Vec<StoredMessage>, StoreError>;

    fn last_session_id(&self, conversation_id: Uuid) -> Result<Option<String>, StoreError>;

    fn set_session_id(&self, conversation_id: Uuid, session_id: &str) -> Result<(), StoreError>;
}

/// Plain data behind both store implementations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct StoreState {
    #[serde(default)]
    conversations: BTreeMap<Uuid, ConversationRecord>,
    #[serde(default)]
    messages: BTreeMap<Uuid, Vec<StoredMessage>>,
}

impl StoreState {
    fn create_conversation(&mut self, title: &str, project_path: &Path) -> ConversationRecord {
        let now = Utc::now();
        let record = ConversationRecord {
            id: Uuid::new_v4(),
            title: title.to_string(),
            project_path: project_path.to_path_buf(),
            worktree_path: None,
            session_id: None,
            created_at: now,
            updated_at: now,
        };
        self.conversations.insert(record.id, record.clone());
        self.messages.insert(record.id, Vec::new());
        record
    }

    fn import_conversation(
        &mut self,
        title: &str,
        project_path: &Path,
        messages: Vec<StoredMessage>,
    ) -> ConversationRecord {
        let record = self.create_conversation(title, project_path);
        self.messages.insert(record.id, messages);
        record
    }

    fn conversation(&self, id: Uuid) -> Option<ConversationRecord> {
        self.conversations.get(&id).cloned()
    }

    fn conversations(&self) -> Vec<ConversationRecord> {
        let mut all: Vec<_> = self.conversations.values().cloned().collect();
        all.sort_by_key(|c| c.created_at);
        all
    }

    fn conversation_mut(&mut self, id: Uuid) -> Result<&mut ConversationRecord, StoreError> {
        self.conversations
            .get_mut(&id)
            .ok_or(StoreError::ConversationNotFound(id))
    }

    fn set_worktree(&mut self, id: Uuid, worktree: Option<&Path>) -> Result<(), StoreError> {
        let conversation = self.conversation_mut(id)?;
        conversation.worktree_path = worktree.map(Path::to_path_buf);
        conversation.updated_at = Utc::now();
        Ok(())
    }

    fn save_finalized_message(
        &mut self,
        conversation_id: Uuid,
        message: &FinalizedMessage,
    ) -> Result<StoredMessage, StoreError> {
        let stored = StoredMessage {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            message: message.clone(),
        };
        self.import_message(conversation_id, stored.clone())?;
        Ok(stored)
    }

    fn import_message(
        &mut self,
        conversation_id: Uuid,
        message: StoredMessage,
    ) -> Result<(), StoreError> {
        self.conversation_mut(conversation_id)?.updated_at = Utc::now();
        self.messages
            .entry(conversation_id)
            .or_default()
            .push(message);
        Ok(())
    }

    fn messages(&self, conversation_id: Uuid) -> Result<Vec<StoredMessage>, StoreError> {
        if !self.conversations.contains_key(&conversation_id) {
            return Err(StoreError::ConversationNotFound(conversation_id));
        }
        Ok(self
            .messages
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    fn last_session_id(&self, conversation_id: Uuid) -> Result<Option<String>, StoreError> {
        self.conversations
            .get(&conversation_id)
            .map(|c| c.session_id.clone())
            .ok_or(StoreError::ConversationNotFound(conversation_id))
    }

    fn set_session_id(&mut self, conversation_id: Uuid, session_id: &str) -> Result<(), StoreError> {
        let conversation = self.conversation_mut(conversation_id)?;
        conversation.session_id = Some(session_id.to_string());
        conversation.updated_at = Utc::now();
        Ok(())
    }
}

/// Trait impl shared by stores that wrap a `StoreState` behind `read`/`write`
macro_rules! entity_store_via_state {
    ($ty:ty) => {
        impl $crate::store::EntityStore for $ty {
            fn create_conversation(
                &self,
                title: &str,
                project_path: &std::path::Path,
            ) -> Result<$crate::store::ConversationRecord, $crate::store::StoreError> {
                self.write(|state| Ok(state.create_conversation(title, project_path)))
            }

            fn conversation(
                &self,
                id: uuid::Uuid,
            ) -> Result<Option<$crate::store::ConversationRecord>, $crate::store::StoreError> {
                self.read(|state| Ok(state.conversation(id)))
            }

            fn conversations(
                &self,
            ) -> Result<Vec<$crate::store::ConversationRecord>, $crate::store::StoreError> {
                self.read(|state| Ok(state.conversations()))
            }

            fn set_worktree(
                &self,
                id: uuid::Uuid,
                worktree: Option<&std::path::Path>,
            ) -> Result<(), $crate::store::StoreError> {
                self.write(|state| state.set_worktree(id, worktree))
            }

            fn save_finalized_message(
                &self,
                conversation_id: uuid::Uuid,
                message: &$crate::turn::FinalizedMessage,
            ) -> Result<$crate::store::StoredMessage, $crate::store::StoreError> {
                self.write(|state| state.save_finalized_message(conversation_id, message))
            }

            fn import_conversation(
                &self,
                title: &str,
                project_path: &std::path::Path,
                messages: Vec<$crate::store::StoredMessage>,
            ) -> Result<$crate::store::ConversationRecord, $crate::store::StoreError> {
                self.write(|state| Ok(state.import_conversation(title, project_path, messages)))
            }

            fn messages(
                &self,
                conversation_id: uuid::Uuid,
            ) -> Result<Vec<$crate::store::StoredMessage>, $crate::store::StoreError> {
                self.read(|state| state.messages(conversation_id))
            }

            fn last_session_id(
                &self,
                conversation_id: uuid::Uuid,
            ) -> Result<Option<String>, $crate::store::StoreError> {
                self.read(|state| state.last_session_id(conversation_id))
            }

            fn set_session_id(
                &self,
                conversation_id: uuid::Uuid,
                session_id: &str,
            ) -> Result<(), $crate::store::StoreError> {
                self.write(|state| state.set_session_id(conversation_id, session_id))
            }
        }
    };
}

pub(crate) use entity_store_via_state;
