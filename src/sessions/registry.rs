//! Conversation -> CLI session id mapping, and transcript forks

use std::sync::Arc;

use uuid::Uuid;

use crate::store::{EntityStore, StoreError, StoredMessage};
use crate::turn::FinalizedMessage;

/// Tracks which CLI session a conversation resumes.
///
/// Backed by the entity store; last writer wins per conversation.
#[derive(Clone)]
pub struct SessionRegistry {
    store: Arc<dyn EntityStore>,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    /// Upsert the session id; writing the current value again is a no-op
    pub fn record_session_id(&self, conversation_id: Uuid, session_id: &str) -> Result<(), StoreError> {
        if self.current_session_id(conversation_id)?.as_deref() == Some(session_id) {
            return Ok(());
        }
        tracing::debug!("Conversation {} now resumes session {}", conversation_id, session_id);
        self.store.set_session_id(conversation_id, session_id)
    }

    pub fn current_session_id(&self, conversation_id: Uuid) -> Result<Option<String>, StoreError> {
        self.store.last_session_id(conversation_id)
    }

    /// Copy a conversation's messages into a new conversation with no session.
    ///
    /// The next turn in the fork starts a fresh CLI session, so the two
    /// lineages never share state afterwards. Tool calls are not copied.
    pub fn fork_transcript(&self, source: Uuid) -> Result<Uuid, StoreError> {
        let original = self
            .store
            .conversation(source)?
            .ok_or(StoreError::ConversationNotFound(source))?;

        let mut messages = self.store.messages(source)?;
        messages.sort_by_key(|m| m.created_at);

        let copies = messages
            .into_iter()
            .map(|message| StoredMessage {
                id: Uuid::new_v4(),
                created_at: message.created_at,
                message: FinalizedMessage {
                    tool_calls: Vec::new(),
                    ..message.message
                },
            })
            .collect();
        let fork = self.store.import_conversation(
            &format!("{} (fork)", original.title),
            &original.project_path,
            copies,
        )?;

        tracing::info!("Forked conversation {} into {}", source, fork.id);
        Ok(fork.id)
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::store::{JsonFileStore, MemoryStore};
    use crate::turn::{FinalizedToolCall, Role, ToolCallStatus};

    fn assistant(content: &str) -> FinalizedMessage {
        FinalizedMessage {
            role: Role::Assistant,
            content: content.to_string(),
            input_tokens: 10,
            output_tokens: 20,
            model_id: Some("sonnet".to_string()),
            stop_reason: Some("end_turn".to_string()),
            tool_calls: vec![FinalizedToolCall {
                tool_use_id: "t1".to_string(),
                tool_name: "Read".to_string(),
                input_json: "{}".to_string(),
                status: ToolCallStatus::Completed,
                elapsed_seconds: 1.0,
            }],
        }
    }

    fn setup() -> (SessionRegistry, Uuid) {
        let store: Arc<dyn EntityStore> = Arc::new(MemoryStore::new());
        let conversation = store.create_conversation("Bug hunt", Path::new("/repo")).unwrap();
        (SessionRegistry::new(store), conversation.id)
    }

    #[test]
    fn test_record_and_read_back() {
        let (registry, id) = setup();
        assert_eq!(registry.current_session_id(id).unwrap(), None);
        registry.record_session_id(id, "s1").unwrap();
        registry.record_session_id(id, "s1").unwrap();
        assert_eq!(registry.current_session_id(id).unwrap().as_deref(), Some("s1"));
    }

    #[test]
    fn test_fork_copies_messages_without_session() {
        let (registry, id) = setup();
        let store = registry.store().clone();
        registry.record_session_id(id, "s1").unwrap();
        store
            .save_finalized_message(id, &FinalizedMessage::user("question"))
            .unwrap();
        store.save_finalized_message(id, &assistant("answer")).unwrap();
        store
            .save_finalized_message(id, &FinalizedMessage::user("follow up"))
            .unwrap();

        let fork = registry.fork_transcript(id).unwrap();
        assert_ne!(fork, id);
        assert_eq!(registry.current_session_id(fork).unwrap(), None);

        let record = store.conversation(fork).unwrap().unwrap();
        assert_eq!(record.title, "Bug hunt (fork)");
        assert_eq!(record.project_path, Path::new("/repo"));
        assert_eq!(record.worktree_path, None);

        let source_messages = store.messages(id).unwrap();
        let forked = store.messages(fork).unwrap();
        assert_eq!(forked.len(), 3);
        for (copy, source) in forked.iter().zip(&source_messages) {
            assert_ne!(copy.id, source.id);
            assert_eq!(copy.created_at, source.created_at);
            assert_eq!(copy.message.role, source.message.role);
            assert_eq!(copy.message.content, source.message.content);
            assert_eq!(copy.message.output_tokens, source.message.output_tokens);
            assert_eq!(copy.message.model_id, source.message.model_id);
            assert!(copy.message.tool_calls.is_empty());
        }

        // The source keeps its session and tool calls
        assert_eq!(registry.current_session_id(id).unwrap().as_deref(), Some("s1"));
        assert_eq!(store.messages(id).unwrap()[1].message.tool_calls.len(), 1);
    }

    #[test]
    fn test_fork_then_diverge() {
        let (registry, id) = setup();
        registry.record_session_id(id, "s1").unwrap();
        let fork = registry.fork_transcript(id).unwrap();

        registry.record_session_id(fork, "s2").unwrap();
        assert_eq!(registry.current_session_id(id).unwrap().as_deref(), Some("s1"));
        assert_eq!(registry.current_session_id(fork).unwrap().as_deref(), Some("s2"));
    }

    #[test]
    fn test_failed_fork_leaves_no_conversation() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        let store: Arc<dyn EntityStore> =
            Arc::new(JsonFileStore::open(data.join("store.json")).unwrap());
        let source = store.create_conversation("Bug hunt", Path::new("/repo")).unwrap();
        store
            .save_finalized_message(source.id, &FinalizedMessage::user("question"))
            .unwrap();

        // The store directory turns into a file, so the next write fails
        std::fs::remove_dir_all(&data).unwrap();
        std::fs::write(&data, "").unwrap();

        let registry = SessionRegistry::new(store.clone());
        assert!(matches!(registry.fork_transcript(source.id), Err(StoreError::Io { .. })));
        let conversations = store.conversations().unwrap();
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0].id, source.id);
    }

    #[test]
    fn test_fork_unknown_source() {
        let (registry, _) = setup();
        assert!(matches!(
            registry.fork_transcript(Uuid::new_v4()),
            Err(StoreError::ConversationNotFound(_))
        ));
    }
}
