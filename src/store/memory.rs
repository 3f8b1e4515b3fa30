use std::sync::Mutex;

use super::{StoreError, StoreState};

/// Volatile store, for tests and one-shot runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&StoreState) -> Result<T, StoreError>) -> Result<T, StoreError> {
        let state = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        f(&state)
    }

    fn write<T>(
        &self,
        f: impl FnOnce(&mut StoreState) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut state = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        f(&mut state)
    }
}

super::entity_store_via_state!(MemoryStore);

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::store::EntityStore;
    use crate::turn::FinalizedMessage;

    #[test]
    fn test_session_id_upsert() {
        let store = MemoryStore::new();
        let conversation = store.create_conversation("Chat", Path::new("/tmp")).unwrap();
        assert_eq!(store.last_session_id(conversation.id).unwrap(), None);

        store.set_session_id(conversation.id, "s1").unwrap();
        store.set_session_id(conversation.id, "s1").unwrap();
        assert_eq!(store.last_session_id(conversation.id).unwrap().as_deref(), Some("s1"));

        store.set_session_id(conversation.id, "s2").unwrap();
        assert_eq!(store.last_session_id(conversation.id).unwrap().as_deref(), Some("s2"));
    }

    #[test]
    fn test_messages_keep_insertion_order() {
        let store = MemoryStore::new();
        let conversation = store.create_conversation("Chat", Path::new("/tmp")).unwrap();
        store
            .save_finalized_message(conversation.id, &FinalizedMessage::user("first"))
            .unwrap();
        store
            .save_finalized_message(conversation.id, &FinalizedMessage::user("second"))
            .unwrap();

        let contents: Vec<_> = store
            .messages(conversation.id)
            .unwrap()
            .into_iter()
            .map(|m| m.message.content)
            .collect();
        assert_eq!(contents, vec!["first", "second"]);
    }

    #[test]
    fn test_unknown_conversation() {
        let store = MemoryStore::new();
        let id = uuid::Uuid::new_v4();
        assert!(matches!(
            store.set_session_id(id, "s1"),
            Err(StoreError::ConversationNotFound(missing)) if missing == id
        ));
        assert!(store.conversation(id).unwrap().is_none());
    }

    #[test]
    fn test_working_directory_prefers_worktree() {
        let store = MemoryStore::new();
        let conversation = store.create_conversation("Chat", Path::new("/repo")).unwrap();
        assert_eq!(conversation.working_directory(), Path::new("/repo"));

        store
            .set_worktree(conversation.id, Some(Path::new("/repo/.worktrees/a")))
            .unwrap();
        let conversation = store.conversation(conversation.id).unwrap().unwrap();
        assert_eq!(conversation.working_directory(), Path::new("/repo/.worktrees/a"));
    }
}
