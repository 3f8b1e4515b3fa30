use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{StoreError, StoreState};

const APP_DIR: &str = "claude-session";
const STORE_FILE: &str = "store.json";

/// Store persisted as one pretty-printed JSON document, rewritten on every
/// mutation
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    state: Mutex<StoreState>,
}

impl JsonFileStore {
    /// `<data_dir>/claude-session/store.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|dir| dir.join(APP_DIR).join(STORE_FILE))
    }

    /// Open the store at `path`, starting empty if the file does not exist
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let state = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).map_err(|source| StoreError::Json {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreState::default(),
            Err(e) => return Err(StoreError::io("reading store", &path, e)),
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
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
        // Memory only changes once the file has
        let mut next = state.clone();
        let value = f(&mut next)?;
        self.persist(&next)?;
        *state = next;
        Ok(value)
    }

    fn persist(&self, state: &StoreState) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::io("creating store directory", parent, e))?;
        }
        let json = serde_json::to_string_pretty(state).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })?;

        // Write-then-rename so a crash never leaves a truncated store
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| StoreError::io("writing store", &tmp, e))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| StoreError::io("replacing store", &self.path, e))?;
        Ok(())
    }
}

super::entity_store_via_state!(JsonFileStore);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::EntityStore;
    use crate::turn::{FinalizedMessage, FinalizedToolCall, Role, ToolCallStatus};

    #[test]
    fn test_reopen_sees_saved_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");

        let id = {
            let store = JsonFileStore::open(&path).unwrap();
            let conversation = store.create_conversation("Chat", dir.path()).unwrap();
            store.set_session_id(conversation.id, "s1").unwrap();
            store
                .save_finalized_message(
                    conversation.id,
                    &FinalizedMessage {
                        role: Role::Assistant,
                        content: "hi".to_string(),
                        input_tokens: 3,
                        output_tokens: 4,
                        model_id: Some("sonnet".to_string()),
                        stop_reason: Some("end_turn".to_string()),
                        tool_calls: vec![FinalizedToolCall {
                            tool_use_id: "t1".to_string(),
                            tool_name: "Read".to_string(),
                            input_json: "{}".to_string(),
                            status: ToolCallStatus::Completed,
                            elapsed_seconds: 0.0,
                        }],
                    },
                )
                .unwrap();
            conversation.id
        };

        let store = JsonFileStore::open(&path).unwrap();
        assert_eq!(store.last_session_id(id).unwrap().as_deref(), Some("s1"));
        let messages = store.messages(id).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message.content, "hi");
        assert_eq!(messages[0].message.tool_calls[0].status, ToolCallStatus::Completed);
    }

    #[test]
    fn test_failed_write_leaves_memory_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        let store = JsonFileStore::open(data.join("store.json")).unwrap();
        let conversation = store.create_conversation("Chat", dir.path()).unwrap();

        // A file where the store directory should be makes every write fail
        std::fs::remove_dir_all(&data).unwrap();
        std::fs::write(&data, "").unwrap();

        let err = store
            .save_finalized_message(conversation.id, &FinalizedMessage::user("lost"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
        assert!(store.messages(conversation.id).unwrap().is_empty());

        assert!(store.set_session_id(conversation.id, "s1").is_err());
        assert_eq!(store.last_session_id(conversation.id).unwrap(), None);
        assert_eq!(store.conversations().unwrap().len(), 1);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(JsonFileStore::open(&path), Err(StoreError::Json { .. })));
    }
}
