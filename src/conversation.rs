//! Multi-turn conversation on top of the CLI

use std::path::Path;
use std::sync::Arc;

use uuid::Uuid;

use crate::claude::{ClaudeError, ClaudeProcess, CliLocator, TurnRequest};
use crate::config::PermissionMode;
use crate::sessions::SessionRegistry;
use crate::store::{ConversationRecord, EntityStore, StoredMessage};
use crate::turn::{spawn_turn, FinalizedMessage, TurnContext, TurnHandle, TurnReducer};

/// Per-turn CLI options
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnOptions {
    pub model: Option<String>,
    /// Pass `--continue` instead of resuming the recorded session
    pub continue_session: bool,
    pub system_prompt: Option<String>,
    pub max_turns: Option<u32>,
    pub max_budget_usd: Option<f64>,
    pub allowed_tools: Vec<String>,
    pub permission_mode: Option<PermissionMode>,
}

/// A stored conversation that can run turns.
///
/// Only one turn should run at a time; the caller waits for or cancels the
/// previous `TurnHandle` before sending again.
pub struct Conversation {
    id: Uuid,
    store: Arc<dyn EntityStore>,
    registry: SessionRegistry,
    locator: CliLocator,
}

impl Conversation {
    pub fn create(
        store: Arc<dyn EntityStore>,
        locator: CliLocator,
        title: &str,
        project_path: &Path,
    ) -> Result<Self, ClaudeError> {
        let record = store.create_conversation(title, project_path)?;
        tracing::info!("Created conversation {} in {}", record.id, project_path.display());
        Ok(Self::with_id(record.id, store, locator))
    }

    pub fn open(store: Arc<dyn EntityStore>, locator: CliLocator, id: Uuid) -> Result<Self, ClaudeError> {
        if store.conversation(id)?.is_none() {
            return Err(ClaudeError::ConversationNotFound(id));
        }
        Ok(Self::with_id(id, store, locator))
    }

    fn with_id(id: Uuid, store: Arc<dyn EntityStore>, locator: CliLocator) -> Self {
        Self {
            id,
            registry: SessionRegistry::new(store.clone()),
            store,
            locator,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn record(&self) -> Result<ConversationRecord, ClaudeError> {
        self.store
            .conversation(self.id)?
            .ok_or(ClaudeError::ConversationNotFound(self.id))
    }

    pub fn messages(&self) -> Result<Vec<StoredMessage>, ClaudeError> {
        Ok(self.store.messages(self.id)?)
    }

    pub fn session_id(&self) -> Result<Option<String>, ClaudeError> {
        Ok(self.registry.current_session_id(self.id)?)
    }

    /// Start a turn.
    ///
    /// Fails without touching the store if the CLI cannot be started. Once
    /// the process is running the prompt is saved as a user message and the
    /// turn proceeds in the background.
    pub async fn send(&self, prompt: &str, options: TurnOptions) -> Result<TurnHandle, ClaudeError> {
        let record = self.record()?;
        let resume_session_id = if options.continue_session {
            None
        } else {
            self.registry.current_session_id(self.id)?
        };

        let request = TurnRequest {
            prompt: prompt.to_string(),
            model: options.model.clone(),
            working_directory: record.working_directory().to_path_buf(),
            resume_session_id,
            continue_session: options.continue_session,
            system_prompt: options.system_prompt,
            max_turns: options.max_turns,
            max_budget_usd: options.max_budget_usd,
            allowed_tools: options.allowed_tools,
            permission_mode: options.permission_mode.map(|mode| mode.as_str().to_string()),
        };
        tracing::debug!(
            "Sending turn for {} (resume: {:?})",
            self.id,
            request.resume_session_id
        );

        let process = ClaudeProcess::start(&self.locator, &request).await?;
        self.store
            .save_finalized_message(self.id, &FinalizedMessage::user(prompt))?;

        Ok(spawn_turn(
            process,
            TurnReducer::new(options.model),
            TurnContext {
                conversation_id: self.id,
                store: self.store.clone(),
                registry: self.registry.clone(),
            },
        ))
    }

    /// Branch this conversation; the fork starts a new CLI session
    pub fn fork(&self) -> Result<Conversation, ClaudeError> {
        let id = self.registry.fork_transcript(self.id)?;
        Ok(Self::with_id(id, self.store.clone(), self.locator.clone()))
    }
}
