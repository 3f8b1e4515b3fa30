//! Finalized turn records handed to the entity store

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// `Pending` means the tool block never saw its stop event (interrupted)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    Completed,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizedToolCall {
    pub tool_use_id: String,
    pub tool_name: String,
    /// Concatenated `input_json_delta` fragments, verbatim
    pub input_json: String,
    pub status: ToolCallStatus,
    #[serde(default)]
    pub elapsed_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizedMessage {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    pub model_id: Option<String>,
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<FinalizedToolCall>,
}

impl FinalizedMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            input_tokens: 0,
            output_tokens: 0,
            model_id: None,
            stop_reason: None,
            tool_calls: Vec::new(),
        }
    }
}
