//! Record types carried by Claude CLI stream-json output
//!
//! The discriminated unions that tie these together live in `message.rs`.
//! Fields the CLI has been seen to omit default instead of failing the line.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::message::{ContentBlock, ContentDelta, StreamEvent};
use super::value::JsonValue;

// System messages

/// First event of every invocation; carries the authoritative session id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemInit {
    pub session_id: String,
    #[serde(default)]
    pub cwd: String,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub mcp_servers: Vec<McpServerInfo>,
    #[serde(default)]
    pub model: String,
    #[serde(rename = "permissionMode", default)]
    pub permission_mode: String,
    #[serde(default)]
    pub slash_commands: Vec<String>,
    pub output_style: Option<String>,
    pub agents: Option<Vec<String>>,
    pub skills: Option<Vec<String>>,
    pub plugins: Option<Vec<PluginInfo>>,
    pub claude_code_version: Option<String>,
    #[serde(rename = "apiKeySource")]
    pub api_key_source: Option<String>,
    pub uuid: Option<String>,
    pub fast_mode_state: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpServerInfo {
    pub name: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginInfo {
    pub name: String,
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactBoundary {
    pub compact_metadata: Option<CompactMetadata>,
    pub uuid: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactMetadata {
    /// "manual" or "auto"
    pub trigger: String,
    #[serde(default)]
    pub pre_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// "compacting" or null
    pub status: Option<String>,
    #[serde(rename = "permissionMode")]
    pub permission_mode: Option<String>,
    pub uuid: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookStarted {
    pub hook_id: String,
    #[serde(default)]
    pub hook_name: String,
    #[serde(default)]
    pub hook_event: String,
    pub uuid: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookProgress {
    pub hook_id: String,
    #[serde(default)]
    pub hook_name: String,
    #[serde(default)]
    pub hook_event: String,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub output: String,
    pub uuid: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookResponse {
    pub hook_id: String,
    #[serde(default)]
    pub hook_name: String,
    #[serde(default)]
    pub hook_event: String,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    pub exit_code: Option<i32>,
    /// "success", "error" or "cancelled"
    #[serde(default)]
    pub outcome: String,
    pub uuid: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStarted {
    pub task_id: String,
    pub tool_use_id: Option<String>,
    #[serde(default)]
    pub description: String,
    pub task_type: Option<String>,
    pub uuid: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskNotification {
    pub task_id: String,
    pub tool_use_id: Option<String>,
    /// "completed", "failed" or "stopped"
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub output_file: String,
    #[serde(default)]
    pub summary: String,
    pub uuid: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilesPersisted {
    #[serde(default)]
    pub files: Vec<PersistedFile>,
    #[serde(default)]
    pub failed: Vec<PersistedFileFailure>,
    #[serde(default)]
    pub processed_at: String,
    pub uuid: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedFile {
    pub filename: String,
    pub file_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedFileFailure {
    pub filename: String,
    pub error: String,
}

// Assistant and user messages

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub message: AssistantMessageBody,
    pub parent_tool_use_id: Option<String>,
    pub error: Option<String>,
    pub uuid: Option<String>,
    pub session_id: Option<String>,
}

/// An Anthropic API message as echoed by the CLI
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AssistantMessageBody {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    pub stop_reason: Option<String>,
    pub stop_sequence: Option<String>,
    pub usage: Option<Usage>,
    pub context_management: Option<JsonValue>,
}

impl AssistantMessageBody {
    /// Concatenated text of every text block
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentBlock::text_value)
            .collect()
    }

    pub fn tool_uses(&self) -> impl Iterator<Item = &ToolUseBlock> {
        self.content.iter().filter_map(|block| match block {
            ContentBlock::ToolUse(tool) => Some(tool),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    pub message: UserMessageBody,
    pub parent_tool_use_id: Option<String>,
    #[serde(rename = "isSynthetic")]
    pub is_synthetic: Option<bool>,
    pub uuid: Option<String>,
    pub session_id: Option<String>,
    #[serde(rename = "isReplay")]
    pub is_replay: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessageBody {
    #[serde(default)]
    pub role: String,
    /// Either a plain string or a list of content block params
    #[serde(default)]
    pub content: JsonValue,
}

// Stream events

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEventMessage {
    pub event: StreamEvent,
    pub parent_tool_use_id: Option<String>,
    pub uuid: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageStart {
    pub message: AssistantMessageBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDelta {
    #[serde(default)]
    pub delta: MessageDeltaBody,
    pub usage: Option<DeltaUsage>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MessageDeltaBody {
    pub stop_reason: Option<String>,
    pub stop_sequence: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeltaUsage {
    pub input_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens: u64,
    pub cache_read_input_tokens: Option<u64>,
    pub cache_creation_input_tokens: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentBlockStart {
    pub index: u32,
    pub content_block: ContentBlock,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentBlockDelta {
    pub index: u32,
    pub delta: ContentDelta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentBlockStop {
    pub index: u32,
}

// Content blocks

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
    pub citations: Option<Vec<JsonValue>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThinkingBlock {
    pub thinking: String,
    #[serde(default)]
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedactedThinkingBlock {
    pub data: String,
}

/// Used for both client-side `tool_use` and `server_tool_use` blocks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUseBlock {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub input: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpToolUseBlock {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub server_name: String,
    #[serde(default)]
    pub input: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpToolResultBlock {
    pub tool_use_id: String,
    /// A string or a list of text blocks
    #[serde(default)]
    pub content: JsonValue,
    #[serde(default)]
    pub is_error: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactionBlock {
    pub content: Option<String>,
}

// Result

/// Final event of a turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMessage {
    /// "success", "error_during_execution", "error_max_turns" or "error_max_budget_usd"
    pub subtype: String,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub duration_ms: u64,
    pub duration_api_ms: Option<u64>,
    #[serde(default)]
    pub num_turns: u32,
    /// Present on success
    pub result: Option<String>,
    /// Present on error subtypes
    pub errors: Option<Vec<String>>,
    pub stop_reason: Option<String>,
    pub session_id: Option<String>,
    #[serde(default)]
    pub total_cost_usd: f64,
    pub usage: Option<Usage>,
    #[serde(rename = "modelUsage")]
    pub model_usage: Option<BTreeMap<String, ModelUsage>>,
    pub permission_denials: Option<Vec<PermissionDenial>>,
    pub uuid: Option<String>,
}

impl ResultMessage {
    pub fn is_success(&self) -> bool {
        self.subtype == "success"
    }

    /// One line describing why the turn failed
    pub fn error_summary(&self) -> String {
        match &self.errors {
            Some(errors) if !errors.is_empty() => errors.join("; "),
            _ => match &self.result {
                Some(text) if !text.is_empty() => text.clone(),
                _ => self.subtype.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
    pub web_search_requests: Option<u64>,
    #[serde(rename = "costUSD", default)]
    pub cost_usd: f64,
    #[serde(default)]
    pub context_window: u64,
    #[serde(default)]
    pub max_output_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionDenial {
    pub tool_name: String,
    pub tool_use_id: String,
    pub tool_input: Option<JsonValue>,
}

// Other top-level messages

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolProgress {
    pub tool_use_id: String,
    #[serde(default)]
    pub tool_name: String,
    pub parent_tool_use_id: Option<String>,
    #[serde(default)]
    pub elapsed_time_seconds: f64,
    pub task_id: Option<String>,
    pub uuid: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUseSummary {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub preceding_tool_use_ids: Vec<String>,
    pub uuid: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthStatus {
    #[serde(rename = "isAuthenticating", default)]
    pub is_authenticating: bool,
    #[serde(default)]
    pub output: Vec<String>,
    pub error: Option<String>,
    pub uuid: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitEvent {
    pub rate_limit_info: RateLimitInfo,
    pub uuid: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitInfo {
    /// "allowed" or "rate_limited"
    pub status: String,
    pub resets_at: Option<i64>,
    pub rate_limit_type: Option<String>,
    pub overage_status: Option<String>,
    pub overage_disabled_reason: Option<String>,
    pub is_using_overage: Option<bool>,
}

// Usage

/// Token usage, both per message and aggregated on `result`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub cache_read_input_tokens: Option<u64>,
    pub cache_creation_input_tokens: Option<u64>,
    pub cache_creation: Option<CacheCreation>,
    pub service_tier: Option<String>,
    pub speed: Option<String>,
    pub inference_geo: Option<String>,
    pub server_tool_use: Option<ServerToolUsage>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CacheCreation {
    pub ephemeral_1h_input_tokens: Option<u64>,
    pub ephemeral_5m_input_tokens: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ServerToolUsage {
    pub web_search_requests: Option<u64>,
    pub web_fetch_requests: Option<u64>,
}
