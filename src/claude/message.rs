//! Discriminated unions of the stream-json protocol
//!
//! Every union is dispatched on a string tag (`type`, `subtype`, or the inner
//! event `type`). Unrecognized tags decode to an inert `Unknown` leaf; only
//! malformed JSON or a missing required field is an error.

use serde::de::{self, DeserializeOwned};
use serde::{ser, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};

use super::types::*;
use super::value::JsonValue;

/// Wire serde impls in terms of `from_json` / `to_json`.
macro_rules! tagged_union {
    ($ty:ty) => {
        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let value = Value::deserialize(deserializer)?;
                Self::from_json(value).map_err(de::Error::custom)
            }
        }

        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                self.to_json()
                    .map_err(ser::Error::custom)?
                    .serialize(serializer)
            }
        }
    };
}

/// One line of CLI output
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    System(SystemMessage),
    Assistant(AssistantMessage),
    User(UserMessage),
    Result(ResultMessage),
    StreamEvent(StreamEventMessage),
    ToolProgress(ToolProgress),
    ToolUseSummary(ToolUseSummary),
    AuthStatus(AuthStatus),
    RateLimit(RateLimitEvent),
    /// `raw` is the line's JSON in compact form, keys sorted. It is the same
    /// text serializing this variant produces, so it survives a re-decode.
    Unknown { message_type: String, raw: String },
}

impl WireMessage {
    pub fn from_json(value: Value) -> Result<Self, serde_json::Error> {
        let tag = tag(&value, "type")?;
        Ok(match tag.as_str() {
            "system" => Self::System(SystemMessage::from_json(value)?),
            "assistant" => Self::Assistant(variant(value)?),
            "user" => Self::User(variant(value)?),
            "result" => Self::Result(variant(value)?),
            "stream_event" => Self::StreamEvent(variant(value)?),
            "tool_progress" => Self::ToolProgress(variant(value)?),
            "tool_use_summary" => Self::ToolUseSummary(variant(value)?),
            "auth_status" => Self::AuthStatus(variant(value)?),
            "rate_limit_event" => Self::RateLimit(variant(value)?),
            _ => Self::Unknown {
                raw: value.to_string(),
                message_type: tag,
            },
        })
    }

    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::System(system) => insert_tag(system.to_json()?, "type", "system"),
            Self::Assistant(m) => with_tag(m, "type", "assistant"),
            Self::User(m) => with_tag(m, "type", "user"),
            Self::Result(m) => with_tag(m, "type", "result"),
            Self::StreamEvent(m) => with_tag(m, "type", "stream_event"),
            Self::ToolProgress(m) => with_tag(m, "type", "tool_progress"),
            Self::ToolUseSummary(m) => with_tag(m, "type", "tool_use_summary"),
            Self::AuthStatus(m) => with_tag(m, "type", "auth_status"),
            Self::RateLimit(m) => with_tag(m, "type", "rate_limit_event"),
            Self::Unknown { message_type, raw } => match serde_json::from_str(raw) {
                Ok(value) => Ok(value),
                Err(_) => Ok(json!({ "type": message_type })),
            },
        }
    }

    /// Wire tag, for logging
    pub fn kind(&self) -> &str {
        match self {
            Self::System(_) => "system",
            Self::Assistant(_) => "assistant",
            Self::User(_) => "user",
            Self::Result(_) => "result",
            Self::StreamEvent(_) => "stream_event",
            Self::ToolProgress(_) => "tool_progress",
            Self::ToolUseSummary(_) => "tool_use_summary",
            Self::AuthStatus(_) => "auth_status",
            Self::RateLimit(_) => "rate_limit_event",
            Self::Unknown { message_type, .. } => message_type,
        }
    }
}

tagged_union!(WireMessage);

/// `type: "system"`, discriminated by `subtype`
#[derive(Debug, Clone, PartialEq)]
pub enum SystemMessage {
    Init(SystemInit),
    CompactBoundary(CompactBoundary),
    Status(StatusUpdate),
    HookStarted(HookStarted),
    HookProgress(HookProgress),
    HookResponse(HookResponse),
    TaskStarted(TaskStarted),
    TaskNotification(TaskNotification),
    FilesPersisted(FilesPersisted),
    Unknown { subtype: String },
}

impl SystemMessage {
    pub fn from_json(value: Value) -> Result<Self, serde_json::Error> {
        let subtype = tag(&value, "subtype")?;
        Ok(match subtype.as_str() {
            "init" => Self::Init(variant(value)?),
            "compact_boundary" => Self::CompactBoundary(variant(value)?),
            "status" => Self::Status(variant(value)?),
            "hook_started" => Self::HookStarted(variant(value)?),
            "hook_progress" => Self::HookProgress(variant(value)?),
            "hook_response" => Self::HookResponse(variant(value)?),
            "task_started" => Self::TaskStarted(variant(value)?),
            "task_notification" => Self::TaskNotification(variant(value)?),
            "files_persisted" => Self::FilesPersisted(variant(value)?),
            _ => Self::Unknown { subtype },
        })
    }

    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::Init(m) => with_tag(m, "subtype", "init"),
            Self::CompactBoundary(m) => with_tag(m, "subtype", "compact_boundary"),
            Self::Status(m) => with_tag(m, "subtype", "status"),
            Self::HookStarted(m) => with_tag(m, "subtype", "hook_started"),
            Self::HookProgress(m) => with_tag(m, "subtype", "hook_progress"),
            Self::HookResponse(m) => with_tag(m, "subtype", "hook_response"),
            Self::TaskStarted(m) => with_tag(m, "subtype", "task_started"),
            Self::TaskNotification(m) => with_tag(m, "subtype", "task_notification"),
            Self::FilesPersisted(m) => with_tag(m, "subtype", "files_persisted"),
            Self::Unknown { subtype } => Ok(json!({ "subtype": subtype })),
        }
    }
}

tagged_union!(SystemMessage);

/// Raw Anthropic streaming event, wrapped by `type: "stream_event"`
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    MessageStart(MessageStart),
    MessageDelta(MessageDelta),
    MessageStop,
    ContentBlockStart(ContentBlockStart),
    ContentBlockDelta(ContentBlockDelta),
    ContentBlockStop(ContentBlockStop),
    Unknown { event_type: String },
}

impl StreamEvent {
    pub fn from_json(value: Value) -> Result<Self, serde_json::Error> {
        let event_type = tag(&value, "type")?;
        Ok(match event_type.as_str() {
            "message_start" => Self::MessageStart(variant(value)?),
            "message_delta" => Self::MessageDelta(variant(value)?),
            "message_stop" => Self::MessageStop,
            "content_block_start" => Self::ContentBlockStart(variant(value)?),
            "content_block_delta" => Self::ContentBlockDelta(variant(value)?),
            "content_block_stop" => Self::ContentBlockStop(variant(value)?),
            _ => Self::Unknown { event_type },
        })
    }

    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::MessageStart(e) => with_tag(e, "type", "message_start"),
            Self::MessageDelta(e) => with_tag(e, "type", "message_delta"),
            Self::MessageStop => Ok(json!({ "type": "message_stop" })),
            Self::ContentBlockStart(e) => with_tag(e, "type", "content_block_start"),
            Self::ContentBlockDelta(e) => with_tag(e, "type", "content_block_delta"),
            Self::ContentBlockStop(e) => with_tag(e, "type", "content_block_stop"),
            Self::Unknown { event_type } => Ok(json!({ "type": event_type })),
        }
    }
}

tagged_union!(StreamEvent);

/// Content block, both inside full messages and in `content_block_start`
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text(TextBlock),
    Thinking(ThinkingBlock),
    RedactedThinking(RedactedThinkingBlock),
    ToolUse(ToolUseBlock),
    ServerToolUse(ToolUseBlock),
    McpToolUse(McpToolUseBlock),
    McpToolResult(McpToolResultBlock),
    Compaction(CompactionBlock),
    /// Payload without its `type` key
    WebSearchResult(JsonValue),
    WebFetchResult(JsonValue),
    Unknown { block_type: String },
}

impl ContentBlock {
    pub fn from_json(value: Value) -> Result<Self, serde_json::Error> {
        let block_type = tag(&value, "type")?;
        Ok(match block_type.as_str() {
            "text" => Self::Text(variant(value)?),
            "thinking" => Self::Thinking(variant(value)?),
            "redacted_thinking" => Self::RedactedThinking(variant(value)?),
            "tool_use" => Self::ToolUse(variant(value)?),
            "server_tool_use" => Self::ServerToolUse(variant(value)?),
            "mcp_tool_use" => Self::McpToolUse(variant(value)?),
            "mcp_tool_result" => Self::McpToolResult(variant(value)?),
            "compaction" => Self::Compaction(variant(value)?),
            "web_search_tool_result" => Self::WebSearchResult(untagged_payload(value)),
            "web_fetch_tool_result" => Self::WebFetchResult(untagged_payload(value)),
            _ => Self::Unknown { block_type },
        })
    }

    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::Text(b) => with_tag(b, "type", "text"),
            Self::Thinking(b) => with_tag(b, "type", "thinking"),
            Self::RedactedThinking(b) => with_tag(b, "type", "redacted_thinking"),
            Self::ToolUse(b) => with_tag(b, "type", "tool_use"),
            Self::ServerToolUse(b) => with_tag(b, "type", "server_tool_use"),
            Self::McpToolUse(b) => with_tag(b, "type", "mcp_tool_use"),
            Self::McpToolResult(b) => with_tag(b, "type", "mcp_tool_result"),
            Self::Compaction(b) => with_tag(b, "type", "compaction"),
            Self::WebSearchResult(p) => with_tag(p, "type", "web_search_tool_result"),
            Self::WebFetchResult(p) => with_tag(p, "type", "web_fetch_tool_result"),
            Self::Unknown { block_type } => Ok(json!({ "type": block_type })),
        }
    }

    pub fn text_value(&self) -> Option<&str> {
        match self {
            Self::Text(block) => Some(&block.text),
            _ => None,
        }
    }
}

tagged_union!(ContentBlock);

/// Incremental fragment of a content block
#[derive(Debug, Clone, PartialEq)]
pub enum ContentDelta {
    TextDelta(String),
    /// Partial JSON text of a tool input; fragments are concatenated, not merged
    InputJsonDelta(String),
    ThinkingDelta(String),
    SignatureDelta(String),
    CitationsDelta(JsonValue),
    CompactionDelta(Option<String>),
    Unknown { delta_type: String },
}

impl ContentDelta {
    pub fn from_json(value: Value) -> Result<Self, serde_json::Error> {
        let delta_type = tag(&value, "type")?;
        Ok(match delta_type.as_str() {
            "text_delta" => Self::TextDelta(field(&value, "text")?),
            "input_json_delta" => Self::InputJsonDelta(field(&value, "partial_json")?),
            "thinking_delta" => Self::ThinkingDelta(field(&value, "thinking")?),
            "signature_delta" => Self::SignatureDelta(field(&value, "signature")?),
            "citations_delta" => Self::CitationsDelta(field(&value, "citation")?),
            "compaction_delta" => Self::CompactionDelta(optional_field(&value, "content")?),
            _ => Self::Unknown { delta_type },
        })
    }

    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        Ok(match self {
            Self::TextDelta(text) => json!({ "type": "text_delta", "text": text }),
            Self::InputJsonDelta(partial) => {
                json!({ "type": "input_json_delta", "partial_json": partial })
            }
            Self::ThinkingDelta(thinking) => {
                json!({ "type": "thinking_delta", "thinking": thinking })
            }
            Self::SignatureDelta(signature) => {
                json!({ "type": "signature_delta", "signature": signature })
            }
            Self::CitationsDelta(citation) => {
                json!({ "type": "citations_delta", "citation": serde_json::to_value(citation)? })
            }
            Self::CompactionDelta(content) => {
                json!({ "type": "compaction_delta", "content": content })
            }
            Self::Unknown { delta_type } => json!({ "type": delta_type }),
        })
    }
}

tagged_union!(ContentDelta);

fn tag(value: &Value, key: &'static str) -> Result<String, serde_json::Error> {
    match value.get(key) {
        Some(Value::String(tag)) => Ok(tag.clone()),
        Some(_) => Err(<serde_json::Error as de::Error>::custom(format!(
            "`{key}` must be a string"
        ))),
        None => Err(<serde_json::Error as de::Error>::missing_field(key)),
    }
}

fn variant<T: DeserializeOwned>(value: Value) -> Result<T, serde_json::Error> {
    serde_json::from_value(value)
}

fn field<T: DeserializeOwned>(value: &Value, key: &'static str) -> Result<T, serde_json::Error> {
    match value.get(key) {
        Some(inner) => T::deserialize(inner),
        None => Err(<serde_json::Error as de::Error>::missing_field(key)),
    }
}

fn optional_field<T: DeserializeOwned>(
    value: &Value,
    key: &'static str,
) -> Result<Option<T>, serde_json::Error> {
    match value.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(inner) => T::deserialize(inner).map(Some),
    }
}

fn untagged_payload(mut value: Value) -> JsonValue {
    if let Value::Object(map) = &mut value {
        map.remove("type");
    }
    JsonValue::from(value)
}

fn with_tag<T: Serialize>(inner: &T, key: &str, tag: &str) -> Result<Value, serde_json::Error> {
    insert_tag(serde_json::to_value(inner)?, key, tag)
}

fn insert_tag(mut value: Value, key: &str, tag: &str) -> Result<Value, serde_json::Error> {
    match &mut value {
        Value::Object(map) => {
            map.insert(key.to_string(), Value::String(tag.to_string()));
            Ok(value)
        }
        _ => Err(<serde_json::Error as ser::Error>::custom(format!(
            "`{tag}` payload must serialize to a JSON object"
        ))),
    }
}
