//! Folds one turn's decoded stream into accumulated state

use std::collections::HashMap;

use crate::claude::{
    decode_line_lenient, AssistantMessage, ContentBlock, ContentDelta, ResultMessage,
    StreamEvent, SystemMessage, ToolProgress, WireMessage,
};

use super::record::{FinalizedMessage, FinalizedToolCall, Role, ToolCallStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    Streaming,
    Finalizing,
    Done,
}

/// UI-facing change produced while a turn streams
#[derive(Debug, Clone, PartialEq)]
pub enum TurnUpdate {
    SessionStarted { session_id: String, model: String },
    TextDelta(String),
    /// Full text from a non-streamed assistant message
    TextReplaced(String),
    ThinkingDelta(String),
    ToolCallStarted { id: String, name: String },
    ToolInputDelta { id: String, partial_json: String },
    ToolCallCompleted { id: String },
    ToolProgress { id: String, elapsed_seconds: f64 },
    Usage { input_tokens: u64, output_tokens: u64 },
    Result(ResultMessage),
}

/// A tool invocation being reconstructed from stream events
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallAccumulator {
    pub id: String,
    pub name: String,
    pub input_json: String,
    pub is_complete: bool,
    pub elapsed_seconds: f64,
}

/// Turn state machine: `Idle -> Streaming -> Finalizing -> Done`.
///
/// One reducer per turn; it does not guard against concurrent turns.
#[derive(Debug)]
pub struct TurnReducer {
    phase: TurnPhase,
    model_id: Option<String>,
    session_id: Option<String>,
    session_model: Option<String>,
    text: String,
    tool_calls: Vec<ToolCallAccumulator>,
    /// Stream block index -> position in `tool_calls` for tool blocks not yet stopped
    open_tool_blocks: HashMap<u32, usize>,
    input_tokens: u64,
    output_tokens: u64,
    stop_reason: Option<String>,
    result: Option<ResultMessage>,
}

impl TurnReducer {
    /// `model_id` is the model requested for the turn, recorded on the message
    pub fn new(model_id: Option<String>) -> Self {
        Self {
            phase: TurnPhase::Idle,
            model_id,
            session_id: None,
            session_model: None,
            text: String::new(),
            tool_calls: Vec::new(),
            open_tool_blocks: HashMap::new(),
            input_tokens: 0,
            output_tokens: 0,
            stop_reason: None,
            result: None,
        }
    }

    /// Feed one raw output line. Blank and malformed lines are no-ops.
    pub fn apply_line(&mut self, line: &str) -> Vec<TurnUpdate> {
        if self.phase == TurnPhase::Idle {
            self.phase = TurnPhase::Streaming;
        }
        match decode_line_lenient(line) {
            Some(message) => self.apply(message),
            None => Vec::new(),
        }
    }

    pub fn apply(&mut self, message: WireMessage) -> Vec<TurnUpdate> {
        match self.phase {
            TurnPhase::Idle => self.phase = TurnPhase::Streaming,
            TurnPhase::Streaming => {}
            TurnPhase::Finalizing | TurnPhase::Done => {
                tracing::debug!("Ignoring {} event after the turn ended", message.kind());
                return Vec::new();
            }
        }

        let mut updates = Vec::new();
        match message {
            WireMessage::System(SystemMessage::Init(init)) => {
                if let Some(previous) = &self.session_id {
                    tracing::warn!(
                        "Second init event in one turn ({} after {})",
                        init.session_id,
                        previous
                    );
                }
                self.session_id = Some(init.session_id.clone());
                if !init.model.is_empty() {
                    self.session_model = Some(init.model.clone());
                }
                updates.push(TurnUpdate::SessionStarted {
                    session_id: init.session_id,
                    model: init.model,
                });
            }
            WireMessage::StreamEvent(wrapper) => self.apply_stream_event(wrapper.event, &mut updates),
            WireMessage::Assistant(message) => self.apply_assistant(message, &mut updates),
            WireMessage::ToolProgress(progress) => self.apply_tool_progress(progress, &mut updates),
            WireMessage::Result(result) => {
                if let Some(usage) = &result.usage {
                    self.input_tokens = usage.input_tokens.unwrap_or(self.input_tokens);
                    self.output_tokens = usage.output_tokens.unwrap_or(self.output_tokens);
                    updates.push(self.usage_update());
                }
                if self.session_id.is_none() {
                    self.session_id = result.session_id.clone();
                }
                self.stop_reason = result.stop_reason.clone();
                self.result = Some(result.clone());
                updates.push(TurnUpdate::Result(result));
                self.phase = TurnPhase::Finalizing;
            }
            _ => {}
        }
        updates
    }

    fn apply_stream_event(&mut self, event: StreamEvent, updates: &mut Vec<TurnUpdate>) {
        match event {
            StreamEvent::MessageStart(start) => {
                // Block indices restart with every API message
                self.open_tool_blocks.clear();
                if let Some(usage) = start.message.usage {
                    self.input_tokens = usage.input_tokens.unwrap_or(0);
                    updates.push(self.usage_update());
                }
            }
            StreamEvent::MessageDelta(delta) => {
                if let Some(usage) = delta.usage {
                    self.output_tokens += usage.output_tokens;
                    updates.push(self.usage_update());
                }
            }
            StreamEvent::ContentBlockStart(start) => {
                if let ContentBlock::ToolUse(tool) = start.content_block {
                    if self.open_tool_blocks.contains_key(&start.index) {
                        tracing::warn!(
                            "Tool block {} started while index {} was still open",
                            tool.id,
                            start.index
                        );
                    }
                    self.open_tool_blocks.insert(start.index, self.tool_calls.len());
                    updates.push(TurnUpdate::ToolCallStarted {
                        id: tool.id.clone(),
                        name: tool.name.clone(),
                    });
                    self.tool_calls.push(ToolCallAccumulator {
                        id: tool.id,
                        name: tool.name,
                        input_json: String::new(),
                        is_complete: false,
                        elapsed_seconds: 0.0,
                    });
                }
            }
            StreamEvent::ContentBlockDelta(delta) => match delta.delta {
                ContentDelta::TextDelta(text) => {
                    self.text.push_str(&text);
                    updates.push(TurnUpdate::TextDelta(text));
                }
                ContentDelta::InputJsonDelta(fragment) => {
                    let Some(&pos) = self.open_tool_blocks.get(&delta.index) else {
                        tracing::warn!(
                            "Dropping input_json_delta for index {} with no open tool block",
                            delta.index
                        );
                        return;
                    };
                    let tool = &mut self.tool_calls[pos];
                    tool.input_json.push_str(&fragment);
                    updates.push(TurnUpdate::ToolInputDelta {
                        id: tool.id.clone(),
                        partial_json: fragment,
                    });
                }
                ContentDelta::ThinkingDelta(thinking) => {
                    updates.push(TurnUpdate::ThinkingDelta(thinking));
                }
                _ => {}
            },
            StreamEvent::ContentBlockStop(stop) => {
                if let Some(pos) = self.open_tool_blocks.remove(&stop.index) {
                    let tool = &mut self.tool_calls[pos];
                    tool.is_complete = true;
                    updates.push(TurnUpdate::ToolCallCompleted {
                        id: tool.id.clone(),
                    });
                }
            }
            StreamEvent::MessageStop | StreamEvent::Unknown { .. } => {}
        }
    }

    fn apply_assistant(&mut self, message: AssistantMessage, updates: &mut Vec<TurnUpdate>) {
        let body = message.message;

        // Non-streaming path: the full message is all we get
        let text = body.text_content();
        if !text.is_empty() && self.text.is_empty() {
            self.text = text.clone();
            updates.push(TurnUpdate::TextReplaced(text));
        }

        for tool in body.tool_uses() {
            if self.tool_calls.iter().any(|t| t.id == tool.id) {
                continue;
            }
            updates.push(TurnUpdate::ToolCallStarted {
                id: tool.id.clone(),
                name: tool.name.clone(),
            });
            updates.push(TurnUpdate::ToolCallCompleted {
                id: tool.id.clone(),
            });
            self.tool_calls.push(ToolCallAccumulator {
                id: tool.id.clone(),
                name: tool.name.clone(),
                input_json: tool.input.to_string(),
                is_complete: true,
                elapsed_seconds: 0.0,
            });
        }

        if let Some(usage) = body.usage {
            self.input_tokens = usage.input_tokens.unwrap_or(self.input_tokens);
            self.output_tokens = usage.output_tokens.unwrap_or(self.output_tokens);
            updates.push(self.usage_update());
        }
    }

    fn apply_tool_progress(&mut self, progress: ToolProgress, updates: &mut Vec<TurnUpdate>) {
        if let Some(tool) = self
            .tool_calls
            .iter_mut()
            .find(|t| t.id == progress.tool_use_id)
        {
            tool.elapsed_seconds = progress.elapsed_time_seconds;
            updates.push(TurnUpdate::ToolProgress {
                id: progress.tool_use_id,
                elapsed_seconds: progress.elapsed_time_seconds,
            });
        }
    }

    fn usage_update(&self) -> TurnUpdate {
        TurnUpdate::Usage {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
        }
    }

    /// The stream ended: EOF, cancellation or a read error
    pub fn end_stream(&mut self) {
        if matches!(self.phase, TurnPhase::Idle | TurnPhase::Streaming) {
            self.phase = TurnPhase::Finalizing;
        }
    }

    /// Produce the finalized message, at most once.
    ///
    /// Returns `None` when the turn produced neither text nor tool calls.
    pub fn finalize(&mut self) -> Option<FinalizedMessage> {
        if self.phase == TurnPhase::Done {
            return None;
        }
        self.end_stream();
        self.phase = TurnPhase::Done;

        if self.text.is_empty() && self.tool_calls.is_empty() {
            return None;
        }

        let tool_calls = self
            .tool_calls
            .drain(..)
            .map(|tool| FinalizedToolCall {
                tool_use_id: tool.id,
                tool_name: tool.name,
                input_json: tool.input_json,
                status: if tool.is_complete {
                    ToolCallStatus::Completed
                } else {
                    ToolCallStatus::Pending
                },
                elapsed_seconds: tool.elapsed_seconds,
            })
            .collect();
        self.open_tool_blocks.clear();

        Some(FinalizedMessage {
            role: Role::Assistant,
            content: std::mem::take(&mut self.text),
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            model_id: self.model_id.clone().or_else(|| self.session_model.clone()),
            stop_reason: self.stop_reason.clone(),
            tool_calls,
        })
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn tool_calls(&self) -> &[ToolCallAccumulator] {
        &self.tool_calls
    }

    pub fn input_tokens(&self) -> u64 {
        self.input_tokens
    }

    pub fn output_tokens(&self) -> u64 {
        self.output_tokens
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn stop_reason(&self) -> Option<&str> {
        self.stop_reason.as_deref()
    }

    pub fn result(&self) -> Option<&ResultMessage> {
        self.result.as_ref()
    }
}
