//! Conversation session state: message history and the dialog stack.
//!
//! One `ConversationSession` exists per call. Messages are append-only within
//! a turn and never reordered. The dialog stack records which skill currently
//! owns the conversation: empty means the primary assistant, top-of-stack is
//! the active sub-skill.

use crate::language::{profile_for, CallDirection, Language, LanguageProfile};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Name of the skill that owns the conversation when the dialog stack is empty.
pub const PRIMARY_SKILL: &str = "primary";

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A pending tool invocation attached to an assistant message.
///
/// The routing logic only ever inspects the first tool call of a message;
/// parallel tool calls are disabled upstream and unsupported here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlation id; tool results answer it.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            arguments,
        }
    }
}

/// One turn entry in the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Tool invocations requested by an assistant message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Correlation id answered by a tool result message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Set when this message is a degraded apology fallback, naming the skill
    /// whose completion failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degraded_by: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            degraded_by: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            degraded_by: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            degraded_by: None,
        }
    }

    pub fn assistant_tool_call(content: impl Into<String>, call: ToolCall) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: vec![call],
            tool_call_id: None,
            degraded_by: None,
        }
    }

    /// A structured tool result answering the given correlation id.
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
            degraded_by: None,
        }
    }

    pub fn degraded(mut self, skill: impl Into<String>) -> Self {
        self.degraded_by = Some(skill.into());
        self
    }

    /// The first tool call, if any. The engine handles at most one call per
    /// message.
    pub fn first_tool_call(&self) -> Option<&ToolCall> {
        self.tool_calls.first()
    }
}

/// Per-call mutable record: message history, dialog stack, routing metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSession {
    /// Opaque id correlating this session to its persisted snapshot.
    pub thread_id: String,
    pub messages: Vec<Message>,
    /// Skill call stack. Push on entering a sub-skill, pop on leaving.
    pub dialog_stack: Vec<String>,
    pub language: Language,
    pub direction: CallDirection,
    pub profile: LanguageProfile,
    pub started_at: DateTime<Utc>,
}

impl ConversationSession {
    /// Creates a fresh session with a random thread id.
    pub fn new(language: Language, direction: CallDirection) -> Self {
        Self::with_thread_id(Uuid::new_v4().to_string(), language, direction)
    }

    pub fn with_thread_id(
        thread_id: impl Into<String>,
        language: Language,
        direction: CallDirection,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            messages: Vec::new(),
            dialog_stack: Vec::new(),
            language,
            direction,
            profile: profile_for(language, direction),
            started_at: Utc::now(),
        }
    }

    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Name of the skill that currently owns the conversation.
    pub fn active_skill(&self) -> &str {
        self.dialog_stack
            .last()
            .map(String::as_str)
            .unwrap_or(PRIMARY_SKILL)
    }

    pub fn push_skill(&mut self, name: impl Into<String>) {
        self.dialog_stack.push(name.into());
    }

    pub fn pop_skill(&mut self) -> Option<String> {
        self.dialog_stack.pop()
    }
}
