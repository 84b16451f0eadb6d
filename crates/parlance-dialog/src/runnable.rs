//! Skill runnable: one skill's completion call with bounded retry.
//!
//! The runnable is the last line of defense before the caller speaks to the
//! user: it never returns an error. Transient backend failures are retried up
//! to a bounded count; on exhaustion (or any unrecoverable error) the turn
//! degrades to a fixed apology message tagged with the failing skill's name.

use crate::backend::{CompletionBackend, CompletionRequest};
use crate::event::EventSink;
use crate::skill::SkillDescriptor;
use crate::tools::ToolSchema;
use parlance_core::{ConversationSession, Message};
use std::sync::Arc;
use tracing::{error, warn};

/// Spoken when a skill's completion cannot be produced.
pub const APOLOGY_TEXT: &str = "Apologies. There are some errors on our end.";

/// Wraps one skill's prompt, bound tool schemas, and the completion backend.
pub struct SkillRunnable {
    skill: Arc<SkillDescriptor>,
    backend: Arc<dyn CompletionBackend>,
    tools: Vec<ToolSchema>,
    retry_limit: u32,
}

impl SkillRunnable {
    pub fn new(
        skill: Arc<SkillDescriptor>,
        backend: Arc<dyn CompletionBackend>,
        tools: Vec<ToolSchema>,
        retry_limit: u32,
    ) -> Self {
        Self {
            skill,
            backend,
            tools,
            retry_limit: retry_limit.max(1),
        }
    }

    pub fn skill_name(&self) -> &str {
        &self.skill.name
    }

    /// Produces the skill's next message: either a final answer or a message
    /// carrying a tool-call request. Never fails; degraded turns come back as
    /// an apology tagged with this skill's name.
    pub async fn invoke(&self, session: &ConversationSession, events: &EventSink) -> Message {
        let system_prompt = self.skill.system_prompt(session);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let request = CompletionRequest {
                node: &self.skill.name,
                system_prompt: system_prompt.clone(),
                messages: &session.messages,
                tools: &self.tools,
            };
            match self.backend.complete(request, events).await {
                Ok(message) => {
                    if message.tool_calls.len() > 1 {
                        // Parallel tool calls are disabled upstream; only the
                        // first is routed.
                        warn!(
                            skill = %self.skill.name,
                            count = message.tool_calls.len(),
                            "completion carried multiple tool calls; routing the first only"
                        );
                    }
                    return message;
                }
                Err(err) if err.is_transient() && attempt < self.retry_limit => {
                    warn!(
                        skill = %self.skill.name,
                        attempt,
                        error = %err,
                        "transient completion failure; retrying"
                    );
                }
                Err(err) => {
                    error!(
                        skill = %self.skill.name,
                        attempt,
                        error = %err,
                        "completion failed; degrading to apology"
                    );
                    // The apology is still spoken output: stream it so the
                    // caller hears a sentence even on the degraded path.
                    events.emit(crate::event::TurnEvent::StreamChunk {
                        node: self.skill.name.clone(),
                        delta: APOLOGY_TEXT.to_string(),
                    });
                    return Message::assistant(APOLOGY_TEXT).degraded(self.skill.name.clone());
                }
            }
        }
    }
}
