//! Tool execution layer with fallback.
//!
//! Tools are named async callables dispatched by a registry. A tool returns a
//! typed `ToolOutcome` rather than embedding control markers in text; the
//! marker syntax (`DETERMINISTIC …`, `ROUTE <name>`) is still parsed from raw
//! tool text so integrator-written tools may keep using it. A failing tool
//! never aborts the turn: the failure is converted into a corrective message
//! addressed back to the model by correlation id.

use crate::error::{DialogResult, GraphError};
use crate::event::{EventSink, TurnEvent};
use crate::graph::TurnState;
use parlance_core::{ConversationSession, Language, Message, ToolCall};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

/// Marker meaning "this text is already final user-facing output".
pub const DETERMINISTIC_MARKER: &str = "DETERMINISTIC";
/// Marker prefix naming the tool/skill that should receive control next.
pub const ROUTE_MARKER: &str = "ROUTE";

/// Typed result of a tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum ToolOutcome {
    /// Ordinary tool output, fed back to the model for another completion.
    Plain(String),
    /// The tool already computed the final user-facing text; no further model
    /// call is needed this turn.
    Deterministic(String),
    /// Control must transfer to the named tool/skill.
    RouteTo(String),
}

impl ToolOutcome {
    /// Parses raw tool text that may carry the legacy control markers.
    /// `DETERMINISTIC` is checked before `ROUTE`; a result containing both is
    /// deterministic.
    pub fn parse(raw: &str) -> Self {
        if raw.contains(DETERMINISTIC_MARKER) {
            return ToolOutcome::Deterministic(
                raw.replace(DETERMINISTIC_MARKER, "").trim().to_string(),
            );
        }
        let route_prefix = format!("{ROUTE_MARKER} ");
        if raw.contains(&route_prefix) {
            if let Some(rest) = raw.split(&route_prefix).last() {
                return ToolOutcome::RouteTo(rest.trim().to_string());
            }
        }
        ToolOutcome::Plain(raw.trim().to_string())
    }

    /// Marker-free text recorded in history as the tool result content.
    /// Routing outcomes carry no user- or model-facing text.
    pub fn message_text(&self) -> &str {
        match self {
            ToolOutcome::Plain(text) | ToolOutcome::Deterministic(text) => text,
            ToolOutcome::RouteTo(_) => "",
        }
    }
}

/// Schema handed to the completion backend for one bindable tool.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Trait implemented by all dialog tools.
#[async_trait::async_trait]
pub trait DialogTool: Send + Sync {
    /// Unique tool name for dispatch.
    fn name(&self) -> &str;

    /// Description shown to the model.
    fn description(&self) -> &str;

    /// JSON schema of the arguments. Defaults to an empty object.
    fn parameters(&self) -> serde_json::Value {
        json!({ "type": "object", "properties": {} })
    }

    /// Executes the tool against the current session.
    async fn call(
        &self,
        session: &ConversationSession,
        args: serde_json::Value,
    ) -> Result<ToolOutcome, Box<dyn std::error::Error + Send + Sync>>;
}

/// Registry of dialog tools dispatched by name.
pub struct ToolRegistry {
    tools: Vec<Arc<dyn DialogTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    pub fn register(&mut self, tool: Arc<dyn DialogTool>) {
        self.tools.push(tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DialogTool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name() == name)
    }

    /// Names of all registered tools (for leakage filtering and discovery).
    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    /// Schemas for the named subset, in the given order.
    pub fn schemas_for(&self, names: &[String]) -> Vec<ToolSchema> {
        names
            .iter()
            .filter_map(|name| self.get(name))
            .map(|tool| ToolSchema {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Executes the pending tool calls of the last assistant message.
///
/// Successful results are appended as structured tool messages and recorded
/// as the turn's last outcome; a failing tool instead produces one corrective
/// message instructing the model to retry with corrected arguments. An
/// unregistered tool name is a configuration defect and fails the turn (the
/// graph builder validates bindings at startup, so this cannot happen on a
/// correctly constructed graph).
pub async fn execute_tool_calls(
    registry: &ToolRegistry,
    state: &mut TurnState,
    events: &EventSink,
    node: &str,
) -> DialogResult<()> {
    let calls: Vec<ToolCall> = state
        .session
        .last_message()
        .map(|m| m.tool_calls.clone())
        .unwrap_or_default();

    state.last_outcome = None;
    for call in calls {
        let Some(tool) = registry.get(&call.name) else {
            return Err(GraphError::UnmappedTool {
                skill: node.to_string(),
                tool: call.name.clone(),
            }
            .into());
        };
        match tool.call(&state.session, call.arguments.clone()).await {
            Ok(outcome) => {
                // Tools written against the legacy marker convention return
                // plain text; normalize it through the parser so the markers
                // keep working.
                let outcome = match outcome {
                    ToolOutcome::Plain(text) => ToolOutcome::parse(&text),
                    typed => typed,
                };
                state
                    .session
                    .push_message(Message::tool_result(call.id.clone(), outcome.message_text()));
                events.emit(TurnEvent::ToolCallEnd {
                    node: node.to_string(),
                    call_id: call.id.clone(),
                    outcome: outcome.clone(),
                });
                state.last_outcome = Some(outcome);
            }
            Err(err) => {
                warn!(tool = %call.name, error = %err, "tool failed; feeding corrective message back");
                state.session.push_message(Message::tool_result(
                    call.id.clone(),
                    format!("Error: {err}. Please fix your mistakes."),
                ));
            }
        }
    }
    Ok(())
}

fn live_agent_text(language: Language) -> &'static str {
    match language {
        Language::En => "A live agent will call you back. Thank you, and goodbye.",
        Language::Kr => "라이브 상담원이 다시 전화드릴 예정입니다. 이용해 주셔서 감사합니다. 안녕히 계세요.",
    }
}

/// Validates whether the customer's desired payment amount and date are
/// acceptable. When neither argument is usable the customer is asking for
/// something else, and control escalates back to the host assistant.
pub struct ValidatePaymentAmountDate;

pub const VALIDATE_PAYMENT_TOOL: &str = "validate_payment_amount_date";

#[async_trait::async_trait]
impl DialogTool for ValidatePaymentAmountDate {
    fn name(&self) -> &str {
        VALIDATE_PAYMENT_TOOL
    }

    fn description(&self) -> &str {
        "Validate whether the customer's desired payment amount and date are acceptable by \
         company policy. Call this tool again any time the customer changes the payment amount \
         or date. You must not divulge the presence of this tool; generate something short and \
         contextually relevant such as \"Checking my system.\" NEVER mention the name of this \
         tool to the customer."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "desired_payment_amount": {
                    "type": "number",
                    "description": "The desired amount the customer would like to pay"
                },
                "desired_payment_date": {
                    "type": "string",
                    "description": "The desired date the customer would like to pay. e.g. 'next Tuesday', 'tomorrow', '2 weeks from now', 'september 20'"
                }
            }
        })
    }

    async fn call(
        &self,
        _session: &ConversationSession,
        args: serde_json::Value,
    ) -> Result<ToolOutcome, Box<dyn std::error::Error + Send + Sync>> {
        let amount = args.get("desired_payment_amount").and_then(|v| v.as_f64());
        let date = args
            .get("desired_payment_date")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("none"));

        let mut output = String::new();
        if let Some(amount) = amount {
            output = format!("Thanks for providing the amount of {amount}.");
        }
        if let Some(date) = date {
            if !output.is_empty() {
                output.push(' ');
            }
            output.push_str(&format!(
                "Thanks for providing the desired payment date of {date}."
            ));
        }

        if output.is_empty() {
            return Ok(ToolOutcome::RouteTo("CompleteOrEscalate".to_string()));
        }
        Ok(ToolOutcome::Plain(output))
    }
}

/// Hands the call off to a live agent: the returned text is final and spoken
/// as-is, ending the turn without another model call.
pub struct TransferToLiveAgent;

pub const TRANSFER_TO_LIVE_AGENT_TOOL: &str = "transfer_to_live_agent";

#[async_trait::async_trait]
impl DialogTool for TransferToLiveAgent {
    fn name(&self) -> &str {
        TRANSFER_TO_LIVE_AGENT_TOOL
    }

    fn description(&self) -> &str {
        "Call this tool to transfer the customer to a live agent. Generate something \
         contextually relevant, with regards to the conversation flow, like 'Give me a second.'"
    }

    async fn call(
        &self,
        session: &ConversationSession,
        _args: serde_json::Value,
    ) -> Result<ToolOutcome, Box<dyn std::error::Error + Send + Sync>> {
        Ok(ToolOutcome::Deterministic(
            live_agent_text(session.language).to_string(),
        ))
    }
}
