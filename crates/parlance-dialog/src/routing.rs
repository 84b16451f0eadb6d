//! Routing policy: pure decision functions over the turn state.
//!
//! Each function inspects the latest message or tool outcome and names the
//! next node (or ends the turn). Routing never mutates state and never
//! recovers from its own misconfiguration; unknown destinations are caught by
//! graph validation at startup.

use crate::graph::{Next, TurnState};
use crate::skill::SkillDescriptor;
use crate::tools::ToolOutcome;
use std::collections::HashMap;

/// Node that rewraps a deterministic tool result as an assistant message.
pub const NODE_DETERMINISTIC_WRAP: &str = "deterministic_wrap";
/// Node that translates a routed tool/skill name into a dialog node.
pub const NODE_ROUTE_BY_NAME: &str = "route_by_name";
/// Node that pops the dialog stack and resumes the host assistant.
pub const NODE_LEAVE_SKILL: &str = "leave_skill";
/// Administrative node emitting the deterministic account-note message.
pub const NODE_SENSITIVE_ACTION: &str = "sensitive_action";

/// Entry routing: a turn begins at whichever skill owns the conversation.
pub fn route_to_workflow(state: &TurnState) -> Next {
    Next::node(state.session.active_skill())
}

/// Routing after a skill's completion. No tool call ends the turn; an escape
/// tool transfers control to its configured node; any other call goes to the
/// skill's tool-execution node. The primary and sub-skill variants of the
/// original design share this shape, differing only in their escape maps.
pub fn route_assistant(state: &TurnState, skill: &SkillDescriptor) -> Next {
    let Some(last) = state.session.last_message() else {
        return Next::End;
    };
    let Some(call) = last.first_tool_call() else {
        return Next::End;
    };
    if let Some(target) = skill.escape_target(&call.name) {
        return Next::node(target);
    }
    Next::node(skill.tools_node_name())
}

/// Routing after tool execution, on the typed outcome of the last tool:
/// deterministic results bypass the model, routed results go through the
/// name-translation node, and anything else resumes whichever skill is on
/// top of the dialog stack. Deterministic wins over routing by construction
/// of `ToolOutcome::parse`.
pub fn route_after_tools(state: &TurnState) -> Next {
    match state.last_outcome {
        Some(ToolOutcome::Deterministic(_)) => Next::node(NODE_DETERMINISTIC_WRAP),
        Some(ToolOutcome::RouteTo(_)) => Next::node(NODE_ROUTE_BY_NAME),
        _ => Next::node(state.session.active_skill()),
    }
}

/// Translates the synthesized tool-call name into its dialog node, falling
/// back to the active skill for names without a mapping.
pub fn route_by_name(state: &TurnState, table: &HashMap<String, String>) -> Next {
    let routed = state
        .session
        .last_message()
        .and_then(|m| m.first_tool_call())
        .and_then(|call| table.get(&call.name));
    match routed {
        Some(node) => Next::node(node),
        None => Next::node(state.session.active_skill()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skill::{payment_collection_skills, COMPLETE_OR_ESCALATE_TOOL, TO_MAKE_PAYMENT_TOOL};
    use parlance_core::{
        CallDirection, ConversationSession, Language, Message, ToolCall,
    };
    use serde_json::json;

    fn state_with_last(message: Message) -> TurnState {
        let mut session = ConversationSession::new(Language::En, CallDirection::Inbound);
        session.push_message(message);
        TurnState::new(session)
    }

    #[test]
    fn entry_follows_dialog_stack() {
        let mut state = state_with_last(Message::user("hi"));
        assert_eq!(route_to_workflow(&state), Next::node("primary"));
        state.session.push_skill("make_payment");
        assert_eq!(route_to_workflow(&state), Next::node("make_payment"));
    }

    #[test]
    fn assistant_without_tool_call_ends_turn() {
        let skills = payment_collection_skills();
        let state = state_with_last(Message::assistant("All done."));
        assert_eq!(route_assistant(&state, &skills[0]), Next::End);
    }

    #[test]
    fn escape_tool_routes_to_entry_adapter() {
        let skills = payment_collection_skills();
        let state = state_with_last(Message::assistant_tool_call(
            "Give me a second.",
            ToolCall::new(TO_MAKE_PAYMENT_TOOL, json!({})),
        ));
        assert_eq!(
            route_assistant(&state, &skills[0]),
            Next::node("enter_make_payment")
        );
    }

    #[test]
    fn leave_sentinel_routes_to_pop_node() {
        let skills = payment_collection_skills();
        let state = state_with_last(Message::assistant_tool_call(
            "Give me a second.",
            ToolCall::new(COMPLETE_OR_ESCALATE_TOOL, json!({})),
        ));
        assert_eq!(
            route_assistant(&state, &skills[1]),
            Next::node(NODE_LEAVE_SKILL)
        );
    }

    #[test]
    fn ordinary_tool_call_routes_to_tool_node() {
        let skills = payment_collection_skills();
        let state = state_with_last(Message::assistant_tool_call(
            "Checking my system.",
            ToolCall::new("validate_payment_amount_date", json!({})),
        ));
        assert_eq!(
            route_assistant(&state, &skills[1]),
            Next::node("make_payment_tools")
        );
    }

    #[test]
    fn post_tool_routing_on_typed_outcome() {
        let mut state = state_with_last(Message::user("hi"));

        state.last_outcome = Some(ToolOutcome::Deterministic("done".to_string()));
        assert_eq!(route_after_tools(&state), Next::node(NODE_DETERMINISTIC_WRAP));

        state.last_outcome = Some(ToolOutcome::RouteTo("CompleteOrEscalate".to_string()));
        assert_eq!(route_after_tools(&state), Next::node(NODE_ROUTE_BY_NAME));

        state.last_outcome = Some(ToolOutcome::Plain("thanks".to_string()));
        state.session.push_skill("make_payment");
        assert_eq!(route_after_tools(&state), Next::node("make_payment"));

        state.last_outcome = None;
        assert_eq!(route_after_tools(&state), Next::node("make_payment"));
    }

    #[test]
    fn route_by_name_uses_table_with_stack_fallback() {
        let mut table = HashMap::new();
        table.insert(
            COMPLETE_OR_ESCALATE_TOOL.to_string(),
            NODE_LEAVE_SKILL.to_string(),
        );

        let state = state_with_last(Message::assistant_tool_call(
            "",
            ToolCall::new(COMPLETE_OR_ESCALATE_TOOL, json!({})),
        ));
        assert_eq!(route_by_name(&state, &table), Next::node(NODE_LEAVE_SKILL));

        let state = state_with_last(Message::assistant_tool_call(
            "",
            ToolCall::new("unmapped_tool", json!({})),
        ));
        assert_eq!(route_by_name(&state, &table), Next::node("primary"));
    }
}
