//! End-to-end turns through the dialog engine with a scripted backend.

use futures_util::StreamExt;
use parlance_core::{CallDirection, ConversationSession, Language, Role, PRIMARY_SKILL};
use parlance_dialog::{
    payment_collection_skills, payment_tool_registry, DialogEngine, DialogTool, EngineConfig,
    ScriptedBackend, ScriptedTurn, ToolOutcome, ToolRegistry, APOLOGY_TEXT,
    COMPLETE_OR_ESCALATE_TOOL, DETERMINISTIC_MARKER, ROUTE_MARKER, TO_MAKE_PAYMENT_TOOL,
    TRANSFER_TO_LIVE_AGENT_TOOL, VALIDATE_PAYMENT_TOOL,
};
use serde_json::json;
use std::sync::Arc;

fn engine_with_script(turns: Vec<ScriptedTurn>) -> DialogEngine {
    engine_with(payment_tool_registry(), turns, EngineConfig::default())
}

fn engine_with(
    registry: ToolRegistry,
    turns: Vec<ScriptedTurn>,
    config: EngineConfig,
) -> DialogEngine {
    let skills = payment_collection_skills();
    let backend = Arc::new(ScriptedBackend::new(turns));
    DialogEngine::new(&skills, Arc::new(registry), backend, config).unwrap()
}

fn fresh_session() -> ConversationSession {
    ConversationSession::new(Language::En, CallDirection::Inbound)
}

/// Runs one turn, draining every sentence, and returns them with the
/// finished session.
async fn run_and_collect(
    engine: &DialogEngine,
    session: ConversationSession,
    user_text: &str,
) -> (Vec<String>, ConversationSession) {
    let mut turn = engine.run_turn(session, user_text).await;
    let mut sentences = Vec::new();
    sentences.extend(turn.first_sentence.take());
    while let Some(sentence) = turn.sentences.next().await {
        sentences.push(sentence);
    }
    let session = turn.finish().await.unwrap();
    (sentences, session)
}

#[tokio::test]
async fn enter_and_leave_restores_dialog_stack() {
    let engine = engine_with_script(vec![
        // Turn 1: primary hands off to the make-payment assistant, which
        // then speaks.
        ScriptedTurn::tool(TO_MAKE_PAYMENT_TOOL, json!({}), "Give me a second."),
        ScriptedTurn::text("Sure. Would you like to pay the total of $300 today?"),
        // Turn 2: make-payment escalates back, and primary wraps up.
        ScriptedTurn::tool(COMPLETE_OR_ESCALATE_TOOL, json!({}), "One moment."),
        ScriptedTurn::text("Is there anything else I can help you with?"),
    ]);

    let session = fresh_session();
    let stack_before = session.dialog_stack.clone();

    let (sentences, session) = run_and_collect(&engine, session, "I want to make a payment").await;
    assert_eq!(session.dialog_stack, vec!["make_payment".to_string()]);
    assert_eq!(session.active_skill(), "make_payment");
    assert_eq!(sentences[0], "Give me a second.");
    assert_eq!(
        sentences.last().map(String::as_str),
        Some("Would you like to pay the total of $300 today?")
    );

    let (sentences, session) = run_and_collect(&engine, session, "Actually, never mind").await;
    // Entering then immediately leaving restores the stack exactly, and the
    // next turn begins at primary.
    assert_eq!(session.dialog_stack, stack_before);
    assert_eq!(session.active_skill(), PRIMARY_SKILL);
    assert_eq!(sentences[0], "One moment.");
    assert_eq!(
        sentences.last().map(String::as_str),
        Some("Is there anything else I can help you with?")
    );

    // The pop injected the resume instruction for the model.
    assert!(session
        .messages
        .iter()
        .any(|m| m.role == Role::Tool && m.content.contains("Resuming dialog")));
}

#[tokio::test]
async fn deterministic_transfer_short_circuits_the_turn() {
    let engine = engine_with_script(vec![ScriptedTurn::tool(
        TRANSFER_TO_LIVE_AGENT_TOOL,
        json!({}),
        "Give me a second.",
    )]);

    let (sentences, session) =
        run_and_collect(&engine, fresh_session(), "Let me talk to a human").await;

    assert_eq!(sentences[0], "Give me a second.");
    assert_eq!(
        sentences.last().map(String::as_str),
        Some("A live agent will call you back. Thank you, and goodbye.")
    );
    for sentence in &sentences {
        assert!(!sentence.contains(DETERMINISTIC_MARKER));
        assert!(!sentence.contains(ROUTE_MARKER));
        assert!(!sentence.contains(TRANSFER_TO_LIVE_AGENT_TOOL));
    }

    // The deterministic text was rewrapped as the turn's assistant message
    // without another model call (the script had exactly one turn).
    let last_assistant = session
        .messages
        .iter()
        .rev()
        .find(|m| m.role == Role::Assistant)
        .unwrap();
    assert_eq!(
        last_assistant.content,
        "A live agent will call you back. Thank you, and goodbye."
    );
}

#[tokio::test]
async fn validate_tool_without_arguments_escalates_to_primary() {
    let engine = engine_with_script(vec![
        // Turn 1: enter the make-payment skill.
        ScriptedTurn::tool(TO_MAKE_PAYMENT_TOOL, json!({}), "Give me a second."),
        ScriptedTurn::text("What amount and date work for you?"),
        // Turn 2: the skill calls validate with nothing usable; the tool
        // routes control back through the escalation path, the stack pops,
        // and primary speaks.
        ScriptedTurn::tool(VALIDATE_PAYMENT_TOOL, json!({}), "Checking my system."),
        ScriptedTurn::text("How else can I help you today?"),
    ]);

    let (_, session) = run_and_collect(&engine, fresh_session(), "I want to pay").await;
    assert_eq!(session.active_skill(), "make_payment");

    let (sentences, session) = run_and_collect(&engine, session, "Whatever works").await;
    assert!(session.dialog_stack.is_empty());
    assert_eq!(
        sentences.last().map(String::as_str),
        Some("How else can I help you today?")
    );
    for sentence in &sentences {
        assert!(!sentence.contains(ROUTE_MARKER));
        assert!(!sentence.contains(COMPLETE_OR_ESCALATE_TOOL));
    }
}

/// Tool that always fails, for exercising the corrective-message fallback.
struct BrokenLookup;

#[async_trait::async_trait]
impl DialogTool for BrokenLookup {
    fn name(&self) -> &str {
        "account_lookup"
    }

    fn description(&self) -> &str {
        "Look up the customer's account standing."
    }

    async fn call(
        &self,
        _session: &ConversationSession,
        _args: serde_json::Value,
    ) -> Result<ToolOutcome, Box<dyn std::error::Error + Send + Sync>> {
        Err("account service unavailable".into())
    }
}

#[tokio::test]
async fn failing_tool_produces_corrective_message_and_second_model_call() {
    let mut registry = payment_tool_registry();
    registry.register(Arc::new(BrokenLookup));

    let mut skills = payment_collection_skills();
    skills[0].tool_names.push("account_lookup".to_string());
    let backend = Arc::new(ScriptedBackend::new(vec![
        ScriptedTurn::tool("account_lookup", json!({}), "Let me pull that up."),
        ScriptedTurn::text("I could not reach your account just now. Could you repeat that?"),
    ]));
    let engine =
        DialogEngine::new(&skills, Arc::new(registry), backend, EngineConfig::default()).unwrap();

    let (sentences, session) = run_and_collect(&engine, fresh_session(), "Check my account").await;

    // The failure became a corrective tool message instead of a fault.
    let corrective = session
        .messages
        .iter()
        .find(|m| m.role == Role::Tool && m.content.starts_with("Error:"))
        .unwrap();
    assert!(corrective.content.contains("account service unavailable"));
    assert!(corrective.content.contains("fix your mistakes"));

    // The model got a second call after the failure (the script's second
    // turn was consumed and spoken).
    assert_eq!(
        sentences.last().map(String::as_str),
        Some("Could you repeat that?")
    );
}

/// Tool whose result routes control to the administrative account-note node.
struct NoteOnAccount;

#[async_trait::async_trait]
impl DialogTool for NoteOnAccount {
    fn name(&self) -> &str {
        "note_on_account"
    }

    fn description(&self) -> &str {
        "Record the customer's request on their account."
    }

    async fn call(
        &self,
        _session: &ConversationSession,
        _args: serde_json::Value,
    ) -> Result<ToolOutcome, Box<dyn std::error::Error + Send + Sync>> {
        Ok(ToolOutcome::RouteTo("sensitive_action".to_string()))
    }
}

#[tokio::test]
async fn administrative_route_speaks_the_account_note() {
    let mut registry = payment_tool_registry();
    registry.register(Arc::new(NoteOnAccount));

    let mut skills = payment_collection_skills();
    skills[0].tool_names.push("note_on_account".to_string());
    let backend = Arc::new(ScriptedBackend::new(vec![ScriptedTurn::tool(
        "note_on_account",
        json!({}),
        "Of course.",
    )]));
    let engine =
        DialogEngine::new(&skills, Arc::new(registry), backend, EngineConfig::default()).unwrap();

    let (sentences, session) =
        run_and_collect(&engine, fresh_session(), "Please note this on my account").await;

    assert_eq!(
        sentences.last().map(String::as_str),
        Some("No problem. I have noted on your account about your request.")
    );
    // The administrative node also recorded its text in history.
    let last_assistant = session
        .messages
        .iter()
        .rev()
        .find(|m| m.role == Role::Assistant)
        .unwrap();
    assert_eq!(
        last_assistant.content,
        "No problem. I have noted on your account about your request."
    );
}

#[tokio::test]
async fn exhausted_retries_speak_a_tagged_apology() {
    let engine = engine_with_script(vec![ScriptedTurn::text("never delivered").failing(10)]);

    let (sentences, session) = run_and_collect(&engine, fresh_session(), "Hello?").await;

    // Degraded turns still speak.
    assert!(!sentences.is_empty());
    assert_eq!(sentences.join(" "), APOLOGY_TEXT);
    let last = session.last_message().unwrap();
    assert_eq!(last.degraded_by.as_deref(), Some(PRIMARY_SKILL));
}

#[tokio::test]
async fn chunked_stream_yields_sentences_in_order_without_splitting_amounts() {
    let engine = engine_with_script(vec![ScriptedTurn::text(
        "Your total is $300.00. Anything else?",
    )
    .with_chunks(vec!["Your total is $3", "00.0", "0. Anything else?"])]);

    let (sentences, _) = run_and_collect(&engine, fresh_session(), "What do I owe?").await;
    assert_eq!(
        sentences,
        vec!["Your total is $300.00.", "Anything else?"]
    );
}

#[tokio::test]
async fn leaked_internal_identifiers_are_replaced_with_fillers() {
    let engine = engine_with_script(vec![ScriptedTurn::text(
        "Routing you via functions.transfer_to_live_agent now. All set.",
    )]);

    let (sentences, _) = run_and_collect(&engine, fresh_session(), "Hello").await;
    assert_eq!(sentences.len(), 2);
    assert!(!sentences[0].contains("functions."));
    assert!(!sentences[0].contains(TRANSFER_TO_LIVE_AGENT_TOOL));
    assert_eq!(sentences[1], "All set.");
}

#[tokio::test]
async fn turn_sentences_concatenate_to_model_output() {
    let text = "First things first. Your balance is due Friday! Shall we proceed?";
    let engine = engine_with_script(vec![
        ScriptedTurn::text(text).with_chunks(vec![
            "First things first. Your bal",
            "ance is due Friday! Sha",
            "ll we proceed?",
        ]),
    ]);

    let (sentences, _) = run_and_collect(&engine, fresh_session(), "hi").await;
    let normalize = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ");
    assert_eq!(normalize(&sentences.join(" ")), normalize(text));
    assert_eq!(sentences.len(), 3);
}
