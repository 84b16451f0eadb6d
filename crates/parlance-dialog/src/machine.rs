//! Dialog state machine: declarative wiring of skills into the graph, plus
//! the per-turn driver that pipes the machine's event stream through the
//! segmenter.
//!
//! The graph is built once at startup from the configured skill set;
//! construction validates every tool binding and routing target and fails
//! loudly on defects. Only the position within the graph (the dialog stack)
//! varies per call.

use crate::backend::CompletionBackend;
use crate::error::{DialogResult, GraphError};
use crate::event::{EventSink, TurnEvent};
use crate::graph::{CompiledGraph, GraphBuilder, GraphNode, NodeOutput, TurnState};
use crate::routing::{
    route_after_tools, route_assistant, route_by_name, route_to_workflow,
    NODE_DETERMINISTIC_WRAP, NODE_LEAVE_SKILL, NODE_ROUTE_BY_NAME, NODE_SENSITIVE_ACTION,
};
use crate::runnable::SkillRunnable;
use crate::segmenter::{
    first_and_rest, sentence_stream, ResponseSegmenter, SegmenterConfig, SentenceStream,
};
use crate::skill::{payment_collection_skills, SkillDescriptor};
use crate::tools::{
    execute_tool_calls, ToolOutcome, ToolRegistry, TransferToLiveAgent, ValidatePaymentAmountDate,
};
use parlance_core::{ConversationSession, Message, ToolCall, PRIMARY_SKILL};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info};

/// System-directed text injected when a sub-skill pops back to the host.
const RESUME_HOST_TEXT: &str = "Resuming dialog with the host assistant. Please reflect on the \
                                past conversation. First, call a function if appropriate. If \
                                not, respond to the user.";

/// Deterministic output of the administrative account-note node.
const SENSITIVE_ACTION_TEXT: &str =
    "No problem. I have noted on your account about your request.";

/// Engine tunables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bounded attempt count for transient completion failures.
    pub retry_limit: u32,
    /// Maximum node executions per turn.
    pub hop_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry_limit: 3,
            hop_limit: 16,
        }
    }
}

// ---------------------------------------------------------------------------
// Graph nodes
// ---------------------------------------------------------------------------

struct SkillNode {
    runnable: SkillRunnable,
}

#[async_trait::async_trait]
impl GraphNode for SkillNode {
    async fn run(&self, state: &mut TurnState, events: &EventSink) -> DialogResult<NodeOutput> {
        let message = self.runnable.invoke(&state.session, events).await;
        events.emit(TurnEvent::ModelCallEnd {
            node: self.runnable.skill_name().to_string(),
            message: message.clone(),
        });
        state.session.push_message(message);
        Ok(NodeOutput::default())
    }
}

struct ToolNode {
    registry: Arc<ToolRegistry>,
    name: String,
}

#[async_trait::async_trait]
impl GraphNode for ToolNode {
    async fn run(&self, state: &mut TurnState, events: &EventSink) -> DialogResult<NodeOutput> {
        execute_tool_calls(&self.registry, state, events, &self.name).await?;
        Ok(NodeOutput::default())
    }
}

/// Entry adapter: acknowledges the hand-off tool call and pushes the
/// sub-skill onto the dialog stack.
struct EntryNode {
    skill_name: String,
    message: String,
}

#[async_trait::async_trait]
impl GraphNode for EntryNode {
    async fn run(&self, state: &mut TurnState, _events: &EventSink) -> DialogResult<NodeOutput> {
        let call_id = state
            .session
            .last_message()
            .and_then(|m| m.first_tool_call())
            .map(|call| call.id.clone())
            .ok_or_else(|| GraphError::MissingToolCall(format!("enter_{}", self.skill_name)))?;
        state
            .session
            .push_message(Message::tool_result(call_id, self.message.clone()));
        state.session.push_skill(self.skill_name.clone());
        Ok(NodeOutput::default())
    }
}

/// Pops the dialog stack and instructs the model to resume the host
/// conversation.
struct LeaveSkillNode;

#[async_trait::async_trait]
impl GraphNode for LeaveSkillNode {
    async fn run(&self, state: &mut TurnState, _events: &EventSink) -> DialogResult<NodeOutput> {
        let popped = state.session.pop_skill();
        info!(skill = ?popped, "leaving sub-skill, resuming host assistant");
        let call_id = state
            .session
            .last_message()
            .and_then(|m| m.first_tool_call())
            .map(|call| call.id.clone());
        if let Some(call_id) = call_id {
            state
                .session
                .push_message(Message::tool_result(call_id, RESUME_HOST_TEXT));
        }
        Ok(NodeOutput::default())
    }
}

/// Rewraps a deterministic tool result as the turn's assistant message,
/// bypassing another model call.
struct DeterministicWrapNode;

#[async_trait::async_trait]
impl GraphNode for DeterministicWrapNode {
    async fn run(&self, state: &mut TurnState, _events: &EventSink) -> DialogResult<NodeOutput> {
        let text = match &state.last_outcome {
            Some(ToolOutcome::Deterministic(text)) => text.clone(),
            _ => state
                .session
                .last_message()
                .map(|m| m.content.clone())
                .unwrap_or_default(),
        };
        state.session.push_message(Message::assistant(text));
        Ok(NodeOutput::default())
    }
}

/// Synthesizes a tool-call message for the routed name; the conditional edge
/// then translates that name into a dialog node.
struct RouteByNameNode;

#[async_trait::async_trait]
impl GraphNode for RouteByNameNode {
    async fn run(&self, state: &mut TurnState, _events: &EventSink) -> DialogResult<NodeOutput> {
        let Some(ToolOutcome::RouteTo(name)) = state.last_outcome.clone() else {
            return Err(GraphError::MissingRoutedOutcome(NODE_ROUTE_BY_NAME.to_string()).into());
        };
        state.session.push_message(Message::assistant_tool_call(
            "",
            ToolCall::new(name, json!({})),
        ));
        Ok(NodeOutput::default())
    }
}

/// Administrative node: its text is already final user-facing output.
struct AdminNode {
    text: &'static str,
}

#[async_trait::async_trait]
impl GraphNode for AdminNode {
    async fn run(&self, state: &mut TurnState, _events: &EventSink) -> DialogResult<NodeOutput> {
        state.session.push_message(Message::assistant(self.text));
        Ok(NodeOutput::administrative(self.text))
    }
}

// ---------------------------------------------------------------------------
// Graph construction
// ---------------------------------------------------------------------------

/// The tool registry for the payment-collection deployment.
pub fn payment_tool_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(ValidatePaymentAmountDate));
    registry.register(Arc::new(TransferToLiveAgent));
    registry
}

/// Wires the configured skills, their tool nodes, and the shared adapter
/// nodes into a validated graph.
pub fn build_dialog_graph(
    skills: &[SkillDescriptor],
    registry: Arc<ToolRegistry>,
    backend: Arc<dyn CompletionBackend>,
    config: &EngineConfig,
) -> DialogResult<CompiledGraph> {
    for skill in skills {
        for tool in &skill.tool_names {
            if !registry.contains(tool) {
                return Err(GraphError::UnmappedTool {
                    skill: skill.name.clone(),
                    tool: tool.clone(),
                }
                .into());
            }
        }
    }
    if !skills.iter().any(|s| s.is_primary()) {
        return Err(GraphError::MissingPrimary.into());
    }

    let skills: Vec<Arc<SkillDescriptor>> = skills.iter().cloned().map(Arc::new).collect();
    let skill_names: Vec<String> = skills.iter().map(|s| s.name.clone()).collect();

    // Translation table for route-by-name: escape tools to their targets,
    // real tools to their owning skill's tool node, plus the administrative
    // node under its own name.
    let mut table: HashMap<String, String> = HashMap::new();
    for skill in &skills {
        for escape in &skill.escape_tools {
            table.insert(escape.name.clone(), escape.target.clone());
        }
        for tool in &skill.tool_names {
            table.insert(tool.clone(), skill.tools_node_name());
        }
    }
    table.insert(
        NODE_SENSITIVE_ACTION.to_string(),
        NODE_SENSITIVE_ACTION.to_string(),
    );

    let mut builder = GraphBuilder::new().hop_limit(config.hop_limit);

    let mut post_tool_targets: Vec<String> =
        vec![NODE_DETERMINISTIC_WRAP.to_string(), NODE_ROUTE_BY_NAME.to_string()];
    post_tool_targets.extend(skill_names.iter().cloned());
    let post_tool_refs: Vec<&str> = post_tool_targets.iter().map(String::as_str).collect();

    for skill in &skills {
        let mut tools = registry.schemas_for(&skill.tool_names);
        tools.extend(skill.escape_schemas());
        let runnable = SkillRunnable::new(
            Arc::clone(skill),
            Arc::clone(&backend),
            tools,
            config.retry_limit,
        );
        builder.add_node(skill.name.as_str(), Arc::new(SkillNode { runnable }))?;

        let tools_node = skill.tools_node_name();
        builder.add_node(
            tools_node.as_str(),
            Arc::new(ToolNode {
                registry: Arc::clone(&registry),
                name: tools_node.clone(),
            }),
        )?;
        builder.add_conditional_edge(
            tools_node.as_str(),
            Arc::new(route_after_tools),
            &post_tool_refs,
        );

        if let Some(message) = &skill.entry_message {
            builder.add_node(
                skill.enter_node_name(),
                Arc::new(EntryNode {
                    skill_name: skill.name.clone(),
                    message: message.clone(),
                }),
            )?;
            builder.add_edge(skill.enter_node_name(), skill.name.as_str());
        }

        let mut assistant_targets: Vec<String> = skill
            .escape_tools
            .iter()
            .map(|e| e.target.clone())
            .collect();
        assistant_targets.push(skill.tools_node_name());
        let assistant_refs: Vec<&str> = assistant_targets.iter().map(String::as_str).collect();
        let routed_skill = Arc::clone(skill);
        builder.add_conditional_edge(
            skill.name.as_str(),
            Arc::new(move |state: &TurnState| route_assistant(state, &routed_skill)),
            &assistant_refs,
        );
    }

    builder.add_node(NODE_LEAVE_SKILL, Arc::new(LeaveSkillNode))?;
    builder.add_edge(NODE_LEAVE_SKILL, PRIMARY_SKILL);
    builder.add_node(NODE_DETERMINISTIC_WRAP, Arc::new(DeterministicWrapNode))?;
    builder.add_node(
        NODE_SENSITIVE_ACTION,
        Arc::new(AdminNode {
            text: SENSITIVE_ACTION_TEXT,
        }),
    )?;
    builder.add_node(NODE_ROUTE_BY_NAME, Arc::new(RouteByNameNode))?;

    let mut name_targets: Vec<String> = table.values().cloned().collect();
    name_targets.extend(skill_names.iter().cloned());
    name_targets.sort();
    name_targets.dedup();
    let name_refs: Vec<&str> = name_targets.iter().map(String::as_str).collect();
    let routing_table = table;
    builder.add_conditional_edge(
        NODE_ROUTE_BY_NAME,
        Arc::new(move |state: &TurnState| route_by_name(state, &routing_table)),
        &name_refs,
    );

    let entry_refs: Vec<&str> = skill_names.iter().map(String::as_str).collect();
    builder.set_entry(Arc::new(route_to_workflow), &entry_refs);

    builder.compile()
}

// ---------------------------------------------------------------------------
// Engine and turn driver
// ---------------------------------------------------------------------------

/// One turn in flight. The first sentence has already been awaited eagerly;
/// the rest stream out while the turn may still be computing.
pub struct ActiveTurn {
    pub first_sentence: Option<String>,
    pub sentences: SentenceStream,
    state: JoinHandle<TurnState>,
}

impl ActiveTurn {
    /// Waits for the turn's state machine to finish and returns the updated
    /// session for persistence. Call after draining `sentences`.
    pub async fn finish(self) -> DialogResult<ConversationSession> {
        let state = self
            .state
            .await
            .map_err(|e| crate::error::DialogError::TurnTask(e.to_string()))?;
        Ok(state.session)
    }
}

/// The dialog orchestration engine: a compiled graph plus the segmenter
/// configuration derived from the deployment's internal identifiers.
pub struct DialogEngine {
    graph: Arc<CompiledGraph>,
    segmenter_config: SegmenterConfig,
}

impl DialogEngine {
    /// Builds the engine. Fails loudly on any graph configuration defect.
    pub fn new(
        skills: &[SkillDescriptor],
        registry: Arc<ToolRegistry>,
        backend: Arc<dyn CompletionBackend>,
        config: EngineConfig,
    ) -> DialogResult<Self> {
        let mut needles = registry.tool_names();
        for skill in skills {
            needles.extend(skill.escape_tools.iter().map(|e| e.name.clone()));
        }
        let graph = build_dialog_graph(skills, registry, backend, &config)?;
        Ok(Self {
            graph: Arc::new(graph),
            segmenter_config: SegmenterConfig::with_needles(needles),
        })
    }

    /// Runs one user turn. The returned handle already carries the first
    /// sentence; turns within one session must be run sequentially.
    pub async fn run_turn(
        &self,
        mut session: ConversationSession,
        user_text: impl Into<String>,
    ) -> ActiveTurn {
        session.push_message(Message::user(user_text.into()));
        let mut state = TurnState::new(session);
        let (sink, rx) = EventSink::channel();
        let graph = Arc::clone(&self.graph);
        let handle = tokio::spawn(async move {
            if let Err(err) = graph.run(&mut state, &sink).await {
                // No TurnEnd is emitted on failure; the segmenter discards
                // its partial buffer rather than speaking a broken sentence.
                error!(error = %err, "dialog turn failed");
            }
            state
        });

        let segmenter = ResponseSegmenter::new(self.segmenter_config.clone());
        let stream = sentence_stream(rx, segmenter);
        let (first_sentence, sentences) = first_and_rest(stream).await;
        ActiveTurn {
            first_sentence,
            sentences,
            state: handle,
        }
    }
}

/// Holds the compiled engine for a deployment, selecting the graph build by
/// client name and supporting explicit reinitialization (e.g. after a skill
/// configuration change).
pub struct DialogEngineManager {
    client_name: String,
    registry: Arc<ToolRegistry>,
    backend: Arc<dyn CompletionBackend>,
    config: EngineConfig,
    engine: RwLock<Arc<DialogEngine>>,
}

/// Skill set for a client. Only the default payment-collection build exists
/// today; an unknown client name is a deployment configuration error.
fn skills_for_client(client_name: &str) -> DialogResult<Vec<SkillDescriptor>> {
    match client_name {
        "default" => Ok(payment_collection_skills()),
        other => Err(GraphError::UnknownClient(other.to_string()).into()),
    }
}

impl DialogEngineManager {
    pub fn new(
        client_name: impl Into<String>,
        registry: Arc<ToolRegistry>,
        backend: Arc<dyn CompletionBackend>,
        config: EngineConfig,
    ) -> DialogResult<Self> {
        let client_name = client_name.into();
        info!(client = %client_name, "initializing dialog graph");
        let skills = skills_for_client(&client_name)?;
        let engine = DialogEngine::new(
            &skills,
            Arc::clone(&registry),
            Arc::clone(&backend),
            config.clone(),
        )?;
        Ok(Self {
            client_name,
            registry,
            backend,
            config,
            engine: RwLock::new(Arc::new(engine)),
        })
    }

    pub fn engine(&self) -> Arc<DialogEngine> {
        let guard = self
            .engine
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&*guard)
    }

    /// Rebuilds the graph from the current skill configuration.
    pub fn reinitialize(&self) -> DialogResult<()> {
        let skills = skills_for_client(&self.client_name)?;
        let engine = DialogEngine::new(
            &skills,
            Arc::clone(&self.registry),
            Arc::clone(&self.backend),
            self.config.clone(),
        )?;
        let mut guard = self
            .engine
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(engine);
        info!(client = %self.client_name, "dialog graph reinitialized");
        Ok(())
    }
}
