//! Generic directed-graph executor for the dialog state machine.
//!
//! The state machine is configured declaratively through `GraphBuilder`
//! (`add_node`, `add_edge`, `add_conditional_edge`, `compile`) and executed
//! by `CompiledGraph::run` as an explicit state-transition loop over one
//! mutable `TurnState`. Compilation validates every edge target up front so
//! that a misconfigured graph fails at startup, not mid-call. Routers are
//! pure functions; an unhandled error inside a node is a defect of that node
//! layer, not something the executor recovers from.

use crate::error::{DialogResult, GraphError};
use crate::event::{EventSink, TurnEvent};
use crate::tools::ToolOutcome;
use parlance_core::ConversationSession;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

const DEFAULT_HOP_LIMIT: usize = 16;

/// Mutable state threaded through one turn of the state machine.
#[derive(Debug)]
pub struct TurnState {
    pub session: ConversationSession,
    /// Typed outcome of the most recent tool execution, consulted by
    /// post-tool routing.
    pub last_outcome: Option<ToolOutcome>,
}

impl TurnState {
    pub fn new(session: ConversationSession) -> Self {
        Self {
            session,
            last_outcome: None,
        }
    }
}

/// Routing decision: the next node to execute, or the end of the turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Next {
    Node(String),
    End,
}

impl Next {
    pub fn node(name: impl Into<String>) -> Self {
        Next::Node(name.into())
    }
}

/// Pure routing function over the current turn state.
pub type RouterFn = Arc<dyn Fn(&TurnState) -> Next + Send + Sync>;

/// Result of executing one node.
#[derive(Debug, Default)]
pub struct NodeOutput {
    /// Deterministic user-facing text produced by administrative nodes,
    /// surfaced to the segmenter through `StateTransitionEnd`.
    pub administrative: Option<String>,
}

impl NodeOutput {
    pub fn administrative(text: impl Into<String>) -> Self {
        Self {
            administrative: Some(text.into()),
        }
    }
}

/// One executable node of the dialog graph.
#[async_trait::async_trait]
pub trait GraphNode: Send + Sync {
    async fn run(&self, state: &mut TurnState, events: &EventSink) -> DialogResult<NodeOutput>;
}

enum Edge {
    Direct(String),
    Conditional {
        router: RouterFn,
        targets: Vec<String>,
    },
}

/// Declarative builder for the dialog graph.
pub struct GraphBuilder {
    nodes: HashMap<String, Arc<dyn GraphNode>>,
    edges: HashMap<String, Edge>,
    entry: Option<(RouterFn, Vec<String>)>,
    hop_limit: usize,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            edges: HashMap::new(),
            entry: None,
            hop_limit: DEFAULT_HOP_LIMIT,
        }
    }

    /// Caps the number of node executions per turn, guarding against routing
    /// cycles.
    pub fn hop_limit(mut self, limit: usize) -> Self {
        self.hop_limit = limit;
        self
    }

    pub fn add_node(
        &mut self,
        name: impl Into<String>,
        node: Arc<dyn GraphNode>,
    ) -> DialogResult<&mut Self> {
        let name = name.into();
        if self.nodes.contains_key(&name) {
            return Err(GraphError::DuplicateNode(name).into());
        }
        self.nodes.insert(name, node);
        Ok(self)
    }

    /// Unconditional transition `from` → `to`.
    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.edges.insert(from.into(), Edge::Direct(to.into()));
        self
    }

    /// Conditional transition decided by `router`. `targets` declares every
    /// node the router may return; compilation rejects unknown targets and
    /// the executor rejects undeclared routes at runtime.
    pub fn add_conditional_edge(
        &mut self,
        from: impl Into<String>,
        router: RouterFn,
        targets: &[&str],
    ) -> &mut Self {
        self.edges.insert(
            from.into(),
            Edge::Conditional {
                router,
                targets: targets.iter().map(|t| t.to_string()).collect(),
            },
        );
        self
    }

    /// Per-turn entry router (the initial state is the top of the dialog
    /// stack, so entry is conditional by nature).
    pub fn set_entry(&mut self, router: RouterFn, targets: &[&str]) -> &mut Self {
        self.entry = Some((router, targets.iter().map(|t| t.to_string()).collect()));
        self
    }

    /// Validates the wiring and produces an executable graph. Every edge
    /// endpoint and declared conditional target must name a known node.
    pub fn compile(self) -> DialogResult<CompiledGraph> {
        let (entry_router, entry_targets) = self.entry.ok_or(GraphError::MissingEntry)?;

        for target in &entry_targets {
            if !self.nodes.contains_key(target) {
                return Err(GraphError::UnknownTarget {
                    from: "<entry>".to_string(),
                    target: target.clone(),
                }
                .into());
            }
        }
        for (from, edge) in &self.edges {
            if !self.nodes.contains_key(from) {
                return Err(GraphError::UnknownNode(from.clone()).into());
            }
            match edge {
                Edge::Direct(to) => {
                    if !self.nodes.contains_key(to) {
                        return Err(GraphError::UnknownNode(to.clone()).into());
                    }
                }
                Edge::Conditional { targets, .. } => {
                    for target in targets {
                        if !self.nodes.contains_key(target) {
                            return Err(GraphError::UnknownTarget {
                                from: from.clone(),
                                target: target.clone(),
                            }
                            .into());
                        }
                    }
                }
            }
        }

        Ok(CompiledGraph {
            nodes: self.nodes,
            edges: self.edges,
            entry: (entry_router, entry_targets),
            hop_limit: self.hop_limit,
        })
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Validated, executable dialog graph. Built once at startup; only the
/// position within it varies per turn.
pub struct CompiledGraph {
    nodes: HashMap<String, Arc<dyn GraphNode>>,
    edges: HashMap<String, Edge>,
    entry: (RouterFn, Vec<String>),
    hop_limit: usize,
}

impl std::fmt::Debug for CompiledGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .field("edges", &self.edges.keys().collect::<Vec<_>>())
            .field("entry_targets", &self.entry.1)
            .field("hop_limit", &self.hop_limit)
            .finish_non_exhaustive()
    }
}

impl CompiledGraph {
    /// Executes one turn: enter at the node chosen by the entry router, run
    /// nodes and follow edges until a router returns `End`. Emits
    /// `StateTransitionEnd` after every node and `TurnEnd` on completion.
    /// The turn runs to completion even if the event consumer disappears
    /// mid-turn (a deterministic result ends the sentence stream before the
    /// graph is done); the session history must not depend on that race.
    pub async fn run(&self, state: &mut TurnState, events: &EventSink) -> DialogResult<()> {
        let (entry_router, entry_targets) = &self.entry;
        let mut current = match self.check_route("<entry>", entry_router(state), entry_targets)? {
            Next::End => {
                events.emit(TurnEvent::TurnEnd);
                return Ok(());
            }
            Next::Node(name) => name,
        };

        let mut hops = 0usize;
        let mut delivering = true;
        loop {
            hops += 1;
            if hops > self.hop_limit {
                return Err(GraphError::HopLimit(self.hop_limit).into());
            }

            let node = self
                .nodes
                .get(&current)
                .ok_or_else(|| GraphError::UnknownNode(current.clone()))?;
            let output = node.run(state, events).await?;

            let open = events.emit(TurnEvent::StateTransitionEnd {
                node: current.clone(),
                administrative: output.administrative,
            });
            if delivering && !open {
                debug!(node = %current, "event consumer gone; finishing turn unobserved");
                delivering = false;
            }

            let next = match self.edges.get(&current) {
                None => Next::End,
                Some(Edge::Direct(to)) => Next::Node(to.clone()),
                Some(Edge::Conditional { router, targets }) => {
                    self.check_route(&current, router(state), targets)?
                }
            };
            match next {
                Next::End => {
                    events.emit(TurnEvent::TurnEnd);
                    return Ok(());
                }
                Next::Node(name) => current = name,
            }
        }
    }

    fn check_route(&self, from: &str, next: Next, targets: &[String]) -> DialogResult<Next> {
        if let Next::Node(ref target) = next {
            if !targets.iter().any(|t| t == target) {
                return Err(GraphError::UndeclaredRoute {
                    from: from.to_string(),
                    target: target.clone(),
                }
                .into());
            }
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DialogError;
    use parlance_core::{CallDirection, Language, Message};

    struct AppendNode(&'static str);

    #[async_trait::async_trait]
    impl GraphNode for AppendNode {
        async fn run(
            &self,
            state: &mut TurnState,
            _events: &EventSink,
        ) -> DialogResult<NodeOutput> {
            state.session.push_message(Message::assistant(self.0));
            Ok(NodeOutput::default())
        }
    }

    fn fresh_state() -> TurnState {
        TurnState::new(ConversationSession::new(
            Language::En,
            CallDirection::Inbound,
        ))
    }

    fn entry_to(name: &'static str) -> RouterFn {
        Arc::new(move |_| Next::node(name))
    }

    #[tokio::test]
    async fn linear_graph_runs_to_end() {
        let mut builder = GraphBuilder::new();
        builder.add_node("a", Arc::new(AppendNode("from a"))).unwrap();
        builder.add_node("b", Arc::new(AppendNode("from b"))).unwrap();
        builder.add_edge("a", "b");
        builder.set_entry(entry_to("a"), &["a"]);
        let graph = builder.compile().unwrap();

        let mut state = fresh_state();
        let (sink, mut rx) = EventSink::channel();
        graph.run(&mut state, &sink).await.unwrap();

        assert_eq!(state.session.messages.len(), 2);
        let mut saw_turn_end = false;
        while let Ok(ev) = rx.try_recv() {
            if matches!(ev, TurnEvent::TurnEnd) {
                saw_turn_end = true;
            }
        }
        assert!(saw_turn_end);
    }

    #[tokio::test]
    async fn compile_rejects_unknown_edge_target() {
        let mut builder = GraphBuilder::new();
        builder.add_node("a", Arc::new(AppendNode("a"))).unwrap();
        builder.add_edge("a", "missing");
        builder.set_entry(entry_to("a"), &["a"]);
        let err = builder.compile().unwrap_err();
        assert!(matches!(
            err,
            DialogError::Graph(GraphError::UnknownNode(ref n)) if n == "missing"
        ));
    }

    #[tokio::test]
    async fn compile_rejects_unknown_conditional_target() {
        let mut builder = GraphBuilder::new();
        builder.add_node("a", Arc::new(AppendNode("a"))).unwrap();
        builder.add_conditional_edge("a", Arc::new(|_| Next::End), &["missing"]);
        builder.set_entry(entry_to("a"), &["a"]);
        let err = builder.compile().unwrap_err();
        assert!(matches!(
            err,
            DialogError::Graph(GraphError::UnknownTarget { .. })
        ));
    }

    #[tokio::test]
    async fn undeclared_route_is_fatal() {
        let mut builder = GraphBuilder::new();
        builder.add_node("a", Arc::new(AppendNode("a"))).unwrap();
        builder.add_node("b", Arc::new(AppendNode("b"))).unwrap();
        // Router returns "b" but only declares "a" as a target.
        builder.add_conditional_edge("a", Arc::new(|_| Next::node("b")), &["a"]);
        builder.set_entry(entry_to("a"), &["a"]);
        // "b" must still be a node so compile passes and the defect is the
        // router's, caught at runtime.
        let graph = builder.compile().unwrap();

        let mut state = fresh_state();
        let (sink, _rx) = EventSink::channel();
        let err = graph.run(&mut state, &sink).await.unwrap_err();
        assert!(matches!(
            err,
            DialogError::Graph(GraphError::UndeclaredRoute { .. })
        ));
    }

    #[tokio::test]
    async fn cycle_hits_hop_limit() {
        let mut builder = GraphBuilder::new().hop_limit(4);
        builder.add_node("a", Arc::new(AppendNode("a"))).unwrap();
        builder.add_edge("a", "a");
        builder.set_entry(entry_to("a"), &["a"]);
        let graph = builder.compile().unwrap();

        let mut state = fresh_state();
        let (sink, _rx) = EventSink::channel();
        let err = graph.run(&mut state, &sink).await.unwrap_err();
        assert!(matches!(
            err,
            DialogError::Graph(GraphError::HopLimit(4))
        ));
    }

    #[tokio::test]
    async fn missing_entry_rejected_at_compile() {
        let mut builder = GraphBuilder::new();
        builder.add_node("a", Arc::new(AppendNode("a"))).unwrap();
        let err = builder.compile().unwrap_err();
        assert!(matches!(err, DialogError::Graph(GraphError::MissingEntry)));
    }

    #[tokio::test]
    async fn dropped_consumer_still_completes_turn() {
        let mut builder = GraphBuilder::new();
        builder.add_node("a", Arc::new(AppendNode("a"))).unwrap();
        builder.add_node("b", Arc::new(AppendNode("b"))).unwrap();
        builder.add_edge("a", "b");
        builder.set_entry(entry_to("a"), &["a"]);
        let graph = builder.compile().unwrap();

        let mut state = fresh_state();
        let (sink, rx) = EventSink::channel();
        drop(rx);
        // Both nodes run; the session history never depends on whether the
        // sentence consumer is still listening.
        graph.run(&mut state, &sink).await.unwrap();
        assert_eq!(state.session.messages.len(), 2);
    }
}
