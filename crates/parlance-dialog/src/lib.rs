//! # Parlance Dialog - Dialog Orchestration Engine
//!
//! This crate implements the core of the Parlance voice agent: the state
//! machine that decides which skill owns the conversation, the routing rules
//! that move control between skills, and the streaming segmenter that turns
//! token-by-token model output into discrete, speakable sentences.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       Dialog Engine                           │
//! │  ┌────────────┐   ┌────────────┐   ┌───────────────────┐    │
//! │  │ Skill      │ → │ Routing    │ → │ Tool Execution    │    │
//! │  │ Runnable   │   │ Policy     │   │ (with fallback)   │    │
//! │  └────────────┘   └────────────┘   └───────────────────┘    │
//! │        ↓            (graph executor loop)       ↓            │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │            Turn event stream (mpsc)                   │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │                           ↓                                  │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │   Response Segmenter  →  sentence 1, sentence 2, …    │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! One turn runs as a single cooperatively scheduled task: the graph run and
//! the segmenter are pipeline stages over the same event channel, so the
//! first sentence can reach the synthesizer while the turn is still being
//! computed.

pub mod backend;
pub mod error;
pub mod event;
pub mod graph;
pub mod machine;
pub mod routing;
pub mod runnable;
pub mod segmenter;
pub mod skill;
pub mod tools;

pub use backend::{
    CompletionBackend, CompletionRequest, HttpCompletionBackend, ScriptedBackend, ScriptedTurn,
};
pub use error::{DialogError, DialogResult, GraphError};
pub use event::{EventSink, TurnEvent};
pub use graph::{CompiledGraph, GraphBuilder, GraphNode, Next, NodeOutput, RouterFn, TurnState};
pub use machine::{
    build_dialog_graph, payment_tool_registry, ActiveTurn, DialogEngine, DialogEngineManager,
    EngineConfig,
};
pub use routing::{
    route_after_tools, route_assistant, route_by_name, route_to_workflow,
    NODE_DETERMINISTIC_WRAP, NODE_LEAVE_SKILL, NODE_ROUTE_BY_NAME, NODE_SENSITIVE_ACTION,
};
pub use runnable::{SkillRunnable, APOLOGY_TEXT};
pub use segmenter::{
    first_and_rest, sentence_stream, ResponseSegmenter, SegmenterConfig, SegmenterStep,
    SentenceStream, EXHAUSTED_FILLER, FILLER_POOL,
};
pub use skill::{
    payment_collection_skills, EscapeTool, SkillDescriptor, SkillPrompt,
    COMPLETE_OR_ESCALATE_TOOL, MAKE_PAYMENT_SKILL, TO_MAKE_PAYMENT_TOOL,
};
pub use tools::{
    execute_tool_calls, DialogTool, ToolOutcome, ToolRegistry, ToolSchema, TransferToLiveAgent,
    ValidatePaymentAmountDate, DETERMINISTIC_MARKER, ROUTE_MARKER, TRANSFER_TO_LIVE_AGENT_TOOL,
    VALIDATE_PAYMENT_TOOL,
};
