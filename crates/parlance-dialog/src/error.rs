//! Error types for the dialog orchestration engine.

use thiserror::Error;

/// Result type alias for dialog operations.
pub type DialogResult<T> = Result<T, DialogError>;

/// Errors that can occur while running a dialog turn.
#[derive(Error, Debug)]
pub enum DialogError {
    /// Rate limit, network, or other failure worth retrying.
    #[error("transient completion backend error: {0}")]
    BackendTransient(String),

    /// Completion backend failure that retrying will not fix.
    #[error("completion backend error: {0}")]
    Backend(String),

    #[error("tool error: {0}")]
    Tool(String),

    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("core error: {0}")]
    Core(#[from] parlance_core::CoreError),

    #[error("turn task failed: {0}")]
    TurnTask(String),
}

impl DialogError {
    /// Whether the skill runnable should retry after this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, DialogError::BackendTransient(_))
    }
}

/// Configuration defects in the dialog graph. These surface at graph
/// construction (or, for router bugs, as fatal turn errors) rather than being
/// recovered at runtime.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("duplicate node name: {0}")]
    DuplicateNode(String),

    #[error("edge references unknown node: {0}")]
    UnknownNode(String),

    #[error("no entry router configured")]
    MissingEntry,

    #[error("no primary skill configured")]
    MissingPrimary,

    #[error("conditional edge from {from} declares unknown target {target}")]
    UnknownTarget { from: String, target: String },

    #[error("router for {from} returned undeclared node {target}")]
    UndeclaredRoute { from: String, target: String },

    #[error("skill {skill} binds unknown tool {tool}")]
    UnmappedTool { skill: String, tool: String },

    #[error("node {0} requires a pending tool call and found none")]
    MissingToolCall(String),

    #[error("node {0} requires a routed tool outcome and found none")]
    MissingRoutedOutcome(String),

    #[error("turn exceeded the hop limit of {0}")]
    HopLimit(usize),

    #[error("unknown client graph: {0}")]
    UnknownClient(String),
}
