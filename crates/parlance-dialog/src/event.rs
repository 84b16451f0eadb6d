//! The per-turn event stream.
//!
//! One turn of the dialog state machine produces a single append-only stream
//! of `TurnEvent`s over an unbounded channel. The graph executor and the
//! completion backend are the producers; the response segmenter is the only
//! consumer. When the consumer goes away (the call ended mid-turn, or a
//! deterministic result already ended the sentence stream), emission reports
//! it and the turn finishes unobserved.

use crate::tools::ToolOutcome;
use parlance_core::Message;
use tokio::sync::mpsc;

/// Events emitted while one dialog turn executes.
#[derive(Debug, Clone)]
pub enum TurnEvent {
    /// Incremental text fragment from the completion backend.
    StreamChunk { node: String, delta: String },

    /// A model call finished; carries the complete assistant message.
    ModelCallEnd { node: String, message: Message },

    /// A tool finished successfully; carries its typed outcome.
    ToolCallEnd {
        node: String,
        call_id: String,
        outcome: ToolOutcome,
    },

    /// A graph node finished executing. `administrative` carries the
    /// deterministic user-facing text of administrative nodes.
    StateTransitionEnd {
        node: String,
        administrative: Option<String>,
    },

    /// The turn reached a terminal routing decision.
    TurnEnd,
}

/// Sending half of the turn event stream.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<TurnEvent>,
}

impl EventSink {
    /// Creates a sink and its receiving half.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TurnEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Emits an event. Returns false once the consumer has gone away; the
    /// turn still runs to completion, just unobserved.
    pub fn emit(&self, event: TurnEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}
