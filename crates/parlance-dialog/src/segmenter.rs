//! Streaming response segmenter.
//!
//! Consumes the event stream of one dialog turn and exposes a forward-only
//! sequence of speakable sentences. Text deltas are buffered and split at
//! sentence boundaries; internal control markers are stripped; sentences that
//! leak internal tool naming are replaced with filler phrases drawn without
//! replacement from a per-turn pool. Deterministic tool results and
//! administrative node output short-circuit the turn.
//!
//! Boundary rules, tuned for speech over text chat:
//! - `.` / `!` / `?` followed by optional whitespace and an uppercase letter
//!   is a boundary; so is trailing punctuation at the end of the buffer.
//! - A `.` at the end of the buffer immediately preceded by a digit is NOT a
//!   boundary: the fractional part of a decimal may still be streaming.
//! - While the buffer's last `$` is followed only by amount characters up to
//!   the end of the buffer, all splits are withheld so a currency phrase is
//!   never cut mid-amount. This is a conservative heuristic, not a currency
//!   parser.

use crate::event::TurnEvent;
use crate::tools::{ToolOutcome, DETERMINISTIC_MARKER};
use async_stream::stream;
use futures_util::Stream;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::pin::Pin;
use tokio::sync::mpsc;

/// Filler phrases spoken in place of a sentence that leaked internal naming.
pub const FILLER_POOL: [&str; 3] = [
    "Let me check that for you",
    "I'll need a moment to review this",
    "Please bear with me while I look into that",
];

/// Spoken for further leaks after the per-turn pool is exhausted.
pub const EXHAUSTED_FILLER: &str = "One moment, please.";

/// Configuration for the segmenter.
#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    /// Per-turn filler pool, drawn without replacement.
    pub fillers: Vec<String>,
    /// Substrings that mark a sentence as leaking internal identifiers.
    pub leak_needles: Vec<String>,
    /// Fallback once the filler pool is empty.
    pub exhausted_filler: String,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            fillers: FILLER_POOL.iter().map(|s| s.to_string()).collect(),
            leak_needles: vec!["functions.".to_string(), "tools.".to_string()],
            exhausted_filler: EXHAUSTED_FILLER.to_string(),
        }
    }
}

impl SegmenterConfig {
    /// Default config extended with deployment-specific internal identifiers
    /// (tool and escape-tool names) that must never reach speech output.
    pub fn with_needles(extra: Vec<String>) -> Self {
        let mut config = Self::default();
        config.leak_needles.extend(extra);
        config
    }
}

/// What the segmenter decided after one event.
#[derive(Debug, PartialEq, Eq)]
pub enum SegmenterStep {
    /// Zero or more completed sentences became available.
    Sentences(Vec<String>),
    /// The final sentence of the turn; stop consuming afterwards.
    Final(String),
    /// The turn is over with nothing left to say.
    Done,
    /// Nothing to report yet.
    Continue,
}

/// Turns the incremental event stream of one turn into discrete sentences.
/// One segmenter serves one turn; construct a fresh one (or `reset`) per turn.
pub struct ResponseSegmenter {
    config: SegmenterConfig,
    buffer: String,
    pool: Vec<String>,
    rng: StdRng,
    done: bool,
}

impl ResponseSegmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        let pool = config.fillers.clone();
        Self {
            config,
            buffer: String::new(),
            pool,
            rng: StdRng::from_entropy(),
            done: false,
        }
    }

    /// Deterministic filler selection for tests.
    pub fn with_seed(config: SegmenterConfig, seed: u64) -> Self {
        let mut segmenter = Self::new(config);
        segmenter.rng = StdRng::seed_from_u64(seed);
        segmenter
    }

    /// Prepares the segmenter for the next turn: clears the buffer and
    /// refills the filler pool.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.pool = self.config.fillers.clone();
        self.done = false;
    }

    /// Feeds one turn event through the segmenter.
    pub fn handle_event(&mut self, event: &TurnEvent) -> SegmenterStep {
        if self.done {
            return SegmenterStep::Continue;
        }
        match event {
            TurnEvent::StreamChunk { delta, .. } => {
                let sentences = self.push_delta(delta);
                if sentences.is_empty() {
                    SegmenterStep::Continue
                } else {
                    SegmenterStep::Sentences(sentences)
                }
            }
            TurnEvent::ToolCallEnd {
                outcome: ToolOutcome::Deterministic(text),
                ..
            } => {
                self.done = true;
                SegmenterStep::Final(strip_marker(text))
            }
            TurnEvent::StateTransitionEnd {
                administrative: Some(text),
                ..
            } => {
                self.done = true;
                SegmenterStep::Final(strip_marker(text))
            }
            TurnEvent::TurnEnd => {
                self.done = true;
                match self.flush() {
                    Some(sentence) => SegmenterStep::Final(sentence),
                    None => SegmenterStep::Done,
                }
            }
            _ => SegmenterStep::Continue,
        }
    }

    /// Appends an incremental text fragment and extracts every completed
    /// sentence now available.
    pub fn push_delta(&mut self, delta: &str) -> Vec<String> {
        self.buffer.push_str(delta);
        let mut out = Vec::new();
        loop {
            if has_unresolved_amount(&self.buffer) {
                break;
            }
            let Some(end) = sentence_boundary(&self.buffer) else {
                break;
            };
            let sentence = self.buffer[..end].to_string();
            self.buffer = strip_marker(self.buffer[end..].trim_start());
            let sentence = self.filter_leak(strip_marker(&sentence));
            if !sentence.is_empty() {
                out.push(sentence);
            }
        }
        out
    }

    /// Flushes any buffered partial sentence at the end of the stream.
    pub fn flush(&mut self) -> Option<String> {
        let remaining = std::mem::take(&mut self.buffer);
        let sentence = self.filter_leak(strip_marker(&remaining));
        if sentence.is_empty() {
            None
        } else {
            Some(sentence)
        }
    }

    /// Replaces a sentence that references internal tool/function naming with
    /// a filler phrase, drawn without replacement from the per-turn pool.
    fn filter_leak(&mut self, sentence: String) -> String {
        let leaked = self
            .config
            .leak_needles
            .iter()
            .any(|needle| sentence.contains(needle));
        if !leaked {
            return sentence;
        }
        if self.pool.is_empty() {
            return self.config.exhausted_filler.clone();
        }
        let idx = self.rng.gen_range(0..self.pool.len());
        self.pool.remove(idx)
    }
}

fn strip_marker(text: &str) -> String {
    if text.contains(DETERMINISTIC_MARKER) {
        text.replace(DETERMINISTIC_MARKER, "").trim().to_string()
    } else {
        text.trim().to_string()
    }
}

/// Finds the earliest sentence boundary, returning the byte index just past
/// the terminating punctuation mark.
fn sentence_boundary(buffer: &str) -> Option<usize> {
    for (i, c) in buffer.char_indices() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        let end = i + c.len_utf8();
        let prev_is_digit = buffer[..i]
            .chars()
            .next_back()
            .is_some_and(|p| p.is_ascii_digit());
        let rest = &buffer[end..];
        let mut after = rest.char_indices().skip_while(|(_, ch)| ch.is_whitespace());
        match after.next() {
            None => {
                // Punctuation at the end of the buffer. A period right after
                // a digit may be a decimal point whose fraction is still
                // streaming; hold it back.
                if c == '.' && prev_is_digit {
                    continue;
                }
                return Some(end);
            }
            Some((offset, ch)) if ch.is_uppercase() => {
                // "3.Next" with no whitespace reads as a decimal-style token,
                // not a sentence end.
                if c == '.' && prev_is_digit && offset == 0 {
                    continue;
                }
                return Some(end);
            }
            Some(_) => continue,
        }
    }
    None
}

/// True while the last `$` in the buffer is followed only by amount
/// characters running to the end, i.e. the amount may still be streaming.
fn has_unresolved_amount(buffer: &str) -> bool {
    let Some(pos) = buffer.rfind('$') else {
        return false;
    };
    buffer[pos + '$'.len_utf8()..]
        .chars()
        .all(|c| c.is_ascii_digit() || c == '.' || c == ',')
}

/// Boxed, forward-only sequence of sentences for one turn.
pub type SentenceStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// Drives a segmenter over the turn's event channel. The stream ends when the
/// turn ends or when a deterministic result short-circuits it. If the
/// producer died without a `TurnEnd`, the stream ends immediately and any
/// buffered partial sentence is discarded rather than hanging the call.
pub fn sentence_stream(
    mut rx: mpsc::UnboundedReceiver<TurnEvent>,
    mut segmenter: ResponseSegmenter,
) -> SentenceStream {
    Box::pin(stream! {
        while let Some(event) = rx.recv().await {
            match segmenter.handle_event(&event) {
                SegmenterStep::Sentences(sentences) => {
                    for sentence in sentences {
                        yield sentence;
                    }
                }
                SegmenterStep::Final(sentence) => {
                    yield sentence;
                    return;
                }
                SegmenterStep::Done => return,
                SegmenterStep::Continue => {}
            }
        }
        // Channel closed with no TurnEnd: the turn failed or was abandoned.
        // Favor not hanging the call over completeness; drop the partial
        // buffer.
        tracing::debug!("event stream ended without TurnEnd; discarding partial buffer");
    })
}

/// Awaits the first sentence eagerly so speech synthesis can begin while the
/// rest of the turn is still being computed, then hands back the remainder.
pub async fn first_and_rest(mut sentences: SentenceStream) -> (Option<String>, SentenceStream) {
    use futures_util::StreamExt;
    let first = sentences.next().await;
    (first, sentences)
}
