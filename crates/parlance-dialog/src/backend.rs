//! Completion backend boundary.
//!
//! The engine consumes the language model as an opaque asynchronous provider:
//! full message history plus bound tool schemas in, a completion (text and/or
//! tool-call directives) out, with incremental text deltas emitted on the
//! turn's event stream while the call is in flight.
//!
//! `HttpCompletionBackend` speaks the OpenAI-compatible chat-completions wire
//! format over reqwest with streaming enabled. `ScriptedBackend` replays
//! canned turns for tests and local development.

use crate::error::{DialogError, DialogResult};
use crate::event::{EventSink, TurnEvent};
use crate::tools::ToolSchema;
use futures_util::StreamExt;
use parlance_core::{CallSettings, Message, Role, ToolCall};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// One completion request: the active node, the resolved system prompt, the
/// session history, and the tool schemas bound to the active skill.
pub struct CompletionRequest<'a> {
    pub node: &'a str,
    pub system_prompt: String,
    pub messages: &'a [Message],
    pub tools: &'a [ToolSchema],
}

/// Async completion provider consumed by the skill runnable.
#[async_trait::async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Runs one completion, emitting `StreamChunk` events for incremental
    /// text and returning the final assistant message.
    async fn complete(
        &self,
        request: CompletionRequest<'_>,
        events: &EventSink,
    ) -> DialogResult<Message>;
}

// ---------------------------------------------------------------------------
// OpenAI-compatible wire types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parallel_tool_calls: Option<bool>,
    temperature: f32,
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionCall,
}

#[derive(Serialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: &'a ToolSchema,
}

#[derive(Deserialize)]
struct StreamChunkBody {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<DeltaToolCall>>,
}

#[derive(Deserialize)]
struct DeltaToolCall {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<DeltaFunction>,
}

#[derive(Deserialize)]
struct DeltaFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

fn wire_messages(system_prompt: &str, history: &[Message]) -> Vec<WireMessage> {
    let mut out = Vec::with_capacity(history.len() + 1);
    out.push(WireMessage {
        role: "system",
        content: Some(system_prompt.to_string()),
        tool_calls: None,
        tool_call_id: None,
    });
    for message in history {
        let role = match message.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        let tool_calls = if message.tool_calls.is_empty() {
            None
        } else {
            Some(
                message
                    .tool_calls
                    .iter()
                    .map(|call| WireToolCall {
                        id: call.id.clone(),
                        kind: "function",
                        function: WireFunctionCall {
                            name: call.name.clone(),
                            arguments: call.arguments.to_string(),
                        },
                    })
                    .collect(),
            )
        };
        out.push(WireMessage {
            role,
            content: Some(message.content.clone()),
            tool_calls,
            tool_call_id: message.tool_call_id.clone(),
        });
    }
    out
}

// ---------------------------------------------------------------------------
// HTTP backend
// ---------------------------------------------------------------------------

/// OpenAI-compatible chat-completions backend.
pub struct HttpCompletionBackend {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl HttpCompletionBackend {
    /// Builds the backend from runtime settings. A missing API key is fatal.
    pub fn from_settings(settings: &CallSettings) -> DialogResult<Self> {
        let api_key = settings.require_api_key()?.to_string();
        Self::new(&settings.api_url, api_key, &settings.model)
    }

    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> DialogResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| DialogError::Backend(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into().trim().to_string(),
            model: model.into(),
            client,
        })
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    fn classify_send_error(err: reqwest::Error) -> DialogError {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            DialogError::BackendTransient(err.to_string())
        } else {
            DialogError::Backend(err.to_string())
        }
    }
}

/// Accumulates streamed deltas into a final assistant message.
#[derive(Default)]
struct StreamAccumulator {
    content: String,
    tool_calls: Vec<(String, String, String)>, // (id, name, raw arguments)
}

impl StreamAccumulator {
    fn apply(&mut self, delta: StreamDelta) -> Option<String> {
        let mut emitted = None;
        if let Some(text) = delta.content {
            if !text.is_empty() {
                self.content.push_str(&text);
                emitted = Some(text);
            }
        }
        if let Some(calls) = delta.tool_calls {
            for call in calls {
                while self.tool_calls.len() <= call.index {
                    self.tool_calls
                        .push((String::new(), String::new(), String::new()));
                }
                let slot = &mut self.tool_calls[call.index];
                if let Some(id) = call.id {
                    slot.0 = id;
                }
                if let Some(function) = call.function {
                    if let Some(name) = function.name {
                        slot.1.push_str(&name);
                    }
                    if let Some(arguments) = function.arguments {
                        slot.2.push_str(&arguments);
                    }
                }
            }
        }
        emitted
    }

    fn into_message(self) -> Message {
        let tool_calls: Vec<ToolCall> = self
            .tool_calls
            .into_iter()
            .filter(|(_, name, _)| !name.is_empty())
            .map(|(id, name, raw_args)| ToolCall {
                id,
                name,
                arguments: serde_json::from_str(&raw_args)
                    .unwrap_or_else(|_| serde_json::json!({})),
            })
            .collect();
        let mut message = Message::assistant(self.content);
        message.tool_calls = tool_calls;
        message
    }
}

#[async_trait::async_trait]
impl CompletionBackend for HttpCompletionBackend {
    async fn complete(
        &self,
        request: CompletionRequest<'_>,
        events: &EventSink,
    ) -> DialogResult<Message> {
        let wire_tools: Vec<WireTool<'_>> = request
            .tools
            .iter()
            .map(|schema| WireTool {
                kind: "function",
                function: schema,
            })
            .collect();
        let body = ChatRequest {
            model: &self.model,
            messages: wire_messages(&request.system_prompt, request.messages),
            parallel_tool_calls: (!wire_tools.is_empty()).then_some(false),
            tools: wire_tools,
            temperature: 0.0,
            stream: true,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(Self::classify_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = format!("completion API error {status}: {text}");
            return if status.as_u16() == 429 || status.is_server_error() {
                Err(DialogError::BackendTransient(message))
            } else {
                Err(DialogError::Backend(message))
            };
        }

        let mut accumulator = StreamAccumulator::default();
        let mut line_buf: Vec<u8> = Vec::new();
        let mut stream = response.bytes_stream();
        'outer: while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(|e| DialogError::BackendTransient(e.to_string()))?;
            line_buf.extend_from_slice(&bytes);
            while let Some(pos) = line_buf.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = line_buf.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                let Some(payload) = line.trim().strip_prefix("data:") else {
                    continue;
                };
                let payload = payload.trim();
                if payload == "[DONE]" {
                    break 'outer;
                }
                let parsed: StreamChunkBody = serde_json::from_str(payload)
                    .map_err(|e| DialogError::Backend(format!("bad stream chunk: {e}")))?;
                for choice in parsed.choices {
                    if let Some(delta) = accumulator.apply(choice.delta) {
                        events.emit(TurnEvent::StreamChunk {
                            node: request.node.to_string(),
                            delta,
                        });
                    }
                }
            }
        }

        Ok(accumulator.into_message())
    }
}

// ---------------------------------------------------------------------------
// Scripted backend
// ---------------------------------------------------------------------------

/// One canned completion for the scripted backend.
#[derive(Debug, Clone)]
pub struct ScriptedTurn {
    pub text: String,
    pub tool_call: Option<(String, serde_json::Value)>,
    /// Text deltas to stream; when empty the full text is one chunk.
    pub chunks: Vec<String>,
    /// Transient failures to emit before this turn succeeds.
    pub failures_before: u32,
}

impl ScriptedTurn {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_call: None,
            chunks: Vec::new(),
            failures_before: 0,
        }
    }

    pub fn tool(
        name: impl Into<String>,
        arguments: serde_json::Value,
        text: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            tool_call: Some((name.into(), arguments)),
            chunks: Vec::new(),
            failures_before: 0,
        }
    }

    pub fn with_chunks(mut self, chunks: Vec<&str>) -> Self {
        self.chunks = chunks.into_iter().map(str::to_string).collect();
        self
    }

    pub fn failing(mut self, failures: u32) -> Self {
        self.failures_before = failures;
        self
    }
}

/// Replays a fixed script of completions. Used by tests and local
/// development; never by production calls.
pub struct ScriptedBackend {
    script: Mutex<VecDeque<ScriptedTurn>>,
}

impl ScriptedBackend {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            script: Mutex::new(turns.into()),
        }
    }
}

#[async_trait::async_trait]
impl CompletionBackend for ScriptedBackend {
    async fn complete(
        &self,
        request: CompletionRequest<'_>,
        events: &EventSink,
    ) -> DialogResult<Message> {
        let turn = {
            let mut script = self
                .script
                .lock()
                .map_err(|_| DialogError::Backend("script lock poisoned".to_string()))?;
            let Some(mut turn) = script.pop_front() else {
                return Err(DialogError::Backend("script exhausted".to_string()));
            };
            if turn.failures_before > 0 {
                turn.failures_before -= 1;
                script.push_front(turn);
                return Err(DialogError::BackendTransient(
                    "scripted transient failure".to_string(),
                ));
            }
            turn
        };

        if turn.chunks.is_empty() {
            if !turn.text.is_empty() {
                events.emit(TurnEvent::StreamChunk {
                    node: request.node.to_string(),
                    delta: turn.text.clone(),
                });
            }
        } else {
            for chunk in &turn.chunks {
                events.emit(TurnEvent::StreamChunk {
                    node: request.node.to_string(),
                    delta: chunk.clone(),
                });
            }
        }

        let mut message = Message::assistant(turn.text);
        if let Some((name, arguments)) = turn.tool_call {
            message.tool_calls = vec![ToolCall::new(name, arguments)];
        }
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_messages_carry_tool_plumbing() {
        let call = ToolCall::new("validate_payment_amount_date", serde_json::json!({"a": 1}));
        let call_id = call.id.clone();
        let history = vec![
            Message::user("hi"),
            Message::assistant_tool_call("Checking.", call),
            Message::tool_result(call_id.clone(), "ok"),
        ];
        let wire = wire_messages("prompt", &history);
        assert_eq!(wire.len(), 4);
        assert_eq!(wire[0].role, "system");
        assert_eq!(wire[2].role, "assistant");
        let calls = wire[2].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.name, "validate_payment_amount_date");
        assert_eq!(wire[3].role, "tool");
        assert_eq!(wire[3].tool_call_id.as_deref(), Some(call_id.as_str()));
    }

    #[test]
    fn accumulator_rebuilds_split_tool_call() {
        let mut acc = StreamAccumulator::default();
        acc.apply(StreamDelta {
            content: None,
            tool_calls: Some(vec![DeltaToolCall {
                index: 0,
                id: Some("call_1".to_string()),
                function: Some(DeltaFunction {
                    name: Some("validate_payment_amount_date".to_string()),
                    arguments: Some("{\"desired_payment".to_string()),
                }),
            }]),
        });
        acc.apply(StreamDelta {
            content: None,
            tool_calls: Some(vec![DeltaToolCall {
                index: 0,
                id: None,
                function: Some(DeltaFunction {
                    name: None,
                    arguments: Some("_amount\": 300}".to_string()),
                }),
            }]),
        });
        let message = acc.into_message();
        let call = message.first_tool_call().unwrap();
        assert_eq!(call.id, "call_1");
        assert_eq!(call.arguments["desired_payment_amount"], 300);
    }

    #[tokio::test]
    async fn scripted_backend_streams_chunks_then_fails_when_exhausted() {
        let backend = ScriptedBackend::new(vec![
            ScriptedTurn::text("Hello there. How can I help?")
                .with_chunks(vec!["Hello there. ", "How can I help?"]),
        ]);
        let (sink, mut rx) = EventSink::channel();
        let request = CompletionRequest {
            node: "primary",
            system_prompt: "prompt".to_string(),
            messages: &[],
            tools: &[],
        };
        let message = backend.complete(request, &sink).await.unwrap();
        assert_eq!(message.content, "Hello there. How can I help?");

        let mut deltas = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if let TurnEvent::StreamChunk { delta, .. } = ev {
                deltas.push(delta);
            }
        }
        assert_eq!(deltas, vec!["Hello there. ", "How can I help?"]);

        let request = CompletionRequest {
            node: "primary",
            system_prompt: "prompt".to_string(),
            messages: &[],
            tools: &[],
        };
        assert!(backend.complete(request, &sink).await.is_err());
    }

    #[tokio::test]
    async fn scripted_backend_counts_down_transient_failures() {
        let backend =
            ScriptedBackend::new(vec![ScriptedTurn::text("finally").failing(2)]);
        let (sink, _rx) = EventSink::channel();
        for _ in 0..2 {
            let request = CompletionRequest {
                node: "primary",
                system_prompt: "prompt".to_string(),
                messages: &[],
                tools: &[],
            };
            let err = backend.complete(request, &sink).await.unwrap_err();
            assert!(err.is_transient());
        }
        let request = CompletionRequest {
            node: "primary",
            system_prompt: "prompt".to_string(),
            messages: &[],
            tools: &[],
        };
        let message = backend.complete(request, &sink).await.unwrap();
        assert_eq!(message.content, "finally");
    }
}
