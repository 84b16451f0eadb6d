//! SSE chat endpoint: one dialog turn per request, sentences streamed as
//! they are segmented.
//!
//! The first sentence is already available when the response starts (the
//! engine awaits it eagerly), so a synthesizer driving this endpoint can
//! begin speaking while the rest of the turn is still being computed. Turns
//! within one session must be requested sequentially; the store gives
//! per-thread isolation only.

use crate::AppState;
use async_stream::stream;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures_util::{Stream, StreamExt};
use parlance_core::{CallDirection, ConversationSession, Language};
use serde::Deserialize;
use tracing::{error, warn};

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    /// Continues an existing session; a fresh one is created when absent.
    #[serde(default)]
    pub thread_id: Option<String>,
    /// Language override, honored only at session start.
    #[serde(default)]
    pub language: Option<String>,
}

pub async fn chat_stream(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>>, (StatusCode, String)>
{
    let session = resolve_session(&state, &request)?;
    let engine = state.engine.engine();
    let mut turn = engine.run_turn(session, request.message).await;
    let first = turn.first_sentence.take();
    let store = state.store.clone();

    let stream = stream! {
        if let Some(sentence) = first {
            yield Ok(Event::default().event("sentence").data(sentence));
        }
        while let Some(sentence) = turn.sentences.next().await {
            yield Ok(Event::default().event("sentence").data(sentence));
        }
        match turn.finish().await {
            Ok(session) => {
                if let Err(err) = store.save_session(&session) {
                    warn!(error = %err, "failed to persist session after turn");
                }
                yield Ok(Event::default().event("done").data(session.thread_id));
            }
            Err(err) => {
                error!(error = %err, "turn did not finish cleanly");
                yield Ok(Event::default().event("done").data(""));
            }
        }
    };
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Loads the session for a thread id, or creates one (with an optional
/// language override) when this is the start of the conversation.
fn resolve_session(
    state: &AppState,
    request: &ChatRequest,
) -> Result<ConversationSession, (StatusCode, String)> {
    let language = match &request.language {
        Some(code) => Language::parse(code)
            .map_err(|err| (StatusCode::BAD_REQUEST, err.to_string()))?,
        None => state.settings.language,
    };
    match &request.thread_id {
        Some(thread_id) => {
            let existing = state
                .store
                .get_session(thread_id)
                .map_err(|err| (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;
            Ok(existing.unwrap_or_else(|| {
                ConversationSession::with_thread_id(thread_id.clone(), language, CallDirection::Inbound)
            }))
        }
        None => Ok(ConversationSession::new(language, CallDirection::Inbound)),
    }
}
