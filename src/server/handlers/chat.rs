//! Chat endpoint: launches the answer worker and streams its events.
//!
//! The worker and the SSE stream share one event channel. When the client
//! disconnects, axum drops the stream and with it the receiver; the worker
//! keeps running to natural completion but its sends become no-ops.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures_util::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::assistant::orchestrator::{AssistantOptions, ChatAssistant};
use crate::events::{self, ChannelMessage, EventReceiver, TerminalError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SendQuestionRequest {
    pub text: String,
    #[serde(default)]
    pub previous_messages: Vec<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SendQuestionRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let request_id = Uuid::new_v4().to_string();
    let (events, rx) = events::channel();

    let assistant = ChatAssistant::new(
        state.provider.clone(),
        state.retrieval_context(),
        events.clone(),
        state.estimator.clone(),
        state.usage_sink.clone(),
        AssistantOptions {
            request_id: request_id.clone(),
            model: state.config.model_name.clone(),
            temperature: state.config.temperature,
            system_prompt: body.system_prompt,
            flags: state.function_flags(),
        },
    );

    tokio::spawn(async move {
        tracing::info!(request_id = %request_id, "answer worker started");
        match assistant.answer(&body.text, &body.previous_messages).await {
            Ok(()) => {
                events.finish();
                tracing::info!(request_id = %request_id, "answer worker finished");
            }
            Err(err) => {
                tracing::error!(request_id = %request_id, "answer worker failed: {}", err);
                events.fail(TerminalError::from(err));
            }
        }
    });

    let sse_stream = channel_stream(rx)
        .map(|payload| Ok(Event::default().data(payload.to_string())));
    Sse::new(sse_stream).keep_alive(KeepAlive::default())
}

/// Relays channel items to the transport in order until a terminal marker.
/// A terminal error becomes one final answer-shaped event before the stream
/// closes.
fn channel_stream(rx: EventReceiver) -> impl Stream<Item = Value> {
    stream::unfold(Some(rx), |state| async move {
        let mut rx = state?;
        match rx.recv().await {
            Some(ChannelMessage::Event(event)) => Some((event.to_wire(), Some(rx))),
            Some(ChannelMessage::Failed(error)) => Some((error.to_wire(), None)),
            Some(ChannelMessage::Done) | None => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(rx: EventReceiver) -> Vec<Value> {
        channel_stream(rx).collect().await
    }

    #[tokio::test]
    async fn stream_ends_cleanly_on_done() {
        let (tx, rx) = events::channel();
        tx.answer_fragment("hello");
        tx.finish();
        tx.answer_fragment("sent after done, never delivered");

        let items = collect(rx).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["answer_type_id"], 2);
        assert_eq!(items[0]["part_of_final_answer_text"], "hello");
    }

    #[tokio::test]
    async fn terminal_error_becomes_final_answer_event() {
        let (tx, rx) = events::channel();
        tx.scrape_progress(50);
        tx.fail(TerminalError {
            message: "please contact the administrator".to_string(),
            status_code: Some(500),
        });

        let items = collect(rx).await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["answer_type_id"], 5);
        assert_eq!(items[1]["answer_type_id"], 2);
        assert_eq!(items[1]["part_of_final_answer_text"], "please contact the administrator");
        assert_eq!(items[1]["status_code"], 500);
    }

    #[tokio::test]
    async fn events_keep_production_order() {
        let (tx, rx) = events::channel();
        tx.action_started("Searching external sources");
        tx.function_input_fragment("weather in Tokyo");
        tx.function_input_complete();
        tx.source_links(&["https://a.example".to_string()]);
        tx.answer_fragment("Sunny.");
        tx.finish();

        let items = collect(rx).await;
        let ids: Vec<i64> = items
            .iter()
            .map(|v| v["answer_type_id"].as_i64().unwrap())
            .collect();
        assert_eq!(ids, vec![0, 0, 4, 1, 2]);
    }

    #[tokio::test]
    async fn worker_sends_are_noops_after_stream_dropped() {
        let (tx, rx) = events::channel();
        drop(channel_stream(rx));
        // the abandoned producer must be able to keep emitting
        tx.answer_fragment("probe");
        tx.finish();
    }
}
