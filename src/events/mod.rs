//! Stream event protocol between the answer worker and the transport consumer.
//!
//! One request owns exactly one channel. The worker produces [`StreamEvent`]s
//! and exactly one terminal marker; the consumer relays events to the client
//! in production order. Once the consumer goes away every further send is a
//! no-op, so an abandoned worker can run to completion without special-casing.

use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::core::errors::ApiError;

/// Argument-stream fragments that are JSON scaffolding rather than query
/// text. The model emits its function arguments token by token, so the raw
/// fragments include braces, quotes, and field-name pieces; fragments on this
/// list are withheld from the client while still being accumulated for
/// parsing.
const ARGUMENT_NOISE_FRAGMENTS: [&str; 13] = [
    "}", "\"\n", " \"", "\":", "query", " ", "{\n", "", "index", "_data", "_search", "_query",
    "web",
];

/// An incremental event produced while answering one question.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A retrieval function was selected; `label` names the action underway.
    ActionStarted { label: String },
    /// A fragment of the function-call arguments as the model generates them.
    FunctionInputFragment { text: String },
    /// The model finished generating the function-call arguments.
    FunctionInputComplete,
    /// A fragment of the answer text.
    AnswerFragment { text: String },
    /// Reference URLs backing the answer.
    SourceLinks { urls: Vec<String> },
    /// Scraping progress, 0–100.
    ScrapeProgress { percent: u8 },
}

impl StreamEvent {
    /// Wire encoding consumed by the client, discriminated by `answer_type_id`.
    pub fn to_wire(&self) -> Value {
        match self {
            StreamEvent::ActionStarted { label } => json!({
                "answer_type_id": 0,
                "action_info": { "action_prefix": label },
            }),
            StreamEvent::FunctionInputFragment { text } => json!({
                "answer_type_id": 0,
                "action_info": { "part_of_action_input_text": text },
            }),
            StreamEvent::SourceLinks { urls } => json!({
                "answer_type_id": 1,
                "source_url_list": urls,
            }),
            StreamEvent::AnswerFragment { text } => json!({
                "answer_type_id": 2,
                "part_of_final_answer_text": text,
            }),
            StreamEvent::FunctionInputComplete => json!({
                "answer_type_id": 4,
            }),
            StreamEvent::ScrapeProgress { percent } => json!({
                "answer_type_id": 5,
                "web_contents_scraping_progress": percent,
            }),
        }
    }
}

/// Terminal failure delivered over the channel in place of further events.
#[derive(Debug, Clone, PartialEq)]
pub struct TerminalError {
    pub message: String,
    pub status_code: Option<u16>,
}

impl TerminalError {
    /// Errors are shown to the client as one final answer-shaped event.
    pub fn to_wire(&self) -> Value {
        let mut payload = json!({
            "answer_type_id": 2,
            "part_of_final_answer_text": self.message,
        });
        if let Some(code) = self.status_code {
            payload["status_code"] = json!(code);
        }
        payload
    }
}

impl From<ApiError> for TerminalError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::ContextOverflow => TerminalError {
                message: "The conversation has grown too long to continue. Please start a new conversation.".to_string(),
                status_code: None,
            },
            ApiError::Upstream { status, .. } => TerminalError {
                message: "An error occurred while generating the answer. Please contact the administrator.".to_string(),
                status_code: Some(status),
            },
            _ => TerminalError {
                message: "Something went wrong while generating the answer. Please try again.".to_string(),
                status_code: None,
            },
        }
    }
}

/// One item on the answer channel: an event, or one of the two terminal
/// markers after which nothing more is sent.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    Event(StreamEvent),
    Done,
    Failed(TerminalError),
}

pub type EventReceiver = mpsc::UnboundedReceiver<ChannelMessage>;

/// Creates the channel for one request.
pub fn channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, rx)
}

/// Producer half of the answer channel.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<ChannelMessage>,
}

impl EventSender {
    fn send(&self, message: ChannelMessage) {
        if self.tx.send(message).is_err() {
            tracing::trace!("event consumer gone, dropping message");
        }
    }

    pub fn action_started(&self, label: &str) {
        self.send(ChannelMessage::Event(StreamEvent::ActionStarted {
            label: label.to_string(),
        }));
    }

    /// Forwards a function-argument fragment unless it is schema noise.
    pub fn function_input_fragment(&self, text: &str) {
        if ARGUMENT_NOISE_FRAGMENTS.contains(&text) {
            return;
        }
        self.send(ChannelMessage::Event(StreamEvent::FunctionInputFragment {
            text: text.to_string(),
        }));
    }

    pub fn function_input_complete(&self) {
        self.send(ChannelMessage::Event(StreamEvent::FunctionInputComplete));
    }

    pub fn answer_fragment(&self, text: &str) {
        self.send(ChannelMessage::Event(StreamEvent::AnswerFragment {
            text: text.to_string(),
        }));
    }

    /// Emits the reference URL list. The search provider does not guarantee a
    /// link on every result, so empty entries are dropped here.
    pub fn source_links(&self, urls: &[String]) {
        let filtered: Vec<String> = urls.iter().filter(|url| !url.is_empty()).cloned().collect();
        self.send(ChannelMessage::Event(StreamEvent::SourceLinks { urls: filtered }));
    }

    pub fn scrape_progress(&self, percent: u8) {
        self.send(ChannelMessage::Event(StreamEvent::ScrapeProgress { percent }));
    }

    /// Marks normal completion. Nothing may be sent afterwards.
    pub fn finish(&self) {
        self.send(ChannelMessage::Done);
    }

    /// Marks fatal failure. Nothing may be sent afterwards.
    pub fn fail(&self, error: TerminalError) {
        self.send(ChannelMessage::Failed(error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut EventReceiver) -> Vec<ChannelMessage> {
        let mut items = Vec::new();
        while let Ok(message) = rx.try_recv() {
            items.push(message);
        }
        items
    }

    #[test]
    fn wire_ids_match_protocol() {
        let cases = [
            (StreamEvent::ActionStarted { label: "Searching".into() }, 0),
            (StreamEvent::FunctionInputFragment { text: "tokyo".into() }, 0),
            (StreamEvent::SourceLinks { urls: vec![] }, 1),
            (StreamEvent::AnswerFragment { text: "hi".into() }, 2),
            (StreamEvent::FunctionInputComplete, 4),
            (StreamEvent::ScrapeProgress { percent: 42 }, 5),
        ];
        for (event, expected) in cases {
            assert_eq!(event.to_wire()["answer_type_id"], expected);
        }
    }

    #[test]
    fn wire_payload_fields() {
        let event = StreamEvent::ActionStarted { label: "Searching".into() };
        assert_eq!(event.to_wire()["action_info"]["action_prefix"], "Searching");

        let event = StreamEvent::ScrapeProgress { percent: 77 };
        assert_eq!(event.to_wire()["web_contents_scraping_progress"], 77);
    }

    #[test]
    fn noise_fragments_are_withheld() {
        let (tx, mut rx) = channel();
        for fragment in ["{\n", " \"", "query", "\":", " ", "}", "", "_data", "web"] {
            tx.function_input_fragment(fragment);
        }
        tx.function_input_fragment("weather in Tokyo");
        let items = drain(&mut rx);
        assert_eq!(
            items,
            vec![ChannelMessage::Event(StreamEvent::FunctionInputFragment {
                text: "weather in Tokyo".into()
            })]
        );
    }

    #[test]
    fn empty_source_links_are_dropped() {
        let (tx, mut rx) = channel();
        tx.source_links(&[
            "https://example.com/a".to_string(),
            String::new(),
            "https://example.com/b".to_string(),
        ]);
        let items = drain(&mut rx);
        assert_eq!(
            items,
            vec![ChannelMessage::Event(StreamEvent::SourceLinks {
                urls: vec![
                    "https://example.com/a".to_string(),
                    "https://example.com/b".to_string()
                ]
            })]
        );
    }

    #[test]
    fn delivery_preserves_production_order() {
        let (tx, mut rx) = channel();
        tx.action_started("Searching");
        tx.scrape_progress(11);
        tx.answer_fragment("partial");
        tx.finish();
        let items = drain(&mut rx);
        assert_eq!(items.len(), 4);
        assert!(matches!(items[0], ChannelMessage::Event(StreamEvent::ActionStarted { .. })));
        assert!(matches!(items[1], ChannelMessage::Event(StreamEvent::ScrapeProgress { .. })));
        assert!(matches!(items[2], ChannelMessage::Event(StreamEvent::AnswerFragment { .. })));
        assert!(matches!(items[3], ChannelMessage::Done));
    }

    #[test]
    fn sends_after_consumer_drop_are_noops() {
        let (tx, rx) = channel();
        drop(rx);
        tx.answer_fragment("nobody listening");
        tx.finish();
    }

    #[test]
    fn context_overflow_maps_to_new_conversation_message() {
        let terminal = TerminalError::from(ApiError::ContextOverflow);
        assert!(terminal.message.contains("start a new conversation"));
        assert_eq!(terminal.status_code, None);
    }

    #[test]
    fn upstream_error_keeps_status_code() {
        let terminal = TerminalError::from(ApiError::Upstream {
            status: 500,
            message: "boom".into(),
        });
        assert!(terminal.message.contains("contact the administrator"));
        assert_eq!(terminal.status_code, Some(500));
        assert_eq!(terminal.to_wire()["status_code"], 500);
    }

    #[test]
    fn generic_error_has_no_status_code() {
        let terminal = TerminalError::from(ApiError::Internal("oops".into()));
        assert_eq!(terminal.status_code, None);
        assert!(terminal.to_wire().get("status_code").is_none());
    }
}
