//! Conversation orchestration: context assembly, the streamed
//! function-calling turn, retrieval dispatch, and the follow-up answer turn.
//!
//! One `ChatAssistant` instance owns one request end to end; the message
//! list and function set are never shared across requests.

use std::sync::Arc;

use serde_json::Value;

use super::executors::RetrievalContext;
use super::functions::{build_function_set, AssistantFunction, FunctionFlags};
use crate::core::errors::ApiError;
use crate::events::EventSender;
use crate::llm::provider::ChatProvider;
use crate::llm::tokens::{BillingRates, TokenEstimator, UsageMeter};
use crate::llm::types::{ChatMessage, ChatRequest};
use crate::usage::{UsageRecord, UsageSink};

#[derive(Debug, Clone)]
pub struct AssistantOptions {
    pub request_id: String,
    pub model: String,
    pub temperature: f64,
    pub system_prompt: Option<String>,
    pub flags: FunctionFlags,
}

/// Outcome of the first model call: either the answer itself, or the
/// function the model chose along with its accumulated argument text.
enum FirstTurn {
    DirectAnswer { text: String },
    FunctionCall {
        function: AssistantFunction,
        arguments_text: String,
    },
}

pub struct ChatAssistant {
    provider: Arc<dyn ChatProvider>,
    retrieval: RetrievalContext,
    events: EventSender,
    usage_sink: Arc<dyn UsageSink>,
    meter: UsageMeter,
    options: AssistantOptions,
    functions: Vec<AssistantFunction>,
    messages: Vec<ChatMessage>,
}

impl ChatAssistant {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        retrieval: RetrievalContext,
        events: EventSender,
        estimator: Arc<dyn TokenEstimator>,
        usage_sink: Arc<dyn UsageSink>,
        options: AssistantOptions,
    ) -> Self {
        let functions = build_function_set(options.flags);
        let mut messages = Vec::new();
        if let Some(prompt) = options.system_prompt.as_deref() {
            if !prompt.is_empty() {
                messages.push(ChatMessage::system(prompt));
            }
        }

        Self {
            provider,
            retrieval,
            events,
            usage_sink,
            meter: UsageMeter::new(estimator, BillingRates::default()),
            options,
            functions,
            messages,
        }
    }

    /// Drives one question to completion, emitting stream events throughout.
    pub async fn answer(
        mut self,
        question: &str,
        previous_messages: &[String],
    ) -> Result<(), ApiError> {
        self.messages.extend(convert_transcript(previous_messages));
        self.messages.push(ChatMessage::user(question));

        match self.run_first_call().await? {
            FirstTurn::DirectAnswer { text } => {
                let message = ChatMessage::assistant(text);
                self.meter.add_completion_message(&message);
                self.messages.push(message);
            }
            FirstTurn::FunctionCall {
                function,
                arguments_text,
            } => {
                self.events.function_input_complete();

                let arguments: Value = serde_json::from_str(&arguments_text)
                    .map_err(|e| ApiError::MalformedArguments(e.to_string()))?;

                let call_message =
                    ChatMessage::assistant_function_call(function.name(), &arguments_text);
                self.meter.add_completion_message(&call_message);
                self.messages.push(call_message);

                tracing::info!(
                    request_id = %self.options.request_id,
                    function = function.name(),
                    "executing retrieval function"
                );
                let outcome = self
                    .retrieval
                    .execute(function, &arguments, &self.events)
                    .await?;

                self.messages.push(ChatMessage::function_result(
                    function.name(),
                    outcome.reference_text,
                ));
                self.events.source_links(&outcome.links);

                self.run_second_call().await?;
            }
        }

        let usage = self.meter.snapshot();
        self.usage_sink
            .record(&UsageRecord::new(
                &self.options.request_id,
                &self.options.model,
                usage,
            ))
            .await?;

        Ok(())
    }

    /// First model call: the function set is offered and the stream decides
    /// between a direct answer and a function selection.
    async fn run_first_call(&mut self) -> Result<FirstTurn, ApiError> {
        let descriptors: Vec<Value> = self.functions.iter().map(|f| f.descriptor()).collect();

        self.meter.add_prompt_messages(&self.messages);
        self.meter.add_prompt_functions(&descriptors);

        let request = ChatRequest::new(&self.options.model, self.messages.clone())
            .with_temperature(self.options.temperature)
            .with_functions(descriptors);
        let mut stream = self.provider.stream_chat(request).await?;

        let mut answer_text = String::new();
        let mut arguments_text = String::new();
        let mut selected: Option<AssistantFunction> = None;
        let mut saw_function_call = false;

        while let Some(delta) = stream.recv().await {
            let delta = delta?;
            if let Some(fragment) = delta.function_call {
                saw_function_call = true;
                if selected.is_none() {
                    if let Some(name) = fragment.name.as_deref() {
                        let function = AssistantFunction::from_name(name).ok_or_else(|| {
                            ApiError::Internal(format!("model requested unknown function: {}", name))
                        })?;
                        self.events.action_started(function.action_label());
                        selected = Some(function);
                    }
                }
                // Every fragment is accumulated for parsing; the event layer
                // decides what is worth showing.
                self.events.function_input_fragment(&fragment.arguments);
                arguments_text.push_str(&fragment.arguments);
            } else if let Some(content) = delta.content {
                self.events.answer_fragment(&content);
                answer_text.push_str(&content);
            }
        }

        if saw_function_call {
            let function = selected.ok_or_else(|| {
                ApiError::Internal("function call stream carried no function name".to_string())
            })?;
            Ok(FirstTurn::FunctionCall {
                function,
                arguments_text,
            })
        } else {
            Ok(FirstTurn::DirectAnswer { text: answer_text })
        }
    }

    /// Second model call: no functions are offered, so the model must answer
    /// from the retrieved reference text.
    async fn run_second_call(&mut self) -> Result<(), ApiError> {
        self.meter.add_prompt_messages(&self.messages);

        let request = ChatRequest::new(&self.options.model, self.messages.clone())
            .with_temperature(self.options.temperature);
        let mut stream = self.provider.stream_chat(request).await?;

        let mut answer_text = String::new();
        while let Some(delta) = stream.recv().await {
            let delta = delta?;
            if let Some(content) = delta.content {
                self.events.answer_fragment(&content);
                answer_text.push_str(&content);
            }
        }

        let message = ChatMessage::assistant(answer_text);
        self.meter.add_completion_message(&message);
        self.messages.push(message);

        Ok(())
    }
}

/// Converts `Human:`/`AI:`-prefixed transcript lines into role-tagged
/// messages. Lines with any other prefix are dropped.
pub fn convert_transcript(previous_messages: &[String]) -> Vec<ChatMessage> {
    let mut history = Vec::new();
    for line in previous_messages {
        if let Some(rest) = line.strip_prefix("Human:") {
            history.push(ChatMessage::user(rest.trim_start()));
        } else if let Some(rest) = line.strip_prefix("AI:") {
            history.push(ChatMessage::assistant(rest.trim_start()));
        }
    }
    history
}
