//! Token estimation for scrape budgeting and usage accounting.
//!
//! Billing-grade parity with any one provider's tokenizer is deliberately out
//! of scope; counts here feed budget decisions and usage estimates, both of
//! which tolerate approximation.

use std::sync::Arc;

use serde_json::Value;

use super::types::ChatMessage;

pub trait TokenEstimator: Send + Sync {
    /// Estimated token count of a piece of text.
    fn count(&self, text: &str) -> usize;
}

/// ~4 characters per token for typical prose.
pub struct HeuristicTokenEstimator;

impl TokenEstimator for HeuristicTokenEstimator {
    fn count(&self, text: &str) -> usize {
        (text.len() + 3) / 4
    }
}

/// Fixed per-field overheads the provider adds when billing chat requests.
#[derive(Debug, Clone)]
pub struct BillingRates {
    /// Added for every message in the prompt.
    pub per_message: usize,
    /// Added for every advertised function descriptor.
    pub per_function: usize,
    /// Added for every property in a function's parameter schema.
    pub per_property: usize,
}

impl Default for BillingRates {
    fn default() -> Self {
        Self {
            per_message: 4,
            per_function: 8,
            per_property: 3,
        }
    }
}

/// Accumulated usage of one request across both model calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

/// Per-request usage meter. Prompt tokens are added before each call from the
/// context-so-far (plus descriptors on the first call); completion tokens are
/// added from each produced message.
pub struct UsageMeter {
    estimator: Arc<dyn TokenEstimator>,
    rates: BillingRates,
    usage: Usage,
}

impl UsageMeter {
    pub fn new(estimator: Arc<dyn TokenEstimator>, rates: BillingRates) -> Self {
        Self {
            estimator,
            rates,
            usage: Usage::default(),
        }
    }

    pub fn add_prompt_messages(&mut self, messages: &[ChatMessage]) {
        for message in messages {
            self.usage.prompt_tokens += self.rates.per_message + self.message_tokens(message);
        }
    }

    pub fn add_prompt_functions(&mut self, descriptors: &[Value]) {
        for descriptor in descriptors {
            let mut tokens = self.rates.per_function;
            if let Some(name) = descriptor.get("name").and_then(|v| v.as_str()) {
                tokens += self.estimator.count(name);
            }
            if let Some(description) = descriptor.get("description").and_then(|v| v.as_str()) {
                tokens += self.estimator.count(description);
            }
            if let Some(properties) = descriptor
                .get("parameters")
                .and_then(|p| p.get("properties"))
                .and_then(|p| p.as_object())
            {
                for (key, schema) in properties {
                    tokens += self.rates.per_property + self.estimator.count(key);
                    if let Some(description) = schema.get("description").and_then(|v| v.as_str()) {
                        tokens += self.estimator.count(description);
                    }
                }
            }
            self.usage.prompt_tokens += tokens;
        }
    }

    pub fn add_completion_message(&mut self, message: &ChatMessage) {
        self.usage.completion_tokens += self.message_tokens(message);
    }

    pub fn snapshot(&self) -> Usage {
        self.usage
    }

    fn message_tokens(&self, message: &ChatMessage) -> usize {
        let mut tokens = self.estimator.count(message.text());
        if let Some(function_call) = &message.function_call {
            tokens += self.estimator.count(&function_call.name);
            tokens += self.estimator.count(&function_call.arguments);
        }
        tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meter() -> UsageMeter {
        UsageMeter::new(Arc::new(HeuristicTokenEstimator), BillingRates::default())
    }

    #[test]
    fn heuristic_count_is_monotonic() {
        let estimator = HeuristicTokenEstimator;
        assert_eq!(estimator.count(""), 0);
        assert!(estimator.count("A longer sentence here.") > estimator.count("Hi"));
    }

    #[test]
    fn prompt_messages_include_per_message_overhead() {
        let mut meter = meter();
        meter.add_prompt_messages(&[
            crate::llm::types::ChatMessage::user("hi"),
            crate::llm::types::ChatMessage::assistant("hello"),
        ]);
        let usage = meter.snapshot();
        assert!(usage.prompt_tokens >= 2 * BillingRates::default().per_message);
        assert_eq!(usage.completion_tokens, 0);
    }

    #[test]
    fn function_descriptors_add_per_property_overhead() {
        let descriptor = json!({
            "name": "search_on_web",
            "description": "search the web",
            "parameters": {
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "what to search"},
                },
                "required": ["query"],
            }
        });

        let mut with_property = meter();
        with_property.add_prompt_functions(std::slice::from_ref(&descriptor));

        let mut stripped = descriptor.clone();
        stripped["parameters"]["properties"] = json!({});
        let mut without_property = meter();
        without_property.add_prompt_functions(&[stripped]);

        assert!(
            with_property.snapshot().prompt_tokens > without_property.snapshot().prompt_tokens
        );
    }

    #[test]
    fn completion_counts_function_call_text() {
        let mut meter = meter();
        meter.add_completion_message(&crate::llm::types::ChatMessage::assistant_function_call(
            "search_on_web",
            "{\"query\": \"weather in Tokyo\"}",
        ));
        assert!(meter.snapshot().completion_tokens > 0);
    }

    #[test]
    fn usage_accumulates_across_calls() {
        let mut meter = meter();
        meter.add_prompt_messages(&[crate::llm::types::ChatMessage::user("first call")]);
        let after_first = meter.snapshot().prompt_tokens;
        meter.add_prompt_messages(&[crate::llm::types::ChatMessage::user("second call")]);
        assert!(meter.snapshot().prompt_tokens > after_first);
    }
}
