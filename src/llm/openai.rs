use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::provider::ChatProvider;
use super::types::{ChatDelta, ChatRequest, FunctionCallDelta};
use crate::core::errors::ApiError;

/// Provider speaking the OpenAI chat-completions wire format.
#[derive(Clone)]
pub struct OpenAiProvider {
    base_url: String,
    api_key: String,
    client: Client,
}

impl OpenAiProvider {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client: Client::new(),
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }
}

fn build_body(request: &ChatRequest, stream: bool) -> Value {
    let mut body = json!({
        "model": request.model,
        "temperature": request.temperature,
        "messages": request.messages,
        "stream": stream,
    });

    if let Some(obj) = body.as_object_mut() {
        if let Some(max_tokens) = request.max_tokens {
            obj.insert("max_tokens".to_string(), json!(max_tokens));
        }
        // The API distinguishes a missing `functions` key from an empty list;
        // when no functions are configured the key must be absent entirely.
        if !request.functions.is_empty() {
            obj.insert("functions".to_string(), json!(request.functions));
            obj.insert("function_call".to_string(), json!("auto"));
        }
    }

    body
}

async fn error_from_response(res: reqwest::Response) -> ApiError {
    let status = res.status().as_u16();
    let body = res.text().await.unwrap_or_default();
    if body.contains("context_length_exceeded") || body.contains("maximum context length") {
        return ApiError::ContextOverflow;
    }
    ApiError::Upstream {
        status,
        message: format!("chat completion failed: {}", body),
    }
}

/// Extracts the delta from one streamed payload, if it carries one.
fn parse_delta(payload: &Value) -> Option<ChatDelta> {
    let delta = payload.get("choices")?.get(0)?.get("delta")?;

    if let Some(function_call) = delta.get("function_call") {
        let name = function_call
            .get("name")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let arguments = function_call
            .get("arguments")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        return Some(ChatDelta {
            content: None,
            function_call: Some(FunctionCallDelta { name, arguments }),
        });
    }

    let content = delta.get("content").and_then(|v| v.as_str())?;
    if content.is_empty() {
        return None;
    }
    Some(ChatDelta {
        content: Some(content.to_string()),
        function_call: None,
    })
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    async fn stream_chat(
        &self,
        request: ChatRequest,
    ) -> Result<mpsc::Receiver<Result<ChatDelta, ApiError>>, ApiError> {
        let body = build_body(&request, true);

        let res = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(ApiError::internal)?;

        if !res.status().is_success() {
            return Err(error_from_response(res).await);
        }

        let (tx, rx) = mpsc::channel(32);
        let mut stream = res.bytes_stream();

        tokio::spawn(async move {
            // SSE lines can arrive split across network chunks, so keep a
            // carry-over buffer and only parse complete lines.
            let mut buffer = String::new();
            while let Some(item) = stream.next().await {
                match item {
                    Ok(bytes) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                        while let Some(pos) = buffer.find('\n') {
                            let line = buffer[..pos].trim().to_string();
                            buffer.drain(..=pos);
                            if line.is_empty() {
                                continue;
                            }
                            if line == "data: [DONE]" {
                                return;
                            }
                            if let Some(data) = line.strip_prefix("data: ") {
                                if let Ok(payload) = serde_json::from_str::<Value>(data) {
                                    if let Some(delta) = parse_delta(&payload) {
                                        if tx.send(Ok(delta)).await.is_err() {
                                            return;
                                        }
                                    }
                                }
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(ApiError::internal(e))).await;
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn complete(&self, request: ChatRequest) -> Result<String, ApiError> {
        let body = build_body(&request, false);

        let res = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(ApiError::internal)?;

        if !res.status().is_success() {
            return Err(error_from_response(res).await);
        }

        let payload: Value = res.json().await.map_err(ApiError::internal)?;
        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();

        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::ChatMessage;

    #[test]
    fn body_omits_functions_key_when_none_configured() {
        let request = ChatRequest::new("gpt-3.5-turbo", vec![ChatMessage::user("hi")]);
        let body = build_body(&request, true);
        assert!(body.get("functions").is_none());
        assert!(body.get("function_call").is_none());
    }

    #[test]
    fn body_includes_functions_and_auto_mode_when_configured() {
        let request = ChatRequest::new("gpt-3.5-turbo", vec![ChatMessage::user("hi")])
            .with_functions(vec![json!({"name": "search_on_web"})]);
        let body = build_body(&request, true);
        assert_eq!(body["functions"][0]["name"], "search_on_web");
        assert_eq!(body["function_call"], "auto");
    }

    #[test]
    fn body_carries_max_tokens_and_temperature() {
        let request = ChatRequest::new("gpt-3.5-turbo-16k", vec![ChatMessage::user("hi")])
            .with_temperature(0.0)
            .with_max_tokens(500);
        let body = build_body(&request, false);
        assert_eq!(body["temperature"], 0.0);
        assert_eq!(body["max_tokens"], 500);
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn parse_delta_reads_content_fragment() {
        let payload = json!({"choices": [{"delta": {"content": "Hello"}}]});
        let delta = parse_delta(&payload).unwrap();
        assert_eq!(delta.content.as_deref(), Some("Hello"));
        assert!(delta.function_call.is_none());
    }

    #[test]
    fn parse_delta_reads_function_call_fragment() {
        let payload = json!({
            "choices": [{"delta": {"function_call": {"name": "search_on_web", "arguments": "{\""}}}]
        });
        let delta = parse_delta(&payload).unwrap();
        let fragment = delta.function_call.unwrap();
        assert_eq!(fragment.name.as_deref(), Some("search_on_web"));
        assert_eq!(fragment.arguments, "{\"");
    }

    #[test]
    fn parse_delta_ignores_role_only_chunk() {
        let payload = json!({"choices": [{"delta": {"role": "assistant"}}]});
        assert!(parse_delta(&payload).is_none());
    }
}
