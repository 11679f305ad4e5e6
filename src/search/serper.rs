//! Web search collaborator client (google.serper.dev).

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};

use crate::core::errors::ApiError;

/// Parsed search provider response.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchResponse {
    pub answer_box: String,
    pub knowledge_graph: String,
    pub organic_results_text: String,
    pub links: Vec<String>,
}

impl SearchResponse {
    /// The provider answered directly via an answer box or knowledge panel.
    pub fn has_direct_answer(&self) -> bool {
        !self.answer_box.is_empty() || !self.knowledge_graph.is_empty()
    }

    pub fn direct_answer_text(&self) -> String {
        [self.answer_box.as_str(), self.knowledge_graph.as_str()]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str) -> Result<SearchResponse, ApiError>;
}

pub struct SerperClient {
    api_key: String,
    gl: String,
    hl: String,
    num: usize,
    client: Client,
}

impl SerperClient {
    pub fn new(api_key: String, gl: String, hl: String, num: usize) -> Self {
        Self {
            api_key,
            gl,
            hl,
            num,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl SearchProvider for SerperClient {
    async fn search(&self, query: &str) -> Result<SearchResponse, ApiError> {
        let body = json!({
            "q": query,
            "gl": self.gl,
            "hl": self.hl,
            "num": self.num,
        });

        let res = self
            .client
            .post("https://google.serper.dev/search")
            .header("X-API-KEY", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(ApiError::internal)?;

        if !res.status().is_success() {
            return Err(ApiError::Upstream {
                status: res.status().as_u16(),
                message: format!("search provider error: {}", res.status()),
            });
        }

        let payload: Value = res.json().await.map_err(ApiError::internal)?;
        Ok(parse_results(&payload, self.num))
    }
}

fn parse_results(payload: &Value, limit: usize) -> SearchResponse {
    let answer_box = parse_answer_box(payload);
    let knowledge_graph = parse_knowledge_graph(payload);

    let mut links = Vec::new();
    let mut organic_results_text = String::new();

    if let Some(items) = payload.get("organic").and_then(|v| v.as_array()) {
        for item in items.iter().take(limit) {
            let link = item.get("link").and_then(|v| v.as_str()).unwrap_or_default();
            if item.get("link").is_some() {
                links.push(link.to_string());
            }

            let snippet = item
                .get("snippet")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            let mut line = snippet.to_string();
            if let Some(attributes) = item.get("attributes").and_then(|v| v.as_object()) {
                for (key, value) in attributes {
                    let value = value.as_str().unwrap_or_default();
                    line.push_str(&format!(" {}: {}.", key, value));
                }
            }
            organic_results_text.push_str(&format!("{} ({})\n", line, link));
        }
    }

    SearchResponse {
        answer_box,
        knowledge_graph,
        organic_results_text,
        links,
    }
}

/// Answer boxes carry one of three shapes; prefer the explicit answer, then
/// the snippet, then highlighted snippets.
fn parse_answer_box(payload: &Value) -> String {
    let Some(answer_box) = payload.get("answerBox") else {
        return String::new();
    };

    if let Some(answer) = answer_box.get("answer").and_then(|v| v.as_str()) {
        return answer.to_string();
    }
    if let Some(snippet) = answer_box.get("snippet").and_then(|v| v.as_str()) {
        return snippet.replace('\n', " ");
    }
    if let Some(highlighted) = answer_box
        .get("snippetHighlighted")
        .and_then(|v| v.as_array())
    {
        return highlighted
            .iter()
            .filter_map(|v| v.as_str())
            .collect::<Vec<_>>()
            .join("\n");
    }

    String::new()
}

fn parse_knowledge_graph(payload: &Value) -> String {
    let Some(graph) = payload.get("knowledgeGraph") else {
        return String::new();
    };

    let title = graph.get("title").and_then(|v| v.as_str()).unwrap_or_default();
    let mut text = String::new();

    if let Some(entity_type) = graph.get("type").and_then(|v| v.as_str()) {
        text.push_str(&format!("{}: {}.\n", title, entity_type));
    }
    if let Some(description) = graph.get("description").and_then(|v| v.as_str()) {
        text.push_str(&format!("{}\n", description));
    }
    if let Some(attributes) = graph.get("attributes").and_then(|v| v.as_object()) {
        for (attribute, value) in attributes {
            let value = value.as_str().unwrap_or_default();
            text.push_str(&format!("{} {}: {}.\n", title, attribute, value));
        }
    }

    text
}
