//! Retrieval executors behind the assistant's function calls.
//!
//! Every executor returns the reference links plus the reference text to
//! inject into conversation context. Per-document problems stay inside the
//! scrape pipeline; only collaborator transport failures propagate from here.

use std::sync::Arc;

use serde_json::Value;

use super::functions::AssistantFunction;
use crate::core::errors::ApiError;
use crate::events::EventSender;
use crate::index::IndexStore;
use crate::llm::provider::ChatProvider;
use crate::llm::tokens::TokenEstimator;
use crate::scrape::{PageFetcher, WebContentsScraper};
use crate::search::serper::SearchProvider;

/// Only the single best chunk, so unrelated material cannot leak into the
/// answer.
pub const INDEX_TOP_K: usize = 1;

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalOutcome {
    pub links: Vec<String>,
    pub reference_text: String,
}

/// Collaborators and settings shared by the three executors.
#[derive(Clone)]
pub struct RetrievalContext {
    pub search: Arc<dyn SearchProvider>,
    pub index: Arc<dyn IndexStore>,
    pub provider: Arc<dyn ChatProvider>,
    pub fetcher: Arc<dyn PageFetcher>,
    pub estimator: Arc<dyn TokenEstimator>,
    pub summary_model: String,
    pub deep_search: bool,
}

impl RetrievalContext {
    /// Dispatches the selected function with its parsed arguments.
    pub async fn execute(
        &self,
        function: AssistantFunction,
        arguments: &Value,
        events: &EventSender,
    ) -> Result<RetrievalOutcome, ApiError> {
        match function {
            AssistantFunction::SearchOnWeb => {
                self.search_on_web(&str_arg(arguments, "query"), events).await
            }
            AssistantFunction::SearchOnIndexData => {
                self.search_on_index(&str_arg(arguments, "query")).await
            }
            AssistantFunction::SearchOnWebAndIndexData => {
                self.search_on_web_and_index(
                    &str_arg(arguments, "index_data_search_query"),
                    &str_arg(arguments, "web_search_query"),
                    events,
                )
                .await
            }
        }
    }

    pub async fn search_on_web(
        &self,
        query: &str,
        events: &EventSender,
    ) -> Result<RetrievalOutcome, ApiError> {
        let result = self.search.search(query).await?;

        // An answer box or knowledge panel is already concise and
        // authoritative; use it as-is and skip scraping even in deep-search
        // mode.
        if result.has_direct_answer() {
            return Ok(RetrievalOutcome {
                reference_text: result.direct_answer_text(),
                links: result.links,
            });
        }

        if self.deep_search {
            if result.links.is_empty() {
                return Ok(RetrievalOutcome {
                    links: Vec::new(),
                    reference_text: String::new(),
                });
            }
            let scraper = WebContentsScraper::new(
                result.links.clone(),
                query.to_string(),
                self.fetcher.clone(),
                self.provider.clone(),
                self.estimator.clone(),
                self.summary_model.clone(),
                events.clone(),
            );
            let summary = scraper.summarize_links().await;
            return Ok(RetrievalOutcome {
                links: result.links,
                reference_text: summary,
            });
        }

        Ok(RetrievalOutcome {
            reference_text: result.organic_results_text,
            links: result.links,
        })
    }

    pub async fn search_on_index(&self, query: &str) -> Result<RetrievalOutcome, ApiError> {
        let chunks = self.index.similarity_search(query, INDEX_TOP_K).await?;
        // A single hit today; concatenating keeps this correct if top-k grows.
        let reference_text = chunks.concat();
        Ok(RetrievalOutcome {
            links: Vec::new(),
            reference_text,
        })
    }

    pub async fn search_on_web_and_index(
        &self,
        index_query: &str,
        web_query: &str,
        events: &EventSender,
    ) -> Result<RetrievalOutcome, ApiError> {
        let index_outcome = self.search_on_index(index_query).await?;
        let web_outcome = self.search_on_web(web_query, events).await?;

        let reference_text = format!(
            "# Instruction: Compare the \"information retrieved from internal documents\" with the \"information retrieved from external sources\", output that comparison first, and then answer the user's original question in light of it.\n# Information retrieved from internal documents: {}\n# Information retrieved from external sources: {}",
            index_outcome.reference_text, web_outcome.reference_text
        );

        // Index hits have no public URL, so only the web links are reported.
        Ok(RetrievalOutcome {
            links: web_outcome.links,
            reference_text,
        })
    }
}

fn str_arg(arguments: &Value, key: &str) -> String {
    arguments
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::mpsc;

    use crate::events;
    use crate::index::InMemoryIndexStore;
    use crate::llm::tokens::HeuristicTokenEstimator;
    use crate::llm::types::{ChatDelta, ChatRequest};
    use crate::search::serper::SearchResponse;

    struct FixedSearch {
        response: SearchResponse,
    }

    #[async_trait]
    impl SearchProvider for FixedSearch {
        async fn search(&self, _query: &str) -> Result<SearchResponse, ApiError> {
            Ok(self.response.clone())
        }
    }

    struct CountingFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PageFetcher for CountingFetcher {
        async fn fetch(&self, _url: &str) -> Result<String, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("<p>page body</p>".to_string())
        }
    }

    struct NullProvider;

    #[async_trait]
    impl ChatProvider for NullProvider {
        async fn stream_chat(
            &self,
            _request: ChatRequest,
        ) -> Result<mpsc::Receiver<Result<ChatDelta, ApiError>>, ApiError> {
            Err(ApiError::Internal("not used".into()))
        }

        async fn complete(&self, _request: ChatRequest) -> Result<String, ApiError> {
            Ok("summary".to_string())
        }
    }

    fn context(response: SearchResponse, deep_search: bool) -> (RetrievalContext, Arc<CountingFetcher>) {
        let fetcher = Arc::new(CountingFetcher { calls: AtomicUsize::new(0) });
        let context = RetrievalContext {
            search: Arc::new(FixedSearch { response }),
            index: Arc::new(InMemoryIndexStore::new(vec![
                "Internal handbook: remote work is allowed.".to_string(),
            ])),
            provider: Arc::new(NullProvider),
            fetcher: fetcher.clone(),
            estimator: Arc::new(HeuristicTokenEstimator),
            summary_model: "summary-model".to_string(),
            deep_search,
        };
        (context, fetcher)
    }

    #[tokio::test]
    async fn direct_answer_bypasses_scraping_even_in_deep_mode() {
        let response = SearchResponse {
            answer_box: "It is 18 degrees.".to_string(),
            links: vec!["https://weather.example".to_string()],
            ..Default::default()
        };
        let (context, fetcher) = context(response, true);
        let (tx, _rx) = events::channel();

        let outcome = context.search_on_web("weather", &tx).await.unwrap();
        assert_eq!(outcome.reference_text, "It is 18 degrees.");
        assert_eq!(outcome.links, vec!["https://weather.example"]);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn shallow_mode_returns_snippet_text_without_fetching() {
        let response = SearchResponse {
            organic_results_text: "snippet one (https://a)\n".to_string(),
            links: vec!["https://a".to_string()],
            ..Default::default()
        };
        let (context, fetcher) = context(response, false);
        let (tx, _rx) = events::channel();

        let outcome = context.search_on_web("anything", &tx).await.unwrap();
        assert_eq!(outcome.reference_text, "snippet one (https://a)\n");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn deep_mode_scrapes_result_links() {
        let response = SearchResponse {
            organic_results_text: "shallow".to_string(),
            links: vec!["https://a".to_string(), "https://b".to_string()],
            ..Default::default()
        };
        let (context, fetcher) = context(response, true);
        let (tx, _rx) = events::channel();

        let outcome = context.search_on_web("anything", &tx).await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        assert!(outcome.reference_text.contains("## Summary extracted from (https://a)"));
        assert!(outcome.reference_text.contains("## Summary extracted from (https://b)"));
    }

    #[tokio::test]
    async fn deep_mode_with_no_links_returns_empty() {
        let (context, fetcher) = context(SearchResponse::default(), true);
        let (tx, _rx) = events::channel();

        let outcome = context.search_on_web("anything", &tx).await.unwrap();
        assert!(outcome.links.is_empty());
        assert!(outcome.reference_text.is_empty());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn index_search_returns_single_chunk_without_links() {
        let (context, _fetcher) = context(SearchResponse::default(), false);
        let outcome = context.search_on_index("remote work").await.unwrap();
        assert!(outcome.links.is_empty());
        assert!(outcome.reference_text.contains("remote work is allowed"));
    }

    #[tokio::test]
    async fn combined_search_embeds_both_sources_in_template() {
        let response = SearchResponse {
            organic_results_text: "external snippet".to_string(),
            links: vec!["https://a".to_string()],
            ..Default::default()
        };
        let (context, _fetcher) = context(response, false);
        let (tx, _rx) = events::channel();

        let outcome = context
            .search_on_web_and_index("remote work", "remote work trends", &tx)
            .await
            .unwrap();
        assert!(outcome.reference_text.contains("Compare"));
        assert!(outcome.reference_text.contains("remote work is allowed"));
        assert!(outcome.reference_text.contains("external snippet"));
        assert_eq!(outcome.links, vec!["https://a"]);
    }

    #[tokio::test]
    async fn execute_dispatches_by_function_kind() {
        let (context, _fetcher) = context(SearchResponse::default(), false);
        let (tx, _rx) = events::channel();

        let outcome = context
            .execute(
                AssistantFunction::SearchOnIndexData,
                &json!({"query": "remote work"}),
                &tx,
            )
            .await
            .unwrap();
        assert!(outcome.reference_text.contains("remote work is allowed"));
    }
}
