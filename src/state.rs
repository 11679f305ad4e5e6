use std::sync::Arc;

use crate::assistant::executors::RetrievalContext;
use crate::assistant::functions::FunctionFlags;
use crate::config::AppConfig;
use crate::core::errors::ApiError;
use crate::index::{InMemoryIndexStore, IndexStore};
use crate::llm::openai::OpenAiProvider;
use crate::llm::provider::ChatProvider;
use crate::llm::tokens::{HeuristicTokenEstimator, TokenEstimator};
use crate::scrape::{HttpPageFetcher, PageFetcher};
use crate::search::serper::{SearchProvider, SerperClient};
use crate::usage::{LogUsageSink, UsageSink};

/// Application state shared across all routes and background workers. Each
/// request builds its own orchestrator on top of these collaborators.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub provider: Arc<dyn ChatProvider>,
    pub search: Arc<dyn SearchProvider>,
    pub index: Arc<dyn IndexStore>,
    pub fetcher: Arc<dyn PageFetcher>,
    pub estimator: Arc<dyn TokenEstimator>,
    pub usage_sink: Arc<dyn UsageSink>,
}

impl AppState {
    pub fn initialize(config: AppConfig) -> Result<Arc<Self>, ApiError> {
        let provider = Arc::new(OpenAiProvider::new(
            config.openai_base_url.clone(),
            config.openai_api_key.clone(),
        ));
        let search = Arc::new(SerperClient::new(
            config.serper_api_key.clone(),
            config.search_locale_gl.clone(),
            config.search_locale_hl.clone(),
            config.search_result_count,
        ));
        let index: Arc<dyn IndexStore> = match &config.index_documents_path {
            Some(path) => Arc::new(InMemoryIndexStore::load_from_file(path)?),
            None => Arc::new(InMemoryIndexStore::new(Vec::new())),
        };
        let fetcher = Arc::new(HttpPageFetcher::new()?);

        Ok(Arc::new(Self {
            config: Arc::new(config),
            provider,
            search,
            index,
            fetcher,
            estimator: Arc::new(HeuristicTokenEstimator),
            usage_sink: Arc::new(LogUsageSink),
        }))
    }

    pub fn retrieval_context(&self) -> RetrievalContext {
        RetrievalContext {
            search: self.search.clone(),
            index: self.index.clone(),
            provider: self.provider.clone(),
            fetcher: self.fetcher.clone(),
            estimator: self.estimator.clone(),
            summary_model: self.config.summary_model_name.clone(),
            deep_search: self.config.deep_search,
        }
    }

    pub fn function_flags(&self) -> FunctionFlags {
        FunctionFlags {
            enable_index: self.config.enable_index_search,
            enable_web: self.config.enable_web_search,
            enable_combined: self.config.enable_combined_search,
        }
    }
}
