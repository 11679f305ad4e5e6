//! Environment-driven application configuration.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::core::errors::ApiError;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub serper_api_key: String,
    pub model_name: String,
    /// Model used for per-page summarization; a large-context variant since
    /// cleaned pages can be close to the content token budget.
    pub summary_model_name: String,
    pub temperature: f64,
    pub enable_index_search: bool,
    pub enable_web_search: bool,
    pub enable_combined_search: bool,
    pub deep_search: bool,
    pub search_locale_gl: String,
    pub search_locale_hl: String,
    pub search_result_count: usize,
    /// Optional plain-text file of blank-line-separated index chunks.
    pub index_documents_path: Option<PathBuf>,
    pub log_dir: PathBuf,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ApiError> {
        Ok(Self {
            port: env_parse("PORT", 8000),
            openai_api_key: require_env("OPENAI_API_KEY")?,
            openai_base_url: env_or("OPENAI_BASE_URL", "https://api.openai.com"),
            serper_api_key: env_or("SERPER_API_KEY", ""),
            model_name: env_or("KOTAE_MODEL", "gpt-3.5-turbo"),
            summary_model_name: env_or("KOTAE_SUMMARY_MODEL", "gpt-3.5-turbo-16k"),
            temperature: env_parse("KOTAE_TEMPERATURE", 0.7),
            enable_index_search: env_flag("KOTAE_ENABLE_INDEX_SEARCH", true),
            enable_web_search: env_flag("KOTAE_ENABLE_WEB_SEARCH", true),
            enable_combined_search: env_flag("KOTAE_ENABLE_COMBINED_SEARCH", false),
            deep_search: env_flag("KOTAE_DEEP_SEARCH", false),
            search_locale_gl: env_or("KOTAE_SEARCH_GL", "jp"),
            search_locale_hl: env_or("KOTAE_SEARCH_HL", "ja"),
            search_result_count: env_parse("KOTAE_SEARCH_RESULTS", 3),
            index_documents_path: env::var("KOTAE_INDEX_DOCUMENTS").ok().map(PathBuf::from),
            log_dir: PathBuf::from(env_or("KOTAE_LOG_DIR", "logs")),
        })
    }
}

fn require_env(key: &str) -> Result<String, ApiError> {
    env::var(key).map_err(|_| ApiError::Internal(format!("{} is not set", key)))
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

fn env_parse<T: FromStr + Copy>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
