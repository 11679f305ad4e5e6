//! Fan-out scrape-and-summarize pipeline.
//!
//! Each search-result link gets its own task running three stages in order:
//! fetch the page, strip boilerplate and cut to a token budget, then condense
//! to the question-relevant portion. Tasks run concurrently and report
//! progress through a shared meter; a failing link drops out of the joined
//! result without affecting its siblings.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;

use crate::core::errors::ApiError;
use crate::events::EventSender;
use crate::llm::provider::ChatProvider;
use crate::llm::tokens::TokenEstimator;
use crate::llm::types::{ChatMessage, ChatRequest};

/// Token budget for a cleaned page; enough context for a deep answer without
/// blowing the summarization call's window.
pub const CONTENT_TOKEN_BUDGET: usize = 10_000;
/// Excerpts at or below this size skip the summarization call entirely.
pub const SUMMARY_TOKEN_THRESHOLD: usize = 500;
const SUMMARY_MAX_TOKENS: u32 = 500;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Elements that never carry answer content.
const BOILERPLATE_TAGS: [&str; 5] = ["script", "style", "nav", "header", "footer"];

#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Full response body; non-2xx responses are an error.
    async fn fetch(&self, url: &str) -> Result<String, ApiError>;
}

pub struct HttpPageFetcher {
    client: reqwest::Client,
}

impl HttpPageFetcher {
    pub fn new() -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(ApiError::internal)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> Result<String, ApiError> {
        let res = self
            .client
            .get(url)
            .send()
            .await
            .map_err(ApiError::internal)?
            .error_for_status()
            .map_err(ApiError::internal)?;
        res.text().await.map_err(ApiError::internal)
    }
}

/// Shared progress meter. Each of the three stages of each link task bumps by
/// a fixed increment; update and broadcast happen under one lock so emitted
/// values never go backwards.
struct ProgressMeter {
    value: Mutex<u8>,
    step: u8,
    events: EventSender,
}

impl ProgressMeter {
    fn new(link_count: usize, events: EventSender) -> Self {
        let step = (100 / (3 * link_count.max(1))) as u8;
        Self {
            value: Mutex::new(0),
            step,
            events,
        }
    }

    fn bump(&self) {
        if let Ok(mut value) = self.value.lock() {
            *value = value.saturating_add(self.step);
            self.events.scrape_progress(*value);
        }
    }
}

pub struct WebContentsScraper {
    links: Vec<String>,
    query: String,
    fetcher: Arc<dyn PageFetcher>,
    provider: Arc<dyn ChatProvider>,
    estimator: Arc<dyn TokenEstimator>,
    summary_model: String,
    events: EventSender,
}

impl WebContentsScraper {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        links: Vec<String>,
        query: String,
        fetcher: Arc<dyn PageFetcher>,
        provider: Arc<dyn ChatProvider>,
        estimator: Arc<dyn TokenEstimator>,
        summary_model: String,
        events: EventSender,
    ) -> Self {
        Self {
            links,
            query,
            fetcher,
            provider,
            estimator,
            summary_model,
            events,
        }
    }

    /// Runs every link task concurrently and joins the surviving summaries.
    ///
    /// The per-step increment is rounded down, so the accumulated value ends
    /// short of 100; the closing broadcast pins it there.
    pub async fn summarize_links(&self) -> String {
        self.events.scrape_progress(0);
        let progress = Arc::new(ProgressMeter::new(self.links.len(), self.events.clone()));

        let mut handles = Vec::with_capacity(self.links.len());
        for link in &self.links {
            handles.push(tokio::spawn(run_link_task(
                link.clone(),
                self.query.clone(),
                self.fetcher.clone(),
                self.provider.clone(),
                self.estimator.clone(),
                self.summary_model.clone(),
                progress.clone(),
            )));
        }

        let mut summaries = Vec::new();
        for (outcome, link) in join_all(handles).await.into_iter().zip(&self.links) {
            match outcome {
                Ok(Ok(summary)) => summaries.push(summary),
                Ok(Err(err)) => tracing::warn!("scraping {} failed: {}", link, err),
                Err(err) => tracing::warn!("scrape task for {} aborted: {}", link, err),
            }
        }

        self.events.scrape_progress(100);
        summaries.join("\n\n")
    }
}

async fn run_link_task(
    link: String,
    query: String,
    fetcher: Arc<dyn PageFetcher>,
    provider: Arc<dyn ChatProvider>,
    estimator: Arc<dyn TokenEstimator>,
    summary_model: String,
    progress: Arc<ProgressMeter>,
) -> Result<String, ApiError> {
    let raw = fetcher.fetch(&link).await?;
    progress.bump();

    let cleaned = strip_boilerplate(&raw);
    let excerpt = truncate_to_token_budget(&cleaned, estimator.as_ref(), CONTENT_TOKEN_BUDGET);
    progress.bump();

    let summary = summarize_content(
        &excerpt,
        &query,
        provider.as_ref(),
        estimator.as_ref(),
        &summary_model,
    )
    .await?;
    progress.bump();

    Ok(format!("## Summary extracted from ({}): {}", link, summary))
}

async fn summarize_content(
    content: &str,
    query: &str,
    provider: &dyn ChatProvider,
    estimator: &dyn TokenEstimator,
    summary_model: &str,
) -> Result<String, ApiError> {
    if estimator.count(content) <= SUMMARY_TOKEN_THRESHOLD {
        return Ok(content.to_string());
    }

    let prompt = format!(
        "## Instruction: From the target text, extract only the passages relevant to the question \"{}\".\n\n## Target text: {}",
        query, content
    );
    let request = ChatRequest::new(summary_model, vec![ChatMessage::user(prompt)])
        .with_temperature(0.0)
        .with_max_tokens(SUMMARY_MAX_TOKENS);
    provider.complete(request).await
}

/// Drops boilerplate blocks wholesale and all remaining markup, keeping the
/// text content of the page.
pub fn strip_boilerplate(html: &str) -> String {
    let chars: Vec<char> = html.chars().collect();
    let lower: Vec<char> = chars.iter().map(|c| c.to_ascii_lowercase()).collect();

    let mut result = String::new();
    let mut in_tag = false;
    let mut i = 0;

    while i < chars.len() {
        if chars[i] == '<' {
            if let Some(tag) = boilerplate_tag_at(&lower, i) {
                let close: Vec<char> = format!("</{}>", tag).chars().collect();
                match find_sequence(&lower, i, &close) {
                    Some(end) => {
                        i = end + close.len();
                        continue;
                    }
                    // Unterminated block; nothing after it is content.
                    None => break,
                }
            }
            in_tag = true;
        } else if chars[i] == '>' {
            in_tag = false;
            i += 1;
            continue;
        } else if !in_tag {
            result.push(chars[i]);
        }
        i += 1;
    }

    let lines: Vec<&str> = result
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    lines.join("\n")
}

fn boilerplate_tag_at(lower: &[char], at: usize) -> Option<&'static str> {
    BOILERPLATE_TAGS.iter().copied().find(|tag| {
        let name_start = at + 1;
        let name_end = name_start + tag.len();
        if name_end > lower.len() {
            return false;
        }
        if !lower[name_start..name_end].iter().copied().eq(tag.chars()) {
            return false;
        }
        matches!(
            lower.get(name_end),
            None | Some(&' ') | Some(&'>') | Some(&'/') | Some(&'\n') | Some(&'\t')
        )
    })
}

fn find_sequence(haystack: &[char], from: usize, needle: &[char]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    (from..=haystack.len() - needle.len()).find(|&i| haystack[i..i + needle.len()] == *needle)
}

/// Keeps the longest prefix that fits the token budget, cutting on a char
/// boundary.
pub fn truncate_to_token_budget(
    text: &str,
    estimator: &dyn TokenEstimator,
    budget: usize,
) -> String {
    if estimator.count(text) <= budget {
        return text.to_string();
    }

    let mut boundaries: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    boundaries.push(text.len());

    // Binary search for the longest prefix within budget.
    let mut low = 0;
    let mut high = boundaries.len() - 1;
    while low < high {
        let mid = (low + high + 1) / 2;
        if estimator.count(&text[..boundaries[mid]]) <= budget {
            low = mid;
        } else {
            high = mid - 1;
        }
    }

    text[..boundaries[low]].to_string()
}
