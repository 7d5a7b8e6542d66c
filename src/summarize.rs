use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ApiError;
use crate::store::ArticleStore;
use crate::types::{canonicalize, SummaryResponse};

const GEMINI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
/// Longest article slice sent to the model.
const MAX_INPUT_CHARS: usize = 10_000;

/// Summary generation seam, so the store-and-cache flow is testable
/// without a live model.
#[async_trait]
pub trait SummaryModel: Send + Sync {
    fn model_name(&self) -> &str;
    async fn summarize(&self, title: Option<&str>, body: &str) -> Result<String, ApiError>;
}

/// Answer a summarize request: reuse the stored summary when one exists,
/// otherwise generate, persist and return it. Articles without extracted
/// text cannot be summarized.
pub async fn summarize_article<S, M>(
    store: &S,
    model: &M,
    raw_url: &str,
) -> Result<SummaryResponse, ApiError>
where
    S: ArticleStore + ?Sized,
    M: SummaryModel + ?Sized,
{
    let (_, canonical) = canonicalize(raw_url)?;
    let record = store
        .find(&canonical)
        .await?
        .ok_or_else(|| ApiError::NotFound(canonical.to_string()))?;

    if let (Some(summary), Some(model_name)) = (&record.summary, &record.summary_model) {
        debug!(url = %canonical, "summary cache hit");
        return Ok(SummaryResponse {
            summary: summary.clone(),
            model: model_name.clone(),
            cached: true,
        });
    }

    if record.text.trim().is_empty() {
        return Err(ApiError::NotSummarizable);
    }

    let summary = model.summarize(record.title.as_deref(), &record.text).await?;
    store
        .set_summary(&canonical, &summary, model.model_name())
        .await?;
    Ok(SummaryResponse {
        summary,
        model: model.model_name().to_string(),
        cached: false,
    })
}

/// Gemini-backed summarizer using the generateContent REST endpoint.
#[derive(Clone)]
pub struct Summarizer {
    http: Client,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

impl Summarizer {
    pub fn new(api_key: String, model: String) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            api_key,
            model,
        })
    }
}

fn build_prompt(title: Option<&str>, body: &str) -> String {
    let body: String = body.chars().take(MAX_INPUT_CHARS).collect();
    match title {
        Some(title) => format!(
            "Summarize the following article in 3 to 5 sentences. Keep it factual \
             and skip preamble.\n\nTitle: {title}\n\n{body}"
        ),
        None => format!(
            "Summarize the following article in 3 to 5 sentences. Keep it factual \
             and skip preamble.\n\n{body}"
        ),
    }
}

fn extract_text(resp: GenerateResponse) -> Result<String, ApiError> {
    let candidate = resp
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::Summarizer("empty response from model".into()))?;

    if let Some(reason) = &candidate.finish_reason {
        if reason == "SAFETY" {
            return Err(ApiError::Summarizer("generation blocked: SAFETY".into()));
        }
    }

    let text = candidate
        .content
        .map(|c| {
            c.parts
                .into_iter()
                .map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    let text = text.trim().to_string();
    if text.is_empty() {
        return Err(ApiError::Summarizer("model returned no text".into()));
    }
    Ok(text)
}

#[async_trait]
impl SummaryModel for Summarizer {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn summarize(&self, title: Option<&str>, body: &str) -> Result<String, ApiError> {
        let url = format!(
            "{GEMINI_BASE}/models/{}:generateContent?key={}",
            self.model, self.api_key
        );
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: build_prompt(title, body),
                }],
            }],
        };

        let res = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ApiError::Summarizer(format!("request failed: {e}")))?;

        let status = res.status();
        if !status.is_success() {
            let detail = res.text().await.unwrap_or_default();
            let detail: String = detail.chars().take(200).collect();
            return Err(ApiError::Summarizer(format!(
                "http status {status}: {detail}"
            )));
        }

        let parsed: GenerateResponse = res
            .json()
            .await
            .map_err(|e| ApiError::Summarizer(format!("bad response body: {e}")))?;
        extract_text(parsed)
    }
}
