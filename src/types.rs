use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ApiError;

/// Extraction outcome recorded with every article.
///
/// `ok` means a title plus a real body; `partial` means at least one usable
/// field; `failed` means the attempt produced nothing and `error_reason`
/// says why.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArticleStatus {
    Ok,
    Partial,
    Failed,
}

impl ArticleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArticleStatus::Ok => "ok",
            ArticleStatus::Partial => "partial",
            ArticleStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for ArticleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(ArticleStatus::Ok),
            "partial" => Ok(ArticleStatus::Partial),
            "failed" => Ok(ArticleStatus::Failed),
            other => Err(format!("unknown article status: {other}")),
        }
    }
}

/// Normalized form of a source URL, used as the storage key. Two requests
/// for the same page in different spellings map to the same value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalUrl(String);

impl CanonicalUrl {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parse and validate a raw request URL. Returns the URL to fetch and its
/// canonical form: scheme and host lowercased, default port and fragment
/// dropped, trailing path slashes trimmed, query kept.
pub fn canonicalize(raw: &str) -> Result<(Url, CanonicalUrl), ApiError> {
    let url = Url::parse(raw.trim()).map_err(|e| ApiError::InvalidRequest(format!("bad url: {e}")))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ApiError::InvalidRequest(format!(
            "unsupported scheme: {}",
            url.scheme()
        )));
    }
    if url.host_str().is_none() {
        return Err(ApiError::InvalidRequest("url has no host".into()));
    }

    // Url::parse already lowercases scheme/host and strips default ports.
    let mut canon = url.clone();
    canon.set_fragment(None);
    let path = canon.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        canon.set_path(path.trim_end_matches('/'));
    }
    Ok((url, CanonicalUrl(canon.to_string())))
}

/// Fields harvested from one HTML document, before persistence.
#[derive(Debug, Clone)]
pub struct ExtractedFields {
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub publish_date: Option<DateTime<Utc>>,
    pub text: String,
    pub top_image_url: Option<String>,
    pub status: ArticleStatus,
}

/// Raw response from one successful page fetch.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub final_url: Url,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// Persisted article row, one per canonical URL. This is also the wire
/// shape returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleRecord {
    pub canonical_url: String,
    pub original_url: String,
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub publish_date: Option<DateTime<Utc>>,
    pub text: String,
    pub top_image_url: Option<String>,
    pub status: ArticleStatus,
    pub error_reason: Option<String>,
    pub summary: Option<String>,
    pub summary_model: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

impl ArticleRecord {
    /// Record for an attempt that yielded usable fields.
    pub fn extracted(
        canonical: &CanonicalUrl,
        original: &Url,
        fields: ExtractedFields,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            canonical_url: canonical.to_string(),
            original_url: original.to_string(),
            title: fields.title,
            authors: fields.authors,
            publish_date: fields.publish_date,
            text: fields.text,
            top_image_url: fields.top_image_url,
            status: fields.status,
            error_reason: None,
            summary: None,
            summary_model: None,
            fetched_at,
        }
    }

    /// Record for an attempt that failed outright. Stored so that repeat
    /// requests are answered from cache instead of re-hammering a broken
    /// source.
    pub fn failure(
        canonical: &CanonicalUrl,
        original: &Url,
        reason: String,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            canonical_url: canonical.to_string(),
            original_url: original.to_string(),
            title: None,
            authors: Vec::new(),
            publish_date: None,
            text: String::new(),
            top_image_url: None,
            status: ArticleStatus::Failed,
            error_reason: Some(reason),
            summary: None,
            summary_model: None,
            fetched_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractRequest {
    pub url: String,
    #[serde(default)]
    pub force_refresh: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SummarizeRequest {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SummaryResponse {
    pub summary: String,
    pub model: String,
    pub cached: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canon(raw: &str) -> String {
        canonicalize(raw).unwrap().1.to_string()
    }

    #[test]
    fn canonical_form_collapses_equivalent_spellings() {
        let expected = "http://example.com/a";
        assert_eq!(canon("http://example.com/a"), expected);
        assert_eq!(canon("HTTP://EXAMPLE.COM/a"), expected);
        assert_eq!(canon("http://example.com:80/a"), expected);
        assert_eq!(canon("http://example.com/a/"), expected);
        assert_eq!(canon("http://example.com/a#section-2"), expected);
    }

    #[test]
    fn query_strings_are_preserved() {
        assert_eq!(
            canon("http://example.com/a?page=2#top"),
            "http://example.com/a?page=2"
        );
    }

    #[test]
    fn bare_host_keeps_root_path() {
        assert_eq!(canon("https://example.com"), "https://example.com/");
        assert_eq!(canon("https://example.com/"), "https://example.com/");
    }

    #[test]
    fn non_default_port_survives() {
        assert_eq!(
            canon("http://example.com:8080/a"),
            "http://example.com:8080/a"
        );
    }

    #[test]
    fn path_case_is_preserved() {
        assert_eq!(
            canon("http://example.com/News/Today"),
            "http://example.com/News/Today"
        );
    }

    #[test]
    fn non_http_schemes_are_rejected() {
        for raw in ["ftp://example.com/a", "file:///etc/passwd", "mailto:x@y.z"] {
            let err = canonicalize(raw).unwrap_err();
            assert!(matches!(err, ApiError::InvalidRequest(_)), "{raw}");
        }
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(canonicalize("not a url").is_err());
        assert!(canonicalize("").is_err());
        assert!(canonicalize("http://").is_err());
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            ArticleStatus::Ok,
            ArticleStatus::Partial,
            ArticleStatus::Failed,
        ] {
            let parsed: ArticleStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("pending".parse::<ArticleStatus>().is_err());
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ArticleStatus::Partial).unwrap(),
            "\"partial\""
        );
    }

    #[test]
    fn failure_record_has_reason_and_no_content() {
        let (url, key) = canonicalize("http://example.com/broken").unwrap();
        let rec = ArticleRecord::failure(&key, &url, "http status 500".into(), Utc::now());
        assert_eq!(rec.status, ArticleStatus::Failed);
        assert_eq!(rec.error_reason.as_deref(), Some("http status 500"));
        assert!(rec.text.is_empty());
        assert!(rec.title.is_none());
        assert!(rec.summary.is_none());
    }
}
