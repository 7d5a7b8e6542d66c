use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use scraper::{Html, Selector};
use url::Url;

use crate::error::ExtractError;
use crate::types::{ArticleStatus, ExtractedFields, FetchedPage};

/// Shortest body considered a real article rather than boilerplate.
const MIN_TEXT_CHARS: usize = 200;
/// Hard cap on stored body text.
const MAX_TEXT_CHARS: usize = 200_000;
/// Publish dates further in the future than this are treated as bogus.
const FUTURE_SLACK_HOURS: i64 = 24;

/// Harvest article fields from a fetched page and classify the result.
///
/// Returns `Err(Unusable)` only when nothing at all could be pulled out;
/// thin results come back as `partial` so the caller still gets whatever
/// the page had.
pub fn extract_article(page: &FetchedPage) -> Result<ExtractedFields, ExtractError> {
    if let Some(ct) = &page.content_type {
        let ct = ct.to_ascii_lowercase();
        if !ct.is_empty() && !ct.contains("html") {
            return Err(ExtractError::UnsupportedContentType(ct));
        }
    }

    let html = String::from_utf8_lossy(&page.body);
    let doc = Html::parse_document(&html);

    let title = harvest_title(&doc);
    let authors = normalize_authors(harvest_authors(&doc));
    let publish_date = harvest_publish_date(&doc, Utc::now());
    let text = harvest_text(&doc);
    let top_image_url = harvest_top_image(&doc, &page.final_url);

    let has_title = title.is_some();
    let has_body = text.chars().count() >= MIN_TEXT_CHARS;
    let status = if has_title && has_body {
        ArticleStatus::Ok
    } else if has_title || has_body || !authors.is_empty() {
        ArticleStatus::Partial
    } else {
        return Err(ExtractError::Unusable);
    };

    Ok(ExtractedFields {
        title,
        authors,
        publish_date,
        text,
        top_image_url,
        status,
    })
}

fn harvest_title(doc: &Html) -> Option<String> {
    let og = Selector::parse(r#"meta[property="og:title"]"#).unwrap();
    if let Some(content) = doc.select(&og).next().and_then(|m| m.value().attr("content")) {
        let content = content.trim();
        if !content.is_empty() {
            return Some(content.to_string());
        }
    }
    let title = Selector::parse("title").unwrap();
    doc.select(&title)
        .next()
        .map(|t| t.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

fn harvest_authors(doc: &Html) -> Vec<String> {
    let mut raw = Vec::new();
    for sel in [
        r#"meta[name="author"]"#,
        r#"meta[property="article:author"]"#,
    ] {
        let sel = Selector::parse(sel).unwrap();
        for m in doc.select(&sel) {
            if let Some(content) = m.value().attr("content") {
                raw.push(content.to_string());
            }
        }
    }
    raw
}

/// Split combined bylines on common separators and drop case-insensitive
/// duplicates, keeping first-seen order.
fn normalize_authors(raw: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for chunk in raw {
        for name in chunk.split([',', ';', '|']) {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            // article:author sometimes carries a profile URL, not a name
            if name.starts_with("http://") || name.starts_with("https://") {
                continue;
            }
            if seen.insert(name.to_lowercase()) {
                out.push(name.to_string());
            }
        }
    }
    out
}

fn harvest_publish_date(doc: &Html, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let mut candidates = Vec::new();
    for sel in [
        r#"meta[property="article:published_time"]"#,
        r#"meta[itemprop="datePublished"]"#,
        r#"meta[name="date"]"#,
    ] {
        let sel = Selector::parse(sel).unwrap();
        candidates.extend(
            doc.select(&sel)
                .filter_map(|m| m.value().attr("content").map(str::to_string)),
        );
    }
    let time = Selector::parse("time[datetime]").unwrap();
    candidates.extend(
        doc.select(&time)
            .filter_map(|t| t.value().attr("datetime").map(str::to_string)),
    );

    candidates
        .iter()
        .filter_map(|raw| parse_datetime(raw))
        .find(|dt| plausible(dt, now))
}

/// RFC3339 first, then the naive formats sites commonly emit.
fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|n| n.and_utc());
    }
    None
}

fn plausible(dt: &DateTime<Utc>, now: DateTime<Utc>) -> bool {
    *dt <= now + Duration::hours(FUTURE_SLACK_HOURS)
}

/// Article body as paragraph text. Prefers paragraphs inside an <article>
/// element, then any paragraph, then raw body text.
fn harvest_text(doc: &Html) -> String {
    for sel in ["article p", "p"] {
        let sel = Selector::parse(sel).unwrap();
        let paragraphs: Vec<String> = doc
            .select(&sel)
            .map(|p| p.text().collect::<String>().trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        if !paragraphs.is_empty() {
            return cap_text(paragraphs.join("\n\n"));
        }
    }

    // No paragraph markup at all; take whatever visible text the body has.
    let body = Selector::parse("body").unwrap();
    let text = doc
        .select(&body)
        .flat_map(|b| b.text())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    cap_text(text)
}

fn cap_text(text: String) -> String {
    if text.chars().count() > MAX_TEXT_CHARS {
        text.chars().take(MAX_TEXT_CHARS).collect()
    } else {
        text
    }
}

fn harvest_top_image(doc: &Html, base: &Url) -> Option<String> {
    for sel in [
        r#"meta[property="og:image"]"#,
        r#"meta[name="twitter:image"]"#,
    ] {
        let sel = Selector::parse(sel).unwrap();
        if let Some(src) = doc.select(&sel).next().and_then(|m| m.value().attr("content")) {
            let src = src.trim();
            if src.is_empty() {
                continue;
            }
            // Relative references are resolved against the final fetched URL.
            return base.join(src).ok().map(|abs| abs.to_string());
        }
    }
    None
}
