use chrono::Utc;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::extract;
use crate::fetch::Fetcher;
use crate::store::ArticleStore;
use crate::types::{canonicalize, ArticleRecord, ExtractRequest};

/// Result of one extract request, with cache provenance for logging.
#[derive(Debug)]
pub struct ExtractOutcome {
    pub record: ArticleRecord,
    pub from_cache: bool,
}

/// Drive one extraction request end to end: validate, canonicalize, answer
/// from the store when possible, otherwise fetch, extract and persist.
///
/// Fetch and extraction failures are recorded as `failed` articles and
/// returned as normal answers; only invalid input and storage trouble come
/// back as errors. A stored `failed` record answers repeat requests the
/// same as a successful one, so a broken source is hit once, not per call.
pub async fn run<F, S>(fetcher: &F, store: &S, req: ExtractRequest) -> Result<ExtractOutcome, ApiError>
where
    F: Fetcher + ?Sized,
    S: ArticleStore + ?Sized,
{
    let (url, canonical) = canonicalize(&req.url)?;

    if !req.force_refresh {
        if let Some(existing) = store.find(&canonical).await? {
            debug!(url = %canonical, status = existing.status.as_str(), "cache hit");
            return Ok(ExtractOutcome {
                record: existing,
                from_cache: true,
            });
        }
    }

    let record = match fetcher.fetch(&url).await {
        Ok(page) => {
            debug!(
                url = %page.final_url,
                status = page.status,
                bytes = page.body.len(),
                "fetched"
            );
            match extract::extract_article(&page) {
                Ok(fields) => ArticleRecord::extracted(&canonical, &url, fields, Utc::now()),
                Err(e) => {
                    warn!(url = %url, error = %e, "extraction failed");
                    ArticleRecord::failure(&canonical, &url, e.to_string(), Utc::now())
                }
            }
        }
        Err(e) => {
            warn!(url = %url, error = %e, "fetch failed");
            ArticleRecord::failure(&canonical, &url, e.to_string(), Utc::now())
        }
    };

    let stored = store.upsert(&record).await?;
    Ok(ExtractOutcome {
        record: stored,
        from_cache: false,
    })
}
