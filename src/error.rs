use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

/// Fetch-layer failures. The pipeline absorbs these into a stored `failed`
/// record; they are never surfaced as HTTP errors.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error after {attempts} attempt(s): {message}")]
    Network { attempts: u32, message: String },
    #[error("http status {status}")]
    Http { status: u16 },
    #[error("response body exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

/// Extraction-layer failures. Same treatment as fetch failures: recorded,
/// not raised. Partial extractions are a status, not an error.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),
    #[error("no usable article fields in document")]
    Unusable,
}

/// Storage failures. `Unavailable` is transient and worth a client retry;
/// `Constraint` should be impossible under correct key derivation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("constraint violation: {0}")]
    Constraint(String),
}

/// Operation-level failures surfaced to callers. A failed fetch or
/// extraction is a valid answer and does not appear here.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("no stored article for {0}")]
    NotFound(String),
    #[error("article has no extracted text to summarize")]
    NotSummarizable,
    #[error("summarizer not configured")]
    SummarizerUnavailable,
    #[error("summarizer upstream error: {0}")]
    Summarizer(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::NotSummarizable => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::SummarizerUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Summarizer(_) => StatusCode::BAD_GATEWAY,
            ApiError::Store(StoreError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Store(StoreError::Constraint(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        HttpResponse::build(status).json(serde_json::json!({
            "ok": false,
            "error": self.to_string(),
        }))
    }
}
