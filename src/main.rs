use actix_web::{get, middleware, post, web, App, HttpResponse, HttpServer, Responder};
use tracing::info;
use tracing_subscriber::util::SubscriberInitExt; // <- needed for .try_init()
use tracing_subscriber::{fmt, EnvFilter};

mod config;
mod error;
mod extract;
mod fetch;
mod pipeline;
mod store;
mod summarize;
mod types;

use crate::config::Config;
use crate::error::ApiError;
use crate::fetch::HttpFetcher;
use crate::store::{ArticleStore, PgStore};
use crate::summarize::Summarizer;
use crate::types::{ExtractRequest, ListQuery, SummarizeRequest};

#[get("/health")]
async fn health() -> impl Responder {
    web::Json(serde_json::json!({ "status": "ok" }))
}

/* ------------------------ /extract ------------------------ */

#[post("/extract")]
async fn extract_url(
    payload: web::Json<ExtractRequest>,
    fetcher: web::Data<HttpFetcher>,
    store: web::Data<PgStore>,
) -> Result<HttpResponse, ApiError> {
    let req = payload.into_inner();
    let fetcher = fetcher.into_inner();
    let store = store.into_inner();

    // Runs detached from the connection: a caller that hangs up must not
    // cancel the fetch or the write.
    let outcome = tokio::spawn(async move {
        pipeline::run(fetcher.as_ref(), store.as_ref(), req).await
    })
    .await
    .map_err(|e| ApiError::Internal(format!("extract task failed: {e}")))??;

    info!(
        url = %outcome.record.canonical_url,
        status = outcome.record.status.as_str(),
        cached = outcome.from_cache,
        "extract answered"
    );
    Ok(HttpResponse::Ok().json(outcome.record))
}

/* ------------------------ /articles ------------------------ */

#[get("/articles")]
async fn list_articles(
    q: web::Query<ListQuery>,
    store: web::Data<PgStore>,
) -> Result<HttpResponse, ApiError> {
    let offset = q.offset.unwrap_or(0).max(0);
    let limit = q.limit.unwrap_or(50).clamp(1, 100);
    let records = store.list(offset, limit).await?;
    Ok(HttpResponse::Ok().json(records))
}

/* ------------------------ /summarize ------------------------ */

#[post("/summarize")]
async fn summarize_url(
    payload: web::Json<SummarizeRequest>,
    store: web::Data<PgStore>,
    summarizer: Option<web::Data<Summarizer>>,
) -> Result<HttpResponse, ApiError> {
    let Some(summarizer) = summarizer else {
        return Err(ApiError::SummarizerUnavailable);
    };
    let resp =
        summarize::summarize_article(store.get_ref(), summarizer.get_ref(), &payload.url).await?;
    Ok(HttpResponse::Ok().json(resp))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Logging
    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish()
        .try_init();

    // Config
    let cfg = Config::from_env().expect("invalid configuration");

    // Init subsystems
    let store = PgStore::connect(&cfg.pg_url).await.expect("pg pool init failed");
    info!("✅ connected to Postgres");

    let fetcher = HttpFetcher::new(&cfg).expect("http client init failed");

    let summarizer = cfg
        .gemini_api_key
        .clone()
        .map(|key| Summarizer::new(key, cfg.gemini_model.clone()).expect("summarizer init failed"));
    match &summarizer {
        Some(_) => info!(model = %cfg.gemini_model, "summarizer enabled"),
        None => info!("GEMINI_API_KEY not set; /summarize disabled"),
    }

    info!("🌐 clipper listening on {}", cfg.bind);
    let bind = cfg.bind.clone();
    let workers = cfg.workers;
    HttpServer::new(move || {
        let mut app = App::new()
            .app_data(web::Data::new(store.clone()))
            .app_data(web::Data::new(fetcher.clone()))
            .wrap(middleware::Logger::default())
            .service(health)
            .service(extract_url)
            .service(list_articles)
            .service(summarize_url);
        if let Some(s) = &summarizer {
            app = app.app_data(web::Data::new(s.clone()));
        }
        app
    })
    .bind(bind)?
    .workers(workers)
    .run()
    .await
}
