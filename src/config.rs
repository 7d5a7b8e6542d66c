use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

/// Runtime configuration, read once at startup from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub pg_url: String,
    pub user_agent: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub fetch_retries: u32,
    pub backoff_base: Duration,
    pub max_body_bytes: usize,
    pub workers: usize,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            bind: env_or("CLIPPER_BIND", "127.0.0.1:8080"),
            pg_url: std::env::var("PG_URL").context("PG_URL not set")?,
            user_agent: env_or(
                "CLIPPER_USER_AGENT",
                "clipper/1.0 (+article extraction service)",
            ),
            connect_timeout: Duration::from_millis(env_parse(
                "CLIPPER_CONNECT_TIMEOUT_MS",
                5_000,
            )?),
            request_timeout: Duration::from_millis(env_parse(
                "CLIPPER_REQUEST_TIMEOUT_MS",
                15_000,
            )?),
            fetch_retries: env_parse("CLIPPER_FETCH_RETRIES", 2)?,
            backoff_base: Duration::from_millis(env_parse("CLIPPER_BACKOFF_BASE_MS", 250)?),
            max_body_bytes: env_parse("CLIPPER_MAX_BODY_BYTES", 4 * 1024 * 1024)?,
            workers: env_parse("CLIPPER_WORKERS", 2)?,
            gemini_api_key: std::env::var("GEMINI_API_KEY").ok().filter(|k| !k.is_empty()),
            gemini_model: env_or("GEMINI_MODEL", "gemini-1.5-flash"),
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("invalid {key}={raw}: {e}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_only_pg_url_is_set() {
        temp_env::with_vars(
            [
                ("PG_URL", Some("postgres://localhost/clipper")),
                ("CLIPPER_BIND", None),
                ("CLIPPER_REQUEST_TIMEOUT_MS", None),
                ("CLIPPER_FETCH_RETRIES", None),
                ("CLIPPER_MAX_BODY_BYTES", None),
                ("GEMINI_API_KEY", None),
            ],
            || {
                let cfg = Config::from_env().unwrap();
                assert_eq!(cfg.bind, "127.0.0.1:8080");
                assert_eq!(cfg.request_timeout, Duration::from_millis(15_000));
                assert_eq!(cfg.fetch_retries, 2);
                assert_eq!(cfg.max_body_bytes, 4 * 1024 * 1024);
                assert_eq!(cfg.workers, 2);
                assert!(cfg.gemini_api_key.is_none());
            },
        );
    }

    #[test]
    fn missing_pg_url_is_an_error() {
        temp_env::with_vars([("PG_URL", None::<&str>)], || {
            let err = Config::from_env().unwrap_err();
            assert!(err.to_string().contains("PG_URL"));
        });
    }

    #[test]
    fn overrides_are_parsed() {
        temp_env::with_vars(
            [
                ("PG_URL", Some("postgres://localhost/clipper")),
                ("CLIPPER_BIND", Some("0.0.0.0:9000")),
                ("CLIPPER_FETCH_RETRIES", Some("5")),
                ("CLIPPER_BACKOFF_BASE_MS", Some("10")),
                ("GEMINI_API_KEY", Some("k-123")),
            ],
            || {
                let cfg = Config::from_env().unwrap();
                assert_eq!(cfg.bind, "0.0.0.0:9000");
                assert_eq!(cfg.fetch_retries, 5);
                assert_eq!(cfg.backoff_base, Duration::from_millis(10));
                assert_eq!(cfg.gemini_api_key.as_deref(), Some("k-123"));
            },
        );
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        temp_env::with_vars(
            [
                ("PG_URL", Some("postgres://localhost/clipper")),
                ("CLIPPER_FETCH_RETRIES", Some("many")),
            ],
            || {
                let err = Config::from_env().unwrap_err();
                assert!(err.to_string().contains("CLIPPER_FETCH_RETRIES"));
            },
        );
    }

    #[test]
    fn empty_gemini_key_counts_as_unset() {
        temp_env::with_vars(
            [
                ("PG_URL", Some("postgres://localhost/clipper")),
                ("GEMINI_API_KEY", Some("")),
            ],
            || {
                let cfg = Config::from_env().unwrap();
                assert!(cfg.gemini_api_key.is_none());
            },
        );
    }
}
