//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! The API token is wrapped in secrecy::SecretString to prevent log leaks.

pub mod secrets;

use crate::error::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use std::str::FromStr;

pub const DEFAULT_TAG_NAME: &str = "migrated";
pub const DEFAULT_MAX_CONCURRENT: usize = 5;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_CACHE_TTL_MS: u64 = 30_000;

#[derive(Debug)]
pub struct Config {
    pub api_url: String,
    pub api_token: SecretString,
    pub tag_name: String,
    pub max_concurrent: usize,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub request_timeout_ms: u64,
    pub cache_ttl_ms: u64,
    /// Layer assigned to mapping rows that carry none. `None` rejects such rows.
    pub default_layer: Option<String>,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            api_url: required_var("TAGGER_API_URL")?,
            api_token: SecretString::from(required_var("TAGGER_API_TOKEN")?),
            tag_name: std::env::var("TAGGER_TAG_NAME")
                .unwrap_or_else(|_| DEFAULT_TAG_NAME.to_string()),
            max_concurrent: parsed_var("TAGGER_MAX_CONCURRENT", DEFAULT_MAX_CONCURRENT)?,
            max_retries: parsed_var("TAGGER_MAX_RETRIES", DEFAULT_MAX_RETRIES)?,
            base_delay_ms: parsed_var("TAGGER_BASE_DELAY_MS", DEFAULT_BASE_DELAY_MS)?,
            request_timeout_ms: parsed_var("TAGGER_REQUEST_TIMEOUT_MS", DEFAULT_REQUEST_TIMEOUT_MS)?,
            cache_ttl_ms: parsed_var("TAGGER_CACHE_TTL_MS", DEFAULT_CACHE_TTL_MS)?,
            default_layer: std::env::var("TAGGER_DEFAULT_LAYER")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Check the loaded values before any network traffic happens.
    pub fn validate(&self) -> Result<()> {
        let scheme_ok = self.api_url.starts_with("http://") || self.api_url.starts_with("https://");
        if !scheme_ok || reqwest::Url::parse(&self.api_url).is_err() {
            return Err(Error::Config(format!(
                "TAGGER_API_URL is not a valid http(s) URL: {}",
                self.api_url
            )));
        }
        if self.api_token.expose_secret().trim().is_empty() {
            return Err(Error::Config("TAGGER_API_TOKEN is empty".to_string()));
        }
        if self.max_concurrent == 0 {
            return Err(Error::Config(
                "TAGGER_MAX_CONCURRENT must be at least 1".to_string(),
            ));
        }
        if self.tag_name.trim().is_empty() {
            return Err(Error::Config("tag name must not be empty".to_string()));
        }
        Ok(())
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn parsed_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("{name}={raw:?} is invalid: {e}"))),
        Err(_) => Ok(default),
    }
}
