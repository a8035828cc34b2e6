//! Google Play Store adapter.
//!
//! # Endpoints
//! - Listing probe: `GET /store/apps/details?id=..` (metadata read from the
//!   page's JSON-LD block)
//! - Reviews: `POST /_/PlayStoreUi/data/batchexecute` with the `UsvDTd` RPC
//!
//! # Review RPC payload
//! The response body starts with the `)]}'` anti-XSSI prefix, followed by a
//! JSON array of envelopes. The `wrb.fr` envelope carries the actual payload
//! as a JSON-encoded string: `[reviews, ..., [.., token]]`.
//!
//! One method call is exactly one HTTP request; pacing and retries belong to
//! the caller.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use regex::Regex;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::{AppMetadata, RawReview, ReviewPage, ReviewSource, SortOrder, SourceError};

// ============================================================================
// Constants
// ============================================================================

/// Play Store base URL
const PLAY_STORE_BASE: &str = "https://play.google.com";

/// Listing details endpoint
const DETAILS_ENDPOINT: &str = "/store/apps/details";

/// Batch RPC endpoint
const BATCH_ENDPOINT: &str = "/_/PlayStoreUi/data/batchexecute";

/// RPC id for paged reviews
const REVIEWS_RPC_ID: &str = "UsvDTd";

/// Anti-XSSI prefix on batch responses
const XSSI_PREFIX: &str = ")]}'";

/// Retry hint used when a 429 carries no `Retry-After` header
const RATE_LIMIT_RETRY_SECS: u64 = 5;

/// Connect/read ceiling for the underlying client; the per-call timeout is
/// applied by the retry controller.
const CLIENT_TIMEOUT_SECS: u64 = 60;

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

// ============================================================================
// Play Store Source
// ============================================================================

/// Review source backed by the public Google Play Store web endpoints.
pub struct PlayStoreSource {
    client: reqwest::Client,
    base_url: String,
    lang: String,
    country: String,
    json_ld: Regex,
    installs: Regex,
}

impl PlayStoreSource {
    /// Create a new adapter for the given store language and country.
    pub fn new(lang: impl Into<String>, country: impl Into<String>) -> Result<Self> {
        Self::with_base_url(PLAY_STORE_BASE, lang, country)
    }

    /// Create an adapter against a different host (used for local stubs).
    pub fn with_base_url(
        base_url: impl Into<String>,
        lang: impl Into<String>,
        country: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(CLIENT_TIMEOUT_SECS))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            lang: lang.into(),
            country: country.into(),
            json_ld: Regex::new(r#"(?s)<script type="application/ld\+json"[^>]*>(.*?)</script>"#)
                .context("Invalid JSON-LD pattern")?,
            installs: Regex::new(r#"(?s)>([\d.,]+[KMB]?\+)</div>\s*<div[^>]*>Downloads"#)
                .context("Invalid installs pattern")?,
        })
    }

    fn map_send_error(e: reqwest::Error) -> SourceError {
        if e.is_timeout() {
            SourceError::Timeout
        } else if e.is_connect() {
            SourceError::Network("Connection failed".into())
        } else {
            SourceError::Network(e.to_string())
        }
    }

    /// Turn a non-success status into the matching source error.
    fn check_status(
        response: &reqwest::Response,
        identifier: &str,
    ) -> Result<(), SourceError> {
        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound(identifier.to_string()));
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .or(Some(RATE_LIMIT_RETRY_SECS));
            return Err(SourceError::RateLimited { retry_after_secs });
        }

        if status.is_server_error() {
            return Err(SourceError::Unavailable(format!("HTTP {}", status)));
        }

        if !status.is_success() {
            return Err(SourceError::InvalidRequest(format!("HTTP {}", status)));
        }

        Ok(())
    }

    /// Extract listing metadata from a details page.
    fn parse_details(&self, identifier: &str, html: &str) -> Result<AppMetadata, SourceError> {
        let listing = self
            .json_ld
            .captures_iter(html)
            .filter_map(|c| c.get(1))
            .filter_map(|m| serde_json::from_str::<Value>(m.as_str()).ok())
            .find(|v| v.get("name").is_some())
            .ok_or_else(|| {
                SourceError::Malformed(format!("No listing metadata found for {}", identifier))
            })?;

        let title = listing
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or(identifier)
            .to_string();

        let rating = listing.get("aggregateRating");
        let score = rating
            .and_then(|r| r.get("ratingValue"))
            .and_then(number_like_f64);
        let ratings = rating
            .and_then(|r| r.get("ratingCount"))
            .and_then(number_like_f64)
            .map(|n| n as u64);

        let installs = self
            .installs
            .captures(html)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());

        Ok(AppMetadata {
            title,
            score,
            ratings,
            installs,
        })
    }

    /// Build the `f.req` form value for one review page.
    fn reviews_request(
        identifier: &str,
        order: SortOrder,
        token: Option<&str>,
        page_size: usize,
    ) -> String {
        let token = match token {
            Some(t) => Value::String(t.to_string()).to_string(),
            None => "null".to_string(),
        };
        let inner = format!(
            "[null,null,[2,{},[{},null,{}],null,[]],[{},7]]",
            order.code(),
            page_size,
            token,
            Value::String(identifier.to_string())
        );
        let outer = serde_json::json!([[[REVIEWS_RPC_ID, inner, Value::Null, "generic"]]]);
        outer.to_string()
    }
}

#[async_trait]
impl ReviewSource for PlayStoreSource {
    fn name(&self) -> &'static str {
        "play_store"
    }

    async fn probe(&self, identifier: &str) -> Result<AppMetadata, SourceError> {
        let url = format!("{}{}", self.base_url, DETAILS_ENDPOINT);

        debug!(identifier, "Probing Play Store listing");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("id", identifier),
                ("hl", self.lang.as_str()),
                ("gl", self.country.as_str()),
            ])
            .send()
            .await
            .map_err(Self::map_send_error)?;

        Self::check_status(&response, identifier)?;

        let html = response
            .text()
            .await
            .map_err(|e| SourceError::Network(format!("Failed to read body: {}", e)))?;

        self.parse_details(identifier, &html)
    }

    async fn fetch_page(
        &self,
        identifier: &str,
        order: SortOrder,
        token: Option<&str>,
        page_size: usize,
    ) -> Result<ReviewPage, SourceError> {
        if page_size == 0 {
            return Err(SourceError::InvalidRequest("page_size must be positive".into()));
        }

        let url = format!("{}{}", self.base_url, BATCH_ENDPOINT);
        let body = Self::reviews_request(identifier, order, token, page_size);

        debug!(
            identifier,
            order = %order,
            has_token = token.is_some(),
            page_size,
            "Fetching review page"
        );

        let response = self
            .client
            .post(&url)
            .query(&[("hl", self.lang.as_str()), ("gl", self.country.as_str())])
            .form(&[("f.req", body.as_str())])
            .send()
            .await
            .map_err(Self::map_send_error)?;

        Self::check_status(&response, identifier)?;

        let text = response
            .text()
            .await
            .map_err(|e| SourceError::Network(format!("Failed to read body: {}", e)))?;

        parse_reviews_response(&text)
    }
}

// ============================================================================
// Response Parsing
// ============================================================================

/// Accept both JSON numbers and numeric strings ("4.2").
fn number_like_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.replace(',', "").trim().parse().ok(),
        _ => None,
    }
}

/// Parse a batchexecute body into a review page.
pub(crate) fn parse_reviews_response(body: &str) -> Result<ReviewPage, SourceError> {
    let stripped = body.trim_start().trim_start_matches(XSSI_PREFIX).trim_start();

    // Only the first JSON value matters; trailing envelopes are ignored.
    let mut stream = serde_json::Deserializer::from_str(stripped).into_iter::<Value>();
    let envelopes = match stream.next() {
        Some(Ok(v)) => v,
        Some(Err(e)) => return Err(SourceError::Malformed(format!("Invalid envelope: {}", e))),
        None => return Err(SourceError::Malformed("Empty response".into())),
    };

    let payload = envelopes
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(Value::as_array)
        .find(|env| env.first().and_then(Value::as_str) == Some("wrb.fr"))
        .and_then(|env| env.get(2))
        .ok_or_else(|| SourceError::Malformed("Missing wrb.fr envelope".into()))?;

    // A null payload is how the store says "no more reviews".
    let payload = match payload {
        Value::String(s) => s,
        Value::Null => return Ok(ReviewPage::default()),
        _ => return Err(SourceError::Malformed("Unexpected payload type".into())),
    };

    let inner: Value = serde_json::from_str(payload)
        .map_err(|e| SourceError::Malformed(format!("Invalid payload: {}", e)))?;

    let reviews = inner
        .get(0)
        .and_then(Value::as_array)
        .map(|items| items.iter().map(parse_review).collect())
        .unwrap_or_default();

    // The cursor sits in a trailing `[.., "token"]` array after the reviews.
    let next_token = inner
        .as_array()
        .into_iter()
        .flat_map(|a| a.iter().skip(1).rev())
        .filter_map(Value::as_array)
        .find_map(|a| a.last().and_then(Value::as_str))
        .map(str::to_string);

    Ok(ReviewPage {
        reviews,
        next_token,
    })
}

/// Map one positional review array onto a `RawReview`.
fn parse_review(item: &Value) -> RawReview {
    let text = |v: Option<&Value>| v.and_then(Value::as_str).map(str::to_string);

    RawReview {
        review_id: text(item.get(0)),
        user_name: text(item.pointer("/1/0")),
        score: item.get(2).and_then(Value::as_i64),
        content: text(item.get(4)),
        at: item
            .pointer("/5/0")
            .and_then(Value::as_i64)
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        thumbs_up: item.get(6).and_then(Value::as_i64),
        reply_content: text(item.pointer("/7/1")),
        app_version: text(item.get(10)),
    }
}

// ============================================================================
// Tests
// ============================================================================
