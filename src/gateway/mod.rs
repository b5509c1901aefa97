//! Caching, authenticating gateway in front of the upstream REST API.
//!
//! Authenticated and anonymous fetches share one algorithm and differ only in
//! cache-key namespace (`"{character_id}:{path}"` vs `"public:{path}"`) and
//! header construction (the anonymous path sends no Authorization header):
//!
//! 1. Fresh cache hit → return immediately, zero network traffic
//! 2. Miss or stale → GET upstream, with `If-None-Match` when an etag is held
//! 3. `304` → keep the stored body, recompute expiry from the new headers
//! 4. `200` → persist body + etag + expiry (`Expires`, else
//!    `Cache-Control: max-age`, else the configured default)
//! 5. Anything else → [`Error::Upstream`] with status and body, never cached
//!
//! Cache I/O failures are uniformly non-fatal: a read failure degrades to a
//! miss, a write failure still returns the fetched data.

use chrono::{DateTime, Utc};
use reqwest::header::{CACHE_CONTROL, ETAG, EXPIRES, IF_NONE_MATCH};
use reqwest::{header::HeaderMap, StatusCode};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::ResponseCache;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::oauth::AuthManager;

/// A gateway response, cached or freshly fetched.
#[derive(Clone, Debug)]
pub struct FetchResult {
    pub data: serde_json::Value,
    /// True when the body came from the cache (fresh hit or 304 revalidation).
    pub cached: bool,
    pub expires_at: DateTime<Utc>,
    pub etag: Option<String>,
}

pub struct EsiGateway {
    http: reqwest::Client,
    base_url: String,
    cache: Arc<ResponseCache>,
    auth: Arc<AuthManager>,
    default_ttl: chrono::Duration,
}

impl EsiGateway {
    pub fn new(config: &Config, cache: Arc<ResponseCache>, auth: Arc<AuthManager>) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(concat!("esigate/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout())
            .build()
            .expect("Failed to build HTTP client");

        Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            cache,
            auth,
            default_ttl: chrono::Duration::seconds(config.response_ttl_secs as i64),
        }
    }

    /// Fetches a path on behalf of a character, attaching its bearer token.
    ///
    /// Resolving the token may itself trigger a refresh; a character with no
    /// usable token yields [`Error::MissingToken`].
    pub async fn fetch_authenticated(&self, path: &str, character_id: i64) -> Result<FetchResult> {
        let token = self
            .auth
            .access_token(character_id)
            .await?
            .ok_or(Error::MissingToken(character_id))?;

        let cache_key = format!("{character_id}:{path}");
        self.fetch(&cache_key, path, Some(&token)).await
    }

    /// Fetches a path anonymously.
    pub async fn fetch_public(&self, path: &str) -> Result<FetchResult> {
        let cache_key = format!("public:{path}");
        self.fetch(&cache_key, path, None).await
    }

    async fn fetch(
        &self,
        cache_key: &str,
        path: &str,
        bearer: Option<&str>,
    ) -> Result<FetchResult> {
        let cached = match self.cache.get(cache_key) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(cache_key, error = %e, "cache read failed, treating as miss");
                None
            }
        };

        if let Some(entry) = &cached {
            if entry.is_fresh() {
                match serde_json::from_str(&entry.body) {
                    Ok(data) => {
                        debug!(cache_key, "cache hit");
                        return Ok(FetchResult {
                            data,
                            cached: true,
                            expires_at: entry.expires_at,
                            etag: entry.etag.clone(),
                        });
                    }
                    // Corrupt stored body degrades to a miss like any other
                    // cache read failure
                    Err(e) => warn!(cache_key, error = %e, "cached body unreadable, refetching"),
                }
            }
        }

        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http.get(&url);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        if let Some(etag) = cached.as_ref().and_then(|c| c.etag.as_deref()) {
            request = request.header(IF_NONE_MATCH, etag);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_MODIFIED {
            // Only reachable when we sent If-None-Match, so an entry exists
            let Some(entry) = cached else {
                return Err(Error::Upstream {
                    status: status.as_u16(),
                    body: "304 received without a cached entry".to_string(),
                });
            };

            let expires_at = self.expiry_from_headers(response.headers());
            if let Err(e) = self
                .cache
                .put(cache_key, &entry.body, entry.etag.as_deref(), expires_at)
            {
                warn!(cache_key, error = %e, "cache write failed after revalidation");
            }

            debug!(cache_key, "revalidated via etag");
            return Ok(FetchResult {
                data: serde_json::from_str(&entry.body)?,
                cached: true,
                expires_at,
                etag: entry.etag,
            });
        }

        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            return Err(Error::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let expires_at = self.expiry_from_headers(response.headers());

        let body = response.text().await?;
        let data: serde_json::Value = serde_json::from_str(&body)?;

        if let Err(e) = self.cache.put(cache_key, &body, etag.as_deref(), expires_at) {
            warn!(cache_key, error = %e, "cache write failed, returning uncached response");
        }

        debug!(cache_key, "fetched upstream");
        Ok(FetchResult {
            data,
            cached: false,
            expires_at,
            etag,
        })
    }

    /// Uncached batched POST, the transport for bulk entity resolution.
    pub async fn post_public(&self, path: &str, payload: &serde_json::Value) -> Result<serde_json::Value> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.http.post(&url).json(payload).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            return Err(Error::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }

    /// Expiry for a response: `Expires` header, else `Cache-Control:
    /// max-age`, else the configured default TTL.
    fn expiry_from_headers(&self, headers: &HeaderMap) -> DateTime<Utc> {
        if let Some(expires) = headers.get(EXPIRES).and_then(|v| v.to_str().ok()) {
            if let Ok(parsed) = DateTime::parse_from_rfc2822(expires) {
                return parsed.with_timezone(&Utc);
            }
        }

        if let Some(cache_control) = headers.get(CACHE_CONTROL).and_then(|v| v.to_str().ok()) {
            if let Some(max_age) = parse_max_age(cache_control) {
                return Utc::now() + chrono::Duration::seconds(max_age);
            }
        }

        Utc::now() + self.default_ttl
    }
}

fn parse_max_age(cache_control: &str) -> Option<i64> {
    cache_control
        .split(',')
        .map(str::trim)
        .find_map(|directive| directive.strip_prefix("max-age="))
        .and_then(|v| v.parse().ok())
}
