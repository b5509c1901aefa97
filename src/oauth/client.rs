//! Typed client for the SSO provider's three endpoints.
//!
//! Authorization URL construction, authorization-code exchange, refresh-token
//! exchange, and token introspection. No retries happen here: interactive
//! failures must reach the caller immediately, and background retry policy
//! belongs to the refresh scheduler.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::config::Config;
use crate::error::{Error, Result};

/// Token lifetime assumed when the provider omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 1200;

/// Token endpoint response (standard OAuth 2.0).
#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Introspection endpoint response.
#[derive(Deserialize, Debug)]
struct VerifyResponse {
    subject_id: i64,
    subject_name: String,
    owner_hash: String,
    /// Space-joined granted scopes.
    #[serde(default)]
    scopes: String,
}

/// A freshly issued token pair.
#[derive(Clone, Debug)]
pub struct TokenSet {
    pub access_token: String,
    /// Absent when the provider chose not to rotate (refresh grant) or not to
    /// issue (some code grants) a refresh token.
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Identity attached to a verified access token.
#[derive(Clone, Debug)]
pub struct VerifiedCharacter {
    pub character_id: i64,
    pub character_name: String,
    pub owner_hash: String,
    pub scopes: Vec<String>,
}

pub struct OAuthClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    authorize_url: String,
    token_url: String,
    verify_url: String,
}

impl OAuthClient {
    pub fn new(config: &Config) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(concat!("esigate/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout())
            .build()
            .expect("Failed to build HTTP client");

        Self {
            http,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
            authorize_url: config.authorize_url.clone(),
            token_url: config.token_url.clone(),
            verify_url: config.verify_url.clone(),
        }
    }

    /// Builds the provider's authorization URL for a browser redirect.
    ///
    /// Pure except for nothing — state generation is the caller's concern.
    pub fn authorize_url(&self, scopes: &[String], state: &str) -> String {
        let scope = scopes.join(" ");
        format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}",
            self.authorize_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(&scope),
            urlencoding::encode(state)
        )
    }

    /// Exchanges an authorization code for a token pair
    /// (`grant_type=authorization_code`).
    pub async fn exchange_code(&self, code: &str) -> Result<TokenSet> {
        tracing::debug!("exchanging authorization code at {}", self.token_url);
        self.token_request(&[("grant_type", "authorization_code"), ("code", code)])
            .await
    }

    /// Exchanges a refresh token for a new token pair
    /// (`grant_type=refresh_token`).
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenSet> {
        tracing::debug!("refreshing access token at {}", self.token_url);
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenSet> {
        let response = self
            .http
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            return Err(Error::OAuthExchange {
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse = response.json().await?;

        let lifetime = token.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);

        Ok(TokenSet {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: Utc::now() + Duration::seconds(lifetime),
        })
    }

    /// Resolves an access token to the character it belongs to.
    pub async fn verify(&self, access_token: &str) -> Result<VerifiedCharacter> {
        let response = self
            .http
            .get(&self.verify_url)
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            return Err(Error::OAuthExchange {
                status: status.as_u16(),
                body,
            });
        }

        let verified: VerifyResponse = response.json().await?;

        Ok(VerifiedCharacter {
            character_id: verified.subject_id,
            character_name: verified.subject_name,
            owner_hash: verified.owner_hash,
            scopes: verified
                .scopes
                .split_whitespace()
                .map(str::to_string)
                .collect(),
        })
    }
}
