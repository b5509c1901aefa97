//! Runtime configuration.
//!
//! All knobs have serde defaults except the OAuth application credentials,
//! the redirect URI, and the encryption master key, which must come from the
//! deployment (config file or `ESIGATE_*` environment variables).

use serde::Deserialize;
use std::time::Duration;

use crate::error::{Error, Result};

/// Complete gateway configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// OAuth application client ID.
    pub client_id: String,
    /// OAuth application client secret.
    pub client_secret: String,
    /// Redirect URI registered with the SSO provider.
    pub redirect_uri: String,
    /// Base64-encoded 32-byte master key for token encryption at rest.
    pub encryption_key: String,

    #[serde(default = "default_authorize_url")]
    pub authorize_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_verify_url")]
    pub verify_url: String,
    /// Base URL of the upstream resource API.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// SQLite database path for credentials and caches.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Timeout applied to every outbound HTTP request (seconds).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Refresh scheduler period; the expiry lookahead window equals the
    /// period so no token can slip between two runs (seconds).
    #[serde(default = "default_refresh_period_secs")]
    pub refresh_period_secs: u64,

    /// Cache TTL for responses that carry neither `Expires` nor
    /// `Cache-Control: max-age` (seconds).
    #[serde(default = "default_response_ttl_secs")]
    pub response_ttl_secs: u64,

    /// Cache TTL for resolved entity names (seconds).
    #[serde(default = "default_entity_ttl_secs")]
    pub entity_ttl_secs: u64,

    /// How long an issued OAuth state token stays valid (seconds).
    #[serde(default = "default_state_ttl_secs")]
    pub state_ttl_secs: i64,
}

fn default_authorize_url() -> String {
    "https://login.eveonline.com/v2/oauth/authorize".to_string()
}

fn default_token_url() -> String {
    "https://login.eveonline.com/v2/oauth/token".to_string()
}

fn default_verify_url() -> String {
    "https://login.eveonline.com/oauth/verify".to_string()
}

fn default_api_base_url() -> String {
    "https://esi.evetech.net/latest".to_string()
}

fn default_database_path() -> String {
    "esigate.db".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_refresh_period_secs() -> u64 {
    300
}

fn default_response_ttl_secs() -> u64 {
    300
}

fn default_entity_ttl_secs() -> u64 {
    86_400
}

fn default_state_ttl_secs() -> i64 {
    600
}

impl Config {
    /// Loads configuration from `ESIGATE_*` environment variables.
    ///
    /// Required: `ESIGATE_CLIENT_ID`, `ESIGATE_CLIENT_SECRET`,
    /// `ESIGATE_REDIRECT_URI`, `ESIGATE_ENCRYPTION_KEY`. Everything else
    /// falls back to the serde defaults unless the matching variable is set.
    pub fn from_env() -> Result<Self> {
        fn required(name: &str) -> Result<String> {
            std::env::var(name)
                .map_err(|_| Error::Config(format!("missing environment variable {name}")))
        }

        let mut config = Self {
            client_id: required("ESIGATE_CLIENT_ID")?,
            client_secret: required("ESIGATE_CLIENT_SECRET")?,
            redirect_uri: required("ESIGATE_REDIRECT_URI")?,
            encryption_key: required("ESIGATE_ENCRYPTION_KEY")?,
            authorize_url: default_authorize_url(),
            token_url: default_token_url(),
            verify_url: default_verify_url(),
            api_base_url: default_api_base_url(),
            database_path: default_database_path(),
            request_timeout_secs: default_request_timeout_secs(),
            refresh_period_secs: default_refresh_period_secs(),
            response_ttl_secs: default_response_ttl_secs(),
            entity_ttl_secs: default_entity_ttl_secs(),
            state_ttl_secs: default_state_ttl_secs(),
        };

        if let Ok(path) = std::env::var("ESIGATE_DATABASE_PATH") {
            config.database_path = path;
        }
        if let Ok(url) = std::env::var("ESIGATE_API_BASE_URL") {
            config.api_base_url = url;
        }

        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn refresh_period(&self) -> Duration {
        Duration::from_secs(self.refresh_period_secs)
    }
}
