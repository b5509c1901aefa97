//! Error taxonomy for the credential and gateway subsystem.
//!
//! Failure handling follows three tiers: crypto and storage faults are fatal
//! and propagate; provider rejections carry the upstream status and body so
//! interactive callers can report them; refresh failures are soft and show up
//! as `Ok(false)` / `Ok(None)` at the call sites that can tolerate them.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Decryption or key validation failure. Indicates a wrong master key or
    /// tampered ciphertext — never swallowed, never degraded to a cache miss.
    #[error("crypto failure: {0}")]
    Crypto(String),

    /// The SSO provider rejected a code exchange, token refresh, or
    /// verification call with a non-2xx status.
    #[error("SSO provider returned {status}: {body}")]
    OAuthExchange { status: u16, body: String },

    /// The resource API answered with a non-2xx, non-304 status. Never cached.
    #[error("upstream API returned {status}: {body}")]
    Upstream { status: u16, body: String },

    /// No usable access token for the character: either no credential is
    /// stored, or the token was expired and the refresh attempt failed.
    #[error("no valid access token for character {0}")]
    MissingToken(i64),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid stored timestamp: {0}")]
    Timestamp(#[from] chrono::ParseError),

    #[error("configuration error: {0}")]
    Config(String),
}
