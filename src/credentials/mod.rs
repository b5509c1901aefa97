//! Encrypted credential storage for character OAuth tokens.
//!
//! One credential row per character, tokens encrypted at rest with
//! AES-256-GCM, backed by SQLite. The store hands out two views: `TokenInfo`
//! (metadata only, safe to expose) and `Credentials` (decrypted token
//! material, for internal callers that are about to make an outbound call).
//!
//! # Security
//!
//! - Access and refresh tokens are encrypted with a fresh random nonce each
//!   and never stored or logged in plaintext
//! - Master key is held in memory only (from config / env var)
//! - Authenticated encryption: tampering fails decryption loudly
//! - SQLite ACID guarantees prevent partial token rotation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod encryption;
mod store;

pub use encryption::{decrypt, encrypt, validate_key};
pub use store::CredentialStore;

/// Decrypted token pair for one character.
///
/// Exists only transiently in memory while an outbound call is being built.
#[derive(Clone, Debug)]
pub struct Credentials {
    /// OAuth access token (used as the bearer token for API requests).
    pub access_token: String,
    /// OAuth refresh token; some grants issue none.
    pub refresh_token: Option<String>,
    /// When the access token expires (UTC).
    pub expires_at: DateTime<Utc>,
}

/// Credential metadata for one character. Carries no token material.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenInfo {
    pub character_id: i64,
    pub character_name: String,
    /// Opaque hash binding the character to its owning account. A change
    /// between two authorizations means the character moved to a different
    /// account; it is never used as an identifier.
    pub owner_hash: String,
    /// Granted scopes, order as issued by the provider.
    pub scopes: Vec<String>,
    pub expires_at: DateTime<Utc>,
    pub is_expired: bool,
}
