//! OAuth 2.0 authorization flow and credential lifecycle.
//!
//! The authorization-code flow:
//! 1. A collaborator asks for a login URL (`begin_login`)
//! 2. The user authorizes on the provider's site
//! 3. The provider redirects back with a code; the collaborator hands it to
//!    `handle_callback`, which exchanges it, verifies the resulting token,
//!    and stores the encrypted credential
//! 4. From then on `access_token` serves the hot read path, refreshing
//!    transparently when the stored token has expired
//!
//! [`AuthManager`] serializes all credential mutation per character through a
//! lock map: operations on different characters run concurrently, while two
//! callers racing on one expired token cannot both issue a refresh.

mod client;
mod state;

pub use client::{OAuthClient, TokenSet, VerifiedCharacter};
pub use state::StateManager;

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::credentials::{CredentialStore, Credentials, TokenInfo};
use crate::error::Result;

/// Authorization URL plus the CSRF state registered for it.
#[derive(Clone, Debug)]
pub struct AuthorizeUrl {
    pub url: String,
    pub state: String,
}

/// Outcome of an authorization callback.
///
/// Callers must branch on the variant; a failed interactive login is a normal
/// result to report to the user, not an error to bubble.
#[derive(Clone, Debug)]
pub enum CallbackResult {
    Success {
        character_id: i64,
        character_name: String,
        owner_hash: String,
        scopes: Vec<String>,
    },
    Failure {
        reason: String,
    },
}

pub struct AuthManager {
    store: Arc<CredentialStore>,
    client: OAuthClient,
    states: StateManager,
    /// Per-character mutation locks. Entries are never removed; the map grows
    /// with the number of distinct characters seen, which is bounded.
    locks: tokio::sync::Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl AuthManager {
    pub fn new(config: &Config, store: Arc<CredentialStore>) -> Self {
        Self {
            store,
            client: OAuthClient::new(config),
            states: StateManager::new(config.state_ttl_secs),
            locks: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Builds an authorization URL with a freshly generated state token.
    pub fn begin_login(&self, scopes: &[String]) -> AuthorizeUrl {
        self.states.cleanup_expired();
        let state = self.states.issue();
        AuthorizeUrl {
            url: self.client.authorize_url(scopes, &state),
            state,
        }
    }

    /// Builds an authorization URL around a caller-supplied state token.
    pub fn begin_login_with_state(&self, scopes: &[String], state: &str) -> AuthorizeUrl {
        self.states.register(state.to_string());
        AuthorizeUrl {
            url: self.client.authorize_url(scopes, state),
            state: state.to_string(),
        }
    }

    /// Validates and consumes the state returned by the provider redirect.
    /// Returns false for unknown, expired, or replayed states.
    pub fn validate_state(&self, state: &str) -> bool {
        self.states.validate_and_consume(state)
    }

    /// Completes the authorization flow: code exchange, token verification,
    /// encrypted upsert.
    ///
    /// Interactive path — failures surface immediately in the returned
    /// variant and are never retried here.
    pub async fn handle_callback(&self, code: &str) -> CallbackResult {
        let tokens = match self.client.exchange_code(code).await {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "authorization code exchange failed");
                return CallbackResult::Failure {
                    reason: format!("code exchange failed: {e}"),
                };
            }
        };

        let who = match self.client.verify(&tokens.access_token).await {
            Ok(w) => w,
            Err(e) => {
                warn!(error = %e, "token verification failed");
                return CallbackResult::Failure {
                    reason: format!("token verification failed: {e}"),
                };
            }
        };

        let lock = self.character_lock(who.character_id).await;
        let _guard = lock.lock().await;

        let owner_changed = match self.store.upsert(
            who.character_id,
            &who.character_name,
            &who.owner_hash,
            &who.scopes,
            &tokens.access_token,
            tokens.refresh_token.as_deref(),
            tokens.expires_at,
        ) {
            Ok(changed) => changed,
            Err(e) => {
                warn!(character_id = who.character_id, error = %e, "failed to persist credentials");
                return CallbackResult::Failure {
                    reason: format!("failed to persist credentials: {e}"),
                };
            }
        };

        if owner_changed {
            warn!(
                character_id = who.character_id,
                "owner hash changed since last authorization; character was transferred"
            );
        }

        info!(
            character_id = who.character_id,
            character_name = %who.character_name,
            scope_count = who.scopes.len(),
            "authorization flow completed"
        );

        CallbackResult::Success {
            character_id: who.character_id,
            character_name: who.character_name,
            owner_hash: who.owner_hash,
            scopes: who.scopes,
        }
    }

    /// Returns a valid decrypted access token for the character.
    ///
    /// A fresh stored token is returned directly. An expired token triggers
    /// exactly one refresh attempt; on success the rotated pair is persisted
    /// and the new token returned.
    ///
    /// `Ok(None)` means either no credential exists, or one exists but could
    /// not be refreshed (missing refresh token, provider rejection, timeout).
    /// In the latter case the row is left in place so a later interactive
    /// login can replace it. `Err` is reserved for crypto/storage faults.
    pub async fn access_token(&self, character_id: i64) -> Result<Option<String>> {
        let lock = self.character_lock(character_id).await;
        let _guard = lock.lock().await;

        let Some(creds) = self.store.credentials(character_id)? else {
            return Ok(None);
        };

        if creds.expires_at > Utc::now() {
            return Ok(Some(creds.access_token));
        }

        debug!(character_id, "access token expired, refreshing on demand");
        self.refresh_locked(character_id, &creds).await
    }

    /// Unconditionally refreshes the character's token pair.
    ///
    /// Returns `Ok(false)` when no credential exists or the refresh was
    /// rejected (soft failure, row untouched).
    pub async fn refresh_character(&self, character_id: i64) -> Result<bool> {
        let lock = self.character_lock(character_id).await;
        let _guard = lock.lock().await;

        let Some(creds) = self.store.credentials(character_id)? else {
            return Ok(false);
        };

        Ok(self.refresh_locked(character_id, &creds).await?.is_some())
    }

    /// Refresh path shared by `access_token` and `refresh_character`.
    /// Caller must hold the character lock.
    async fn refresh_locked(
        &self,
        character_id: i64,
        creds: &Credentials,
    ) -> Result<Option<String>> {
        let Some(refresh_token) = creds.refresh_token.as_deref() else {
            warn!(character_id, "cannot refresh: no refresh token stored");
            return Ok(None);
        };

        let tokens = match self.client.refresh(refresh_token).await {
            Ok(t) => t,
            Err(e) => {
                // Soft failure: the stored pair stays untouched for the next
                // attempt or a fresh interactive login.
                warn!(character_id, error = %e, "token refresh failed");
                return Ok(None);
            }
        };

        // Keep the old refresh token when the provider did not rotate it
        let new_refresh = tokens
            .refresh_token
            .as_deref()
            .or(creds.refresh_token.as_deref());

        self.store.update_tokens(
            character_id,
            &tokens.access_token,
            new_refresh,
            tokens.expires_at,
        )?;

        info!(character_id, "access token refreshed");
        Ok(Some(tokens.access_token))
    }

    /// Credential metadata for one character; no token material.
    pub fn token_info(&self, character_id: i64) -> Result<Option<TokenInfo>> {
        self.store.token_info(character_id)
    }

    /// Metadata for every stored credential.
    pub fn list_all(&self) -> Result<Vec<TokenInfo>> {
        self.store.list_all()
    }

    /// Hard-deletes the character's credential. Returns whether one existed.
    pub fn revoke(&self, character_id: i64) -> Result<bool> {
        self.store.revoke(character_id)
    }

    async fn character_lock(&self, character_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(character_id).or_default())
    }
}
