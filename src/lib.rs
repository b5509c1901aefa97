//! OAuth credential management and caching gateway for the EVE Online ESI API.
//!
//! For each authorized character the crate drives the authorization-code
//! flow, stores the token pair encrypted at rest, renews it proactively in
//! the background, and serves authenticated and anonymous upstream calls
//! through a response cache with ETag revalidation and bulk entity-name
//! resolution.
//!
//! ```no_run
//! use std::sync::Arc;
//! use esigate::{
//!     cache::ResponseCache, config::Config, credentials::CredentialStore,
//!     entities::EntityResolver, gateway::EsiGateway, oauth::AuthManager,
//!     scheduler::RefreshScheduler,
//! };
//!
//! # async fn wire() -> esigate::Result<()> {
//! let config = Config::from_env()?;
//!
//! let store = Arc::new(CredentialStore::new(
//!     &config.database_path,
//!     &config.encryption_key,
//! )?);
//! let auth = Arc::new(AuthManager::new(&config, Arc::clone(&store)));
//! let cache = Arc::new(ResponseCache::new(&config.database_path)?);
//! let gateway = Arc::new(EsiGateway::new(&config, cache, Arc::clone(&auth)));
//! let resolver = EntityResolver::new(&config, Arc::clone(&gateway))?;
//!
//! // Keep tokens warm in the background
//! let scheduler = RefreshScheduler::new(&config, store, Arc::clone(&auth));
//! let _handle = scheduler.spawn();
//!
//! let login = auth.begin_login(&["esi-wallet.read".to_string()]);
//! // ... redirect the user to login.url, then on callback:
//! // auth.handle_callback(code).await
//! # let _ = resolver;
//! # Ok(())
//! # }
//! ```

// Runtime configuration
pub mod config;

// Encrypted credential storage
pub mod credentials;

// Error taxonomy
pub mod error;

// OAuth flows and credential lifecycle
pub mod oauth;

// Proactive token refresh
pub mod scheduler;

// Response cache storage
pub mod cache;

// Caching, authenticating upstream gateway
pub mod gateway;

// Bulk id/name resolution
pub mod entities;

pub use config::Config;
pub use error::{Error, Result};
