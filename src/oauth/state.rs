//! OAuth state management for CSRF protection.
//!
//! Tracks the `state` parameter handed out with each authorization URL so the
//! callback can prove the login round-trip originated here. States are
//! single-use and expire.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// In-memory registry of outstanding state tokens.
#[derive(Clone)]
pub struct StateManager {
    states: Arc<Mutex<HashMap<String, DateTime<Utc>>>>,
    expiry: Duration,
}

impl StateManager {
    /// `expiry_seconds` is how long an issued state remains valid.
    pub fn new(expiry_seconds: i64) -> Self {
        Self {
            states: Arc::new(Mutex::new(HashMap::new())),
            expiry: Duration::seconds(expiry_seconds),
        }
    }

    /// Generates and registers a fresh state token.
    pub fn issue(&self) -> String {
        let state = Uuid::new_v4().to_string();
        self.register(state.clone());
        state
    }

    /// Registers a caller-supplied state token.
    pub fn register(&self, state: String) {
        self.states.lock().unwrap().insert(state, Utc::now());
    }

    /// Validates and consumes a state token (single-use).
    pub fn validate_and_consume(&self, state: &str) -> bool {
        let mut states = self.states.lock().unwrap();
        match states.remove(state) {
            Some(issued_at) => Utc::now() - issued_at <= self.expiry,
            None => false,
        }
    }

    /// Drops expired states. Called opportunistically on issue-heavy paths.
    pub fn cleanup_expired(&self) {
        let now = Utc::now();
        self.states
            .lock()
            .unwrap()
            .retain(|_, issued_at| now - *issued_at <= self.expiry);
    }

    pub fn count(&self) -> usize {
        self.states.lock().unwrap().len()
    }
}
