//! Proactive token refresh scheduler.
//!
//! A self-rescheduling background task. Each cycle scans for credentials
//! expiring within the lookahead window (one period wide, so nothing slips
//! between two runs) and refreshes them one by one; a single character's
//! failure never aborts the batch, and the loop itself reschedules
//! unconditionally. The next fire time is persisted, so a process restart
//! resumes the cadence instead of losing it — an overdue persisted time fires
//! immediately on startup.
//!
//! This is the subsystem's liveness property: tokens are renewed before they
//! are needed, so the foreground `access_token` path almost never has to
//! block on a synchronous refresh.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::oauth::AuthManager;

pub struct RefreshScheduler {
    store: Arc<CredentialStore>,
    auth: Arc<AuthManager>,
    period: Duration,
}

impl RefreshScheduler {
    pub fn new(config: &Config, store: Arc<CredentialStore>, auth: Arc<AuthManager>) -> Self {
        Self {
            store,
            auth,
            period: config.refresh_period(),
        }
    }

    /// Runs one refresh cycle. Returns how many tokens were renewed.
    ///
    /// Every failure mode is absorbed here: a failed store scan skips the
    /// cycle, a failed individual refresh is logged and the batch continues.
    pub async fn run_once(&self) -> usize {
        let due = match self.store.expiring_within(self.period) {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "refresh scan failed, skipping cycle");
                return 0;
            }
        };

        if due.is_empty() {
            debug!("no tokens due for refresh");
            return 0;
        }

        info!(count = due.len(), "refreshing soon-to-expire tokens");

        let mut refreshed = 0;
        for character_id in due {
            match self.auth.refresh_character(character_id).await {
                Ok(true) => refreshed += 1,
                Ok(false) => {
                    warn!(character_id, "scheduled refresh rejected, will retry next cycle")
                }
                Err(e) => warn!(character_id, error = %e, "scheduled refresh failed"),
            }
        }

        refreshed
    }

    /// Starts the scheduling loop (non-blocking). The returned handle can be
    /// aborted for shutdown; the loop itself never exits on its own.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                period_secs = self.period.as_secs(),
                "starting token refresh scheduler"
            );

            loop {
                // An unreadable or missing next_run means "due now"
                let due_at = match self.store.next_scheduled_refresh() {
                    Ok(next) => next,
                    Err(e) => {
                        warn!(error = %e, "failed to read persisted schedule");
                        None
                    }
                };

                if let Some(due_at) = due_at {
                    let now = Utc::now();
                    if due_at > now {
                        let wait = (due_at - now).to_std().unwrap_or(self.period);
                        tokio::time::sleep(wait).await;
                    }
                }

                self.run_once().await;

                let next_run = Utc::now()
                    + chrono::Duration::from_std(self.period)
                        .unwrap_or_else(|_| chrono::Duration::seconds(300));
                if let Err(e) = self.store.set_next_scheduled_refresh(next_run) {
                    // Fall back to in-process pacing so the loop neither dies
                    // nor spins
                    warn!(error = %e, "failed to persist next run time");
                    tokio::time::sleep(self.period).await;
                }
            }
        })
    }
}
