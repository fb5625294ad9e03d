// ABOUTME: Optional hold-timeout enforcement for the session coordinator.
// ABOUTME: Force-releases holders that keep a session locked past the configured timeout.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::coordinator::SessionCoordinator;

/// A holder that was force-released by the reaper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredHold {
    pub key: String,
    pub request_id: Option<String>,
    pub held_for: Duration,
}

impl SessionCoordinator {
    /// Force-release every holder that has exceeded the configured hold timeout.
    ///
    /// Each expired session is handed to its next waiter exactly as if the
    /// holder had called `release`. The stale holder's own later
    /// `release_grant` fails with `NotHolder`; a plain `release` from it would
    /// release the new holder, so callers running with a hold timeout should
    /// release through their grant.
    ///
    /// Does nothing when no hold timeout is configured.
    pub fn reap_expired(&self) -> Vec<ExpiredHold> {
        let Some(timeout) = self.inner.config.hold_timeout() else {
            return Vec::new();
        };

        let now = Instant::now();
        let mut expired = Vec::new();
        for mut entry in self.inner.slots.iter_mut() {
            let (key, slot) = entry.pair_mut();
            let (request_id, held_for) = match &slot.holder {
                Some(holder) => (
                    holder.request_id.clone(),
                    now.saturating_duration_since(holder.acquired_at),
                ),
                None => continue,
            };
            if held_for < timeout {
                continue;
            }

            warn!(
                session_key = %key,
                request_id = ?request_id,
                held_for = ?held_for,
                "force-releasing stale session holder"
            );
            slot.hand_off(key);
            expired.push(ExpiredHold {
                key: key.clone(),
                request_id,
                held_for,
            });
        }
        expired
    }

    /// Spawn a background task that calls [`reap_expired`](Self::reap_expired)
    /// every `reap_interval`.
    ///
    /// Returns `None` when no hold timeout is configured. The task stops on its
    /// own once every handle to the coordinator has been dropped.
    pub fn spawn_reaper(&self) -> Option<JoinHandle<()>> {
        self.inner.config.hold_timeout()?;

        let inner = Arc::downgrade(&self.inner);
        let period = self.inner.config.reap_interval();
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                let reaped = SessionCoordinator { inner }.reap_expired();
                if !reaped.is_empty() {
                    debug!(reaped = reaped.len(), "reaper sweep finished");
                }
            }
            debug!("session reaper stopped");
        }))
    }
}
