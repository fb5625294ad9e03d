// ABOUTME: Per-session serialization coordinator with FIFO lock handoff.
// ABOUTME: Guarantees at most one in-flight request per session key.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{debug, info, trace};

use super::waiter::{Acquire, Grant, GrantToken, Pending, RequestInfo, Waiter};
use crate::config::CoordinatorConfig;
use crate::error::CoordinatorError;

/// The request currently holding a session's lock.
pub(crate) struct Holder {
    pub(crate) request_id: Option<String>,
    pub(crate) token: GrantToken,
    pub(crate) acquired_at: Instant,
}

/// Serialization state for one session key.
///
/// A slot is locked iff it has a holder. An unlocked slot always has an
/// empty queue.
#[derive(Default)]
pub(crate) struct SessionSlot {
    pub(crate) holder: Option<Holder>,
    pub(crate) queue: VecDeque<Waiter>,
}

impl SessionSlot {
    fn is_locked(&self) -> bool {
        self.holder.is_some()
    }

    /// Waiters whose `Pending` is still alive, in arrival order.
    fn live_waiters(&self) -> impl Iterator<Item = &Waiter> {
        self.queue.iter().filter(|waiter| !waiter.is_withdrawn())
    }

    fn install(&mut self, key: &str, request_id: Option<String>) -> Grant {
        let token = GrantToken::new();
        let acquired_at = Instant::now();
        self.holder = Some(Holder {
            request_id: request_id.clone(),
            token,
            acquired_at,
        });
        Grant {
            key: key.to_string(),
            request_id,
            token,
            acquired_at,
        }
    }

    /// Pass the lock to the next live waiter, or unlock if none is left.
    ///
    /// The slot stays locked for the whole handoff.
    pub(crate) fn hand_off(&mut self, key: &str) {
        while let Some(waiter) = self.queue.pop_front() {
            let request_id = waiter.info.request_id.clone();
            let grant = self.install(key, request_id.clone());
            if waiter.grant(grant) {
                debug!(
                    session_key = key,
                    request_id = ?request_id,
                    queue_depth = self.queue.len(),
                    "session lock handed off"
                );
                return;
            }
            debug!(session_key = key, request_id = ?request_id, "skipping withdrawn waiter");
        }
        self.holder = None;
        trace!(session_key = key, "session unlocked");
    }
}

/// Read-only view of one session's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotSnapshot {
    pub locked: bool,
    pub holder_request_id: Option<String>,
    /// How long the current holder has held the lock.
    pub held_for: Option<Duration>,
    /// Request ids of queued waiters in arrival order.
    pub queued_request_ids: Vec<Option<String>>,
}

pub(crate) struct Inner {
    pub(crate) slots: DashMap<String, SessionSlot>,
    pub(crate) config: CoordinatorConfig,
}

/// Per-session serialization coordinator.
///
/// Callers `acquire` a session before handing work to an engine that cannot
/// run two calls on the same session at once, and `release` it when the work
/// finishes, whether it succeeded or failed. Requests that arrive while the
/// session is busy are queued and granted in arrival order.
///
/// # Lock Semantics
///
/// - **Handoff:** `release()` passes the lock directly to the oldest waiter;
///   the session never looks unlocked in between.
/// - **Idempotent release:** releasing an unknown or unlocked session is a no-op.
/// - **Clear:** `clear()` rejects every queued waiter with
///   [`CoordinatorError::SessionCleared`] and forgets the session.
///
/// The handle is cheap to clone; clones share the same registry. Operations on
/// different sessions do not serialize behind one another.
#[derive(Clone)]
pub struct SessionCoordinator {
    pub(crate) inner: Arc<Inner>,
}

impl Default for SessionCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("sessions", &self.inner.slots.len())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl SessionCoordinator {
    /// Create a coordinator with the default configuration.
    pub fn new() -> Self {
        Self::with_config(CoordinatorConfig::default())
    }

    pub fn with_config(config: CoordinatorConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: DashMap::new(),
                config,
            }),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    /// Request exclusive use of a session.
    ///
    /// Returns `Acquire::Granted` if the session was free. Otherwise the
    /// request is appended to the session's queue and `Acquire::Queued` is
    /// returned; the caller must await it before running any work.
    ///
    /// # Arguments
    ///
    /// * `key` - The session key. Must not be empty.
    /// * `info` - Description of the request, used for observability.
    pub fn acquire(&self, key: &str, info: RequestInfo) -> Result<Acquire, CoordinatorError> {
        if key.is_empty() {
            return Err(CoordinatorError::EmptyKey);
        }

        let mut slot = self.inner.slots.entry(key.to_string()).or_default();

        if !slot.is_locked() {
            let grant = slot.install(key, info.request_id);
            debug!(session_key = key, request_id = ?grant.request_id, "session lock granted");
            return Ok(Acquire::Granted(grant));
        }

        let (tx, rx) = oneshot::channel();
        let request_id = info.request_id.clone();
        slot.queue.retain(|waiter| !waiter.is_withdrawn());
        slot.queue.push_back(Waiter::new(info, tx));
        let position = slot.queue.len();
        drop(slot);

        debug!(
            session_key = key,
            request_id = ?request_id,
            position,
            "session busy, request queued"
        );
        Ok(Acquire::Queued(Pending::new(
            key,
            request_id,
            position,
            rx,
            self.clone(),
        )))
    }

    /// Release the lock on a session.
    ///
    /// Hands the lock to the next queued request if there is one, otherwise
    /// unlocks the session. The caller's identity is not checked; use
    /// [`release_grant`](Self::release_grant) for a checked release.
    pub fn release(&self, key: &str) {
        let Some(mut slot) = self.inner.slots.get_mut(key) else {
            trace!(session_key = key, "release on unknown session ignored");
            return;
        };
        if slot.is_locked() {
            slot.hand_off(key);
        }
    }

    /// Release the lock held by `grant`.
    ///
    /// Returns `Err(CoordinatorError::NotHolder)` if the grant no longer holds
    /// the session (it was cleared, force-released, or already released).
    pub fn release_grant(&self, grant: &Grant) -> Result<(), CoordinatorError> {
        let not_holder = || CoordinatorError::NotHolder {
            key: grant.key.clone(),
        };

        let mut slot = self.inner.slots.get_mut(&grant.key).ok_or_else(not_holder)?;
        let holds = slot
            .holder
            .as_ref()
            .is_some_and(|holder| holder.token == grant.token);
        if !holds {
            return Err(not_holder());
        }

        slot.hand_off(&grant.key);
        Ok(())
    }

    /// Forget a session, rejecting every request still queued for it.
    ///
    /// The current holder is not notified. Returns the number of rejected waiters.
    pub fn clear(&self, key: &str) -> usize {
        let Some((_, slot)) = self.inner.slots.remove(key) else {
            return 0;
        };

        let rejected = slot.queue.len();
        for waiter in slot.queue {
            waiter.reject(CoordinatorError::SessionCleared {
                key: key.to_string(),
            });
        }

        if rejected > 0 {
            info!(session_key = key, rejected, "session cleared with pending requests");
        } else {
            debug!(session_key = key, "session cleared");
        }
        rejected
    }

    pub fn is_locked(&self, key: &str) -> bool {
        self.inner
            .slots
            .get(key)
            .is_some_and(|slot| slot.is_locked())
    }

    /// Number of requests waiting behind the current holder.
    ///
    /// Withdrawn requests are not counted.
    pub fn queue_depth(&self, key: &str) -> usize {
        self.inner
            .slots
            .get(key)
            .map_or(0, |slot| slot.live_waiters().count())
    }

    /// All session keys known to the coordinator, locked or not.
    pub fn active_keys(&self) -> Vec<String> {
        self.inner
            .slots
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Request ids the coordinator considers in flight.
    ///
    /// For each session: the holder's id, then the ids of queued requests in
    /// arrival order. Requests without an id and withdrawn requests are skipped.
    pub fn active_request_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        for entry in self.inner.slots.iter() {
            let slot = entry.value();
            if let Some(id) = slot.holder.as_ref().and_then(|h| h.request_id.as_ref()) {
                ids.push(id.clone());
            }
            ids.extend(slot.live_waiters().filter_map(|w| w.info.request_id.clone()));
        }
        ids
    }

    pub fn snapshot(&self, key: &str) -> Option<SlotSnapshot> {
        let slot = self.inner.slots.get(key)?;
        Some(SlotSnapshot {
            locked: slot.is_locked(),
            holder_request_id: slot.holder.as_ref().and_then(|h| h.request_id.clone()),
            held_for: slot.holder.as_ref().map(|h| h.acquired_at.elapsed()),
            queued_request_ids: slot
                .live_waiters()
                .map(|w| w.info.request_id.clone())
                .collect(),
        })
    }

    /// Run `work` with exclusive use of a session.
    ///
    /// Waits in the session's queue if necessary, runs the work, and releases
    /// the grant afterwards. The grant is also released if the returned future
    /// is dropped or the work panics.
    pub async fn run_exclusive<F, T>(
        &self,
        key: &str,
        info: RequestInfo,
        work: F,
    ) -> Result<T, CoordinatorError>
    where
        F: Future<Output = T>,
    {
        let grant = self.acquire(key, info)?.wait().await?;
        let _guard = GrantGuard {
            coordinator: self,
            grant,
        };
        Ok(work.await)
    }
}

/// Releases a grant when dropped.
struct GrantGuard<'a> {
    coordinator: &'a SessionCoordinator,
    grant: Grant,
}

impl Drop for GrantGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.coordinator.release_grant(&self.grant) {
            debug!(session_key = %self.grant.key, error = %err, "grant already released");
        }
    }
}
