// ABOUTME: Request, grant, and waiter types exchanged with the session coordinator.
// ABOUTME: A waiter's completion is a oneshot that fires exactly once: granted or rejected.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

use super::coordinator::SessionCoordinator;
use crate::error::CoordinatorError;

/// Outcome delivered to a queued waiter.
pub(crate) type Completion = Result<Grant, CoordinatorError>;

/// Describes a unit of work that wants exclusive use of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestInfo {
    /// The session the work targets.
    pub session_key: String,
    /// Identifier used for reconciliation against a persistent store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Free-form description of the payload. Never inspected by the coordinator.
    #[serde(default)]
    pub payload_summary: String,
}

impl RequestInfo {
    pub fn new(session_key: impl Into<String>) -> Self {
        Self {
            session_key: session_key.into(),
            ..Self::default()
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_payload_summary(mut self, summary: impl Into<String>) -> Self {
        self.payload_summary = summary.into();
        self
    }
}

/// Opaque identifier for a single grant of a session lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GrantToken(Uuid);

impl GrantToken {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for GrantToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Information about a held session lock.
#[derive(Debug, Clone)]
pub struct Grant {
    /// The locked session.
    pub key: String,
    /// The request that holds the lock.
    pub request_id: Option<String>,
    /// Token identifying this particular grant, checked by `release_grant`.
    pub token: GrantToken,
    /// When the lock was granted (immediately or by handoff).
    pub acquired_at: Instant,
}

/// A queued request and its one-shot completion.
pub(crate) struct Waiter {
    pub(crate) info: RequestInfo,
    completion: oneshot::Sender<Completion>,
}

impl Waiter {
    pub(crate) fn new(info: RequestInfo, completion: oneshot::Sender<Completion>) -> Self {
        Self { info, completion }
    }

    /// True once the waiter's `Pending` has been dropped.
    pub(crate) fn is_withdrawn(&self) -> bool {
        self.completion.is_closed()
    }

    /// Signal the waiter that it now holds the lock.
    ///
    /// Returns false if the waiter's `Pending` has been dropped.
    pub(crate) fn grant(self, grant: Grant) -> bool {
        self.completion.send(Ok(grant)).is_ok()
    }

    pub(crate) fn reject(self, err: CoordinatorError) {
        // A dropped receiver has nobody left to tell.
        let _ = self.completion.send(Err(err));
    }
}

/// Result of [`SessionCoordinator::acquire`].
#[derive(Debug)]
pub enum Acquire {
    /// The caller holds the lock and may run its work now.
    Granted(Grant),
    /// The session is busy; await the handle before running any work.
    Queued(Pending),
}

impl Acquire {
    pub fn is_granted(&self) -> bool {
        matches!(self, Acquire::Granted(_))
    }

    /// Resolve to a grant, waiting in the queue if necessary.
    pub async fn wait(self) -> Result<Grant, CoordinatorError> {
        match self {
            Acquire::Granted(grant) => Ok(grant),
            Acquire::Queued(pending) => pending.wait().await,
        }
    }
}

/// Handle held by a caller whose request is queued behind the current holder.
///
/// Dropping the handle withdraws the request. It stops counting towards the
/// session's queue at once, and a grant that reached it after a handoff is
/// passed on to the next waiter.
pub struct Pending {
    key: String,
    request_id: Option<String>,
    position: usize,
    completion: oneshot::Receiver<Completion>,
    coordinator: SessionCoordinator,
}

impl std::fmt::Debug for Pending {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pending")
            .field("key", &self.key)
            .field("request_id", &self.request_id)
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}

impl Pending {
    pub(crate) fn new(
        key: &str,
        request_id: Option<String>,
        position: usize,
        completion: oneshot::Receiver<Completion>,
        coordinator: SessionCoordinator,
    ) -> Self {
        Self {
            key: key.to_string(),
            request_id,
            position,
            completion,
            coordinator,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// 1-based place in the session's queue when the request was enqueued.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Wait until the lock is handed to this request.
    ///
    /// Returns `Err(CoordinatorError::SessionCleared)` if the session is cleared first;
    /// the caller must not run its work in that case.
    pub async fn wait(mut self) -> Result<Grant, CoordinatorError> {
        match (&mut self.completion).await {
            Ok(outcome) => outcome,
            Err(_) => Err(CoordinatorError::Abandoned {
                key: self.key.clone(),
            }),
        }
    }

    /// Wait for the lock with cancellation support.
    ///
    /// Returns `Err(CoordinatorError::Cancelled)` if the cancel future completes first.
    /// A grant that raced with the cancellation is released before returning.
    pub async fn wait_with_cancel<F>(self, cancel: F) -> Result<Grant, CoordinatorError>
    where
        F: std::future::Future<Output = ()>,
    {
        tokio::pin!(cancel);

        tokio::select! {
            biased;
            () = &mut cancel => Err(CoordinatorError::Cancelled),
            outcome = self.wait() => outcome,
        }
    }
}

/// Withdraws the request. A grant that was handed over but never read is
/// released so the session moves on to the next waiter.
impl Drop for Pending {
    fn drop(&mut self) {
        self.completion.close();
        if let Ok(Ok(grant)) = self.completion.try_recv() {
            debug!(
                session_key = %self.key,
                request_id = ?self.request_id,
                "releasing grant delivered to a withdrawn request"
            );
            if let Err(err) = self.coordinator.release_grant(&grant) {
                debug!(session_key = %self.key, error = %err, "grant already gone");
            }
        }
    }
}
