// ABOUTME: Coordinator module for serializing work per session.
// ABOUTME: Contains the session registry, waiter handles, and the hold-timeout reaper.

mod coordinator;
mod reaper;
mod waiter;

pub use coordinator::{SessionCoordinator, SlotSnapshot};
pub use reaper::ExpiredHold;
pub use waiter::{Acquire, Grant, GrantToken, Pending, RequestInfo};
