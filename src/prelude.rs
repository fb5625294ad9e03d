// ABOUTME: Prelude module - convenient imports for common use cases.
// ABOUTME: Use `use session_coordinator::prelude::*;` to get started quickly.

pub use crate::config::CoordinatorConfig;
pub use crate::coordinator::{
    Acquire, ExpiredHold, Grant, GrantToken, Pending, RequestInfo, SessionCoordinator,
    SlotSnapshot,
};
pub use crate::error::CoordinatorError;
