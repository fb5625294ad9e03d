// ABOUTME: Root module for session-coordinator - per-session request serialization.
// ABOUTME: Re-exports the coordinator, its handle types, configuration, and errors.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod prelude;

pub use config::CoordinatorConfig;
pub use coordinator::{
    Acquire, ExpiredHold, Grant, GrantToken, Pending, RequestInfo, SessionCoordinator,
    SlotSnapshot,
};
pub use error::CoordinatorError;
