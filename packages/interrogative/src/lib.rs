//! Interrogative - live session backend
//!
//! Keeps a workspace on disk, any number of editor viewers, shared
//! pseudo-terminals and a rendered repository graph consistent with each
//! other. Components never call each other; they publish and subscribe on a
//! shared [`event_bus::EventBus`].
//!
//! - [`files`]: open-file registry, debounced write-back, external change
//!   detection, tree snapshots and uploads
//! - [`terminal`]: shared PTY instances with output fan-out
//! - [`git`]: cached repository graph, refreshed on ref changes
//! - [`gateway`]: WebSocket and HTTP surface

pub mod auth;
pub mod config;
pub mod debounce;
pub mod error;
pub mod events;
pub mod files;
pub mod gateway;
pub mod git;
pub mod metrics;
pub mod session;
pub mod terminal;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use config::SessionConfig;
pub use error::SessionError;
pub use session::Session;
