//! Shared preview state.
//!
//! - [`PreviewState`] - the snapshot readers see
//! - [`PreviewMessage`] - every command the host thread accepts
//! - [`StateManager`] - thread-safe access to the snapshot

mod manager;
mod messages;
mod model;

pub use manager::StateManager;
pub use messages::PreviewMessage;
pub use model::PreviewState;
