//! Preview runtime - drives the whole live-preview loop.
//!
//! The runtime manages:
//! - The preview host thread
//! - Debounced compilation of incoming source text
//! - The sandbox session and its replacement on refresh
//! - Publishing state snapshots to readers

pub mod thread;

pub use thread::{PreviewHandle, PreviewRuntime};
