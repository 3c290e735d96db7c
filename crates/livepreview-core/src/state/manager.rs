//! State manager for thread-safe state access.
//!
//! The [`StateManager`] provides synchronized access to the shared
//! [`PreviewState`]. It uses an RwLock to allow multiple readers or
//! a single writer.

use std::sync::{Arc, PoisonError, RwLock};

use super::model::PreviewState;

/// Thread-safe handle to the preview snapshot.
///
/// Clones share the same underlying state.
#[derive(Clone)]
pub struct StateManager {
    state: Arc<RwLock<PreviewState>>,
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StateManager {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(PreviewState::new())),
        }
    }

    /// Read the state with a closure.
    ///
    /// This acquires a read lock for the duration of the closure.
    pub fn with_state_read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&PreviewState) -> R,
    {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    /// Write to the state with a closure.
    ///
    /// This acquires an exclusive write lock for the duration of the closure.
    pub fn with_state_write<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut PreviewState) -> R,
    {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// Get a clone of the current state.
    pub fn snapshot(&self) -> PreviewState {
        self.with_state_read(|s| s.clone())
    }

    /// Get the state version.
    pub fn version(&self) -> u64 {
        self.with_state_read(|s| s.version)
    }
}

impl std::fmt::Debug for StateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateManager")
            .field("version", &self.version())
            .finish_non_exhaustive()
    }
}
