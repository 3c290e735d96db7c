//! Snapshot of the preview runtime, shared with readers.

use crate::compiler::CompiledArtifact;
use crate::diagnostics::{DiagnosticView, Diagnostics};
use crate::protocol::Generation;
use crate::sandbox::SessionState;
use serde::{Deserialize, Serialize};

/// What the TUI and HTTP API see of the preview.
///
/// Written only by the host thread after each event it processes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PreviewState {
    /// Monotonically increasing version for change detection.
    pub version: u64,
    /// Generation of the current sandbox session.
    pub generation: Generation,
    pub session: SessionState,
    pub diagnostics: DiagnosticView,
    /// Most recently compiled artifact.
    pub last_artifact: Option<CompiledArtifact>,
    /// Length in bytes of the newest source text.
    pub source_len: usize,
    /// An edit is waiting out the debounce window.
    pub compile_pending: bool,
    pub compilations: u64,
    pub recreations: u64,
    /// Guest messages dropped for belonging to a retired session.
    pub dropped_events: u64,
}

impl Default for PreviewState {
    fn default() -> Self {
        Self::new()
    }
}

impl PreviewState {
    pub fn new() -> Self {
        Self {
            version: 0,
            generation: Generation::first(),
            session: SessionState::Booting,
            diagnostics: Diagnostics::new().view(),
            last_artifact: None,
            source_len: 0,
            compile_pending: false,
            compilations: 0,
            recreations: 0,
            dropped_events: 0,
        }
    }

    pub fn bump_version(&mut self) {
        self.version = self.version.wrapping_add(1);
    }
}
