//! Request and response bodies.

use livepreview_core::{DiagnosticView, PreviewState};
use serde::{Deserialize, Serialize};

/// Error body returned by failing handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ErrorResponse {
    pub fn not_found(message: &str) -> Self {
        Self {
            error: message.to_string(),
            code: "not_found".to_string(),
        }
    }

    pub fn internal(message: &str) -> Self {
        Self {
            error: message.to_string(),
            code: "internal".to_string(),
        }
    }
}

/// `GET /status`
#[derive(Debug, Clone, Serialize)]
pub struct PreviewStatus {
    pub version: u64,
    pub generation: u64,
    /// Session lifecycle state, e.g. `"executing"`.
    pub session: String,
    pub diagnostics: DiagnosticView,
    pub compile_pending: bool,
    pub compilations: u64,
    pub recreations: u64,
    pub dropped_events: u64,
    pub source_len: usize,
    pub last_artifact_id: Option<u64>,
}

impl From<&PreviewState> for PreviewStatus {
    fn from(s: &PreviewState) -> Self {
        Self {
            version: s.version,
            generation: s.generation.as_u64(),
            session: s.session.to_string(),
            diagnostics: s.diagnostics.clone(),
            compile_pending: s.compile_pending,
            compilations: s.compilations,
            recreations: s.recreations,
            dropped_events: s.dropped_events,
            source_len: s.source_len,
            last_artifact_id: s.last_artifact.as_ref().map(|a| a.id.as_u64()),
        }
    }
}

/// `PUT /source`
#[derive(Debug, Clone, Deserialize)]
pub struct SourceUpdate {
    pub text: String,
    /// Skip the debounce window.
    #[serde(default)]
    pub immediate: bool,
}

/// Body of `202 Accepted` responses.
#[derive(Debug, Clone, Serialize)]
pub struct Accepted {
    pub accepted: bool,
    /// State version at the time the request was queued.
    pub version: u64,
}

/// `GET /artifact`
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactResponse {
    pub id: u64,
    /// `"valid"` or `"diagnostic"`.
    pub kind: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
