//! Diagnostics surface.
//!
//! A projection of host events into what the editing surface shows: a
//! building indicator, the rendered frame, an error panel that can be
//! dismissed, and optionally the text of the last compiled artifact.

use crate::compiler::CompiledArtifact;
use crate::protocol::Frame;
use crate::sandbox::HostEvent;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of the most recent activity for the current session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum DiagnosticState {
    Building,
    Ready,
    CompileError(String),
    RuntimeError(String),
}

impl DiagnosticState {
    pub fn error_message(&self) -> Option<&str> {
        match self {
            DiagnosticState::CompileError(m) | DiagnosticState::RuntimeError(m) => Some(m),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error_message().is_some()
    }
}

impl fmt::Display for DiagnosticState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticState::Building => write!(f, "building"),
            DiagnosticState::Ready => write!(f, "ready"),
            DiagnosticState::CompileError(_) => write!(f, "compile error"),
            DiagnosticState::RuntimeError(_) => write!(f, "runtime error"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Compile,
    Runtime,
}

/// The persistent error panel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPanel {
    pub kind: ErrorKind,
    pub message: String,
}

/// Everything a surface needs to draw the preview.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticView {
    pub state: DiagnosticState,
    pub building: bool,
    /// `None` when there is no error or it was dismissed.
    pub error: Option<ErrorPanel>,
    pub frame: Frame,
    pub show_artifact: bool,
    /// Present only while the artifact view is toggled on.
    pub artifact_text: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Diagnostics {
    state: DiagnosticState,
    dismissed: bool,
    show_artifact: bool,
    frame: Frame,
    artifact: Option<CompiledArtifact>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}

impl Diagnostics {
    pub fn new() -> Self {
        Self {
            state: DiagnosticState::Building,
            dismissed: false,
            show_artifact: false,
            frame: Frame::default(),
            artifact: None,
        }
    }

    pub fn state(&self) -> &DiagnosticState {
        &self.state
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Remember the text of the newest compiled artifact.
    pub fn record_artifact(&mut self, artifact: &CompiledArtifact) {
        self.artifact = Some(artifact.clone());
    }

    pub fn last_artifact(&self) -> Option<&CompiledArtifact> {
        self.artifact.as_ref()
    }

    /// Fold one host event in. Returns whether the view changed.
    pub fn apply(&mut self, event: &HostEvent) -> bool {
        match event {
            HostEvent::Queued { .. } | HostEvent::Delivered { .. } | HostEvent::Recreated { .. } => {
                self.set_state(DiagnosticState::Building)
            }
            HostEvent::Ready { frame, .. } => {
                self.frame = frame.clone();
                self.set_state(DiagnosticState::Ready);
                true
            }
            HostEvent::Failed {
                message,
                compile,
                frame,
                ..
            } => {
                // host-side failures carry no frame; keep what is on screen
                if !frame.is_blank() {
                    self.frame = frame.clone();
                }
                let state = if *compile {
                    DiagnosticState::CompileError(message.clone())
                } else {
                    DiagnosticState::RuntimeError(message.clone())
                };
                self.dismissed = false;
                self.set_state(state);
                true
            }
            HostEvent::Painted { frame } => {
                let changed = self.frame != *frame;
                self.frame = frame.clone();
                changed
            }
        }
    }

    /// Hide the error panel until the next error.
    pub fn dismiss_error(&mut self) -> bool {
        if self.state.is_error() && !self.dismissed {
            self.dismissed = true;
            true
        } else {
            false
        }
    }

    /// Flip the artifact view and return its new visibility.
    pub fn toggle_artifact(&mut self) -> bool {
        self.show_artifact = !self.show_artifact;
        self.show_artifact
    }

    pub fn view(&self) -> DiagnosticView {
        let error = if self.dismissed {
            None
        } else {
            match &self.state {
                DiagnosticState::CompileError(message) => Some(ErrorPanel {
                    kind: ErrorKind::Compile,
                    message: message.clone(),
                }),
                DiagnosticState::RuntimeError(message) => Some(ErrorPanel {
                    kind: ErrorKind::Runtime,
                    message: message.clone(),
                }),
                _ => None,
            }
        };

        DiagnosticView {
            state: self.state.clone(),
            building: self.state == DiagnosticState::Building,
            error,
            frame: self.frame.clone(),
            show_artifact: self.show_artifact,
            artifact_text: self
                .show_artifact
                .then(|| self.artifact.as_ref().map(|a| a.code.clone()))
                .flatten(),
        }
    }

    fn set_state(&mut self, state: DiagnosticState) -> bool {
        if self.state == state {
            return false;
        }
        if state.is_error() {
            self.dismissed = false;
        }
        self.state = state;
        true
    }
}
