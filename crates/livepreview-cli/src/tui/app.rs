//! TUI application state and logic

use crate::tui::TuiEvent;
use livepreview_core::{DiagnosticState, ErrorPanel, PreviewState};
use log::Level;
use ratatui::style::Color;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

const MAX_LOG_ENTRIES: usize = 200;

/// How long a status bar message stays visible
const STATUS_TTL: Duration = Duration::from_secs(3);

/// Main TUI application state
pub struct TuiApp {
    /// Log messages buffer
    pub log_buffer: VecDeque<LogEntry>,
    /// Show error modal
    pub show_error_modal: bool,
    /// Show help modal
    pub show_help_modal: bool,
    /// Cached state for rendering
    pub state: Option<PreviewState>,
    /// Name of the file being previewed
    pub source_name: String,
    /// Transient status bar message
    pub status_message: Option<(String, Instant)>,
    /// Minimum log level to display (for filtering)
    pub min_log_level: Level,
    /// Maximize log panel (swap preview/log areas)
    pub log_maximized: bool,
    /// Vertical scroll of the preview pane
    pub preview_scroll: u16,
}

/// One buffered log line
#[derive(Clone, Debug)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: Level,
    pub message: String,
}

/// What a key press asks the runtime to do
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyAction {
    None,
    Quit,
    Refresh,
    ToggleArtifact,
    DismissError,
}

impl TuiApp {
    pub fn new(source_name: impl Into<String>) -> Self {
        Self {
            log_buffer: VecDeque::with_capacity(MAX_LOG_ENTRIES),
            show_error_modal: false,
            show_help_modal: false,
            state: None,
            source_name: source_name.into(),
            status_message: None,
            min_log_level: Level::Info,
            log_maximized: false,
            preview_scroll: 0,
        }
    }

    /// Update state from the state manager
    pub fn update_state(&mut self, state: PreviewState) {
        let frame_changed = self
            .state
            .as_ref()
            .map_or(true, |old| old.diagnostics.frame != state.diagnostics.frame);
        if frame_changed {
            self.preview_scroll = 0;
        }
        self.state = Some(state);
        if self.error_panel().is_none() {
            self.show_error_modal = false;
        }
    }

    /// Process a TUI event
    pub fn process_event(&mut self, event: TuiEvent) {
        match event {
            TuiEvent::Log { level, message } => self.add_log(level, message),
            TuiEvent::Status(message) => self.set_status(message),
        }
    }

    /// Add a log message
    pub fn add_log(&mut self, level: Level, message: String) {
        let timestamp = chrono::Local::now().format("%H:%M:%S").to_string();
        self.log_buffer.push_back(LogEntry {
            timestamp,
            level,
            message,
        });
        if self.log_buffer.len() > MAX_LOG_ENTRIES {
            self.log_buffer.pop_front();
        }
    }

    pub fn set_status(&mut self, message: String) {
        self.status_message = Some((message, Instant::now()));
    }

    /// Status bar message, if it has not expired
    pub fn current_status(&self) -> Option<&str> {
        self.status_message
            .as_ref()
            .filter(|(_, at)| at.elapsed() < STATUS_TTL)
            .map(|(message, _)| message.as_str())
    }

    /// The visible error panel, if any
    pub fn error_panel(&self) -> Option<&ErrorPanel> {
        self.state.as_ref().and_then(|s| s.diagnostics.error.as_ref())
    }

    /// Toggle error modal
    pub fn toggle_error_modal(&mut self) {
        if self.error_panel().is_some() {
            self.show_error_modal = !self.show_error_modal;
        }
    }

    pub fn toggle_help_modal(&mut self) {
        self.show_help_modal = !self.show_help_modal;
    }

    /// Escape closes the topmost modal. Closing the error modal, or pressing
    /// Escape with no modal open, dismisses the error panel.
    pub fn handle_escape(&mut self) -> KeyAction {
        if self.show_help_modal {
            self.show_help_modal = false;
            return KeyAction::None;
        }
        self.show_error_modal = false;
        if self.error_panel().is_some() {
            KeyAction::DismissError
        } else {
            KeyAction::None
        }
    }

    /// Map a key press in normal mode to UI changes and a runtime action
    pub fn handle_char(&mut self, c: char) -> KeyAction {
        match c {
            'q' => KeyAction::Quit,
            'r' => {
                self.set_status("Recreating sandbox".to_string());
                KeyAction::Refresh
            }
            'a' => KeyAction::ToggleArtifact,
            'e' => {
                self.toggle_error_modal();
                KeyAction::None
            }
            '?' => {
                self.toggle_help_modal();
                KeyAction::None
            }
            'L' => {
                self.toggle_log_maximized();
                KeyAction::None
            }
            'j' => {
                self.scroll_preview(1);
                KeyAction::None
            }
            'k' => {
                self.scroll_preview(-1);
                KeyAction::None
            }
            '1'..='5' => {
                self.set_log_level(c as u8 - b'0');
                KeyAction::None
            }
            _ => KeyAction::None,
        }
    }

    /// Set specific log level by number (1-5)
    pub fn set_log_level(&mut self, level: u8) {
        self.min_log_level = match level {
            1 => Level::Error,
            2 => Level::Warn,
            3 => Level::Info,
            4 => Level::Debug,
            _ => Level::Trace,
        };
    }

    /// Toggle log maximized view
    pub fn toggle_log_maximized(&mut self) {
        self.log_maximized = !self.log_maximized;
    }

    pub fn scroll_preview(&mut self, delta: i32) {
        let next = (self.preview_scroll as i32 + delta).max(0);
        self.preview_scroll = next.min(u16::MAX as i32) as u16;
    }

    /// Get log entries at or above the minimum level
    pub fn filtered_log_entries(&self) -> Vec<&LogEntry> {
        self.log_buffer
            .iter()
            .filter(|entry| entry.level <= self.min_log_level)
            .collect()
    }

    /// Whether the preview pane shows the compiled artifact
    pub fn showing_artifact(&self) -> bool {
        self.state
            .as_ref()
            .is_some_and(|s| s.diagnostics.artifact_text.is_some())
    }

    /// Lines for the preview pane: the artifact text when toggled on,
    /// otherwise the outline of the current frame.
    pub fn preview_lines(&self) -> Vec<String> {
        let Some(state) = &self.state else {
            return vec!["Starting…".to_string()];
        };
        let view = &state.diagnostics;
        if let Some(code) = &view.artifact_text {
            return code.lines().map(str::to_string).collect();
        }
        if view.frame.outline.is_empty() {
            let hint = if view.building {
                "Building…"
            } else {
                "(nothing rendered)"
            };
            return vec![hint.to_string()];
        }
        view.frame.outline.lines().map(str::to_string).collect()
    }

    /// Short label and color for the diagnostic state
    pub fn diagnostic_badge(&self) -> (&'static str, Color) {
        match self.state.as_ref().map(|s| &s.diagnostics.state) {
            None | Some(DiagnosticState::Building) => ("BUILDING", Color::Yellow),
            Some(DiagnosticState::Ready) => ("READY", Color::Green),
            Some(DiagnosticState::CompileError(_)) => ("COMPILE ERROR", Color::Red),
            Some(DiagnosticState::RuntimeError(_)) => ("RUNTIME ERROR", Color::Red),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livepreview_core::{ErrorKind, Frame};

    fn with_error(app: &mut TuiApp, message: &str) {
        let mut state = PreviewState::new();
        state.diagnostics.state = DiagnosticState::RuntimeError(message.to_string());
        state.diagnostics.building = false;
        state.diagnostics.error = Some(ErrorPanel {
            kind: ErrorKind::Runtime,
            message: message.to_string(),
        });
        app.update_state(state);
    }

    #[test]
    fn test_error_modal_needs_error() {
        let mut app = TuiApp::new("app.rhai");
        app.toggle_error_modal();
        assert!(!app.show_error_modal);

        with_error(&mut app, "boom");
        assert_eq!(app.handle_char('e'), KeyAction::None);
        assert!(app.show_error_modal);

        // error cleared by a successful build closes the modal
        app.update_state(PreviewState::new());
        assert!(!app.show_error_modal);
    }

    #[test]
    fn test_escape_closes_help_before_dismissing() {
        let mut app = TuiApp::new("app.rhai");
        with_error(&mut app, "boom");
        app.handle_char('?');
        assert_eq!(app.handle_escape(), KeyAction::None);
        assert!(!app.show_help_modal);
        assert_eq!(app.handle_escape(), KeyAction::DismissError);
    }

    #[test]
    fn test_key_actions() {
        let mut app = TuiApp::new("app.rhai");
        assert_eq!(app.handle_char('q'), KeyAction::Quit);
        assert_eq!(app.handle_char('a'), KeyAction::ToggleArtifact);
        assert_eq!(app.handle_char('r'), KeyAction::Refresh);
        assert_eq!(app.current_status(), Some("Recreating sandbox"));
        app.handle_char('2');
        assert_eq!(app.min_log_level, Level::Warn);
    }

    #[test]
    fn test_log_filter_and_cap() {
        let mut app = TuiApp::new("app.rhai");
        for i in 0..(MAX_LOG_ENTRIES + 5) {
            app.add_log(Level::Debug, format!("debug {}", i));
        }
        app.add_log(Level::Warn, "careful".to_string());
        assert_eq!(app.log_buffer.len(), MAX_LOG_ENTRIES);

        let visible = app.filtered_log_entries();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].message, "careful");

        app.set_log_level(5);
        assert_eq!(app.filtered_log_entries().len(), MAX_LOG_ENTRIES);
    }

    #[test]
    fn test_preview_lines() {
        let mut app = TuiApp::new("app.rhai");
        assert_eq!(app.preview_lines(), vec!["Starting…"]);

        let mut state = PreviewState::new();
        app.update_state(state.clone());
        assert_eq!(app.preview_lines(), vec!["Building…"]);

        state.diagnostics.frame = Frame {
            html: "<p>hi</p>".to_string(),
            outline: "p\n  \"hi\"".to_string(),
        };
        app.update_state(state.clone());
        assert_eq!(app.preview_lines(), vec!["p", "  \"hi\""]);
        assert!(!app.showing_artifact());

        state.diagnostics.artifact_text = Some("render(1);".to_string());
        app.update_state(state);
        assert!(app.showing_artifact());
        assert_eq!(app.preview_lines(), vec!["render(1);"]);
    }
}
