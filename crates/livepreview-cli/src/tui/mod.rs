//! Terminal UI for livepreview
//!
//! Shows the rendered frame, session status and log output using ratatui

pub mod app;
pub mod layout;
pub mod logger;
pub mod ui;

pub use app::TuiApp;
pub use logger::{init_logger, init_tui_logger};

use crossbeam_channel::{Receiver, Sender};
use std::sync::{Mutex, MutexGuard};

/// Event types that can be sent to the TUI
#[derive(Clone, Debug)]
pub enum TuiEvent {
    /// A log message to display
    Log { level: log::Level, message: String },
    /// Transient status line message (file reloads and the like)
    Status(String),
}

/// Shared TUI event sender
static TUI_EVENT_SENDER: Mutex<Option<Sender<TuiEvent>>> = Mutex::new(None);

fn sender_slot() -> MutexGuard<'static, Option<Sender<TuiEvent>>> {
    TUI_EVENT_SENDER
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Initialize the TUI event channel
pub fn init_tui_channel() -> Receiver<TuiEvent> {
    let (sender, receiver) = crossbeam_channel::unbounded();
    *sender_slot() = Some(sender);
    receiver
}

/// Send a TUI event
pub fn send_tui_event(event: TuiEvent) {
    if let Some(sender) = sender_slot().as_ref() {
        let _ = sender.send(event);
    }
}

/// Show a message in the status bar
pub fn status(message: impl Into<String>) {
    send_tui_event(TuiEvent::Status(message.into()));
}
