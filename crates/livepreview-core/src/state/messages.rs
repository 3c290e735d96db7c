//! Commands accepted by the preview host thread.

/// Every input the preview runtime reacts to.
///
/// Editing surfaces send these through
/// [`PreviewHandle`](crate::runtime::PreviewHandle); the host thread applies
/// them in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PreviewMessage {
    /// The author changed the source. Compiled after the debounce window.
    SourceChanged { text: String },

    /// Compile and deliver immediately, skipping the debounce window.
    CompileNow { text: String },

    /// Tear down the sandbox and start a fresh one.
    Refresh,

    /// Hide the error panel.
    DismissError,

    /// Show or hide the last compiled artifact text.
    ToggleArtifact,

    /// Stop the host thread.
    Shutdown,
}
