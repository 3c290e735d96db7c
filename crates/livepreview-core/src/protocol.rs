//! Host/guest messaging protocol.
//!
//! The host and the sandboxed guest never share memory. Everything that
//! crosses the boundary is one of the message types below, wrapped in an
//! [`Envelope`] that names the session generation it belongs to.
//!
//! ```text
//!   host                               guest (generation N)
//!    │                                   │  install engine + bindings
//!    │ ◄──────────── Boot ────────────── │
//!    │ ───── Execute { artifact } ─────► │  retire previous render
//!    │                                   │  evaluate artifact
//!    │ ◄── Ready { frame } | Error ───── │
//!    │ ◄────────── Paint / Error ─────── │  timers, after the cycle
//! ```
//!
//! The host only ever sends `Execute`, and never before it has seen `Boot`
//! for the same generation. All guests share one host [`Inbox`], which
//! drops envelopes from superseded generations.

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Monotonically increasing tag distinguishing sandbox session instances.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Generation(u64);

impl Generation {
    /// The generation of the first session a host creates.
    pub fn first() -> Self {
        Generation(1)
    }

    pub fn new(value: u64) -> Self {
        Generation(value)
    }

    /// The generation that replaces this one on teardown/recreate.
    pub fn next(self) -> Self {
        Generation(self.0 + 1)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen#{}", self.0)
    }
}

/// Identifies one compiled artifact within a pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ArtifactId(u64);

impl ArtifactId {
    pub fn new(value: u64) -> Self {
        ArtifactId(value)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "artifact#{}", self.0)
    }
}

/// Serialized snapshot of whatever the guest currently has mounted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Compact HTML markup.
    pub html: String,
    /// Indented plain-text outline, for terminals.
    pub outline: String,
}

impl Frame {
    pub fn is_blank(&self) -> bool {
        self.html.is_empty()
    }
}

/// Where a guest error came from. All three travel through the same
/// [`GuestMessage::Error`] shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorOrigin {
    /// Thrown synchronously while evaluating an artifact.
    Thrown,
    /// Raised by a timer callback after the cycle finished.
    Uncaught,
    /// Reported through the intercepted `console_error` call.
    Logged,
}

impl fmt::Display for ErrorOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorOrigin::Thrown => write!(f, "thrown"),
            ErrorOrigin::Uncaught => write!(f, "uncaught"),
            ErrorOrigin::Logged => write!(f, "logged"),
        }
    }
}

/// Messages sent from the host into a guest.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostMessage {
    /// Retire the current render and evaluate `code`.
    Execute { artifact: ArtifactId, code: String },
}

/// Messages sent from a guest back to the host.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GuestMessage {
    /// The guest finished installing its runtime and listener.
    Boot,
    /// The artifact evaluated without error.
    Ready { artifact: ArtifactId, frame: Frame },
    /// Evaluation failed, or asynchronous guest code failed later
    /// (`artifact` is `None` in that case).
    Error {
        artifact: Option<ArtifactId>,
        message: String,
        origin: ErrorOrigin,
        frame: Frame,
    },
    /// The mounted tree changed outside an execution cycle.
    Paint { frame: Frame },
}

impl GuestMessage {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            GuestMessage::Boot => "boot",
            GuestMessage::Ready { .. } => "ready",
            GuestMessage::Error { .. } => "error",
            GuestMessage::Paint { .. } => "paint",
        }
    }
}

/// A message tagged with the session generation it belongs to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub generation: Generation,
    pub payload: T,
}

impl<T> Envelope<T> {
    pub fn new(generation: Generation, payload: T) -> Self {
        Self { generation, payload }
    }
}

/// The host's single receiving end for every guest it ever created.
///
/// Guests get a clone of the sender; the host keeps the receiver and runs
/// every envelope through [`Inbox::accept`] before acting on it.
pub struct Inbox {
    tx: Sender<Envelope<GuestMessage>>,
    rx: Receiver<Envelope<GuestMessage>>,
    dropped: u64,
}

impl Default for Inbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Inbox {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx, dropped: 0 }
    }

    /// Sender handed to a newly spawned guest.
    pub fn sender(&self) -> Sender<Envelope<GuestMessage>> {
        self.tx.clone()
    }

    /// Receiver for use in `select!` loops.
    pub fn receiver(&self) -> &Receiver<Envelope<GuestMessage>> {
        &self.rx
    }

    /// Unwrap an envelope if it belongs to `current`, otherwise drop it.
    pub fn accept(
        &mut self,
        envelope: Envelope<GuestMessage>,
        current: Generation,
    ) -> Option<GuestMessage> {
        if envelope.generation == current {
            Some(envelope.payload)
        } else {
            self.dropped += 1;
            log::debug!(
                "[HOST] Dropping stale {} from {} (current {})",
                envelope.payload.kind(),
                envelope.generation,
                current
            );
            None
        }
    }

    /// Non-blocking receive of the next raw envelope.
    pub fn try_recv(&self) -> Option<Envelope<GuestMessage>> {
        self.rx.try_recv().ok()
    }

    /// Number of envelopes dropped for belonging to another generation.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
