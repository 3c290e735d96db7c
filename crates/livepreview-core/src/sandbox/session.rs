//! One sandbox session: a guest, its channel, and its lifecycle state.

use crate::compiler::CompiledArtifact;
use crate::error::{Error, Result};
use crate::protocol::{Envelope, Generation, HostMessage};
use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a [`SandboxSession`].
///
/// ```text
///  Booting ──Boot──► AwaitingDelivery ──post──► Delivering ──Ready──► Executing
///                          │                      ▲   │                  │
///                          │ async error          │   └──Error──► Faulted│
///                          ▼                      └──────post────────────┘
///                       Faulted
///
///  any state ──teardown──► Destroyed
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Booting,
    AwaitingDelivery,
    Delivering,
    Executing,
    Faulted,
    Destroyed,
}

impl SessionState {
    /// Whether an artifact may be posted right now.
    pub fn accepts_delivery(self) -> bool {
        matches!(
            self,
            SessionState::AwaitingDelivery | SessionState::Executing | SessionState::Faulted
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Booting => "booting",
            SessionState::AwaitingDelivery => "awaiting delivery",
            SessionState::Delivering => "delivering",
            SessionState::Executing => "executing",
            SessionState::Faulted => "faulted",
            SessionState::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// The host's view of one guest instance.
pub struct SandboxSession {
    generation: Generation,
    state: SessionState,
    tx: Option<Sender<Envelope<HostMessage>>>,
    in_flight: Option<CompiledArtifact>,
    last_artifact: Option<CompiledArtifact>,
}

impl SandboxSession {
    /// A freshly spawned guest that has not booted yet.
    pub fn booting(generation: Generation, tx: Sender<Envelope<HostMessage>>) -> Self {
        Self {
            generation,
            state: SessionState::Booting,
            tx: Some(tx),
            in_flight: None,
            last_artifact: None,
        }
    }

    /// A session whose guest could not be created.
    pub fn destroyed(generation: Generation) -> Self {
        Self {
            generation,
            state: SessionState::Destroyed,
            tx: None,
            in_flight: None,
            last_artifact: None,
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            log::trace!("[HOST] {} {} -> {}", self.generation, self.state, state);
        }
        self.state = state;
    }

    /// The artifact whose result is awaited, if any.
    pub fn in_flight(&self) -> Option<&CompiledArtifact> {
        self.in_flight.as_ref()
    }

    /// Clear and return the in-flight artifact once its result arrived.
    pub fn settle(&mut self) -> Option<CompiledArtifact> {
        self.in_flight.take()
    }

    /// The artifact most recently posted to this session.
    pub fn last_artifact(&self) -> Option<&CompiledArtifact> {
        self.last_artifact.as_ref()
    }

    /// Send `artifact` to the guest and move to Delivering.
    pub fn post(&mut self, artifact: &CompiledArtifact) -> Result<()> {
        let tx = self.tx.as_ref().ok_or_else(|| {
            Error::ChannelClosed(format!("{} has no guest", self.generation))
        })?;
        let envelope = Envelope::new(
            self.generation,
            HostMessage::Execute {
                artifact: artifact.id,
                code: artifact.code.clone(),
            },
        );
        tx.send(envelope)
            .map_err(|_| Error::ChannelClosed(format!("guest of {} is gone", self.generation)))?;

        self.in_flight = Some(artifact.clone());
        self.last_artifact = Some(artifact.clone());
        self.set_state(SessionState::Delivering);
        Ok(())
    }

    /// Mark the session Destroyed and drop the channel into the guest. The
    /// guest thread notices the disconnect and exits on its own.
    pub fn destroy(&mut self) {
        self.tx = None;
        self.in_flight = None;
        self.set_state(SessionState::Destroyed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ArtifactId;

    #[test]
    fn test_post_moves_to_delivering() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut session = SandboxSession::booting(Generation::first(), tx);
        session.set_state(SessionState::AwaitingDelivery);

        let artifact = CompiledArtifact::valid(ArtifactId::new(1), "1".to_string());
        session.post(&artifact).unwrap();

        assert_eq!(session.state(), SessionState::Delivering);
        assert_eq!(session.in_flight().map(|a| a.id), Some(ArtifactId::new(1)));
        let envelope = rx.try_recv().unwrap();
        assert_eq!(envelope.generation, Generation::first());
        assert_eq!(session.settle().map(|a| a.id), Some(ArtifactId::new(1)));
        assert_eq!(session.last_artifact().map(|a| a.id), Some(ArtifactId::new(1)));
    }

    #[test]
    fn test_post_to_dead_guest_fails() {
        let (tx, rx) = crossbeam_channel::unbounded();
        drop(rx);
        let mut session = SandboxSession::booting(Generation::first(), tx);
        let artifact = CompiledArtifact::valid(ArtifactId::new(1), "1".to_string());
        assert!(matches!(session.post(&artifact), Err(Error::ChannelClosed(_))));
        assert!(session.in_flight().is_none());
    }

    #[test]
    fn test_destroy_drops_channel() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut session = SandboxSession::booting(Generation::first(), tx);
        session.destroy();
        assert_eq!(session.state(), SessionState::Destroyed);
        assert!(rx.recv().is_err());
        let artifact = CompiledArtifact::valid(ArtifactId::new(1), "1".to_string());
        assert!(session.post(&artifact).is_err());
    }

    #[test]
    fn test_accepts_delivery() {
        assert!(!SessionState::Booting.accepts_delivery());
        assert!(!SessionState::Delivering.accepts_delivery());
        assert!(SessionState::Faulted.accepts_delivery());
        assert!(!SessionState::Destroyed.accepts_delivery());
    }
}
