//! Sandbox host controller.
//!
//! The controller is the only thing that hands artifacts to a guest. It
//! holds back delivery until the guest has booted, keeps at most one
//! artifact in flight, and replaces the guest wholesale on refresh or when
//! the guest can no longer be reached.
//!
//! Delivery rules:
//! - before `Boot`, artifacts wait in a depth-one slot (latest wins) and the
//!   slot is flushed once right after `Boot`
//! - while an artifact is in flight, newer artifacts replace the slot; when
//!   the in-flight result arrives it is swallowed and the slot is sent
//! - results naming any other artifact are stale and ignored

use super::session::{SandboxSession, SessionState};
use super::SandboxBackend;
use crate::compiler::CompiledArtifact;
use crate::error::Result;
use crate::protocol::{
    ArtifactId, Envelope, ErrorOrigin, Frame, Generation, GuestMessage, Inbox,
};
use crossbeam_channel::Receiver;

/// Something the rest of the system should know about.
#[derive(Clone, Debug, PartialEq)]
pub enum HostEvent {
    /// The artifact is waiting for Boot or for the in-flight result.
    Queued { artifact: ArtifactId },
    /// The artifact was posted to the guest.
    Delivered { artifact: ArtifactId },
    Ready { artifact: ArtifactId, frame: Frame },
    Failed {
        artifact: Option<ArtifactId>,
        message: String,
        origin: ErrorOrigin,
        /// The failing artifact stood in for source that did not compile.
        compile: bool,
        frame: Frame,
    },
    /// Guest timers changed the render.
    Painted { frame: Frame },
    /// A new guest replaced the old one.
    Recreated { generation: Generation },
}

pub struct SandboxHost<B: SandboxBackend> {
    backend: B,
    inbox: Inbox,
    session: SandboxSession,
    pending: Option<CompiledArtifact>,
    latest: Option<CompiledArtifact>,
    recreations: u64,
}

impl<B: SandboxBackend> SandboxHost<B> {
    /// Spawn the first guest.
    pub fn new(mut backend: B) -> Result<Self> {
        let inbox = Inbox::new();
        let generation = Generation::first();
        let tx = backend.spawn(generation, inbox.sender())?;
        log::info!("[HOST] Created sandbox {}", generation);
        Ok(Self {
            backend,
            inbox,
            session: SandboxSession::booting(generation, tx),
            pending: None,
            latest: None,
            recreations: 0,
        })
    }

    pub fn generation(&self) -> Generation {
        self.session.generation()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn session(&self) -> &SandboxSession {
        &self.session
    }

    pub fn pending(&self) -> Option<&CompiledArtifact> {
        self.pending.as_ref()
    }

    /// Receiver for the host loop's `select!`. Envelopes taken from it must
    /// be passed to [`handle`](Self::handle).
    pub fn inbox(&self) -> &Receiver<Envelope<GuestMessage>> {
        self.inbox.receiver()
    }

    /// Envelopes dropped for belonging to a retired generation.
    pub fn dropped_events(&self) -> u64 {
        self.inbox.dropped()
    }

    pub fn recreations(&self) -> u64 {
        self.recreations
    }

    /// Hand an artifact to the current guest, now or as soon as allowed.
    pub fn deliver(&mut self, artifact: CompiledArtifact) -> Vec<HostEvent> {
        self.latest = Some(artifact.clone());

        match self.session.state() {
            state if state.accepts_delivery() => self.post(artifact),
            SessionState::Destroyed => {
                // the last recreate failed; try again with this artifact
                self.recreate()
            }
            state => {
                log::debug!("[HOST] Queueing {} while {}", artifact.id, state);
                let id = artifact.id;
                if let Some(replaced) = self.pending.replace(artifact) {
                    log::debug!("[HOST] {} superseded by {}", replaced.id, id);
                }
                vec![HostEvent::Queued { artifact: id }]
            }
        }
    }

    /// Process one envelope taken from the inbox.
    pub fn handle(&mut self, envelope: Envelope<GuestMessage>) -> Vec<HostEvent> {
        let generation = self.session.generation();
        let Some(message) = self.inbox.accept(envelope, generation) else {
            return Vec::new();
        };
        if self.session.state() == SessionState::Destroyed {
            return Vec::new();
        }

        match message {
            GuestMessage::Boot => self.on_boot(),
            GuestMessage::Ready { artifact, frame } => {
                if !self.settle(artifact) {
                    return Vec::new();
                }
                if let Some(next) = self.pending.take() {
                    log::debug!("[HOST] Not surfacing {}, sending {}", artifact, next.id);
                    return self.post(next);
                }
                self.session.set_state(SessionState::Executing);
                vec![HostEvent::Ready { artifact, frame }]
            }
            GuestMessage::Error {
                artifact: Some(artifact),
                message,
                origin,
                frame,
            } => {
                let compile = self
                    .session
                    .in_flight()
                    .filter(|a| a.id == artifact)
                    .is_some_and(CompiledArtifact::is_diagnostic);
                if !self.settle(artifact) {
                    return Vec::new();
                }
                if let Some(next) = self.pending.take() {
                    log::debug!("[HOST] Not surfacing error of {}, sending {}", artifact, next.id);
                    return self.post(next);
                }
                self.session.set_state(SessionState::Faulted);
                vec![HostEvent::Failed {
                    artifact: Some(artifact),
                    message,
                    origin,
                    compile,
                    frame,
                }]
            }
            GuestMessage::Error {
                artifact: None,
                message,
                origin,
                frame,
            } => match self.session.state() {
                SessionState::Executing | SessionState::AwaitingDelivery | SessionState::Faulted => {
                    self.session.set_state(SessionState::Faulted);
                    vec![HostEvent::Failed {
                        artifact: None,
                        message,
                        origin,
                        compile: false,
                        frame,
                    }]
                }
                state => {
                    log::debug!("[HOST] Ignoring asynchronous error while {}: {}", state, message);
                    Vec::new()
                }
            },
            GuestMessage::Paint { frame } => match self.session.state() {
                SessionState::Delivering | SessionState::Booting => Vec::new(),
                _ => vec![HostEvent::Painted { frame }],
            },
        }
    }

    /// Handle everything currently waiting in the inbox.
    pub fn pump(&mut self) -> Vec<HostEvent> {
        let mut events = Vec::new();
        while let Some(envelope) = self.inbox.try_recv() {
            events.extend(self.handle(envelope));
        }
        events
    }

    /// Discard the current guest and start a new one. The latest artifact is
    /// delivered again once the new guest boots.
    pub fn teardown_and_recreate(&mut self) -> Vec<HostEvent> {
        log::info!("[HOST] Refreshing sandbox {}", self.session.generation());
        self.recreate()
    }

    fn recreate(&mut self) -> Vec<HostEvent> {
        self.session.destroy();
        let generation = self.session.generation().next();
        self.pending = self.latest.clone();
        self.recreations += 1;

        match self.backend.spawn(generation, self.inbox.sender()) {
            Ok(tx) => {
                self.session = SandboxSession::booting(generation, tx);
                log::info!("[HOST] Created sandbox {}", generation);
                vec![HostEvent::Recreated { generation }]
            }
            Err(e) => {
                log::error!("[HOST] Could not create sandbox {}: {}", generation, e);
                self.session = SandboxSession::destroyed(generation);
                vec![HostEvent::Failed {
                    artifact: None,
                    message: format!("Could not create sandbox: {}", e),
                    origin: ErrorOrigin::Thrown,
                    compile: false,
                    frame: Frame::default(),
                }]
            }
        }
    }

    fn on_boot(&mut self) -> Vec<HostEvent> {
        let state = self.session.state();
        if state != SessionState::Booting {
            log::warn!(
                "[HOST] Ignoring Boot from {} while {}",
                self.session.generation(),
                state
            );
            return Vec::new();
        }
        log::debug!("[HOST] {} booted", self.session.generation());
        self.session.set_state(SessionState::AwaitingDelivery);
        match self.pending.take() {
            Some(artifact) => self.post(artifact),
            None => Vec::new(),
        }
    }

    /// Clear the in-flight artifact if `artifact` is the one awaited.
    fn settle(&mut self, artifact: ArtifactId) -> bool {
        let awaited = self.session.in_flight().map(|a| a.id);
        if awaited != Some(artifact) {
            log::debug!(
                "[HOST] Ignoring stale result for {} (awaiting {:?})",
                artifact,
                awaited
            );
            return false;
        }
        self.session.settle();
        true
    }

    fn post(&mut self, artifact: CompiledArtifact) -> Vec<HostEvent> {
        match self.session.post(&artifact) {
            Ok(()) => vec![HostEvent::Delivered {
                artifact: artifact.id,
            }],
            Err(e) => {
                log::warn!("[HOST] Delivery of {} failed: {}", artifact.id, e);
                let mut events = vec![HostEvent::Failed {
                    artifact: Some(artifact.id),
                    message: format!("Sandbox became unreachable: {}", e),
                    origin: ErrorOrigin::Thrown,
                    compile: artifact.is_diagnostic(),
                    frame: Frame::default(),
                }];
                events.extend(self.recreate());
                events
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SandboxLimits;
    use crate::error::Error;
    use crate::protocol::HostMessage;
    use crate::sandbox::ThreadSandbox;
    use crossbeam_channel::{unbounded, Sender};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// A guest driven by hand from the test.
    struct FakeGuest {
        generation: Generation,
        rx: Option<Receiver<Envelope<HostMessage>>>,
        outbox: Sender<Envelope<GuestMessage>>,
    }

    impl FakeGuest {
        fn send(&self, message: GuestMessage) {
            self.outbox
                .send(Envelope::new(self.generation, message))
                .unwrap();
        }

        fn executed(&self) -> Vec<ArtifactId> {
            self.rx
                .as_ref()
                .unwrap()
                .try_iter()
                .map(|envelope| match envelope.payload {
                    HostMessage::Execute { artifact, .. } => artifact,
                })
                .collect()
        }
    }

    #[derive(Clone, Default)]
    struct FakeBackend {
        guests: Arc<Mutex<Vec<FakeGuest>>>,
        fail: Arc<Mutex<bool>>,
    }

    impl FakeBackend {
        fn guests(&self) -> std::sync::MutexGuard<'_, Vec<FakeGuest>> {
            self.guests.lock().unwrap()
        }
    }

    impl SandboxBackend for FakeBackend {
        fn spawn(
            &mut self,
            generation: Generation,
            outbox: Sender<Envelope<GuestMessage>>,
        ) -> Result<Sender<Envelope<HostMessage>>> {
            if *self.fail.lock().unwrap() {
                return Err(Error::SandboxSpawn("refused".to_string()));
            }
            let (tx, rx) = unbounded();
            self.guests.lock().unwrap().push(FakeGuest {
                generation,
                rx: Some(rx),
                outbox,
            });
            Ok(tx)
        }
    }

    fn artifact(id: u64) -> CompiledArtifact {
        CompiledArtifact::valid(ArtifactId::new(id), format!("render({});", id))
    }

    fn ready(id: u64) -> GuestMessage {
        GuestMessage::Ready {
            artifact: ArtifactId::new(id),
            frame: Frame::default(),
        }
    }

    fn host() -> (SandboxHost<FakeBackend>, FakeBackend) {
        let backend = FakeBackend::default();
        let host = SandboxHost::new(backend.clone()).unwrap();
        (host, backend)
    }

    #[test]
    fn test_no_execute_before_boot() {
        let (mut host, backend) = host();
        assert_eq!(
            host.deliver(artifact(1)),
            vec![HostEvent::Queued {
                artifact: ArtifactId::new(1)
            }]
        );
        assert!(backend.guests()[0].executed().is_empty());

        backend.guests()[0].send(GuestMessage::Boot);
        assert_eq!(
            host.pump(),
            vec![HostEvent::Delivered {
                artifact: ArtifactId::new(1)
            }]
        );
        assert_eq!(backend.guests()[0].executed(), vec![ArtifactId::new(1)]);
        assert_eq!(host.state(), SessionState::Delivering);
    }

    #[test]
    fn test_boot_flushes_latest_only_once() {
        let (mut host, backend) = host();
        host.deliver(artifact(1));
        host.deliver(artifact(2));
        backend.guests()[0].send(GuestMessage::Boot);
        host.pump();
        assert_eq!(backend.guests()[0].executed(), vec![ArtifactId::new(2)]);

        // a second Boot is a handshake violation and changes nothing
        backend.guests()[0].send(GuestMessage::Boot);
        assert!(host.pump().is_empty());
        assert!(backend.guests()[0].executed().is_empty());
        assert_eq!(host.state(), SessionState::Delivering);
    }

    #[test]
    fn test_latest_wins_while_delivering() {
        let (mut host, backend) = host();
        backend.guests()[0].send(GuestMessage::Boot);
        host.pump();
        host.deliver(artifact(1));
        host.deliver(artifact(2));
        host.deliver(artifact(3));

        backend.guests()[0].send(ready(1));
        assert_eq!(
            host.pump(),
            vec![HostEvent::Delivered {
                artifact: ArtifactId::new(3)
            }]
        );
        backend.guests()[0].send(ready(3));
        assert!(matches!(
            host.pump().as_slice(),
            [HostEvent::Ready { artifact, .. }] if *artifact == ArtifactId::new(3)
        ));
        assert_eq!(
            backend.guests()[0].executed(),
            vec![ArtifactId::new(1), ArtifactId::new(3)]
        );
        assert_eq!(host.state(), SessionState::Executing);
    }

    #[test]
    fn test_stale_result_ignored() {
        let (mut host, backend) = host();
        backend.guests()[0].send(GuestMessage::Boot);
        host.pump();
        host.deliver(artifact(5));
        backend.guests()[0].send(ready(4));
        assert!(host.pump().is_empty());
        assert_eq!(host.state(), SessionState::Delivering);
    }

    #[test]
    fn test_error_faults_and_fix_recovers() {
        let (mut host, backend) = host();
        backend.guests()[0].send(GuestMessage::Boot);
        host.pump();
        host.deliver(artifact(1));
        backend.guests()[0].send(GuestMessage::Error {
            artifact: Some(ArtifactId::new(1)),
            message: "boom".to_string(),
            origin: ErrorOrigin::Thrown,
            frame: Frame::default(),
        });
        let events = host.pump();
        assert!(matches!(
            events.as_slice(),
            [HostEvent::Failed { message, compile: false, .. }] if message == "boom"
        ));
        assert_eq!(host.state(), SessionState::Faulted);

        host.deliver(artifact(2));
        backend.guests()[0].send(ready(2));
        assert!(matches!(host.pump().as_slice(), [HostEvent::Ready { .. }]));
        assert_eq!(host.generation(), Generation::first());
    }

    #[test]
    fn test_diagnostic_failure_is_compile_error() {
        let (mut host, backend) = host();
        backend.guests()[0].send(GuestMessage::Boot);
        host.pump();
        host.deliver(CompiledArtifact::diagnostic(ArtifactId::new(1), "bad syntax"));
        backend.guests()[0].send(GuestMessage::Error {
            artifact: Some(ArtifactId::new(1)),
            message: "bad syntax".to_string(),
            origin: ErrorOrigin::Logged,
            frame: Frame::default(),
        });
        assert!(matches!(
            host.pump().as_slice(),
            [HostEvent::Failed { compile: true, .. }]
        ));
    }

    #[test]
    fn test_async_error_faults_executing_session() {
        let (mut host, backend) = host();
        backend.guests()[0].send(GuestMessage::Boot);
        host.pump();
        host.deliver(artifact(1));
        backend.guests()[0].send(ready(1));
        host.pump();

        backend.guests()[0].send(GuestMessage::Error {
            artifact: None,
            message: "late".to_string(),
            origin: ErrorOrigin::Uncaught,
            frame: Frame::default(),
        });
        assert!(matches!(
            host.pump().as_slice(),
            [HostEvent::Failed { artifact: None, .. }]
        ));
        assert_eq!(host.state(), SessionState::Faulted);
    }

    #[test]
    fn test_redelivery_to_executing_yields_ready_again() {
        let (mut host, backend) = host();
        backend.guests()[0].send(GuestMessage::Boot);
        host.pump();
        for _ in 0..2 {
            assert_eq!(
                host.deliver(artifact(1)),
                vec![HostEvent::Delivered {
                    artifact: ArtifactId::new(1)
                }]
            );
            backend.guests()[0].send(ready(1));
            assert!(matches!(host.pump().as_slice(), [HostEvent::Ready { .. }]));
        }
    }

    #[test]
    fn test_refresh_ignores_old_generation() {
        let (mut host, backend) = host();
        backend.guests()[0].send(GuestMessage::Boot);
        host.pump();
        host.deliver(artifact(1));

        let events = host.teardown_and_recreate();
        let second = Generation::first().next();
        assert_eq!(events, vec![HostEvent::Recreated { generation: second }]);
        assert_eq!(host.generation(), second);
        assert_eq!(host.state(), SessionState::Booting);

        // the old guest answers late
        backend.guests()[0].send(ready(1));
        assert!(host.pump().is_empty());
        assert_eq!(host.dropped_events(), 1);
        assert_eq!(host.state(), SessionState::Booting);

        // the new guest boots and gets the latest artifact again
        backend.guests()[1].send(GuestMessage::Boot);
        assert_eq!(
            host.pump(),
            vec![HostEvent::Delivered {
                artifact: ArtifactId::new(1)
            }]
        );
        assert_eq!(backend.guests()[1].executed(), vec![ArtifactId::new(1)]);
    }

    #[test]
    fn test_dead_guest_is_recreated() {
        let (mut host, backend) = host();
        backend.guests()[0].send(GuestMessage::Boot);
        host.pump();
        backend.guests()[0].rx = None;

        let events = host.deliver(artifact(1));
        assert!(matches!(
            events.as_slice(),
            [HostEvent::Failed { compile: false, .. }, HostEvent::Recreated { .. }]
        ));
        assert_eq!(host.recreations(), 1);
        assert_eq!(host.pending().map(|a| a.id), Some(ArtifactId::new(1)));
    }

    #[test]
    fn test_dead_guest_failure_keeps_compile_kind() {
        let (mut host, backend) = host();
        backend.guests()[0].send(GuestMessage::Boot);
        host.pump();
        backend.guests()[0].rx = None;

        let events = host.deliver(CompiledArtifact::diagnostic(ArtifactId::new(1), "bad markup"));
        assert!(matches!(
            events.first(),
            Some(HostEvent::Failed { compile: true, .. })
        ));
    }

    #[test]
    fn test_failed_spawn_retried_on_next_delivery() {
        let (mut host, backend) = host();
        *backend.fail.lock().unwrap() = true;
        let events = host.teardown_and_recreate();
        assert!(matches!(events.as_slice(), [HostEvent::Failed { .. }]));
        assert_eq!(host.state(), SessionState::Destroyed);

        *backend.fail.lock().unwrap() = false;
        let events = host.deliver(artifact(1));
        assert!(matches!(events.as_slice(), [HostEvent::Recreated { .. }]));
        assert_eq!(host.state(), SessionState::Booting);
        assert_eq!(host.pending().map(|a| a.id), Some(ArtifactId::new(1)));
    }

    #[test]
    fn test_thread_sandbox_end_to_end() {
        let mut host = SandboxHost::new(ThreadSandbox::new(SandboxLimits::default())).unwrap();
        host.deliver(CompiledArtifact::valid(
            ArtifactId::new(1),
            r#"render(el("p", #{}, ["live"]));"#.to_string(),
        ));

        let mut frame = None;
        while frame.is_none() {
            let envelope = host
                .inbox()
                .recv_timeout(Duration::from_secs(5))
                .expect("guest did not answer");
            for event in host.handle(envelope) {
                if let HostEvent::Ready { frame: f, .. } = event {
                    frame = Some(f);
                }
            }
        }
        assert_eq!(frame.unwrap().html, "<p>live</p>");
        assert_eq!(host.state(), SessionState::Executing);
    }
}
