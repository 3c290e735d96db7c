//! Preview host thread.
//!
//! The host thread owns the compilation pipeline, the sandbox controller and
//! the diagnostics surface. It:
//! - Processes [`PreviewMessage`]s from editing surfaces
//! - Handles guest envelopes arriving in the shared inbox
//! - Fires debounced compilations when their deadline passes
//! - Publishes a [`PreviewState`] snapshot after every step

use crate::compiler::{CompilationPipeline, CompiledArtifact};
use crate::config::PreviewConfig;
use crate::diagnostics::Diagnostics;
use crate::protocol::{Envelope, GuestMessage};
use crate::sandbox::{HostEvent, SandboxBackend, SandboxHost, ThreadSandbox};
use crate::state::{PreviewMessage, PreviewState, StateManager};
use anyhow::{Context, Result};
use crossbeam_channel::{at, never, select, unbounded, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Handle to the running preview.
///
/// This is the interface editing surfaces use. It is cheap to clone and
/// can be shared between threads.
#[derive(Clone)]
pub struct PreviewHandle {
    /// Sender for preview messages.
    message_tx: Sender<PreviewMessage>,
    /// Shared state manager for read access.
    state_manager: StateManager,
}

impl PreviewHandle {
    /// Send a message to the host thread.
    pub fn send(&self, msg: PreviewMessage) -> Result<()> {
        self.message_tx
            .send(msg)
            .map_err(|e| anyhow::anyhow!("Failed to send message: {}", e))
    }

    /// Report new source text. Compiled once edits settle.
    pub fn source_changed(&self, text: impl Into<String>) -> Result<()> {
        self.send(PreviewMessage::SourceChanged { text: text.into() })
    }

    /// Compile and deliver `text` without waiting for the debounce window.
    pub fn compile_now(&self, text: impl Into<String>) -> Result<()> {
        self.send(PreviewMessage::CompileNow { text: text.into() })
    }

    /// Replace the sandbox with a fresh one.
    pub fn refresh(&self) -> Result<()> {
        self.send(PreviewMessage::Refresh)
    }

    pub fn dismiss_error(&self) -> Result<()> {
        self.send(PreviewMessage::DismissError)
    }

    pub fn toggle_artifact(&self) -> Result<()> {
        self.send(PreviewMessage::ToggleArtifact)
    }

    /// Get the state manager for read access.
    pub fn state(&self) -> &StateManager {
        &self.state_manager
    }

    /// Read the current state with a closure.
    pub fn with_state<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&PreviewState) -> R,
    {
        self.state_manager.with_state_read(f)
    }

    /// Get a clone of the current state.
    pub fn snapshot(&self) -> PreviewState {
        self.state_manager.snapshot()
    }

    /// Poll the state until `predicate` holds.
    /// Returns false if `timeout` passes first.
    pub fn wait_until<F>(&self, timeout: Duration, predicate: F) -> bool
    where
        F: Fn(&PreviewState) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if self.with_state(&predicate) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }
}

/// The running preview: host thread plus its handle.
pub struct PreviewRuntime {
    handle: PreviewHandle,
    thread_handle: Option<JoinHandle<()>>,
}

impl PreviewRuntime {
    /// Start with guests on their own threads.
    pub fn start(config: &PreviewConfig) -> Result<Self> {
        Self::start_with_backend(config, ThreadSandbox::new(config.sandbox.clone()))
    }

    /// Start with a custom sandbox backend.
    pub fn start_with_backend<B>(config: &PreviewConfig, backend: B) -> Result<Self>
    where
        B: SandboxBackend + Send + 'static,
    {
        config.validate().context("Invalid configuration")?;

        let state_manager = StateManager::new();
        let (message_tx, message_rx) = unbounded();

        let host = SandboxHost::new(backend).context("Failed to create the first sandbox")?;
        let pipeline = CompilationPipeline::new(config.compiler.debounce, &config.sandbox);

        let handle = PreviewHandle {
            message_tx,
            state_manager: state_manager.clone(),
        };

        log::info!(
            "[HOST] Starting preview host (debounce {})",
            humantime::format_duration(config.compiler.debounce)
        );
        let mut host_thread = HostThread {
            pipeline,
            host,
            diagnostics: Diagnostics::new(),
            shared: state_manager,
            source_len: 0,
        };
        let thread_handle = thread::Builder::new()
            .name("preview-host".to_string())
            .spawn(move || host_thread.run(message_rx))
            .context("Failed to spawn preview host thread")?;

        Ok(Self {
            handle,
            thread_handle: Some(thread_handle),
        })
    }

    /// Get a handle to interact with the preview.
    pub fn handle(&self) -> &PreviewHandle {
        &self.handle
    }

    /// Stop the host thread and wait for it.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            let _ = self.handle.send(PreviewMessage::Shutdown);
            let _ = handle.join();
        }
    }
}

impl Drop for PreviewRuntime {
    fn drop(&mut self) {
        self.stop();
    }
}

/// What woke the host loop.
enum Wake {
    Command(Option<PreviewMessage>),
    Guest(Envelope<GuestMessage>),
    Tick,
}

/// State owned by the host thread.
struct HostThread<B: SandboxBackend> {
    pipeline: CompilationPipeline,
    host: SandboxHost<B>,
    diagnostics: Diagnostics,
    shared: StateManager,
    source_len: usize,
}

impl<B: SandboxBackend> HostThread<B> {
    fn run(&mut self, message_rx: Receiver<PreviewMessage>) {
        let inbox = self.host.inbox().clone();
        self.publish();

        loop {
            let tick = match self.pipeline.next_deadline() {
                Some(deadline) => at(deadline),
                None => never(),
            };

            let wake = select! {
                recv(message_rx) -> msg => Wake::Command(msg.ok()),
                recv(inbox) -> envelope => match envelope {
                    Ok(envelope) => Wake::Guest(envelope),
                    Err(_) => Wake::Tick,
                },
                recv(tick) -> _ => Wake::Tick,
            };

            match wake {
                Wake::Command(None) | Wake::Command(Some(PreviewMessage::Shutdown)) => break,
                Wake::Command(Some(msg)) => self.process_message(msg),
                Wake::Guest(envelope) => {
                    let events = self.host.handle(envelope);
                    self.apply_events(events);
                }
                Wake::Tick => {}
            }

            if let Some(artifact) = self.pipeline.poll(Instant::now()) {
                self.deliver(artifact);
            }
            self.publish();
        }

        log::info!("[HOST] Preview host stopped");
    }

    fn process_message(&mut self, msg: PreviewMessage) {
        match msg {
            PreviewMessage::SourceChanged { text } => {
                self.source_len = text.len();
                self.pipeline.on_source_changed(text, Instant::now());
            }
            PreviewMessage::CompileNow { text } => {
                self.source_len = text.len();
                let artifact = self.pipeline.compile_now(&text);
                self.deliver(artifact);
            }
            PreviewMessage::Refresh => {
                let events = self.host.teardown_and_recreate();
                self.apply_events(events);
            }
            PreviewMessage::DismissError => {
                self.diagnostics.dismiss_error();
            }
            PreviewMessage::ToggleArtifact => {
                self.diagnostics.toggle_artifact();
            }
            PreviewMessage::Shutdown => {}
        }
    }

    fn deliver(&mut self, artifact: CompiledArtifact) {
        self.diagnostics.record_artifact(&artifact);
        let events = self.host.deliver(artifact);
        self.apply_events(events);
    }

    fn apply_events(&mut self, events: Vec<HostEvent>) {
        for event in events {
            match &event {
                HostEvent::Ready { artifact, .. } => {
                    log::info!("[HOST] {} rendered", artifact);
                }
                HostEvent::Failed { message, compile, .. } => {
                    let kind = if *compile { "Compile" } else { "Runtime" };
                    log::warn!("[HOST] {} error: {}", kind, message);
                }
                HostEvent::Recreated { generation } => {
                    log::info!("[HOST] Sandbox {} booting", generation);
                }
                _ => {}
            }
            self.diagnostics.apply(&event);
        }
    }

    /// Copy the current picture into the shared snapshot, bumping its
    /// version only if something changed.
    fn publish(&self) {
        let session = self.host.session();
        self.shared.with_state_write(|state| {
            let mut next = PreviewState {
                version: state.version,
                generation: session.generation(),
                session: session.state(),
                diagnostics: self.diagnostics.view(),
                last_artifact: self.diagnostics.last_artifact().cloned(),
                source_len: self.source_len,
                compile_pending: self.pipeline.is_pending(),
                compilations: self.pipeline.compile_count(),
                recreations: self.host.recreations(),
                dropped_events: self.host.dropped_events(),
            };
            if next != *state {
                next.bump_version();
                *state = next;
            }
        });
    }
}
