//! Isolated execution contexts and their host-side controller.

pub mod controller;
pub mod session;

pub use controller::{HostEvent, SandboxHost};
pub use session::{SandboxSession, SessionState};

use crate::config::SandboxLimits;
use crate::error::{Error, Result};
use crate::guest::GuestRuntime;
use crate::protocol::{Envelope, Generation, GuestMessage, HostMessage};
use crossbeam_channel::{unbounded, Sender};
use std::thread;

/// Guest stack. Render trees at the deepest allowed nesting fit with room to spare.
const GUEST_STACK_SIZE: usize = 8 * 1024 * 1024;

/// Something that can create a fresh guest.
///
/// A backend must build the guest from the same fixed bootstrap every time
/// and must not block on it: the guest announces itself later with `Boot`
/// through `outbox`.
pub trait SandboxBackend {
    fn spawn(
        &mut self,
        generation: Generation,
        outbox: Sender<Envelope<GuestMessage>>,
    ) -> Result<Sender<Envelope<HostMessage>>>;
}

/// Runs each guest on its own named thread.
///
/// Threads are detached. A retired guest exits once its channel
/// disconnects, or when its current evaluation hits the operation limit.
#[derive(Clone, Debug, Default)]
pub struct ThreadSandbox {
    limits: SandboxLimits,
}

impl ThreadSandbox {
    pub fn new(limits: SandboxLimits) -> Self {
        Self { limits }
    }
}

impl SandboxBackend for ThreadSandbox {
    fn spawn(
        &mut self,
        generation: Generation,
        outbox: Sender<Envelope<GuestMessage>>,
    ) -> Result<Sender<Envelope<HostMessage>>> {
        let (tx, rx) = unbounded();
        let limits = self.limits.clone();

        thread::Builder::new()
            .name(format!("preview-guest-{}", generation.as_u64()))
            .stack_size(GUEST_STACK_SIZE)
            .spawn(move || {
                GuestRuntime::new(generation, &limits).run(rx, outbox);
            })
            .map_err(|e| Error::SandboxSpawn(e.to_string()))?;

        log::debug!("[HOST] Spawned guest thread for {}", generation);
        Ok(tx)
    }
}
