//! livepreview core - the live-preview runtime for component source code.
//!
//! This crate turns raw, possibly half-typed component source into a
//! rendered frame while the author is still typing:
//!
//! - **Compiler** - Markup lowering, syntax checking and edit debouncing
//! - **Guest** - The Rhai execution context and its DOM bindings
//! - **Protocol** - Generation-tagged messages between host and guest
//! - **Sandbox** - Session lifecycle, handshake and teardown/recreate
//! - **Diagnostics** - Building indicator, frame and error panel
//! - **Runtime** - The host thread tying everything together
//! - **Toolchain** - Launching a real dev server for a file set
//!
//! # Architecture
//!
//! Editing surfaces talk to the [`PreviewHandle`] through
//! [`PreviewMessage`]s. The host thread compiles, delivers artifacts to the
//! current sandbox session, and publishes a [`PreviewState`] snapshot through
//! the [`StateManager`]. Each guest runs on its own thread and only ever
//! answers with generation-tagged [`GuestMessage`]s, so messages from a
//! retired session are simply filtered out.

pub mod compiler;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod guest;
pub mod protocol;
pub mod runtime;
pub mod sandbox;
pub mod state;
pub mod toolchain;
pub mod validation;

pub use compiler::{CompilationPipeline, CompileError, CompiledArtifact, Transpiler};
pub use config::PreviewConfig;
pub use diagnostics::{DiagnosticState, DiagnosticView, Diagnostics, ErrorKind, ErrorPanel};
pub use error::{Error, Result};
pub use guest::{CycleOutcome, GuestRuntime};
pub use protocol::{ArtifactId, ErrorOrigin, Frame, Generation, GuestMessage, HostMessage};
pub use runtime::{PreviewHandle, PreviewRuntime};
pub use sandbox::{HostEvent, SandboxBackend, SandboxHost, SessionState, ThreadSandbox};
pub use state::{PreviewMessage, PreviewState, StateManager};
pub use toolchain::{react_vite_template, DevServer, DevServerRenderer, FileSet, ToolchainEvent, ToolchainRenderer};
pub use validation::{validate_source, ValidationError, ValidationResult};
