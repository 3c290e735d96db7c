//! Guest side of the sandbox: the execution cycle runtime.
//!
//! A guest owns a restricted Rhai engine and a render root. It only ever
//! talks to the host through its outbox, and every Execute it receives runs
//! the same cycle:
//!
//! 1. retire the previous render (unmount hooks, then clear the root)
//! 2. evaluate the artifact with a fresh scope
//! 3. report Ready, or Error plus an inline fallback render
//!
//! Timers and the `global_*` store are left alone between cycles. Only a
//! new guest starts from a clean slate.

pub mod bindings;
pub mod dom;
pub mod engine;

use crate::config::SandboxLimits;
use crate::protocol::{ArtifactId, Envelope, ErrorOrigin, Frame, Generation, GuestMessage, HostMessage};
use bindings::{lock, Callback, GuestGlobals, SharedGlobals};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use dom::Node;
use rhai::{Dynamic, Engine, EvalAltResult, Scope};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Result of one execution cycle.
#[derive(Clone, Debug, PartialEq)]
pub enum CycleOutcome {
    Ready {
        frame: Frame,
    },
    Failed {
        message: String,
        origin: ErrorOrigin,
        frame: Frame,
    },
}

impl CycleOutcome {
    pub fn into_message(self, artifact: ArtifactId) -> GuestMessage {
        match self {
            CycleOutcome::Ready { frame } => GuestMessage::Ready { artifact, frame },
            CycleOutcome::Failed {
                message,
                origin,
                frame,
            } => GuestMessage::Error {
                artifact: Some(artifact),
                message,
                origin,
                frame,
            },
        }
    }

    pub fn frame(&self) -> &Frame {
        match self {
            CycleOutcome::Ready { frame } | CycleOutcome::Failed { frame, .. } => frame,
        }
    }
}

/// One guest instance. Lives on its own thread for the lifetime of a
/// sandbox session.
pub struct GuestRuntime {
    generation: Generation,
    label: String,
    engine: Engine,
    globals: SharedGlobals,
}

impl GuestRuntime {
    pub fn new(generation: Generation, limits: &SandboxLimits) -> Self {
        let label = generation.to_string();
        let globals = Arc::new(Mutex::new(GuestGlobals::new(limits.max_timers)));
        let mut engine = engine::create_engine(limits, &label);
        bindings::register(&mut engine, &globals, limits, &label);
        Self {
            generation,
            label,
            engine,
            globals,
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Announce readiness, then serve Execute messages and timers until the
    /// host drops its sender or stops listening.
    pub fn run(mut self, inbox: Receiver<Envelope<HostMessage>>, outbox: Sender<Envelope<GuestMessage>>) {
        let generation = self.generation;
        let send = |payload: GuestMessage| outbox.send(Envelope::new(generation, payload)).is_ok();

        if !send(GuestMessage::Boot) {
            return;
        }
        log::debug!("[GUEST {}] Booted", self.label);

        loop {
            for message in self.run_due_timers(Instant::now()) {
                if !send(message) {
                    return;
                }
            }

            let received = match self.next_timer_deadline() {
                Some(deadline) => inbox.recv_deadline(deadline),
                None => inbox.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };

            match received {
                Ok(envelope) if envelope.generation != generation => {
                    log::debug!(
                        "[GUEST {}] Ignoring message for {}",
                        self.label,
                        envelope.generation
                    );
                }
                Ok(envelope) => match envelope.payload {
                    HostMessage::Execute { artifact, code } => {
                        let outcome = self.execute(artifact, &code);
                        if !send(outcome.into_message(artifact)) {
                            break;
                        }
                    }
                },
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        log::debug!("[GUEST {}] Host went away, exiting", self.label);
    }

    /// Run one full execution cycle for `code`.
    pub fn execute(&mut self, artifact: ArtifactId, code: &str) -> CycleOutcome {
        log::debug!("[GUEST {}] Executing {}", self.label, artifact);
        self.retire();
        lock(&self.globals).logged_errors.clear();

        let result = match self.engine.compile(code) {
            Ok(ast) => {
                let ast = Arc::new(ast);
                lock(&self.globals).current_ast = Some(ast.clone());
                let engine = &self.engine;
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    let mut scope = Scope::new();
                    engine.run_ast_with_scope(&mut scope, &ast)
                }));
                match outcome {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(err)) => Err(describe_error(&err)),
                    Err(panic) => Err(describe_panic(panic)),
                }
            }
            Err(err) => Err(err.to_string()),
        };

        let logged = std::mem::take(&mut lock(&self.globals).logged_errors);
        let failure = match result {
            Err(message) => Some((message, ErrorOrigin::Thrown)),
            Ok(()) if !logged.is_empty() => Some((logged.join("\n"), ErrorOrigin::Logged)),
            Ok(()) => None,
        };

        match failure {
            Some((message, origin)) => {
                log::debug!("[GUEST {}] {} failed ({}): {}", self.label, artifact, origin, message);
                let frame = self.show_fallback(&message);
                CycleOutcome::Failed {
                    message,
                    origin,
                    frame,
                }
            }
            None => CycleOutcome::Ready {
                frame: self.take_frame(),
            },
        }
    }

    /// Run unmount hooks and clear the root. Hook failures are logged and
    /// the root is cleared regardless.
    pub fn retire(&mut self) {
        let hooks = std::mem::take(&mut lock(&self.globals).unmount_hooks);
        for hook in hooks {
            if let Err(message) = self.call(&hook) {
                log::warn!(
                    "[GUEST {}] Unmount hook failed, clearing anyway: {}",
                    self.label,
                    message
                );
            }
        }
        let mut globals = lock(&self.globals);
        globals.root = None;
        globals.dirty = false;
    }

    /// Fire every timer due at `now` and collect the messages they cause:
    /// an Error per failing callback, or one Paint if the render changed.
    pub fn run_due_timers(&mut self, now: Instant) -> Vec<GuestMessage> {
        let mut messages = Vec::new();

        loop {
            let Some(timer) = lock(&self.globals).take_due(now) else {
                break;
            };
            {
                let mut globals = lock(&self.globals);
                globals.running_timer = Some((timer.id, false));
                globals.current_ast = Some(timer.callback.ast.clone());
            }

            let result = self.call(&timer.callback);

            let mut globals = lock(&self.globals);
            let cleared = matches!(globals.running_timer.take(), Some((_, true)));
            if let Some(interval) = timer.interval {
                if !cleared && result.is_ok() {
                    let mut next = timer.clone();
                    next.due = now + interval;
                    globals.timers.push(next);
                }
            }
            let logged = std::mem::take(&mut globals.logged_errors);
            drop(globals);

            let failure = match result {
                Err(message) => Some((message, ErrorOrigin::Uncaught)),
                Ok(()) if !logged.is_empty() => Some((logged.join("\n"), ErrorOrigin::Logged)),
                Ok(()) => None,
            };
            if let Some((message, origin)) = failure {
                log::debug!("[GUEST {}] Timer {} failed: {}", self.label, timer.id, message);
                let frame = self.show_fallback(&message);
                messages.push(GuestMessage::Error {
                    artifact: None,
                    message,
                    origin,
                    frame,
                });
            }
        }

        if lock(&self.globals).dirty {
            messages.push(GuestMessage::Paint {
                frame: self.take_frame(),
            });
        }
        messages
    }

    pub fn next_timer_deadline(&self) -> Option<Instant> {
        lock(&self.globals).next_due()
    }

    fn take_frame(&mut self) -> Frame {
        let mut globals = lock(&self.globals);
        globals.dirty = false;
        dom::frame_of(globals.root.as_ref())
    }

    fn show_fallback(&mut self, message: &str) -> Frame {
        lock(&self.globals).mount(Node::error_fallback(message));
        self.take_frame()
    }

    fn call(&self, callback: &Callback) -> Result<(), String> {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            callback
                .func
                .call::<Dynamic>(&self.engine, &callback.ast, ())
        }));
        match outcome {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => Err(describe_error(&err)),
            Err(panic) => Err(describe_panic(panic)),
        }
    }
}

/// Normalize an engine error to the text shown to the author.
///
/// Thrown values are unwrapped from any function-call frames: strings are
/// used verbatim and maps contribute their `message` field.
pub fn describe_error(err: &EvalAltResult) -> String {
    match err {
        EvalAltResult::ErrorRuntime(value, _) => bindings::message_of(value),
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => describe_error(inner),
        EvalAltResult::ErrorInModule(_, inner, _) => describe_error(inner),
        other => other.to_string(),
    }
}

fn describe_panic(panic: Box<dyn std::any::Any + Send>) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown cause".to_string());
    format!("Guest panicked: {}", detail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::markup::lower;
    use std::time::Duration;

    fn runtime() -> GuestRuntime {
        GuestRuntime::new(Generation::first(), &SandboxLimits::default())
    }

    fn exec(guest: &mut GuestRuntime, id: u64, source: &str) -> CycleOutcome {
        let depth = SandboxLimits::default().max_render_depth;
        guest.execute(ArtifactId::new(id), &lower(source, depth).unwrap())
    }

    #[test]
    fn test_successful_cycle_is_ready() {
        let mut guest = runtime();
        let outcome = exec(&mut guest, 1, r#"render(<div class="x">ok</div>);"#);
        assert_eq!(
            outcome,
            CycleOutcome::Ready {
                frame: Frame {
                    html: r#"<div class="x">ok</div>"#.to_string(),
                    outline: "<div class=\"x\">\n  \"ok\"\n".to_string(),
                }
            }
        );
    }

    #[test]
    fn test_throw_then_fix() {
        let mut guest = runtime();
        let outcome = exec(&mut guest, 1, r#"throw "boom";"#);
        match outcome {
            CycleOutcome::Failed { message, origin, frame } => {
                assert_eq!(message, "boom");
                assert_eq!(origin, ErrorOrigin::Thrown);
                assert_eq!(frame.html, r#"<pre class="preview-error">boom</pre>"#);
            }
            other => panic!("expected failure, got {:?}", other),
        }

        let outcome = exec(&mut guest, 2, "render(<div>ok</div>);");
        assert_eq!(outcome.frame().html, "<div>ok</div>");
        assert!(matches!(outcome, CycleOutcome::Ready { .. }));
    }

    #[test]
    fn test_thrown_map_and_nested_function() {
        let mut guest = runtime();
        let outcome = exec(
            &mut guest,
            1,
            r#"fn inner() { throw #{message: "deep"}; } fn outer() { inner() } outer();"#,
        );
        assert!(matches!(outcome, CycleOutcome::Failed { ref message, .. } if message == "deep"));
    }

    #[test]
    fn test_component_rendering() {
        let mut guest = runtime();
        let outcome = exec(
            &mut guest,
            1,
            r#"
fn Card(props) {
    <section class="card"><h2>{props.title}</h2>{props.children}</section>
}
render(<Card title="Hi"><p>body</p></Card>);
"#,
        );
        assert_eq!(
            outcome.frame().html,
            r#"<section class="card"><h2>Hi</h2><p>body</p></section>"#
        );
    }

    #[test]
    fn test_diagnostic_artifact_reports_logged_error() {
        let mut guest = runtime();
        let artifact = crate::compiler::CompiledArtifact::diagnostic(ArtifactId::new(1), "Unexpected token (line 1, position 3)");
        let outcome = guest.execute(artifact.id, &artifact.code);
        match outcome {
            CycleOutcome::Failed { message, origin, .. } => {
                assert_eq!(message, "Unexpected token (line 1, position 3)");
                assert_eq!(origin, ErrorOrigin::Logged);
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_unmount_hooks_run_before_next_cycle() {
        let mut guest = runtime();
        exec(&mut guest, 1, r#"on_unmount(|| global_set("unmounted", true)); render(<p/>);"#);
        let outcome = exec(&mut guest, 2, r#"render(text(global_has("unmounted")));"#);
        assert_eq!(outcome.frame().html, "true");
    }

    #[test]
    fn test_failing_unmount_hook_still_clears() {
        let mut guest = runtime();
        exec(&mut guest, 1, r#"on_unmount(|| { throw "nope"; }); render(<p>old</p>);"#);
        let outcome = exec(&mut guest, 2, "let x = 1;");
        assert!(matches!(outcome, CycleOutcome::Ready { .. }));
        assert!(outcome.frame().is_blank());
    }

    #[test]
    fn test_store_survives_cycles_but_not_new_guest() {
        let counter = r#"
if !global_has("n") { global_set("n", 0); }
global_set("n", global_get("n") + 1);
render(text(global_get("n")));
"#;
        let mut guest = runtime();
        exec(&mut guest, 1, counter);
        assert_eq!(exec(&mut guest, 2, counter).frame().html, "2");

        let mut fresh = GuestRuntime::new(Generation::first().next(), &SandboxLimits::default());
        assert_eq!(exec(&mut fresh, 3, counter).frame().html, "1");
    }

    #[test]
    fn test_timer_paints() {
        let mut guest = runtime();
        let outcome = exec(&mut guest, 1, r#"render(<b>now</b>); set_timeout(|| render(<b>later</b>), 0);"#);
        assert_eq!(outcome.frame().html, "<b>now</b>");

        let messages = guest.run_due_timers(Instant::now() + Duration::from_millis(5));
        assert_eq!(
            messages,
            vec![GuestMessage::Paint {
                frame: Frame {
                    html: "<b>later</b>".to_string(),
                    outline: "<b>\n  \"later\"\n".to_string(),
                }
            }]
        );
        assert!(guest.next_timer_deadline().is_none());
    }

    #[test]
    fn test_timer_error_is_uncaught() {
        let mut guest = runtime();
        exec(&mut guest, 1, r#"render(<p/>); set_timeout(|| { throw "late"; }, 0);"#);
        let messages = guest.run_due_timers(Instant::now() + Duration::from_millis(5));
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            GuestMessage::Error { artifact, message, origin, frame } => {
                assert_eq!(*artifact, None);
                assert_eq!(message, "late");
                assert_eq!(*origin, ErrorOrigin::Uncaught);
                assert!(frame.html.contains("preview-error"));
            }
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[test]
    fn test_interval_repeats_until_cleared() {
        let mut guest = runtime();
        exec(
            &mut guest,
            1,
            r#"
global_set("ticks", 0);
let id = set_interval(|| {
    global_set("ticks", global_get("ticks") + 1);
    if global_get("ticks") >= 2 { clear_timer(global_get("id")); }
}, 10);
global_set("id", id);
"#,
        );
        let start = Instant::now();
        guest.run_due_timers(start + Duration::from_millis(20));
        assert!(guest.next_timer_deadline().is_some());
        guest.run_due_timers(start + Duration::from_secs(1));
        assert!(guest.next_timer_deadline().is_none());

        let outcome = exec(&mut guest, 2, r#"render(text(global_get("ticks")));"#);
        assert_eq!(outcome.frame().html, "2");
    }

    #[test]
    fn test_infinite_loop_is_stopped() {
        let limits = SandboxLimits {
            max_operations: 10_000,
            ..SandboxLimits::default()
        };
        let mut guest = GuestRuntime::new(Generation::first(), &limits);
        let outcome = guest.execute(ArtifactId::new(1), "loop { }");
        assert!(
            matches!(outcome, CycleOutcome::Failed { ref message, .. } if message.contains("Too many operations"))
        );
    }

    #[test]
    fn test_deep_render_tree_fails_cleanly() {
        let mut guest = runtime();
        let source = r#"
            let n = text("x");
            for i in 0..100000 { n = el("div", #{}, [n]); }
            render(n);
        "#;
        let outcome = guest.execute(ArtifactId::new(1), source);
        assert!(
            matches!(outcome, CycleOutcome::Failed { ref message, .. } if message.contains("nested too deeply"))
        );

        // runtime stays usable
        let outcome = exec(&mut guest, 2, "render(<p>ok</p>);");
        assert!(matches!(outcome, CycleOutcome::Ready { .. }));
    }

    #[test]
    fn test_run_loop_boots_then_executes() {
        let (host_tx, guest_rx) = crossbeam_channel::unbounded();
        let (guest_tx, host_rx) = crossbeam_channel::unbounded();
        let guest = runtime();
        let handle = std::thread::spawn(move || guest.run(guest_rx, guest_tx));

        let boot = host_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(boot.payload, GuestMessage::Boot);

        // wrong generation is ignored
        host_tx
            .send(Envelope::new(
                Generation::new(9),
                HostMessage::Execute {
                    artifact: ArtifactId::new(1),
                    code: "throw \"stale\";".to_string(),
                },
            ))
            .unwrap();
        host_tx
            .send(Envelope::new(
                Generation::first(),
                HostMessage::Execute {
                    artifact: ArtifactId::new(2),
                    code: "render(\"hi\");".to_string(),
                },
            ))
            .unwrap();

        let reply = host_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(reply.generation, Generation::first());
        assert!(matches!(
            reply.payload,
            GuestMessage::Ready { artifact, .. } if artifact == ArtifactId::new(2)
        ));

        drop(host_tx);
        handle.join().unwrap();
    }
}
