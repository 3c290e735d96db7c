//! The fixed set of globals every guest engine exposes.
//!
//! | Function                              | Effect                                   |
//! |---------------------------------------|------------------------------------------|
//! | `el(tag, attrs, children)`            | build an element node                    |
//! | `fragment(children)`                  | build a fragment node                    |
//! | `text(value)`                         | build a text node                        |
//! | `render(node)` / `unmount()`          | mount at / clear the root                |
//! | `on_unmount(fn)`                      | run `fn` when the render is retired      |
//! | `console_log/warn/error(value)`       | log; `console_error` also reports        |
//! | `set_timeout/set_interval(fn, ms)`    | schedule a callback, returns its id      |
//! | `clear_timer(id)`                     | cancel a timer                           |
//! | `global_get/set/has(key)`             | store surviving across cycles            |
//!
//! The functions share one [`GuestGlobals`] behind a mutex. Rhai calls them
//! on the guest thread only, and the runtime never holds the lock while the
//! engine runs.

use super::dom::{self, Node};
use crate::config::SandboxLimits;
use rhai::{Array, Dynamic, Engine, EvalAltResult, FnPtr, ImmutableString, Map, AST};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

type RhaiResult<T> = Result<T, Box<EvalAltResult>>;

/// A callback together with the script it was defined in.
#[derive(Clone)]
pub struct Callback {
    pub func: FnPtr,
    pub ast: Arc<AST>,
}

#[derive(Clone)]
pub struct Timer {
    pub id: i64,
    pub due: Instant,
    pub interval: Option<Duration>,
    pub callback: Callback,
}

/// Mutable guest state reachable from the bindings.
pub struct GuestGlobals {
    pub root: Option<Node>,
    /// The root changed since the last frame was taken.
    pub dirty: bool,
    pub unmount_hooks: Vec<Callback>,
    pub timers: Vec<Timer>,
    /// Messages passed to `console_error` since last drained.
    pub logged_errors: Vec<String>,
    pub store: Map,
    /// Script that is currently executing; callbacks registered now belong to it.
    pub current_ast: Option<Arc<AST>>,
    /// Timer whose callback is running, and whether it cleared itself.
    pub running_timer: Option<(i64, bool)>,
    next_timer_id: i64,
    max_timers: usize,
}

impl GuestGlobals {
    pub fn new(max_timers: usize) -> Self {
        Self {
            root: None,
            dirty: false,
            unmount_hooks: Vec::new(),
            timers: Vec::new(),
            logged_errors: Vec::new(),
            store: Map::new(),
            current_ast: None,
            running_timer: None,
            next_timer_id: 1,
            max_timers,
        }
    }

    pub fn mount(&mut self, node: Node) {
        self.root = Some(node);
        self.dirty = true;
    }

    /// Earliest timer deadline.
    pub fn next_due(&self) -> Option<Instant> {
        self.timers.iter().map(|t| t.due).min()
    }

    /// Remove and return the earliest timer due at `now`.
    pub fn take_due(&mut self, now: Instant) -> Option<Timer> {
        let index = self
            .timers
            .iter()
            .enumerate()
            .filter(|(_, t)| t.due <= now)
            .min_by_key(|(_, t)| (t.due, t.id))
            .map(|(i, _)| i)?;
        Some(self.timers.remove(index))
    }

    fn add_timer(&mut self, func: FnPtr, delay: i64, repeat: bool) -> RhaiResult<i64> {
        if self.timers.len() >= self.max_timers {
            return Err(format!("Too many timers (limit {})", self.max_timers).into());
        }
        let ast = self
            .current_ast
            .clone()
            .ok_or_else(|| Box::<EvalAltResult>::from("Timers can only be set while a script runs"))?;
        let delay = Duration::from_millis(delay.max(0) as u64);
        let id = self.next_timer_id;
        self.next_timer_id += 1;
        self.timers.push(Timer {
            id,
            due: Instant::now() + delay,
            interval: repeat.then_some(delay.max(Duration::from_millis(1))),
            callback: Callback { func, ast },
        });
        Ok(id)
    }

    fn clear_timer(&mut self, id: i64) -> bool {
        if let Some((running, cleared)) = self.running_timer.as_mut() {
            if *running == id {
                *cleared = true;
                return true;
            }
        }
        let before = self.timers.len();
        self.timers.retain(|t| t.id != id);
        self.timers.len() != before
    }
}

pub type SharedGlobals = Arc<Mutex<GuestGlobals>>;

/// Lock the globals, recovering the data if a previous holder panicked.
pub fn lock(globals: &SharedGlobals) -> MutexGuard<'_, GuestGlobals> {
    globals.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Text reported for a value passed to `console_error` or thrown.
///
/// Maps report their `message` field.
pub fn message_of(value: &Dynamic) -> String {
    if value.is_map() {
        let map = value.clone().cast::<Map>();
        if let Some(message) = map.get("message") {
            return message.to_string();
        }
    }
    value.to_string()
}

/// Install all preview globals into `engine`.
pub fn register(engine: &mut Engine, globals: &SharedGlobals, limits: &SandboxLimits, label: &str) {
    engine.register_type_with_name::<Node>("Node");
    engine.register_fn("to_string", |node: &mut Node| node.to_html());
    engine.register_fn("to_debug", |node: &mut Node| format!("{:?}", node));

    register_nodes(engine, limits.max_render_depth);
    register_mounting(engine, globals);
    register_console(engine, globals, label);
    register_timers(engine, globals);
    register_store(engine, globals);
}

fn register_nodes(engine: &mut Engine, max_depth: usize) {
    engine.register_fn(
        "el",
        move |tag: ImmutableString, attrs: Map, children: Array| -> RhaiResult<Node> {
            Node::from_parts(&tag, attrs, children, max_depth).map_err(Into::into)
        },
    );
    engine.register_fn("fragment", |children: Array| -> RhaiResult<Node> {
        dom::children_of(children)
            .map(Node::Fragment)
            .map_err(Into::into)
    });
    engine.register_fn("text", |value: Dynamic| Node::Text(value.to_string()));
}

fn register_mounting(engine: &mut Engine, globals: &SharedGlobals) {
    let g = globals.clone();
    engine.register_fn("render", move |value: Dynamic| -> RhaiResult<()> {
        let node = dom::mountable(value)?;
        lock(&g).mount(node);
        Ok(())
    });

    let g = globals.clone();
    engine.register_fn("unmount", move || -> bool {
        let mut globals = lock(&g);
        globals.dirty = true;
        globals.root.take().is_some()
    });

    let g = globals.clone();
    engine.register_fn("on_unmount", move |func: FnPtr| -> RhaiResult<()> {
        let mut globals = lock(&g);
        let ast = globals
            .current_ast
            .clone()
            .ok_or_else(|| Box::<EvalAltResult>::from("on_unmount called outside a script"))?;
        globals.unmount_hooks.push(Callback { func, ast });
        Ok(())
    });
}

fn register_console(engine: &mut Engine, globals: &SharedGlobals, label: &str) {
    let prefix = label.to_string();
    engine.register_fn("console_log", move |value: Dynamic| {
        log::info!("[GUEST {}] {}", prefix, value);
    });

    let prefix = label.to_string();
    engine.register_fn("console_warn", move |value: Dynamic| {
        log::warn!("[GUEST {}] {}", prefix, value);
    });

    let prefix = label.to_string();
    let g = globals.clone();
    engine.register_fn("console_error", move |value: Dynamic| {
        let message = message_of(&value);
        log::error!("[GUEST {}] {}", prefix, message);
        lock(&g).logged_errors.push(message);
    });
}

fn register_timers(engine: &mut Engine, globals: &SharedGlobals) {
    let g = globals.clone();
    engine.register_fn("set_timeout", move |func: FnPtr, delay: i64| -> RhaiResult<i64> {
        lock(&g).add_timer(func, delay, false)
    });

    let g = globals.clone();
    engine.register_fn("set_interval", move |func: FnPtr, delay: i64| -> RhaiResult<i64> {
        lock(&g).add_timer(func, delay, true)
    });

    let g = globals.clone();
    engine.register_fn("clear_timer", move |id: i64| -> bool { lock(&g).clear_timer(id) });
}

fn register_store(engine: &mut Engine, globals: &SharedGlobals) {
    let g = globals.clone();
    engine.register_fn("global_get", move |key: ImmutableString| -> Dynamic {
        lock(&g).store.get(key.as_str()).cloned().unwrap_or(Dynamic::UNIT)
    });

    let g = globals.clone();
    engine.register_fn("global_set", move |key: ImmutableString, value: Dynamic| {
        lock(&g).store.insert(key.as_str().into(), value);
    });

    let g = globals.clone();
    engine.register_fn("global_has", move |key: ImmutableString| -> bool {
        lock(&g).store.contains_key(key.as_str())
    });
}
