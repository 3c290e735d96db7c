//! Compilation pipeline.
//!
//! Turns raw, possibly half-typed source text into a [`CompiledArtifact`].
//! Edits are debounced so a burst of keystrokes compiles once, and compile
//! failures never escape: they become diagnostic artifacts that report the
//! message from inside the guest.

pub mod artifact;
pub mod debounce;
pub mod markup;

pub use artifact::{ArtifactKind, CompiledArtifact};
pub use debounce::Debouncer;
pub use markup::CompileError;

use crate::config::SandboxLimits;
use crate::guest::engine::create_engine;
use crate::protocol::ArtifactId;
use rhai::{Engine, ParseError};
use std::time::{Duration, Instant};

/// Markup lowering followed by a Rhai syntax check.
pub struct Transpiler {
    engine: Engine,
    max_depth: usize,
}

impl Transpiler {
    /// The syntax check uses the same limits and disabled symbols as the
    /// guest, so anything accepted here also parses there.
    pub fn new(limits: &SandboxLimits) -> Self {
        Self {
            engine: create_engine(limits, "check"),
            max_depth: limits.max_render_depth,
        }
    }

    pub fn transpile(&self, source: &str) -> Result<String, CompileError> {
        let lowered = markup::lower(source, self.max_depth)?;
        self.engine
            .compile(&lowered)
            .map_err(|err| from_parse_error(&err))?;
        Ok(lowered)
    }
}

fn from_parse_error(err: &ParseError) -> CompileError {
    let message = err.err_type().to_string();
    let position = err.position();
    match (position.line(), position.position()) {
        (Some(line), Some(column)) => CompileError::at(message, line, column),
        (Some(line), None) => CompileError {
            message,
            line: Some(line),
            column: None,
        },
        _ => CompileError::new(message),
    }
}

/// Debounced source → artifact pipeline, driven by the host loop.
pub struct CompilationPipeline {
    debouncer: Debouncer<String>,
    transpiler: Transpiler,
    next_id: u64,
    compilations: u64,
}

impl CompilationPipeline {
    pub fn new(window: Duration, limits: &SandboxLimits) -> Self {
        Self {
            debouncer: Debouncer::new(window),
            transpiler: Transpiler::new(limits),
            next_id: 1,
            compilations: 0,
        }
    }

    /// Record an edit. Any not-yet-fired compilation is superseded.
    pub fn on_source_changed(&mut self, text: String, now: Instant) {
        if self.debouncer.is_pending() {
            log::trace!("[PIPELINE] Edit supersedes pending compilation");
        }
        self.debouncer.push(text, now);
    }

    /// Compile the settled text once the quiescence window has passed.
    pub fn poll(&mut self, now: Instant) -> Option<CompiledArtifact> {
        let text = self.debouncer.poll(now)?;
        Some(self.compile(&text))
    }

    /// Compile immediately, dropping any pending debounced edit.
    pub fn compile_now(&mut self, text: &str) -> CompiledArtifact {
        self.debouncer.cancel();
        self.compile(text)
    }

    /// When the next pending compilation becomes due.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.debouncer.deadline()
    }

    pub fn is_pending(&self) -> bool {
        self.debouncer.is_pending()
    }

    /// Number of artifacts produced so far.
    pub fn compile_count(&self) -> u64 {
        self.compilations
    }

    fn compile(&mut self, text: &str) -> CompiledArtifact {
        let id = ArtifactId::new(self.next_id);
        self.next_id += 1;
        self.compilations += 1;

        match self.transpiler.transpile(text) {
            Ok(code) => {
                log::debug!("[PIPELINE] Compiled {} ({} bytes)", id, code.len());
                CompiledArtifact::valid(id, code)
            }
            Err(err) => {
                log::info!("[PIPELINE] Compile error in {}: {}", id, err);
                CompiledArtifact::diagnostic(id, err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline() -> CompilationPipeline {
        CompilationPipeline::new(Duration::from_millis(300), &SandboxLimits::default())
    }

    #[test]
    fn test_burst_compiles_once_with_last_text() {
        let mut pipeline = pipeline();
        let start = Instant::now();
        for i in 0..10u64 {
            let now = start + Duration::from_millis(i * 50);
            pipeline.on_source_changed(format!("let x = {};", i), now);
            assert!(pipeline.poll(now).is_none());
        }

        let settled = start + Duration::from_millis(450 + 300);
        let artifact = pipeline.poll(settled).unwrap();
        assert_eq!(artifact.code, "let x = 9;");
        assert_eq!(pipeline.compile_count(), 1);
        assert!(pipeline.poll(settled + Duration::from_secs(1)).is_none());
    }

    #[test]
    fn test_invalid_source_becomes_diagnostic() {
        let mut pipeline = pipeline();
        let artifact = pipeline.compile_now("render(<div>oops</span>);");
        assert!(artifact.is_diagnostic());
        let message = artifact.diagnostic_message().unwrap();
        assert!(message.contains("Mismatched closing tag"));
        assert!(!artifact.code.contains("render("));
    }

    #[test]
    fn test_rhai_syntax_error_keeps_author_line() {
        let mut pipeline = pipeline();
        let artifact = pipeline.compile_now("let a = <div\n  id=\"x\"\n/>;\nlet = 5;");
        let message = artifact.diagnostic_message().unwrap();
        assert!(message.contains("(line 4,"), "{}", message);
    }

    #[test]
    fn test_ids_increase() {
        let mut pipeline = pipeline();
        let a = pipeline.compile_now("1");
        let b = pipeline.compile_now("}{");
        assert!(b.id > a.id);
        assert!(!a.is_diagnostic());
        assert!(b.is_diagnostic());
    }

    #[test]
    fn test_compile_now_cancels_pending() {
        let mut pipeline = pipeline();
        let start = Instant::now();
        pipeline.on_source_changed("1".to_string(), start);
        pipeline.compile_now("2");
        assert!(pipeline.next_deadline().is_none());
        assert!(pipeline.poll(start + Duration::from_secs(5)).is_none());
    }

    #[test]
    fn test_lowered_markup_passes_syntax_check() {
        let transpiler = Transpiler::new(&SandboxLimits::default());
        let source = r#"
fn Card(props) {
    <section class="card">
        <h2>{props.title}</h2>
        {props.children}
    </section>
}

let items = [1, 2, 3];
render(<Card title="List">
    <ul>{items.map(|i| <li>{i}</li>)}</ul>
    {if items.len() > 2 { <b>many</b> } else { () }}
</Card>);
"#;
        let code = transpiler.transpile(source).unwrap();
        assert!(code.contains(r#"el("section", #{"class": "card"}"#));
        assert!(code.contains(r#"Card(#{"title": "List", "children": ["#));
    }
}
