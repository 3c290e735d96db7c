//! One-shot source checking.
//!
//! Compiles a source file and evaluates it once in a throwaway guest on the
//! calling thread, without starting the preview runtime. Used by the CLI
//! `check` command.

use crate::compiler::{CompileError, Transpiler};
use crate::config::SandboxLimits;
use crate::guest::{CycleOutcome, GuestRuntime};
use crate::protocol::{ArtifactId, ErrorOrigin, Frame, Generation};

/// Result of checking one source text.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Markup and syntax errors.
    pub compile_errors: Vec<ValidationError>,
    /// Errors thrown or logged while evaluating.
    pub runtime_errors: Vec<ValidationError>,
    /// What the source rendered, if it compiled.
    pub frame: Option<Frame>,
    /// The lowered script, if it compiled.
    pub lowered: Option<String>,
}

impl ValidationResult {
    /// Check if the validation passed (no errors).
    pub fn is_ok(&self) -> bool {
        self.compile_errors.is_empty() && self.runtime_errors.is_empty()
    }

    /// Get all errors combined.
    pub fn all_errors(&self) -> Vec<&ValidationError> {
        self.compile_errors
            .iter()
            .chain(self.runtime_errors.iter())
            .collect()
    }
}

/// An error found during validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub message: String,
    /// Line number (1-based).
    pub line: Option<usize>,
    /// Column number (1-based).
    pub column: Option<usize>,
    /// How a runtime error surfaced; `None` for compile errors.
    pub origin: Option<ErrorOrigin>,
}

impl From<CompileError> for ValidationError {
    fn from(err: CompileError) -> Self {
        Self {
            message: err.message,
            line: err.line,
            column: err.column,
            origin: None,
        }
    }
}

/// Compile and evaluate `content` once.
pub fn validate_source(content: &str, limits: &SandboxLimits) -> ValidationResult {
    let mut result = ValidationResult::default();

    let lowered = match Transpiler::new(limits).transpile(content) {
        Ok(lowered) => lowered,
        Err(err) => {
            result.compile_errors.push(err.into());
            return result;
        }
    };

    let mut guest = GuestRuntime::new(Generation::first(), limits);
    match guest.execute(ArtifactId::new(1), &lowered) {
        CycleOutcome::Ready { frame } => result.frame = Some(frame),
        CycleOutcome::Failed {
            message,
            origin,
            frame,
        } => {
            result.runtime_errors.push(ValidationError {
                message,
                line: None,
                column: None,
                origin: Some(origin),
            });
            result.frame = Some(frame);
        }
    }
    guest.retire();

    result.lowered = Some(lowered);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validate(content: &str) -> ValidationResult {
        validate_source(content, &SandboxLimits::default())
    }

    #[test]
    fn test_validate_empty_source() {
        let result = validate("");
        assert!(result.is_ok());
        assert_eq!(result.frame, Some(Frame::default()));
    }

    #[test]
    fn test_validate_renders_frame() {
        let result = validate("render(<ul><li>a</li></ul>);");
        assert!(result.is_ok());
        assert_eq!(result.frame.map(|f| f.html), Some("<ul><li>a</li></ul>".to_string()));
        assert!(result.lowered.is_some());
    }

    #[test]
    fn test_validate_markup_error_has_position() {
        let result = validate("let x = 1;\nrender(<div>);");
        assert!(!result.is_ok());
        let err = &result.compile_errors[0];
        assert!(err.message.contains("Unterminated element <div>"));
        assert_eq!(err.line, Some(2));
        assert!(result.frame.is_none());
    }

    #[test]
    fn test_validate_syntax_error() {
        let result = validate("let x = ;");
        assert_eq!(result.compile_errors.len(), 1);
        assert!(result.runtime_errors.is_empty());
    }

    #[test]
    fn test_validate_thrown_error() {
        let result = validate(r#"throw "boom";"#);
        assert_eq!(result.all_errors().len(), 1);
        assert_eq!(result.runtime_errors[0].message, "boom");
        assert_eq!(result.runtime_errors[0].origin, Some(ErrorOrigin::Thrown));
    }

    #[test]
    fn test_validate_undefined_variable() {
        let result = validate("render(text(undefined_var));");
        assert!(!result.runtime_errors.is_empty());
    }
}
