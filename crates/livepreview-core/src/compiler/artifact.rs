//! Compiled artifacts.

use crate::protocol::ArtifactId;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Whether an artifact came from a successful compilation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArtifactKind {
    Valid,
    /// Synthetic stand-in for source that failed to compile. Evaluating it
    /// only reports `message` through the guest's error log.
    Diagnostic { message: String },
}

/// Executable text derived from one settled revision of the source.
///
/// Always safe to hand to a guest: invalid source produces a diagnostic
/// artifact rather than no artifact.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledArtifact {
    pub id: ArtifactId,
    pub code: String,
    #[serde(flatten)]
    pub kind: ArtifactKind,
}

impl CompiledArtifact {
    pub fn valid(id: ArtifactId, code: String) -> Self {
        Self {
            id,
            code,
            kind: ArtifactKind::Valid,
        }
    }

    /// Build the synthetic artifact for a compile failure.
    pub fn diagnostic(id: ArtifactId, message: impl Into<String>) -> Self {
        let message = message.into();
        let code = format!("console_error({});\n", rhai_string_literal(&message));
        Self {
            id,
            code,
            kind: ArtifactKind::Diagnostic { message },
        }
    }

    pub fn is_diagnostic(&self) -> bool {
        matches!(self.kind, ArtifactKind::Diagnostic { .. })
    }

    /// The compiler message, for diagnostic artifacts.
    pub fn diagnostic_message(&self) -> Option<&str> {
        match &self.kind {
            ArtifactKind::Diagnostic { message } => Some(message),
            ArtifactKind::Valid => None,
        }
    }
}

/// Quote `text` as a double-quoted Rhai string literal.
pub fn rhai_string_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_literal_escapes() {
        assert_eq!(rhai_string_literal("plain"), "\"plain\"");
        assert_eq!(rhai_string_literal("a \"b\"\n\\"), "\"a \\\"b\\\"\\n\\\\\"");
        assert_eq!(rhai_string_literal("\u{1}"), "\"\\u0001\"");
    }

    #[test]
    fn test_string_literal_parses_back() {
        let engine = rhai::Engine::new();
        let original = "line one\nsays \"hi\"\t\\ done";
        let parsed: String = engine.eval(&rhai_string_literal(original)).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_diagnostic_artifact_never_contains_raw_source() {
        let artifact = CompiledArtifact::diagnostic(ArtifactId::new(1), "Unexpected '}' (line 2, position 1)");
        assert!(artifact.is_diagnostic());
        assert!(artifact.code.starts_with("console_error(\""));
        assert_eq!(
            artifact.diagnostic_message(),
            Some("Unexpected '}' (line 2, position 1)")
        );
    }
}
