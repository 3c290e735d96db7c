//! Restricted Rhai engine construction.

use crate::config::SandboxLimits;
use rhai::module_resolvers::DummyModuleResolver;
use rhai::Engine;

/// Create an engine with resource limits applied, imports and `eval`
/// disabled, and `print`/`debug` routed to the log.
///
/// `label` prefixes log lines so output from different guests can be told
/// apart. No preview bindings are installed here.
pub fn create_engine(limits: &SandboxLimits, label: &str) -> Engine {
    let mut engine = Engine::new();

    engine.set_max_operations(limits.max_operations);
    engine.set_max_call_levels(limits.max_call_levels);
    engine.set_max_expr_depths(limits.max_expr_depth, limits.max_expr_depth);
    engine.set_max_string_size(limits.max_string_size);
    engine.set_max_array_size(limits.max_array_size);
    engine.set_max_map_size(limits.max_map_size);

    engine.set_module_resolver(DummyModuleResolver::new());
    engine.disable_symbol("eval");

    let print_label = label.to_string();
    engine.on_print(move |text| {
        log::info!("[GUEST {}] {}", print_label, text);
    });

    let debug_label = label.to_string();
    engine.on_debug(move |text, source, pos| {
        let loc = match (source, pos) {
            (Some(src), pos) if !pos.is_none() => format!(" ({}:{})", src, pos),
            (Some(src), _) => format!(" ({})", src),
            (None, pos) if !pos.is_none() => format!(" ({})", pos),
            _ => String::new(),
        };
        log::debug!("[GUEST {}]{} {}", debug_label, loc, text);
    });

    engine
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_imports_fail() {
        let engine = create_engine(&SandboxLimits::default(), "test");
        let result = engine.run(r#"import "fs" as fs;"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_eval_is_disabled() {
        let engine = create_engine(&SandboxLimits::default(), "test");
        assert!(engine.compile(r#"eval("1 + 1")"#).is_err());
    }

    #[test]
    fn test_operation_limit() {
        let limits = SandboxLimits {
            max_operations: 1_000,
            ..SandboxLimits::default()
        };
        let engine = create_engine(&limits, "test");
        let err = engine.run("loop { }").unwrap_err();
        assert!(err.to_string().contains("Too many operations"), "{}", err);
    }

    #[test]
    fn test_string_limit() {
        let limits = SandboxLimits {
            max_string_size: 8,
            ..SandboxLimits::default()
        };
        let engine = create_engine(&limits, "test");
        assert!(engine.run(r#"let s = "0123456789abcdef";"#).is_err());
    }
}
