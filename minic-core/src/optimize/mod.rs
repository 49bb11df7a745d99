//! IR optimization passes.
//!
//! Passes run in a fixed order (constant folding, dead code
//! elimination, inlining) and each can be switched off on its own.
//! When inlining changes anything, folding and dead code elimination
//! get one more round so the substituted bodies are cleaned up too.

pub mod dce;
pub mod fold;
pub mod inline;

use std::collections::HashSet;

use crate::diagnostic::{Diagnostic, DiagnosticKind, Diagnostics};
use crate::ir::IrProgram;

pub use dce::eliminate_dead_code;
pub use fold::ConstantFolder;
pub use inline::inline_calls;

/// How folding treats `int` arithmetic that overflows 32 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Two's complement wraparound, exactly like the target's `i32` ops.
    #[default]
    Wrapping,
    /// Leave the expression for run time and report a warning.
    Preserve,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimizeOptions {
    pub constant_folding: bool,
    pub dead_code_elimination: bool,
    pub inlining: bool,
    /// Largest callee body, in expression nodes, that may be inlined.
    pub inline_threshold: usize,
    pub overflow: OverflowPolicy,
}

impl Default for OptimizeOptions {
    fn default() -> Self {
        OptimizeOptions {
            constant_folding: true,
            dead_code_elimination: true,
            inlining: true,
            inline_threshold: 12,
            overflow: OverflowPolicy::Wrapping,
        }
    }
}

impl OptimizeOptions {
    /// Every pass disabled.
    pub fn none() -> Self {
        OptimizeOptions {
            constant_folding: false,
            dead_code_elimination: false,
            inlining: false,
            ..OptimizeOptions::default()
        }
    }
}

/// What the passes changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptimizeStats {
    pub folded: usize,
    pub removed: usize,
    pub inlined: usize,
}

pub fn optimize(
    program: &mut IrProgram,
    options: &OptimizeOptions,
    sink: &Diagnostics,
) -> OptimizeStats {
    let mut stats = OptimizeStats::default();
    let mut overflows = HashSet::new();
    run_cleanup(program, options, sink, &mut overflows, &mut stats);

    if options.inlining {
        stats.inlined = inline_calls(program, options.inline_threshold);
        if stats.inlined > 0 {
            tracing::debug!(inlined = stats.inlined, "re-running cleanup after inlining");
            run_cleanup(program, options, sink, &mut overflows, &mut stats);
        }
    }

    tracing::debug!(
        folded = stats.folded,
        removed = stats.removed,
        inlined = stats.inlined,
        "optimization finished"
    );
    stats
}

/// `overflows` remembers what was already reported, since a preserved
/// expression overflows again on every later folding round.
fn run_cleanup(
    program: &mut IrProgram,
    options: &OptimizeOptions,
    sink: &Diagnostics,
    overflows: &mut HashSet<(String, String)>,
    stats: &mut OptimizeStats,
) {
    if options.constant_folding {
        for function in program.functions.values_mut() {
            let mut folder = ConstantFolder::new(options.overflow);
            folder.fold_function(function);
            stats.folded += folder.folded;
            for message in folder.overflows {
                if !overflows.insert((function.name.clone(), message.clone())) {
                    continue;
                }
                sink.push(Diagnostic::new(
                    DiagnosticKind::ConstantOverflow,
                    format!("in `{}`: {message}", function.name),
                    function.line,
                    function.column,
                ));
            }
        }
    }
    if options.dead_code_elimination {
        for function in program.functions.values_mut() {
            stats.removed += eliminate_dead_code(function);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Op;
    use crate::lower::lower;
    use crate::parser::parse_source;
    use crate::typecheck::analyze;

    fn lowered(source: &str) -> IrProgram {
        let program = parse_source(source).program.expect("parse");
        assert!(analyze(&program).is_clean());
        lower(&program).expect("lower")
    }

    fn optimized(source: &str, options: &OptimizeOptions) -> (IrProgram, Vec<Diagnostic>) {
        let mut ir = lowered(source);
        let sink = Diagnostics::new();
        optimize(&mut ir, options, &sink);
        (ir, sink.drain())
    }

    #[test]
    fn unread_chain_of_assignments_disappears() {
        let source = "main() { x = 10; y = x; }";
        let (before, _) = optimized(source, &OptimizeOptions::none());
        assert_eq!(before.functions["main"].op_count(), 2);
        let (after, _) = optimized(source, &OptimizeOptions::default());
        assert_eq!(after.functions["main"].op_count(), 0);
    }

    #[test]
    fn assignment_read_by_return_survives() {
        let options = OptimizeOptions {
            constant_folding: false,
            inlining: false,
            ..OptimizeOptions::default()
        };
        let (ir, _) = optimized("main() { x = 10; return x; }", &options);
        let main = &ir.functions["main"];
        assert_eq!(main.op_count(), 2);
        assert!(matches!(main.ops[0], Op::Assign { local: 0, .. }));
    }

    #[test]
    fn inlining_exposes_more_folding() {
        let source = "sq(int n) { return n * n; } main() { return sq(3) + 1; }";
        let (ir, _) = optimized(source, &OptimizeOptions::default());
        assert_eq!(render(&ir.functions["main"].ops[0]), "return 10");
    }

    #[test]
    fn preserve_policy_warns_and_keeps_the_expression() {
        let options = OptimizeOptions {
            overflow: OverflowPolicy::Preserve,
            ..OptimizeOptions::default()
        };
        let (ir, diagnostics) = optimized("main() { return 2147483647 + 1; }", &options);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::ConstantOverflow);
        assert!(!diagnostics[0].is_error());
        assert_eq!(
            render(&ir.functions["main"].ops[0]),
            "return (2147483647 + 1)"
        );

        let (wrapped, diagnostics) =
            optimized("main() { return 2147483647 + 1; }", &OptimizeOptions::default());
        assert!(diagnostics.is_empty());
        assert_eq!(
            render(&wrapped.functions["main"].ops[0]),
            "return -2147483648"
        );
    }

    #[test]
    fn overflow_is_reported_once_across_cleanup_rounds() {
        let options = OptimizeOptions {
            overflow: OverflowPolicy::Preserve,
            ..OptimizeOptions::default()
        };
        let source = "one() { return 1; } main() { x = 2147483647 + 1; return x + one(); }";
        let (ir, diagnostics) = optimized(source, &options);
        let overflows: Vec<_> = diagnostics
            .iter()
            .filter(|d| d.kind == DiagnosticKind::ConstantOverflow)
            .collect();
        assert_eq!(overflows.len(), 1, "{diagnostics:?}");
        assert!(overflows[0].message.contains("in `main`"));
        assert_eq!(
            render(ir.functions["main"].ops.last().expect("return")),
            "return (%0 + 1)"
        );
    }

    fn render(op: &Op) -> String {
        let function = crate::ir::IrFunction {
            name: "t".into(),
            params: Vec::new(),
            locals: Vec::new(),
            return_type: crate::types::Type::Void,
            ops: vec![op.clone()],
            line: 0,
            column: 0,
        };
        let text = function.to_string();
        text.lines().nth(1).unwrap_or_default().trim().to_string()
    }
}
