//! Function inlining.
//!
//! A callee qualifies when its body is a single `return expr;` no larger
//! than the threshold and it takes no part in any call-graph cycle.
//! A call site is rewritten only when every argument is free of side
//! effects, since arguments may be duplicated or dropped.
//!
//! Calls inside a callee's body are expanded first, once per callee, and
//! the expanded body must still fit the threshold. Work and output stay
//! linear in the length of a call chain.

use std::collections::{HashMap, HashSet};

use crate::ir::{IrExpr, IrExprKind, IrProgram, Op, visit_ops};

struct Candidate {
    body: IrExpr,
}

/// Returns the number of call sites replaced.
pub fn inline_calls(program: &mut IrProgram, threshold: usize) -> usize {
    let recursive = recursive_functions(program);
    let candidates: HashMap<String, Candidate> = program
        .functions
        .values()
        .filter(|function| !function.is_init() && !recursive.contains(&function.name))
        .filter_map(|function| match function.ops.as_slice() {
            [Op::Return(Some(body))] if body.size() <= threshold => Some((
                function.name.clone(),
                Candidate { body: body.clone() },
            )),
            _ => None,
        })
        .collect();
    if candidates.is_empty() {
        return 0;
    }

    let mut inlined = 0;
    let mut expansions = HashMap::new();
    for function in program.functions.values_mut() {
        let mut inliner = Inliner {
            candidates: &candidates,
            expansions: &mut expansions,
            threshold,
            inlined: 0,
        };
        inliner.rewrite_ops(&mut function.ops);
        if inliner.inlined > 0 {
            tracing::debug!(function = %function.name, calls = inliner.inlined, "inlined calls");
        }
        inlined += inliner.inlined;
    }
    inlined
}

struct Inliner<'a> {
    candidates: &'a HashMap<String, Candidate>,
    /// Expanded callee bodies; `None` when the expansion is too large.
    expansions: &'a mut HashMap<String, Option<IrExpr>>,
    threshold: usize,
    inlined: usize,
}

impl Inliner<'_> {
    fn rewrite_ops(&mut self, ops: &mut [Op]) {
        for op in ops {
            for expr in op.exprs_mut() {
                self.rewrite(expr);
            }
            for nested in op.children_mut() {
                self.rewrite_ops(nested);
            }
        }
    }

    fn rewrite(&mut self, expr: &mut IrExpr) {
        for child in expr.children_mut() {
            self.rewrite(child);
        }
        let IrExprKind::Call { callee, args } = &expr.kind else {
            return;
        };
        if args.iter().any(IrExpr::has_side_effects) {
            return;
        }
        let Some(mut body) = self.expansion(callee) else {
            return;
        };
        substitute(&mut body, args);
        self.inlined += 1;
        *expr = body;
    }

    fn expansion(&mut self, callee: &str) -> Option<IrExpr> {
        if let Some(cached) = self.expansions.get(callee) {
            return cached.clone();
        }
        let mut body = self.candidates.get(callee)?.body.clone();
        // Nested candidates cannot lead back here, so this terminates.
        let before = self.inlined;
        self.rewrite(&mut body);
        self.inlined = before;
        let expanded = (body.size() <= self.threshold).then_some(body);
        self.expansions.insert(callee.to_string(), expanded.clone());
        expanded
    }
}

/// Replace parameter reads with the matching argument.
fn substitute(expr: &mut IrExpr, args: &[IrExpr]) {
    if let IrExprKind::Local(id) = expr.kind {
        if let Some(arg) = args.get(id as usize) {
            *expr = arg.clone();
        }
        return;
    }
    for child in expr.children_mut() {
        substitute(child, args);
    }
}

/// Functions that can reach themselves through calls.
fn recursive_functions(program: &IrProgram) -> HashSet<String> {
    let graph: HashMap<&str, HashSet<&str>> = program
        .functions
        .values()
        .map(|function| {
            let mut callees = HashSet::new();
            visit_ops(&function.ops, &mut |expr| {
                if let IrExprKind::Call { callee, .. } = &expr.kind {
                    callees.insert(callee.as_str());
                }
            });
            (function.name.as_str(), callees)
        })
        .collect();

    graph
        .keys()
        .filter(|&&start| {
            let mut seen = HashSet::new();
            let mut stack: Vec<&str> = graph[start].iter().copied().collect();
            while let Some(name) = stack.pop() {
                if name == start {
                    return true;
                }
                if seen.insert(name) {
                    if let Some(next) = graph.get(name) {
                        stack.extend(next.iter().copied());
                    }
                }
            }
            false
        })
        .map(|name| name.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lower::lower;
    use crate::parser::parse_source;
    use crate::typecheck::analyze;

    fn lowered(source: &str) -> IrProgram {
        let program = parse_source(source).program.expect("parse");
        assert!(analyze(&program).is_clean());
        lower(&program).expect("lower")
    }

    fn returned(program: &IrProgram, function: &str) -> String {
        match &program.functions[function].ops[..] {
            [.., Op::Return(Some(value))] => value.to_string(),
            other => panic!("no trailing return in {other:?}"),
        }
    }

    #[test]
    fn substitutes_arguments_for_parameters() {
        let mut ir = lowered("add(a, b) { return a + b; } main() { x = 4; return add(x, 2); }");
        assert_eq!(inline_calls(&mut ir, 12), 1);
        assert_eq!(returned(&ir, "main"), "(%0 + 2)");
    }

    #[test]
    fn inlines_through_chains_of_candidates() {
        let source = "twice(y) { return y * 2; } bump(x) { return twice(x) + 1; } \
                      main() { return bump(5); }";
        let mut ir = lowered(source);
        inline_calls(&mut ir, 12);
        assert_eq!(returned(&ir, "main"), "((5 * 2) + 1)");
    }

    #[test]
    fn refuses_self_recursion() {
        let source = "fact(n) { return n * fact(n - 1); } main() { return fact(3); }";
        let mut ir = lowered(source);
        assert_eq!(inline_calls(&mut ir, 100), 0);
        assert_eq!(returned(&ir, "main"), "fact(3)");
    }

    #[test]
    fn refuses_mutual_recursion() {
        let source = "bool even(int n) { return n == 0 || odd(n - 1); } \
                      bool odd(int n) { return n != 0 && even(n - 1); } \
                      bool main() { return even(4); }";
        let mut ir = lowered(source);
        assert_eq!(inline_calls(&mut ir, 100), 0);
        let recursive = recursive_functions(&ir);
        assert!(recursive.contains("even") && recursive.contains("odd"));
        assert!(!recursive.contains("main"));
    }

    #[test]
    fn refuses_side_effecting_arguments() {
        let source = "id(v) { return v; } tick() { return 1; } \
                      main() { return id(tick()) + tick(); }";
        let mut ir = lowered(source);
        // `tick` itself is inlined; `id(tick())` is then pure and inlined too.
        assert_eq!(returned(&ir, "main"), "(id(tick()) + tick())");
        inline_calls(&mut ir, 12);
        assert_eq!(returned(&ir, "main"), "(1 + 1)");

        let source = "id(v) { return v; } main() { xs = [1]; return id([2][0]) + xs[0]; }";
        let mut ir = lowered(source);
        assert_eq!(inline_calls(&mut ir, 12), 0);
    }

    #[test]
    fn respects_the_size_threshold() {
        let source = "big(a) { return a + a + a + a; } main() { return big(1); }";
        let mut ir = lowered(source);
        assert_eq!(inline_calls(&mut ir, 3), 0);
        assert_eq!(inline_calls(&mut ir, 7), 1);
    }

    #[test]
    fn nested_expansion_stays_within_the_threshold() {
        let mut source = String::from("f0(x) { return x + 1; }\n");
        for level in 1..=20 {
            let prev = level - 1;
            source.push_str(&format!("f{level}(x) {{ return f{prev}(x) + f{prev}(x); }}\n"));
        }
        source.push_str("main() { return f20(3); }");
        let mut ir = lowered(&source);

        inline_calls(&mut ir, 12);
        // Each of the two call sites per body grows by at most 12 nodes.
        for function in ir.functions.values() {
            let Some(Op::Return(Some(value))) = function.ops.last() else {
                panic!("no trailing return in {}", function.name);
            };
            assert!(value.size() <= 2 * 12 + 1, "{} grew to {}", function.name, value.size());
        }
        // f1 expands to 7 nodes; f2 would need 15, so calls to f2 stay.
        assert_eq!(
            returned(&ir, "f2"),
            "(((%0 + 1) + (%0 + 1)) + ((%0 + 1) + (%0 + 1)))"
        );
        assert_eq!(returned(&ir, "f3"), "(f2(%0) + f2(%0))");
        assert_eq!(returned(&ir, "main"), "f20(3)");
    }

    #[test]
    fn leaves_multi_statement_bodies_alone() {
        let source = "f(a) { b = a + 1; return b; } main() { return f(1); }";
        let mut ir = lowered(source);
        assert_eq!(inline_calls(&mut ir, 100), 0);
    }
}
