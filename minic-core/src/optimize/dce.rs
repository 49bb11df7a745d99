//! Dead code elimination.
//!
//! Removes assignments to locals that are never read, pure expression
//! statements, branches whose condition is a constant, `while (false)`
//! loops and anything after a `return`, `break` or `continue` in the
//! same list. Removal can
//! make earlier assignments dead in turn, so the pass repeats until
//! nothing changes.

use std::collections::HashSet;

use crate::ast::Literal;
use crate::ir::{IrExprKind, IrFunction, LocalId, Op, visit_ops};

/// Returns how many operations were removed or rewritten.
pub fn eliminate_dead_code(function: &mut IrFunction) -> usize {
    let mut changes = 0;
    loop {
        let pruned = prune_control_flow(&mut function.ops);
        let read = read_locals(&function.ops);
        let swept = sweep_assignments(&mut function.ops, &read);
        if pruned + swept == 0 {
            break;
        }
        changes += pruned + swept;
    }
    changes
}

fn prune_control_flow(ops: &mut Vec<Op>) -> usize {
    let mut changes = 0;
    let mut kept = Vec::with_capacity(ops.len());
    let mut remaining = std::mem::take(ops).into_iter();

    while let Some(mut op) = remaining.next() {
        for nested in op.children_mut() {
            changes += prune_control_flow(nested);
        }
        match op {
            Op::If {
                condition,
                then_ops,
                else_ops,
            } if condition.as_const().is_some() => {
                changes += 1;
                if condition.as_const() == Some(&Literal::Bool(true)) {
                    kept.extend(then_ops);
                } else {
                    kept.extend(else_ops);
                }
            }
            Op::If {
                condition,
                then_ops,
                else_ops,
            } if then_ops.is_empty() && else_ops.is_empty() => {
                changes += 1;
                if condition.has_side_effects() {
                    kept.push(Op::Eval(condition));
                }
            }
            Op::While { condition, .. }
                if condition.as_const() == Some(&Literal::Bool(false)) =>
            {
                changes += 1;
            }
            Op::Eval(expr) if !expr.has_side_effects() => changes += 1,
            Op::Return(_) | Op::Break | Op::Continue => {
                kept.push(op);
                changes += remaining.len();
                break;
            }
            other => kept.push(other),
        }
    }

    *ops = kept;
    changes
}

fn read_locals(ops: &[Op]) -> HashSet<LocalId> {
    let mut read = HashSet::new();
    visit_ops(ops, &mut |expr| {
        if let IrExprKind::Local(id) = expr.kind {
            read.insert(id);
        }
    });
    read
}

fn sweep_assignments(ops: &mut Vec<Op>, read: &HashSet<LocalId>) -> usize {
    let mut changes = 0;
    let mut kept = Vec::with_capacity(ops.len());
    for mut op in ops.drain(..) {
        for nested in op.children_mut() {
            changes += sweep_assignments(nested, read);
        }
        match op {
            Op::Assign { local, value } if !read.contains(&local) => {
                changes += 1;
                if value.has_side_effects() {
                    kept.push(Op::Eval(value));
                }
            }
            other => kept.push(other),
        }
    }
    *ops = kept;
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::BinaryOp;
    use crate::ir::{IrExpr, IrLocal};
    use crate::types::Type;

    fn int(value: i32) -> IrExpr {
        IrExpr::constant(Literal::Int(value), Type::Int)
    }

    fn boolean(value: bool) -> IrExpr {
        IrExpr::constant(Literal::Bool(value), Type::Bool)
    }

    fn local(id: LocalId) -> IrExpr {
        IrExpr::new(IrExprKind::Local(id), Type::Int)
    }

    fn call(name: &str) -> IrExpr {
        IrExpr::new(
            IrExprKind::Call {
                callee: name.to_string(),
                args: Vec::new(),
            },
            Type::Int,
        )
    }

    fn function(ops: Vec<Op>) -> IrFunction {
        IrFunction {
            name: "main".into(),
            params: Vec::new(),
            locals: (0..4)
                .map(|i| IrLocal {
                    name: format!("v{i}"),
                    ty: Type::Int,
                })
                .collect(),
            return_type: Type::Int,
            ops,
            line: 1,
            column: 1,
        }
    }

    #[test]
    fn removes_unread_assignments_transitively() {
        let mut f = function(vec![
            Op::Assign { local: 0, value: int(10) },
            Op::Assign { local: 1, value: local(0) },
        ]);
        assert_eq!(eliminate_dead_code(&mut f), 2);
        assert!(f.ops.is_empty());
    }

    #[test]
    fn keeps_assignment_read_later() {
        let ops = vec![
            Op::Assign { local: 0, value: int(10) },
            Op::Return(Some(local(0))),
        ];
        let mut f = function(ops.clone());
        assert_eq!(eliminate_dead_code(&mut f), 0);
        assert_eq!(f.ops, ops);
    }

    #[test]
    fn keeps_side_effects_of_dead_assignments() {
        let mut f = function(vec![Op::Assign { local: 0, value: call("tick") }]);
        eliminate_dead_code(&mut f);
        assert_eq!(f.ops, vec![Op::Eval(call("tick"))]);
    }

    #[test]
    fn loop_carried_values_stay_live() {
        let increment = IrExpr::new(
            IrExprKind::Binary {
                op: BinaryOp::Add,
                lhs: Box::new(local(0)),
                rhs: Box::new(int(1)),
            },
            Type::Int,
        );
        let condition = IrExpr::new(
            IrExprKind::Binary {
                op: BinaryOp::Lt,
                lhs: Box::new(local(0)),
                rhs: Box::new(int(3)),
            },
            Type::Bool,
        );
        let ops = vec![
            Op::Assign { local: 0, value: int(0) },
            Op::While {
                condition,
                body: Vec::new(),
                step: vec![Op::Assign { local: 0, value: increment }],
            },
            Op::Return(Some(int(0))),
        ];
        let mut f = function(ops.clone());
        assert_eq!(eliminate_dead_code(&mut f), 0);
        assert_eq!(f.ops, ops);
    }

    #[test]
    fn prunes_constant_branches_and_dead_loops() {
        let mut f = function(vec![
            Op::If {
                condition: boolean(false),
                then_ops: vec![Op::Eval(call("never"))],
                else_ops: vec![Op::Eval(call("always"))],
            },
            Op::While {
                condition: boolean(false),
                body: vec![Op::Eval(call("never"))],
                step: Vec::new(),
            },
            Op::Return(Some(int(1))),
        ]);
        eliminate_dead_code(&mut f);
        assert_eq!(
            f.ops,
            vec![Op::Eval(call("always")), Op::Return(Some(int(1)))]
        );
    }

    #[test]
    fn drops_everything_after_return() {
        let mut f = function(vec![
            Op::If {
                condition: boolean(true),
                then_ops: vec![Op::Return(Some(int(1)))],
                else_ops: Vec::new(),
            },
            Op::Eval(call("unreachable")),
            Op::Return(Some(int(2))),
        ]);
        eliminate_dead_code(&mut f);
        assert_eq!(f.ops, vec![Op::Return(Some(int(1)))]);
    }

    #[test]
    fn loop_control_ends_its_list() {
        let mut f = function(vec![
            Op::While {
                condition: boolean(true),
                body: vec![
                    Op::If {
                        condition: boolean(true),
                        then_ops: vec![Op::Continue, Op::Eval(call("skipped"))],
                        else_ops: Vec::new(),
                    },
                    Op::Eval(call("unreachable")),
                ],
                step: vec![Op::Eval(call("tick"))],
            },
            Op::Eval(call("after")),
        ]);
        eliminate_dead_code(&mut f);
        assert_eq!(
            f.ops,
            vec![
                Op::While {
                    condition: boolean(true),
                    body: vec![Op::Continue],
                    step: vec![Op::Eval(call("tick"))],
                },
                Op::Eval(call("after")),
            ]
        );
    }

    #[test]
    fn second_run_changes_nothing() {
        let mut f = function(vec![
            Op::Assign { local: 0, value: int(1) },
            Op::Assign { local: 1, value: call("tick") },
            Op::If {
                condition: boolean(true),
                then_ops: vec![Op::Assign { local: 2, value: local(0) }],
                else_ops: Vec::new(),
            },
            Op::Return(Some(local(2))),
        ]);
        eliminate_dead_code(&mut f);
        let once = f.clone();
        assert_eq!(eliminate_dead_code(&mut f), 0);
        assert_eq!(f, once);
    }
}
