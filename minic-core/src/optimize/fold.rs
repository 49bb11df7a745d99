//! Constant folding.
//!
//! Operators applied to literal operands are replaced by their result,
//! bottom-up, so one walk reaches the fixed point: a parent is visited
//! only after all of its children are folded. The arithmetic is the
//! target's: `int` and `char` are 32-bit two's complement, `float` is
//! IEEE 754 binary64. Anything that would trap at run time (integer
//! division by zero, `i32::MIN / -1`) stays in place.

use crate::ast::{BinaryOp, Literal, UnaryOp};
use crate::ir::{IrExpr, IrExprKind, IrFunction, Op};

use super::OverflowPolicy;

/// Result of evaluating one operator on constants.
enum Folded {
    Value(Literal),
    /// Only under [`OverflowPolicy::Preserve`].
    Overflow,
    Unfoldable,
}

/// Constant folding driver for one function.
#[derive(Debug)]
pub struct ConstantFolder {
    policy: OverflowPolicy,
    /// Expressions replaced by a constant.
    pub folded: usize,
    /// One message per expression left alone because it overflows.
    pub overflows: Vec<String>,
}

impl ConstantFolder {
    pub fn new(policy: OverflowPolicy) -> Self {
        ConstantFolder {
            policy,
            folded: 0,
            overflows: Vec::new(),
        }
    }

    pub fn fold_function(&mut self, function: &mut IrFunction) {
        self.fold_ops(&mut function.ops);
    }

    pub fn fold_ops(&mut self, ops: &mut [Op]) {
        for op in ops {
            for expr in op.exprs_mut() {
                self.fold_expr(expr);
            }
            for nested in op.children_mut() {
                self.fold_ops(nested);
            }
        }
    }

    pub fn fold_expr(&mut self, expr: &mut IrExpr) {
        let folded = match &mut expr.kind {
            IrExprKind::Const(_) | IrExprKind::Local(_) | IrExprKind::Global(_) => return,
            IrExprKind::Unary { op, operand } => {
                self.fold_expr(operand);
                match operand.as_const() {
                    Some(value) => self.eval_unary(*op, value),
                    None => return,
                }
            }
            IrExprKind::Binary { op, lhs, rhs } => {
                self.fold_expr(lhs);
                self.fold_expr(rhs);
                match (lhs.as_const(), rhs.as_const()) {
                    (Some(left), Some(right)) => self.eval_binary(*op, left, right),
                    _ => return,
                }
            }
            IrExprKind::Load { array, index } => {
                self.fold_expr(array);
                self.fold_expr(index);
                return;
            }
            IrExprKind::Call { args, .. } | IrExprKind::ArrayNew(args) => {
                for arg in args {
                    self.fold_expr(arg);
                }
                return;
            }
        };

        match folded {
            Folded::Value(value) => {
                expr.kind = IrExprKind::Const(value);
                self.folded += 1;
            }
            Folded::Overflow => {
                self.overflows
                    .push(format!("`{expr}` overflows `int`; left for run time"));
            }
            Folded::Unfoldable => {}
        }
    }

    fn eval_unary(&self, op: UnaryOp, value: &Literal) -> Folded {
        match (op, value) {
            (UnaryOp::Neg, Literal::Int(v)) => self.int_result(v.checked_neg(), v.wrapping_neg()),
            (UnaryOp::Neg, Literal::Float(v)) => Folded::Value(Literal::Float(-v)),
            (UnaryOp::Not, Literal::Bool(v)) => Folded::Value(Literal::Bool(!v)),
            _ => Folded::Unfoldable,
        }
    }

    fn eval_binary(&self, op: BinaryOp, left: &Literal, right: &Literal) -> Folded {
        match (left, right) {
            (Literal::Int(l), Literal::Int(r)) => self.eval_int(op, *l, *r),
            (Literal::Char(l), Literal::Char(r)) => eval_char(op, *l, *r),
            (Literal::Float(l), Literal::Float(r)) => eval_float(op, *l, *r),
            (Literal::Bool(l), Literal::Bool(r)) => {
                let value = match op {
                    BinaryOp::Eq => l == r,
                    BinaryOp::Ne => l != r,
                    BinaryOp::And => *l && *r,
                    BinaryOp::Or => *l || *r,
                    _ => return Folded::Unfoldable,
                };
                Folded::Value(Literal::Bool(value))
            }
            (Literal::Str(l), Literal::Str(r)) => match op {
                BinaryOp::Eq => Folded::Value(Literal::Bool(l == r)),
                BinaryOp::Ne => Folded::Value(Literal::Bool(l != r)),
                _ => Folded::Unfoldable,
            },
            _ => Folded::Unfoldable,
        }
    }

    fn eval_int(&self, op: BinaryOp, l: i32, r: i32) -> Folded {
        let value = match op {
            BinaryOp::Add => return self.int_result(l.checked_add(r), l.wrapping_add(r)),
            BinaryOp::Sub => return self.int_result(l.checked_sub(r), l.wrapping_sub(r)),
            BinaryOp::Mul => return self.int_result(l.checked_mul(r), l.wrapping_mul(r)),
            BinaryOp::Div => {
                if r == 0 || (l == i32::MIN && r == -1) {
                    return Folded::Unfoldable;
                }
                l / r
            }
            BinaryOp::Rem => {
                if r == 0 {
                    return Folded::Unfoldable;
                }
                l.wrapping_rem(r)
            }
            BinaryOp::BitAnd => l & r,
            BinaryOp::BitOr => l | r,
            BinaryOp::BitXor => l ^ r,
            BinaryOp::Shl => l.wrapping_shl(r as u32),
            BinaryOp::Shr => l.wrapping_shr(r as u32),
            _ => return compare(op, &l, &r),
        };
        Folded::Value(Literal::Int(value))
    }

    fn int_result(&self, checked: Option<i32>, wrapped: i32) -> Folded {
        match (self.policy, checked) {
            (_, Some(value)) => Folded::Value(Literal::Int(value)),
            (OverflowPolicy::Wrapping, None) => Folded::Value(Literal::Int(wrapped)),
            (OverflowPolicy::Preserve, None) => Folded::Overflow,
        }
    }
}

/// Chars compute as `i32`; a result that is not a valid scalar value
/// has no literal form and is left alone.
fn eval_char(op: BinaryOp, l: char, r: char) -> Folded {
    let (a, b) = (l as u32 as i32, r as u32 as i32);
    let value = match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::Div if b != 0 => a / b,
        BinaryOp::Rem if b != 0 => a % b,
        BinaryOp::BitAnd => a & b,
        BinaryOp::BitOr => a | b,
        BinaryOp::BitXor => a ^ b,
        BinaryOp::Shl => a.wrapping_shl(b as u32),
        BinaryOp::Shr => a.wrapping_shr(b as u32),
        BinaryOp::Div | BinaryOp::Rem => return Folded::Unfoldable,
        _ => return compare(op, &a, &b),
    };
    u32::try_from(value)
        .ok()
        .and_then(char::from_u32)
        .map_or(Folded::Unfoldable, |c| Folded::Value(Literal::Char(c)))
}

fn eval_float(op: BinaryOp, l: f64, r: f64) -> Folded {
    let value = match op {
        BinaryOp::Add => l + r,
        BinaryOp::Sub => l - r,
        BinaryOp::Mul => l * r,
        BinaryOp::Div => l / r,
        BinaryOp::Eq => return Folded::Value(Literal::Bool(l == r)),
        BinaryOp::Ne => return Folded::Value(Literal::Bool(l != r)),
        BinaryOp::Lt => return Folded::Value(Literal::Bool(l < r)),
        BinaryOp::Le => return Folded::Value(Literal::Bool(l <= r)),
        BinaryOp::Gt => return Folded::Value(Literal::Bool(l > r)),
        BinaryOp::Ge => return Folded::Value(Literal::Bool(l >= r)),
        _ => return Folded::Unfoldable,
    };
    Folded::Value(Literal::Float(value))
}

fn compare<T: PartialOrd>(op: BinaryOp, l: &T, r: &T) -> Folded {
    let value = match op {
        BinaryOp::Eq => l == r,
        BinaryOp::Ne => l != r,
        BinaryOp::Lt => l < r,
        BinaryOp::Le => l <= r,
        BinaryOp::Gt => l > r,
        BinaryOp::Ge => l >= r,
        _ => return Folded::Unfoldable,
    };
    Folded::Value(Literal::Bool(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Type;
    use proptest::prelude::*;

    fn int(value: i32) -> IrExpr {
        IrExpr::constant(Literal::Int(value), Type::Int)
    }

    fn binary(op: BinaryOp, lhs: IrExpr, rhs: IrExpr) -> IrExpr {
        let ty = if op.is_comparison() { Type::Bool } else { lhs.ty.clone() };
        IrExpr::new(
            IrExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            ty,
        )
    }

    fn fold(mut expr: IrExpr, policy: OverflowPolicy) -> (IrExpr, ConstantFolder) {
        let mut folder = ConstantFolder::new(policy);
        folder.fold_expr(&mut expr);
        (expr, folder)
    }

    #[test]
    fn folds_nested_literals_in_one_walk() {
        let expr = binary(
            BinaryOp::Mul,
            binary(BinaryOp::Add, int(1), int(2)),
            binary(BinaryOp::Sub, int(10), int(4)),
        );
        let (folded, folder) = fold(expr, OverflowPolicy::Wrapping);
        assert_eq!(folded, int(18));
        assert_eq!(folder.folded, 3);
    }

    #[test]
    fn condition_folds_to_an_int_not_a_bool() {
        let (folded, _) = fold(binary(BinaryOp::Add, int(1), int(2)), OverflowPolicy::Wrapping);
        assert_eq!(folded.as_const(), Some(&Literal::Int(3)));
        assert_eq!(folded.ty, Type::Int);
    }

    #[test]
    fn leaves_trapping_division_alone() {
        for (l, r) in [(1, 0), (i32::MIN, -1)] {
            let expr = binary(BinaryOp::Div, int(l), int(r));
            let (folded, folder) = fold(expr.clone(), OverflowPolicy::Wrapping);
            assert_eq!(folded, expr);
            assert_eq!(folder.folded, 0);
        }
        let (rem, _) = fold(
            binary(BinaryOp::Rem, int(i32::MIN), int(-1)),
            OverflowPolicy::Wrapping,
        );
        assert_eq!(rem, int(0));
    }

    #[test]
    fn matches_target_integer_semantics() {
        let cases = [
            (BinaryOp::Div, -7, 2, -3),
            (BinaryOp::Rem, -7, 2, -1),
            (BinaryOp::Shl, 1, 33, 2),
            (BinaryOp::Shr, -8, 1, -4),
            (BinaryOp::Mul, 65536, 65536, 0),
        ];
        for (op, l, r, expected) in cases {
            let (folded, _) = fold(binary(op, int(l), int(r)), OverflowPolicy::Wrapping);
            assert_eq!(folded, int(expected), "{l} {op} {r}");
        }
    }

    #[test]
    fn preserve_reports_overflow() {
        let expr = binary(BinaryOp::Mul, int(65536), int(65536));
        let (folded, folder) = fold(expr.clone(), OverflowPolicy::Preserve);
        assert_eq!(folded, expr);
        assert_eq!(folder.overflows.len(), 1);
        assert!(folder.overflows[0].contains("(65536 * 65536)"));
    }

    #[test]
    fn folds_floats_chars_and_bools() {
        let float = |v: f64| IrExpr::constant(Literal::Float(v), Type::Float);
        let (sum, _) = fold(
            binary(BinaryOp::Add, float(0.5), float(0.25)),
            OverflowPolicy::Wrapping,
        );
        assert_eq!(sum, float(0.75));

        let ch = |c: char| IrExpr::constant(Literal::Char(c), Type::Char);
        let (next, _) = fold(binary(BinaryOp::Add, ch('a'), ch('\u{1}')), OverflowPolicy::Wrapping);
        assert_eq!(next, ch('b'));

        let boolean = |b: bool| IrExpr::constant(Literal::Bool(b), Type::Bool);
        let (and, _) = fold(
            binary(BinaryOp::And, boolean(true), boolean(false)),
            OverflowPolicy::Wrapping,
        );
        assert_eq!(and.as_const(), Some(&Literal::Bool(false)));
    }

    #[test]
    fn stops_at_non_constant_operands() {
        let local = IrExpr::new(IrExprKind::Local(0), Type::Int);
        let expr = binary(BinaryOp::Add, local.clone(), binary(BinaryOp::Mul, int(2), int(3)));
        let (folded, _) = fold(expr, OverflowPolicy::Wrapping);
        assert_eq!(folded, binary(BinaryOp::Add, local, int(6)));
    }

    fn int_op() -> impl Strategy<Value = BinaryOp> {
        prop_oneof![
            Just(BinaryOp::Add),
            Just(BinaryOp::Sub),
            Just(BinaryOp::Mul),
            Just(BinaryOp::Div),
            Just(BinaryOp::Rem),
            Just(BinaryOp::BitAnd),
            Just(BinaryOp::BitXor),
            Just(BinaryOp::Shl),
            Just(BinaryOp::Shr),
        ]
    }

    fn int_expr() -> impl Strategy<Value = IrExpr> {
        let leaf = prop_oneof![
            any::<i32>().prop_map(int),
            (-4i32..4).prop_map(int),
            (0u32..3).prop_map(|id| IrExpr::new(IrExprKind::Local(id), Type::Int)),
        ];
        leaf.prop_recursive(6, 64, 2, |inner| {
            prop_oneof![
                (int_op(), inner.clone(), inner.clone()).prop_map(|(op, l, r)| binary(op, l, r)),
                inner.prop_map(|operand| IrExpr::new(
                    IrExprKind::Unary {
                        op: UnaryOp::Neg,
                        operand: Box::new(operand),
                    },
                    Type::Int,
                )),
            ]
        })
    }

    fn policy() -> impl Strategy<Value = OverflowPolicy> {
        prop_oneof![Just(OverflowPolicy::Wrapping), Just(OverflowPolicy::Preserve)]
    }

    proptest! {
        #[test]
        fn folding_is_idempotent(expr in int_expr(), policy in policy()) {
            let (once, _) = fold(expr, policy);
            let (twice, folder) = fold(once.clone(), policy);
            prop_assert_eq!(&twice, &once);
            prop_assert_eq!(folder.folded, 0);
        }

        #[test]
        fn folded_constants_leave_no_foldable_parent(expr in int_expr()) {
            let (folded, _) = fold(expr, OverflowPolicy::Wrapping);
            let mut constant_parents = 0;
            folded.visit(&mut |node| {
                if let IrExprKind::Binary { op, lhs, rhs } = &node.kind {
                    if lhs.as_const().is_some() && rhs.as_const().is_some()
                        && !matches!(op, BinaryOp::Div | BinaryOp::Rem)
                    {
                        constant_parents += 1;
                    }
                }
            });
            prop_assert_eq!(constant_parents, 0);
        }
    }
}
