//! Intermediate representation.
//!
//! Each function is an ordered list of [`Op`]s over numbered locals.
//! Nesting survives only where control flow needs it (`If`, `While`);
//! source blocks are gone. Expressions stay trees and carry their type
//! so the optimizer and the backend never consult a symbol table.
//!
//! Functions own their IR outright and share nothing mutable, so the
//! backend can hand each one to a different worker.

use core::fmt;

use indexmap::IndexMap;

use crate::ast::{BinaryOp, Literal, UnaryOp};
use crate::types::Type;

/// Index into a function's locals; parameters come first.
pub type LocalId = u32;

/// Index into [`IrProgram::globals`].
pub type GlobalId = u32;

/// Name of the synthesized function that runs global initializers.
pub const INIT_FUNCTION: &str = "$init";

#[derive(Debug, Clone, PartialEq)]
pub struct IrProgram {
    pub globals: Vec<IrGlobal>,
    /// Declaration order; `$init` (when present) comes last.
    pub functions: IndexMap<String, IrFunction>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IrGlobal {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IrLocal {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IrFunction {
    pub name: String,
    pub params: Vec<IrLocal>,
    /// Locals beyond the parameters, numbered from `params.len()`.
    pub locals: Vec<IrLocal>,
    pub return_type: Type,
    pub ops: Vec<Op>,
    pub line: u32,
    pub column: u32,
}

impl IrFunction {
    pub fn local(&self, id: LocalId) -> Option<&IrLocal> {
        let id = id as usize;
        if id < self.params.len() {
            self.params.get(id)
        } else {
            self.locals.get(id - self.params.len())
        }
    }

    pub fn local_count(&self) -> usize {
        self.params.len() + self.locals.len()
    }

    /// Operations at every nesting level.
    pub fn op_count(&self) -> usize {
        count_ops(&self.ops)
    }

    pub fn is_init(&self) -> bool {
        self.name == INIT_FUNCTION
    }
}

fn count_ops(ops: &[Op]) -> usize {
    ops.iter()
        .map(|op| {
            1 + match op {
                Op::If {
                    then_ops, else_ops, ..
                } => count_ops(then_ops) + count_ops(else_ops),
                Op::While { body, step, .. } => count_ops(body) + count_ops(step),
                _ => 0,
            }
        })
        .sum()
}

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Assign {
        local: LocalId,
        value: IrExpr,
    },
    StoreGlobal {
        global: GlobalId,
        value: IrExpr,
    },
    StoreElement {
        array: IrExpr,
        index: IrExpr,
        value: IrExpr,
    },
    /// Evaluate for side effects, discarding any value.
    Eval(IrExpr),
    If {
        condition: IrExpr,
        then_ops: Vec<Op>,
        else_ops: Vec<Op>,
    },
    /// `step` runs after the body and after every `Continue`.
    While {
        condition: IrExpr,
        body: Vec<Op>,
        step: Vec<Op>,
    },
    /// Leave the innermost `While`.
    Break,
    /// Jump to the innermost `While`'s step.
    Continue,
    Return(Option<IrExpr>),
}

impl Op {
    /// Every expression directly held by this op (not nested ops).
    pub fn exprs(&self) -> Vec<&IrExpr> {
        match self {
            Op::Assign { value, .. } | Op::StoreGlobal { value, .. } | Op::Eval(value) => {
                vec![value]
            }
            Op::StoreElement {
                array,
                index,
                value,
            } => vec![array, index, value],
            Op::If { condition, .. } | Op::While { condition, .. } => vec![condition],
            Op::Return(value) => value.iter().collect(),
            Op::Break | Op::Continue => Vec::new(),
        }
    }

    pub fn exprs_mut(&mut self) -> Vec<&mut IrExpr> {
        match self {
            Op::Assign { value, .. } | Op::StoreGlobal { value, .. } | Op::Eval(value) => {
                vec![value]
            }
            Op::StoreElement {
                array,
                index,
                value,
            } => vec![array, index, value],
            Op::If { condition, .. } | Op::While { condition, .. } => vec![condition],
            Op::Return(value) => value.iter_mut().collect(),
            Op::Break | Op::Continue => Vec::new(),
        }
    }

    /// Nested op lists owned by this op.
    pub fn children_mut(&mut self) -> Vec<&mut Vec<Op>> {
        match self {
            Op::If {
                then_ops, else_ops, ..
            } => vec![then_ops, else_ops],
            Op::While { body, step, .. } => vec![body, step],
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IrExpr {
    pub kind: IrExprKind,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IrExprKind {
    Const(Literal),
    Local(LocalId),
    Global(GlobalId),
    Unary {
        op: UnaryOp,
        operand: Box<IrExpr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<IrExpr>,
        rhs: Box<IrExpr>,
    },
    Load {
        array: Box<IrExpr>,
        index: Box<IrExpr>,
    },
    Call {
        callee: String,
        args: Vec<IrExpr>,
    },
    ArrayNew(Vec<IrExpr>),
}

impl IrExpr {
    pub fn new(kind: IrExprKind, ty: Type) -> Self {
        IrExpr { kind, ty }
    }

    pub fn constant(literal: Literal, ty: Type) -> Self {
        IrExpr::new(IrExprKind::Const(literal), ty)
    }

    pub fn as_const(&self) -> Option<&Literal> {
        match &self.kind {
            IrExprKind::Const(literal) => Some(literal),
            _ => None,
        }
    }

    pub fn children(&self) -> Vec<&IrExpr> {
        match &self.kind {
            IrExprKind::Const(_) | IrExprKind::Local(_) | IrExprKind::Global(_) => Vec::new(),
            IrExprKind::Unary { operand, .. } => vec![&**operand],
            IrExprKind::Binary { lhs, rhs, .. } => vec![&**lhs, &**rhs],
            IrExprKind::Load { array, index } => vec![&**array, &**index],
            IrExprKind::Call { args, .. } | IrExprKind::ArrayNew(args) => args.iter().collect(),
        }
    }

    pub fn children_mut(&mut self) -> Vec<&mut IrExpr> {
        match &mut self.kind {
            IrExprKind::Const(_) | IrExprKind::Local(_) | IrExprKind::Global(_) => Vec::new(),
            IrExprKind::Unary { operand, .. } => vec![&mut **operand],
            IrExprKind::Binary { lhs, rhs, .. } => vec![&mut **lhs, &mut **rhs],
            IrExprKind::Load { array, index } => vec![&mut **array, &mut **index],
            IrExprKind::Call { args, .. } | IrExprKind::ArrayNew(args) => args.iter_mut().collect(),
        }
    }

    /// Number of nodes in the tree.
    pub fn size(&self) -> usize {
        1 + self.children().into_iter().map(IrExpr::size).sum::<usize>()
    }

    /// Calls may do anything; allocation moves the heap pointer.
    pub fn has_side_effects(&self) -> bool {
        matches!(
            self.kind,
            IrExprKind::Call { .. } | IrExprKind::ArrayNew(_)
        ) || self.children().into_iter().any(IrExpr::has_side_effects)
    }

    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a IrExpr)) {
        f(self);
        for child in self.children() {
            child.visit(f);
        }
    }
}

/// Call `f` on every expression in `ops`, nested ones included.
pub fn visit_ops<'a>(ops: &'a [Op], f: &mut impl FnMut(&'a IrExpr)) {
    for op in ops {
        for expr in op.exprs() {
            expr.visit(f);
        }
        match op {
            Op::If {
                then_ops, else_ops, ..
            } => {
                visit_ops(then_ops, f);
                visit_ops(else_ops, f);
            }
            Op::While { body, step, .. } => {
                visit_ops(body, f);
                visit_ops(step, f);
            }
            _ => {}
        }
    }
}

impl fmt::Display for IrExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            IrExprKind::Const(literal) => write!(f, "{literal}"),
            IrExprKind::Local(id) => write!(f, "%{id}"),
            IrExprKind::Global(id) => write!(f, "@{id}"),
            IrExprKind::Unary { op, operand } => write!(f, "({op}{operand})"),
            IrExprKind::Binary { op, lhs, rhs } => write!(f, "({lhs} {op} {rhs})"),
            IrExprKind::Load { array, index } => write!(f, "{array}[{index}]"),
            IrExprKind::Call { callee, args } => {
                write!(f, "{callee}(")?;
                write_list(f, args)?;
                f.write_str(")")
            }
            IrExprKind::ArrayNew(items) => {
                f.write_str("[")?;
                write_list(f, items)?;
                f.write_str("]")
            }
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[IrExpr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

fn write_ops(f: &mut fmt::Formatter<'_>, ops: &[Op], depth: usize) -> fmt::Result {
    let pad = "  ".repeat(depth);
    for op in ops {
        match op {
            Op::Assign { local, value } => writeln!(f, "{pad}%{local} = {value}")?,
            Op::StoreGlobal { global, value } => writeln!(f, "{pad}@{global} = {value}")?,
            Op::StoreElement {
                array,
                index,
                value,
            } => writeln!(f, "{pad}{array}[{index}] = {value}")?,
            Op::Eval(expr) => writeln!(f, "{pad}eval {expr}")?,
            Op::If {
                condition,
                then_ops,
                else_ops,
            } => {
                writeln!(f, "{pad}if {condition} {{")?;
                write_ops(f, then_ops, depth + 1)?;
                if !else_ops.is_empty() {
                    writeln!(f, "{pad}}} else {{")?;
                    write_ops(f, else_ops, depth + 1)?;
                }
                writeln!(f, "{pad}}}")?;
            }
            Op::While {
                condition,
                body,
                step,
            } => {
                writeln!(f, "{pad}while {condition} {{")?;
                write_ops(f, body, depth + 1)?;
                if !step.is_empty() {
                    writeln!(f, "{pad}}} step {{")?;
                    write_ops(f, step, depth + 1)?;
                }
                writeln!(f, "{pad}}}")?;
            }
            Op::Break => writeln!(f, "{pad}break")?,
            Op::Continue => writeln!(f, "{pad}continue")?,
            Op::Return(Some(value)) => writeln!(f, "{pad}return {value}")?,
            Op::Return(None) => writeln!(f, "{pad}return")?,
        }
    }
    Ok(())
}

impl fmt::Display for IrFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn {}(", self.name)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "%{i} {}: {}", param.name, param.ty)?;
        }
        writeln!(f, ") -> {} {{", self.return_type)?;
        for (offset, local) in self.locals.iter().enumerate() {
            let id = self.params.len() + offset;
            writeln!(f, "  local %{id} {}: {}", local.name, local.ty)?;
        }
        write_ops(f, &self.ops, 1)?;
        writeln!(f, "}}")
    }
}

impl fmt::Display for IrProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (id, global) in self.globals.iter().enumerate() {
            writeln!(f, "global @{id} {}: {}", global.name, global.ty)?;
        }
        for function in self.functions.values() {
            write!(f, "{function}")?;
        }
        Ok(())
    }
}
