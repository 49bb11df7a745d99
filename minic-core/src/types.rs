//! Type system for minic.
//!
//! Types are structural and small: five scalar types, `void`, and
//! arrays of any non-void type. `Error` is the type of an expression
//! whose checking already failed; it is compatible with everything so a
//! single mistake does not cascade into a page of diagnostics.

use core::fmt;

use crate::ast::{BinaryOp, TypeAnnotation, UnaryOp};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Int,
    Float,
    Bool,
    Char,
    String,
    Void,
    Array(Box<Type>),
    Error,
}

impl Type {
    /// Resolve a written annotation. Unknown base names are impossible
    /// after lexing (the parser only accepts type-name tokens), but an
    /// array of `void` is rejected here.
    pub fn from_annotation(annotation: &TypeAnnotation) -> Option<Type> {
        let mut ty = match annotation.base.as_str() {
            "int" => Type::Int,
            "float" => Type::Float,
            "bool" => Type::Bool,
            "char" => Type::Char,
            "string" => Type::String,
            "void" => Type::Void,
            _ => return None,
        };
        for _ in 0..annotation.array_depth {
            if ty == Type::Void {
                return None;
            }
            ty = Type::Array(Box::new(ty));
        }
        Some(ty)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Type::Error)
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Int | Type::Float | Type::Char)
    }

    pub fn is_integral(&self) -> bool {
        matches!(self, Type::Int | Type::Char)
    }

    pub fn element(&self) -> Option<&Type> {
        match self {
            Type::Array(inner) => Some(inner),
            _ => None,
        }
    }

    /// Whether a value of type `other` may be stored where `self` is
    /// expected. `Error` anywhere makes the answer yes.
    pub fn accepts(&self, other: &Type) -> bool {
        match (self, other) {
            (Type::Error, _) | (_, Type::Error) => true,
            (Type::Array(a), Type::Array(b)) => a.accepts(b),
            (a, b) => a == b,
        }
    }

    /// True when the type mentions `Error` at any depth.
    pub fn contains_error(&self) -> bool {
        match self {
            Type::Error => true,
            Type::Array(inner) => inner.contains_error(),
            _ => false,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => f.write_str("int"),
            Type::Float => f.write_str("float"),
            Type::Bool => f.write_str("bool"),
            Type::Char => f.write_str("char"),
            Type::String => f.write_str("string"),
            Type::Void => f.write_str("void"),
            Type::Array(inner) => write!(f, "{inner}[]"),
            Type::Error => f.write_str("{unknown}"),
        }
    }
}

/// Result type of `lhs op rhs` given both operands already have type
/// `operand`, or `None` when the operator is not defined for it.
pub fn binary_result(op: BinaryOp, operand: &Type) -> Option<Type> {
    if operand.is_error() {
        return Some(Type::Error);
    }
    match op {
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
            operand.is_numeric().then(|| operand.clone())
        }
        BinaryOp::Rem
        | BinaryOp::BitAnd
        | BinaryOp::BitOr
        | BinaryOp::BitXor
        | BinaryOp::Shl
        | BinaryOp::Shr => operand.is_integral().then(|| operand.clone()),
        BinaryOp::Eq | BinaryOp::Ne => {
            (!matches!(operand, Type::Void | Type::Array(_))).then_some(Type::Bool)
        }
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            operand.is_numeric().then_some(Type::Bool)
        }
        BinaryOp::And | BinaryOp::Or => (*operand == Type::Bool).then_some(Type::Bool),
    }
}

pub fn unary_result(op: UnaryOp, operand: &Type) -> Option<Type> {
    if operand.is_error() {
        return Some(Type::Error);
    }
    match op {
        UnaryOp::Neg => matches!(operand, Type::Int | Type::Float).then(|| operand.clone()),
        UnaryOp::Not => (*operand == Type::Bool).then_some(Type::Bool),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotation(base: &str, array_depth: u32) -> TypeAnnotation {
        TypeAnnotation {
            base: base.to_string(),
            array_depth,
        }
    }

    #[test]
    fn resolves_annotations() {
        assert_eq!(Type::from_annotation(&annotation("int", 0)), Some(Type::Int));
        assert_eq!(
            Type::from_annotation(&annotation("float", 2)),
            Some(Type::Array(Box::new(Type::Array(Box::new(Type::Float)))))
        );
        assert_eq!(Type::from_annotation(&annotation("void", 1)), None);
    }

    #[test]
    fn error_type_is_compatible_with_everything() {
        assert!(Type::Int.accepts(&Type::Error));
        assert!(Type::Array(Box::new(Type::Int)).accepts(&Type::Array(Box::new(Type::Error))));
        assert!(!Type::Int.accepts(&Type::Float));
    }

    #[test]
    fn operator_typing() {
        assert_eq!(binary_result(BinaryOp::Add, &Type::Float), Some(Type::Float));
        assert_eq!(binary_result(BinaryOp::Rem, &Type::Float), None);
        assert_eq!(binary_result(BinaryOp::Lt, &Type::Int), Some(Type::Bool));
        assert_eq!(binary_result(BinaryOp::Lt, &Type::Bool), None);
        assert_eq!(binary_result(BinaryOp::Eq, &Type::Bool), Some(Type::Bool));
        assert_eq!(binary_result(BinaryOp::And, &Type::Int), None);
        assert_eq!(unary_result(UnaryOp::Neg, &Type::Bool), None);
        assert_eq!(unary_result(UnaryOp::Not, &Type::Bool), Some(Type::Bool));
    }
}
