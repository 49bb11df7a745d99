//! Semantic analysis: scopes, symbols and type rules.
//!
//! The tree is only read. Every defect is collected; nothing stops at
//! the first error, so one run reports everything it can find.
//!
//! Declarations go through two passes. Function signatures are all
//! registered first so calls may precede definitions. Then each
//! declaration is validated in source order; a global variable is
//! registered only after its initializer has been checked, so it can
//! neither refer to itself nor to later globals.

use indexmap::IndexMap;

use crate::ast::{Literal, Node, NodeKind, Param, Program, TypeAnnotation};
use crate::diagnostic::{Diagnostic, DiagnosticKind};
use crate::scope::{ScopeStack, Symbol, SymbolKind};
use crate::types::{Type, binary_result, unary_result};

/// Result of analyzing one program.
#[derive(Debug)]
pub struct Analysis {
    pub diagnostics: Vec<Diagnostic>,
}

impl Analysis {
    /// Clean means no error-severity diagnostics; warnings are allowed.
    pub fn is_clean(&self) -> bool {
        !self.diagnostics.iter().any(Diagnostic::is_error)
    }
}

pub fn analyze(program: &Program) -> Analysis {
    let mut checker = TypeChecker::new();
    checker.register_functions(program);
    for declaration in &program.declarations {
        checker.validate_declaration(declaration);
    }
    checker.report_overloads();
    Analysis {
        diagnostics: checker.diagnostics,
    }
}

/// Resolve a function's return type: an annotation, or implicit `int`.
pub fn resolve_return_type(annotation: Option<&TypeAnnotation>) -> Option<Type> {
    match annotation {
        Some(annotation) => Type::from_annotation(annotation),
        None => Some(Type::Int),
    }
}

/// Resolve a parameter type: an annotation, or implicit `int`. `void`
/// is not a parameter type.
pub fn resolve_param_type(param: &Param) -> Option<Type> {
    match &param.annotation {
        Some(annotation) => Type::from_annotation(annotation).filter(|ty| !ty.is_void()),
        None => Some(Type::Int),
    }
}

/// Type of a literal value.
pub fn literal_type(literal: &Literal) -> Type {
    match literal {
        Literal::Int(_) => Type::Int,
        Literal::Float(_) => Type::Float,
        Literal::Bool(_) => Type::Bool,
        Literal::Char(_) => Type::Char,
        Literal::Str(_) => Type::String,
    }
}

fn is_empty_array(node: &Node) -> bool {
    matches!(&node.kind, NodeKind::ArrayLiteral(items) if items.is_empty())
}

struct CallSite {
    args: Vec<Type>,
    line: u32,
    column: u32,
}

struct TypeChecker {
    scopes: ScopeStack<Symbol>,
    diagnostics: Vec<Diagnostic>,
    /// Return type of the function whose body is being validated.
    current_return: Option<Type>,
    /// Loops enclosing the statement being checked.
    loop_depth: usize,
    calls: IndexMap<String, Vec<CallSite>>,
}

impl TypeChecker {
    fn new() -> Self {
        TypeChecker {
            scopes: ScopeStack::new(),
            diagnostics: Vec::new(),
            current_return: None,
            loop_depth: 0,
            calls: IndexMap::new(),
        }
    }

    fn error(&mut self, kind: DiagnosticKind, node: &Node, message: String) {
        self.diagnostics
            .push(Diagnostic::new(kind, message, node.line, node.column));
    }

    fn declare(&mut self, symbol: Symbol) {
        let (line, column) = (symbol.line, symbol.column);
        let name = symbol.name.clone();
        if let Err(existing) = self.scopes.insert(&name, symbol) {
            let message = format!(
                "`{name}` is already declared in this scope as a {} (line {})",
                existing.kind.as_str(),
                existing.line
            );
            self.diagnostics.push(Diagnostic::new(
                DiagnosticKind::DuplicateDeclaration,
                message,
                line,
                column,
            ));
        }
    }

    fn register_functions(&mut self, program: &Program) {
        for declaration in &program.declarations {
            let NodeKind::FunctionDeclaration {
                name,
                return_type,
                params,
                ..
            } = &declaration.kind
            else {
                continue;
            };
            let ret = self.function_return_type(declaration, return_type.as_ref());
            let param_types = params
                .iter()
                .map(|param| self.param_type(param))
                .collect();
            tracing::debug!(function = %name, "registered function");
            self.declare(Symbol::function(
                name.clone(),
                ret,
                param_types,
                declaration.line,
                declaration.column,
            ));
        }
    }

    fn function_return_type(&mut self, at: &Node, annotation: Option<&TypeAnnotation>) -> Type {
        resolve_return_type(annotation).unwrap_or_else(|| {
            let written = annotation.map(ToString::to_string).unwrap_or_default();
            self.error(
                DiagnosticKind::TypeMismatch,
                at,
                format!("`{written}` is not a valid return type"),
            );
            Type::Error
        })
    }

    fn param_type(&mut self, param: &Param) -> Type {
        resolve_param_type(param).unwrap_or_else(|| {
            self.diagnostics.push(Diagnostic::new(
                DiagnosticKind::TypeMismatch,
                format!("parameter `{}` cannot have type `void`", param.name),
                param.line,
                param.column,
            ));
            Type::Error
        })
    }

    fn validate_declaration(&mut self, declaration: &Node) {
        match &declaration.kind {
            NodeKind::FunctionDeclaration {
                name,
                return_type,
                params,
                body,
            } => {
                let ret = resolve_return_type(return_type.as_ref()).unwrap_or(Type::Error);
                self.scopes.push();
                for param in params {
                    let ty = resolve_param_type(param).unwrap_or(Type::Error);
                    self.declare(Symbol::variable(
                        param.name.clone(),
                        ty,
                        param.line,
                        param.column,
                    ));
                }
                self.current_return = Some(ret);
                // The body shares the parameter scope.
                match &body.kind {
                    NodeKind::Block(statements) => {
                        for statement in statements {
                            self.check_statement(statement);
                        }
                    }
                    _ => self.check_statement(body),
                }
                self.current_return = None;
                self.scopes.pop();
                tracing::debug!(function = %name, "validated function body");
            }
            NodeKind::VariableDeclaration { .. } => self.check_statement(declaration),
            _ => {
                self.check_expr(declaration);
            }
        }
    }

    fn check_block(&mut self, block: &Node) {
        self.scopes.push();
        match &block.kind {
            NodeKind::Block(statements) => {
                for statement in statements {
                    self.check_statement(statement);
                }
            }
            _ => self.check_statement(block),
        }
        self.scopes.pop();
    }

    fn check_statement(&mut self, node: &Node) {
        match &node.kind {
            NodeKind::VariableDeclaration {
                name,
                annotation,
                value,
            } => {
                let value_ty = self.check_expr(value);
                let ty = match annotation {
                    Some(annotation) => match Type::from_annotation(annotation) {
                        Some(Type::Void) | None => {
                            self.error(
                                DiagnosticKind::TypeMismatch,
                                node,
                                format!("variable `{name}` cannot have type `{annotation}`"),
                            );
                            Type::Error
                        }
                        Some(declared) => {
                            if !declared.accepts(&value_ty) {
                                let message = format!(
                                    "cannot initialize `{name}` of type `{declared}` \
                                     with a value of type `{value_ty}`"
                                );
                                self.error(DiagnosticKind::TypeMismatch, value, message);
                            }
                            declared
                        }
                    },
                    None => self.inferred_type(name, value, value_ty),
                };
                self.declare(Symbol::variable(name.clone(), ty, node.line, node.column));
            }
            NodeKind::Assignment { target, value } => self.check_assignment(target, value),
            NodeKind::Conditional {
                condition,
                then_block,
                else_block,
            } => {
                self.check_condition(condition);
                self.check_block(then_block);
                if let Some(else_block) = else_block {
                    self.check_block(else_block);
                }
            }
            NodeKind::Loop { condition, body } => {
                self.check_condition(condition);
                self.check_loop_body(body);
            }
            NodeKind::For {
                init,
                condition,
                step,
                body,
            } => {
                // Names declared in the header are visible to the whole loop only.
                self.scopes.push();
                if let Some(init) = init {
                    self.check_statement(init);
                }
                if let Some(condition) = condition {
                    self.check_condition(condition);
                }
                self.check_loop_body(body);
                if let Some(step) = step {
                    self.check_statement(step);
                }
                self.scopes.pop();
            }
            NodeKind::Break | NodeKind::Continue if self.loop_depth == 0 => {
                let word = if node.kind == NodeKind::Break { "break" } else { "continue" };
                let message = format!("`{word}` outside of a loop");
                self.error(DiagnosticKind::LoopControlOutsideLoop, node, message);
            }
            NodeKind::Break | NodeKind::Continue => {}
            NodeKind::Return(value) => self.check_return(node, value.as_deref()),
            NodeKind::Block(_) => self.check_block(node),
            NodeKind::FunctionDeclaration { name, .. } => self.error(
                DiagnosticKind::SyntaxError,
                node,
                format!("function `{name}` cannot be declared inside another function"),
            ),
            _ => {
                self.check_expr(node);
            }
        }
    }

    fn check_loop_body(&mut self, body: &Node) {
        self.loop_depth += 1;
        self.check_block(body);
        self.loop_depth -= 1;
    }

    /// Type of a variable declared without an annotation.
    fn inferred_type(&mut self, name: &str, value: &Node, value_ty: Type) -> Type {
        match &value_ty {
            Type::Void => {
                self.error(
                    DiagnosticKind::TypeMismatch,
                    value,
                    format!("cannot use the result of a void function to declare `{name}`"),
                );
                Type::Error
            }
            Type::Array(_) if is_empty_array(value) => {
                self.error(
                    DiagnosticKind::TypeMismatch,
                    value,
                    format!("cannot infer the element type of `{name}`; add a type annotation"),
                );
                Type::Error
            }
            _ => value_ty,
        }
    }

    fn check_assignment(&mut self, target: &Node, value: &Node) {
        let value_ty = self.check_expr(value);
        match &target.kind {
            NodeKind::Identifier(name) => match self.scopes.lookup(name) {
                None => {
                    // First assignment to a fresh name declares it here.
                    let ty = self.inferred_type(name, value, value_ty);
                    self.declare(Symbol::variable(name.clone(), ty, target.line, target.column));
                }
                Some(symbol) if symbol.kind == SymbolKind::Function => {
                    let message = format!("cannot assign to function `{name}`");
                    self.error(DiagnosticKind::NotAValue, target, message);
                }
                Some(symbol) => {
                    let declared = symbol.ty.clone();
                    if !declared.accepts(&value_ty) {
                        let message = format!(
                            "cannot assign a value of type `{value_ty}` to `{name}` \
                             of type `{declared}`"
                        );
                        self.error(DiagnosticKind::TypeMismatch, value, message);
                    }
                }
            },
            _ => {
                let element = self.check_expr(target);
                if !element.accepts(&value_ty) {
                    let message = format!(
                        "cannot store a value of type `{value_ty}` into an element \
                         of type `{element}`"
                    );
                    self.error(DiagnosticKind::TypeMismatch, value, message);
                }
            }
        }
    }

    fn check_condition(&mut self, condition: &Node) {
        let ty = self.check_expr(condition);
        if !ty.is_error() && ty != Type::Bool {
            self.error(
                DiagnosticKind::NonBooleanCondition,
                condition,
                format!("condition must have type `bool`, found `{ty}`"),
            );
        }
    }

    fn check_return(&mut self, node: &Node, value: Option<&Node>) {
        let value_ty = value.map(|v| self.check_expr(v));
        let Some(expected) = self.current_return.clone() else {
            self.error(
                DiagnosticKind::ReturnTypeMismatch,
                node,
                "`return` outside of a function".into(),
            );
            return;
        };
        if expected.is_error() {
            return;
        }
        let message = match value_ty {
            None if !expected.is_void() => {
                Some(format!("function returns `{expected}` but `return` has no value"))
            }
            Some(_) if expected.is_void() => {
                Some("a `void` function cannot return a value".to_string())
            }
            Some(found) if !expected.accepts(&found) => Some(format!(
                "function returns `{expected}` but this returns `{found}`"
            )),
            _ => None,
        };
        if let Some(message) = message {
            self.error(DiagnosticKind::ReturnTypeMismatch, node, message);
        }
    }

    fn check_expr(&mut self, node: &Node) -> Type {
        match &node.kind {
            NodeKind::Literal(literal) => literal_type(literal),
            NodeKind::Identifier(name) => match self.scopes.lookup(name) {
                None => {
                    let message = format!("use of undeclared variable `{name}`");
                    self.error(DiagnosticKind::UndeclaredSymbol, node, message);
                    Type::Error
                }
                Some(symbol) if symbol.kind == SymbolKind::Function => {
                    let message = format!("function `{name}` cannot be used as a value");
                    self.error(DiagnosticKind::NotAValue, node, message);
                    Type::Error
                }
                Some(symbol) => symbol.ty.clone(),
            },
            NodeKind::UnaryOperation { op, operand } => {
                let operand_ty = self.check_expr(operand);
                unary_result(*op, &operand_ty).unwrap_or_else(|| {
                    self.error(
                        DiagnosticKind::TypeMismatch,
                        node,
                        format!("operator `{op}` cannot be applied to `{operand_ty}`"),
                    );
                    Type::Error
                })
            }
            NodeKind::BinaryOperation { op, lhs, rhs } => {
                let lhs_ty = self.check_expr(lhs);
                let rhs_ty = self.check_expr(rhs);
                if lhs_ty.is_error() || rhs_ty.is_error() {
                    return Type::Error;
                }
                if !(lhs_ty.accepts(&rhs_ty) && rhs_ty.accepts(&lhs_ty)) {
                    self.error(
                        DiagnosticKind::TypeMismatch,
                        node,
                        format!("mismatched operand types for `{op}`: `{lhs_ty}` and `{rhs_ty}`"),
                    );
                    return Type::Error;
                }
                binary_result(*op, &lhs_ty).unwrap_or_else(|| {
                    self.error(
                        DiagnosticKind::TypeMismatch,
                        node,
                        format!("operator `{op}` is not defined for `{lhs_ty}`"),
                    );
                    Type::Error
                })
            }
            NodeKind::ArrayLiteral(items) => {
                let mut element: Option<Type> = None;
                for item in items {
                    let item_ty = self.check_expr(item);
                    if item_ty.is_void() {
                        self.error(
                            DiagnosticKind::TypeMismatch,
                            item,
                            "array elements cannot be `void`".into(),
                        );
                        continue;
                    }
                    match &element {
                        None => element = Some(item_ty),
                        Some(first) if !first.accepts(&item_ty) => {
                            let message = format!(
                                "array elements must share one type: `{first}` and `{item_ty}`"
                            );
                            self.error(DiagnosticKind::TypeMismatch, item, message);
                        }
                        Some(_) => {}
                    }
                }
                Type::Array(Box::new(element.unwrap_or(Type::Error)))
            }
            NodeKind::ArrayAccess { array, index } => {
                let array_ty = self.check_expr(array);
                let index_ty = self.check_expr(index);
                if !index_ty.is_error() && index_ty != Type::Int {
                    self.error(
                        DiagnosticKind::TypeMismatch,
                        index,
                        format!("array index must have type `int`, found `{index_ty}`"),
                    );
                }
                match array_ty {
                    Type::Array(element) => *element,
                    Type::Error => Type::Error,
                    other => {
                        self.error(
                            DiagnosticKind::TypeMismatch,
                            array,
                            format!("cannot index into a value of type `{other}`"),
                        );
                        Type::Error
                    }
                }
            }
            NodeKind::FunctionCall { name, args } => self.check_call(node, name, args),
            NodeKind::FunctionDeclaration { .. }
            | NodeKind::VariableDeclaration { .. }
            | NodeKind::Assignment { .. }
            | NodeKind::Conditional { .. }
            | NodeKind::Loop { .. }
            | NodeKind::For { .. }
            | NodeKind::Break
            | NodeKind::Continue
            | NodeKind::Return(_)
            | NodeKind::Block(_) => {
                self.check_statement(node);
                Type::Void
            }
        }
    }

    fn check_call(&mut self, node: &Node, name: &str, args: &[Node]) -> Type {
        let arg_types: Vec<Type> = args.iter().map(|arg| self.check_expr(arg)).collect();

        let symbol = match self.scopes.lookup(name) {
            None => {
                let message = format!("call to undeclared function `{name}`");
                self.error(DiagnosticKind::UndeclaredFunction, node, message);
                return Type::Error;
            }
            Some(symbol) if symbol.kind != SymbolKind::Function => {
                let message = format!(
                    "`{name}` is a variable of type `{}`, not a function",
                    symbol.ty
                );
                self.error(DiagnosticKind::NotCallable, node, message);
                return Type::Error;
            }
            Some(symbol) => symbol.clone(),
        };

        self.calls.entry(name.to_string()).or_default().push(CallSite {
            args: arg_types.clone(),
            line: node.line,
            column: node.column,
        });

        if symbol.params.len() != arg_types.len() {
            self.error(
                DiagnosticKind::ArgumentMismatch,
                node,
                format!(
                    "`{name}` expects {} argument(s) but {} were given",
                    symbol.params.len(),
                    arg_types.len()
                ),
            );
        } else {
            for (position, ((expected, found), arg)) in
                symbol.params.iter().zip(&arg_types).zip(args).enumerate()
            {
                if !expected.accepts(found) {
                    self.error(
                        DiagnosticKind::ArgumentMismatch,
                        arg,
                        format!(
                            "argument {} of `{name}` expects `{expected}`, found `{found}`",
                            position + 1
                        ),
                    );
                }
            }
        }
        symbol.ty
    }

    /// Informational: calls to one name with differing argument shapes.
    ///
    /// Each name has exactly one signature and a call must match it
    /// exactly, so two differing shapes always mean one of them was
    /// already reported as an `ArgumentMismatch`. The warning only
    /// explains that error; it never appears on a clean program.
    fn report_overloads(&mut self) {
        for (name, sites) in &self.calls {
            let mut sites = sites.iter().filter(|site| !site.args.iter().any(Type::contains_error));
            let Some(first) = sites.next() else { continue };
            if let Some(other) = sites.find(|site| site.args != first.args) {
                let shape = |args: &[Type]| {
                    args.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
                };
                let message = format!(
                    "`{name}` is called with differing argument shapes ({}) and ({}); \
                     overloading is not supported",
                    shape(first.args.as_slice()),
                    shape(other.args.as_slice())
                );
                self.diagnostics.push(Diagnostic::new(
                    DiagnosticKind::OverloadedCall,
                    message,
                    other.line,
                    other.column,
                ));
            }
        }
    }
}
