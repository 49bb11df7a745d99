//! Lowering from the validated syntax tree to IR.
//!
//! Only trees the semantic analyzer accepted are lowered. Lowering keeps
//! its own binding table: every declaration gets a fresh local slot, so
//! shadowed names never share storage and block scopes can collapse
//! into the enclosing op list.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::ast::{BinaryOp, Literal, Node, NodeKind, Program};
use crate::error::CoreError;
use crate::ir::{
    GlobalId, INIT_FUNCTION, IrExpr, IrExprKind, IrFunction, IrGlobal, IrLocal, IrProgram,
    LocalId, Op,
};
use crate::scope::ScopeStack;
use crate::typecheck::{literal_type, resolve_param_type, resolve_return_type};
use crate::types::Type;

#[derive(Debug, Clone)]
enum Binding {
    Local(LocalId, Type),
    Global(GlobalId, Type),
}

struct Signature {
    return_type: Type,
}

pub fn lower(program: &Program) -> Result<IrProgram, CoreError> {
    let mut signatures = HashMap::new();
    for declaration in &program.declarations {
        if let NodeKind::FunctionDeclaration {
            name, return_type, ..
        } = &declaration.kind
        {
            let return_type = resolve_return_type(return_type.as_ref()).ok_or_else(|| {
                CoreError::Lowering(format!("function `{name}` has an invalid return type"))
            })?;
            signatures.insert(name.clone(), Signature { return_type });
        }
    }

    let mut lowering = Lowering {
        signatures,
        scopes: ScopeStack::new(),
        globals: Vec::new(),
    };
    let mut functions = IndexMap::new();
    let mut init = FunctionBuilder::new(INIT_FUNCTION, Type::Void, 0, 0);

    for declaration in &program.declarations {
        match &declaration.kind {
            NodeKind::FunctionDeclaration { name, .. } => {
                let function = lowering.function(declaration)?;
                tracing::debug!(function = %name, ops = function.op_count(), "lowered function");
                functions.insert(name.clone(), function);
            }
            NodeKind::VariableDeclaration {
                name,
                annotation,
                value,
            } => {
                let mut value = lowering.expr(value, &mut init)?;
                let ty = match annotation {
                    Some(annotation) => Type::from_annotation(annotation).ok_or_else(|| {
                        CoreError::Lowering(format!("global `{name}` has an invalid type"))
                    })?,
                    None => value.ty.clone(),
                };
                if matches!(value.kind, IrExprKind::ArrayNew(_)) {
                    value.ty = ty.clone();
                }
                let global = lowering.globals.len() as GlobalId;
                lowering.globals.push(IrGlobal {
                    name: name.clone(),
                    ty: ty.clone(),
                });
                lowering.bind(name, Binding::Global(global, ty))?;
                init.ops.push(Op::StoreGlobal { global, value });
            }
            _ => {
                return Err(CoreError::Lowering(format!(
                    "unexpected top-level node at {}:{}",
                    declaration.line, declaration.column
                )));
            }
        }
    }

    if !init.ops.is_empty() {
        functions.insert(INIT_FUNCTION.to_string(), init.finish());
    }

    Ok(IrProgram {
        globals: lowering.globals,
        functions,
    })
}

struct Lowering {
    signatures: HashMap<String, Signature>,
    scopes: ScopeStack<Binding>,
    globals: Vec<IrGlobal>,
}

struct FunctionBuilder {
    name: String,
    params: Vec<IrLocal>,
    locals: Vec<IrLocal>,
    return_type: Type,
    ops: Vec<Op>,
    line: u32,
    column: u32,
}

impl FunctionBuilder {
    fn new(name: &str, return_type: Type, line: u32, column: u32) -> Self {
        FunctionBuilder {
            name: name.to_string(),
            params: Vec::new(),
            locals: Vec::new(),
            return_type,
            ops: Vec::new(),
            line,
            column,
        }
    }

    fn add_local(&mut self, name: &str, ty: Type) -> LocalId {
        let id = (self.params.len() + self.locals.len()) as LocalId;
        self.locals.push(IrLocal {
            name: name.to_string(),
            ty,
        });
        id
    }

    fn finish(self) -> IrFunction {
        IrFunction {
            name: self.name,
            params: self.params,
            locals: self.locals,
            return_type: self.return_type,
            ops: self.ops,
            line: self.line,
            column: self.column,
        }
    }
}

impl Lowering {
    fn bind(&mut self, name: &str, binding: Binding) -> Result<(), CoreError> {
        self.scopes
            .insert(name, binding)
            .map_err(|_| CoreError::Lowering(format!("`{name}` is bound twice in one scope")))
    }

    fn function(&mut self, declaration: &Node) -> Result<IrFunction, CoreError> {
        let NodeKind::FunctionDeclaration {
            name, params, body, ..
        } = &declaration.kind
        else {
            return Err(CoreError::Lowering("expected a function declaration".into()));
        };
        let return_type = self
            .signatures
            .get(name)
            .map(|signature| signature.return_type.clone())
            .unwrap_or(Type::Void);
        let mut builder =
            FunctionBuilder::new(name, return_type, declaration.line, declaration.column);

        self.scopes.push();
        for param in params {
            let ty = resolve_param_type(param).ok_or_else(|| {
                CoreError::Lowering(format!("parameter `{}` has an invalid type", param.name))
            })?;
            let id = builder.params.len() as LocalId;
            builder.params.push(IrLocal {
                name: param.name.clone(),
                ty: ty.clone(),
            });
            self.bind(&param.name, Binding::Local(id, ty))?;
        }
        let mut ops = Vec::new();
        let result = match &body.kind {
            NodeKind::Block(statements) => statements
                .iter()
                .try_for_each(|statement| self.statement(statement, &mut builder, &mut ops)),
            _ => self.statement(body, &mut builder, &mut ops),
        };
        self.scopes.pop();
        result?;

        builder.ops = ops;
        Ok(builder.finish())
    }

    fn block(
        &mut self,
        block: &Node,
        builder: &mut FunctionBuilder,
    ) -> Result<Vec<Op>, CoreError> {
        let mut ops = Vec::new();
        self.scopes.push();
        let result = match &block.kind {
            NodeKind::Block(statements) => statements
                .iter()
                .try_for_each(|statement| self.statement(statement, builder, &mut ops)),
            _ => self.statement(block, builder, &mut ops),
        };
        self.scopes.pop();
        result.map(|()| ops)
    }

    fn statement(
        &mut self,
        node: &Node,
        builder: &mut FunctionBuilder,
        ops: &mut Vec<Op>,
    ) -> Result<(), CoreError> {
        match &node.kind {
            NodeKind::VariableDeclaration {
                name,
                annotation,
                value,
            } => {
                let mut value = self.expr(value, builder)?;
                let ty = match annotation {
                    Some(annotation) => Type::from_annotation(annotation).ok_or_else(|| {
                        CoreError::Lowering(format!("variable `{name}` has an invalid type"))
                    })?,
                    None => value.ty.clone(),
                };
                if matches!(value.kind, IrExprKind::ArrayNew(_)) {
                    value.ty = ty.clone();
                }
                let local = builder.add_local(name, ty.clone());
                self.bind(name, Binding::Local(local, ty))?;
                ops.push(Op::Assign { local, value });
            }
            NodeKind::Assignment { target, value } => {
                let value = self.expr(value, builder)?;
                match &target.kind {
                    NodeKind::Identifier(name) => match self.scopes.lookup(name).cloned() {
                        Some(Binding::Local(local, _)) => ops.push(Op::Assign { local, value }),
                        Some(Binding::Global(global, _)) => {
                            ops.push(Op::StoreGlobal { global, value })
                        }
                        None => {
                            let local = builder.add_local(name, value.ty.clone());
                            self.bind(name, Binding::Local(local, value.ty.clone()))?;
                            ops.push(Op::Assign { local, value });
                        }
                    },
                    NodeKind::ArrayAccess { array, index } => {
                        let array = self.expr(array, builder)?;
                        let index = self.expr(index, builder)?;
                        ops.push(Op::StoreElement {
                            array,
                            index,
                            value,
                        });
                    }
                    _ => {
                        return Err(CoreError::Lowering(format!(
                            "invalid assignment target at {}:{}",
                            target.line, target.column
                        )));
                    }
                }
            }
            NodeKind::Conditional {
                condition,
                then_block,
                else_block,
            } => {
                let condition = self.expr(condition, builder)?;
                let then_ops = self.block(then_block, builder)?;
                let else_ops = match else_block {
                    Some(else_block) => self.block(else_block, builder)?,
                    None => Vec::new(),
                };
                ops.push(Op::If {
                    condition,
                    then_ops,
                    else_ops,
                });
            }
            NodeKind::Loop { condition, body } => {
                let condition = self.expr(condition, builder)?;
                let body = self.block(body, builder)?;
                ops.push(Op::While {
                    condition,
                    body,
                    step: Vec::new(),
                });
            }
            NodeKind::For {
                init,
                condition,
                step,
                body,
            } => {
                self.scopes.push();
                let result = self.for_loop(
                    init.as_deref(),
                    condition.as_deref(),
                    step.as_deref(),
                    body,
                    builder,
                    ops,
                );
                self.scopes.pop();
                result?;
            }
            NodeKind::Break => ops.push(Op::Break),
            NodeKind::Continue => ops.push(Op::Continue),
            NodeKind::Return(value) => {
                let value = value
                    .as_deref()
                    .map(|value| self.expr(value, builder))
                    .transpose()?;
                ops.push(Op::Return(value));
            }
            NodeKind::Block(_) => {
                let inner = self.block(node, builder)?;
                ops.extend(inner);
            }
            NodeKind::FunctionDeclaration { name, .. } => {
                return Err(CoreError::Lowering(format!(
                    "nested function `{name}` cannot be lowered"
                )));
            }
            _ => {
                let expr = self.expr(node, builder)?;
                ops.push(Op::Eval(expr));
            }
        }
        Ok(())
    }

    /// The init runs once before the loop; a missing condition is `true`.
    fn for_loop(
        &mut self,
        init: Option<&Node>,
        condition: Option<&Node>,
        step: Option<&Node>,
        body: &Node,
        builder: &mut FunctionBuilder,
        ops: &mut Vec<Op>,
    ) -> Result<(), CoreError> {
        if let Some(init) = init {
            self.statement(init, builder, ops)?;
        }
        let condition = match condition {
            Some(condition) => self.expr(condition, builder)?,
            None => IrExpr::constant(Literal::Bool(true), Type::Bool),
        };
        let body = self.block(body, builder)?;
        let mut step_ops = Vec::new();
        if let Some(step) = step {
            self.statement(step, builder, &mut step_ops)?;
        }
        ops.push(Op::While {
            condition,
            body,
            step: step_ops,
        });
        Ok(())
    }

    fn expr(&mut self, node: &Node, builder: &mut FunctionBuilder) -> Result<IrExpr, CoreError> {
        let expr = match &node.kind {
            NodeKind::Literal(literal) => IrExpr::constant(literal.clone(), literal_type(literal)),
            NodeKind::Identifier(name) => match self.scopes.lookup(name) {
                Some(Binding::Local(id, ty)) => IrExpr::new(IrExprKind::Local(*id), ty.clone()),
                Some(Binding::Global(id, ty)) => IrExpr::new(IrExprKind::Global(*id), ty.clone()),
                None => {
                    return Err(CoreError::Lowering(format!(
                        "unbound name `{name}` at {}:{}",
                        node.line, node.column
                    )));
                }
            },
            NodeKind::UnaryOperation { op, operand } => {
                let operand = self.expr(operand, builder)?;
                let ty = operand.ty.clone();
                IrExpr::new(
                    IrExprKind::Unary {
                        op: *op,
                        operand: Box::new(operand),
                    },
                    ty,
                )
            }
            NodeKind::BinaryOperation { op, lhs, rhs } => {
                let lhs = self.expr(lhs, builder)?;
                let rhs = self.expr(rhs, builder)?;
                let ty = binary_type(*op, &lhs.ty);
                IrExpr::new(
                    IrExprKind::Binary {
                        op: *op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                    ty,
                )
            }
            NodeKind::ArrayLiteral(items) => {
                let items = items
                    .iter()
                    .map(|item| self.expr(item, builder))
                    .collect::<Result<Vec<_>, _>>()?;
                let element = items
                    .first()
                    .map(|item| item.ty.clone())
                    .unwrap_or(Type::Error);
                IrExpr::new(IrExprKind::ArrayNew(items), Type::Array(Box::new(element)))
            }
            NodeKind::ArrayAccess { array, index } => {
                let array = self.expr(array, builder)?;
                let index = self.expr(index, builder)?;
                let ty = array.ty.element().cloned().ok_or_else(|| {
                    CoreError::Lowering(format!(
                        "indexing a non-array value at {}:{}",
                        node.line, node.column
                    ))
                })?;
                IrExpr::new(
                    IrExprKind::Load {
                        array: Box::new(array),
                        index: Box::new(index),
                    },
                    ty,
                )
            }
            NodeKind::FunctionCall { name, args } => {
                let return_type = self
                    .signatures
                    .get(name)
                    .map(|signature| signature.return_type.clone())
                    .ok_or_else(|| {
                        CoreError::Lowering(format!("call to unknown function `{name}`"))
                    })?;
                let args = args
                    .iter()
                    .map(|arg| self.expr(arg, builder))
                    .collect::<Result<Vec<_>, _>>()?;
                IrExpr::new(
                    IrExprKind::Call {
                        callee: name.clone(),
                        args,
                    },
                    return_type,
                )
            }
            _ => {
                return Err(CoreError::Lowering(format!(
                    "statement used as an expression at {}:{}",
                    node.line, node.column
                )));
            }
        };
        Ok(expr)
    }
}

fn binary_type(op: BinaryOp, operand: &Type) -> Type {
    if op.is_comparison() || op.is_logical() {
        Type::Bool
    } else {
        operand.clone()
    }
}
