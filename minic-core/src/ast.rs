//! Syntax tree produced by the parser.
//!
//! Every node owns its children outright; there is no sharing and no
//! back-edge, so a subtree can be moved or cloned freely.

use core::fmt;

/// Root of one compilation unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub declarations: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub line: u32,
    pub column: u32,
}

impl Node {
    pub fn new(kind: NodeKind, line: u32, column: u32) -> Self {
        Node { kind, line, column }
    }
}

/// The closed set of node kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    FunctionDeclaration {
        name: String,
        return_type: Option<TypeAnnotation>,
        params: Vec<Param>,
        body: Box<Node>,
    },
    VariableDeclaration {
        name: String,
        annotation: Option<TypeAnnotation>,
        value: Box<Node>,
    },
    /// `target = value;` where target is an identifier or array access.
    Assignment {
        target: Box<Node>,
        value: Box<Node>,
    },
    Literal(Literal),
    Identifier(String),
    UnaryOperation {
        op: UnaryOp,
        operand: Box<Node>,
    },
    BinaryOperation {
        op: BinaryOp,
        lhs: Box<Node>,
        rhs: Box<Node>,
    },
    ArrayLiteral(Vec<Node>),
    ArrayAccess {
        array: Box<Node>,
        index: Box<Node>,
    },
    FunctionCall {
        name: String,
        args: Vec<Node>,
    },
    Conditional {
        condition: Box<Node>,
        then_block: Box<Node>,
        else_block: Option<Box<Node>>,
    },
    Loop {
        condition: Box<Node>,
        body: Box<Node>,
    },
    /// `for (init; condition; step) body`; every header part may be empty.
    For {
        init: Option<Box<Node>>,
        condition: Option<Box<Node>>,
        step: Option<Box<Node>>,
        body: Box<Node>,
    },
    Break,
    Continue,
    Return(Option<Box<Node>>),
    Block(Vec<Node>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub annotation: Option<TypeAnnotation>,
    pub line: u32,
    pub column: u32,
}

/// A written type: a base type name plus `[]` suffixes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeAnnotation {
    pub base: String,
    pub array_depth: u32,
}

impl fmt::Display for TypeAnnotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base)?;
        for _ in 0..self.array_depth {
            f.write_str("[]")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i32),
    Float(f64),
    Bool(bool),
    Char(char),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

impl BinaryOp {
    pub fn from_operator(text: &str) -> Option<Self> {
        let op = match text {
            "+" => BinaryOp::Add,
            "-" => BinaryOp::Sub,
            "*" => BinaryOp::Mul,
            "/" => BinaryOp::Div,
            "%" => BinaryOp::Rem,
            "==" => BinaryOp::Eq,
            "!=" => BinaryOp::Ne,
            "<" => BinaryOp::Lt,
            "<=" => BinaryOp::Le,
            ">" => BinaryOp::Gt,
            ">=" => BinaryOp::Ge,
            "&&" => BinaryOp::And,
            "||" => BinaryOp::Or,
            "&" => BinaryOp::BitAnd,
            "|" => BinaryOp::BitOr,
            "^" => BinaryOp::BitXor,
            "<<" => BinaryOp::Shl,
            ">>" => BinaryOp::Shr,
            _ => return None,
        };
        Some(op)
    }

    /// Binding power; higher binds tighter.
    pub fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::BitOr => 3,
            BinaryOp::BitXor => 4,
            BinaryOp::BitAnd => 5,
            BinaryOp::Eq | BinaryOp::Ne => 6,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => 7,
            BinaryOp::Shl | BinaryOp::Shr => 8,
            BinaryOp::Add | BinaryOp::Sub => 9,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => 10,
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnaryOp::Neg => f.write_str("-"),
            UnaryOp::Not => f.write_str("!"),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(v) => write!(f, "{v}"),
            Literal::Float(v) => write!(f, "{v:?}"),
            Literal::Bool(v) => write!(f, "{v}"),
            Literal::Char(c) => write!(f, "{c:?}"),
            Literal::Str(s) => write!(f, "{s:?}"),
        }
    }
}

/// Indented outline of a program, one node per line (`--emit ast`).
pub fn outline(program: &Program) -> String {
    let mut out = String::from("Program\n");
    for decl in &program.declarations {
        outline_node(decl, 1, &mut out);
    }
    out
}

fn outline_node(node: &Node, depth: usize, out: &mut String) {
    let line = node.line;
    let (label, children): (String, Vec<&Node>) = match &node.kind {
        NodeKind::FunctionDeclaration {
            name,
            return_type,
            params,
            body,
        } => {
            let params: Vec<String> = params
                .iter()
                .map(|p| match &p.annotation {
                    Some(ty) => format!("{ty} {}", p.name),
                    None => p.name.clone(),
                })
                .collect();
            let ret = return_type
                .as_ref()
                .map(|t| format!(" -> {t}"))
                .unwrap_or_default();
            (
                format!("FunctionDeclaration {name}({}){ret}", params.join(", ")),
                vec![body.as_ref()],
            )
        }
        NodeKind::VariableDeclaration {
            name,
            annotation,
            value,
        } => {
            let ty = annotation
                .as_ref()
                .map(|t| format!(": {t}"))
                .unwrap_or_default();
            (format!("VariableDeclaration {name}{ty}"), vec![value.as_ref()])
        }
        NodeKind::Assignment { target, value } => {
            ("Assignment".into(), vec![target.as_ref(), value.as_ref()])
        }
        NodeKind::Literal(lit) => (format!("Literal {lit}"), Vec::new()),
        NodeKind::Identifier(name) => (format!("Identifier {name}"), Vec::new()),
        NodeKind::UnaryOperation { op, operand } => {
            (format!("UnaryOperation {op}"), vec![operand.as_ref()])
        }
        NodeKind::BinaryOperation { op, lhs, rhs } => {
            (format!("BinaryOperation {op}"), vec![lhs.as_ref(), rhs.as_ref()])
        }
        NodeKind::ArrayLiteral(items) => ("ArrayLiteral".into(), items.iter().collect()),
        NodeKind::ArrayAccess { array, index } => {
            ("ArrayAccess".into(), vec![array.as_ref(), index.as_ref()])
        }
        NodeKind::FunctionCall { name, args } => {
            (format!("FunctionCall {name}"), args.iter().collect())
        }
        NodeKind::Conditional {
            condition,
            then_block,
            else_block,
        } => {
            let mut children = vec![condition.as_ref(), then_block.as_ref()];
            children.extend(else_block.as_deref());
            ("Conditional".into(), children)
        }
        NodeKind::Loop { condition, body } => {
            ("Loop".into(), vec![condition.as_ref(), body.as_ref()])
        }
        NodeKind::For {
            init,
            condition,
            step,
            body,
        } => {
            let children = [init.as_deref(), condition.as_deref(), step.as_deref()]
                .into_iter()
                .flatten()
                .chain([body.as_ref()])
                .collect();
            ("For".into(), children)
        }
        NodeKind::Break => ("Break".into(), Vec::new()),
        NodeKind::Continue => ("Continue".into(), Vec::new()),
        NodeKind::Return(value) => ("Return".into(), value.as_deref().into_iter().collect()),
        NodeKind::Block(statements) => ("Block".into(), statements.iter().collect()),
    };

    out.push_str(&"  ".repeat(depth));
    out.push_str(&label);
    out.push_str(&format!(" @{line}\n"));
    for child in children {
        outline_node(child, depth + 1, out);
    }
}
