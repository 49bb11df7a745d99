//! Recursive-descent parser for minic.
//!
//! One token of lookahead, no backtracking. The first structural
//! mismatch aborts the whole parse: the result then carries no program
//! and exactly one `SyntaxError` diagnostic.

use crate::ast::{BinaryOp, Literal, Node, NodeKind, Param, Program, TypeAnnotation, UnaryOp};
use crate::diagnostic::{Diagnostic, DiagnosticKind};
use crate::lexer::{Token, TokenKind, lex};

/// Result of parsing one compilation unit.
#[derive(Debug)]
pub struct ParseResult {
    pub program: Option<Program>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Parse a token sequence produced by [`lex`].
pub fn parse(tokens: &[Token]) -> ParseResult {
    let tokens: Vec<&Token> = tokens
        .iter()
        .filter(|t| t.kind != TokenKind::Comment)
        .collect();
    let mut parser = Parser {
        tokens,
        position: 0,
        depth: 0,
    };
    match parser.program() {
        Ok(program) => ParseResult {
            program: Some(program),
            diagnostics: Vec::new(),
        },
        Err(diagnostic) => ParseResult {
            program: None,
            diagnostics: vec![diagnostic],
        },
    }
}

/// Convenience for tests and tools: lex then parse.
pub fn parse_source(source: &str) -> ParseResult {
    parse(&lex(source))
}

type PResult<T> = Result<T, Diagnostic>;

/// Deepest nesting of blocks and sub-expressions accepted; deeper
/// input is a syntax error rather than unbounded recursion.
pub const MAX_NESTING: usize = 64;

struct Parser<'t> {
    tokens: Vec<&'t Token>,
    position: usize,
    depth: usize,
}

static EOF: Token = Token {
    kind: TokenKind::Eof,
    text: String::new(),
    line: 1,
    column: 1,
};

impl<'t> Parser<'t> {
    fn program(&mut self) -> PResult<Program> {
        let mut declarations = Vec::new();
        loop {
            let token = self.peek();
            match token.kind {
                TokenKind::Eof => break,
                TokenKind::Directive => self.skip_directive(),
                _ => declarations.push(self.declaration()?),
            }
        }
        Ok(Program { declarations })
    }

    /// Directives are recognized but not interpreted: drop the
    /// directive and everything after it on the same line.
    fn skip_directive(&mut self) {
        let line = self.advance().line;
        while self.peek().kind != TokenKind::Eof && self.peek().line == line {
            self.advance();
        }
    }

    fn declaration(&mut self) -> PResult<Node> {
        let start = self.peek();
        let annotation = if start.kind == TokenKind::TypeName {
            Some(self.type_annotation()?)
        } else {
            None
        };
        let name = self.expect_identifier("declaration name")?;

        if self.peek().is_symbol("(") {
            self.function_rest(start, annotation, name)
        } else if self.peek().is_operator("=") {
            self.variable_rest(start, annotation, name)
        } else {
            Err(self.error("`(` or `=` after declaration name"))
        }
    }

    fn type_annotation(&mut self) -> PResult<TypeAnnotation> {
        let base = self.advance().text.clone();
        let mut array_depth = 0;
        while self.peek().is_symbol("[") {
            self.advance();
            self.expect_symbol("]")?;
            array_depth += 1;
        }
        Ok(TypeAnnotation { base, array_depth })
    }

    fn function_rest(
        &mut self,
        start: &Token,
        return_type: Option<TypeAnnotation>,
        name: String,
    ) -> PResult<Node> {
        self.expect_symbol("(")?;
        let mut params = Vec::new();
        if !self.peek().is_symbol(")") {
            loop {
                let at = self.peek();
                let annotation = if at.kind == TokenKind::TypeName {
                    Some(self.type_annotation()?)
                } else {
                    None
                };
                let param_name = self.expect_identifier("parameter name")?;
                params.push(Param {
                    name: param_name,
                    annotation,
                    line: at.line,
                    column: at.column,
                });
                if self.peek().is_symbol(",") {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect_symbol(")")?;
        let body = self.block()?;
        Ok(Node::new(
            NodeKind::FunctionDeclaration {
                name,
                return_type,
                params,
                body: Box::new(body),
            },
            start.line,
            start.column,
        ))
    }

    fn variable_rest(
        &mut self,
        start: &Token,
        annotation: Option<TypeAnnotation>,
        name: String,
    ) -> PResult<Node> {
        self.expect_operator("=")?;
        let value = self.expression()?;
        self.expect_symbol(";")?;
        Ok(Node::new(
            NodeKind::VariableDeclaration {
                name,
                annotation,
                value: Box::new(value),
            },
            start.line,
            start.column,
        ))
    }

    fn block(&mut self) -> PResult<Node> {
        self.nested(|parser| {
            let open = parser.expect_symbol("{")?;
            let mut statements = Vec::new();
            while !parser.peek().is_symbol("}") {
                if parser.peek().kind == TokenKind::Eof {
                    return Err(parser.error("`}` to close the block"));
                }
                statements.push(parser.statement()?);
            }
            parser.advance();
            Ok(Node::new(NodeKind::Block(statements), open.line, open.column))
        })
    }

    fn statement(&mut self) -> PResult<Node> {
        let start = self.peek();
        match start.kind {
            TokenKind::Keyword if start.text == "if" => self.conditional(),
            TokenKind::Keyword if start.text == "while" => self.while_loop(),
            TokenKind::Keyword if start.text == "for" => self.for_loop(),
            TokenKind::Keyword if start.text == "break" => self.loop_control(NodeKind::Break),
            TokenKind::Keyword if start.text == "continue" => {
                self.loop_control(NodeKind::Continue)
            }
            TokenKind::Keyword if start.text == "return" => self.return_statement(),
            TokenKind::Symbol if start.text == "{" => self.block(),
            TokenKind::TypeName => {
                let annotation = self.type_annotation()?;
                let name = self.expect_identifier("variable name")?;
                self.variable_rest(start, Some(annotation), name)
            }
            _ => self.expression_statement(),
        }
    }

    fn conditional(&mut self) -> PResult<Node> {
        let keyword = self.advance();
        self.expect_symbol("(")?;
        let condition = self.expression()?;
        self.expect_symbol(")")?;
        let then_block = self.block()?;

        let else_block = if self.peek().is_keyword("else") {
            self.advance();
            if self.peek().is_keyword("if") {
                // `else if` is an else block holding one conditional.
                let nested = self.conditional()?;
                let (line, column) = (nested.line, nested.column);
                Some(Box::new(Node::new(NodeKind::Block(vec![nested]), line, column)))
            } else {
                Some(Box::new(self.block()?))
            }
        } else {
            None
        };

        Ok(Node::new(
            NodeKind::Conditional {
                condition: Box::new(condition),
                then_block: Box::new(then_block),
                else_block,
            },
            keyword.line,
            keyword.column,
        ))
    }

    fn while_loop(&mut self) -> PResult<Node> {
        let keyword = self.advance();
        self.expect_symbol("(")?;
        let condition = self.expression()?;
        self.expect_symbol(")")?;
        let body = self.block()?;
        Ok(Node::new(
            NodeKind::Loop {
                condition: Box::new(condition),
                body: Box::new(body),
            },
            keyword.line,
            keyword.column,
        ))
    }

    /// `for (init; condition; step) { ... }`. The init part is a
    /// declaration, assignment or expression statement; the step is an
    /// assignment or expression without its `;`.
    fn for_loop(&mut self) -> PResult<Node> {
        let keyword = self.advance();
        self.expect_symbol("(")?;

        let init = if self.peek().is_symbol(";") {
            self.advance();
            None
        } else if self.peek().kind == TokenKind::TypeName {
            let start = self.peek();
            let annotation = self.type_annotation()?;
            let name = self.expect_identifier("variable name")?;
            Some(Box::new(self.variable_rest(start, Some(annotation), name)?))
        } else {
            Some(Box::new(self.expression_statement()?))
        };

        let condition = if self.peek().is_symbol(";") {
            None
        } else {
            Some(Box::new(self.expression()?))
        };
        self.expect_symbol(";")?;

        let step = if self.peek().is_symbol(")") {
            None
        } else {
            Some(Box::new(self.simple_statement()?))
        };
        self.expect_symbol(")")?;

        let body = self.block()?;
        Ok(Node::new(
            NodeKind::For {
                init,
                condition,
                step,
                body: Box::new(body),
            },
            keyword.line,
            keyword.column,
        ))
    }

    fn loop_control(&mut self, kind: NodeKind) -> PResult<Node> {
        let keyword = self.advance();
        self.expect_symbol(";")?;
        Ok(Node::new(kind, keyword.line, keyword.column))
    }

    fn return_statement(&mut self) -> PResult<Node> {
        let keyword = self.advance();
        let value = if self.peek().is_symbol(";") {
            None
        } else {
            Some(Box::new(self.expression()?))
        };
        self.expect_symbol(";")?;
        Ok(Node::new(NodeKind::Return(value), keyword.line, keyword.column))
    }

    fn expression_statement(&mut self) -> PResult<Node> {
        let statement = self.simple_statement()?;
        self.expect_symbol(";")?;
        Ok(statement)
    }

    /// `expr` or `target = expr`. The target is parsed as an ordinary
    /// expression first; a following `=` turns it into an assignment.
    fn simple_statement(&mut self) -> PResult<Node> {
        let expr = self.expression()?;
        if !self.peek().is_operator("=") {
            return Ok(expr);
        }
        if !matches!(expr.kind, NodeKind::Identifier(_) | NodeKind::ArrayAccess { .. }) {
            return Err(self.error("`;` (left side of `=` is not assignable)"));
        }
        self.advance();
        let value = self.expression()?;
        let (line, column) = (expr.line, expr.column);
        Ok(Node::new(
            NodeKind::Assignment {
                target: Box::new(expr),
                value: Box::new(value),
            },
            line,
            column,
        ))
    }

    fn expression(&mut self) -> PResult<Node> {
        self.nested(|parser| parser.binary(1))
    }

    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        if self.depth >= MAX_NESTING {
            return Err(self.error(&format!("at most {MAX_NESTING} levels of nesting")));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    /// Precedence climbing; all binary operators are left-associative.
    fn binary(&mut self, min_precedence: u8) -> PResult<Node> {
        let mut lhs = self.unary()?;
        loop {
            let token = self.peek();
            let op = match token.kind {
                TokenKind::Operator => BinaryOp::from_operator(&token.text),
                _ => None,
            };
            let Some(op) = op else { break };
            if op.precedence() < min_precedence {
                break;
            }
            self.advance();
            let rhs = self.binary(op.precedence() + 1)?;
            lhs = Node::new(
                NodeKind::BinaryOperation {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                token.line,
                token.column,
            );
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> PResult<Node> {
        let token = self.peek();
        let op = if token.is_operator("-") {
            Some(UnaryOp::Neg)
        } else if token.is_operator("!") {
            Some(UnaryOp::Not)
        } else {
            None
        };
        match op {
            Some(UnaryOp::Neg) if self.peek_next().kind == TokenKind::IntLiteral => {
                self.advance();
                self.negative_literal(token)
            }
            Some(op) => {
                self.advance();
                let operand = self.nested(Self::unary)?;
                Ok(Node::new(
                    NodeKind::UnaryOperation {
                        op,
                        operand: Box::new(operand),
                    },
                    token.line,
                    token.column,
                ))
            }
            None => self.postfix(),
        }
    }

    /// `-` before a decimal literal is part of the literal, so
    /// `-2147483648` is in range.
    fn negative_literal(&mut self, minus: &Token) -> PResult<Node> {
        let digits = self.peek();
        let value = digits
            .text
            .parse::<i64>()
            .ok()
            .and_then(|v| i32::try_from(-v).ok())
            .ok_or_else(|| self.error("integer literal within the `int` range"))?;
        self.advance();
        let literal = Node::new(NodeKind::Literal(Literal::Int(value)), minus.line, minus.column);
        self.postfix_from(literal)
    }

    fn postfix(&mut self) -> PResult<Node> {
        let expr = self.primary()?;
        self.postfix_from(expr)
    }

    fn postfix_from(&mut self, mut expr: Node) -> PResult<Node> {
        while self.peek().is_symbol("[") {
            let open = self.advance();
            let index = self.expression()?;
            self.expect_symbol("]")?;
            expr = Node::new(
                NodeKind::ArrayAccess {
                    array: Box::new(expr),
                    index: Box::new(index),
                },
                open.line,
                open.column,
            );
        }
        Ok(expr)
    }

    fn primary(&mut self) -> PResult<Node> {
        let token = self.peek();
        let (line, column) = (token.line, token.column);
        let literal =
            |lit: Literal| -> PResult<Node> { Ok(Node::new(NodeKind::Literal(lit), line, column)) };

        match token.kind {
            TokenKind::IntLiteral => {
                let value = token
                    .text
                    .parse::<i32>()
                    .map_err(|_| self.error("integer literal within the `int` range"))?;
                self.advance();
                literal(Literal::Int(value))
            }
            TokenKind::HexLiteral | TokenKind::BinaryLiteral => {
                let radix = if token.kind == TokenKind::HexLiteral { 16 } else { 2 };
                let value = u32::from_str_radix(&token.text[2..], radix)
                    .map_err(|_| self.error("digits after the radix prefix (32-bit at most)"))?;
                self.advance();
                literal(Literal::Int(value as i32))
            }
            TokenKind::FloatLiteral => {
                let value = token
                    .text
                    .parse::<f64>()
                    .map_err(|_| self.error("float literal"))?;
                self.advance();
                literal(Literal::Float(value))
            }
            TokenKind::StringLiteral => {
                self.advance();
                literal(Literal::Str(unescape(&token.text[1..token.text.len() - 1])))
            }
            TokenKind::CharLiteral => {
                let content = unescape(&token.text[1..token.text.len() - 1]);
                let mut chars = content.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => {
                        self.advance();
                        literal(Literal::Char(c))
                    }
                    _ => Err(self.error("exactly one character in a character literal")),
                }
            }
            TokenKind::Keyword if token.text == "true" || token.text == "false" => {
                self.advance();
                literal(Literal::Bool(token.text == "true"))
            }
            TokenKind::Identifier => {
                self.advance();
                if self.peek().is_symbol("(") {
                    self.call_rest(token)
                } else {
                    Ok(Node::new(NodeKind::Identifier(token.text.clone()), line, column))
                }
            }
            TokenKind::Symbol if token.text == "(" => {
                self.advance();
                let inner = self.expression()?;
                self.expect_symbol(")")?;
                Ok(inner)
            }
            TokenKind::Symbol if token.text == "[" => {
                self.advance();
                let items = self.comma_list("]")?;
                Ok(Node::new(NodeKind::ArrayLiteral(items), line, column))
            }
            _ => Err(self.error("expression")),
        }
    }

    fn call_rest(&mut self, name: &Token) -> PResult<Node> {
        self.expect_symbol("(")?;
        let args = self.comma_list(")")?;
        Ok(Node::new(
            NodeKind::FunctionCall {
                name: name.text.clone(),
                args,
            },
            name.line,
            name.column,
        ))
    }

    /// Comma separated expressions up to and including `close`.
    fn comma_list(&mut self, close: &str) -> PResult<Vec<Node>> {
        let mut items = Vec::new();
        if !self.peek().is_symbol(close) {
            loop {
                items.push(self.expression()?);
                if self.peek().is_symbol(",") {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect_symbol(close)?;
        Ok(items)
    }

    fn expect_identifier(&mut self, what: &str) -> PResult<String> {
        if self.peek().kind == TokenKind::Identifier {
            Ok(self.advance().text.clone())
        } else {
            Err(self.error(what))
        }
    }

    fn expect_symbol(&mut self, symbol: &str) -> PResult<&'t Token> {
        if self.peek().is_symbol(symbol) {
            Ok(self.advance())
        } else {
            Err(self.error(&format!("`{symbol}`")))
        }
    }

    fn expect_operator(&mut self, operator: &str) -> PResult<&'t Token> {
        if self.peek().is_operator(operator) {
            Ok(self.advance())
        } else {
            Err(self.error(&format!("`{operator}`")))
        }
    }

    fn error(&self, expected: &str) -> Diagnostic {
        let token = self.peek();
        let found = match token.kind {
            TokenKind::Eof => "end of input".to_string(),
            _ => format!("`{}`", token.text),
        };
        Diagnostic::new(
            DiagnosticKind::SyntaxError,
            format!("expected {expected}, found {found}"),
            token.line,
            token.column,
        )
    }

    /// The cursor never moves past the last token; a sequence without a
    /// trailing `Eof` reads as if it had one.
    fn peek(&self) -> &'t Token {
        self.token_at(self.position)
    }

    fn peek_next(&self) -> &'t Token {
        self.token_at(self.position + 1)
    }

    fn token_at(&self, position: usize) -> &'t Token {
        if let Some(token) = self.tokens.get(position).copied() {
            return token;
        }
        match self.tokens.last().copied() {
            Some(last) if last.kind == TokenKind::Eof => last,
            _ => &EOF,
        }
    }

    fn advance(&mut self) -> &'t Token {
        let token = self.peek();
        if self.position + 1 < self.tokens.len() {
            self.position += 1;
        }
        token
    }
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
