//! Lexer for minic.
//!
//! `lex` never fails: characters it cannot classify become
//! [`TokenKind::Error`] tokens so later stages can point at them. The
//! returned sequence always ends with exactly one [`TokenKind::Eof`].

use crate::diagnostic::{Diagnostic, DiagnosticKind};

/// Kind of a token produced by the lexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Identifier,
    Keyword,
    /// One of the built-in type names (`int`, `float`, ...).
    TypeName,
    IntLiteral,
    FloatLiteral,
    HexLiteral,
    BinaryLiteral,
    StringLiteral,
    CharLiteral,
    Operator,
    Symbol,
    Comment,
    Directive,
    Error,
    Eof,
}

/// A single classified token.
///
/// `text` is the exact source slice, quotes and comment markers
/// included. `line` and `column` are 1-based and point at the first
/// character of the token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub line: u32,
    pub column: u32,
}

impl Token {
    pub fn is(&self, kind: TokenKind, text: &str) -> bool {
        self.kind == kind && self.text == text
    }

    pub fn is_symbol(&self, text: &str) -> bool {
        self.is(TokenKind::Symbol, text)
    }

    pub fn is_operator(&self, text: &str) -> bool {
        self.is(TokenKind::Operator, text)
    }

    pub fn is_keyword(&self, text: &str) -> bool {
        self.is(TokenKind::Keyword, text)
    }
}

pub const KEYWORDS: &[&str] = &[
    "if", "else", "while", "for", "break", "continue", "return", "true", "false",
];

pub const TYPE_NAMES: &[&str] = &["int", "float", "bool", "char", "string", "void"];

const OPERATOR_CHARS: &[char] = &[
    '+', '-', '*', '/', '=', '<', '>', '&', '|', '!', '%', '^', '?', ':',
];

const SYMBOL_CHARS: &[char] = &['{', '}', '(', ')', ';', ',', '[', ']', '.'];

/// Lex a source string into tokens.
pub fn lex(source: &str) -> Vec<Token> {
    let mut lexer = Lexer {
        chars: source.chars().collect(),
        index: 0,
        line: 1,
        column: 1,
    };
    lexer.run()
}

/// Report one `LexError` diagnostic per error token.
///
/// Returns the number of diagnostics pushed.
pub fn report_lex_errors(tokens: &[Token], sink: &crate::diagnostic::Diagnostics) -> usize {
    let mut count = 0;
    for token in tokens.iter().filter(|t| t.kind == TokenKind::Error) {
        let message = match token.text.chars().next() {
            Some('"') => "unterminated string literal".to_string(),
            Some('\'') => "unterminated character literal".to_string(),
            Some('/') if token.text.starts_with("/*") => "unterminated block comment".to_string(),
            _ => format!("unexpected character `{}`", token.text),
        };
        sink.push(Diagnostic::new(
            DiagnosticKind::LexError,
            message,
            token.line,
            token.column,
        ));
        count += 1;
    }
    count
}

struct Lexer {
    chars: Vec<char>,
    index: usize,
    line: u32,
    column: u32,
}

impl Lexer {
    fn run(&mut self) -> Vec<Token> {
        let mut tokens = Vec::new();

        while let Some(ch) = self.peek_char() {
            if ch.is_whitespace() {
                self.consume_char();
                continue;
            }

            let start = self.index;
            let (line, column) = (self.line, self.column);
            let kind = match ch {
                c if is_ident_start(c) => self.lex_ident_or_keyword(start),
                '0'..='9' => self.lex_number(),
                '"' => self.lex_quoted('"', TokenKind::StringLiteral),
                '\'' => self.lex_quoted('\'', TokenKind::CharLiteral),
                '/' if self.peek_next() == Some('/') => self.lex_line_comment(),
                '/' if self.peek_next() == Some('*') => self.lex_block_comment(),
                '#' => self.lex_directive(),
                c if OPERATOR_CHARS.contains(&c) => self.lex_operator(c),
                c if SYMBOL_CHARS.contains(&c) => {
                    self.consume_char();
                    TokenKind::Symbol
                }
                _ => {
                    self.consume_char();
                    TokenKind::Error
                }
            };

            tokens.push(Token {
                kind,
                text: self.chars[start..self.index].iter().collect(),
                line,
                column,
            });
        }

        tokens.push(Token {
            kind: TokenKind::Eof,
            text: String::new(),
            line: self.line,
            column: self.column,
        });
        tokens
    }

    fn lex_ident_or_keyword(&mut self, start: usize) -> TokenKind {
        while self.peek_char().is_some_and(is_ident_continue) {
            self.consume_char();
        }
        let text: String = self.chars[start..self.index].iter().collect();
        if KEYWORDS.contains(&text.as_str()) {
            TokenKind::Keyword
        } else if TYPE_NAMES.contains(&text.as_str()) {
            TokenKind::TypeName
        } else {
            TokenKind::Identifier
        }
    }

    fn lex_number(&mut self) -> TokenKind {
        let radix_marker = if self.peek_char() == Some('0') {
            self.peek_next()
        } else {
            None
        };

        match radix_marker {
            Some('x' | 'X') => {
                self.consume_char(); // '0'
                self.consume_char(); // 'x'
                while self.peek_char().is_some_and(|c| c.is_ascii_hexdigit()) {
                    self.consume_char();
                }
                TokenKind::HexLiteral
            }
            Some('b' | 'B') => {
                self.consume_char(); // '0'
                self.consume_char(); // 'b'
                while matches!(self.peek_char(), Some('0' | '1')) {
                    self.consume_char();
                }
                TokenKind::BinaryLiteral
            }
            _ => {
                self.consume_digits();
                let fraction = self.peek_next().is_some_and(|c| c.is_ascii_digit());
                if self.peek_char() == Some('.') && fraction {
                    self.consume_char(); // '.'
                    self.consume_digits();
                    TokenKind::FloatLiteral
                } else {
                    TokenKind::IntLiteral
                }
            }
        }
    }

    fn consume_digits(&mut self) {
        while self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
            self.consume_char();
        }
    }

    /// Strings and characters share the escape rule: a backslash
    /// swallows the next character whatever it is.
    fn lex_quoted(&mut self, quote: char, kind: TokenKind) -> TokenKind {
        self.consume_char(); // opening quote
        while let Some(ch) = self.peek_char() {
            match ch {
                '\\' => {
                    self.consume_char();
                    if self.peek_char().is_some() {
                        self.consume_char();
                    }
                }
                c if c == quote => {
                    self.consume_char();
                    return kind;
                }
                _ => self.consume_char(),
            }
        }
        TokenKind::Error
    }

    fn lex_line_comment(&mut self) -> TokenKind {
        while self.peek_char().is_some_and(|c| c != '\n') {
            self.consume_char();
        }
        TokenKind::Comment
    }

    fn lex_block_comment(&mut self) -> TokenKind {
        self.consume_char(); // '/'
        self.consume_char(); // '*'
        while let Some(ch) = self.peek_char() {
            if ch == '*' && self.peek_next() == Some('/') {
                self.consume_char();
                self.consume_char();
                return TokenKind::Comment;
            }
            self.consume_char();
        }
        TokenKind::Error
    }

    fn lex_directive(&mut self) -> TokenKind {
        self.consume_char(); // '#'
        while self.peek_char().is_some_and(is_ident_continue) {
            self.consume_char();
        }
        TokenKind::Directive
    }

    fn lex_operator(&mut self, first: char) -> TokenKind {
        self.consume_char();
        if let Some(next) = self.peek_char() {
            let pairs = match first {
                '=' | '<' | '>' | '&' | '|' => next == first || next == '=',
                '!' => next == '=',
                _ => false,
            };
            if pairs {
                self.consume_char();
            }
        }
        TokenKind::Operator
    }

    fn peek_char(&self) -> Option<char> {
        self.chars.get(self.index).copied()
    }

    fn peek_next(&self) -> Option<char> {
        self.chars.get(self.index + 1).copied()
    }

    fn consume_char(&mut self) {
        if let Some(ch) = self.peek_char() {
            self.index += 1;
            if ch == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
    }
}

fn is_ident_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_'
}

fn is_ident_continue(ch: char) -> bool {
    is_ident_start(ch) || ch.is_ascii_digit()
}
