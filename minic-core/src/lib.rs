//! Core compiler pipeline for minic, a small C-like language.
//!
//! The pipeline is roughly:
//!
//!   source text
//!     -> lexer      (tokens)
//!     -> parser     (tagged-variant AST)
//!     -> typecheck  (scopes + type rules, diagnostics only)
//!     -> lower      (per-function IR)
//!     -> optimize   (folding, dead code elimination, inlining)
//!     -> backend    (parallel wasm emission, reassembled in order)
//!
//! Higher-level tools (the CLI, tests, editors) should depend on this
//! crate rather than reimplementing the pipeline.

// ---------------------------------------------------------------------
// Error handling and diagnostics
// ---------------------------------------------------------------------

pub mod diagnostic;
pub mod error;

// ---------------------------------------------------------------------
// Front-end: lexing and parsing
// ---------------------------------------------------------------------

pub mod lexer;
pub mod parser;
pub mod ast;

// ---------------------------------------------------------------------
// Semantic layers: types, scopes, type checking
// ---------------------------------------------------------------------

pub mod types;
pub mod scope;
pub mod typecheck;

// ---------------------------------------------------------------------
// Middle-end: IR, lowering and optimization passes
// ---------------------------------------------------------------------

pub mod ir;
pub mod lower;
pub mod optimize;

// ---------------------------------------------------------------------
// Back-end: code generation and compiler orchestration
// ---------------------------------------------------------------------

pub mod codegen_wasm;
pub mod backend;
pub mod compiler;

// ---------------------------------------------------------------------
// Public API re-exports
// ---------------------------------------------------------------------

pub use compiler::{CompileOptions, Compilation, EmitFormat, Stage, Status, compile};
pub use diagnostic::{Diagnostic, DiagnosticKind, Diagnostics, Severity};
pub use error::CoreError;
pub use optimize::{OptimizeOptions, OverflowPolicy};
