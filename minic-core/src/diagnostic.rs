//! Diagnostics shared by every pipeline stage.
//!
//! Stages never throw user-facing problems across each other. They push
//! [`Diagnostic`] values into a [`Diagnostics`] sink owned by the pipeline
//! run, which the driver drains after the last stage returns.

use core::fmt;

use parking_lot::Mutex;

/// How serious a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => f.write_str("warning"),
            Severity::Error => f.write_str("error"),
        }
    }
}

/// The closed taxonomy of problems the pipeline can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    LexError,
    SyntaxError,
    DuplicateDeclaration,
    UndeclaredSymbol,
    UndeclaredFunction,
    NotCallable,
    TypeMismatch,
    NonBooleanCondition,
    ReturnTypeMismatch,
    ArgumentMismatch,
    NotAValue,
    LoopControlOutsideLoop,
    OverloadedCall,
    ConstantOverflow,
    EmissionError,
}

impl DiagnosticKind {
    /// Stable code shown to users.
    pub fn code(self) -> &'static str {
        match self {
            DiagnosticKind::LexError => "E0001",
            DiagnosticKind::SyntaxError => "E0100",
            DiagnosticKind::DuplicateDeclaration => "E0200",
            DiagnosticKind::UndeclaredSymbol => "E0201",
            DiagnosticKind::UndeclaredFunction => "E0202",
            DiagnosticKind::NotCallable => "E0203",
            DiagnosticKind::TypeMismatch => "E0204",
            DiagnosticKind::NonBooleanCondition => "E0205",
            DiagnosticKind::ReturnTypeMismatch => "E0206",
            DiagnosticKind::ArgumentMismatch => "E0207",
            DiagnosticKind::NotAValue => "E0208",
            DiagnosticKind::LoopControlOutsideLoop => "E0209",
            DiagnosticKind::OverloadedCall => "W0200",
            DiagnosticKind::ConstantOverflow => "W0300",
            DiagnosticKind::EmissionError => "E0400",
        }
    }

    /// Severity a diagnostic of this kind is reported with.
    pub fn severity(self) -> Severity {
        match self {
            DiagnosticKind::OverloadedCall | DiagnosticKind::ConstantOverflow => {
                Severity::Warning
            }
            _ => Severity::Error,
        }
    }
}

/// A single reported problem with its source position.
///
/// Lines and columns are 1-based. Diagnostics that have no meaningful
/// column (for example whole-function backend failures) use column 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub message: String,
    pub line: u32,
    pub column: u32,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>, line: u32, column: u32) -> Self {
        Diagnostic {
            severity: kind.severity(),
            kind,
            message: message.into(),
            line,
            column,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}] {}:{}: {}",
            self.severity,
            self.kind.code(),
            self.line,
            self.column,
            self.message
        )
    }
}

/// Thread-safe diagnostics sink for one pipeline run.
///
/// Backend workers append concurrently, so every push takes the lock
/// once and appends a whole entry. Each entry is also forwarded to the
/// `tracing` subscriber as a log line.
#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: Mutex<Vec<Diagnostic>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, diagnostic: Diagnostic) {
        match diagnostic.severity {
            Severity::Error => tracing::error!(
                code = diagnostic.kind.code(),
                line = diagnostic.line,
                column = diagnostic.column,
                "{}",
                diagnostic.message
            ),
            Severity::Warning => tracing::warn!(
                code = diagnostic.kind.code(),
                line = diagnostic.line,
                column = diagnostic.column,
                "{}",
                diagnostic.message
            ),
        }
        self.entries.lock().push(diagnostic);
    }

    pub fn extend(&self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        for diagnostic in diagnostics {
            self.push(diagnostic);
        }
    }

    pub fn error_count(&self) -> usize {
        self.entries.lock().iter().filter(|d| d.is_error()).count()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of everything reported so far, in report order.
    pub fn snapshot(&self) -> Vec<Diagnostic> {
        self.entries.lock().clone()
    }

    /// Take every entry out of the sink, leaving it empty.
    pub fn drain(&self) -> Vec<Diagnostic> {
        core::mem::take(&mut *self.entries.lock())
    }
}
