//! Pipeline driver.
//!
//! `compile` runs lexing, parsing, analysis, lowering, optimization and
//! emission in order against one shared diagnostics sink. Every stage
//! but the backend is sequential; a stage that reports errors stops the
//! run before anything is emitted.

use core::fmt;
use core::str::FromStr;

use crate::ast::{Program, outline};
use crate::backend;
use crate::codegen_wasm::{EmittedFunction, assemble};
use crate::diagnostic::{Diagnostic, Diagnostics};
use crate::error::CoreError;
use crate::ir::IrProgram;
use crate::lexer::{Token, lex, report_lex_errors};
use crate::lower::lower;
use crate::optimize::{OptimizeOptions, OptimizeStats, optimize};
use crate::parser::parse;
use crate::typecheck::analyze;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileOptions {
    pub optimize: OptimizeOptions,
    /// Backend worker count; `None` sizes the pool to the machine.
    pub workers: Option<usize>,
}

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Lex,
    Parse,
    Analyze,
    Emit,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Lex => "lexing",
            Stage::Parse => "parsing",
            Stage::Analyze => "semantic analysis",
            Stage::Emit => "emission",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Succeeded,
    Failed(Stage),
}

/// Everything one run produced. Later fields stay empty when an earlier
/// stage failed.
#[derive(Debug, Clone)]
pub struct Compilation {
    pub status: Status,
    pub tokens: Vec<Token>,
    pub program: Option<Program>,
    pub ir: Option<IrProgram>,
    pub stats: OptimizeStats,
    /// Backend output in declaration order.
    pub functions: Vec<EmittedFunction>,
    pub wasm: Option<Vec<u8>>,
    /// Sorted by position; reports at the same position keep their order.
    pub diagnostics: Vec<Diagnostic>,
}

impl Compilation {
    fn new(tokens: Vec<Token>) -> Self {
        Compilation {
            status: Status::Succeeded,
            tokens,
            program: None,
            ir: None,
            stats: OptimizeStats::default(),
            functions: Vec::new(),
            wasm: None,
            diagnostics: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == Status::Succeeded
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.is_error()).count()
    }

    /// Render one artifact; `None` if the run stopped before producing it.
    pub fn render(&self, format: EmitFormat) -> Option<Vec<u8>> {
        match format {
            EmitFormat::Wasm => self.wasm.clone(),
            EmitFormat::Wat => {
                if !self.succeeded() {
                    return None;
                }
                let listing: String = self.functions.iter().map(|f| f.listing.as_str()).collect();
                Some(listing.into_bytes())
            }
            EmitFormat::Ir => self.ir.as_ref().map(|ir| ir.to_string().into_bytes()),
            EmitFormat::Ast => self.program.as_ref().map(|p| outline(p).into_bytes()),
            EmitFormat::Tokens => {
                let mut out = String::new();
                for token in &self.tokens {
                    out.push_str(&format!(
                        "{}:{} {:?} {:?}\n",
                        token.line, token.column, token.kind, token.text
                    ));
                }
                Some(out.into_bytes())
            }
        }
    }

    fn finish(mut self, status: Status, sink: &Diagnostics) -> Self {
        let mut diagnostics = sink.drain();
        diagnostics.sort_by_key(|d| (d.line, d.column));
        self.status = status;
        self.diagnostics = diagnostics;
        self
    }
}

/// Artifacts a run can be rendered as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitFormat {
    Wasm,
    Wat,
    Ir,
    Ast,
    Tokens,
}

impl FromStr for EmitFormat {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wasm" => Ok(EmitFormat::Wasm),
            "wat" => Ok(EmitFormat::Wat),
            "ir" => Ok(EmitFormat::Ir),
            "ast" => Ok(EmitFormat::Ast),
            "tokens" => Ok(EmitFormat::Tokens),
            other => Err(CoreError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Compile one source buffer to a wasm module.
///
/// Problems in the program come back as diagnostics with a failed
/// status; `Err` is reserved for internal invariant breaks.
pub fn compile(source: &str, options: &CompileOptions) -> Result<Compilation, CoreError> {
    let sink = Diagnostics::new();

    let tokens = {
        let _span = tracing::info_span!("lex").entered();
        let tokens = lex(source);
        tracing::debug!(count = tokens.len(), "tokenized");
        tokens
    };
    let mut compilation = Compilation::new(tokens);
    if report_lex_errors(&compilation.tokens, &sink) > 0 {
        return Ok(compilation.finish(Status::Failed(Stage::Lex), &sink));
    }

    let parsed = {
        let _span = tracing::info_span!("parse").entered();
        parse(&compilation.tokens)
    };
    sink.extend(parsed.diagnostics);
    let Some(program) = parsed.program else {
        return Ok(compilation.finish(Status::Failed(Stage::Parse), &sink));
    };

    let analysis = {
        let _span = tracing::info_span!("analyze").entered();
        analyze(&program)
    };
    let clean = analysis.is_clean();
    sink.extend(analysis.diagnostics);
    if !clean {
        compilation.program = Some(program);
        return Ok(compilation.finish(Status::Failed(Stage::Analyze), &sink));
    }

    let mut ir = {
        let _span = tracing::info_span!("lower").entered();
        lower(&program)?
    };
    compilation.program = Some(program);
    {
        let _span = tracing::info_span!("optimize").entered();
        compilation.stats = optimize(&mut ir, &options.optimize, &sink);
    }

    let functions = {
        let _span = tracing::info_span!("emit", functions = ir.functions.len()).entered();
        let workers = options.workers.unwrap_or_else(backend::default_workers);
        backend::emit_with_workers(&ir, &sink, workers)
    };
    let complete = functions.iter().all(|f| f.body.is_some());
    compilation.functions = functions;
    if !complete {
        compilation.ir = Some(ir);
        return Ok(compilation.finish(Status::Failed(Stage::Emit), &sink));
    }

    let wasm = assemble(&ir, &compilation.functions)?;
    tracing::info!(bytes = wasm.len(), "module assembled");
    compilation.ir = Some(ir);
    compilation.wasm = Some(wasm);
    Ok(compilation.finish(Status::Succeeded, &sink))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::DiagnosticKind;
    use crate::ir::Op;
    use crate::optimize::OverflowPolicy;

    fn compile_default(source: &str) -> Compilation {
        compile(source, &CompileOptions::default()).expect("compile")
    }

    fn run_main(compilation: &Compilation) -> Result<i32, wasmi::Error> {
        let wasm = compilation.wasm.as_ref().expect("wasm output");
        let engine = wasmi::Engine::default();
        let module = wasmi::Module::new(&engine, wasm).expect("module");
        let linker = wasmi::Linker::new(&engine);
        let mut store = wasmi::Store::new(&engine, ());
        let instance = linker
            .instantiate_and_start(&mut store, &module)
            .expect("instantiate");
        let main = instance
            .get_typed_func::<(), i32>(&store, "main")
            .expect("typed func");
        main.call(&mut store, ())
    }

    fn kinds(compilation: &Compilation) -> Vec<DiagnosticKind> {
        compilation.diagnostics.iter().map(|d| d.kind).collect()
    }

    #[test]
    fn compiles_and_runs_a_program() {
        let source = "
            int limit = 5;
            fib(n) {
                if (n < 2) { return n; }
                return fib(n - 1) + fib(n - 2);
            }
            main() { return fib(limit * 2); }
        ";
        let compilation = compile_default(source);
        assert!(compilation.succeeded(), "{:?}", compilation.diagnostics);
        assert_eq!(run_main(&compilation).expect("run"), 55);
    }

    #[test]
    fn empty_program_succeeds_with_zero_functions() {
        let compilation = compile_default("");
        assert_eq!(compilation.status, Status::Succeeded);
        assert!(compilation.functions.is_empty());
        assert!(compilation.diagnostics.is_empty());
        let wasm = compilation.wasm.expect("module");
        wasmparser::Validator::new()
            .validate_all(&wasm)
            .expect("valid module");
    }

    #[test]
    fn lex_errors_stop_before_parsing() {
        let compilation = compile_default("main() { return 1 @ 2; }");
        assert_eq!(compilation.status, Status::Failed(Stage::Lex));
        assert_eq!(kinds(&compilation), [DiagnosticKind::LexError]);
        assert!(compilation.program.is_none());
        assert!(compilation.wasm.is_none());
    }

    #[test]
    fn syntax_errors_fail_the_parse() {
        let compilation = compile_default("main() { return (1 + ; }");
        assert_eq!(compilation.status, Status::Failed(Stage::Parse));
        assert_eq!(kinds(&compilation), [DiagnosticKind::SyntaxError]);
        assert!(compilation.functions.is_empty());
    }

    #[test]
    fn condition_is_checked_before_folding() {
        let compilation = compile_default("main() { if (1 + 2) { return 1; } }");
        assert_eq!(compilation.status, Status::Failed(Stage::Analyze));
        assert_eq!(kinds(&compilation), [DiagnosticKind::NonBooleanCondition]);
        assert!(compilation.ir.is_none());
        assert!(compilation.functions.is_empty());
    }

    #[test]
    fn semantic_errors_are_all_reported_in_source_order() {
        let source = "main() {\n  return missing;\n}\nvoid f() { g(); }\nint f() { return 1; }";
        let compilation = compile_default(source);
        assert_eq!(compilation.status, Status::Failed(Stage::Analyze));
        let positions: Vec<_> = compilation
            .diagnostics
            .iter()
            .map(|d| (d.line, d.column))
            .collect();
        let mut sorted = positions.clone();
        sorted.sort();
        assert_eq!(positions, sorted);
        assert!(kinds(&compilation).contains(&DiagnosticKind::UndeclaredSymbol));
        assert!(kinds(&compilation).contains(&DiagnosticKind::UndeclaredFunction));
        assert!(kinds(&compilation).contains(&DiagnosticKind::DuplicateDeclaration));
    }

    #[test]
    fn dead_assignments_disappear_from_the_ir() {
        let compilation = compile_default("main() { x = 10; y = x; }");
        assert!(compilation.succeeded());
        let ir = compilation.ir.expect("ir");
        assert_eq!(ir.functions["main"].op_count(), 0);

        let compilation = compile_default("main() { x = 10; return x; }");
        let ir = compilation.ir.as_ref().expect("ir");
        assert!(matches!(ir.functions["main"].ops[0], Op::Assign { .. }));
        assert_eq!(run_main(&compilation).expect("run"), 10);
    }

    #[test]
    fn disabled_passes_leave_the_ir_alone() {
        let options = CompileOptions {
            optimize: OptimizeOptions::none(),
            workers: Some(1),
        };
        let source = "main() { x = 10; y = x; return 2 * 3; }";
        let compilation = compile(source, &options).expect("compile");
        let ir = compilation.ir.as_ref().expect("ir");
        assert_eq!(ir.functions["main"].op_count(), 3);
        assert_eq!(compilation.stats, OptimizeStats::default());
        assert_eq!(run_main(&compilation).expect("run"), 6);
    }

    #[test]
    fn folding_matches_runtime_overflow() {
        let source = "main() { return 2147483647 + 1; }";
        let folded = compile_default(source);
        assert_eq!(run_main(&folded).expect("run"), i32::MIN);

        let options = CompileOptions {
            optimize: OptimizeOptions {
                overflow: OverflowPolicy::Preserve,
                ..OptimizeOptions::default()
            },
            workers: None,
        };
        let preserved = compile(source, &options).expect("compile");
        assert!(preserved.succeeded());
        assert_eq!(kinds(&preserved), [DiagnosticKind::ConstantOverflow]);
        assert_eq!(run_main(&preserved).expect("run"), i32::MIN);
    }

    #[test]
    fn optimized_loops_keep_their_control_flow() {
        let source = "
            int limit = 10;
            main() {
                total = 0;
                for (int i = 0; i < limit; i = i + 1) {
                    if (i == 7) { break; }
                    if (i % 2 == 1) { continue; }
                    total = total + i;
                }
                for (;;) { total = total + 100; break; }
                return total;
            }
        ";
        let compilation = compile_default(source);
        assert!(compilation.succeeded(), "{:?}", compilation.diagnostics);
        assert_eq!(run_main(&compilation).expect("run"), 112);
    }

    #[test]
    fn loop_control_outside_a_loop_fails_analysis() {
        let compilation = compile_default("main() { break; return 0; }");
        assert_eq!(compilation.status, Status::Failed(Stage::Analyze));
        assert_eq!(kinds(&compilation), [DiagnosticKind::LoopControlOutsideLoop]);
        assert!(compilation.render(EmitFormat::Ast).is_some());
    }

    #[test]
    fn doubling_call_chain_stays_small() {
        let mut source = String::from("f0(x) { return x + 1; }\n");
        for level in 1..=20 {
            let prev = level - 1;
            source.push_str(&format!("f{level}(x) {{ return f{prev}(x) + f{prev}(x); }}\n"));
        }
        source.push_str("main() { return f20(0); }");

        let compilation = compile_default(&source);
        assert!(compilation.succeeded(), "{:?}", compilation.diagnostics);
        assert!(compilation.stats.inlined > 0);
        let wasm = compilation.wasm.as_ref().expect("wasm");
        assert!(wasm.len() < 4096, "module is {} bytes", wasm.len());
        assert_eq!(run_main(&compilation).expect("run"), 1 << 20);
    }

    #[test]
    fn most_negative_int_literal_compiles() {
        let compilation = compile_default("main() { return -2147483648; }");
        assert!(compilation.succeeded(), "{:?}", compilation.diagnostics);
        assert_eq!(run_main(&compilation).expect("run"), i32::MIN);
    }

    #[test]
    fn runaway_nesting_fails_the_parse() {
        let source = format!("main() {{ return {}1{}; }}", "(".repeat(5000), ")".repeat(5000));
        let compilation = compile_default(&source);
        assert_eq!(compilation.status, Status::Failed(Stage::Parse));
        assert_eq!(kinds(&compilation), [DiagnosticKind::SyntaxError]);
    }

    #[test]
    fn division_by_zero_is_left_to_trap_at_run_time() {
        let compilation = compile_default("main() { return 7 / 0; }");
        assert!(compilation.succeeded());
        assert!(run_main(&compilation).is_err());
    }

    #[test]
    fn emission_failure_keeps_other_functions() {
        let compilation = compile_default("greet() { s = \"hi\"; return 1; } main() { return 2; }");
        assert_eq!(compilation.status, Status::Failed(Stage::Emit));
        assert_eq!(kinds(&compilation), [DiagnosticKind::EmissionError]);
        assert!(compilation.wasm.is_none());
        assert_eq!(compilation.functions.len(), 2);
        assert!(compilation.functions[0].body.is_none());
        assert!(compilation.functions[1].body.is_some());
    }

    #[test]
    fn renders_every_format() {
        let compilation = compile_default("main() { return 1; }");
        for format in ["wasm", "wat", "ir", "ast", "tokens"] {
            let format: EmitFormat = format.parse().expect("format");
            assert!(compilation.render(format).is_some(), "{format:?}");
        }
        let ir = String::from_utf8(compilation.render(EmitFormat::Ir).expect("ir")).expect("utf8");
        assert!(ir.contains("fn main() -> int {"));

        let err = "llvm".parse::<EmitFormat>().unwrap_err();
        assert!(matches!(err, CoreError::UnsupportedFormat(ref name) if name == "llvm"));
    }

    #[test]
    fn failed_runs_render_only_what_exists() {
        let compilation = compile_default("main() { if (1) { return 1; } return 0; }");
        assert!(compilation.render(EmitFormat::Ast).is_some());
        assert!(compilation.render(EmitFormat::Ir).is_none());
        assert!(compilation.render(EmitFormat::Wat).is_none());
        assert!(compilation.render(EmitFormat::Wasm).is_none());
    }
}
