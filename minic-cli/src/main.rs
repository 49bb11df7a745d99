use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use minic_core::{
    CompileOptions, Compilation, EmitFormat, OptimizeOptions, OverflowPolicy, Status, compile,
};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::{Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt};
use wasmi::{Engine, Linker, Module, Store};

/// Compile a minic source file to WebAssembly.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Source file; standard input when omitted.
    #[arg(short, long)]
    input: Option<String>,

    /// Output file; standard output when omitted.
    #[arg(short, long)]
    output: Option<String>,

    #[arg(
        long,
        value_name = "FORMAT",
        default_value = "wasm",
        help = "Output format: wasm, wat, ir, ast, tokens"
    )]
    emit: String,

    #[arg(long, help = "Disable constant folding")]
    no_fold: bool,

    #[arg(long, help = "Disable dead code elimination")]
    no_dce: bool,

    #[arg(long, help = "Disable function inlining")]
    no_inline: bool,

    #[arg(
        long,
        value_name = "NODES",
        default_value_t = 12,
        help = "Largest callee body, in expression nodes, that may be inlined"
    )]
    inline_threshold: usize,

    #[arg(long, help = "Keep overflowing constant expressions instead of wrapping")]
    preserve_overflow: bool,

    #[arg(long, value_name = "N", help = "Backend worker threads (defaults to CPU count)")]
    jobs: Option<usize>,

    #[arg(long, help = "Run `main` after a successful compilation")]
    run: bool,

    /// Log progress to stderr; repeat for more detail.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    execute(cli)
}

/// `MINIC_LOG` takes precedence over `-v` flags.
fn init_logging(verbose: u8) {
    let filter = match std::env::var("MINIC_LOG") {
        Ok(directives) => EnvFilter::new(directives),
        Err(_) => {
            let level = match verbose {
                0 => LevelFilter::OFF,
                1 => LevelFilter::INFO,
                2 => LevelFilter::DEBUG,
                _ => LevelFilter::TRACE,
            };
            EnvFilter::default().add_directive(level.into())
        }
    };

    let layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .without_time()
        .with_target(false)
        .with_level(true)
        .compact()
        .with_filter(filter);

    let _ = Registry::default().with(layer).try_init();
}

fn options(cli: &Cli) -> CompileOptions {
    CompileOptions {
        optimize: OptimizeOptions {
            constant_folding: !cli.no_fold,
            dead_code_elimination: !cli.no_dce,
            inlining: !cli.no_inline,
            inline_threshold: cli.inline_threshold,
            overflow: if cli.preserve_overflow {
                OverflowPolicy::Preserve
            } else {
                OverflowPolicy::Wrapping
            },
        },
        workers: cli.jobs,
    }
}

fn execute(cli: Cli) -> Result<()> {
    let format: EmitFormat = cli.emit.parse()?;

    let source = match &cli.input {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed to read input file {path}"))?,
        None => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("failed to read standard input")?;
            buffer
        }
    };

    tracing::info!(
        input = cli.input.as_deref().unwrap_or("<stdin>"),
        bytes = source.len(),
        "compiling"
    );
    let compilation = compile(&source, &options(&cli))?;
    tracing::info!(
        status = ?compilation.status,
        diagnostics = compilation.diagnostics.len(),
        "compilation finished"
    );
    for diagnostic in &compilation.diagnostics {
        eprintln!("{diagnostic}");
    }

    // Front-end formats are still useful after a failed run.
    if let Some(bytes) = compilation.render(format) {
        write_output(cli.output.as_deref(), &bytes)?;
        tracing::info!(
            format = %cli.emit,
            bytes = bytes.len(),
            output = cli.output.as_deref().unwrap_or("<stdout>"),
            "wrote output"
        );
    }

    if let Status::Failed(stage) = compilation.status {
        anyhow::bail!(
            "compilation failed during {stage} with {} error(s)",
            compilation.error_count()
        );
    }

    if cli.run {
        tracing::info!("running main");
        let result = run_wasm(&compilation)?;
        tracing::info!(result, "main returned");
        println!("Program exited with {result}");
    }

    Ok(())
}

fn write_output(path: Option<&str>, bytes: &[u8]) -> Result<()> {
    let Some(path) = path else {
        io::stdout()
            .write_all(bytes)
            .context("failed to write standard output")?;
        return Ok(());
    };
    if let Some(parent) = PathBuf::from(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {parent:?}"))?;
        }
    }
    fs::write(path, bytes).with_context(|| format!("failed to write output file {path}"))?;
    Ok(())
}

fn run_wasm(compilation: &Compilation) -> Result<i32> {
    let wasm = compilation
        .wasm
        .as_ref()
        .context("no module was produced")?;
    let engine = Engine::default();
    let module = Module::new(&engine, wasm).context("failed to compile wasm artifact")?;
    let linker = Linker::new(&engine);
    let mut store = Store::new(&engine, ());
    let instance = linker
        .instantiate_and_start(&mut store, &module)
        .context("failed to instantiate module")?;
    let main = instance
        .get_typed_func::<(), i32>(&store, "main")
        .context("exported main function missing or has wrong type")?;
    let result = main
        .call(&mut store, ())
        .context("failed to execute main")?;
    Ok(result)
}
