//! Parallel per-function emission.
//!
//! Every function is handed to a bounded `rayon` pool as its own task.
//! Workers report back over a channel in completion order; results are
//! slotted by declaration index once the scope's join barrier has
//! passed, so callers always see declaration order.

use crossbeam::channel;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::codegen_wasm::{EmittedFunction, emit_function};
use crate::diagnostic::Diagnostics;
use crate::error::CoreError;
use crate::ir::IrProgram;

/// Worker count used when none is requested.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Emit every function of `program` on a pool sized to the machine.
pub fn emit(program: &IrProgram, sink: &Diagnostics) -> Vec<EmittedFunction> {
    emit_with_workers(program, sink, default_workers())
}

pub fn emit_with_workers(
    program: &IrProgram,
    sink: &Diagnostics,
    workers: usize,
) -> Vec<EmittedFunction> {
    if workers <= 1 || program.functions.len() <= 1 {
        return emit_sequential(program, sink);
    }
    match build_pool(workers) {
        Ok(pool) => emit_parallel(&pool, program, sink),
        Err(err) => {
            tracing::warn!(%err, "falling back to sequential emission");
            emit_sequential(program, sink)
        }
    }
}

fn build_pool(workers: usize) -> Result<ThreadPool, CoreError> {
    let pool = ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("minic-emit-{i}"))
        .build()?;
    Ok(pool)
}

fn emit_parallel(
    pool: &ThreadPool,
    program: &IrProgram,
    sink: &Diagnostics,
) -> Vec<EmittedFunction> {
    let (tx, rx) = channel::unbounded();
    pool.scope(|scope| {
        for (index, function) in program.functions.values().enumerate() {
            let tx = tx.clone();
            scope.spawn(move |_| {
                let emitted = emit_function(program, index, function, sink);
                tracing::debug!(function = %emitted.name, index, "emitted");
                // The receiver outlives the scope, so sending cannot fail.
                let _ = tx.send(emitted);
            });
        }
    });
    drop(tx);

    let mut slots: Vec<Option<EmittedFunction>> = vec![None; program.functions.len()];
    for emitted in rx {
        let index = emitted.index;
        slots[index] = Some(emitted);
    }
    slots.into_iter().flatten().collect()
}

pub fn emit_sequential(program: &IrProgram, sink: &Diagnostics) -> Vec<EmittedFunction> {
    program
        .functions
        .values()
        .enumerate()
        .map(|(index, function)| emit_function(program, index, function, sink))
        .collect()
}
