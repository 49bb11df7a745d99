use thiserror::Error;

/// Failures of the library API itself, as opposed to problems in the
/// compiled program (those are reported as diagnostics).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unsupported emit format: {0}")]
    UnsupportedFormat(String),
    #[error("cannot lower a program that failed analysis: {0}")]
    Lowering(String),
    #[error("function `{function}` has no emitted body")]
    MissingBody { function: String },
    #[error("cannot assemble module: {0}")]
    Assembly(String),
    #[error("failed to build backend worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}
