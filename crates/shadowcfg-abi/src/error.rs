use std::io;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AbiResolutionError>;

/// Every failure to produce a verified ABI table. None of these is recoverable by guessing: a
/// caller that gets one of these must not touch the device-access layer.
#[derive(Debug, Error)]
pub enum AbiResolutionError {
    #[error("C compiler {compiler:?} not found")]
    CompilerNotFound { compiler: String },

    #[error("failed to start {program:?}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("ABI probe failed to compile (exit code {code:?}): {stderr}")]
    CompileFailed { code: Option<i32>, stderr: String },

    #[error("ABI probe exited with code {code:?}: {stderr}")]
    ProbeFailed { code: Option<i32>, stderr: String },

    #[error("ABI probe {stage} did not finish within {timeout:?}")]
    Timeout {
        stage: &'static str,
        timeout: Duration,
    },

    #[error("malformed ABI probe output on line {line}: {reason}")]
    MalformedOutput { line: usize, reason: String },

    #[error("ABI probe did not report {name}")]
    MissingConstant { name: String },

    #[error("no ABI constants requested")]
    NoConstants,

    #[error("invalid ABI constant name {0:?}")]
    InvalidConstantName(String),

    #[error("invalid header name {0:?}")]
    InvalidHeader(String),

    #[error("invalid kernel release {0:?}")]
    InvalidKernelRelease(String),

    #[error("ABI cache entry for {requested} is recorded as {stored}")]
    ReleaseMismatch { requested: String, stored: String },

    #[error("invalid ABI cache entry: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}
