//! Rendering of command results and failures.

use portrait_engine::{AssignError, ErrorKind};
use serde::Serialize;
use std::process::ExitCode;

/// Process exit status for a failed operation.
pub fn exit_status(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::InvalidInput => 2,
        ErrorKind::NotFound => 3,
        ErrorKind::Conflict => 4,
        ErrorKind::ResourceUnavailable => 5,
        ErrorKind::MaterializationFailed => 6,
        ErrorKind::Timeout => 7,
        ErrorKind::Cancelled => 8,
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    kind: ErrorKind,
    message: String,
    retryable: bool,
}

#[derive(Serialize)]
struct Failure {
    error: ErrorBody,
}

/// Print a successful result as pretty JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<ExitCode> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(ExitCode::SUCCESS)
}

/// Print an operation failure as JSON on stdout and pick the exit status.
pub fn print_error(err: &AssignError) -> anyhow::Result<ExitCode> {
    let failure = Failure {
        error: ErrorBody {
            code: err.code(),
            kind: err.kind(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        },
    };
    println!("{}", serde_json::to_string_pretty(&failure)?);
    Ok(ExitCode::from(exit_status(err.kind())))
}
