// ABOUTME: Error types for the restore engine
// ABOUTME: Separates per-attempt database failures from fatal run errors

use std::path::PathBuf;
use thiserror::Error;

/// Error returned by a single database round-trip.
pub type DbError = Box<dyn std::error::Error + Send + Sync>;

/// Every attempt of a statement (or of connection acquisition) failed.
#[derive(Debug, Error)]
#[error("retry limit reached after {attempts} attempt(s): {last}")]
pub struct RetryExhausted {
    pub attempts: u32,
    #[source]
    pub last: DbError,
}

/// Fatal errors that end a restore run.
#[derive(Debug, Error)]
pub enum RestoreError {
    #[error("failed to open dump file {}", path.display())]
    FileOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read dump file at line {line}")]
    StreamRead {
        line: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to connect to database")]
    Connection(#[source] RetryExhausted),

    #[error("statement ending at line {line} failed (resume from line {resume_line})\nSQL: {statement}")]
    Statement {
        line: u64,
        resume_line: u64,
        statement: String,
        #[source]
        source: RetryExhausted,
    },

    #[error("dump ends with an unterminated statement at line {line} (resume from line {resume_line})\nSQL: {statement}")]
    IncompleteStatement {
        line: u64,
        resume_line: u64,
        statement: String,
    },

    #[error("restore stopped by operator (resume from line {resume_line})")]
    Cancelled { resume_line: u64 },
}

impl RestoreError {
    /// Line an operator should pass as `--resume-line` to continue after this error.
    pub fn resume_line(&self) -> Option<u64> {
        match self {
            Self::Statement { resume_line, .. }
            | Self::IncompleteStatement { resume_line, .. }
            | Self::Cancelled { resume_line } => Some(*resume_line),
            _ => None,
        }
    }
}
