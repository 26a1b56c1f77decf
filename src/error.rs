// Typed errors for the conditions callers branch on.
// Everything else travels as anyhow::Error with context attached.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// One failed decoder in the chain, kept for diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeAttempt {
    pub decoder: &'static str,
    pub reason: String,
}

impl fmt::Display for DecodeAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.decoder, self.reason)
    }
}

fn join_attempts(attempts: &[DecodeAttempt]) -> String {
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A single source file could not be turned into rows
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("failed to read {}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no decoder could read {} ({})", .path.display(), join_attempts(.attempts))]
    Undecodable {
        path: PathBuf,
        attempts: Vec<DecodeAttempt>,
    },
}

impl ReadError {
    /// Decoder attempts that failed before giving up (empty for I/O errors)
    pub fn attempts(&self) -> &[DecodeAttempt] {
        match self {
            ReadError::Io { .. } => &[],
            ReadError::Undecodable { attempts, .. } => attempts,
        }
    }
}

/// Conditions that abort a whole run
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("fund list template not found: {}", .0.display())]
    TemplateMissing(PathBuf),
}
