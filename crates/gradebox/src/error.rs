//! Error types for grading.

use std::io;

use thiserror::Error;

/// Main error type for grading operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("request has {inputs} inputs but {expecteds} expected outputs")]
    InvalidRequest { inputs: usize, expecteds: usize },

    /// The compiled program failed for one test case: non-zero exit, a
    /// signal, or it could not be executed at all (which is also how a
    /// failed compilation ultimately surfaces).
    #[error("running test case {case}: {status}\n{stderr}")]
    Run {
        case: usize,
        status: String,
        stderr: String,
    },

    #[error(transparent)]
    Container(#[from] gradebox_container::Error),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Result type for grading operations.
pub type Result<T> = std::result::Result<T, Error>;
