//! Error types for the container runtime.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Main error type for container operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("containers are not supported: {0}")]
    Unsupported(&'static str),

    #[error("container rootfs not found at {0}")]
    RootfsMissing(PathBuf),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[cfg(target_os = "linux")]
    #[error("{op}: {errno}")]
    Mount {
        op: String,
        errno: rustix::io::Errno,
    },

    #[cfg(target_os = "linux")]
    #[error("clone3: {0}")]
    Clone(rustix::io::Errno),

    #[cfg(target_os = "linux")]
    #[error("pidfd: {0}")]
    Pidfd(rustix::io::Errno),

    /// The child failed between `clone3` and `execve`; the failing step and
    /// its errno arrive over the error pipe.
    #[cfg(target_os = "linux")]
    #[error("child setup: {context}: {errno}")]
    ChildSetup {
        context: String,
        errno: rustix::io::Errno,
    },

    #[error("waiting for sandboxed command: {0}")]
    Wait(#[source] io::Error),

    #[error("container has been pruned")]
    Pruned,
}

impl Error {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Result type for container operations.
pub type Result<T> = std::result::Result<T, Error>;
