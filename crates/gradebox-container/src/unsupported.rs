//! Stub runtime for non-Linux targets.
//!
//! Containers need Linux namespaces; everything here fails with
//! [`Error::Unsupported`] and has no side effects.

use std::path::PathBuf;

use crate::error::{Error, Result};

/// Placeholder container handle; cannot be constructed.
pub struct Container {
    _private: (),
}

impl Container {
    pub fn new(_basedir: impl Into<PathBuf>) -> Result<Self> {
        Err(Error::Unsupported("containers require Linux"))
    }

    pub fn with_builtin_rootfs() -> Result<Self> {
        Err(Error::Unsupported("containers require Linux"))
    }
}

/// No init personality exists off Linux; nothing to do.
pub fn run_if_init() {}
