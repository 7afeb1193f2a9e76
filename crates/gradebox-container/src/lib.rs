//! gradebox-container: single-process Linux containers for untrusted code.
//!
//! This crate runs one command at a time inside a minimal container built
//! from unprivileged Linux primitives:
//!
//! - **User namespaces** - UID 0 inside maps to the real user outside
//! - **Mount namespaces + pivot_root** - the command sees only an extracted
//!   rootfs plus one shared directory
//! - **PID / NET / IPC / UTS namespaces** - fresh and empty, no host view
//! - **Re-exec init** - the host binary doubles as the in-namespace init,
//!   selected on `argv[0]`
//!
//! ## Quick Start
//!
//! ```ignore
//! use gradebox_container::Container;
//!
//! fn main() -> Result<(), gradebox_container::Error> {
//!     // MUST be the first statement: turns this process into the
//!     // in-namespace init when argv[0] carries the sentinel.
//!     gradebox_container::run_if_init();
//!
//!     let mut container = Container::with_builtin_rootfs()?;
//!     let output = container.command("c++", ["--version"])?.output()?;
//!     println!("{}", output.stdout_str());
//!     container.prune()
//! }
//! ```
//!
//! ## Requirements
//!
//! - Linux with unprivileged user namespaces enabled
//! - The `builtin-rootfs` feature (plus the archive on disk at build time)
//!   for [`Container::with_builtin_rootfs`]
//!
//! A `Container` handle is not safe for concurrent use; all operations take
//! `&mut self` and callers wanting parallel grading should hold one
//! container per thread.

pub mod error;
pub mod rootfs;

pub use error::Error;

#[cfg(target_os = "linux")]
mod check;
#[cfg(target_os = "linux")]
pub mod command;
#[cfg(target_os = "linux")]
pub mod container;
#[cfg(target_os = "linux")]
pub mod init;

#[cfg(target_os = "linux")]
pub use command::{ExitStatus, Output, SandboxCommand};
#[cfg(target_os = "linux")]
pub use container::{CONTAINER_SHARED_DIR, Container};
#[cfg(target_os = "linux")]
pub use init::{INIT_ARG0, run_if_init};

#[cfg(not(target_os = "linux"))]
mod unsupported;
#[cfg(not(target_os = "linux"))]
pub use unsupported::{Container, run_if_init};
