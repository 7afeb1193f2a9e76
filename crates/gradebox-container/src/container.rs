//! Container factory and handle.
//!
//! A container is identified by its base directory:
//!
//! ```text
//! {basedir}/
//! ├── rootfs/    populated root filesystem (pivoted into at init)
//! └── data/      host view of the shared directory
//! ```
//!
//! The handle owns the base directory exclusively. [`Container::prune`]
//! removes the whole tree and is terminal; every later operation returns
//! [`Error::Pruned`]. Files written under `data/` on the host appear at
//! [`CONTAINER_SHARED_DIR`] inside the container and vice versa.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::check;
use crate::command::SandboxCommand;
use crate::error::{Error, Result};
use crate::rootfs;

/// Path of the shared directory as seen from inside the container.
///
/// `{basedir}/data` is bind-mounted here by the in-namespace init.
pub const CONTAINER_SHARED_DIR: &str = "/mnt/data";

/// Name of the shared directory under a container base directory.
pub const DATA_DIR: &str = "data";

/// A handle to one container.
#[derive(Debug)]
pub struct Container {
    basedir: PathBuf,
    pruned: bool,
}

impl Container {
    /// Build a container on an existing base directory.
    ///
    /// `{basedir}/rootfs` must already be a populated root filesystem;
    /// `{basedir}/data` is created (owner-only) if missing.
    pub fn new(basedir: impl Into<PathBuf>) -> Result<Self> {
        let basedir = basedir.into();
        debug!(container_dir = %basedir.display(), "creating container");

        let rootfs_dir = basedir.join(rootfs::ROOTFS_DIR);
        if !rootfs_dir.is_dir() {
            return Err(Error::RootfsMissing(rootfs_dir));
        }

        let data_dir = basedir.join(DATA_DIR);
        fs::create_dir_all(&data_dir)
            .map_err(|e| Error::io(format!("creating data directory {}", data_dir.display()), e))?;
        fs::set_permissions(&data_dir, fs::Permissions::from_mode(0o700))
            .map_err(|e| Error::io("setting data directory permissions", e))?;

        Ok(Self {
            basedir,
            pruned: false,
        })
    }

    /// Extract the embedded rootfs into a fresh base directory and build a
    /// container on it.
    ///
    /// Fails with [`Error::Unsupported`] when the host cannot create
    /// unprivileged user namespaces or the build carries no rootfs.
    pub fn with_builtin_rootfs() -> Result<Self> {
        if !check::user_namespaces_available() {
            return Err(Error::Unsupported("user namespaces are disabled on this host"));
        }
        Self::new(rootfs::materialize()?)
    }

    /// Prepare a command to run inside the container.
    ///
    /// The returned descriptor re-executes the host binary as the
    /// in-namespace init, which performs the mount and pivot_root dance and
    /// then execs `program` with `args`.
    pub fn command<I, S>(&mut self, program: impl Into<String>, args: I) -> Result<SandboxCommand>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.pruned {
            return Err(Error::Pruned);
        }
        let program = program.into();
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        debug!(container_dir = %self.basedir.display(), %program, ?args, "creating command");
        SandboxCommand::new(&self.basedir, program, args)
    }

    /// Host-side path of the shared directory.
    ///
    /// Resolved to an absolute path; falls back to the lexical
    /// `{basedir}/data` when resolution fails.
    pub fn host_side_shared_dir(&self) -> PathBuf {
        let lexical = self.basedir.join(DATA_DIR);
        lexical.canonicalize().unwrap_or(lexical)
    }

    /// Container-side path of the shared directory.
    pub fn container_side_shared_dir(&self) -> &'static Path {
        Path::new(CONTAINER_SHARED_DIR)
    }

    /// Remove the container and its shared directory.
    ///
    /// Terminal: the handle only answers [`Error::Pruned`] afterwards.
    pub fn prune(&mut self) -> Result<()> {
        if self.pruned {
            return Err(Error::Pruned);
        }
        fs::remove_dir_all(&self.basedir).map_err(|e| {
            Error::io(
                format!("removing container directory {}", self.basedir.display()),
                e,
            )
        })?;
        self.pruned = true;
        Ok(())
    }

    /// The container base directory.
    pub fn basedir(&self) -> &Path {
        &self.basedir
    }
}

impl Drop for Container {
    fn drop(&mut self) {
        if self.pruned {
            return;
        }
        if let Err(e) = fs::remove_dir_all(&self.basedir)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(
                container_dir = %self.basedir.display(),
                "failed to remove container directory on drop: {e}"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_with_rootfs() -> tempfile::TempDir {
        let base = tempfile::tempdir().unwrap();
        fs::create_dir(base.path().join(rootfs::ROOTFS_DIR)).unwrap();
        base
    }

    #[test]
    fn new_requires_rootfs_dir() {
        let base = tempfile::tempdir().unwrap();
        let err = Container::new(base.path()).unwrap_err();
        assert!(matches!(err, Error::RootfsMissing(_)));
    }

    #[test]
    fn new_creates_private_data_dir() {
        let base = base_with_rootfs();
        let container = Container::new(base.path()).unwrap();

        let data = base.path().join(DATA_DIR);
        assert!(data.is_dir());
        assert_eq!(
            fs::metadata(&data).unwrap().permissions().mode() & 0o777,
            0o700
        );
        drop(container);
    }

    #[test]
    fn shared_dir_paths() {
        let base = base_with_rootfs();
        let container = Container::new(base.path()).unwrap();

        let host = container.host_side_shared_dir();
        assert!(host.is_absolute());
        assert_eq!(host.file_name().unwrap(), DATA_DIR);
        assert_eq!(
            container.container_side_shared_dir(),
            Path::new("/mnt/data")
        );
    }

    #[test]
    fn shared_dir_round_trips_through_host_view() {
        let base = base_with_rootfs();
        let container = Container::new(base.path()).unwrap();

        fs::write(container.host_side_shared_dir().join("x"), b"payload").unwrap();
        assert_eq!(
            fs::read(base.path().join(DATA_DIR).join("x")).unwrap(),
            b"payload"
        );
    }

    #[test]
    fn prune_removes_tree_and_poisons_handle() {
        let base = base_with_rootfs();
        // Keep the TempDir from double-removing what prune already removed.
        let basedir = base.keep();
        let mut container = Container::new(&basedir).unwrap();

        container.prune().unwrap();
        assert!(!basedir.exists());

        assert!(matches!(
            container.command("true", [] as [&str; 0]),
            Err(Error::Pruned)
        ));
        assert!(matches!(container.prune(), Err(Error::Pruned)));
    }

    #[test]
    fn distinct_containers_get_distinct_basedirs() {
        let a = base_with_rootfs();
        let b = base_with_rootfs();
        let ca = Container::new(a.path()).unwrap();
        let cb = Container::new(b.path()).unwrap();
        assert_ne!(ca.host_side_shared_dir(), cb.host_side_shared_dir());
    }

    #[test]
    fn drop_removes_unpruned_tree() {
        let base = base_with_rootfs();
        let basedir = base.keep();
        let container = Container::new(&basedir).unwrap();
        drop(container);
        assert!(!basedir.exists());
    }
}
