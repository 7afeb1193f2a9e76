//! In-namespace init: the second personality of the host binary.
//!
//! A sandboxed command is spawned by re-executing the host binary with
//! [`INIT_ARG0`] in `argv[0]`. [`run_if_init`] detects that sentinel and
//! turns the process into the container init: it performs the mount and
//! `pivot_root` dance and then execs the requested command. The embedding
//! binary MUST call [`run_if_init`] as the very first statement of `main`,
//! before any thread, signal handler, or logging exists; the bootstrap
//! assumes a single-threaded process.
//!
//! By the time this code runs, `clone3` has already placed the process in
//! fresh namespaces and the process has mapped itself to UID 0 (see
//! [`crate::command`]). What is left is rearranging the filesystem:
//!
//! ```text
//! {basedir}/rootfs            becomes /
//! {basedir}/data              appears at /mnt/data (bind mount)
//! fresh proc                  appears at /proc
//! {basedir}/rootfs/oldroot    transient put-old, detached and removed
//! ```
//!
//! Every step aborts the init on failure; the parent observes a non-zero
//! exit. A clean non-zero exit of the user command itself is not an error
//! here, it is propagated as this process's own exit code.

use std::env;
use std::ffi::{CString, OsStr, OsString};
use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::error;

use crate::command::last_errno;
use crate::container::{CONTAINER_SHARED_DIR, DATA_DIR};
use crate::error::{Error, Result};
use crate::rootfs::ROOTFS_DIR;

/// Sentinel placed in `argv[0]` to request the init personality.
pub const INIT_ARG0: &str = "gradebox-container-init";

/// Environment handed to the user command; everything else is dropped.
const SANDBOX_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";
const SANDBOX_PS1: &str = "[sandbox] # ";

/// Become the container init if `argv[0]` says so; otherwise return at once.
///
/// When the sentinel matches, this never returns: the process sets up the
/// container filesystem, runs the command from `argv[2:]`, and exits with
/// its status.
pub fn run_if_init() {
    let is_init = env::args_os()
        .next()
        .is_some_and(|arg0| arg0.as_os_str() == OsStr::new(INIT_ARG0));
    if !is_init {
        return;
    }

    // The exec that got us here dropped the host environment, so install a
    // fresh stderr subscriber before touching anything.
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_target(false)
        .compact()
        .init();

    let args: Vec<OsString> = env::args_os().collect();
    if args.len() < 3 {
        error!("init invoked with {} args, need basedir and command", args.len() - 1);
        std::process::exit(1);
    }

    let paths = InitPaths::new(Path::new(&args[1]));
    if let Err(e) = setup_mounts(&paths) {
        error!("container init failed: {e}");
        std::process::exit(1);
    }

    run_command(&args[2], &args[3..]);
}

/// Everything the bootstrap mounts or pivots, derived from the basedir.
struct InitPaths {
    host_data: PathBuf,
    newroot: PathBuf,
    putold: PathBuf,
    data_in_newroot: PathBuf,
    proc_in_newroot: PathBuf,
}

impl InitPaths {
    fn new(basedir: &Path) -> Self {
        let newroot = basedir.join(ROOTFS_DIR);
        Self {
            host_data: basedir.join(DATA_DIR),
            putold: newroot.join("oldroot"),
            data_in_newroot: newroot.join(&CONTAINER_SHARED_DIR[1..]),
            proc_in_newroot: newroot.join("proc"),
            newroot,
        }
    }
}

fn setup_mounts(paths: &InitPaths) -> Result<()> {
    // Nothing below may propagate back to the host mount namespace, and
    // pivot_root refuses to run under a shared root.
    make_rprivate()?;

    // Shared directory: host data dir appears inside the new root.
    fs::create_dir_all(&paths.data_in_newroot).map_err(|e| {
        Error::io(
            format!("creating shared dir {}", paths.data_in_newroot.display()),
            e,
        )
    })?;
    bind_mount(
        &paths.host_data,
        &paths.data_in_newroot,
        libc::MS_BIND | libc::MS_PRIVATE,
    )?;

    // Fresh proc for the fresh PID namespace.
    mount_proc(&paths.proc_in_newroot)?;

    // pivot_root requires the new root to be a mount point; bind it onto
    // itself.
    bind_mount(
        &paths.newroot,
        &paths.newroot,
        libc::MS_BIND | libc::MS_REC | libc::MS_PRIVATE,
    )?;

    match fs::create_dir(&paths.putold) {
        Ok(()) => fs::set_permissions(&paths.putold, fs::Permissions::from_mode(0o700))
            .map_err(|e| Error::io("setting put-old permissions", e))?,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
        Err(e) => {
            return Err(Error::io(
                format!("creating put-old dir {}", paths.putold.display()),
                e,
            ));
        }
    }

    rustix::process::pivot_root(&paths.newroot, &paths.putold).map_err(|errno| Error::Mount {
        op: format!("pivot_root into {}", paths.newroot.display()),
        errno,
    })?;
    rustix::process::chdir("/").map_err(|errno| Error::Mount {
        op: "chdir to new root".into(),
        errno,
    })?;

    // The old root is now /oldroot; detach and remove it so the host tree
    // is unreachable.
    unmount_detach(c"/oldroot")?;
    fs::remove_dir("/oldroot").map_err(|e| Error::io("removing /oldroot", e))?;

    Ok(())
}

/// Exec the user command with inherited stdio and a minimal environment,
/// then exit with its status.
fn run_command(program: &OsStr, args: &[OsString]) -> ! {
    let status = Command::new(program)
        .args(args)
        .env_clear()
        .env("PS1", SANDBOX_PS1)
        .env("PATH", SANDBOX_PATH)
        .status();

    match status {
        Ok(status) => {
            // A non-zero exit flows back through this process's exit code;
            // only a wait-level surprise is worth a log line.
            let code = status
                .code()
                .unwrap_or_else(|| 128 + status.signal().unwrap_or(0));
            std::process::exit(code);
        }
        Err(e) => {
            error!(program = %program.to_string_lossy(), "failed to run command: {e}");
            std::process::exit(1);
        }
    }
}

fn make_rprivate() -> Result<()> {
    // SAFETY: constant, valid arguments.
    let ret = unsafe {
        libc::mount(
            std::ptr::null(),
            c"/".as_ptr(),
            std::ptr::null(),
            libc::MS_REC | libc::MS_PRIVATE,
            std::ptr::null(),
        )
    };
    if ret != 0 {
        return Err(Error::Mount {
            op: "remounting / private".into(),
            errno: last_errno(),
        });
    }
    Ok(())
}

fn bind_mount(source: &Path, target: &Path, flags: libc::c_ulong) -> Result<()> {
    let source_c = path_to_cstring(source)?;
    let target_c = path_to_cstring(target)?;
    // SAFETY: both paths are valid C strings.
    let ret = unsafe {
        libc::mount(
            source_c.as_ptr(),
            target_c.as_ptr(),
            std::ptr::null(),
            flags,
            std::ptr::null(),
        )
    };
    if ret != 0 {
        return Err(Error::Mount {
            op: format!("bind mounting {} -> {}", source.display(), target.display()),
            errno: last_errno(),
        });
    }
    Ok(())
}

fn mount_proc(target: &Path) -> Result<()> {
    let target_c = path_to_cstring(target)?;
    // SAFETY: constant source/fstype, valid target.
    let ret = unsafe {
        libc::mount(
            c"proc".as_ptr(),
            target_c.as_ptr(),
            c"proc".as_ptr(),
            0,
            std::ptr::null(),
        )
    };
    if ret != 0 {
        return Err(Error::Mount {
            op: format!("mounting proc at {}", target.display()),
            errno: last_errno(),
        });
    }
    Ok(())
}

fn unmount_detach(target: &std::ffi::CStr) -> Result<()> {
    // SAFETY: target is a valid C string.
    let ret = unsafe { libc::umount2(target.as_ptr(), libc::MNT_DETACH) };
    if ret != 0 {
        return Err(Error::Mount {
            op: format!("detaching {}", target.to_string_lossy()),
            errno: last_errno(),
        });
    }
    Ok(())
}

fn path_to_cstring(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| {
        Error::io(
            "building mount path",
            io::Error::new(io::ErrorKind::InvalidInput, "embedded NUL"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_paths_follow_the_layout() {
        let paths = InitPaths::new(Path::new("/tmp/gradebox-x"));
        assert_eq!(paths.newroot, Path::new("/tmp/gradebox-x/rootfs"));
        assert_eq!(paths.host_data, Path::new("/tmp/gradebox-x/data"));
        assert_eq!(paths.putold, Path::new("/tmp/gradebox-x/rootfs/oldroot"));
        assert_eq!(
            paths.data_in_newroot,
            Path::new("/tmp/gradebox-x/rootfs/mnt/data")
        );
        assert_eq!(
            paths.proc_in_newroot,
            Path::new("/tmp/gradebox-x/rootfs/proc")
        );
    }

    #[test]
    fn shared_dir_inside_matches_the_public_constant() {
        // The bind target under the new root must line up with what
        // Container::container_side_shared_dir advertises.
        let paths = InitPaths::new(Path::new("/base"));
        let relative = paths
            .data_in_newroot
            .strip_prefix("/base/rootfs")
            .unwrap();
        assert_eq!(Path::new("/").join(relative), Path::new(CONTAINER_SHARED_DIR));
    }

    #[test]
    fn plain_invocations_are_ignored() {
        // argv[0] of the test runner is not the sentinel.
        run_if_init();
    }
}
