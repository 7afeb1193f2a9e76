//! Spawn descriptor for commands executed inside a container.
//!
//! [`SandboxCommand`] does not exec the target program directly. It
//! re-executes the host binary (`/proc/self/exe`, so the in-memory image is
//! used even if the on-disk binary is replaced) with the init sentinel in
//! `argv[0]` and the positional contract consumed by [`crate::init`]:
//!
//! ```text
//! argv[0]   init sentinel
//! argv[1]   container base directory
//! argv[2]   program to exec inside
//! argv[3:]  program arguments
//! ```
//!
//! The child is created with `clone3(2)` under fresh MNT, UTS, IPC, PID,
//! NET, and USER namespaces plus a pidfd. Between `clone3` and `execve` the
//! child runs only async-signal-safe code: the id-map payloads and argv
//! pointer tables are rendered up front, so the child writes bytes, dup2's
//! its stdio, and execs. Pre-exec failures travel back over a `CLOEXEC`
//! error pipe as errno + context; EOF on that pipe means the exec happened.
//!
//! Single-identity UID/GID maps make the sandboxed program see itself as
//! root while holding no capability on the host.

use std::ffi::{CStr, CString};
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::mem::{size_of_val, zeroed};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use rustix::io::Errno;
use tracing::warn;

use crate::error::{Error, Result};
use crate::init;

#[inline]
pub(crate) fn last_errno() -> Errno {
    // SAFETY: __errno_location always returns a valid thread-local pointer.
    Errno::from_raw_os_error(unsafe { *libc::__errno_location() })
}

/// Exit status of an in-container command as observed on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    code: Option<i32>,
    signal: Option<i32>,
}

impl ExitStatus {
    #[inline]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    #[inline]
    pub fn code(&self) -> Option<i32> {
        self.code
    }

    #[inline]
    pub fn signal(&self) -> Option<i32> {
        self.signal
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "killed by signal {signal}"),
            (None, None) => write!(f, "unknown status"),
        }
    }
}

/// Captured output of an in-container command.
#[derive(Debug, Clone)]
pub struct Output {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub status: ExitStatus,
}

impl Output {
    #[inline]
    pub fn success(&self) -> bool {
        self.status.success()
    }

    #[inline]
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    #[inline]
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Unidirectional pipe, both ends `CLOEXEC`.
///
/// `dup2` onto 0/1/2 clears the flag for the fds the child keeps.
struct Pipe {
    read: OwnedFd,
    write: OwnedFd,
}

impl Pipe {
    fn new() -> Result<Self> {
        let mut fds = [0i32; 2];
        // SAFETY: pipe2 writes into a valid two-element array.
        if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } != 0 {
            return Err(Error::io("creating pipe", io::Error::last_os_error()));
        }
        // SAFETY: on success both fds are valid and owned by us.
        Ok(Self {
            read: unsafe { OwnedFd::from_raw_fd(fds[0]) },
            write: unsafe { OwnedFd::from_raw_fd(fds[1]) },
        })
    }
}

/// Source fds the child dup2's onto 0/1/2. `None` inherits everything.
#[derive(Clone, Copy)]
struct ChildStdio {
    stdin: RawFd,
    stdout: RawFd,
    stderr: RawFd,
}

#[repr(C)]
struct CloneArgs {
    flags: u64,
    pidfd: u64,
    child_tid: u64,
    parent_tid: u64,
    exit_signal: u64,
    stack: u64,
    stack_size: u64,
    tls: u64,
    set_tid: u64,
    set_tid_size: u64,
    cgroup: u64,
}

/// A command prepared to run inside a container.
///
/// Created by [`crate::Container::command`]. One-shot: run it with
/// [`output`](Self::output), [`combined_output`](Self::combined_output), or
/// [`status`](Self::status); each call spawns one child and blocks until its
/// exit has been observed.
#[derive(Debug)]
pub struct SandboxCommand {
    argv: Vec<CString>,
    uid_map: Vec<u8>,
    gid_map: Vec<u8>,
    stdin: Option<Vec<u8>>,
}

impl SandboxCommand {
    pub(crate) fn new(basedir: &Path, program: String, args: Vec<String>) -> Result<Self> {
        let mut argv = Vec::with_capacity(args.len() + 3);
        argv.push(cstring(init::INIT_ARG0.as_bytes())?);
        argv.push(cstring(basedir.as_os_str().as_bytes())?);
        argv.push(cstring(program.as_bytes())?);
        for arg in &args {
            argv.push(cstring(arg.as_bytes())?);
        }

        // Rendered before the clone so the child only writes bytes.
        // SAFETY: getuid/getgid are always safe to call.
        let uid = unsafe { libc::getuid() };
        let gid = unsafe { libc::getgid() };

        Ok(Self {
            argv,
            uid_map: format!("0 {uid} 1\n").into_bytes(),
            gid_map: format!("0 {gid} 1\n").into_bytes(),
            stdin: None,
        })
    }

    /// Bytes fed to the command's standard input; the pipe is closed after
    /// the write so the command sees EOF.
    pub fn stdin(&mut self, data: impl Into<Vec<u8>>) -> &mut Self {
        self.stdin = Some(data.into());
        self
    }

    /// Run the command, capturing stdout and stderr separately.
    pub fn output(&mut self) -> Result<Output> {
        self.run_captured(false)
    }

    /// Run the command, capturing stdout and stderr interleaved into one
    /// buffer (returned as `stdout`).
    pub fn combined_output(&mut self) -> Result<Output> {
        self.run_captured(true)
    }

    /// Run the command with all three stdio streams inherited from the host
    /// process.
    pub fn status(&mut self) -> Result<ExitStatus> {
        let error_pipe = Pipe::new()?;
        let pidfd = self.spawn(None, &error_pipe)?;

        let Pipe {
            read: err_r,
            write: err_w,
        } = error_pipe;
        drop(err_w);
        confirm_exec(err_r, &pidfd)?;

        let (code, signal) = wait_for_exit(pidfd.as_raw_fd()).map_err(Error::Wait)?;
        Ok(ExitStatus { code, signal })
    }

    fn run_captured(&mut self, combined: bool) -> Result<Output> {
        let stdin_pipe = Pipe::new()?;
        let stdout_pipe = Pipe::new()?;
        let stderr_pipe = if combined { None } else { Some(Pipe::new()?) };
        let error_pipe = Pipe::new()?;

        let stdio = ChildStdio {
            stdin: stdin_pipe.read.as_raw_fd(),
            stdout: stdout_pipe.write.as_raw_fd(),
            stderr: match &stderr_pipe {
                Some(p) => p.write.as_raw_fd(),
                None => stdout_pipe.write.as_raw_fd(),
            },
        };

        let pidfd = self.spawn(Some(stdio), &error_pipe)?;

        // Parent keeps its ends; the child-side ends must close here so the
        // pipes can reach EOF.
        let Pipe {
            read: child_stdin,
            write: stdin_w,
        } = stdin_pipe;
        drop(child_stdin);
        let Pipe {
            read: stdout_r,
            write: child_stdout,
        } = stdout_pipe;
        drop(child_stdout);
        let stderr_r = stderr_pipe.map(|p| {
            let Pipe { read, write } = p;
            drop(write);
            read
        });
        let Pipe {
            read: err_r,
            write: err_w,
        } = error_pipe;
        drop(err_w);

        confirm_exec(err_r, &pidfd)?;

        let mut stdin_file = File::from(stdin_w);
        if let Some(data) = &self.stdin {
            // A child that exits without reading its input is not an error
            // here; its exit status tells the story.
            if let Err(e) = stdin_file.write_all(data)
                && e.kind() != io::ErrorKind::BrokenPipe
            {
                warn!("failed to write sandboxed command stdin: {e}");
            }
        }
        drop(stdin_file);

        let (stdout, stderr, status) = collect(&pidfd, stdout_r, stderr_r).map_err(Error::Wait)?;
        Ok(Output {
            stdout,
            stderr,
            status,
        })
    }

    /// `clone3` into fresh namespaces; the child never returns from here.
    fn spawn(&self, stdio: Option<ChildStdio>, error_pipe: &Pipe) -> Result<OwnedFd> {
        let argv_ptrs: Vec<*const libc::c_char> = self
            .argv
            .iter()
            .map(|s| s.as_ptr())
            .chain(std::iter::once(std::ptr::null()))
            .collect();
        // The init personality receives an empty environment and builds its
        // own for the user command.
        let envp: [*const libc::c_char; 1] = [std::ptr::null()];

        let namespaces = libc::CLONE_NEWNS
            | libc::CLONE_NEWUTS
            | libc::CLONE_NEWIPC
            | libc::CLONE_NEWPID
            | libc::CLONE_NEWNET
            | libc::CLONE_NEWUSER;

        let mut pidfd_out: RawFd = -1;
        // SAFETY: the child branch below runs only async-signal-safe code
        // (raw writes, prctl, dup2, execve) and cannot unwind.
        let ret = unsafe {
            let mut cl_args: CloneArgs = zeroed();
            cl_args.flags = namespaces as u64 | libc::CLONE_PIDFD as u64;
            cl_args.pidfd = &raw mut pidfd_out as u64;
            cl_args.exit_signal = libc::SIGCHLD as u64;
            libc::syscall(libc::SYS_clone3, &cl_args, size_of_val(&cl_args))
        };

        if ret < 0 {
            return Err(Error::Clone(last_errno()));
        }
        if ret == 0 {
            self.child(stdio, error_pipe.write.as_raw_fd(), &argv_ptrs, &envp);
        }

        // SAFETY: clone3 stored a valid pidfd for the child on success.
        Ok(unsafe { OwnedFd::from_raw_fd(pidfd_out) })
    }

    /// Everything between `clone3` and `execve`. Async-signal-safe only.
    fn child(
        &self,
        stdio: Option<ChildStdio>,
        err_fd: RawFd,
        argv: &[*const libc::c_char],
        envp: &[*const libc::c_char],
    ) -> ! {
        // SAFETY: raw syscalls on fds prepared by the parent; no allocation,
        // no unwinding. child_fail always terminates.
        unsafe {
            // Reap the whole namespace if the host dies.
            if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) != 0 {
                child_fail(err_fd, "prctl pdeathsig");
            }

            // Single-identity mapping, written by the child about itself.
            // setgroups must be denied before gid_map (kernel requirement).
            if !write_child_file(c"/proc/self/setgroups", b"deny\n") {
                child_fail(err_fd, "/proc/self/setgroups");
            }
            if !write_child_file(c"/proc/self/uid_map", &self.uid_map) {
                child_fail(err_fd, "/proc/self/uid_map");
            }
            if !write_child_file(c"/proc/self/gid_map", &self.gid_map) {
                child_fail(err_fd, "/proc/self/gid_map");
            }

            if let Some(stdio) = stdio {
                if libc::dup2(stdio.stdin, 0) < 0 {
                    child_fail(err_fd, "dup2 stdin");
                }
                if libc::dup2(stdio.stdout, 1) < 0 {
                    child_fail(err_fd, "dup2 stdout");
                }
                if libc::dup2(stdio.stderr, 2) < 0 {
                    child_fail(err_fd, "dup2 stderr");
                }
            }

            libc::execve(c"/proc/self/exe".as_ptr(), argv.as_ptr(), envp.as_ptr());
            child_fail(err_fd, "execve /proc/self/exe");
        }
    }
}

fn cstring(bytes: &[u8]) -> Result<CString> {
    CString::new(bytes).map_err(|_| {
        Error::io(
            "building command argv",
            io::Error::new(io::ErrorKind::InvalidInput, "embedded NUL"),
        )
    })
}

/// Report a pre-exec failure (errno + context) to the parent and die.
fn child_fail(err_fd: RawFd, context: &'static str) -> ! {
    // SAFETY: write and _exit are async-signal-safe.
    unsafe {
        let errno: i32 = *libc::__errno_location();
        let bytes = errno.to_ne_bytes();
        libc::write(err_fd, bytes.as_ptr().cast(), bytes.len());
        libc::write(err_fd, context.as_ptr().cast(), context.len());
        libc::_exit(127);
    }
}

/// Overwrite a `/proc/self` control file with one write call.
///
/// # Safety
///
/// Async-signal-safe; for use between `clone3` and `execve` only.
unsafe fn write_child_file(path: &CStr, data: &[u8]) -> bool {
    // SAFETY: path is a valid C string, data a valid buffer.
    unsafe {
        let fd = libc::open(path.as_ptr(), libc::O_WRONLY | libc::O_TRUNC);
        if fd < 0 {
            return false;
        }
        let n = libc::write(fd, data.as_ptr().cast(), data.len());
        libc::close(fd);
        n == data.len() as isize
    }
}

/// Wait for the child's `execve`; an error pipe payload means it never got
/// there.
fn confirm_exec(err_r: OwnedFd, pidfd: &OwnedFd) -> Result<()> {
    let mut buf = Vec::new();
    File::from(err_r)
        .read_to_end(&mut buf)
        .map_err(|e| Error::io("reading child setup pipe", e))?;
    if buf.is_empty() {
        return Ok(());
    }

    // The child already exited; reap it before reporting.
    let _ = wait_for_exit(pidfd.as_raw_fd());

    if buf.len() >= 4 {
        let errno = i32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]);
        Err(Error::ChildSetup {
            context: String::from_utf8_lossy(&buf[4..]).into_owned(),
            errno: Errno::from_raw_os_error(errno),
        })
    } else {
        Err(Error::ChildSetup {
            context: "truncated error report".into(),
            errno: Errno::IO,
        })
    }
}

/// Drain the capture pipes and the pidfd until the child has exited and
/// both pipes hit EOF.
fn collect(
    pidfd: &OwnedFd,
    stdout_r: OwnedFd,
    stderr_r: Option<OwnedFd>,
) -> io::Result<(Vec<u8>, Vec<u8>, ExitStatus)> {
    let mut stdout_buf = Vec::new();
    let mut stderr_buf = Vec::new();
    let mut buf = [0u8; 4096];

    set_nonblocking(stdout_r.as_raw_fd())?;
    if let Some(fd) = &stderr_r {
        set_nonblocking(fd.as_raw_fd())?;
    }

    let mut stdout_fd = stdout_r.as_raw_fd();
    let mut stderr_fd = stderr_r.as_ref().map_or(-1, |fd| fd.as_raw_fd());

    loop {
        // poll ignores entries with a negative fd, which is how finished
        // pipes drop out of the set.
        let mut fds = [
            libc::pollfd {
                fd: stdout_fd,
                events: libc::POLLIN,
                revents: 0,
            },
            libc::pollfd {
                fd: stderr_fd,
                events: libc::POLLIN,
                revents: 0,
            },
            libc::pollfd {
                fd: pidfd.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            },
        ];

        // SAFETY: fds is a valid array of three pollfd.
        let ret = unsafe { libc::poll(fds.as_mut_ptr(), 3, -1) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }

        if fds[0].revents != 0 && drain_ready(stdout_fd, &mut stdout_buf, &mut buf) {
            stdout_fd = -1;
        }
        if fds[1].revents != 0 && drain_ready(stderr_fd, &mut stderr_buf, &mut buf) {
            stderr_fd = -1;
        }

        if fds[2].revents & libc::POLLIN != 0 {
            let (code, signal) = wait_for_exit(pidfd.as_raw_fd())?;
            // All write ends are gone now; pick up whatever is still queued.
            if stdout_fd >= 0 {
                drain_ready(stdout_fd, &mut stdout_buf, &mut buf);
            }
            if stderr_fd >= 0 {
                drain_ready(stderr_fd, &mut stderr_buf, &mut buf);
            }
            return Ok((stdout_buf, stderr_buf, ExitStatus { code, signal }));
        }
    }
}

/// Read everything currently queued on `fd`; true once the pipe is at EOF.
fn drain_ready(fd: RawFd, out: &mut Vec<u8>, buf: &mut [u8]) -> bool {
    loop {
        // SAFETY: fd is a live pipe fd, buf a valid buffer.
        let ret = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
        if ret < 0 {
            // WouldBlock means drained for now; anything else ends the pipe.
            return io::Error::last_os_error().kind() != io::ErrorKind::WouldBlock;
        }
        if ret == 0 {
            return true;
        }
        out.extend_from_slice(&buf[..ret as usize]);
    }
}

#[inline]
fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: fcntl on a valid fd.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: same fd, valid flags.
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Reap via `waitid(P_PIDFD)`: exit code for a normal exit, signal number
/// for a killed child.
fn wait_for_exit(pidfd: RawFd) -> io::Result<(Option<i32>, Option<i32>)> {
    // SAFETY: siginfo is zeroed and filled by the kernel.
    let mut siginfo: libc::siginfo_t = unsafe { zeroed() };
    let ret = unsafe {
        libc::waitid(
            libc::P_PIDFD,
            pidfd as libc::id_t,
            &mut siginfo,
            libc::WEXITED,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }

    let code = siginfo.si_code;
    // SAFETY: si_status is valid for CLD_* codes delivered by waitid.
    let status = unsafe { siginfo.si_status() };

    match code {
        libc::CLD_EXITED => Ok((Some(status), None)),
        libc::CLD_KILLED | libc::CLD_DUMPED => Ok((None, Some(status))),
        _ => Ok((None, None)),
    }
}
