//! Host capability probing.
//!
//! Containers need unprivileged user namespaces. Availability varies by
//! distribution:
//!
//! - **Debian/Ubuntu**: `/proc/sys/kernel/unprivileged_userns_clone`
//! - **Fedora/NixOS and others**: `/proc/sys/user/max_user_namespaces`
//! - **Fallback**: fork + unshare test
//!
//! The probe runs once and is cached for the process lifetime.

use std::sync::OnceLock;

static USER_NS: OnceLock<bool> = OnceLock::new();

/// Whether this host can create unprivileged user namespaces.
pub fn user_namespaces_available() -> bool {
    *USER_NS.get_or_init(probe_user_namespaces)
}

fn probe_user_namespaces() -> bool {
    if let Ok(content) = std::fs::read_to_string("/proc/sys/kernel/unprivileged_userns_clone") {
        return content.trim() == "1";
    }

    if let Ok(content) = std::fs::read_to_string("/proc/sys/user/max_user_namespaces")
        && content.trim().parse::<u32>().unwrap_or(0) > 0
    {
        return true;
    }

    // Last resort: fork + unshare test (must fork to avoid polluting this
    // process's namespaces).
    // SAFETY: fork/unshare/waitpid used as intended; the child exits
    // immediately without touching parent state.
    unsafe {
        let pid = libc::fork();
        if pid < 0 {
            return false;
        }
        if pid == 0 {
            let ret = libc::unshare(libc::CLONE_NEWUSER);
            libc::_exit(if ret == 0 { 0 } else { 1 });
        }
        let mut status: i32 = 0;
        libc::waitpid(pid, &mut status, 0);
        libc::WIFEXITED(status) && libc::WEXITSTATUS(status) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_is_stable() {
        // The result depends on the host; it must at least be consistent.
        assert_eq!(user_namespaces_available(), user_namespaces_available());
    }
}
