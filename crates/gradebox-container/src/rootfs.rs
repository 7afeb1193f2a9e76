//! Embedded rootfs and extraction.
//!
//! The host binary can carry a gzip-compressed tar archive of a minimal
//! userland (musl libc plus a C/C++ toolchain) behind the `builtin-rootfs`
//! feature. [`materialize`] unpacks it into a freshly created base
//! directory:
//!
//! ```text
//! {basedir}/            unique temp directory, prefix "gradebox-"
//! └── rootfs/           extracted archive, becomes the container root
//! ```
//!
//! The archive is trusted build-time content; in-archive ownership is
//! ignored because the sandboxed process maps itself to UID 0 anyway.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;

use crate::error::{Error, Result};

/// Name of the rootfs directory under a container base directory.
pub const ROOTFS_DIR: &str = "rootfs";

#[cfg(feature = "builtin-rootfs")]
static ROOTFS_ARCHIVE: &[u8] = include_bytes!("../rootfs/rootfs.tar.gz");

/// Extract the embedded rootfs archive into a fresh base directory.
///
/// Returns the base directory path; `{basedir}/rootfs` holds the userland.
/// On failure the partial tree is removed.
#[cfg(feature = "builtin-rootfs")]
pub fn materialize() -> Result<PathBuf> {
    let basedir = tempfile::Builder::new()
        .prefix("gradebox-")
        .tempdir()
        .map_err(|e| Error::io("creating container base directory", e))?
        .keep();

    if let Err(e) = extract_into(ROOTFS_ARCHIVE, &basedir.join(ROOTFS_DIR)) {
        let _ = fs::remove_dir_all(&basedir);
        return Err(e);
    }

    tracing::debug!(basedir = %basedir.display(), "embedded rootfs extracted");
    Ok(basedir)
}

#[cfg(not(feature = "builtin-rootfs"))]
pub fn materialize() -> Result<PathBuf> {
    Err(Error::Unsupported(
        "this build carries no embedded rootfs (enable the builtin-rootfs feature)",
    ))
}

/// Unpack a gzip-compressed tar stream into `dest`.
///
/// Files, directories, and symlinks are preserved; ownership is not.
pub fn extract_into<R: Read>(archive: R, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)
        .map_err(|e| Error::io(format!("creating rootfs directory {}", dest.display()), e))?;

    let mut tar = Archive::new(GzDecoder::new(archive));
    tar.set_preserve_permissions(true);
    tar.set_preserve_ownerships(false);
    tar.unpack(dest)
        .map_err(|e| Error::io(format!("extracting rootfs into {}", dest.display()), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    use flate2::Compression;
    use flate2::write::GzEncoder;

    /// Build a tiny tar.gz in memory: a directory, a file, and a symlink.
    fn sample_archive() -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));

        let mut dir = tar::Header::new_gnu();
        dir.set_entry_type(tar::EntryType::Directory);
        dir.set_path("bin").unwrap();
        dir.set_mode(0o755);
        dir.set_size(0);
        dir.set_cksum();
        builder.append(&dir, std::io::empty()).unwrap();

        let data = b"#!/bin/sh\n";
        let mut file = tar::Header::new_gnu();
        file.set_path("bin/busybox").unwrap();
        file.set_mode(0o755);
        file.set_size(data.len() as u64);
        file.set_cksum();
        builder.append(&file, data.as_slice()).unwrap();

        let mut link = tar::Header::new_gnu();
        link.set_entry_type(tar::EntryType::Symlink);
        link.set_size(0);
        builder
            .append_link(&mut link, "bin/sh", "busybox")
            .unwrap();

        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn extracts_files_dirs_and_symlinks() {
        let dest = tempfile::tempdir().unwrap();
        extract_into(sample_archive().as_slice(), dest.path()).unwrap();

        assert!(dest.path().join("bin").is_dir());
        assert_eq!(
            fs::read(dest.path().join("bin/busybox")).unwrap(),
            b"#!/bin/sh\n"
        );
        let link = dest.path().join("bin/sh");
        assert!(link.symlink_metadata().unwrap().file_type().is_symlink());
        assert_eq!(fs::read_link(&link).unwrap(), PathBuf::from("busybox"));
    }

    #[test]
    fn extraction_into_existing_dir_is_fine() {
        let dest = tempfile::tempdir().unwrap();
        fs::create_dir_all(dest.path().join("bin")).unwrap();
        extract_into(sample_archive().as_slice(), dest.path()).unwrap();
        assert!(dest.path().join("bin/busybox").exists());
    }

    #[test]
    fn garbage_input_is_an_io_error() {
        let dest = tempfile::tempdir().unwrap();
        let err = extract_into(&b"not a tarball"[..], dest.path()).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
