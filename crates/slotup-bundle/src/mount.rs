//! Scoped loop mounts for bundle access.
//!
//! A bundle is a filesystem image and is read through a read-only loop
//! mount on a fresh temporary directory. The mount is a guard object:
//! dropping it unmounts and removes the directory on every exit path,
//! so error unwinding can never leak a mount that would block later
//! installs from the same namespace.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use slotup_common::run_tool;
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::{BundleError, Result};

/// A mounted bundle image; unmounted on drop.
#[derive(Debug)]
pub struct LoopMount {
    mountpoint: PathBuf,
    // Kept for its Drop, which removes the directory after unmounting.
    _tempdir: Option<TempDir>,
    needs_unmount: bool,
}

impl LoopMount {
    /// Loop-mount `image` read-only on a fresh directory under
    /// `mount_prefix`.
    pub fn mount(image: &Path, mount_prefix: &Path) -> Result<Self> {
        std::fs::create_dir_all(mount_prefix)?;
        let tempdir = tempfile::Builder::new()
            .prefix("slotup-bundle-")
            .tempdir_in(mount_prefix)?;
        let mountpoint = tempdir.path().to_path_buf();

        run_tool(
            "mount",
            [
                OsStr::new("-o"),
                OsStr::new("loop,ro"),
                image.as_os_str(),
                mountpoint.as_os_str(),
            ],
        )
        .map_err(BundleError::Mount)?;

        debug!(image = %image.display(), mountpoint = %mountpoint.display(), "bundle mounted");
        Ok(Self {
            mountpoint,
            _tempdir: Some(tempdir),
            needs_unmount: true,
        })
    }

    /// Wrap an already-available directory as if it were a mounted
    /// bundle. No unmount happens on drop. Fixture-only.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn adopt(dir: &Path) -> Self {
        Self {
            mountpoint: dir.to_path_buf(),
            _tempdir: None,
            needs_unmount: false,
        }
    }

    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }
}

impl Drop for LoopMount {
    fn drop(&mut self) {
        if !self.needs_unmount {
            return;
        }
        match run_tool("umount", [self.mountpoint.as_os_str()]) {
            Ok(_) => debug!(mountpoint = %self.mountpoint.display(), "bundle unmounted"),
            // A failed unmount must not mask the error being unwound;
            // the stale mountpoint is left for the operator.
            Err(err) => {
                warn!(mountpoint = %self.mountpoint.display(), error = %err, "failed to unmount bundle")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adopt_does_not_remove_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_path_buf();
        {
            let mount = LoopMount::adopt(&path);
            assert_eq!(mount.mountpoint(), path);
        }
        assert!(path.exists());
    }

    #[test]
    fn mount_failure_cleans_up_mountpoint() {
        let prefix = tempfile::tempdir().unwrap();
        let bogus = prefix.path().join("not-an-image");
        std::fs::write(&bogus, b"not a filesystem").unwrap();

        // mount(8) rejects the file (not a filesystem, or no privileges);
        // either way the guard must not leave a directory behind.
        let result = LoopMount::mount(&bogus, prefix.path());
        assert!(result.is_err());

        let leftovers: Vec<_> = std::fs::read_dir(prefix.path())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().starts_with("slotup-bundle-"))
            .collect();
        assert!(leftovers.is_empty(), "stale mountpoint directories: {leftovers:?}");
    }
}
