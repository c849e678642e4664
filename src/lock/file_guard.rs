//! Advisory file guard
//!
//! Serialises read-modify-write of a shared unit across processes with an
//! exclusive `flock`. The guard blocks until granted and unlocks on drop.

use std::fs::{File, OpenOptions};
use std::path::Path;

use crate::error::Result;

/// Exclusive advisory lock on a guard file
#[derive(Debug)]
pub struct FileGuard {
    file: File,
}

impl FileGuard {
    pub fn lock(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;

        #[cfg(unix)]
        {
            use libc::{flock, LOCK_EX};
            use std::os::unix::io::AsRawFd;

            let fd = file.as_raw_fd();
            // SAFETY: fd is a valid descriptor owned by `file` for this call
            if unsafe { flock(fd, LOCK_EX) } != 0 {
                return Err(std::io::Error::last_os_error().into());
            }
        }

        Ok(FileGuard { file })
    }
}

impl Drop for FileGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use libc::{flock, LOCK_UN};
            use std::os::unix::io::AsRawFd;

            let fd = self.file.as_raw_fd();
            // SAFETY: fd stays valid until `file` drops after this body
            unsafe {
                flock(fd, LOCK_UN);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_guard_relocks_after_drop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("meta_locks.guard");

        let guard = FileGuard::lock(&path).unwrap();
        drop(guard);
        let _again = FileGuard::lock(&path).unwrap();
        assert!(path.exists());
    }
}
