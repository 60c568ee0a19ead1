//! Advisory file locking
//!
//! The index file is shared across processes; readers take a shared flock,
//! writers an exclusive one, so no process ever observes a partially
//! written index. Advisory locks are cooperative: only processes that take
//! them are protected.

use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;

/// RAII flock guard; the lock is released on drop (and on file close).
pub struct FileLock<'a> {
    file: &'a File,
}

impl<'a> FileLock<'a> {
    /// Take a shared (read) lock, blocking until it is granted.
    pub fn shared(file: &'a File) -> io::Result<Self> {
        Self::acquire(file, libc::LOCK_SH)
    }

    /// Take an exclusive (write) lock, blocking until it is granted.
    pub fn exclusive(file: &'a File) -> io::Result<Self> {
        Self::acquire(file, libc::LOCK_EX)
    }

    fn acquire(file: &'a File, operation: libc::c_int) -> io::Result<Self> {
        let rc = unsafe { libc::flock(file.as_raw_fd(), operation) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { file })
    }
}

impl Drop for FileLock<'_> {
    fn drop(&mut self) {
        let _ = unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;

    #[test]
    fn shared_locks_coexist() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("locked");
        let a = OpenOptions::new().create(true).write(true).open(&path).unwrap();
        let b = OpenOptions::new().read(true).open(&path).unwrap();

        let _lock_a = FileLock::shared(&a).unwrap();
        // A second shared lock on an independent descriptor must not block.
        let _lock_b = FileLock::shared(&b).unwrap();
    }

    #[test]
    fn exclusive_lock_released_on_drop() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("locked");
        let a = OpenOptions::new().create(true).write(true).open(&path).unwrap();
        let b = OpenOptions::new().read(true).write(true).open(&path).unwrap();

        {
            let _lock = FileLock::exclusive(&a).unwrap();
        }
        // Dropped above; a fresh exclusive lock must succeed immediately.
        let _lock = FileLock::exclusive(&b).unwrap();
    }
}
