//! Backing-file wrapper for queue regions

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use nix::sys::memfd::{memfd_create, MemFdCreateFlag};

use crate::error::{Result, TurboqError};

/// Owned descriptor of a queue backing file.
///
/// Wraps the handle a [`MemorySource`](crate::memory::MemorySource) hands out
/// and the small set of operations the queue factories need: sizing,
/// truncation, mapping and the advisory lock used for singleton endpoints.
#[derive(Debug)]
pub struct QueueFile {
    file: File,
}

impl QueueFile {
    /// Open an existing file read-write. Fails if the file is absent.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| TurboqError::from_io(e, "failed to open backing file"))?;
        Ok(Self { file })
    }

    /// Open a file read-write, creating it with `mode` if absent.
    pub fn open_or_create(path: &Path, mode: u32) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(mode)
            .open(path)
            .map_err(|e| TurboqError::from_io(e, "failed to create/open backing file"))?;
        Ok(Self { file })
    }

    /// Create an anonymous memory file (Linux `memfd`).
    ///
    /// The region has no name in the filesystem and lives only while
    /// descriptors to it exist, which makes it suitable for single-process
    /// use and testing.
    pub fn anonymous(name: &str) -> Result<Self> {
        let name_cstr = std::ffi::CString::new(name)
            .map_err(|_| TurboqError::invalid_parameter("name", "name contains null bytes"))?;

        let owned_fd = memfd_create(&name_cstr, MemFdCreateFlag::MFD_CLOEXEC)
            .map_err(|e| TurboqError::platform(format!("failed to create memfd: {}", e)))?;

        Ok(Self {
            file: File::from(owned_fd),
        })
    }

    /// Current file size in bytes.
    pub fn size(&self) -> Result<usize> {
        let metadata = self
            .file
            .metadata()
            .map_err(|e| TurboqError::from_io(e, "failed to stat backing file"))?;
        Ok(metadata.len() as usize)
    }

    /// Grow the file to `size` bytes. Called once, at region creation; the
    /// kernel zero-fills the new pages.
    pub fn truncate(&self, size: usize) -> Result<()> {
        self.file
            .set_len(size as u64)
            .map_err(|e| TurboqError::from_io(e, "failed to truncate backing file"))
    }

    /// Try to take a non-blocking exclusive advisory lock on this descriptor.
    ///
    /// Returns `Ok(false)` when another open file description already holds
    /// the lock. The lock is released when this `QueueFile` is dropped.
    pub fn try_lock(&self) -> Result<bool> {
        let rc = flock_no_int(self.file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB);
        if rc == -1 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(false);
            }
            return Err(TurboqError::from_io(err, "flock failed"));
        }
        Ok(true)
    }

    /// Reopen the same file through a fresh open file description.
    ///
    /// `flock` state is per open file description, so a lock taken on the
    /// reopened handle is independent of any lock on this one. Works for
    /// path-backed files and memfds alike via `/proc/self/fd`.
    pub fn reopen(&self) -> Result<QueueFile> {
        let proc_path = format!("/proc/self/fd/{}", self.file.as_raw_fd());
        Self::open(Path::new(&proc_path))
    }

    pub(crate) fn as_file(&self) -> &File {
        &self.file
    }
}

fn flock_no_int(fd: i32, op: i32) -> i32 {
    loop {
        let rc = unsafe { libc::flock(fd, op) };
        if rc != -1 || io::Error::last_os_error().raw_os_error() != Some(libc::EINTR) {
            return rc;
        }
    }
}
