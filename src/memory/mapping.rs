//! Memory-mapped view of a queue backing file

use memmap2::{MmapMut, MmapOptions};

use crate::error::{Result, TurboqError};
use crate::memory::file::QueueFile;

/// A shared, writable mapping of a queue region.
///
/// Each endpoint owns its own `Mapping` of the backing file; the header
/// atomics and payload bytes are reached through raw pointers derived from
/// it. The lifetime invariant is that the mapping outlives every such
/// pointer, which the endpoint types uphold by owning the mapping.
#[derive(Debug)]
pub struct Mapping {
    mmap: MmapMut,
}

impl Mapping {
    /// Map the whole backing file.
    pub fn of_file(file: &QueueFile) -> Result<Self> {
        let len = file.size()?;
        Self::with_len(file, len)
    }

    /// Map `len` bytes of the backing file.
    pub fn with_len(file: &QueueFile, len: usize) -> Result<Self> {
        if len == 0 {
            return Err(TurboqError::invalid_region("cannot map an empty region"));
        }

        let mmap = unsafe {
            MmapOptions::new()
                .len(len)
                .map_mut(file.as_file())
                .map_err(|e| TurboqError::from_io(e, "failed to map queue region"))?
        };

        Ok(Self { mmap })
    }

    /// Size of the mapped region in bytes.
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    /// Whether the mapping is empty (never true for a constructed mapping).
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Read-only view of the region bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.mmap
    }

    /// Base pointer of the shared region.
    ///
    /// # Safety contract
    /// Writes through this pointer are serialized by the queue protocol (one
    /// writer per header field, payload handover via release/acquire); callers
    /// must not fabricate overlapping mutable views outside that protocol.
    pub(crate) fn ptr(&self) -> *mut u8 {
        self.mmap.as_ptr() as *mut u8
    }
}
