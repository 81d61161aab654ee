//! Shared-region layout primitives common to all queue shapes.
//!
//! Every queue region begins with an 11-byte ASCII tag followed by
//! cache-line-padded atomic position counters; records in the data area are
//! placed at segment-aligned offsets. The segment size is derived from
//! [`CachePadded`] so that header padding and record alignment are governed
//! by a single constant.

use std::mem::{align_of, size_of};
use std::sync::atomic::AtomicUsize;

use crossbeam_utils::CachePadded;

/// Length in bytes of the shape tag at offset 0 of every region.
pub(crate) const TAG_LEN: usize = 11;

/// Cache-line segment used for header padding and record placement.
///
/// `CachePadded` rounds to 128 bytes on x86-64, which also defeats the
/// adjacent-line prefetcher between independently written counters.
pub const SEGMENT_SIZE: usize = align_of::<CachePadded<AtomicUsize>>();

// Position counters are plain machine words behind atomic operations; the
// queue protocol relies on those operations being lock-free.
const _: () = assert!(size_of::<AtomicUsize>() == size_of::<usize>());
const _: () = assert!(SEGMENT_SIZE.is_power_of_two());
const _: () = assert!(size_of::<CachePadded<AtomicUsize>>() == SEGMENT_SIZE);

/// Round `value` up to a multiple of `align`.
pub(crate) const fn align_up(value: usize, align: usize) -> usize {
    ((value + align - 1) / align) * align
}

/// Round a record size up to the segment size.
pub(crate) const fn align_segment(value: usize) -> usize {
    align_up(value, SEGMENT_SIZE)
}
