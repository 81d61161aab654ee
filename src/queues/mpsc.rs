//! Multi-producer single-consumer slot queue over a shared memory region.
//!
//! A fixed-capacity ring of `length` (power of two) slots, each
//! `max_message_size` bytes. Producers claim a slot by compare-exchanging
//! the shared producer position, write the payload in place and then raise
//! the slot's commit flag; the consumer reads slots in position order and
//! only trusts a slot whose flag is set, because the producer position is
//! advanced *before* the payload is written.
//!
//! Positions are monotonically increasing message indices; the slot for a
//! position is `pos & (length - 1)`. A contiguous table of cache-line-padded
//! commit flags follows the slot array.

use std::mem::{offset_of, size_of};
use std::slice;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TurboqError};
use crate::layout::{align_segment, align_up, SEGMENT_SIZE, TAG_LEN};
use crate::memory::{Mapping, MemorySource, OpenFlags, QueueFile};

const TAG: &[u8; TAG_LEN] = b"turboq/MPSC";

/// Control block at the start of the region. `max_message_size` and
/// `length` are constants after `init`.
#[repr(C)]
struct MemoryHeader {
    tag: [u8; TAG_LEN],
    max_message_size: usize,
    length: usize,
    consumer_pos: CachePadded<AtomicUsize>,
    producer_pos: CachePadded<AtomicUsize>,
}

/// Per-slot control block at the slot base.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct MessageHeader {
    payload_size: usize,
}

/// Per-slot commit flag, padded so concurrent producers never share a line.
#[repr(C)]
struct CommitState {
    committed: CachePadded<AtomicBool>,
}

const MESSAGE_HEADER_SIZE: usize = size_of::<MessageHeader>();

/// Offset of the slot array from the region start.
const DATA_OFFSET: usize = align_segment(size_of::<MemoryHeader>());

fn read_header_field(region: &[u8], offset: usize) -> usize {
    unsafe { (region.as_ptr().add(offset) as *const usize).read_unaligned() }
}

fn check(region: &[u8]) -> bool {
    if region.len() < DATA_OFFSET || &region[..TAG_LEN] != TAG {
        return false;
    }

    let max_message_size = read_header_field(region, offset_of!(MemoryHeader, max_message_size));
    let length = read_header_field(region, offset_of!(MemoryHeader, length));
    if max_message_size == 0 || length == 0 {
        return false;
    }
    if !length.is_power_of_two() {
        return false;
    }
    if max_message_size % SEGMENT_SIZE != 0 || max_message_size <= MESSAGE_HEADER_SIZE {
        return false;
    }

    // Slot array and commit table must fit the region.
    let slot_bytes = match max_message_size.checked_mul(length) {
        Some(v) => v,
        None => return false,
    };
    let state_bytes = match size_of::<CommitState>().checked_mul(length) {
        Some(v) => v,
        None => return false,
    };
    DATA_OFFSET
        .checked_add(slot_bytes)
        .and_then(|v| v.checked_add(state_bytes))
        .map_or(false, |required| required <= region.len())
}

fn init(storage: &Mapping, max_message_size: usize, length: usize) {
    let header = unsafe { &mut *(storage.ptr() as *mut MemoryHeader) };
    header.tag.copy_from_slice(TAG);
    header.max_message_size = max_message_size;
    header.length = length;
    // Positions and commit flags rely on the zero-filled fresh pages.
    header.consumer_pos.store(0, Ordering::Relaxed);
    header.producer_pos.store(0, Ordering::Relaxed);
}

/// Writing endpoint of an MPSC queue. Any number may be live concurrently;
/// each claims slots through the shared producer position.
#[derive(Debug)]
pub struct MpscProducer {
    storage: Mapping,
    max_message_size: usize,
    length: usize,
    states_offset: usize,
    producer_slot: usize,
    consumer_pos: usize,
}

impl MpscProducer {
    fn new(storage: Mapping) -> Result<Self> {
        if !check(storage.as_slice()) {
            return Err(TurboqError::invalid_region("not a turboq/MPSC region"));
        }

        let region = storage.as_slice();
        let max_message_size =
            read_header_field(region, offset_of!(MemoryHeader, max_message_size));
        let length = read_header_field(region, offset_of!(MemoryHeader, length));
        let states_offset = DATA_OFFSET + max_message_size * length;

        let mut producer = Self {
            storage,
            max_message_size,
            length,
            states_offset,
            producer_slot: 0,
            consumer_pos: 0,
        };
        producer.consumer_pos = producer.header().consumer_pos.load(Ordering::Acquire);
        Ok(producer)
    }

    /// Largest record (header plus payload) a slot can hold.
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Number of slots in the ring.
    pub fn length(&self) -> usize {
        self.length
    }

    /// Claim a slot and reserve `size` bytes in it for writing.
    ///
    /// Returns `Ok(None)` when the ring is full. A `size` that cannot fit
    /// any slot is a configuration error.
    pub fn prepare(&mut self, size: usize) -> Result<Option<&mut [u8]>> {
        let total_size = size + MESSAGE_HEADER_SIZE;
        if total_size > self.max_message_size {
            return Err(TurboqError::MessageTooLarge {
                requested: total_size,
                max: self.max_message_size,
            });
        }

        let mut current = self.header().producer_pos.load(Ordering::Acquire);
        if current.wrapping_sub(self.consumer_pos) >= self.length {
            self.consumer_pos = self.header().consumer_pos.load(Ordering::Acquire);
            if current.wrapping_sub(self.consumer_pos) >= self.length {
                return Ok(None);
            }
        }

        // Claim the position; indices increase monotonically and are mapped
        // to slots modulo the ring length.
        while let Err(observed) = self.header().producer_pos.compare_exchange_weak(
            current,
            current.wrapping_add(1),
            Ordering::Release,
            Ordering::Relaxed,
        ) {
            current = observed;
            if current.wrapping_sub(self.consumer_pos) >= self.length {
                return Ok(None);
            }
        }

        let slot = current & (self.length - 1);
        self.producer_slot = slot;
        let base = self.slot_base(slot);
        self.write_message_header(base, MessageHeader { payload_size: size });
        Ok(Some(self.payload_mut(base + MESSAGE_HEADER_SIZE, size)))
    }

    /// Make the claimed slot visible to the consumer.
    pub fn commit(&mut self) {
        self.commit_states()[self.producer_slot]
            .committed
            .store(true, Ordering::Release);
    }

    /// Commit with a shrunken payload length.
    ///
    /// `size` must not exceed the length passed to the matching `prepare`.
    pub fn commit_truncated(&mut self, size: usize) {
        let base = self.slot_base(self.producer_slot);
        let mut header = self.read_message_header(base);
        debug_assert!(
            size <= header.payload_size,
            "commit size grew past the reservation"
        );
        if size <= header.payload_size {
            header.payload_size = size;
            self.write_message_header(base, header);
        }
        self.commit();
    }

    fn header(&self) -> &MemoryHeader {
        unsafe { &*(self.storage.ptr() as *const MemoryHeader) }
    }

    fn commit_states(&self) -> &[CommitState] {
        unsafe {
            slice::from_raw_parts(
                self.storage.ptr().add(self.states_offset) as *const CommitState,
                self.length,
            )
        }
    }

    fn slot_base(&self, slot: usize) -> usize {
        DATA_OFFSET + slot * self.max_message_size
    }

    fn read_message_header(&self, base: usize) -> MessageHeader {
        unsafe { (self.storage.ptr().add(base) as *const MessageHeader).read() }
    }

    fn write_message_header(&mut self, base: usize, value: MessageHeader) {
        unsafe { (self.storage.ptr().add(base) as *mut MessageHeader).write(value) }
    }

    fn payload_mut(&mut self, offset: usize, len: usize) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.storage.ptr().add(offset), len) }
    }
}

/// Reading endpoint of an MPSC queue. At most one exists per queue,
/// enforced by an advisory lock on the backing file.
#[derive(Debug)]
pub struct MpscConsumer {
    storage: Mapping,
    _lock: QueueFile,
    max_message_size: usize,
    length: usize,
    states_offset: usize,
    producer_pos: usize,
    consumer_pos: usize,
    last_slot: Option<usize>,
}

impl MpscConsumer {
    fn new(storage: Mapping, lock: QueueFile) -> Result<Self> {
        if !check(storage.as_slice()) {
            return Err(TurboqError::invalid_region("not a turboq/MPSC region"));
        }

        let region = storage.as_slice();
        let max_message_size =
            read_header_field(region, offset_of!(MemoryHeader, max_message_size));
        let length = read_header_field(region, offset_of!(MemoryHeader, length));
        let states_offset = DATA_OFFSET + max_message_size * length;

        let mut consumer = Self {
            storage,
            _lock: lock,
            max_message_size,
            length,
            states_offset,
            producer_pos: 0,
            consumer_pos: 0,
            last_slot: None,
        };
        consumer.producer_pos = consumer.header().producer_pos.load(Ordering::Acquire);
        consumer.consumer_pos = consumer.header().consumer_pos.load(Ordering::Acquire);
        Ok(consumer)
    }

    /// Largest record (header plus payload) a slot can hold.
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Number of slots in the ring.
    pub fn length(&self) -> usize {
        self.length
    }

    /// Next committed payload, or `None` when the queue is empty or the
    /// next slot is still being written.
    ///
    /// Repeated calls without [`consume`](Self::consume) return the same
    /// record.
    pub fn fetch(&mut self) -> Option<&[u8]> {
        if self.consumer_pos == self.producer_pos {
            self.producer_pos = self.header().producer_pos.load(Ordering::Acquire);
            if self.consumer_pos == self.producer_pos {
                return None;
            }
        }

        let slot = self.consumer_pos & (self.length - 1);
        // The producer position is advanced at claim time, before the
        // payload lands; only the commit flag carries visibility.
        if !self.commit_states()[slot].committed.load(Ordering::Acquire) {
            return None;
        }

        let base = self.slot_base(slot);
        let header = self.read_message_header(base);
        debug_assert!(MESSAGE_HEADER_SIZE + header.payload_size <= self.max_message_size);

        self.last_slot = Some(slot);
        Some(self.payload(base + MESSAGE_HEADER_SIZE, header.payload_size))
    }

    /// Release the last fetched slot back to the producers.
    ///
    /// No-op unless a preceding [`fetch`](Self::fetch) returned data.
    pub fn consume(&mut self) {
        if let Some(slot) = self.last_slot.take() {
            self.consumer_pos = self.consumer_pos.wrapping_add(1);
            self.commit_states()[slot]
                .committed
                .store(false, Ordering::Release);
            self.header()
                .consumer_pos
                .store(self.consumer_pos, Ordering::Release);
        }
    }

    /// Drop everything currently queued, clearing the commit flags so the
    /// slots become reusable.
    pub fn reset(&mut self) {
        while self.consumer_pos != self.producer_pos {
            let slot = self.consumer_pos & (self.length - 1);
            self.commit_states()[slot]
                .committed
                .store(false, Ordering::Release);
            self.consumer_pos = self.consumer_pos.wrapping_add(1);
        }
        self.last_slot = None;
        self.header()
            .consumer_pos
            .store(self.consumer_pos, Ordering::Release);
    }

    fn header(&self) -> &MemoryHeader {
        unsafe { &*(self.storage.ptr() as *const MemoryHeader) }
    }

    fn commit_states(&self) -> &[CommitState] {
        unsafe {
            slice::from_raw_parts(
                self.storage.ptr().add(self.states_offset) as *const CommitState,
                self.length,
            )
        }
    }

    fn slot_base(&self, slot: usize) -> usize {
        DATA_OFFSET + slot * self.max_message_size
    }

    fn read_message_header(&self, base: usize) -> MessageHeader {
        unsafe { (self.storage.ptr().add(base) as *const MessageHeader).read() }
    }

    fn payload(&self, offset: usize, len: usize) -> &[u8] {
        unsafe { slice::from_raw_parts(self.storage.ptr().add(offset), len) }
    }
}

/// Creation options for [`MpscQueue::open_or_create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MpscCreationOptions {
    /// Largest payload a producer will ask for; rounded up so header plus
    /// payload fill whole segments.
    pub max_message_size_hint: usize,
    /// Requested slot count; rounded up to the next power of two.
    pub length_hint: usize,
}

/// Factory for MPSC queues: sizes and initializes the region, mints the
/// endpoints.
#[derive(Debug)]
pub struct MpscQueue {
    file: QueueFile,
}

impl MpscQueue {
    /// Open an existing queue. Fails when the backing file is absent or does
    /// not hold a valid MPSC region.
    pub fn open(name: &str, source: &dyn MemorySource) -> Result<Self> {
        let (file, _page_size) = source.open(name, OpenFlags::OpenOnly)?;
        let storage = Mapping::of_file(&file)?;
        if !check(storage.as_slice()) {
            return Err(TurboqError::invalid_region("not a turboq/MPSC region"));
        }
        Ok(Self { file })
    }

    /// Open an existing queue or create a new one.
    ///
    /// An existing backing file must match the computed capacity exactly.
    pub fn open_or_create(
        name: &str,
        options: &MpscCreationOptions,
        source: &dyn MemorySource,
    ) -> Result<Self> {
        if options.max_message_size_hint == 0 {
            return Err(TurboqError::invalid_parameter(
                "max_message_size_hint",
                "must be greater than zero",
            ));
        }
        if options.length_hint == 0 {
            return Err(TurboqError::invalid_parameter(
                "length_hint",
                "must be greater than zero",
            ));
        }

        let (file, page_size) = source.open(name, OpenFlags::OpenOrCreate)?;

        let max_message_size =
            align_segment(options.max_message_size_hint + MESSAGE_HEADER_SIZE);
        let length = options.length_hint.next_power_of_two();
        let capacity_hint =
            DATA_OFFSET + max_message_size * length + size_of::<CommitState>() * length;
        let capacity = align_up(capacity_hint, page_size);

        let file_size = file.size()?;
        if file_size != 0 {
            if file_size != capacity {
                return Err(TurboqError::SizeMismatch {
                    expected: capacity,
                    actual: file_size,
                });
            }
            let storage = Mapping::of_file(&file)?;
            if !check(storage.as_slice()) {
                return Err(TurboqError::invalid_region("not a turboq/MPSC region"));
            }
        } else {
            file.truncate(capacity)?;
            init(&Mapping::with_len(&file, capacity)?, max_message_size, length);
        }

        Ok(Self { file })
    }

    /// Create a producer endpoint.
    pub fn create_producer(&self) -> Result<MpscProducer> {
        MpscProducer::new(Mapping::of_file(&self.file)?)
    }

    /// Create the consumer endpoint. At most one may be live per queue.
    pub fn create_consumer(&self) -> Result<MpscConsumer> {
        let lock = self.file.reopen()?;
        if !lock.try_lock()? {
            return Err(TurboqError::endpoint_exists("consumer"));
        }
        MpscConsumer::new(Mapping::of_file(&self.file)?, lock)
    }
}
