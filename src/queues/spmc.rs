//! Single-producer multi-consumer broadcast queue over a shared memory
//! region.
//!
//! The producer writes variable-size records into a circular byte buffer
//! and publishes only its own position; every consumer follows the stream
//! independently from wherever it last left off, so each consumer sees
//! every message. Consumers never write the region - there is no shared
//! consumer position and no backpressure: the producer overwrites old bytes
//! unconditionally.
//!
//! A consumer that gets lapped may read a record header that the producer
//! has meanwhile overwritten. [`SpmcConsumer::fetch`] validates the header
//! bounds before constructing a span and returns `None` on violation; the
//! consumer then recovers with [`SpmcConsumer::reset`]. Torn *payload*
//! bytes remain possible for lapped consumers by design.

use std::mem::size_of;
use std::slice;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TurboqError};
use crate::layout::{align_segment, align_up, SEGMENT_SIZE, TAG_LEN};
use crate::memory::{Mapping, MemorySource, OpenFlags, QueueFile};

const TAG: &[u8; TAG_LEN] = b"turboq/SPMC";

/// Control block at the start of the region. Only the producer position is
/// shared; consumers keep their own positions privately.
#[repr(C)]
struct MemoryHeader {
    tag: [u8; TAG_LEN],
    producer_pos: CachePadded<AtomicUsize>,
}

/// Per-record control block in the data area, identical in shape to the
/// SPSC one: `payload_offset + size` is the offset of the next record
/// header.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct MessageHeader {
    size: usize,
    payload_offset: usize,
    payload_size: usize,
}

const MESSAGE_HEADER_SIZE: usize = size_of::<MessageHeader>();

/// Offset of the data area from the region start.
const DATA_OFFSET: usize = align_segment(size_of::<MemoryHeader>());

/// Smallest region that holds the header plus one maximal wrap pair.
pub const MIN_BUFFER_SIZE: usize = DATA_OFFSET + 2 * SEGMENT_SIZE;

fn check(region: &[u8]) -> bool {
    region.len() >= MIN_BUFFER_SIZE && &region[..TAG_LEN] == TAG
}

fn init(storage: &Mapping) {
    let header = unsafe { &mut *(storage.ptr() as *mut MemoryHeader) };
    header.tag.copy_from_slice(TAG);
    header.producer_pos.store(0, Ordering::Relaxed);
}

/// Writing endpoint of an SPMC queue. At most one exists per queue,
/// enforced by an advisory lock on the backing file.
#[derive(Debug)]
pub struct SpmcProducer {
    storage: Mapping,
    _lock: QueueFile,
    data_size: usize,
    producer_pos: usize,
    last_header: usize,
}

impl SpmcProducer {
    fn new(storage: Mapping, lock: QueueFile) -> Result<Self> {
        if !check(storage.as_slice()) {
            return Err(TurboqError::invalid_region("not a turboq/SPMC region"));
        }

        let data_size = storage.len() - DATA_OFFSET;
        let mut producer = Self {
            storage,
            _lock: lock,
            data_size,
            producer_pos: 0,
            last_header: 0,
        };

        producer.producer_pos = producer.header().producer_pos.load(Ordering::Acquire);
        if producer.producer_pos + MESSAGE_HEADER_SIZE > data_size {
            return Err(TurboqError::invalid_region("position out of bounds"));
        }

        Ok(producer)
    }

    /// Region capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Reserve a contiguous span of `size` bytes for writing without
    /// publishing it. Old records are overwritten unconditionally; `None`
    /// means the record can never fit the buffer at all.
    pub fn prepare(&mut self, size: usize) -> Option<&mut [u8]> {
        let aligned_size = align_segment(size + MESSAGE_HEADER_SIZE);

        if self.producer_pos + aligned_size + MESSAGE_HEADER_SIZE > self.data_size {
            // Wrap: the header stays at the tail, the payload restarts at
            // zero with the header bytes forfeited. The cap below keeps a
            // header slot available at the new tail as well.
            let aligned_payload = align_segment(size);
            if aligned_payload + MESSAGE_HEADER_SIZE > self.data_size {
                return None;
            }
            let offset = self.producer_pos;
            self.write_message_header(
                offset,
                MessageHeader {
                    size: aligned_payload,
                    payload_offset: 0,
                    payload_size: size,
                },
            );
            self.last_header = offset;
            self.producer_pos = aligned_payload;
            return Some(self.payload_mut(0, size));
        }

        let offset = self.producer_pos;
        let payload_offset = offset + MESSAGE_HEADER_SIZE;
        self.write_message_header(
            offset,
            MessageHeader {
                size: aligned_size - MESSAGE_HEADER_SIZE,
                payload_offset,
                payload_size: size,
            },
        );
        self.last_header = offset;
        self.producer_pos = offset + aligned_size;
        Some(self.payload_mut(payload_offset, size))
    }

    /// Publish the last reserved record to all consumers.
    pub fn commit(&mut self) {
        self.header()
            .producer_pos
            .store(self.producer_pos, Ordering::Release);
    }

    /// Publish the last reserved record with a shrunken payload length.
    ///
    /// `size` must not exceed the length passed to the matching `prepare`.
    pub fn commit_truncated(&mut self, size: usize) {
        let mut header = self.read_message_header(self.last_header);
        debug_assert!(
            size <= header.payload_size,
            "commit size grew past the reservation"
        );
        if size <= header.payload_size {
            header.payload_size = size;
            self.write_message_header(self.last_header, header);
        }
        self.commit();
    }

    fn header(&self) -> &MemoryHeader {
        unsafe { &*(self.storage.ptr() as *const MemoryHeader) }
    }

    fn write_message_header(&mut self, offset: usize, value: MessageHeader) {
        unsafe {
            (self.storage.ptr().add(DATA_OFFSET + offset) as *mut MessageHeader).write(value)
        }
    }

    fn read_message_header(&self, offset: usize) -> MessageHeader {
        unsafe { (self.storage.ptr().add(DATA_OFFSET + offset) as *const MessageHeader).read() }
    }

    fn payload_mut(&mut self, offset: usize, len: usize) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.storage.ptr().add(DATA_OFFSET + offset), len) }
    }
}

/// Reading endpoint of an SPMC queue. Any number may be live concurrently;
/// each starts at the producer position current at its construction and
/// never writes the region.
#[derive(Debug)]
pub struct SpmcConsumer {
    storage: Mapping,
    data_size: usize,
    consumer_pos: usize,
    producer_pos: usize,
}

impl SpmcConsumer {
    fn new(storage: Mapping) -> Result<Self> {
        if !check(storage.as_slice()) {
            return Err(TurboqError::invalid_region("not a turboq/SPMC region"));
        }

        let data_size = storage.len() - DATA_OFFSET;
        let mut consumer = Self {
            storage,
            data_size,
            consumer_pos: 0,
            producer_pos: 0,
        };
        // Nothing is read until the next fetch reloads with acquire.
        consumer.consumer_pos = consumer.header().producer_pos.load(Ordering::Relaxed);
        consumer.producer_pos = consumer.consumer_pos;
        Ok(consumer)
    }

    /// Region capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Next published payload, advancing past it, or `None` when the
    /// producer has not published anything new.
    ///
    /// `None` is also returned when the record header fails its bounds
    /// checks, which means this consumer was lapped by the producer; call
    /// [`reset`](Self::reset) to rejoin the stream.
    pub fn fetch(&mut self) -> Option<&[u8]> {
        if self.consumer_pos == self.producer_pos {
            self.producer_pos = self.header().producer_pos.load(Ordering::Acquire);
            if self.consumer_pos == self.producer_pos {
                return None;
            }
        }

        let header = self.read_message_header(self.consumer_pos);
        // A lapped consumer may see an overwritten header; never build a
        // span from one.
        if header.payload_size > header.size
            || header.payload_offset > self.data_size
            || header.size > self.data_size - header.payload_offset
        {
            return None;
        }

        self.consumer_pos = header.payload_offset + header.size;
        Some(self.payload(header.payload_offset, header.payload_size))
    }

    /// Reading is purely local; kept for symmetry with the other shapes.
    pub fn consume(&mut self) {}

    /// Rejoin the stream at the producer's current position.
    pub fn reset(&mut self) {
        // Nothing is read until the next fetch reloads with acquire.
        self.consumer_pos = self.header().producer_pos.load(Ordering::Relaxed);
        self.producer_pos = self.consumer_pos;
    }

    fn header(&self) -> &MemoryHeader {
        unsafe { &*(self.storage.ptr() as *const MemoryHeader) }
    }

    fn read_message_header(&self, offset: usize) -> MessageHeader {
        unsafe { (self.storage.ptr().add(DATA_OFFSET + offset) as *const MessageHeader).read() }
    }

    fn payload(&self, offset: usize, len: usize) -> &[u8] {
        unsafe { slice::from_raw_parts(self.storage.ptr().add(DATA_OFFSET + offset), len) }
    }
}

/// Creation options for [`SpmcQueue::open_or_create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpmcCreationOptions {
    /// Requested region size in bytes; rounded up to the source page size.
    pub capacity_hint: usize,
}

/// Factory for SPMC queues: sizes and initializes the region, mints the
/// endpoints.
#[derive(Debug)]
pub struct SpmcQueue {
    file: QueueFile,
}

impl SpmcQueue {
    /// Open an existing queue. Fails when the backing file is absent or does
    /// not hold a valid SPMC region.
    pub fn open(name: &str, source: &dyn MemorySource) -> Result<Self> {
        let (file, _page_size) = source.open(name, OpenFlags::OpenOnly)?;
        let storage = Mapping::of_file(&file)?;
        if !check(storage.as_slice()) {
            return Err(TurboqError::invalid_region("not a turboq/SPMC region"));
        }
        Ok(Self { file })
    }

    /// Open an existing queue or create a new one.
    ///
    /// An existing backing file must match the computed capacity exactly.
    pub fn open_or_create(
        name: &str,
        options: &SpmcCreationOptions,
        source: &dyn MemorySource,
    ) -> Result<Self> {
        if options.capacity_hint == 0 {
            return Err(TurboqError::invalid_parameter(
                "capacity_hint",
                "must be greater than zero",
            ));
        }

        let (file, page_size) = source.open(name, OpenFlags::OpenOrCreate)?;
        let capacity = align_up(options.capacity_hint, page_size);
        if capacity < MIN_BUFFER_SIZE {
            return Err(TurboqError::invalid_parameter(
                "capacity_hint",
                "region too small for the queue header",
            ));
        }

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
                return Err(TurboqError::invalid_region("not a turboq/SPMC region"));
            }
        } else {
            file.truncate(capacity)?;
            init(&Mapping::with_len(&file, capacity)?);
        }

        Ok(Self { file })
    }

    /// Create the producer endpoint. At most one may be live per queue.
    pub fn create_producer(&self) -> Result<SpmcProducer> {
        let lock = self.file.reopen()?;
        if !lock.try_lock()? {
            return Err(TurboqError::endpoint_exists("producer"));
        }
        SpmcProducer::new(Mapping::of_file(&self.file)?, lock)
    }

    /// Create a consumer endpoint.
    pub fn create_consumer(&self) -> Result<SpmcConsumer> {
        SpmcConsumer::new(Mapping::of_file(&self.file)?)
    }
}
