//! Single-producer single-consumer byte queue over a shared memory region.
//!
//! Variable-size records in a circular byte buffer. The producer reserves a
//! contiguous span with [`SpscProducer::prepare`], writes the payload in
//! place and publishes it with [`SpscProducer::commit`]; the consumer reads
//! the same bytes through [`SpscConsumer::fetch`] and releases them with
//! [`SpscConsumer::consume`]. No copy happens between the two address
//! spaces.
//!
//! Region layout:
//!
//! ```text
//! s               e   s                      e  s                    e
//! +---------------+---+--------+-------------+--+--------+-----------+-----+--------
//! | MemoryHeader  |xxx| Header | Payload     |xx| Header |  Payload  |xxxxx|uuuuuuuu
//! +---------------+---+--------+-------------+--+--------+-----------+-----+--------
//! s   - start
//! e   - end
//! xxx - padding bytes
//! uuu - unused bytes
//! ```
//!
//! When a record does not fit before the buffer end, the producer lays a
//! *wrap record* at the tail whose `payload_offset` points back to the start
//! of the data area; the consumer follows `payload_offset` blindly and never
//! needs to detect the wrap itself.

use std::mem::size_of;
use std::slice;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TurboqError};
use crate::layout::{align_segment, align_up, SEGMENT_SIZE, TAG_LEN};
use crate::memory::{Mapping, MemorySource, OpenFlags, QueueFile};

const TAG: &[u8; TAG_LEN] = b"turboq/SPSC";

/// Control block at the start of the region.
#[repr(C)]
struct MemoryHeader {
    tag: [u8; TAG_LEN],
    producer_pos: CachePadded<AtomicUsize>,
    consumer_pos: CachePadded<AtomicUsize>,
}

/// Per-record control block in the data area.
///
/// `size` counts the bytes the record occupies after its own header,
/// including trailing padding, so `payload_offset + size` is always the
/// offset of the next record header.
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
    header.consumer_pos.store(0, Ordering::Relaxed);
}

/// Writing endpoint of an SPSC queue. Move-only; at most one should exist
/// per queue by construction of the application.
#[derive(Debug)]
pub struct SpscProducer {
    storage: Mapping,
    data_size: usize,
    producer_pos: usize,
    min_free_space: usize,
    last_header: usize,
}

impl SpscProducer {
    fn new(storage: Mapping) -> Result<Self> {
        if !check(storage.as_slice()) {
            return Err(TurboqError::invalid_region("not a turboq/SPSC region"));
        }

        let data_size = storage.len() - DATA_OFFSET;
        let mut producer = Self {
            storage,
            data_size,
            producer_pos: 0,
            min_free_space: 0,
            last_header: 0,
        };

        producer.producer_pos = producer.header().producer_pos.load(Ordering::Acquire);
        let consumer_pos = producer.header().consumer_pos.load(Ordering::Acquire);
        if producer.producer_pos + MESSAGE_HEADER_SIZE > data_size || consumer_pos > data_size {
            return Err(TurboqError::invalid_region("position out of bounds"));
        }

        producer.min_free_space = if consumer_pos > producer.producer_pos {
            // Queue is empty only when the positions are equal, so one byte
            // always stays unreserved.
            consumer_pos - producer.producer_pos - 1
        } else {
            // Keep room at the tail for a final record header.
            data_size - producer.producer_pos - MESSAGE_HEADER_SIZE
        };

        Ok(producer)
    }

    /// Region capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Reserve a contiguous span of `size` bytes for writing without making
    /// it visible to the consumer. Returns `None` when the queue is full.
    pub fn prepare(&mut self, size: usize) -> Option<&mut [u8]> {
        let aligned_size = align_segment(size + MESSAGE_HEADER_SIZE);

        if aligned_size <= self.min_free_space {
            return Some(self.reserve(aligned_size, size));
        }

        let consumer_pos = self.header().consumer_pos.load(Ordering::Acquire);

        if consumer_pos > self.producer_pos {
            // Producer has wrapped already; the free run ends one byte short
            // of the consumer.
            self.min_free_space = consumer_pos - self.producer_pos - 1;
            if aligned_size <= self.min_free_space {
                return Some(self.reserve(aligned_size, size));
            }
        } else {
            debug_assert!(MESSAGE_HEADER_SIZE <= self.data_size - self.producer_pos);
            self.min_free_space = self.data_size - self.producer_pos - MESSAGE_HEADER_SIZE;
            if aligned_size <= self.min_free_space {
                return Some(self.reserve(aligned_size, size));
            }

            // Wrap: forwarding record at the tail, payload restarts at zero.
            // Strictly less keeps the empty/full cases distinguishable.
            let aligned_payload = align_segment(size);
            if aligned_payload < consumer_pos {
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
                self.min_free_space = consumer_pos - self.producer_pos - 1;
                return Some(self.payload_mut(0, size));
            }
        }

        None
    }

    /// Publish the last reserved record.
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

    fn reserve(&mut self, aligned_size: usize, payload_size: usize) -> &mut [u8] {
        let offset = self.producer_pos;
        let payload_offset = offset + MESSAGE_HEADER_SIZE;
        self.write_message_header(
            offset,
            MessageHeader {
                size: aligned_size - MESSAGE_HEADER_SIZE,
                payload_offset,
                payload_size,
            },
        );
        self.last_header = offset;
        self.producer_pos += aligned_size;
        self.min_free_space -= aligned_size;
        self.payload_mut(payload_offset, payload_size)
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

/// Reading endpoint of an SPSC queue. At most one exists per queue,
/// enforced by an advisory lock on the backing file.
#[derive(Debug)]
pub struct SpscConsumer {
    storage: Mapping,
    _lock: QueueFile,
    data_size: usize,
    consumer_pos: usize,
    producer_pos: usize,
    last_header: Option<usize>,
}

impl SpscConsumer {
    fn new(storage: Mapping, lock: QueueFile) -> Result<Self> {
        if !check(storage.as_slice()) {
            return Err(TurboqError::invalid_region("not a turboq/SPSC region"));
        }

        let data_size = storage.len() - DATA_OFFSET;
        let mut consumer = Self {
            storage,
            _lock: lock,
            data_size,
            consumer_pos: 0,
            producer_pos: 0,
            last_header: None,
        };

        consumer.consumer_pos = consumer.header().consumer_pos.load(Ordering::Acquire);
        consumer.producer_pos = consumer.header().producer_pos.load(Ordering::Acquire);
        if consumer.producer_pos > data_size || consumer.consumer_pos > data_size {
            return Err(TurboqError::invalid_region("position out of bounds"));
        }

        Ok(consumer)
    }

    /// Region capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Next unconsumed payload, or `None` when the queue is empty.
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

        let header = self.read_message_header(self.consumer_pos);
        debug_assert!(header.payload_offset + header.size <= self.data_size);
        debug_assert!(header.payload_size <= header.size);

        self.last_header = Some(self.consumer_pos);
        Some(self.payload(header.payload_offset, header.payload_size))
    }

    /// Release the last fetched record back to the producer.
    ///
    /// No-op unless a preceding [`fetch`](Self::fetch) returned data.
    pub fn consume(&mut self) {
        if let Some(offset) = self.last_header.take() {
            let header = self.read_message_header(offset);
            self.consumer_pos = header.payload_offset + header.size;
            self.header()
                .consumer_pos
                .store(self.consumer_pos, Ordering::Release);
        }
    }

    /// Drop everything currently queued and align with the producer.
    pub fn reset(&mut self) {
        self.producer_pos = self.header().producer_pos.load(Ordering::Acquire);
        self.consumer_pos = self.producer_pos;
        self.last_header = None;
        self.header()
            .consumer_pos
            .store(self.consumer_pos, Ordering::Release);
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

/// Creation options for [`SpscQueue::open_or_create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpscCreationOptions {
    /// Requested region size in bytes; rounded up to the source page size.
    pub capacity_hint: usize,
}

/// Factory for SPSC queues: sizes and initializes the region, mints the
/// endpoints.
#[derive(Debug)]
pub struct SpscQueue {
    file: QueueFile,
}

impl SpscQueue {
    /// Open an existing queue. Fails when the backing file is absent or does
    /// not hold a valid SPSC region.
    pub fn open(name: &str, source: &dyn MemorySource) -> Result<Self> {
        let (file, _page_size) = source.open(name, OpenFlags::OpenOnly)?;
        let storage = Mapping::of_file(&file)?;
        if !check(storage.as_slice()) {
            return Err(TurboqError::invalid_region("not a turboq/SPSC region"));
        }
        Ok(Self { file })
    }

    /// Open an existing queue or create a new one.
    ///
    /// An existing backing file must match the computed capacity exactly.
    pub fn open_or_create(
        name: &str,
        options: &SpscCreationOptions,
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
                return Err(TurboqError::invalid_region("not a turboq/SPSC region"));
            }
        } else {
            file.truncate(capacity)?;
            init(&Mapping::with_len(&file, capacity)?);
        }

        Ok(Self { file })
    }

    /// Create the producer endpoint.
    pub fn create_producer(&self) -> Result<SpscProducer> {
        SpscProducer::new(Mapping::of_file(&self.file)?)
    }

    /// Create the consumer endpoint. At most one may be live per queue.
    pub fn create_consumer(&self) -> Result<SpscConsumer> {
        let lock = self.file.reopen()?;
        if !lock.try_lock()? {
            return Err(TurboqError::endpoint_exists("consumer"));
        }
        SpscConsumer::new(Mapping::of_file(&self.file)?, lock)
    }
}
