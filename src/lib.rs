//! # turboq - Bounded Lock-Free Shared-Memory Byte Queues
//!
//! turboq provides a family of bounded, lock-free byte queues laid out over
//! shared memory for low-latency inter-process (and inter-thread)
//! communication. Producers reserve a contiguous span of bytes directly in
//! the shared region, write the payload in place and publish it; consumers
//! obtain a contiguous view onto the same bytes and release them. There is
//! no serialization step and no copy between producer and consumer address
//! spaces.
//!
//! ## Queue shapes
//!
//! - [`SpscQueue`]: one producer, one consumer; variable-size messages in a
//!   circular byte buffer with wrap-around.
//! - [`MpscQueue`]: many concurrent producers, one consumer; fixed-capacity
//!   slot ring with per-slot commit flags.
//! - [`SpmcQueue`]: one producer, many consumers; broadcast semantics -
//!   every consumer sees every message.
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------+
//! |                    Queue factories                     |
//! |  size region / validate tag / mint endpoints           |
//! +--------------------------------------------------------+
//! |   SPSC engine    |   MPSC engine    |   SPMC engine    |
//! |   wrap records   |   slot claims    |   broadcast      |
//! +--------------------------------------------------------+
//! |  MemorySource (tmpfs / hugetlbfs / memfd)              |
//! |  QueueFile (truncate, advisory lock)  Mapping (mmap)   |
//! +--------------------------------------------------------+
//! ```
//!
//! Every region starts with an 11-byte shape tag and cache-line-padded
//! atomic position counters, followed by the data area. Operations never
//! block and never allocate: a full queue on `prepare` and an empty queue
//! on `fetch` surface as `None`, and spinning or backing off is the
//! caller's policy.
//!
//! ## Example
//!
//! ```no_run
//! use turboq::{AnonymousMemorySource, SpscCreationOptions, SpscQueue};
//!
//! # fn main() -> turboq::Result<()> {
//! let queue = SpscQueue::open_or_create(
//!     "example",
//!     &SpscCreationOptions { capacity_hint: 1 << 20 },
//!     &AnonymousMemorySource,
//! )?;
//!
//! let mut producer = queue.create_producer()?;
//! let mut consumer = queue.create_consumer()?;
//!
//! let buffer = producer.prepare(5).expect("queue full");
//! buffer.copy_from_slice(b"hello");
//! producer.commit();
//!
//! assert_eq!(consumer.fetch(), Some(&b"hello"[..]));
//! consumer.consume();
//! # Ok(())
//! # }
//! ```

#[cfg(not(unix))]
compile_error!("turboq only supports Unix-like operating systems");

pub mod error;
pub mod layout;
pub mod memory;
pub mod queues;

pub use error::{Result, TurboqError};
pub use layout::SEGMENT_SIZE;
pub use memory::{
    AnonymousMemorySource, DefaultMemorySource, HugePagesOption, Mapping, MemorySource, OpenFlags,
    QueueFile,
};
pub use queues::{
    MpscConsumer, MpscCreationOptions, MpscProducer, MpscQueue, SpmcConsumer, SpmcCreationOptions,
    SpmcProducer, SpmcQueue, SpscConsumer, SpscCreationOptions, SpscProducer, SpscQueue,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
