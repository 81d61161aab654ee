//! Integration tests for the SPSC byte queue

use turboq::{AnonymousMemorySource, SpscConsumer, SpscCreationOptions, SpscProducer, SpscQueue};

fn create_queue(capacity_hint: usize) -> SpscQueue {
    SpscQueue::open_or_create(
        "spsc_test",
        &SpscCreationOptions { capacity_hint },
        &AnonymousMemorySource,
    )
    .unwrap()
}

fn enqueue(producer: &mut SpscProducer, value: u64) -> bool {
    match producer.prepare(std::mem::size_of::<u64>()) {
        Some(buffer) => {
            buffer.copy_from_slice(&value.to_le_bytes());
            producer.commit();
            true
        }
        None => false,
    }
}

fn fetch_value(consumer: &mut SpscConsumer) -> Option<u64> {
    let buffer = consumer.fetch()?;
    Some(u64::from_le_bytes(buffer.try_into().unwrap()))
}

fn dequeue(consumer: &mut SpscConsumer) -> Option<u64> {
    let value = fetch_value(consumer)?;
    consumer.consume();
    Some(value)
}

#[test]
fn test_basic_round_trip() {
    let queue = create_queue(std::mem::size_of::<u64>() * 100);
    let mut producer = queue.create_producer().unwrap();
    let mut consumer = queue.create_consumer().unwrap();

    assert_eq!(producer.capacity(), consumer.capacity());

    for i in 0..10u64 {
        assert!(enqueue(&mut producer, i));
    }

    for i in 0..10u64 {
        // fetch is idempotent until consume
        assert_eq!(fetch_value(&mut consumer), Some(i));
        assert_eq!(fetch_value(&mut consumer), Some(i));
        assert_eq!(dequeue(&mut consumer), Some(i));
    }

    assert!(consumer.fetch().is_none());
    assert!(dequeue(&mut consumer).is_none());
}

#[test]
fn test_ping_pong_512_bytes() {
    let queue = create_queue(1_048_576);
    let mut producer = queue.create_producer().unwrap();
    let mut consumer = queue.create_consumer().unwrap();

    for _ in 0..10_000 {
        let buffer = producer.prepare(512).expect("queue should never fill");
        buffer.fill(0x61);
        producer.commit();

        let payload = consumer.fetch().expect("message should be visible");
        assert_eq!(payload.len(), 512);
        assert!(payload.iter().all(|&b| b == 0x61));
        consumer.consume();
    }

    assert!(consumer.fetch().is_none());
}

#[test]
fn test_wrap_stress_smallest_region() {
    // One page is the smallest legal region; the tail is hit constantly.
    let queue = create_queue(4096);
    let mut producer = queue.create_producer().unwrap();
    let mut consumer = queue.create_consumer().unwrap();

    for i in 0..10_000usize {
        let size = if i % 2 == 0 { 300 } else { 200 };
        let fill = (i % 256) as u8;

        let buffer = producer
            .prepare(size)
            .expect("keeping pace must never exhaust the queue");
        buffer.fill(fill);
        producer.commit();

        let payload = consumer.fetch().expect("message should be visible");
        assert_eq!(payload.len(), size);
        assert!(payload.iter().all(|&b| b == fill));
        consumer.consume();
    }

    assert!(consumer.fetch().is_none());
}

#[test]
fn test_full_queue_rejects_and_recovers() {
    let queue = create_queue(4096);
    let mut producer = queue.create_producer().unwrap();
    let mut consumer = queue.create_consumer().unwrap();

    // Fill without consuming until the producer reports full.
    let mut written = 0u64;
    while enqueue(&mut producer, written) {
        written += 1;
    }
    assert!(written > 0);

    // A failed prepare must not disturb the queue state: the same request
    // keeps failing and everything written is still intact, in order.
    assert!(producer.prepare(std::mem::size_of::<u64>()).is_none());
    for expected in 0..written {
        assert_eq!(dequeue(&mut consumer), Some(expected));
    }
    assert!(consumer.fetch().is_none());

    // Space is reusable after the drain.
    assert!(enqueue(&mut producer, 42));
    assert_eq!(dequeue(&mut consumer), Some(42));
}

#[test]
fn test_commit_truncated_shrinks_payload() {
    let queue = create_queue(4096);
    let mut producer = queue.create_producer().unwrap();
    let mut consumer = queue.create_consumer().unwrap();

    let buffer = producer.prepare(64).unwrap();
    buffer.fill(0xab);
    producer.commit_truncated(10);

    let payload = consumer.fetch().unwrap();
    assert_eq!(payload.len(), 10);
    assert!(payload.iter().all(|&b| b == 0xab));
    consumer.consume();
    assert!(consumer.fetch().is_none());
}

#[test]
fn test_reset_is_idempotent() {
    let queue = create_queue(4096);
    let mut producer = queue.create_producer().unwrap();
    let mut consumer = queue.create_consumer().unwrap();

    for i in 0..3u64 {
        assert!(enqueue(&mut producer, i));
    }

    consumer.reset();
    assert!(consumer.fetch().is_none());

    // A second reset with no producer activity changes nothing.
    consumer.reset();
    assert!(consumer.fetch().is_none());

    assert!(enqueue(&mut producer, 7));
    assert_eq!(dequeue(&mut consumer), Some(7));
}

#[test]
fn test_threaded_round_trip() {
    let queue = create_queue(1 << 16);
    let mut producer = queue.create_producer().unwrap();
    let mut consumer = queue.create_consumer().unwrap();

    const MESSAGES: u64 = 100_000;

    let handle = std::thread::spawn(move || {
        for i in 0..MESSAGES {
            while !enqueue(&mut producer, i) {
                std::hint::spin_loop();
            }
        }
    });

    // Commit order is observed exactly, as a prefix at every point in time.
    for expected in 0..MESSAGES {
        let value = loop {
            match dequeue(&mut consumer) {
                Some(value) => break value,
                None => std::hint::spin_loop(),
            }
        };
        assert_eq!(value, expected);
    }

    handle.join().unwrap();
    assert!(consumer.fetch().is_none());
}
