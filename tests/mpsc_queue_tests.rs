//! Integration tests for the MPSC slot queue

use turboq::{
    AnonymousMemorySource, MpscConsumer, MpscCreationOptions, MpscProducer, MpscQueue, TurboqError,
};

fn create_queue(max_message_size_hint: usize, length_hint: usize) -> MpscQueue {
    MpscQueue::open_or_create(
        "mpsc_test",
        &MpscCreationOptions {
            max_message_size_hint,
            length_hint,
        },
        &AnonymousMemorySource,
    )
    .unwrap()
}

fn enqueue(producer: &mut MpscProducer, value: u64) -> bool {
    match producer.prepare(std::mem::size_of::<u64>()).unwrap() {
        Some(buffer) => {
            buffer.copy_from_slice(&value.to_le_bytes());
            producer.commit();
            true
        }
        None => false,
    }
}

fn fetch_value(consumer: &mut MpscConsumer) -> Option<u64> {
    let buffer = consumer.fetch()?;
    Some(u64::from_le_bytes(buffer.try_into().unwrap()))
}

fn dequeue(consumer: &mut MpscConsumer) -> Option<u64> {
    let value = fetch_value(consumer)?;
    consumer.consume();
    Some(value)
}

#[test]
fn test_basic_fixed_slots() {
    let queue = create_queue(std::mem::size_of::<u64>(), 10);
    let mut producer = queue.create_producer().unwrap();
    let mut consumer = queue.create_consumer().unwrap();

    assert_eq!(producer.max_message_size(), consumer.max_message_size());
    assert_eq!(producer.length(), consumer.length());
    assert!(producer.max_message_size() >= std::mem::size_of::<u64>());
    assert!(producer.length() >= 10);

    for i in 0..10u64 {
        assert!(enqueue(&mut producer, i));
    }

    for i in 0..10u64 {
        assert_eq!(fetch_value(&mut consumer), Some(i));
        assert_eq!(fetch_value(&mut consumer), Some(i));
        assert_eq!(dequeue(&mut consumer), Some(i));
    }

    assert!(consumer.fetch().is_none());
    assert!(dequeue(&mut consumer).is_none());
}

#[test]
fn test_oversized_prepare_is_an_error() {
    let queue = create_queue(8, 4);
    let mut producer = queue.create_producer().unwrap();

    let too_large = producer.max_message_size();
    let result = producer.prepare(too_large);
    assert!(matches!(result, Err(TurboqError::MessageTooLarge { .. })));

    // The failed request claimed nothing.
    assert!(enqueue(&mut producer, 1));
}

#[test]
fn test_commit_flag_gates_visibility() {
    let queue = create_queue(8, 4);
    let mut producer = queue.create_producer().unwrap();
    let mut consumer = queue.create_consumer().unwrap();

    // Slot claimed and written, but not committed: the consumer sees the
    // advanced producer position yet must not read the slot.
    let buffer = producer.prepare(8).unwrap().unwrap();
    buffer.copy_from_slice(&99u64.to_le_bytes());
    assert!(consumer.fetch().is_none());

    producer.commit();
    assert_eq!(dequeue(&mut consumer), Some(99));
}

#[test]
fn test_full_ring_recovers_after_consume() {
    let queue = create_queue(8, 2);
    let mut producer = queue.create_producer().unwrap();
    let mut consumer = queue.create_consumer().unwrap();

    assert_eq!(producer.length(), 2);
    assert!(enqueue(&mut producer, 0));
    assert!(enqueue(&mut producer, 1));
    assert!(!enqueue(&mut producer, 2));

    assert_eq!(dequeue(&mut consumer), Some(0));
    assert!(enqueue(&mut producer, 2));

    assert_eq!(dequeue(&mut consumer), Some(1));
    assert_eq!(dequeue(&mut consumer), Some(2));
    assert!(consumer.fetch().is_none());
}

#[test]
fn test_single_producer_commits_in_program_order() {
    let queue = create_queue(8, 128);
    let mut producer = queue.create_producer().unwrap();
    let mut consumer = queue.create_consumer().unwrap();

    for i in 0..100u64 {
        assert!(enqueue(&mut producer, i));
    }
    for i in 0..100u64 {
        assert_eq!(dequeue(&mut consumer), Some(i));
    }
}

#[test]
fn test_reset_drains_and_frees_slots() {
    let queue = create_queue(8, 4);
    let mut producer = queue.create_producer().unwrap();
    let mut consumer = queue.create_consumer().unwrap();

    for i in 0..4u64 {
        assert!(enqueue(&mut producer, i));
    }
    assert!(!enqueue(&mut producer, 4));

    consumer.reset();
    assert!(consumer.fetch().is_none());

    // Reset cleared the commit flags, so the ring is reusable in full.
    for i in 10..14u64 {
        assert!(enqueue(&mut producer, i));
    }
    for i in 10..14u64 {
        assert_eq!(dequeue(&mut consumer), Some(i));
    }
}

#[test]
fn test_four_producers_one_consumer_sum() {
    const MESSAGES: u64 = 1_000_000;

    let queue = create_queue(8, 10_000);
    let mut consumer = queue.create_consumer().unwrap();

    let mut handles = Vec::new();
    for p in 0..4u64 {
        let mut producer = queue.create_producer().unwrap();
        handles.push(std::thread::spawn(move || {
            let mut value = p;
            while value < MESSAGES {
                loop {
                    match producer.prepare(8).unwrap() {
                        Some(buffer) => {
                            buffer.copy_from_slice(&value.to_le_bytes());
                            producer.commit();
                            break;
                        }
                        None => std::hint::spin_loop(),
                    }
                }
                value += 4;
            }
        }));
    }

    let mut sum = 0u64;
    let mut received = 0u64;
    while received < MESSAGES {
        match fetch_value(&mut consumer) {
            Some(value) => {
                consumer.consume();
                sum += value;
                received += 1;
            }
            None => std::hint::spin_loop(),
        }
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(sum, 499_999_500_000);
    assert!(consumer.fetch().is_none());
}
