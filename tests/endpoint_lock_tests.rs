//! Singleton endpoint enforcement across all queue shapes

use turboq::{
    AnonymousMemorySource, MpscCreationOptions, MpscQueue, SpmcCreationOptions, SpmcQueue,
    SpscCreationOptions, SpscQueue, TurboqError,
};

#[test]
fn test_spsc_consumer_is_singleton() {
    let queue = SpscQueue::open_or_create(
        "spsc_lock_test",
        &SpscCreationOptions {
            capacity_hint: 4096,
        },
        &AnonymousMemorySource,
    )
    .unwrap();

    let consumer = queue.create_consumer().unwrap();
    assert!(matches!(
        queue.create_consumer(),
        Err(TurboqError::EndpointExists { role: "consumer" })
    ));

    // The producer side is not the guarded role.
    let _producer = queue.create_producer().unwrap();

    drop(consumer);
    assert!(queue.create_consumer().is_ok());
}

#[test]
fn test_mpsc_consumer_is_singleton_but_producers_are_not() {
    let queue = MpscQueue::open_or_create(
        "mpsc_lock_test",
        &MpscCreationOptions {
            max_message_size_hint: 8,
            length_hint: 8,
        },
        &AnonymousMemorySource,
    )
    .unwrap();

    let _first_producer = queue.create_producer().unwrap();
    let _second_producer = queue.create_producer().unwrap();

    let consumer = queue.create_consumer().unwrap();
    assert!(matches!(
        queue.create_consumer(),
        Err(TurboqError::EndpointExists { role: "consumer" })
    ));

    drop(consumer);
    assert!(queue.create_consumer().is_ok());
}

#[test]
fn test_spmc_producer_is_singleton_but_consumers_are_not() {
    let queue = SpmcQueue::open_or_create(
        "spmc_lock_test",
        &SpmcCreationOptions {
            capacity_hint: 4096,
        },
        &AnonymousMemorySource,
    )
    .unwrap();

    let _first_consumer = queue.create_consumer().unwrap();
    let _second_consumer = queue.create_consumer().unwrap();

    let producer = queue.create_producer().unwrap();
    assert!(matches!(
        queue.create_producer(),
        Err(TurboqError::EndpointExists { role: "producer" })
    ));

    drop(producer);
    assert!(queue.create_producer().is_ok());
}
