use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use turboq::{
    AnonymousMemorySource, MpscCreationOptions, MpscQueue, SpmcCreationOptions, SpmcQueue,
    SpscCreationOptions, SpscQueue,
};

fn benchmark_spsc_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("spsc_round_trip");

    for size in [8usize, 64, 512, 4096].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let queue = SpscQueue::open_or_create(
                "bench_spsc",
                &SpscCreationOptions {
                    capacity_hint: 1 << 20,
                },
                &AnonymousMemorySource,
            )
            .unwrap();
            let mut producer = queue.create_producer().unwrap();
            let mut consumer = queue.create_consumer().unwrap();

            b.iter(|| {
                let buffer = producer.prepare(size).unwrap();
                buffer[0] = 0xa5;
                producer.commit();

                let payload = consumer.fetch().unwrap();
                assert_eq!(payload.len(), size);
                consumer.consume();
            });
        });
    }

    group.finish();
}

fn benchmark_mpsc_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("mpsc_round_trip");
    group.throughput(Throughput::Elements(1));

    group.bench_function("u64", |b| {
        let queue = MpscQueue::open_or_create(
            "bench_mpsc",
            &MpscCreationOptions {
                max_message_size_hint: 8,
                length_hint: 4096,
            },
            &AnonymousMemorySource,
        )
        .unwrap();
        let mut producer = queue.create_producer().unwrap();
        let mut consumer = queue.create_consumer().unwrap();

        b.iter(|| {
            let buffer = producer.prepare(8).unwrap().unwrap();
            buffer.copy_from_slice(&42u64.to_le_bytes());
            producer.commit();

            let payload = consumer.fetch().unwrap();
            assert_eq!(payload.len(), 8);
            consumer.consume();
        });
    });

    group.finish();
}

fn benchmark_spmc_broadcast(c: &mut Criterion) {
    let mut group = c.benchmark_group("spmc_broadcast");
    group.throughput(Throughput::Elements(1));

    for consumers in [1usize, 3].iter() {
        group.bench_with_input(
            BenchmarkId::new("fan_out", consumers),
            consumers,
            |b, &consumers| {
                let queue = SpmcQueue::open_or_create(
                    "bench_spmc",
                    &SpmcCreationOptions {
                        capacity_hint: 1 << 20,
                    },
                    &AnonymousMemorySource,
                )
                .unwrap();
                let mut producer = queue.create_producer().unwrap();
                let mut readers: Vec<_> = (0..consumers)
                    .map(|_| queue.create_consumer().unwrap())
                    .collect();

                b.iter(|| {
                    let buffer = producer.prepare(8).unwrap();
                    buffer.copy_from_slice(&7u64.to_le_bytes());
                    producer.commit();

                    for reader in readers.iter_mut() {
                        let payload = reader.fetch().unwrap();
                        assert_eq!(payload.len(), 8);
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_spsc_round_trip,
    benchmark_mpsc_round_trip,
    benchmark_spmc_broadcast
);
criterion_main!(benches);
