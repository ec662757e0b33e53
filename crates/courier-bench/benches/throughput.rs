//! Throughput benchmarks for Courier.
//!
//! These benchmarks measure raw submission and listing throughput.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use tenvis_courier_bench::{conversation_name, seeded_engine};
use tenvis_courier_core::{ConversationIndex, Engine, SinkError, StoredMessage};

/// Benchmark submissions spread over many conversations.
fn bench_submit(c: &mut Criterion) {
    let mut group = c.benchmark_group("submit");
    group.throughput(Throughput::Elements(1));

    for conversations in [1usize, 100, 10_000] {
        group.bench_with_input(
            BenchmarkId::new("conversations", conversations),
            &conversations,
            |b, &conversations| {
                let engine = Engine::new();
                let names: Vec<_> = (0..conversations).map(conversation_name).collect();
                let mut i = 0usize;
                b.iter(|| {
                    let name = &names[i % conversations];
                    i += 1;
                    engine.submit_message(black_box(name), "bench", "payload", Some(i as f64))
                });
            },
        );
    }

    group.bench_function("with_sink", |b| {
        let engine = Engine::new();
        engine.on_message_stored(Arc::new(
            |_: &str, msg: &StoredMessage| -> Result<(), SinkError> {
                black_box(msg);
                Ok(())
            },
        ));
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            engine.submit_message("lobby", "bench", "payload", Some(i as f64))
        });
    });

    group.finish();
}

/// Benchmark index repositioning alone.
fn bench_index_touch(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_touch");

    for size in [100usize, 10_000, 100_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let index = ConversationIndex::new();
            let names: Vec<_> = (0..size).map(conversation_name).collect();
            for (i, name) in names.iter().enumerate() {
                index.touch(name, i as f64);
            }
            let mut ts = size as f64;
            let mut i = 0usize;
            b.iter(|| {
                ts += 1.0;
                // Move the oldest-touched conversation to the front each time.
                index.touch(black_box(&names[i % size]), ts);
                i += 1;
            });
        });
    }

    group.finish();
}

/// Benchmark listing paths.
fn bench_list(c: &mut Criterion) {
    let mut group = c.benchmark_group("list");

    for conversations in [100usize, 10_000] {
        let engine = seeded_engine(conversations, 5);
        group.throughput(Throughput::Elements(conversations as u64));
        group.bench_with_input(
            BenchmarkId::new("conversations", conversations),
            &engine,
            |b, engine| b.iter(|| engine.list_conversations()),
        );
    }

    let engine = seeded_engine(1, 10_000);
    let name = conversation_name(0);
    for limit in [Some(50usize), None] {
        let label = limit.map_or_else(|| "all".to_string(), |l| l.to_string());
        group.bench_function(BenchmarkId::new("messages", label), |b| {
            b.iter(|| engine.list_messages(black_box(&name), limit))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_submit, bench_index_touch, bench_list);
criterion_main!(benches);
