//! Benchmark: hot-path ingest under contention.
//!
//! Measures the per-record cost of `record_replay_task` with the subsystem
//! enabled (relaxed fetch-add) and disabled (flag check only), against the
//! bare padded counters, across thread counts.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::sync::Arc;

use asr_core::config::AsrConfig;
use asr_core::ingest::ReplayCounters;
use asr_core::runtime::Asr;

fn bench_ingest_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingest_contention");
    group.sample_size(20);

    for &threads in &[1, 4, 8] {
        let ops_per_thread = 100_000u32;

        // Bare counters: the raw fetch-add floor.
        group.bench_with_input(
            BenchmarkId::new("raw_counters", threads),
            &threads,
            |b, &threads| {
                let counters = Arc::new(ReplayCounters::new());
                b.iter(|| {
                    let handles: Vec<_> = (0..threads)
                        .map(|_| {
                            let counters = Arc::clone(&counters);
                            std::thread::spawn(move || {
                                for _ in 0..ops_per_thread {
                                    counters.add_tasks(1);
                                }
                            })
                        })
                        .collect();
                    for h in handles {
                        h.join().unwrap();
                    }
                });
            },
        );

        // Enabled subsystem: flag check plus fetch-add.
        group.bench_with_input(
            BenchmarkId::new("asr_enabled", threads),
            &threads,
            |b, &threads| {
                let asr = Arc::new(
                    Asr::with_config(AsrConfig {
                        enabled: true,
                        ..AsrConfig::default()
                    })
                    .expect("valid config"),
                );
                b.iter(|| {
                    let handles: Vec<_> = (0..threads)
                        .map(|_| {
                            let asr = Arc::clone(&asr);
                            std::thread::spawn(move || {
                                for _ in 0..ops_per_thread {
                                    asr.record_replay_task(1);
                                }
                            })
                        })
                        .collect();
                    for h in handles {
                        h.join().unwrap();
                    }
                });
            },
        );

        // Disabled subsystem: the short-circuit that sits on every call.
        group.bench_with_input(
            BenchmarkId::new("asr_disabled", threads),
            &threads,
            |b, &threads| {
                let asr = Arc::new(Asr::new());
                b.iter(|| {
                    let handles: Vec<_> = (0..threads)
                        .map(|_| {
                            let asr = Arc::clone(&asr);
                            std::thread::spawn(move || {
                                for _ in 0..ops_per_thread {
                                    asr.record_replay_task(1);
                                }
                            })
                        })
                        .collect();
                    for h in handles {
                        h.join().unwrap();
                    }
                });
            },
        );
    }

    group.finish();
}

fn bench_budget_read(c: &mut Criterion) {
    let asr = Asr::new();
    c.bench_function("get_budget", |b| {
        b.iter(|| std::hint::black_box(asr.budget()));
    });
}

criterion_group!(benches, bench_ingest_contention, bench_budget_read);
criterion_main!(benches);
