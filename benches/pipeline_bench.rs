//! Criterion benchmark untuk Bounded Ticket Queue & Pipeline
//!
//! Run dengan: cargo bench --bench pipeline_bench

use std::sync::Arc;
use std::thread;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use giliran::{BoundedTicketQueue, MicroLockWord, Pipeline, PipelineConfig};

fn bench_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue");
    group.throughput(Throughput::Elements(1));

    group.bench_function("write_read", |b| {
        let q: BoundedTicketQueue<u64> = BoundedTicketQueue::new(1024);
        let mut i = 0u64;
        b.iter(|| {
            q.blocking_write(black_box(i));
            black_box(q.blocking_read());
            i = i.wrapping_add(1);
        });
    });

    group.bench_function("try_write_full", |b| {
        let q: BoundedTicketQueue<u64> = BoundedTicketQueue::new(1);
        q.blocking_write(0);
        b.iter(|| black_box(q.write(black_box(1)).is_err()));
    });

    group.finish();

    let mut group = c.benchmark_group("queue_mpmc");
    let per_thread = 20_000u64;
    for threads in [1u64, 2, 4] {
        group.throughput(Throughput::Elements(threads * per_thread));
        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, &threads| {
            let q: Arc<BoundedTicketQueue<u64>> = Arc::new(BoundedTicketQueue::new(256));
            b.iter(|| {
                let producers: Vec<_> = (0..threads)
                    .map(|_| {
                        let q = Arc::clone(&q);
                        thread::spawn(move || {
                            for i in 0..per_thread {
                                q.blocking_write(i);
                            }
                        })
                    })
                    .collect();
                let consumers: Vec<_> = (0..threads)
                    .map(|_| {
                        let q = Arc::clone(&q);
                        thread::spawn(move || {
                            (0..per_thread).map(|_| q.blocking_read()).sum::<u64>()
                        })
                    })
                    .collect();
                for p in producers {
                    p.join().unwrap();
                }
                for c in consumers {
                    black_box(c.join().unwrap());
                }
            });
        });
    }
    group.finish();
}

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");

    for k in [1u64, 4] {
        group.throughput(Throughput::Elements(k));
        group.bench_with_input(BenchmarkId::new("single_thread_stage", k), &k, |b, &k| {
            let config = PipelineConfig::new(64).stage(64, k);
            let pipeline: Pipeline<u64> = Pipeline::new(&config).unwrap();
            let mut i = 0u64;
            b.iter(|| {
                pipeline.blocking_write(i);
                let (mut ticket, value) = pipeline.blocking_read_stage(0);
                for j in 0..k {
                    pipeline.blocking_write_stage(&mut ticket, value * k + j);
                }
                for _ in 0..k {
                    black_box(pipeline.blocking_read());
                }
                i = i.wrapping_add(1);
            });
        });
    }

    let inputs = 10_000u64;
    let workers = 3u64;
    group.throughput(Throughput::Elements(inputs * 2));
    group.bench_function("threaded_amplify_2", |b| {
        let config = PipelineConfig::new(256).stage(256, 2);
        let pipeline: Arc<Pipeline<u64>> = Arc::new(Pipeline::new(&config).unwrap());
        b.iter(|| {
            let producer = {
                let pipeline = Arc::clone(&pipeline);
                thread::spawn(move || {
                    for i in 0..inputs {
                        pipeline.blocking_write(i);
                    }
                })
            };
            let handles: Vec<_> = (0..workers)
                .map(|w| {
                    let pipeline = Arc::clone(&pipeline);
                    let share = inputs / workers + u64::from(w < inputs % workers);
                    thread::spawn(move || {
                        for _ in 0..share {
                            let (mut ticket, value) = pipeline.blocking_read_stage(0);
                            pipeline.blocking_write_stage(&mut ticket, value * 2);
                            pipeline.blocking_write_stage(&mut ticket, value * 2 + 1);
                        }
                    })
                })
                .collect();
            for _ in 0..inputs * 2 {
                black_box(pipeline.blocking_read());
            }
            producer.join().unwrap();
            for h in handles {
                h.join().unwrap();
            }
        });
    });

    group.finish();
}

fn bench_micro_lock(c: &mut Criterion) {
    let mut group = c.benchmark_group("micro_lock");
    group.throughput(Throughput::Elements(1));

    group.bench_function("uncontended_lock_unlock", |b| {
        let word: MicroLockWord = MicroLockWord::new();
        let lock = word.lock_at(0);
        b.iter(|| {
            lock.lock(black_box(1));
            lock.unlock(1);
        });
    });

    group.bench_function("try_lock_held", |b| {
        let word: MicroLockWord = MicroLockWord::new();
        let lock = word.lock_at(2);
        lock.lock(0);
        b.iter(|| black_box(lock.try_lock(0)));
        lock.unlock(0);
    });

    group.finish();
}

criterion_group!(benches, bench_queue, bench_pipeline, bench_micro_lock);
criterion_main!(benches);
