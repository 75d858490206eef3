//! Scheduler throughput benchmarks.
//!
//! Measures drain-loop cost per task for the immediate tier, the timer heap,
//! worker round trips and pipe delivery.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use tickloop::{
    Pipe, PipeConfig, Record, Scheduler, SchedulerConfig, VirtualClock, WorkerError,
    WorkerPoolConfig,
};

fn virtual_scheduler() -> Scheduler {
    Scheduler::with_clock(SchedulerConfig::default(), Arc::new(VirtualClock::new(0)))
}

fn bench_priority_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("priority_drain");

    for count in [100usize, 1_000, 10_000] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("schedule_now", count), &count, |b, &count| {
            b.iter(|| {
                let sched = virtual_scheduler();
                let sum = Rc::new(Cell::new(0u64));
                for i in 0..count {
                    let s = sum.clone();
                    let _ = sched.schedule_now(move || s.set(s.get() + i as u64));
                }
                let _ = sched.run();
                black_box(sum.get())
            })
        });
    }

    group.finish();
}

fn bench_timer_heap(c: &mut Criterion) {
    let mut group = c.benchmark_group("timer_heap");

    for count in [100usize, 1_000, 10_000] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("scattered_deadlines", count), &count, |b, &count| {
            b.iter(|| {
                let sched = virtual_scheduler();
                let fired = Rc::new(Cell::new(0usize));
                for i in 0..count {
                    let f = fired.clone();
                    // deadlines deliberately out of insertion order
                    let delay = (i as u64 * 7919) % 1_000;
                    let _ = sched.schedule_after(delay, move || f.set(f.get() + 1));
                }
                let _ = sched.run();
                black_box(fired.get())
            })
        });
    }

    group.finish();
}

fn bench_worker_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("worker_round_trip");

    for threads in [1usize, 4] {
        let jobs = 256u64;
        group.throughput(Throughput::Elements(jobs));
        group.bench_with_input(BenchmarkId::new("threads", threads), &threads, |b, &threads| {
            b.iter(|| {
                let sched = Scheduler::new(SchedulerConfig {
                    worker_pool: WorkerPoolConfig::with_threads(threads),
                    ..Default::default()
                });
                let total = Rc::new(Cell::new(0u64));
                for n in 0..jobs {
                    let t = total.clone();
                    let _ = sched.submit(
                        move || Ok::<_, String>(n.wrapping_mul(31)),
                        move |result: Result<u64, WorkerError>| {
                            t.set(t.get() + result.unwrap_or_default())
                        },
                    );
                }
                let _ = sched.run();
                black_box(total.get())
            })
        });
    }

    group.finish();
}

fn bench_pipe_delivery(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipe_delivery");

    for (name, config) in [
        ("records_16_4", PipeConfig::records()),
        ("unbounded", PipeConfig::new(usize::MAX, 0)),
    ] {
        let chunks = 4_096u64;
        group.throughput(Throughput::Elements(chunks));
        group.bench_function(BenchmarkId::new("write_all", name), |b| {
            b.iter(|| {
                let sched = virtual_scheduler();
                let seen = Rc::new(Cell::new(0u64));
                let s = seen.clone();
                let pipe = Pipe::new(&sched, config, move |r: Record<u64>| s.set(s.get() + r.0));
                for n in 0..chunks {
                    let _ = pipe.write(Record(n));
                }
                let _ = pipe.end();
                let _ = sched.run();
                black_box(seen.get())
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_priority_drain,
    bench_timer_heap,
    bench_worker_round_trip,
    bench_pipe_delivery,
);
criterion_main!(benches);
