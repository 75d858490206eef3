//! Fixed-size pool of blocking worker threads.
//!
//! Each worker owns a FIFO job queue. Submission picks the least-loaded
//! worker. Results never call back into user code: every finished job is
//! pushed onto the shared [`CompletionQueue`] for the loop thread.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;

use super::completion::{Completion, CompletionQueue};
use super::config::WorkerPoolConfig;
use super::job::{WorkerError, WorkerJob};
use crate::scheduler::panic_message;
use crate::telemetry;

/// Statistics for worker pool activity.
#[derive(Debug, Default, Clone, Serialize)]
pub struct PoolStats {
    pub jobs_executed: u64,
    pub jobs_failed: u64,
    pub jobs_panicked: u64,
    pub jobs_skipped: u64,
    pub avg_exec_time_us: u64,
    pub threads_active: usize,
    pub threads_idle: usize,
}

/// Errors for worker pool operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("Worker pool is shut down")]
    PoolShutdown,

    #[error("Job queue is full")]
    QueueFull { depth: usize, max: usize },

    #[error("Failed to spawn worker thread: {0}")]
    ThreadSpawnFailed(String),
}

/// Per-worker queue and wake-up signal.
struct WorkerSlot {
    queue: Mutex<VecDeque<WorkerJob>>,
    signal: Condvar,
    active: AtomicBool,
}

impl WorkerSlot {
    fn load(&self) -> usize {
        self.queue.lock().len() + usize::from(self.active.load(Ordering::SeqCst))
    }
}

struct Worker {
    slot: Arc<WorkerSlot>,
    handle: Option<JoinHandle<()>>,
}

/// Pool of blocking workers feeding a completion queue.
pub struct WorkerPool {
    workers: Vec<Worker>,
    config: WorkerPoolConfig,
    stats: Arc<Mutex<PoolStats>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Spawn `config.worker_threads` workers that report into `sink`.
    pub fn new(config: WorkerPoolConfig, sink: Arc<CompletionQueue>) -> Result<Self, PoolError> {
        let num_threads = config.worker_threads.get();
        let shutdown = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(Mutex::new(PoolStats::default()));
        let mut workers = Vec::with_capacity(num_threads);

        for id in 0..num_threads {
            let slot = Arc::new(WorkerSlot {
                queue: Mutex::new(VecDeque::with_capacity(config.queue_size)),
                signal: Condvar::new(),
                active: AtomicBool::new(false),
            });

            let mut builder = thread::Builder::new().name(format!("{}-{}", config.thread_name_prefix, id));
            if config.stack_size > 0 {
                builder = builder.stack_size(config.stack_size);
            }

            let worker_slot = Arc::clone(&slot);
            let worker_shutdown = Arc::clone(&shutdown);
            let worker_stats = Arc::clone(&stats);
            let worker_sink = Arc::clone(&sink);
            let spawned = builder.spawn(move || {
                Self::worker_loop(id, &worker_slot, &worker_shutdown, &worker_stats, &worker_sink);
            });

            match spawned {
                Ok(handle) => workers.push(Worker { slot, handle: Some(handle) }),
                Err(e) => {
                    // Tear down what already started before reporting.
                    let partial = Self { workers, config, stats, shutdown };
                    drop(partial);
                    return Err(PoolError::ThreadSpawnFailed(e.to_string()));
                }
            }
        }

        tracing::debug!(workers = num_threads, "worker pool started");
        Ok(Self { workers, config, stats, shutdown })
    }

    /// Queue a job on the least-loaded worker.
    pub fn submit(&self, job: WorkerJob) -> Result<(), PoolError> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(PoolError::PoolShutdown);
        }

        let slot = self
            .least_loaded_worker()
            .map(|id| &self.workers[id].slot)
            .ok_or(PoolError::PoolShutdown)?;

        {
            let mut queue = slot.queue.lock();
            if queue.len() >= self.config.queue_size {
                return Err(PoolError::QueueFull {
                    depth: queue.len(),
                    max: self.config.queue_size,
                });
            }
            tracing::trace!(job_id = %job.id, "job queued");
            queue.push_back(job);
        }
        slot.signal.notify_one();
        Ok(())
    }

    fn least_loaded_worker(&self) -> Option<usize> {
        self.workers
            .iter()
            .enumerate()
            .min_by_key(|(_, w)| w.slot.load())
            .map(|(i, _)| i)
    }

    fn worker_loop(
        worker_id: usize,
        slot: &WorkerSlot,
        shutdown: &AtomicBool,
        stats: &Mutex<PoolStats>,
        sink: &CompletionQueue,
    ) {
        loop {
            // Queued jobs still run after shutdown is signalled.
            let job = {
                let mut queue = slot.queue.lock();
                loop {
                    if let Some(job) = queue.pop_front() {
                        break Some(job);
                    }
                    if shutdown.load(Ordering::SeqCst) {
                        break None;
                    }
                    slot.signal.wait(&mut queue);
                }
            };

            let Some(job) = job else {
                tracing::trace!(worker_id, "worker exiting");
                return;
            };

            slot.active.store(true, Ordering::SeqCst);
            Self::run_job(worker_id, job, stats, sink);
            slot.active.store(false, Ordering::SeqCst);
        }
    }

    fn run_job(worker_id: usize, job: WorkerJob, stats: &Mutex<PoolStats>, sink: &CompletionQueue) {
        let job_id = job.id;

        if job.is_cancelled() {
            stats.lock().jobs_skipped += 1;
            telemetry::record_worker_job("skipped", Duration::ZERO);
            sink.push(Completion {
                job_id,
                outcome: Err(WorkerError::Cancelled),
                elapsed: Duration::ZERO,
            });
            return;
        }

        let start = Instant::now();
        let outcome = match panic::catch_unwind(AssertUnwindSafe(job.run)) {
            Ok(result) => result,
            Err(payload) => Err(WorkerError::Panicked(panic_message(&*payload))),
        };
        let elapsed = start.elapsed();

        let label = {
            let mut s = stats.lock();
            s.jobs_executed += 1;
            let label = match &outcome {
                Ok(_) => "ok",
                Err(WorkerError::Panicked(_)) => {
                    s.jobs_panicked += 1;
                    "panicked"
                }
                Err(_) => {
                    s.jobs_failed += 1;
                    "failed"
                }
            };
            // Rolling average of execution time
            let exec_us = elapsed.as_micros() as u64;
            if s.avg_exec_time_us == 0 {
                s.avg_exec_time_us = exec_us;
            } else {
                s.avg_exec_time_us = (s.avg_exec_time_us * 9 + exec_us) / 10;
            }
            label
        };
        telemetry::record_worker_job(label, elapsed);
        tracing::debug!(worker_id, job_id = %job_id, outcome = label, elapsed_us = elapsed.as_micros() as u64, "job finished");

        sink.push(Completion { job_id, outcome, elapsed });
    }

    /// Get current statistics.
    pub fn stats(&self) -> PoolStats {
        let mut stats = self.stats.lock().clone();
        stats.threads_active = self
            .workers
            .iter()
            .filter(|w| w.slot.active.load(Ordering::SeqCst))
            .count();
        stats.threads_idle = self.workers.len() - stats.threads_active;
        stats
    }

    /// Get number of worker threads.
    pub fn num_threads(&self) -> usize {
        self.workers.len()
    }

    /// Jobs queued but not yet picked up, across all workers.
    pub fn queued_jobs(&self) -> usize {
        self.workers.iter().map(|w| w.slot.queue.lock().len()).sum()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Signal shutdown (does not wait for threads). Queued jobs still run.
    pub fn signal_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for worker in &self.workers {
            let _guard = worker.slot.queue.lock();
            worker.slot.signal.notify_all();
        }
    }

    /// Wait for all workers to finish and consume the pool.
    pub fn join(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.signal_shutdown();
        for worker in self.workers.drain(..) {
            if let Some(handle) = worker.handle {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
