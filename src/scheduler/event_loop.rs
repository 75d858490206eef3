//! The drain loop.
//!
//! One pass runs these phases, draining the priority tier (priority tasks,
//! then microtasks, until both are empty) after every unit of work:
//!
//! 1. timers whose deadline has passed, earliest first
//! 2. at most one worker completion
//! 3. the check tasks queued when the phase began
//!
//! When nothing is runnable the loop parks on the completion queue until the
//! next timer deadline or a completion, whichever comes first. It terminates
//! when no task is queued and no job is outstanding.
//!
//! A zero-delay timer and a check task scheduled from top-level code land in
//! the same upcoming pass; callers must not rely on their relative order.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use super::error::SchedulerError;
use super::queue::TaskQueue;
use super::stats::SchedulerStats;
use super::task::{
    boxed, boxed_repeat, panic_message, Action, RepeatAction, Task, TaskBody, TaskFailure,
    TaskHandle, TaskId, TaskKind, TaskOutcome,
};
use super::timer::TimerQueue;
use crate::clock::{Clock, MonotonicClock};
use crate::pool::{
    CompletionQueue, JobHandle, JobId, JobOutput, PoolError, PoolStats, WorkerError, WorkerJob,
    WorkerPool, WorkerPoolConfig,
};
use crate::shutdown::{ShutdownHandle, ShutdownState, Termination};
use crate::telemetry::{self, SpanExt, TaskSpan};

/// How often a shutting-down loop re-checks for outstanding jobs.
const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

/// Scheduler configuration.
#[derive(Debug, Clone, Default)]
pub struct SchedulerConfig {
    /// Per-queue bound on waiting tasks. `None` = unbounded.
    pub max_queue_depth: Option<usize>,
    /// Most priority-tier tasks one drain may run before yielding to the
    /// other phases. `None` = drain to empty, even forever.
    pub max_priority_drain: Option<usize>,
    /// Worker pool, started on first `submit`.
    pub worker_pool: WorkerPoolConfig,
}

type ErrorHook = Box<dyn FnMut(TaskKind, TaskId, &TaskFailure)>;
type CompletionSink = Box<dyn FnOnce(JobOutput) -> Result<(), TaskFailure>>;

struct PendingJob {
    handle: JobHandle,
    sink: CompletionSink,
}

/// Results of a job batch, joined into one callback.
struct JoinState<S, C> {
    slots: Vec<Option<S>>,
    remaining: usize,
    callback: Option<C>,
    handles: Vec<JobHandle>,
}

type JoinRef<S, C> = Rc<RefCell<JoinState<S, C>>>;

impl<S, C> JoinState<S, C> {
    fn shared(len: usize, callback: C) -> JoinRef<S, C> {
        Rc::new(RefCell::new(Self {
            slots: (0..len).map(|_| None).collect(),
            remaining: len,
            callback: Some(callback),
            handles: Vec::with_capacity(len),
        }))
    }

    /// Store one result. Returns the callback and every result once the last
    /// one is in.
    fn settle(&mut self, index: usize, value: S) -> Option<(C, Vec<S>)> {
        if let Some(slot) = self.slots.get_mut(index) {
            if slot.replace(value).is_none() {
                self.remaining = self.remaining.saturating_sub(1);
            }
        }
        if self.remaining > 0 {
            return None;
        }
        let callback = self.callback.take()?;
        Some((callback, self.slots.drain(..).flatten().collect()))
    }

    /// Cancel every job still outstanding and take the callback.
    fn abort(&mut self) -> Option<C> {
        for handle in self.handles.drain(..) {
            handle.cancel();
        }
        self.callback.take()
    }
}

struct Inner {
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    next_task_id: Cell<u64>,
    next_job_id: Cell<u64>,
    priority: RefCell<TaskQueue>,
    microtasks: RefCell<TaskQueue>,
    timers: RefCell<TimerQueue>,
    checks: RefCell<TaskQueue>,
    closes: RefCell<TaskQueue>,
    completions: Arc<CompletionQueue>,
    pending_jobs: RefCell<HashMap<JobId, PendingJob>>,
    pool: RefCell<Option<WorkerPool>>,
    shutdown: ShutdownHandle,
    error_hook: RefCell<Option<ErrorHook>>,
    stats: RefCell<SchedulerStats>,
    running: Cell<bool>,
}

/// Single-threaded event loop.
///
/// A cheap handle: clones share the same queues, so actions capture a clone
/// to schedule follow-up work. Not `Send`; every action runs on the thread
/// that calls [`run`](Self::run).
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<Inner>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("priority", &self.inner.priority.borrow().len())
            .field("microtasks", &self.inner.microtasks.borrow().len())
            .field("timers", &self.inner.timers.borrow().len())
            .field("checks", &self.inner.checks.borrow().len())
            .field("closes", &self.inner.closes.borrow().len())
            .field("outstanding_jobs", &self.inner.pending_jobs.borrow().len())
            .field("state", &self.inner.shutdown.state())
            .finish()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl Scheduler {
    /// Create a scheduler driven by the wall clock.
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_clock(config, Arc::new(MonotonicClock::new()))
    }

    /// Create a scheduler driven by `clock`.
    pub fn with_clock(config: SchedulerConfig, clock: Arc<dyn Clock>) -> Self {
        let depth = config.max_queue_depth;
        let completions = Arc::new(CompletionQueue::new());
        let shutdown = ShutdownHandle::new(Arc::clone(&completions));
        Self {
            inner: Rc::new(Inner {
                config,
                clock,
                next_task_id: Cell::new(1),
                next_job_id: Cell::new(1),
                priority: RefCell::new(TaskQueue::new(TaskKind::Priority, depth)),
                microtasks: RefCell::new(TaskQueue::new(TaskKind::Microtask, depth)),
                timers: RefCell::new(TimerQueue::new(depth)),
                checks: RefCell::new(TaskQueue::new(TaskKind::Check, depth)),
                closes: RefCell::new(TaskQueue::new(TaskKind::Close, depth)),
                completions,
                pending_jobs: RefCell::new(HashMap::new()),
                pool: RefCell::new(None),
                shutdown,
                error_hook: RefCell::new(None),
                stats: RefCell::new(SchedulerStats::default()),
                running: Cell::new(false),
            }),
        }
    }

    /// Current loop time in milliseconds.
    pub fn now_ms(&self) -> u64 {
        self.inner.clock.now_ms()
    }

    /// Run `action` after the current unit, before any timer, completion or
    /// check work.
    pub fn schedule_now<F, R>(&self, action: F) -> Result<TaskHandle, SchedulerError>
    where
        F: FnOnce() -> R + 'static,
        R: TaskOutcome,
    {
        self.enqueue_fifo(&self.inner.priority, TaskKind::Priority, boxed(action))
    }

    /// Run `action` once the priority queue is empty, still ahead of timers.
    pub fn queue_microtask<F, R>(&self, action: F) -> Result<TaskHandle, SchedulerError>
    where
        F: FnOnce() -> R + 'static,
        R: TaskOutcome,
    {
        self.enqueue_fifo(&self.inner.microtasks, TaskKind::Microtask, boxed(action))
    }

    /// Run `action` in the check phase, after timers and completions.
    pub fn schedule_check<F, R>(&self, action: F) -> Result<TaskHandle, SchedulerError>
    where
        F: FnOnce() -> R + 'static,
        R: TaskOutcome,
    {
        self.enqueue_fifo(&self.inner.checks, TaskKind::Check, boxed(action))
    }

    /// Run `action` when the loop terminates, naturally or by shutdown.
    pub fn on_close<F, R>(&self, action: F) -> Result<TaskHandle, SchedulerError>
    where
        F: FnOnce() -> R + 'static,
        R: TaskOutcome,
    {
        self.enqueue_fifo(&self.inner.closes, TaskKind::Close, boxed(action))
    }

    /// Run `action` in the first timer phase at least `delay_ms` from now.
    /// A zero delay still waits for the next timer phase.
    pub fn schedule_after<F, R>(&self, delay_ms: u64, action: F) -> Result<TaskHandle, SchedulerError>
    where
        F: FnOnce() -> R + 'static,
        R: TaskOutcome,
    {
        self.enqueue_timer(delay_ms, boxed(action))
    }

    /// Run `action` every `period_ms` until its handle is cancelled.
    pub fn schedule_interval<F, R>(
        &self,
        period_ms: u64,
        action: F,
    ) -> Result<TaskHandle, SchedulerError>
    where
        F: FnMut() -> R + 'static,
        R: TaskOutcome,
    {
        self.ensure_accepting(TaskKind::Timer)?;
        let handle = self.next_handle(TaskKind::Timer, true);
        let now = self.now_ms();
        let task = Task::repeating(handle.clone(), period_ms, boxed_repeat(action), now);
        self.inner
            .timers
            .borrow_mut()
            .push(task, now.saturating_add(period_ms))?;
        tracing::trace!(task_id = handle.id().value(), period_ms, "interval armed");
        Ok(handle)
    }

    /// Run `job` on a worker thread; `on_complete` receives its result as a
    /// completion task on the loop thread.
    pub fn submit<T, E, F, C, R>(&self, job: F, on_complete: C) -> Result<JobHandle, SchedulerError>
    where
        T: Send + 'static,
        E: fmt::Display,
        F: FnOnce() -> Result<T, E> + Send + 'static,
        C: FnOnce(Result<T, WorkerError>) -> R + 'static,
        R: TaskOutcome,
    {
        self.submit_with_sink(
            job,
            Box::new(move |output: JobOutput| on_complete(downcast_output::<T>(output)).into_outcome()),
        )
    }

    /// Like [`submit`](Self::submit), racing the job against a timer.
    ///
    /// Whichever fires first cancels the other. On timeout `on_complete`
    /// gets `WorkerError::TimedOut`; the job itself keeps running on its
    /// worker and its late result is dropped.
    pub fn submit_with_timeout<T, E, F, C, R>(
        &self,
        job: F,
        timeout_ms: u64,
        on_complete: C,
    ) -> Result<JobHandle, SchedulerError>
    where
        T: Send + 'static,
        E: fmt::Display,
        F: FnOnce() -> Result<T, E> + Send + 'static,
        C: FnOnce(Result<T, WorkerError>) -> R + 'static,
        R: TaskOutcome,
    {
        let callback: Rc<RefCell<Option<C>>> = Rc::new(RefCell::new(Some(on_complete)));
        let timer_slot: Rc<RefCell<Option<TaskHandle>>> = Rc::new(RefCell::new(None));

        let job_callback = Rc::clone(&callback);
        let job_timer = Rc::clone(&timer_slot);
        let job_handle = self.submit_with_sink(
            job,
            Box::new(move |output: JobOutput| {
                if let Some(timer) = job_timer.borrow_mut().take() {
                    timer.cancel();
                }
                let callback = job_callback.borrow_mut().take();
                match callback {
                    Some(callback) => callback(downcast_output::<T>(output)).into_outcome(),
                    None => Ok(()),
                }
            }),
        )?;

        let racing_job = job_handle.clone();
        let timer = self.enqueue_timer(
            timeout_ms,
            Box::new(move || {
                racing_job.cancel();
                tracing::debug!(job_id = %racing_job.id(), timeout_ms, "job timed out");
                let callback = callback.borrow_mut().take();
                match callback {
                    Some(callback) => callback(Err(WorkerError::TimedOut(timeout_ms))).into_outcome(),
                    None => Ok(()),
                }
            }),
        );

        match timer {
            Ok(timer) => {
                *timer_slot.borrow_mut() = Some(timer);
                Ok(job_handle)
            }
            Err(e) => {
                job_handle.cancel();
                Err(e)
            }
        }
    }

    /// Run every job on the worker pool and call `on_complete` once with all
    /// values, in submission order.
    ///
    /// Fails fast: the first job error is delivered at once and the other
    /// jobs are cancelled. With no jobs, `on_complete` gets an empty vector
    /// as a priority task. Cancelling any returned handle means `on_complete`
    /// never runs.
    pub fn submit_all<T, E, F, I, C, R>(&self, jobs: I, on_complete: C) -> Result<Vec<JobHandle>, SchedulerError>
    where
        T: Send + 'static,
        E: fmt::Display,
        F: FnOnce() -> Result<T, E> + Send + 'static,
        I: IntoIterator<Item = F>,
        C: FnOnce(Result<Vec<T>, WorkerError>) -> R + 'static,
        R: TaskOutcome,
    {
        let jobs: Vec<F> = jobs.into_iter().collect();
        if jobs.is_empty() {
            self.schedule_now(move || on_complete(Ok(Vec::new())))?;
            return Ok(Vec::new());
        }

        let join: JoinRef<T, C> = JoinState::shared(jobs.len(), on_complete);
        self.submit_joined(jobs, &join, |join: &JoinRef<T, C>, index: usize, result: Result<T, WorkerError>| {
            let ready = {
                let mut state = join.borrow_mut();
                match result {
                    Ok(value) => state.settle(index, value).map(|(callback, values)| (callback, Ok(values))),
                    Err(e) => state.abort().map(|callback| (callback, Err(e))),
                }
            };
            match ready {
                Some((callback, result)) => callback(result).into_outcome(),
                None => Ok(()),
            }
        })
    }

    /// Like [`submit_all`](Self::submit_all), but waits for every job and
    /// hands over each result, failures included.
    pub fn submit_all_settled<T, E, F, I, C, R>(
        &self,
        jobs: I,
        on_complete: C,
    ) -> Result<Vec<JobHandle>, SchedulerError>
    where
        T: Send + 'static,
        E: fmt::Display,
        F: FnOnce() -> Result<T, E> + Send + 'static,
        I: IntoIterator<Item = F>,
        C: FnOnce(Vec<Result<T, WorkerError>>) -> R + 'static,
        R: TaskOutcome,
    {
        let jobs: Vec<F> = jobs.into_iter().collect();
        if jobs.is_empty() {
            self.schedule_now(move || on_complete(Vec::new()))?;
            return Ok(Vec::new());
        }

        let join: JoinRef<Result<T, WorkerError>, C> = JoinState::shared(jobs.len(), on_complete);
        self.submit_joined(
            jobs,
            &join,
            |join: &JoinRef<Result<T, WorkerError>, C>, index: usize, result: Result<T, WorkerError>| {
                let ready = join.borrow_mut().settle(index, result);
                match ready {
                    Some((callback, results)) => callback(results).into_outcome(),
                    None => Ok(()),
                }
            },
        )
    }

    /// Cancel a task. Returns `false` (and does nothing) if it already ran.
    pub fn cancel(&self, handle: &TaskHandle) -> bool {
        let cancelled = handle.cancel();
        tracing::trace!(task_id = handle.id().value(), kind = handle.kind().as_str(), cancelled, "cancel");
        cancelled
    }

    /// Cancel a job's completion. Best-effort: a running job is not
    /// interrupted.
    pub fn cancel_job(&self, handle: &JobHandle) -> bool {
        let cancelled = handle.cancel();
        tracing::trace!(job_id = %handle.id(), cancelled, "cancel job");
        cancelled
    }

    /// Install the hook receiving every task failure. Replaces the default,
    /// which logs at error level.
    pub fn on_unhandled_error<F>(&self, hook: F)
    where
        F: FnMut(TaskKind, TaskId, &TaskFailure) + 'static,
    {
        *self.inner.error_hook.borrow_mut() = Some(Box::new(hook));
    }

    /// Drive the loop until it terminates.
    pub fn run(&self) -> Result<Termination, SchedulerError> {
        self.run_inner(None)
    }

    /// Execute `main` as the first unit of work, then drive the loop.
    pub fn run_with<F, R>(&self, main: F) -> Result<Termination, SchedulerError>
    where
        F: FnOnce() -> R + 'static,
        R: TaskOutcome,
    {
        self.run_inner(Some(boxed(main)))
    }

    /// Request termination. Queued work is discarded, outstanding jobs are
    /// awaited, then only close tasks run. Returns `false` if already
    /// requested.
    pub fn shutdown(&self) -> bool {
        self.inner.shutdown.request()
    }

    /// Thread-safe handle for requesting shutdown from elsewhere.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.inner.shutdown.clone()
    }

    pub fn shutdown_state(&self) -> ShutdownState {
        self.inner.shutdown.state()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.get()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.inner.stats.borrow().clone()
    }

    /// Worker pool statistics, if the pool has been started.
    pub fn pool_stats(&self) -> Option<PoolStats> {
        self.inner.pool.borrow().as_ref().map(WorkerPool::stats)
    }

    /// Jobs submitted whose completion has not been consumed yet.
    pub fn outstanding_jobs(&self) -> usize {
        self.inner.pending_jobs.borrow().len()
    }

    /// Tasks currently waiting in the queue for `kind`.
    pub fn queued(&self, kind: TaskKind) -> usize {
        match kind {
            TaskKind::Main => 0,
            TaskKind::Priority => self.inner.priority.borrow().len(),
            TaskKind::Microtask => self.inner.microtasks.borrow().len(),
            TaskKind::Timer => self.inner.timers.borrow().len(),
            TaskKind::Completion => self.inner.completions.len(),
            TaskKind::Check => self.inner.checks.borrow().len(),
            TaskKind::Close => self.inner.closes.borrow().len(),
        }
    }

    /// Whether `run` would find anything to do, close tasks aside.
    pub fn has_pending_work(&self) -> bool {
        self.has_runnable_work()
            || self.inner.timers.borrow_mut().has_live()
            || !self.inner.pending_jobs.borrow().is_empty()
    }

    fn ensure_accepting(&self, kind: TaskKind) -> Result<(), SchedulerError> {
        match self.inner.shutdown.state() {
            ShutdownState::Running => Ok(()),
            ShutdownState::Draining if kind == TaskKind::Close => Ok(()),
            _ => Err(SchedulerError::ShutDown),
        }
    }

    fn next_handle(&self, kind: TaskKind, repeating: bool) -> TaskHandle {
        let raw = self.inner.next_task_id.get();
        self.inner.next_task_id.set(raw + 1);
        TaskHandle::new(TaskId::new(raw), kind, repeating)
    }

    fn enqueue_fifo(
        &self,
        queue: &RefCell<TaskQueue>,
        kind: TaskKind,
        action: Action,
    ) -> Result<TaskHandle, SchedulerError> {
        self.ensure_accepting(kind)?;
        let handle = self.next_handle(kind, false);
        queue
            .borrow_mut()
            .push(Task::once(handle.clone(), action, self.now_ms()))?;
        tracing::trace!(task_id = handle.id().value(), kind = kind.as_str(), "task queued");
        Ok(handle)
    }

    fn enqueue_timer(&self, delay_ms: u64, action: Action) -> Result<TaskHandle, SchedulerError> {
        self.ensure_accepting(TaskKind::Timer)?;
        let handle = self.next_handle(TaskKind::Timer, false);
        let now = self.now_ms();
        self.inner
            .timers
            .borrow_mut()
            .push(Task::once(handle.clone(), action, now), now.saturating_add(delay_ms))?;
        tracing::trace!(task_id = handle.id().value(), delay_ms, "timer armed");
        Ok(handle)
    }

    fn submit_with_sink<T, E, F>(&self, job: F, sink: CompletionSink) -> Result<JobHandle, SchedulerError>
    where
        T: Send + 'static,
        E: fmt::Display,
        F: FnOnce() -> Result<T, E> + Send + 'static,
    {
        self.ensure_accepting(TaskKind::Completion)?;
        let raw = self.inner.next_job_id.get();
        self.inner.next_job_id.set(raw + 1);
        let id = JobId::new(raw);
        let handle = JobHandle::new(id);
        let job = WorkerJob::new(id, handle.cancel_flag(), job);

        self.inner
            .pending_jobs
            .borrow_mut()
            .insert(id, PendingJob { handle: handle.clone(), sink });
        if let Err(e) = self.with_pool(|pool| pool.submit(job)) {
            self.inner.pending_jobs.borrow_mut().remove(&id);
            tracing::warn!(job_id = %id, error = %e, "job rejected");
            return Err(e);
        }
        tracing::trace!(job_id = %id, "job submitted");
        Ok(handle)
    }

    fn submit_joined<T, E, F, S, C, D>(
        &self,
        jobs: Vec<F>,
        join: &JoinRef<S, C>,
        deliver: D,
    ) -> Result<Vec<JobHandle>, SchedulerError>
    where
        T: Send + 'static,
        E: fmt::Display,
        F: FnOnce() -> Result<T, E> + Send + 'static,
        S: 'static,
        C: 'static,
        D: Fn(&JoinRef<S, C>, usize, Result<T, WorkerError>) -> Result<(), TaskFailure> + Clone + 'static,
    {
        let total = jobs.len();
        for (index, job) in jobs.into_iter().enumerate() {
            let member = Rc::clone(join);
            let deliver = deliver.clone();
            let submitted = self.submit_with_sink(
                job,
                Box::new(move |output: JobOutput| deliver(&member, index, downcast_output::<T>(output))),
            );
            match submitted {
                Ok(handle) => join.borrow_mut().handles.push(handle),
                Err(e) => {
                    join.borrow_mut().abort();
                    return Err(e);
                }
            }
        }
        tracing::debug!(jobs = total, "job batch submitted");
        let handles = join.borrow().handles.clone();
        Ok(handles)
    }

    fn with_pool<T>(
        &self,
        f: impl FnOnce(&WorkerPool) -> Result<T, PoolError>,
    ) -> Result<T, SchedulerError> {
        let mut slot = self.inner.pool.borrow_mut();
        if slot.is_none() {
            let pool = WorkerPool::new(
                self.inner.config.worker_pool.clone(),
                Arc::clone(&self.inner.completions),
            )?;
            *slot = Some(pool);
        }
        let Some(pool) = slot.as_ref() else {
            return Err(SchedulerError::ShutDown);
        };
        Ok(f(pool)?)
    }

    fn run_inner(&self, main: Option<Action>) -> Result<Termination, SchedulerError> {
        if self.inner.running.get() {
            return Err(SchedulerError::InvalidState(
                "run called from inside the loop".to_string(),
            ));
        }
        if self.inner.shutdown.state() == ShutdownState::Stopped {
            return Err(SchedulerError::ShutDown);
        }

        self.inner.running.set(true);
        tracing::info!("event loop started");
        if let Some(main) = main {
            let handle = self.next_handle(TaskKind::Main, false);
            self.execute(Task::once(handle, main, self.now_ms()));
        }
        let termination = self.drive();
        self.inner.running.set(false);

        let stats = self.stats();
        tracing::info!(
            ?termination,
            passes = stats.passes,
            executed = stats.total_executed(),
            failures = stats.failures,
            "event loop stopped"
        );
        Ok(termination)
    }

    fn drive(&self) -> Termination {
        loop {
            if !self.inner.shutdown.is_accepting() {
                return self.finish_shutdown();
            }

            self.inner.stats.borrow_mut().passes += 1;
            self.drain_immediate();
            self.run_timer_phase();
            self.run_completion_phase();
            self.run_check_phase();

            if !self.inner.shutdown.is_accepting() {
                continue;
            }
            if !self.wait_for_work() {
                self.run_close_phase();
                // Close tasks may schedule more work or request shutdown.
                if !self.inner.shutdown.is_accepting() || self.has_pending_work() {
                    continue;
                }
                return Termination::Natural;
            }
        }
    }

    /// Drain priority tasks, then microtasks, until both are empty.
    fn drain_immediate(&self) {
        let limit = self.inner.config.max_priority_drain;
        let mut ran = 0usize;
        let mut in_microtasks = false;

        while self.inner.shutdown.is_accepting() {
            if limit.map_or(false, |max| ran >= max) {
                if !self.inner.priority.borrow().is_empty() || !self.inner.microtasks.borrow().is_empty() {
                    self.inner.stats.borrow_mut().drain_yields += 1;
                    tracing::warn!(ran, "priority drain bound reached; yielding to other phases");
                }
                return;
            }
            let Some(task) = self.next_immediate(&mut in_microtasks) else {
                return;
            };
            self.execute(task);
            ran += 1;
        }
    }

    // Priority tasks queued by a microtask wait until the microtask queue is empty.
    fn next_immediate(&self, in_microtasks: &mut bool) -> Option<Task> {
        if *in_microtasks {
            let task = self.inner.microtasks.borrow_mut().pop();
            if task.is_some() {
                return task;
            }
            *in_microtasks = false;
        }
        let task = self.inner.priority.borrow_mut().pop();
        if task.is_some() {
            return task;
        }
        *in_microtasks = true;
        self.inner.microtasks.borrow_mut().pop()
    }

    fn run_timer_phase(&self) {
        let now = self.now_ms();
        let cutoff = self.inner.timers.borrow().next_sequence();
        while self.inner.shutdown.is_accepting() {
            let next = self.inner.timers.borrow_mut().pop_due(now, cutoff);
            let Some(task) = next else {
                return;
            };
            self.execute(task);
            self.drain_immediate();
        }
    }

    fn run_completion_phase(&self) {
        while self.inner.shutdown.is_accepting() {
            let Some(done) = self.inner.completions.try_pop() else {
                return;
            };
            let pending = self.inner.pending_jobs.borrow_mut().remove(&done.job_id);
            let Some(PendingJob { handle: job, sink }) = pending else {
                tracing::warn!(job_id = %done.job_id, "completion for unknown job dropped");
                continue;
            };
            if job.is_cancelled() {
                self.inner.stats.borrow_mut().completions_dropped += 1;
                tracing::debug!(job_id = %done.job_id, "completion of cancelled job dropped");
                continue;
            }

            job.mark_delivered();
            let handle = self.next_handle(TaskKind::Completion, false);
            tracing::trace!(
                job_id = %done.job_id,
                task_id = handle.id().value(),
                elapsed_us = done.elapsed.as_micros() as u64,
                "delivering completion"
            );
            let outcome = done.outcome;
            self.execute(Task::once(handle, Box::new(move || sink(outcome)), self.now_ms()));
            self.drain_immediate();
            return;
        }
    }

    fn run_check_phase(&self) {
        let batch = self.inner.checks.borrow().len();
        for _ in 0..batch {
            if !self.inner.shutdown.is_accepting() {
                return;
            }
            let next = self.inner.checks.borrow_mut().pop();
            let Some(task) = next else {
                return;
            };
            self.execute(task);
            self.drain_immediate();
        }
    }

    fn run_close_phase(&self) {
        loop {
            let next = self.inner.closes.borrow_mut().pop();
            let Some(task) = next else {
                return;
            };
            self.execute(task);
            self.drain_immediate();
        }
    }

    fn has_runnable_work(&self) -> bool {
        !self.inner.priority.borrow().is_empty()
            || !self.inner.microtasks.borrow().is_empty()
            || !self.inner.checks.borrow().is_empty()
            || !self.inner.completions.is_empty()
            || self.timer_due()
    }

    fn timer_due(&self) -> bool {
        let now = self.now_ms();
        self.inner
            .timers
            .borrow_mut()
            .next_deadline()
            .map_or(false, |deadline| deadline <= now)
    }

    /// Park until something is runnable. Returns `false` when nothing is
    /// left to wait for.
    fn wait_for_work(&self) -> bool {
        if self.has_runnable_work() {
            return true;
        }
        let deadline = self.inner.timers.borrow_mut().next_deadline();
        let outstanding = self.inner.pending_jobs.borrow().len();

        match deadline {
            None if outstanding == 0 => false,
            None => {
                tracing::trace!(outstanding, "idle until a job completes");
                self.inner.completions.wait();
                true
            }
            Some(deadline) => {
                let now = self.now_ms();
                if deadline > now && !(outstanding == 0 && self.inner.clock.skip_to(deadline)) {
                    tracing::trace!(wait_ms = deadline - now, outstanding, "idle until next timer");
                    self.inner
                        .completions
                        .wait_timeout(Duration::from_millis(deadline - now));
                }
                true
            }
        }
    }

    fn finish_shutdown(&self) -> Termination {
        let discarded = self.inner.priority.borrow_mut().discard()
            + self.inner.microtasks.borrow_mut().discard()
            + self.inner.timers.borrow_mut().discard()
            + self.inner.checks.borrow_mut().discard();
        self.inner.stats.borrow_mut().discarded_on_shutdown += discarded as u64;
        tracing::info!(
            discarded,
            outstanding_jobs = self.outstanding_jobs(),
            "draining for shutdown"
        );

        while !self.inner.pending_jobs.borrow().is_empty() {
            match self.inner.completions.try_pop() {
                Some(done) => {
                    let pending = self.inner.pending_jobs.borrow_mut().remove(&done.job_id);
                    if let Some(pending) = pending {
                        pending.handle.cancel();
                        self.inner.stats.borrow_mut().completions_dropped += 1;
                    }
                }
                None => {
                    self.inner.completions.wait_timeout(SHUTDOWN_POLL);
                }
            }
        }
        while self.inner.completions.try_pop().is_some() {}

        self.run_close_phase();

        let pool = self.inner.pool.borrow_mut().take();
        if let Some(pool) = pool {
            pool.join();
        }
        self.inner.shutdown.mark_stopped();
        Termination::Forced
    }

    fn execute(&self, task: Task) {
        let Task { handle, body, enqueued_at } = task;
        let kind = handle.kind();
        let id = handle.id();
        if !handle.begin() {
            self.inner.stats.borrow_mut().cancelled_skipped += 1;
            tracing::trace!(task_id = id.value(), kind = kind.as_str(), "skipping cancelled task");
            return;
        }
        telemetry::record_queue_wait(kind, self.now_ms().saturating_sub(enqueued_at));

        let span = TaskSpan::new(kind, id);
        let _enter = span.enter();
        let (result, rearm) = match body {
            TaskBody::Once(action) => (run_guarded(action), None),
            TaskBody::Repeat { period_ms, mut action } => {
                let result = run_guarded(|| action());
                (result, Some((period_ms, action)))
            }
        };
        handle.finish();
        span.record_result(&result);

        self.inner.stats.borrow_mut().record_executed(kind);
        telemetry::record_task_executed(kind);
        if let Err(failure) = result {
            self.report_failure(kind, id, failure);
        }

        if let Some((period_ms, action)) = rearm {
            if handle.is_pending() && self.inner.shutdown.is_accepting() {
                self.rearm(handle, period_ms, action);
            }
        }
    }

    fn rearm(&self, handle: TaskHandle, period_ms: u64, action: RepeatAction) {
        let now = self.now_ms();
        let task = Task::repeating(handle.clone(), period_ms, action, now);
        let pushed = self
            .inner
            .timers
            .borrow_mut()
            .push(task, now.saturating_add(period_ms));
        if let Err(e) = pushed {
            tracing::warn!(task_id = handle.id().value(), error = %e, "interval could not be re-armed");
            handle.cancel();
        }
    }

    fn report_failure(&self, kind: TaskKind, id: TaskId, failure: TaskFailure) {
        self.inner.stats.borrow_mut().failures += 1;
        telemetry::record_task_failure(kind);

        let hook = self.inner.error_hook.borrow_mut().take();
        let Some(mut hook) = hook else {
            tracing::error!(task_id = id.value(), kind = kind.as_str(), error = %failure, "unhandled task error");
            return;
        };
        let called = panic::catch_unwind(AssertUnwindSafe(|| hook(kind, id, &failure)));
        if let Err(payload) = called {
            tracing::error!(
                task_id = id.value(),
                error = %failure,
                hook_panic = %panic_message(&*payload),
                "unhandled-error hook panicked"
            );
        }
        // The hook may have installed a replacement while running.
        let mut slot = self.inner.error_hook.borrow_mut();
        if slot.is_none() {
            *slot = Some(hook);
        }
    }
}

/// Run an action, turning a panic into a task failure.
fn run_guarded<F>(action: F) -> Result<(), TaskFailure>
where
    F: FnOnce() -> Result<(), TaskFailure>,
{
    match panic::catch_unwind(AssertUnwindSafe(action)) {
        Ok(result) => result,
        Err(payload) => Err(TaskFailure::Panicked(panic_message(&*payload))),
    }
}

fn downcast_output<T: 'static>(output: JobOutput) -> Result<T, WorkerError> {
    output.and_then(|value| {
        value
            .downcast::<T>()
            .map(|v| *v)
            .map_err(|_| WorkerError::Failed("job produced an unexpected result type".to_string()))
    })
}

#[cfg(test)]
#[path = "event_loop_tests.rs"]
mod tests;
