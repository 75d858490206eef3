//! Backpressured producer/consumer pipe.
//!
//! Every `write` appends to the buffer and schedules one delivery step as a
//! priority task; a step hands the oldest chunk to the consumer. Writes report
//! backpressure at the high water mark and the pipe emits `drain` once
//! delivery brings the buffer down to the low water mark. After `end`, the
//! remaining chunks are delivered and `finish` fires exactly once.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use super::chunk::Chunk;
use super::config::PipeConfig;
use super::error::PipeError;
use super::events::Listeners;
use crate::scheduler::{panic_message, Scheduler, TaskFailure, TaskOutcome};
use crate::telemetry;

type Consumer<T> = Box<dyn FnMut(T) -> Result<(), TaskFailure>>;

struct PipeState<T> {
    buffer: VecDeque<T>,
    size: usize,
    producer_paused: bool,
    delivery_paused: bool,
    ended: bool,
    finished: bool,
    pending_steps: usize,
}

struct PipeInner<T> {
    scheduler: Scheduler,
    config: PipeConfig,
    state: RefCell<PipeState<T>>,
    consumer: RefCell<Option<Consumer<T>>>,
    drain: Listeners<()>,
    finish: Listeners<()>,
    error: Listeners<PipeError>,
}

/// Single-producer, single-consumer chunk pipe driven by a [`Scheduler`].
///
/// Clones share the same buffer.
pub struct Pipe<T: Chunk> {
    inner: Rc<PipeInner<T>>,
}

impl<T: Chunk> Clone for Pipe<T> {
    fn clone(&self) -> Self {
        Self { inner: Rc::clone(&self.inner) }
    }
}

impl<T: Chunk> fmt::Debug for Pipe<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Pipe")
            .field("config", &self.inner.config)
            .field("buffered_chunks", &state.buffer.len())
            .field("buffered_size", &state.size)
            .field("producer_paused", &state.producer_paused)
            .field("delivery_paused", &state.delivery_paused)
            .field("ended", &state.ended)
            .field("finished", &state.finished)
            .finish()
    }
}

impl<T: Chunk> Pipe<T> {
    /// Create a pipe delivering chunks to `consumer` on `scheduler`'s thread.
    ///
    /// A consumer returning `Err` or panicking is reported to `on_error`
    /// listeners as [`PipeError::MalformedChunk`]; delivery continues.
    pub fn new<F, R>(scheduler: &Scheduler, config: PipeConfig, mut consumer: F) -> Self
    where
        F: FnMut(T) -> R + 'static,
        R: TaskOutcome,
    {
        let pipe = Self::detached(scheduler, config);
        pipe.set_consumer(Box::new(move |chunk| consumer(chunk).into_outcome()));
        pipe
    }

    /// Create a pipe whose consumer is `downstream.write`.
    ///
    /// Backpressure from `downstream` pauses delivery until it drains, and
    /// finishing this pipe ends `downstream`.
    pub fn chain(scheduler: &Scheduler, config: PipeConfig, downstream: &Pipe<T>) -> Self {
        Self::chain_map(scheduler, config, downstream, |chunk| chunk)
    }

    /// Like [`chain`](Self::chain), transforming each chunk on the way.
    pub fn chain_map<U, M>(
        scheduler: &Scheduler,
        config: PipeConfig,
        downstream: &Pipe<U>,
        mut map: M,
    ) -> Self
    where
        U: Chunk,
        M: FnMut(T) -> U + 'static,
    {
        let upstream = Self::detached(scheduler, config);

        let weak = Rc::downgrade(&upstream.inner);
        let target = downstream.clone();
        upstream.set_consumer(Box::new(move |chunk: T| -> Result<(), TaskFailure> {
            let accepted = target
                .write(map(chunk))
                .map_err(|e| TaskFailure::Error(e.to_string()))?;
            if !accepted {
                if let Some(inner) = weak.upgrade() {
                    (Pipe { inner }).pause_delivery();
                }
            }
            Ok(())
        }));

        let weak = Rc::downgrade(&upstream.inner);
        downstream.on_drain(move || {
            if let Some(inner) = weak.upgrade() {
                if let Err(e) = (Pipe { inner }).resume_delivery() {
                    tracing::debug!(error = %e, "upstream pipe could not resume");
                }
            }
        });

        let target = downstream.clone();
        upstream.on_finish(move || {
            if let Err(e) = target.end() {
                tracing::debug!(error = %e, "downstream pipe already ended");
            }
        });

        upstream
    }

    fn detached(scheduler: &Scheduler, config: PipeConfig) -> Self {
        Self {
            inner: Rc::new(PipeInner {
                scheduler: scheduler.clone(),
                config,
                state: RefCell::new(PipeState {
                    buffer: VecDeque::new(),
                    size: 0,
                    producer_paused: false,
                    delivery_paused: false,
                    ended: false,
                    finished: false,
                    pending_steps: 0,
                }),
                consumer: RefCell::new(None),
                drain: Listeners::default(),
                finish: Listeners::default(),
                error: Listeners::default(),
            }),
        }
    }

    fn set_consumer(&self, consumer: Consumer<T>) {
        *self.inner.consumer.borrow_mut() = Some(consumer);
    }

    /// Buffer `chunk` for delivery.
    ///
    /// Returns `Ok(false)` when the buffer is at or above the high water
    /// mark; the producer should wait for `drain` before writing more.
    pub fn write(&self, chunk: T) -> Result<bool, PipeError> {
        if self.inner.state.borrow().ended {
            return Err(PipeError::WriteAfterEnd);
        }
        self.schedule_step()?;

        let (accepted, size) = {
            let mut state = self.inner.state.borrow_mut();
            state.size += chunk.size();
            state.buffer.push_back(chunk);
            let accepted = state.size < self.inner.config.high_water_mark;
            if !accepted {
                state.producer_paused = true;
            }
            (accepted, state.size)
        };
        if !accepted {
            telemetry::record_backpressure();
            tracing::debug!(
                buffered = size,
                high_water_mark = self.inner.config.high_water_mark,
                "pipe backpressure"
            );
        }
        Ok(accepted)
    }

    /// Mark the end of input. `finish` fires after the last buffered chunk
    /// is delivered, never inside this call.
    pub fn end(&self) -> Result<(), PipeError> {
        let idle = {
            let mut state = self.inner.state.borrow_mut();
            if state.ended {
                return Err(PipeError::AlreadyEnded);
            }
            state.ended = true;
            state.buffer.is_empty() && state.pending_steps == 0
        };
        if idle {
            self.schedule_step()?;
        }
        Ok(())
    }

    pub fn on_drain<F>(&self, mut listener: F)
    where
        F: FnMut() + 'static,
    {
        self.inner.drain.add(Box::new(move |_: &()| listener()));
    }

    pub fn on_finish<F>(&self, mut listener: F)
    where
        F: FnMut() + 'static,
    {
        self.inner.finish.add(Box::new(move |_: &()| listener()));
    }

    pub fn on_error<F>(&self, listener: F)
    where
        F: FnMut(&PipeError) + 'static,
    {
        self.inner.error.add(Box::new(listener));
    }

    /// Stop handing chunks to the consumer. Writes keep buffering.
    pub fn pause_delivery(&self) {
        let mut state = self.inner.state.borrow_mut();
        if !state.delivery_paused {
            state.delivery_paused = true;
            tracing::trace!(buffered = state.buffer.len(), "pipe delivery paused");
        }
    }

    /// Resume delivery, scheduling a step for every chunk still buffered.
    pub fn resume_delivery(&self) -> Result<(), PipeError> {
        let missing = {
            let mut state = self.inner.state.borrow_mut();
            if !state.delivery_paused {
                return Ok(());
            }
            state.delivery_paused = false;
            let wanted = state
                .buffer
                .len()
                .max(usize::from(state.ended && !state.finished));
            wanted.saturating_sub(state.pending_steps)
        };
        tracing::trace!(steps = missing, "pipe delivery resumed");
        for _ in 0..missing {
            self.schedule_step()?;
        }
        Ok(())
    }

    pub fn config(&self) -> PipeConfig {
        self.inner.config
    }

    /// Total size of buffered chunks.
    pub fn buffered_size(&self) -> usize {
        self.inner.state.borrow().size
    }

    pub fn buffered_chunks(&self) -> usize {
        self.inner.state.borrow().buffer.len()
    }

    /// Whether the last write reported backpressure and `drain` has not
    /// fired since.
    pub fn is_paused(&self) -> bool {
        self.inner.state.borrow().producer_paused
    }

    pub fn is_delivery_paused(&self) -> bool {
        self.inner.state.borrow().delivery_paused
    }

    pub fn is_ended(&self) -> bool {
        self.inner.state.borrow().ended
    }

    pub fn is_finished(&self) -> bool {
        self.inner.state.borrow().finished
    }

    fn schedule_step(&self) -> Result<(), PipeError> {
        let pipe = self.clone();
        self.inner.scheduler.schedule_now(move || pipe.deliver_step())?;
        self.inner.state.borrow_mut().pending_steps += 1;
        Ok(())
    }

    fn deliver_step(&self) {
        let chunk = {
            let mut state = self.inner.state.borrow_mut();
            state.pending_steps = state.pending_steps.saturating_sub(1);
            if state.delivery_paused {
                return;
            }
            let chunk = state.buffer.pop_front();
            if let Some(chunk) = &chunk {
                state.size -= chunk.size();
            }
            chunk
        };

        if let Some(chunk) = chunk {
            self.consume(chunk);
            self.maybe_drain();
        }
        self.maybe_finish();
    }

    fn consume(&self, chunk: T) {
        let consumer = self.inner.consumer.borrow_mut().take();
        let Some(mut consumer) = consumer else {
            tracing::warn!("pipe has no consumer; chunk dropped");
            return;
        };
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| consumer(chunk))) {
            Ok(outcome) => outcome,
            Err(payload) => Err(TaskFailure::Panicked(panic_message(&*payload))),
        };
        {
            let mut slot = self.inner.consumer.borrow_mut();
            if slot.is_none() {
                *slot = Some(consumer);
            }
        }

        if let Err(failure) = outcome {
            let error = PipeError::MalformedChunk(match failure {
                TaskFailure::Error(message) => message,
                TaskFailure::Panicked(message) => format!("consumer panicked: {message}"),
            });
            if self.inner.error.emit(&error) == 0 {
                tracing::warn!(error = %error, "pipe error with no listener");
            }
        }
    }

    fn maybe_drain(&self) {
        let drained = {
            let mut state = self.inner.state.borrow_mut();
            let drained =
                state.producer_paused && state.size <= self.inner.config.low_water_mark;
            if drained {
                state.producer_paused = false;
            }
            drained
        };
        if drained {
            tracing::debug!(low_water_mark = self.inner.config.low_water_mark, "pipe drained");
            self.inner.drain.emit(&());
        }
    }

    fn maybe_finish(&self) {
        let finished = {
            let mut state = self.inner.state.borrow_mut();
            let finished = state.ended && !state.finished && state.buffer.is_empty();
            if finished {
                state.finished = true;
            }
            finished
        };
        if finished {
            tracing::debug!("pipe finished");
            self.inner.finish.emit(&());
        }
    }
}

#[cfg(test)]
#[path = "buffered_tests.rs"]
mod tests;
