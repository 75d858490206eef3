//! Flow-controlled pipes.
//!
//! A [`Pipe`] buffers chunks between one producer and one consumer on the
//! loop thread, signalling backpressure through water marks.

mod buffered;
mod chunk;
mod config;
mod error;
mod events;

pub use buffered::Pipe;
pub use chunk::{Chunk, Record};
pub use config::{PipeConfig, DEFAULT_HIGH_WATER_MARK, DEFAULT_LOW_WATER_MARK};
pub use error::PipeError;
