//! Pipe water marks.

use serde::Serialize;

/// Default high water mark for byte chunks.
pub const DEFAULT_HIGH_WATER_MARK: usize = 16 * 1024;

/// Default low water mark for byte chunks.
pub const DEFAULT_LOW_WATER_MARK: usize = 4 * 1024;

/// Buffer thresholds, in chunk size units.
///
/// A write that leaves the buffer at or above `high_water_mark` reports
/// backpressure; the drain signal fires once delivery brings it back down to
/// `low_water_mark`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PipeConfig {
    pub high_water_mark: usize,
    pub low_water_mark: usize,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            low_water_mark: DEFAULT_LOW_WATER_MARK,
        }
    }
}

impl PipeConfig {
    /// Water marks with `low` clamped to at most `high`.
    pub fn new(high_water_mark: usize, low_water_mark: usize) -> Self {
        Self {
            high_water_mark,
            low_water_mark: low_water_mark.min(high_water_mark),
        }
    }

    /// Marks suited to [`Record`](super::Record) chunks.
    pub fn records() -> Self {
        Self::new(16, 4)
    }
}
