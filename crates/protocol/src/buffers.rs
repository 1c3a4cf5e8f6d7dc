//! Columnar, renderer-facing track buffers.
//!
//! Each buffer is a set of parallel arrays: index `i` across every array
//! describes one logical data point. Buffers are built once per completed
//! fetch, shared behind an `Arc`, and never mutated after that.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::shared_str::SharedStr;
use crate::types::{Duration, TimeSpan};

/// The slice was still running when the trace ended.
pub const SLICE_FLAG_INCOMPLETE: u8 = 1;
/// The thread ran with a realtime priority.
pub const SLICE_FLAG_REALTIME: u8 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("column `{column}` has {actual} entries, expected {expected}")]
pub struct LayoutError {
    pub column: &'static str,
    pub expected: usize,
    pub actual: usize,
}

/// Parallel-array layout shared by every track buffer.
pub trait ColumnarLayout {
    /// Number of logical rows.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(name, length)` for every parallel array.
    fn column_lengths(&self) -> Vec<(&'static str, usize)>;

    /// Verify that every parallel array has the same length.
    fn check_layout(&self) -> Result<(), LayoutError> {
        let expected = self.len();
        for (column, actual) in self.column_lengths() {
            if actual != expected {
                return Err(LayoutError {
                    column,
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }
}

/// CPU scheduling slices, one representative slice per bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceBuffer {
    pub window: TimeSpan,
    pub bucket_size: Duration,
    /// Highest slice id seen, used to detect newly imported rows.
    pub last_row_id: i64,
    pub ids: Vec<i64>,
    pub starts: Vec<i64>,
    pub ends: Vec<i64>,
    pub utids: Vec<u32>,
    pub flags: Vec<u8>,
}

impl SliceBuffer {
    pub fn new(window: TimeSpan, bucket_size: Duration) -> Self {
        Self::with_capacity(window, bucket_size, 0)
    }

    pub fn with_capacity(window: TimeSpan, bucket_size: Duration, n: usize) -> Self {
        Self {
            window,
            bucket_size,
            last_row_id: -1,
            ids: Vec::with_capacity(n),
            starts: Vec::with_capacity(n),
            ends: Vec::with_capacity(n),
            utids: Vec::with_capacity(n),
            flags: Vec::with_capacity(n),
        }
    }
}

impl ColumnarLayout for SliceBuffer {
    fn len(&self) -> usize {
        self.ids.len()
    }

    fn column_lengths(&self) -> Vec<(&'static str, usize)> {
        vec![
            ("starts", self.starts.len()),
            ("ends", self.ends.len()),
            ("utids", self.utids.len()),
            ("flags", self.flags.len()),
        ]
    }
}

/// Mipmapped CPU frequency counter: min, max and last value per bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreqBuffer {
    pub window: TimeSpan,
    pub bucket_size: Duration,
    /// Maximum frequency over the whole track, so the y-scale does not
    /// jump while panning.
    pub max_value: f64,
    pub timestamps: Vec<i64>,
    pub min_values: Vec<f64>,
    pub max_values: Vec<f64>,
    pub last_values: Vec<f64>,
    /// Last idle state per bucket; `-1` when the CPU was not idle.
    pub last_idle_values: Vec<i8>,
}

impl FreqBuffer {
    pub fn new(window: TimeSpan, bucket_size: Duration) -> Self {
        Self::with_capacity(window, bucket_size, 0)
    }

    pub fn with_capacity(window: TimeSpan, bucket_size: Duration, n: usize) -> Self {
        Self {
            window,
            bucket_size,
            max_value: 0.0,
            timestamps: Vec::with_capacity(n),
            min_values: Vec::with_capacity(n),
            max_values: Vec::with_capacity(n),
            last_values: Vec::with_capacity(n),
            last_idle_values: Vec::with_capacity(n),
        }
    }
}

impl ColumnarLayout for FreqBuffer {
    fn len(&self) -> usize {
        self.timestamps.len()
    }

    fn column_lengths(&self) -> Vec<(&'static str, usize)> {
        vec![
            ("min_values", self.min_values.len()),
            ("max_values", self.max_values.len()),
            ("last_values", self.last_values.len()),
            ("last_idle_values", self.last_idle_values.len()),
        ]
    }
}

/// Thread scheduling states (Running, Runnable, Sleeping, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadStateBuffer {
    pub window: TimeSpan,
    pub bucket_size: Duration,
    pub ids: Vec<i64>,
    pub starts: Vec<i64>,
    pub ends: Vec<i64>,
    /// State names are few and repeat on every row, so they are shared.
    pub states: Vec<SharedStr>,
    pub cpus: Vec<Option<u32>>,
}

impl ThreadStateBuffer {
    pub fn new(window: TimeSpan, bucket_size: Duration) -> Self {
        Self::with_capacity(window, bucket_size, 0)
    }

    pub fn with_capacity(window: TimeSpan, bucket_size: Duration, n: usize) -> Self {
        Self {
            window,
            bucket_size,
            ids: Vec::with_capacity(n),
            starts: Vec::with_capacity(n),
            ends: Vec::with_capacity(n),
            states: Vec::with_capacity(n),
            cpus: Vec::with_capacity(n),
        }
    }
}

impl ColumnarLayout for ThreadStateBuffer {
    fn len(&self) -> usize {
        self.ids.len()
    }

    fn column_lengths(&self) -> Vec<(&'static str, usize)> {
        vec![
            ("starts", self.starts.len()),
            ("ends", self.ends.len()),
            ("states", self.states.len()),
            ("cpus", self.cpus.len()),
        ]
    }
}
