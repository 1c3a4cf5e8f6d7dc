use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An absolute trace timestamp in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Time(pub i64);

/// A span of trace time in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Duration(pub i64);

impl Time {
    pub const ZERO: Time = Time(0);

    #[inline]
    pub fn ns(self) -> i64 {
        self.0
    }

    /// Round down to a multiple of `bucket`.
    ///
    /// Uses euclidean division so timestamps before the origin round toward
    /// negative infinity like every other timestamp.
    pub fn quant_floor(self, bucket: Duration) -> Time {
        let b = bucket.0.max(1);
        Time(self.0.div_euclid(b) * b)
    }

    /// Round up to a multiple of `bucket`.
    pub fn quant_ceil(self, bucket: Duration) -> Time {
        let b = bucket.0.max(1);
        let floor = self.0.div_euclid(b) * b;
        if floor == self.0 {
            self
        } else {
            Time(floor.saturating_add(b))
        }
    }

    pub fn is_aligned_to(self, bucket: Duration) -> bool {
        bucket.0 > 0 && self.0.rem_euclid(bucket.0) == 0
    }

    #[inline]
    pub fn saturating_add(self, d: Duration) -> Time {
        Time(self.0.saturating_add(d.0))
    }

    #[inline]
    pub fn saturating_sub(self, d: Duration) -> Time {
        Time(self.0.saturating_sub(d.0))
    }

    /// Distance from `earlier` to `self`.
    #[inline]
    pub fn since(self, earlier: Time) -> Duration {
        Duration(self.0.saturating_sub(earlier.0))
    }
}

impl Duration {
    #[inline]
    pub fn ns(self) -> i64 {
        self.0
    }

    pub fn is_power_of_two(self) -> bool {
        self.0 > 0 && (self.0 as u64).is_power_of_two()
    }

    /// Smallest power of two that is `>= self`, saturating at 2^62ns.
    /// Non-positive durations map to 1ns.
    pub fn bit_ceil(self) -> Duration {
        if self.0 <= 1 {
            return Duration(1);
        }
        let ceil = (self.0 as u64).checked_next_power_of_two().unwrap_or(1 << 62);
        Duration(ceil.min(1 << 62) as i64)
    }
}

impl std::fmt::Display for Time {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

impl std::fmt::Display for Duration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpanError {
    #[error("empty time span [{start}, {end})")]
    Empty { start: Time, end: Time },
}

/// A half-open interval of trace time, `[start, end)`.
///
/// Always non-empty: construction rejects `end <= start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawSpan")]
pub struct TimeSpan {
    start: Time,
    end: Time,
}

#[derive(Deserialize)]
struct RawSpan {
    start: Time,
    end: Time,
}

impl TryFrom<RawSpan> for TimeSpan {
    type Error = SpanError;

    fn try_from(raw: RawSpan) -> Result<Self, Self::Error> {
        TimeSpan::new(raw.start, raw.end)
    }
}

impl TimeSpan {
    pub fn new(start: Time, end: Time) -> Result<Self, SpanError> {
        if end <= start {
            return Err(SpanError::Empty { start, end });
        }
        Ok(Self { start, end })
    }

    /// Convenience constructor from raw nanoseconds.
    pub fn from_ns(start: i64, end: i64) -> Result<Self, SpanError> {
        Self::new(Time(start), Time(end))
    }

    #[inline]
    pub fn start(&self) -> Time {
        self.start
    }

    #[inline]
    pub fn end(&self) -> Time {
        self.end
    }

    pub fn duration(&self) -> Duration {
        self.end.since(self.start)
    }

    /// Whether `other` lies entirely within this span.
    pub fn contains(&self, other: &TimeSpan) -> bool {
        other.start >= self.start && other.end <= self.end
    }

    pub fn contains_time(&self, t: Time) -> bool {
        t >= self.start && t < self.end
    }

    pub fn intersects(&self, other: &TimeSpan) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl std::fmt::Display for TimeSpan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start.0, self.end.0)
    }
}
