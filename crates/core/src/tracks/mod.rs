//! Concrete track kinds.
//!
//! Every query here is built with `format!` from integers the track owns or
//! from a [`CacheKey`](crate::resolution::CacheKey); no caller-supplied text
//! reaches the SQL.

mod cpu_freq;
mod cpu_slice;
mod thread_state;

pub use cpu_freq::CpuFreqSource;
pub use cpu_slice::CpuSliceSource;
pub use thread_state::{ThreadStateSource, state_label};

/// End of an interval whose duration is `-1` while it is still open.
/// Open intervals are drawn up to the end of the fetched window.
fn interval_end(ts: i64, dur: i64, window_end: i64) -> i64 {
    if dur < 0 {
        window_end.max(ts)
    } else {
        ts.saturating_add(dur)
    }
}

/// `where` clause selecting intervals that overlap `[start, end)`.
fn overlaps(start: i64, end: i64) -> String {
    format!("ts < {end} and (dur = -1 or ts + dur > {start})")
}
