//! Mapping a viewport onto quantized, cacheable fetch windows.
//!
//! Bucket sizes are powers of two, so zooming changes the bucket in
//! doubling steps and small zoom jitter keeps hitting the same key. Fetch
//! windows are padded around the visible window and aligned to the bucket,
//! so panning within the padding is free.

use trackfetch_protocol::{Duration, Time, TimeSpan};

use crate::config::FetchConfig;

/// Identifies one materialized result: a bucket-aligned window plus the
/// bucket size it was aggregated at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    start: Time,
    end: Time,
    bucket_size: Duration,
}

impl CacheKey {
    /// # Panics
    ///
    /// If `bucket_size` is not a power of two, if `start` is not aligned to
    /// it, or if the window is empty. All three are bugs in the caller.
    pub fn new(start: Time, end: Time, bucket_size: Duration) -> Self {
        assert!(
            bucket_size.is_power_of_two(),
            "bucket size must be a power of two, got {bucket_size}"
        );
        assert!(
            start.is_aligned_to(bucket_size),
            "cache key start must be aligned to the bucket size ({start} vs {bucket_size})"
        );
        assert!(end > start, "cache key window must not be empty");
        Self {
            start,
            end,
            bucket_size,
        }
    }

    #[inline]
    pub fn start(&self) -> Time {
        self.start
    }

    #[inline]
    pub fn end(&self) -> Time {
        self.end
    }

    #[inline]
    pub fn bucket_size(&self) -> Duration {
        self.bucket_size
    }

    pub fn window(&self) -> TimeSpan {
        // Non-empty by construction.
        TimeSpan::new(self.start, self.end).unwrap_or_else(|e| unreachable!("{e}"))
    }

    /// Whether data fetched for `other` can serve this key as-is.
    pub fn is_covered_by(&self, other: &CacheKey) -> bool {
        self.bucket_size == other.bucket_size && other.window().contains(&self.window())
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {}) @ {}",
            self.start.ns(),
            self.end.ns(),
            self.bucket_size
        )
    }
}

/// Pick the bucket size for drawing `window` across `width_px` pixels.
///
/// The result is the smallest power of two at least as wide as the time one
/// bucket should cover (`duration / (width_px * buckets_per_pixel)`), and
/// never below `config.min_bucket_size`.
pub fn bucket_size_for(window: &TimeSpan, width_px: f64, config: &FetchConfig) -> Duration {
    let width_px = if width_px.is_finite() && width_px >= 1.0 {
        width_px
    } else {
        1.0
    };
    let buckets = (width_px * config.buckets_per_pixel).max(1.0);
    let ns_per_bucket = (window.duration().ns() as f64 / buckets).ceil() as i64;
    let bucket = Duration(ns_per_bucket).bit_ceil();
    bucket.max(config.min_bucket_size())
}

/// Pad `visible` to `buffer_factor` times its width, clamp the padding to
/// `trace_bounds`, and align outward to `bucket`.
///
/// The visible window itself is never clipped, so the result always
/// contains it. Padding never reaches before the trace start or past the
/// trace end (beyond the bucket containing them).
pub fn buffered_key(
    visible: &TimeSpan,
    bucket: Duration,
    trace_bounds: &TimeSpan,
    config: &FetchConfig,
) -> CacheKey {
    let width = visible.duration().ns();
    let pad = ((width as f64) * (config.buffer_factor - 1.0) / 2.0).ceil() as i64;
    let pad = Duration(pad.max(0));

    let lo_limit = visible.start().min(trace_bounds.start());
    let hi_limit = visible.end().max(trace_bounds.end());

    let start = visible.start().saturating_sub(pad).max(lo_limit);
    let end = visible.end().saturating_add(pad).min(hi_limit);

    CacheKey::new(start.quant_floor(bucket), end.quant_ceil(bucket), bucket)
}

/// The viewport a track is asked to draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewState {
    pub visible: TimeSpan,
    pub width_px: f64,
    /// Extent of the whole trace; padding never reaches past it.
    pub trace_bounds: TimeSpan,
}

impl ViewState {
    pub fn new(visible: TimeSpan, width_px: f64, trace_bounds: TimeSpan) -> Self {
        Self {
            visible,
            width_px,
            trace_bounds,
        }
    }
}

/// Remembers the last fetch window and only moves it when the viewport
/// leaves it or the bucket size changes.
#[derive(Debug, Clone, Default)]
pub struct BufferedBounds {
    loaded: Option<CacheKey>,
}

impl BufferedBounds {
    pub fn new() -> Self {
        Self::default()
    }

    /// The key to fetch for `visible` at `bucket`.
    ///
    /// Returns the previous key unchanged while `visible` stays inside it at
    /// the same bucket size.
    pub fn update(
        &mut self,
        visible: &TimeSpan,
        bucket: Duration,
        trace_bounds: &TimeSpan,
        config: &FetchConfig,
    ) -> CacheKey {
        if let Some(loaded) = self.loaded
            && loaded.bucket_size() == bucket
            && loaded.window().contains(visible)
        {
            return loaded;
        }
        let key = buffered_key(visible, bucket, trace_bounds, config);
        self.loaded = Some(key);
        key
    }

    /// Compute the bucket for `view` and update.
    pub fn update_for_view(&mut self, view: &ViewState, config: &FetchConfig) -> CacheKey {
        let bucket = bucket_size_for(&view.visible, view.width_px, config);
        self.update(&view.visible, bucket, &view.trace_bounds, config)
    }

    pub fn loaded(&self) -> Option<CacheKey> {
        self.loaded
    }

    /// Forget the loaded window; the next update recomputes.
    pub fn reset(&mut self) {
        self.loaded = None;
    }
}
