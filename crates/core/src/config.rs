use serde::{Deserialize, Serialize};
use thiserror::Error;
use trackfetch_protocol::Duration;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid fetch config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid fetch config: {0}")]
    Invalid(&'static str),
}

/// Tuning knobs shared by every track pipeline.
///
/// Every field has a default, so a host config only names what it changes:
///
/// ```
/// use trackfetch_core::config::FetchConfig;
///
/// let cfg = FetchConfig::from_json_str(r#"{ "buffer_factor": 3.0 }"#).unwrap();
/// assert_eq!(cfg.buffer_factor, 3.0);
/// assert_eq!(cfg.yield_chunk_rows, 50);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Width of the fetched window relative to the visible one. `2.0` pads
    /// half a viewport on each side.
    pub buffer_factor: f64,
    /// Smallest bucket in nanoseconds. Rounded up to a power of two.
    pub min_bucket_size: i64,
    /// How many buckets one pixel covers.
    pub buckets_per_pixel: f64,
    /// Rows materialized between cancellation / yield checks.
    pub yield_chunk_rows: usize,
    /// Time a materialization may run before [`FrameBudget`] asks it to yield.
    ///
    /// [`FrameBudget`]: crate::yield_point::FrameBudget
    pub frame_budget_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            buffer_factor: 2.0,
            min_bucket_size: 1,
            buckets_per_pixel: 1.0,
            yield_chunk_rows: 50,
            frame_budget_ms: 8,
        }
    }
}

impl FetchConfig {
    /// Parse and validate a JSON config.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: FetchConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.buffer_factor.is_finite() || self.buffer_factor < 1.0 {
            return Err(ConfigError::Invalid("buffer_factor must be >= 1.0"));
        }
        if self.min_bucket_size < 1 {
            return Err(ConfigError::Invalid("min_bucket_size must be >= 1"));
        }
        if !self.buckets_per_pixel.is_finite() || self.buckets_per_pixel <= 0.0 {
            return Err(ConfigError::Invalid("buckets_per_pixel must be > 0"));
        }
        if self.yield_chunk_rows == 0 {
            return Err(ConfigError::Invalid("yield_chunk_rows must be > 0"));
        }
        Ok(())
    }

    pub fn min_bucket_size(&self) -> Duration {
        Duration(self.min_bucket_size).bit_ceil()
    }

    pub fn frame_budget(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.frame_budget_ms)
    }
}
