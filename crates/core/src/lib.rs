//! Incremental, resolution-aware data fetching for timeline tracks.
//!
//! A host calls [`TrackRenderPipeline::on_update`] once per frame with the
//! current viewport. The pipeline quantizes the viewport into a
//! [`CacheKey`], serves the cached buffer when the key is unchanged, and
//! otherwise schedules exactly one fetch on the track's
//! [`SerialTaskQueue`], cancelling whatever fetch it supersedes. Fetches
//! query an [`Engine`], materialize rows into columnar buffers from
//! `trackfetch-protocol`, and yield cooperatively between chunks.

pub mod cancel;
pub mod config;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod materialize;
pub mod pipeline;
pub mod query_slot;
pub mod resolution;
pub mod serial_queue;
pub mod tracks;
pub mod yield_point;

#[cfg(test)]
mod test_engine;

pub use cancel::CancellationToken;
pub use config::{ConfigError, FetchConfig};
pub use engine::{Engine, FromRow, QueryError, QueryResult, Row, SqlValue};
pub use error::{FetchError, FetchOutcome};
pub use fetcher::{FetchContext, SetupContext, TimelineFetcher, TrackDataSource};
pub use materialize::{BufferBuilder, Checkpoints, materialize};
pub use pipeline::{PipelineState, TrackFrame, TrackRenderPipeline};
pub use query_slot::{QuerySlot, RetainPolicy, SlotResult};
pub use resolution::{BufferedBounds, CacheKey, ViewState, bucket_size_for, buffered_key};
pub use serial_queue::{QueueWorker, SerialTaskQueue, TaskHandle};
pub use tracks::{CpuFreqSource, CpuSliceSource, ThreadStateSource};
pub use yield_point::{AlwaysYield, FrameBudget, NeverYield, YieldNow, YieldPoint};
