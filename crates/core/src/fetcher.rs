//! Per-track data sources and the viewport-to-slot glue.

use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::cancel::CancellationToken;
use crate::config::FetchConfig;
use crate::engine::Engine;
use crate::error::FetchError;
use crate::materialize::Checkpoints;
use crate::query_slot::{QuerySlot, RetainPolicy, SlotResult};
use crate::resolution::{BufferedBounds, CacheKey, ViewState};
use crate::serial_queue::SerialTaskQueue;
use crate::yield_point::YieldPoint;

/// What `setup` and `teardown` get to work with.
#[derive(Clone)]
pub struct SetupContext {
    pub engine: Arc<dyn Engine>,
}

/// Everything one fetch needs. Owned, so the fetch future can be `'static`.
#[derive(Clone)]
pub struct FetchContext {
    pub engine: Arc<dyn Engine>,
    pub token: CancellationToken,
    pub yielder: Arc<dyn YieldPoint>,
    pub chunk_rows: usize,
}

impl FetchContext {
    pub fn checkpoints(&self) -> Checkpoints<'_> {
        Checkpoints {
            token: &self.token,
            yielder: self.yielder.as_ref(),
            chunk_rows: self.chunk_rows,
        }
    }
}

/// One kind of track: how to prepare the engine, fetch a window, and clean up.
///
/// `setup` runs once before the first fetch and `teardown` once after the
/// last, both on the track's queue, so they never overlap a fetch.
pub trait TrackDataSource: Send + Sync + 'static {
    type Data: Send + Sync + 'static;

    /// Label used in logs.
    fn name(&self) -> String;

    fn setup(&self, _ctx: SetupContext) -> BoxFuture<'static, Result<(), FetchError>> {
        futures::future::ready(Ok(())).boxed()
    }

    /// Query and materialize the data for `key`.
    fn fetch(
        &self,
        key: &CacheKey,
        ctx: FetchContext,
    ) -> BoxFuture<'static, Result<Self::Data, FetchError>>;

    fn teardown(&self, _ctx: SetupContext) -> BoxFuture<'static, Result<(), FetchError>> {
        futures::future::ready(Ok(())).boxed()
    }
}

/// Turns viewports into cache keys and keys into slot requests.
pub struct TimelineFetcher<S: TrackDataSource> {
    source: Arc<S>,
    engine: Arc<dyn Engine>,
    yielder: Arc<dyn YieldPoint>,
    config: FetchConfig,
    retain: RetainPolicy<CacheKey>,
    bounds: BufferedBounds,
    slot: QuerySlot<CacheKey, S::Data>,
}

impl<S: TrackDataSource> TimelineFetcher<S> {
    pub fn new(
        source: Arc<S>,
        engine: Arc<dyn Engine>,
        queue: SerialTaskQueue,
        config: FetchConfig,
        yielder: Arc<dyn YieldPoint>,
    ) -> Self {
        Self {
            source,
            engine,
            yielder,
            config,
            retain: RetainPolicy::Always,
            bounds: BufferedBounds::new(),
            slot: QuerySlot::new(queue),
        }
    }

    /// Which previous data may be shown while a new key loads.
    pub fn with_retain_policy(mut self, retain: RetainPolicy<CacheKey>) -> Self {
        self.set_retain_policy(retain);
        self
    }

    pub fn set_retain_policy(&mut self, retain: RetainPolicy<CacheKey>) {
        self.retain = retain;
    }

    /// The data for `view`. Fetches only when the buffered key changes.
    pub fn request(&mut self, view: &ViewState) -> SlotResult<S::Data> {
        if self.slot.is_disposed() {
            return SlotResult::empty();
        }
        let key = self.bounds.update_for_view(view, &self.config);
        let source = Arc::clone(&self.source);
        let engine = Arc::clone(&self.engine);
        let yielder = Arc::clone(&self.yielder);
        let chunk_rows = self.config.yield_chunk_rows;
        self.slot.use_query(key, self.retain, move |token| {
            source.fetch(
                &key,
                FetchContext {
                    engine,
                    token,
                    yielder,
                    chunk_rows,
                },
            )
        })
    }

    /// The key of the most recent request.
    pub fn current_key(&self) -> Option<CacheKey> {
        self.bounds.loaded()
    }

    /// Clear a recorded failure so the current key is fetched again.
    pub fn retry(&self) {
        self.slot.retry();
    }

    pub fn dispose(&mut self) {
        self.slot.dispose();
        self.bounds.reset();
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }
}
