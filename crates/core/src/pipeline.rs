//! Per-track orchestration: one call per frame in, one frame of data out.

use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;

use crate::config::FetchConfig;
use crate::engine::Engine;
use crate::error::FetchError;
use crate::fetcher::{SetupContext, TimelineFetcher, TrackDataSource};
use crate::query_slot::{RetainPolicy, SlotResult};
use crate::resolution::{CacheKey, ViewState};
use crate::serial_queue::SerialTaskQueue;
use crate::yield_point::YieldPoint;

/// Where a track stands, as far as the renderer cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Nothing requested yet.
    Idle,
    /// A fetch is running and there is nothing to show.
    Pending,
    /// Showing data for the current viewport.
    Ready,
    /// Showing data for an earlier key while the current one loads or after
    /// it failed.
    StaleReady,
    /// The current key failed and there is no older data.
    Failed,
    /// Torn down. Terminal.
    Destroyed,
}

/// What to draw this frame.
#[derive(Debug)]
pub struct TrackFrame<T> {
    pub data: Option<Arc<T>>,
    pub state: PipelineState,
    pub error: Option<Arc<FetchError>>,
}

impl<T> TrackFrame<T> {
    fn destroyed() -> Self {
        Self {
            data: None,
            state: PipelineState::Destroyed,
            error: None,
        }
    }
}

/// Drives one track: runs the source's setup, turns viewport updates into
/// fetches, and tears the source down when the track goes away.
///
/// `on_update` is meant to be called every frame. It only schedules work
/// when the buffered cache key changes.
pub struct TrackRenderPipeline<S: TrackDataSource> {
    engine: Arc<dyn Engine>,
    queue: SerialTaskQueue,
    fetcher: TimelineFetcher<S>,
    setup_scheduled: bool,
    setup_error: Arc<Mutex<Option<Arc<FetchError>>>>,
    state: PipelineState,
}

impl<S: TrackDataSource> TrackRenderPipeline<S> {
    pub fn new(
        source: S,
        engine: Arc<dyn Engine>,
        queue: SerialTaskQueue,
        config: FetchConfig,
        yielder: Arc<dyn YieldPoint>,
    ) -> Self {
        let fetcher = TimelineFetcher::new(
            Arc::new(source),
            Arc::clone(&engine),
            queue.clone(),
            config,
            yielder,
        );
        Self {
            engine,
            queue,
            fetcher,
            setup_scheduled: false,
            setup_error: Arc::new(Mutex::new(None)),
            state: PipelineState::Idle,
        }
    }

    pub fn with_retain_policy(mut self, retain: RetainPolicy<CacheKey>) -> Self {
        self.fetcher.set_retain_policy(retain);
        self
    }

    /// Bring the track up to date with `view`.
    pub fn on_update(&mut self, view: &ViewState) -> TrackFrame<S::Data> {
        if self.state == PipelineState::Destroyed {
            return TrackFrame::destroyed();
        }
        if !self.setup_scheduled {
            self.schedule_setup();
        }

        let SlotResult {
            data,
            is_pending,
            is_fresh,
            error,
        } = self.fetcher.request(view);

        let error = if is_fresh {
            // Whatever setup complained about, fetching worked.
            self.setup_error.lock().take();
            None
        } else {
            error.or_else(|| self.setup_error.lock().clone())
        };

        let state = match (&data, is_pending, is_fresh, &error) {
            (Some(_), false, true, _) => PipelineState::Ready,
            (Some(_), _, _, _) => PipelineState::StaleReady,
            (None, true, _, _) => PipelineState::Pending,
            (None, false, _, Some(_)) => PipelineState::Failed,
            (None, false, _, None) => PipelineState::Idle,
        };
        if state != self.state {
            debug!(
                "{}: {:?} -> {:?} at {:?}",
                self.name(),
                self.state,
                state,
                self.fetcher.current_key()
            );
            self.state = state;
        }

        TrackFrame { data, state, error }
    }

    fn schedule_setup(&mut self) {
        self.setup_scheduled = true;
        debug!("{}: scheduling setup", self.name());
        let setup = self.fetcher.source().setup(self.setup_context());
        let name = self.name();
        let setup_error = Arc::clone(&self.setup_error);
        let _ = self.queue.schedule(async move {
            if let Err(e) = setup.await {
                warn!("{name}: setup failed: {e}");
                *setup_error.lock() = Some(Arc::new(e));
            }
        });
    }

    fn setup_context(&self) -> SetupContext {
        SetupContext {
            engine: Arc::clone(&self.engine),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn current_key(&self) -> Option<CacheKey> {
        self.fetcher.current_key()
    }

    pub fn name(&self) -> String {
        self.fetcher.source().name()
    }

    /// Forget the last failure so the next `on_update` fetches again.
    pub fn retry(&self) {
        self.fetcher.retry();
        self.setup_error.lock().take();
    }

    /// Cancel in-flight work, drop cached data, and queue the source's
    /// teardown behind anything still running. Idempotent.
    pub fn destroy(&mut self) {
        if self.state == PipelineState::Destroyed {
            return;
        }
        debug!("{}: destroying", self.name());
        self.state = PipelineState::Destroyed;
        self.fetcher.dispose();
        if !self.setup_scheduled {
            return;
        }
        let teardown = self.fetcher.source().teardown(self.setup_context());
        let name = self.name();
        let _ = self.queue.schedule(async move {
            if let Err(e) = teardown.await {
                warn!("{name}: teardown failed: {e}");
            }
        });
    }
}

impl<S: TrackDataSource> Drop for TrackRenderPipeline<S> {
    fn drop(&mut self) {
        self.destroy();
    }
}
