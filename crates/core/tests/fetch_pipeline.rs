//! End-to-end: viewport updates through the pipeline into slice and
//! frequency buffers, against an in-memory engine.

mod common;

use std::sync::Arc;

use common::{TestEngine, slice_rows, span, view};
use futures::executor::LocalPool;
use trackfetch_core::{
    AlwaysYield, CpuFreqSource, CpuSliceSource, FetchConfig, NeverYield, PipelineState,
    QueryResult, SerialTaskQueue, SqlValue, TrackDataSource, TrackRenderPipeline, YieldPoint,
};
use trackfetch_protocol::{ColumnarLayout, Duration};

fn track<S: TrackDataSource>(
    pool: &LocalPool,
    source: S,
    engine: &TestEngine,
    config: FetchConfig,
    yielder: Arc<dyn YieldPoint>,
) -> TrackRenderPipeline<S> {
    let queue = SerialTaskQueue::spawn(&pool.spawner()).expect("spawn queue worker");
    TrackRenderPipeline::new(source, Arc::new(engine.clone()), queue, config, yielder)
}

fn slice_track(pool: &LocalPool, engine: &TestEngine) -> TrackRenderPipeline<CpuSliceSource> {
    track(
        pool,
        CpuSliceSource::new(0),
        engine,
        FetchConfig::default(),
        Arc::new(NeverYield),
    )
}

#[test]
fn pan_inside_buffer_is_free_and_jump_fetches_once() {
    let mut pool = LocalPool::new();
    let engine = TestEngine::new();
    engine.respond_with("from sched", slice_rows(&[(1, 1200, 100), (2, 1500, 300)]));
    let mut track = slice_track(&pool, &engine);

    assert_eq!(track.on_update(&view(1000, 2000)).state, PipelineState::Pending);
    pool.run_until_stalled();
    assert_eq!(engine.query_count(), 1);

    let frame = track.on_update(&view(1000, 2000));
    assert_eq!(frame.state, PipelineState::Ready);
    let first = frame.data.expect("data after first fetch");
    assert!(first.window.contains(&span(1000, 2000)));
    assert_eq!(first.bucket_size, Duration(16));
    assert_eq!(first.ids, vec![1, 2]);

    // Contained in the buffered window at the same bucket: no query, same buffer.
    let panned = track.on_update(&view(1010, 1990));
    pool.run_until_stalled();
    assert_eq!(engine.query_count(), 1);
    assert_eq!(panned.state, PipelineState::Ready);
    assert!(Arc::ptr_eq(&first, panned.data.as_ref().expect("cached data")));

    let jumped = track.on_update(&view(5000, 6000));
    assert_eq!(jumped.state, PipelineState::StaleReady);
    assert!(Arc::ptr_eq(&first, jumped.data.as_ref().expect("retained data")));
    pool.run_until_stalled();
    assert_eq!(engine.query_count(), 2);

    let frame = track.on_update(&view(5000, 6000));
    assert_eq!(frame.state, PipelineState::Ready);
    let second = frame.data.expect("data after second fetch");
    assert!(second.window.contains(&span(5000, 6000)));
    assert!(!Arc::ptr_eq(&first, &second));
}

#[test]
fn superseded_fetch_never_becomes_visible() {
    let mut pool = LocalPool::new();
    let engine = TestEngine::gated();
    engine.respond_with("from sched", slice_rows(&[(1, 1500, 10)]));
    let mut track = slice_track(&pool, &engine);

    // K1 reaches the engine and parks there.
    track.on_update(&view(1000, 2000));
    pool.run_until_stalled();
    assert_eq!(engine.parked(), 1);

    // K2 supersedes it but waits in the queue behind K1.
    let k2 = view(500_000, 501_000);
    assert_eq!(track.on_update(&k2).state, PipelineState::Pending);
    pool.run_until_stalled();
    assert_eq!(engine.parked(), 1);

    // K1's rows arrive after it was cancelled and are dropped.
    assert!(engine.release_next());
    pool.run_until_stalled();
    let frame = track.on_update(&k2);
    assert_eq!(frame.state, PipelineState::Pending);
    assert!(frame.data.is_none());
    assert_eq!(engine.query_count(), 2);

    assert!(engine.release_next());
    pool.run_until_stalled();
    let frame = track.on_update(&k2);
    assert_eq!(frame.state, PipelineState::Ready);
    let data = frame.data.expect("K2 data");
    assert!(data.window.contains(&k2.visible));
    assert!(!data.window.contains(&span(1000, 2000)));
}

#[test]
fn rapid_viewport_changes_query_only_the_last() {
    let mut pool = LocalPool::new();
    let engine = TestEngine::new();
    engine.respond_with("from sched", slice_rows(&[]));
    let mut track = slice_track(&pool, &engine);

    let views: Vec<_> = (1..=8).map(|i| view(i * 50_000, i * 50_000 + 1000)).collect();
    for v in &views {
        track.on_update(v);
    }
    pool.run_until_stalled();

    assert_eq!(engine.query_count(), 1);
    let last = views.last().expect("views");
    let frame = track.on_update(last);
    assert_eq!(frame.state, PipelineState::Ready);
    assert!(frame.data.expect("data").window.contains(&last.visible));
}

#[test]
fn tracks_do_not_wait_for_each_other() {
    let mut pool = LocalPool::new();
    let engine = TestEngine::gated();
    engine.respond_with("from sched", slice_rows(&[(1, 1500, 10)]));
    let mut slow = track(
        &pool,
        CpuSliceSource::new(1),
        &engine,
        FetchConfig::default(),
        Arc::new(NeverYield),
    );
    let mut fast = track(
        &pool,
        CpuSliceSource::new(2),
        &engine,
        FetchConfig::default(),
        Arc::new(NeverYield),
    );

    slow.on_update(&view(1000, 2000));
    fast.on_update(&view(1000, 2000));
    pool.run_until_stalled();
    // Both queries are in flight at once.
    assert_eq!(engine.parked(), 2);

    assert!(engine.release_matching("cpu = 2"));
    pool.run_until_stalled();
    assert_eq!(fast.on_update(&view(1000, 2000)).state, PipelineState::Ready);
    assert_eq!(slow.on_update(&view(1000, 2000)).state, PipelineState::Pending);

    assert!(engine.release_matching("cpu = 1"));
    pool.run_until_stalled();
    assert_eq!(slow.on_update(&view(1000, 2000)).state, PipelineState::Ready);
}

#[test]
fn large_results_yield_per_configured_chunk() {
    let mut pool = LocalPool::new();
    let engine = TestEngine::new();
    let rows: Vec<_> = (0..1234).map(|i| (i, 1000 + i % 900, 1)).collect();
    engine.respond_with("from sched", slice_rows(&rows));
    let config = FetchConfig::from_json_str(r#"{ "yield_chunk_rows": 10 }"#).expect("config");
    let yielder = Arc::new(AlwaysYield::new());
    let mut track = track(&pool, CpuSliceSource::new(2), &engine, config, yielder.clone());

    track.on_update(&view(1000, 2000));
    pool.run_until_stalled();

    let frame = track.on_update(&view(1000, 2000));
    let buffer = frame.data.expect("data");
    assert_eq!(buffer.len(), 1234);
    assert!(buffer.check_layout().is_ok());
    assert!(yielder.yields() >= 123);
}

#[test]
fn freq_track_lifecycle_creates_and_drops_its_table() {
    let mut pool = LocalPool::new();
    let engine = TestEngine::new();
    engine.respond_with(
        "as max_value from",
        QueryResult::new(
            vec!["max_value".into()],
            vec![vec![SqlValue::Long(3_000_000)]],
        ),
    );
    engine.respond_with(
        "group by",
        QueryResult::new(
            ["bucket_ts", "min_value", "max_value", "last_value", "last_idle_value"]
                .iter()
                .map(ToString::to_string)
                .collect(),
            vec![vec![
                SqlValue::Long(992),
                SqlValue::Long(1_000_000),
                SqlValue::Long(2_000_000),
                SqlValue::Long(1_500_000),
                SqlValue::Null,
            ]],
        ),
    );
    let mut freq = track(
        &pool,
        CpuFreqSource::new(1, 77, None),
        &engine,
        FetchConfig::default(),
        Arc::new(NeverYield),
    );

    freq.on_update(&view(1000, 2000));
    pool.run_until_stalled();
    let frame = freq.on_update(&view(1000, 2000));
    assert_eq!(frame.state, PipelineState::Ready);
    let buffer = frame.data.expect("freq data");
    assert_eq!(buffer.max_value, 3_000_000.0);
    assert_eq!(buffer.timestamps, vec![992]);
    assert_eq!(buffer.last_idle_values, vec![-1]);

    drop(freq);
    pool.run_until_stalled();

    let queries = engine.queries();
    assert_eq!(queries.len(), 4, "{queries:?}");
    assert!(queries[0].starts_with("create perfetto table __cpu_freq_77"));
    assert!(queries[1..3].iter().all(|q| q.contains("from __cpu_freq_77")));
    assert_eq!(queries[3], "drop perfetto table __cpu_freq_77");
}

#[test]
fn destroy_during_setup_still_drops_the_table() {
    let mut pool = LocalPool::new();
    let engine = TestEngine::gated();
    let mut freq = track(
        &pool,
        CpuFreqSource::new(1, 9, Some(10)),
        &engine,
        FetchConfig::default(),
        Arc::new(NeverYield),
    );

    freq.on_update(&view(1000, 2000));
    pool.run_until_stalled();
    assert_eq!(engine.parked(), 1);
    freq.destroy();

    while engine.release_next() {
        pool.run_until_stalled();
    }
    pool.run_until_stalled();

    let queries = engine.queries();
    assert_eq!(queries.len(), 2, "{queries:?}");
    assert!(queries[0].starts_with("create perfetto table __cpu_freq_9"));
    assert_eq!(queries[1], "drop perfetto table __cpu_freq_9");
    assert_eq!(freq.state(), PipelineState::Destroyed);
}

mod on_tokio {
    use super::*;
    use futures::future::FutureObj;
    use futures::task::{Spawn, SpawnError};
    use trackfetch_core::FrameBudget;

    struct TokioSpawner(tokio::runtime::Handle);

    impl Spawn for TokioSpawner {
        fn spawn_obj(&self, future: FutureObj<'static, ()>) -> Result<(), SpawnError> {
            drop(self.0.spawn(future));
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn pipeline_runs_on_a_thread_pool() {
        let engine = TestEngine::new();
        engine.respond_with("from sched", slice_rows(&[(4, 1100, 50)]));
        let queue = SerialTaskQueue::spawn(&TokioSpawner(tokio::runtime::Handle::current()))
            .expect("spawn queue worker");
        let config = FetchConfig::default();
        let yielder = Arc::new(FrameBudget::new(config.frame_budget()));
        let mut track = TrackRenderPipeline::new(
            CpuSliceSource::new(0),
            Arc::new(engine.clone()),
            queue,
            config,
            yielder,
        );

        let mut frame = track.on_update(&view(1000, 2000));
        for _ in 0..200 {
            if frame.state == PipelineState::Ready {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            frame = track.on_update(&view(1000, 2000));
        }
        assert_eq!(frame.state, PipelineState::Ready);
        assert_eq!(frame.data.expect("data").ids, vec![4]);
        assert_eq!(engine.query_count(), 1);
    }
}
