//! In-memory engine shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use futures::FutureExt;
use futures::channel::oneshot;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use trackfetch_core::{Engine, QueryError, QueryResult, SqlValue, ViewState};
use trackfetch_protocol::TimeSpan;

/// Answers every query with canned rows. When gated, each query parks until
/// the test releases it, so tests decide exactly when results arrive.
#[derive(Clone, Default)]
pub struct TestEngine {
    state: Arc<Mutex<EngineState>>,
}

#[derive(Default)]
struct EngineState {
    queries: Vec<String>,
    responses: Vec<(String, QueryResult)>,
    gated: bool,
    parked: VecDeque<(String, oneshot::Sender<()>)>,
}

impl TestEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated() -> Self {
        let engine = Self::default();
        engine.state.lock().gated = true;
        engine
    }

    pub fn respond_with(&self, pattern: &str, result: QueryResult) {
        self.state
            .lock()
            .responses
            .push((pattern.to_owned(), result));
    }

    pub fn queries(&self) -> Vec<String> {
        self.state.lock().queries.clone()
    }

    pub fn query_count(&self) -> usize {
        self.state.lock().queries.len()
    }

    pub fn parked(&self) -> usize {
        self.state.lock().parked.len()
    }

    /// Complete the oldest parked query.
    pub fn release_next(&self) -> bool {
        let next = self.state.lock().parked.pop_front();
        next.is_some_and(|(_, tx)| tx.send(()).is_ok())
    }

    /// Complete the oldest parked query whose SQL contains `pattern`.
    pub fn release_matching(&self, pattern: &str) -> bool {
        let mut state = self.state.lock();
        let Some(pos) = state.parked.iter().position(|(sql, _)| sql.contains(pattern)) else {
            return false;
        };
        state
            .parked
            .remove(pos)
            .is_some_and(|(_, tx)| tx.send(()).is_ok())
    }
}

impl Engine for TestEngine {
    fn query(&self, sql: &str) -> BoxFuture<'static, Result<QueryResult, QueryError>> {
        let mut state = self.state.lock();
        state.queries.push(sql.to_owned());
        let result = state
            .responses
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
            .map(|(_, r)| r.clone())
            .unwrap_or_default();
        if !state.gated {
            return futures::future::ready(Ok(result)).boxed();
        }
        let (tx, rx) = oneshot::channel();
        state.parked.push_back((sql.to_owned(), tx));
        async move {
            rx.await
                .map(|()| result)
                .map_err(|_| QueryError::Engine("engine shut down".into()))
        }
        .boxed()
    }
}

/// `sched` rows as returned by the slice query.
pub fn slice_rows(rows: &[(i64, i64, i64)]) -> QueryResult {
    QueryResult::new(
        ["id", "ts", "dur", "utid", "priority"]
            .iter()
            .map(ToString::to_string)
            .collect(),
        rows.iter()
            .map(|&(id, ts, dur)| {
                vec![
                    SqlValue::Long(id),
                    SqlValue::Long(ts),
                    SqlValue::Long(dur),
                    SqlValue::Long(1),
                    SqlValue::Long(120),
                ]
            })
            .collect(),
    )
}

pub fn span(start: i64, end: i64) -> TimeSpan {
    TimeSpan::from_ns(start, end).expect("valid span")
}

/// A 100px-wide view over a 1ms trace. `[1000, 2000)` maps to 16ns buckets.
pub fn view(start: i64, end: i64) -> ViewState {
    ViewState::new(span(start, end), 100.0, span(0, 1_000_000))
}
