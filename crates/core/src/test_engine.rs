//! Scripted engine for unit tests.

use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::cancel::CancellationToken;
use crate::engine::{Engine, QueryError, QueryResult};
use crate::fetcher::{FetchContext, SetupContext};
use crate::yield_point::NeverYield;

/// Records every query and answers from a list of substring-matched
/// responses. Unmatched queries get an empty result.
#[derive(Clone, Default)]
pub(crate) struct ScriptedEngine {
    state: Arc<Mutex<State>>,
}

#[derive(Default)]
struct State {
    queries: Vec<String>,
    responses: Vec<(String, Result<QueryResult, QueryError>)>,
}

impl ScriptedEngine {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Answer queries containing `pattern` with `result`.
    pub(crate) fn respond_with(&self, pattern: &str, result: QueryResult) {
        self.set_response(pattern, Ok(result));
    }

    pub(crate) fn fail_when(&self, pattern: &str, message: &str) {
        self.set_response(pattern, Err(QueryError::Engine(message.to_owned())));
    }

    fn set_response(&self, pattern: &str, response: Result<QueryResult, QueryError>) {
        let mut state = self.state.lock();
        state.responses.retain(|(p, _)| p != pattern);
        state.responses.push((pattern.to_owned(), response));
    }

    pub(crate) fn queries(&self) -> Vec<String> {
        self.state.lock().queries.clone()
    }

    pub(crate) fn count_matching(&self, pattern: &str) -> usize {
        self.state
            .lock()
            .queries
            .iter()
            .filter(|q| q.contains(pattern))
            .count()
    }
}

impl Engine for ScriptedEngine {
    fn query(&self, sql: &str) -> BoxFuture<'static, Result<QueryResult, QueryError>> {
        let mut state = self.state.lock();
        state.queries.push(sql.to_owned());
        let response = state
            .responses
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
            .map_or_else(|| Ok(QueryResult::empty()), |(_, r)| r.clone());
        futures::future::ready(response).boxed()
    }
}

/// A fetch context over `engine` that never yields.
pub(crate) fn fetch_context(engine: &ScriptedEngine) -> FetchContext {
    FetchContext {
        engine: Arc::new(engine.clone()),
        token: CancellationToken::new(),
        yielder: Arc::new(NeverYield),
        chunk_rows: 50,
    }
}

/// A setup context over `engine`.
pub(crate) fn setup_context(engine: &ScriptedEngine) -> SetupContext {
    SetupContext {
        engine: Arc::new(engine.clone()),
    }
}
