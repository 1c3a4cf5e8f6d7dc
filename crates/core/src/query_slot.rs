//! Single-result cache with in-flight bookkeeping.
//!
//! A [`QuerySlot`] holds the last result of one logical data source together
//! with at most one pending fetch. Callers poll it every frame with the key
//! they want; the slot answers from cache, reports a fetch already under way,
//! or cancels the previous fetch and schedules a new one on the owning
//! track's [`SerialTaskQueue`].
//!
//! Results are tagged with a generation. A completion is applied only when
//! its generation is still the pending one, so a superseded fetch whose
//! engine call finished anyway can never overwrite newer data.

use std::fmt::Debug;
use std::future::Future;
use std::sync::{Arc, Weak};

use log::{debug, trace, warn};
use parking_lot::Mutex;

use crate::cancel::CancellationToken;
use crate::error::{FetchError, FetchOutcome};
use crate::serial_queue::SerialTaskQueue;

/// Whether previous data may stand in while a fetch for a new key runs.
pub enum RetainPolicy<K> {
    /// Always show the previous data.
    Always,
    /// Blank while loading.
    Never,
    /// Retain when `f(previous_key, requested_key)` holds.
    When(fn(&K, &K) -> bool),
}

impl<K> RetainPolicy<K> {
    fn retains(&self, previous: &K, requested: &K) -> bool {
        match self {
            RetainPolicy::Always => true,
            RetainPolicy::Never => false,
            RetainPolicy::When(f) => f(previous, requested),
        }
    }
}

impl<K> Default for RetainPolicy<K> {
    fn default() -> Self {
        RetainPolicy::Always
    }
}

impl<K> Clone for RetainPolicy<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K> Copy for RetainPolicy<K> {}

impl<K> Debug for RetainPolicy<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetainPolicy::Always => f.write_str("Always"),
            RetainPolicy::Never => f.write_str("Never"),
            RetainPolicy::When(_) => f.write_str("When(..)"),
        }
    }
}

/// What a slot has to show for a requested key.
#[derive(Debug)]
pub struct SlotResult<T> {
    pub data: Option<Arc<T>>,
    /// A fetch for the requested key is queued or running.
    pub is_pending: bool,
    /// `data` was produced for exactly the requested key.
    pub is_fresh: bool,
    /// The last fetch for the requested key failed.
    pub error: Option<Arc<FetchError>>,
}

impl<T> SlotResult<T> {
    pub fn empty() -> Self {
        Self {
            data: None,
            is_pending: false,
            is_fresh: false,
            error: None,
        }
    }
}

impl<T> Default for SlotResult<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> Clone for SlotResult<T> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            is_pending: self.is_pending,
            is_fresh: self.is_fresh,
            error: self.error.clone(),
        }
    }
}

struct Pending<K> {
    key: K,
    token: CancellationToken,
    generation: u64,
}

struct SlotState<K, T> {
    data: Option<(K, Arc<T>)>,
    pending: Option<Pending<K>>,
    error: Option<(K, Arc<FetchError>)>,
    generation: u64,
    disposed: bool,
}

impl<K, T> SlotState<K, T> {
    fn cancel_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.token.cancel();
        }
    }

    fn retained(&self, requested: &K, retain: RetainPolicy<K>) -> Option<Arc<T>> {
        self.data
            .as_ref()
            .filter(|(key, _)| retain.retains(key, requested))
            .map(|(_, data)| Arc::clone(data))
    }
}

/// Cached result plus at most one in-flight fetch for one data source.
pub struct QuerySlot<K, T> {
    queue: SerialTaskQueue,
    state: Arc<Mutex<SlotState<K, T>>>,
}

impl<K, T> QuerySlot<K, T>
where
    K: Clone + Eq + Debug + Send + 'static,
    T: Send + Sync + 'static,
{
    /// A slot whose fetches run on `queue`.
    pub fn new(queue: SerialTaskQueue) -> Self {
        Self {
            queue,
            state: Arc::new(Mutex::new(SlotState {
                data: None,
                pending: None,
                error: None,
                generation: 0,
                disposed: false,
            })),
        }
    }

    /// Ask for the data for `key`, fetching it with `query_fn` if needed.
    ///
    /// Never blocks. At most one call to `query_fn` is made per distinct
    /// key change; re-asking for the pending key only reports progress.
    /// The token passed to `query_fn` is cancelled once a different key is
    /// requested or the slot is disposed.
    pub fn use_query<F, Fut>(&self, key: K, retain: RetainPolicy<K>, query_fn: F) -> SlotResult<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let (token, generation, previous) = {
            let mut st = self.state.lock();
            if st.disposed {
                return SlotResult::empty();
            }

            // The worker is gone, so the pending job will never run.
            if self.queue.is_closed()
                && let Some(pending) = st.pending.take()
            {
                warn!(
                    "query slot: queue closed with fetch #{} for {:?} pending",
                    pending.generation, pending.key
                );
                st.error = Some((pending.key, Arc::new(FetchError::QueueClosed)));
            }

            if let Some((data_key, data)) = &st.data
                && *data_key == key
            {
                let data = Arc::clone(data);
                // The caller went back to what is already loaded.
                st.cancel_pending();
                return SlotResult {
                    data: Some(data),
                    is_pending: false,
                    is_fresh: true,
                    error: None,
                };
            }

            if st.pending.as_ref().is_some_and(|p| p.key == key) {
                return SlotResult {
                    data: st.retained(&key, retain),
                    is_pending: true,
                    is_fresh: false,
                    error: None,
                };
            }

            if let Some((error_key, error)) = &st.error
                && *error_key == key
            {
                let error = Arc::clone(error);
                st.cancel_pending();
                return SlotResult {
                    data: st.retained(&key, retain),
                    is_pending: false,
                    is_fresh: false,
                    error: Some(error),
                };
            }

            st.cancel_pending();
            let previous = st.retained(&key, retain);

            if self.queue.is_closed() {
                warn!("query slot: queue closed, cannot fetch {key:?}");
                let error = Arc::new(FetchError::QueueClosed);
                st.error = Some((key, Arc::clone(&error)));
                return SlotResult {
                    data: previous,
                    is_pending: false,
                    is_fresh: false,
                    error: Some(error),
                };
            }

            st.generation += 1;
            let generation = st.generation;
            let token = CancellationToken::new();
            st.pending = Some(Pending {
                key: key.clone(),
                token: token.clone(),
                generation,
            });
            (token, generation, previous)
        };

        debug!("query slot: scheduling fetch #{generation} for {key:?}");
        let fetch = query_fn(token.clone());
        let completion = Completion {
            state: Arc::downgrade(&self.state),
            generation,
            key: Some(key),
        };
        let _ = self.queue.schedule(async move {
            // Superseded while waiting in the queue.
            let result = if token.is_cancelled() {
                Err(FetchError::Cancelled)
            } else {
                fetch.await
            };
            completion.finish(result);
        });

        SlotResult {
            data: previous,
            is_pending: true,
            is_fresh: false,
            error: None,
        }
    }

    /// Forget the recorded failure so the next request for its key refetches.
    pub fn retry(&self) {
        self.state.lock().error = None;
    }

    /// Cancel the pending fetch and drop all data. Later requests return
    /// empty results without fetching.
    pub fn dispose(&self) {
        let mut st = self.state.lock();
        if st.disposed {
            return;
        }
        st.disposed = true;
        st.cancel_pending();
        st.data = None;
        st.error = None;
        debug!("query slot: disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.state.lock().disposed
    }

    pub fn is_pending(&self) -> bool {
        self.state.lock().pending.is_some()
    }

    /// Key of the data currently held.
    pub fn data_key(&self) -> Option<K> {
        self.state.lock().data.as_ref().map(|(key, _)| key.clone())
    }
}

impl<K, T> Drop for QuerySlot<K, T> {
    fn drop(&mut self) {
        self.state.lock().cancel_pending();
    }
}

/// Reports one fetch's outcome to its slot exactly once. A job dropped
/// before it finished, because its queue went away, reports `QueueClosed`.
struct Completion<K: Debug, T> {
    state: Weak<Mutex<SlotState<K, T>>>,
    generation: u64,
    key: Option<K>,
}

impl<K: Debug, T> Completion<K, T> {
    fn finish(mut self, result: Result<T, FetchError>) {
        if let Some(key) = self.key.take() {
            complete(&self.state, self.generation, key, result);
        }
    }
}

impl<K: Debug, T> Drop for Completion<K, T> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            complete(&self.state, self.generation, key, Err(FetchError::QueueClosed));
        }
    }
}

fn complete<K: Debug, T>(
    state: &Weak<Mutex<SlotState<K, T>>>,
    generation: u64,
    key: K,
    result: Result<T, FetchError>,
) {
    let Some(state) = state.upgrade() else {
        trace!("query slot: dropped before fetch #{generation} for {key:?} finished");
        return;
    };
    let mut st = state.lock();
    if st.disposed || !st.pending.as_ref().is_some_and(|p| p.generation == generation) {
        trace!("query slot: discarding stale result #{generation} for {key:?}");
        return;
    }
    st.pending = None;
    match FetchOutcome::from(result) {
        FetchOutcome::Ready(data) => {
            debug!("query slot: fetch #{generation} for {key:?} ready");
            st.data = Some((key, Arc::new(data)));
            st.error = None;
        }
        FetchOutcome::Cancelled => {
            trace!("query slot: fetch #{generation} for {key:?} cancelled");
        }
        FetchOutcome::Failed(error) => {
            warn!("query slot: fetch #{generation} for {key:?} failed: {error}");
            st.error = Some((key, Arc::new(error)));
        }
    }
}
