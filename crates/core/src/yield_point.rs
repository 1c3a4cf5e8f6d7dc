//! Injected cooperative-yield capability.
//!
//! Long materializations ask a [`YieldPoint`] between chunks whether to
//! give the executor back. The core never names an event loop; hosts pick
//! the policy.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;

pub trait YieldPoint: Send + Sync {
    /// Whether the current task has run long enough to yield.
    fn should_yield(&self) -> bool;

    /// Suspend once so other tasks can run.
    fn yield_now(&self) -> BoxFuture<'static, ()> {
        YieldNow::default().boxed()
    }
}

/// Returns `Pending` exactly once, waking itself, then completes.
///
/// Works on any executor: the self-wake puts the task at the back of the
/// ready queue.
#[derive(Debug, Default)]
#[must_use = "futures do nothing unless awaited"]
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

/// Never yields. For hosts that run materialization off the UI thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverYield;

impl YieldPoint for NeverYield {
    fn should_yield(&self) -> bool {
        false
    }
}

/// Yields at every check and counts how often it did.
#[derive(Debug, Default)]
pub struct AlwaysYield {
    yields: AtomicUsize,
}

impl AlwaysYield {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn yields(&self) -> usize {
        self.yields.load(Ordering::Relaxed)
    }
}

impl YieldPoint for AlwaysYield {
    fn should_yield(&self) -> bool {
        self.yields.fetch_add(1, Ordering::Relaxed);
        true
    }
}

/// Yields once `budget` has elapsed since the last yield.
#[derive(Debug)]
pub struct FrameBudget {
    budget: Duration,
    slice_start: Mutex<Instant>,
}

impl FrameBudget {
    pub fn new(budget: Duration) -> Self {
        Self {
            budget,
            slice_start: Mutex::new(Instant::now()),
        }
    }
}

impl YieldPoint for FrameBudget {
    fn should_yield(&self) -> bool {
        let mut start = self.slice_start.lock();
        if start.elapsed() < self.budget {
            return false;
        }
        // The caller is about to yield; the next slice starts now.
        *start = Instant::now();
        true
    }
}
