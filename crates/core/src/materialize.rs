//! Row-to-columnar materialization with cooperative yielding.

use log::trace;
use trackfetch_protocol::ColumnarLayout;

use crate::cancel::CancellationToken;
use crate::engine::{FromRow, QueryResult};
use crate::error::FetchError;
use crate::yield_point::YieldPoint;

/// Accumulates decoded rows into a columnar buffer.
pub trait BufferBuilder: Send {
    type Row: FromRow;
    type Output: ColumnarLayout;

    fn push(&mut self, row: Self::Row);

    fn finish(self) -> Self::Output;
}

/// Where and how often a materialization stops to check in.
#[derive(Clone, Copy)]
pub struct Checkpoints<'a> {
    pub token: &'a CancellationToken,
    pub yielder: &'a dyn YieldPoint,
    /// Rows between checks. Zero is treated as one.
    pub chunk_rows: usize,
}

impl Checkpoints<'_> {
    async fn check(&self) -> Result<(), FetchError> {
        self.token.check()?;
        if self.yielder.should_yield() {
            trace!("materialize: yielding");
            self.yielder.yield_now().await;
            // Cancellation may have landed while suspended.
            self.token.check()?;
        }
        Ok(())
    }
}

/// Decode every row of `result` into `builder`.
///
/// After each `chunk_rows` rows the token is checked and the yield point
/// consulted. On cancellation the partial buffer is dropped and
/// `FetchError::Cancelled` returned; a partially built buffer never escapes.
///
/// # Panics
///
/// If the finished buffer's parallel arrays disagree in length, which is a
/// bug in the builder.
pub async fn materialize<B: BufferBuilder>(
    result: &QueryResult,
    mut builder: B,
    checkpoints: Checkpoints<'_>,
) -> Result<B::Output, FetchError> {
    checkpoints.token.check()?;
    let chunk = checkpoints.chunk_rows.max(1);
    for (i, row) in result.iter::<B::Row>()?.enumerate() {
        builder.push(row?);
        if (i + 1) % chunk == 0 {
            checkpoints.check().await?;
        }
    }
    checkpoints.token.check()?;

    let output = builder.finish();
    let layout = output.check_layout();
    assert!(
        layout.is_ok(),
        "materialized buffer has mismatched columns: {layout:?}"
    );
    Ok(output)
}
