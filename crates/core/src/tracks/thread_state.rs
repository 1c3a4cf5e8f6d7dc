use futures::FutureExt;
use futures::future::BoxFuture;
use trackfetch_protocol::{StrInterner, ThreadStateBuffer};

use super::{interval_end, overlaps};
use crate::engine::{FromRow, QueryError, Row};
use crate::error::FetchError;
use crate::fetcher::{FetchContext, TrackDataSource};
use crate::materialize::{BufferBuilder, materialize};
use crate::resolution::CacheKey;

/// Human-readable name for a kernel thread state code.
///
/// Unknown codes are passed through unchanged.
pub fn state_label(code: &str) -> &str {
    match code {
        "Running" => "Running",
        "R" => "Runnable",
        "R+" => "Runnable (Preempted)",
        "S" => "Sleeping",
        "D" => "Uninterruptible Sleep",
        "T" => "Stopped",
        "t" => "Traced",
        "X" => "Exit (Dead)",
        "Z" => "Exit (Zombie)",
        "x" => "Task Dead",
        "I" => "Idle",
        "K" => "Wake Kill",
        "W" => "Waking",
        "P" => "Parked",
        "N" => "No Load",
        other => other,
    }
}

/// Scheduling states of one thread, longest state per bucket.
#[derive(Debug, Clone, Copy)]
pub struct ThreadStateSource {
    pub utid: u32,
}

impl ThreadStateSource {
    pub fn new(utid: u32) -> Self {
        Self { utid }
    }

    fn states_sql(&self, key: &CacheKey) -> String {
        let bucket = key.bucket_size().ns();
        format!(
            "select id, ts, dur, state, cpu from ( \
             select id, ts, dur, state, cpu, \
             row_number() over (partition by ts / {bucket} order by dur desc) as bucket_rank \
             from thread_state \
             where utid = {utid} and {window} \
             ) where bucket_rank = 1 order by ts",
            utid = self.utid,
            window = overlaps(key.start().ns(), key.end().ns()),
        )
    }
}

struct StateRow {
    id: i64,
    ts: i64,
    dur: i64,
    state: String,
    cpu: Option<i64>,
}

impl FromRow for StateRow {
    const COLUMNS: &'static [&'static str] = &["id", "ts", "dur", "state", "cpu"];

    fn from_row(row: &Row<'_>) -> Result<Self, QueryError> {
        Ok(StateRow {
            id: row.long(0)?,
            ts: row.long(1)?,
            dur: row.long(2)?,
            state: row.string(3)?.to_owned(),
            cpu: row.opt_long(4)?,
        })
    }
}

struct StateBuilder {
    buffer: ThreadStateBuffer,
    labels: StrInterner,
    window_end: i64,
}

impl BufferBuilder for StateBuilder {
    type Row = StateRow;
    type Output = ThreadStateBuffer;

    fn push(&mut self, row: StateRow) {
        let b = &mut self.buffer;
        b.ids.push(row.id);
        b.starts.push(row.ts);
        b.ends.push(interval_end(row.ts, row.dur, self.window_end));
        b.states.push(self.labels.intern(state_label(&row.state)));
        b.cpus.push(row.cpu.and_then(|c| u32::try_from(c).ok()));
    }

    fn finish(self) -> ThreadStateBuffer {
        self.buffer
    }
}

impl TrackDataSource for ThreadStateSource {
    type Data = ThreadStateBuffer;

    fn name(&self) -> String {
        format!("utid{} states", self.utid)
    }

    fn fetch(
        &self,
        key: &CacheKey,
        ctx: FetchContext,
    ) -> BoxFuture<'static, Result<ThreadStateBuffer, FetchError>> {
        let key = *key;
        let sql = self.states_sql(&key);
        async move {
            ctx.token.check()?;
            let result = ctx.engine.query(&sql).await?;
            let builder = StateBuilder {
                buffer: ThreadStateBuffer::with_capacity(
                    key.window(),
                    key.bucket_size(),
                    result.num_rows(),
                ),
                labels: StrInterner::new(),
                window_end: key.end().ns(),
            };
            materialize(&result, builder, ctx.checkpoints()).await
        }
        .boxed()
    }
}
