use futures::FutureExt;
use futures::future::BoxFuture;
use trackfetch_protocol::{SLICE_FLAG_INCOMPLETE, SLICE_FLAG_REALTIME, SliceBuffer};

use super::{interval_end, overlaps};
use crate::engine::{FromRow, QueryError, Row};
use crate::error::FetchError;
use crate::fetcher::{FetchContext, TrackDataSource};
use crate::materialize::{BufferBuilder, materialize};
use crate::resolution::CacheKey;

/// Priorities below this are realtime.
const REALTIME_PRIORITY: i64 = 100;

/// Scheduling slices on one CPU. Each bucket keeps its longest slice, so
/// zoomed-out views stay bounded by the bucket count.
#[derive(Debug, Clone, Copy)]
pub struct CpuSliceSource {
    pub cpu: u32,
}

impl CpuSliceSource {
    pub fn new(cpu: u32) -> Self {
        Self { cpu }
    }

    fn slices_sql(&self, key: &CacheKey) -> String {
        let bucket = key.bucket_size().ns();
        format!(
            "select id, ts, dur, utid, priority from ( \
             select id, ts, dur, utid, priority, \
             row_number() over (partition by ts / {bucket} order by dur desc) as bucket_rank \
             from sched \
             where cpu = {cpu} and utid != 0 and {window} \
             ) where bucket_rank = 1 order by ts",
            cpu = self.cpu,
            window = overlaps(key.start().ns(), key.end().ns()),
        )
    }
}

struct SliceRow {
    id: i64,
    ts: i64,
    dur: i64,
    utid: i64,
    priority: i64,
}

impl FromRow for SliceRow {
    const COLUMNS: &'static [&'static str] = &["id", "ts", "dur", "utid", "priority"];

    fn from_row(row: &Row<'_>) -> Result<Self, QueryError> {
        Ok(SliceRow {
            id: row.long(0)?,
            ts: row.long(1)?,
            dur: row.long(2)?,
            utid: row.long(3)?,
            priority: row.long(4)?,
        })
    }
}

struct SliceBuilder {
    buffer: SliceBuffer,
    window_end: i64,
}

impl BufferBuilder for SliceBuilder {
    type Row = SliceRow;
    type Output = SliceBuffer;

    fn push(&mut self, row: SliceRow) {
        let mut flags = 0;
        if row.dur < 0 {
            flags |= SLICE_FLAG_INCOMPLETE;
        }
        if row.priority < REALTIME_PRIORITY {
            flags |= SLICE_FLAG_REALTIME;
        }
        let b = &mut self.buffer;
        b.last_row_id = b.last_row_id.max(row.id);
        b.ids.push(row.id);
        b.starts.push(row.ts);
        b.ends.push(interval_end(row.ts, row.dur, self.window_end));
        b.utids.push(u32::try_from(row.utid).unwrap_or_default());
        b.flags.push(flags);
    }

    fn finish(self) -> SliceBuffer {
        self.buffer
    }
}

impl TrackDataSource for CpuSliceSource {
    type Data = SliceBuffer;

    fn name(&self) -> String {
        format!("cpu{} slices", self.cpu)
    }

    fn fetch(
        &self,
        key: &CacheKey,
        ctx: FetchContext,
    ) -> BoxFuture<'static, Result<SliceBuffer, FetchError>> {
        let key = *key;
        let sql = self.slices_sql(&key);
        async move {
            ctx.token.check()?;
            let result = ctx.engine.query(&sql).await?;
            let builder = SliceBuilder {
                buffer: SliceBuffer::with_capacity(
                    key.window(),
                    key.bucket_size(),
                    result.num_rows(),
                ),
                window_end: key.end().ns(),
            };
            materialize(&result, builder, ctx.checkpoints()).await
        }
        .boxed()
    }
}
