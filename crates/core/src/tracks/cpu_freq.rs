use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use log::debug;
use parking_lot::Mutex;
use trackfetch_protocol::FreqBuffer;

use crate::engine::{FromRow, QueryError, Row, ScopedKind, ScopedTable};
use crate::error::FetchError;
use crate::fetcher::{FetchContext, SetupContext, TrackDataSource};
use crate::materialize::{BufferBuilder, materialize};
use crate::resolution::CacheKey;

/// CPU frequency counter, mipmapped to min / max / last per bucket, with
/// the CPU's idle state alongside.
///
/// Setup joins the frequency and idle counters into one temporary table so
/// every fetch is a single grouped scan.
pub struct CpuFreqSource {
    pub cpu: u32,
    pub freq_track_id: i64,
    pub idle_track_id: Option<i64>,
    table: Arc<Mutex<Option<ScopedTable>>>,
}

impl CpuFreqSource {
    pub fn new(cpu: u32, freq_track_id: i64, idle_track_id: Option<i64>) -> Self {
        Self {
            cpu,
            freq_track_id,
            idle_track_id,
            table: Arc::new(Mutex::new(None)),
        }
    }

    pub fn table_name(&self) -> String {
        format!("__cpu_freq_{}", self.freq_track_id)
    }

    fn joined_counters_sql(&self) -> String {
        let freq = self.freq_track_id;
        match self.idle_track_id {
            Some(idle) => format!(
                "select freq.ts, freq.dur, cast(freq.value as int) as freq_value, \
                 idle.value as idle_value \
                 from experimental_counter_dur freq \
                 left join experimental_counter_dur idle \
                 on idle.track_id = {idle} and freq.ts >= idle.ts and freq.ts < idle.ts + idle.dur \
                 where freq.track_id = {freq}"
            ),
            None => format!(
                "select ts, dur, cast(value as int) as freq_value, null as idle_value \
                 from experimental_counter_dur where track_id = {freq}"
            ),
        }
    }

    fn buckets_sql(&self, key: &CacheKey) -> String {
        let bucket = key.bucket_size().ns();
        let (start, end) = (key.start().ns(), key.end().ns());
        format!(
            "select (ts / {bucket}) * {bucket} as bucket_ts, \
             min(freq_value) as min_value, \
             max(freq_value) as max_value, \
             value_at_max_ts(ts, freq_value) as last_value, \
             value_at_max_ts(ts, idle_value) as last_idle_value \
             from {table} \
             where ts + dur >= {start} and ts < {end} \
             group by ts / {bucket} \
             order by bucket_ts",
            table = self.table_name()
        )
    }

    fn max_value_sql(&self) -> String {
        format!("select max(freq_value) as max_value from {}", self.table_name())
    }
}

struct FreqRow {
    ts: i64,
    min_value: f64,
    max_value: f64,
    last_value: f64,
    last_idle_value: Option<i64>,
}

impl FromRow for FreqRow {
    const COLUMNS: &'static [&'static str] = &[
        "bucket_ts",
        "min_value",
        "max_value",
        "last_value",
        "last_idle_value",
    ];

    fn from_row(row: &Row<'_>) -> Result<Self, QueryError> {
        Ok(FreqRow {
            ts: row.long(0)?,
            min_value: row.double(1)?,
            max_value: row.double(2)?,
            last_value: row.double(3)?,
            last_idle_value: row.opt_long(4)?,
        })
    }
}

struct MaxFreq(Option<f64>);

impl FromRow for MaxFreq {
    const COLUMNS: &'static [&'static str] = &["max_value"];

    fn from_row(row: &Row<'_>) -> Result<Self, QueryError> {
        Ok(MaxFreq(row.opt_double(0)?))
    }
}

/// Idle states are small non-negative numbers; anything else (including the
/// "left idle" marker `0xffffffff`) means the CPU was running.
fn idle_state(value: Option<i64>) -> i8 {
    value
        .and_then(|v| i8::try_from(v).ok())
        .filter(|v| *v >= 0)
        .unwrap_or(-1)
}

struct FreqBuilder(FreqBuffer);

impl BufferBuilder for FreqBuilder {
    type Row = FreqRow;
    type Output = FreqBuffer;

    fn push(&mut self, row: FreqRow) {
        let b = &mut self.0;
        b.timestamps.push(row.ts);
        b.min_values.push(row.min_value);
        b.max_values.push(row.max_value);
        b.last_values.push(row.last_value);
        b.last_idle_values.push(idle_state(row.last_idle_value));
    }

    fn finish(self) -> FreqBuffer {
        self.0
    }
}

impl TrackDataSource for CpuFreqSource {
    type Data = FreqBuffer;

    fn name(&self) -> String {
        format!("cpu{} freq", self.cpu)
    }

    fn setup(&self, ctx: SetupContext) -> BoxFuture<'static, Result<(), FetchError>> {
        let name = self.table_name();
        let sql = self.joined_counters_sql();
        let slot = Arc::clone(&self.table);
        async move {
            let table =
                ScopedTable::create(ctx.engine.as_ref(), name, &sql, ScopedKind::Table).await?;
            debug!("created {}", table.name());
            *slot.lock() = Some(table);
            Ok(())
        }
        .boxed()
    }

    fn fetch(
        &self,
        key: &CacheKey,
        ctx: FetchContext,
    ) -> BoxFuture<'static, Result<FreqBuffer, FetchError>> {
        // Bucket timestamps are computed with integer division.
        assert!(
            key.bucket_size().is_power_of_two(),
            "bucket size must be a power of two"
        );
        let key = *key;
        let buckets_sql = self.buckets_sql(&key);
        let max_sql = self.max_value_sql();
        async move {
            ctx.token.check()?;
            let max_value = ctx
                .engine
                .query(&max_sql)
                .await?
                .maybe_first_row::<MaxFreq>()?
                .and_then(|m| m.0)
                .unwrap_or(0.0);
            ctx.token.check()?;

            let result = ctx.engine.query(&buckets_sql).await?;
            let mut buffer =
                FreqBuffer::with_capacity(key.window(), key.bucket_size(), result.num_rows());
            buffer.max_value = max_value;
            materialize(&result, FreqBuilder(buffer), ctx.checkpoints()).await
        }
        .boxed()
    }

    fn teardown(&self, ctx: SetupContext) -> BoxFuture<'static, Result<(), FetchError>> {
        let slot = Arc::clone(&self.table);
        async move {
            // Setup may still be ahead of us in the queue.
            let table = slot.lock().take();
            if let Some(table) = table {
                table.dispose(ctx.engine.as_ref()).await?;
            }
            Ok(())
        }
        .boxed()
    }
}
