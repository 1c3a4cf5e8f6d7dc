//! Temporary engine objects with a guaranteed teardown.

use std::future::Future;

use log::warn;

use super::{Engine, QueryError};

/// What kind of object a [`ScopedTable`] created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopedKind {
    /// Materialized once at creation.
    Table,
    /// Re-evaluated on every read.
    View,
}

impl ScopedKind {
    fn keyword(self) -> &'static str {
        match self {
            ScopedKind::Table => "table",
            ScopedKind::View => "view",
        }
    }
}

/// A temporary table or view owned by one track.
///
/// Dropping the handle does not drop the engine object (that needs an
/// await); call [`ScopedTable::dispose`] or use [`with_scoped_table`].
#[derive(Debug)]
#[must_use = "scoped tables must be disposed"]
pub struct ScopedTable {
    name: String,
    kind: ScopedKind,
}

impl ScopedTable {
    pub async fn create(
        engine: &dyn Engine,
        name: impl Into<String>,
        select_sql: &str,
        kind: ScopedKind,
    ) -> Result<Self, QueryError> {
        let name = name.into();
        engine
            .query(&create_sql(&name, select_sql, kind))
            .await?;
        Ok(Self { name, kind })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn dispose(self, engine: &dyn Engine) -> Result<(), QueryError> {
        engine.query(&drop_sql(&self.name, self.kind)).await?;
        Ok(())
    }
}

pub(crate) fn create_sql(name: &str, select_sql: &str, kind: ScopedKind) -> String {
    format!(
        "create perfetto {} {name} as {select_sql}",
        kind.keyword()
    )
}

pub(crate) fn drop_sql(name: &str, kind: ScopedKind) -> String {
    format!("drop perfetto {} {name}", kind.keyword())
}

/// Create a temporary object, run `body` against its name, then drop it.
///
/// The object is dropped whether `body` succeeds, fails, or reports
/// cancellation. A failing drop is logged; the body's outcome wins.
pub async fn with_scoped_table<T, E, F, Fut>(
    engine: &dyn Engine,
    name: &str,
    select_sql: &str,
    kind: ScopedKind,
    body: F,
) -> Result<T, E>
where
    E: From<QueryError>,
    F: FnOnce(String) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let table = ScopedTable::create(engine, name, select_sql, kind).await?;
    let outcome = body(table.name().to_owned()).await;
    if let Err(e) = table.dispose(engine).await {
        warn!("failed to drop temporary {} {name}: {e}", kind.keyword());
    }
    outcome
}
