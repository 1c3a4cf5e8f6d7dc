//! The query-engine boundary.
//!
//! The pipeline treats the engine as an opaque capability: it sends SQL
//! text and gets back a fully buffered [`QueryResult`]. Rows are decoded
//! through [`FromRow`] descriptors whose column list is fixed at compile
//! time, so a result is checked against the expected schema once, not on
//! every row.

pub mod scoped;

use std::marker::PhantomData;

use futures::future::BoxFuture;
use thiserror::Error;

pub use scoped::{ScopedKind, ScopedTable, with_scoped_table};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryError {
    /// The engine rejected or failed the query.
    #[error("engine error: {0}")]
    Engine(String),
    #[error("result has no column `{0}`")]
    MissingColumn(&'static str),
    #[error("column `{column}`: expected {expected}, found {found}")]
    TypeMismatch {
        column: &'static str,
        expected: &'static str,
        found: &'static str,
    },
    #[error("query returned no rows")]
    NoRows,
    /// A row had fewer cells than the result has columns.
    #[error("row has {width} cells, none for column `{column}`")]
    ShortRow { column: &'static str, width: usize },
}

/// Something that can run SQL.
///
/// Implementations must be safe to call from independent tracks
/// concurrently. The returned future owns everything it needs.
pub trait Engine: Send + Sync + 'static {
    fn query(&self, sql: &str) -> BoxFuture<'static, Result<QueryResult, QueryError>>;
}

/// A single cell.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Long(i64),
    Double(f64),
    Str(String),
}

impl SqlValue {
    fn type_name(&self) -> &'static str {
        match self {
            SqlValue::Null => "null",
            SqlValue::Long(_) => "long",
            SqlValue::Double(_) => "double",
            SqlValue::Str(_) => "string",
        }
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Long(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Double(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Str(v.to_owned())
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(SqlValue::Null, Into::into)
    }
}

/// A complete query result: column names plus row-major cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    columns: Vec<String>,
    rows: Vec<Vec<SqlValue>>,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<SqlValue>>) -> Self {
        Self { columns, rows }
    }

    /// A result with no columns and no rows (DDL statements).
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Typed iterator over the rows. Fails if a column `R` needs is absent.
    pub fn iter<R: FromRow>(&self) -> Result<RowIter<'_, R>, QueryError> {
        let mut positions = Vec::with_capacity(R::COLUMNS.len());
        for &name in R::COLUMNS {
            let pos = self
                .columns
                .iter()
                .position(|c| c == name)
                .ok_or(QueryError::MissingColumn(name))?;
            positions.push(pos);
        }
        Ok(RowIter {
            result: self,
            positions,
            next: 0,
            _row: PhantomData,
        })
    }

    pub fn first_row<R: FromRow>(&self) -> Result<R, QueryError> {
        self.maybe_first_row()?.ok_or(QueryError::NoRows)
    }

    pub fn maybe_first_row<R: FromRow>(&self) -> Result<Option<R>, QueryError> {
        self.iter::<R>()?.next().transpose()
    }
}

/// A row descriptor: the columns it reads, in order, and how to decode them.
pub trait FromRow: Sized {
    const COLUMNS: &'static [&'static str];

    /// Decode one row. `row.long(i)` etc. index into `COLUMNS`.
    fn from_row(row: &Row<'_>) -> Result<Self, QueryError>;
}

/// One row, viewed through a descriptor's column order.
pub struct Row<'a> {
    cells: &'a [SqlValue],
    positions: &'a [usize],
    names: &'static [&'static str],
}

impl Row<'_> {
    fn name(&self, i: usize) -> &'static str {
        self.names.get(i).copied().unwrap_or("?")
    }

    fn cell(&self, i: usize) -> Result<&SqlValue, QueryError> {
        self.positions
            .get(i)
            .and_then(|&pos| self.cells.get(pos))
            .ok_or_else(|| QueryError::ShortRow {
                column: self.name(i),
                width: self.cells.len(),
            })
    }

    fn mismatch(&self, i: usize, expected: &'static str, found: &SqlValue) -> QueryError {
        QueryError::TypeMismatch {
            column: self.name(i),
            expected,
            found: found.type_name(),
        }
    }

    pub fn long(&self, i: usize) -> Result<i64, QueryError> {
        match self.cell(i)? {
            SqlValue::Long(v) => Ok(*v),
            other => Err(self.mismatch(i, "long", other)),
        }
    }

    pub fn opt_long(&self, i: usize) -> Result<Option<i64>, QueryError> {
        match self.cell(i)? {
            SqlValue::Null => Ok(None),
            SqlValue::Long(v) => Ok(Some(*v)),
            other => Err(self.mismatch(i, "long or null", other)),
        }
    }

    /// Longs widen to doubles; aggregates over integer columns come back as
    /// either depending on the engine.
    pub fn double(&self, i: usize) -> Result<f64, QueryError> {
        match self.cell(i)? {
            SqlValue::Double(v) => Ok(*v),
            SqlValue::Long(v) => Ok(*v as f64),
            other => Err(self.mismatch(i, "double", other)),
        }
    }

    pub fn opt_double(&self, i: usize) -> Result<Option<f64>, QueryError> {
        match self.cell(i)? {
            SqlValue::Null => Ok(None),
            _ => self.double(i).map(Some),
        }
    }

    pub fn string(&self, i: usize) -> Result<&str, QueryError> {
        match self.cell(i)? {
            SqlValue::Str(s) => Ok(s),
            other => Err(self.mismatch(i, "string", other)),
        }
    }

    pub fn opt_string(&self, i: usize) -> Result<Option<&str>, QueryError> {
        match self.cell(i)? {
            SqlValue::Null => Ok(None),
            SqlValue::Str(s) => Ok(Some(s)),
            other => Err(self.mismatch(i, "string or null", other)),
        }
    }
}

/// Iterator returned by [`QueryResult::iter`].
pub struct RowIter<'a, R> {
    result: &'a QueryResult,
    positions: Vec<usize>,
    next: usize,
    _row: PhantomData<fn() -> R>,
}

impl<R: FromRow> Iterator for RowIter<'_, R> {
    type Item = Result<R, QueryError>;

    fn next(&mut self) -> Option<Self::Item> {
        let cells = self.result.rows.get(self.next)?;
        self.next += 1;
        let row = Row {
            cells,
            positions: &self.positions,
            names: R::COLUMNS,
        };
        Some(R::from_row(&row))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.result.rows.len() - self.next;
        (left, Some(left))
    }
}
