//! The collaborator traits the query pipeline drives: the database
//! backend executing translated SQL, the row stream it answers with, and
//! the serializers shaping rows into a result document.

use std::io::Write;

use skyql_adql::catalog::OutputColumn;
use skyql_uws::job::{ErrorKind, ErrorSummary};
use skyql_uws::CancelToken;
use thiserror::Error;

use crate::upload::UploadedTable;

/// One cell of a backend row.
#[derive(Debug, Clone, PartialEq)]
pub enum TapValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Bool(bool),
    Bytes(Vec<u8>),
}

impl std::fmt::Display for TapValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TapValue::Null => Ok(()),
            TapValue::Integer(v) => write!(f, "{v}"),
            TapValue::Real(v) => write!(f, "{v}"),
            TapValue::Text(v) => f.write_str(v),
            TapValue::Bool(v) => write!(f, "{v}"),
            TapValue::Bytes(v) => write!(f, "[{} bytes]", v.len()),
        }
    }
}

pub type Row = Vec<TapValue>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// May succeed on retry: connection loss, lock timeout.
    #[error("transient backend failure: {0}")]
    Transient(String),

    #[error("backend failure: {0}")]
    Fatal(String),
}

impl BackendError {
    pub fn to_summary(&self) -> ErrorSummary {
        let kind = match self {
            BackendError::Transient(_) => ErrorKind::Transient,
            BackendError::Fatal(_) => ErrorKind::Fatal,
        };
        ErrorSummary {
            kind,
            message: self.to_string(),
            details_href: None,
            http_status: 500,
        }
    }
}

/// Rows coming back from the backend, pulled one at a time so results
/// stream without buffering.
pub trait RowStream: Send {
    fn next_row(&mut self) -> Result<Option<Row>, BackendError>;
}

/// The database the service runs translated SQL against.
pub trait QueryBackend: Send + Sync {
    fn execute(&self, sql: &str, cancel: &CancelToken) -> Result<Box<dyn RowStream>, BackendError>;

    /// Materialize an uploaded table under the upload namespace before
    /// the query runs.
    fn create_upload_table(
        &self,
        schema: &str,
        table: &UploadedTable,
    ) -> Result<(), BackendError>;

    /// Drop one uploaded table. Called on every exit path of a query.
    fn drop_upload_table(&self, schema: &str, table: &str) -> Result<(), BackendError>;

    /// Optional capability probe (`"pgsphere"`, `"upload"`, …).
    fn supports(&self, _feature: &str) -> bool {
        false
    }
}

/// Shapes the row stream into a result document.
pub trait ResultSerializer: Send + Sync {
    /// Exact mime type, e.g. `text/csv`.
    fn mime_type(&self) -> &str;

    /// Short alias accepted in the format parameter, e.g. `csv`.
    fn shorthand(&self) -> &str;

    /// Serialize the whole stream, returning the number of rows written.
    /// After draining, `rows.overflowed()` tells formats with an
    /// overflow marker that the service cap cut the result short.
    fn write(
        &self,
        columns: &[OutputColumn],
        rows: &mut CappedStream,
        out: &mut dyn Write,
    ) -> Result<u64, std::io::Error>;
}

/// A stream wrapper stopping at the service cap, remembering whether the
/// backend had more rows to give.
pub struct CappedStream {
    inner: Box<dyn RowStream>,
    remaining: Option<u64>,
    overflowed: bool,
}

impl CappedStream {
    /// `cap` is the maximum number of rows to pass through; the
    /// translation already asked the backend for one row more, so one
    /// extra pull detects the overflow.
    pub fn new(inner: Box<dyn RowStream>, cap: Option<u64>) -> Self {
        CappedStream {
            inner,
            remaining: cap,
            overflowed: false,
        }
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed
    }
}

impl RowStream for CappedStream {
    fn next_row(&mut self) -> Result<Option<Row>, BackendError> {
        match self.remaining {
            Some(0) => {
                if !self.overflowed && self.inner.next_row()?.is_some() {
                    self.overflowed = true;
                }
                Ok(None)
            }
            Some(ref mut remaining) => match self.inner.next_row()? {
                Some(row) => {
                    *remaining -= 1;
                    Ok(Some(row))
                }
                None => Ok(None),
            },
            None => self.inner.next_row(),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    struct FixedRows(std::vec::IntoIter<Row>);

    impl RowStream for FixedRows {
        fn next_row(&mut self) -> Result<Option<Row>, BackendError> {
            Ok(self.0.next())
        }
    }

    fn rows(n: usize) -> Box<dyn RowStream> {
        let rows: Vec<Row> = (0..n).map(|i| vec![TapValue::Integer(i as i64)]).collect();
        Box::new(FixedRows(rows.into_iter()))
    }

    fn drain(stream: &mut CappedStream) -> usize {
        let mut count = 0;
        while stream.next_row().unwrap().is_some() {
            count += 1;
        }
        count
    }

    #[test]
    fn test_capped_stream_detects_overflow() {
        let mut stream = CappedStream::new(rows(5), Some(3));
        assert_eq!(drain(&mut stream), 3);
        assert!(stream.overflowed());
    }

    #[test]
    fn test_capped_stream_exact_fit_is_not_overflow() {
        let mut stream = CappedStream::new(rows(3), Some(3));
        assert_eq!(drain(&mut stream), 3);
        assert!(!stream.overflowed());
    }

    #[test]
    fn test_uncapped_stream_passes_through() {
        let mut stream = CappedStream::new(rows(4), None);
        assert_eq!(drain(&mut stream), 4);
        assert!(!stream.overflowed());
    }
}
