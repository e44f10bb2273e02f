//! Table-access service core, tying the query pipeline to the job
//! runtime: published metadata, query job parameters, upload lifecycle,
//! and the runner that takes a job from ADQL text to a stored result.

pub mod backend;
pub mod errors;
pub mod metadata;
pub mod params;
pub mod query;
pub mod service;
pub mod upload;

pub use backend::{
    BackendError, CappedStream, QueryBackend, ResultSerializer, Row, RowStream, TapValue,
};
pub use errors::TapError;
pub use query::AdqlRunner;
pub use service::{ASYNC_LIST, TapService, TapServiceBuilder};
pub use upload::{UPLOAD_SCHEMA, UploadReader, UploadedTable};
