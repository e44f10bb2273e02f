use thiserror::Error;

use crate::backend::BackendError;
use skyql_adql::errors::{CheckError, ParseError};
use skyql_dialects::TranslateError;
use skyql_uws::UwsError;

#[derive(Debug, Error)]
pub enum TapError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Check(#[from] CheckError),

    #[error(transparent)]
    Translate(#[from] TranslateError),

    #[error(transparent)]
    Job(#[from] UwsError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("bad upload: {0}")]
    Upload(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
