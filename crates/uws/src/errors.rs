use thiserror::Error;

use crate::phase::ExecutionPhase;

#[derive(Debug, Error)]
pub enum UwsError {
    #[error("no job \"{id}\" in this list")]
    JobNotFound { id: String },

    #[error("the job is {from} and cannot become {to}")]
    PhaseInvalid {
        from: ExecutionPhase,
        to: ExecutionPhase,
    },

    #[error("parameter \"{name}\" rejected: {reason}")]
    ParamRejected { name: String, reason: String },

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("backup I/O failure")]
    BackupIo(#[from] std::io::Error),

    #[error("backup encoding failure")]
    BackupEncode(#[from] serde_json::Error),

    #[error("malformed backup document: {0}")]
    BackupFormat(String),
}

impl UwsError {
    pub fn param_rejected(name: impl Into<String>, reason: impl Into<String>) -> Self {
        UwsError::ParamRejected {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
