use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::errors::UwsError;
use crate::params::UwsParameters;
use crate::phase::ExecutionPhase;

/// A job as shared between the API side, the worker executing it, and the
/// background managers. All mutation happens under the mutex; phase
/// transitions are validated so observers can only ever see states of the
/// phase machine.
pub type SharedJob = Arc<Mutex<UwsJob>>;

/// Lock a shared job, riding over poisoning: a panicking worker must not
/// wedge the whole list.
pub fn lock_job(job: &SharedJob) -> std::sync::MutexGuard<'_, UwsJob> {
    job.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Pointer to one product of a completed job. The bytes themselves live
/// with the file manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult {
    pub id: String,
    pub mime_type: Option<String>,
    pub href: Option<String>,
    pub size: Option<u64>,
    /// Whether `href` points outside the service and the job view should
    /// redirect rather than stream.
    pub redirect: bool,
}

impl JobResult {
    pub fn new(id: impl Into<String>) -> Self {
        JobResult {
            id: id.into(),
            mime_type: None,
            href: None,
            size: None,
            redirect: false,
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Display,
    AsRefStr,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
#[serde(rename_all = "UPPERCASE")]
pub enum ErrorKind {
    /// The job failed for good; retrying the same input will fail again.
    Fatal,
    /// The failure may not recur (timeout, connection loss).
    Transient,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorSummary {
    pub kind: ErrorKind,
    pub message: String,
    pub details_href: Option<String>,
    pub http_status: u16,
}

impl ErrorSummary {
    pub fn fatal(message: impl Into<String>) -> Self {
        ErrorSummary {
            kind: ErrorKind::Fatal,
            message: message.into(),
            details_href: None,
            http_status: 500,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        ErrorSummary {
            kind: ErrorKind::Transient,
            message: message.into(),
            details_href: None,
            http_status: 500,
        }
    }
}

/// Service limits applied to every job of a list. Zero always means
/// "no limit".
#[derive(Debug, Clone, Copy, Default)]
pub struct JobPolicy {
    /// Seconds a job may execute when it does not ask for a duration.
    pub default_execution_duration: u64,
    /// Hard cap on the execution duration a user may request.
    pub max_execution_duration: u64,
    /// Seconds from creation to destruction when the user sets none.
    pub default_destruction_interval: u64,
    /// Hard cap on how far in the future a destruction time may lie.
    pub max_destruction_interval: u64,
    /// At destruction time, archive the job (strip its files, keep the
    /// record) instead of removing it.
    pub archive_on_destruction: bool,
}

#[derive(Debug, Clone)]
pub struct UwsJob {
    pub id: String,
    pub run_id: Option<String>,
    /// Owner id; `None` for anonymous jobs.
    pub owner: Option<String>,
    pub created_at: DateTime<Utc>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    phase: ExecutionPhase,
    /// Seconds; `0` = unbounded.
    pub execution_duration: u64,
    /// `None` = never destroyed automatically.
    pub destruction_time: Option<DateTime<Utc>>,
    /// Estimated seconds to completion, when the service can guess.
    pub quote: Option<u64>,
    pub params: UwsParameters,
    pub results: Vec<JobResult>,
    pub error: Option<ErrorSummary>,
    /// Opaque payload attached by the client, persisted verbatim.
    pub job_info: Option<Vec<u8>>,
}

impl UwsJob {
    pub fn new(id: impl Into<String>, owner: Option<String>, now: DateTime<Utc>) -> Self {
        UwsJob {
            id: id.into(),
            run_id: None,
            owner,
            created_at: now,
            start_at: None,
            end_at: None,
            phase: ExecutionPhase::Pending,
            execution_duration: 0,
            destruction_time: None,
            quote: None,
            params: UwsParameters::default(),
            results: Vec::new(),
            error: None,
            job_info: None,
        }
    }

    pub fn phase(&self) -> ExecutionPhase {
        self.phase
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Move to `to` if the phase machine allows it.
    pub fn set_phase(&mut self, to: ExecutionPhase) -> Result<(), UwsError> {
        if !self.phase.can_transition_to(to) {
            return Err(UwsError::PhaseInvalid {
                from: self.phase,
                to,
            });
        }
        self.phase = to;
        Ok(())
    }

    /// Set the phase without consulting the machine. Reserved for restore
    /// paths that rebuild historical state.
    pub(crate) fn force_phase(&mut self, to: ExecutionPhase) {
        self.phase = to;
    }

    pub fn add_result(&mut self, result: JobResult) {
        self.results.push(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_transitions_are_validated() {
        let mut job = UwsJob::new("j1", None, Utc::now());
        assert_eq!(job.phase(), ExecutionPhase::Pending);

        job.set_phase(ExecutionPhase::Queued).unwrap();
        job.set_phase(ExecutionPhase::Executing).unwrap();
        job.set_phase(ExecutionPhase::Completed).unwrap();

        let err = job.set_phase(ExecutionPhase::Executing).unwrap_err();
        assert!(matches!(
            err,
            UwsError::PhaseInvalid {
                from: ExecutionPhase::Completed,
                to: ExecutionPhase::Executing,
            }
        ));
        assert!(job.is_terminal());
        job.set_phase(ExecutionPhase::Archived).unwrap();
    }
}
