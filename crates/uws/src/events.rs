use crate::job::UwsJob;
use crate::phase::ExecutionPhase;

/// Hooks fired on the job lifecycle. Callbacks receive a snapshot taken
/// under the job lock and run outside any lock, so they may freely call
/// back into the list.
pub trait JobObserver: Send + Sync {
    fn job_created(&self, _list: &str, _job: &UwsJob) {}

    fn phase_changed(&self, _list: &str, _job: &UwsJob, _previous: ExecutionPhase) {}

    fn params_changed(&self, _list: &str, _job: &UwsJob) {}

    fn job_destroyed(&self, _list: &str, _job: &UwsJob) {}
}

/// Estimates how long a newly created job will take, in seconds. The
/// default service has no estimate.
pub trait QuoteComputer: Send + Sync {
    fn quote(&self, job: &UwsJob) -> Option<u64>;
}
