//! Bounded, FIFO job execution on worker threads.
//!
//! One worker thread per running job; arrivals beyond `max_running` wait
//! in a FIFO queue in the `QUEUED` phase and are dispatched as slots free
//! up. Cancellation is cooperative: aborting flips the phase first and
//! then signals the worker through its [`CancelToken`], which well-behaved
//! runners consult at every I/O boundary.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use ahash::AHashMap;

use crate::errors::UwsError;
use crate::job::{ErrorSummary, JobResult, SharedJob, lock_job};
use crate::joblist::JobList;
use crate::phase::ExecutionPhase;
use crate::scheduler::{Clock, Scheduler, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    /// A user asked for the job to be aborted.
    User,
    /// The execution duration ran out.
    Timeout,
}

/// Signal delivered to a worker when its job must stop.
#[derive(Debug, Default)]
pub struct CancelToken {
    cancelled: AtomicBool,
    cause: Mutex<Option<CancelCause>>,
}

/// Returned by [`CancelToken::check`] when the job should stop; runners
/// unwind to their cleanup path on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupted;

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the cancellation. The first cause wins.
    pub fn cancel(&self, cause: CancelCause) {
        let mut stored = self.cause.lock().unwrap_or_else(|e| e.into_inner());
        if stored.is_none() {
            *stored = Some(cause);
        }
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn cause(&self) -> Option<CancelCause> {
        *self.cause.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Cooperative checkpoint.
    pub fn check(&self) -> Result<(), Interrupted> {
        if self.is_cancelled() {
            Err(Interrupted)
        } else {
            Ok(())
        }
    }
}

/// The work a job performs once it gets a slot. Implementations must call
/// [`CancelToken::check`] at their I/O round trips and between pipeline
/// stages.
pub trait JobRunner: Send + Sync {
    fn run(&self, job: &SharedJob, cancel: &CancelToken) -> Result<Vec<JobResult>, ErrorSummary>;
}

/// Everything the executor needs to run one job.
pub(crate) struct ExecEntry {
    pub(crate) id: String,
    pub(crate) job: SharedJob,
    pub(crate) runner: Arc<dyn JobRunner>,
    pub(crate) list: Weak<JobList>,
}

struct ExecState {
    queue: VecDeque<ExecEntry>,
    running: AHashMap<String, Arc<CancelToken>>,
}

pub struct ExecutionManager {
    /// `0` = unlimited.
    max_running: usize,
    state: Mutex<ExecState>,
    scheduler: Arc<Scheduler>,
    clock: Arc<dyn Clock>,
}

impl ExecutionManager {
    pub fn new(max_running: usize, scheduler: Arc<Scheduler>, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(ExecutionManager {
            max_running,
            state: Mutex::new(ExecState {
                queue: VecDeque::new(),
                running: AHashMap::new(),
            }),
            scheduler,
            clock,
        })
    }

    pub fn max_running(&self) -> usize {
        self.max_running
    }

    pub fn running_count(&self) -> usize {
        self.lock_state().running.len()
    }

    pub fn queued_count(&self) -> usize {
        self.lock_state().queue.len()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ExecState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Admit a job: start it now if a slot is free, else queue it.
    pub(crate) fn launch(self: &Arc<Self>, entry: ExecEntry) -> Result<(), UwsError> {
        let mut state = self.lock_state();
        let has_slot = self.max_running == 0 || state.running.len() < self.max_running;
        if has_slot {
            self.start_locked(&mut state, entry)
        } else {
            {
                let mut job = lock_job(&entry.job);
                job.set_phase(ExecutionPhase::Queued)?;
            }
            state.queue.push_back(entry);
            Ok(())
        }
    }

    fn start_locked(self: &Arc<Self>, state: &mut ExecState, entry: ExecEntry) -> Result<(), UwsError> {
        let token = Arc::new(CancelToken::new());
        let duration = {
            let mut job = lock_job(&entry.job);
            job.set_phase(ExecutionPhase::Executing)?;
            job.start_at = Some(self.clock.now());
            job.execution_duration
        };
        state.running.insert(entry.id.clone(), Arc::clone(&token));

        let timeout_task = if duration > 0 {
            let job = Arc::clone(&entry.job);
            let timeout_token = Arc::clone(&token);
            let list = entry.list.clone();
            let clock = Arc::clone(&self.clock);
            Some(self.scheduler.schedule_after(
                Duration::from_secs(duration),
                move || on_timeout(&job, &timeout_token, &list, &*clock),
            ))
        } else {
            None
        };

        let manager = Arc::clone(self);
        let thread = std::thread::Builder::new()
            .name(format!("uws-worker-{}", entry.id))
            .spawn(move || worker_main(manager, entry, token, timeout_task));
        if let Err(err) = thread {
            log::error!(target: "uws::executor", "failed to spawn a worker thread: {err}");
            return Err(UwsError::QuotaExceeded(
                "no worker thread available".to_string(),
            ));
        }
        Ok(())
    }

    /// Abort a job wherever it currently is: drop it from the queue, or
    /// flip it to `ABORTED` and signal its worker.
    pub(crate) fn abort(&self, job: &SharedJob, id: &str) -> Result<(), UwsError> {
        let now = self.clock.now();
        let mut state = self.lock_state();

        if let Some(pos) = state.queue.iter().position(|entry| entry.id == id) {
            let entry = state.queue.remove(pos).expect("position just found");
            let mut job = lock_job(&entry.job);
            job.set_phase(ExecutionPhase::Aborted)?;
            job.end_at = Some(now);
            return Ok(());
        }

        if let Some(token) = state.running.get(id) {
            token.cancel(CancelCause::User);
            let mut job = lock_job(job);
            if !job.is_terminal() {
                job.set_phase(ExecutionPhase::Aborted)?;
                job.end_at = Some(now);
            }
            return Ok(());
        }

        let mut job = lock_job(job);
        if !job.is_terminal() {
            job.set_phase(ExecutionPhase::Aborted)?;
            job.end_at = Some(now);
        }
        Ok(())
    }

    /// Free the slot of a finished job and dispatch queue heads into the
    /// freed capacity.
    fn release(self: &Arc<Self>, id: &str) {
        let mut state = self.lock_state();
        state.running.remove(id);
        while self.max_running == 0 || state.running.len() < self.max_running {
            let Some(entry) = state.queue.pop_front() else {
                break;
            };
            // Entries aborted while waiting never execute.
            let startable = lock_job(&entry.job).phase() == ExecutionPhase::Queued;
            if !startable {
                continue;
            }
            if let Err(err) = self.start_locked(&mut state, entry) {
                log::warn!(target: "uws::executor", "failed to dispatch a queued job: {err}");
            }
        }
    }
}

fn worker_main(
    manager: Arc<ExecutionManager>,
    entry: ExecEntry,
    token: Arc<CancelToken>,
    timeout_task: Option<TaskId>,
) {
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        entry.runner.run(&entry.job, &token)
    }))
    .unwrap_or_else(|_| Err(ErrorSummary::fatal("internal error while executing the job")));

    let now = manager.clock.now();
    let notification = {
        let mut job = lock_job(&entry.job);
        let before = job.phase();
        if job.is_terminal() {
            // A cancellation or timeout already committed the final
            // phase; just make sure the end time is set.
            if job.end_at.is_none() {
                job.end_at = Some(now);
            }
            None
        } else {
            match outcome {
                Ok(results) => {
                    for result in results {
                        job.add_result(result);
                    }
                    job.set_phase(ExecutionPhase::Completed).ok();
                }
                Err(summary) => {
                    job.error = Some(summary);
                    job.set_phase(ExecutionPhase::Error).ok();
                }
            }
            job.end_at = Some(now);
            Some((job.clone(), before))
        }
    };

    if let Some(task) = timeout_task {
        manager.scheduler.cancel(task);
    }
    manager.release(&entry.id);

    if let Some((snapshot, before)) = notification {
        if let Some(list) = entry.list.upgrade() {
            list.notify_phase_changed(&snapshot, before);
        }
    }
}

fn on_timeout(job: &SharedJob, token: &CancelToken, list: &Weak<JobList>, clock: &dyn Clock) {
    let notification = {
        let mut locked = lock_job(job);
        if locked.phase() == ExecutionPhase::Executing {
            token.cancel(CancelCause::Timeout);
            locked.error = Some(ErrorSummary::transient("execution duration exceeded"));
            locked.set_phase(ExecutionPhase::Error).ok();
            locked.end_at = Some(clock.now());
            Some((locked.clone(), ExecutionPhase::Executing))
        } else {
            None
        }
    };
    if let Some((snapshot, before)) = notification {
        log::info!(
            target: "uws::executor",
            "job {} exceeded its execution duration", snapshot.id
        );
        if let Some(list) = list.upgrade() {
            list.notify_phase_changed(&snapshot, before);
        }
    }
}
