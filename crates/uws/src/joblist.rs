//! A named collection of jobs and the operations a service exposes on it.
//!
//! The list is the synchronization hub: its own lock guards the id map,
//! each job guards itself, and observers are always called with a
//! snapshot, outside every lock. Lock order is list map → executor state
//! → job; no path takes them the other way around.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use indexmap::IndexMap;

use crate::destruction::DestructionManager;
use crate::errors::UwsError;
use crate::events::{JobObserver, QuoteComputer};
use crate::executor::{ExecEntry, ExecutionManager, JobRunner};
use crate::fs::FileManager;
use crate::job::{JobPolicy, SharedJob, UwsJob, lock_job};
use crate::owner::JobOwner;
use crate::params::{
    AppliedParam, PARAM_DESTRUCTION_TIME, PARAM_EXECUTION_DURATION, PARAM_PHASE, PARAM_QUOTE,
    PARAM_RUN_ID, ParameterRegistry,
};
use crate::phase::ExecutionPhase;
use crate::scheduler::{Clock, Scheduler, TaskId};

/// How often a list sweeps for expired jobs.
const DESTRUCTION_SWEEP: Duration = Duration::from_secs(30);

/// The collaborators every job list works against.
#[derive(Clone)]
pub struct JobListServices {
    pub executor: Arc<ExecutionManager>,
    pub scheduler: Arc<Scheduler>,
    pub clock: Arc<dyn Clock>,
    pub file_manager: Arc<dyn FileManager>,
}

pub struct JobList {
    name: String,
    policy: JobPolicy,
    registry: ParameterRegistry,
    runner: Arc<dyn JobRunner>,
    services: JobListServices,
    jobs: Mutex<IndexMap<String, SharedJob>>,
    observers: Mutex<Vec<Arc<dyn JobObserver>>>,
    quote_computer: Mutex<Option<Arc<dyn QuoteComputer>>>,
    destruction: DestructionManager,
    self_weak: Weak<JobList>,
    sweep_task: TaskId,
}

impl JobList {
    pub fn create(
        name: impl Into<String>,
        policy: JobPolicy,
        registry: ParameterRegistry,
        runner: Arc<dyn JobRunner>,
        services: JobListServices,
    ) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|weak: &Weak<JobList>| {
            let sweeper = weak.clone();
            let sweep_task = services.scheduler.schedule_every(DESTRUCTION_SWEEP, move || {
                if let Some(list) = sweeper.upgrade() {
                    list.purge_expired();
                }
            });
            JobList {
                name,
                policy,
                registry,
                runner,
                services,
                jobs: Mutex::new(IndexMap::new()),
                observers: Mutex::new(Vec::new()),
                quote_computer: Mutex::new(None),
                destruction: DestructionManager::new(),
                self_weak: weak.clone(),
                sweep_task,
            }
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &JobPolicy {
        &self.policy
    }

    pub fn len(&self) -> usize {
        self.lock_jobs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_jobs().is_empty()
    }

    fn lock_jobs(&self) -> std::sync::MutexGuard<'_, IndexMap<String, SharedJob>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_observer(&self, observer: Arc<dyn JobObserver>) {
        self.observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(observer);
    }

    pub fn set_quote_computer(&self, computer: Arc<dyn QuoteComputer>) {
        *self
            .quote_computer
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(computer);
    }

    fn observers_snapshot(&self) -> Vec<Arc<dyn JobObserver>> {
        self.observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    // ---- job creation and lookup ------------------------------------

    /// Validate the inputs and add a new `PENDING` job. `PHASE=RUN`
    /// among the inputs admits the job right away.
    pub fn create_job(
        &self,
        inputs: &[(String, String)],
        owner: Option<&JobOwner>,
    ) -> Result<String, UwsError> {
        // Expired jobs go before any new work is admitted.
        self.purge_expired();
        let now = self.services.clock.now();
        let id = uuid::Uuid::new_v4().simple().to_string();
        let mut job = UwsJob::new(&id, owner.map(|o| o.id.clone()), now);
        job.execution_duration = self.policy.default_execution_duration;
        if self.policy.default_destruction_interval > 0 {
            job.destruction_time =
                Some(now + chrono::Duration::seconds(self.policy.default_destruction_interval as i64));
        }

        let mut run = false;
        for (name, raw) in inputs {
            match self
                .registry
                .apply(&mut job, name, raw, &self.policy, now, true)?
            {
                AppliedParam::Stored => {}
                AppliedParam::Run => run = true,
                // ABORT at creation leaves a job that never runs.
                AppliedParam::Abort => {
                    job.set_phase(ExecutionPhase::Aborted)?;
                }
            }
        }

        // Controller defaults for whatever the input left unset. The
        // reserved names live as job fields, not map entries.
        for (name, value) in self.registry.defaults(&self.policy) {
            let reserved = matches!(
                name.as_str(),
                PARAM_PHASE
                    | PARAM_RUN_ID
                    | PARAM_EXECUTION_DURATION
                    | PARAM_DESTRUCTION_TIME
                    | PARAM_QUOTE
            );
            if !reserved && job.params.get(&name).is_none() {
                job.params.set(&name, value);
            }
        }

        let quote_computer = self
            .quote_computer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(computer) = quote_computer {
            job.quote = computer.quote(&job);
        }

        let destruction_time = job.destruction_time;
        let snapshot = job.clone();
        let shared: SharedJob = Arc::new(Mutex::new(job));
        self.lock_jobs().insert(id.clone(), Arc::clone(&shared));
        if let Some(at) = destruction_time {
            self.destruction.schedule(&id, at);
        }

        for observer in self.observers_snapshot() {
            observer.job_created(&self.name, &snapshot);
        }

        if run {
            self.start_shared(&id, &shared)?;
        }
        Ok(id)
    }

    pub fn get(&self, id: &str) -> Option<SharedJob> {
        self.lock_jobs().get(id).cloned()
    }

    /// Ids in creation order, optionally narrowed to one owner.
    pub fn job_ids(&self, owner: Option<&str>) -> Vec<String> {
        self.lock_jobs()
            .iter()
            .filter(|(_, job)| match owner {
                None => true,
                Some(owner) => lock_job(job).owner.as_deref() == Some(owner),
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Clone every job, for backups and service views.
    pub fn jobs_snapshot(&self) -> Vec<UwsJob> {
        let shared: Vec<SharedJob> = self.lock_jobs().values().cloned().collect();
        shared.iter().map(|job| lock_job(job).clone()).collect()
    }

    // ---- parameter updates and phase verbs --------------------------

    pub fn update_parameter(&self, id: &str, name: &str, raw: &str) -> Result<(), UwsError> {
        self.purge_expired();
        let shared = self.get(id).ok_or_else(|| UwsError::JobNotFound {
            id: id.to_string(),
        })?;
        let now = self.services.clock.now();

        let (applied, snapshot) = {
            let mut job = lock_job(&shared);
            let applied = self
                .registry
                .apply(&mut job, name, raw, &self.policy, now, false)?;
            (applied, job.clone())
        };

        match applied {
            AppliedParam::Stored => {
                if name.eq_ignore_ascii_case(PARAM_DESTRUCTION_TIME) {
                    if let Some(at) = snapshot.destruction_time {
                        self.destruction.schedule(id, at);
                    }
                }
                for observer in self.observers_snapshot() {
                    observer.params_changed(&self.name, &snapshot);
                }
                Ok(())
            }
            AppliedParam::Run => self.start_shared(id, &shared),
            AppliedParam::Abort => self.abort_job(id),
        }
    }

    /// Admit a pending or held job for execution.
    pub fn start_job(&self, id: &str) -> Result<(), UwsError> {
        let shared = self.get(id).ok_or_else(|| UwsError::JobNotFound {
            id: id.to_string(),
        })?;
        self.start_shared(id, &shared)
    }

    fn start_shared(&self, id: &str, shared: &SharedJob) -> Result<(), UwsError> {
        let before = lock_job(shared).phase();
        self.services.executor.launch(ExecEntry {
            id: id.to_string(),
            job: Arc::clone(shared),
            runner: Arc::clone(&self.runner),
            list: self.self_weak.clone(),
        })?;
        let snapshot = lock_job(shared).clone();
        if snapshot.phase() != before {
            self.notify_phase_changed(&snapshot, before);
        }
        Ok(())
    }

    /// Abort a job: dequeue it, or signal its worker. Queued jobs never
    /// reach `EXECUTING`.
    pub fn abort_job(&self, id: &str) -> Result<(), UwsError> {
        let shared = self.get(id).ok_or_else(|| UwsError::JobNotFound {
            id: id.to_string(),
        })?;
        let before = lock_job(&shared).phase();
        self.services.executor.abort(&shared, id)?;
        let snapshot = lock_job(&shared).clone();
        if snapshot.phase() != before {
            self.notify_phase_changed(&snapshot, before);
        }
        Ok(())
    }

    // ---- destruction ------------------------------------------------

    /// Remove a job: abort it if active, release its files, notify.
    pub fn destroy_job(&self, id: &str) -> Result<bool, UwsError> {
        let Some(shared) = self.lock_jobs().shift_remove(id) else {
            return Ok(false);
        };
        if lock_job(&shared).phase().is_active() {
            let _unused = self.services.executor.abort(&shared, id);
        }
        if let Err(err) = self.services.file_manager.delete_job_files(id) {
            log::warn!(
                target: "uws::joblist",
                "could not delete the files of job {id}: {err}"
            );
        }
        let snapshot = lock_job(&shared).clone();
        for observer in self.observers_snapshot() {
            observer.job_destroyed(&self.name, &snapshot);
        }
        Ok(true)
    }

    /// Destroy (or archive) every job whose destruction time has passed.
    /// Runs on the shared scheduler and after user actions.
    pub fn purge_expired(&self) {
        let now = self.services.clock.now();
        let due = self.destruction.due(now, |id| {
            self.get(id).map(|job| lock_job(&job).destruction_time)
        });
        for id in due {
            if self.policy.archive_on_destruction {
                self.archive_job(&id);
            } else if let Err(err) = self.destroy_job(&id) {
                log::warn!(target: "uws::joblist", "could not destroy job {id}: {err}");
            }
        }
    }

    /// Strip a job down to its record and mark it `ARCHIVED`.
    fn archive_job(&self, id: &str) {
        let Some(shared) = self.get(id) else {
            return;
        };
        // A job that never finished (pending, held, queued or running) is
        // aborted first, so the archive transition leaves from a settled
        // phase.
        if !lock_job(&shared).is_terminal() {
            if let Err(err) = self.services.executor.abort(&shared, id) {
                log::warn!(
                    target: "uws::joblist",
                    "could not abort job {id} before archiving: {err}"
                );
            }
        }
        if let Err(err) = self.services.file_manager.delete_job_files(id) {
            log::warn!(
                target: "uws::joblist",
                "could not delete the files of job {id}: {err}"
            );
        }
        let notification = {
            let mut job = lock_job(&shared);
            let before = job.phase();
            job.results.clear();
            match job.set_phase(ExecutionPhase::Archived) {
                Ok(()) => Some((job.clone(), before)),
                Err(err) => {
                    log::warn!(target: "uws::joblist", "could not archive job {id}: {err}");
                    None
                }
            }
        };
        if let Some((snapshot, before)) = notification {
            self.notify_phase_changed(&snapshot, before);
        }
    }

    /// Put a job back as restored from a backup. No validation, no
    /// events; the restore path already decided what the job looks like.
    pub fn restore_job(&self, job: UwsJob) -> bool {
        let mut jobs = self.lock_jobs();
        if jobs.contains_key(&job.id) {
            return false;
        }
        let id = job.id.clone();
        let destruction_time = job.destruction_time;
        jobs.insert(id.clone(), Arc::new(Mutex::new(job)));
        drop(jobs);
        if let Some(at) = destruction_time {
            self.destruction.schedule(&id, at);
        }
        true
    }

    pub(crate) fn notify_phase_changed(&self, job: &UwsJob, before: ExecutionPhase) {
        for observer in self.observers_snapshot() {
            observer.phase_changed(&self.name, job, before);
        }
    }
}

impl Drop for JobList {
    fn drop(&mut self) {
        self.services.scheduler.cancel(self.sweep_task);
    }
}
