//! End-to-end exercises of the job runtime: admission and backpressure,
//! abort and timeout, destruction, and backup round-trips.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use skyql_uws::{
    BackupFrequency, BackupManager, BackupMode, CancelToken, Clock, ErrorKind, ErrorSummary,
    ExecutionManager, ExecutionPhase, JobList, JobListServices, JobObserver, JobOwner, JobPolicy,
    JobResult, JobRunner, LocalFileManager, ManualClock, ParameterRegistry, Scheduler, SharedJob,
    SystemClock, UploadFile, UwsJob, lock_job,
};

/// A runner that sleeps in small cancellable slices and records which
/// jobs actually executed.
struct SleepRunner {
    sleep: Duration,
    executed: Mutex<Vec<String>>,
}

impl SleepRunner {
    fn new(sleep: Duration) -> Arc<Self> {
        Arc::new(SleepRunner {
            sleep,
            executed: Mutex::new(Vec::new()),
        })
    }

    fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

impl JobRunner for SleepRunner {
    fn run(&self, job: &SharedJob, cancel: &CancelToken) -> Result<Vec<JobResult>, ErrorSummary> {
        let id = lock_job(job).id.clone();
        self.executed.lock().unwrap().push(id.clone());

        let slices = (self.sleep.as_millis() / 10).max(1) as u64;
        for _ in 0..slices {
            if cancel.check().is_err() {
                return Err(ErrorSummary::transient("interrupted"));
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        let mut result = JobResult::new("result");
        result.mime_type = Some("text/plain".to_string());
        result.href = Some(format!("jobs/{id}/result"));
        Ok(vec![result])
    }
}

fn services(max_running: usize, root: &std::path::Path) -> JobListServices {
    let clock = Arc::new(SystemClock);
    let scheduler = Scheduler::start(clock.clone());
    JobListServices {
        executor: ExecutionManager::new(max_running, scheduler.clone(), clock.clone()),
        scheduler,
        clock,
        file_manager: Arc::new(LocalFileManager::new(root)),
    }
}

fn wait_for(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

fn phase_of(list: &JobList, id: &str) -> ExecutionPhase {
    lock_job(&list.get(id).expect("job exists")).phase()
}

#[test]
fn test_backpressure_and_fifo_admission() {
    let dir = tempfile::tempdir().unwrap();
    let services = services(2, dir.path());
    let runner = SleepRunner::new(Duration::from_millis(400));
    let list = JobList::create(
        "async",
        JobPolicy::default(),
        ParameterRegistry::with_reserved(),
        runner.clone(),
        services.clone(),
    );

    let mut ids = Vec::new();
    for _ in 0..5 {
        let id = list
            .create_job(&[("PHASE".to_string(), "RUN".to_string())], None)
            .unwrap();
        ids.push(id);
    }

    assert!(wait_for(Duration::from_secs(2), || {
        services.executor.running_count() == 2 && services.executor.queued_count() == 3
    }));
    let phases: Vec<ExecutionPhase> = ids.iter().map(|id| phase_of(&list, id)).collect();
    assert_eq!(
        phases.iter().filter(|p| **p == ExecutionPhase::Executing).count(),
        2
    );
    assert_eq!(
        phases.iter().filter(|p| **p == ExecutionPhase::Queued).count(),
        3
    );

    // Abort the head of the queue: it must never execute.
    let queued_head = ids[2].clone();
    assert_eq!(phase_of(&list, &queued_head), ExecutionPhase::Queued);
    list.abort_job(&queued_head).unwrap();
    assert_eq!(phase_of(&list, &queued_head), ExecutionPhase::Aborted);

    // Everything else runs to completion; the first two slots went to
    // the first two arrivals, the queued survivors followed.
    assert!(wait_for(Duration::from_secs(5), || {
        ids.iter()
            .all(|id| lock_job(&list.get(id).unwrap()).is_terminal())
    }));
    let executed = runner.executed();
    assert!(!executed.contains(&queued_head));
    assert_eq!(executed.len(), 4);
    let mut first_two = executed[..2].to_vec();
    first_two.sort();
    let mut expected_first = vec![ids[0].clone(), ids[1].clone()];
    expected_first.sort();
    assert_eq!(first_two, expected_first);

    for id in &ids {
        let job = list.get(id).unwrap();
        let job = lock_job(&job);
        if job.id == queued_head {
            assert_eq!(job.phase(), ExecutionPhase::Aborted);
            assert!(job.results.is_empty());
        } else {
            assert_eq!(job.phase(), ExecutionPhase::Completed);
            assert_eq!(job.results.len(), 1);
        }
    }
}

#[test]
fn test_execution_duration_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let services = services(2, dir.path());
    let runner = SleepRunner::new(Duration::from_secs(10));
    let list = JobList::create(
        "async",
        JobPolicy::default(),
        ParameterRegistry::with_reserved(),
        runner,
        services,
    );

    let id = list
        .create_job(
            &[
                ("EXECUTIONDURATION".to_string(), "1".to_string()),
                ("PHASE".to_string(), "RUN".to_string()),
            ],
            None,
        )
        .unwrap();

    assert!(wait_for(Duration::from_secs(4), || {
        phase_of(&list, &id) == ExecutionPhase::Error
    }));
    let job = list.get(&id).unwrap();
    let job = lock_job(&job);
    let error = job.error.as_ref().expect("error summary recorded");
    assert_eq!(error.kind, ErrorKind::Transient);
    assert_eq!(error.message, "execution duration exceeded");
    assert!(job.end_at.is_some());
}

#[test]
fn test_abort_of_a_running_job() {
    let dir = tempfile::tempdir().unwrap();
    let services = services(1, dir.path());
    let runner = SleepRunner::new(Duration::from_secs(10));
    let list = JobList::create(
        "async",
        JobPolicy::default(),
        ParameterRegistry::with_reserved(),
        runner,
        services,
    );

    let id = list
        .create_job(&[("PHASE".to_string(), "RUN".to_string())], None)
        .unwrap();
    assert!(wait_for(Duration::from_secs(2), || {
        phase_of(&list, &id) == ExecutionPhase::Executing
    }));

    list.update_parameter(&id, "PHASE", "ABORT").unwrap();
    assert_eq!(phase_of(&list, &id), ExecutionPhase::Aborted);
}

#[derive(Default)]
struct DestructionProbe {
    destroyed: Mutex<Vec<String>>,
}

impl JobObserver for DestructionProbe {
    fn job_destroyed(&self, _list: &str, job: &UwsJob) {
        self.destroyed.lock().unwrap().push(job.id.clone());
    }
}

#[test]
fn test_destruction_sweep_removes_expired_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::starting_at(chrono::Utc::now()));
    let scheduler = Scheduler::manual(clock.clone());
    let services = JobListServices {
        executor: ExecutionManager::new(1, scheduler.clone(), clock.clone()),
        scheduler,
        clock: clock.clone(),
        file_manager: Arc::new(LocalFileManager::new(dir.path())),
    };
    let policy = JobPolicy {
        default_destruction_interval: 3600,
        ..JobPolicy::default()
    };
    let list = JobList::create(
        "async",
        policy,
        ParameterRegistry::with_reserved(),
        SleepRunner::new(Duration::from_millis(10)),
        services,
    );
    let probe = Arc::new(DestructionProbe::default());
    list.add_observer(probe.clone());

    let id = list.create_job(&[], None).unwrap();
    assert_eq!(list.len(), 1);

    // Not yet due.
    list.purge_expired();
    assert_eq!(list.len(), 1);

    clock.advance(Duration::from_secs(3601));
    list.purge_expired();
    assert_eq!(list.len(), 0);
    assert_eq!(probe.destroyed.lock().unwrap().as_slice(), &[id]);
}

#[test]
fn test_postponing_destruction_rekeys_the_deadline() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::starting_at(chrono::Utc::now()));
    let scheduler = Scheduler::manual(clock.clone());
    let services = JobListServices {
        executor: ExecutionManager::new(1, scheduler.clone(), clock.clone()),
        scheduler,
        clock: clock.clone(),
        file_manager: Arc::new(LocalFileManager::new(dir.path())),
    };
    let policy = JobPolicy {
        default_destruction_interval: 60,
        ..JobPolicy::default()
    };
    let list = JobList::create(
        "async",
        policy,
        ParameterRegistry::with_reserved(),
        SleepRunner::new(Duration::from_millis(10)),
        services,
    );

    let id = list.create_job(&[], None).unwrap();
    let postponed = clock.now() + chrono::Duration::hours(6);
    list.update_parameter(&id, "DESTRUCTION", &postponed.to_rfc3339())
        .unwrap();

    clock.advance(Duration::from_secs(61));
    list.purge_expired();
    assert_eq!(list.len(), 1, "the postponed job must survive the old deadline");
}

#[test]
fn test_archiving_policy_archives_unstarted_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::starting_at(chrono::Utc::now()));
    let scheduler = Scheduler::manual(clock.clone());
    let services = JobListServices {
        executor: ExecutionManager::new(1, scheduler.clone(), clock.clone()),
        scheduler,
        clock: clock.clone(),
        file_manager: Arc::new(LocalFileManager::new(dir.path())),
    };
    let policy = JobPolicy {
        default_destruction_interval: 3600,
        archive_on_destruction: true,
        ..JobPolicy::default()
    };
    let list = JobList::create(
        "async",
        policy,
        ParameterRegistry::with_reserved(),
        SleepRunner::new(Duration::from_millis(10)),
        services,
    );

    // The job is never admitted: still PENDING when its deadline fires.
    let id = list.create_job(&[], None).unwrap();
    assert_eq!(phase_of(&list, &id), ExecutionPhase::Pending);

    clock.advance(Duration::from_secs(3601));
    list.purge_expired();

    assert_eq!(list.len(), 1, "archiving keeps the job record");
    assert_eq!(phase_of(&list, &id), ExecutionPhase::Archived);

    // A later sweep leaves the archived record alone.
    clock.advance(Duration::from_secs(3600));
    list.purge_expired();
    assert_eq!(phase_of(&list, &id), ExecutionPhase::Archived);
}

fn backup_fixture(dir: &std::path::Path) -> (JobListServices, Arc<JobList>) {
    let services = services(2, dir);
    let list = JobList::create(
        "async",
        JobPolicy::default(),
        ParameterRegistry::with_reserved(),
        SleepRunner::new(Duration::from_millis(10)),
        services.clone(),
    );
    (services, list)
}

#[test]
fn test_backup_restore_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let (services, list) = backup_fixture(dir.path());
    let alice = JobOwner::new("alice").with_pseudo("Alice");

    // A completed job with a result.
    let completed = list
        .create_job(
            &[
                ("LANG".to_string(), "ADQL".to_string()),
                ("QUERY".to_string(), "SELECT 1 FROM t".to_string()),
                ("PHASE".to_string(), "RUN".to_string()),
            ],
            Some(&alice),
        )
        .unwrap();
    // A failed job.
    let failed = list.create_job(&[], Some(&alice)).unwrap();
    {
        let shared = list.get(&failed).unwrap();
        let mut job = lock_job(&shared);
        job.set_phase(ExecutionPhase::Executing).unwrap();
        job.error = Some(ErrorSummary::fatal("backend exploded"));
        job.set_phase(ExecutionPhase::Error).unwrap();
    }
    // A pending job with an upload and opaque info.
    let pending = list.create_job(&[], Some(&alice)).unwrap();
    {
        let shared = list.get(&pending).unwrap();
        let mut job = lock_job(&shared);
        job.params.add_upload(UploadFile {
            param_name: "UPLOAD".to_string(),
            file_name: "mine".to_string(),
            location: "jobs/p/upload".to_string(),
            mime: Some("application/x-votable+xml".to_string()),
            length: Some(1234),
        });
        job.job_info = Some(b"<info>opaque</info>".to_vec());
    }
    assert!(wait_for(Duration::from_secs(3), || {
        lock_job(&list.get(&completed).unwrap()).is_terminal()
    }));

    let manager = BackupManager::new(
        BackupMode::ServiceWide,
        BackupFrequency::Manual,
        services.file_manager.clone(),
        services.clock.clone(),
    );
    manager.attach(&list);
    manager.register_owner(alice.clone());
    manager.save_all().unwrap();
    let before: Vec<UwsJob> = list.jobs_snapshot();

    // Restore into a fresh list.
    let (restore_services, restored_list) = backup_fixture(dir.path());
    let restore_manager = BackupManager::new(
        BackupMode::ServiceWide,
        BackupFrequency::Manual,
        restore_services.file_manager.clone(),
        restore_services.clock.clone(),
    );
    restore_manager.attach(&restored_list);
    let report = restore_manager.restore_all(None).unwrap();
    assert_eq!(report.jobs_seen, 3);
    assert_eq!(report.jobs_restored, 3);
    assert_eq!(report.users_seen, 1);
    assert_eq!(report.users_restored, 1);

    // Restoring twice changes nothing.
    let again = restore_manager.restore_all(None).unwrap();
    assert_eq!(again.jobs_restored, 0);
    assert_eq!(restored_list.len(), 3);

    for original in &before {
        let shared = restored_list.get(&original.id).expect("job restored");
        let restored = lock_job(&shared);
        assert_eq!(restored.owner, original.owner);
        assert_eq!(restored.run_id, original.run_id);
        // The document keeps millisecond precision.
        assert_eq!(
            restored.created_at.timestamp_millis(),
            original.created_at.timestamp_millis()
        );
        assert_eq!(restored.execution_duration, original.execution_duration);
        assert_eq!(restored.results, original.results);
        assert_eq!(restored.error, original.error);
        assert_eq!(restored.params, original.params);
        assert_eq!(restored.job_info, original.job_info);
        // Only settled phases survive; everything active pends again.
        if original.phase().is_terminal() {
            assert_eq!(restored.phase(), original.phase());
        } else {
            assert_eq!(restored.phase(), ExecutionPhase::Pending);
        }
    }
}

#[test]
fn test_truncated_backup_aborts_restore_without_touching_state() {
    let dir = tempfile::tempdir().unwrap();
    let (services, list) = backup_fixture(dir.path());
    for _ in 0..3 {
        list.create_job(&[], None).unwrap();
    }
    let manager = BackupManager::new(
        BackupMode::ServiceWide,
        BackupFrequency::Manual,
        services.file_manager.clone(),
        services.clock.clone(),
    );
    manager.attach(&list);
    manager.save_all().unwrap();

    // Cut the document in half.
    let backup_path = dir.path().join("backups").join("service.json");
    let content = std::fs::read(&backup_path).unwrap();
    std::fs::write(&backup_path, &content[..content.len() / 2]).unwrap();

    let (restore_services, restored_list) = backup_fixture(dir.path());
    let restore_manager = BackupManager::new(
        BackupMode::ServiceWide,
        BackupFrequency::Manual,
        restore_services.file_manager.clone(),
        restore_services.clock.clone(),
    );
    restore_manager.attach(&restored_list);

    let err = restore_manager.restore_all(None).unwrap_err();
    assert!(matches!(err, skyql_uws::UwsError::BackupFormat(_)));
    assert_eq!(restored_list.len(), 0);
}

#[test]
fn test_malformed_job_entries_are_skipped_per_record() {
    let dir = tempfile::tempdir().unwrap();
    let (services, list) = backup_fixture(dir.path());

    let document = serde_json::json!({
        "date": "2026-08-01T00:00:00Z",
        "jobs": [
            { "jobId": "orphan" },
            { "jobListName": "nowhere", "jobId": "lost",
              "creationTime": "2026-08-01T00:00:00Z", "executionDuration": 0 },
            { "jobListName": "async", "jobId": "good",
              "creationTime": "2026-08-01T00:00:00Z", "executionDuration": 10,
              "phase": "EXECUTING", "unknownKey": true },
        ],
    });
    std::fs::create_dir_all(dir.path().join("backups")).unwrap();
    std::fs::write(
        dir.path().join("backups").join("service.json"),
        serde_json::to_vec(&document).unwrap(),
    )
    .unwrap();

    let manager = BackupManager::new(
        BackupMode::ServiceWide,
        BackupFrequency::Manual,
        services.file_manager.clone(),
        services.clock.clone(),
    );
    manager.attach(&list);
    let report = manager.restore_all(None).unwrap();
    assert_eq!(report.jobs_seen, 3);
    assert_eq!(report.jobs_restored, 1);

    let job = list.get("good").expect("the well-formed job is restored");
    let job = lock_job(&job);
    // The active phase was coerced back for the executor to re-decide.
    assert_eq!(job.phase(), ExecutionPhase::Pending);
    assert_eq!(job.execution_duration, 10);
}

#[test]
fn test_per_user_backup_on_user_action() {
    let dir = tempfile::tempdir().unwrap();
    let (services, list) = backup_fixture(dir.path());
    let bob = JobOwner::new("bob");

    let manager = BackupManager::new(
        BackupMode::PerUser,
        BackupFrequency::AtUserAction,
        services.file_manager.clone(),
        services.clock.clone(),
    );
    manager.attach(&list);
    manager.register_owner(bob.clone());

    list.create_job(&[], Some(&bob)).unwrap();
    let backup_path = dir.path().join("backups").join("user_bob.json");
    assert!(
        backup_path.exists(),
        "creating a job must save the owner's backup file"
    );
}
