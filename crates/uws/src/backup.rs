//! Durable snapshots of every job list, and the restore path that
//! rebuilds them at startup.
//!
//! Documents are JSON, written through the file manager's atomic writer
//! so a partial write can never replace a good backup. Restore is
//! lenient per record (a malformed job is skipped with a warning) and
//! strict per document (a malformed header aborts with an error, leaving
//! the in-memory state untouched).

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use ahash::AHashMap;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::UwsError;
use crate::events::JobObserver;
use crate::fs::{BackupScope, FileManager};
use crate::job::{ErrorKind, ErrorSummary, JobResult, UwsJob};
use crate::joblist::JobList;
use crate::owner::{JobOwner, UserIdentifier};
use crate::params::{ParamValue, UploadFile};
use crate::phase::ExecutionPhase;
use crate::scheduler::{Clock, Scheduler, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupMode {
    /// One document for the whole service.
    ServiceWide,
    /// One document per job owner.
    PerUser,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupFrequency {
    /// Only when the service asks.
    Manual,
    /// After every state-changing operation (per-user mode only).
    AtUserAction,
    /// On a fixed period.
    Interval(Duration),
}

/// Counters produced by a restore pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub jobs_restored: usize,
    pub jobs_seen: usize,
    pub users_restored: usize,
    pub users_seen: usize,
}

// ---- document shape -------------------------------------------------

const KNOWN_JOB_KEYS: &[&str] = &[
    "jobListName",
    "jobId",
    "phase",
    "owner",
    "runId",
    "quote",
    "creationTime",
    "executionDuration",
    "destructionTime",
    "startTime",
    "endTime",
    "parameters",
    "uwsUploads",
    "results",
    "errorSummary",
    "jobInfo",
];

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BackupUser {
    id: String,
    pseudo: String,
    #[serde(default)]
    data: AHashMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BackupResult {
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    href: Option<String>,
    #[serde(
        rename = "mime-type",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    redirection: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BackupUpload {
    param_name: String,
    file_name: String,
    location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    length: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BackupError {
    #[serde(rename = "type")]
    kind: ErrorKind,
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    details_ref: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BackupJob {
    job_list_name: String,
    job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    phase: Option<ExecutionPhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    quote: Option<u64>,
    creation_time: String,
    execution_duration: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    destruction_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    end_time: Option<String>,
    #[serde(default)]
    parameters: serde_json::Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    uws_uploads: Vec<BackupUpload>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    results: Vec<BackupResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_summary: Option<BackupError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    job_info: Option<String>,
}

fn format_instant(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn job_to_backup(list_name: &str, job: &UwsJob) -> BackupJob {
    BackupJob {
        job_list_name: list_name.to_string(),
        job_id: job.id.clone(),
        phase: Some(job.phase()),
        owner: job.owner.clone(),
        run_id: job.run_id.clone(),
        quote: job.quote,
        creation_time: format_instant(job.created_at),
        execution_duration: job.execution_duration,
        destruction_time: job.destruction_time.map(format_instant),
        start_time: job.start_at.map(format_instant),
        end_time: job.end_at.map(format_instant),
        parameters: job
            .params
            .iter()
            .map(|(name, value)| {
                let json = match value {
                    ParamValue::Text(text) => Value::String(text.clone()),
                    ParamValue::Array(items) => Value::Array(
                        items.iter().cloned().map(Value::String).collect(),
                    ),
                };
                (name.to_string(), json)
            })
            .collect(),
        uws_uploads: job
            .params
            .uploads()
            .iter()
            .map(|upload| BackupUpload {
                param_name: upload.param_name.clone(),
                file_name: upload.file_name.clone(),
                location: upload.location.clone(),
                mime: upload.mime.clone(),
                length: upload.length,
            })
            .collect(),
        results: job
            .results
            .iter()
            .map(|result| BackupResult {
                id: result.id.clone(),
                href: result.href.clone(),
                mime_type: result.mime_type.clone(),
                redirection: result.redirect.then_some(true),
                size: result.size,
            })
            .collect(),
        error_summary: job.error.as_ref().map(|error| BackupError {
            kind: error.kind,
            message: error.message.clone(),
            details_ref: error.details_href.clone(),
        }),
        job_info: job.job_info.as_ref().map(|bytes| BASE64.encode(bytes)),
    }
}

fn job_from_backup(parsed: BackupJob) -> (String, UwsJob) {
    let created_at = parse_instant(&parsed.creation_time).unwrap_or_else(Utc::now);
    let mut job = UwsJob::new(parsed.job_id, parsed.owner, created_at);
    job.run_id = parsed.run_id;
    job.quote = parsed.quote;
    job.execution_duration = parsed.execution_duration;
    job.destruction_time = parsed.destruction_time.as_deref().and_then(parse_instant);
    job.start_at = parsed.start_time.as_deref().and_then(parse_instant);
    job.end_at = parsed.end_time.as_deref().and_then(parse_instant);

    // Active phases do not survive a restart: the executor decides
    // afresh whether and when a restored job runs.
    let phase = match parsed.phase.unwrap_or(ExecutionPhase::Pending) {
        ExecutionPhase::Executing
        | ExecutionPhase::Queued
        | ExecutionPhase::Suspended
        | ExecutionPhase::Unknown => ExecutionPhase::Pending,
        other => other,
    };
    job.force_phase(phase);

    for (name, value) in parsed.parameters {
        let value = match value {
            Value::String(text) => ParamValue::Text(text),
            Value::Array(items) => ParamValue::Array(
                items
                    .into_iter()
                    .map(|item| match item {
                        Value::String(text) => text,
                        other => other.to_string(),
                    })
                    .collect(),
            ),
            other => ParamValue::Text(other.to_string()),
        };
        job.params.set(&name, value);
    }
    for upload in parsed.uws_uploads {
        job.params.add_upload(UploadFile {
            param_name: upload.param_name,
            file_name: upload.file_name,
            location: upload.location,
            mime: upload.mime,
            length: upload.length,
        });
    }
    for result in parsed.results {
        let mut restored = JobResult::new(result.id);
        restored.href = result.href;
        restored.mime_type = result.mime_type;
        restored.redirect = result.redirection.unwrap_or(false);
        restored.size = result.size;
        job.add_result(restored);
    }
    job.error = parsed.error_summary.map(|error| ErrorSummary {
        kind: error.kind,
        message: error.message,
        details_href: error.details_ref,
        http_status: 500,
    });
    job.job_info = parsed
        .job_info
        .as_deref()
        .and_then(|encoded| BASE64.decode(encoded).ok());

    (parsed.job_list_name, job)
}

// ---- the manager ----------------------------------------------------

pub struct BackupManager {
    mode: BackupMode,
    frequency: BackupFrequency,
    file_manager: Arc<dyn FileManager>,
    clock: Arc<dyn Clock>,
    lists: Mutex<Vec<Weak<JobList>>>,
    owners: Mutex<AHashMap<String, JobOwner>>,
    interval_task: Mutex<Option<TaskId>>,
}

impl BackupManager {
    pub fn new(
        mode: BackupMode,
        frequency: BackupFrequency,
        file_manager: Arc<dyn FileManager>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        if frequency == BackupFrequency::AtUserAction && mode != BackupMode::PerUser {
            log::warn!(
                target: "uws::backup",
                "per-action backup only applies to the per-user mode; falling back to manual"
            );
        }
        Arc::new(BackupManager {
            mode,
            frequency,
            file_manager,
            clock,
            lists: Mutex::new(Vec::new()),
            owners: Mutex::new(AHashMap::new()),
            interval_task: Mutex::new(None),
        })
    }

    /// Track a list in every future save, and hook user actions when the
    /// frequency asks for them.
    pub fn attach(self: &Arc<Self>, list: &Arc<JobList>) {
        self.lists
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::downgrade(list));
        if self.frequency == BackupFrequency::AtUserAction && self.mode == BackupMode::PerUser {
            list.add_observer(Arc::clone(self) as Arc<dyn JobObserver>);
        }
    }

    /// Make an owner known so per-user saves and owner filtering can see
    /// it.
    pub fn register_owner(&self, owner: JobOwner) {
        self.owners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(owner.id.clone(), owner);
    }

    /// Start the periodic save task when the frequency is an interval.
    pub fn install_interval(self: &Arc<Self>, scheduler: &Scheduler) {
        let BackupFrequency::Interval(every) = self.frequency else {
            return;
        };
        let weak = Arc::downgrade(self);
        let task = scheduler.schedule_every(every, move || {
            if let Some(manager) = weak.upgrade() {
                if let Err(err) = manager.save_all() {
                    log::warn!(target: "uws::backup", "scheduled backup failed: {err}");
                }
            }
        });
        *self
            .interval_task
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(task);
    }

    fn live_lists(&self) -> Vec<Arc<JobList>> {
        self.lists
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    fn owners_snapshot(&self) -> Vec<JobOwner> {
        self.owners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    /// Save everything, once, in the configured mode.
    pub fn save_all(&self) -> Result<(), UwsError> {
        match self.mode {
            BackupMode::ServiceWide => self.save_service(),
            BackupMode::PerUser => {
                for owner in self.owners_snapshot() {
                    self.save_user(&owner)?;
                }
                Ok(())
            }
        }
    }

    pub fn save_service(&self) -> Result<(), UwsError> {
        let lists = self.live_lists();
        let users: Vec<BackupUser> = self
            .owners_snapshot()
            .into_iter()
            .map(|owner| BackupUser {
                id: owner.id,
                pseudo: owner.pseudo,
                data: owner.data,
            })
            .collect();
        let mut jobs = Vec::new();
        for list in &lists {
            for job in list.jobs_snapshot() {
                jobs.push(serde_json::to_value(job_to_backup(list.name(), &job))?);
            }
        }
        let document = serde_json::json!({
            "date": format_instant(self.clock.now()),
            "users": users.iter().map(|u| serde_json::to_value(u)).collect::<Result<Vec<_>, _>>()?,
            "jobs": jobs,
        });
        self.write_document(&BackupScope::Service, &document)
    }

    pub fn save_user(&self, owner: &JobOwner) -> Result<(), UwsError> {
        let lists = self.live_lists();
        let mut jobs = Vec::new();
        for list in &lists {
            for job in list.jobs_snapshot() {
                if job.owner.as_deref() == Some(owner.id.as_str()) {
                    jobs.push(serde_json::to_value(job_to_backup(list.name(), &job))?);
                }
            }
        }
        let document = serde_json::json!({
            "date": format_instant(self.clock.now()),
            "user": serde_json::to_value(BackupUser {
                id: owner.id.clone(),
                pseudo: owner.pseudo.clone(),
                data: owner.data.clone(),
            })?,
            "jobs": jobs,
        });
        self.write_document(&BackupScope::User(owner.id.clone()), &document)
    }

    fn write_document(&self, scope: &BackupScope, document: &Value) -> Result<(), UwsError> {
        let mut writer = self.file_manager.open_backup(scope)?;
        serde_json::to_writer(&mut writer, document)?;
        writer.commit()?;
        Ok(())
    }

    /// Read every backup document of the configured mode and rebuild the
    /// attached lists. Safe to run twice: already-present jobs are left
    /// alone.
    pub fn restore_all(
        &self,
        identifier: Option<&dyn UserIdentifier>,
    ) -> Result<RestoreReport, UwsError> {
        let mut report = RestoreReport::default();
        let scopes = match self.mode {
            BackupMode::ServiceWide => vec![BackupScope::Service],
            BackupMode::PerUser => self
                .file_manager
                .backup_scopes()?
                .into_iter()
                .filter(|scope| matches!(scope, BackupScope::User(_)))
                .collect(),
        };
        for scope in scopes {
            let Some(reader) = self.file_manager.read_backup(&scope)? else {
                continue;
            };
            self.restore_document(reader, identifier, &mut report)?;
        }
        Ok(report)
    }

    fn restore_document(
        &self,
        reader: Box<dyn std::io::Read>,
        identifier: Option<&dyn UserIdentifier>,
        report: &mut RestoreReport,
    ) -> Result<(), UwsError> {
        let document: Value = serde_json::from_reader(reader)
            .map_err(|err| UwsError::BackupFormat(err.to_string()))?;
        let Some(root) = document.as_object() else {
            return Err(UwsError::BackupFormat(
                "the document root is not an object".to_string(),
            ));
        };

        let mut owners: AHashMap<String, JobOwner> = AHashMap::new();
        let mut restore_user = |value: &Value, report: &mut RestoreReport| {
            report.users_seen += 1;
            match serde_json::from_value::<BackupUser>(value.clone()) {
                Ok(user) => {
                    let owner = match identifier {
                        Some(identifier) => identifier.restore(&user.id, &user.pseudo, &user.data),
                        None => JobOwner {
                            id: user.id,
                            pseudo: user.pseudo,
                            data: user.data,
                        },
                    };
                    owners.insert(owner.id.clone(), owner);
                    report.users_restored += 1;
                }
                Err(err) => {
                    log::warn!(target: "uws::backup", "skipping a malformed user entry: {err}");
                }
            }
        };
        if let Some(users) = root.get("users") {
            let Some(users) = users.as_array() else {
                return Err(UwsError::BackupFormat(
                    "\"users\" is not an array".to_string(),
                ));
            };
            for user in users {
                restore_user(user, report);
            }
        }
        if let Some(user) = root.get("user") {
            restore_user(user, report);
        }
        for owner in owners.values() {
            self.register_owner(owner.clone());
        }

        let Some(jobs) = root.get("jobs").and_then(Value::as_array) else {
            return Err(UwsError::BackupFormat(
                "missing \"jobs\" array".to_string(),
            ));
        };
        let users_declared = root.contains_key("users") || root.contains_key("user");
        let lists = self.live_lists();

        for value in jobs {
            report.jobs_seen += 1;
            let Some(entry) = value.as_object() else {
                log::warn!(target: "uws::backup", "skipping a non-object job entry");
                continue;
            };
            let has_required = entry.get("jobListName").is_some_and(Value::is_string)
                && entry.get("jobId").is_some_and(Value::is_string);
            if !has_required {
                log::warn!(
                    target: "uws::backup",
                    "skipping a job entry without jobListName/jobId"
                );
                continue;
            }
            for key in entry.keys() {
                if !KNOWN_JOB_KEYS.contains(&key.as_str()) {
                    log::warn!(
                        target: "uws::backup",
                        "ignoring unknown key \"{key}\" in a job entry"
                    );
                }
            }

            let parsed: BackupJob = match serde_json::from_value(value.clone()) {
                Ok(parsed) => parsed,
                Err(err) => {
                    log::warn!(target: "uws::backup", "skipping a malformed job entry: {err}");
                    continue;
                }
            };
            let (list_name, job) = job_from_backup(parsed);

            if let Some(owner) = &job.owner {
                if users_declared && !owners.contains_key(owner) {
                    log::warn!(
                        target: "uws::backup",
                        "skipping job {}: unknown owner \"{owner}\"", job.id
                    );
                    continue;
                }
            }
            let Some(list) = lists.iter().find(|list| list.name() == list_name) else {
                log::warn!(
                    target: "uws::backup",
                    "skipping job {}: no job list named \"{list_name}\"", job.id
                );
                continue;
            };
            if list.restore_job(job) {
                report.jobs_restored += 1;
            }
        }
        Ok(())
    }
}

impl JobObserver for BackupManager {
    fn job_created(&self, _list: &str, job: &UwsJob) {
        self.after_user_action(job);
    }

    fn phase_changed(&self, _list: &str, job: &UwsJob, _previous: ExecutionPhase) {
        self.after_user_action(job);
    }

    fn params_changed(&self, _list: &str, job: &UwsJob) {
        self.after_user_action(job);
    }

    fn job_destroyed(&self, _list: &str, job: &UwsJob) {
        self.after_user_action(job);
    }
}

impl BackupManager {
    fn after_user_action(&self, job: &UwsJob) {
        if self.frequency != BackupFrequency::AtUserAction || self.mode != BackupMode::PerUser {
            return;
        }
        let Some(owner_id) = &job.owner else {
            return;
        };
        let owner = self
            .owners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(owner_id)
            .cloned();
        if let Some(owner) = owner {
            if let Err(err) = self.save_user(&owner) {
                log::warn!(
                    target: "uws::backup",
                    "per-action backup of user {owner_id} failed: {err}"
                );
            }
        }
    }
}
