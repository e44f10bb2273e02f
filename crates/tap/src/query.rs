//! The work a query job performs: parse, resolve, translate, materialize
//! uploads, run the SQL, stream the rows out, record the result.
//!
//! Cancellation is honored between every stage and the backend is probed
//! once more right before submission. Uploaded scratch tables are dropped
//! on every exit path, success or not.

use std::sync::{Arc, RwLock};

use skyql_adql::catalog::{Catalog, OutputColumn};
use skyql_adql::feature::FeatureSet;
use skyql_adql::{check, parse};
use skyql_dialects::{SqlDialect, TranslateOptions, Translation, translate};
use skyql_uws::executor::{CancelToken, JobRunner};
use skyql_uws::fs::FileManager;
use skyql_uws::job::{ErrorSummary, JobResult, SharedJob, lock_job};
use skyql_uws::params::ParamValue;

use crate::backend::{BackendError, CappedStream, QueryBackend, ResultSerializer};
use crate::params::{PARAM_FORMAT, PARAM_MAXREC, PARAM_QUERY, PARAM_RESPONSE_FORMAT, PARAM_UPLOAD};
use crate::upload::{UPLOAD_SCHEMA, UploadReader, UploadedTable, parse_upload_param, upload_schema};

fn fatal(message: impl Into<String>, http_status: u16) -> ErrorSummary {
    let mut summary = ErrorSummary::fatal(message);
    summary.http_status = http_status;
    summary
}

fn interrupted() -> ErrorSummary {
    ErrorSummary::transient("query interrupted")
}

/// Executes the query of a job against the service's backend.
pub struct AdqlRunner {
    pub(crate) catalog: Arc<RwLock<Arc<Catalog>>>,
    pub(crate) features: Arc<FeatureSet>,
    pub(crate) dialect: Arc<dyn SqlDialect>,
    pub(crate) backend: Arc<dyn QueryBackend>,
    pub(crate) file_manager: Arc<dyn FileManager>,
    pub(crate) serializers: Vec<Arc<dyn ResultSerializer>>,
    pub(crate) upload_reader: Option<Arc<dyn UploadReader>>,
    pub(crate) output_cap: Option<u64>,
}

struct JobInputs {
    id: String,
    query: String,
    format: Option<String>,
    maxrec: Option<u64>,
    uploads: Vec<(String, String)>,
}

/// Drops the scratch tables of a query on every exit path.
struct UploadGuard<'a> {
    backend: &'a dyn QueryBackend,
    tables: Vec<String>,
}

impl Drop for UploadGuard<'_> {
    fn drop(&mut self) {
        for table in &self.tables {
            if let Err(err) = self.backend.drop_upload_table(UPLOAD_SCHEMA, table) {
                log::warn!(
                    target: "tap::query",
                    "could not drop the uploaded table {UPLOAD_SCHEMA}.{table}: {err}"
                );
            }
        }
    }
}

impl AdqlRunner {
    fn read_inputs(&self, job: &SharedJob) -> Result<JobInputs, ErrorSummary> {
        let job = lock_job(job);
        let query = job
            .params
            .get_text(PARAM_QUERY)
            .ok_or_else(|| fatal("missing QUERY parameter", 400))?
            .to_string();
        let format = job
            .params
            .get_text(PARAM_RESPONSE_FORMAT)
            .or_else(|| job.params.get_text(PARAM_FORMAT))
            .map(str::to_string);
        let maxrec = job
            .params
            .get_text(PARAM_MAXREC)
            .and_then(|raw| raw.parse().ok());
        let uploads = match job.params.get(PARAM_UPLOAD) {
            Some(value) => {
                parse_upload_param(value).map_err(|err| fatal(err.to_string(), 400))?
            }
            None => Vec::new(),
        };
        Ok(JobInputs {
            id: job.id.clone(),
            query,
            format,
            maxrec,
            uploads,
        })
    }

    fn materialize_uploads(
        &self,
        inputs: &JobInputs,
    ) -> Result<Vec<UploadedTable>, ErrorSummary> {
        if inputs.uploads.is_empty() {
            return Ok(Vec::new());
        }
        let Some(reader) = &self.upload_reader else {
            return Err(fatal("this service does not accept uploads", 400));
        };
        let mut tables = Vec::with_capacity(inputs.uploads.len());
        for (name, _uri) in &inputs.uploads {
            let mut source = self
                .file_manager
                .open_upload(&inputs.id, name)
                .map_err(|err| fatal(format!("cannot read the upload \"{name}\": {err}"), 400))?;
            let table = reader
                .read(name, &mut source)
                .map_err(|err| fatal(format!("bad upload \"{name}\": {err}"), 400))?;
            tables.push(table);
        }
        Ok(tables)
    }

    fn pick_serializer(&self, format: Option<&str>) -> Result<&dyn ResultSerializer, ErrorSummary> {
        match format {
            None => self
                .serializers
                .first()
                .map(|s| s.as_ref())
                .ok_or_else(|| fatal("no serializer registered", 500)),
            Some(wanted) => self
                .serializers
                .iter()
                .find(|s| {
                    s.mime_type().eq_ignore_ascii_case(wanted)
                        || s.shorthand().eq_ignore_ascii_case(wanted)
                })
                .map(|s| s.as_ref())
                .ok_or_else(|| fatal(format!("no serializer for \"{wanted}\""), 400)),
        }
    }

    fn translate_query(
        &self,
        inputs: &JobInputs,
        uploads: &[UploadedTable],
        cancel: &CancelToken,
    ) -> Result<(Translation, Vec<OutputColumn>, Option<u64>), ErrorSummary> {
        let base = Arc::clone(
            &self
                .catalog
                .read()
                .unwrap_or_else(|e| e.into_inner()),
        );
        let merged;
        let catalog: &Catalog = if uploads.is_empty() {
            base.as_ref()
        } else {
            merged = base.with_extra_schema(upload_schema(uploads));
            &merged
        };

        let mut tree = parse(&inputs.query).map_err(|err| fatal(err.to_string(), 400))?;
        cancel.check().map_err(|_| interrupted())?;

        let columns =
            check(&mut tree, catalog, &self.features).map_err(|err| fatal(err.to_string(), 400))?;
        cancel.check().map_err(|_| interrupted())?;

        let row_cap = match (inputs.maxrec, self.output_cap) {
            (Some(maxrec), Some(cap)) => Some(maxrec.min(cap)),
            (Some(maxrec), None) => Some(maxrec),
            (None, cap) => cap,
        };
        let translation = translate(
            &tree,
            self.dialect.as_ref(),
            catalog,
            &self.features,
            &TranslateOptions { row_cap },
        )
        .map_err(|err| fatal(err.to_string(), 400))?;
        Ok((translation, columns, row_cap))
    }

    fn execute_with_retry(
        &self,
        sql: &str,
        cancel: &CancelToken,
    ) -> Result<Box<dyn crate::backend::RowStream>, ErrorSummary> {
        match self.backend.execute(sql, cancel) {
            Ok(stream) => Ok(stream),
            Err(BackendError::Transient(message)) => {
                log::warn!(
                    target: "tap::query",
                    "transient backend failure, retrying once: {message}"
                );
                cancel.check().map_err(|_| interrupted())?;
                self.backend
                    .execute(sql, cancel)
                    .map_err(|err| err.to_summary())
            }
            Err(err) => Err(err.to_summary()),
        }
    }
}

impl JobRunner for AdqlRunner {
    fn run(&self, job: &SharedJob, cancel: &CancelToken) -> Result<Vec<JobResult>, ErrorSummary> {
        let inputs = self.read_inputs(job)?;
        let serializer = self.pick_serializer(inputs.format.as_deref())?;

        let uploads = self.materialize_uploads(&inputs)?;
        cancel.check().map_err(|_| interrupted())?;

        let (translation, columns, row_cap) =
            self.translate_query(&inputs, &uploads, cancel)?;

        let mut guard = UploadGuard {
            backend: self.backend.as_ref(),
            tables: Vec::new(),
        };
        for table in &uploads {
            self.backend
                .create_upload_table(UPLOAD_SCHEMA, table)
                .map_err(|err| err.to_summary())?;
            guard.tables.push(table.name.clone());
        }

        // Last checkpoint before handing the SQL to the backend.
        cancel.check().map_err(|_| interrupted())?;
        log::debug!(
            target: "tap::query",
            "job {}: submitting \"{}\"", inputs.id, translation.sql
        );
        let stream = self.execute_with_retry(&translation.sql, cancel)?;

        let mut writer = self
            .file_manager
            .open_result(&inputs.id, "result")
            .map_err(|err| fatal(format!("cannot open the result file: {err}"), 500))?;
        let mut capped = CappedStream::new(stream, row_cap);
        let rows_written = serializer
            .write(&columns, &mut capped, &mut writer)
            .map_err(|err| fatal(format!("result serialization failed: {err}"), 500))?;
        writer
            .flush()
            .map_err(|err| fatal(format!("cannot flush the result file: {err}"), 500))?;
        drop(writer);

        cancel.check().map_err(|_| interrupted())?;

        if capped.overflowed() {
            // Surface the truncation on the job view.
            let mut job = lock_job(job);
            job.params.set("overflow", ParamValue::text("true"));
        }

        log::info!(
            target: "tap::query",
            "job {}: {rows_written} row(s) written{}",
            inputs.id,
            if capped.overflowed() { " (truncated)" } else { "" }
        );
        let mut result = JobResult::new("result");
        result.mime_type = Some(serializer.mime_type().to_string());
        result.href = Some(self.file_manager.result_location(&inputs.id, "result"));
        Ok(vec![result])
    }
}
