//! Whole-service exercises with a stub backend: submission, execution,
//! truncation, uploads and failure capture.

use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use skyql_adql::catalog::{Catalog, Column, DbType, DbTypeKind, OutputColumn, Schema, Table};
use skyql_dialects::PostgresDialect;
use skyql_tap::{
    BackendError, CappedStream, QueryBackend, ResultSerializer, Row, RowStream, TapService,
    TapServiceBuilder, TapValue, UploadReader, UploadedTable,
};
use skyql_uws::{
    CancelToken, ErrorKind, ExecutionPhase, JobPolicy, LocalFileManager, lock_job,
};

fn fixture_catalog() -> Catalog {
    let double = DbType::new(DbTypeKind::Double);
    let mut catalog = Catalog::new();
    catalog.add_schema(Schema::new("cat").with_tables(vec![Table::new("sources")
        .with_columns(vec![
            Column::new("ra", double),
            Column::new("dec", double),
            Column::new("mag", double),
        ])]));
    catalog
}

struct FixedRows {
    rows: std::vec::IntoIter<Row>,
}

impl RowStream for FixedRows {
    fn next_row(&mut self) -> Result<Option<Row>, BackendError> {
        Ok(self.rows.next())
    }
}

/// Backend producing a fixed number of rows and recording what it was
/// asked to do.
struct StubBackend {
    rows: usize,
    statements: Mutex<Vec<String>>,
    uploads_created: Mutex<Vec<String>>,
    uploads_dropped: Mutex<Vec<String>>,
    fail_with: Mutex<Option<BackendError>>,
}

impl StubBackend {
    fn new(rows: usize) -> Arc<Self> {
        Arc::new(StubBackend {
            rows,
            statements: Mutex::new(Vec::new()),
            uploads_created: Mutex::new(Vec::new()),
            uploads_dropped: Mutex::new(Vec::new()),
            fail_with: Mutex::new(None),
        })
    }
}

impl QueryBackend for StubBackend {
    fn execute(
        &self,
        sql: &str,
        _cancel: &CancelToken,
    ) -> Result<Box<dyn RowStream>, BackendError> {
        self.statements.lock().unwrap().push(sql.to_string());
        if let Some(err) = self.fail_with.lock().unwrap().take() {
            return Err(err);
        }
        let rows: Vec<Row> = (0..self.rows)
            .map(|i| vec![TapValue::Real(i as f64), TapValue::Real(-(i as f64))])
            .collect();
        Ok(Box::new(FixedRows {
            rows: rows.into_iter(),
        }))
    }

    fn create_upload_table(
        &self,
        schema: &str,
        table: &UploadedTable,
    ) -> Result<(), BackendError> {
        self.uploads_created
            .lock()
            .unwrap()
            .push(format!("{schema}.{}", table.name));
        Ok(())
    }

    fn drop_upload_table(&self, schema: &str, table: &str) -> Result<(), BackendError> {
        self.uploads_dropped
            .lock()
            .unwrap()
            .push(format!("{schema}.{table}"));
        Ok(())
    }
}

/// Comma-separated rows, a header line, and a trailing overflow marker.
struct CsvSerializer;

impl ResultSerializer for CsvSerializer {
    fn mime_type(&self) -> &str {
        "text/csv"
    }

    fn shorthand(&self) -> &str {
        "csv"
    }

    fn write(
        &self,
        columns: &[OutputColumn],
        rows: &mut CappedStream,
        out: &mut dyn Write,
    ) -> Result<u64, std::io::Error> {
        let header: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        writeln!(out, "{}", header.join(","))?;
        let mut written = 0;
        while let Some(row) = rows
            .next_row()
            .map_err(|err| std::io::Error::other(err.to_string()))?
        {
            let cells: Vec<String> = row.iter().map(ToString::to_string).collect();
            writeln!(out, "{}", cells.join(","))?;
            written += 1;
        }
        if rows.overflowed() {
            writeln!(out, "# overflow")?;
        }
        Ok(written)
    }
}

/// Upload documents as one-line-per-row CSV with a header of column
/// names; every column is a double.
struct CsvUploadReader;

impl UploadReader for CsvUploadReader {
    fn read(
        &self,
        name: &str,
        source: &mut dyn Read,
    ) -> Result<UploadedTable, skyql_tap::TapError> {
        let mut text = String::new();
        source
            .read_to_string(&mut text)
            .map_err(skyql_tap::TapError::Io)?;
        let mut lines = text.lines();
        let header = lines
            .next()
            .ok_or_else(|| skyql_tap::TapError::Upload("empty upload".to_string()))?;
        let columns: Vec<Column> = header
            .split(',')
            .map(|col| Column::new(col.trim(), DbType::new(DbTypeKind::Double)))
            .collect();
        let rows: Vec<Row> = lines
            .map(|line| {
                line.split(',')
                    .map(|cell| TapValue::Real(cell.trim().parse().unwrap_or(f64::NAN)))
                    .collect()
            })
            .collect();
        Ok(UploadedTable {
            name: name.to_string(),
            columns,
            rows,
        })
    }
}

struct Fixture {
    service: Arc<TapService>,
    backend: Arc<StubBackend>,
    root: tempfile::TempDir,
}

fn fixture(rows: usize, output_cap: Option<u64>) -> Fixture {
    let root = tempfile::tempdir().unwrap();
    let backend = StubBackend::new(rows);
    let mut builder = TapServiceBuilder::new(
        fixture_catalog(),
        Arc::new(PostgresDialect::with_pgsphere()),
        backend.clone(),
        Arc::new(LocalFileManager::new(root.path())),
    )
    .serializer(Arc::new(CsvSerializer))
    .upload_reader(Arc::new(CsvUploadReader))
    .policy(JobPolicy::default())
    .max_running(2);
    if let Some(cap) = output_cap {
        builder = builder.output_cap(cap);
    }
    Fixture {
        service: builder.build(),
        backend,
        root,
    }
}

fn wait_terminal(service: &TapService, id: &str) -> ExecutionPhase {
    let list = service.async_jobs();
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        let phase = lock_job(&list.get(id).expect("job exists")).phase();
        if phase.is_terminal() {
            return phase;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "job {id} never settled"
        );
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn test_async_query_runs_to_completion() {
    let fixture = fixture(3, None);
    let id = fixture
        .service
        .submit_query(
            &[
                ("LANG".to_string(), "ADQL".to_string()),
                ("QUERY".to_string(), "SELECT ra, dec FROM cat.sources".to_string()),
                ("PHASE".to_string(), "RUN".to_string()),
            ],
            None,
        )
        .unwrap();

    assert_eq!(wait_terminal(&fixture.service, &id), ExecutionPhase::Completed);

    let list = fixture.service.async_jobs();
    let job = list.get(&id).unwrap();
    let job = lock_job(&job);
    assert_eq!(job.results.len(), 1);
    assert_eq!(job.results[0].mime_type.as_deref(), Some("text/csv"));

    let result_path = fixture
        .root
        .path()
        .join("jobs")
        .join(&id)
        .join("result");
    let content = std::fs::read_to_string(result_path).unwrap();
    assert!(content.starts_with("ra,dec\n"), "{content}");
    assert_eq!(content.lines().count(), 4);

    // The translated SQL reached the backend.
    let statements = fixture.backend.statements.lock().unwrap();
    assert_eq!(statements.len(), 1);
    assert!(statements[0].starts_with("SELECT"));
}

#[test]
fn test_maxrec_truncates_and_flags_overflow() {
    let fixture = fixture(10, Some(100));
    let id = fixture
        .service
        .submit_query(
            &[
                ("QUERY".to_string(), "SELECT ra, dec FROM cat.sources".to_string()),
                ("MAXREC".to_string(), "4".to_string()),
                ("PHASE".to_string(), "RUN".to_string()),
            ],
            None,
        )
        .unwrap();

    assert_eq!(wait_terminal(&fixture.service, &id), ExecutionPhase::Completed);

    let list = fixture.service.async_jobs();
    let job = list.get(&id).unwrap();
    let job = lock_job(&job);
    assert_eq!(job.params.get_text("overflow"), Some("true"));

    let content = std::fs::read_to_string(
        fixture.root.path().join("jobs").join(&id).join("result"),
    )
    .unwrap();
    // Header + 4 rows + overflow marker.
    assert_eq!(content.lines().count(), 6);
    assert!(content.ends_with("# overflow\n"), "{content}");
}

#[test]
fn test_invalid_query_becomes_a_fatal_error_summary() {
    let fixture = fixture(1, None);
    let id = fixture
        .service
        .submit_query(
            &[
                ("QUERY".to_string(), "SELECT nope FROM cat.sources".to_string()),
                ("PHASE".to_string(), "RUN".to_string()),
            ],
            None,
        )
        .unwrap();

    assert_eq!(wait_terminal(&fixture.service, &id), ExecutionPhase::Error);
    let list = fixture.service.async_jobs();
    let job = list.get(&id).unwrap();
    let job = lock_job(&job);
    let error = job.error.as_ref().unwrap();
    assert_eq!(error.kind, ErrorKind::Fatal);
    assert_eq!(error.http_status, 400);
    assert!(error.message.contains("nope"), "{}", error.message);
    // Nothing was submitted to the backend.
    assert!(fixture.backend.statements.lock().unwrap().is_empty());
}

#[test]
fn test_upload_tables_are_created_queried_and_dropped() {
    let fixture = fixture(2, None);
    let id = fixture
        .service
        .submit_query(
            &[
                (
                    "QUERY".to_string(),
                    "SELECT u.ra FROM TAP_UPLOAD.mine AS u".to_string(),
                ),
                ("UPLOAD".to_string(), "mine,param:mine".to_string()),
            ],
            None,
        )
        .unwrap();

    // Stage the upload bytes where the file manager looks for them.
    let upload_dir = fixture.root.path().join("jobs").join(&id);
    std::fs::create_dir_all(&upload_dir).unwrap();
    std::fs::write(upload_dir.join("mine"), "ra,dec\n1.5,-2.5\n").unwrap();

    fixture
        .service
        .async_jobs()
        .update_parameter(&id, "PHASE", "RUN")
        .unwrap();
    assert_eq!(wait_terminal(&fixture.service, &id), ExecutionPhase::Completed);

    assert_eq!(
        fixture.backend.uploads_created.lock().unwrap().as_slice(),
        &["TAP_UPLOAD.mine".to_string()]
    );
    assert_eq!(
        fixture.backend.uploads_dropped.lock().unwrap().as_slice(),
        &["TAP_UPLOAD.mine".to_string()]
    );
    // The upload namespace reached the SQL.
    let statements = fixture.backend.statements.lock().unwrap();
    assert!(statements[0].contains("tap_upload.mine"), "{}", statements[0]);
}

#[test]
fn test_uploads_are_dropped_on_backend_failure() {
    let fixture = fixture(1, None);
    *fixture.backend.fail_with.lock().unwrap() =
        Some(BackendError::Fatal("table space full".to_string()));

    let id = fixture
        .service
        .submit_query(
            &[
                (
                    "QUERY".to_string(),
                    "SELECT u.ra FROM TAP_UPLOAD.mine AS u".to_string(),
                ),
                ("UPLOAD".to_string(), "mine,param:mine".to_string()),
            ],
            None,
        )
        .unwrap();
    let upload_dir = fixture.root.path().join("jobs").join(&id);
    std::fs::create_dir_all(&upload_dir).unwrap();
    std::fs::write(upload_dir.join("mine"), "ra\n1.0\n").unwrap();

    fixture
        .service
        .async_jobs()
        .update_parameter(&id, "PHASE", "RUN")
        .unwrap();
    assert_eq!(wait_terminal(&fixture.service, &id), ExecutionPhase::Error);

    assert_eq!(
        fixture.backend.uploads_dropped.lock().unwrap().as_slice(),
        &["TAP_UPLOAD.mine".to_string()]
    );
    let job = fixture.service.async_jobs().get(&id).unwrap();
    assert_eq!(lock_job(&job).error.as_ref().unwrap().kind, ErrorKind::Fatal);
}

#[test]
fn test_transient_backend_failures_are_retried_once() {
    let fixture = fixture(2, None);
    *fixture.backend.fail_with.lock().unwrap() =
        Some(BackendError::Transient("connection reset".to_string()));

    let id = fixture
        .service
        .submit_query(
            &[
                ("QUERY".to_string(), "SELECT ra FROM cat.sources".to_string()),
                ("PHASE".to_string(), "RUN".to_string()),
            ],
            None,
        )
        .unwrap();

    assert_eq!(wait_terminal(&fixture.service, &id), ExecutionPhase::Completed);
    // First attempt failed, second went through.
    assert_eq!(fixture.backend.statements.lock().unwrap().len(), 2);
}

#[test]
fn test_service_query_api() {
    let fixture = fixture(0, Some(50));
    let service = &fixture.service;

    let mut query = service
        .parse("SELECT TOP 10 ra FROM cat.sources WHERE mag < 20")
        .unwrap();
    let columns = service.check(&mut query).unwrap();
    assert_eq!(columns.len(), 1);
    assert_eq!(columns[0].name.as_str(), "ra");

    let translation = service.translate(&query).unwrap();
    assert!(translation.sql.contains("LIMIT 10"), "{}", translation.sql);

    let rendered = service.render(&query);
    assert!(rendered.starts_with("SELECT TOP 10 ra"), "{rendered}");

    // The published metadata is queryable too.
    let mut query = service
        .parse("SELECT table_name FROM TAP_SCHEMA.tables")
        .unwrap();
    service.check(&mut query).unwrap();
}

#[test]
fn test_rejected_parameters_never_create_a_job() {
    let fixture = fixture(1, None);
    let err = fixture
        .service
        .submit_query(
            &[
                ("QUERY".to_string(), "SELECT ra FROM cat.sources".to_string()),
                ("LANG".to_string(), "SQL".to_string()),
            ],
            None,
        )
        .unwrap_err();
    assert!(matches!(err, skyql_uws::UwsError::ParamRejected { .. }));
    assert_eq!(fixture.service.async_jobs().len(), 0);
}
