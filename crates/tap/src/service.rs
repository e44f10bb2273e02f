//! The service context: one explicit object owning the catalog, the
//! feature allow-lists, the dialect, the job lists and every collaborator
//! handle. Nothing here is ambient; components receive what they use.

use std::sync::{Arc, Mutex, RwLock};

use indexmap::IndexMap;
use skyql_adql::ast::QueryExpr;
use skyql_adql::catalog::{Catalog, OutputColumn};
use skyql_adql::errors::{CheckError, ParseError};
use skyql_adql::feature::FeatureSet;
use skyql_dialects::{SqlDialect, TranslateError, TranslateOptions, Translation};
use skyql_uws::backup::{BackupFrequency, BackupManager, BackupMode, RestoreReport};
use skyql_uws::errors::UwsError;
use skyql_uws::executor::ExecutionManager;
use skyql_uws::fs::FileManager;
use skyql_uws::job::JobPolicy;
use skyql_uws::joblist::{JobList, JobListServices};
use skyql_uws::owner::{JobOwner, UserIdentifier};
use skyql_uws::scheduler::{Clock, Scheduler, SystemClock};

use crate::backend::{QueryBackend, ResultSerializer};
use crate::metadata::attach_service_schemas;
use crate::params::query_registry;
use crate::query::AdqlRunner;
use crate::upload::UploadReader;

/// The default asynchronous job list, as published by the protocol.
pub const ASYNC_LIST: &str = "async";

pub struct TapServiceBuilder {
    catalog: Catalog,
    features: FeatureSet,
    dialect: Arc<dyn SqlDialect>,
    backend: Arc<dyn QueryBackend>,
    file_manager: Arc<dyn FileManager>,
    serializers: Vec<Arc<dyn ResultSerializer>>,
    upload_reader: Option<Arc<dyn UploadReader>>,
    policy: JobPolicy,
    max_running: usize,
    output_cap: Option<u64>,
    backup: Option<(BackupMode, BackupFrequency)>,
    clock: Option<Arc<dyn Clock>>,
    scheduler: Option<Arc<Scheduler>>,
    publish_metadata: bool,
    with_obscore: bool,
}

impl TapServiceBuilder {
    pub fn new(
        catalog: Catalog,
        dialect: Arc<dyn SqlDialect>,
        backend: Arc<dyn QueryBackend>,
        file_manager: Arc<dyn FileManager>,
    ) -> Self {
        TapServiceBuilder {
            catalog,
            features: FeatureSet::permissive(),
            dialect,
            backend,
            file_manager,
            serializers: Vec::new(),
            upload_reader: None,
            policy: JobPolicy::default(),
            max_running: 4,
            output_cap: None,
            backup: None,
            clock: None,
            scheduler: None,
            publish_metadata: true,
            with_obscore: false,
        }
    }

    pub fn features(mut self, features: FeatureSet) -> Self {
        self.features = features;
        self
    }

    pub fn serializer(mut self, serializer: Arc<dyn ResultSerializer>) -> Self {
        self.serializers.push(serializer);
        self
    }

    pub fn upload_reader(mut self, reader: Arc<dyn UploadReader>) -> Self {
        self.upload_reader = Some(reader);
        self
    }

    pub fn policy(mut self, policy: JobPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn max_running(mut self, max_running: usize) -> Self {
        self.max_running = max_running;
        self
    }

    pub fn output_cap(mut self, cap: u64) -> Self {
        self.output_cap = Some(cap);
        self
    }

    pub fn backup(mut self, mode: BackupMode, frequency: BackupFrequency) -> Self {
        self.backup = Some((mode, frequency));
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn without_published_metadata(mut self) -> Self {
        self.publish_metadata = false;
        self
    }

    pub fn with_obscore(mut self) -> Self {
        self.with_obscore = true;
        self
    }

    pub fn build(self) -> Arc<TapService> {
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let scheduler = self
            .scheduler
            .unwrap_or_else(|| Scheduler::start(Arc::clone(&clock)));

        let mut catalog = self.catalog;
        if self.publish_metadata {
            attach_service_schemas(&mut catalog, self.with_obscore);
        }
        let catalog = Arc::new(RwLock::new(Arc::new(catalog)));
        let features = Arc::new(self.features);

        let runner = Arc::new(AdqlRunner {
            catalog: Arc::clone(&catalog),
            features: Arc::clone(&features),
            dialect: Arc::clone(&self.dialect),
            backend: Arc::clone(&self.backend),
            file_manager: Arc::clone(&self.file_manager),
            serializers: self.serializers.clone(),
            upload_reader: self.upload_reader,
            output_cap: self.output_cap,
        });

        let executor =
            ExecutionManager::new(self.max_running, Arc::clone(&scheduler), Arc::clone(&clock));
        let services = JobListServices {
            executor,
            scheduler: Arc::clone(&scheduler),
            clock: Arc::clone(&clock),
            file_manager: Arc::clone(&self.file_manager),
        };

        let registry = query_registry(&self.serializers, self.output_cap);
        let async_list = JobList::create(
            ASYNC_LIST,
            self.policy,
            registry,
            Arc::clone(&runner) as Arc<dyn skyql_uws::executor::JobRunner>,
            services.clone(),
        );

        let backup = self.backup.map(|(mode, frequency)| {
            let manager = BackupManager::new(
                mode,
                frequency,
                Arc::clone(&self.file_manager),
                Arc::clone(&clock),
            );
            manager.attach(&async_list);
            manager.install_interval(&scheduler);
            manager
        });

        let mut lists = IndexMap::new();
        lists.insert(ASYNC_LIST.to_string(), async_list);

        Arc::new(TapService {
            catalog,
            features,
            dialect: self.dialect,
            output_cap: self.output_cap,
            lists: Mutex::new(lists),
            backup,
            services,
            runner,
        })
    }
}

pub struct TapService {
    catalog: Arc<RwLock<Arc<Catalog>>>,
    features: Arc<FeatureSet>,
    dialect: Arc<dyn SqlDialect>,
    output_cap: Option<u64>,
    lists: Mutex<IndexMap<String, Arc<JobList>>>,
    backup: Option<Arc<BackupManager>>,
    services: JobListServices,
    runner: Arc<AdqlRunner>,
}

impl TapService {
    // ---- the query API ----------------------------------------------

    pub fn parse(&self, text: &str) -> Result<QueryExpr, ParseError> {
        skyql_adql::parse(text)
    }

    pub fn check(&self, query: &mut QueryExpr) -> Result<Vec<OutputColumn>, CheckError> {
        let catalog = self.catalog_snapshot();
        skyql_adql::check(query, &catalog, &self.features)
    }

    pub fn translate(&self, query: &QueryExpr) -> Result<Translation, TranslateError> {
        let catalog = self.catalog_snapshot();
        skyql_dialects::translate(
            query,
            self.dialect.as_ref(),
            &catalog,
            &self.features,
            &TranslateOptions {
                row_cap: self.output_cap,
            },
        )
    }

    pub fn render(&self, query: &QueryExpr) -> String {
        skyql_adql::render_adql(query)
    }

    // ---- metadata ---------------------------------------------------

    pub fn catalog_snapshot(&self) -> Arc<Catalog> {
        Arc::clone(&self.catalog.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Swap the whole published catalog, coarse-grained.
    pub fn reload_catalog(&self, catalog: Catalog) {
        *self.catalog.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(catalog);
    }

    pub fn features(&self) -> &FeatureSet {
        &self.features
    }

    // ---- jobs -------------------------------------------------------

    pub fn job_list(&self, name: &str) -> Option<Arc<JobList>> {
        self.lists
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    pub fn async_jobs(&self) -> Arc<JobList> {
        self.job_list(ASYNC_LIST).expect("the async list exists")
    }

    /// Add another named job list sharing the service's executor and
    /// query runner.
    pub fn add_job_list(&self, name: &str, policy: JobPolicy) -> Arc<JobList> {
        let registry = query_registry(&self.runner.serializers, self.output_cap);
        let list = JobList::create(
            name,
            policy,
            registry,
            Arc::clone(&self.runner) as Arc<dyn skyql_uws::executor::JobRunner>,
            self.services.clone(),
        );
        if let Some(backup) = &self.backup {
            backup.attach(&list);
        }
        self.lists
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), Arc::clone(&list));
        list
    }

    /// Create an asynchronous query job from raw request parameters.
    pub fn submit_query(
        &self,
        inputs: &[(String, String)],
        owner: Option<&JobOwner>,
    ) -> Result<String, UwsError> {
        if let (Some(backup), Some(owner)) = (&self.backup, owner) {
            backup.register_owner(owner.clone());
        }
        self.async_jobs().create_job(inputs, owner)
    }

    // ---- persistence ------------------------------------------------

    pub fn backup_manager(&self) -> Option<&Arc<BackupManager>> {
        self.backup.as_ref()
    }

    pub fn save_jobs(&self) -> Result<(), UwsError> {
        match &self.backup {
            Some(backup) => backup.save_all(),
            None => Ok(()),
        }
    }

    pub fn restore_jobs(
        &self,
        identifier: Option<&dyn UserIdentifier>,
    ) -> Result<RestoreReport, UwsError> {
        match &self.backup {
            Some(backup) => backup.restore_all(identifier),
            None => Ok(RestoreReport::default()),
        }
    }
}
