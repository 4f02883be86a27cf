//! In-memory doubles shared by the worker's unit tests

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use strand_backend::{BackendError, ExecutionBackend};
use strand_core::domain::backend::{BackendHandle, BackendStatus};
use strand_core::domain::job::JobRecord;
use strand_core::domain::spec::{DEFAULT_CLOUD, JobSpec};
use strand_core::dto::job::JobRecordUpdate;

use crate::repository::{JobQueue, JobRecordRepository};
use crate::runner::{OnDoneHook, Runner};

pub type EventLog = Arc<Mutex<Vec<String>>>;

/// Execution backend keeping its jobs in a map
///
/// Unknown jobs poll as `Failed`, like a record deleted out-of-band.
pub struct MockBackend {
    statuses: Mutex<BTreeMap<String, BackendStatus>>,
    clouds: Mutex<BTreeMap<String, String>>,
    specs: Mutex<Vec<JobSpec>>,
    deleted: Mutex<Vec<BackendHandle>>,
    rejected: Mutex<HashSet<String>>,
    failing: Mutex<HashSet<String>>,
    auto_complete: bool,
    polls: AtomicUsize,
    detail_fetches: AtomicUsize,
    events: EventLog,
}

impl MockBackend {
    /// Submitted jobs stay `Running` until told otherwise
    pub fn new() -> Self {
        Self::build(false)
    }

    /// Submitted jobs complete immediately
    pub fn auto_complete() -> Self {
        Self::build(true)
    }

    fn build(auto_complete: bool) -> Self {
        Self {
            statuses: Mutex::new(BTreeMap::new()),
            clouds: Mutex::new(BTreeMap::new()),
            specs: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            rejected: Mutex::new(HashSet::new()),
            failing: Mutex::new(HashSet::new()),
            auto_complete,
            polls: AtomicUsize::new(0),
            detail_fetches: AtomicUsize::new(0),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn set_status(&self, name: &str, status: BackendStatus) {
        self.statuses.lock().unwrap().insert(name.to_string(), status);
    }

    /// Submissions of `name` are refused by the control plane
    pub fn reject(&self, name: &str) {
        self.rejected.lock().unwrap().insert(name.to_string());
    }

    /// `name` is accepted but fails remotely
    pub fn fail(&self, name: &str) {
        self.failing.lock().unwrap().insert(name.to_string());
    }

    /// Registers jobs created outside the worker
    pub fn add_jobs<'a>(&self, names: impl IntoIterator<Item = &'a str>) {
        self.add_jobs_in(DEFAULT_CLOUD, names);
    }

    pub fn add_jobs_in<'a>(&self, cloud: &str, names: impl IntoIterator<Item = &'a str>) {
        for name in names {
            self.set_status(name, BackendStatus::Running);
            self.clouds
                .lock()
                .unwrap()
                .insert(name.to_string(), cloud.to_string());
        }
    }

    pub fn submitted(&self) -> Vec<String> {
        self.specs
            .lock()
            .unwrap()
            .iter()
            .map(|spec| spec.name().to_string())
            .collect()
    }

    pub fn submitted_specs(&self) -> Vec<JobSpec> {
        self.specs.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted
            .lock()
            .unwrap()
            .iter()
            .map(|handle| handle.name().to_string())
            .collect()
    }

    /// Deleted jobs as `name@cloud`
    pub fn deleted_handles(&self) -> Vec<String> {
        self.deleted
            .lock()
            .unwrap()
            .iter()
            .map(|handle| handle.to_string())
            .collect()
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn detail_fetches(&self) -> usize {
        self.detail_fetches.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> EventLog {
        self.events.clone()
    }

    pub fn event_log(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl ExecutionBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn submit(&self, spec: &JobSpec) -> strand_backend::Result<BackendHandle> {
        if self.rejected.lock().unwrap().contains(spec.name()) {
            return Err(BackendError::api_error(422, "image not allowed"));
        }

        let status = if self.failing.lock().unwrap().contains(spec.name()) {
            BackendStatus::Failed
        } else if self.auto_complete {
            BackendStatus::Complete
        } else {
            BackendStatus::Running
        };

        self.set_status(spec.name(), status);
        self.clouds
            .lock()
            .unwrap()
            .insert(spec.name().to_string(), spec.cloud().to_string());
        self.specs.lock().unwrap().push(spec.clone());
        self.record(format!("submit {}", spec.name()));
        Ok(BackendHandle::new(spec.name(), spec.cloud()))
    }

    async fn poll_status(&self, handle: &BackendHandle) -> BackendStatus {
        self.polls.fetch_add(1, Ordering::SeqCst);
        self.statuses
            .lock()
            .unwrap()
            .get(handle.name())
            .copied()
            .unwrap_or(BackendStatus::Failed)
    }

    async fn fetch_error_detail(&self, handle: &BackendHandle) -> String {
        self.detail_fetches.fetch_add(1, Ordering::SeqCst);
        format!("{}: exit code 1", handle.name())
    }

    async fn delete(&self, handle: &BackendHandle) -> strand_backend::Result<()> {
        self.statuses.lock().unwrap().remove(handle.name());
        self.deleted.lock().unwrap().push(handle.clone());
        self.record(format!("delete {}", handle.name()));
        Ok(())
    }

    async fn list_job_names(&self, cloud: &str) -> strand_backend::Result<Vec<String>> {
        let statuses = self.statuses.lock().unwrap();
        let clouds = self.clouds.lock().unwrap();
        let names: BTreeSet<String> = statuses
            .keys()
            .filter(|name| clouds.get(*name).map(String::as_str) == Some(cloud))
            .cloned()
            .collect();
        Ok(names.into_iter().collect())
    }

    async fn list_all_job_names(&self) -> strand_backend::Result<Vec<String>> {
        let names: BTreeSet<String> = self.statuses.lock().unwrap().keys().cloned().collect();
        Ok(names.into_iter().collect())
    }
}

/// Hook appending `hook <stage>` to a shared event log
pub struct RecordingHook {
    events: EventLog,
    fail: bool,
}

impl RecordingHook {
    pub fn new(events: EventLog) -> Self {
        Self {
            events,
            fail: false,
        }
    }

    pub fn failing(events: EventLog) -> Self {
        Self { events, fail: true }
    }
}

#[async_trait]
impl OnDoneHook for RecordingHook {
    async fn on_stage_done(&self, stage: &str, _outputs: &[PathBuf]) -> Result<()> {
        self.events.lock().unwrap().push(format!("hook {}", stage));
        if self.fail {
            anyhow::bail!("could not capture results of {}", stage);
        }
        Ok(())
    }
}

/// Runner whose state is set directly by the test
pub struct MockRunner {
    name: String,
    ready: AtomicBool,
    started: AtomicBool,
    done: AtomicBool,
    failed: AtomicBool,
    finished: AtomicBool,
    done_on_start: AtomicBool,
    fail_on_start: AtomicBool,
    on_done_error: AtomicBool,
    error: Mutex<Option<String>>,
    dependencies: Vec<Arc<MockRunner>>,
    starts: AtomicUsize,
    on_done_calls: AtomicUsize,
    deletes: AtomicUsize,
    events: EventLog,
}

impl MockRunner {
    pub fn new(name: &str) -> Self {
        Self::with_events(name, Arc::new(Mutex::new(Vec::new())))
    }

    pub fn with_events(name: &str, events: EventLog) -> Self {
        Self {
            name: name.to_string(),
            ready: AtomicBool::new(true),
            started: AtomicBool::new(false),
            done: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            done_on_start: AtomicBool::new(false),
            fail_on_start: AtomicBool::new(false),
            on_done_error: AtomicBool::new(false),
            error: Mutex::new(None),
            dependencies: Vec::new(),
            starts: AtomicUsize::new(0),
            on_done_calls: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            events,
        }
    }

    /// Ready only once every dependency went through `on_done`
    pub fn depends_on(mut self, dependency: Arc<MockRunner>) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// Reports done on the first poll after `start`
    pub fn done_on_start(self) -> Self {
        self.done_on_start.store(true, Ordering::SeqCst);
        self
    }

    pub fn fail_on_start(self, error: &str) -> Self {
        self.fail_on_start.store(true, Ordering::SeqCst);
        *self.error.lock().unwrap() = Some(error.to_string());
        self
    }

    pub fn on_done_error(self) -> Self {
        self.on_done_error.store(true, Ordering::SeqCst);
        self
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn set_done(&self, done: bool) {
        self.done.store(done, Ordering::SeqCst);
    }

    pub fn set_failed(&self, failed: bool) {
        self.failed.store(failed, Ordering::SeqCst);
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn on_done_calls(&self) -> usize {
        self.on_done_calls.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    fn record(&self, event: &str) {
        self.events
            .lock()
            .unwrap()
            .push(format!("{} {}", event, self.name));
    }
}

#[async_trait]
impl Runner for MockRunner {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
            && self
                .dependencies
                .iter()
                .all(|dependency| dependency.is_finished())
    }

    fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    async fn start(&self) {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.started.store(true, Ordering::SeqCst);
        self.record("start");
        if self.fail_on_start.load(Ordering::SeqCst) {
            self.set_failed(true);
        }
    }

    async fn is_done(&self) -> bool {
        if self.done_on_start.load(Ordering::SeqCst) && self.is_started() {
            self.set_done(true);
        }
        self.done.load(Ordering::SeqCst)
    }

    async fn is_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    async fn error_message(&self) -> Option<String> {
        self.error.lock().unwrap().clone()
    }

    async fn on_done(&self) -> Result<()> {
        self.on_done_calls.fetch_add(1, Ordering::SeqCst);
        self.record("on_done");
        if self.on_done_error.load(Ordering::SeqCst) {
            anyhow::bail!("could not store results of {}", self.name);
        }
        self.finished.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    async fn delete_job_record(&self) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.record("delete");
        Ok(())
    }
}

/// Status hook recording every update
#[derive(Default)]
pub struct MockRecords {
    updates: Mutex<Vec<(Uuid, JobRecordUpdate)>>,
}

impl MockRecords {
    pub fn updates(&self) -> Vec<(Uuid, JobRecordUpdate)> {
        self.updates.lock().unwrap().clone()
    }

    pub fn updates_for(&self, job_id: Uuid) -> Vec<JobRecordUpdate> {
        self.updates()
            .into_iter()
            .filter(|(id, _)| *id == job_id)
            .map(|(_, update)| update)
            .collect()
    }
}

#[async_trait]
impl JobRecordRepository for MockRecords {
    async fn update_job_record(&self, job_id: Uuid, update: JobRecordUpdate) -> Result<()> {
        self.updates.lock().unwrap().push((job_id, update));
        Ok(())
    }
}

/// Queue serving a fixed list of jobs
#[derive(Default)]
pub struct MockQueue {
    jobs: Mutex<VecDeque<JobRecord>>,
}

impl MockQueue {
    pub fn with_jobs(jobs: impl IntoIterator<Item = JobRecord>) -> Self {
        Self {
            jobs: Mutex::new(jobs.into_iter().collect()),
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }
}

#[async_trait]
impl JobQueue for MockQueue {
    async fn dequeue(&self) -> Result<Option<JobRecord>> {
        Ok(self.jobs.lock().unwrap().pop_front())
    }
}
