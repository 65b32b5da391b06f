//! In-memory collaborators for reconciler tests

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use canary_core::domain::meta::{ObjectKey, ObjectMeta, OwnerReference};
use canary_core::domain::release::{
    ChartSource, ChartSpec, CleanupSpec, DeploymentSpec, HelmReleaseInfo, Release, ReleaseSpec,
    ReleaseStatus, RepositoryChart,
};
use canary_core::domain::test_job::{
    HooksSpec, ReleaseRef, ScheduleSpec, TestJob, TestJobSpec, TestJobStatus, TestSpec,
};
use canary_core::domain::worker::{
    MANAGED_BY_LABEL, MANAGED_BY_VALUE, OWNER_UID_LABEL, WorkerCondition, WorkerRecord,
    WorkerStatus, WorkerUnit,
};
use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use crate::repository::{JobRepository, ReleaseRepository, StoreError};
use crate::service::cleanup::{CleanupError, CleanupRunner};
use crate::service::helm::{InstallError, ReleaseInstaller};
use crate::worker::{WorkerError, WorkerRuntime};

pub const TEST_IMAGE: &str = "registry.example.com/canary:1";

/// 2024-01-01 at the given UTC time of day
pub fn at(hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, hour, minute, second).unwrap()
}

pub fn sample_job(name: &str) -> TestJob {
    let mut job = TestJob::new(
        "qa",
        name,
        TestJobSpec {
            release_ref: ReleaseRef {
                name: "shop".to_string(),
                namespace: String::new(),
            },
            schedule: ScheduleSpec::once(Duration::ZERO),
            test: TestSpec {
                image: TEST_IMAGE.to_string(),
                ..Default::default()
            },
            hooks: HooksSpec::default(),
            cleanup: None,
        },
    );
    job.metadata.uid = Uuid::new_v4();
    job.metadata.resource_version = 1;
    job.metadata.generation = 1;
    job.metadata.creation_timestamp = Some(at(0, 0, 0));
    job
}

pub fn sample_release() -> Release {
    let mut release = Release::new(
        "qa",
        "shop",
        ReleaseSpec {
            chart: ChartSpec {
                source: ChartSource::Repository,
                repository: Some(RepositoryChart {
                    url: "https://charts.example.com".to_string(),
                    name: "shop".to_string(),
                    version: String::new(),
                }),
                git: None,
                local: None,
            },
            values: Default::default(),
            deployment: DeploymentSpec {
                namespace: "shop-qa".to_string(),
                ..Default::default()
            },
            cleanup: CleanupSpec::default(),
        },
    );
    release.metadata.uid = Uuid::new_v4();
    release.metadata.resource_version = 1;
    release.metadata.generation = 1;
    release.metadata.creation_timestamp = Some(at(0, 0, 0));
    release
}

pub fn sample_unit(name: &str) -> WorkerUnit {
    let owner_uid = Uuid::new_v4();
    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());
    labels.insert(OWNER_UID_LABEL.to_string(), owner_uid.to_string());

    WorkerUnit {
        name: name.to_string(),
        namespace: "qa".to_string(),
        owner: OwnerReference {
            api_version: canary_core::domain::meta::API_VERSION.to_string(),
            kind: canary_core::domain::test_job::KIND.to_string(),
            name: "nightly".to_string(),
            uid: owner_uid,
            controller: true,
        },
        labels,
        image: TEST_IMAGE.to_string(),
        command: vec!["/bin/sh".to_string(), "-c".to_string(), "true".to_string()],
        env: Vec::new(),
        restart_policy: Default::default(),
        active_deadline: None,
    }
}

// =============================================================================
// Workers
// =============================================================================

/// What freshly created workers look like
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerBehavior {
    /// Created workers stay Pending until a test changes them
    StayPending,
    /// Created workers complete immediately
    CompleteOnCreate,
    /// Every create is rejected by the runtime
    RejectCreate,
}

#[derive(Default)]
struct WorkerState {
    workers: BTreeMap<(String, String), WorkerRecord>,
    created: usize,
    hide_next_get: bool,
    failing: Vec<String>,
    deleted: Vec<String>,
    logs: String,
}

pub struct FakeWorkers {
    behavior: WorkerBehavior,
    state: Mutex<WorkerState>,
}

impl FakeWorkers {
    pub fn new(behavior: WorkerBehavior) -> Self {
        Self {
            behavior,
            state: Mutex::new(WorkerState::default()),
        }
    }

    /// Number of creates that reached the runtime
    pub fn create_count(&self) -> usize {
        self.state.lock().unwrap().created
    }

    pub fn names(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut names: Vec<_> = state.workers.values().map(|w| w.name.clone()).collect();
        names.sort();
        names
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }

    /// Makes the next lookup miss, as if a concurrent create had not
    /// become visible yet
    pub fn hide_next_get(&self) {
        self.state.lock().unwrap().hide_next_get = true;
    }

    /// Workers whose name contains `pattern` fail as soon as they are created
    pub fn fail_workers_matching(&self, pattern: &str) {
        self.state.lock().unwrap().failing.push(pattern.to_string());
    }

    pub fn set_logs(&self, logs: &str) {
        self.state.lock().unwrap().logs = logs.to_string();
    }

    pub fn insert_existing(&self, unit: &WorkerUnit, status: WorkerStatus) {
        let record = WorkerRecord {
            name: unit.name.clone(),
            namespace: unit.namespace.clone(),
            labels: unit.labels.clone(),
            status,
        };
        self.state
            .lock()
            .unwrap()
            .workers
            .insert((unit.namespace.clone(), unit.name.clone()), record);
    }

    /// Replaces the status of every worker called `name`
    pub fn set_status(&self, name: &str, status: WorkerStatus) {
        let mut state = self.state.lock().unwrap();
        for record in state.workers.values_mut().filter(|w| w.name == name) {
            record.status = status.clone();
        }
    }
}

pub fn completed_status() -> WorkerStatus {
    WorkerStatus {
        conditions: vec![WorkerCondition::complete()],
        active: 0,
        started_at: Some(at(0, 0, 0)),
        finished_at: Some(at(0, 0, 1)),
    }
}

pub fn failed_status(message: &str) -> WorkerStatus {
    WorkerStatus {
        conditions: vec![WorkerCondition::failed(message)],
        active: 0,
        started_at: Some(at(0, 0, 0)),
        finished_at: Some(at(0, 0, 1)),
    }
}

#[async_trait]
impl WorkerRuntime for FakeWorkers {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<WorkerRecord>, WorkerError> {
        let mut state = self.state.lock().unwrap();
        if state.hide_next_get {
            state.hide_next_get = false;
            return Ok(None);
        }
        Ok(state
            .workers
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn create(&self, unit: &WorkerUnit) -> Result<WorkerRecord, WorkerError> {
        let mut state = self.state.lock().unwrap();
        if self.behavior == WorkerBehavior::RejectCreate {
            return Err(WorkerError::Command("quota exceeded".to_string()));
        }

        state.created += 1;
        let key = (unit.namespace.clone(), unit.name.clone());
        if state.workers.contains_key(&key) {
            return Err(WorkerError::AlreadyExists(unit.name.clone()));
        }

        let status = if state.failing.iter().any(|p| unit.name.contains(p.as_str())) {
            failed_status("exit code 1")
        } else if self.behavior == WorkerBehavior::CompleteOnCreate {
            completed_status()
        } else {
            WorkerStatus::default()
        };

        let record = WorkerRecord {
            name: unit.name.clone(),
            namespace: unit.namespace.clone(),
            labels: unit.labels.clone(),
            status,
        };
        state.workers.insert(key, record.clone());
        Ok(record)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), WorkerError> {
        let mut state = self.state.lock().unwrap();
        state
            .workers
            .remove(&(namespace.to_string(), name.to_string()));
        state.deleted.push(name.to_string());
        Ok(())
    }

    async fn list_managed(&self) -> Result<Vec<WorkerRecord>, WorkerError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .workers
            .values()
            .filter(|w| w.labels.get(MANAGED_BY_LABEL).map(String::as_str) == Some(MANAGED_BY_VALUE))
            .cloned()
            .collect())
    }

    async fn logs(&self, _namespace: &str, _name: &str, _tail: usize) -> Result<String, WorkerError> {
        Ok(self.state.lock().unwrap().logs.clone())
    }
}

// =============================================================================
// Object stores
// =============================================================================

pub trait StoredObject: Clone + Send + Sync + 'static {
    type Status: Clone + Send + Sync;

    fn meta(&self) -> &ObjectMeta;
    fn meta_mut(&mut self) -> &mut ObjectMeta;
    fn put_status(&mut self, status: Self::Status);
}

impl StoredObject for TestJob {
    type Status = TestJobStatus;

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn put_status(&mut self, status: TestJobStatus) {
        self.status = status;
    }
}

impl StoredObject for Release {
    type Status = ReleaseStatus;

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn put_status(&mut self, status: ReleaseStatus) {
        self.status = status;
    }
}

/// Store with the server's compare-and-swap semantics
pub struct FakeStore<T> {
    objects: Mutex<BTreeMap<ObjectKey, T>>,
    writes: AtomicUsize,
}

pub type FakeJobs = FakeStore<TestJob>;
pub type FakeReleases = FakeStore<Release>;

impl<T: StoredObject> FakeStore<T> {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn with(objects: impl IntoIterator<Item = T>) -> Self {
        let store = Self::new();
        for object in objects {
            store.insert(object);
        }
        store
    }

    pub fn insert(&self, object: T) {
        let key = object.meta().key();
        self.objects.lock().unwrap().insert(key, object);
    }

    pub fn remove(&self, key: &ObjectKey) {
        self.objects.lock().unwrap().remove(key);
    }

    pub fn object(&self, key: &ObjectKey) -> T {
        self.objects.lock().unwrap()[key].clone()
    }

    /// Simulates an edit by another client
    pub fn touch(&self, key: &ObjectKey) {
        let mut objects = self.objects.lock().unwrap();
        if let Some(object) = objects.get_mut(key) {
            object.meta_mut().resource_version += 1;
        }
    }

    /// Number of successful status writes
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn list_all(&self) -> Vec<T> {
        self.objects.lock().unwrap().values().cloned().collect()
    }

    fn get_one(&self, key: &ObjectKey) -> Option<T> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    fn swap_status(
        &self,
        key: &ObjectKey,
        resource_version: i64,
        status: &T::Status,
    ) -> Result<T, StoreError> {
        let mut objects = self.objects.lock().unwrap();
        let object = objects
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;

        if object.meta().resource_version != resource_version {
            return Err(StoreError::Conflict(key.clone()));
        }

        object.put_status(status.clone());
        object.meta_mut().resource_version += 1;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(object.clone())
    }
}

#[async_trait]
impl JobRepository for FakeJobs {
    async fn list(&self) -> Result<Vec<TestJob>, StoreError> {
        Ok(self.list_all())
    }

    async fn get(&self, key: &ObjectKey) -> Result<Option<TestJob>, StoreError> {
        Ok(self.get_one(key))
    }

    async fn update_status(
        &self,
        key: &ObjectKey,
        resource_version: i64,
        status: &TestJobStatus,
    ) -> Result<TestJob, StoreError> {
        self.swap_status(key, resource_version, status)
    }
}

#[async_trait]
impl ReleaseRepository for FakeReleases {
    async fn list(&self) -> Result<Vec<Release>, StoreError> {
        Ok(self.list_all())
    }

    async fn get(&self, key: &ObjectKey) -> Result<Option<Release>, StoreError> {
        Ok(self.get_one(key))
    }

    async fn update_status(
        &self,
        key: &ObjectKey,
        resource_version: i64,
        status: &ReleaseStatus,
    ) -> Result<Release, StoreError> {
        self.swap_status(key, resource_version, status)
    }
}

// =============================================================================
// Installer and cleanup
// =============================================================================

/// Records installer calls as "install <name>" / "uninstall <name>"
#[derive(Default)]
pub struct FakeInstaller {
    calls: Mutex<Vec<String>>,
    fail_installs: AtomicBool,
}

impl FakeInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_installs(&self, fail: bool) {
        self.fail_installs.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReleaseInstaller for FakeInstaller {
    async fn install_or_upgrade(&self, release: &Release) -> Result<HelmReleaseInfo, InstallError> {
        let mut calls = self.calls.lock().unwrap();
        calls.push(format!("install {}", release.metadata.name));

        if self.fail_installs.load(Ordering::SeqCst) {
            return Err(InstallError::Command {
                command: "upgrade".to_string(),
                message: "timed out waiting for the condition".to_string(),
            });
        }

        let version = calls.iter().filter(|c| c.starts_with("install")).count() as i64;
        Ok(HelmReleaseInfo {
            name: release.metadata.name.clone(),
            version,
            status: "deployed".to_string(),
        })
    }

    async fn uninstall(&self, release: &Release) -> Result<(), InstallError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("uninstall {}", release.metadata.name));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeCleanup {
    calls: Mutex<Vec<(String, CleanupSpec)>>,
    fail: AtomicBool,
}

impl FakeCleanup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<(String, CleanupSpec)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CleanupRunner for FakeCleanup {
    async fn cleanup_namespace(
        &self,
        namespace: &str,
        options: CleanupSpec,
    ) -> Result<(), CleanupError> {
        self.calls
            .lock()
            .unwrap()
            .push((namespace.to_string(), options));

        if self.fail.load(Ordering::SeqCst) {
            return Err(CleanupError::Command {
                command: "delete".to_string(),
                message: "forbidden".to_string(),
            });
        }
        Ok(())
    }
}
