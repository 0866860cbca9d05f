//! Scripted test doubles
//!
//! These complement the in-memory adapters in the infrastructure crate:
//! they return canned responses and count calls so tests can assert on
//! exactly how a service talks to its collaborators.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mediaflow_core::{MediaflowError, MediaflowResult};
use mediaflow_domain::{
    Entity, ExecutionBackend, JobDescriptor, JobHandle, JobPatch, JobState, JobType,
    LabelSelector, PostWriteHook, WorkflowManifest,
};

/// Execution backend that serves a fixed job list and records every call
#[derive(Debug, Clone, Default)]
pub struct MockExecutionBackend {
    jobs: Arc<Mutex<Vec<JobDescriptor>>>,
    manifests: Arc<Mutex<Vec<WorkflowManifest>>>,
    selectors: Arc<Mutex<Vec<String>>>,
    patched: Arc<Mutex<Vec<String>>>,
    reject_patches: Arc<AtomicBool>,
    unreachable_jobs: Arc<Mutex<Vec<String>>>,
    fail_create: Arc<AtomicBool>,
}

impl MockExecutionBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_jobs(jobs: Vec<JobDescriptor>) -> Self {
        let backend = Self::new();
        *backend.jobs.lock().unwrap() = jobs;
        backend
    }

    /// Make `patch_job` answer `false` for every job
    pub fn reject_patches(&self) {
        self.reject_patches.store(true, Ordering::SeqCst);
    }

    /// Make `patch_job` fail with `BackendUnavailable` for one job
    pub fn fail_patch_for(&self, name: &str) {
        self.unreachable_jobs.lock().unwrap().push(name.to_string());
    }

    /// Make `create_job` fail with `BackendRejected`
    pub fn fail_create(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    pub fn create_calls(&self) -> usize {
        self.manifests.lock().unwrap().len()
    }

    pub fn list_calls(&self) -> usize {
        self.selectors.lock().unwrap().len()
    }

    pub fn patch_calls(&self) -> usize {
        self.patched.lock().unwrap().len()
    }

    pub fn manifests(&self) -> Vec<WorkflowManifest> {
        self.manifests.lock().unwrap().clone()
    }

    pub fn selectors(&self) -> Vec<String> {
        self.selectors.lock().unwrap().clone()
    }

    pub fn patched_jobs(&self) -> Vec<String> {
        self.patched.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExecutionBackend for MockExecutionBackend {
    async fn create_job(&self, manifest: &WorkflowManifest) -> MediaflowResult<JobHandle> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(MediaflowError::BackendRejected(
                "admission webhook denied".to_string(),
            ));
        }
        let mut manifests = self.manifests.lock().unwrap();
        manifests.push(manifest.clone());
        let prefix = manifest
            .metadata
            .generate_name
            .clone()
            .unwrap_or_else(|| "workflow-".to_string());
        Ok(JobHandle {
            name: format!("{}{}", prefix, manifests.len()),
            namespace: "default".to_string(),
            uid: None,
        })
    }

    async fn list_jobs(&self, selector: &LabelSelector) -> MediaflowResult<Vec<JobDescriptor>> {
        self.selectors.lock().unwrap().push(selector.to_string());
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|job| selector.matches(&job.labels))
            .cloned()
            .collect())
    }

    async fn patch_job(&self, name: &str, _patch: &JobPatch) -> MediaflowResult<bool> {
        self.patched.lock().unwrap().push(name.to_string());
        if self.unreachable_jobs.lock().unwrap().iter().any(|n| n == name) {
            return Err(MediaflowError::BackendUnavailable(format!(
                "connection reset while patching {name}"
            )));
        }
        Ok(!self.reject_patches.load(Ordering::SeqCst))
    }
}

/// A job descriptor carrying the standard ingest labels
pub fn job_descriptor(
    name: &str,
    job_type: JobType,
    project: i64,
    gid: &str,
    uid: &str,
    state: JobState,
) -> JobDescriptor {
    let labels = BTreeMap::from([
        ("job_type".to_string(), job_type.as_str().to_string()),
        ("project".to_string(), project.to_string()),
        ("gid".to_string(), gid.to_string()),
        ("uid".to_string(), uid.to_string()),
        ("user".to_string(), "1".to_string()),
    ]);
    JobDescriptor {
        name: name.to_string(),
        labels,
        annotations: BTreeMap::new(),
        state,
        finished_at: None,
    }
}

/// Post-write hook that records entity ids and can be told to fail
#[derive(Debug, Default)]
pub struct RecordingHook {
    saved: Mutex<Vec<i64>>,
    deleted: Mutex<Vec<i64>>,
    calls: AtomicUsize,
    fail: bool,
}

impl RecordingHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn saved(&self) -> Vec<i64> {
        self.saved.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<i64> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn outcome(&self) -> MediaflowResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(MediaflowError::DocumentStore("hook failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PostWriteHook for RecordingHook {
    fn name(&self) -> &'static str {
        if self.fail {
            "failing"
        } else {
            "recording"
        }
    }

    async fn after_save(&self, entity: &Entity) -> MediaflowResult<()> {
        self.saved.lock().unwrap().push(entity.id());
        self.outcome()
    }

    async fn before_delete(&self, entity: &Entity) -> MediaflowResult<()> {
        self.deleted.lock().unwrap().push(entity.id());
        self.outcome()
    }
}
