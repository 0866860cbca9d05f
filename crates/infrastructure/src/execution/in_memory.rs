use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use mediaflow_core::{MediaflowError, MediaflowResult};
use mediaflow_domain::{
    ExecutionBackend, JobDescriptor, JobEvent, JobHandle, JobPatch, JobState, LabelSelector,
    TtlPolicy, WorkflowManifest,
};

#[derive(Debug, Clone)]
struct StoredJob {
    manifest: WorkflowManifest,
    descriptor: JobDescriptor,
}

/// 内存执行后端
///
/// 保存提交的工作流并模拟后端的状态上报，可切换为不可达以测试错误路径。
#[derive(Debug, Default, Clone)]
pub struct InMemoryExecutionBackend {
    jobs: Arc<RwLock<Vec<StoredJob>>>,
    patches: Arc<RwLock<Vec<(String, JobPatch)>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryExecutionBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> MediaflowResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(MediaflowError::BackendUnavailable(
                "执行后端不可达".to_string(),
            ));
        }
        Ok(())
    }

    /// 模拟后端上报的生命周期事件，非法迁移返回校验错误
    pub async fn report(&self, name: &str, event: JobEvent) -> MediaflowResult<JobState> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .iter_mut()
            .find(|j| j.descriptor.name == name)
            .ok_or_else(|| MediaflowError::not_found("作业", name))?;
        job.descriptor.apply(event, Utc::now())
    }

    /// 回收超过保留时间的终态作业，返回回收数量
    pub async fn collect_garbage(&self, policy: &TtlPolicy, now: DateTime<Utc>) -> usize {
        let mut jobs = self.jobs.write().await;
        let collected = jobs
            .iter_mut()
            .map(|j| j.descriptor.collect_if_expired(policy, now))
            .filter(|collected| *collected)
            .count();
        if collected > 0 {
            debug!("回收了 {} 个过期作业", collected);
        }
        collected
    }

    pub async fn submitted(&self) -> Vec<WorkflowManifest> {
        self.jobs
            .read()
            .await
            .iter()
            .map(|j| j.manifest.clone())
            .collect()
    }

    pub async fn patches(&self) -> Vec<(String, JobPatch)> {
        self.patches.read().await.clone()
    }

    pub async fn state_of(&self, name: &str) -> Option<JobState> {
        self.jobs
            .read()
            .await
            .iter()
            .find(|j| j.descriptor.name == name)
            .map(|j| j.descriptor.state)
    }
}

#[async_trait]
impl ExecutionBackend for InMemoryExecutionBackend {
    async fn create_job(&self, manifest: &WorkflowManifest) -> MediaflowResult<JobHandle> {
        self.check_available()?;
        let name = match (&manifest.metadata.name, &manifest.metadata.generate_name) {
            (Some(name), _) => name.clone(),
            (None, Some(prefix)) => format!("{prefix}{}", &Uuid::new_v4().simple().to_string()[..5]),
            (None, None) => {
                return Err(MediaflowError::BackendRejected(
                    "工作流缺少名称".to_string(),
                ))
            }
        };

        let mut jobs = self.jobs.write().await;
        if jobs.iter().any(|j| j.descriptor.name == name) {
            return Err(MediaflowError::BackendRejected(format!(
                "工作流 {name} 已存在"
            )));
        }
        jobs.push(StoredJob {
            manifest: manifest.clone(),
            descriptor: JobDescriptor {
                name: name.clone(),
                labels: manifest.metadata.labels.clone(),
                annotations: manifest.metadata.annotations.clone(),
                state: JobState::Submitted,
                finished_at: None,
            },
        });
        Ok(JobHandle {
            name,
            namespace: "default".to_string(),
            uid: Some(Uuid::new_v4().to_string()),
        })
    }

    async fn list_jobs(&self, selector: &LabelSelector) -> MediaflowResult<Vec<JobDescriptor>> {
        self.check_available()?;
        Ok(self
            .jobs
            .read()
            .await
            .iter()
            .filter(|j| j.descriptor.state != JobState::GarbageCollected)
            .filter(|j| selector.matches(&j.descriptor.labels))
            .map(|j| j.descriptor.clone())
            .collect())
    }

    async fn patch_job(&self, name: &str, patch: &JobPatch) -> MediaflowResult<bool> {
        self.check_available()?;
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.iter_mut().find(|j| j.descriptor.name == name) else {
            return Ok(false);
        };
        self.patches
            .write()
            .await
            .push((name.to_string(), patch.clone()));
        if job.descriptor.state.is_cancellable() {
            job.descriptor.apply(JobEvent::CancelRequested, Utc::now())?;
        }
        Ok(true)
    }
}
