use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use mediaflow_core::{MediaflowError, MediaflowResult};
use mediaflow_domain::workflow::WorkflowManifest;
use mediaflow_domain::{
    ExecutionBackend, JobDescriptor, JobHandle, JobPatch, JobState, JobType, LabelSelector,
    ProgressContext, TtlPolicy, LABEL_JOB_TYPE,
};

use crate::dependency_checker::DependencyChecker;

#[derive(Debug, Default, Clone)]
pub struct JobStatusSummary {
    pub submitted: usize,
    pub running: usize,
    pub cancelling: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl JobStatusSummary {
    pub fn from_jobs(jobs: &[JobDescriptor]) -> Self {
        let mut summary = Self::default();
        for job in jobs {
            match job.state {
                JobState::Submitted => summary.submitted += 1,
                JobState::Running => summary.running += 1,
                JobState::Cancelling => summary.cancelling += 1,
                JobState::Succeeded => summary.succeeded += 1,
                JobState::Failed => summary.failed += 1,
                JobState::GarbageCollected => {}
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.active() + self.finished()
    }

    pub fn active(&self) -> usize {
        self.submitted + self.running + self.cancelling
    }

    pub fn finished(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// 作业生命周期管理
///
/// 取消是协作式的：只向后端发送停止信号，正在运行的步骤如何收尾由后端决定。
/// 超过保留时间的终态作业视为已回收，不再参与查询与统计。
pub struct JobManager {
    backend: Arc<dyn ExecutionBackend>,
    ttl: TtlPolicy,
}

impl JobManager {
    pub fn new(backend: Arc<dyn ExecutionBackend>) -> Self {
        Self {
            backend,
            ttl: TtlPolicy::default(),
        }
    }

    pub fn with_ttl_policy(mut self, ttl: TtlPolicy) -> Self {
        self.ttl = ttl;
        self
    }

    /// 列出匹配的作业并回收已过期的终态作业
    pub async fn live_jobs_at(
        &self,
        selector: &LabelSelector,
        now: DateTime<Utc>,
    ) -> MediaflowResult<Vec<JobDescriptor>> {
        let mut jobs = self.backend.list_jobs(selector).await?;
        for job in jobs.iter_mut() {
            if job.collect_if_expired(&self.ttl, now) {
                debug!("作业 {} 已超过保留时间", job.name);
            }
        }
        jobs.retain(|job| job.state != JobState::GarbageCollected);
        Ok(jobs)
    }

    async fn live_jobs(&self, selector: &LabelSelector) -> MediaflowResult<Vec<JobDescriptor>> {
        self.live_jobs_at(selector, Utc::now()).await
    }

    /// 校验后提交，后端不可用时直接返回错误，不做重试
    pub async fn submit(&self, manifest: &WorkflowManifest) -> MediaflowResult<JobHandle> {
        DependencyChecker::validate(manifest)?;

        let job_type = manifest
            .metadata
            .labels
            .get(LABEL_JOB_TYPE)
            .cloned()
            .unwrap_or_default();
        let handle = self.backend.create_job(manifest).await.map_err(|e| {
            error!("提交工作流失败: {}", e);
            e
        })?;

        metrics::counter!("mediaflow_workflows_submitted_total", "job_type" => job_type)
            .increment(1);
        info!("工作流 {} 已提交到命名空间 {}", handle.name, handle.namespace);
        Ok(handle)
    }

    /// 第一个匹配作业的项目标签
    pub async fn find_owning_project(
        &self,
        selector: &LabelSelector,
    ) -> MediaflowResult<Option<i64>> {
        let jobs = self.live_jobs(selector).await?;
        let project = jobs.first().and_then(JobDescriptor::project);
        debug!("选择器 {} 对应项目 {:?}", selector, project);
        Ok(project)
    }

    pub async fn summarize(&self, selector: &LabelSelector) -> MediaflowResult<JobStatusSummary> {
        let jobs = self.live_jobs(selector).await?;
        Ok(JobStatusSummary::from_jobs(&jobs))
    }

    fn can_cancel(job: &JobDescriptor) -> bool {
        match job.state {
            JobState::Submitted | JobState::Running => true,
            JobState::Cancelling => {
                debug!("作业 {} 已在取消中，跳过", job.name);
                false
            }
            state => {
                debug!("作业 {} 已处于终态 {:?}，跳过", job.name, state);
                false
            }
        }
    }

    /// 向选择器匹配的每个作业请求停止；至少一个请求被后端确认时返回 `true`
    pub async fn cancel(
        &self,
        selector: &LabelSelector,
        job_type: JobType,
    ) -> MediaflowResult<bool> {
        let selector = selector.clone().with(LABEL_JOB_TYPE, job_type);
        let jobs = self.backend.list_jobs(&selector).await?;
        if jobs.is_empty() {
            debug!("选择器 {} 没有匹配的作业", selector);
            return Ok(false);
        }

        let patch = JobPatch::stop();
        let mut acknowledged = 0u64;
        for job in jobs.iter().filter(|job| Self::can_cancel(job)) {
            match self.backend.patch_job(&job.name, &patch).await {
                Ok(true) => {
                    acknowledged += 1;
                    info!("已请求停止作业 {}", job.name);
                }
                Ok(false) => warn!("后端未确认作业 {} 的停止请求", job.name),
                Err(e) => error!("停止作业 {} 失败: {}", job.name, e),
            }
        }

        metrics::counter!("mediaflow_jobs_cancelled_total", "job_type" => job_type.as_str())
            .increment(acknowledged);
        Ok(acknowledged > 0)
    }

    /// 进度上报需要的关联字段，随作业类型不同
    pub fn progress_context(&self, job: &JobDescriptor) -> MediaflowResult<ProgressContext> {
        let annotation = |key: &str| {
            job.annotations.get(key).cloned().ok_or_else(|| {
                MediaflowError::validation(format!("作业 {} 缺少注解 {key}", job.name))
            })
        };
        match job.job_type() {
            Some(JobType::Upload) => Ok(ProgressContext::Upload {
                section: annotation("section")?,
            }),
            Some(JobType::Algorithm) => Ok(ProgressContext::Algorithm {
                sections: annotation("sections")?,
                media_ids: annotation("media_ids")?,
            }),
            None => Err(MediaflowError::validation(format!(
                "作业 {} 缺少作业类型标签",
                job.name
            ))),
        }
    }
}
