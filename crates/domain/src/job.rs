//! 已提交工作流实例（作业）的标签、状态机与进度事件

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use mediaflow_core::{MediaflowError, MediaflowResult};

pub const LABEL_JOB_TYPE: &str = "job_type";
pub const LABEL_PROJECT: &str = "project";
pub const LABEL_GID: &str = "gid";
pub const LABEL_UID: &str = "uid";
pub const LABEL_USER: &str = "user";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Upload,
    Algorithm,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Upload => "upload",
            JobType::Algorithm => "algorithm",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = MediaflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upload" => Ok(JobType::Upload),
            "algorithm" => Ok(JobType::Algorithm),
            _ => Err(MediaflowError::validation(format!("未知的作业类型: {s}"))),
        }
    }
}

/// 作业管理所需的标签
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobLabels {
    pub job_type: JobType,
    pub project: i64,
    pub gid: String,
    pub uid: String,
    pub user: i64,
}

impl JobLabels {
    pub fn to_map(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (LABEL_JOB_TYPE.to_string(), self.job_type.to_string()),
            (LABEL_PROJECT.to_string(), self.project.to_string()),
            (LABEL_GID.to_string(), self.gid.clone()),
            (LABEL_UID.to_string(), self.uid.clone()),
            (LABEL_USER.to_string(), self.user.to_string()),
        ])
    }
}

/// 等值标签选择器，格式为 `k1=v1,k2=v2`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSelector {
    terms: BTreeMap<String, String>,
}

impl LabelSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(selector: &str) -> MediaflowResult<Self> {
        let mut terms = BTreeMap::new();
        for term in selector.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let (key, value) = term.split_once('=').ok_or_else(|| {
                MediaflowError::validation(format!("无效的标签选择器: {selector}"))
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(MediaflowError::validation(format!(
                    "无效的标签选择器: {selector}"
                )));
            }
            terms.insert(key.to_string(), value.trim().to_string());
        }
        if terms.is_empty() {
            return Err(MediaflowError::validation("标签选择器不能为空"));
        }
        Ok(Self { terms })
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.terms.insert(key.to_string(), value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.terms.get(key).map(String::as_str)
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.terms
            .iter()
            .all(|(k, v)| labels.get(k).map(|l| l == v).unwrap_or(false))
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .terms
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        f.write_str(&joined)
    }
}

/// 作业生命周期状态
///
/// `Cancelling` 是 `Running` 的瞬时子状态，后端响应停止信号后按约定归为 `Failed`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Submitted,
    Running,
    Cancelling,
    Succeeded,
    Failed,
    GarbageCollected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    Started,
    CancelRequested,
    ShutdownHonored,
    Completed { succeeded: bool },
    TtlExpired,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::GarbageCollected
        )
    }

    /// 可以接受取消请求的状态
    pub fn is_cancellable(&self) -> bool {
        matches!(self, JobState::Submitted | JobState::Running)
    }

    pub fn transition(self, event: JobEvent) -> MediaflowResult<JobState> {
        use JobEvent::*;
        use JobState::*;

        let next = match (self, event) {
            (Submitted, Started) => Running,
            (Submitted | Running, CancelRequested) => Cancelling,
            (Cancelling, ShutdownHonored) => Failed,
            (Cancelling, Completed { .. }) => Failed,
            (Submitted | Running, Completed { succeeded: true }) => Succeeded,
            (Submitted | Running, Completed { succeeded: false }) => Failed,
            (Succeeded | Failed, TtlExpired) => GarbageCollected,
            (state, event) => {
                return Err(MediaflowError::validation(format!(
                    "作业状态 {state:?} 不接受事件 {event:?}"
                )))
            }
        };
        Ok(next)
    }

    /// 由后端上报的阶段推导状态
    pub fn from_backend(phase: Option<&str>, shutdown: Option<&str>) -> JobState {
        match (phase, shutdown) {
            (Some("Succeeded"), _) => JobState::Succeeded,
            (Some("Failed" | "Error"), _) => JobState::Failed,
            (_, Some(_)) => JobState::Cancelling,
            (Some("Running"), None) => JobState::Running,
            _ => JobState::Submitted,
        }
    }
}

/// 终态作业的保留时间
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlPolicy {
    pub success_seconds: u64,
    pub failure_seconds: u64,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            success_seconds: 300,
            failure_seconds: 86_400,
        }
    }
}

impl TtlPolicy {
    pub fn new(success_seconds: u64, failure_seconds: u64) -> Self {
        Self {
            success_seconds,
            failure_seconds,
        }
    }

    pub fn is_expired(&self, state: JobState, finished_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let ttl = match state {
            JobState::Succeeded => self.success_seconds,
            JobState::Failed => self.failure_seconds,
            _ => return false,
        };
        now - finished_at >= Duration::seconds(ttl as i64)
    }
}

/// 提交成功后后端返回的作业句柄
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub name: String,
    pub namespace: String,
    pub uid: Option<String>,
}

/// 后端列出的作业
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub state: JobState,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobDescriptor {
    pub fn project(&self) -> Option<i64> {
        self.labels.get(LABEL_PROJECT).and_then(|p| p.parse().ok())
    }

    pub fn job_type(&self) -> Option<JobType> {
        self.labels.get(LABEL_JOB_TYPE).and_then(|t| t.parse().ok())
    }

    /// 按状态机推进，进入成功或失败时记录结束时间
    pub fn apply(&mut self, event: JobEvent, now: DateTime<Utc>) -> MediaflowResult<JobState> {
        let next = self.state.transition(event)?;
        if matches!(next, JobState::Succeeded | JobState::Failed) {
            self.finished_at = Some(now);
        }
        self.state = next;
        Ok(next)
    }

    /// 超过保留时间的终态作业转为已回收，返回是否发生了回收
    pub fn collect_if_expired(&mut self, policy: &TtlPolicy, now: DateTime<Utc>) -> bool {
        let Some(finished_at) = self.finished_at else {
            return false;
        };
        if !policy.is_expired(self.state, finished_at, now) {
            return false;
        }
        self.apply(JobEvent::TtlExpired, now).is_ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShutdownStrategy {
    Stop,
}

/// 发送给后端的作业控制消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobPatch {
    Shutdown(ShutdownStrategy),
}

impl JobPatch {
    pub fn stop() -> Self {
        JobPatch::Shutdown(ShutdownStrategy::Stop)
    }

    /// merge-patch 请求体
    pub fn to_body(&self) -> Value {
        match self {
            JobPatch::Shutdown(ShutdownStrategy::Stop) => json!({"spec": {"shutdown": "Stop"}}),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressState {
    Started,
    Failed,
    Finished,
}

impl ProgressState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressState::Started => "started",
            ProgressState::Failed => "failed",
            ProgressState::Finished => "finished",
        }
    }
}

/// 进度上报的关联字段，随作业类型不同
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "job_type", rename_all = "lowercase")]
pub enum ProgressContext {
    Upload { section: String },
    Algorithm { sections: String, media_ids: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub state: ProgressState,
    pub message: String,
    pub progress: u8,
    pub correlation: ProgressContext,
}

impl ProgressEvent {
    pub fn new(
        state: ProgressState,
        message: &str,
        progress: u8,
        correlation: ProgressContext,
    ) -> MediaflowResult<Self> {
        if progress > 100 {
            return Err(MediaflowError::validation(format!(
                "进度 {progress} 超出范围 0-100"
            )));
        }
        Ok(Self {
            state,
            message: message.to_string(),
            progress,
            correlation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_parse_and_match() {
        let selector = LabelSelector::parse("project=4, uid=abc").unwrap();
        let selector = selector.with(LABEL_JOB_TYPE, JobType::Upload);
        assert_eq!(selector.to_string(), "job_type=upload,project=4,uid=abc");

        let labels = JobLabels {
            job_type: JobType::Upload,
            project: 4,
            gid: "g".to_string(),
            uid: "abc".to_string(),
            user: 7,
        }
        .to_map();
        assert!(selector.matches(&labels));
        assert!(!selector.clone().with(LABEL_PROJECT, 5).matches(&labels));
        assert!(LabelSelector::parse("project").is_err());
        assert!(LabelSelector::parse("").is_err());
    }

    #[test]
    fn test_state_machine_happy_path() {
        let state = JobState::Submitted
            .transition(JobEvent::Started)
            .unwrap()
            .transition(JobEvent::Completed { succeeded: true })
            .unwrap();
        assert_eq!(state, JobState::Succeeded);
        assert_eq!(
            state.transition(JobEvent::TtlExpired).unwrap(),
            JobState::GarbageCollected
        );
    }

    #[test]
    fn test_cancel_resolves_to_failed() {
        let state = JobState::Running
            .transition(JobEvent::CancelRequested)
            .unwrap();
        assert_eq!(state, JobState::Cancelling);
        assert!(!state.is_terminal());
        assert!(!state.is_cancellable());
        assert_eq!(
            state.transition(JobEvent::ShutdownHonored).unwrap(),
            JobState::Failed
        );
    }

    #[test]
    fn test_nothing_leaves_garbage_collected() {
        for event in [
            JobEvent::Started,
            JobEvent::CancelRequested,
            JobEvent::ShutdownHonored,
            JobEvent::Completed { succeeded: true },
            JobEvent::TtlExpired,
        ] {
            assert!(JobState::GarbageCollected.transition(event).is_err());
        }
        assert!(JobState::Succeeded
            .transition(JobEvent::CancelRequested)
            .is_err());
    }

    #[test]
    fn test_ttl_policy() {
        let policy = TtlPolicy::default();
        let finished = Utc::now();
        assert!(!policy.is_expired(JobState::Succeeded, finished, finished + Duration::seconds(299)));
        assert!(policy.is_expired(JobState::Succeeded, finished, finished + Duration::seconds(300)));
        assert!(!policy.is_expired(JobState::Failed, finished, finished + Duration::seconds(300)));
        assert!(!policy.is_expired(JobState::Running, finished, finished + Duration::days(3)));
    }

    fn descriptor(state: JobState) -> JobDescriptor {
        JobDescriptor {
            name: "transcode-workflow-a1".to_string(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            state,
            finished_at: None,
        }
    }

    #[test]
    fn test_descriptor_apply_records_finish_time() {
        let now = Utc::now();
        let mut job = descriptor(JobState::Running);
        assert_eq!(
            job.apply(JobEvent::Completed { succeeded: false }, now).unwrap(),
            JobState::Failed
        );
        assert_eq!(job.finished_at, Some(now));

        assert!(job.apply(JobEvent::Started, now).is_err());
        assert_eq!(job.state, JobState::Failed);
    }

    #[test]
    fn test_collect_if_expired() {
        let policy = TtlPolicy::new(60, 120);
        let finished = Utc::now();
        let mut job = descriptor(JobState::Running);
        assert!(!job.collect_if_expired(&policy, finished + Duration::days(1)));

        job.apply(JobEvent::Completed { succeeded: true }, finished).unwrap();
        assert!(!job.collect_if_expired(&policy, finished + Duration::seconds(59)));
        assert!(job.collect_if_expired(&policy, finished + Duration::seconds(60)));
        assert_eq!(job.state, JobState::GarbageCollected);
        assert!(!job.collect_if_expired(&policy, finished + Duration::days(1)));
    }

    #[test]
    fn test_backend_phase_mapping() {
        assert_eq!(JobState::from_backend(Some("Running"), None), JobState::Running);
        assert_eq!(JobState::from_backend(Some("Running"), Some("Stop")), JobState::Cancelling);
        assert_eq!(JobState::from_backend(Some("Error"), None), JobState::Failed);
        assert_eq!(JobState::from_backend(None, None), JobState::Submitted);
    }

    #[test]
    fn test_stop_patch_body() {
        assert_eq!(
            JobPatch::stop().to_body(),
            json!({"spec": {"shutdown": "Stop"}})
        );
        assert!(ProgressEvent::new(
            ProgressState::Finished,
            "done",
            101,
            ProgressContext::Upload { section: "s".into() }
        )
        .is_err());
    }
}
