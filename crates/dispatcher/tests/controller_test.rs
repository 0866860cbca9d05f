#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use mediaflow_core::{ExecutionConfig, MediaflowError};
    use mediaflow_dispatcher::controller::*;
    use mediaflow_dispatcher::request::IngestRequest;
    use mediaflow_dispatcher::DagAssembler;
    use mediaflow_domain::workflow::{ObjectMeta, WorkflowManifest, WorkflowSpec};
    use mediaflow_domain::{JobEvent, JobState, JobType, LabelSelector, ProgressContext, TtlPolicy};
    use mediaflow_infrastructure::InMemoryExecutionBackend;
    use mediaflow_testing_utils::mocks::{job_descriptor, MockExecutionBackend};

    fn project_selector(project: i64) -> LabelSelector {
        LabelSelector::new().with("project", project)
    }

    fn upload_manifest() -> WorkflowManifest {
        let request = IngestRequest {
            project: 5,
            entity_type: Some(1),
            token: "token".to_string(),
            url: "https://uploads.example.com/files/1".to_string(),
            name: "clip.mp4".to_string(),
            section: "Trawl".to_string(),
            md5: "md5".to_string(),
            gid: "g1".to_string(),
            uid: "u1".to_string(),
            user: 2,
            upload_size: None,
        };
        DagAssembler::new(ExecutionConfig::default())
            .assemble(&request)
            .unwrap()
    }

    #[test]
    fn test_job_status_summary_calculations() {
        let jobs = vec![
            job_descriptor("a", JobType::Upload, 1, "g", "u", JobState::Submitted),
            job_descriptor("b", JobType::Upload, 1, "g", "u", JobState::Running),
            job_descriptor("c", JobType::Upload, 1, "g", "u", JobState::Cancelling),
            job_descriptor("d", JobType::Upload, 1, "g", "u", JobState::Succeeded),
            job_descriptor("e", JobType::Upload, 1, "g", "u", JobState::Failed),
        ];
        let summary = JobStatusSummary::from_jobs(&jobs);
        assert_eq!(summary.total(), 5);
        assert_eq!(summary.active(), 3);
        assert_eq!(summary.finished(), 2);
    }

    #[tokio::test]
    async fn test_cancel_without_matching_jobs() {
        let backend = Arc::new(MockExecutionBackend::new());
        let manager = JobManager::new(backend.clone());

        let cancelled = manager
            .cancel(&project_selector(1), JobType::Upload)
            .await
            .unwrap();

        assert!(!cancelled);
        assert_eq!(backend.patch_calls(), 0);
        assert_eq!(backend.selectors(), vec!["job_type=upload,project=1".to_string()]);
    }

    #[tokio::test]
    async fn test_cancel_one_running_job() {
        let backend = Arc::new(MockExecutionBackend::with_jobs(vec![job_descriptor(
            "transcode-workflow-x1",
            JobType::Upload,
            1,
            "g1",
            "u1",
            JobState::Running,
        )]));
        let manager = JobManager::new(backend.clone());

        let cancelled = manager
            .cancel(&project_selector(1), JobType::Upload)
            .await
            .unwrap();

        assert!(cancelled);
        assert_eq!(backend.patch_calls(), 1);
        assert_eq!(backend.patched_jobs(), vec!["transcode-workflow-x1".to_string()]);
    }

    #[tokio::test]
    async fn test_cancel_is_scoped_by_job_type_and_project() {
        let backend = Arc::new(MockExecutionBackend::with_jobs(vec![
            job_descriptor("upload-1", JobType::Upload, 1, "g1", "u1", JobState::Running),
            job_descriptor("algo-1", JobType::Algorithm, 1, "g2", "u2", JobState::Running),
            job_descriptor("upload-2", JobType::Upload, 2, "g3", "u3", JobState::Running),
        ]));
        let manager = JobManager::new(backend.clone());

        assert!(manager
            .cancel(&project_selector(1), JobType::Algorithm)
            .await
            .unwrap());
        assert_eq!(backend.patched_jobs(), vec!["algo-1".to_string()]);
    }

    #[tokio::test]
    async fn test_cancel_skips_finished_and_cancelling_jobs() {
        let backend = Arc::new(MockExecutionBackend::with_jobs(vec![
            job_descriptor("done", JobType::Upload, 1, "g", "u", JobState::Succeeded),
            job_descriptor("stopping", JobType::Upload, 1, "g", "u", JobState::Cancelling),
        ]));
        let manager = JobManager::new(backend.clone());

        assert!(!manager
            .cancel(&project_selector(1), JobType::Upload)
            .await
            .unwrap());
        assert_eq!(backend.patch_calls(), 0);
    }

    #[tokio::test]
    async fn test_unacknowledged_cancel_returns_false() {
        let backend = Arc::new(MockExecutionBackend::with_jobs(vec![job_descriptor(
            "upload-1",
            JobType::Upload,
            1,
            "g",
            "u",
            JobState::Running,
        )]));
        backend.reject_patches();
        let manager = JobManager::new(backend.clone());

        assert!(!manager
            .cancel(&project_selector(1), JobType::Upload)
            .await
            .unwrap());
        assert_eq!(backend.patch_calls(), 1);
    }

    #[tokio::test]
    async fn test_cancel_continues_past_a_failed_patch() {
        let backend = Arc::new(MockExecutionBackend::with_jobs(vec![
            job_descriptor("upload-1", JobType::Upload, 1, "g", "u1", JobState::Running),
            job_descriptor("upload-2", JobType::Upload, 1, "g", "u2", JobState::Running),
            job_descriptor("upload-3", JobType::Upload, 1, "g", "u3", JobState::Submitted),
        ]));
        backend.fail_patch_for("upload-1");
        let manager = JobManager::new(backend.clone());

        assert!(manager
            .cancel(&project_selector(1), JobType::Upload)
            .await
            .unwrap());
        assert_eq!(
            backend.patched_jobs(),
            vec!["upload-1".to_string(), "upload-2".to_string(), "upload-3".to_string()]
        );
    }

    #[tokio::test]
    async fn test_cancel_with_every_patch_failing_returns_false() {
        let backend = Arc::new(MockExecutionBackend::with_jobs(vec![job_descriptor(
            "upload-1",
            JobType::Upload,
            1,
            "g",
            "u",
            JobState::Running,
        )]));
        backend.fail_patch_for("upload-1");
        let manager = JobManager::new(backend.clone());

        assert!(!manager
            .cancel(&project_selector(1), JobType::Upload)
            .await
            .unwrap());
        assert_eq!(backend.patch_calls(), 1);
    }

    #[tokio::test]
    async fn test_expired_jobs_drop_out_of_summaries() {
        let finished = Utc::now();
        let mut done = job_descriptor("done", JobType::Upload, 1, "g", "u1", JobState::Succeeded);
        done.finished_at = Some(finished);
        let mut broken = job_descriptor("broken", JobType::Upload, 1, "g", "u2", JobState::Failed);
        broken.finished_at = Some(finished);
        let running = job_descriptor("running", JobType::Upload, 1, "g", "u3", JobState::Running);
        let backend = Arc::new(MockExecutionBackend::with_jobs(vec![done, broken, running]));
        let manager = JobManager::new(backend.clone()).with_ttl_policy(TtlPolicy::new(60, 3600));

        let selector = project_selector(1);
        let live = manager.live_jobs_at(&selector, finished).await.unwrap();
        assert_eq!(live.len(), 3);

        let live = manager
            .live_jobs_at(&selector, finished + Duration::seconds(61))
            .await
            .unwrap();
        let names: Vec<&str> = live.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(names, vec!["broken", "running"]);
        assert_eq!(JobStatusSummary::from_jobs(&live).finished(), 1);
    }

    #[tokio::test]
    async fn test_in_memory_backend_rejects_restart_of_finished_job() {
        let backend = Arc::new(InMemoryExecutionBackend::new());
        let manager = JobManager::new(backend.clone());
        let handle = manager.submit(&upload_manifest()).await.unwrap();

        backend
            .report(&handle.name, JobEvent::Completed { succeeded: true })
            .await
            .unwrap();
        assert!(backend.report(&handle.name, JobEvent::Started).await.is_err());
        assert!(!manager
            .cancel(&project_selector(5), JobType::Upload)
            .await
            .unwrap());
        assert_eq!(backend.state_of(&handle.name).await, Some(JobState::Succeeded));
    }

    #[tokio::test]
    async fn test_repeated_cancel_is_idempotent() {
        let backend = Arc::new(InMemoryExecutionBackend::new());
        let manager = JobManager::new(backend.clone());
        manager.submit(&upload_manifest()).await.unwrap();

        let selector = project_selector(5);
        assert!(manager.cancel(&selector, JobType::Upload).await.unwrap());
        assert!(!manager.cancel(&selector, JobType::Upload).await.unwrap());
        assert_eq!(backend.patches().await.len(), 1);
    }

    #[tokio::test]
    async fn test_submit_records_workflow() {
        let backend = Arc::new(InMemoryExecutionBackend::new());
        let manager = JobManager::new(backend.clone());

        let handle = manager.submit(&upload_manifest()).await.unwrap();

        assert!(handle.name.starts_with("transcode-workflow-"));
        assert_eq!(backend.state_of(&handle.name).await, Some(JobState::Submitted));
        assert_eq!(
            manager
                .find_owning_project(&LabelSelector::new().with("uid", "u1"))
                .await
                .unwrap(),
            Some(5)
        );
    }

    #[tokio::test]
    async fn test_submit_surfaces_unavailable_backend() {
        let backend = Arc::new(InMemoryExecutionBackend::new());
        backend.set_unavailable(true);
        let manager = JobManager::new(backend.clone());

        let err = manager.submit(&upload_manifest()).await.unwrap_err();
        assert!(matches!(err, MediaflowError::BackendUnavailable(_)));
    }

    #[tokio::test]
    async fn test_invalid_manifest_is_never_submitted() {
        let backend = Arc::new(MockExecutionBackend::new());
        let manager = JobManager::new(backend.clone());
        let manifest = WorkflowManifest::new(
            ObjectMeta::default(),
            WorkflowSpec {
                entrypoint: "missing".to_string(),
                ..Default::default()
            },
        );

        assert!(manager.submit(&manifest).await.is_err());
        assert_eq!(backend.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_find_owning_project_without_jobs() {
        let manager = JobManager::new(Arc::new(MockExecutionBackend::new()));
        assert_eq!(
            manager
                .find_owning_project(&LabelSelector::new().with("uid", "nobody"))
                .await
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_progress_context_per_job_type() {
        let manager = JobManager::new(Arc::new(MockExecutionBackend::new()));

        let mut upload = job_descriptor("u", JobType::Upload, 1, "g", "u", JobState::Running);
        upload.annotations = BTreeMap::from([("section".to_string(), "Trawl".to_string())]);
        assert_eq!(
            manager.progress_context(&upload).unwrap(),
            ProgressContext::Upload {
                section: "Trawl".to_string()
            }
        );

        let mut algorithm =
            job_descriptor("a", JobType::Algorithm, 1, "g", "u", JobState::Running);
        algorithm.annotations = BTreeMap::from([
            ("sections".to_string(), "Trawl".to_string()),
            ("media_ids".to_string(), "1,2".to_string()),
        ]);
        assert_eq!(
            manager.progress_context(&algorithm).unwrap(),
            ProgressContext::Algorithm {
                sections: "Trawl".to_string(),
                media_ids: "1,2".to_string()
            }
        );

        algorithm.annotations.clear();
        assert!(manager.progress_context(&algorithm).is_err());
    }
}
