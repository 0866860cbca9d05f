#[cfg(test)]
mod tests {
    use mediaflow_core::ExecutionConfig;
    use mediaflow_dispatcher::exit_handler::*;
    use mediaflow_dispatcher::request::{AlgorithmRequest, IngestRequest};
    use mediaflow_dispatcher::DagAssembler;
    use mediaflow_domain::workflow::{
        Container, ObjectMeta, Template, TemplateBody, WorkflowManifest, WorkflowSpec,
    };
    use mediaflow_domain::{ProgressContext, ProgressState};

    fn upload_manifest() -> WorkflowManifest {
        let request = IngestRequest {
            project: 1,
            entity_type: Some(2),
            token: "token".to_string(),
            url: "https://uploads.example.com/files/9".to_string(),
            name: "reef.mov".to_string(),
            section: "Reef".to_string(),
            md5: "md5".to_string(),
            gid: "g".to_string(),
            uid: "u".to_string(),
            user: 1,
            upload_size: None,
        };
        DagAssembler::new(ExecutionConfig::default())
            .assemble(&request)
            .unwrap()
    }

    fn upload_context() -> ProgressContext {
        ProgressContext::Upload {
            section: "Reef".to_string(),
        }
    }

    #[test]
    fn test_success_fires_only_finished() {
        let manifest = upload_manifest();
        let events =
            progress_events(&manifest, WorkflowStatus::Succeeded, &upload_context()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].state, ProgressState::Finished);
        assert_eq!(events[0].message, "Media Import Complete");
        assert_eq!(events[0].progress, 100);
        assert_eq!(events[0].correlation, upload_context());
    }

    #[test]
    fn test_failure_fires_only_failed() {
        let manifest = upload_manifest();
        for status in [WorkflowStatus::Failed, WorkflowStatus::Error] {
            let events = progress_events(&manifest, status, &upload_context()).unwrap();
            assert_eq!(events.len(), 1, "{status}");
            assert_eq!(events[0].state, ProgressState::Failed);
            assert_eq!(events[0].message, "Media Import Failed");
            assert_eq!(events[0].progress, 0);
        }
    }

    #[test]
    fn test_algorithm_handler_reads_container_flags() {
        let user_manifest = WorkflowManifest::new(
            ObjectMeta {
                generate_name: Some("tracker-".to_string()),
                ..Default::default()
            },
            WorkflowSpec {
                entrypoint: "main".to_string(),
                templates: vec![Template::new(
                    "main",
                    TemplateBody::Container(Container {
                        image: "registry.example.com/tracker:2".to_string(),
                        ..Default::default()
                    }),
                )],
                ..Default::default()
            },
        );
        let request = AlgorithmRequest {
            project: 1,
            user: 1,
            token: "token".to_string(),
            gid: "g".to_string(),
            uid: "u".to_string(),
            media_ids: "4,5".to_string(),
            sections: "Reef".to_string(),
        };
        let manifest = DagAssembler::new(ExecutionConfig::default())
            .assemble_algorithm("tracker", user_manifest, &request)
            .unwrap();
        let context = ProgressContext::Algorithm {
            sections: "Reef".to_string(),
            media_ids: "4,5".to_string(),
        };

        let failed = progress_events(&manifest, WorkflowStatus::Failed, &context).unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].message, "Algorithm failed!");

        let succeeded = progress_events(&manifest, WorkflowStatus::Succeeded, &context).unwrap();
        assert_eq!(succeeded.len(), 1);
        assert_eq!(succeeded[0].state, ProgressState::Finished);
        assert_eq!(succeeded[0].progress, 100);
    }

    #[test]
    fn test_unconditional_steps_break_exclusivity() {
        let mut manifest = upload_manifest();
        let handler = manifest
            .spec
            .templates
            .iter_mut()
            .find(|t| t.name == "exit-handler")
            .unwrap();
        if let TemplateBody::Steps(groups) = &mut handler.body {
            for step in groups.iter_mut().flatten() {
                step.when = None;
            }
        }
        assert_eq!(fired_steps(&manifest, WorkflowStatus::Succeeded).unwrap().len(), 2);
        assert!(verify_exclusive(&manifest).is_err());
    }
}
