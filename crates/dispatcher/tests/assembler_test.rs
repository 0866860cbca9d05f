#[cfg(test)]
mod tests {
    use mediaflow_core::{ExecutionConfig, MediaflowError};
    use mediaflow_dispatcher::assembler::*;
    use mediaflow_dispatcher::dependency_checker::DependencyChecker;
    use mediaflow_dispatcher::fanout;
    use mediaflow_dispatcher::request::{AlgorithmRequest, IngestRequest};
    use mediaflow_dispatcher::ParameterBinder;
    use mediaflow_domain::workflow::{
        Container, ObjectMeta, Template, TemplateBody, VolumeClaimSpec, VolumeClaimTemplate,
        WorkflowManifest, WorkflowSpec,
    };

    fn request(name: &str, entity_type: Option<i64>) -> IngestRequest {
        IngestRequest {
            project: 7,
            entity_type,
            token: "abc123".to_string(),
            url: "https://uploads.example.com/files/42".to_string(),
            name: name.to_string(),
            section: "Dive 12".to_string(),
            md5: "0123456789abcdef0123456789abcdef".to_string(),
            gid: "group-1".to_string(),
            uid: "upload-1".to_string(),
            user: 3,
            upload_size: Some(100 * 1024 * 1024),
        }
    }

    fn dag_tasks<'a>(manifest: &'a WorkflowManifest, template: &str) -> Vec<&'a str> {
        match &manifest.template(template).unwrap().body {
            TemplateBody::Dag(dag) => dag.tasks.iter().map(|t| t.name.as_str()).collect(),
            other => panic!("{template} is not a DAG: {other:?}"),
        }
    }

    #[test]
    fn test_single_file_manifest_shape() {
        let assembler = DagAssembler::new(ExecutionConfig::default());
        let manifest = assembler.assemble(&request("dive.mp4", Some(2))).unwrap();

        assert_eq!(manifest.spec.entrypoint, "single-file-pipeline");
        assert_eq!(manifest.spec.on_exit.as_deref(), Some("exit-handler"));
        assert_eq!(
            manifest.metadata.generate_name.as_deref(),
            Some(UPLOAD_GENERATE_NAME)
        );
        assert_eq!(manifest.metadata.labels["job_type"], "upload");
        assert_eq!(manifest.metadata.labels["project"], "7");
        assert_eq!(manifest.metadata.labels["gid"], "group-1");
        assert_eq!(manifest.metadata.labels["uid"], "upload-1");
        assert_eq!(manifest.metadata.annotations["section"], "Dive 12");
        assert_eq!(manifest.spec.parallelism, None);

        let ttl = manifest.spec.ttl_strategy.as_ref().unwrap();
        assert_eq!(ttl.seconds_after_success, 300);
        assert_eq!(ttl.seconds_after_failure, 86400);

        let claim = &manifest.spec.volume_claim_templates[0];
        assert_eq!(claim.metadata.name.as_deref(), Some("transcode-scratch"));
        assert_eq!(claim.spec.storage_class_name.as_deref(), Some("nfs-client"));
        assert_eq!(claim.spec.access_modes, vec!["ReadWriteOnce".to_string()]);
        assert_eq!(claim.spec.resources.requests["storage"], "400Mi");

        assert!(manifest.template("delete").is_none());
        assert!(manifest.template("unpack").is_none());
        assert!(DependencyChecker::validate(&manifest).is_ok());
    }

    #[test]
    fn test_single_file_paths_use_base_name() {
        let assembler = DagAssembler::new(ExecutionConfig::default());
        let manifest = assembler.assemble(&request("dive.mp4", Some(2))).unwrap();
        let TemplateBody::Dag(dag) = &manifest.template("single-file-pipeline").unwrap().body
        else {
            panic!("entrypoint is not a DAG");
        };
        let download = &dag.tasks[0];
        let resolved = ParameterBinder::new(&manifest.spec.arguments)
            .resolve(&download.arguments)
            .unwrap();
        assert_eq!(resolved["original"], "/work/dive.mp4");
        assert_eq!(resolved["transcoded"], "/work/dive_transcoded");
        assert_eq!(resolved["thumbnail_gif"], "/work/dive_thumbnail_gif.gif");
        assert_eq!(resolved["url"], "https://uploads.example.com/files/42");
        assert_eq!(download.arguments.get("entity_type"), Some("2"));
        assert_eq!(dag.tasks[1].dependencies, vec!["download-task".to_string()]);
    }

    #[test]
    fn test_transcode_waits_for_thumbnail_and_workloads() {
        let assembler = DagAssembler::new(ExecutionConfig::default());
        let manifest = assembler.assemble(&request("dive.mp4", Some(2))).unwrap();
        let TemplateBody::Dag(dag) = &manifest.template("transcode-pipeline").unwrap().body else {
            panic!("transcode-pipeline is not a DAG");
        };
        let transcode = dag.tasks.iter().find(|t| t.name == "transcode-task").unwrap();
        assert_eq!(
            transcode.dependencies,
            vec![
                "thumbnail-task".to_string(),
                "determine-transcode-task".to_string()
            ]
        );
        assert_eq!(
            transcode.with_param.as_deref(),
            Some("{{tasks.determine-transcode-task.outputs.parameters.workloads}}")
        );
        assert_eq!(transcode.arguments.get("category"), Some("{{item.category}}"));
    }

    #[test]
    fn test_unknown_upload_size_uses_default_scratch() {
        let assembler = DagAssembler::new(ExecutionConfig::default());
        let mut unsized_request = request("dive.mp4", Some(2));
        unsized_request.upload_size = None;
        let manifest = assembler.assemble(&unsized_request).unwrap();
        assert_eq!(
            manifest.spec.volume_claim_templates[0].spec.resources.requests["storage"],
            "10Gi"
        );
    }

    #[test]
    fn test_archive_has_fixed_fan_out_per_packet() {
        let assembler = DagAssembler::new(ExecutionConfig::default());
        let manifest = assembler.assemble(&request("survey.tar", None)).unwrap();

        assert_eq!(manifest.spec.entrypoint, "unpack-pipeline");
        assert_eq!(manifest.spec.parallelism, Some(4));

        let tasks = dag_tasks(&manifest, "unpack-pipeline");
        let count = |prefix: &str| tasks.iter().filter(|t| t.starts_with(prefix)).count();
        assert_eq!(count("transcode-task-"), 20);
        assert_eq!(count("localization-import-task-"), 20);
        assert_eq!(count("state-import-task-"), 20);
        assert_eq!(tasks.len(), 4 + 3 * 20);
    }

    #[test]
    fn test_imports_wait_for_every_transcode_and_image_upload() {
        let mut config = ExecutionConfig::default();
        config.work_packets = 3;
        let assembler = DagAssembler::new(config);
        let manifest = assembler.assemble(&request("survey.zip", None)).unwrap();

        let TemplateBody::Dag(dag) = &manifest.template("unpack-pipeline").unwrap().body else {
            panic!("unpack-pipeline is not a DAG");
        };
        let import = dag
            .tasks
            .iter()
            .find(|t| t.name == "localization-import-task-2")
            .unwrap();
        assert_eq!(
            import.dependencies,
            vec![
                "transcode-task-0".to_string(),
                "transcode-task-1".to_string(),
                "transcode-task-2".to_string(),
                "image-upload-task".to_string(),
            ]
        );
        assert_eq!(import.arguments.get("mode"), Some("localizations"));
        assert_eq!(
            import.with_param.as_deref(),
            Some("{{tasks.unpack-task.outputs.parameters.localizations-2}}")
        );
    }

    #[test]
    fn test_empty_packet_schedules_no_children() {
        let assembler = DagAssembler::new(ExecutionConfig::default());
        let manifest = assembler.assemble(&request("survey.tar.gz", None)).unwrap();
        let TemplateBody::Dag(dag) = &manifest.template("unpack-pipeline").unwrap().body else {
            panic!("unpack-pipeline is not a DAG");
        };
        for task in dag.tasks.iter().filter(|t| t.with_param.is_some()) {
            assert!(fanout::expand(task, "[]").unwrap().is_empty(), "{}", task.name);
        }
    }

    #[test]
    fn test_archive_rejects_entity_type() {
        let assembler = DagAssembler::new(ExecutionConfig::default());
        let err = assembler
            .assemble(&request("survey.tar", Some(2)))
            .unwrap_err();
        assert!(matches!(err, MediaflowError::Validation(_)));
        assert!(assembler
            .assemble_archive(&request("survey.tar", Some(2)))
            .is_err());
    }

    #[test]
    fn test_templated_upload_name_stays_opaque() {
        let assembler = DagAssembler::new(ExecutionConfig::default());
        let name = "{{workflow.parameters.token}}.mp4";
        let manifest = assembler.assemble(&request(name, Some(2))).unwrap();

        assert_eq!(manifest.argument("upload_name"), Some(name));
        let binder = ParameterBinder::new(&manifest.spec.arguments);
        assert_eq!(
            binder.bind("{{workflow.parameters.upload_name}}").unwrap(),
            name
        );
    }

    fn task_arguments(manifest: &WorkflowManifest, template: &str) -> Vec<String> {
        let TemplateBody::Dag(dag) = &manifest.template(template).unwrap().body else {
            panic!("{template} is not a DAG");
        };
        dag.tasks
            .iter()
            .flat_map(|t| t.arguments.parameters.iter())
            .filter_map(|p| p.value.clone())
            .collect()
    }

    #[test]
    fn test_templated_names_never_reach_task_arguments() {
        let assembler = DagAssembler::new(ExecutionConfig::default());
        for name in [
            "clip{{workflow.parameters.foo}}.mp4",
            "{{tasks.x.outputs.parameters.y}}.mp4",
            "{{workflow.parameters.token}}.mp4",
        ] {
            let mut single = request(name, Some(2));
            single.md5 = "{{workflow.parameters.token}}".to_string();
            single.url = "https://uploads.example.com/{{item.name}}".to_string();
            let manifest = assembler.assemble(&single).unwrap();
            for value in task_arguments(&manifest, "single-file-pipeline") {
                assert!(!value.contains(name), "{value} embeds the upload name");
                assert!(!value.contains("token"), "{value} leaks a token reference");
                assert!(!value.contains("item.name"), "{value} embeds the upload url");
            }

            let TemplateBody::Dag(dag) = &manifest.template("single-file-pipeline").unwrap().body
            else {
                panic!("single-file-pipeline is not a DAG");
            };
            let download = &dag.tasks[0];
            assert_eq!(
                download.arguments.get("original"),
                Some("/work/{{workflow.parameters.upload_name}}")
            );
            let resolved = ParameterBinder::new(&manifest.spec.arguments)
                .resolve(&download.arguments)
                .unwrap();
            assert_eq!(resolved["original"], format!("/work/{name}"));
            assert_eq!(resolved["md5"], "{{workflow.parameters.token}}");

            let archive_name = format!("{name}.tar");
            let manifest = assembler.assemble(&request(&archive_name, None)).unwrap();
            assert_eq!(manifest.argument("upload_name"), Some(archive_name.as_str()));
            for value in task_arguments(&manifest, "unpack-pipeline") {
                assert!(!value.contains(name), "{value} embeds the upload name");
            }
        }
    }

    fn algorithm_manifest() -> WorkflowManifest {
        WorkflowManifest::new(
            ObjectMeta {
                generate_name: Some("count-fish-".to_string()),
                ..Default::default()
            },
            WorkflowSpec {
                entrypoint: "main".to_string(),
                volume_claim_templates: vec![VolumeClaimTemplate {
                    metadata: ObjectMeta {
                        name: Some("scratch".to_string()),
                        ..Default::default()
                    },
                    spec: VolumeClaimSpec::default(),
                }],
                templates: vec![Template::new(
                    "main",
                    TemplateBody::Container(Container {
                        image: "registry.example.com/fish-counter:1".to_string(),
                        args: vec!["--media".to_string(), "{{workflow.parameters.media_ids}}".to_string()],
                        ..Default::default()
                    }),
                )],
                ..Default::default()
            },
        )
    }

    fn algorithm_request() -> AlgorithmRequest {
        AlgorithmRequest {
            project: 7,
            user: 3,
            token: "abc123".to_string(),
            gid: "group-2".to_string(),
            uid: "run-1".to_string(),
            media_ids: "10,11".to_string(),
            sections: "Dive 12".to_string(),
        }
    }

    #[test]
    fn test_algorithm_manifest_is_completed() {
        let assembler = DagAssembler::new(ExecutionConfig::default());
        let manifest = assembler
            .assemble_algorithm("fish-counter", algorithm_manifest(), &algorithm_request())
            .unwrap();

        let names: Vec<&str> = manifest
            .spec
            .arguments
            .parameters
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(
            names,
            vec![
                "name", "media_ids", "sections", "gid", "uid", "rest_url", "rest_token",
                "tus_url", "project_id"
            ]
        );
        assert_eq!(manifest.spec.on_exit.as_deref(), Some("tator-exit-handler"));
        assert!(manifest.template("tator-failed").is_some());
        assert!(manifest.template("tator-succeeded").is_some());
        assert_eq!(
            manifest.spec.volume_claim_templates[0]
                .spec
                .storage_class_name
                .as_deref(),
            Some("nfs-client")
        );
        assert_eq!(manifest.metadata.labels["job_type"], "algorithm");
        assert_eq!(manifest.metadata.annotations["media_ids"], "10,11");
        assert_eq!(manifest.metadata.annotations["name"], "fish-counter");

        for name in ["tator-failed", "tator-succeeded"] {
            let TemplateBody::Container(container) = &manifest.template(name).unwrap().body else {
                panic!("{name} is not a container");
            };
            assert!(container.args.iter().all(|a| !a.contains("abc123")));
            assert!(container.args.iter().all(|a| !a.contains("Dive 12")));
            assert!(container
                .args
                .contains(&"{{workflow.parameters.rest_token}}".to_string()));
        }
    }

    #[test]
    fn test_algorithm_keeps_existing_exit_handler() {
        let assembler = DagAssembler::new(ExecutionConfig::default());
        let mut manifest = algorithm_manifest();
        manifest.spec.on_exit = Some("main".to_string());
        let completed = assembler
            .assemble_algorithm("fish-counter", manifest, &algorithm_request())
            .unwrap();
        assert_eq!(completed.spec.on_exit.as_deref(), Some("main"));
        assert_eq!(completed.spec.templates.len(), 1);
    }
}
