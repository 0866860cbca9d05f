use std::collections::BTreeMap;

use tracing::{debug, info};

use mediaflow_core::{ExecutionConfig, MediaflowError, MediaflowResult};
use mediaflow_domain::workflow::{
    Arguments, Container, ObjectMeta, ResourceRequirements, Template, TemplateBody, TtlStrategy,
    VolumeClaimSpec, VolumeClaimTemplate, WorkflowManifest, WorkflowSpec, WorkflowStep,
};
use mediaflow_domain::{JobLabels, JobType};

use crate::dependency_checker::DependencyChecker;
use crate::exit_handler;
use crate::request::{AlgorithmRequest, IngestRequest, IngestShape};
use crate::sizing::scratch_size;
use crate::templates::{
    TemplateLibrary, EXIT_HANDLER, SCRATCH_VOLUME, SINGLE_FILE_PIPELINE, UNPACK_PIPELINE,
};

pub const UPLOAD_GENERATE_NAME: &str = "transcode-workflow-";

const ALGORITHM_EXIT_HANDLER: &str = "tator-exit-handler";
const ALGORITHM_FAILED: &str = "tator-failed";
const ALGORITHM_SUCCEEDED: &str = "tator-succeeded";

const UPLOAD_NAME: &str = "{{workflow.parameters.upload_name}}";
const UPLOAD_BASE: &str = "{{workflow.parameters.upload_base}}";
const UPLOAD_URL: &str = "{{workflow.parameters.upload_url}}";
const UPLOAD_MD5: &str = "{{workflow.parameters.upload_md5}}";

/// 把模板目录组装成可提交的工作流清单
///
/// 每次调用都是纯计算，不持有可变状态；结果在返回前通过清单校验与退出处理器互斥检查。
#[derive(Debug, Clone)]
pub struct DagAssembler {
    config: ExecutionConfig,
    library: TemplateLibrary,
}

impl DagAssembler {
    pub fn new(config: ExecutionConfig) -> Self {
        let library = TemplateLibrary::new(&config);
        Self { config, library }
    }

    pub fn library(&self) -> &TemplateLibrary {
        &self.library
    }

    /// 按文件名选择形态
    pub fn assemble(&self, request: &IngestRequest) -> MediaflowResult<WorkflowManifest> {
        match request.validate()? {
            IngestShape::SingleFile => self.assemble_single_file(request),
            IngestShape::Archive => self.assemble_archive(request),
        }
    }

    /// 所有任务都能读取的全局参数
    ///
    /// 用户提供的取值只出现在这里，任务实参通过 `{{workflow.parameters.*}}` 引用它们。
    fn global_parameters(&self, request: &IngestRequest) -> Arguments {
        Arguments::from_pairs([
            ("upload_name", request.name.clone()),
            ("upload_base", request.base_name().to_string()),
            ("upload_url", request.url.clone()),
            ("upload_md5", request.md5.clone()),
            ("host", self.config.host_url()),
            ("rest_url", self.config.rest_url()),
            ("tus_url", self.config.tus_url()),
            ("project", request.project.to_string()),
            ("token", request.token.clone()),
            ("section", request.section.clone()),
            ("gid", request.gid.clone()),
            ("uid", request.uid.clone()),
            ("user", request.user.to_string()),
            ("client_image", self.config.client_image()),
        ])
    }

    fn upload_metadata(&self, request: &IngestRequest) -> ObjectMeta {
        let labels = JobLabels {
            job_type: JobType::Upload,
            project: request.project,
            gid: request.gid.clone(),
            uid: request.uid.clone(),
            user: request.user,
        };
        let mut annotations = BTreeMap::new();
        annotations.insert("name".to_string(), request.name.clone());
        annotations.insert("section".to_string(), request.section.clone());
        ObjectMeta {
            name: None,
            generate_name: Some(UPLOAD_GENERATE_NAME.to_string()),
            labels: labels.to_map(),
            annotations,
        }
    }

    fn scratch_claim(&self, upload_size: Option<u64>) -> VolumeClaimTemplate {
        let mut requests = BTreeMap::new();
        requests.insert(
            "storage".to_string(),
            scratch_size(upload_size, &self.config.default_scratch_size),
        );
        VolumeClaimTemplate {
            metadata: ObjectMeta {
                name: Some(SCRATCH_VOLUME.to_string()),
                ..Default::default()
            },
            spec: VolumeClaimSpec {
                storage_class_name: Some(self.config.storage_class.clone()),
                access_modes: vec!["ReadWriteOnce".to_string()],
                resources: ResourceRequirements {
                    limits: BTreeMap::new(),
                    requests,
                },
            },
        }
    }

    fn upload_spec(
        &self,
        request: &IngestRequest,
        entrypoint: &str,
        templates: Vec<Template>,
    ) -> WorkflowSpec {
        WorkflowSpec {
            entrypoint: entrypoint.to_string(),
            arguments: self.global_parameters(request),
            on_exit: Some(EXIT_HANDLER.to_string()),
            ttl_strategy: Some(TtlStrategy {
                seconds_after_success: self.config.ttl_success_seconds,
                seconds_after_failure: self.config.ttl_failure_seconds,
            }),
            volume_claim_templates: vec![self.scratch_claim(request.upload_size)],
            parallelism: None,
            templates,
            extra: BTreeMap::new(),
        }
    }

    fn finish(&self, manifest: WorkflowManifest) -> MediaflowResult<WorkflowManifest> {
        DependencyChecker::validate(&manifest)?;
        exit_handler::verify_exclusive(&manifest)?;
        Ok(manifest)
    }

    /// 下载 → 转码子流水线
    pub fn assemble_single_file(
        &self,
        request: &IngestRequest,
    ) -> MediaflowResult<WorkflowManifest> {
        let entity_type = request
            .entity_type
            .ok_or_else(|| MediaflowError::validation("单文件导入必须指定媒体类型"))?;
        let item = Arguments::from_pairs([
            ("url", UPLOAD_URL.to_string()),
            ("original", format!("/work/{UPLOAD_NAME}")),
            ("transcoded", format!("/work/{UPLOAD_BASE}_transcoded")),
            ("thumbnail", format!("/work/{UPLOAD_BASE}_thumbnail.jpg")),
            ("thumbnail_gif", format!("/work/{UPLOAD_BASE}_thumbnail_gif.gif")),
            ("segments", format!("/work/{UPLOAD_BASE}_segments.json")),
            ("entity_type", entity_type.to_string()),
            ("md5", UPLOAD_MD5.to_string()),
            ("name", UPLOAD_NAME.to_string()),
        ]);

        let spec = self.upload_spec(
            request,
            SINGLE_FILE_PIPELINE,
            self.library.single_file_templates(&item),
        );
        let manifest = WorkflowManifest::new(self.upload_metadata(request), spec);
        debug!("组装单文件工作流: {}", request.name);
        self.finish(manifest)
    }

    /// 下载 → 解包 → 删除源文件，随后按工作包展开转码与元数据导入
    pub fn assemble_archive(&self, request: &IngestRequest) -> MediaflowResult<WorkflowManifest> {
        if let Some(entity_type) = request.entity_type {
            return Err(MediaflowError::validation(format!(
                "归档导入不接受媒体类型 {entity_type}"
            )));
        }
        let parameters = Arguments::from_pairs([
            ("url", UPLOAD_URL.to_string()),
            ("original", format!("/work/{UPLOAD_NAME}")),
            ("name", UPLOAD_NAME.to_string()),
        ]);

        let mut spec = self.upload_spec(
            request,
            UNPACK_PIPELINE,
            self.library.archive_templates(&parameters),
        );
        spec.parallelism = Some(self.config.archive_parallelism);
        let manifest = WorkflowManifest::new(self.upload_metadata(request), spec);
        debug!(
            "组装归档工作流: {}，工作包数 {}",
            request.name,
            self.library.work_packets()
        );
        self.finish(manifest)
    }

    fn algorithm_progress(
        &self,
        request: &AlgorithmRequest,
        state: &str,
        message: &str,
        progress: &str,
    ) -> Template {
        let host = self.config.host_url();
        let project = request.project.to_string();
        let args = [
            "-m",
            "tator.progress",
            "--host",
            host.as_str(),
            "--token",
            "{{workflow.parameters.rest_token}}",
            "--project",
            project.as_str(),
            "--job_type",
            "algorithm",
            "--gid",
            "{{workflow.parameters.gid}}",
            "--uid",
            "{{workflow.parameters.uid}}",
            "--state",
            state,
            "--message",
            message,
            "--progress",
            progress,
            "--name",
            "{{workflow.parameters.name}}",
            "--sections",
            "{{workflow.parameters.sections}}",
            "--media_ids",
            "{{workflow.parameters.media_ids}}",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let template_name = if state == "failed" {
            ALGORITHM_FAILED
        } else {
            ALGORITHM_SUCCEEDED
        };
        Template::new(
            template_name,
            TemplateBody::Container(Container {
                image: self.config.client_image(),
                image_pull_policy: Some("Always".to_string()),
                command: vec!["python3".to_string()],
                args,
                resources: ResourceRequirements::limits("32Mi", "100m"),
                ..Default::default()
            }),
        )
    }

    fn algorithm_exit_handler() -> Template {
        let step = |name: &str, template: &str, when: &str| WorkflowStep {
            name: name.to_string(),
            template: template.to_string(),
            when: Some(when.to_string()),
            arguments: Arguments::default(),
        };
        Template::new(
            ALGORITHM_EXIT_HANDLER,
            TemplateBody::Steps(vec![vec![
                step("send-fail", ALGORITHM_FAILED, "{{workflow.status}} != Succeeded"),
                step("send-succeed", ALGORITHM_SUCCEEDED, "{{workflow.status}} == Succeeded"),
            ]]),
        )
    }

    /// 补全用户注册的算法清单
    pub fn assemble_algorithm(
        &self,
        algorithm_name: &str,
        mut manifest: WorkflowManifest,
        request: &AlgorithmRequest,
    ) -> MediaflowResult<WorkflowManifest> {
        manifest.spec.arguments = Arguments::from_pairs([
            ("name", algorithm_name.to_string()),
            ("media_ids", request.media_ids.clone()),
            ("sections", request.sections.clone()),
            ("gid", request.gid.clone()),
            ("uid", request.uid.clone()),
            ("rest_url", self.config.rest_url()),
            ("rest_token", request.token.clone()),
            ("tus_url", self.config.tus_url()),
            ("project_id", request.project.to_string()),
        ]);

        let adds_exit_handler = manifest.spec.on_exit.is_none();
        if adds_exit_handler {
            manifest.spec.templates.extend([
                self.algorithm_progress(
                    request,
                    "failed",
                    "Algorithm failed!",
                    "0",
                ),
                self.algorithm_progress(
                    request,
                    "finished",
                    "Algorithm complete!",
                    "100",
                ),
                Self::algorithm_exit_handler(),
            ]);
            manifest.spec.on_exit = Some(ALGORITHM_EXIT_HANDLER.to_string());
        }

        for claim in &mut manifest.spec.volume_claim_templates {
            if claim.spec.storage_class_name.is_none() {
                claim.spec.storage_class_name = Some(self.config.storage_class.clone());
            }
        }

        let labels = JobLabels {
            job_type: JobType::Algorithm,
            project: request.project,
            gid: request.gid.clone(),
            uid: request.uid.clone(),
            user: request.user,
        };
        manifest.metadata.labels.extend(labels.to_map());
        manifest.metadata.annotations.extend([
            ("name".to_string(), algorithm_name.to_string()),
            ("sections".to_string(), request.sections.clone()),
            ("media_ids".to_string(), request.media_ids.clone()),
        ]);

        DependencyChecker::validate(&manifest)?;
        if adds_exit_handler {
            exit_handler::verify_exclusive(&manifest)?;
        }
        info!(
            "算法 {} 清单已就绪，项目 {}，媒体 {}",
            algorithm_name, request.project, request.media_ids
        );
        Ok(manifest)
    }
}
