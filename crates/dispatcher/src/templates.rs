//! 转码与导入任务模板目录
//!
//! 模板只是数据：输入参数、输出文件路径、资源上限和重试策略。所有容器共用客户端镜像，
//! 镜像地址通过 `{{workflow.parameters.client_image}}` 在提交时传入。

use serde_json::Value;

use mediaflow_core::ExecutionConfig;
use mediaflow_domain::workflow::{
    Arguments, Backoff, Container, DagTask, DagTemplate, Parameter, ResourceRequirements,
    RetryStrategy, Template, TemplateBody, VolumeMount, WorkflowStep,
};

pub const DOWNLOAD: &str = "download";
pub const DELETE: &str = "delete";
pub const UNPACK: &str = "unpack";
pub const DATA_IMPORT: &str = "data-import";
pub const CREATE_MEDIA: &str = "create-media";
pub const DETERMINE_TRANSCODE: &str = "determine-transcode";
pub const TRANSCODE: &str = "transcode";
pub const THUMBNAIL: &str = "thumbnail";
pub const IMAGE_UPLOAD: &str = "image-upload";
pub const PROGRESS: &str = "progress";
pub const EXIT_HANDLER: &str = "exit-handler";
pub const TRANSCODE_PIPELINE: &str = "transcode-pipeline";
pub const SINGLE_FILE_PIPELINE: &str = "single-file-pipeline";
pub const UNPACK_PIPELINE: &str = "unpack-pipeline";

/// 所有任务共享的临时卷
pub const SCRATCH_VOLUME: &str = "transcode-scratch";
pub const SCRATCH_MOUNT: &str = "/work";

const CLIENT_IMAGE: &str = "{{workflow.parameters.client_image}}";

/// 转码子流水线透传的参数
pub const PIPELINE_PARAMETERS: [&str; 9] = [
    "url",
    "original",
    "transcoded",
    "thumbnail",
    "thumbnail_gif",
    "segments",
    "entity_type",
    "name",
    "md5",
];

/// `determine-transcode` 输出的每个工作负载所含字段
pub const WORKLOAD_FIELDS: [&str; 4] = ["category", "raw_width", "raw_height", "resolutions"];

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn container(command: &[&str], args: &[&str], memory: &str, cpu: &str) -> Container {
    Container {
        image: CLIENT_IMAGE.to_string(),
        image_pull_policy: Some("IfNotPresent".to_string()),
        command: strings(command),
        args: strings(args),
        resources: ResourceRequirements::limits(memory, cpu),
        volume_mounts: vec![VolumeMount {
            name: SCRATCH_VOLUME.to_string(),
            mount_path: SCRATCH_MOUNT.to_string(),
        }],
        ..Default::default()
    }
}

fn passthrough(names: &[&str]) -> Arguments {
    Arguments::from_pairs(
        names
            .iter()
            .map(|n| (n.to_string(), format!("{{{{inputs.parameters.{n}}}}}"))),
    )
}

fn with_extra(mut arguments: Arguments, extra: &[(&str, String)]) -> Arguments {
    arguments
        .parameters
        .extend(extra.iter().map(|(k, v)| Parameter::value(*k, v.clone())));
    arguments
}

/// 由部署配置生成的模板目录
#[derive(Debug, Clone)]
pub struct TemplateLibrary {
    download_retry_limit: u32,
    download_backoff: String,
    download_backoff_factor: u32,
    transcoder_cpu_limit: String,
    work_packets: usize,
}

impl TemplateLibrary {
    pub fn new(config: &ExecutionConfig) -> Self {
        Self {
            download_retry_limit: config.download_retry_limit,
            download_backoff: config.download_backoff.clone(),
            download_backoff_factor: config.download_backoff_factor,
            transcoder_cpu_limit: config.transcoder_cpu_limit.clone(),
            work_packets: config.work_packets,
        }
    }

    pub fn work_packets(&self) -> usize {
        self.work_packets
    }

    pub fn download(&self) -> Template {
        Template::new(
            DOWNLOAD,
            TemplateBody::Container(container(
                &["wget"],
                &[
                    "-O",
                    "{{inputs.parameters.original}}",
                    "{{inputs.parameters.url}}",
                ],
                "512Mi",
                "500m",
            )),
        )
        .with_inputs(&["original", "url"])
        .with_retry(RetryStrategy {
            limit: self.download_retry_limit,
            backoff: Some(Backoff {
                duration: self.download_backoff.clone(),
                factor: self.download_backoff_factor,
            }),
        })
    }

    /// 删除远端源文件；不挂载临时卷
    pub fn delete(&self) -> Template {
        let mut body = container(
            &["curl"],
            &["-X", "DELETE", "{{inputs.parameters.url}}"],
            "128Mi",
            "500m",
        );
        body.volume_mounts.clear();
        Template::new(DELETE, TemplateBody::Container(body)).with_inputs(&["url"])
    }

    /// 解包归档并预先切分为固定数量的工作包
    pub fn unpack(&self) -> Template {
        let outputs = (0..self.work_packets)
            .flat_map(|x| {
                [
                    Parameter::output(format!("videos-{x}"), format!("/work/videos_{x}.json")),
                    Parameter::output(
                        format!("localizations-{x}"),
                        format!("/work/localizations_{x}.json"),
                    ),
                    Parameter::output(format!("states-{x}"), format!("/work/states_{x}.json")),
                ]
            })
            .collect();
        Template::new(
            UNPACK,
            TemplateBody::Container(container(
                &["bash"],
                &["unpack.sh", "{{inputs.parameters.original}}", SCRATCH_MOUNT],
                "512Mi",
                "1000m",
            )),
        )
        .with_inputs(&["original"])
        .with_outputs(outputs)
    }

    pub fn data_import(&self) -> Template {
        Template::new(
            DATA_IMPORT,
            TemplateBody::Container(container(
                &["python3"],
                &[
                    "importDataFromCsv.py",
                    "--host",
                    "{{workflow.parameters.host}}",
                    "--token",
                    "{{workflow.parameters.token}}",
                    "--project",
                    "{{workflow.parameters.project}}",
                    "--mode",
                    "{{inputs.parameters.mode}}",
                    "--media-md5",
                    "{{inputs.parameters.md5}}",
                    "{{inputs.parameters.file}}",
                ],
                "512Mi",
                "1000m",
            )),
        )
        .with_inputs(&["md5", "file", "mode"])
    }

    pub fn create_media(&self) -> Template {
        Template::new(
            CREATE_MEDIA,
            TemplateBody::Container(container(
                &["python3"],
                &[
                    "-m",
                    "tator.transcode.create_media",
                    "--host",
                    "{{workflow.parameters.host}}",
                    "--token",
                    "{{workflow.parameters.token}}",
                    "--project",
                    "{{workflow.parameters.project}}",
                    "--type",
                    "{{inputs.parameters.entity_type}}",
                    "--name",
                    "{{inputs.parameters.name}}",
                    "--section",
                    "{{workflow.parameters.section}}",
                    "--md5",
                    "{{inputs.parameters.md5}}",
                    "--gid",
                    "{{workflow.parameters.gid}}",
                    "--uid",
                    "{{workflow.parameters.uid}}",
                    "--output",
                    "/work/media_id.txt",
                ],
                "128Mi",
                "100m",
            )),
        )
        .with_inputs(&["entity_type", "name", "md5"])
        .with_outputs(vec![Parameter::output("media_id", "/work/media_id.txt")])
    }

    /// 输出一个工作负载数组，每个目标分辨率一项
    pub fn determine_transcode(&self) -> Template {
        Template::new(
            DETERMINE_TRANSCODE,
            TemplateBody::Container(container(
                &["python3"],
                &[
                    "-m",
                    "tator.transcode.determine_transcode",
                    "--host",
                    "{{workflow.parameters.host}}",
                    "--token",
                    "{{workflow.parameters.token}}",
                    "--media_type",
                    "{{inputs.parameters.entity_type}}",
                    "--output",
                    "/work/workloads.json",
                    "{{inputs.parameters.original}}",
                ],
                "512Mi",
                "500m",
            )),
        )
        .with_inputs(&["entity_type", "original"])
        .with_outputs(vec![Parameter::output("workloads", "/work/workloads.json")])
    }

    pub fn transcode(&self) -> Template {
        let mut body = container(
            &["python3"],
            &[
                "-m",
                "tator.transcode.transcode",
                "--output",
                "{{inputs.parameters.transcoded}}",
                "--category",
                "{{inputs.parameters.category}}",
                "--raw_width",
                "{{inputs.parameters.raw_width}}",
                "--raw_height",
                "{{inputs.parameters.raw_height}}",
                "--configs",
                "{{inputs.parameters.resolutions}}",
                "--media",
                "{{inputs.parameters.media}}",
                "--host",
                "{{workflow.parameters.host}}",
                "--token",
                "{{workflow.parameters.token}}",
                "{{inputs.parameters.original}}",
            ],
            "4Gi",
            &self.transcoder_cpu_limit,
        );
        body.extra
            .insert("workingDir".to_string(), Value::String("/scripts".to_string()));
        Template::new(TRANSCODE, TemplateBody::Container(body))
            .with_inputs(&[
                "original",
                "transcoded",
                "media",
                "category",
                "raw_width",
                "raw_height",
                "resolutions",
            ])
            .with_node_selector("cpuWorker", "yes")
    }

    pub fn thumbnail(&self) -> Template {
        Template::new(
            THUMBNAIL,
            TemplateBody::Container(container(
                &["python3"],
                &[
                    "-m",
                    "tator.transcode.make_thumbnails",
                    "--host",
                    "{{workflow.parameters.host}}",
                    "--token",
                    "{{workflow.parameters.token}}",
                    "--media",
                    "{{inputs.parameters.media}}",
                    "--thumbnail",
                    "{{inputs.parameters.thumbnail}}",
                    "--thumbnail_gif",
                    "{{inputs.parameters.thumbnail_gif}}",
                    "{{inputs.parameters.original}}",
                ],
                "4Gi",
                "1000m",
            )),
        )
        .with_inputs(&["original", "thumbnail", "thumbnail_gif", "media"])
        .with_node_selector("cpuWorker", "yes")
    }

    pub fn image_upload(&self) -> Template {
        Template::new(
            IMAGE_UPLOAD,
            TemplateBody::Container(container(
                &["python3"],
                &[
                    "imageLoop.py",
                    "--host",
                    "{{workflow.parameters.host}}",
                    "--token",
                    "{{workflow.parameters.token}}",
                    "--project",
                    "{{workflow.parameters.project}}",
                    "--gid",
                    "{{workflow.parameters.gid}}",
                    "--uid",
                    "{{workflow.parameters.uid}}",
                    "--section",
                    "{{workflow.parameters.section}}",
                    "--progressName",
                    "{{workflow.parameters.upload_name}}",
                ],
                "500Mi",
                "1000m",
            )),
        )
    }

    pub fn progress(&self) -> Template {
        Template::new(
            PROGRESS,
            TemplateBody::Container(container(
                &["python3"],
                &[
                    "-m",
                    "tator.progress",
                    "--host",
                    "{{workflow.parameters.host}}",
                    "--token",
                    "{{workflow.parameters.token}}",
                    "--project",
                    "{{workflow.parameters.project}}",
                    "--job_type",
                    "upload",
                    "--gid",
                    "{{workflow.parameters.gid}}",
                    "--uid",
                    "{{workflow.parameters.uid}}",
                    "--state",
                    "{{inputs.parameters.state}}",
                    "--message",
                    "{{inputs.parameters.message}}",
                    "--progress",
                    "{{inputs.parameters.progress}}",
                    "--name",
                    "{{workflow.parameters.upload_name}}",
                    "--section",
                    "{{workflow.parameters.section}}",
                ],
                "32Mi",
                "100m",
            )),
        )
        .with_inputs(&["state", "message", "progress"])
    }

    /// 终态分支：失败与成功两个步骤的条件互斥
    pub fn exit_handler(&self) -> Template {
        let step = |name: &str, when: &str, state: &str, message: &str, progress: &str| {
            WorkflowStep {
                name: name.to_string(),
                template: PROGRESS.to_string(),
                when: Some(when.to_string()),
                arguments: Arguments::from_pairs([
                    ("state", state),
                    ("message", message),
                    ("progress", progress),
                ]),
            }
        };
        Template::new(
            EXIT_HANDLER,
            TemplateBody::Steps(vec![vec![
                step(
                    "send-fail",
                    "{{workflow.status}} != Succeeded",
                    "failed",
                    "Media Import Failed",
                    "0",
                ),
                step(
                    "send-success",
                    "{{workflow.status}} == Succeeded",
                    "finished",
                    "Media Import Complete",
                    "100",
                ),
            ]]),
        )
    }

    /// `create-media → thumbnail`、`determine-transcode`，二者完成后按工作负载展开转码
    pub fn transcode_pipeline(&self) -> Template {
        let pass = passthrough(&PIPELINE_PARAMETERS);
        let media = (
            "media",
            "{{tasks.create-media-task.outputs.parameters.media_id}}".to_string(),
        );
        let mut transcode_extra: Vec<(&str, String)> = WORKLOAD_FIELDS
            .iter()
            .map(|f| (*f, format!("{{{{item.{f}}}}}")))
            .collect();
        transcode_extra.push(media.clone());

        let tasks = vec![
            DagTask::new("create-media-task", CREATE_MEDIA).with_arguments(pass.clone()),
            DagTask::new("thumbnail-task", THUMBNAIL)
                .with_arguments(with_extra(pass.clone(), &[media]))
                .depends_on(&["create-media-task"]),
            DagTask::new("determine-transcode-task", DETERMINE_TRANSCODE)
                .with_arguments(pass.clone()),
            DagTask::new("transcode-task", TRANSCODE)
                .with_arguments(with_extra(pass, &transcode_extra))
                .depends_on(&["thumbnail-task", "determine-transcode-task"])
                .fan_out_over("{{tasks.determine-transcode-task.outputs.parameters.workloads}}"),
        ];
        Template::new(TRANSCODE_PIPELINE, TemplateBody::Dag(DagTemplate { tasks }))
            .with_inputs(&PIPELINE_PARAMETERS)
    }

    /// 单文件流水线的入口：下载后进入转码子流水线
    pub fn single_file_pipeline(&self, item: &Arguments) -> Template {
        let tasks = vec![
            DagTask::new("download-task", DOWNLOAD).with_arguments(item.clone()),
            DagTask::new("transcode-task", TRANSCODE_PIPELINE)
                .with_arguments(item.clone())
                .depends_on(&["download-task"]),
        ];
        Template::new(SINGLE_FILE_PIPELINE, TemplateBody::Dag(DagTemplate { tasks }))
    }

    /// 归档流水线入口
    ///
    /// 每个工作包各有一组转码、定位导入和状态导入展开；导入任务等待全部转码与图片上传完成。
    pub fn unpack_pipeline(&self, parameters: &Arguments) -> Template {
        let item_parameters = Arguments::from_pairs([
            ("entity_type", "{{item.entity_type}}"),
            ("name", "{{item.name}}"),
            ("md5", "{{item.md5}}"),
            ("url", "None"),
            ("original", "{{item.dirname}}/{{item.name}}"),
            ("transcoded", "{{item.dirname}}/{{item.base}}_transcoded"),
            ("thumbnail", "{{item.dirname}}/{{item.base}}_thumbnail.jpg"),
            ("thumbnail_gif", "{{item.dirname}}/{{item.base}}_thumbnail_gif.gif"),
            ("segments", "{{item.dirname}}/{{item.base}}_segments.json"),
        ]);

        let mut tasks = vec![
            DagTask::new("download-task", DOWNLOAD).with_arguments(parameters.clone()),
            DagTask::new("unpack-task", UNPACK)
                .with_arguments(parameters.clone())
                .depends_on(&["download-task"]),
            DagTask::new("delete-task", DELETE)
                .with_arguments(parameters.clone())
                .depends_on(&["unpack-task"]),
        ];

        let transcode_names: Vec<String> = (0..self.work_packets)
            .map(|x| format!("transcode-task-{x}"))
            .collect();
        tasks.extend(transcode_names.iter().enumerate().map(|(x, name)| {
            DagTask::new(name, TRANSCODE_PIPELINE)
                .with_arguments(item_parameters.clone())
                .depends_on(&["unpack-task"])
                .fan_out_over(format!("{{{{tasks.unpack-task.outputs.parameters.videos-{x}}}}}"))
        }));
        tasks.push(DagTask::new("image-upload-task", IMAGE_UPLOAD).depends_on(&["unpack-task"]));

        let mut import_dependencies = transcode_names;
        import_dependencies.push("image-upload-task".to_string());
        for (mode, output) in [("state", "states"), ("localizations", "localizations")] {
            let prefix = if mode == "state" { "state" } else { "localization" };
            tasks.extend((0..self.work_packets).map(|x| {
                DagTask::new(&format!("{prefix}-import-task-{x}"), DATA_IMPORT)
                    .with_arguments(Arguments::from_pairs([
                        ("md5", "{{item.md5}}"),
                        ("file", "{{item.file}}"),
                        ("mode", mode),
                    ]))
                    .depends_on(&import_dependencies)
                    .fan_out_over(format!(
                        "{{{{tasks.unpack-task.outputs.parameters.{output}-{x}}}}}"
                    ))
            }));
        }

        Template::new(UNPACK_PIPELINE, TemplateBody::Dag(DagTemplate { tasks }))
    }

    /// 单文件工作流用到的模板
    pub fn single_file_templates(&self, item: &Arguments) -> Vec<Template> {
        vec![
            self.download(),
            self.create_media(),
            self.determine_transcode(),
            self.transcode(),
            self.thumbnail(),
            self.image_upload(),
            self.transcode_pipeline(),
            self.single_file_pipeline(item),
            self.progress(),
            self.exit_handler(),
        ]
    }

    /// 归档工作流用到的模板
    pub fn archive_templates(&self, parameters: &Arguments) -> Vec<Template> {
        vec![
            self.download(),
            self.delete(),
            self.create_media(),
            self.determine_transcode(),
            self.transcode(),
            self.thumbnail(),
            self.image_upload(),
            self.unpack(),
            self.transcode_pipeline(),
            self.unpack_pipeline(parameters),
            self.progress(),
            self.exit_handler(),
            self.data_import(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library() -> TemplateLibrary {
        TemplateLibrary::new(&ExecutionConfig::default())
    }

    #[test]
    fn test_download_retries_with_backoff() {
        let download = library().download();
        let retry = download.retry_strategy.unwrap();
        assert_eq!(retry.limit, 3);
        let backoff = retry.backoff.unwrap();
        assert_eq!(backoff.duration, "5s");
        assert_eq!(backoff.factor, 2);
    }

    #[test]
    fn test_only_fetch_templates_retry() {
        let library = library();
        for template in [library.transcode(), library.unpack(), library.progress()] {
            assert!(template.retry_strategy.is_none(), "{}", template.name);
        }
    }

    #[test]
    fn test_cpu_heavy_templates_are_pinned() {
        let library = library();
        for template in [library.transcode(), library.thumbnail()] {
            assert_eq!(template.node_selector["cpuWorker"], "yes");
        }
        let transcode = library.transcode();
        let container = transcode.container().unwrap();
        assert_eq!(container.resources.limits["cpu"], "4000m");
        assert_eq!(container.extra["workingDir"], "/scripts");
    }

    #[test]
    fn test_unpack_declares_three_outputs_per_packet() {
        let unpack = library().unpack();
        let outputs = &unpack.outputs.as_ref().unwrap().parameters;
        assert_eq!(outputs.len(), 60);
        let videos = unpack.output("videos-19").unwrap();
        assert_eq!(videos.value_from.as_ref().unwrap().path, "/work/videos_19.json");
    }

    #[test]
    fn test_delete_has_no_scratch_mount() {
        let delete = library().delete();
        assert!(delete.container().unwrap().volume_mounts.is_empty());
        let download = library().download();
        assert_eq!(download.container().unwrap().volume_mounts[0].mount_path, "/work");
    }
}
