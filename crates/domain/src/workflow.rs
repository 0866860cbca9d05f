//! 提交给集群工作流引擎的声明式清单
//!
//! 字段命名与 Argo Workflows 的 `Workflow` 资源保持一致（camelCase）。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const API_VERSION: &str = "argoproj.io/v1alpha1";
pub const KIND: &str = "Workflow";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowManifest {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: WorkflowSpec,
}

impl WorkflowManifest {
    pub fn new(metadata: ObjectMeta, spec: WorkflowSpec) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata,
            spec,
        }
    }

    pub fn template(&self, name: &str) -> Option<&Template> {
        self.spec.templates.iter().find(|t| t.name == name)
    }

    /// 全局参数值
    pub fn argument(&self, name: &str) -> Option<&str> {
        self.spec
            .arguments
            .parameters
            .iter()
            .find(|p| p.name == name)
            .and_then(|p| p.value.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate_name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSpec {
    pub entrypoint: String,
    #[serde(default)]
    pub arguments: Arguments,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_exit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_strategy: Option<TtlStrategy>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_claim_templates: Vec<VolumeClaimTemplate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallelism: Option<u32>,
    #[serde(default)]
    pub templates: Vec<Template>,
    /// 清单中其余未建模的字段原样保留
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Arguments {
    #[serde(default)]
    pub parameters: Vec<Parameter>,
}

impl Arguments {
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            parameters: pairs
                .into_iter()
                .map(|(k, v)| Parameter::value(k, v))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|p| p.name == name)
            .and_then(|p| p.value.as_deref())
    }
}

/// 参数声明、参数取值或输出参数（三者共用同一结构）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameter {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<ValueFrom>,
}

impl Parameter {
    pub fn input(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
            value_from: None,
        }
    }

    pub fn value(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
            value_from: None,
        }
    }

    pub fn output(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
            value_from: Some(ValueFrom { path: path.into() }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueFrom {
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TtlStrategy {
    pub seconds_after_success: u64,
    pub seconds_after_failure: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeClaimTemplate {
    pub metadata: ObjectMeta,
    pub spec: VolumeClaimSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeClaimSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
    #[serde(default)]
    pub access_modes: Vec<String>,
    #[serde(default)]
    pub resources: ResourceRequirements,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,
}

impl ResourceRequirements {
    pub fn limits(memory: &str, cpu: &str) -> Self {
        let mut limits = BTreeMap::new();
        limits.insert("memory".to_string(), memory.to_string());
        limits.insert("cpu".to_string(), cpu.to_string());
        Self {
            limits,
            requests: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IoDeclaration {
    #[serde(default)]
    pub parameters: Vec<Parameter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryStrategy {
    pub limit: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff: Option<Backoff>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backoff {
    pub duration: String,
    pub factor: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default)]
    pub resources: ResourceRequirements,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DagTemplate {
    pub tasks: Vec<DagTask>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DagTask {
    pub name: String,
    pub template: String,
    #[serde(default, skip_serializing_if = "Arguments::is_empty")]
    pub arguments: Arguments,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    /// 按上游输出参数中的 JSON 数组动态展开
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub with_param: Option<String>,
}

impl DagTask {
    pub fn new(name: &str, template: &str) -> Self {
        Self {
            name: name.to_string(),
            template: template.to_string(),
            arguments: Arguments::default(),
            dependencies: Vec::new(),
            with_param: None,
        }
    }

    pub fn with_arguments(mut self, arguments: Arguments) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn depends_on<S: AsRef<str>>(mut self, dependencies: &[S]) -> Self {
        self.dependencies = dependencies.iter().map(|d| d.as_ref().to_string()).collect();
        self
    }

    pub fn fan_out_over(mut self, expression: impl Into<String>) -> Self {
        self.with_param = Some(expression.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    pub name: String,
    pub template: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    #[serde(default, skip_serializing_if = "Arguments::is_empty")]
    pub arguments: Arguments,
}

/// 模板主体：叶子容器、DAG 或串行步骤组
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateBody {
    Container(Container),
    Script(Container),
    Dag(DagTemplate),
    Steps(Vec<Vec<WorkflowStep>>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<IoDeclaration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<IoDeclaration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_strategy: Option<RetryStrategy>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
    #[serde(flatten)]
    pub body: TemplateBody,
}

impl Template {
    pub fn new(name: &str, body: TemplateBody) -> Self {
        Self {
            name: name.to_string(),
            inputs: None,
            outputs: None,
            retry_strategy: None,
            node_selector: BTreeMap::new(),
            body,
        }
    }

    pub fn with_inputs(mut self, names: &[&str]) -> Self {
        self.inputs = Some(IoDeclaration {
            parameters: names.iter().map(|n| Parameter::input(*n)).collect(),
        });
        self
    }

    pub fn with_outputs(mut self, outputs: Vec<Parameter>) -> Self {
        self.outputs = Some(IoDeclaration {
            parameters: outputs,
        });
        self
    }

    pub fn with_retry(mut self, retry: RetryStrategy) -> Self {
        self.retry_strategy = Some(retry);
        self
    }

    pub fn with_node_selector(mut self, key: &str, value: &str) -> Self {
        self.node_selector.insert(key.to_string(), value.to_string());
        self
    }

    pub fn input_names(&self) -> Vec<&str> {
        self.inputs
            .iter()
            .flat_map(|io| io.parameters.iter().map(|p| p.name.as_str()))
            .collect()
    }

    pub fn output(&self, name: &str) -> Option<&Parameter> {
        self.outputs
            .as_ref()
            .and_then(|io| io.parameters.iter().find(|p| p.name == name))
    }

    pub fn container(&self) -> Option<&Container> {
        match &self.body {
            TemplateBody::Container(c) | TemplateBody::Script(c) => Some(c),
            _ => None,
        }
    }

    /// 本模板直接引用的其他模板名
    pub fn referenced_templates(&self) -> Vec<&str> {
        match &self.body {
            TemplateBody::Dag(dag) => dag.tasks.iter().map(|t| t.template.as_str()).collect(),
            TemplateBody::Steps(groups) => groups
                .iter()
                .flatten()
                .map(|s| s.template.as_str())
                .collect(),
            TemplateBody::Container(_) | TemplateBody::Script(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_template_serializes_in_argo_shape() {
        let template = Template::new(
            "download",
            TemplateBody::Container(Container {
                image: "client:latest".to_string(),
                command: vec!["wget".to_string()],
                resources: ResourceRequirements::limits("512Mi", "500m"),
                ..Default::default()
            }),
        )
        .with_inputs(&["original", "url"])
        .with_retry(RetryStrategy {
            limit: 3,
            backoff: Some(Backoff {
                duration: "5s".to_string(),
                factor: 2,
            }),
        });

        let value = serde_json::to_value(&template).unwrap();
        assert_eq!(value["name"], "download");
        assert_eq!(value["container"]["image"], "client:latest");
        assert_eq!(value["container"]["resources"]["limits"]["memory"], "512Mi");
        assert_eq!(value["inputs"]["parameters"][1]["name"], "url");
        assert_eq!(value["retryStrategy"]["backoff"]["factor"], 2);
    }

    #[test]
    fn test_manifest_roundtrip_keeps_unknown_fields() {
        let raw = json!({
            "apiVersion": API_VERSION,
            "kind": KIND,
            "metadata": {"generateName": "algo-"},
            "spec": {
                "entrypoint": "main",
                "serviceAccountName": "runner",
                "templates": [
                    {"name": "main", "steps": [[{"name": "run", "template": "work"}]]},
                    {"name": "work", "container": {"image": "algo:1", "env": [{"name": "A", "value": "1"}]}}
                ]
            }
        });
        let manifest: WorkflowManifest = serde_json::from_value(raw).unwrap();
        assert_eq!(manifest.template("main").unwrap().referenced_templates(), vec!["work"]);
        assert_eq!(manifest.spec.extra["serviceAccountName"], "runner");

        let encoded = serde_json::to_value(&manifest).unwrap();
        assert_eq!(encoded["spec"]["serviceAccountName"], "runner");
        assert_eq!(encoded["spec"]["templates"][1]["container"]["env"][0]["name"], "A");
    }

    #[test]
    fn test_dag_task_builder() {
        let task = DagTask::new("transcode-task", "transcode")
            .depends_on(&["thumbnail-task", "determine-transcode-task"])
            .fan_out_over("{{tasks.determine-transcode-task.outputs.parameters.workloads}}");
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["dependencies"][1], "determine-transcode-task");
        assert!(value.get("arguments").is_none());
        assert!(value["withParam"].as_str().unwrap().starts_with("{{tasks."));
    }
}
