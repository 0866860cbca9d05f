use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Certificate, Client, Response};
use serde_json::Value;
use tracing::{debug, error, info};

use mediaflow_core::{ExecutionConfig, MediaflowError, MediaflowResult, RemoteClusterConfig};
use mediaflow_domain::{
    ExecutionBackend, JobDescriptor, JobHandle, JobPatch, JobState, LabelSelector,
    WorkflowManifest,
};

/// Argo 工作流的 Kubernetes 自定义资源接口
///
/// 配置了远程集群时使用其地址、令牌和证书，否则使用 Pod 内的服务账号。
pub struct ArgoWorkflowClient {
    http: Client,
    base_url: String,
    namespace: String,
    token: Option<String>,
}

impl ArgoWorkflowClient {
    pub fn from_config(config: &ExecutionConfig) -> MediaflowResult<Self> {
        match &config.remote {
            Some(remote) => {
                Self::for_remote(remote, &config.namespace, config.request_timeout_seconds)
            }
            None => Self::in_cluster(config),
        }
    }

    pub fn for_remote(
        remote: &RemoteClusterConfig,
        namespace: &str,
        timeout_seconds: u64,
    ) -> MediaflowResult<Self> {
        let mut builder = Client::builder().timeout(Duration::from_secs(timeout_seconds));
        if let Some(cert_path) = &remote.cert_path {
            builder = builder.add_root_certificate(read_certificate(Path::new(cert_path))?);
        }
        let http = builder
            .build()
            .map_err(|e| MediaflowError::BackendUnavailable(format!("创建集群客户端失败: {e}")))?;

        info!("使用远程集群 {}:{}", remote.host, remote.port);
        Ok(Self {
            http,
            base_url: format!("https://{}:{}", remote.host, remote.port),
            namespace: namespace.to_string(),
            token: Some(remote.token.clone()),
        })
    }

    fn in_cluster(config: &ExecutionConfig) -> MediaflowResult<Self> {
        let account_dir = Path::new(&config.service_account_dir);
        let token = std::fs::read_to_string(account_dir.join("token"))
            .map(|t| t.trim().to_string())
            .map_err(|e| {
                MediaflowError::Configuration(format!(
                    "读取服务账号令牌失败 {}: {e}",
                    account_dir.display()
                ))
            })?;

        let mut builder =
            Client::builder().timeout(Duration::from_secs(config.request_timeout_seconds));
        let ca_path = account_dir.join("ca.crt");
        if ca_path.exists() {
            builder = builder.add_root_certificate(read_certificate(&ca_path)?);
        }
        let http = builder
            .build()
            .map_err(|e| MediaflowError::BackendUnavailable(format!("创建集群客户端失败: {e}")))?;

        Ok(Self {
            http,
            base_url: config.api_server.trim_end_matches('/').to_string(),
            namespace: config.namespace.clone(),
            token: Some(token),
        })
    }

    /// 不带认证的客户端，用于本地代理（`kubectl proxy`）
    pub fn with_base_url(base_url: &str, namespace: &str) -> MediaflowResult<Self> {
        let http = Client::builder()
            .build()
            .map_err(|e| MediaflowError::BackendUnavailable(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            namespace: namespace.to_string(),
            token: None,
        })
    }

    fn workflows_url(&self) -> String {
        format!(
            "{}/apis/argoproj.io/v1alpha1/namespaces/{}/workflows",
            self.base_url, self.namespace
        )
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn transport_error(e: reqwest::Error) -> MediaflowError {
        error!("执行后端请求失败: {}", e);
        MediaflowError::BackendUnavailable(e.to_string())
    }

    async fn checked(response: Response) -> MediaflowResult<Value> {
        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| MediaflowError::BackendRejected(format!("无法解析响应: {e}")));
        }
        let body = response.text().await.unwrap_or_default();
        Err(MediaflowError::BackendRejected(format!("{status}: {body}")))
    }

    fn to_descriptor(item: &Value) -> Option<JobDescriptor> {
        let metadata = item.get("metadata")?;
        let name = metadata.get("name")?.as_str()?.to_string();
        let string_map = |key: &str| -> BTreeMap<String, String> {
            metadata
                .get(key)
                .and_then(Value::as_object)
                .map(|m| {
                    m.iter()
                        .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                        .collect()
                })
                .unwrap_or_default()
        };
        let phase = item.pointer("/status/phase").and_then(Value::as_str);
        let shutdown = item.pointer("/spec/shutdown").and_then(Value::as_str);
        let finished_at = item
            .pointer("/status/finishedAt")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Some(JobDescriptor {
            name,
            labels: string_map("labels"),
            annotations: string_map("annotations"),
            state: JobState::from_backend(phase, shutdown),
            finished_at,
        })
    }
}

fn read_certificate(path: &Path) -> MediaflowResult<Certificate> {
    let pem = std::fs::read(path)?;
    Certificate::from_pem(&pem).map_err(|e| {
        MediaflowError::Configuration(format!("证书 {} 无效: {e}", path.display()))
    })
}

#[async_trait]
impl ExecutionBackend for ArgoWorkflowClient {
    async fn create_job(&self, manifest: &WorkflowManifest) -> MediaflowResult<JobHandle> {
        let response = self
            .authorize(self.http.post(self.workflows_url()))
            .json(manifest)
            .send()
            .await
            .map_err(Self::transport_error)?;
        let body = Self::checked(response).await?;

        let name = body
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .ok_or_else(|| MediaflowError::BackendRejected("响应缺少工作流名称".to_string()))?
            .to_string();
        let uid = body
            .pointer("/metadata/uid")
            .and_then(Value::as_str)
            .map(str::to_string);
        debug!("工作流 {} 已创建", name);
        Ok(JobHandle {
            name,
            namespace: self.namespace.clone(),
            uid,
        })
    }

    async fn list_jobs(&self, selector: &LabelSelector) -> MediaflowResult<Vec<JobDescriptor>> {
        let response = self
            .authorize(self.http.get(self.workflows_url()))
            .query(&[("labelSelector", selector.to_string())])
            .send()
            .await
            .map_err(Self::transport_error)?;
        let body = Self::checked(response).await?;
        Ok(body
            .get("items")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Self::to_descriptor).collect())
            .unwrap_or_default())
    }

    async fn patch_job(&self, name: &str, patch: &JobPatch) -> MediaflowResult<bool> {
        let url = format!("{}/{}", self.workflows_url(), name);
        let response = self
            .authorize(self.http.patch(url))
            .header("Content-Type", "application/merge-patch+json")
            .body(patch.to_body().to_string())
            .send()
            .await
            .map_err(Self::transport_error)?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            debug!("工作流 {} 已不存在", name);
            return Ok(false);
        }
        Self::checked(response).await.map(|_| true)
    }
}
