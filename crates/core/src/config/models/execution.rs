use serde::{Deserialize, Serialize};

/// 远程集群连接信息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteClusterConfig {
    pub host: String,
    pub port: u16,
    pub token: String,
    /// CA 证书文件路径
    pub cert_path: Option<String>,
}

impl RemoteClusterConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.host.is_empty() {
            return Err(anyhow::anyhow!("远程集群地址不能为空"));
        }

        if self.token.is_empty() {
            return Err(anyhow::anyhow!("远程集群 {} 缺少访问令牌", self.host));
        }

        if self.port == 0 {
            return Err(anyhow::anyhow!("远程集群端口必须大于0"));
        }

        Ok(())
    }
}

/// 工作流执行后端与流水线参数配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub namespace: String,
    /// 集群内 API 地址，未配置远程集群时使用
    pub api_server: String,
    /// 服务账号令牌与证书所在目录
    pub service_account_dir: String,
    pub remote: Option<RemoteClusterConfig>,
    pub main_host: String,
    pub require_https: bool,
    pub images_registry: String,
    pub client_image_tag: String,
    pub default_scratch_size: String,
    pub storage_class: String,
    pub transcoder_cpu_limit: String,
    pub ttl_success_seconds: u64,
    pub ttl_failure_seconds: u64,
    pub archive_parallelism: u32,
    /// 归档解包时预先切分的工作包数量
    pub work_packets: usize,
    pub download_retry_limit: u32,
    pub download_backoff: String,
    pub download_backoff_factor: u32,
    pub request_timeout_seconds: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            api_server: "https://kubernetes.default.svc".to_string(),
            service_account_dir: "/var/run/secrets/kubernetes.io/serviceaccount".to_string(),
            remote: None,
            main_host: "localhost".to_string(),
            require_https: false,
            images_registry: "localhost:5000".to_string(),
            client_image_tag: "latest".to_string(),
            default_scratch_size: "10Gi".to_string(),
            storage_class: "nfs-client".to_string(),
            transcoder_cpu_limit: "4000m".to_string(),
            ttl_success_seconds: 300,
            ttl_failure_seconds: 86_400,
            archive_parallelism: 4,
            work_packets: 20,
            download_retry_limit: 3,
            download_backoff: "5s".to_string(),
            download_backoff_factor: 2,
            request_timeout_seconds: 30,
        }
    }
}

impl ExecutionConfig {
    pub fn protocol(&self) -> &'static str {
        if self.require_https {
            "https://"
        } else {
            "http://"
        }
    }

    /// 对外服务地址，例如 `https://example.com`
    pub fn host_url(&self) -> String {
        format!("{}{}", self.protocol(), self.main_host)
    }

    pub fn rest_url(&self) -> String {
        format!("{}/rest", self.host_url())
    }

    pub fn tus_url(&self) -> String {
        format!("{}/files/", self.host_url())
    }

    pub fn client_image(&self) -> String {
        format!(
            "{}/tator_client:{}",
            self.images_registry, self.client_image_tag
        )
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.namespace.is_empty() {
            return Err(anyhow::anyhow!("命名空间不能为空"));
        }

        if self.main_host.is_empty() {
            return Err(anyhow::anyhow!("主机地址不能为空"));
        }

        if self.work_packets == 0 || self.work_packets > 255 {
            return Err(anyhow::anyhow!(
                "工作包数量必须在1到255之间，当前值: {}",
                self.work_packets
            ));
        }

        if self.ttl_success_seconds == 0 || self.ttl_failure_seconds == 0 {
            return Err(anyhow::anyhow!("工作流保留时间必须大于0"));
        }

        if self.archive_parallelism == 0 {
            return Err(anyhow::anyhow!("归档工作流并行度必须大于0"));
        }

        if self.download_backoff_factor == 0 {
            return Err(anyhow::anyhow!("下载退避倍数必须大于0"));
        }

        if self.request_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("请求超时时间必须大于0"));
        }

        if let Some(remote) = &self.remote {
            remote.validate()?;
        }

        Ok(())
    }
}
