use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument};

use mediaflow_core::{MediaflowError, MediaflowResult, RemoteClusterConfig};
use mediaflow_domain::{ExecutionBackend, JobHandle};

use crate::assembler::DagAssembler;
use crate::controller::JobManager;
use crate::request::{Algorithm, AlgorithmRequest, IngestRequest};

/// 为远程集群创建执行后端
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    async fn connect(
        &self,
        cluster: &RemoteClusterConfig,
    ) -> MediaflowResult<Arc<dyn ExecutionBackend>>;
}

/// 导入与算法启动入口：组装清单并提交
pub struct IngestService {
    assembler: DagAssembler,
    jobs: Arc<JobManager>,
    connector: Option<Arc<dyn ClusterConnector>>,
}

impl IngestService {
    pub fn new(assembler: DagAssembler, jobs: Arc<JobManager>) -> Self {
        Self {
            assembler,
            jobs,
            connector: None,
        }
    }

    pub fn with_connector(mut self, connector: Arc<dyn ClusterConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn jobs(&self) -> &Arc<JobManager> {
        &self.jobs
    }

    #[instrument(skip(self, request), fields(project = request.project, name = %request.name))]
    pub async fn submit(&self, request: &IngestRequest) -> MediaflowResult<JobHandle> {
        let manifest = self.assembler.assemble(request)?;
        let handle = self.jobs.submit(&manifest).await?;
        info!("导入 {} 已提交为 {}", request.name, handle.name);
        Ok(handle)
    }

    /// 启动算法；指定了远程集群时提交到该集群
    #[instrument(skip(self, algorithm, request), fields(algorithm = %algorithm.name))]
    pub async fn start_algorithm(
        &self,
        algorithm: &Algorithm,
        request: &AlgorithmRequest,
    ) -> MediaflowResult<JobHandle> {
        let manifest = self.assembler.assemble_algorithm(
            &algorithm.name,
            algorithm.manifest.clone(),
            request,
        )?;

        let handle = match (&algorithm.cluster, &self.connector) {
            (Some(cluster), Some(connector)) => {
                let backend = connector.connect(cluster).await?;
                JobManager::new(backend).submit(&manifest).await?
            }
            (Some(cluster), None) => {
                return Err(MediaflowError::BackendUnavailable(format!(
                    "未配置远程集群连接器: {}",
                    cluster.host
                )))
            }
            (None, _) => self.jobs.submit(&manifest).await?,
        };
        info!("算法 {} 已提交为 {}", algorithm.name, handle.name);
        Ok(handle)
    }
}
