use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;

use mediaflow_core::{AppConfig, MediaflowResult, RemoteClusterConfig};
use mediaflow_dispatcher::{ClusterConnector, DagAssembler, IngestService, JobManager};
use mediaflow_domain::{
    Cache, DocumentStore, EntityRepository, EntityTypeRepository, ExecutionBackend,
    ProjectRepository, TtlPolicy,
};
use mediaflow_infrastructure::{
    connect, ensure_schema, ArgoWorkflowClient, ElasticsearchStore, InMemoryCache,
    InMemoryDocumentStore, InMemoryEntityRepository, InMemoryEntityTypeRepository,
    InMemoryExecutionBackend, InMemoryProjectRepository, PostgresEntityRepository,
    PostgresEntityTypeRepository, PostgresProjectRepository, RedisCache,
};
use mediaflow_search::{
    DocumentIndexer, HookedEntityRepository, IndexRebuilder, PostWriteHooks, SchemaRegistry,
};

/// 以 Argo 客户端连接算法指定的远程集群
pub struct ArgoClusterConnector {
    namespace: String,
    timeout_seconds: u64,
}

impl ArgoClusterConnector {
    pub fn new(namespace: &str, timeout_seconds: u64) -> Self {
        Self {
            namespace: namespace.to_string(),
            timeout_seconds,
        }
    }
}

#[async_trait]
impl ClusterConnector for ArgoClusterConnector {
    async fn connect(
        &self,
        cluster: &RemoteClusterConfig,
    ) -> MediaflowResult<Arc<dyn ExecutionBackend>> {
        let client = ArgoWorkflowClient::for_remote(cluster, &self.namespace, self.timeout_seconds)?;
        Ok(Arc::new(client))
    }
}

/// 运行时依赖的各个适配器，启动时构建一次
pub struct ApplicationContext {
    config: AppConfig,
    projects: Arc<dyn ProjectRepository>,
    entity_types: Arc<dyn EntityTypeRepository>,
    entities: Arc<dyn EntityRepository>,
    indexer: Arc<DocumentIndexer>,
    ingest: IngestService,
}

/// 组装上下文所需的端口实现
pub struct Adapters {
    pub projects: Arc<dyn ProjectRepository>,
    pub entity_types: Arc<dyn EntityTypeRepository>,
    pub entities: Arc<dyn EntityRepository>,
    pub store: Arc<dyn DocumentStore>,
    pub cache: Arc<dyn Cache>,
    pub backend: Arc<dyn ExecutionBackend>,
}

impl ApplicationContext {
    /// 连接数据库、文档存储、缓存与执行后端
    pub async fn connect(config: AppConfig) -> Result<Self> {
        info!("初始化应用上下文");

        let pool = connect(&config.database)
            .await
            .context("连接数据库失败")?;
        ensure_schema(&pool).await.context("初始化数据库表结构失败")?;

        let store = ElasticsearchStore::new(&config.search).context("创建文档存储客户端失败")?;
        let cache = RedisCache::new(&config.cache)
            .await
            .context("连接Redis失败")?;
        let backend =
            ArgoWorkflowClient::from_config(&config.execution).context("创建执行后端客户端失败")?;

        let adapters = Adapters {
            projects: Arc::new(PostgresProjectRepository::new(pool.clone())),
            entity_types: Arc::new(PostgresEntityTypeRepository::new(pool.clone())),
            entities: Arc::new(PostgresEntityRepository::new(pool)),
            store: Arc::new(store),
            cache: Arc::new(cache),
            backend: Arc::new(backend),
        };
        Ok(Self::from_adapters(config, adapters))
    }

    /// 全部使用内存实现，不依赖外部服务
    pub fn embedded(config: AppConfig) -> Self {
        let adapters = Adapters {
            projects: Arc::new(InMemoryProjectRepository::new()),
            entity_types: Arc::new(InMemoryEntityTypeRepository::new()),
            entities: Arc::new(InMemoryEntityRepository::new()),
            store: Arc::new(InMemoryDocumentStore::new()),
            cache: Arc::new(InMemoryCache::new()),
            backend: Arc::new(InMemoryExecutionBackend::new()),
        };
        Self::from_adapters(config, adapters)
    }

    pub fn from_adapters(config: AppConfig, adapters: Adapters) -> Self {
        let registry = Arc::new(SchemaRegistry::new(adapters.entity_types.clone()));
        let indexer = Arc::new(DocumentIndexer::new(
            adapters.store,
            registry,
            config.search.clone(),
        ));
        let hooks = PostWriteHooks::standard(indexer.clone(), adapters.cache);
        let entities: Arc<dyn EntityRepository> = Arc::new(HookedEntityRepository::new(
            adapters.entities,
            adapters.projects.clone(),
            hooks,
        ));

        let ttl = TtlPolicy::new(
            config.execution.ttl_success_seconds,
            config.execution.ttl_failure_seconds,
        );
        let jobs = Arc::new(JobManager::new(adapters.backend).with_ttl_policy(ttl));
        let connector = ArgoClusterConnector::new(
            &config.execution.namespace,
            config.execution.request_timeout_seconds,
        );
        let ingest = IngestService::new(DagAssembler::new(config.execution.clone()), jobs)
            .with_connector(Arc::new(connector));

        Self {
            config,
            projects: adapters.projects,
            entity_types: adapters.entity_types,
            entities,
            indexer,
            ingest,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn projects(&self) -> &Arc<dyn ProjectRepository> {
        &self.projects
    }

    /// 写入后自动更新索引并使缓存失效的实体仓储
    pub fn entities(&self) -> &Arc<dyn EntityRepository> {
        &self.entities
    }

    pub fn indexer(&self) -> &Arc<DocumentIndexer> {
        &self.indexer
    }

    pub fn ingest(&self) -> &IngestService {
        &self.ingest
    }

    pub fn jobs(&self) -> &Arc<JobManager> {
        self.ingest.jobs()
    }

    pub fn rebuilder(&self) -> IndexRebuilder {
        IndexRebuilder::new(
            self.indexer.clone(),
            self.entity_types.clone(),
            self.entities.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediaflow_dispatcher::IngestRequest;
    use mediaflow_domain::{JobType, LabelSelector};
    use mediaflow_search::RebuildSection;

    fn request(name: &str) -> IngestRequest {
        IngestRequest {
            project: 3,
            entity_type: None,
            token: "token".to_string(),
            url: "http://uploads/abc".to_string(),
            name: name.to_string(),
            section: "Dives".to_string(),
            md5: "d41d8cd98f00b204e9800998ecf8427e".to_string(),
            gid: "g-1".to_string(),
            uid: "u-1".to_string(),
            user: 9,
            upload_size: None,
        }
    }

    #[tokio::test]
    async fn test_embedded_submit_then_cancel() {
        let context = ApplicationContext::embedded(AppConfig::default());
        context.ingest().submit(&request("dives.tar")).await.unwrap();

        let selector = LabelSelector::new().with("project", 3);
        let summary = context.jobs().summarize(&selector).await.unwrap();
        assert_eq!(summary.total(), 1);

        assert!(context
            .jobs()
            .cancel(&selector, JobType::Upload)
            .await
            .unwrap());
        assert!(!context
            .jobs()
            .cancel(&selector, JobType::Algorithm)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_embedded_rebuild_empty_project() {
        let context = ApplicationContext::embedded(AppConfig::default());
        let rebuilder = context.rebuilder();
        rebuilder.rebuild(3, RebuildSection::Index).await.unwrap();
        let summary = rebuilder.rebuild(3, RebuildSection::Media).await.unwrap();
        assert_eq!(summary.documents, 0);
        assert!(summary.report.is_complete());
    }
}
