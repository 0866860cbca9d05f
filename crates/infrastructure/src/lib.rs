pub mod cache;
pub mod database;
pub mod execution;
pub mod search;

pub use cache::{InMemoryCache, RedisCache};
pub use database::{
    connect, ensure_schema, InMemoryEntityRepository, InMemoryEntityTypeRepository,
    InMemoryProjectRepository, PostgresEntityRepository, PostgresEntityTypeRepository,
    PostgresProjectRepository,
};
pub use execution::{ArgoWorkflowClient, InMemoryExecutionBackend};
pub use search::{ElasticsearchStore, InMemoryDocumentStore};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use mediaflow_domain::{
        Cache, DocumentStore, EntityRepository, EntityTypeRepository, ExecutionBackend,
        ProjectRepository,
    };

    #[test]
    fn test_in_memory_adapters_are_distinct_per_port() {
        let _cache: Arc<dyn Cache> = Arc::new(super::InMemoryCache::new());
        let _store: Arc<dyn DocumentStore> = Arc::new(super::InMemoryDocumentStore::new());
        let _entities: Arc<dyn EntityRepository> =
            Arc::new(super::database::in_memory::InMemoryEntityRepository::new());
        let _types: Arc<dyn EntityTypeRepository> =
            Arc::new(super::InMemoryEntityTypeRepository::new());
        let _projects: Arc<dyn ProjectRepository> =
            Arc::new(super::InMemoryProjectRepository::new());
        let _backend: Arc<dyn ExecutionBackend> =
            Arc::new(super::execution::in_memory::InMemoryExecutionBackend::new());
    }
}
