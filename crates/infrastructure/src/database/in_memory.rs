use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use mediaflow_core::{MediaflowError, MediaflowResult};
use mediaflow_domain::{
    Entity, EntityCategory, EntityRepository, EntityType, EntityTypeRepository, Project,
    ProjectRepository, StorageTotals,
};

/// 内存实体类型仓储，`compare_and_swap` 与数据库实现一样按版本号判定
#[derive(Debug, Default, Clone)]
pub struct InMemoryEntityTypeRepository {
    entity_types: Arc<RwLock<BTreeMap<i64, EntityType>>>,
    next_id: Arc<AtomicI64>,
}

impl InMemoryEntityTypeRepository {
    pub fn new() -> Self {
        Self {
            entity_types: Arc::new(RwLock::new(BTreeMap::new())),
            next_id: Arc::new(AtomicI64::new(1)),
        }
    }

    /// 按给定ID直接写入，便于测试构造
    pub async fn insert(&self, entity_type: EntityType) {
        self.next_id
            .fetch_max(entity_type.id + 1, Ordering::SeqCst);
        self.entity_types
            .write()
            .await
            .insert(entity_type.id, entity_type);
    }
}

#[async_trait]
impl EntityTypeRepository for InMemoryEntityTypeRepository {
    async fn find_by_id(&self, id: i64) -> MediaflowResult<Option<EntityType>> {
        Ok(self.entity_types.read().await.get(&id).cloned())
    }

    async fn find_by_project(&self, project: i64) -> MediaflowResult<Vec<EntityType>> {
        Ok(self
            .entity_types
            .read()
            .await
            .values()
            .filter(|t| t.project == project)
            .cloned()
            .collect())
    }

    async fn create(&self, entity_type: &EntityType) -> MediaflowResult<EntityType> {
        let mut created = entity_type.clone();
        created.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        created.version = 0;
        self.entity_types
            .write()
            .await
            .insert(created.id, created.clone());
        Ok(created)
    }

    async fn compare_and_swap(
        &self,
        entity_type: &EntityType,
        expected_version: i64,
    ) -> MediaflowResult<bool> {
        let mut entity_types = self.entity_types.write().await;
        let current = entity_types
            .get_mut(&entity_type.id)
            .ok_or_else(|| MediaflowError::not_found("实体类型", entity_type.id.to_string()))?;
        if current.version != expected_version {
            return Ok(false);
        }
        let mut updated = entity_type.clone();
        updated.version = expected_version + 1;
        *current = updated;
        Ok(true)
    }
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryEntityRepository {
    entities: Arc<RwLock<BTreeMap<(&'static str, i64), Entity>>>,
}

impl InMemoryEntityRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entities.read().await.len()
    }
}

#[async_trait]
impl EntityRepository for InMemoryEntityRepository {
    async fn find_by_id(&self, category: EntityCategory, id: i64) -> MediaflowResult<Option<Entity>> {
        Ok(self
            .entities
            .read()
            .await
            .get(&(category.as_str(), id))
            .cloned())
    }

    async fn find_by_project(
        &self,
        project: i64,
        category: EntityCategory,
    ) -> MediaflowResult<Vec<Entity>> {
        Ok(self
            .entities
            .read()
            .await
            .values()
            .filter(|e| e.project() == Some(project) && e.category() == category)
            .cloned()
            .collect())
    }

    async fn save(&self, entity: &Entity) -> MediaflowResult<()> {
        self.entities
            .write()
            .await
            .insert((entity.category().as_str(), entity.id()), entity.clone());
        Ok(())
    }

    async fn delete(&self, category: EntityCategory, id: i64) -> MediaflowResult<bool> {
        Ok(self
            .entities
            .write()
            .await
            .remove(&(category.as_str(), id))
            .is_some())
    }
}

/// 内存项目仓储，文件与资源按项目登记
#[derive(Debug, Default, Clone)]
pub struct InMemoryProjectRepository {
    projects: Arc<RwLock<BTreeMap<i64, Project>>>,
    /// 路径 -> (项目, 大小, 是否临时文件)
    files: Arc<RwLock<HashMap<String, (i64, i64, bool)>>>,
    media_counts: Arc<RwLock<HashMap<i64, i64>>>,
    updates: Arc<RwLock<Vec<i64>>>,
}

impl InMemoryProjectRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, project: Project) {
        self.projects.write().await.insert(project.id, project);
    }

    pub async fn add_resource(&self, project: i64, path: &str, size: i64) {
        self.files
            .write()
            .await
            .insert(path.to_string(), (project, size, false));
    }

    pub async fn add_temporary_file(&self, project: i64, path: &str, size: i64) {
        self.files
            .write()
            .await
            .insert(path.to_string(), (project, size, true));
    }

    pub async fn set_media_count(&self, project: i64, count: i64) {
        self.media_counts.write().await.insert(project, count);
    }

    /// 发生过写入的项目ID
    pub async fn updated_projects(&self) -> Vec<i64> {
        self.updates.read().await.clone()
    }
}

#[async_trait]
impl ProjectRepository for InMemoryProjectRepository {
    async fn find_all(&self) -> MediaflowResult<Vec<Project>> {
        Ok(self.projects.read().await.values().cloned().collect())
    }

    async fn find_by_id(&self, id: i64) -> MediaflowResult<Option<Project>> {
        Ok(self.projects.read().await.get(&id).cloned())
    }

    async fn compute_totals(&self, project: i64) -> MediaflowResult<StorageTotals> {
        let files = self.files.read().await;
        let media = self
            .media_counts
            .read()
            .await
            .get(&project)
            .copied()
            .unwrap_or(0);
        let temporary = files
            .values()
            .filter(|(p, _, temporary)| *p == project && *temporary)
            .count() as i64;
        let size = files
            .values()
            .filter(|(p, _, _)| *p == project)
            .map(|(_, size, _)| size)
            .sum();
        Ok(StorageTotals {
            num_files: media + temporary,
            size,
        })
    }

    async fn update_totals(&self, project: i64, totals: StorageTotals) -> MediaflowResult<()> {
        let mut projects = self.projects.write().await;
        let entry = projects
            .get_mut(&project)
            .ok_or_else(|| MediaflowError::not_found("项目", project.to_string()))?;
        entry.num_files = totals.num_files;
        entry.size = totals.size;
        self.updates.write().await.push(project);
        Ok(())
    }

    async fn referenced_paths(&self) -> MediaflowResult<HashSet<String>> {
        Ok(self.files.read().await.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediaflow_domain::EntityKind;

    #[tokio::test]
    async fn test_compare_and_swap_rejects_stale_version() {
        let repo = InMemoryEntityTypeRepository::new();
        let created = repo
            .create(&EntityType::new(0, 1, "Fish", EntityKind::Box))
            .await
            .unwrap();

        let mut first = created.clone();
        first.name = "Fish v2".to_string();
        assert!(repo.compare_and_swap(&first, 0).await.unwrap());

        let mut stale = created.clone();
        stale.name = "Stale".to_string();
        assert!(!repo.compare_and_swap(&stale, 0).await.unwrap());

        let stored = repo.find_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(stored.name, "Fish v2");
        assert_eq!(stored.version, 1);
    }
}
