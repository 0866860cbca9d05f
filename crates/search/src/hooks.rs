//! 持久化写入后的副作用：索引更新与缓存失效

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use mediaflow_core::{MediaflowError, MediaflowResult};
use mediaflow_domain::leaf_path::{ancestors, LeafTree};
use mediaflow_domain::{
    Cache, Entity, EntityCategory, EntityRepository, Leaf, PostWriteHook, ProjectRepository,
};

use crate::indexer::DocumentIndexer;

pub struct IndexHook {
    indexer: Arc<DocumentIndexer>,
}

impl IndexHook {
    pub fn new(indexer: Arc<DocumentIndexer>) -> Self {
        Self { indexer }
    }
}

#[async_trait]
impl PostWriteHook for IndexHook {
    fn name(&self) -> &'static str {
        "index"
    }

    async fn after_save(&self, entity: &Entity) -> MediaflowResult<()> {
        self.indexer.index(entity).await
    }

    async fn before_delete(&self, entity: &Entity) -> MediaflowResult<()> {
        self.indexer.remove(entity).await
    }
}

/// 实体写入或删除时需要失效的列表缓存键
pub fn cache_keys(entity: &Entity) -> Vec<String> {
    match entity {
        Entity::Media(media) => media
            .base
            .project
            .map(|project| vec![format!("media_list_{project}")])
            .unwrap_or_default(),
        Entity::Localization(localization) => vec![format!(
            "localization_list_{}_{}",
            localization.media.id, localization.base.meta
        )],
        Entity::Leaf(leaf) => ancestors(&leaf.path)
            .into_iter()
            .map(|segment| format!("treeleaf_list_{segment}"))
            .collect(),
        Entity::State(_) => Vec::new(),
    }
}

pub struct CacheInvalidationHook {
    cache: Arc<dyn Cache>,
}

impl CacheInvalidationHook {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }

    async fn invalidate(&self, entity: &Entity) -> MediaflowResult<()> {
        for key in cache_keys(entity) {
            self.cache.invalidate(&key).await?;
            debug!("缓存 {} 已失效", key);
        }
        Ok(())
    }
}

#[async_trait]
impl PostWriteHook for CacheInvalidationHook {
    fn name(&self) -> &'static str {
        "cache"
    }

    async fn after_save(&self, entity: &Entity) -> MediaflowResult<()> {
        self.invalidate(entity).await
    }

    async fn before_delete(&self, entity: &Entity) -> MediaflowResult<()> {
        self.invalidate(entity).await
    }
}

/// 按顺序执行的钩子集合，钩子失败只记录日志
#[derive(Clone)]
pub struct PostWriteHooks {
    hooks: Vec<Arc<dyn PostWriteHook>>,
}

impl PostWriteHooks {
    /// 每类实体都执行的两个钩子：索引与缓存失效
    pub fn standard(indexer: Arc<DocumentIndexer>, cache: Arc<dyn Cache>) -> Self {
        Self {
            hooks: vec![
                Arc::new(IndexHook::new(indexer)),
                Arc::new(CacheInvalidationHook::new(cache)),
            ],
        }
    }

    pub fn from_hooks(hooks: Vec<Arc<dyn PostWriteHook>>) -> Self {
        Self { hooks }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.hooks.iter().map(|h| h.name()).collect()
    }

    pub async fn after_save(&self, entity: &Entity) {
        for hook in &self.hooks {
            if let Err(e) = hook.after_save(entity).await {
                warn!(
                    "实体 {} 保存后钩子 {} 执行失败: {}",
                    entity.document_id(),
                    hook.name(),
                    e
                );
            }
        }
    }

    pub async fn before_delete(&self, entity: &Entity) {
        for hook in &self.hooks {
            if let Err(e) = hook.before_delete(entity).await {
                warn!(
                    "实体 {} 删除前钩子 {} 执行失败: {}",
                    entity.document_id(),
                    hook.name(),
                    e
                );
            }
        }
    }
}

/// 在写入成功后、删除之前调用钩子的实体仓储
///
/// 树节点保存时按父链重算路径，改名或移动会连同路径变化的子孙一起写回并重新索引。
pub struct HookedEntityRepository {
    inner: Arc<dyn EntityRepository>,
    projects: Arc<dyn ProjectRepository>,
    hooks: PostWriteHooks,
}

impl HookedEntityRepository {
    pub fn new(
        inner: Arc<dyn EntityRepository>,
        projects: Arc<dyn ProjectRepository>,
        hooks: PostWriteHooks,
    ) -> Self {
        Self {
            inner,
            projects,
            hooks,
        }
    }

    async fn write(&self, entity: &Entity) -> MediaflowResult<()> {
        self.inner.save(entity).await?;
        self.hooks.after_save(entity).await;
        Ok(())
    }

    async fn leaf_tree(&self, project: i64) -> MediaflowResult<LeafTree> {
        let name = self
            .projects
            .find_by_id(project)
            .await?
            .map(|p| p.name)
            .ok_or_else(|| MediaflowError::not_found("项目", project.to_string()))?;
        let leaves = self
            .inner
            .find_by_project(project, EntityCategory::Leaf)
            .await?
            .into_iter()
            .filter_map(|entity| match entity {
                Entity::Leaf(leaf) => Some(leaf),
                _ => None,
            });
        Ok(LeafTree::from_stored(&name, leaves))
    }

    /// 待写回的节点：被保存的节点本身，以及路径发生变化的子孙
    async fn place_leaf(&self, leaf: &Leaf) -> MediaflowResult<Vec<Leaf>> {
        let project = leaf
            .base
            .project
            .ok_or_else(|| MediaflowError::validation(format!("树节点 {} 缺少项目", leaf.base.id)))?;
        let mut tree = self.leaf_tree(project).await?;

        let Some(previous) = tree.get(leaf.base.id).map(|l| l.path.clone()) else {
            return Ok(vec![tree.insert(leaf.clone())?]);
        };
        let before: HashMap<i64, String> = tree
            .leaves()
            .map(|l| (l.base.id, l.path.clone()))
            .collect();

        let mut changed = tree.update(leaf.base.id, Some(leaf.name.as_str()), Some(leaf.parent))?;
        changed.retain(|l| l.base.id == leaf.base.id || before.get(&l.base.id) != Some(&l.path));
        for node in changed.iter_mut().filter(|l| l.base.id == leaf.base.id) {
            node.base = leaf.base.clone();
            if node.path != previous {
                debug!("树节点 {} 路径 {} 变为 {}", node.base.id, previous, node.path);
            }
        }
        Ok(changed)
    }
}

#[async_trait]
impl EntityRepository for HookedEntityRepository {
    async fn find_by_id(
        &self,
        category: EntityCategory,
        id: i64,
    ) -> MediaflowResult<Option<Entity>> {
        self.inner.find_by_id(category, id).await
    }

    async fn find_by_project(
        &self,
        project: i64,
        category: EntityCategory,
    ) -> MediaflowResult<Vec<Entity>> {
        self.inner.find_by_project(project, category).await
    }

    async fn save(&self, entity: &Entity) -> MediaflowResult<()> {
        let Entity::Leaf(leaf) = entity else {
            return self.write(entity).await;
        };
        for node in self.place_leaf(leaf).await? {
            self.write(&Entity::Leaf(node)).await?;
        }
        Ok(())
    }

    async fn delete(&self, category: EntityCategory, id: i64) -> MediaflowResult<bool> {
        let Some(entity) = self.inner.find_by_id(category, id).await? else {
            return Ok(false);
        };
        let tree = match &entity {
            Entity::Leaf(leaf) => match leaf.base.project {
                Some(project) => Some(self.leaf_tree(project).await?),
                None => None,
            },
            _ => None,
        };

        self.hooks.before_delete(&entity).await;
        let deleted = self.inner.delete(category, id).await?;
        if let (true, Some(mut tree)) = (deleted, tree) {
            for orphan in tree.remove(id)? {
                self.write(&Entity::Leaf(orphan)).await?;
            }
        }
        Ok(deleted)
    }
}
