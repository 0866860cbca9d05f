//! 领域仓储抽象
//!
//! 关系型存储由外部实现，核心只依赖以下接口。

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use mediaflow_core::MediaflowResult;

use crate::entities::Entity;
use crate::entity_type::{EntityCategory, EntityType};

/// 实体类型仓储
#[async_trait]
pub trait EntityTypeRepository: Send + Sync {
    async fn find_by_id(&self, id: i64) -> MediaflowResult<Option<EntityType>>;
    async fn find_by_project(&self, project: i64) -> MediaflowResult<Vec<EntityType>>;
    async fn create(&self, entity_type: &EntityType) -> MediaflowResult<EntityType>;
    /// 仅当存储中的版本等于 `expected_version` 时写入，写入后版本加一。
    /// 返回 `false` 表示版本冲突，调用方应重新读取后重试。
    async fn compare_and_swap(
        &self,
        entity_type: &EntityType,
        expected_version: i64,
    ) -> MediaflowResult<bool>;
}

/// 实体仓储
#[async_trait]
pub trait EntityRepository: Send + Sync {
    async fn find_by_id(&self, category: EntityCategory, id: i64) -> MediaflowResult<Option<Entity>>;
    async fn find_by_project(
        &self,
        project: i64,
        category: EntityCategory,
    ) -> MediaflowResult<Vec<Entity>>;
    async fn save(&self, entity: &Entity) -> MediaflowResult<()>;
    async fn delete(&self, category: EntityCategory, id: i64) -> MediaflowResult<bool>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub num_files: i64,
    pub size: i64,
}

/// 项目存储统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageTotals {
    pub num_files: i64,
    pub size: i64,
}

#[async_trait]
pub trait ProjectRepository: Send + Sync {
    async fn find_all(&self) -> MediaflowResult<Vec<Project>>;
    async fn find_by_id(&self, id: i64) -> MediaflowResult<Option<Project>>;
    /// 媒体与临时文件的数量和大小
    async fn compute_totals(&self, project: i64) -> MediaflowResult<StorageTotals>;
    async fn update_totals(&self, project: i64, totals: StorageTotals) -> MediaflowResult<()>;
    /// 所有已持久化资源引用的文件路径
    async fn referenced_paths(&self) -> MediaflowResult<HashSet<String>>;
}
