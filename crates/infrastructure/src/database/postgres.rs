use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{debug, info, instrument};

use mediaflow_core::{DatabaseConfig, MediaflowError, MediaflowResult};
use mediaflow_domain::{
    Entity, EntityCategory, EntityRepository, EntityType, EntityTypeRepository, Project,
    ProjectRepository, StorageTotals,
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS projects (
        id BIGSERIAL PRIMARY KEY,
        name TEXT NOT NULL,
        num_files BIGINT NOT NULL DEFAULT 0,
        size BIGINT NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS entity_types (
        id BIGSERIAL PRIMARY KEY,
        project BIGINT NOT NULL,
        name TEXT NOT NULL,
        kind TEXT NOT NULL,
        attribute_types JSONB NOT NULL DEFAULT '[]',
        attribute_ids JSONB NOT NULL DEFAULT '{}',
        retired_aliases JSONB NOT NULL DEFAULT '{}',
        version BIGINT NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS entities (
        category TEXT NOT NULL,
        id BIGINT NOT NULL,
        project BIGINT,
        meta BIGINT NOT NULL,
        body JSONB NOT NULL,
        PRIMARY KEY (category, id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS resources (
        path TEXT PRIMARY KEY,
        project BIGINT,
        size BIGINT NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS temporary_files (
        path TEXT PRIMARY KEY,
        project BIGINT,
        size BIGINT NOT NULL DEFAULT 0
    )
    "#,
];

/// 建立连接池
pub async fn connect(config: &DatabaseConfig) -> MediaflowResult<PgPool> {
    info!("连接数据库，最大连接数 {}", config.max_connections);
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
        .connect(&config.url)
        .await?;
    Ok(pool)
}

/// 创建缺失的表
pub async fn ensure_schema(pool: &PgPool) -> MediaflowResult<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    debug!("数据库表结构已就绪");
    Ok(())
}

pub struct PostgresEntityTypeRepository {
    pool: PgPool,
}

impl PostgresEntityTypeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_entity_type(row: &sqlx::postgres::PgRow) -> MediaflowResult<EntityType> {
        let kind: String = row.try_get("kind")?;
        Ok(EntityType {
            id: row.try_get("id")?,
            project: row.try_get("project")?,
            name: row.try_get("name")?,
            kind: serde_json::from_value(serde_json::Value::String(kind))?,
            attribute_types: serde_json::from_value(row.try_get::<serde_json::Value, _>("attribute_types")?)?,
            attribute_ids: serde_json::from_value(row.try_get::<serde_json::Value, _>("attribute_ids")?)?,
            retired_aliases: serde_json::from_value(row.try_get::<serde_json::Value, _>("retired_aliases")?)?,
            version: row.try_get("version")?,
        })
    }
}

const ENTITY_TYPE_COLUMNS: &str =
    "id, project, name, kind, attribute_types, attribute_ids, retired_aliases, version";

#[async_trait]
impl EntityTypeRepository for PostgresEntityTypeRepository {
    async fn find_by_id(&self, id: i64) -> MediaflowResult<Option<EntityType>> {
        let row = sqlx::query(&format!(
            "SELECT {ENTITY_TYPE_COLUMNS} FROM entity_types WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_entity_type).transpose()
    }

    async fn find_by_project(&self, project: i64) -> MediaflowResult<Vec<EntityType>> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTITY_TYPE_COLUMNS} FROM entity_types WHERE project = $1 ORDER BY id"
        ))
        .bind(project)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_entity_type).collect()
    }

    #[instrument(skip(self, entity_type), fields(name = %entity_type.name))]
    async fn create(&self, entity_type: &EntityType) -> MediaflowResult<EntityType> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO entity_types (project, name, kind, attribute_types, attribute_ids, retired_aliases, version)
            VALUES ($1, $2, $3, $4, $5, $6, 0)
            RETURNING {ENTITY_TYPE_COLUMNS}
            "#
        ))
        .bind(entity_type.project)
        .bind(&entity_type.name)
        .bind(entity_type.kind.as_str())
        .bind(serde_json::to_value(&entity_type.attribute_types)?)
        .bind(serde_json::to_value(&entity_type.attribute_ids)?)
        .bind(serde_json::to_value(&entity_type.retired_aliases)?)
        .fetch_one(&self.pool)
        .await?;
        let created = Self::row_to_entity_type(&row)?;
        info!("创建实体类型 {} (ID: {})", created.name, created.id);
        Ok(created)
    }

    #[instrument(skip(self, entity_type), fields(id = entity_type.id))]
    async fn compare_and_swap(
        &self,
        entity_type: &EntityType,
        expected_version: i64,
    ) -> MediaflowResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE entity_types
            SET name = $3, attribute_types = $4, attribute_ids = $5, retired_aliases = $6,
                version = version + 1
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(entity_type.id)
        .bind(expected_version)
        .bind(&entity_type.name)
        .bind(serde_json::to_value(&entity_type.attribute_types)?)
        .bind(serde_json::to_value(&entity_type.attribute_ids)?)
        .bind(serde_json::to_value(&entity_type.retired_aliases)?)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

/// 实体以 JSONB 形式保存，按 (类别, ID) 定位
pub struct PostgresEntityRepository {
    pool: PgPool,
}

impl PostgresEntityRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_entity(row: &sqlx::postgres::PgRow) -> MediaflowResult<Entity> {
        let body: serde_json::Value = row.try_get("body")?;
        Ok(serde_json::from_value(body)?)
    }
}

#[async_trait]
impl EntityRepository for PostgresEntityRepository {
    async fn find_by_id(&self, category: EntityCategory, id: i64) -> MediaflowResult<Option<Entity>> {
        let row = sqlx::query("SELECT body FROM entities WHERE category = $1 AND id = $2")
            .bind(category.as_str())
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_entity).transpose()
    }

    async fn find_by_project(
        &self,
        project: i64,
        category: EntityCategory,
    ) -> MediaflowResult<Vec<Entity>> {
        let rows = sqlx::query(
            "SELECT body FROM entities WHERE project = $1 AND category = $2 ORDER BY id",
        )
        .bind(project)
        .bind(category.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_entity).collect()
    }

    async fn save(&self, entity: &Entity) -> MediaflowResult<()> {
        sqlx::query(
            r#"
            INSERT INTO entities (category, id, project, meta, body)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (category, id)
            DO UPDATE SET project = EXCLUDED.project, meta = EXCLUDED.meta, body = EXCLUDED.body
            "#,
        )
        .bind(entity.category().as_str())
        .bind(entity.id())
        .bind(entity.project())
        .bind(entity.base().meta)
        .bind(serde_json::to_value(entity)?)
        .execute(&self.pool)
        .await?;
        debug!("保存实体 {}", entity.document_id());
        Ok(())
    }

    async fn delete(&self, category: EntityCategory, id: i64) -> MediaflowResult<bool> {
        let result = sqlx::query("DELETE FROM entities WHERE category = $1 AND id = $2")
            .bind(category.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

pub struct PostgresProjectRepository {
    pool: PgPool,
}

impl PostgresProjectRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_project(row: &sqlx::postgres::PgRow) -> MediaflowResult<Project> {
        Ok(Project {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            num_files: row.try_get("num_files")?,
            size: row.try_get("size")?,
        })
    }
}

#[async_trait]
impl ProjectRepository for PostgresProjectRepository {
    async fn find_all(&self) -> MediaflowResult<Vec<Project>> {
        let rows = sqlx::query("SELECT id, name, num_files, size FROM projects ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_project).collect()
    }

    async fn find_by_id(&self, id: i64) -> MediaflowResult<Option<Project>> {
        let row = sqlx::query("SELECT id, name, num_files, size FROM projects WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_project).transpose()
    }

    /// 文件数为媒体数加临时文件数，大小为资源与临时文件大小之和
    async fn compute_totals(&self, project: i64) -> MediaflowResult<StorageTotals> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM entities WHERE project = $1 AND category = 'media')
                  + (SELECT COUNT(*) FROM temporary_files WHERE project = $1) AS num_files,
                (SELECT COALESCE(SUM(size), 0) FROM resources WHERE project = $1)::BIGINT
                  + (SELECT COALESCE(SUM(size), 0) FROM temporary_files WHERE project = $1)::BIGINT AS size
            "#,
        )
        .bind(project)
        .fetch_one(&self.pool)
        .await?;
        Ok(StorageTotals {
            num_files: row.try_get("num_files")?,
            size: row.try_get("size")?,
        })
    }

    async fn update_totals(&self, project: i64, totals: StorageTotals) -> MediaflowResult<()> {
        let result = sqlx::query("UPDATE projects SET num_files = $2, size = $3 WHERE id = $1")
            .bind(project)
            .bind(totals.num_files)
            .bind(totals.size)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(MediaflowError::not_found("项目", project.to_string()));
        }
        Ok(())
    }

    async fn referenced_paths(&self) -> MediaflowResult<HashSet<String>> {
        let rows = sqlx::query("SELECT path FROM resources UNION SELECT path FROM temporary_files")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("path").map_err(MediaflowError::from))
            .collect()
    }
}
