use std::sync::Arc;

use metrics::counter;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use mediaflow_core::{MediaflowError, MediaflowResult, SearchConfig};
use mediaflow_domain::{
    BulkReport, Document, DocumentOp, DocumentStore, Entity, EntityCategory, EntityType,
};

use crate::document::build_document;
use crate::mapping::{attribute_properties, index_body, structural_properties};
use crate::projection::{field_name, project_value};
use crate::query::IdCollector;
use crate::schema_registry::SchemaRegistry;

/// 文档索引器
///
/// 把实体写入项目索引并提供查询、按查询批量更新与删除。索引失败只记录日志，
/// 索引可以通过重建恢复。
pub struct DocumentIndexer {
    store: Arc<dyn DocumentStore>,
    registry: Arc<SchemaRegistry>,
    config: SearchConfig,
}

impl DocumentIndexer {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        registry: Arc<SchemaRegistry>,
        config: SearchConfig,
    ) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn bulk_chunk_size(&self) -> usize {
        self.config.bulk_chunk_size.max(1)
    }

    pub fn index_name(&self, project: i64) -> String {
        self.config.index_name(project)
    }

    /// 创建项目索引，已存在时不做任何事
    pub async fn create_index(&self, project: i64) -> MediaflowResult<()> {
        let index = self.index_name(project);
        if self.store.index_exists(&index).await? {
            debug!("索引 {} 已存在", index);
            return Ok(());
        }
        self.store.create_index(&index, &index_body()).await?;
        self.store
            .put_mapping(&index, &structural_properties())
            .await?;
        info!("已创建项目 {} 的索引 {}", project, index);
        Ok(())
    }

    /// 删除项目索引，不存在时不做任何事
    pub async fn delete_index(&self, project: i64) -> MediaflowResult<()> {
        let index = self.index_name(project);
        if !self.store.index_exists(&index).await? {
            debug!("索引 {} 不存在，无需删除", index);
            return Ok(());
        }
        self.store.delete_index(&index).await?;
        info!("已删除项目 {} 的索引 {}", project, index);
        Ok(())
    }

    /// 为实体类型的全部属性写入投影字段和别名映射
    pub async fn create_mapping(&self, entity_type_id: i64) -> MediaflowResult<EntityType> {
        let entity_type = self.registry.ensure_identifiers(entity_type_id).await?;
        let index = self.index_name(entity_type.project);
        self.store
            .put_mapping(&index, &attribute_properties(&entity_type))
            .await?;
        debug!(
            "已更新实体类型 {} ({}) 的映射",
            entity_type.name, entity_type.id
        );
        Ok(entity_type)
    }

    /// 构建实体的文档，必要时先为属性分配标识
    pub async fn build(&self, entity: &Entity, op: DocumentOp) -> MediaflowResult<Vec<Document>> {
        let entity_type = self.registry.ensure_identifiers(entity.base().meta).await?;
        build_document(entity, &entity_type, op)
    }

    /// 同步写入单个实体的全部文档
    pub async fn index(&self, entity: &Entity) -> MediaflowResult<()> {
        let Some(project) = entity.project() else {
            debug!("实体 {} 不属于任何项目，跳过索引", entity.document_id());
            return Ok(());
        };
        let index = self.index_name(project);
        let documents = self.build(entity, DocumentOp::Index).await?;
        for document in &documents {
            self.store.index_document(&index, document).await?;
        }
        counter!("mediaflow_documents_indexed_total").increment(documents.len() as u64);
        debug!(
            "实体 {} 已写入 {} 个文档",
            entity.document_id(),
            documents.len()
        );
        Ok(())
    }

    /// 分批写入，单个文档失败只记录不中断
    pub async fn bulk_index(
        &self,
        project: i64,
        documents: &[Document],
    ) -> MediaflowResult<BulkReport> {
        let index = self.index_name(project);
        let mut report = BulkReport::default();

        for chunk in documents.chunks(self.bulk_chunk_size()) {
            let chunk_report = self.store.bulk_index(&index, chunk).await?;
            for failure in &chunk_report.failures {
                warn!("文档 {} 写入索引 {} 失败: {}", failure.id, index, failure.reason);
            }
            counter!("mediaflow_documents_indexed_total")
                .increment(chunk_report.succeeded as u64);
            counter!("mediaflow_index_failures_total")
                .increment(chunk_report.failures.len() as u64);
            report.merge(chunk_report);
        }

        if !report.is_complete() {
            warn!(
                "索引 {} 批量写入完成，成功 {}，失败 {}",
                index,
                report.succeeded,
                report.failures.len()
            );
        }
        Ok(report)
    }

    /// 删除实体的全部文档
    ///
    /// 实体已脱离项目或项目索引已被删除时直接返回。
    pub async fn remove(&self, entity: &Entity) -> MediaflowResult<()> {
        let Some(project) = entity.project() else {
            return Ok(());
        };
        let index = self.index_name(project);

        let result = async {
            let removed = self
                .store
                .delete_document(&index, &entity.document_id(), crate::document::ROUTING)
                .await?;
            if entity.category() == EntityCategory::State {
                let duplicates = self
                    .store
                    .delete_by_query(&index, &Self::same_entity_query(entity))
                    .await?;
                debug!("状态 {} 删除了 {} 个文档", entity.id(), duplicates);
            } else if !removed {
                debug!("文档 {} 不存在", entity.document_id());
            }
            Ok::<(), MediaflowError>(())
        }
        .await;

        match result {
            Err(MediaflowError::IndexNotFound(_)) => {
                debug!("索引 {} 已不存在，跳过删除 {}", index, entity.document_id());
                Ok(())
            }
            other => other,
        }
    }

    fn same_entity_query(entity: &Entity) -> Value {
        json!({
            "query": {
                "bool": {
                    "filter": [
                        {"term": {"_dtype": entity.kind().as_str()}},
                        {"term": {"_postgres_id": entity.id()}},
                    ]
                }
            }
        })
    }

    /// 执行查询，返回去重后的实体ID与命中总数
    ///
    /// 未指定 `size` 或超过单次请求上限时改用游标分页，直到取满所需数量。
    pub async fn query(&self, project: i64, query: &Value) -> MediaflowResult<(Vec<i64>, u64)> {
        let index = self.index_name(project);
        let mut body = match query {
            Value::Object(map) => map.clone(),
            _ => return Err(MediaflowError::validation("查询必须是 JSON 对象")),
        };
        body.entry("sort")
            .or_insert_with(|| json!({"_doc": {"order": "asc"}}));

        let requested = body.get("size").and_then(Value::as_u64);
        let window = self.config.max_result_window as u64;

        if let Some(size) = requested.filter(|size| *size < window) {
            let page = self
                .store
                .search(&index, &Value::Object(body), None)
                .await?;
            let mut collector = IdCollector::new();
            collector.extend(&page.ids)?;
            let mut ids = collector.into_ids();
            ids.truncate(size as usize);
            return Ok((ids, page.total));
        }

        body.insert("size".to_string(), json!(window));
        let keep_alive = self.config.scroll_keep_alive.as_str();
        let mut page = self
            .store
            .search(&index, &Value::Object(body), Some(keep_alive))
            .await?;
        let total = page.total;
        let wanted = requested.unwrap_or(total).min(total) as usize;

        let mut collector = IdCollector::new();
        let mut scroll_id = page.scroll_id.clone();
        loop {
            collector.extend(&page.ids)?;
            if collector.len() >= wanted || page.ids.is_empty() {
                break;
            }
            let Some(current) = scroll_id.as_deref() else {
                break;
            };
            page = self.store.scroll(current, keep_alive).await?;
            if page.scroll_id.is_some() {
                scroll_id = page.scroll_id.clone();
            }
        }

        if let Some(scroll_id) = scroll_id {
            if let Err(e) = self.store.clear_scroll(&scroll_id).await {
                warn!("清理游标失败: {}", e);
            }
        }

        let mut ids = collector.into_ids();
        ids.truncate(wanted);
        debug!("索引 {} 查询返回 {} 个实体，命中 {}", index, ids.len(), total);
        Ok((ids, total))
    }

    /// 统计命中数，忽略排序、聚合和分页
    pub async fn count(&self, project: i64, query: &Value) -> MediaflowResult<u64> {
        let mut body = query.as_object().cloned().unwrap_or_default();
        for key in ["sort", "aggs", "size"] {
            body.remove(key);
        }
        self.store
            .count(&self.index_name(project), &Value::Object(body))
            .await
    }

    pub async fn refresh(&self, project: i64) -> MediaflowResult<()> {
        self.store.refresh(&self.index_name(project)).await
    }

    pub async fn get_document(
        &self,
        project: i64,
        document_id: &str,
    ) -> MediaflowResult<Option<Map<String, Value>>> {
        self.store
            .get_document(&self.index_name(project), document_id)
            .await
    }

    /// 按查询批量更新属性
    ///
    /// 属性值先按实体类型校验，再经稳定标识展开为各投影字段后写入脚本参数。
    pub async fn bulk_update_by_query(
        &self,
        project: i64,
        entity_type_id: i64,
        query: &Value,
        attributes: &Map<String, Value>,
    ) -> MediaflowResult<u64> {
        let entity_type = self.registry.ensure_identifiers(entity_type_id).await?;
        let values = entity_type.validate_attributes(attributes)?;
        if values.is_empty() {
            return Ok(0);
        }

        let mut statements = Vec::new();
        let mut params = Map::new();
        for (name, value) in &values {
            let identifier = entity_type
                .identifier(name)
                .ok_or_else(|| MediaflowError::internal(format!("属性 {name} 标识丢失")))?;
            for (storage, projected) in project_value(value) {
                let param = format!("p{}", params.len());
                statements.push(format!(
                    "ctx._source['{}'] = params.{};",
                    field_name(&identifier, storage),
                    param
                ));
                params.insert(param, projected);
            }
        }

        let mut body = query.as_object().cloned().unwrap_or_default();
        body.insert(
            "script".to_string(),
            json!({
                "source": statements.join(""),
                "lang": "painless",
                "params": params,
            }),
        );

        let updated = self
            .store
            .update_by_query(&self.index_name(project), &Value::Object(body))
            .await?;
        info!(
            "项目 {} 按查询更新了 {} 个文档的属性 {:?}",
            project,
            updated,
            values.keys().collect::<Vec<_>>()
        );
        Ok(updated)
    }

    pub async fn bulk_delete_by_query(&self, project: i64, query: &Value) -> MediaflowResult<u64> {
        let deleted = self
            .store
            .delete_by_query(&self.index_name(project), query)
            .await?;
        info!("项目 {} 按查询删除了 {} 个文档", project, deleted);
        Ok(deleted)
    }
}
