use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use mediaflow_core::{MediaflowError, MediaflowResult};
use mediaflow_domain::{BulkFailure, BulkReport, Document, DocumentOp, DocumentStore, SearchPage};

const DEFAULT_PAGE_SIZE: usize = 10;

#[derive(Debug, Default)]
struct IndexState {
    /// 按写入顺序保存，`_doc` 排序即写入顺序
    documents: Vec<(String, Map<String, Value>)>,
    /// 别名字段 -> 实际字段
    aliases: HashMap<String, String>,
    mappings: Map<String, Value>,
}

impl IndexState {
    fn position(&self, id: &str) -> Option<usize> {
        self.documents.iter().position(|(doc_id, _)| doc_id == id)
    }

    fn upsert(&mut self, id: &str, source: Map<String, Value>) {
        match self.position(id) {
            Some(pos) => self.documents[pos].1 = source,
            None => self.documents.push((id.to_string(), source)),
        }
    }

    fn field<'a>(&self, source: &'a Map<String, Value>, field: &str) -> Option<&'a Value> {
        let field = self.aliases.get(field).map(String::as_str).unwrap_or(field);
        source.get(field)
    }

    fn matching(&self, query: Option<&Value>) -> MediaflowResult<Vec<usize>> {
        let mut hits = Vec::new();
        for (pos, (id, source)) in self.documents.iter().enumerate() {
            let matched = match query {
                Some(query) => self.matches(query, id, source)?,
                None => true,
            };
            if matched {
                hits.push(pos);
            }
        }
        Ok(hits)
    }

    fn matches(&self, query: &Value, id: &str, source: &Map<String, Value>) -> MediaflowResult<bool> {
        let Some((kind, clause)) = query.as_object().and_then(|q| q.iter().next()) else {
            return Ok(true);
        };

        let field_clause = || {
            clause
                .as_object()
                .and_then(|c| c.iter().next())
                .ok_or_else(|| MediaflowError::document_store(format!("无效的查询子句: {query}")))
        };

        match kind.as_str() {
            "match_all" => Ok(true),
            "term" => {
                let (field, expected) = field_clause()?;
                let expected = expected.get("value").unwrap_or(expected);
                Ok(self
                    .field(source, field)
                    .map(|actual| value_matches(actual, expected))
                    .unwrap_or(false))
            }
            "terms" => {
                let (field, expected) = field_clause()?;
                let candidates = expected.as_array().cloned().unwrap_or_default();
                Ok(self
                    .field(source, field)
                    .map(|actual| candidates.iter().any(|c| value_matches(actual, c)))
                    .unwrap_or(false))
            }
            "prefix" => {
                let (field, expected) = field_clause()?;
                let expected = expected.get("value").unwrap_or(expected);
                Ok(match (self.field(source, field), expected.as_str()) {
                    (Some(Value::String(actual)), Some(prefix)) => actual.starts_with(prefix),
                    _ => false,
                })
            }
            "exists" => {
                let field = clause.get("field").and_then(Value::as_str).unwrap_or_default();
                Ok(self.field(source, field).map(|v| !v.is_null()).unwrap_or(false))
            }
            "ids" => Ok(clause
                .get("values")
                .and_then(Value::as_array)
                .map(|values| values.iter().any(|v| v.as_str() == Some(id)))
                .unwrap_or(false)),
            "bool" => {
                let clauses = |key: &str| -> Vec<Value> {
                    match clause.get(key) {
                        Some(Value::Array(items)) => items.clone(),
                        Some(item) => vec![item.clone()],
                        None => Vec::new(),
                    }
                };
                for required in clauses("must").iter().chain(clauses("filter").iter()) {
                    if !self.matches(required, id, source)? {
                        return Ok(false);
                    }
                }
                for excluded in clauses("must_not") {
                    if self.matches(&excluded, id, source)? {
                        return Ok(false);
                    }
                }
                let should = clauses("should");
                if should.is_empty() {
                    return Ok(true);
                }
                for optional in &should {
                    if self.matches(optional, id, source)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            other => Err(MediaflowError::document_store(format!(
                "内存文档存储不支持查询类型 {other}"
            ))),
        }
    }
}

fn value_matches(actual: &Value, expected: &Value) -> bool {
    match actual {
        Value::Array(items) => items.iter().any(|item| value_matches(item, expected)),
        Value::Number(a) => match expected {
            Value::Number(e) => a.as_f64() == e.as_f64(),
            Value::String(e) => e.parse::<f64>().ok() == a.as_f64(),
            _ => false,
        },
        _ => actual == expected,
    }
}

#[derive(Debug)]
struct ScrollContext {
    remaining: Vec<String>,
    page_size: usize,
    total: u64,
}

/// 内存文档存储
///
/// 支持 `term`/`terms`/`prefix`/`exists`/`ids`/`bool` 查询、别名字段、游标分页，以及
/// 索引器生成的按查询更新脚本。可以指定写入必然失败的文档ID。
#[derive(Debug, Default, Clone)]
pub struct InMemoryDocumentStore {
    indices: Arc<RwLock<HashMap<String, IndexState>>>,
    scrolls: Arc<RwLock<HashMap<String, ScrollContext>>>,
    rejected: Arc<RwLock<HashSet<String>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 之后写入这些ID的文档都会失败
    pub async fn reject_documents(&self, ids: &[&str]) {
        let mut rejected = self.rejected.write().await;
        rejected.extend(ids.iter().map(|id| id.to_string()));
    }

    pub async fn document_ids(&self, index: &str) -> Vec<String> {
        let indices = self.indices.read().await;
        indices
            .get(index)
            .map(|state| state.documents.iter().map(|(id, _)| id.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn mappings(&self, index: &str) -> Option<Map<String, Value>> {
        let indices = self.indices.read().await;
        indices.get(index).map(|state| state.mappings.clone())
    }

    pub async fn open_scrolls(&self) -> usize {
        self.scrolls.read().await.len()
    }

    async fn write_document(&self, index: &str, document: &Document) -> Result<(), String> {
        if self.rejected.read().await.contains(&document.id) {
            return Err("mapper_parsing_exception".to_string());
        }
        let mut indices = self.indices.write().await;
        let state = indices.entry(index.to_string()).or_default();
        if document.op == DocumentOp::Create && state.position(&document.id).is_some() {
            return Err("version_conflict_engine_exception".to_string());
        }
        state.upsert(&document.id, document.source.clone());
        Ok(())
    }

    async fn next_page(&self, scroll_id: &str) -> MediaflowResult<SearchPage> {
        let mut scrolls = self.scrolls.write().await;
        let context = scrolls
            .get_mut(scroll_id)
            .ok_or_else(|| MediaflowError::document_store(format!("游标 {scroll_id} 不存在")))?;
        let take = context.page_size.min(context.remaining.len());
        let ids: Vec<String> = context.remaining.drain(..take).collect();
        Ok(SearchPage {
            ids,
            total: context.total,
            scroll_id: Some(scroll_id.to_string()),
        })
    }
}

fn missing(index: &str) -> MediaflowError {
    MediaflowError::IndexNotFound(index.to_string())
}

fn query_of(body: &Value) -> Option<&Value> {
    body.get("query")
}

/// 解析索引器生成的 `ctx._source['field'] = params.pN;` 语句
fn apply_script(script: &Value, source: &mut Map<String, Value>) -> MediaflowResult<()> {
    let text = script.get("source").and_then(Value::as_str).unwrap_or_default();
    let params = script.get("params").and_then(Value::as_object);
    for statement in text.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        let parsed = statement
            .strip_prefix("ctx._source['")
            .and_then(|rest| rest.split_once("'] = params."));
        let Some((field, param)) = parsed else {
            return Err(MediaflowError::document_store(format!(
                "内存文档存储不支持脚本语句: {statement}"
            )));
        };
        let value = params
            .and_then(|p| p.get(param.trim()))
            .cloned()
            .unwrap_or(Value::Null);
        source.insert(field.to_string(), value);
    }
    Ok(())
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn index_exists(&self, index: &str) -> MediaflowResult<bool> {
        Ok(self.indices.read().await.contains_key(index))
    }

    async fn create_index(&self, index: &str, body: &Value) -> MediaflowResult<()> {
        let mut indices = self.indices.write().await;
        let state = indices.entry(index.to_string()).or_default();
        if let Some(properties) = body
            .pointer("/mappings/properties")
            .and_then(Value::as_object)
        {
            state.mappings.extend(properties.clone());
        }
        Ok(())
    }

    async fn delete_index(&self, index: &str) -> MediaflowResult<()> {
        self.indices
            .write()
            .await
            .remove(index)
            .map(|_| ())
            .ok_or_else(|| missing(index))
    }

    async fn put_mapping(&self, index: &str, properties: &Value) -> MediaflowResult<()> {
        let mut indices = self.indices.write().await;
        let state = indices.get_mut(index).ok_or_else(|| missing(index))?;
        for (field, mapping) in properties.as_object().into_iter().flatten() {
            if mapping.get("type").and_then(Value::as_str) == Some("alias") {
                if let Some(path) = mapping.get("path").and_then(Value::as_str) {
                    state.aliases.insert(field.clone(), path.to_string());
                }
            }
            state.mappings.insert(field.clone(), mapping.clone());
        }
        Ok(())
    }

    async fn index_document(&self, index: &str, document: &Document) -> MediaflowResult<()> {
        self.write_document(index, document)
            .await
            .map_err(MediaflowError::document_store)
    }

    async fn bulk_index(&self, index: &str, documents: &[Document]) -> MediaflowResult<BulkReport> {
        let mut report = BulkReport::default();
        for document in documents {
            match self.write_document(index, document).await {
                Ok(()) => report.succeeded += 1,
                Err(reason) => report.failures.push(BulkFailure {
                    id: document.id.clone(),
                    reason,
                }),
            }
        }
        Ok(report)
    }

    async fn get_document(&self, index: &str, id: &str) -> MediaflowResult<Option<Map<String, Value>>> {
        let indices = self.indices.read().await;
        let state = indices.get(index).ok_or_else(|| missing(index))?;
        Ok(state.position(id).map(|pos| state.documents[pos].1.clone()))
    }

    async fn delete_document(&self, index: &str, id: &str, _routing: &str) -> MediaflowResult<bool> {
        let mut indices = self.indices.write().await;
        let state = indices.get_mut(index).ok_or_else(|| missing(index))?;
        Ok(match state.position(id) {
            Some(pos) => {
                state.documents.remove(pos);
                true
            }
            None => false,
        })
    }

    async fn search(&self, index: &str, body: &Value, scroll: Option<&str>) -> MediaflowResult<SearchPage> {
        let ids: Vec<String> = {
            let indices = self.indices.read().await;
            let state = indices.get(index).ok_or_else(|| missing(index))?;
            state
                .matching(query_of(body))?
                .into_iter()
                .map(|pos| state.documents[pos].0.clone())
                .collect()
        };
        let total = ids.len() as u64;
        let page_size = body
            .get("size")
            .and_then(Value::as_u64)
            .map(|s| s as usize)
            .unwrap_or(DEFAULT_PAGE_SIZE);

        if scroll.is_none() {
            let from = body.get("from").and_then(Value::as_u64).unwrap_or(0) as usize;
            return Ok(SearchPage {
                ids: ids.into_iter().skip(from).take(page_size).collect(),
                total,
                scroll_id: None,
            });
        }

        let scroll_id = Uuid::new_v4().to_string();
        self.scrolls.write().await.insert(
            scroll_id.clone(),
            ScrollContext {
                remaining: ids,
                page_size: page_size.max(1),
                total,
            },
        );
        debug!("创建游标 {}，命中 {}", scroll_id, total);
        self.next_page(&scroll_id).await
    }

    async fn scroll(&self, scroll_id: &str, _keep_alive: &str) -> MediaflowResult<SearchPage> {
        self.next_page(scroll_id).await
    }

    async fn clear_scroll(&self, scroll_id: &str) -> MediaflowResult<()> {
        self.scrolls.write().await.remove(scroll_id);
        Ok(())
    }

    async fn count(&self, index: &str, query: &Value) -> MediaflowResult<u64> {
        let indices = self.indices.read().await;
        let state = indices.get(index).ok_or_else(|| missing(index))?;
        Ok(state.matching(query_of(query))?.len() as u64)
    }

    async fn delete_by_query(&self, index: &str, query: &Value) -> MediaflowResult<u64> {
        let mut indices = self.indices.write().await;
        let state = indices.get_mut(index).ok_or_else(|| missing(index))?;
        let hits: HashSet<usize> = state.matching(query_of(query))?.into_iter().collect();
        let mut position = 0;
        state.documents.retain(|_| {
            let keep = !hits.contains(&position);
            position += 1;
            keep
        });
        Ok(hits.len() as u64)
    }

    async fn update_by_query(&self, index: &str, body: &Value) -> MediaflowResult<u64> {
        let mut indices = self.indices.write().await;
        let state = indices.get_mut(index).ok_or_else(|| missing(index))?;
        let hits = state.matching(query_of(body))?;
        let script = body.get("script").cloned().unwrap_or(Value::Null);
        for pos in &hits {
            apply_script(&script, &mut state.documents[*pos].1)?;
        }
        Ok(hits.len() as u64)
    }

    async fn refresh(&self, index: &str) -> MediaflowResult<()> {
        if self.indices.read().await.contains_key(index) {
            Ok(())
        } else {
            Err(missing(index))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn document(id: &str, source: Value) -> Document {
        Document {
            id: id.to_string(),
            routing: "1".to_string(),
            op: DocumentOp::Index,
            source: source.as_object().cloned().unwrap_or_default(),
        }
    }

    #[tokio::test]
    async fn test_create_conflicts_in_bulk() {
        let store = InMemoryDocumentStore::new();
        store.create_index("idx", &json!({})).await.unwrap();
        store
            .index_document("idx", &document("box_1", json!({"_meta": 1})))
            .await
            .unwrap();

        let mut create = document("box_1", json!({"_meta": 2}));
        create.op = DocumentOp::Create;
        let report = store
            .bulk_index("idx", &[create, document("box_2", json!({"_meta": 1}))])
            .await
            .unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failures[0].id, "box_1");
    }

    #[tokio::test]
    async fn test_alias_term_query() {
        let store = InMemoryDocumentStore::new();
        store.create_index("idx", &json!({})).await.unwrap();
        store
            .put_mapping("idx", &json!({"species": {"type": "alias", "path": "u_keyword"}}))
            .await
            .unwrap();
        store
            .index_document("idx", &document("box_1", json!({"u_keyword": "cod"})))
            .await
            .unwrap();
        let page = store
            .search("idx", &json!({"query": {"term": {"species": "cod"}}}), None)
            .await
            .unwrap();
        assert_eq!(page.ids, vec!["box_1"]);
    }

    #[tokio::test]
    async fn test_missing_index() {
        let store = InMemoryDocumentStore::new();
        let err = store.delete_document("gone", "box_1", "1").await.unwrap_err();
        assert!(matches!(err, MediaflowError::IndexNotFound(_)));
    }
}
