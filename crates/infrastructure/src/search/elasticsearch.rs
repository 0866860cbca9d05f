use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde_json::{json, Map, Value};
use tracing::{debug, error, warn};

use mediaflow_core::{MediaflowError, MediaflowResult, SearchConfig};
use mediaflow_domain::{BulkFailure, BulkReport, Document, DocumentStore, SearchPage};

/// Elasticsearch 兼容的 REST 文档存储
///
/// 连接失败和超时按配置的次数以指数退避重试，其余错误直接返回。
pub struct ElasticsearchStore {
    client: Client,
    base_url: String,
    max_retries: u32,
}

impl ElasticsearchStore {
    pub fn new(config: &SearchConfig) -> MediaflowResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| MediaflowError::document_store(format!("创建HTTP客户端失败: {e}")))?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send<F>(&self, build: F) -> MediaflowResult<Response>
    where
        F: Fn() -> RequestBuilder + Send + Sync,
    {
        let mut delay = Duration::from_millis(100);
        let mut attempt = 0;
        loop {
            match build().send().await {
                Ok(response) => return Ok(response),
                Err(e) if (e.is_connect() || e.is_timeout()) && attempt < self.max_retries => {
                    attempt += 1;
                    warn!("文档存储请求失败，第 {} 次重试: {}", attempt, e);
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(Duration::from_secs(10));
                }
                Err(e) => {
                    error!("文档存储请求失败: {}", e);
                    return Err(MediaflowError::document_store(e.to_string()));
                }
            }
        }
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> MediaflowResult<Response> {
        let url = self.url(path);
        self.send(|| {
            let builder = self.client.request(method.clone(), &url);
            match body {
                Some(body) => builder.json(body),
                None => builder,
            }
        })
        .await
    }

    /// 非 2xx 响应转换为错误，索引不存在单独区分
    async fn json_body(index: &str, response: Response) -> MediaflowResult<Value> {
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .unwrap_or_else(|_| json!({}));
        if status.is_success() {
            return Ok(body);
        }
        Err(Self::error_for(index, status, &body))
    }

    fn error_for(index: &str, status: StatusCode, body: &Value) -> MediaflowError {
        let kind = body
            .pointer("/error/type")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if kind == "index_not_found_exception" {
            return MediaflowError::IndexNotFound(index.to_string());
        }
        MediaflowError::document_store(format!("{status}: {body}"))
    }

    fn page(body: &Value) -> SearchPage {
        let ids = body
            .pointer("/hits/hits")
            .and_then(Value::as_array)
            .map(|hits| {
                hits.iter()
                    .filter_map(|hit| hit.get("_id").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let total = body
            .pointer("/hits/total/value")
            .or_else(|| body.pointer("/hits/total"))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let scroll_id = body
            .get("_scroll_id")
            .and_then(Value::as_str)
            .map(str::to_string);
        SearchPage {
            ids,
            total,
            scroll_id,
        }
    }

    fn bulk_payload(documents: &[Document]) -> MediaflowResult<String> {
        let mut payload = String::new();
        for document in documents {
            let action = json!({
                (document.op.as_str()): {"_id": document.id, "routing": document.routing}
            });
            payload.push_str(&serde_json::to_string(&action)?);
            payload.push('\n');
            payload.push_str(&serde_json::to_string(&document.source)?);
            payload.push('\n');
        }
        Ok(payload)
    }
}

#[async_trait]
impl DocumentStore for ElasticsearchStore {
    async fn index_exists(&self, index: &str) -> MediaflowResult<bool> {
        let response = self.request(Method::HEAD, index, None).await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(MediaflowError::document_store(format!(
                "检查索引 {index} 失败: {status}"
            ))),
        }
    }

    async fn create_index(&self, index: &str, body: &Value) -> MediaflowResult<()> {
        let response = self.request(Method::PUT, index, Some(body)).await?;
        match Self::json_body(index, response).await {
            Ok(_) => Ok(()),
            Err(MediaflowError::DocumentStore(msg)) if msg.contains("resource_already_exists_exception") => {
                debug!("索引 {} 已存在", index);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn delete_index(&self, index: &str) -> MediaflowResult<()> {
        let response = self.request(Method::DELETE, index, None).await?;
        Self::json_body(index, response).await.map(|_| ())
    }

    async fn put_mapping(&self, index: &str, properties: &Value) -> MediaflowResult<()> {
        let body = json!({"properties": properties});
        let response = self
            .request(Method::PUT, &format!("{index}/_mapping"), Some(&body))
            .await?;
        Self::json_body(index, response).await.map(|_| ())
    }

    async fn index_document(&self, index: &str, document: &Document) -> MediaflowResult<()> {
        let endpoint = match document.op {
            mediaflow_domain::DocumentOp::Index => "_doc",
            mediaflow_domain::DocumentOp::Create => "_create",
        };
        let path = format!("{index}/{endpoint}/{}?routing={}", document.id, document.routing);
        let source = Value::Object(document.source.clone());
        let response = self.request(Method::PUT, &path, Some(&source)).await?;
        Self::json_body(index, response).await.map(|_| ())
    }

    async fn bulk_index(&self, index: &str, documents: &[Document]) -> MediaflowResult<BulkReport> {
        if documents.is_empty() {
            return Ok(BulkReport::default());
        }
        let payload = Self::bulk_payload(documents)?;
        let url = self.url(&format!("{index}/_bulk"));
        let response = self
            .send(|| {
                self.client
                    .post(&url)
                    .header("Content-Type", "application/x-ndjson")
                    .body(payload.clone())
            })
            .await?;
        let body = Self::json_body(index, response).await?;

        let mut report = BulkReport::default();
        for item in body.get("items").and_then(Value::as_array).into_iter().flatten() {
            let Some(result) = item.as_object().and_then(|o| o.values().next()) else {
                continue;
            };
            let id = result
                .get("_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            match result.get("error") {
                Some(error) => report.failures.push(BulkFailure {
                    id,
                    reason: error
                        .get("type")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| error.to_string()),
                }),
                None => report.succeeded += 1,
            }
        }
        Ok(report)
    }

    async fn get_document(&self, index: &str, id: &str) -> MediaflowResult<Option<Map<String, Value>>> {
        let response = self
            .request(Method::GET, &format!("{index}/_doc/{id}"), None)
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            let body: Value = response.json().await.unwrap_or_else(|_| json!({}));
            if body.get("found") == Some(&Value::Bool(false)) {
                return Ok(None);
            }
            return Err(Self::error_for(index, StatusCode::NOT_FOUND, &body));
        }
        let body = Self::json_body(index, response).await?;
        Ok(body.get("_source").and_then(Value::as_object).cloned())
    }

    async fn delete_document(&self, index: &str, id: &str, routing: &str) -> MediaflowResult<bool> {
        let response = self
            .request(
                Method::DELETE,
                &format!("{index}/_doc/{id}?routing={routing}"),
                None,
            )
            .await?;
        let status = response.status();
        let body: Value = response.json().await.unwrap_or_else(|_| json!({}));
        if status.is_success() {
            return Ok(true);
        }
        if status == StatusCode::NOT_FOUND
            && body.get("result").and_then(Value::as_str) == Some("not_found")
        {
            return Ok(false);
        }
        Err(Self::error_for(index, status, &body))
    }

    async fn search(&self, index: &str, body: &Value, scroll: Option<&str>) -> MediaflowResult<SearchPage> {
        let path = match scroll {
            Some(keep_alive) => format!("{index}/_search?scroll={keep_alive}"),
            None => format!("{index}/_search"),
        };
        let response = self.request(Method::POST, &path, Some(body)).await?;
        let body = Self::json_body(index, response).await?;
        Ok(Self::page(&body))
    }

    async fn scroll(&self, scroll_id: &str, keep_alive: &str) -> MediaflowResult<SearchPage> {
        let body = json!({"scroll": keep_alive, "scroll_id": scroll_id});
        let response = self
            .request(Method::POST, "_search/scroll", Some(&body))
            .await?;
        let body = Self::json_body("_search/scroll", response).await?;
        Ok(Self::page(&body))
    }

    async fn clear_scroll(&self, scroll_id: &str) -> MediaflowResult<()> {
        let body = json!({"scroll_id": scroll_id});
        let response = self
            .request(Method::DELETE, "_search/scroll", Some(&body))
            .await?;
        Self::json_body("_search/scroll", response).await.map(|_| ())
    }

    async fn count(&self, index: &str, query: &Value) -> MediaflowResult<u64> {
        let response = self
            .request(Method::POST, &format!("{index}/_count"), Some(query))
            .await?;
        let body = Self::json_body(index, response).await?;
        Ok(body.get("count").and_then(Value::as_u64).unwrap_or(0))
    }

    async fn delete_by_query(&self, index: &str, query: &Value) -> MediaflowResult<u64> {
        let response = self
            .request(
                Method::POST,
                &format!("{index}/_delete_by_query?conflicts=proceed"),
                Some(query),
            )
            .await?;
        let body = Self::json_body(index, response).await?;
        Ok(body.get("deleted").and_then(Value::as_u64).unwrap_or(0))
    }

    async fn update_by_query(&self, index: &str, body: &Value) -> MediaflowResult<u64> {
        let response = self
            .request(
                Method::POST,
                &format!("{index}/_update_by_query?conflicts=proceed"),
                Some(body),
            )
            .await?;
        let body = Self::json_body(index, response).await?;
        Ok(body.get("updated").and_then(Value::as_u64).unwrap_or(0))
    }

    async fn refresh(&self, index: &str) -> MediaflowResult<()> {
        let response = self
            .request(Method::POST, &format!("{index}/_refresh"), None)
            .await?;
        Self::json_body(index, response).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediaflow_domain::DocumentOp;

    #[test]
    fn test_bulk_payload_is_ndjson() {
        let documents = vec![Document {
            id: "image_3".to_string(),
            routing: "1".to_string(),
            op: DocumentOp::Create,
            source: json!({"_meta": 2}).as_object().cloned().unwrap(),
        }];
        let payload = ElasticsearchStore::bulk_payload(&documents).unwrap();
        let lines: Vec<&str> = payload.lines().collect();
        assert_eq!(lines.len(), 2);
        let action: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(action["create"]["_id"], "image_3");
        assert_eq!(action["create"]["routing"], "1");
    }

    #[test]
    fn test_page_parsing() {
        let body = json!({
            "_scroll_id": "abc",
            "hits": {"total": {"value": 2}, "hits": [{"_id": "box_1"}, {"_id": "box_2"}]}
        });
        let page = ElasticsearchStore::page(&body);
        assert_eq!(page.ids, vec!["box_1", "box_2"]);
        assert_eq!(page.total, 2);
        assert_eq!(page.scroll_id.as_deref(), Some("abc"));
    }

    #[test]
    fn test_index_not_found_is_distinguished() {
        let body = json!({"error": {"type": "index_not_found_exception"}});
        let err = ElasticsearchStore::error_for("project_1", StatusCode::NOT_FOUND, &body);
        assert!(matches!(err, MediaflowError::IndexNotFound(_)));
    }
}
