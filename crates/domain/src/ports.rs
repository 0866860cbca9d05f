//! 外部协作方接口：文档存储、执行后端、缓存、写后钩子

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use mediaflow_core::MediaflowResult;

use crate::entities::Entity;
use crate::job::{JobDescriptor, JobHandle, JobPatch, LabelSelector};
use crate::workflow::WorkflowManifest;

/// 批量写入时的操作类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentOp {
    /// 存在则覆盖
    #[default]
    Index,
    /// 已存在时该文档失败
    Create,
}

impl DocumentOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentOp::Index => "index",
            DocumentOp::Create => "create",
        }
    }
}

/// 写入文档存储的一个文档
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub routing: String,
    #[serde(default)]
    pub op: DocumentOp,
    pub source: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkFailure {
    pub id: String,
    pub reason: String,
}

/// 批量写入结果，单个文档失败不影响整批
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkReport {
    pub succeeded: usize,
    pub failures: Vec<BulkFailure>,
}

impl BulkReport {
    pub fn merge(&mut self, other: BulkReport) {
        self.succeeded += other.succeeded;
        self.failures.extend(other.failures);
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// 一页查询结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchPage {
    pub ids: Vec<String>,
    pub total: u64,
    pub scroll_id: Option<String>,
}

/// 文档存储后端
///
/// 索引不存在时，按文档操作返回 `IndexNotFound`。
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn index_exists(&self, index: &str) -> MediaflowResult<bool>;
    async fn create_index(&self, index: &str, body: &Value) -> MediaflowResult<()>;
    async fn delete_index(&self, index: &str) -> MediaflowResult<()>;
    async fn put_mapping(&self, index: &str, properties: &Value) -> MediaflowResult<()>;
    async fn index_document(&self, index: &str, document: &Document) -> MediaflowResult<()>;
    async fn bulk_index(&self, index: &str, documents: &[Document]) -> MediaflowResult<BulkReport>;
    async fn get_document(&self, index: &str, id: &str) -> MediaflowResult<Option<Map<String, Value>>>;
    /// 返回文档是否存在并被删除
    async fn delete_document(&self, index: &str, id: &str, routing: &str) -> MediaflowResult<bool>;
    /// `scroll` 为游标保留时长，为空时只取一页
    async fn search(
        &self,
        index: &str,
        query: &Value,
        scroll: Option<&str>,
    ) -> MediaflowResult<SearchPage>;
    async fn scroll(&self, scroll_id: &str, keep_alive: &str) -> MediaflowResult<SearchPage>;
    async fn clear_scroll(&self, scroll_id: &str) -> MediaflowResult<()>;
    async fn count(&self, index: &str, query: &Value) -> MediaflowResult<u64>;
    async fn delete_by_query(&self, index: &str, query: &Value) -> MediaflowResult<u64>;
    /// `body` 包含 `query` 与 `script`
    async fn update_by_query(&self, index: &str, body: &Value) -> MediaflowResult<u64>;
    async fn refresh(&self, index: &str) -> MediaflowResult<()>;
}

/// 集群工作流执行后端
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    async fn create_job(&self, manifest: &WorkflowManifest) -> MediaflowResult<JobHandle>;
    async fn list_jobs(&self, selector: &LabelSelector) -> MediaflowResult<Vec<JobDescriptor>>;
    /// 返回后端是否确认了控制请求
    async fn patch_job(&self, name: &str, patch: &JobPatch) -> MediaflowResult<bool>;
}

#[async_trait]
pub trait Cache: Send + Sync {
    async fn invalidate(&self, key: &str) -> MediaflowResult<()>;
}

/// 持久化层在写入成功后、删除之前调用的钩子
#[async_trait]
pub trait PostWriteHook: Send + Sync {
    fn name(&self) -> &'static str;
    async fn after_save(&self, entity: &Entity) -> MediaflowResult<()>;
    async fn before_delete(&self, entity: &Entity) -> MediaflowResult<()>;
}
