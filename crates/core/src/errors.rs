use thiserror::Error;

/// 媒体工作流与索引系统错误类型定义
#[derive(Debug, Error)]
pub enum MediaflowError {
    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("{kind}未找到: {name}")]
    NotFound { kind: String, name: String },

    #[error("属性 {attribute} 不允许从 {from} 变更为 {to}")]
    InvalidMutation {
        attribute: String,
        from: String,
        to: String,
    },

    #[error("执行后端不可用: {0}")]
    BackendUnavailable(String),

    #[error("执行后端拒绝请求: {0}")]
    BackendRejected(String),

    #[error("索引不存在: {0}")]
    IndexNotFound(String),

    #[error("文档存储错误: {0}")]
    DocumentStore(String),

    #[error("检测到循环依赖: {0}")]
    CircularDependency(String),

    #[error("并发修改冲突: {0}")]
    Conflict(String),

    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("缓存错误: {0}")]
    Cache(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl MediaflowError {
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found<K: Into<String>, N: Into<String>>(kind: K, name: N) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn invalid_mutation(attribute: &str, from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidMutation {
            attribute: attribute.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn document_store<S: Into<String>>(msg: S) -> Self {
        Self::DocumentStore(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// 调用方整体重试后可能成功的错误
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable(_) | Self::Conflict(_) | Self::DocumentStore(_)
        )
    }

    /// 调用方输入导致的错误，对应4xx语义
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::NotFound { .. }
                | Self::InvalidMutation { .. }
                | Self::CircularDependency(_)
        )
    }
}

impl From<serde_json::Error> for MediaflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// 统一的Result类型
pub type MediaflowResult<T> = std::result::Result<T, MediaflowError>;
