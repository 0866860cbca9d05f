use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use mediaflow_core::MediaflowResult;
use mediaflow_domain::Cache;

/// 内存缓存，记录每次失效请求；失效删除键本身及 `{key}_` 开头的键
#[derive(Debug, Default, Clone)]
pub struct InMemoryCache {
    entries: Arc<RwLock<HashMap<String, String>>>,
    invalidated: Arc<RwLock<Vec<String>>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, key: &str, value: &str) {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        self.entries.read().await.get(key).cloned()
    }

    /// 按调用顺序返回收到的失效键
    pub async fn invalidated(&self) -> Vec<String> {
        self.invalidated.read().await.clone()
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn invalidate(&self, key: &str) -> MediaflowResult<()> {
        let suffixed = format!("{key}_");
        self.entries
            .write()
            .await
            .retain(|existing, _| existing != key && !existing.starts_with(&suffixed));
        self.invalidated.write().await.push(key.to_string());
        Ok(())
    }
}
