use std::sync::Arc;

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::{debug, error, info};

use mediaflow_core::{CacheConfig, MediaflowError, MediaflowResult};
use mediaflow_domain::Cache;

/// Redis 列表缓存
///
/// 失效时删除 `{key_prefix}:{key}` 本身以及所有 `{key_prefix}:{key}_*` 形式的键，
/// 后者是带分页或过滤后缀的缓存项。
pub struct RedisCache {
    client: Arc<redis::Client>,
    key_prefix: String,
}

impl RedisCache {
    pub async fn new(config: &CacheConfig) -> MediaflowResult<Self> {
        info!("连接 Redis 缓存: {}", config.redis_url);

        let client = redis::Client::open(config.redis_url.clone())
            .map_err(|e| MediaflowError::Cache(e.to_string()))?;

        let mut conn = client
            .get_connection_manager()
            .await
            .map_err(|e| MediaflowError::Cache(e.to_string()))?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| MediaflowError::Cache(e.to_string()))?;

        Ok(Self {
            client: Arc::new(client),
            key_prefix: config.key_prefix.clone(),
        })
    }

    async fn get_connection(&self) -> MediaflowResult<redis::aio::ConnectionManager> {
        self.client
            .get_connection_manager()
            .await
            .map_err(|e| MediaflowError::Cache(e.to_string()))
    }

    fn build_key(&self, key: &str) -> String {
        if self.key_prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}:{}", self.key_prefix, key)
        }
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn invalidate(&self, key: &str) -> MediaflowResult<()> {
        let full_key = self.build_key(key);
        let pattern = format!("{full_key}_*");
        let mut conn = self.get_connection().await?;

        let mut keys: Vec<String> = vec![full_key];
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(500)
                .query_async(&mut conn)
                .await
                .map_err(|e| {
                    error!("扫描缓存键 {} 失败: {}", pattern, e);
                    MediaflowError::Cache(e.to_string())
                })?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        let removed: usize = conn
            .del(&keys)
            .await
            .map_err(|e| MediaflowError::Cache(e.to_string()))?;
        debug!("缓存 {} 失效，删除了 {} 个键", key, removed);
        Ok(())
    }
}
