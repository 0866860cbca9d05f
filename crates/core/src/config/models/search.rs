use serde::{Deserialize, Serialize};

/// 搜索索引后端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub url: String,
    /// 索引名前缀，最终索引名为 `{prefix}project_{id}`
    pub index_prefix: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub bulk_chunk_size: usize,
    /// 单次请求可返回的最大结果数，超过时改用滚动游标
    pub max_result_window: usize,
    pub scroll_keep_alive: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9200".to_string(),
            index_prefix: String::new(),
            timeout_seconds: 60,
            max_retries: 10,
            bulk_chunk_size: 500,
            max_result_window: 10_000,
            scroll_keep_alive: "1m".to_string(),
        }
    }
}

impl SearchConfig {
    pub fn index_name(&self, project: i64) -> String {
        format!("{}project_{}", self.index_prefix, project)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.url.is_empty() {
            return Err(anyhow::anyhow!("搜索服务URL不能为空"));
        }

        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err(anyhow::anyhow!("搜索服务URL必须以http://或https://开头"));
        }

        if self.bulk_chunk_size == 0 {
            return Err(anyhow::anyhow!("批量索引大小必须大于0"));
        }

        if self.max_result_window == 0 {
            return Err(anyhow::anyhow!("单次查询结果上限必须大于0"));
        }

        if self.timeout_seconds == 0 {
            return Err(anyhow::anyhow!("请求超时时间必须大于0"));
        }

        Ok(())
    }
}
