use serde::{Deserialize, Serialize};

/// 缓存配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub redis_url: String,
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "mediaflow".to_string(),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.redis_url.is_empty() {
            return Err(anyhow::anyhow!("Redis URL不能为空"));
        }

        if !self.redis_url.starts_with("redis://") && !self.redis_url.starts_with("rediss://") {
            return Err(anyhow::anyhow!("Redis URL必须以redis://或rediss://开头"));
        }

        Ok(())
    }
}

/// 上传目录配置，用于清理过期的未引用上传文件
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadsConfig {
    pub upload_root: String,
    pub upload_shards: Vec<String>,
    pub max_age_days: u64,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            upload_root: "/uploads".to_string(),
            upload_shards: Vec::new(),
            max_age_days: 1,
        }
    }
}

impl UploadsConfig {
    /// 所有需要扫描的上传根目录
    pub fn roots(&self) -> Vec<String> {
        let mut roots = vec![self.upload_root.clone()];
        roots.extend(self.upload_shards.iter().cloned());
        roots
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.upload_root.is_empty() {
            return Err(anyhow::anyhow!("上传目录不能为空"));
        }

        if self.upload_shards.iter().any(|s| s.is_empty()) {
            return Err(anyhow::anyhow!("上传分片目录不能为空"));
        }

        Ok(())
    }
}
