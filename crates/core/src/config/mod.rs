//! 配置管理
//!
//! 配置按以下顺序加载，后者覆盖前者：
//! 1. 各配置段的默认值
//! 2. TOML 配置文件
//! 3. 以 `MEDIAFLOW_` 为前缀的环境变量（嵌套键以 `__` 分隔）

pub mod models;

#[cfg(test)]
mod tests;

pub use models::{
    AppConfig, CacheConfig, DatabaseConfig, ExecutionConfig, ObservabilityConfig,
    RemoteClusterConfig, SearchConfig, UploadsConfig,
};
