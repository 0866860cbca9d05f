pub mod app_config;
pub mod database;
pub mod execution;
pub mod observability;
pub mod search;
pub mod storage;

pub use app_config::AppConfig;
pub use database::DatabaseConfig;
pub use execution::{ExecutionConfig, RemoteClusterConfig};
pub use observability::ObservabilityConfig;
pub use search::SearchConfig;
pub use storage::{CacheConfig, UploadsConfig};
