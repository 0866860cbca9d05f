//! 列表缓存失效

pub mod in_memory;
pub mod redis_cache;

pub use in_memory::InMemoryCache;
pub use redis_cache::RedisCache;
