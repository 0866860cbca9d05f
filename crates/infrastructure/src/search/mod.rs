pub mod elasticsearch;
pub mod in_memory;

pub use elasticsearch::ElasticsearchStore;
pub use in_memory::InMemoryDocumentStore;
