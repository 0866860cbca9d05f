pub mod document;
pub mod hooks;
pub mod indexer;
pub mod mapping;
pub mod projection;
pub mod query;
pub mod rebuild;
pub mod schema_registry;

pub use document::{build_document, read_attribute};
pub use hooks::{CacheInvalidationHook, HookedEntityRepository, IndexHook, PostWriteHooks};
pub use indexer::DocumentIndexer;
pub use query::{drop_dupes, IdCollector, ID_BITS, MAX_DUPLICATES};
pub use rebuild::{IndexRebuilder, RebuildSection, RebuildSummary};
pub use schema_registry::{is_mutation_allowed, SchemaRegistry};
