pub mod in_memory;
pub mod postgres;

pub use in_memory::{InMemoryEntityRepository, InMemoryEntityTypeRepository, InMemoryProjectRepository};
pub use postgres::{
    connect, ensure_schema, PostgresEntityRepository, PostgresEntityTypeRepository,
    PostgresProjectRepository,
};
