pub mod argo;
pub mod in_memory;

pub use argo::ArgoWorkflowClient;
pub use in_memory::InMemoryExecutionBackend;
