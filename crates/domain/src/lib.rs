pub mod attribute;
pub mod entities;
pub mod entity_type;
pub mod job;
pub mod leaf_path;
pub mod ports;
pub mod repositories;
pub mod workflow;

pub use attribute::*;
pub use entities::*;
pub use entity_type::*;
pub use job::*;
pub use ports::*;
pub use repositories::*;
pub use workflow::WorkflowManifest;
pub use mediaflow_core::{MediaflowError, MediaflowResult};
