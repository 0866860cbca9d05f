pub mod app;
pub mod maintenance;

pub use app::{Adapters, ApplicationContext, ArgoClusterConnector};
pub use maintenance::{purge_uploads, update_project_totals, PurgeReport};
