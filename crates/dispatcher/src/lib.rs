//! 工作流编排
//!
//! 模板目录、参数绑定、DAG 组装与校验、动态展开、退出处理器求值，以及作业生命周期管理。

pub mod assembler;
pub mod controller;
pub mod dependency_checker;
pub mod exit_handler;
pub mod fanout;
pub mod parameters;
pub mod request;
pub mod service;
pub mod sizing;
pub mod templates;

pub use assembler::*;
pub use controller::*;
pub use dependency_checker::DependencyChecker;
pub use exit_handler::WorkflowStatus;
pub use parameters::ParameterBinder;
pub use request::*;
pub use service::*;
pub use templates::TemplateLibrary;
