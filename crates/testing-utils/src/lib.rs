//! # Mediaflow Testing Utils
//!
//! Shared testing utilities for the media ingest and search workspace.
//! This crate provides entity builders and scripted test doubles for the
//! execution backend and post-write hooks.
//!
//! ## Usage
//!
//! Add this crate as a dev-dependency:
//!
//! ```toml
//! [dev-dependencies]
//! mediaflow-testing-utils = { path = "../testing-utils" }
//! ```
//!
//! Then use the builders in your tests:
//!
//! ```rust
//! use mediaflow_testing_utils::builders::*;
//! ```

pub mod builders;
pub mod mocks;

// Re-export commonly used items
pub use builders::*;
pub use mocks::*;
