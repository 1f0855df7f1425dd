//! # Broadcaster Testing Utils
//!
//! Shared testing utilities for the alert broadcaster workspace.
//!
//! - **Mock Repositories**: in-memory implementations of the registry traits,
//!   with switches for injecting datastore failures
//! - **Mock Platform**: a chat platform double that records every call
//! - **Recording Operator Log**: captures operator entries for assertions
//! - **Test Data Builders**: registrations with sensible defaults
//!
//! ```toml
//! [dev-dependencies]
//! broadcaster-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod mocks;

pub use builders::*;
pub use mocks::*;
