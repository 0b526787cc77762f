//! Shared test utilities for assetscout integration tests.
//!
//! This module provides:
//! - `TestHarness` wiring an engine to a scripted task body
//! - Builders for entries, credentials, scripted tasks and config JSON

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
