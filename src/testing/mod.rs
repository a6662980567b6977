//! Testing utilities and mock implementations
//!
//! Lets the pipeline run end to end without a real LLM provider.

pub mod mocks;

pub use mocks::*;
