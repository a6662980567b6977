//! LLM provider abstraction layer
//!
//! Provider-agnostic completion interface plus the OpenAI implementation
//! used by every pipeline stage.

pub mod provider;
pub mod providers;

pub use provider::*;
pub use providers::*;
