//! Bike Weight Finder
//!
//! Finds the published weight of a specific bicycle model with a four-stage
//! LLM research pipeline.
//!
//! # Overview
//!
//! - Broad web search for candidate pages
//! - URL selection with source-priority rules
//! - Scraping strategy analysis (robots.txt, meta robots, tech profile)
//! - Evidence-backed extraction, coordinated over a bounded worker loop
//!
//! Each stage is an LLM agent with a system prompt, a tool budget and a
//! fixed-cardinality JSON Schema for its output.
//!
//! # Quick Start
//!
//! ```rust
//! use bikeweight::schemas::{ExtractionStatus, ScraperRow};
//!
//! let row = ScraperRow {
//!     url: "https://example.com/track-00".to_string(),
//!     weight_value: "7.8 kg".to_string(),
//!     evidence_snippet: "Weight: 7.8 kg (size M)".to_string(),
//!     status: ExtractionStatus::Ok,
//!     notes: None,
//! };
//!
//! assert!(row.validate().is_ok());
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod llm;
pub mod observability;
pub mod pipeline;
pub mod prompts;
pub mod report;
pub mod robots;
pub mod schemas;
pub mod testing;
pub mod tools;

pub use config::*;
pub use error::{FinderError, FinderResult};
pub use pipeline::BikeWeightWorkflow;
pub use schemas::*;
pub use tools::{Tool, ToolDescription, ToolError, ToolSystem};
