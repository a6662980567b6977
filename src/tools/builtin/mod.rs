//! Builtin tools for the stage agents
//!
//! Each tool type has its own module with pure functions separated from I/O.

pub mod crawl;
pub mod inspect_page;
pub mod page;
pub mod random_sleep;
pub mod scan_weight;
pub mod web_search;

pub use crawl::{CrawlScope, CrawlTool, FetchLog};
pub use inspect_page::InspectPageTool;
pub use random_sleep::RandomSleepTool;
pub use scan_weight::{PageCache, ScanWeightTool};
pub use web_search::WebSearchTool;
