//! Stage agents: the tool-calling conversation loop and structured replies

pub mod stage_agent;
pub mod structured;

pub use stage_agent::{AgentRun, StageAgent};
pub use structured::{extract_json, parse_stage_output};
