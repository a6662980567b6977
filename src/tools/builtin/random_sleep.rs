//! Randomized politeness delay between page fetches

use crate::tools::{Tool, ToolDescription, ToolError};
use async_trait::async_trait;
use rand::Rng;
use serde_json::{json, Value};
use std::time::Duration;

const DEFAULT_MIN_SECONDS: f64 = 1.0;
const DEFAULT_MAX_SECONDS: f64 = 5.0;

/// Sleeps a uniformly random duration and reports how long it waited
#[derive(Debug, Default)]
pub struct RandomSleepTool;

impl RandomSleepTool {
    pub fn new() -> Self {
        Self
    }

    /// Pick the delay, or `None` when either bound is negative (pure function)
    fn pick_delay<R: Rng>(min_seconds: f64, max_seconds: f64, rng: &mut R) -> Option<f64> {
        if min_seconds < 0.0 || max_seconds < 0.0 {
            return None;
        }
        let (low, high) = if min_seconds <= max_seconds {
            (min_seconds, max_seconds)
        } else {
            (max_seconds, min_seconds)
        };
        if low == high {
            return Some(low);
        }
        Some(rng.gen_range(low..=high))
    }

    fn format_waited(seconds: f64) -> String {
        format!("Waited {seconds:.2} seconds")
    }

    /// Wait between `min_seconds` and `max_seconds`
    pub async fn sleep(min_seconds: f64, max_seconds: f64) -> String {
        let Some(delay) = Self::pick_delay(min_seconds, max_seconds, &mut rand::thread_rng())
        else {
            return "Invalid time range".to_string();
        };
        if delay > 0.0 {
            tokio::time::sleep(Duration::from_secs_f64(delay)).await;
        }
        Self::format_waited(delay)
    }
}

#[async_trait]
impl Tool for RandomSleepTool {
    fn describe(&self) -> ToolDescription {
        ToolDescription {
            name: "random_sleep".to_string(),
            description: "Wait a random number of seconds between min_seconds and max_seconds \
                          to simulate human browsing between page fetches."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "min_seconds": {
                        "type": "number",
                        "maximum": 60,
                        "default": DEFAULT_MIN_SECONDS
                    },
                    "max_seconds": {
                        "type": "number",
                        "maximum": 60,
                        "default": DEFAULT_MAX_SECONDS
                    }
                },
                "additionalProperties": false
            }),
        }
    }

    async fn initialize(&mut self, _config: Option<&Value>) -> Result<(), ToolError> {
        Ok(())
    }

    async fn execute(&self, parameters: &Value) -> Result<Value, ToolError> {
        let min_seconds = parameters
            .get("min_seconds")
            .and_then(Value::as_f64)
            .unwrap_or(DEFAULT_MIN_SECONDS);
        let max_seconds = parameters
            .get("max_seconds")
            .and_then(Value::as_f64)
            .unwrap_or(DEFAULT_MAX_SECONDS);

        Ok(Value::String(Self::sleep(min_seconds, max_seconds).await))
    }
}
