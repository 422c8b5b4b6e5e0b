//! `stats`: descriptive statistics over a list of numbers.

use async_trait::async_trait;
use coact_core::error::ToolError;
use coact_core::tool::{Tool, ToolResult};
use serde::{Deserialize, Serialize};

pub struct StatsTool;

#[derive(Debug, Deserialize)]
struct StatsArgs {
    values: Vec<f64>,
}

/// Mean, median, and sample standard deviation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Summary {
    pub mean: f64,
    pub median: f64,
    /// Sample (n - 1) standard deviation; 0 for a single value.
    pub stdev: f64,
}

/// Summarize `values`. Returns `None` for an empty slice.
pub fn summarize(values: &[f64]) -> Option<Summary> {
    if values.is_empty() {
        return None;
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    let median = if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    };

    let stdev = if values.len() < 2 {
        0.0
    } else {
        let sum_sq: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
        (sum_sq / (n - 1.0)).sqrt()
    };

    Some(Summary {
        mean,
        median,
        stdev,
    })
}

#[async_trait]
impl Tool for StatsTool {
    fn name(&self) -> &str {
        "stats"
    }

    fn description(&self) -> &str {
        "Calculate mean, median and sample standard deviation. \
         Example: stats(values=[1.0, 2.0, 3.0])"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "values": {
                    "type": "array",
                    "items": { "type": "number" },
                    "description": "The numbers to summarize"
                }
            },
            "required": ["values"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let args: StatsArgs = serde_json::from_value(arguments)
            .map_err(|e| ToolError::InvalidArguments(format!("stats: {e}")))?;

        let summary = summarize(&args.values)
            .ok_or_else(|| ToolError::InvalidArguments("stats: empty list".into()))?;

        Ok(ToolResult {
            call_id: String::new(),
            success: true,
            output: format!(
                "mean={:.2}, median={:.2}, stdev={:.2}",
                summary.mean, summary.median, summary.stdev
            ),
            data: serde_json::to_value(summary).ok(),
        })
    }
}
