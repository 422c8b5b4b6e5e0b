//! `compound`: compound growth of a base amount.

use async_trait::async_trait;
use coact_core::error::ToolError;
use coact_core::tool::{Tool, ToolResult};
use serde::Deserialize;

pub struct CompoundTool;

#[derive(Debug, Deserialize)]
struct CompoundArgs {
    base: f64,
    rate: f64,
    years: i32,
}

/// `base * (1 + rate)^years`.
pub fn compound(base: f64, rate: f64, years: i32) -> f64 {
    base * (1.0 + rate).powi(years)
}

#[async_trait]
impl Tool for CompoundTool {
    fn name(&self) -> &str {
        "compound"
    }

    fn description(&self) -> &str {
        "Calculate compound growth: base * (1 + rate)^years, rounded to two decimals. \
         Example: compound(base=100000, rate=0.05, years=4)"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "base": { "type": "number", "description": "Starting amount" },
                "rate": { "type": "number", "description": "Growth per period, e.g. 0.05 for 5%" },
                "years": { "type": "integer", "description": "Number of periods" }
            },
            "required": ["base", "rate", "years"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let args: CompoundArgs = serde_json::from_value(arguments)
            .map_err(|e| ToolError::InvalidArguments(format!("compound: {e}")))?;

        let value = compound(args.base, args.rate, args.years);
        if !value.is_finite() {
            return Err(ToolError::ExecutionFailed {
                tool_name: "compound".into(),
                reason: format!("result overflowed for {} years", args.years),
            });
        }

        Ok(ToolResult {
            call_id: String::new(),
            success: true,
            output: format!("{value:.2}"),
            data: Some(serde_json::json!({ "result": value })),
        })
    }
}
