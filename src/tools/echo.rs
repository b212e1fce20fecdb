//! Echo 工具（测试与离线演示用）

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::registry::{Tool, ToolOutput};
use crate::tools::schema::{parameters_schema, ParamType, ToolParameter};

/// Echo 工具：原样返回 text 参数
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo text back unchanged (for testing)."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema(&[ToolParameter::required("text", ParamType::String).describe("text to echo")])
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, String> {
        args.get("text")
            .and_then(|v| v.as_str())
            .map(ToolOutput::from)
            .ok_or_else(|| "missing required argument 'text'".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo() {
        let out = EchoTool.execute(serde_json::json!({"text": "hi"})).await.unwrap();
        assert!(matches!(out, ToolOutput::Text(ref s) if s == "hi"));
        assert!(EchoTool.execute(serde_json::json!({})).await.is_err());
        assert_eq!(EchoTool.descriptor().parameters["required"][0], "text");
    }
}
