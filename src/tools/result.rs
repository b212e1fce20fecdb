//! 工具调用结果
//!
//! 结果值与结果类型合为一个枚举：String 必有文本、Agent 必有 Agent、None 必无值，
//! 类型与值不一致的 ToolResult 无法被构造出来。

use serde::Serialize;

use crate::agent::Agent;

/// 结果类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolResultKind {
    String,
    Agent,
    None,
}

/// 结果值
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ToolResultValue {
    /// 文本结果
    String(String),
    /// 委派目标 Agent（handoff）
    Agent(Agent),
    /// 无返回值
    None,
}

impl ToolResultValue {
    pub fn kind(&self) -> ToolResultKind {
        match self {
            ToolResultValue::String(_) => ToolResultKind::String,
            ToolResultValue::Agent(_) => ToolResultKind::Agent,
            ToolResultValue::None => ToolResultKind::None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ToolResultValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_agent(&self) -> Option<&Agent> {
        match self {
            ToolResultValue::Agent(a) => Some(a),
            _ => None,
        }
    }
}

/// 一次工具调用的结果
#[derive(Debug, Clone, Serialize)]
pub struct ToolResult {
    /// 对应的 tool_call id
    pub call_id: String,
    /// 工具名
    pub name: String,
    /// 工具文档（描述）
    pub description: String,
    pub value: ToolResultValue,
    /// true 表示工具成功执行
    pub success: bool,
}

impl ToolResult {
    pub fn new(
        call_id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        value: ToolResultValue,
        success: bool,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            description: description.into(),
            value,
            success,
        }
    }

    /// 失败结果：值为格式化后的诊断文本
    pub fn failure(
        call_id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        diagnostic: impl Into<String>,
    ) -> Self {
        Self::new(
            call_id,
            name,
            description,
            ToolResultValue::String(diagnostic.into()),
            false,
        )
    }

    pub fn kind(&self) -> ToolResultKind {
        self.value.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_follows_value() {
        let ok = ToolResult::new("c1", "echo", "", ToolResultValue::String("hi".into()), true);
        assert_eq!(ok.kind(), ToolResultKind::String);
        assert_eq!(ok.value.as_text(), Some("hi"));

        let none = ToolResult::new("c2", "noop", "", ToolResultValue::None, true);
        assert_eq!(none.kind(), ToolResultKind::None);
        assert!(none.value.as_text().is_none());
    }

    #[test]
    fn test_failure_is_textual() {
        let r = ToolResult::failure("c1", "missing", "Tool 'missing' is not found", "Tool Call Error");
        assert!(!r.success);
        assert_eq!(r.kind(), ToolResultKind::String);
    }

    #[test]
    fn test_serialize_agent_value_as_summary() {
        let agent = Agent::builder("weather_expert")
            .persona("天气专家")
            .build()
            .unwrap();
        let r = ToolResult::new("c1", "weather_expert", "", ToolResultValue::Agent(agent), true);
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["value"]["type"], "agent");
        assert_eq!(v["value"]["value"]["name"], "weather_expert");
    }
}
