//! 对话消息
//!
//! 与 OpenAI 兼容 API 的消息格式一致：system / user / assistant / tool 四种角色，
//! assistant 消息可携带 tool_calls，tool 消息通过 tool_call_id 关联到对应调用。

use serde::{Deserialize, Serialize};

/// 消息角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }

    /// 解析流式片段中的角色字符串；未知角色返回 None
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "tool" => Some(Role::Tool),
            _ => None,
        }
    }
}

/// 工具调用中的函数描述：名称与 JSON 编码的参数串
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

/// 一次工具调用请求（由流式片段按 index 合并而来）
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// 流中的位置索引；只用于合并，不进入请求报文
    #[serde(default, skip_serializing)]
    pub index: u32,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionCall,
}

impl ToolCall {
    pub fn new(index: u32, id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            index,
            id: id.into(),
            kind: "function".to_string(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    /// 请求报文要求 type 非空，部分后端的流里不带该字段
    pub fn to_wire(&self) -> Self {
        let mut call = self.clone();
        if call.kind.is_empty() {
            call.kind = "function".to_string();
        }
        call
    }
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    /// assistant 消息，列出本轮发起的工具调用（tool 消息必须紧随其后）
    pub fn assistant_with_tool_calls(calls: &[ToolCall]) -> Self {
        let mut msg = Self::with_role(Role::Assistant, "");
        msg.tool_calls = Some(calls.iter().map(ToolCall::to_wire).collect());
        msg
    }

    /// 工具返回消息
    pub fn tool(call_id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::with_role(Role::Tool, content);
        msg.name = Some(name.into());
        msg.tool_call_id = Some(call_id.into());
        msg
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}
