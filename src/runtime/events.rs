//! 会话过程事件：按发生顺序推送给调用方（可序列化为 JSON 供前端展示）

use serde::Serialize;

use crate::core::message::ToolCall;
use crate::runtime::choice::{Choice, ChoiceDelta};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuntimeEvent {
    /// 一次运行开始
    RuntimeStart,
    /// 进入某个 Agent 的第几轮，label 形如 "planner -- 2"
    Agent { name: String, turn: usize, label: String },
    /// 后端原始片段（仅流式模式）
    Delta { delta: ChoiceDelta },
    /// 本轮合并后的回复
    Choice { choice: Choice },
    /// 本轮请求的工具调用（可能为空）
    ToolsRecalled { calls: Vec<ToolCall> },
    /// 最终累计内容
    Content { text: String },
    /// 一次运行结束
    RuntimeEnd,
}

impl RuntimeEvent {
    pub fn agent_turn(name: &str, turn: usize) -> Self {
        RuntimeEvent::Agent {
            name: name.to_string(),
            turn,
            label: format!("{} -- {}", name, turn),
        }
    }
}
