//! 流式合并协议
//!
//! 后端以片段（delta）形式逐步返回回复；Choice::merge_delta 把片段按到达顺序拼接成一个完整回复。
//! 工具调用按流中的 index 归组，id / type / name / arguments 各自独立拼接，
//! 因为后端可能把一个函数名或一段 JSON 参数拆到多个片段里。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::message::{FunctionCall, ToolCall};
use crate::core::Role;

/// 思考段的起止标记
pub const THINK_START: &str = "<think>";
pub const THINK_END: &str = "</think>";
/// 含结束标记且长度小于该值的行才会把解析切回正文模式
const THINK_END_MAX_LINE: usize = 10;

/// 工具调用片段中的函数部分
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

/// 工具调用片段，按 index 归组
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub function: Option<FunctionDelta>,
}

impl ToolCallDelta {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            ..Default::default()
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.function.get_or_insert_with(FunctionDelta::default).name = Some(name.into());
        self
    }

    pub fn arguments(mut self, arguments: impl Into<String>) -> Self {
        self.function.get_or_insert_with(FunctionDelta::default).arguments = Some(arguments.into());
        self
    }
}

/// 后端返回的单个片段；字段缺省即视为无增量
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChoiceDelta {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub refusal: Option<String>,
    /// 推理文本；兼容 reasoning_content 字段名
    #[serde(default, alias = "reasoning_content")]
    pub thinking: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

impl ChoiceDelta {
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn tool_call(call: ToolCallDelta) -> Self {
        Self {
            tool_calls: Some(vec![call]),
            ..Default::default()
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }
}

/// 一轮对话合并后的 Agent 回复（只读）
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Choice {
    pub role: Option<Role>,
    pub content: String,
    pub thinking: String,
    pub refusal: String,
    /// 流 index -> 工具调用，按 index 有序
    pub tool_calls: BTreeMap<u32, ToolCall>,
}

fn push_opt(target: &mut String, delta: &Option<String>) {
    if let Some(s) = delta {
        target.push_str(s);
    }
}

impl Choice {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从一组片段一次性合并
    pub fn from_deltas<'a>(deltas: impl IntoIterator<Item = &'a ChoiceDelta>) -> Self {
        let mut choice = Self::new();
        for delta in deltas {
            choice.merge_delta(delta);
        }
        choice
    }

    /// 合并一个片段：角色只取第一个有效值；文本按到达顺序追加；缺省字段不改变已有内容
    pub fn merge_delta(&mut self, delta: &ChoiceDelta) {
        if self.role.is_none() {
            if let Some(role) = delta.role.as_deref().and_then(Role::parse) {
                self.role = Some(role);
            }
        }
        push_opt(&mut self.content, &delta.content);
        push_opt(&mut self.refusal, &delta.refusal);
        push_opt(&mut self.thinking, &delta.thinking);

        let Some(calls) = &delta.tool_calls else {
            return;
        };
        for call in calls {
            let entry = self.tool_calls.entry(call.index).or_insert_with(|| ToolCall {
                index: call.index,
                id: String::new(),
                kind: String::new(),
                function: FunctionCall::default(),
            });
            push_opt(&mut entry.id, &call.id);
            push_opt(&mut entry.kind, &call.kind);
            if let Some(func) = &call.function {
                push_opt(&mut entry.function.name, &func.name);
                push_opt(&mut entry.function.arguments, &func.arguments);
            }
        }
    }

    /// 按 <think>...</think> 标记逐行拆分思考段与正文。
    /// 只有同时出现起止标记时才拆分；流中单独下发的推理文本保留在前面。
    pub fn split_thinking_from_content(&mut self) {
        if !(self.content.contains(THINK_START) && self.content.contains(THINK_END)) {
            return;
        }
        let mut in_content = false;
        let mut thinking: Vec<&str> = Vec::new();
        let mut content: Vec<&str> = Vec::new();
        for line in self.content.split('\n') {
            let line = line.trim();
            if in_content {
                content.push(line);
            } else {
                thinking.push(line);
            }
            if line.contains(THINK_END) && line.len() < THINK_END_MAX_LINE {
                in_content = true;
            }
        }

        let inline = thinking
            .join("\n")
            .replace(THINK_START, "")
            .replace(THINK_END, "")
            .trim()
            .to_string();
        let content = content.join("\n");

        if !inline.is_empty() {
            if !self.thinking.is_empty() {
                self.thinking.push('\n');
            }
            self.thinking.push_str(&inline);
        }
        self.content = content;
    }

    /// 按 index 顺序返回工具调用
    pub fn ordered_tool_calls(&self) -> Vec<ToolCall> {
        self.tool_calls.values().cloned().collect()
    }

    /// 没有正文、没有思考、没有工具调用：本轮无可执行内容
    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.thinking.is_empty() && self.tool_calls.is_empty()
    }
}
