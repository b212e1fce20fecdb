//! 脚本化 LLM 客户端（用于测试与离线演示，无需 API）
//!
//! 按顺序弹出预先排好的回复；队列耗尽后交给 responder 闭包，
//! 没有 responder 时回显最后一条 User 消息。每个请求都会被记录，便于断言上下文。

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures_util::stream;

use crate::core::message::Role;
use crate::core::AgentError;
use crate::llm::traits::{ChatRequest, DeltaStream, LlmClient};
use crate::runtime::choice::{Choice, ChoiceDelta, FunctionDelta, ToolCallDelta};

/// 流式回复时每个文本片段的字符数
const CHUNK_CHARS: usize = 4;

/// 一轮脚本
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// 正常回复，片段按序返回
    Reply(Vec<ChoiceDelta>),
    /// 建立请求即失败
    Fail(String),
    /// 先返回若干片段，再在流中失败
    FailMidStream(Vec<ChoiceDelta>, String),
}

impl ScriptStep {
    /// 纯文本回复；流式请求下会被切成多个片段
    pub fn text(text: impl Into<String>) -> Self {
        ScriptStep::Reply(vec![ChoiceDelta::content(text).with_role("assistant")])
    }

    /// 单个工具调用；函数名与参数各拆成两段，模拟后端的分片
    pub fn tool_call(id: impl Into<String>, name: &str, arguments: &str) -> Self {
        Self::tool_calls(vec![(id.into(), name.to_string(), arguments.to_string())])
    }

    /// 同一轮内的多个工具调用：(id, name, arguments)
    pub fn tool_calls(calls: Vec<(String, String, String)>) -> Self {
        let mut deltas = vec![ChoiceDelta::default().with_role("assistant")];
        for (index, (id, name, arguments)) in calls.into_iter().enumerate() {
            let index = index as u32;
            let (name_a, name_b) = split_half(&name);
            let (args_a, args_b) = split_half(&arguments);
            deltas.push(ChoiceDelta::tool_call(
                ToolCallDelta::new(index).id(id).name(name_a).arguments(args_a),
            ));
            deltas.push(ChoiceDelta::tool_call(ToolCallDelta::new(index).name(name_b).arguments(args_b)));
        }
        ScriptStep::Reply(deltas)
    }
}

fn split_half(s: &str) -> (String, String) {
    let mid = s.chars().count() / 2;
    (s.chars().take(mid).collect(), s.chars().skip(mid).collect())
}

type Responder = dyn Fn(&ChatRequest) -> ScriptStep + Send + Sync;

/// 脚本化客户端
#[derive(Default)]
pub struct ScriptedLlmClient {
    steps: Mutex<VecDeque<ScriptStep>>,
    responder: Option<Arc<Responder>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_steps(steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        let client = Self::new();
        client.push_all(steps);
        client
    }

    /// 队列耗尽后按请求内容生成回复
    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&ChatRequest) -> ScriptStep + Send + Sync + 'static,
    {
        self.responder = Some(Arc::new(responder));
        self
    }

    pub fn push(&self, step: ScriptStep) {
        self.steps.lock().unwrap_or_else(PoisonError::into_inner).push_back(step);
    }

    pub fn push_all(&self, steps: impl IntoIterator<Item = ScriptStep>) {
        self.steps.lock().unwrap_or_else(PoisonError::into_inner).extend(steps);
    }

    /// 已收到的全部请求
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn next_step(&self, request: &ChatRequest) -> ScriptStep {
        if let Some(step) = self.steps.lock().unwrap_or_else(PoisonError::into_inner).pop_front() {
            return step;
        }
        if let Some(responder) = &self.responder {
            return responder(request);
        }
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        ScriptStep::text(format!("Echo from Mock: {}", last_user))
    }
}

/// 流式请求下把长文本切成小片段
fn chunk_for_stream(deltas: Vec<ChoiceDelta>) -> Vec<ChoiceDelta> {
    let mut out = Vec::new();
    for delta in deltas {
        match &delta.content {
            Some(text) if text.chars().count() > CHUNK_CHARS && delta.tool_calls.is_none() => {
                let chars: Vec<char> = text.chars().collect();
                for (i, piece) in chars.chunks(CHUNK_CHARS).enumerate() {
                    let mut part = ChoiceDelta::content(piece.iter().collect::<String>());
                    if i == 0 {
                        part.role = delta.role.clone();
                        part.thinking = delta.thinking.clone();
                        part.refusal = delta.refusal.clone();
                    }
                    out.push(part);
                }
            }
            _ => out.push(delta),
        }
    }
    out
}

/// 非流式请求下合并为一个完整片段
fn collapse(deltas: &[ChoiceDelta]) -> ChoiceDelta {
    let choice = Choice::from_deltas(deltas);
    let non_empty = |s: String| if s.is_empty() { None } else { Some(s) };
    let tool_calls: Vec<ToolCallDelta> = choice
        .ordered_tool_calls()
        .into_iter()
        .map(|call| ToolCallDelta {
            index: call.index,
            id: Some(call.id),
            kind: Some(call.kind),
            function: Some(FunctionDelta {
                name: Some(call.function.name),
                arguments: Some(call.function.arguments),
            }),
        })
        .collect();
    ChoiceDelta {
        role: choice.role.map(|r| r.as_str().to_string()),
        content: non_empty(choice.content),
        refusal: non_empty(choice.refusal),
        thinking: non_empty(choice.thinking),
        tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn chat(&self, request: ChatRequest) -> Result<DeltaStream, AgentError> {
        let step = self.next_step(&request);
        let streaming = request.stream;
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).push(request);

        let (deltas, error) = match step {
            ScriptStep::Reply(deltas) => (deltas, None),
            ScriptStep::Fail(e) => return Err(AgentError::Backend(e)),
            ScriptStep::FailMidStream(deltas, e) => (deltas, Some(e)),
        };

        let mut items: Vec<Result<ChoiceDelta, AgentError>> = if streaming {
            chunk_for_stream(deltas).into_iter().map(Ok).collect()
        } else {
            vec![Ok(collapse(&deltas))]
        };
        if let Some(e) = error {
            items.push(Err(AgentError::Backend(e)));
        }
        Ok(Box::pin(stream::iter(items)))
    }
}
