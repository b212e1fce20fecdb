//! LLM 客户端抽象
//!
//! 后端（OpenAI 兼容 / Scripted）实现 LlmClient：chat 返回回复片段流。
//! 非流式请求同样以流的形式返回，只含一个完整片段。

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use crate::config::ChatConfig;
use crate::core::message::Message;
use crate::core::AgentError;
use crate::runtime::choice::ChoiceDelta;
use crate::tools::schema::ToolDescriptor;

/// 回复片段流；流中的 Err 表示后端在中途失败
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<ChoiceDelta, AgentError>> + Send>>;

/// 一次对话补全请求
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    /// 暴露给后端的工具；为空时请求中不带 tools
    pub tools: Vec<ToolDescriptor>,
    /// 采样参数（model 字段以 ChatRequest::model 为准）
    pub params: ChatConfig,
    pub stream: bool,
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 发起补全，返回片段流
    async fn chat(&self, request: ChatRequest) -> Result<DeltaStream, AgentError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
