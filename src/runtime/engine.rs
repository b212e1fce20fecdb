//! 会话引擎
//!
//! 驱动单个 Agent 逐轮对话：组装上下文 -> 调用后端 -> 合并片段 -> 分发工具 -> 决定是否继续。
//! 委派（handoff）以显式的递归帧执行，深度不超过轮数上限；帧之间只按值传递历史与工具消息。

use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use futures_util::StreamExt;
use tokio::sync::mpsc::UnboundedSender;

use crate::agent::Agent;
use crate::config::{AppConfig, ChatConfig, ConversationSection, RuntimeConfig};
use crate::core::message::{Message, ToolCall};
use crate::core::status::RuntimeStatus;
use crate::core::AgentError;
use crate::llm::traits::{ChatRequest, LlmClient};
use crate::runtime::choice::Choice;
use crate::runtime::events::RuntimeEvent;
use crate::runtime::prompt::{system_prompt, tool_error_prompt};
use crate::tools::executor::ToolDispatcher;
use crate::tools::result::{ToolResult, ToolResultValue};

/// 单次运行的参数
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// 调用级采样参数，优先级最高
    pub chat_config: Option<ChatConfig>,
    pub max_turns: usize,
    pub stream: bool,
    pub stop_if_no_tools: bool,
    pub include_think: bool,
    pub share_tool_results: bool,
}

impl RunOptions {
    pub fn from_config(cfg: &ConversationSection) -> Self {
        Self {
            chat_config: None,
            max_turns: cfg.max_turns,
            stream: cfg.stream,
            stop_if_no_tools: cfg.stop_if_no_tools,
            include_think: cfg.include_think,
            share_tool_results: cfg.share_tool_results,
        }
    }

    pub fn with_chat_config(mut self, config: ChatConfig) -> Self {
        self.chat_config = Some(config);
        self
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from_config(&ConversationSection::default())
    }
}

/// 一次运行的结果
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// 最终累计的可见内容
    pub content: String,
    pub status: RuntimeStatus,
    /// 实际执行的轮数
    pub turns: usize,
}

/// 会话运行时：后端客户端 + 默认配置 + 工具分发器
pub struct Runtime {
    client: Arc<dyn LlmClient>,
    config: RuntimeConfig,
    chat_config: ChatConfig,
    dispatcher: ToolDispatcher,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("chat_config", &self.chat_config)
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

fn send_event(tx: Option<&UnboundedSender<RuntimeEvent>>, ev: RuntimeEvent) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}

impl Runtime {
    /// 构造时校验配置（默认模型必须可用）
    pub fn new(client: Arc<dyn LlmClient>, config: RuntimeConfig) -> Result<Self, AgentError> {
        config.validate()?;
        Ok(Self {
            client,
            config,
            chat_config: ChatConfig::default(),
            dispatcher: ToolDispatcher::default(),
        })
    }

    pub fn from_app_config(client: Arc<dyn LlmClient>, cfg: &AppConfig) -> Result<Self, AgentError> {
        Ok(Self::new(client, cfg.runtime.clone())?
            .with_chat_config(cfg.chat.clone())
            .with_max_parallel_tools(cfg.conversation.max_parallel_tools))
    }

    /// 运行时级采样参数（优先级最低）
    pub fn with_chat_config(mut self, config: ChatConfig) -> Self {
        self.chat_config = config;
        self
    }

    pub fn with_max_parallel_tools(mut self, max_parallel: usize) -> Self {
        self.dispatcher = ToolDispatcher::new(max_parallel);
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn chat_config(&self) -> &ChatConfig {
        &self.chat_config
    }

    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.client.token_usage()
    }

    /// 叠加采样参数（调用 > Agent > 运行时）并确定模型；模型不在允许列表中时报配置错误
    pub fn resolve(&self, agent: &Agent, call: Option<&ChatConfig>) -> Result<(ChatConfig, String), AgentError> {
        let mut params = self.chat_config.clone();
        if let Some(agent_cfg) = agent.chat_config() {
            params = params.merge(agent_cfg);
        }
        if let Some(call_cfg) = call {
            params = params.merge(call_cfg);
        }
        let model = params
            .model
            .clone()
            .unwrap_or_else(|| self.config.default_model.clone());
        if !self.config.is_model_allowed(&model) {
            return Err(AgentError::Configuration(format!(
                "model \"{}\" is not in the available models: {:?}",
                model, self.config.models
            )));
        }
        Ok((params, model))
    }

    /// 运行一个 Agent 直到停止条件或轮数耗尽
    ///
    /// 事件按发生顺序推送到 events：runtime_start、每轮的 agent / delta / choice / tools_recalled、
    /// 最终 content 与 runtime_end。委派帧的轮次事件也推送到同一通道。
    pub async fn run(
        &self,
        agent: &Agent,
        messages: Vec<Message>,
        options: &RunOptions,
        events: Option<&UnboundedSender<RuntimeEvent>>,
    ) -> Result<RunOutcome, AgentError> {
        self.resolve(agent, options.chat_config.as_ref())?;
        send_event(events, RuntimeEvent::RuntimeStart);
        tracing::info!(agent = agent.name(), max_turns = options.max_turns, "runtime start");

        let outcome = self.run_frame(agent, messages, options, events, 0).await?;

        send_event(events, RuntimeEvent::Content { text: outcome.content.clone() });
        send_event(events, RuntimeEvent::RuntimeEnd);
        tracing::info!(agent = agent.name(), turns = outcome.turns, "runtime end");
        Ok(outcome)
    }

    fn run_frame<'a>(
        &'a self,
        agent: &'a Agent,
        history: Vec<Message>,
        options: &'a RunOptions,
        events: Option<&'a UnboundedSender<RuntimeEvent>>,
        depth: usize,
    ) -> BoxFuture<'a, Result<RunOutcome, AgentError>> {
        async move {
            let (params, model) = self.resolve(agent, options.chat_config.as_ref())?;
            let system = Message::system(system_prompt(agent));

            let mut status = RuntimeStatus::new();
            let mut tool_messages: Vec<Message> = Vec::new();
            let mut err_messages: Vec<Message> = Vec::new();
            let mut content = String::new();
            let mut turns = 0;

            for turn in 1..=options.max_turns {
                turns = turn;
                send_event(events, RuntimeEvent::agent_turn(agent.name(), turn));
                tracing::debug!(agent = agent.name(), turn, depth, "conversation turn");

                let registry = agent.capabilities();
                let mut context = Vec::with_capacity(history.len() + tool_messages.len() + err_messages.len() + 2);
                context.push(system.clone());
                context.extend(history.iter().cloned());
                context.extend(tool_messages.iter().cloned());
                context.extend(err_messages.iter().cloned());
                if !content.is_empty() {
                    context.push(Message::assistant(content.clone()));
                }
                let message_count = context.len();

                let request = ChatRequest {
                    model: model.clone(),
                    messages: context,
                    tools: registry.descriptors(),
                    params: params.clone(),
                    stream: options.stream,
                };
                let mut choice = self.complete(request, events).await;
                choice.split_thinking_from_content();
                status.add_chat(agent.name(), turn, &model, message_count, &choice);
                send_event(events, RuntimeEvent::Choice { choice: choice.clone() });

                if choice.is_empty() {
                    tracing::debug!(agent = agent.name(), turn, "empty choice, stopping");
                    break;
                }

                if !choice.content.is_empty() || !choice.thinking.is_empty() {
                    if options.include_think && !choice.thinking.is_empty() {
                        content.push_str(&choice.thinking);
                        content.push('\n');
                    }
                    content.push_str(&choice.content);
                }

                let calls = choice.ordered_tool_calls();
                let results = if agent.execute_tools() && !calls.is_empty() {
                    self.dispatcher.dispatch(&registry, &calls, agent.parallel_execute()).await
                } else {
                    Vec::new()
                };
                send_event(events, RuntimeEvent::ToolsRecalled { calls: calls.clone() });

                if (options.stop_if_no_tools && calls.is_empty()) || !agent.execute_tools() {
                    break;
                }

                let mut answered: Vec<ToolCall> = Vec::new();
                let mut answers: Vec<Message> = Vec::new();
                let mut failed: Vec<ToolCall> = Vec::new();
                let mut failures: Vec<Message> = Vec::new();

                for (call, result) in calls.iter().zip(results) {
                    let refused = match &result.value {
                        ToolResultValue::Agent(delegate) if depth + 1 > options.max_turns => {
                            Some(delegate.name().to_string())
                        }
                        _ => None,
                    };
                    let result = match refused {
                        Some(delegate) => {
                            tracing::warn!(agent = agent.name(), delegate = %delegate, "handoff refused");
                            let text = format!(
                                "Handoff Error: delegating to '{}' exceeds the maximum depth of {}",
                                delegate, options.max_turns
                            );
                            ToolResult::failure(&call.id, &result.name, result.description.clone(), text)
                        }
                        None => result,
                    };
                    status.add_tool_call(agent.name(), call, &result);
                    if !result.success {
                        let text = result.value.as_text().unwrap_or_default().to_string();
                        tracing::warn!(agent = agent.name(), tool = %result.name, "tool call failed");
                        failures.push(Message::tool(&call.id, &result.name, text));
                        failed.push(call.clone());
                        continue;
                    }
                    status.add_tool_called(&result.name);
                    match result.value {
                        ToolResultValue::String(text) => {
                            answers.push(Message::tool(&call.id, &result.name, text));
                            answered.push(call.clone());
                        }
                        ToolResultValue::Agent(delegate) => {
                            let mut nested_history = history.clone();
                            if options.share_tool_results {
                                nested_history.extend(tool_messages.iter().cloned());
                            }
                            let nested_options = RunOptions {
                                include_think: false,
                                ..options.clone()
                            };
                            let delegate_runtime = delegate.runtime().cloned();
                            let target: &Runtime = delegate_runtime.as_deref().unwrap_or(self);
                            tracing::info!(from = agent.name(), to = delegate.name(), depth = depth + 1, "handoff");

                            let nested = target
                                .run_frame(&delegate, nested_history, &nested_options, events, depth + 1)
                                .await?;
                            status.absorb(nested.status);
                            if !nested.content.is_empty() {
                                answers.push(Message::tool(&call.id, &result.name, nested.content));
                                answered.push(call.clone());
                            }
                        }
                        ToolResultValue::None => {}
                    }
                }

                if !answers.is_empty() {
                    tool_messages.push(Message::assistant_with_tool_calls(&answered));
                    tool_messages.extend(answers);
                }
                err_messages.clear();
                if !failures.is_empty() {
                    let names: Vec<String> = failed.iter().map(|c| c.function.name.clone()).collect();
                    err_messages.push(Message::assistant_with_tool_calls(&failed));
                    err_messages.extend(failures);
                    err_messages.push(Message::user(tool_error_prompt(&names)));
                }
                if !answered.is_empty() || !err_messages.is_empty() {
                    content.clear();
                }
            }

            Ok(RunOutcome { content, status, turns })
        }
        .boxed()
    }

    /// 请求后端并合并片段；后端失败只记录日志，返回已合并的部分
    async fn complete(&self, request: ChatRequest, events: Option<&UnboundedSender<RuntimeEvent>>) -> Choice {
        let stream = request.stream;
        let mut choice = Choice::new();
        let mut deltas = match self.client.chat(request).await {
            Ok(deltas) => deltas,
            Err(e) => {
                tracing::error!("LLM request failed: {}", e);
                return choice;
            }
        };
        while let Some(item) = deltas.next().await {
            match item {
                Ok(delta) => {
                    if stream {
                        send_event(events, RuntimeEvent::Delta { delta: delta.clone() });
                    }
                    choice.merge_delta(&delta);
                }
                Err(e) => {
                    tracing::error!("LLM stream interrupted: {}", e);
                    break;
                }
            }
        }
        choice
    }
}
