//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；支持 Ollama、vLLM、OpenAI、自建代理等。
//! 请求报文先按 OpenAI 的 JSON 格式组装，再反序列化为 async_openai 的请求类型；
//! 回复中的 delta 通过 serde 转为 ChoiceDelta，保留分片中的 tool_calls 与 reasoning_content。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::CreateChatCompletionRequest;
use async_openai::Client;
use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use serde_json::{json, Value};

use crate::config::RuntimeConfig;
use crate::core::AgentError;
use crate::llm::traits::{ChatRequest, DeltaStream, LlmClient};
use crate::runtime::choice::ChoiceDelta;

/// 重试的初始间隔，之后每次翻倍
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);
/// 重试间隔上限
const RETRY_MAX_DELAY: Duration = Duration::from_secs(30);

/// 第 attempt 次重试（从 1 开始）前的等待时间
fn retry_delay(attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    RETRY_BASE_DELAY.saturating_mul(factor).min(RETRY_MAX_DELAY)
}

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容客户端
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    /// 建立请求的超时
    timeout: Duration,
    /// 建立请求失败后的重试次数
    max_retries: u32,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, api_key: Option<&str>, timeout: Duration, max_retries: u32) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "ollama".to_string());

        let config = match base_url {
            Some(url) => OpenAIConfig::new().with_api_base(url).with_api_key(api_key),
            None => OpenAIConfig::new().with_api_key(api_key),
        };

        Self {
            client: Client::with_config(config),
            timeout,
            max_retries,
            usage: TokenUsage::new(),
        }
    }

    pub fn from_config(cfg: &RuntimeConfig) -> Self {
        Self::new(
            Some(&cfg.base_url),
            cfg.api_key.as_deref(),
            Duration::from_secs(cfg.timeout_secs),
            cfg.max_retries,
        )
    }

    /// 获取累计 token 使用统计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    /// 带超时与重试地建立请求；流建立之后的错误不重试
    async fn with_retry<T, E, F, Fut>(&self, mut attempt_fn: F) -> Result<T, AgentError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            let err = match tokio::time::timeout(self.timeout, attempt_fn()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => backend_error(e),
                Err(_) => AgentError::Backend(format!("request timed out after {:?}", self.timeout)),
            };
            if attempt >= self.max_retries {
                return Err(err);
            }
            attempt += 1;
            tracing::warn!("LLM request failed ({}), retry {}/{}", err, attempt, self.max_retries);
            tokio::time::sleep(retry_delay(attempt)).await;
        }
    }
}

/// 组装 OpenAI 格式的请求报文
pub fn request_body(request: &ChatRequest) -> Result<Value, AgentError> {
    let mut body = serde_json::to_value(&request.params)?;
    let obj = body
        .as_object_mut()
        .ok_or_else(|| AgentError::Backend("chat params must serialize to an object".to_string()))?;

    obj.insert("model".to_string(), json!(request.model));
    obj.insert("messages".to_string(), serde_json::to_value(&request.messages)?);
    obj.insert("stream".to_string(), json!(request.stream));
    if request.stream {
        obj.insert("stream_options".to_string(), json!({"include_usage": true}));
    }
    if request.tools.is_empty() {
        obj.remove("tool_choice");
    } else {
        let tools: Vec<Value> = request.tools.iter().map(|t| t.to_openai()).collect();
        obj.insert("tools".to_string(), Value::Array(tools));
    }
    Ok(body)
}

/// 非流式回复的 message 转为单个片段；tool_calls 按出现顺序补上 index
fn message_to_delta(mut message: Value) -> Result<ChoiceDelta, AgentError> {
    if let Some(calls) = message.get_mut("tool_calls").and_then(|v| v.as_array_mut()) {
        for (i, call) in calls.iter_mut().enumerate() {
            if let Some(obj) = call.as_object_mut() {
                obj.insert("index".to_string(), json!(i));
            }
        }
    }
    Ok(serde_json::from_value(message)?)
}

fn backend_error(e: impl std::fmt::Display) -> AgentError {
    AgentError::Backend(e.to_string())
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn chat(&self, request: ChatRequest) -> Result<DeltaStream, AgentError> {
        let body = request_body(&request)?;
        let api_request: CreateChatCompletionRequest =
            serde_json::from_value(body).map_err(|e| AgentError::Backend(format!("invalid request: {}", e)))?;

        if request.stream {
            let response = self
                .with_retry(|| {
                    let client = self.client.clone();
                    let request = api_request.clone();
                    async move { client.chat().create_stream(request).await }
                })
                .await?;

            let usage = self.usage.clone();
            let deltas = response.flat_map(move |chunk| {
                let items: Vec<Result<ChoiceDelta, AgentError>> = match chunk {
                    Ok(chunk) => {
                        if let Some(u) = &chunk.usage {
                            usage.add(u.prompt_tokens as u64, u.completion_tokens as u64);
                        }
                        chunk
                            .choices
                            .into_iter()
                            .map(|c| {
                                serde_json::to_value(&c.delta)
                                    .and_then(serde_json::from_value::<ChoiceDelta>)
                                    .map_err(AgentError::from)
                            })
                            .collect()
                    }
                    Err(e) => vec![Err(backend_error(e))],
                };
                stream::iter(items)
            });
            Ok(Box::pin(deltas))
        } else {
            let response = self
                .with_retry(|| {
                    let client = self.client.clone();
                    let request = api_request.clone();
                    async move { client.chat().create(request).await }
                })
                .await?;

            if let Some(u) = &response.usage {
                self.usage.add(u.prompt_tokens as u64, u.completion_tokens as u64);
            }
            let deltas: Vec<Result<ChoiceDelta, AgentError>> = response
                .choices
                .into_iter()
                .take(1)
                .map(|c| serde_json::to_value(&c.message).map_err(AgentError::from).and_then(message_to_delta))
                .collect();
            Ok(Box::pin(stream::iter(deltas)))
        }
    }
}
