//! 工具分发
//!
//! 把一组 ToolCall 解析到注册表中的能力并执行，每个调用产出一个 ToolResult：
//! 普通工具以 JSON 解码后的参数调用；委派 Agent 直接返回该 Agent；找不到名称时返回失败结果。
//! 工具内部的错误与 panic 都在这里被捕获并转为 success=false 的结果，绝不向调用方传播。
//! 并行模式下使用有界并发，输出顺序与输入顺序一致；每次调用输出结构化审计日志（JSON）。

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Instant;

use futures_util::{stream, FutureExt, StreamExt};
use serde_json::Value;

use crate::core::message::ToolCall;
use crate::core::AgentError;
use crate::tools::registry::{Capability, ToolOutput, ToolRegistry};
use crate::tools::result::{ToolResult, ToolResultValue};

/// 并行执行工具的默认并发上限
pub const DEFAULT_MAX_PARALLEL_TOOLS: usize = 16;
/// 审计日志中参数预览的最大字符数
const ARGS_PREVIEW_CHARS: usize = 200;

/// 工具分发器：持有并行模式下的并发上限
#[derive(Debug, Clone)]
pub struct ToolDispatcher {
    max_parallel: usize,
}

impl Default for ToolDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PARALLEL_TOOLS)
    }
}

impl ToolDispatcher {
    pub fn new(max_parallel: usize) -> Self {
        Self {
            max_parallel: max_parallel.max(1),
        }
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    /// 分发一组调用；返回结果与 calls 一一对应
    pub async fn dispatch(&self, registry: &ToolRegistry, calls: &[ToolCall], parallel: bool) -> Vec<ToolResult> {
        if parallel && calls.len() > 1 {
            self.dispatch_parallel(registry, calls).await
        } else {
            self.dispatch_sequential(registry, calls).await
        }
    }

    async fn dispatch_sequential(&self, registry: &ToolRegistry, calls: &[ToolCall]) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            let outcome = AssertUnwindSafe(invoke(registry, call)).catch_unwind().await;
            results.push(outcome.unwrap_or_else(|panic| executor_error(call, &panic_message(panic.as_ref()))));
        }
        results
    }

    async fn dispatch_parallel(&self, registry: &ToolRegistry, calls: &[ToolCall]) -> Vec<ToolResult> {
        // buffered 保持输入顺序；spawn 在被轮询时才发生，同时运行的任务数不超过 max_parallel
        let joined: Vec<_> = stream::iter(calls.iter().cloned())
            .map(|call| {
                let registry = registry.clone();
                tokio::spawn(async move { invoke(&registry, &call).await })
            })
            .buffered(self.max_parallel)
            .collect()
            .await;

        calls
            .iter()
            .zip(joined)
            .map(|(call, joined)| match joined {
                Ok(result) => result,
                Err(e) => executor_error(call, &e.to_string()),
            })
            .collect()
    }
}

/// 解析并执行单个调用
pub async fn invoke(registry: &ToolRegistry, call: &ToolCall) -> ToolResult {
    let name = call.function.name.as_str();
    let start = Instant::now();

    let result = match registry.resolve(name) {
        Some(Capability::Native(tool)) => {
            let description = tool.description().to_string();
            let outcome = match decode_arguments(&call.function.arguments) {
                Ok(args) => tool.execute(args).await.map_err(AgentError::ToolInvocation),
                Err(e) => Err(e),
            };
            match outcome {
                Ok(output) => from_output(call, &description, output),
                Err(e) => ToolResult::failure(&call.id, name, description, call_error(call, &e)),
            }
        }
        Some(Capability::Delegate(agent)) => {
            let description = Capability::Delegate(agent.clone()).description();
            ToolResult::new(&call.id, name, description, ToolResultValue::Agent(agent), true)
        }
        None => {
            let description = format!("Tool '{}' is not found", name);
            let diagnostic = format!(
                "Tool Call Error:\n\t**Tool Name**: {}\n\t**Error Information**: {}",
                name, description
            );
            ToolResult::failure(&call.id, name, description, diagnostic)
        }
    };

    let audit = serde_json::json!({
        "event": "tool_audit",
        "tool": name,
        "ok": result.success,
        "kind": result.kind(),
        "duration_ms": start.elapsed().as_millis() as u64,
        "args_preview": args_preview(&call.function.arguments),
    });
    tracing::info!(audit = %audit.to_string(), "tool");

    result
}

/// 空参数串视为无参数
fn decode_arguments(raw: &str) -> Result<Value, AgentError> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(raw).map_err(|e| AgentError::ToolInvocation(format!("invalid JSON arguments: {}", e)))
}

fn from_output(call: &ToolCall, description: &str, output: ToolOutput) -> ToolResult {
    let value = match output {
        ToolOutput::Text(s) => ToolResultValue::String(s),
        ToolOutput::Agent(a) => ToolResultValue::Agent(a),
        ToolOutput::None => ToolResultValue::None,
    };
    ToolResult::new(&call.id, &call.function.name, description, value, true)
}

fn call_error(call: &ToolCall, error: &AgentError) -> String {
    format!(
        "Tool Call Error:\n\t**Tool Name**: {}\n\t**Arguments Used**: {}\n\t**Error Information**: {}",
        call.function.name, call.function.arguments, error
    )
}

fn executor_error(call: &ToolCall, error: &str) -> ToolResult {
    tracing::error!("Tool {} crashed: {}", call.function.name, error);
    ToolResult::failure(
        &call.id,
        &call.function.name,
        "",
        format!("Executor Run Error: {}", error),
    )
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "tool panicked".to_string()
    }
}

fn args_preview(args: &str) -> String {
    if args.chars().count() > ARGS_PREVIEW_CHARS {
        format!("{}...", args.chars().take(ARGS_PREVIEW_CHARS).collect::<String>())
    } else {
        args.to_string()
    }
}
