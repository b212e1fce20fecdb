//! DART 演示入口
//!
//! 初始化日志与配置，构建 collect -> analyze -> report 三个 Agent 任务并运行，逐条打印事件（JSON）。
//! 配置了 api_key（或设置了 OPENAI_API_KEY）时使用 OpenAI 兼容后端，否则使用离线的脚本化客户端。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use dart::config::load_config;
use dart::llm::{LlmClient, OpenAiClient, ScriptedLlmClient};
use dart::tools::EchoTool;
use dart::{observability, Agent, MultiAgentRuntime, Runtime};
use futures_util::StreamExt;
use serde_json::json;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;

    let client: Arc<dyn LlmClient> = if cfg.runtime.api_key.is_some() || std::env::var("OPENAI_API_KEY").is_ok() {
        tracing::info!(base_url = %cfg.runtime.base_url, "using OpenAI-compatible backend");
        Arc::new(OpenAiClient::from_config(&cfg.runtime))
    } else {
        tracing::info!("no API key configured, using scripted backend");
        Arc::new(ScriptedLlmClient::new())
    };
    let runtime = Arc::new(Runtime::from_app_config(client, &cfg).context("Invalid runtime config")?);

    let collector = Agent::builder("collector")
        .persona("资料收集员")
        .description("整理用户给出的原始信息，列出要点")
        .tool(Arc::new(EchoTool))
        .build()?;
    let analyst = Agent::builder("analyst")
        .persona("数据分析师")
        .description("根据收集到的要点给出分析结论")
        .build()?;
    let reporter = Agent::builder("reporter")
        .persona("报告撰写人")
        .description("把分析结论写成简短报告")
        .handoff(analyst.clone())
        .build()?;

    let multi = MultiAgentRuntime::from_app_config(runtime, &cfg);
    let input = |text: &str| {
        let mut p = serde_json::Map::new();
        p.insert("user_message".to_string(), json!(text));
        p
    };
    multi.add_agent_task("collect", collector, &[], input("本季度销量：一月 120，二月 95，三月 143"), 0, None)?;
    multi.add_agent_task("analyze", analyst, &["collect"], input("分析销量变化趋势"), 0, None)?;
    multi.add_agent_task("report", reporter, &["analyze"], input("写一份两句话的报告"), 0, None)?;

    let mut events = multi.run();
    while let Some(event) = events.next().await {
        println!("{}", serde_json::to_string(&event)?);
    }

    println!("{}", serde_json::to_string_pretty(&multi.status().summary)?);
    for result in multi.task_results() {
        println!("[{}] {:?}: {}", result.id, result.state, result.outputs.get("content").unwrap_or(&json!("")));
    }
    Ok(())
}
