//! 会话引擎 + 多 Agent 编排集成测试

use std::sync::Arc;
use std::time::Duration;

use dart::config::RuntimeConfig;
use dart::core::{Message, MultiAgentEvent, MultiAgentRuntime, Role};
use dart::dag::{Payload, SchedulerOptions};
use dart::llm::{ChatRequest, ScriptStep, ScriptedLlmClient};
use dart::tools::{FunctionTool, ParamType, ToolOutput, ToolParameter};
use dart::{Agent, RunOptions, Runtime, RuntimeEvent};
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;

fn weather_tool() -> Arc<FunctionTool> {
    Arc::new(FunctionTool::new(
        "weather",
        "查询城市天气",
        &[ToolParameter::required("city", ParamType::String)],
        |args: Value| async move {
            let city = args.get("city").and_then(Value::as_str).unwrap_or("?").to_string();
            Ok(ToolOutput::Text(format!("{} sunny", city)))
        },
    ))
}

fn tool_content<'a>(request: &'a ChatRequest, name: &str) -> Option<&'a str> {
    request
        .messages
        .iter()
        .find(|m| m.role == Role::Tool && m.name.as_deref() == Some(name))
        .map(|m| m.content.as_str())
}

fn last_user(request: &ChatRequest) -> String {
    request
        .messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.clone())
        .unwrap_or_default()
}

/// 按系统提示中的 Agent 名称与上下文中的工具消息决定回复
fn respond(request: &ChatRequest) -> ScriptStep {
    let system = request.messages[0].content.as_str();
    if system.contains("writer") {
        let weather = tool_content(request, "weather").unwrap_or("unknown");
        return ScriptStep::text(format!("report: {}", weather));
    }
    if system.contains("summarizer") {
        return ScriptStep::text(format!("summary <- {}", last_user(request).contains("NY sunny")));
    }
    match (tool_content(request, "weather"), tool_content(request, "writer")) {
        (None, _) => ScriptStep::tool_call("w1", "weather", r#"{"city":"NY"}"#),
        (Some(_), None) => ScriptStep::tool_call("h1", "writer", ""),
        (Some(_), Some(report)) => ScriptStep::text(format!("final: {}", report)),
    }
}

fn runtime(client: Arc<ScriptedLlmClient>) -> Arc<Runtime> {
    Arc::new(Runtime::new(client, RuntimeConfig::default()).unwrap())
}

fn planner() -> Agent {
    let writer = Agent::builder("writer").persona("撰稿人").build().unwrap();
    Agent::builder("planner")
        .persona("行程规划")
        .tool(weather_tool())
        .handoff(writer)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_agent_without_tools_finishes_in_one_turn() {
    let client = Arc::new(ScriptedLlmClient::new());
    let rt = runtime(Arc::clone(&client));
    let agent = Agent::builder("solo").build().unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let outcome = rt
        .run(&agent, vec![Message::user("anything")], &RunOptions::default(), Some(&tx))
        .await
        .unwrap();
    drop(tx);

    assert_eq!(outcome.turns, 1);
    assert_eq!(outcome.content, "Echo from Mock: anything");
    assert_eq!(client.request_count(), 1);

    let mut content_events = Vec::new();
    while let Some(ev) = rx.recv().await {
        if let RuntimeEvent::Content { text } = ev {
            content_events.push(text);
        }
    }
    assert_eq!(content_events, vec!["Echo from Mock: anything".to_string()]);
}

#[tokio::test]
async fn test_tool_then_handoff_then_answer() {
    let client = Arc::new(ScriptedLlmClient::new().with_responder(respond));
    let rt = runtime(Arc::clone(&client));

    let outcome = rt
        .run(&planner(), vec![Message::user("plan a trip")], &RunOptions::default(), None)
        .await
        .unwrap();

    assert_eq!(outcome.content, "final: report: NY sunny");
    assert_eq!(outcome.turns, 3);
    assert_eq!(outcome.status.tools_called, vec!["weather", "writer"]);
    assert!(outcome.status.tool_error_history.is_empty());

    // planner x3 + writer x1；writer 看到了共享的工具消息
    let requests = client.requests();
    assert_eq!(requests.len(), 4);
    assert_eq!(tool_content(&requests[2], "weather"), Some("NY sunny"));
    assert!(requests[0].tools.iter().any(|t| t.name == "writer"));
}

#[tokio::test]
async fn test_parallel_tool_results_keep_call_order() {
    let slow = Arc::new(FunctionTool::new("slow", "慢", &[], |_| async {
        tokio::time::sleep(Duration::from_millis(60)).await;
        Ok(ToolOutput::Text("slow done".to_string()))
    }));
    let fast = Arc::new(FunctionTool::new("fast", "快", &[], |_| async {
        Ok(ToolOutput::Text("fast done".to_string()))
    }));
    let agent = Agent::builder("juggler")
        .tool(slow)
        .tool(fast)
        .parallel_execute(true)
        .build()
        .unwrap();

    let client = Arc::new(ScriptedLlmClient::with_steps([
        ScriptStep::tool_calls(vec![
            ("c1".to_string(), "slow".to_string(), "{}".to_string()),
            ("c2".to_string(), "fast".to_string(), "{}".to_string()),
        ]),
        ScriptStep::text("both done"),
    ]));
    let rt = runtime(Arc::clone(&client));
    let outcome = rt
        .run(&agent, vec![Message::user("go")], &RunOptions::default(), None)
        .await
        .unwrap();
    assert_eq!(outcome.content, "both done");

    let second = &client.requests()[1];
    let tool_ids: Vec<&str> = second
        .messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .filter_map(|m| m.tool_call_id.as_deref())
        .collect();
    assert_eq!(tool_ids, vec!["c1", "c2"]);
}

#[tokio::test]
async fn test_multi_agent_pipeline() {
    let client = Arc::new(ScriptedLlmClient::new().with_responder(respond));
    let multi = MultiAgentRuntime::new(runtime(Arc::clone(&client)), SchedulerOptions::default(), RunOptions::default());
    let summarizer = Agent::builder("summarizer").build().unwrap();

    let mut seed = Payload::new();
    seed.insert("messages".to_string(), json!([{"role": "user", "content": "plan a trip"}]));
    multi.add_agent_task("plan", planner(), &[], seed, 1, Some(Duration::from_secs(5))).unwrap();
    let mut ask = Payload::new();
    ask.insert("user_message".to_string(), json!("summarize"));
    multi.add_agent_task("summary", summarizer, &["plan"], ask, 0, None).unwrap();

    let events: Vec<MultiAgentEvent> = multi.run().collect().await;
    assert_eq!(events.last(), Some(&MultiAgentEvent::Completed));

    let results = multi.task_results();
    assert_eq!(results[0].outputs["content"], "final: report: NY sunny");
    assert_eq!(results[1].outputs["content"], "summary <- true");
    assert_eq!(results[1].outputs["success"], true);

    let snapshot = multi.status();
    assert_eq!(snapshot.summary.completed, 2);
    assert_eq!(snapshot.multi_agent.task_history.len(), 4);
    assert!(snapshot.scheduler.tasks.iter().all(|t| t.elapsed_secs.is_some()));
}
