//! 多 Agent 编排
//!
//! MultiAgentRuntime 把 DAG 调度器与会话引擎连起来：每个任务由其 Agent 跑一次会话，
//! 上游任务的输出作为上下文追加给下游；运行过程中同步维护 MultiAgentStatus。

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use serde::Serialize;
use serde_json::{json, Value};

use crate::agent::Agent;
use crate::config::{AppConfig, ChatConfig};
use crate::core::error::AgentError;
use crate::core::message::Message;
use crate::core::status::{DagRunState, MultiAgentStatus, TaskSummary};
use crate::dag::builder::TaskBuilder;
use crate::dag::scheduler::{DagScheduler, SchedulerOptions, TaskExecutor};
use crate::dag::types::{DagEvent, Payload, SchedulerError, SchedulerStatus, Task, TaskContext, TaskId, TaskState};
use crate::runtime::engine::{RunOptions, Runtime};

/// 多 Agent 运行事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum MultiAgentEvent {
    #[serde(rename = "multi-agent-start")]
    Start { total: usize },
    /// 调度器事件原样转发
    #[serde(rename = "dag")]
    Dag(DagEvent),
    #[serde(rename = "multi-agent-completed")]
    Completed,
    #[serde(rename = "multi-agent-completed-with-errors")]
    CompletedWithErrors {
        #[serde(rename = "failedIds")]
        failed_ids: Vec<TaskId>,
    },
    /// 依赖图校验失败，没有任何任务执行
    #[serde(rename = "error")]
    Error { message: String },
}

/// 调度器快照 + 多 Agent 状态
#[derive(Debug, Clone, Serialize)]
pub struct MultiAgentSnapshot {
    pub scheduler: SchedulerStatus,
    pub multi_agent: MultiAgentStatus,
    pub summary: TaskSummary,
    /// 秒
    pub execution_time: f64,
}

/// 单个任务的结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskResult {
    pub id: TaskId,
    pub state: TaskState,
    pub outputs: Payload,
    pub error: Option<String>,
    pub elapsed_secs: Option<f64>,
}

fn lock(status: &Mutex<MultiAgentStatus>) -> MutexGuard<'_, MultiAgentStatus> {
    status.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 多 Agent 运行时
pub struct MultiAgentRuntime {
    scheduler: DagScheduler,
    runtime: Arc<Runtime>,
    options: RunOptions,
    status: Arc<Mutex<MultiAgentStatus>>,
}

impl MultiAgentRuntime {
    pub fn new(runtime: Arc<Runtime>, scheduler: SchedulerOptions, options: RunOptions) -> Self {
        Self {
            scheduler: DagScheduler::new(scheduler),
            runtime,
            options,
            status: Arc::new(Mutex::new(MultiAgentStatus::new())),
        }
    }

    pub fn from_app_config(runtime: Arc<Runtime>, cfg: &AppConfig) -> Self {
        Self::new(
            runtime,
            SchedulerOptions::from(&cfg.scheduler),
            RunOptions::from_config(&cfg.conversation),
        )
    }

    pub fn scheduler(&self) -> &DagScheduler {
        &self.scheduler
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    pub fn add_task(&self, task: Task) -> Result<(), SchedulerError> {
        let id = task.id.clone();
        let agent_name = task.agent.as_ref().map(|a| a.name().to_string());
        self.scheduler.add_task(task)?;
        lock(&self.status).add_task(&id, agent_name.as_deref());
        Ok(())
    }

    /// 以 Agent 与依赖直接添加任务
    pub fn add_agent_task(
        &self,
        id: impl Into<TaskId>,
        agent: Agent,
        dependencies: &[&str],
        inputs: Payload,
        priority: i32,
        timeout: Option<Duration>,
    ) -> Result<(), SchedulerError> {
        let mut builder = TaskBuilder::new(id)
            .agent(agent)
            .depends_on_all(dependencies.iter().copied())
            .inputs(inputs)
            .priority(priority);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        self.add_task(builder.build())
    }

    /// 依次添加；遇到第一个错误即返回，之前的任务保留
    pub fn add_tasks(&self, tasks: impl IntoIterator<Item = Task>) -> Result<(), SchedulerError> {
        for task in tasks {
            self.add_task(task)?;
        }
        Ok(())
    }

    /// 以默认执行方式（每个任务跑一次 Agent 会话）运行
    pub fn run(&self) -> BoxStream<'static, MultiAgentEvent> {
        let executor = AgentTaskExecutor::new(Arc::clone(&self.runtime), self.options.clone());
        self.run_with(Arc::new(executor))
    }

    /// 以自定义执行器运行
    pub fn run_with(&self, executor: Arc<dyn TaskExecutor>) -> BoxStream<'static, MultiAgentEvent> {
        let dag = match self.scheduler.run(executor) {
            Ok(dag) => dag,
            Err(e) => {
                tracing::error!("multi-agent run rejected: {}", e);
                lock(&self.status).end_execution(DagRunState::Failed);
                return stream::iter(vec![MultiAgentEvent::Error { message: e.to_string() }]).boxed();
            }
        };

        let total = self.scheduler.len();
        lock(&self.status).start_execution();
        tracing::info!(total, "multi-agent run start");

        let status = Arc::clone(&self.status);
        let events = dag.flat_map(move |ev| {
            let mut out = Vec::with_capacity(2);
            {
                let mut status = lock(&status);
                match &ev {
                    DagEvent::TaskStarted { id } => status.update_task_state(id, TaskState::Running, None),
                    DagEvent::TaskCompleted { id, .. } => status.update_task_state(id, TaskState::Completed, None),
                    DagEvent::TaskFailed { id, error } => {
                        status.update_task_state(id, TaskState::Failed, Some(error.clone()))
                    }
                    DagEvent::TaskSkipped { id, reason } => {
                        status.update_task_state(id, TaskState::Skipped, Some(reason.clone()))
                    }
                    DagEvent::DagCompleted => status.end_execution(DagRunState::Completed),
                    DagEvent::DagCompletedWithErrors { .. } => status.end_execution(DagRunState::CompletedWithErrors),
                    DagEvent::DagStart { .. } => {}
                }
            }
            let terminal = match &ev {
                DagEvent::DagCompleted => Some(MultiAgentEvent::Completed),
                DagEvent::DagCompletedWithErrors { failed_ids } => Some(MultiAgentEvent::CompletedWithErrors {
                    failed_ids: failed_ids.clone(),
                }),
                _ => None,
            };
            out.push(MultiAgentEvent::Dag(ev));
            if let Some(terminal) = terminal {
                tracing::info!("multi-agent run finished");
                out.push(terminal);
            }
            stream::iter(out)
        });

        stream::iter(vec![MultiAgentEvent::Start { total }]).chain(events).boxed()
    }

    pub fn status(&self) -> MultiAgentSnapshot {
        let multi_agent = lock(&self.status).clone();
        MultiAgentSnapshot {
            scheduler: self.scheduler.status(),
            summary: multi_agent.summary(),
            execution_time: multi_agent.execution_time(),
            multi_agent,
        }
    }

    /// 所有任务回到 Pending，清空运行记录
    pub fn reset(&self) {
        self.scheduler.reset();
        lock(&self.status).reset();
    }

    /// 按添加顺序返回每个任务的结果
    pub fn task_results(&self) -> Vec<TaskResult> {
        self.scheduler
            .status()
            .tasks
            .into_iter()
            .map(|t| TaskResult {
                id: t.id,
                state: t.state,
                outputs: t.outputs,
                error: t.error,
                elapsed_secs: t.elapsed_secs,
            })
            .collect()
    }
}

/// 默认任务执行：用任务的 Agent 跑一次非流式会话
pub struct AgentTaskExecutor {
    runtime: Arc<Runtime>,
    options: RunOptions,
}

impl AgentTaskExecutor {
    pub fn new(runtime: Arc<Runtime>, options: RunOptions) -> Self {
        Self { runtime, options }
    }
}

/// 输入中的 messages（消息列表）优先，其次 user_message（单条用户消息）
fn seed_messages(inputs: &Payload) -> Result<Vec<Message>, AgentError> {
    if let Some(messages) = inputs.get("messages") {
        return serde_json::from_value(messages.clone())
            .map_err(|e| AgentError::TaskExecution(format!("invalid messages input: {}", e)));
    }
    Ok(match inputs.get("user_message") {
        Some(Value::String(text)) => vec![Message::user(text.clone())],
        Some(other) => vec![Message::user(other.to_string())],
        None => Vec::new(),
    })
}

fn upstream_context(outputs: &[(TaskId, Payload)]) -> Option<String> {
    if outputs.is_empty() {
        return None;
    }
    let mut text = String::from("以下是前置任务的输出，请结合这些信息完成当前任务：");
    for (id, payload) in outputs {
        let body = match payload.get("content") {
            Some(Value::String(content)) => content.clone(),
            _ => Value::Object(payload.clone()).to_string(),
        };
        text.push_str(&format!("\n\n[{}]\n{}", id, body));
    }
    Some(text)
}

#[async_trait]
impl TaskExecutor for AgentTaskExecutor {
    async fn execute(&self, ctx: TaskContext) -> Result<Payload, String> {
        let id = ctx.id.clone();
        self.run_task(ctx).await.map_err(|e| {
            tracing::warn!(task = %id, error = %e, "agent task failed");
            e.to_string()
        })
    }
}

impl AgentTaskExecutor {
    async fn run_task(&self, ctx: TaskContext) -> Result<Payload, AgentError> {
        let agent = ctx
            .agent
            .clone()
            .ok_or_else(|| AgentError::TaskExecution(format!("task '{}' has no agent", ctx.id)))?;

        let mut messages = seed_messages(&ctx.inputs)?;
        if let Some(context) = upstream_context(&ctx.dependency_outputs) {
            messages.push(Message::user(context));
        }

        let mut options = self.options.clone();
        options.stream = false;
        if let Some(max_turns) = ctx.inputs.get("max_turns").and_then(Value::as_u64) {
            options.max_turns = max_turns as usize;
        }
        if let Some(raw) = ctx.inputs.get("chat_config") {
            let overrides: ChatConfig =
                serde_json::from_value(raw.clone())
                .map_err(|e| AgentError::TaskExecution(format!("invalid chat_config input: {}", e)))?;
            options.chat_config = Some(match &options.chat_config {
                Some(base) => base.merge(&overrides),
                None => overrides,
            });
        }

        let outcome = self
            .runtime
            .run(&agent, messages, &options, None)
            .await?;

        let mut out = Payload::new();
        out.insert("task_id".to_string(), json!(ctx.id));
        out.insert("agent_name".to_string(), json!(agent.name()));
        out.insert("content".to_string(), json!(outcome.content));
        out.insert("success".to_string(), json!(true));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::llm::mock::ScriptedLlmClient;

    fn multi(client: Arc<ScriptedLlmClient>) -> MultiAgentRuntime {
        let runtime = Runtime::new(client, RuntimeConfig::default()).unwrap();
        MultiAgentRuntime::new(Arc::new(runtime), SchedulerOptions::default(), RunOptions::default())
    }

    fn inputs(message: &str) -> Payload {
        let mut p = Payload::new();
        p.insert("user_message".to_string(), json!(message));
        p
    }

    #[tokio::test]
    async fn test_upstream_output_reaches_dependent() {
        let client = Arc::new(ScriptedLlmClient::new());
        let rt = multi(Arc::clone(&client));
        let collector = Agent::builder("collector").build().unwrap();
        let reporter = Agent::builder("reporter").build().unwrap();
        rt.add_agent_task("collect", collector, &[], inputs("gather data"), 0, None).unwrap();
        rt.add_agent_task("report", reporter, &["collect"], inputs("write report"), 0, None).unwrap();

        let events: Vec<MultiAgentEvent> = rt.run().collect().await;
        assert_eq!(events.first(), Some(&MultiAgentEvent::Start { total: 2 }));
        assert_eq!(events.last(), Some(&MultiAgentEvent::Completed));

        let results = rt.task_results();
        assert_eq!(results[0].outputs["content"], "Echo from Mock: gather data");
        assert_eq!(results[1].outputs["agent_name"], "reporter");
        assert!(results[1].outputs["content"].as_str().unwrap().contains("gather data"));
        assert!(client.requests().iter().all(|r| !r.stream));

        let snapshot = rt.status();
        assert_eq!(snapshot.summary.completed, 2);
        assert_eq!(snapshot.summary.completion_rate, 1.0);
        assert_eq!(snapshot.multi_agent.dag_status, DagRunState::Completed);
        assert_eq!(snapshot.scheduler.completed, 2);
    }

    #[tokio::test]
    async fn test_invalid_graph_yields_single_error() {
        let client = Arc::new(ScriptedLlmClient::new());
        let rt = multi(Arc::clone(&client));
        let agent = Agent::builder("a").build().unwrap();
        rt.add_agent_task("x", agent, &["ghost"], Payload::new(), 0, None).unwrap();

        let events: Vec<MultiAgentEvent> = rt.run().collect().await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], MultiAgentEvent::Error { .. }));
        assert_eq!(client.request_count(), 0);
        assert_eq!(rt.status().multi_agent.dag_status, DagRunState::Failed);
    }

    #[tokio::test]
    async fn test_missing_agent_fails_and_skips_dependents() {
        let client = Arc::new(ScriptedLlmClient::new());
        let rt = multi(client);
        rt.add_task(Task::new("bare")).unwrap();
        let agent = Agent::builder("after").build().unwrap();
        rt.add_agent_task("after", agent, &["bare"], inputs("x"), 0, None).unwrap();

        let events: Vec<MultiAgentEvent> = rt.run().collect().await;
        assert_eq!(
            events.last(),
            Some(&MultiAgentEvent::CompletedWithErrors {
                failed_ids: vec!["bare".to_string()]
            })
        );
        let summary = rt.status().summary;
        assert_eq!((summary.failed, summary.skipped, summary.completed), (1, 1, 0));
        let bare = rt.task_results().into_iter().find(|r| r.id == "bare").unwrap();
        assert_eq!(bare.error.as_deref(), Some("Task execution failed: task 'bare' has no agent"));

        rt.reset();
        let snapshot = rt.status();
        assert_eq!(snapshot.summary.pending, 2);
        assert_eq!(snapshot.scheduler.pending, 2);
    }

    #[test]
    fn test_seed_messages() {
        let mut p = Payload::new();
        p.insert("messages".to_string(), json!([{"role": "user", "content": "hi"}]));
        p.insert("user_message".to_string(), json!("ignored"));
        let seeded = seed_messages(&p).unwrap();
        assert_eq!(seeded, vec![Message::user("hi")]);
        assert!(seed_messages(&Payload::new()).unwrap().is_empty());

        let ctx = upstream_context(&[("collect".to_string(), {
            let mut out = Payload::new();
            out.insert("content".to_string(), json!("42 rows"));
            out
        })])
        .unwrap();
        assert!(ctx.contains("[collect]") && ctx.contains("42 rows"));
    }

    #[test]
    fn test_event_serialization() {
        let v = serde_json::to_value(MultiAgentEvent::Dag(DagEvent::TaskStarted { id: "a".to_string() })).unwrap();
        assert_eq!(v["event"], "dag");
        assert_eq!(v["data"]["event"], "task-started");
        let done = serde_json::to_value(MultiAgentEvent::CompletedWithErrors {
            failed_ids: vec!["a".to_string()],
        })
        .unwrap();
        assert_eq!(done["event"], "multi-agent-completed-with-errors");
        assert_eq!(done["data"]["failedIds"], json!(["a"]));
    }
}
