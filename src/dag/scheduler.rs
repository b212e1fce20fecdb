//! DAG 调度器
//!
//! 校验依赖图后，按优先级把可执行任务提交到有界并发池，以惰性事件流的形式汇报进度：
//! dag-start、task-started、task-completed / task-failed / task-skipped，最后是
//! dag-completed 或 dag-completed-with-errors。
//!
//! 所有状态变更都在同一把锁下完成；任务本身在 tokio 任务中执行，panic 与超时都转为 task-failed。
//! 某个任务失败不会影响兄弟任务与独立分支；当既无运行中任务也无可执行任务时，
//! 失败任务的下游被标记为 Skipped，运行随即结束。

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::stream::{self, BoxStream, FuturesUnordered};
use futures_util::{FutureExt, StreamExt};
use tokio::task::JoinError;

use crate::config::SchedulerSection;
use crate::dag::graph::DagGraph;
use crate::dag::types::*;

/// 任务执行器：每个任务调用一次，返回输出或错误信息
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, ctx: TaskContext) -> Result<Payload, String>;
}

struct FnExecutor<F>(F);

#[async_trait]
impl<F, Fut> TaskExecutor for FnExecutor<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Payload, String>> + Send + 'static,
{
    async fn execute(&self, ctx: TaskContext) -> Result<Payload, String> {
        (self.0)(ctx).await
    }
}

/// 由闭包构造任务执行器
pub fn task_fn<F, Fut>(f: F) -> Arc<dyn TaskExecutor>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Payload, String>> + Send + 'static,
{
    Arc::new(FnExecutor(f))
}

/// 调度参数
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// 同时执行的任务数上限
    pub max_parallelism: usize,
    /// 等待任务结束的单次超时，超时后重新检查状态
    pub wait_timeout: Duration,
    /// 是否强制执行任务的 timeout
    pub enforce_timeouts: bool,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self::from(&SchedulerSection::default())
    }
}

impl From<&SchedulerSection> for SchedulerOptions {
    fn from(cfg: &SchedulerSection) -> Self {
        Self {
            max_parallelism: cfg.max_parallelism.max(1),
            wait_timeout: Duration::from_millis(cfg.wait_timeout_ms.max(1)),
            enforce_timeouts: cfg.enforce_timeouts,
        }
    }
}

/// DAG 调度器
#[derive(Clone)]
pub struct DagScheduler {
    graph: Arc<Mutex<DagGraph>>,
    options: SchedulerOptions,
}

impl Default for DagScheduler {
    fn default() -> Self {
        Self::new(SchedulerOptions::default())
    }
}

fn lock(graph: &Mutex<DagGraph>) -> MutexGuard<'_, DagGraph> {
    graph.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DagScheduler {
    pub fn new(options: SchedulerOptions) -> Self {
        Self {
            graph: Arc::new(Mutex::new(DagGraph::new())),
            options,
        }
    }

    pub fn options(&self) -> &SchedulerOptions {
        &self.options
    }

    pub fn add_task(&self, task: Task) -> Result<(), SchedulerError> {
        let id = task.id.clone();
        lock(&self.graph).add(task)?;
        tracing::debug!(task = %id, "Task added");
        Ok(())
    }

    pub fn len(&self) -> usize {
        lock(&self.graph).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.graph).is_empty()
    }

    /// 依赖图是否合法（无悬空依赖、无环）
    pub fn validate(&self) -> bool {
        self.try_validate().is_ok()
    }

    /// 同 validate，失败时给出原因
    pub fn try_validate(&self) -> Result<(), SchedulerError> {
        lock(&self.graph).validate()
    }

    /// 全部任务回到 Pending
    pub fn reset(&self) {
        lock(&self.graph).reset();
    }

    pub fn status(&self) -> SchedulerStatus {
        lock(&self.graph).status()
    }

    pub fn task(&self, id: &str) -> Result<TaskView, SchedulerError> {
        lock(&self.graph)
            .get(id)
            .map(Task::view)
            .ok_or_else(|| SchedulerError::TaskNotFound(id.to_string()))
    }

    /// 校验后开始运行，返回惰性事件流；流被消费时才提交任务。
    /// 校验失败时不执行任何任务；上一次运行留下的状态须先 reset。
    /// 事件流结束或被丢弃之前，同一调度器上的其他 run 都会被拒绝。
    pub fn run(&self, executor: Arc<dyn TaskExecutor>) -> Result<BoxStream<'static, DagEvent>, SchedulerError> {
        let run_id = {
            let mut graph = lock(&self.graph);
            if let Err(e) = graph.validate() {
                tracing::error!("DAG validation failed: {}", e);
                return Err(e);
            }
            graph.begin_run()?
        };

        let run = DagRun {
            run_id,
            graph: Arc::clone(&self.graph),
            executor,
            options: self.options.clone(),
            in_flight: FuturesUnordered::new(),
            events: VecDeque::new(),
            phase: Phase::Start,
        };
        Ok(stream::unfold(run, |mut run| async move { run.step().await.map(|ev| (ev, run)) }).boxed())
    }

    /// 运行到结束并收集全部事件
    pub async fn run_to_end(&self, executor: Arc<dyn TaskExecutor>) -> Result<Vec<DagEvent>, SchedulerError> {
        Ok(self.run(executor)?.collect().await)
    }
}

type Finished = (TaskId, Result<Result<Payload, String>, JoinError>);

enum Phase {
    Start,
    Running,
    Done,
}

/// 一次运行的状态；丢弃时释放运行权
struct DagRun {
    run_id: u64,
    graph: Arc<Mutex<DagGraph>>,
    executor: Arc<dyn TaskExecutor>,
    options: SchedulerOptions,
    in_flight: FuturesUnordered<BoxFuture<'static, Finished>>,
    events: VecDeque<DagEvent>,
    phase: Phase,
}

impl DagRun {
    /// 产出下一个事件；None 表示运行结束
    async fn step(&mut self) -> Option<DagEvent> {
        loop {
            match self.phase {
                Phase::Done => return None,
                Phase::Start => {
                    self.phase = Phase::Running;
                    let total = lock(&self.graph).len();
                    tracing::info!(total, "DAG run started");
                    return Some(DagEvent::DagStart { total });
                }
                Phase::Running => {}
            }

            if let Some(ev) = self.events.pop_front() {
                return Some(ev);
            }

            self.submit();
            while let Some(Some(done)) = self.in_flight.next().now_or_never() {
                self.record(done);
            }
            if !self.events.is_empty() {
                continue;
            }

            if let Some(terminal) = self.finish_if_done() {
                self.phase = Phase::Done;
                lock(&self.graph).end_run(self.run_id);
                return Some(terminal);
            }

            if self.in_flight.is_empty() {
                // 无运行中任务、无可执行任务：剩下的都在失败任务的下游
                self.skip_unreachable();
                continue;
            }

            match tokio::time::timeout(self.options.wait_timeout, self.in_flight.next()).await {
                Ok(Some(done)) => self.record(done),
                Ok(None) => {}
                Err(_) => tracing::debug!(running = self.in_flight.len(), "Waiting for running tasks"),
            }
        }
    }

    /// 在空闲槽位内提交可执行任务；标记 Running 与提交在同一把锁下完成
    fn submit(&mut self) {
        let free = self.options.max_parallelism.saturating_sub(self.in_flight.len());
        if free == 0 {
            return;
        }
        let mut graph = lock(&self.graph);
        for id in graph.executable().into_iter().take(free) {
            let dependency_outputs = graph.dependency_outputs(&id);
            let Some(task) = graph.get_mut(&id) else {
                continue;
            };
            if let Err(e) = task.start() {
                tracing::error!("{}", e);
                continue;
            }
            let ctx = TaskContext {
                id: id.clone(),
                agent: task.agent.clone(),
                inputs: task.inputs.clone(),
                dependency_outputs,
            };
            let limit = task.timeout.filter(|_| self.options.enforce_timeouts);
            let handle = tokio::spawn(execute_task(Arc::clone(&self.executor), ctx, limit));

            tracing::info!(task = %id, "Task started");
            let task_id = id.clone();
            self.in_flight.push(async move { (task_id, handle.await) }.boxed());
            self.events.push_back(DagEvent::TaskStarted { id });
        }
    }

    fn record(&mut self, (id, joined): Finished) {
        let outcome = match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(format!("task panicked: {}", panic_message(e.into_panic()))),
            Err(e) => Err(format!("task aborted: {}", e)),
        };

        let mut graph = lock(&self.graph);
        let Some(task) = graph.get_mut(&id) else {
            tracing::error!(task = %id, "Finished task is missing from the graph");
            return;
        };
        let event = match outcome {
            Ok(outputs) => {
                let result = outputs.clone();
                task.complete(outputs).map(|_| {
                    tracing::info!(task = %id, "Task completed");
                    DagEvent::TaskCompleted { id: id.clone(), result }
                })
            }
            Err(error) => task.fail(error.clone()).map(|_| {
                tracing::warn!(task = %id, error = %error, "Task failed");
                DagEvent::TaskFailed { id: id.clone(), error }
            }),
        };
        match event {
            Ok(ev) => self.events.push_back(ev),
            Err(e) => tracing::error!("{}", e),
        }
    }

    fn skip_unreachable(&mut self) {
        let skipped = lock(&self.graph).skip_unreachable();
        for (id, reason) in skipped {
            tracing::warn!(task = %id, reason = %reason, "Task skipped");
            self.events.push_back(DagEvent::TaskSkipped { id, reason });
        }
    }

    fn finish_if_done(&self) -> Option<DagEvent> {
        let graph = lock(&self.graph);
        if graph.finished() < graph.len() {
            return None;
        }
        let failed_ids = graph.failed_ids();
        let skipped = graph.count(TaskState::Skipped);
        if failed_ids.is_empty() && skipped == 0 {
            tracing::info!(total = graph.len(), "DAG run completed");
            Some(DagEvent::DagCompleted)
        } else {
            tracing::warn!(failed = ?failed_ids, skipped, "DAG run completed with errors");
            Some(DagEvent::DagCompletedWithErrors { failed_ids })
        }
    }
}

impl Drop for DagRun {
    fn drop(&mut self) {
        lock(&self.graph).end_run(self.run_id);
    }
}

async fn execute_task(executor: Arc<dyn TaskExecutor>, ctx: TaskContext, limit: Option<Duration>) -> Result<Payload, String> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, executor.execute(ctx))
            .await
            .unwrap_or_else(|_| Err(format!("task timed out after {:.1}s", limit.as_secs_f64()))),
        None => executor.execute(ctx).await,
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::builder::TaskBuilder;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn scheduler(tasks: Vec<Task>) -> DagScheduler {
        let s = DagScheduler::new(SchedulerOptions {
            max_parallelism: 4,
            wait_timeout: Duration::from_millis(50),
            enforce_timeouts: true,
        });
        for t in tasks {
            s.add_task(t).unwrap();
        }
        s
    }

    /// 记录调用顺序；id 以 "fail" 开头的任务失败
    fn recording_executor(calls: Arc<Mutex<Vec<String>>>) -> Arc<dyn TaskExecutor> {
        task_fn(move |ctx: TaskContext| {
            let calls = Arc::clone(&calls);
            async move {
                calls.lock().unwrap().push(ctx.id.clone());
                tokio::time::sleep(Duration::from_millis(5)).await;
                if ctx.id.starts_with("fail") {
                    return Err(format!("{} exploded", ctx.id));
                }
                let mut out = Payload::new();
                out.insert("done".to_string(), json!(ctx.id));
                Ok(out)
            }
        })
    }

    fn labels(events: &[DagEvent]) -> Vec<String> {
        events
            .iter()
            .map(|e| {
                let v = serde_json::to_value(e).unwrap();
                match e.task_id() {
                    Some(id) => format!("{}:{}", v["event"].as_str().unwrap(), id),
                    None => v["event"].as_str().unwrap().to_string(),
                }
            })
            .collect()
    }

    #[tokio::test]
    async fn test_dependency_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let s = scheduler(vec![
            TaskBuilder::new("A").build(),
            TaskBuilder::new("B").depends_on("A").build(),
        ]);
        let events = s.run_to_end(recording_executor(Arc::clone(&calls))).await.unwrap();
        assert_eq!(*calls.lock().unwrap(), vec!["A", "B"]);
        assert_eq!(
            labels(&events),
            vec![
                "dag-start",
                "task-started:A",
                "task-completed:A",
                "task-started:B",
                "task-completed:B",
                "dag-completed"
            ]
        );
    }

    #[tokio::test]
    async fn test_failure_skips_dependents() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let s = scheduler(vec![
            TaskBuilder::new("fail_A").build(),
            TaskBuilder::new("B").depends_on("fail_A").build(),
            TaskBuilder::new("C").build(),
        ]);
        let events = s.run_to_end(recording_executor(Arc::clone(&calls))).await.unwrap();

        assert!(!calls.lock().unwrap().contains(&"B".to_string()));
        assert!(events.contains(&DagEvent::TaskFailed {
            id: "fail_A".to_string(),
            error: "fail_A exploded".to_string()
        }));
        assert!(!labels(&events).contains(&"task-started:B".to_string()));
        assert!(labels(&events).contains(&"task-completed:C".to_string()));
        assert_eq!(
            events.last(),
            Some(&DagEvent::DagCompletedWithErrors {
                failed_ids: vec!["fail_A".to_string()]
            })
        );

        let status = s.status();
        assert_eq!((status.completed, status.failed, status.skipped), (1, 1, 1));
        assert_eq!(status.completed + status.failed + status.skipped, status.total);
    }

    #[tokio::test]
    async fn test_invalid_graph_runs_nothing() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let s = scheduler(vec![
            TaskBuilder::new("a").depends_on("b").build(),
            TaskBuilder::new("b").depends_on("a").build(),
        ]);
        assert!(!s.validate());
        assert!(s.run(recording_executor(Arc::clone(&calls))).is_err());
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bounded_parallelism_and_priority() {
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let order = Arc::new(Mutex::new(Vec::new()));
        let executor = {
            let (current, peak, order) = (Arc::clone(&current), Arc::clone(&peak), Arc::clone(&order));
            task_fn(move |ctx: TaskContext| {
                let (current, peak, order) = (Arc::clone(&current), Arc::clone(&peak), Arc::clone(&order));
                async move {
                    order.lock().unwrap().push(ctx.id.clone());
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok::<Payload, String>(Payload::new())
                }
            })
        };

        let s = DagScheduler::new(SchedulerOptions {
            max_parallelism: 2,
            wait_timeout: Duration::from_millis(50),
            enforce_timeouts: true,
        });
        for (id, priority) in [("p1", 1), ("p9", 9), ("p5", 5), ("p0", 0), ("p7", 7)] {
            s.add_task(TaskBuilder::new(id).priority(priority).build()).unwrap();
        }
        let events = s.run_to_end(executor).await.unwrap();

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(order.lock().unwrap()[..2], ["p9".to_string(), "p7".to_string()]);
        assert_eq!(events.last(), Some(&DagEvent::DagCompleted));
    }

    #[tokio::test]
    async fn test_timeout_and_panic_become_failures() {
        let executor = task_fn(|ctx: TaskContext| async move {
            match ctx.id.as_str() {
                "slow" => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok::<Payload, String>(Payload::new())
                }
                "panics" => panic!("kaboom"),
                _ => Ok(Payload::new()),
            }
        });
        let s = scheduler(vec![
            TaskBuilder::new("slow").timeout(Duration::from_millis(30)).build(),
            TaskBuilder::new("panics").build(),
            TaskBuilder::new("fine").build(),
        ]);
        let events = s.run_to_end(executor).await.unwrap();

        let slow = s.task("slow").unwrap();
        assert_eq!(slow.state, TaskState::Failed);
        assert!(slow.error.unwrap().contains("timed out"));
        assert!(s.task("panics").unwrap().error.unwrap().contains("kaboom"));
        assert_eq!(s.task("fine").unwrap().state, TaskState::Completed);
        assert_eq!(s.task("ghost").unwrap_err(), SchedulerError::TaskNotFound("ghost".to_string()));
        match events.last() {
            Some(DagEvent::DagCompletedWithErrors { failed_ids }) => {
                assert_eq!(failed_ids, &vec!["slow".to_string(), "panics".to_string()])
            }
            other => panic!("unexpected terminal event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reset_reproduces_run() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let s = scheduler(vec![
            TaskBuilder::new("A").build(),
            TaskBuilder::new("B").depends_on("A").build(),
        ]);
        let first = s.run_to_end(recording_executor(Arc::clone(&calls))).await.unwrap();
        assert!(matches!(s.run(recording_executor(Arc::clone(&calls))), Err(SchedulerError::NotReset(_))));

        s.reset();
        for view in s.status().tasks {
            assert_eq!(view.state, TaskState::Pending);
            assert!(view.started_at.is_none() && view.ended_at.is_none());
        }
        let second = s.run_to_end(recording_executor(Arc::clone(&calls))).await.unwrap();
        assert_eq!(labels(&first), labels(&second));
        assert_eq!(*calls.lock().unwrap(), vec!["A", "B", "A", "B"]);
    }

    #[tokio::test]
    async fn test_second_run_rejected_while_first_is_live() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let s = scheduler(vec![
            TaskBuilder::new("A").build(),
            TaskBuilder::new("B").depends_on("A").build(),
        ]);
        let mut first = s.run(recording_executor(Arc::clone(&calls))).unwrap();
        assert!(matches!(
            s.run(recording_executor(Arc::clone(&calls))),
            Err(SchedulerError::RunInProgress)
        ));

        assert_eq!(first.next().await, Some(DagEvent::DagStart { total: 2 }));
        assert_eq!(first.next().await, Some(DagEvent::TaskStarted { id: "A".to_string() }));
        assert!(matches!(
            s.run(recording_executor(Arc::clone(&calls))),
            Err(SchedulerError::RunInProgress)
        ));
        assert_eq!(s.task("B").unwrap().state, TaskState::Pending);

        let rest: Vec<DagEvent> = first.collect().await;
        assert_eq!(rest.last(), Some(&DagEvent::DagCompleted));
        assert_eq!(s.status().skipped, 0);
        assert!(matches!(
            s.run(recording_executor(Arc::clone(&calls))),
            Err(SchedulerError::NotReset(_))
        ));
    }

    #[tokio::test]
    async fn test_dropping_stream_releases_run() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let s = scheduler(vec![TaskBuilder::new("A").build()]);
        let unused = s.run(recording_executor(Arc::clone(&calls))).unwrap();
        drop(unused);

        let events = s.run_to_end(recording_executor(Arc::clone(&calls))).await.unwrap();
        assert_eq!(events.last(), Some(&DagEvent::DagCompleted));
        assert_eq!(*calls.lock().unwrap(), vec!["A"]);
    }

    #[tokio::test]
    async fn test_dependency_outputs_are_passed_downstream() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let executor = {
            let seen = Arc::clone(&seen);
            task_fn(move |ctx: TaskContext| {
                let seen = Arc::clone(&seen);
                async move {
                    let upstream: Vec<String> = ctx.dependency_outputs.iter().map(|(id, _)| id.clone()).collect();
                    seen.lock().unwrap().push((ctx.id.clone(), upstream));
                    let mut out = Payload::new();
                    out.insert("value".to_string(), json!(ctx.id));
                    Ok::<Payload, String>(out)
                }
            })
        };
        let s = scheduler(vec![
            TaskBuilder::new("a").build(),
            TaskBuilder::new("b").build(),
            TaskBuilder::new("c").depends_on("a").depends_on("b").depends_on("a").build(),
        ]);
        s.run_to_end(executor).await.unwrap();
        let seen = seen.lock().unwrap();
        let c = seen.iter().find(|(id, _)| id == "c").unwrap();
        assert_eq!(c.1, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_empty_graph_completes() {
        let s = DagScheduler::default();
        let events = s.run_to_end(task_fn(|_ctx: TaskContext| async { Ok::<Payload, String>(Payload::new()) })).await.unwrap();
        assert_eq!(events, vec![DagEvent::DagStart { total: 0 }, DagEvent::DagCompleted]);
    }
}
