//! DAG 调度类型定义
//!
//! 定义任务、任务状态机、调度事件、状态快照与错误类型

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::agent::Agent;

pub type TaskId = String;

/// 任务的输入 / 输出载荷（不透明的键值表）
pub type Payload = Map<String, Value>;

/// 任务状态
///
/// Pending -> Running -> Completed | Failed；上游失败导致永远无法就绪的任务 Pending -> Skipped。
/// 终态不可再迁移，只能通过 reset 回到 Pending。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// 等待调度
    Pending,
    /// 正在执行
    Running,
    /// 已完成
    Completed,
    /// 失败
    Failed,
    /// 跳过（依赖失败）
    Skipped,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed | TaskState::Skipped)
    }
}

/// 调度单元
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    /// 执行该任务的 Agent；纯函数任务可为空
    pub agent: Option<Agent>,
    /// 依赖的任务 ID（允许重复）
    pub dependencies: Vec<TaskId>,
    pub inputs: Payload,
    pub outputs: Payload,
    /// 越大越先执行
    pub priority: i32,
    pub timeout: Option<Duration>,
    state: TaskState,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    error: Option<String>,
}

impl Task {
    pub fn new(id: impl Into<TaskId>) -> Self {
        Self {
            id: id.into(),
            agent: None,
            dependencies: Vec::new(),
            inputs: Payload::new(),
            outputs: Payload::new(),
            priority: 0,
            timeout: None,
            state: TaskState::Pending,
            started_at: None,
            ended_at: None,
            error: None,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    fn transition(&mut self, from: TaskState, to: TaskState) -> Result<(), SchedulerError> {
        if self.state != from {
            return Err(SchedulerError::InvalidTransition {
                task: self.id.clone(),
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    /// Pending -> Running，记录开始时间
    pub fn start(&mut self) -> Result<(), SchedulerError> {
        self.transition(TaskState::Pending, TaskState::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Running -> Completed，记录结束时间并合并输出
    pub fn complete(&mut self, outputs: Payload) -> Result<(), SchedulerError> {
        self.transition(TaskState::Running, TaskState::Completed)?;
        self.ended_at = Some(Utc::now());
        self.outputs.extend(outputs);
        Ok(())
    }

    /// Running -> Failed，记录结束时间与错误信息
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), SchedulerError> {
        self.transition(TaskState::Running, TaskState::Failed)?;
        self.ended_at = Some(Utc::now());
        self.error = Some(error.into());
        Ok(())
    }

    /// Pending -> Skipped
    pub fn skip(&mut self, reason: impl Into<String>) -> Result<(), SchedulerError> {
        self.transition(TaskState::Pending, TaskState::Skipped)?;
        self.ended_at = Some(Utc::now());
        self.error = Some(reason.into());
        Ok(())
    }

    /// 回到 Pending，清空时间戳、错误与输出
    pub fn reset(&mut self) {
        self.state = TaskState::Pending;
        self.started_at = None;
        self.ended_at = None;
        self.error = None;
        self.outputs.clear();
    }

    /// 执行耗时（秒）；未开始为 None，未结束时按当前时间计算
    pub fn elapsed_secs(&self) -> Option<f64> {
        let start = self.started_at?;
        let end = self.ended_at.unwrap_or_else(Utc::now);
        Some((end - start).num_milliseconds() as f64 / 1000.0)
    }

    pub fn view(&self) -> TaskView {
        TaskView {
            id: self.id.clone(),
            agent: self.agent.as_ref().map(|a| a.name().to_string()),
            dependencies: self.dependencies.clone(),
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
            priority: self.priority,
            timeout_secs: self.timeout.map(|t| t.as_secs_f64()),
            state: self.state,
            started_at: self.started_at.map(|t| t.to_rfc3339()),
            ended_at: self.ended_at.map(|t| t.to_rfc3339()),
            error: self.error.clone(),
            elapsed_secs: self.elapsed_secs(),
        }
    }
}

/// 任务的可序列化视图
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskView {
    pub id: TaskId,
    pub agent: Option<String>,
    pub dependencies: Vec<TaskId>,
    pub inputs: Payload,
    pub outputs: Payload,
    pub priority: i32,
    pub timeout_secs: Option<f64>,
    pub state: TaskState,
    /// RFC 3339
    pub started_at: Option<String>,
    pub ended_at: Option<String>,
    pub error: Option<String>,
    pub elapsed_secs: Option<f64>,
}

/// 调度器状态快照
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerStatus {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub tasks: Vec<TaskView>,
}

/// 交给任务执行器的上下文
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub id: TaskId,
    pub agent: Option<Agent>,
    pub inputs: Payload,
    /// 已完成依赖的输出，按依赖声明顺序（去重）
    pub dependency_outputs: Vec<(TaskId, Payload)>,
}

/// 调度事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum DagEvent {
    DagStart {
        total: usize,
    },
    TaskStarted {
        id: TaskId,
    },
    TaskCompleted {
        id: TaskId,
        result: Payload,
    },
    TaskFailed {
        id: TaskId,
        error: String,
    },
    /// 依赖失败，任务不会再执行
    TaskSkipped {
        id: TaskId,
        reason: String,
    },
    DagCompleted,
    DagCompletedWithErrors {
        #[serde(rename = "failedIds")]
        failed_ids: Vec<TaskId>,
    },
}

impl DagEvent {
    /// 事件关联的任务 ID
    pub fn task_id(&self) -> Option<&str> {
        match self {
            DagEvent::TaskStarted { id }
            | DagEvent::TaskCompleted { id, .. }
            | DagEvent::TaskFailed { id, .. }
            | DagEvent::TaskSkipped { id, .. } => Some(id),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DagEvent::DagCompleted | DagEvent::DagCompletedWithErrors { .. })
    }
}

/// 调度错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchedulerError {
    #[error("Task '{0}' already exists")]
    DuplicateTask(TaskId),
    #[error("Task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: TaskId, dependency: TaskId },
    #[error("Cyclic dependency detected at task '{0}'")]
    CyclicDependency(TaskId),
    #[error("Task '{0}' not found")]
    TaskNotFound(TaskId),
    #[error("Task '{task}' cannot move from {from:?} to {to:?}")]
    InvalidTransition { task: TaskId, from: TaskState, to: TaskState },
    /// 上一次运行的状态未清理，需要先 reset
    #[error("Task '{0}' is not pending; call reset() before running again")]
    NotReset(TaskId),
    #[error("A run is already in progress on this scheduler")]
    RunInProgress,
}
