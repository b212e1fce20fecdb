//! 运行状态记录
//!
//! RuntimeStatus 记录单个 Agent 运行的对话轮次与工具调用；
//! MultiAgentStatus 记录一次 DAG 运行中的任务状态变化。两者都只追加，不参与调度决策。

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::message::ToolCall;
use crate::dag::types::{TaskId, TaskState};
use crate::runtime::choice::Choice;
use crate::tools::result::ToolResult;

/// 一轮对话
#[derive(Debug, Clone, Serialize)]
pub struct ChatRecord {
    pub agent: String,
    pub turn: usize,
    pub model: String,
    /// 本轮请求的上下文消息数
    pub message_count: usize,
    pub choice: Choice,
    pub timestamp: DateTime<Utc>,
}

/// 一次工具调用
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallRecord {
    pub agent: String,
    pub call: ToolCall,
    pub result: ToolResult,
    pub timestamp: DateTime<Utc>,
}

/// 单个 Agent 运行（含嵌套委派）的历史
#[derive(Debug, Clone, Default, Serialize)]
pub struct RuntimeStatus {
    pub chat_history: Vec<ChatRecord>,
    pub tool_calls_history: Vec<ToolCallRecord>,
    pub tool_error_history: Vec<ToolCallRecord>,
    /// 成功调用过的工具 / 委派名称，按调用顺序
    pub tools_called: Vec<String>,
}

impl RuntimeStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_chat(&mut self, agent: &str, turn: usize, model: &str, message_count: usize, choice: &Choice) {
        self.chat_history.push(ChatRecord {
            agent: agent.to_string(),
            turn,
            model: model.to_string(),
            message_count,
            choice: choice.clone(),
            timestamp: Utc::now(),
        });
    }

    /// 记录调用；失败的调用同时进入错误历史
    pub fn add_tool_call(&mut self, agent: &str, call: &ToolCall, result: &ToolResult) {
        let record = ToolCallRecord {
            agent: agent.to_string(),
            call: call.clone(),
            result: result.clone(),
            timestamp: Utc::now(),
        };
        if !result.success {
            self.tool_error_history.push(record.clone());
        }
        self.tool_calls_history.push(record);
    }

    pub fn add_tool_called(&mut self, name: &str) {
        self.tools_called.push(name.to_string());
    }

    /// 并入嵌套运行的历史
    pub fn absorb(&mut self, other: RuntimeStatus) {
        self.chat_history.extend(other.chat_history);
        self.tool_calls_history.extend(other.tool_calls_history);
        self.tool_error_history.extend(other.tool_error_history);
        self.tools_called.extend(other.tools_called);
    }
}

/// DAG 运行的整体状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DagRunState {
    #[default]
    NotStarted,
    Running,
    Completed,
    CompletedWithErrors,
    /// 校验失败，未执行任何任务
    Failed,
}

/// 一次任务状态变化
#[derive(Debug, Clone, Serialize)]
pub struct TaskTransition {
    pub task_id: TaskId,
    pub agent_name: Option<String>,
    pub old_state: TaskState,
    pub new_state: TaskState,
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// 任务计数摘要
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub active: usize,
    pub pending: usize,
    /// completed / total；没有任务时为 0
    pub completion_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
struct TrackedTask {
    id: TaskId,
    agent_name: Option<String>,
    state: TaskState,
}

/// 多 Agent 运行状态
#[derive(Debug, Clone, Default, Serialize)]
pub struct MultiAgentStatus {
    pub dag_status: DagRunState,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    tasks: Vec<TrackedTask>,
    pub task_history: Vec<TaskTransition>,
    pub active_tasks: Vec<TaskId>,
    pub completed_tasks: Vec<TaskId>,
    pub failed_tasks: Vec<TaskId>,
    pub skipped_tasks: Vec<TaskId>,
}

fn remove_id(list: &mut Vec<TaskId>, id: &str) {
    list.retain(|t| t != id);
}

fn push_unique(list: &mut Vec<TaskId>, id: &str) {
    if !list.iter().any(|t| t == id) {
        list.push(id.to_string());
    }
}

impl MultiAgentStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_task(&mut self, id: &str, agent_name: Option<&str>) {
        if self.tasks.iter().any(|t| t.id == id) {
            return;
        }
        self.tasks.push(TrackedTask {
            id: id.to_string(),
            agent_name: agent_name.map(String::from),
            state: TaskState::Pending,
        });
    }

    /// 记录状态变化并维护 active / completed / failed / skipped 列表；未知任务忽略
    pub fn update_task_state(&mut self, id: &str, state: TaskState, detail: Option<String>) {
        let Some(task) = self.tasks.iter_mut().find(|t| t.id == id) else {
            return;
        };
        let old_state = task.state;
        task.state = state;
        self.task_history.push(TaskTransition {
            task_id: id.to_string(),
            agent_name: task.agent_name.clone(),
            old_state,
            new_state: state,
            detail,
            timestamp: Utc::now(),
        });

        match state {
            TaskState::Running => push_unique(&mut self.active_tasks, id),
            TaskState::Completed => {
                remove_id(&mut self.active_tasks, id);
                push_unique(&mut self.completed_tasks, id);
            }
            TaskState::Failed => {
                remove_id(&mut self.active_tasks, id);
                push_unique(&mut self.failed_tasks, id);
            }
            TaskState::Skipped => push_unique(&mut self.skipped_tasks, id),
            TaskState::Pending => {}
        }
    }

    pub fn start_execution(&mut self) {
        self.dag_status = DagRunState::Running;
        self.start_time = Some(Utc::now());
        self.end_time = None;
    }

    pub fn end_execution(&mut self, state: DagRunState) {
        self.dag_status = state;
        self.end_time = Some(Utc::now());
    }

    pub fn summary(&self) -> TaskSummary {
        let total = self.tasks.len();
        let completed = self.completed_tasks.len();
        let failed = self.failed_tasks.len();
        let skipped = self.skipped_tasks.len();
        let active = self.active_tasks.len();
        TaskSummary {
            total,
            completed,
            failed,
            skipped,
            active,
            pending: total.saturating_sub(completed + failed + skipped + active),
            completion_rate: if total > 0 { completed as f64 / total as f64 } else { 0.0 },
        }
    }

    /// 执行耗时（秒）；运行中按当前时间计算
    pub fn execution_time(&self) -> f64 {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => (end - start).num_milliseconds() as f64 / 1000.0,
            (Some(start), None) => (Utc::now() - start).num_milliseconds() as f64 / 1000.0,
            _ => 0.0,
        }
    }

    /// 清空运行期记录，保留任务列表
    pub fn reset(&mut self) {
        self.dag_status = DagRunState::NotStarted;
        self.start_time = None;
        self.end_time = None;
        self.task_history.clear();
        self.active_tasks.clear();
        self.completed_tasks.clear();
        self.failed_tasks.clear();
        self.skipped_tasks.clear();
        for task in &mut self.tasks {
            task.state = TaskState::Pending;
        }
    }
}
