//! 任务构建器
//!
//! 提供流畅的API来构建任务

use std::time::Duration;

use serde_json::Value;

use crate::agent::Agent;
use crate::dag::types::{Payload, Task, TaskId};

/// 任务构建器
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new(id: impl Into<TaskId>) -> Self {
        Self { task: Task::new(id) }
    }

    /// 自动生成 ID（task_<uuid>）
    pub fn anonymous() -> Self {
        Self::new(format!("task_{}", uuid::Uuid::new_v4()))
    }

    /// 设置执行任务的 Agent
    pub fn agent(mut self, agent: Agent) -> Self {
        self.task.agent = Some(agent);
        self
    }

    /// 追加一个依赖
    pub fn depends_on(mut self, id: impl Into<TaskId>) -> Self {
        self.task.dependencies.push(id.into());
        self
    }

    /// 追加多个依赖
    pub fn depends_on_all<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskId>,
    {
        self.task.dependencies.extend(ids.into_iter().map(Into::into));
        self
    }

    /// 设置一个输入项
    pub fn input(mut self, key: impl Into<String>, value: Value) -> Self {
        self.task.inputs.insert(key.into(), value);
        self
    }

    /// 替换全部输入
    pub fn inputs(mut self, inputs: Payload) -> Self {
        self.task.inputs = inputs;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.task.priority = priority;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.task.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}
