//! DAG 任务调度：任务状态机、依赖图校验、有界并发执行与事件流

pub mod builder;
pub mod graph;
pub mod scheduler;
pub mod types;

pub use builder::TaskBuilder;
pub use graph::DagGraph;
pub use scheduler::{task_fn, DagScheduler, SchedulerOptions, TaskExecutor};
pub use types::{
    DagEvent, Payload, SchedulerError, SchedulerStatus, Task, TaskContext, TaskId, TaskState, TaskView,
};
