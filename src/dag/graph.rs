//! 任务依赖图
//!
//! 按插入顺序保存任务，并维护邻接表（任务 ID -> 依赖它的任务列表）。
//! 校验使用迭代式 DFS（visited + on_stack），可执行集合按优先级稳定排序。

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet, VecDeque};

use crate::dag::types::*;

/// 任务依赖图
#[derive(Debug, Default)]
pub struct DagGraph {
    tasks: Vec<Task>,
    index: HashMap<TaskId, usize>,
    /// 邻接表：任务 ID -> 依赖该任务的任务列表
    dependents: HashMap<TaskId, Vec<TaskId>>,
    /// 正在进行的运行编号
    active_run: Option<u64>,
    next_run: u64,
}

impl DagGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, task: Task) -> Result<(), SchedulerError> {
        if self.index.contains_key(&task.id) {
            return Err(SchedulerError::DuplicateTask(task.id));
        }
        let mut seen = HashSet::new();
        for dep in &task.dependencies {
            if seen.insert(dep.as_str()) {
                self.dependents.entry(dep.clone()).or_default().push(task.id.clone());
            }
        }
        self.index.insert(task.id.clone(), self.tasks.len());
        self.tasks.push(task);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.index.get(id).map(|&i| &self.tasks[i])
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Task> {
        let i = *self.index.get(id)?;
        Some(&mut self.tasks[i])
    }

    /// 按插入顺序遍历
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    fn state_of(&self, id: &str) -> Option<TaskState> {
        self.get(id).map(|t| t.state())
    }

    /// 悬空依赖或环都会导致校验失败
    pub fn validate(&self) -> Result<(), SchedulerError> {
        for task in &self.tasks {
            if let Some(dep) = task.dependencies.iter().find(|d| !self.index.contains_key(d.as_str())) {
                return Err(SchedulerError::UnknownDependency {
                    task: task.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }

        let mut visited: HashSet<&str> = HashSet::new();
        let mut on_stack: HashSet<&str> = HashSet::new();
        for root in &self.tasks {
            if visited.contains(root.id.as_str()) {
                continue;
            }
            // 栈元素：(任务, 下一个要访问的依赖下标)
            let mut stack: Vec<(&Task, usize)> = vec![(root, 0)];
            on_stack.insert(root.id.as_str());
            while let Some((task, next)) = stack.pop() {
                match task.dependencies.get(next) {
                    Some(dep_id) => {
                        stack.push((task, next + 1));
                        if on_stack.contains(dep_id.as_str()) {
                            return Err(SchedulerError::CyclicDependency(dep_id.clone()));
                        }
                        if !visited.contains(dep_id.as_str()) {
                            if let Some(dep) = self.get(dep_id) {
                                on_stack.insert(dep.id.as_str());
                                stack.push((dep, 0));
                            }
                        }
                    }
                    None => {
                        on_stack.remove(task.id.as_str());
                        visited.insert(task.id.as_str());
                    }
                }
            }
        }
        Ok(())
    }

    /// 可执行任务：Pending、依赖全部 Completed 且没有依赖处于 Running；
    /// 按优先级降序，同优先级保持插入顺序
    pub fn executable(&self) -> Vec<TaskId> {
        let mut ready: Vec<&Task> = self
            .tasks
            .iter()
            .filter(|t| t.state() == TaskState::Pending)
            .filter(|t| {
                t.dependencies
                    .iter()
                    .all(|d| self.state_of(d) == Some(TaskState::Completed))
            })
            .filter(|t| {
                !t.dependencies
                    .iter()
                    .any(|d| self.state_of(d) == Some(TaskState::Running))
            })
            .collect();
        ready.sort_by_key(|t| Reverse(t.priority));
        ready.into_iter().map(|t| t.id.clone()).collect()
    }

    pub fn count(&self, state: TaskState) -> usize {
        self.tasks.iter().filter(|t| t.state() == state).count()
    }

    /// 已进入终态的任务数
    pub fn finished(&self) -> usize {
        self.tasks.iter().filter(|t| t.state().is_terminal()).count()
    }

    /// 失败任务 ID，按插入顺序
    pub fn failed_ids(&self) -> Vec<TaskId> {
        self.tasks
            .iter()
            .filter(|t| t.state() == TaskState::Failed)
            .map(|t| t.id.clone())
            .collect()
    }

    /// 已完成依赖的输出（依赖去重，按声明顺序）
    pub fn dependency_outputs(&self, id: &str) -> Vec<(TaskId, Payload)> {
        let Some(task) = self.get(id) else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        task.dependencies
            .iter()
            .filter(|d| seen.insert(d.as_str()))
            .filter_map(|d| self.get(d))
            .filter(|d| d.state() == TaskState::Completed)
            .map(|d| (d.id.clone(), d.outputs.clone()))
            .collect()
    }

    /// 把失败任务下游仍为 Pending 的任务全部标记为 Skipped，返回 (任务, 原因)，按发现顺序。
    /// 只在没有任务运行、也没有可执行任务时调用。
    pub fn skip_unreachable(&mut self) -> Vec<(TaskId, String)> {
        let mut skipped = Vec::new();
        let mut queue: VecDeque<TaskId> = self.failed_ids().into();
        while let Some(upstream) = queue.pop_front() {
            let dependents = self.dependents.get(&upstream).cloned().unwrap_or_default();
            for id in dependents {
                let reason = format!("dependency '{}' did not complete", upstream);
                if let Some(task) = self.get_mut(&id) {
                    if task.skip(reason.clone()).is_ok() {
                        skipped.push((id.clone(), reason));
                        queue.push_back(id);
                    }
                }
            }
        }
        // 合法 DAG 中不会剩下 Pending 任务；保证调度循环一定能结束
        for task in self.tasks.iter_mut().filter(|t| t.state() == TaskState::Pending) {
            let reason = "dependencies can never complete".to_string();
            if task.skip(reason.clone()).is_ok() {
                skipped.push((task.id.clone(), reason));
            }
        }
        skipped
    }

    /// 占用运行权。已有运行未结束，或上一次运行的状态未 reset 时拒绝
    pub fn begin_run(&mut self) -> Result<u64, SchedulerError> {
        if self.active_run.is_some() {
            return Err(SchedulerError::RunInProgress);
        }
        if let Some(task) = self.tasks.iter().find(|t| t.state() != TaskState::Pending) {
            return Err(SchedulerError::NotReset(task.id.clone()));
        }
        self.next_run += 1;
        self.active_run = Some(self.next_run);
        Ok(self.next_run)
    }

    /// 释放运行权；编号不匹配（已被释放）时不做任何事
    pub fn end_run(&mut self, run: u64) {
        if self.active_run == Some(run) {
            self.active_run = None;
        }
    }

    pub fn is_running(&self) -> bool {
        self.active_run.is_some()
    }

    /// 全部任务回到 Pending；任务与依赖边保留
    pub fn reset(&mut self) {
        for task in &mut self.tasks {
            task.reset();
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            total: self.tasks.len(),
            pending: self.count(TaskState::Pending),
            running: self.count(TaskState::Running),
            completed: self.count(TaskState::Completed),
            failed: self.count(TaskState::Failed),
            skipped: self.count(TaskState::Skipped),
            tasks: self.tasks.iter().map(|t| t.view()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, deps: &[&str], priority: i32) -> Task {
        let mut t = Task::new(id);
        t.dependencies = deps.iter().map(|d| d.to_string()).collect();
        t.priority = priority;
        t
    }

    fn graph(tasks: Vec<Task>) -> DagGraph {
        let mut g = DagGraph::new();
        for t in tasks {
            g.add(t).unwrap();
        }
        g
    }

    #[test]
    fn test_run_guard() {
        let mut g = graph(vec![task("a", &[], 0)]);
        let first = g.begin_run().unwrap();
        assert_eq!(g.begin_run(), Err(SchedulerError::RunInProgress));
        g.end_run(first);
        assert!(!g.is_running());

        let second = g.begin_run().unwrap();
        g.end_run(first);
        assert!(g.is_running());
        g.end_run(second);

        g.get_mut("a").unwrap().start().unwrap();
        assert_eq!(g.begin_run(), Err(SchedulerError::NotReset("a".to_string())));
        g.reset();
        assert!(g.begin_run().is_ok());
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut g = graph(vec![task("a", &[], 0)]);
        assert_eq!(g.add(task("a", &[], 0)), Err(SchedulerError::DuplicateTask("a".to_string())));
    }

    #[test]
    fn test_validate_detects_cycles() {
        let two = graph(vec![task("a", &["b"], 0), task("b", &["a"], 0)]);
        assert!(matches!(two.validate(), Err(SchedulerError::CyclicDependency(_))));

        let three = graph(vec![task("a", &[], 0), task("b", &["a", "d"], 0), task("c", &["b"], 0), task("d", &["c"], 0)]);
        assert!(matches!(three.validate(), Err(SchedulerError::CyclicDependency(_))));

        let self_loop = graph(vec![task("a", &["a"], 0)]);
        assert!(self_loop.validate().is_err());
    }

    #[test]
    fn test_validate_detects_unknown_dependency() {
        let g = graph(vec![task("a", &["ghost"], 0)]);
        assert_eq!(
            g.validate(),
            Err(SchedulerError::UnknownDependency {
                task: "a".to_string(),
                dependency: "ghost".to_string()
            })
        );
    }

    #[test]
    fn test_validate_accepts_diamond_with_duplicates() {
        let g = graph(vec![
            task("a", &[], 0),
            task("b", &["a"], 0),
            task("c", &["a", "a"], 0),
            task("d", &["b", "c"], 0),
        ]);
        assert!(g.validate().is_ok());
    }

    #[test]
    fn test_executable_orders_by_priority_then_insertion() {
        let mut g = graph(vec![
            task("low", &[], 1),
            task("high", &[], 5),
            task("mid1", &[], 3),
            task("mid2", &[], 3),
            task("child", &["low"], 9),
        ]);
        assert_eq!(g.executable(), vec!["high", "mid1", "mid2", "low"]);

        g.get_mut("low").unwrap().start().unwrap();
        assert!(!g.executable().contains(&"child".to_string()));
        g.get_mut("low").unwrap().complete(Payload::new()).unwrap();
        assert_eq!(g.executable()[0], "child");
    }

    #[test]
    fn test_skip_unreachable_is_transitive() {
        let mut g = graph(vec![
            task("a", &[], 0),
            task("b", &["a"], 0),
            task("c", &["b"], 0),
            task("ok", &[], 0),
        ]);
        for id in ["a", "ok"] {
            g.get_mut(id).unwrap().start().unwrap();
        }
        g.get_mut("a").unwrap().fail("boom").unwrap();
        g.get_mut("ok").unwrap().complete(Payload::new()).unwrap();

        let skipped: Vec<_> = g.skip_unreachable().into_iter().map(|(id, _)| id).collect();
        assert_eq!(skipped, vec!["b", "c"]);
        assert_eq!(g.finished(), 4);
        assert_eq!(g.failed_ids(), vec!["a"]);
        assert_eq!(g.status().skipped, 2);
    }
}
