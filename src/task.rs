use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::ast::{ASTError, ASTResult, Statement};
use crate::config::ExecutionConfig;
use crate::eval::tree::StatementTree;
use crate::eval::value::{Position, UnitId};
use crate::program::Program;
use crate::scheduler::SchedulerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "task:{}", self.0)
    }
}

/// Serialized form of a task, as read from task files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDef {
    pub name: String,
    /// Falls back to the scheduler config's default priority.
    #[serde(default)]
    pub priority: Option<i32>,
    pub activities: Statement,
    #[serde(default)]
    pub selected: Option<Position>,
}

/// A named, prioritized script that schedulers hand out to units.
///
/// The board that owns a task keeps its scheduler membership and executor
/// in step with the schedulers' pools; outside the crate they are read-only.
#[derive(Debug)]
pub struct Task {
    id: TaskId,
    name: String,
    priority: i32,
    activities: Arc<StatementTree>,
    selected: Option<Position>,
    pub(crate) executor: Option<UnitId>,
    pub(crate) schedulers: BTreeSet<SchedulerId>,
    pub(crate) program: Option<Program>,
    pub(crate) terminated: bool,
}

impl Task {
    pub fn new(name: impl Into<String>, priority: i32, activities: &Statement) -> ASTResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ASTError::EmptyTaskName);
        }
        let activities = Arc::new(StatementTree::build(activities)?);
        let task = Self {
            id: TaskId::new(),
            name,
            priority,
            activities,
            selected: None,
            executor: None,
            schedulers: BTreeSet::new(),
            program: None,
            terminated: false,
        };
        debug!("created {} '{}' with priority {}", task.id, task.name, task.priority);
        Ok(task)
    }

    pub fn from_def(def: &TaskDef, default_priority: i32) -> ASTResult<Self> {
        let priority = def.priority.unwrap_or(default_priority);
        Self::new(def.name.clone(), priority, &def.activities)?.with_selected(def.selected)
    }

    pub fn with_selected(mut self, selected: Option<Position>) -> ASTResult<Self> {
        if let Some(position) = selected {
            if position.x < 0 || position.y < 0 || position.z < 0 {
                return Err(ASTError::NegativeSelection(position));
            }
        }
        self.selected = selected;
        Ok(self)
    }

    /// Higher priorities sort first. Equal priorities compare equal even
    /// though the tasks stay distinct; a stable sort keeps their order.
    pub fn by_priority(a: &Task, b: &Task) -> Ordering {
        b.priority.cmp(&a.priority)
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub(crate) fn set_priority(&mut self, priority: i32) {
        self.priority = priority;
    }

    pub fn activities(&self) -> &Arc<StatementTree> {
        &self.activities
    }

    pub fn selected(&self) -> Option<Position> {
        self.selected
    }

    pub fn executor(&self) -> Option<UnitId> {
        self.executor
    }

    pub fn schedulers(&self) -> &BTreeSet<SchedulerId> {
        &self.schedulers
    }

    pub fn is_scheduled_in(&self, scheduler: SchedulerId) -> bool {
        self.schedulers.contains(&scheduler)
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn program(&self) -> Option<&Program> {
        self.program.as_ref()
    }

    /// Binds the task to `unit` with a fresh program over its activities.
    pub(crate) fn start(&mut self, unit: UnitId, config: &ExecutionConfig) {
        self.executor = Some(unit);
        self.program = Some(Program::with_config(self.activities.clone(), config));
    }

    /// Unbinds the executor and drops the program.
    pub(crate) fn stop(&mut self) {
        self.executor = None;
        self.program = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expression;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_name_rejected() {
        let result = Task::new("  ", 1, &Statement::void());
        assert!(matches!(result, Err(ASTError::EmptyTaskName)));
    }

    #[test]
    fn test_malformed_activities_rejected() {
        let result = Task::new("bad", 1, &Statement::break_loop());
        assert!(matches!(result, Err(ASTError::BreakOutsideLoop { .. })));
    }

    #[test]
    fn test_priority_order_keeps_ties() {
        let mut tasks: Vec<Task> = [(0, "a"), (5, "b"), (0, "c"), (-1, "d")]
            .into_iter()
            .map(|(p, name)| Task::new(name, p, &Statement::void()).unwrap())
            .collect();
        tasks.sort_by(Task::by_priority);
        let names: Vec<&str> = tasks.iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["b", "a", "c", "d"]);
        assert_ne!(tasks[1].id(), tasks[2].id());
    }

    #[test]
    fn test_from_def_json() {
        let def: TaskDef = serde_json::from_str(
            r#"{
                "name": "haul",
                "priority": 4,
                "selected": {"x": 1, "y": 2, "z": 0},
                "activities": {"kind": "action", "action": "move_to", "target": {"kind": "selected"}}
            }"#,
        )
        .unwrap();
        let task = Task::from_def(&def, 0).unwrap();
        assert_eq!(task.name(), "haul");
        assert_eq!(task.priority(), 4);
        assert_eq!(task.selected(), Some(Position::new(1, 2, 0)));
        assert!(task.executor().is_none());
        assert!(task.schedulers().is_empty());
        assert_eq!(def.activities, Statement::move_to(Expression::Selected));
    }

    #[test]
    fn test_missing_priority_uses_default() {
        let def: TaskDef = serde_json::from_str(
            r#"{"name": "idle", "activities": {"kind": "void"}}"#,
        )
        .unwrap();
        assert_eq!(def.priority, None);
        assert_eq!(Task::from_def(&def, 7).unwrap().priority(), 7);
    }

    #[test]
    fn test_negative_selection_rejected() {
        let task = Task::new("go", 1, &Statement::move_to(Expression::Selected)).unwrap();
        let result = task.with_selected(Some(Position::new(2, -1, 0)));
        assert!(matches!(
            result,
            Err(ASTError::NegativeSelection(p)) if p == Position::new(2, -1, 0)
        ));
    }
}
