//! Priority scheduling of tasks onto units.
//!
//! A [`Scheduler`] is a per-faction pool split into `available` tasks, kept
//! in descending priority order, and `assigned` tasks bound to a unit. Tasks
//! and schedulers reference each other many-to-many, so both live in a
//! [`TaskBoard`] that owns them and keeps the two sides of every link in
//! agreement. Pools store [`TaskId`]s only.
//!
//! The board also drives execution: [`TaskBoard::advance_tick`] runs every
//! assigned task's program once, terminating finished tasks and handing
//! interrupted ones back to their pool with reduced priority.

use std::collections::HashMap;
use std::fmt;

use rand::RngCore;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, ExecutionConfig, SchedulerConfig};
use crate::error::InternalResult;
use crate::eval::context::ExecutionContext;
use crate::eval::value::{FactionId, UnitId};
use crate::eval::world::World;
use crate::program::{ExecutionStatus, ProgramError};
use crate::task::{Task, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchedulerId(usize);

impl fmt::Display for SchedulerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "scheduler#{}", self.0)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchedulerError {
    #[error("Unknown scheduler: {0}")]
    UnknownScheduler(SchedulerId),
    #[error("Unknown task: {0}")]
    UnknownTask(TaskId),
    #[error("{task} is already scheduled in {scheduler}")]
    AlreadyScheduled { task: TaskId, scheduler: SchedulerId },
    #[error("{task} is not available in {scheduler}")]
    NotAvailable { task: TaskId, scheduler: SchedulerId },
    #[error("{task} is not assigned in {scheduler}")]
    NotAssigned { task: TaskId, scheduler: SchedulerId },
    #[error("{task} is not scheduled in {scheduler}")]
    NotScheduled { task: TaskId, scheduler: SchedulerId },
    #[error("{task} is assigned in {scheduler} and cannot be removed")]
    TaskAssigned { task: TaskId, scheduler: SchedulerId },
    #[error("{unit} is already executing {task}")]
    UnitBusy { unit: UnitId, task: TaskId },
    #[error("{task} is already executed by {unit}")]
    TaskBusy { task: TaskId, unit: UnitId },
    #[error("{0} has been terminated")]
    TaskTerminated(TaskId),
    #[error("{0} already has a scheduler")]
    DuplicateFaction(FactionId),
    #[error("Integrity violation: {0}")]
    Integrity(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Priority after one reclaim. Positive priorities keep
/// `numerator / denominator` of their value, truncated. Zero and negative
/// priorities drop by the same fraction of their magnitude, and by at least
/// one, so every reclaim lowers the priority until `i32::MIN`.
pub fn backoff(priority: i32, numerator: i32, denominator: i32) -> i32 {
    let (num, den) = (i64::from(numerator), i64::from(denominator.max(1)));
    if priority > 0 {
        (i64::from(priority) * num / den) as i32
    } else {
        let drop = (i64::from(priority).abs() * (den - num) / den).max(1);
        (i64::from(priority) - drop).max(i64::from(i32::MIN)) as i32
    }
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    id: SchedulerId,
    faction: FactionId,
    available: Vec<TaskId>,
    assigned: Vec<TaskId>,
}

impl Scheduler {
    fn new(id: SchedulerId, faction: FactionId) -> Self {
        Self {
            id,
            faction,
            available: Vec::new(),
            assigned: Vec::new(),
        }
    }

    pub fn id(&self) -> SchedulerId {
        self.id
    }

    pub fn faction(&self) -> FactionId {
        self.faction
    }

    /// Waiting tasks, highest priority first.
    pub fn available(&self) -> &[TaskId] {
        &self.available
    }

    pub fn assigned(&self) -> &[TaskId] {
        &self.assigned
    }

    pub fn is_available(&self, task: TaskId) -> bool {
        self.available.contains(&task)
    }

    pub fn is_assigned(&self, task: TaskId) -> bool {
        self.assigned.contains(&task)
    }

    pub fn contains(&self, task: TaskId) -> bool {
        self.is_available(task) || self.is_assigned(task)
    }

    pub fn len(&self) -> usize {
        self.available.len() + self.assigned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.available.is_empty() && self.assigned.is_empty()
    }

    /// Inserts behind every task of equal or higher priority.
    fn insert_available(&mut self, task: TaskId, priority: i32, tasks: &HashMap<TaskId, Task>) {
        let index = self
            .available
            .partition_point(|other| tasks.get(other).map_or(true, |t| t.priority() >= priority));
        self.available.insert(index, task);
    }

    fn remove_available(&mut self, task: TaskId) -> Option<usize> {
        let index = self.available.iter().position(|t| *t == task)?;
        self.available.remove(index);
        Some(index)
    }

    fn remove_assigned(&mut self, task: TaskId) -> bool {
        match self.assigned.iter().position(|t| *t == task) {
            Some(index) => {
                self.assigned.remove(index);
                true
            }
            None => false,
        }
    }
}

/// What happened during one [`TaskBoard::advance_tick`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// Programs that were given time this tick.
    pub executed: usize,
    pub finished: Vec<TaskId>,
    /// Tasks handed back with backoff, and why.
    pub reclaimed: Vec<(TaskId, String)>,
    /// Lines printed this tick, in execution order.
    pub output: Vec<(TaskId, UnitId, String)>,
}

/// Owner of every task and scheduler.
#[derive(Debug, Default)]
pub struct TaskBoard {
    tasks: HashMap<TaskId, Task>,
    schedulers: Vec<Scheduler>,
    execution: ExecutionConfig,
    config: SchedulerConfig,
}

impl TaskBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails on a config whose backoff would not lower priorities.
    pub fn with_config(config: &EngineConfig) -> InternalResult<Self> {
        config.validate()?;
        Ok(Self {
            execution: config.execution.clone(),
            config: config.scheduler.clone(),
            ..Self::default()
        })
    }

    pub fn scheduler_config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn add_scheduler(&mut self, faction: FactionId) -> SchedulerResult<SchedulerId> {
        if self.scheduler_of(faction).is_some() {
            return Err(SchedulerError::DuplicateFaction(faction));
        }
        let id = SchedulerId(self.schedulers.len());
        self.schedulers.push(Scheduler::new(id, faction));
        debug!("added {} for {}", id, faction);
        Ok(id)
    }

    pub fn scheduler(&self, id: SchedulerId) -> Option<&Scheduler> {
        self.schedulers.get(id.0)
    }

    pub fn scheduler_of(&self, faction: FactionId) -> Option<SchedulerId> {
        self.schedulers
            .iter()
            .find(|s| s.faction == faction)
            .map(|s| s.id)
    }

    pub fn schedulers(&self) -> impl Iterator<Item = &Scheduler> {
        self.schedulers.iter()
    }

    /// Takes ownership of a freshly built task. It is not scheduled anywhere yet.
    pub fn insert_task(&mut self, mut task: Task) -> TaskId {
        let id = task.id();
        task.schedulers.clear();
        task.executor = None;
        task.program = None;
        self.tasks.insert(id, task);
        id
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    fn scheduler_mut(&mut self, id: SchedulerId) -> SchedulerResult<&mut Scheduler> {
        self.schedulers
            .get_mut(id.0)
            .ok_or(SchedulerError::UnknownScheduler(id))
    }

    fn task_mut(&mut self, id: TaskId) -> SchedulerResult<&mut Task> {
        self.tasks.get_mut(&id).ok_or(SchedulerError::UnknownTask(id))
    }

    /// Adds `task` to the available pool of `scheduler`.
    pub fn schedule(&mut self, scheduler: SchedulerId, task: TaskId) -> SchedulerResult<()> {
        let entry = self.tasks.get(&task).ok_or(SchedulerError::UnknownTask(task))?;
        if entry.is_terminated() {
            return Err(SchedulerError::TaskTerminated(task));
        }
        let priority = entry.priority();
        let pool = self
            .schedulers
            .get_mut(scheduler.0)
            .ok_or(SchedulerError::UnknownScheduler(scheduler))?;
        if pool.contains(task) || entry.is_scheduled_in(scheduler) {
            return Err(SchedulerError::AlreadyScheduled { task, scheduler });
        }
        pool.insert_available(task, priority, &self.tasks);
        self.task_mut(task)?.schedulers.insert(scheduler);
        debug!("scheduled {} in {} with priority {}", task, scheduler, priority);
        Ok(())
    }

    /// Removes an available task from `scheduler`. Assigned tasks have to be
    /// reclaimed or terminated instead.
    pub fn unschedule(&mut self, scheduler: SchedulerId, task: TaskId) -> SchedulerResult<()> {
        self.unschedule_at(scheduler, task).map(|_| ())
    }

    fn unschedule_at(&mut self, scheduler: SchedulerId, task: TaskId) -> SchedulerResult<usize> {
        let pool = self.scheduler_mut(scheduler)?;
        if pool.is_assigned(task) {
            return Err(SchedulerError::TaskAssigned { task, scheduler });
        }
        let index = pool
            .remove_available(task)
            .ok_or(SchedulerError::NotScheduled { task, scheduler })?;
        if let Some(entry) = self.tasks.get_mut(&task) {
            entry.schedulers.remove(&scheduler);
        }
        debug!("unscheduled {} from {}", task, scheduler);
        Ok(index)
    }

    /// Moves an available task to the assigned pool and binds it to `unit`.
    pub fn assign(
        &mut self,
        scheduler: SchedulerId,
        task: TaskId,
        unit: UnitId,
    ) -> SchedulerResult<()> {
        let pool = self
            .schedulers
            .get(scheduler.0)
            .ok_or(SchedulerError::UnknownScheduler(scheduler))?;
        if !pool.is_available(task) {
            return Err(SchedulerError::NotAvailable { task, scheduler });
        }
        if let Some(current) = self.task_of(unit) {
            return Err(SchedulerError::UnitBusy {
                unit,
                task: current,
            });
        }
        let entry = self.tasks.get(&task).ok_or(SchedulerError::UnknownTask(task))?;
        if let Some(other) = entry.executor() {
            return Err(SchedulerError::TaskBusy { task, unit: other });
        }

        let pool = self.scheduler_mut(scheduler)?;
        pool.remove_available(task);
        pool.assigned.push(task);
        let execution = self.execution.clone();
        self.task_mut(task)?.start(unit, &execution);
        info!("assigned {} to {} through {}", task, unit, scheduler);
        Ok(())
    }

    /// Assigns the best available task `unit` can take. Returns `None` when
    /// nothing is waiting.
    pub fn assign_top_priority(
        &mut self,
        scheduler: SchedulerId,
        unit: UnitId,
    ) -> SchedulerResult<Option<TaskId>> {
        let pool = self
            .schedulers
            .get(scheduler.0)
            .ok_or(SchedulerError::UnknownScheduler(scheduler))?;
        if pool.available.is_empty() {
            return Ok(None);
        }
        if let Some(current) = self.task_of(unit) {
            return Err(SchedulerError::UnitBusy {
                unit,
                task: current,
            });
        }
        let candidate = pool.available.iter().copied().find(|id| {
            self.tasks
                .get(id)
                .is_some_and(|task| task.executor().is_none())
        });
        match candidate {
            Some(task) => {
                self.assign(scheduler, task, unit)?;
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }

    /// Hands an assigned task back to the available pool with lowered
    /// priority. Returns the new priority.
    pub fn reclaim_unfinished(
        &mut self,
        scheduler: SchedulerId,
        task: TaskId,
    ) -> SchedulerResult<i32> {
        let pool = self.scheduler_mut(scheduler)?;
        if !pool.remove_assigned(task) {
            return Err(SchedulerError::NotAssigned { task, scheduler });
        }
        let SchedulerConfig {
            backoff_numerator,
            backoff_denominator,
            ..
        } = self.config;
        let entry = self.task_mut(task)?;
        let previous = entry.priority();
        let priority = backoff(previous, backoff_numerator, backoff_denominator);
        entry.set_priority(priority);
        let unit = entry.executor();
        entry.stop();
        let memberships: Vec<SchedulerId> = entry.schedulers.iter().copied().collect();

        // Re-sort every pool the task waits in, then put it back here.
        for member in memberships {
            if let Some(other) = self.schedulers.get_mut(member.0) {
                if other.remove_available(task).is_some() {
                    other.insert_available(task, priority, &self.tasks);
                }
            }
        }
        if let Some(pool) = self.schedulers.get_mut(scheduler.0) {
            pool.insert_available(task, priority, &self.tasks);
        }
        info!(
            "reclaimed {} from {:?}, priority {} -> {}",
            task, unit, previous, priority
        );
        Ok(priority)
    }

    /// Swaps an available task for another. On failure the old task is put
    /// back where it was and the error is returned.
    pub fn replace(
        &mut self,
        scheduler: SchedulerId,
        old: TaskId,
        new: TaskId,
    ) -> SchedulerResult<()> {
        let index = self.unschedule_at(scheduler, old)?;
        if let Err(e) = self.schedule(scheduler, new) {
            if let Some(pool) = self.schedulers.get_mut(scheduler.0) {
                pool.available.insert(index, old);
            }
            if let Some(entry) = self.tasks.get_mut(&old) {
                entry.schedulers.insert(scheduler);
            }
            warn!("replace of {} in {} rolled back: {}", old, scheduler, e);
            return Err(e);
        }
        Ok(())
    }

    /// Removes the task from every scheduler that references it. Calling it
    /// again on a terminated task changes nothing.
    pub fn terminate(&mut self, task: TaskId) -> SchedulerResult<()> {
        let entry = self.task_mut(task)?;
        if entry.is_terminated() {
            return Ok(());
        }
        entry.terminated = true;
        entry.stop();
        let memberships = std::mem::take(&mut entry.schedulers);
        for member in memberships {
            if let Some(pool) = self.schedulers.get_mut(member.0) {
                pool.remove_available(task);
                pool.remove_assigned(task);
            }
        }
        info!("terminated {}", task);
        Ok(())
    }

    /// Drops terminated tasks from the board and returns them.
    pub fn remove_terminated(&mut self) -> Vec<Task> {
        let ids: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|t| t.is_terminated())
            .map(|t| t.id())
            .collect();
        ids.into_iter()
            .filter_map(|id| self.tasks.remove(&id))
            .collect()
    }

    /// Tasks of `scheduler`, available ones first.
    pub fn iter(&self, scheduler: SchedulerId) -> impl Iterator<Item = &Task> + '_ {
        self.schedulers
            .get(scheduler.0)
            .into_iter()
            .flat_map(|pool| pool.available.iter().chain(pool.assigned.iter()))
            .filter_map(|id| self.tasks.get(id))
    }

    pub fn tasks_satisfying<F>(&self, scheduler: SchedulerId, predicate: F) -> Vec<TaskId>
    where
        F: Fn(&Task) -> bool,
    {
        self.iter(scheduler)
            .filter(|task| predicate(task))
            .map(|task| task.id())
            .collect()
    }

    pub fn contains(&self, scheduler: SchedulerId, task: TaskId) -> bool {
        self.scheduler(scheduler)
            .is_some_and(|pool| pool.contains(task))
    }

    /// The available task `assign_top_priority` would consider first.
    pub fn highest_priority(&self, scheduler: SchedulerId) -> Option<&Task> {
        self.scheduler(scheduler)?
            .available
            .first()
            .and_then(|id| self.tasks.get(id))
    }

    pub fn task_of(&self, unit: UnitId) -> Option<TaskId> {
        self.tasks
            .values()
            .find(|task| task.executor() == Some(unit))
            .map(|task| task.id())
    }

    /// Checks that pools and task memberships describe the same links.
    pub fn verify_integrity(&self) -> SchedulerResult<()> {
        let fail = |message: String| -> SchedulerResult<()> { Err(SchedulerError::Integrity(message)) };
        for pool in &self.schedulers {
            for id in pool.available.iter().chain(pool.assigned.iter()) {
                let Some(task) = self.tasks.get(id) else {
                    return fail(format!("{} lists missing {}", pool.id, id));
                };
                if !task.is_scheduled_in(pool.id) {
                    return fail(format!("{} lists {} without back link", pool.id, id));
                }
            }
            if let Some(id) = pool.available.iter().find(|id| pool.assigned.contains(id)) {
                return fail(format!("{} is both available and assigned in {}", id, pool.id));
            }
            let priorities: Vec<i32> = pool
                .available
                .iter()
                .filter_map(|id| self.tasks.get(id).map(|t| t.priority()))
                .collect();
            if priorities.windows(2).any(|w| w[0] < w[1]) {
                return fail(format!("{} available pool out of order", pool.id));
            }
            for id in &pool.assigned {
                if self.tasks.get(id).and_then(|t| t.executor()).is_none() {
                    return fail(format!("{} assigned in {} has no executor", id, pool.id));
                }
            }
        }
        for task in self.tasks.values() {
            for member in task.schedulers() {
                let Some(pool) = self.scheduler(*member) else {
                    return fail(format!("{} links unknown {}", task.id(), member));
                };
                let count = pool
                    .available
                    .iter()
                    .chain(pool.assigned.iter())
                    .filter(|id| **id == task.id())
                    .count();
                if count != 1 {
                    return fail(format!("{} appears {} times in {}", task.id(), count, member));
                }
            }
            let holders = self
                .schedulers
                .iter()
                .filter(|pool| pool.is_assigned(task.id()))
                .count();
            if holders > 1 || (holders == 0) != task.executor().is_none() {
                return fail(format!("{} executor does not match assignments", task.id()));
            }
        }
        Ok(())
    }

    /// Runs every assigned task's program for one tick.
    pub fn advance_tick(
        &mut self,
        world: &mut dyn World,
        rng: &mut dyn RngCore,
    ) -> SchedulerResult<TickReport> {
        let mut report = TickReport::default();
        let running: Vec<(SchedulerId, TaskId)> = self
            .schedulers
            .iter()
            .flat_map(|pool| pool.assigned.iter().map(move |task| (pool.id, *task)))
            .collect();
        let budget = self.execution.tick_budget;

        for (scheduler, id) in running {
            let entry = self.task_mut(id)?;
            let Some(unit) = entry.executor() else {
                return Err(SchedulerError::Integrity(format!(
                    "{} assigned without executor",
                    id
                )));
            };
            if world.is_terminated(unit) {
                warn!("{} lost its executor {}", id, unit);
                self.reclaim_unfinished(scheduler, id)?;
                report.reclaimed.push((id, format!("{} terminated", unit)));
                continue;
            }

            let selected = entry.selected();
            let Some(program) = entry.program.as_mut() else {
                return Err(SchedulerError::Integrity(format!(
                    "{} assigned without program",
                    id
                )));
            };
            let mut ctx = ExecutionContext::new(&mut *world, unit, &mut *rng).with_selected(selected);
            let status = program.execute(budget, &mut ctx);
            report.executed += 1;
            report.output.extend(
                program
                    .take_output()
                    .into_iter()
                    .map(|line| (id, unit, line)),
            );

            match status {
                Ok(ExecutionStatus::Finished) => {
                    self.terminate(id)?;
                    report.finished.push(id);
                }
                Ok(ExecutionStatus::Suspended(_)) => {}
                Ok(ExecutionStatus::Stopped) => {
                    self.reclaim_unfinished(scheduler, id)?;
                    report.reclaimed.push((id, ProgramError::Stopped.to_string()));
                }
                Err(e) => {
                    self.reclaim_unfinished(scheduler, id)?;
                    report.reclaimed.push((id, e.to_string()));
                }
            }
        }

        debug!(
            "tick: {} executed, {} finished, {} reclaimed",
            report.executed,
            report.finished.len(),
            report.reclaimed.len()
        );
        Ok(report)
    }

    /// Gives each idle unit the best task it can take from `scheduler`.
    pub fn dispatch_idle<I>(
        &mut self,
        scheduler: SchedulerId,
        units: I,
    ) -> SchedulerResult<Vec<(UnitId, TaskId)>>
    where
        I: IntoIterator<Item = UnitId>,
    {
        let mut dispatched = Vec::new();
        for unit in units {
            if self.task_of(unit).is_some() {
                continue;
            }
            match self.assign_top_priority(scheduler, unit)? {
                Some(task) => dispatched.push((unit, task)),
                None => break,
            }
        }
        Ok(dispatched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expression, Statement};
    use crate::error::Error;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn task(name: &str, priority: i32) -> Task {
        Task::new(name, priority, &Statement::print(Expression::True)).unwrap()
    }

    fn board_with(priorities: &[i32]) -> (TaskBoard, SchedulerId, Vec<TaskId>) {
        let mut board = TaskBoard::new();
        let scheduler = board.add_scheduler(FactionId(0)).unwrap();
        let ids = priorities
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let id = board.insert_task(task(&format!("t{}", i), *p));
                board.schedule(scheduler, id).unwrap();
                id
            })
            .collect();
        (board, scheduler, ids)
    }

    #[test]
    fn test_top_priority_order() {
        let (mut board, scheduler, ids) = board_with(&[0, -1, 5]);
        let order: Vec<TaskId> = (0..3)
            .map(|unit| {
                board
                    .assign_top_priority(scheduler, UnitId(unit))
                    .unwrap()
                    .unwrap()
            })
            .collect();
        assert_eq!(order, vec![ids[2], ids[0], ids[1]]);
        assert_eq!(board.assign_top_priority(scheduler, UnitId(9)), Ok(None));
        board.verify_integrity().unwrap();
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let (board, scheduler, ids) = board_with(&[1, 2, 1, 2]);
        assert_eq!(
            board.scheduler(scheduler).unwrap().available(),
            &[ids[1], ids[3], ids[0], ids[2]]
        );
    }

    #[test]
    fn test_schedule_twice_fails() {
        let (mut board, scheduler, ids) = board_with(&[1]);
        assert_eq!(
            board.schedule(scheduler, ids[0]),
            Err(SchedulerError::AlreadyScheduled {
                task: ids[0],
                scheduler
            })
        );
        let unknown = TaskId::new();
        assert_eq!(
            board.schedule(scheduler, unknown),
            Err(SchedulerError::UnknownTask(unknown))
        );
    }

    #[test]
    fn test_assign_requires_available() {
        let (mut board, scheduler, ids) = board_with(&[1, 1]);
        board.assign(scheduler, ids[0], UnitId(1)).unwrap();
        assert_eq!(
            board.assign(scheduler, ids[0], UnitId(2)),
            Err(SchedulerError::NotAvailable {
                task: ids[0],
                scheduler
            })
        );
        assert_eq!(
            board.assign(scheduler, ids[1], UnitId(1)),
            Err(SchedulerError::UnitBusy {
                unit: UnitId(1),
                task: ids[0]
            })
        );
        assert_eq!(board.task_of(UnitId(1)), Some(ids[0]));
        assert_eq!(board.task(ids[0]).unwrap().executor(), Some(UnitId(1)));
        assert!(board.task(ids[0]).unwrap().program().is_some());
    }

    #[test]
    fn test_task_busy_through_other_scheduler() {
        let (mut board, first, ids) = board_with(&[3]);
        let second = board.add_scheduler(FactionId(1)).unwrap();
        board.schedule(second, ids[0]).unwrap();
        board.assign(first, ids[0], UnitId(1)).unwrap();
        assert_eq!(
            board.assign(second, ids[0], UnitId(2)),
            Err(SchedulerError::TaskBusy {
                task: ids[0],
                unit: UnitId(1)
            })
        );
        assert_eq!(board.assign_top_priority(second, UnitId(2)), Ok(None));
        board.verify_integrity().unwrap();
    }

    #[test]
    fn test_reclaim_applies_backoff() {
        let (mut board, scheduler, ids) = board_with(&[8, 7]);
        board.assign(scheduler, ids[0], UnitId(1)).unwrap();
        assert_eq!(board.reclaim_unfinished(scheduler, ids[0]), Ok(6));
        let pool = board.scheduler(scheduler).unwrap();
        assert_eq!(pool.available(), &[ids[1], ids[0]]);
        assert!(pool.assigned().is_empty());
        assert!(board.task(ids[0]).unwrap().executor().is_none());
        assert!(board.task_of(UnitId(1)).is_none());
        assert_eq!(
            board.reclaim_unfinished(scheduler, ids[0]),
            Err(SchedulerError::NotAssigned {
                task: ids[0],
                scheduler
            })
        );
        board.verify_integrity().unwrap();
    }

    #[test]
    fn test_reclaim_resorts_other_pools() {
        let (mut board, first, ids) = board_with(&[10]);
        let second = board.add_scheduler(FactionId(1)).unwrap();
        let other = board.insert_task(task("other", 9));
        board.schedule(second, ids[0]).unwrap();
        board.schedule(second, other).unwrap();
        assert_eq!(board.scheduler(second).unwrap().available(), &[ids[0], other]);

        board.assign(first, ids[0], UnitId(1)).unwrap();
        board.reclaim_unfinished(first, ids[0]).unwrap();
        assert_eq!(board.scheduler(second).unwrap().available(), &[other, ids[0]]);
        board.verify_integrity().unwrap();
    }

    #[test]
    fn test_backoff_values() {
        assert_eq!(backoff(100, 3, 4), 75);
        assert_eq!(backoff(5, 3, 4), 3);
        assert_eq!(backoff(1, 3, 4), 0);
        assert_eq!(backoff(0, 3, 4), -1);
        assert_eq!(backoff(-8, 3, 4), -10);
        assert_eq!(backoff(i32::MIN, 3, 4), i32::MIN);
    }

    #[test]
    fn test_board_rejects_non_decaying_backoff() {
        for (num, den) in [(4, 4), (-5, -4), (-1, 4)] {
            let mut config = EngineConfig::default();
            config.scheduler.backoff_numerator = num;
            config.scheduler.backoff_denominator = den;
            assert!(matches!(
                TaskBoard::with_config(&config),
                Err(Error::InvalidConfig(_))
            ));
        }
        let board = TaskBoard::with_config(&EngineConfig::default()).unwrap();
        assert_eq!(board.scheduler_config().backoff_numerator, 3);
    }

    #[test]
    fn test_unschedule() {
        let (mut board, scheduler, ids) = board_with(&[1, 2]);
        board.assign(scheduler, ids[1], UnitId(1)).unwrap();
        assert_eq!(
            board.unschedule(scheduler, ids[1]),
            Err(SchedulerError::TaskAssigned {
                task: ids[1],
                scheduler
            })
        );
        board.unschedule(scheduler, ids[0]).unwrap();
        assert!(!board.contains(scheduler, ids[0]));
        assert!(board.task(ids[0]).unwrap().schedulers().is_empty());
        assert_eq!(
            board.unschedule(scheduler, ids[0]),
            Err(SchedulerError::NotScheduled {
                task: ids[0],
                scheduler
            })
        );
        board.verify_integrity().unwrap();
    }

    #[test]
    fn test_replace_rolls_back() {
        let (mut board, scheduler, ids) = board_with(&[5, 3, 1]);
        let before = board.scheduler(scheduler).unwrap().available().to_vec();
        // ids[2] is already scheduled, so inserting it again fails.
        assert_eq!(
            board.replace(scheduler, ids[1], ids[2]),
            Err(SchedulerError::AlreadyScheduled {
                task: ids[2],
                scheduler
            })
        );
        assert_eq!(board.scheduler(scheduler).unwrap().available(), before.as_slice());
        assert!(board.task(ids[1]).unwrap().is_scheduled_in(scheduler));
        board.verify_integrity().unwrap();

        let fresh = board.insert_task(task("fresh", 4));
        board.replace(scheduler, ids[1], fresh).unwrap();
        assert_eq!(
            board.scheduler(scheduler).unwrap().available(),
            &[ids[0], fresh, ids[2]]
        );
        assert!(board.task(ids[1]).unwrap().schedulers().is_empty());
    }

    #[test]
    fn test_terminate_is_idempotent() {
        let (mut board, scheduler, ids) = board_with(&[1, 2]);
        let second = board.add_scheduler(FactionId(1)).unwrap();
        board.schedule(second, ids[0]).unwrap();
        board.assign(scheduler, ids[0], UnitId(4)).unwrap();

        board.terminate(ids[0]).unwrap();
        let once: Vec<Vec<TaskId>> = board
            .schedulers()
            .map(|s| s.iter_ids())
            .collect();
        board.terminate(ids[0]).unwrap();
        let twice: Vec<Vec<TaskId>> = board
            .schedulers()
            .map(|s| s.iter_ids())
            .collect();
        assert_eq!(once, twice);
        assert_eq!(once, vec![vec![ids[1]], vec![]]);
        assert!(board.task(ids[0]).unwrap().is_terminated());
        assert!(board.task_of(UnitId(4)).is_none());
        assert_eq!(
            board.schedule(scheduler, ids[0]),
            Err(SchedulerError::TaskTerminated(ids[0]))
        );
        board.verify_integrity().unwrap();

        let removed = board.remove_terminated();
        assert_eq!(removed.len(), 1);
        assert!(board.task(ids[0]).is_none());
    }

    #[test]
    fn test_queries() {
        let (mut board, scheduler, ids) = board_with(&[1, 4, 2]);
        board.assign(scheduler, ids[1], UnitId(1)).unwrap();
        assert_eq!(board.highest_priority(scheduler).map(|t| t.id()), Some(ids[2]));
        let names: Vec<&str> = board.iter(scheduler).map(|t| t.name()).collect();
        assert_eq!(names, vec!["t2", "t0", "t1"]);
        assert_eq!(
            board.tasks_satisfying(scheduler, |t| t.priority() >= 2),
            vec![ids[2], ids[1]]
        );
        assert!(board.contains(scheduler, ids[1]));
    }

    #[test]
    fn test_dispatch_idle() {
        let (mut board, scheduler, ids) = board_with(&[1, 2]);
        let dispatched = board
            .dispatch_idle(scheduler, [UnitId(1), UnitId(2), UnitId(3)])
            .unwrap();
        assert_eq!(dispatched, vec![(UnitId(1), ids[1]), (UnitId(2), ids[0])]);
        assert!(board.dispatch_idle(scheduler, [UnitId(1)]).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_faction() {
        let mut board = TaskBoard::new();
        board.add_scheduler(FactionId(2)).unwrap();
        assert_eq!(
            board.add_scheduler(FactionId(2)),
            Err(SchedulerError::DuplicateFaction(FactionId(2)))
        );
    }

    impl Scheduler {
        fn iter_ids(&self) -> Vec<TaskId> {
            self.available.iter().chain(self.assigned.iter()).copied().collect()
        }
    }

    #[derive(Debug, Clone)]
    enum Op {
        Schedule(usize, usize),
        Unschedule(usize, usize),
        Assign(usize, usize, u64),
        AssignTop(usize, u64),
        Reclaim(usize, usize),
        Replace(usize, usize, usize),
        Terminate(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..2usize, 0..6usize).prop_map(|(s, t)| Op::Schedule(s, t)),
            (0..2usize, 0..6usize).prop_map(|(s, t)| Op::Unschedule(s, t)),
            (0..2usize, 0..6usize, 0..4u64).prop_map(|(s, t, u)| Op::Assign(s, t, u)),
            (0..2usize, 0..4u64).prop_map(|(s, u)| Op::AssignTop(s, u)),
            (0..2usize, 0..6usize).prop_map(|(s, t)| Op::Reclaim(s, t)),
            (0..2usize, 0..6usize, 0..6usize).prop_map(|(s, a, b)| Op::Replace(s, a, b)),
            (0..6usize).prop_map(Op::Terminate),
        ]
    }

    proptest! {
        #[test]
        fn prop_links_stay_consistent(
            priorities in prop::collection::vec(-20i32..20, 6),
            ops in prop::collection::vec(op(), 1..40),
        ) {
            let mut board = TaskBoard::new();
            let schedulers = [
                board.add_scheduler(FactionId(0)).unwrap(),
                board.add_scheduler(FactionId(1)).unwrap(),
            ];
            let ids: Vec<TaskId> = priorities
                .iter()
                .enumerate()
                .map(|(i, p)| board.insert_task(task(&format!("t{}", i), *p)))
                .collect();

            for op in ops {
                // Misuse is allowed to fail; it must never leave a half-applied change.
                let _ = match op {
                    Op::Schedule(s, t) => board.schedule(schedulers[s], ids[t]),
                    Op::Unschedule(s, t) => board.unschedule(schedulers[s], ids[t]),
                    Op::Assign(s, t, u) => board.assign(schedulers[s], ids[t], UnitId(u)),
                    Op::AssignTop(s, u) => board.assign_top_priority(schedulers[s], UnitId(u)).map(|_| ()),
                    Op::Reclaim(s, t) => board.reclaim_unfinished(schedulers[s], ids[t]).map(|_| ()),
                    Op::Replace(s, a, b) => board.replace(schedulers[s], ids[a], ids[b]),
                    Op::Terminate(t) => board.terminate(ids[t]),
                };
                prop_assert_eq!(board.verify_integrity(), Ok(()));
                for scheduler in &schedulers {
                    for id in &ids {
                        let listed = board.contains(*scheduler, *id);
                        let linked = board.task(*id).unwrap().is_scheduled_in(*scheduler);
                        prop_assert_eq!(listed, linked);
                    }
                }
            }
        }

        #[test]
        fn prop_reclaim_strictly_lowers_priority(priority in (i32::MIN + 1)..i32::MAX) {
            let (mut board, scheduler, ids) = board_with(&[priority]);
            board.assign(scheduler, ids[0], UnitId(1)).unwrap();
            let lowered = board.reclaim_unfinished(scheduler, ids[0]).unwrap();
            prop_assert!(lowered < priority);
            if priority > 0 {
                prop_assert_eq!(lowered as i64, priority as i64 * 3 / 4);
            }
            let pool = board.scheduler(scheduler).unwrap();
            prop_assert!(pool.is_available(ids[0]));
            prop_assert!(!pool.is_assigned(ids[0]));
        }

        #[test]
        fn prop_assign_top_follows_priority(priorities in prop::collection::vec(-50i32..50, 1..8)) {
            let (mut board, scheduler, _) = board_with(&priorities);
            let mut seen = Vec::new();
            for unit in 0..priorities.len() as u64 {
                let id = board.assign_top_priority(scheduler, UnitId(unit)).unwrap().unwrap();
                seen.push(board.task(id).unwrap().priority());
            }
            let mut expected = priorities.clone();
            expected.sort_by(|a, b| b.cmp(a));
            prop_assert_eq!(seen, expected);
        }
    }
}
