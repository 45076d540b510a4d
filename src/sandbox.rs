//! In-memory reference world.
//!
//! [`GridWorld`] is a bounded grid of cubes with a handful of resources and
//! units. Units carry out one action at a time, advancing it once per
//! [`GridWorld::step`]: moving one cube, spending a tick on work, closing in
//! on a unit to follow or attack. Path finding is a greedy step towards the
//! goal; a unit with no closer cube to step into is stuck and reports
//! [`World::cannot_act`].

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{self, SandboxConfig};
use crate::eval::value::{FactionId, Position, ResourceKind, UnitId};
use crate::eval::world::World;
use crate::scheduler::TaskBoard;
use crate::task::{Task, TaskDef, TaskId};
use crate::{Error, InternalResult};

/// Initial contents of a sandbox world, and the tasks to run in it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub solid: Vec<Position>,
    #[serde(default)]
    pub resources: Vec<ResourceSpec>,
    #[serde(default)]
    pub units: Vec<UnitSpec>,
    #[serde(default)]
    pub tasks: Vec<ScenarioTask>,
}

impl Scenario {
    pub fn from_file<P: AsRef<Path>>(path: P) -> InternalResult<Self> {
        config::from_file(path)
    }

    pub fn from_str(s: &str) -> InternalResult<Self> {
        config::from_str(s)
    }

    /// Builds every task and checks it is well-formed, without scheduling.
    /// Tasks without an explicit priority get `default_priority`.
    pub fn build_tasks(&self, default_priority: i32) -> InternalResult<Vec<(Task, Vec<FactionId>)>> {
        self.tasks
            .iter()
            .map(|entry| -> InternalResult<(Task, Vec<FactionId>)> {
                let task = Task::from_def(&entry.task, default_priority)?;
                let factions = entry.factions.iter().copied().map(FactionId).collect();
                Ok((task, factions))
            })
            .collect()
    }

    /// Creates a scheduler for every faction in `world` and schedules the
    /// scenario's tasks with them.
    pub fn populate(&self, board: &mut TaskBoard, world: &GridWorld) -> InternalResult<Vec<TaskId>> {
        for faction in world.factions() {
            if board.scheduler_of(faction).is_none() {
                board.add_scheduler(faction)?;
            }
        }
        let mut ids = Vec::new();
        let default_priority = board.scheduler_config().default_priority;
        for (task, factions) in self.build_tasks(default_priority)? {
            let targets: Vec<FactionId> = if factions.is_empty() {
                world.factions().into_iter().collect()
            } else {
                factions
            };
            let id = board.insert_task(task);
            for faction in targets {
                let scheduler = match board.scheduler_of(faction) {
                    Some(scheduler) => scheduler,
                    None => board.add_scheduler(faction)?,
                };
                board.schedule(scheduler, id)?;
            }
            ids.push(id);
        }
        Ok(ids)
    }
}

/// A task and the factions whose schedulers offer it. No factions means
/// every faction in the scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioTask {
    #[serde(flatten)]
    pub task: TaskDef,
    #[serde(default)]
    pub factions: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub kind: ResourceKind,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSpec {
    pub id: u64,
    #[serde(default)]
    pub faction: u32,
    pub position: Position,
    #[serde(default)]
    pub carries: Option<ResourceKind>,
    #[serde(default = "default_health")]
    pub health: u32,
}

fn default_health() -> u32 {
    3
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Idle,
    Moving { target: Position },
    Working { target: Position, remaining: u32 },
    Following { target: UnitId },
    Attacking { target: UnitId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitState {
    pub faction: FactionId,
    pub position: Position,
    pub carried: Option<ResourceKind>,
    pub health: u32,
    pub activity: Activity,
    /// The last step of the current activity found no way forward.
    pub stuck: bool,
}

impl UnitState {
    pub fn is_alive(&self) -> bool {
        self.health > 0
    }
}

#[derive(Debug, Clone)]
pub struct GridWorld {
    width: i32,
    depth: i32,
    height: i32,
    work_ticks: u32,
    solid: BTreeSet<Position>,
    resources: BTreeMap<Position, ResourceKind>,
    units: BTreeMap<UnitId, UnitState>,
    ticks: u64,
}

impl Default for GridWorld {
    fn default() -> Self {
        Self::new(&SandboxConfig::default())
    }
}

impl GridWorld {
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            width: config.width,
            depth: config.depth,
            height: config.height,
            work_ticks: config.work_ticks.max(1),
            solid: BTreeSet::new(),
            resources: BTreeMap::new(),
            units: BTreeMap::new(),
            ticks: 0,
        }
    }

    pub fn from_scenario(scenario: &Scenario, config: &SandboxConfig) -> InternalResult<Self> {
        let mut world = Self::new(config);
        for position in &scenario.solid {
            world.set_solid(*position)?;
        }
        for resource in &scenario.resources {
            world.place_resource(resource.kind, resource.position)?;
        }
        for unit in &scenario.units {
            world.add_unit(UnitId(unit.id), FactionId(unit.faction), unit.position)?;
            if let Some(state) = world.units.get_mut(&UnitId(unit.id)) {
                state.carried = unit.carries;
                state.health = unit.health;
            }
        }
        Ok(world)
    }

    pub fn in_bounds(&self, position: Position) -> bool {
        (0..self.width).contains(&position.x)
            && (0..self.depth).contains(&position.y)
            && (0..self.height).contains(&position.z)
    }

    fn check_bounds(&self, position: Position) -> InternalResult<()> {
        if self.in_bounds(position) {
            Ok(())
        } else {
            Err(Error::internal(format!("{} is outside the world", position)))
        }
    }

    pub fn set_solid(&mut self, position: Position) -> InternalResult<()> {
        self.check_bounds(position)?;
        self.solid.insert(position);
        Ok(())
    }

    pub fn place_resource(&mut self, kind: ResourceKind, position: Position) -> InternalResult<()> {
        self.check_bounds(position)?;
        self.resources.insert(position, kind);
        Ok(())
    }

    pub fn resource_at(&self, position: Position) -> Option<ResourceKind> {
        self.resources.get(&position).copied()
    }

    pub fn add_unit(
        &mut self,
        id: UnitId,
        faction: FactionId,
        position: Position,
    ) -> InternalResult<()> {
        self.check_bounds(position)?;
        if self.units.contains_key(&id) {
            return Err(Error::internal(format!("{} already exists", id)));
        }
        self.units.insert(
            id,
            UnitState {
                faction,
                position,
                carried: None,
                health: default_health(),
                activity: Activity::Idle,
                stuck: false,
            },
        );
        Ok(())
    }

    pub fn unit(&self, id: UnitId) -> Option<&UnitState> {
        self.units.get(&id)
    }

    pub fn units_of(&self, faction: FactionId) -> Vec<UnitId> {
        self.units
            .iter()
            .filter(|(_, state)| state.faction == faction && state.is_alive())
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn factions(&self) -> BTreeSet<FactionId> {
        self.units.values().map(|state| state.faction).collect()
    }

    pub fn kill(&mut self, id: UnitId) {
        if let Some(state) = self.units.get_mut(&id) {
            state.health = 0;
            state.activity = Activity::Idle;
        }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Advances every living unit's activity by one tick, in id order.
    pub fn step(&mut self) {
        self.ticks += 1;
        let ids: Vec<UnitId> = self.units.keys().copied().collect();
        for id in ids {
            self.step_unit(id);
        }
    }

    fn step_unit(&mut self, id: UnitId) {
        let Some(state) = self.units.get(&id).filter(|s| s.is_alive()) else {
            return;
        };
        let (here, activity) = (state.position, state.activity);
        match activity {
            Activity::Idle => {}
            Activity::Moving { target } => {
                if here != target {
                    self.advance(id, target);
                }
                if self.position_of(id) == Some(target) {
                    self.finish(id);
                }
            }
            Activity::Working { target, remaining } => {
                if here != target && !here.is_adjacent(&target) {
                    self.advance(id, target);
                } else if remaining > 1 {
                    self.set_activity(
                        id,
                        Activity::Working {
                            target,
                            remaining: remaining - 1,
                        },
                    );
                } else {
                    self.complete_work(id, target);
                    self.finish(id);
                }
            }
            Activity::Following { target } => match self.live_position(target) {
                Some(goal) if goal == here || goal.is_adjacent(&here) => self.finish(id),
                Some(goal) => self.advance(id, goal),
                None => self.finish(id),
            },
            Activity::Attacking { target } => match self.live_position(target) {
                Some(goal) if goal == here || goal.is_adjacent(&here) => {
                    if let Some(victim) = self.units.get_mut(&target) {
                        victim.health = victim.health.saturating_sub(1);
                        if !victim.is_alive() {
                            victim.activity = Activity::Idle;
                            debug!("{} was killed by {}", target, id);
                            self.finish(id);
                        }
                    }
                }
                Some(goal) => self.advance(id, goal),
                None => self.finish(id),
            },
        }
    }

    fn live_position(&self, id: UnitId) -> Option<Position> {
        self.units
            .get(&id)
            .filter(|s| s.is_alive())
            .map(|s| s.position)
    }

    /// Greedy step: the passable neighbour closest to `goal`, if it is closer
    /// than where the unit stands.
    fn advance(&mut self, id: UnitId, goal: Position) {
        let Some(here) = self.position_of(id) else {
            return;
        };
        let current = here.distance_squared(&goal);
        let next = here
            .surrounding()
            .filter(|p| self.is_passable(*p))
            .map(|p| (p.distance_squared(&goal), p))
            .filter(|(distance, _)| *distance < current)
            .min();
        if let Some(state) = self.units.get_mut(&id) {
            match next {
                Some((_, position)) => {
                    state.position = position;
                    state.stuck = false;
                }
                None => state.stuck = true,
            }
        }
    }

    fn complete_work(&mut self, id: UnitId, target: Position) {
        let Some(carried) = self.units.get(&id).map(|s| s.carried) else {
            return;
        };
        let gained = match (self.resources.get(&target).copied(), carried) {
            (Some(ResourceKind::Workshop), Some(_)) => {
                debug!("{} delivered {:?} to workshop at {}", id, carried, target);
                None
            }
            (Some(ResourceKind::Workshop), None) => carried,
            (Some(kind), None) => {
                self.resources.remove(&target);
                Some(kind)
            }
            (Some(_), Some(_)) => carried,
            // Digging out a solid cube leaves a boulder in hand.
            (None, _) => {
                if self.solid.remove(&target) {
                    Some(ResourceKind::Boulder)
                } else {
                    carried
                }
            }
        };
        if let Some(state) = self.units.get_mut(&id) {
            state.carried = gained;
        }
    }

    fn set_activity(&mut self, id: UnitId, activity: Activity) {
        if let Some(state) = self.units.get_mut(&id).filter(|s| s.is_alive()) {
            state.activity = activity;
            state.stuck = false;
        }
    }

    fn finish(&mut self, id: UnitId) {
        if let Some(state) = self.units.get_mut(&id) {
            debug!("{} finished {:?}", id, state.activity);
            state.activity = Activity::Idle;
            state.stuck = false;
        }
    }
}

impl World for GridWorld {
    fn is_passable(&self, position: Position) -> bool {
        self.in_bounds(position) && !self.solid.contains(&position)
    }

    fn is_solid(&self, position: Position) -> bool {
        self.in_bounds(position) && self.solid.contains(&position)
    }

    fn closest_of(&self, kind: ResourceKind, from: Position) -> Option<Position> {
        self.resources
            .iter()
            .filter(|(_, k)| **k == kind)
            .map(|(p, _)| (p.distance_squared(&from), *p))
            .min()
            .map(|(_, p)| p)
    }

    fn neighbors(&self, position: Position) -> Vec<Position> {
        position
            .surrounding()
            .filter(|p| self.in_bounds(*p))
            .collect()
    }

    fn units(&self) -> Vec<UnitId> {
        self.units.keys().copied().collect()
    }

    fn faction(&self, unit: UnitId) -> Option<FactionId> {
        self.units.get(&unit).map(|s| s.faction)
    }

    fn position_of(&self, unit: UnitId) -> Option<Position> {
        self.units.get(&unit).map(|s| s.position)
    }

    fn is_terminated(&self, unit: UnitId) -> bool {
        self.units.get(&unit).map_or(true, |s| !s.is_alive())
    }

    fn carries_item(&self, unit: UnitId) -> bool {
        self.units.get(&unit).is_some_and(|s| s.carried.is_some())
    }

    fn issue_move(&mut self, unit: UnitId, target: Position) {
        self.set_activity(unit, Activity::Moving { target });
    }

    fn issue_work(&mut self, unit: UnitId, target: Position) {
        let remaining = self.work_ticks;
        self.set_activity(unit, Activity::Working { target, remaining });
    }

    fn issue_follow(&mut self, unit: UnitId, target: UnitId) {
        self.set_activity(unit, Activity::Following { target });
    }

    fn issue_attack(&mut self, unit: UnitId, target: UnitId) {
        self.set_activity(unit, Activity::Attacking { target });
    }

    fn is_busy(&self, unit: UnitId) -> bool {
        self.units
            .get(&unit)
            .is_some_and(|s| s.is_alive() && s.activity != Activity::Idle)
    }

    fn cannot_act(&self, unit: UnitId) -> bool {
        self.units.get(&unit).map_or(true, |s| !s.is_alive() || s.stuck)
    }
}
