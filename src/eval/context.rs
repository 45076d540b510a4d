use std::collections::HashMap;

use rand::RngCore;

use super::value::{Position, UnitId, Value};
use super::world::World;

/// Collaborators a script sees while it runs for one unit during one tick.
pub struct ExecutionContext<'a> {
    pub world: &'a mut dyn World,
    /// The unit executing the task.
    pub unit: UnitId,
    /// Target position attached to the task, read by the `selected` expression.
    pub selected: Option<Position>,
    pub rng: &'a mut dyn RngCore,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(world: &'a mut dyn World, unit: UnitId, rng: &'a mut dyn RngCore) -> Self {
        Self {
            world,
            unit,
            selected: None,
            rng,
        }
    }

    pub fn with_selected(mut self, selected: Option<Position>) -> Self {
        self.selected = selected;
        self
    }
}

/// Global variables of one program. Every assignment writes here; there are
/// no nested scopes in task scripts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Environment {
    variables: HashMap<String, Value>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.variables.get(name).copied()
    }

    /// Binds `name`, returning the previous value if there was one.
    pub fn set(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.variables.insert(name.into(), value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn clear(&mut self) {
        self.variables.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.variables.iter().map(|(k, v)| (k.as_str(), v))
    }
}
