use rand::seq::SliceRandom;
use thiserror::Error;
use tracing::debug;

use super::context::{Environment, ExecutionContext};
use super::value::{Position, Relation, UnitId, Value, ValueKind};
use crate::ast::Expression;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    /// A unit the script refers to is gone, or there is no live unit to refer to.
    #[error("Dead reference: {0}")]
    DeadReference(String),
    /// A world query that the script depends on came back empty.
    #[error("Missing target: {0}")]
    MissingTarget(String),
    #[error("Undefined variable: {0}")]
    UndefinedVariable(String),
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: ValueKind, found: ValueKind },
    /// Structural problem that a validated tree cannot have.
    #[error("Malformed statement tree: {0}")]
    Malformed(String),
}

pub type EvalResult<T> = Result<T, EvalError>;

/// Evaluates expressions against the environment and world of one program.
///
/// Evaluation never mutates the environment or the world. Only `next_to`
/// and `any` draw from the random source; every other expression gives the
/// same answer when evaluated twice in the same state.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExpressionEvaluator;

impl ExpressionEvaluator {
    pub fn new() -> Self {
        Self
    }

    pub fn eval_expression(
        &self,
        expr: &Expression,
        env: &Environment,
        ctx: &mut ExecutionContext,
    ) -> EvalResult<Value> {
        match expr {
            Expression::True => Ok(Value::Boolean(true)),
            Expression::False => Ok(Value::Boolean(false)),
            Expression::Not { operand } => Ok((!self.eval_boolean(operand, env, ctx)?).into()),
            Expression::And { left, right } => {
                let value =
                    self.eval_boolean(left, env, ctx)? && self.eval_boolean(right, env, ctx)?;
                Ok(value.into())
            }
            Expression::Or { left, right } => {
                let value =
                    self.eval_boolean(left, env, ctx)? || self.eval_boolean(right, env, ctx)?;
                Ok(value.into())
            }
            Expression::IsPassable { position } => {
                let position = self.eval_position(position, env, ctx)?;
                Ok(ctx.world.is_passable(position).into())
            }
            Expression::IsSolid { position } => {
                let position = self.eval_position(position, env, ctx)?;
                Ok(ctx.world.is_solid(position).into())
            }
            Expression::IsAlive { unit } => {
                let unit = self.eval_unit(unit, env, ctx)?;
                Ok((!ctx.world.is_terminated(unit)).into())
            }
            Expression::IsFriend { unit } => {
                let unit = self.eval_live_unit(unit, env, ctx)?;
                Ok((self.relation_to(unit, ctx)? == Relation::Friend).into())
            }
            Expression::IsEnemy { unit } => {
                let unit = self.eval_live_unit(unit, env, ctx)?;
                Ok((self.relation_to(unit, ctx)? == Relation::Enemy).into())
            }
            Expression::CarriesItem { unit } => {
                let unit = self.eval_live_unit(unit, env, ctx)?;
                Ok(ctx.world.carries_item(unit).into())
            }
            Expression::Position { x, y, z } => Ok(Position::new(*x, *y, *z).into()),
            Expression::Here => Ok(self.here(ctx)?.into()),
            Expression::Resource { resource } => {
                let here = self.here(ctx)?;
                ctx.world
                    .closest_of(*resource, here)
                    .map(Value::from)
                    .ok_or_else(|| EvalError::MissingTarget(format!("no {} near {}", resource, here)))
            }
            Expression::NextTo { position } => {
                let position = self.eval_position(position, env, ctx)?;
                let candidates: Vec<Position> = ctx
                    .world
                    .neighbors(position)
                    .into_iter()
                    .filter(|p| ctx.world.is_passable(*p))
                    .collect();
                candidates
                    .choose(&mut *ctx.rng)
                    .copied()
                    .map(Value::from)
                    .ok_or_else(|| {
                        EvalError::MissingTarget(format!("no passable cube next to {}", position))
                    })
            }
            Expression::PositionOf { unit } => {
                let unit = self.eval_live_unit(unit, env, ctx)?;
                ctx.world
                    .position_of(unit)
                    .map(Value::from)
                    .ok_or_else(|| EvalError::DeadReference(format!("{} has no position", unit)))
            }
            Expression::Selected => ctx
                .selected
                .map(Value::from)
                .ok_or_else(|| EvalError::MissingTarget("task has no selected position".into())),
            Expression::This => {
                if ctx.world.is_terminated(ctx.unit) {
                    return Err(EvalError::DeadReference(format!("{} is terminated", ctx.unit)));
                }
                Ok(ctx.unit.into())
            }
            Expression::Friend => Ok(self.closest_unit(Relation::Friend, ctx)?.into()),
            Expression::Enemy => Ok(self.closest_unit(Relation::Enemy, ctx)?.into()),
            Expression::Any => Ok(self.any_unit(ctx)?.into()),
            Expression::Variable { name } => env
                .get(name)
                .ok_or_else(|| EvalError::UndefinedVariable(name.clone())),
        }
    }

    pub fn eval_boolean(
        &self,
        expr: &Expression,
        env: &Environment,
        ctx: &mut ExecutionContext,
    ) -> EvalResult<bool> {
        match self.eval_expression(expr, env, ctx)? {
            Value::Boolean(b) => Ok(b),
            other => Err(EvalError::TypeMismatch {
                expected: ValueKind::Boolean,
                found: other.kind(),
            }),
        }
    }

    pub fn eval_position(
        &self,
        expr: &Expression,
        env: &Environment,
        ctx: &mut ExecutionContext,
    ) -> EvalResult<Position> {
        match self.eval_expression(expr, env, ctx)? {
            Value::Position(p) => Ok(p),
            other => Err(EvalError::TypeMismatch {
                expected: ValueKind::Position,
                found: other.kind(),
            }),
        }
    }

    /// Evaluates to a unit without checking that it is still alive.
    pub fn eval_unit(
        &self,
        expr: &Expression,
        env: &Environment,
        ctx: &mut ExecutionContext,
    ) -> EvalResult<UnitId> {
        match self.eval_expression(expr, env, ctx)? {
            Value::Unit(u) => Ok(u),
            other => Err(EvalError::TypeMismatch {
                expected: ValueKind::Unit,
                found: other.kind(),
            }),
        }
    }

    /// Evaluates to a unit that must still be part of the world.
    pub fn eval_live_unit(
        &self,
        expr: &Expression,
        env: &Environment,
        ctx: &mut ExecutionContext,
    ) -> EvalResult<UnitId> {
        let unit = self.eval_unit(expr, env, ctx)?;
        if ctx.world.is_terminated(unit) {
            debug!("expression refers to terminated {}", unit);
            return Err(EvalError::DeadReference(format!("{} is terminated", unit)));
        }
        Ok(unit)
    }

    fn here(&self, ctx: &ExecutionContext) -> EvalResult<Position> {
        ctx.world
            .position_of(ctx.unit)
            .ok_or_else(|| EvalError::DeadReference(format!("{} has no position", ctx.unit)))
    }

    fn relation_to(&self, other: UnitId, ctx: &ExecutionContext) -> EvalResult<Relation> {
        let own = ctx
            .world
            .faction(ctx.unit)
            .ok_or_else(|| EvalError::DeadReference(format!("{} has no faction", ctx.unit)))?;
        match ctx.world.faction(other) {
            Some(faction) if faction == own => Ok(Relation::Friend),
            Some(_) => Ok(Relation::Enemy),
            None => Err(EvalError::DeadReference(format!("{} has no faction", other))),
        }
    }

    /// Nearest live unit with the given relation; ties go to the lowest id.
    fn closest_unit(&self, relation: Relation, ctx: &ExecutionContext) -> EvalResult<UnitId> {
        let here = self.here(ctx)?;
        let mut best: Option<(i64, UnitId)> = None;
        for unit in ctx.world.units() {
            if unit == ctx.unit || ctx.world.is_terminated(unit) {
                continue;
            }
            if self.relation_to(unit, ctx).ok() != Some(relation) {
                continue;
            }
            let Some(position) = ctx.world.position_of(unit) else {
                continue;
            };
            let candidate = (here.distance_squared(&position), unit);
            if best.map_or(true, |current| candidate < current) {
                best = Some(candidate);
            }
        }
        best.map(|(_, unit)| unit)
            .ok_or_else(|| EvalError::DeadReference(format!("no live {} in the world", relation)))
    }

    fn any_unit(&self, ctx: &mut ExecutionContext) -> EvalResult<UnitId> {
        let candidates: Vec<UnitId> = ctx
            .world
            .units()
            .into_iter()
            .filter(|u| *u != ctx.unit && !ctx.world.is_terminated(*u))
            .collect();
        candidates
            .choose(&mut *ctx.rng)
            .copied()
            .ok_or_else(|| EvalError::DeadReference("no other live unit in the world".into()))
    }
}
