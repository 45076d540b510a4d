use tracing::{debug, info};

use super::{
    context::ExecutionContext,
    expression::{EvalError, EvalResult, ExpressionEvaluator},
    tree::{Branch, Node, NodeProgress, Progress, StatementId, StatementTree},
};
use crate::ast::{ActionKind, Expression};
use crate::program::ProgramState;

/// What a statement did with the time it was given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing left to do in this run of the statement.
    Completed,
    /// Out of time, or waiting on the unit. Resume at the same place next tick.
    Suspended,
    /// A `break` is unwinding towards the given loop.
    Broke(StatementId),
}

/// Performs statements one tick at a time.
///
/// Every primitive step (assignment, print, break, a condition check, an
/// action dispatch) costs one time unit from the program's timer. When the
/// timer is empty the step is not taken, the program is marked time-depleted
/// and the statement reports [`Outcome::Suspended`] with its progress intact.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatementEvaluator {
    pub expression_evaluator: ExpressionEvaluator,
}

impl StatementEvaluator {
    pub fn new(expression_evaluator: ExpressionEvaluator) -> Self {
        Self {
            expression_evaluator,
        }
    }

    pub fn perform(
        &self,
        tree: &StatementTree,
        id: StatementId,
        progress: &mut Progress,
        state: &mut ProgramState,
        ctx: &mut ExecutionContext,
    ) -> EvalResult<Outcome> {
        let entry = tree
            .get(id)
            .ok_or_else(|| EvalError::Malformed(format!("unknown statement {}", id)))?;
        if let Some(p) = progress.get_mut(id) {
            p.pending = true;
        }

        // Dispatch to the appropriate method based on the statement type
        let outcome = match &entry.node {
            Node::Sequence { children } => {
                self.perform_sequence(tree, id, children, progress, state, ctx)?
            }
            Node::If {
                condition,
                then_branch,
                else_branch,
            } => self.perform_if(
                tree,
                id,
                condition,
                (*then_branch, *else_branch),
                progress,
                state,
                ctx,
            )?,
            Node::While { condition, body } => {
                self.perform_while(tree, id, condition, *body, progress, state, ctx)?
            }
            Node::Break => self.perform_break(tree, id, progress, state)?,
            Node::Assign { variable, value } => {
                if !state.spend_time_unit() {
                    return Ok(Outcome::Suspended);
                }
                let value =
                    self.expression_evaluator
                        .eval_expression(value, &state.environment, ctx)?;
                state.environment.set(variable.clone(), value);
                Outcome::Completed
            }
            Node::Print { value } => {
                if !state.spend_time_unit() {
                    return Ok(Outcome::Suspended);
                }
                let value =
                    self.expression_evaluator
                        .eval_expression(value, &state.environment, ctx)?;
                info!(unit = %ctx.unit, "print: {}", value);
                state.emit(value.to_string());
                Outcome::Completed
            }
            Node::Void => Outcome::Completed,
            Node::Action { action, target } => {
                self.perform_action(id, *action, target, progress, state, ctx)?
            }
        };

        // Completed nodes start from scratch when entered again. A break has
        // already cleared everything between itself and its loop.
        if outcome == Outcome::Completed {
            progress.set(id, NodeProgress::default());
        }
        Ok(outcome)
    }

    fn perform_sequence(
        &self,
        tree: &StatementTree,
        id: StatementId,
        children: &[StatementId],
        progress: &mut Progress,
        state: &mut ProgramState,
        ctx: &mut ExecutionContext,
    ) -> EvalResult<Outcome> {
        loop {
            let cursor = progress.get(id).cursor;
            let Some(&child) = children.get(cursor) else {
                return Ok(Outcome::Completed);
            };
            match self.perform(tree, child, progress, state, ctx)? {
                Outcome::Completed => {
                    if let Some(p) = progress.get_mut(id) {
                        p.cursor = cursor + 1;
                    }
                }
                other => return Ok(other),
            }
        }
    }

    /// The branch is chosen once, on first entry, and kept until it completes.
    /// Re-deciding every tick would abandon multi-tick actions half way. The
    /// latch is only released when the branch is waiting on an action the
    /// unit can no longer carry out.
    #[allow(clippy::too_many_arguments)]
    fn perform_if(
        &self,
        tree: &StatementTree,
        id: StatementId,
        condition: &Expression,
        (then_branch, else_branch): (StatementId, StatementId),
        progress: &mut Progress,
        state: &mut ProgramState,
        ctx: &mut ExecutionContext,
    ) -> EvalResult<Outcome> {
        let target_of = |branch: Branch| match branch {
            Branch::Then => then_branch,
            Branch::Else => else_branch,
        };

        let mut latched = progress.get(id).branch;
        if let Some(branch) = latched {
            let target = target_of(branch);
            if awaiting_action(tree, target, progress) && ctx.world.cannot_act(ctx.unit) {
                debug!(unit = %ctx.unit, "releasing {} branch of statement {}", branch, id);
                progress.reset_subtree(tree, target);
                latched = None;
                if let Some(p) = progress.get_mut(id) {
                    p.branch = None;
                }
            }
        }

        let branch = match latched {
            Some(branch) => branch,
            None => {
                if !state.spend_time_unit() {
                    return Ok(Outcome::Suspended);
                }
                let branch = if self.expression_evaluator.eval_boolean(
                    condition,
                    &state.environment,
                    ctx,
                )? {
                    Branch::Then
                } else {
                    Branch::Else
                };
                if let Some(p) = progress.get_mut(id) {
                    p.branch = Some(branch);
                }
                branch
            }
        };

        self.perform(tree, target_of(branch), progress, state, ctx)
    }

    #[allow(clippy::too_many_arguments)]
    fn perform_while(
        &self,
        tree: &StatementTree,
        id: StatementId,
        condition: &Expression,
        body: StatementId,
        progress: &mut Progress,
        state: &mut ProgramState,
        ctx: &mut ExecutionContext,
    ) -> EvalResult<Outcome> {
        loop {
            if !progress.get(id).body_owes_turn {
                if !state.spend_time_unit() {
                    return Ok(Outcome::Suspended);
                }
                if !self
                    .expression_evaluator
                    .eval_boolean(condition, &state.environment, ctx)?
                {
                    return Ok(Outcome::Completed);
                }
                if let Some(p) = progress.get_mut(id) {
                    p.body_owes_turn = true;
                }
            }

            match self.perform(tree, body, progress, state, ctx)? {
                Outcome::Completed => {
                    if let Some(p) = progress.get_mut(id) {
                        p.body_owes_turn = false;
                    }
                }
                Outcome::Suspended => return Ok(Outcome::Suspended),
                Outcome::Broke(target) if target == id => return Ok(Outcome::Completed),
                Outcome::Broke(target) => return Ok(Outcome::Broke(target)),
            }
        }
    }

    /// Walks the parent chain up to the nearest loop, marking the break and
    /// everything between it and the loop as finished.
    fn perform_break(
        &self,
        tree: &StatementTree,
        id: StatementId,
        progress: &mut Progress,
        state: &mut ProgramState,
    ) -> EvalResult<Outcome> {
        if !state.spend_time_unit() {
            return Ok(Outcome::Suspended);
        }
        let target = tree
            .enclosing_loop(id)
            .ok_or_else(|| EvalError::Malformed(format!("break {} has no enclosing loop", id)))?;
        let mut cursor = Some(id);
        while let Some(node) = cursor.filter(|node| *node != target) {
            progress.set(node, NodeProgress::default());
            cursor = tree.parent(node);
        }
        Ok(Outcome::Broke(target))
    }

    /// Dispatching the command costs one unit. Completion is then polled at
    /// no cost, once per tick, until the unit is no longer busy.
    fn perform_action(
        &self,
        id: StatementId,
        action: ActionKind,
        target: &Expression,
        progress: &mut Progress,
        state: &mut ProgramState,
        ctx: &mut ExecutionContext,
    ) -> EvalResult<Outcome> {
        if !progress.get(id).issued {
            if !state.spend_time_unit() {
                return Ok(Outcome::Suspended);
            }
            let evaluator = &self.expression_evaluator;
            match action {
                ActionKind::MoveTo => {
                    let position = evaluator.eval_position(target, &state.environment, ctx)?;
                    ctx.world.issue_move(ctx.unit, position);
                }
                ActionKind::Work => {
                    let position = evaluator.eval_position(target, &state.environment, ctx)?;
                    ctx.world.issue_work(ctx.unit, position);
                }
                ActionKind::Follow => {
                    let other = evaluator.eval_live_unit(target, &state.environment, ctx)?;
                    ctx.world.issue_follow(ctx.unit, other);
                }
                ActionKind::Attack => {
                    let other = evaluator.eval_live_unit(target, &state.environment, ctx)?;
                    ctx.world.issue_attack(ctx.unit, other);
                }
            }
            debug!(unit = %ctx.unit, "{} issued by statement {}", action, id);
            if let Some(p) = progress.get_mut(id) {
                p.issued = true;
            }
        }

        if ctx.world.is_busy(ctx.unit) {
            return Ok(Outcome::Suspended);
        }
        Ok(Outcome::Completed)
    }
}

/// Whether execution below `from` is parked on an action that was issued
/// and is still being polled.
fn awaiting_action(tree: &StatementTree, from: StatementId, progress: &Progress) -> bool {
    let mut cursor = from;
    loop {
        if !progress.is_pending(cursor) {
            return false;
        }
        match tree
            .children(cursor)
            .into_iter()
            .find(|child| progress.is_pending(*child))
        {
            Some(next) => cursor = next,
            None => {
                return matches!(
                    tree.get(cursor).map(|n| &n.node),
                    Some(Node::Action { .. })
                ) && progress.get(cursor).issued
            }
        }
    }
}
