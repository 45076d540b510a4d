//! A running instance of a task script.
//!
//! A [`Program`] couples a shared, immutable [`StatementTree`] with the
//! per-run state the tree needs to be resumed: a [`Progress`] table, the
//! global variables and the tick timer. Each call to [`Program::execute`]
//! advances the script by at most one tick's worth of time units.

use std::collections::VecDeque;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ExecutionConfig;
use crate::eval::{
    context::{Environment, ExecutionContext},
    expression::EvalError,
    statement::{Outcome, StatementEvaluator},
    tree::{Progress, StatementId, StatementTree},
    value::Value,
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProgramError {
    #[error("Program interrupted: {0}")]
    Interrupted(#[from] EvalError),
    #[error("Program stopped")]
    Stopped,
}

pub type ProgramResult<T> = Result<T, ProgramError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum SuspendReason {
    /// The tick's time units ran out.
    TimeDepleted,
    /// An issued action is still being carried out by the unit.
    AwaitingAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Finished,
    Suspended(SuspendReason),
    /// Interrupted earlier; the program will not run again until reset.
    Stopped,
}

/// Mutable state threaded through statement execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgramState {
    pub environment: Environment,
    timer: u32,
    time_depleted: bool,
    output: VecDeque<String>,
    max_output: usize,
}

impl Default for ProgramState {
    fn default() -> Self {
        Self::new(ExecutionConfig::default().max_output_lines)
    }
}

impl ProgramState {
    pub fn new(max_output: usize) -> Self {
        Self {
            environment: Environment::new(),
            timer: 0,
            time_depleted: false,
            output: VecDeque::new(),
            max_output,
        }
    }

    pub fn begin_tick(&mut self, budget: u32) {
        self.timer = budget;
        self.time_depleted = false;
    }

    /// Takes one time unit off the timer. Returns `false`, and marks the
    /// program as out of time, when there is nothing left to take.
    pub fn spend_time_unit(&mut self) -> bool {
        if self.timer == 0 {
            self.time_depleted = true;
            return false;
        }
        self.timer -= 1;
        true
    }

    pub fn timer(&self) -> u32 {
        self.timer
    }

    pub fn is_time_depleted(&self) -> bool {
        self.time_depleted
    }

    pub fn emit(&mut self, line: String) {
        if self.max_output == 0 {
            return;
        }
        while self.output.len() >= self.max_output {
            self.output.pop_front();
        }
        self.output.push_back(line);
    }

    pub fn take_output(&mut self) -> Vec<String> {
        self.output.drain(..).collect()
    }
}

#[derive(Debug, Clone)]
pub struct Program {
    tree: Arc<StatementTree>,
    progress: Progress,
    state: ProgramState,
    stopped: bool,
    evaluator: StatementEvaluator,
}

impl Program {
    pub fn new(tree: Arc<StatementTree>) -> Self {
        Self::with_config(tree, &ExecutionConfig::default())
    }

    pub fn with_config(tree: Arc<StatementTree>, config: &ExecutionConfig) -> Self {
        let progress = Progress::new(&tree);
        Self {
            tree,
            progress,
            state: ProgramState::new(config.max_output_lines),
            stopped: false,
            evaluator: StatementEvaluator::default(),
        }
    }

    /// Runs the script for one tick with `budget` time units.
    ///
    /// A failing expression interrupts the program: its progress is cleared,
    /// it reports [`ExecutionStatus::Stopped`] from then on, and the error is
    /// returned to the caller.
    pub fn execute(
        &mut self,
        budget: u32,
        ctx: &mut ExecutionContext,
    ) -> ProgramResult<ExecutionStatus> {
        if self.stopped {
            return Ok(ExecutionStatus::Stopped);
        }
        self.state.begin_tick(budget);

        let result = self.evaluator.perform(
            &self.tree,
            self.tree.root(),
            &mut self.progress,
            &mut self.state,
            ctx,
        );

        match result {
            Ok(Outcome::Completed) => {
                debug!(unit = %ctx.unit, "program finished");
                self.progress.reset();
                Ok(ExecutionStatus::Finished)
            }
            Ok(Outcome::Suspended) => {
                let reason = if self.state.is_time_depleted() {
                    SuspendReason::TimeDepleted
                } else {
                    SuspendReason::AwaitingAction
                };
                Ok(ExecutionStatus::Suspended(reason))
            }
            Ok(Outcome::Broke(target)) => {
                self.interrupt();
                Err(EvalError::Malformed(format!("break escaped to loop {}", target)).into())
            }
            Err(e) => {
                warn!(unit = %ctx.unit, "program interrupted: {}", e);
                self.interrupt();
                Err(e.into())
            }
        }
    }

    /// Stops the program and forgets where it was.
    pub fn interrupt(&mut self) {
        self.stopped = true;
        self.progress.reset();
    }

    /// Makes a stopped or finished program runnable from the top again.
    /// Variables are kept.
    pub fn reset(&mut self) {
        self.stopped = false;
        self.progress.reset();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn variable(&self, name: &str) -> Option<Value> {
        self.state.environment.get(name)
    }

    pub fn environment(&self) -> &Environment {
        &self.state.environment
    }

    pub fn environment_mut(&mut self) -> &mut Environment {
        &mut self.state.environment
    }

    /// The statement the program will resume at, if it is mid-run.
    pub fn current_statement(&self) -> Option<StatementId> {
        self.progress.current(&self.tree)
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    pub fn tree(&self) -> &Arc<StatementTree> {
        &self.tree
    }

    pub fn take_output(&mut self) -> Vec<String> {
        self.state.take_output()
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::ast::{Expression, Statement};
    use crate::eval::value::{Position, UnitId};
    use crate::eval::world::MockWorld;
    use pretty_assertions::assert_eq;

    fn program(script: Statement) -> Program {
        Program::new(Arc::new(StatementTree::build(&script).unwrap()))
    }

    fn run(program: &mut Program, world: &mut MockWorld, budget: u32) -> ProgramResult<ExecutionStatus> {
        let mut rng = StdRng::seed_from_u64(0);
        let mut ctx = ExecutionContext::new(world, UnitId(1), &mut rng);
        program.execute(budget, &mut ctx)
    }

    #[test]
    fn test_output_is_bounded() {
        let mut state = ProgramState::new(2);
        for line in ["a", "b", "c"] {
            state.emit(line.to_string());
        }
        assert_eq!(state.take_output(), vec!["b".to_string(), "c".to_string()]);
        assert!(state.take_output().is_empty());
    }

    #[test]
    fn test_timer_depletion() {
        let mut state = ProgramState::default();
        state.begin_tick(1);
        assert!(state.spend_time_unit());
        assert!(!state.is_time_depleted());
        assert!(!state.spend_time_unit());
        assert!(state.is_time_depleted());
        state.begin_tick(1);
        assert!(!state.is_time_depleted());
    }

    #[test]
    fn test_finish_then_rerun() {
        let mut world = MockWorld::new();
        let mut program = program(Statement::sequence(vec![
            Statement::assign("a", Expression::position(1, 2, 3)),
            Statement::print(Expression::var("a")),
        ]));
        assert_eq!(
            run(&mut program, &mut world, 1),
            Ok(ExecutionStatus::Suspended(SuspendReason::TimeDepleted))
        );
        assert!(program.current_statement().is_some());
        assert_eq!(run(&mut program, &mut world, 1), Ok(ExecutionStatus::Finished));
        assert_eq!(program.current_statement(), None);
        assert_eq!(
            program.variable("a"),
            Some(Value::Position(Position::new(1, 2, 3)))
        );
        assert_eq!(program.take_output(), vec!["(1, 2, 3)".to_string()]);

        // A finished program starts over on the next call.
        assert_eq!(run(&mut program, &mut world, 5), Ok(ExecutionStatus::Finished));
        assert_eq!(program.take_output().len(), 1);
    }

    #[test]
    fn test_awaiting_action_reason() {
        let mut world = MockWorld::new();
        world.expect_issue_work().return_const(());
        world.expect_is_busy().returning(|_| true);
        let mut program = program(Statement::work(Expression::position(0, 0, 0)));
        assert_eq!(
            run(&mut program, &mut world, 5),
            Ok(ExecutionStatus::Suspended(SuspendReason::AwaitingAction))
        );
    }

    #[test]
    fn test_failure_stops_program() {
        let mut world = MockWorld::new();
        let mut program = program(Statement::print(Expression::var("missing")));
        assert_eq!(
            run(&mut program, &mut world, 5),
            Err(ProgramError::Interrupted(EvalError::UndefinedVariable(
                "missing".to_string()
            )))
        );
        assert!(program.is_stopped());
        assert_eq!(program.progress().pending_count(), 0);
        assert_eq!(run(&mut program, &mut world, 5), Ok(ExecutionStatus::Stopped));

        program.environment_mut().set("missing", Value::Boolean(false));
        program.reset();
        assert_eq!(run(&mut program, &mut world, 5), Ok(ExecutionStatus::Finished));
        assert_eq!(program.take_output(), vec!["false".to_string()]);
    }
}
