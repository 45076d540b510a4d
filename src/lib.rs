//! # unitask: resumable task scripts for simulated units
//!
//! unitask drives autonomous units in a simulated world through small
//! imperative scripts ("tasks"). Scripts run a little at a time: every
//! simulation tick each running script receives a fixed budget of time
//! units, spends them on primitive statements, and is suspended exactly
//! where it stopped when the budget runs out.
//!
//! ## Components
//!
//! ### 1. Script definitions
//! - Definition trees for statements and expressions ([`ast`]), readable
//!   from JSON through serde.
//!
//! ### 2. Evaluation
//! - Values and world coordinates ([`eval::value`])
//! - The collaborator surface a script talks to ([`eval::world`])
//! - Expression evaluation ([`eval::expression`])
//! - Arena statement trees and their resumption state ([`eval::tree`])
//! - The resumable statement protocol ([`eval::statement`])
//!
//! ### 3. Execution
//! - [`program`] runs one script for one unit, tick by tick.
//! - [`task`] wraps a script with a name, a priority and an optional target.
//! - [`scheduler`] keeps per-faction pools of available and assigned tasks,
//!   hands tasks to idle units and reclaims the ones that cannot finish.
//!
//! ### 4. Support
//! - A reference grid world for tests and the command line ([`sandbox`])
//! - Configuration ([`config`]) and errors ([`error`])
//!
//! ## Tick flow
//!
//! ```text
//! TaskBoard::dispatch_idle -> TaskBoard::advance_tick -> Program::execute -> StatementEvaluator::perform
//!                                      |                                            |
//!                              finished: terminate                         World queries / actions
//!                              failed:   reclaim with backoff
//! ```

pub mod ast;
pub mod config;
pub mod error;
pub mod eval;
pub mod program;
pub mod sandbox;
pub mod scheduler;
pub mod task;

// Re-exports
pub use ast::*;
pub use error::*;
pub use eval::*;
pub use program::{ExecutionStatus, Program, ProgramError, ProgramResult, SuspendReason};
pub use scheduler::{Scheduler, SchedulerError, SchedulerId, SchedulerResult, TaskBoard};
pub use task::{Task, TaskDef, TaskId};
