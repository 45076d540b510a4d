//! Task Script Evaluation System
//!
//! The evaluation system runs task scripts on behalf of a single controlled
//! unit, a bounded slice at a time. A script never runs to completion in one
//! call: each call gets a budget of time units and returns control with its
//! position remembered when the budget runs out or when the unit is busy
//! carrying out an action.
//!
//! # Core Components
//!
//! ## Expression Evaluator
//! Evaluates value-producing expressions (booleans, positions, units and
//! global variable reads) against the world and the controlled unit.
//!
//! ## Statement Tree
//! The arena form of a script. Nodes keep a non-owning link to their parent,
//! which is how `break` finds its loop. Resumption state lives beside the
//! tree in a [`tree::Progress`] table, one entry per node.
//!
//! ## Statement Evaluator
//! Performs one tick's worth of a statement and records where it stopped.
//!
//! ## Execution Context
//! Bundles the collaborators a script talks to: the [`world::World`], the
//! controlled unit, the task's selected position and a random source.
//!
//! # Evaluation Pipeline
//!
//! 1. A definition tree ([`crate::ast::Statement`]) is built into a
//!    [`tree::StatementTree`] and checked for well-formedness
//! 2. [`crate::program::Program`] performs the root statement once per tick
//! 3. Statements charge one time unit per primitive step and suspend when
//!    the budget is gone
//! 4. Evaluation failures stop the program and hand the task back to its
//!    scheduler

pub mod context;
pub mod expression;
pub mod statement;
pub mod tree;
pub mod value;
pub mod world;
