use thiserror::Error;

use crate::ast::ASTError;
use crate::eval::expression::EvalError;
use crate::program::ProgramError;
use crate::scheduler::SchedulerError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("AST error: {0}")]
    AST(#[from] ASTError),
    #[error("Eval error: {0}")]
    Eval(#[from] EvalError),
    #[error("Program error: {0}")]
    Program(#[from] ProgramError),
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type InternalResult<T> = Result<T, Error>;

impl Error {
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Error::Internal(message.into())
    }
}
