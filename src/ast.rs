//! Definition trees for task scripts.
//!
//! These are the owned, serde-friendly trees handed over by whatever produces
//! task scripts. They carry no execution state; [`crate::eval::tree::StatementTree`]
//! flattens a [`Statement`] into an arena and validates it before a task can be
//! scheduled.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::eval::value::{Position, ResourceKind, ValueKind};

/// Diagnostic position of a node in the script it was produced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
}

impl SourceLocation {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

// Expressions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expression {
    // booleans
    True,
    False,
    Not {
        operand: Box<Expression>,
    },
    And {
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Or {
        left: Box<Expression>,
        right: Box<Expression>,
    },
    IsPassable {
        position: Box<Expression>,
    },
    IsSolid {
        position: Box<Expression>,
    },
    IsAlive {
        unit: Box<Expression>,
    },
    IsFriend {
        unit: Box<Expression>,
    },
    IsEnemy {
        unit: Box<Expression>,
    },
    CarriesItem {
        unit: Box<Expression>,
    },
    // positions
    Position {
        x: i32,
        y: i32,
        z: i32,
    },
    Here,
    Resource {
        resource: ResourceKind,
    },
    NextTo {
        position: Box<Expression>,
    },
    PositionOf {
        unit: Box<Expression>,
    },
    Selected,
    // units
    This,
    Friend,
    Enemy,
    Any,
    // globals
    Variable {
        name: String,
    },
}

impl Expression {
    pub fn position(x: i32, y: i32, z: i32) -> Self {
        Expression::Position { x, y, z }
    }

    pub fn var(name: impl Into<String>) -> Self {
        Expression::Variable { name: name.into() }
    }

    pub fn boolean(value: bool) -> Self {
        if value {
            Expression::True
        } else {
            Expression::False
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(operand: Expression) -> Self {
        Expression::Not {
            operand: Box::new(operand),
        }
    }

    pub fn and(left: Expression, right: Expression) -> Self {
        Expression::And {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn or(left: Expression, right: Expression) -> Self {
        Expression::Or {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn resource(resource: ResourceKind) -> Self {
        Expression::Resource { resource }
    }

    pub fn next_to(position: Expression) -> Self {
        Expression::NextTo {
            position: Box::new(position),
        }
    }

    pub fn position_of(unit: Expression) -> Self {
        Expression::PositionOf {
            unit: Box::new(unit),
        }
    }

    pub fn is_passable(position: Expression) -> Self {
        Expression::IsPassable {
            position: Box::new(position),
        }
    }

    pub fn is_alive(unit: Expression) -> Self {
        Expression::IsAlive {
            unit: Box::new(unit),
        }
    }

    pub fn is_enemy(unit: Expression) -> Self {
        Expression::IsEnemy {
            unit: Box::new(unit),
        }
    }

    /// Static result kind of this expression. Variable reads are only known
    /// at runtime and report [`ValueKind::Any`].
    pub fn result_kind(&self) -> ValueKind {
        match self {
            Expression::True
            | Expression::False
            | Expression::Not { .. }
            | Expression::And { .. }
            | Expression::Or { .. }
            | Expression::IsPassable { .. }
            | Expression::IsSolid { .. }
            | Expression::IsAlive { .. }
            | Expression::IsFriend { .. }
            | Expression::IsEnemy { .. }
            | Expression::CarriesItem { .. } => ValueKind::Boolean,
            Expression::Position { .. }
            | Expression::Here
            | Expression::Resource { .. }
            | Expression::NextTo { .. }
            | Expression::PositionOf { .. }
            | Expression::Selected => ValueKind::Position,
            Expression::This | Expression::Friend | Expression::Enemy | Expression::Any => {
                ValueKind::Unit
            }
            Expression::Variable { .. } => ValueKind::Any,
        }
    }

    /// Direct operands together with the kind each operand slot expects.
    pub fn operands(&self) -> Vec<(&Expression, ValueKind)> {
        match self {
            Expression::Not { operand } => vec![(operand, ValueKind::Boolean)],
            Expression::And { left, right } | Expression::Or { left, right } => {
                vec![(left, ValueKind::Boolean), (right, ValueKind::Boolean)]
            }
            Expression::IsPassable { position }
            | Expression::IsSolid { position }
            | Expression::NextTo { position } => vec![(position, ValueKind::Position)],
            Expression::IsAlive { unit }
            | Expression::IsFriend { unit }
            | Expression::IsEnemy { unit }
            | Expression::CarriesItem { unit }
            | Expression::PositionOf { unit } => vec![(unit, ValueKind::Unit)],
            _ => vec![],
        }
    }
}

// Domain actions a statement can hand to the controlled unit
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActionKind {
    MoveTo,
    Work,
    Follow,
    Attack,
}

impl ActionKind {
    /// Kind of target the action expects.
    pub fn target_kind(&self) -> ValueKind {
        match self {
            ActionKind::MoveTo | ActionKind::Work => ValueKind::Position,
            ActionKind::Follow | ActionKind::Attack => ValueKind::Unit,
        }
    }
}

// Statements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    #[serde(flatten)]
    pub kind: StatementKind,
    #[serde(default)]
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatementKind {
    Sequence {
        statements: Vec<Statement>,
    },
    If {
        condition: Expression,
        then_branch: Box<Statement>,
        #[serde(default)]
        else_branch: Option<Box<Statement>>,
    },
    While {
        condition: Expression,
        body: Box<Statement>,
    },
    Break,
    Assign {
        variable: String,
        value: Expression,
    },
    Print {
        value: Expression,
    },
    Void,
    Action {
        action: ActionKind,
        target: Expression,
    },
}

impl From<StatementKind> for Statement {
    fn from(kind: StatementKind) -> Self {
        Self {
            kind,
            location: SourceLocation::default(),
        }
    }
}

impl Statement {
    pub fn at(mut self, line: usize, column: usize) -> Self {
        self.location = SourceLocation::new(line, column);
        self
    }

    pub fn sequence(statements: Vec<Statement>) -> Self {
        StatementKind::Sequence { statements }.into()
    }

    pub fn if_then(condition: Expression, then_branch: Statement) -> Self {
        StatementKind::If {
            condition,
            then_branch: Box::new(then_branch),
            else_branch: None,
        }
        .into()
    }

    pub fn if_then_else(
        condition: Expression,
        then_branch: Statement,
        else_branch: Statement,
    ) -> Self {
        StatementKind::If {
            condition,
            then_branch: Box::new(then_branch),
            else_branch: Some(Box::new(else_branch)),
        }
        .into()
    }

    pub fn while_loop(condition: Expression, body: Statement) -> Self {
        StatementKind::While {
            condition,
            body: Box::new(body),
        }
        .into()
    }

    pub fn break_loop() -> Self {
        StatementKind::Break.into()
    }

    pub fn assign(variable: impl Into<String>, value: Expression) -> Self {
        StatementKind::Assign {
            variable: variable.into(),
            value,
        }
        .into()
    }

    pub fn print(value: Expression) -> Self {
        StatementKind::Print { value }.into()
    }

    pub fn void() -> Self {
        StatementKind::Void.into()
    }

    pub fn action(action: ActionKind, target: Expression) -> Self {
        StatementKind::Action { action, target }.into()
    }

    pub fn move_to(target: Expression) -> Self {
        Self::action(ActionKind::MoveTo, target)
    }

    pub fn work(target: Expression) -> Self {
        Self::action(ActionKind::Work, target)
    }

    pub fn follow(target: Expression) -> Self {
        Self::action(ActionKind::Follow, target)
    }

    pub fn attack(target: Expression) -> Self {
        Self::action(ActionKind::Attack, target)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ASTError {
    #[error("break outside of a loop at {location}")]
    BreakOutsideLoop { location: SourceLocation },
    #[error("negative coordinate ({x}, {y}, {z}) at {location}")]
    NegativeCoordinate {
        x: i32,
        y: i32,
        z: i32,
        location: SourceLocation,
    },
    #[error("type mismatch at {location}: expected {expected}, found {found}")]
    TypeMismatch {
        expected: ValueKind,
        found: ValueKind,
        location: SourceLocation,
    },
    #[error("task name must not be empty")]
    EmptyTaskName,
    #[error("selected position {0} has a negative coordinate")]
    NegativeSelection(Position),
}

pub type ASTResult<T> = Result<T, ASTError>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_statement_from_json() {
        let json = r#"{
            "kind": "while",
            "condition": { "kind": "true" },
            "body": {
                "kind": "sequence",
                "statements": [
                    { "kind": "assign", "variable": "w", "value": { "kind": "resource", "resource": "workshop" } },
                    { "kind": "action", "action": "move_to", "target": { "kind": "variable", "name": "w" }, "location": { "line": 3, "column": 5 } },
                    { "kind": "break" }
                ]
            }
        }"#;
        let statement: Statement = serde_json::from_str(json).unwrap();

        let expected = Statement::while_loop(
            Expression::True,
            Statement::sequence(vec![
                Statement::assign("w", Expression::resource(ResourceKind::Workshop)),
                Statement::move_to(Expression::var("w")).at(3, 5),
                Statement::break_loop(),
            ]),
        );
        assert_eq!(statement, expected);
    }

    #[test]
    fn test_if_without_else_defaults() {
        let json = r#"{ "kind": "if", "condition": { "kind": "false" }, "then_branch": { "kind": "void" } }"#;
        let statement: Statement = serde_json::from_str(json).unwrap();
        match statement.kind {
            StatementKind::If { else_branch, .. } => assert!(else_branch.is_none()),
            other => panic!("Expected If, got {:?}", other),
        }
    }

    #[test]
    fn test_result_kinds() {
        assert_eq!(Expression::True.result_kind(), ValueKind::Boolean);
        assert_eq!(
            Expression::next_to(Expression::Here).result_kind(),
            ValueKind::Position
        );
        assert_eq!(Expression::Enemy.result_kind(), ValueKind::Unit);
        assert_eq!(Expression::var("x").result_kind(), ValueKind::Any);
        assert_eq!(ActionKind::Attack.target_kind(), ValueKind::Unit);
        assert_eq!(ActionKind::MoveTo.to_string(), "move_to");
    }
}
