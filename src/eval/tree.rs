use crate::ast::{
    ASTError, ASTResult, ActionKind, Expression, SourceLocation, Statement, StatementKind,
};
use crate::eval::value::ValueKind;

/// Index of a node in a [`StatementTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatementId(usize);

impl StatementId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for StatementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Sequence {
        children: Vec<StatementId>,
    },
    If {
        condition: Expression,
        then_branch: StatementId,
        /// A `void` node when the script has no else branch.
        else_branch: StatementId,
    },
    While {
        condition: Expression,
        body: StatementId,
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

#[derive(Debug, Clone, PartialEq)]
pub struct StatementNode {
    pub node: Node,
    pub location: SourceLocation,
    /// Enclosing statement. Never an owning edge; only used to find the
    /// loop a `break` leaves.
    pub parent: Option<StatementId>,
}

/// Arena form of a script. Structure is immutable once built; all
/// resumption state lives in a separate [`Progress`] table.
#[derive(Debug, Clone, PartialEq)]
pub struct StatementTree {
    nodes: Vec<StatementNode>,
    root: StatementId,
}

impl StatementTree {
    /// Flattens a definition tree and checks it is well-formed: every
    /// `break` sits inside a loop, every operand has the kind its slot
    /// expects and literal positions have no negative coordinates.
    pub fn build(definition: &Statement) -> ASTResult<Self> {
        let mut tree = Self {
            nodes: Vec::new(),
            root: StatementId(0),
        };
        tree.root = tree.insert(definition, None);
        tree.validate()?;
        Ok(tree)
    }

    fn insert(&mut self, definition: &Statement, parent: Option<StatementId>) -> StatementId {
        let id = StatementId(self.nodes.len());
        // Reserve the slot first so children can point back at it.
        self.nodes.push(StatementNode {
            node: Node::Void,
            location: definition.location,
            parent,
        });
        let node = match &definition.kind {
            StatementKind::Sequence { statements } => Node::Sequence {
                children: statements
                    .iter()
                    .map(|s| self.insert(s, Some(id)))
                    .collect(),
            },
            StatementKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let then_branch = self.insert(then_branch, Some(id));
                let else_branch = match else_branch {
                    Some(else_branch) => self.insert(else_branch, Some(id)),
                    None => {
                        let void = Statement {
                            kind: StatementKind::Void,
                            location: definition.location,
                        };
                        self.insert(&void, Some(id))
                    }
                };
                Node::If {
                    condition: condition.clone(),
                    then_branch,
                    else_branch,
                }
            }
            StatementKind::While { condition, body } => Node::While {
                condition: condition.clone(),
                body: self.insert(body, Some(id)),
            },
            StatementKind::Break => Node::Break,
            StatementKind::Assign { variable, value } => Node::Assign {
                variable: variable.clone(),
                value: value.clone(),
            },
            StatementKind::Print { value } => Node::Print {
                value: value.clone(),
            },
            StatementKind::Void => Node::Void,
            StatementKind::Action { action, target } => Node::Action {
                action: *action,
                target: target.clone(),
            },
        };
        self.nodes[id.0].node = node;
        id
    }

    fn validate(&self) -> ASTResult<()> {
        for (index, entry) in self.nodes.iter().enumerate() {
            let location = entry.location;
            match &entry.node {
                Node::Break => {
                    if self.enclosing_loop(StatementId(index)).is_none() {
                        return Err(ASTError::BreakOutsideLoop { location });
                    }
                }
                Node::If { condition, .. } | Node::While { condition, .. } => {
                    check_expression(condition, ValueKind::Boolean, location)?
                }
                Node::Assign { value, .. } | Node::Print { value } => {
                    check_expression(value, ValueKind::Any, location)?
                }
                Node::Action { action, target } => {
                    check_expression(target, action.target_kind(), location)?
                }
                Node::Sequence { .. } | Node::Void => {}
            }
        }
        Ok(())
    }

    pub fn is_well_formed(&self) -> bool {
        self.validate().is_ok()
    }

    pub fn root(&self) -> StatementId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: StatementId) -> Option<&StatementNode> {
        self.nodes.get(id.0)
    }

    pub fn ids(&self) -> impl Iterator<Item = StatementId> {
        (0..self.nodes.len()).map(StatementId)
    }

    pub fn parent(&self, id: StatementId) -> Option<StatementId> {
        self.get(id).and_then(|n| n.parent)
    }

    pub fn children(&self, id: StatementId) -> Vec<StatementId> {
        match self.get(id).map(|n| &n.node) {
            Some(Node::Sequence { children }) => children.clone(),
            Some(Node::If {
                then_branch,
                else_branch,
                ..
            }) => vec![*then_branch, *else_branch],
            Some(Node::While { body, .. }) => vec![*body],
            _ => vec![],
        }
    }

    /// `id` and everything below it.
    pub fn descendants(&self, id: StatementId) -> Vec<StatementId> {
        let mut found = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            found.push(next);
            stack.extend(self.children(next));
        }
        found
    }

    /// Nearest `while` strictly above `id`, found through parent links.
    pub fn enclosing_loop(&self, id: StatementId) -> Option<StatementId> {
        let mut cursor = self.parent(id);
        while let Some(candidate) = cursor {
            if matches!(self.get(candidate)?.node, Node::While { .. }) {
                return Some(candidate);
            }
            cursor = self.parent(candidate);
        }
        None
    }
}

fn check_expression(
    expr: &Expression,
    expected: ValueKind,
    location: SourceLocation,
) -> ASTResult<()> {
    let found = expr.result_kind();
    if !expected.accepts(found) {
        return Err(ASTError::TypeMismatch {
            expected,
            found,
            location,
        });
    }
    if let Expression::Position { x, y, z } = expr {
        if *x < 0 || *y < 0 || *z < 0 {
            return Err(ASTError::NegativeCoordinate {
                x: *x,
                y: *y,
                z: *z,
                location,
            });
        }
    }
    for (operand, slot) in expr.operands() {
        check_expression(operand, slot, location)?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Branch {
    Then,
    Else,
}

/// Resumption state of one node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeProgress {
    /// Started and not yet finished in the current run of the script.
    pub pending: bool,
    /// Sequence: index of the child to perform next.
    pub cursor: usize,
    /// If: branch latched on first entry.
    pub branch: Option<Branch>,
    /// While: the body has been entered and owes the rest of its turn.
    pub body_owes_turn: bool,
    /// Action: the command went out and completion is being polled.
    pub issued: bool,
}

/// Per-program resumption table, indexed like the tree it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    nodes: Vec<NodeProgress>,
}

impl Progress {
    pub fn new(tree: &StatementTree) -> Self {
        Self {
            nodes: vec![NodeProgress::default(); tree.len()],
        }
    }

    pub fn get(&self, id: StatementId) -> NodeProgress {
        self.nodes.get(id.0).copied().unwrap_or_default()
    }

    pub fn get_mut(&mut self, id: StatementId) -> Option<&mut NodeProgress> {
        self.nodes.get_mut(id.0)
    }

    pub fn set(&mut self, id: StatementId, progress: NodeProgress) {
        if let Some(slot) = self.nodes.get_mut(id.0) {
            *slot = progress;
        }
    }

    pub fn is_pending(&self, id: StatementId) -> bool {
        self.get(id).pending
    }

    pub fn reset(&mut self) {
        self.nodes.fill(NodeProgress::default());
    }

    pub fn reset_subtree(&mut self, tree: &StatementTree, id: StatementId) {
        for node in tree.descendants(id) {
            self.set(node, NodeProgress::default());
        }
    }

    /// Chain of pending statements from the root down to the one execution
    /// resumes at. Empty when nothing is in flight.
    pub fn pending_path(&self, tree: &StatementTree) -> Vec<StatementId> {
        let mut path = Vec::new();
        let mut cursor = Some(tree.root());
        while let Some(id) = cursor.filter(|id| self.is_pending(*id)) {
            path.push(id);
            cursor = tree
                .children(id)
                .into_iter()
                .find(|child| self.is_pending(*child));
        }
        path
    }

    /// The single statement execution is suspended at.
    pub fn current(&self, tree: &StatementTree) -> Option<StatementId> {
        self.pending_path(tree).last().copied()
    }

    pub fn pending_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.pending).count()
    }
}
