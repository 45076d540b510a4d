use core::fmt;

use serde::{Deserialize, Serialize};

/// Integer cube coordinates in the world grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Position {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn offset(&self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    /// `None` when the offset leaves the `i32` coordinate range.
    pub fn checked_offset(&self, dx: i32, dy: i32, dz: i32) -> Option<Self> {
        Some(Self::new(
            self.x.checked_add(dx)?,
            self.y.checked_add(dy)?,
            self.z.checked_add(dz)?,
        ))
    }

    /// Two distinct cubes are adjacent when no coordinate differs by more than one.
    pub fn is_adjacent(&self, other: &Position) -> bool {
        self != other
            && (i64::from(self.x) - i64::from(other.x)).abs() <= 1
            && (i64::from(self.y) - i64::from(other.y)).abs() <= 1
            && (i64::from(self.z) - i64::from(other.z)).abs() <= 1
    }

    pub fn distance_squared(&self, other: &Position) -> i64 {
        let dx = i64::from(self.x) - i64::from(other.x);
        let dy = i64::from(self.y) - i64::from(other.y);
        let dz = i64::from(self.z) - i64::from(other.z);
        dx.saturating_mul(dx)
            .saturating_add(dy.saturating_mul(dy))
            .saturating_add(dz.saturating_mul(dz))
    }

    /// One step towards `target`, moving at most one cube along each axis.
    pub fn step_towards(&self, target: &Position) -> Position {
        // Stepping towards an in-range target never leaves the range.
        self.offset(
            target.x.cmp(&self.x) as i32,
            target.y.cmp(&self.y) as i32,
            target.z.cmp(&self.z) as i32,
        )
    }

    /// The surrounding cubes, without grid bounds checks. Up to 26; fewer at
    /// the edge of the coordinate range.
    pub fn surrounding(&self) -> impl Iterator<Item = Position> + '_ {
        (-1..=1).flat_map(move |dx| {
            (-1..=1).flat_map(move |dy| {
                (-1..=1).filter_map(move |dz| {
                    if (dx, dy, dz) == (0, 0, 0) {
                        None
                    } else {
                        self.checked_offset(dx, dy, dz)
                    }
                })
            })
        })
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

impl From<[i32; 3]> for Position {
    fn from([x, y, z]: [i32; 3]) -> Self {
        Self::new(x, y, z)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitId(pub u64);

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "unit#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FactionId(pub u32);

impl fmt::Display for FactionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "faction#{}", self.0)
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ResourceKind {
    Log,
    Boulder,
    Workshop,
}

/// How another unit relates to the controlled one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Relation {
    Friend,
    Enemy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ValueKind {
    Boolean,
    Position,
    Unit,
    /// Not known until runtime; accepted by every slot.
    Any,
}

impl ValueKind {
    pub fn accepts(&self, found: ValueKind) -> bool {
        *self == ValueKind::Any || found == ValueKind::Any || *self == found
    }
}

// Values produced by expressions and held in global variables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    Boolean(bool),
    Position(Position),
    Unit(UnitId),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Boolean(_) => ValueKind::Boolean,
            Value::Position(_) => ValueKind::Position,
            Value::Unit(_) => ValueKind::Unit,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Position(p) => write!(f, "{}", p),
            Value::Unit(u) => write!(f, "{}", u),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<Position> for Value {
    fn from(value: Position) -> Self {
        Value::Position(value)
    }
}

impl From<UnitId> for Value {
    fn from(value: UnitId) -> Self {
        Value::Unit(value)
    }
}
