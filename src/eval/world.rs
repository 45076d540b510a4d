use super::value::{FactionId, Position, ResourceKind, UnitId};

/// Everything a task script may ask of, or tell to, the simulated world.
///
/// Queries take `&self`; actuation takes `&mut self` and is keyed by the unit
/// being driven. Actions are fire-and-forget: the world carries them out over
/// as many ticks as it needs and reports progress through [`World::is_busy`].
#[mockall::automock]
pub trait World {
    /// The cube exists and a unit may stand in it.
    fn is_passable(&self, position: Position) -> bool;

    /// The cube exists and is made of solid material.
    fn is_solid(&self, position: Position) -> bool;

    /// Closest resource of `kind` as seen from `from`.
    fn closest_of(&self, kind: ResourceKind, from: Position) -> Option<Position>;

    /// In-bounds cubes adjacent to `position`.
    fn neighbors(&self, position: Position) -> Vec<Position>;

    /// Every unit currently known to the world, terminated ones included.
    fn units(&self) -> Vec<UnitId>;

    fn faction(&self, unit: UnitId) -> Option<FactionId>;

    fn position_of(&self, unit: UnitId) -> Option<Position>;

    fn is_terminated(&self, unit: UnitId) -> bool;

    fn carries_item(&self, unit: UnitId) -> bool;

    fn issue_move(&mut self, unit: UnitId, target: Position);

    fn issue_work(&mut self, unit: UnitId, target: Position);

    fn issue_follow(&mut self, unit: UnitId, target: UnitId);

    fn issue_attack(&mut self, unit: UnitId, target: UnitId);

    /// The unit is still carrying out the last action it was given.
    fn is_busy(&self, unit: UnitId) -> bool;

    /// The unit cannot make progress on what it was told to do.
    fn cannot_act(&self, unit: UnitId) -> bool;
}
