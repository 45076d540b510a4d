#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use unitask::{
    config::SandboxConfig,
    eval::value::{FactionId, Position, UnitId},
    sandbox::GridWorld,
    TaskBoard,
};

#[ctor::ctor]
fn init_tests() {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

pub const WORKER: UnitId = UnitId(1);

/// A flat 8x8 world with one worker standing at the origin.
pub fn flat_world() -> GridWorld {
    let mut world = GridWorld::new(&SandboxConfig {
        width: 8,
        depth: 8,
        height: 1,
        work_ticks: 3,
        seed: 0,
    });
    world
        .add_unit(WORKER, FactionId(0), Position::new(0, 0, 0))
        .unwrap();
    world
}

pub fn rng() -> StdRng {
    StdRng::seed_from_u64(42)
}

/// One simulation tick the way the command line runs it: idle units pick up
/// work, programs run, then the world moves.
pub fn tick(board: &mut TaskBoard, world: &mut GridWorld, rng: &mut StdRng) -> unitask::scheduler::TickReport {
    let schedulers: Vec<_> = board.schedulers().map(|s| (s.id(), s.faction())).collect();
    for (scheduler, faction) in schedulers {
        board
            .dispatch_idle(scheduler, world.units_of(faction))
            .unwrap();
    }
    let report = board.advance_tick(world, rng).unwrap();
    world.step();
    board.verify_integrity().unwrap();
    report
}
