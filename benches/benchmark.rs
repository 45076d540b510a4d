use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use rand::rngs::StdRng;
use rand::SeedableRng;
use unitask::{
    config::{EngineConfig, SandboxConfig},
    eval::{
        context::ExecutionContext,
        tree::StatementTree,
        value::{FactionId, Position, UnitId},
    },
    sandbox::GridWorld,
    Expression, Program, Statement, Task, TaskBoard,
};

fn counting_loop() -> Statement {
    Statement::while_loop(
        Expression::True,
        Statement::sequence(vec![
            Statement::assign("here", Expression::Here),
            Statement::if_then_else(
                Expression::is_passable(Expression::var("here")),
                Statement::assign("ok", Expression::True),
                Statement::break_loop(),
            ),
        ]),
    )
}

fn bench_program_tick(c: &mut Criterion) {
    let tree = Arc::new(StatementTree::build(&counting_loop()).unwrap());
    let mut world = GridWorld::new(&SandboxConfig::default());
    world
        .add_unit(UnitId(1), FactionId(0), Position::new(1, 1, 0))
        .unwrap();
    let mut rng = StdRng::seed_from_u64(0);

    c.bench_function("program tick, 1000 time units", |b| {
        let mut program = Program::new(tree.clone());
        b.iter(|| {
            let mut ctx = ExecutionContext::new(&mut world, UnitId(1), &mut rng);
            black_box(program.execute(black_box(1000), &mut ctx).unwrap())
        })
    });
}

fn bench_board_tick(c: &mut Criterion) {
    let config = EngineConfig::default();
    c.bench_function("board tick, 64 units", |b| {
        b.iter_batched(
            || {
                let mut world = GridWorld::new(&config.sandbox);
                let mut board = TaskBoard::with_config(&config).unwrap();
                let scheduler = board.add_scheduler(FactionId(0)).unwrap();
                for i in 0..64 {
                    let unit = UnitId(i);
                    world
                        .add_unit(unit, FactionId(0), Position::new((i % 16) as i32, (i / 16) as i32, 0))
                        .unwrap();
                    let task = board.insert_task(Task::new(format!("t{}", i), i as i32, &counting_loop()).unwrap());
                    board.schedule(scheduler, task).unwrap();
                }
                let units = world.units_of(FactionId(0));
                board.dispatch_idle(scheduler, units).unwrap();
                (world, board, StdRng::seed_from_u64(1))
            },
            |(mut world, mut board, mut rng)| black_box(board.advance_tick(&mut world, &mut rng).unwrap()),
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_program_tick, bench_board_tick);
criterion_main!(benches);
