use clap::{command, Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use unitask::{
    config::EngineConfig,
    sandbox::{GridWorld, Scenario},
    Error, TaskBoard,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file
    #[arg(short, long, default_value = "config.json", global = true)]
    config: PathBuf,

    /// Enable debug mode
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that every task in a scenario file is well-formed
    Check(CheckArgs),

    /// Run a scenario in the sandbox world
    Run(RunArgs),
}

#[derive(Parser)]
struct CheckArgs {
    /// Path to scenario file
    file: PathBuf,
}

#[derive(Parser)]
struct RunArgs {
    /// Path to scenario file
    file: PathBuf,

    /// Number of ticks to simulate
    #[arg(short, long, default_value_t = 20)]
    ticks: u64,

    /// Override the time units every program gets per tick
    #[arg(short, long)]
    budget: Option<u32>,
}

fn load_config(cli: &Cli) -> Result<EngineConfig, Error> {
    if cli.config.exists() {
        let config = EngineConfig::from_file(&cli.config)?;
        info!("config loaded.");
        Ok(config)
    } else {
        Ok(EngineConfig::default())
    }
}

fn check(args: &CheckArgs, config: &EngineConfig) -> Result<(), Error> {
    let scenario = Scenario::from_file(&args.file)?;
    let tasks = scenario.build_tasks(config.scheduler.default_priority)?;
    for (task, _) in &tasks {
        println!(
            "ok  {} (priority {}, {} statements)",
            task.name(),
            task.priority(),
            task.activities().len()
        );
    }
    println!("{} task(s) checked", tasks.len());
    Ok(())
}

fn run_scenario(args: &RunArgs, mut config: EngineConfig) -> Result<(), Error> {
    if let Some(budget) = args.budget {
        config.execution.tick_budget = budget;
        config.validate()?;
    }
    debug!("config: {:?}", config);

    let scenario = Scenario::from_file(&args.file)?;
    let mut world = GridWorld::from_scenario(&scenario, &config.sandbox)?;
    let mut board = TaskBoard::with_config(&config)?;
    let ids = scenario.populate(&mut board, &world)?;
    let mut rng = StdRng::seed_from_u64(config.sandbox.seed);
    info!("scenario loaded with {} task(s)", ids.len());

    for tick in 1..=args.ticks {
        let schedulers: Vec<_> = board
            .schedulers()
            .map(|s| (s.id(), s.faction()))
            .collect();
        for (scheduler, faction) in schedulers {
            for (unit, task) in board.dispatch_idle(scheduler, world.units_of(faction))? {
                if let Some(task) = board.task(task) {
                    println!("[{:>4}] {} takes '{}'", tick, unit, task.name());
                }
            }
        }

        let report = board.advance_tick(&mut world, &mut rng)?;
        world.step();

        for (_, unit, line) in &report.output {
            println!("[{:>4}] {}: {}", tick, unit, line);
        }
        for (task, reason) in &report.reclaimed {
            if let Some(task) = board.task(*task) {
                println!(
                    "[{:>4}] '{}' reclaimed ({}), priority now {}",
                    tick,
                    task.name(),
                    reason,
                    task.priority()
                );
            }
        }
        for task in board.remove_terminated() {
            println!("[{:>4}] '{}' finished", tick, task.name());
        }
        board.verify_integrity()?;

        if board.tasks().next().is_none() {
            println!("all tasks finished after {} tick(s)", tick);
            break;
        }
    }

    for scheduler in board.schedulers() {
        println!("{} ({}):", scheduler.id(), scheduler.faction());
        for task in board.iter(scheduler.id()) {
            let state = match task.executor() {
                Some(unit) => format!("assigned to {}", unit),
                None => "available".to_string(),
            };
            println!("  {:<20} priority {:>4}  {}", task.name(), task.priority(), state);
        }
    }
    Ok(())
}

fn run(cli: &Cli) -> Result<(), Error> {
    match &cli.command {
        Commands::Check(args) => check(args, &load_config(cli)?),
        Commands::Run(args) => run_scenario(args, load_config(cli)?),
    }
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()))
        .with(fmt::layer())
        .init();

    if let Err(e) = run(&cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
