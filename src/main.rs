mod algorithm;
mod comm;
mod common;
mod config;
mod grid;
mod scenario;
mod solver;
mod stat;

use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use config::{Cli, Config};
use grid::Grid;
use scenario::{generate_agents_randomly, ProblemInstance};
use solver::{CentralCbs, DecentralCbs, SerialCbs, Solver};

fn load_instance(config: &Config) -> Result<ProblemInstance> {
    if config.random_agents > 0 {
        let grid = Grid::from_file(&config.map_path)?;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let agents = generate_agents_randomly(&grid, config.random_agents, &mut rng)?;
        ProblemInstance::new(grid, agents)
    } else {
        ProblemInstance::load(&config.map_path, &config.scenario_path)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {path}"))?;
            Config::from_yaml_str(&text)?
        }
        None => Config::default(),
    }
    .override_from_command_line(&cli)?;

    let instance = load_instance(&config)?;

    let outcome = match config.solver.as_str() {
        "serial" => SerialCbs::new(&instance).solve(&config),
        "central" => CentralCbs::new(&instance).solve(&config),
        "decentral" => DecentralCbs::new(&instance).solve(&config),
        _ => unreachable!("validated solver name"),
    };

    if let Some(solution) = &outcome.solution {
        if !solution.verify(&instance.grid, &instance.agents) {
            warn!("solution failed verification");
        }
        solution.log_solution(&config.solver);
    }

    outcome.stats.print(&config.solver);
    outcome
        .stats
        .append_csv(&config.csv_path, &config.map_path, &instance, config.timeout_seconds)?;

    Ok(())
}
