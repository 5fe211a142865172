use anyhow::bail;
use clap::Parser;
use serde::{Deserialize, Serialize};

#[derive(Parser, Debug)]
#[command(
    name = "parallel-cbs",
    about = "Conflict-Based Search MAPF with serial, coordinator/worker and peer-to-peer expansion.",
    version = "0.1.0"
)]
pub struct Cli {
    #[arg(long, short, help = "Path to the YAML config file")]
    pub config: Option<String>,
    #[arg(long, help = "Override the solver backend: serial, central or decentral")]
    pub solver: Option<String>,
    #[arg(long, help = "Override the map file path")]
    pub map: Option<String>,
    #[arg(long, help = "Override the scenario file path")]
    pub scenario: Option<String>,
    #[arg(long, help = "Override the wall-clock timeout in seconds (0 disables)")]
    pub timeout: Option<f64>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    /// One of "serial", "central", "decentral".
    pub solver: String,
    pub map_path: String,
    pub scenario_path: String,
    pub csv_path: String,
    /// Wall-clock timeout in seconds; 0 disables the check.
    pub timeout_seconds: f64,
    /// World size of the decentralised driver.
    pub ranks: usize,
    /// Expansion workers of the centralised driver.
    pub expanders: usize,
    /// Extra ranks forming the shared low-level planner pool (centralised).
    pub low_level_pool: usize,
    /// Suboptimality factor w >= 1 of the decentralised driver.
    pub suboptimality: f64,
    /// Expansion budget of the serial driver; exhaustion reports a timeout.
    pub max_nodes_expanded: u64,
    /// When positive, draw this many random agents instead of reading the
    /// scenario file.
    pub random_agents: usize,
    pub seed: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            solver: "serial".to_string(),
            map_path: "map_file/test/test.map".to_string(),
            scenario_path: "map_file/test/test.scen".to_string(),
            csv_path: "results.csv".to_string(),
            timeout_seconds: 0.0,
            ranks: 4,
            expanders: 2,
            low_level_pool: 0,
            suboptimality: 1.0,
            max_nodes_expanded: 20000,
            random_agents: 0,
            seed: 0,
        }
    }
}

impl Config {
    pub fn from_yaml_str(config_str: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(config_str)?;
        config.validate()
    }

    pub fn override_from_command_line(mut self, cli: &Cli) -> anyhow::Result<Self> {
        if let Some(solver) = &cli.solver {
            self.solver = solver.clone();
        }
        if let Some(map) = &cli.map {
            self.map_path = map.clone();
        }
        if let Some(scenario) = &cli.scenario {
            self.scenario_path = scenario.clone();
        }
        if let Some(timeout) = cli.timeout {
            self.timeout_seconds = timeout;
        }
        self.validate()
    }

    pub fn validate(mut self) -> anyhow::Result<Self> {
        match self.solver.as_str() {
            "serial" | "central" | "decentral" => {}
            other => bail!("unknown solver {other:?}"),
        }
        if self.ranks == 0 {
            bail!("ranks must be at least 1");
        }
        if self.expanders == 0 {
            bail!("central solver needs at least one expansion worker");
        }
        if self.suboptimality < 1.0 {
            self.suboptimality = 1.0;
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default().validate().unwrap();
        assert_eq!(config.solver, "serial");
        assert_eq!(config.max_nodes_expanded, 20000);
        assert_eq!(config.suboptimality, 1.0);
    }

    #[test]
    fn test_yaml_overrides_defaults() {
        let config = Config::from_yaml_str(
            "solver: central\nexpanders: 3\nlow_level_pool: 2\ntimeout_seconds: 30.0\n",
        )
        .unwrap();
        assert_eq!(config.solver, "central");
        assert_eq!(config.expanders, 3);
        assert_eq!(config.low_level_pool, 2);
        assert_eq!(config.timeout_seconds, 30.0);
        // Untouched keys keep their defaults.
        assert_eq!(config.ranks, 4);
    }

    #[test]
    fn test_suboptimality_clamped_to_one() {
        let config = Config::from_yaml_str("suboptimality: 0.5\n").unwrap();
        assert_eq!(config.suboptimality, 1.0);
    }

    #[test]
    fn test_unknown_solver_rejected() {
        assert!(Config::from_yaml_str("solver: quantum\n").is_err());
    }
}
