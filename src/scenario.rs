use anyhow::{bail, Context, Result};
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use tracing::info;

use crate::common::{GridCoord, MAX_AGENTS};
use crate::grid::Grid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Agent {
    pub id: usize,
    pub start: GridCoord,
    pub goal: GridCoord,
}

impl Agent {
    pub fn verify(&self, grid: &Grid) -> bool {
        !grid.is_obstacle(self.start.x, self.start.y) && !grid.is_obstacle(self.goal.x, self.goal.y)
    }
}

/// A preloaded MAPF instance: the grid plus one start/goal pair per agent.
/// Read-only during search.
#[derive(Debug, Clone)]
pub struct ProblemInstance {
    pub grid: Grid,
    pub agents: Vec<Agent>,
}

impl ProblemInstance {
    pub fn new(grid: Grid, agents: Vec<Agent>) -> Result<Self> {
        if agents.is_empty() {
            bail!("instance has no agents");
        }
        if agents.len() > MAX_AGENTS {
            bail!("instance has {} agents, limit is {MAX_AGENTS}", agents.len());
        }
        for agent in &agents {
            if !agent.verify(&grid) {
                bail!(
                    "agent {} start {:?} or goal {:?} is blocked or out of bounds",
                    agent.id,
                    agent.start,
                    agent.goal
                );
            }
        }
        Ok(ProblemInstance { grid, agents })
    }

    pub fn load(map_path: &str, scenario_path: &str) -> Result<Self> {
        let grid = Grid::from_file(map_path)?;
        let text = fs::read_to_string(scenario_path)
            .with_context(|| format!("reading scenario file {scenario_path}"))?;
        let agents = parse_agents(&text)?;
        info!(
            "loaded instance: {}x{} map, {} agents",
            grid.width,
            grid.height,
            agents.len()
        );
        Self::new(grid, agents)
    }

    pub fn num_agents(&self) -> usize {
        self.agents.len()
    }
}

/// Scenario format: first integer N, then N lines of `sx sy gx gy`.
fn parse_agents(text: &str) -> Result<Vec<Agent>> {
    let mut tokens = text.split_whitespace().map(|t| {
        t.parse::<i32>()
            .with_context(|| format!("scenario token {t:?} is not an integer"))
    });
    let mut next = move || tokens.next().context("scenario file ended early")?;

    let count = next()?;
    if count <= 0 {
        bail!("scenario declares {count} agents");
    }

    let mut agents = Vec::with_capacity(count as usize);
    for id in 0..count as usize {
        let sx = next()?;
        let sy = next()?;
        let gx = next()?;
        let gy = next()?;
        agents.push(Agent {
            id,
            start: GridCoord::new(sx, sy),
            goal: GridCoord::new(gx, gy),
        });
    }
    Ok(agents)
}

/// Draw agents over distinct free cells, for benchmark instances without a
/// scenario file.
pub fn generate_agents_randomly<R: Rng + ?Sized>(
    grid: &Grid,
    num_agents: usize,
    rng: &mut R,
) -> Result<Vec<Agent>> {
    let mut free_cells = Vec::new();
    for y in 0..grid.height {
        for x in 0..grid.width {
            if !grid.is_obstacle(x, y) {
                free_cells.push(GridCoord::new(x, y));
            }
        }
    }

    if free_cells.len() < num_agents * 2 {
        bail!(
            "map has {} free cells, cannot place {} agents",
            free_cells.len(),
            num_agents
        );
    }

    free_cells.shuffle(rng);
    let agents = (0..num_agents)
        .map(|id| Agent {
            id,
            start: free_cells[id * 2],
            goal: free_cells[id * 2 + 1],
        })
        .collect();
    Ok(agents)
}
