mod highlevel;
mod lowlevel;

pub(crate) use highlevel::{
    constraint_for, step_with_wait, Conflict, ConflictKind, Constraint, ConstraintKind,
    ConstraintSet, HighLevelNode,
};
pub(crate) use lowlevel::MinHeap;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, error};

use crate::grid::Grid;
use crate::scenario::Agent;

/// Bound on the number of agents per instance.
pub(crate) const MAX_AGENTS: usize = 40;
/// Initial low-level horizon; the effective horizon is
/// `max(MAX_PATH_LENGTH, 4 * width * height)`.
pub(crate) const MAX_PATH_LENGTH: i32 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridCoord {
    pub x: i32,
    pub y: i32,
}

impl GridCoord {
    pub fn new(x: i32, y: i32) -> Self {
        GridCoord { x, y }
    }
}

/// Time-indexed agent path; `steps[t]` is the cell occupied at step t.
pub(crate) type Path = Vec<GridCoord>;

#[derive(Debug, Clone)]
pub struct Solution {
    pub paths: Vec<Path>,
}

impl Solution {
    pub fn verify(&self, grid: &Grid, agents: &[Agent]) -> bool {
        if self.paths.len() != agents.len() {
            error!("incomplete solution");
            return false;
        }

        for (path, agent) in self.paths.iter().zip(agents.iter()) {
            if path.first().is_none_or(|&s| s != agent.start)
                || path.last().is_none_or(|&g| g != agent.goal)
            {
                error!(
                    "endpoint mismatch: path {:?}..{:?}, agent {:?}..{:?}",
                    path.first(),
                    path.last(),
                    agent.start,
                    agent.goal
                );
                return false;
            }

            for window in path.windows(2) {
                if let [first, second] = window {
                    if !Self::are_neighbors(*first, *second) {
                        error!("illegal move step {first:?} -> {second:?}");
                        return false;
                    }
                }
            }
        }

        let max_path_length = self.paths.iter().map(|p| p.len()).max().unwrap_or(0);

        for time_step in 0..max_path_length {
            let mut seen_positions = HashSet::new();
            let mut seen_edges = HashSet::new();

            for path in &self.paths {
                let pos = *path.get(time_step).unwrap_or_else(|| path.last().unwrap());
                if grid.is_obstacle(pos.x, pos.y) {
                    error!("path crosses an obstacle at {pos:?}");
                    return false;
                }

                if !seen_positions.insert(pos) {
                    error!("vertex conflict at {pos:?}");
                    return false;
                }

                if time_step >= 1 && time_step < path.len() {
                    let prev_pos = path[time_step - 1];
                    if prev_pos != pos {
                        let edge = (prev_pos, pos);
                        let reverse_edge = (pos, prev_pos);

                        if !seen_edges.insert(edge) || seen_edges.contains(&reverse_edge) {
                            error!("edge conflict on {edge:?}");
                            return false;
                        }
                    }
                }
            }
        }

        true
    }

    fn are_neighbors(pos1: GridCoord, pos2: GridCoord) -> bool {
        (pos1.x - pos2.x).abs() + (pos1.y - pos2.y).abs() <= 1
    }

    pub fn log_solution(&self, solver: &str) {
        let mut formatted_solution = String::new();
        for (index, path) in self.paths.iter().enumerate() {
            formatted_solution.push_str(&format!(" agent{}:\n", index));
            for (t, coord) in path.iter().enumerate() {
                formatted_solution.push_str(&format!(
                    "   - x: {}\n     y: {}\n     t: {}\n",
                    coord.x, coord.y, t
                ));
            }
        }
        debug!("{} solution:\n{}", solver, formatted_solution);
    }
}
