mod astar;
mod parallel;

pub(crate) use astar::sequential_a_star;
pub(crate) use parallel::parallel_a_star;

use crate::common::{ConstraintSet, GridCoord, Path, MAX_PATH_LENGTH};
use crate::grid::Grid;

pub(crate) const MAX_NEIGHBORS: usize = 5;

/// Wait first, then the four cardinal moves.
const MOVES: [(i32, i32); MAX_NEIGHBORS] = [(0, 0), (1, 0), (-1, 0), (0, 1), (0, -1)];

/// Low-level horizon: states at `time >= horizon` are discarded.
pub(crate) fn horizon_for(grid: &Grid) -> i32 {
    MAX_PATH_LENGTH.max(4 * grid.width * grid.height)
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct AStarNode {
    pub(crate) position: GridCoord,
    pub(crate) g_cost: i32,
    pub(crate) f_cost: i32,
    pub(crate) time: i32,
    pub(crate) parent: i32,
}

/// Arena of search nodes addressed by index; parent links are indices, never
/// owning pointers.
#[derive(Debug, Default)]
pub(crate) struct NodeArena {
    nodes: Vec<AStarNode>,
}

impl NodeArena {
    pub(crate) fn push(&mut self, node: AStarNode) -> i32 {
        self.nodes.push(node);
        (self.nodes.len() - 1) as i32
    }

    pub(crate) fn get(&self, index: i32) -> &AStarNode {
        &self.nodes[index as usize]
    }
}

pub(crate) fn manhattan(a: GridCoord, b: GridCoord) -> i32 {
    (a.x - b.x).abs() + (a.y - b.y).abs()
}

/// Dense best-g table over (time, y, x), the closed set of the space-time
/// search. A successor survives only if it strictly improves the stored g.
pub(crate) struct BestCostTable {
    plane: usize,
    costs: Vec<i32>,
}

impl BestCostTable {
    pub(crate) fn new(grid: &Grid, horizon: i32) -> Self {
        let plane = grid.plane();
        BestCostTable {
            plane,
            costs: vec![i32::MAX; plane * horizon as usize],
        }
    }

    fn index(&self, grid: &Grid, time: i32, position: GridCoord) -> usize {
        time as usize * self.plane + (position.y * grid.width + position.x) as usize
    }

    pub(crate) fn try_improve(&mut self, grid: &Grid, time: i32, position: GridCoord, g: i32) -> bool {
        let index = self.index(grid, time, position);
        if self.costs[index] <= g {
            return false;
        }
        self.costs[index] = g;
        true
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Successor {
    pub(crate) position: GridCoord,
    pub(crate) g_cost: i32,
    pub(crate) time: i32,
}

/// Up to five valid transitions out of a state. Waiting never checks the
/// obstacle map (the planner only ever stands on legal cells); the four moves
/// do. Constraints are matched on the arriving vertex and the traversed edge.
pub(crate) fn expand_moves(
    grid: &Grid,
    constraints: &ConstraintSet,
    agent_id: i32,
    position: GridCoord,
    g_cost: i32,
    time: i32,
) -> Vec<Successor> {
    let mut successors = Vec::with_capacity(MAX_NEIGHBORS);
    for (dx, dy) in MOVES {
        let next = GridCoord::new(position.x + dx, position.y + dy);

        if !grid.in_bounds(next.x, next.y) {
            continue;
        }
        if (dx != 0 || dy != 0) && grid.is_obstacle(next.x, next.y) {
            continue;
        }
        if constraints.violates(agent_id, position, next, time) {
            continue;
        }

        successors.push(Successor {
            position: next,
            g_cost: g_cost + 1,
            time: time + 1,
        });
    }
    successors
}

/// Walk parent indices back from the goal node. The path has length
/// `goal_time + 1` and starts at t = 0.
pub(crate) fn reconstruct_path(arena: &NodeArena, goal_index: i32) -> Path {
    let length = (arena.get(goal_index).time + 1) as usize;
    let mut path = vec![GridCoord::new(0, 0); length];

    let mut index = goal_index;
    let mut write_pos = length;
    while index >= 0 && write_pos > 0 {
        write_pos -= 1;
        let node = arena.get(index);
        path[write_pos] = node.position;
        index = node.parent;
    }
    path
}
