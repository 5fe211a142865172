use super::{
    expand_moves, manhattan, reconstruct_path, AStarNode, BestCostTable, NodeArena,
};
use crate::common::{ConstraintSet, GridCoord, MinHeap, Path};
use crate::grid::Grid;

use tracing::{debug, instrument};

/// Space-time A* for one agent under a constraint set. States are (x, y, t),
/// every action costs one time step, the heuristic is Manhattan distance.
/// Returns a path whose step t is the agent's cell at time t, or `None` when
/// the goal is unreachable within `horizon`.
#[instrument(skip_all, name = "a_star", fields(agent = agent_id, start = format!("{start:?}"), goal = format!("{goal:?}")), level = "debug")]
pub(crate) fn sequential_a_star(
    grid: &Grid,
    constraints: &ConstraintSet,
    agent_id: i32,
    start: GridCoord,
    goal: GridCoord,
    horizon: i32,
) -> Option<Path> {
    debug!("constraints: {}", constraints.len());

    let mut arena = NodeArena::default();
    let mut open = MinHeap::new();
    let mut best = BestCostTable::new(grid, horizon);
    let expansion_budget = grid.plane() * horizon as usize;

    let root = AStarNode {
        position: start,
        g_cost: 0,
        f_cost: manhattan(start, goal),
        time: 0,
        parent: -1,
    };
    let root_index = arena.push(root);
    open.push(root.f_cost as f64, root_index);
    best.try_improve(grid, 0, start, 0);

    while let Some((_, node_index)) = open.pop() {
        let node = *arena.get(node_index);
        if node.position == goal {
            return Some(reconstruct_path(&arena, node_index));
        }

        // The open set can only hold one improving entry per reachable state;
        // exceeding that count means the search degenerated.
        if open.len() > expansion_budget {
            debug!("open set exceeded the state budget, giving up");
            return None;
        }

        for successor in expand_moves(
            grid,
            constraints,
            agent_id,
            node.position,
            node.g_cost,
            node.time,
        ) {
            if successor.time >= horizon {
                continue;
            }
            if !best.try_improve(grid, successor.time, successor.position, successor.g_cost) {
                continue;
            }
            let child = AStarNode {
                position: successor.position,
                g_cost: successor.g_cost,
                f_cost: successor.g_cost + manhattan(successor.position, goal),
                time: successor.time,
                parent: node_index,
            };
            let child_index = arena.push(child);
            open.push(child.f_cost as f64, child_index);
        }
    }

    debug!("open set exhausted, no path");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::horizon_for;
    use crate::common::Constraint;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("debug")
            .try_init();
    }

    fn coord(x: i32, y: i32) -> GridCoord {
        GridCoord::new(x, y)
    }

    fn open_3x3() -> Grid {
        Grid::parse("3 3\n000\n000\n000\n").unwrap()
    }

    fn plan(grid: &Grid, constraints: &ConstraintSet, start: GridCoord, goal: GridCoord) -> Option<Path> {
        sequential_a_star(grid, constraints, 0, start, goal, horizon_for(grid))
    }

    #[test]
    fn test_straight_line_path() {
        init_tracing();
        let grid = open_3x3();
        let path = plan(&grid, &ConstraintSet::default(), coord(0, 0), coord(2, 0)).unwrap();
        assert_eq!(path.len(), 3);
        assert_eq!(path[0], coord(0, 0));
        assert_eq!(path[2], coord(2, 0));
    }

    #[test]
    fn test_start_equals_goal_is_length_one() {
        init_tracing();
        let grid = open_3x3();
        let path = plan(&grid, &ConstraintSet::default(), coord(1, 1), coord(1, 1)).unwrap();
        assert_eq!(path, vec![coord(1, 1)]);
    }

    #[test]
    fn test_routes_around_obstacles() {
        init_tracing();
        let grid = Grid::parse("3 3\n010\n010\n000\n").unwrap();
        let path = plan(&grid, &ConstraintSet::default(), coord(0, 0), coord(2, 0)).unwrap();
        // Forced down around the wall and back up.
        assert_eq!(path.len(), 7);
        assert!(path.iter().all(|c| !grid.is_obstacle(c.x, c.y)));
    }

    #[test]
    fn test_vertex_constraint_forces_wait() {
        init_tracing();
        let grid = open_3x3();
        let mut constraints = ConstraintSet::default();
        constraints.push(Constraint::vertex(0, 1, coord(1, 0)));

        let path = plan(&grid, &constraints, coord(0, 0), coord(2, 0)).unwrap();
        assert_eq!(path.len(), 4);
        assert_ne!(path[1], coord(1, 0));
    }

    #[test]
    fn test_constraint_for_other_agent_is_ignored() {
        init_tracing();
        let grid = open_3x3();
        let mut constraints = ConstraintSet::default();
        constraints.push(Constraint::vertex(3, 1, coord(1, 0)));

        let path = plan(&grid, &constraints, coord(0, 0), coord(2, 0)).unwrap();
        assert_eq!(path.len(), 3);
    }

    #[test]
    fn test_universal_constraint_is_honored() {
        init_tracing();
        let grid = open_3x3();
        let mut constraints = ConstraintSet::default();
        constraints.push(Constraint::vertex(-1, 1, coord(1, 0)));

        let path = plan(&grid, &constraints, coord(0, 0), coord(2, 0)).unwrap();
        assert_eq!(path.len(), 4);
    }

    #[test]
    fn test_edge_constraint_blocks_one_direction() {
        init_tracing();
        let grid = open_3x3();
        let mut constraints = ConstraintSet::default();
        constraints.push(Constraint::edge(0, 0, coord(0, 0), coord(1, 0)));

        let path = plan(&grid, &constraints, coord(0, 0), coord(2, 0)).unwrap();
        // Either waits out the constraint or detours through row one.
        assert_eq!(path.len(), 4);
        assert!(!(path[0] == coord(0, 0) && path[1] == coord(1, 0)));
    }

    #[test]
    fn test_walled_off_goal_fails() {
        init_tracing();
        let grid = Grid::parse("3 3\n010\n111\n000\n").unwrap();
        assert!(plan(&grid, &ConstraintSet::default(), coord(0, 0), coord(1, 2)).is_none());
    }

    #[test]
    fn test_every_step_respects_constraints() {
        init_tracing();
        let grid = open_3x3();
        let mut constraints = ConstraintSet::default();
        constraints.push(Constraint::vertex(0, 1, coord(1, 0)));
        constraints.push(Constraint::vertex(0, 2, coord(2, 0)));
        constraints.push(Constraint::edge(0, 2, coord(1, 0), coord(2, 0)));

        let path = plan(&grid, &constraints, coord(0, 0), coord(2, 0)).unwrap();
        for t in 0..path.len() - 1 {
            assert!(!constraints.violates(0, path[t], path[t + 1], t as i32));
        }
        assert_eq!(*path.last().unwrap(), coord(2, 0));
    }
}
