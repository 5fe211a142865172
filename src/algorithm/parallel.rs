use super::{
    expand_moves, horizon_for, manhattan, reconstruct_path, AStarNode, BestCostTable, NodeArena,
    MAX_NEIGHBORS,
};
use crate::comm::{Body, Communicator, LowLevelResult, LowLevelTask, Tag};
use crate::common::{ConstraintSet, GridCoord, MinHeap, Path};
use crate::grid::Grid;

use tracing::debug;

/// Space-time A* split across a communicator: rank 0 owns the open set, the
/// arena and the best-g table, the other ranks are stateless expanders. Each
/// round the coordinator hands out up to `size - 1` lowest-f states and folds
/// the returned successors back in reception order; a consistent heuristic
/// keeps that reordering optimal. Only rank 0 returns a path.
pub(crate) fn parallel_a_star(
    grid: &Grid,
    constraints: &ConstraintSet,
    agent_id: i32,
    start: GridCoord,
    goal: GridCoord,
    comm: &mut Communicator,
) -> Option<Path> {
    if comm.size() == 1 {
        return super::sequential_a_star(grid, constraints, agent_id, start, goal, horizon_for(grid));
    }

    if comm.rank() == 0 {
        run_coordinator(grid, agent_id, start, goal, comm)
    } else {
        run_expander(grid, constraints, agent_id, comm)
    }
}

fn run_coordinator(
    grid: &Grid,
    _agent_id: i32,
    start: GridCoord,
    goal: GridCoord,
    comm: &mut Communicator,
) -> Option<Path> {
    let horizon = horizon_for(grid);
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

    let mut next_worker = 1;
    let mut goal_index = -1;

    while !open.is_empty() {
        if open.len() > expansion_budget {
            debug!("open set exceeded the state budget, giving up");
            break;
        }

        let max_tasks = comm.size() - 1;
        let mut dispatched = 0;
        while dispatched < max_tasks {
            let Some((_, node_index)) = open.pop() else {
                break;
            };
            let node = arena.get(node_index);
            comm.send(
                next_worker,
                Tag::LowLevelTask,
                Body::LowLevelTask(LowLevelTask {
                    node_index,
                    x: node.position.x,
                    y: node.position.y,
                    g: node.g_cost,
                    time: node.time,
                }),
            );
            next_worker += 1;
            if next_worker >= comm.size() {
                next_worker = 1;
            }
            dispatched += 1;
        }

        for _ in 0..dispatched {
            let envelope = comm.recv_match(None, Some(Tag::LowLevelResult));
            let Body::LowLevelResult(result) = envelope.body else {
                debug_assert!(false, "mistagged low-level result");
                continue;
            };

            for entry in result.data.iter().take(result.count as usize) {
                let position = GridCoord::new(entry[0], entry[1]);
                let g = entry[2];
                let time = entry[3];
                if time >= horizon {
                    continue;
                }
                if !best.try_improve(grid, time, position, g) {
                    continue;
                }
                let child = AStarNode {
                    position,
                    g_cost: g,
                    f_cost: g + manhattan(position, goal),
                    time,
                    parent: result.from_node_index,
                };
                let child_index = arena.push(child);
                open.push(child.f_cost as f64, child_index);

                if position == goal {
                    goal_index = child_index;
                }
            }
        }

        if goal_index >= 0 {
            break;
        }
    }

    for worker in 1..comm.size() {
        comm.send(worker, Tag::LowLevelTerminate, Body::Empty);
    }

    if goal_index >= 0 {
        Some(reconstruct_path(&arena, goal_index))
    } else {
        None
    }
}

fn run_expander(
    grid: &Grid,
    constraints: &ConstraintSet,
    agent_id: i32,
    comm: &mut Communicator,
) -> Option<Path> {
    loop {
        let envelope = comm.recv_match(Some(0), None);
        match (envelope.tag, envelope.body) {
            (Tag::LowLevelTerminate, _) => break,
            (Tag::LowLevelTask, Body::LowLevelTask(task)) => {
                let successors = expand_moves(
                    grid,
                    constraints,
                    agent_id,
                    GridCoord::new(task.x, task.y),
                    task.g,
                    task.time,
                );

                let mut result = LowLevelResult {
                    from_node_index: task.node_index,
                    count: successors.len() as i32,
                    data: [[0; 4]; MAX_NEIGHBORS],
                };
                for (slot, successor) in result.data.iter_mut().zip(successors.iter()) {
                    *slot = [
                        successor.position.x,
                        successor.position.y,
                        successor.g_cost,
                        successor.time,
                    ];
                }
                comm.send(0, Tag::LowLevelResult, Body::LowLevelResult(result));
            }
            (tag, _) => debug_assert!(false, "unexpected message {tag:?} at expander"),
        }
    }
    None
}
