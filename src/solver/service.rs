use crate::algorithm::{horizon_for, parallel_a_star, sequential_a_star};
use crate::comm::{
    pack_constraints, unpack_constraints, Body, Communicator, PathRequest, PathResponse, Tag,
};
use crate::common::{ConstraintSet, GridCoord, Path};
use crate::grid::Grid;

use tracing::debug;

/// Replan one agent, either locally or through the shared manager pool when
/// `link` names one. The request carries only the constraints that apply to
/// the agent; the manager replies with the path or a failure status.
pub(crate) fn request_path(
    link: Option<(&mut Communicator, usize)>,
    grid: &Grid,
    constraints: &ConstraintSet,
    agent_id: usize,
    start: GridCoord,
    goal: GridCoord,
) -> Option<Path> {
    let Some((comm, manager_rank)) = link else {
        return sequential_a_star(
            grid,
            constraints,
            agent_id as i32,
            start,
            goal,
            horizon_for(grid),
        );
    };

    let filtered = constraints.filtered(agent_id as i32);
    debug!(
        "requesting path for agent {agent_id} with {} constraints from manager {manager_rank}",
        filtered.len()
    );
    comm.send(
        manager_rank,
        Tag::LowLevelRequest,
        Body::PathRequest(PathRequest {
            agent_id: agent_id as i32,
            start,
            goal,
            constraint_data: pack_constraints(&filtered),
        }),
    );

    let envelope = comm.recv_match(Some(manager_rank), Some(Tag::LowLevelResponse));
    let Body::PathResponse(response) = envelope.body else {
        debug_assert!(false, "mistagged manager reply");
        return None;
    };
    if response.status == 0 {
        return None;
    }
    Some(
        response
            .path_data
            .chunks_exact(2)
            .map(|pair| GridCoord::new(pair[0], pair[1]))
            .collect(),
    )
}

/// A request with a negative agent id shuts the pool down.
pub(crate) fn request_shutdown(comm: &Communicator, manager_rank: usize) {
    comm.send(
        manager_rank,
        Tag::LowLevelRequest,
        Body::PathRequest(PathRequest {
            agent_id: -1,
            start: GridCoord::new(0, 0),
            goal: GridCoord::new(0, 0),
            constraint_data: Vec::new(),
        }),
    );
}

/// Low-level manager pool loop. Pool rank 0 accepts requests from any world
/// rank, fans each one out to the pool, and replies with the result of the
/// pool-wide parallel A*; the other pool ranks serve as expanders.
pub(crate) fn service_loop(grid: &Grid, world: &mut Communicator, pool: &mut Communicator) {
    let is_manager = pool.rank() == 0;

    loop {
        let (requester, request) = if is_manager {
            let envelope = world.recv_match(None, Some(Tag::LowLevelRequest));
            let Body::PathRequest(request) = envelope.body else {
                debug_assert!(false, "mistagged pool request");
                continue;
            };
            for member in 1..pool.size() {
                pool.send(member, Tag::LowLevelRequest, Body::PathRequest(request.clone()));
            }
            (envelope.source, request)
        } else {
            let envelope = pool.recv_match(Some(0), Some(Tag::LowLevelRequest));
            let Body::PathRequest(request) = envelope.body else {
                debug_assert!(false, "mistagged pool request");
                continue;
            };
            (0, request)
        };

        if request.agent_id < 0 {
            break;
        }

        let constraints = unpack_constraints(&request.constraint_data);
        let result = parallel_a_star(
            grid,
            &constraints,
            request.agent_id,
            request.start,
            request.goal,
            pool,
        );

        if is_manager {
            let response = match result {
                Some(path) => {
                    let mut path_data = Vec::with_capacity(path.len() * 2);
                    for coord in &path {
                        path_data.push(coord.x);
                        path_data.push(coord.y);
                    }
                    PathResponse {
                        status: 1,
                        path_data,
                    }
                }
                None => PathResponse {
                    status: 0,
                    path_data: Vec::new(),
                },
            };
            debug!(
                "manager replying to rank {requester} for agent {} with status {}",
                request.agent_id, response.status
            );
            world.send(requester, Tag::LowLevelResponse, Body::PathResponse(response));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::World;
    use crate::common::Constraint;
    use std::thread;

    fn coord(x: i32, y: i32) -> GridCoord {
        GridCoord::new(x, y)
    }

    #[test]
    fn test_pool_serves_requests_and_shuts_down() {
        let grid = Grid::parse("3 3\n000\n000\n000\n").unwrap();
        // World rank 0 is the client; ranks 1 and 2 form the pool.
        let mut world = World::connect(3);
        let mut pool = World::connect(2);
        let pool_member_1 = pool.pop().unwrap();
        let pool_member_0 = pool.pop().unwrap();
        let world_2 = world.pop().unwrap();
        let world_1 = world.pop().unwrap();
        let mut client = world.pop().unwrap();

        thread::scope(|scope| {
            let grid_ref = &grid;
            scope.spawn({
                let mut world_comm = world_1;
                let mut pool_comm = pool_member_0;
                move || service_loop(grid_ref, &mut world_comm, &mut pool_comm)
            });
            scope.spawn({
                let mut world_comm = world_2;
                let mut pool_comm = pool_member_1;
                move || service_loop(grid_ref, &mut world_comm, &mut pool_comm)
            });

            let mut constraints = ConstraintSet::default();
            constraints.push(Constraint::vertex(0, 1, coord(1, 0)));

            let path = request_path(
                Some((&mut client, 1)),
                grid_ref,
                &constraints,
                0,
                coord(0, 0),
                coord(2, 0),
            )
            .unwrap();
            assert_eq!(path.len(), 4);
            assert_eq!(path[0], coord(0, 0));
            assert_eq!(*path.last().unwrap(), coord(2, 0));
            assert_ne!(path[1], coord(1, 0));

            // A second request on the same pool.
            let free = request_path(
                Some((&mut client, 1)),
                grid_ref,
                &ConstraintSet::default(),
                1,
                coord(0, 2),
                coord(2, 2),
            )
            .unwrap();
            assert_eq!(free.len(), 3);

            request_shutdown(&client, 1);
        });
    }

    #[test]
    fn test_pool_reports_unreachable_goal() {
        let grid = Grid::parse("3 3\n010\n111\n000\n").unwrap();
        let mut world = World::connect(2);
        let mut pool = World::connect(1);
        let pool_member = pool.pop().unwrap();
        let world_1 = world.pop().unwrap();
        let mut client = world.pop().unwrap();

        thread::scope(|scope| {
            let grid_ref = &grid;
            scope.spawn({
                let mut world_comm = world_1;
                let mut pool_comm = pool_member;
                move || service_loop(grid_ref, &mut world_comm, &mut pool_comm)
            });

            let result = request_path(
                Some((&mut client, 1)),
                grid_ref,
                &ConstraintSet::default(),
                0,
                coord(0, 0),
                coord(1, 2),
            );
            assert!(result.is_none());
            request_shutdown(&client, 1);
        });
    }
}
