use super::service::{request_path, request_shutdown, service_loop};
use super::worker::run_worker;
use super::{SolveOutcome, Solver};
use crate::comm::{Body, Communicator, NodeFrame, Tag, World};
use crate::common::{HighLevelNode, MinHeap, Solution};
use crate::config::Config;
use crate::scenario::ProblemInstance;
use crate::stat::RunStats;

use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const PLATEAU_EPSILON: f64 = 1e-6;
const REPLY_POLL_SLICE: Duration = Duration::from_millis(10);
const DRAIN_LIMIT: Duration = Duration::from_secs(5);

/// Coordinator/worker CBS. Rank 0 owns the frontier and the incumbent and
/// dispatches whole cost plateaus; ranks 1..=expanders expand nodes; an
/// optional trailing pool of ranks serves low-level replans.
pub struct CentralCbs {
    instance: ProblemInstance,
}

impl CentralCbs {
    pub fn new(instance: &ProblemInstance) -> Self {
        CentralCbs {
            instance: instance.clone(),
        }
    }
}

impl Solver for CentralCbs {
    fn solve(&mut self, config: &Config) -> SolveOutcome {
        let expanders = config.expanders;
        let pool_size = config.low_level_pool;
        let world_size = 1 + expanders + pool_size;
        let manager_rank = (pool_size > 0).then_some(1 + expanders);

        let mut world = World::connect(world_size).into_iter();
        let mut coordinator_comm = world.next().unwrap();
        let worker_comms: Vec<_> = world.by_ref().take(expanders).collect();
        let pool_world_comms: Vec<_> = world.collect();
        let pool_comms = if pool_size > 0 {
            World::connect(pool_size)
        } else {
            Vec::new()
        };

        let instance = &self.instance;
        thread::scope(|scope| {
            for mut comm in worker_comms {
                scope.spawn(move || run_worker(instance, &mut comm, 0, manager_rank));
            }
            for (mut world_comm, mut pool_comm) in
                pool_world_comms.into_iter().zip(pool_comms.into_iter())
            {
                scope.spawn(move || service_loop(&instance.grid, &mut world_comm, &mut pool_comm));
            }

            run_coordinator(instance, config, &mut coordinator_comm, expanders, manager_rank)
        })
    }
}

enum Reply {
    Solution(HighLevelNode),
    Children(Vec<HighLevelNode>),
}

/// Wait for one complete worker reply, giving up at `deadline` if nothing has
/// even started to arrive. Once a child count is in, the frames behind it are
/// already in flight, so they are taken with a blocking receive.
fn receive_reply(comm: &mut Communicator, deadline: Instant) -> Option<Reply> {
    let envelope = comm.recv_match_deadline(None, None, deadline)?;
    match (envelope.tag, envelope.body) {
        (Tag::Solution, Body::Node(frame)) => Some(Reply::Solution(frame.decode())),
        (Tag::Children, Body::Count(count)) => {
            let mut children = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let child = comm.recv_match(Some(envelope.source), Some(Tag::Children));
                if let Body::Node(frame) = child.body {
                    children.push(frame.decode());
                }
            }
            Some(Reply::Children(children))
        }
        (tag, _) => {
            debug_assert!(false, "unexpected message {tag:?} at coordinator");
            None
        }
    }
}

fn run_coordinator(
    instance: &ProblemInstance,
    config: &Config,
    comm: &mut Communicator,
    expanders: usize,
    manager_rank: Option<usize>,
) -> SolveOutcome {
    let start_time = Instant::now();
    let mut stats = RunStats::default();
    let grid = &instance.grid;
    let out_of_time = |stats: &RunStats| {
        !stats.timed_out
            && config.timeout_seconds > 0.0
            && start_time.elapsed().as_secs_f64() > config.timeout_seconds
    };

    let shutdown = |comm: &mut Communicator| {
        for worker in 1..=expanders {
            comm.send(worker, Tag::Terminate, Body::Empty);
        }
        if let Some(manager) = manager_rank {
            request_shutdown(comm, manager);
        }
        comm.flush_sends();
    };

    let mut root = HighLevelNode::new(instance.num_agents());
    root.id = 0;
    let mut root_ok = true;
    for agent in &instance.agents {
        let link = match manager_rank {
            Some(manager) => Some((&mut *comm, manager)),
            None => None,
        };
        match request_path(link, grid, &root.constraints, agent.id, agent.start, agent.goal) {
            Some(path) => root.paths[agent.id] = path,
            None => {
                info!("agent {} has no path at all, instance is unsolvable", agent.id);
                root_ok = false;
                break;
            }
        }
    }
    if !root_ok {
        shutdown(comm);
        stats.runtime_sec = start_time.elapsed().as_secs_f64();
        return SolveOutcome {
            stats,
            solution: None,
        };
    }
    root.refresh_cost();

    let mut open = MinHeap::new();
    open.push(root.cost, root);
    let mut incumbent: Option<HighLevelNode> = None;
    let mut incumbent_cost = f64::INFINITY;
    let mut next_node_id = 1;
    let mut rr_index = 0;
    let mut comm_time = 0.0;

    'search: while !open.is_empty() {
        if out_of_time(&stats) {
            stats.timed_out = true;
            break;
        }

        // Drain the whole cost plateau, one node per worker at most, and
        // dispatch it round-robin with the incumbent piggybacked for
        // worker-side pruning.
        let (plateau_cost, front) = open.pop().unwrap();
        let mut plateau = vec![front];
        while plateau.len() < expanders {
            match open.peek_key() {
                Some(key) if (key - plateau_cost).abs() <= PLATEAU_EPSILON => {
                    plateau.push(open.pop().unwrap().1);
                }
                _ => break,
            }
        }
        debug!(
            "dispatching plateau of {} node(s) at cost {:.0}",
            plateau.len(),
            plateau_cost
        );

        let mut outstanding = plateau.len();
        for node in plateau {
            let worker = 1 + rr_index;
            rr_index = (rr_index + 1) % expanders;
            let mut frame = NodeFrame::encode(&node);
            frame.aux_value = if incumbent_cost.is_finite() {
                incumbent_cost.ceil() as i32
            } else {
                i32::MAX
            };
            comm.send(worker, Tag::Task, Body::Node(frame));
            stats.nodes_expanded += 1;
        }

        // Exactly one reply per dispatched task. On timeout, keep draining
        // for a bounded window so no reply is left unmatched in the channels.
        let mut drain_deadline: Option<Instant> = None;
        while outstanding > 0 {
            comm.progress_sends();
            let wait_start = Instant::now();
            let deadline = drain_deadline.unwrap_or_else(|| wait_start + REPLY_POLL_SLICE);

            let reply = receive_reply(comm, deadline);
            comm_time += wait_start.elapsed().as_secs_f64();

            match reply {
                Some(Reply::Solution(mut node)) => {
                    node.id = next_node_id;
                    next_node_id += 1;
                    node.refresh_cost();
                    if node.cost < incumbent_cost {
                        info!("new incumbent at cost {:.0}", node.cost);
                        incumbent_cost = node.cost;
                        incumbent = Some(node);
                    }
                    outstanding -= 1;
                }
                Some(Reply::Children(children)) => {
                    stats.conflicts_detected += 1;
                    for mut child in children {
                        child.id = next_node_id;
                        next_node_id += 1;
                        child.refresh_cost();
                        if child.cost < incumbent_cost {
                            open.push(child.cost, child);
                            stats.nodes_generated += 1;
                        }
                    }
                    outstanding -= 1;
                }
                None => {
                    if drain_deadline.is_some() {
                        // Drain window expired with replies still missing.
                        break;
                    }
                    if out_of_time(&stats) {
                        stats.timed_out = true;
                        drain_deadline = Some(Instant::now() + DRAIN_LIMIT);
                    }
                }
            }
        }
        if stats.timed_out {
            break 'search;
        }

        // The frontier is dominated once its best node cannot beat the
        // incumbent.
        if incumbent.is_some() {
            match open.peek_key() {
                None => break,
                Some(top) if top >= incumbent_cost - PLATEAU_EPSILON => break,
                _ => {}
            }
        }
    }

    shutdown(comm);

    stats.runtime_sec = start_time.elapsed().as_secs_f64();
    stats.comm_time_sec = comm_time;
    stats.compute_time_sec = stats.runtime_sec - comm_time;
    if let Some(node) = &incumbent {
        stats.best_cost = node.cost;
        stats.solution_found = true;
    }

    SolveOutcome {
        stats,
        solution: incumbent.map(|node| Solution { paths: node.paths }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::GridCoord;
    use crate::grid::Grid;
    use crate::scenario::Agent;
    use crate::solver::SerialCbs;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("debug")
            .try_init();
    }

    fn agent(id: usize, start: (i32, i32), goal: (i32, i32)) -> Agent {
        Agent {
            id,
            start: GridCoord::new(start.0, start.1),
            goal: GridCoord::new(goal.0, goal.1),
        }
    }

    fn central_config(expanders: usize, low_level_pool: usize) -> Config {
        Config {
            solver: "central".to_string(),
            expanders,
            low_level_pool,
            ..Config::default()
        }
    }

    #[test]
    fn test_no_conflict_instance_solved_by_root_dispatch() {
        init_tracing();
        let grid = Grid::parse("3 3\n000\n000\n000\n").unwrap();
        let instance = ProblemInstance::new(
            grid,
            vec![agent(0, (0, 0), (2, 0)), agent(1, (0, 2), (2, 2))],
        )
        .unwrap();

        let outcome = CentralCbs::new(&instance).solve(&central_config(2, 0));
        assert!(outcome.stats.solution_found);
        assert_eq!(outcome.stats.best_cost, 6.0);
        assert!(outcome
            .solution
            .unwrap()
            .verify(&instance.grid, &instance.agents));
    }

    #[test]
    fn test_vertex_dispute_matches_serial_cost() {
        init_tracing();
        let grid = Grid::parse("3 3\n000\n000\n000\n").unwrap();
        let instance = ProblemInstance::new(
            grid,
            vec![agent(0, (0, 1), (2, 1)), agent(1, (1, 0), (1, 2))],
        )
        .unwrap();

        let serial = SerialCbs::new(&instance).solve(&Config::default());
        let central = CentralCbs::new(&instance).solve(&central_config(2, 0));

        assert!(central.stats.solution_found);
        assert_eq!(central.stats.best_cost, serial.stats.best_cost);
        assert!(central
            .solution
            .unwrap()
            .verify(&instance.grid, &instance.agents));
    }

    #[test]
    fn test_plateau_of_independent_disputes_matches_serial() {
        init_tracing();
        // Two disjoint vertex disputes make the root children an equal-cost
        // plateau, so one round dispatches at least two nodes.
        let grid = Grid::parse("5 5\n00000\n00000\n00000\n00000\n00000\n").unwrap();
        let instance = ProblemInstance::new(
            grid,
            vec![
                agent(0, (0, 1), (2, 1)),
                agent(1, (1, 0), (1, 2)),
                agent(2, (2, 3), (4, 3)),
                agent(3, (3, 2), (3, 4)),
            ],
        )
        .unwrap();

        let serial = SerialCbs::new(&instance).solve(&Config::default());
        let central = CentralCbs::new(&instance).solve(&central_config(3, 0));

        assert!(serial.stats.solution_found);
        assert!(central.stats.solution_found);
        assert_eq!(central.stats.best_cost, serial.stats.best_cost);
        assert!(central
            .solution
            .unwrap()
            .verify(&instance.grid, &instance.agents));
    }

    #[test]
    fn test_passing_bay_with_low_level_pool() {
        init_tracing();
        let grid = Grid::parse("5 3\n00000\n11011\n11111\n").unwrap();
        let instance = ProblemInstance::new(
            grid,
            vec![agent(0, (0, 0), (4, 0)), agent(1, (4, 0), (0, 0))],
        )
        .unwrap();

        let serial = SerialCbs::new(&instance).solve(&Config::default());
        let central = CentralCbs::new(&instance).solve(&central_config(2, 2));

        assert!(central.stats.solution_found);
        assert_eq!(central.stats.best_cost, serial.stats.best_cost);
        assert!(central
            .solution
            .unwrap()
            .verify(&instance.grid, &instance.agents));
    }

    #[test]
    fn test_walled_off_instance_fails_cleanly() {
        init_tracing();
        let grid = Grid::parse("3 3\n010\n111\n000\n").unwrap();
        let instance = ProblemInstance::new(
            grid,
            vec![agent(0, (0, 0), (2, 0)), agent(1, (0, 2), (2, 2))],
        )
        .unwrap();

        let outcome = CentralCbs::new(&instance).solve(&central_config(2, 0));
        assert!(!outcome.stats.solution_found);
        assert!(!outcome.stats.timed_out);
        assert!(outcome.solution.is_none());
    }
}
