use super::service::request_path;
use super::{SolveOutcome, Solver};
use crate::comm::{Body, Communicator, NodeFrame, ReduceOp, Tag, World};
use crate::common::{constraint_for, HighLevelNode, MinHeap};
use crate::config::Config;
use crate::scenario::ProblemInstance;
use crate::stat::RunStats;

use std::thread;
use std::time::Instant;
use tracing::{debug, info};

const BOUND_EPSILON: f64 = 1e-6;

/// Fully peer-to-peer CBS. Every rank keeps its own frontier and the root is
/// planned locally everywhere; children are handed off round-robin. Three
/// collectives per iteration keep the peers agreed on timeout, the global
/// lower bound and the global incumbent, and the admission gate
/// `cost <= w * LB` bounds how far any peer may run ahead.
pub struct DecentralCbs {
    instance: ProblemInstance,
}

impl DecentralCbs {
    pub fn new(instance: &ProblemInstance) -> Self {
        DecentralCbs {
            instance: instance.clone(),
        }
    }
}

impl Solver for DecentralCbs {
    fn solve(&mut self, config: &Config) -> SolveOutcome {
        let mut comms = World::connect(config.ranks).into_iter();
        let mut first = comms.next().unwrap();

        let instance = &self.instance;
        thread::scope(|scope| {
            for mut comm in comms {
                scope.spawn(move || run_peer(instance, config, &mut comm));
            }
            run_peer(instance, config, &mut first)
        })
    }
}

fn drain_peer_nodes(comm: &mut Communicator, open: &mut MinHeap<HighLevelNode>, comm_time: &mut f64) {
    let drain_start = Instant::now();
    while let Some(envelope) = comm.try_recv_match(None, Some(Tag::PeerNode)) {
        let Body::Node(frame) = envelope.body else {
            debug_assert!(false, "mistagged peer node");
            continue;
        };
        let mut node = frame.decode();
        node.refresh_cost();
        debug!(
            "peer {} received node depth={} cost={:.0} from {}",
            comm.rank(),
            node.depth,
            node.cost,
            envelope.source
        );
        open.push(node.cost, node);
    }
    *comm_time += drain_start.elapsed().as_secs_f64();
}

fn run_peer(instance: &ProblemInstance, config: &Config, comm: &mut Communicator) -> SolveOutcome {
    let start_time = Instant::now();
    let grid = &instance.grid;
    let rank = comm.rank();
    let size = comm.size();

    let mut nodes_expanded: u64 = 0;
    let mut nodes_generated: u64 = 0;
    let mut conflicts_detected: u64 = 0;
    let mut timed_out = false;
    let mut comm_time = 0.0;
    let mut local_solution = f64::INFINITY;

    // Every peer plans the root for itself under the shared empty constraint
    // set; a single blocked agent fails the whole world together.
    let mut root = HighLevelNode::new(instance.num_agents());
    root.id = 0;
    let mut root_ok = 1.0;
    for agent in &instance.agents {
        match request_path(None, grid, &root.constraints, agent.id, agent.start, agent.goal) {
            Some(path) => root.paths[agent.id] = path,
            None => {
                root_ok = 0.0;
                break;
            }
        }
    }
    root.refresh_cost();

    if comm.collective().allreduce(root_ok, ReduceOp::Min) == 0.0 {
        if rank == 0 {
            info!("some agent has no path at all, instance is unsolvable");
        }
        let mut stats = RunStats::default();
        stats.runtime_sec = start_time.elapsed().as_secs_f64();
        return SolveOutcome {
            stats,
            solution: None,
        };
    }

    let mut open = MinHeap::new();
    open.push(root.cost, root);
    let mut rr_dest = (rank + 1) % size;

    loop {
        // Coordinated timeout: one flag raised anywhere stops everyone.
        let elapsed = start_time.elapsed().as_secs_f64();
        let local_timeout =
            if config.timeout_seconds > 0.0 && elapsed > config.timeout_seconds {
                1.0
            } else {
                0.0
            };
        let barrier_start = Instant::now();
        let any_timeout = comm.collective().allreduce(local_timeout, ReduceOp::Max);
        comm_time += barrier_start.elapsed().as_secs_f64();
        if any_timeout > 0.0 {
            timed_out = true;
            break;
        }

        comm.progress_sends();
        drain_peer_nodes(comm, &mut open, &mut comm_time);

        let local_lb = open.peek_key().unwrap_or(f64::INFINITY);
        let barrier_start = Instant::now();
        let global_lb = comm.collective().allreduce(local_lb, ReduceOp::Min);
        let global_solution = comm.collective().allreduce(local_solution, ReduceOp::Min);
        comm_time += barrier_start.elapsed().as_secs_f64();

        if global_solution.is_finite() {
            debug!("peer {rank} observes global solution {global_solution:.0}");
            break;
        }
        if global_lb.is_infinite() {
            debug!("peer {rank} observes empty frontiers everywhere, no solution");
            break;
        }

        let bound = config.suboptimality * global_lb;

        let Some((_, node)) = open.pop() else {
            // Work will arrive through hand-off.
            continue;
        };
        if node.cost > bound + BOUND_EPSILON {
            // Not admitted yet; wait for the global bound to catch up.
            open.push(node.cost, node);
            continue;
        }

        nodes_expanded += 1;
        debug!(
            "peer {rank} expanding depth={} cost={:.0} bound={bound:.0} lb={global_lb:.0}",
            node.depth, node.cost
        );

        let Some(conflict) = node.detect_conflict() else {
            debug!("peer {rank} found solution at cost {:.0}", node.cost);
            local_solution = local_solution.min(node.cost);
            continue;
        };
        conflicts_detected += 1;

        for agent in [conflict.agent_a, conflict.agent_b] {
            // Drain before every send so peer-to-peer bursts cannot wedge.
            drain_peer_nodes(comm, &mut open, &mut comm_time);

            let mut child = node.child_with_constraint(constraint_for(&node, &conflict, agent));
            let (start, goal) = (instance.agents[agent].start, instance.agents[agent].goal);
            let Some(path) =
                request_path(None, grid, &child.constraints, agent, start, goal)
            else {
                continue;
            };
            child.paths[agent] = path;
            child.refresh_cost();

            let dest = rr_dest;
            rr_dest = (rr_dest + 1) % size;
            if dest == rank {
                open.push(child.cost, child);
            } else {
                comm.send_async(dest, Tag::PeerNode, Body::Node(NodeFrame::encode(&child)));
            }
            nodes_generated += 1;

            comm.progress_sends();
            drain_peer_nodes(comm, &mut open, &mut comm_time);
        }
    }

    // Every peer leaves the loop in the same iteration, so nodes still parked
    // in the pending pool have no receiver that wants them; they are dropped
    // with the pool rather than flushed against inboxes nobody drains.
    comm.progress_sends();
    let runtime = start_time.elapsed().as_secs_f64();

    // Aggregate the run over all peers; every rank executes the same
    // reduction sequence and ends up with the same record.
    let collective = comm.collective();
    let total_expanded = collective.allreduce(nodes_expanded as f64, ReduceOp::Sum);
    let total_generated = collective.allreduce(nodes_generated as f64, ReduceOp::Sum);
    let total_conflicts = collective.allreduce(conflicts_detected as f64, ReduceOp::Sum);
    let total_comm = collective.allreduce(comm_time, ReduceOp::Sum);
    let any_timeout = collective.allreduce(if timed_out { 1.0 } else { 0.0 }, ReduceOp::Max);
    let global_solution = collective.allreduce(local_solution, ReduceOp::Min);

    let mean_comm = total_comm / size as f64;
    let stats = RunStats {
        nodes_expanded: total_expanded as u64,
        nodes_generated: total_generated as u64,
        conflicts_detected: total_conflicts as u64,
        best_cost: if global_solution.is_finite() {
            global_solution
        } else {
            -1.0
        },
        solution_found: global_solution.is_finite(),
        timed_out: any_timeout > 0.0,
        runtime_sec: runtime,
        comm_time_sec: mean_comm,
        compute_time_sec: runtime - mean_comm,
    };

    // The solution paths died with the expanding peer; only the cost is
    // agreed globally.
    SolveOutcome {
        stats,
        solution: None,
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

    fn decentral_config(ranks: usize, suboptimality: f64) -> Config {
        Config {
            solver: "decentral".to_string(),
            ranks,
            suboptimality,
            ..Config::default()
        }
    }

    #[test]
    fn test_no_conflict_instance_agrees_everywhere() {
        init_tracing();
        let grid = Grid::parse("3 3\n000\n000\n000\n").unwrap();
        let instance = ProblemInstance::new(
            grid,
            vec![agent(0, (0, 0), (2, 0)), agent(1, (0, 2), (2, 2))],
        )
        .unwrap();

        let outcome = DecentralCbs::new(&instance).solve(&decentral_config(3, 1.0));
        assert!(outcome.stats.solution_found);
        assert_eq!(outcome.stats.best_cost, 6.0);
        assert!(outcome.solution.is_none());
    }

    #[test]
    fn test_optimal_matches_serial_at_w_one() {
        init_tracing();
        let grid = Grid::parse("3 3\n000\n000\n000\n").unwrap();
        let instance = ProblemInstance::new(
            grid,
            vec![agent(0, (0, 1), (2, 1)), agent(1, (1, 0), (1, 2))],
        )
        .unwrap();

        let serial = SerialCbs::new(&instance).solve(&Config::default());
        let decentral = DecentralCbs::new(&instance).solve(&decentral_config(3, 1.0));

        assert!(decentral.stats.solution_found);
        assert_eq!(decentral.stats.best_cost, serial.stats.best_cost);
    }

    #[test]
    fn test_suboptimality_bound_holds() {
        init_tracing();
        let grid = Grid::parse("5 3\n00000\n11011\n11111\n").unwrap();
        let instance = ProblemInstance::new(
            grid,
            vec![agent(0, (0, 0), (4, 0)), agent(1, (4, 0), (0, 0))],
        )
        .unwrap();

        let serial = SerialCbs::new(&instance).solve(&Config::default());
        let decentral = DecentralCbs::new(&instance).solve(&decentral_config(4, 1.5));

        assert!(serial.stats.solution_found);
        assert!(decentral.stats.solution_found);
        assert!(decentral.stats.best_cost <= 1.5 * serial.stats.best_cost + 1e-9);
    }

    #[test]
    fn test_unsolvable_instance_exits_together() {
        init_tracing();
        let grid = Grid::parse("3 3\n010\n111\n000\n").unwrap();
        let instance = ProblemInstance::new(
            grid,
            vec![agent(0, (0, 0), (2, 0)), agent(1, (0, 2), (2, 2))],
        )
        .unwrap();

        let outcome = DecentralCbs::new(&instance).solve(&decentral_config(3, 1.0));
        assert!(!outcome.stats.solution_found);
        assert_eq!(outcome.stats.best_cost, -1.0);
    }

    #[test]
    fn test_single_rank_degenerates_to_local_search() {
        init_tracing();
        let grid = Grid::parse("3 3\n000\n000\n000\n").unwrap();
        let instance = ProblemInstance::new(
            grid,
            vec![agent(0, (0, 1), (2, 1)), agent(1, (1, 0), (1, 2))],
        )
        .unwrap();

        let outcome = DecentralCbs::new(&instance).solve(&decentral_config(1, 1.0));
        assert!(outcome.stats.solution_found);
        assert_eq!(outcome.stats.best_cost, 7.0);
    }
}
