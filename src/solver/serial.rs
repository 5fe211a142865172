use super::service::request_path;
use super::{SolveOutcome, Solver};
use crate::common::{constraint_for, HighLevelNode, MinHeap, Solution};
use crate::config::Config;
use crate::scenario::ProblemInstance;
use crate::stat::RunStats;

use std::time::Instant;
use tracing::{debug, info};

/// Best-first CBS in a single rank, keyed by sum of costs. Exits on the
/// first conflict-free node, on the wall-clock timeout, or when the
/// expansion budget runs out (reported as a timeout).
pub struct SerialCbs {
    instance: ProblemInstance,
}

impl SerialCbs {
    pub fn new(instance: &ProblemInstance) -> Self {
        SerialCbs {
            instance: instance.clone(),
        }
    }
}

impl Solver for SerialCbs {
    fn solve(&mut self, config: &Config) -> SolveOutcome {
        let start_time = Instant::now();
        let mut stats = RunStats::default();
        let grid = &self.instance.grid;

        let mut root = HighLevelNode::new(self.instance.num_agents());
        root.id = 0;
        for agent in &self.instance.agents {
            match request_path(None, grid, &root.constraints, agent.id, agent.start, agent.goal) {
                Some(path) => root.paths[agent.id] = path,
                None => {
                    info!("agent {} has no path at all, instance is unsolvable", agent.id);
                    stats.runtime_sec = start_time.elapsed().as_secs_f64();
                    return SolveOutcome {
                        stats,
                        solution: None,
                    };
                }
            }
        }
        root.refresh_cost();

        let mut open = MinHeap::new();
        open.push(root.cost, root);
        let mut next_node_id = 1;
        let mut incumbent: Option<HighLevelNode> = None;

        while let Some((_, node)) = open.pop() {
            if stats.nodes_expanded >= config.max_nodes_expanded {
                stats.timed_out = true;
                break;
            }
            if config.timeout_seconds > 0.0
                && start_time.elapsed().as_secs_f64() > config.timeout_seconds
            {
                stats.timed_out = true;
                break;
            }

            stats.nodes_expanded += 1;

            let Some(conflict) = node.detect_conflict() else {
                incumbent = Some(node);
                break;
            };
            stats.conflicts_detected += 1;
            debug!(
                "expanding node id={} depth={} cost={:.0} on conflict {:?}",
                node.id, node.depth, node.cost, conflict
            );

            for agent in [conflict.agent_a, conflict.agent_b] {
                let mut child =
                    node.child_with_constraint(constraint_for(&node, &conflict, agent));
                child.id = next_node_id;
                next_node_id += 1;

                let (start, goal) = (
                    self.instance.agents[agent].start,
                    self.instance.agents[agent].goal,
                );
                let Some(path) =
                    request_path(None, grid, &child.constraints, agent, start, goal)
                else {
                    continue;
                };
                child.paths[agent] = path;
                child.refresh_cost();
                open.push(child.cost, child);
                stats.nodes_generated += 1;
            }
        }

        stats.runtime_sec = start_time.elapsed().as_secs_f64();
        stats.compute_time_sec = stats.runtime_sec;
        if let Some(node) = &incumbent {
            stats.best_cost = node.cost;
            stats.solution_found = true;
        }

        SolveOutcome {
            stats,
            solution: incumbent.map(|node| Solution { paths: node.paths }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::GridCoord;
    use crate::grid::Grid;
    use crate::scenario::Agent;

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

    fn solve(instance: &ProblemInstance, config: &Config) -> SolveOutcome {
        SerialCbs::new(instance).solve(config)
    }

    #[test]
    fn test_no_conflict_instance_returns_root() {
        init_tracing();
        let grid = Grid::parse("3 3\n000\n000\n000\n").unwrap();
        let instance = ProblemInstance::new(
            grid,
            vec![agent(0, (0, 0), (2, 0)), agent(1, (0, 2), (2, 2))],
        )
        .unwrap();

        let outcome = solve(&instance, &Config::default());
        assert!(outcome.stats.solution_found);
        assert_eq!(outcome.stats.best_cost, 6.0);
        assert_eq!(outcome.stats.nodes_expanded, 1);
        assert_eq!(outcome.stats.conflicts_detected, 0);
        let solution = outcome.solution.unwrap();
        assert!(solution.verify(&instance.grid, &instance.agents));
    }

    #[test]
    fn test_single_agent_trivially_succeeds() {
        init_tracing();
        let grid = Grid::parse("3 3\n000\n000\n000\n").unwrap();
        let instance = ProblemInstance::new(grid, vec![agent(0, (0, 0), (2, 2))]).unwrap();

        let outcome = solve(&instance, &Config::default());
        assert!(outcome.stats.solution_found);
        assert_eq!(outcome.stats.best_cost, 5.0);
    }

    #[test]
    fn test_start_equals_goal_costs_one() {
        init_tracing();
        let grid = Grid::parse("3 3\n000\n000\n000\n").unwrap();
        let instance = ProblemInstance::new(grid, vec![agent(0, (1, 1), (1, 1))]).unwrap();

        let outcome = solve(&instance, &Config::default());
        assert_eq!(outcome.stats.best_cost, 1.0);
        assert_eq!(outcome.solution.unwrap().paths[0].len(), 1);
    }

    #[test]
    fn test_vertex_dispute_resolved_with_one_wait() {
        init_tracing();
        // Both agents want (1, 1) at t = 1; one of them waits once.
        let grid = Grid::parse("3 3\n000\n000\n000\n").unwrap();
        let instance = ProblemInstance::new(
            grid,
            vec![agent(0, (0, 1), (2, 1)), agent(1, (1, 0), (1, 2))],
        )
        .unwrap();

        let outcome = solve(&instance, &Config::default());
        assert!(outcome.stats.solution_found);
        assert_eq!(outcome.stats.best_cost, 7.0);
        assert!(outcome.stats.conflicts_detected >= 1);
        let solution = outcome.solution.unwrap();
        assert!(solution.verify(&instance.grid, &instance.agents));
    }

    #[test]
    fn test_passing_bay_resolves_head_on_swap() {
        init_tracing();
        let grid = Grid::parse("5 3\n00000\n11011\n11111\n").unwrap();
        let instance = ProblemInstance::new(
            grid,
            vec![agent(0, (0, 0), (4, 0)), agent(1, (4, 0), (0, 0))],
        )
        .unwrap();

        // The root itself is in conflict.
        let mut root = HighLevelNode::new(2);
        for a in &instance.agents {
            root.paths[a.id] = request_path(
                None,
                &instance.grid,
                &root.constraints,
                a.id,
                a.start,
                a.goal,
            )
            .unwrap();
        }
        assert!(root.detect_conflict().is_some());

        let outcome = solve(&instance, &Config::default());
        assert!(outcome.stats.solution_found);
        assert!(outcome.stats.best_cost > 10.0);
        let solution = outcome.solution.unwrap();
        assert!(solution.verify(&instance.grid, &instance.agents));
    }

    #[test]
    fn test_corridor_swap_exhausts_budget() {
        init_tracing();
        // A 1x5 corridor with no passing bay cannot be solved; the expansion
        // budget runs out and the run reports a timeout without a solution.
        let grid = Grid::parse("5 1\n00000\n").unwrap();
        let instance = ProblemInstance::new(
            grid,
            vec![agent(0, (0, 0), (4, 0)), agent(1, (4, 0), (0, 0))],
        )
        .unwrap();

        let config = Config {
            max_nodes_expanded: 200,
            ..Config::default()
        };
        let outcome = solve(&instance, &config);
        assert!(!outcome.stats.solution_found);
        assert!(outcome.stats.timed_out);
        assert_eq!(outcome.stats.best_cost, -1.0);
        assert!(outcome.solution.is_none());
    }

    #[test]
    fn test_walled_off_agent_is_unsolvable() {
        init_tracing();
        let grid = Grid::parse("3 3\n010\n111\n000\n").unwrap();
        let instance = ProblemInstance::new(
            grid,
            vec![agent(0, (0, 0), (2, 0)), agent(1, (0, 2), (0, 0))],
        )
        .unwrap();

        let outcome = solve(&instance, &Config::default());
        assert!(!outcome.stats.solution_found);
        assert!(!outcome.stats.timed_out);
        assert_eq!(outcome.stats.best_cost, -1.0);
    }

    #[test]
    fn test_solution_respects_all_constraints() {
        init_tracing();
        let grid = Grid::parse("3 3\n000\n000\n000\n").unwrap();
        let instance = ProblemInstance::new(
            grid,
            vec![agent(0, (0, 1), (2, 1)), agent(1, (1, 0), (1, 2))],
        )
        .unwrap();

        let outcome = solve(&instance, &Config::default());
        let solution = outcome.solution.unwrap();
        let mut node = HighLevelNode::new(2);
        node.paths = solution.paths.clone();
        assert!(node.detect_conflict().is_none());
        assert_eq!(
            node.compute_soc(),
            outcome.stats.best_cost
        );
    }
}
