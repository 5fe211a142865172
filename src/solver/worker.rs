use super::service::request_path;
use crate::comm::{Body, Communicator, NodeFrame, Tag};
use crate::common::{constraint_for, HighLevelNode};
use crate::scenario::ProblemInstance;

use std::thread;
use std::time::Duration;
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Expansion worker of the centralised driver: receive a node, recompute its
/// cost, and answer with either the solution or its surviving children.
/// Children at or above the incumbent are dropped before they ever travel.
pub(crate) fn run_worker(
    instance: &ProblemInstance,
    comm: &mut Communicator,
    coordinator: usize,
    manager_rank: Option<usize>,
) {
    loop {
        comm.progress_sends();

        if !comm.iprobe(Some(coordinator), None) {
            thread::sleep(POLL_INTERVAL);
            continue;
        }
        let envelope = comm.try_recv_match(Some(coordinator), None).unwrap();

        match (envelope.tag, envelope.body) {
            (Tag::Terminate, _) => break,
            (Tag::Task, Body::Node(frame)) => {
                let incumbent = frame.aux_value;
                let node = frame.decode();
                process_task(instance, comm, coordinator, manager_rank, node, incumbent);
            }
            (tag, _) => debug_assert!(false, "unexpected message {tag:?} at worker"),
        }
    }

    comm.flush_sends();
}

fn process_task(
    instance: &ProblemInstance,
    comm: &mut Communicator,
    coordinator: usize,
    manager_rank: Option<usize>,
    mut node: HighLevelNode,
    incumbent: i32,
) {
    node.refresh_cost();
    debug!(
        "worker {} expanding node id={} depth={} cost={:.0}",
        comm.rank(),
        node.id,
        node.depth,
        node.cost
    );

    let Some(conflict) = node.detect_conflict() else {
        debug!("worker {} found a solution at cost {:.0}", comm.rank(), node.cost);
        comm.send(coordinator, Tag::Solution, Body::Node(NodeFrame::encode(&node)));
        return;
    };

    let mut children = Vec::with_capacity(2);
    for agent in [conflict.agent_a, conflict.agent_b] {
        let mut child = node.child_with_constraint(constraint_for(&node, &conflict, agent));

        let (start, goal) = (instance.agents[agent].start, instance.agents[agent].goal);
        let link = match manager_rank {
            Some(manager) => Some((&mut *comm, manager)),
            None => None,
        };
        let Some(path) =
            request_path(link, &instance.grid, &child.constraints, agent, start, goal)
        else {
            continue;
        };
        child.paths[agent] = path;
        child.refresh_cost();

        if incumbent > 0 && child.cost >= incumbent as f64 {
            continue;
        }
        children.push(child);
    }

    debug!(
        "worker {} answers conflict ({}, {}) at t={} with {} child(ren)",
        comm.rank(),
        conflict.agent_a,
        conflict.agent_b,
        conflict.time,
        children.len()
    );

    comm.send(coordinator, Tag::Children, Body::Count(children.len() as i32));
    for child in &children {
        let mut frame = NodeFrame::encode(child);
        frame.aux_value = node.id;
        comm.send_async(coordinator, Tag::Children, Body::Node(frame));
    }
}
