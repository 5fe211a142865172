use super::{GridCoord, Path};

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ConstraintKind {
    Vertex,
    Edge,
}

/// Prohibition on one agent (or every agent when `agent_id` is negative)
/// occupying a cell or traversing an edge at a given time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Constraint {
    pub(crate) agent_id: i32,
    pub(crate) time: i32,
    pub(crate) kind: ConstraintKind,
    pub(crate) vertex: GridCoord,
    pub(crate) edge_to: GridCoord,
}

impl Constraint {
    pub(crate) fn vertex(agent_id: i32, time: i32, position: GridCoord) -> Self {
        Constraint {
            agent_id,
            time,
            kind: ConstraintKind::Vertex,
            vertex: position,
            edge_to: position,
        }
    }

    pub(crate) fn edge(agent_id: i32, time: i32, from: GridCoord, to: GridCoord) -> Self {
        Constraint {
            agent_id,
            time,
            kind: ConstraintKind::Edge,
            vertex: from,
            edge_to: to,
        }
    }

    pub(crate) fn applies_to(&self, agent_id: i32) -> bool {
        self.agent_id < 0 || self.agent_id == agent_id
    }

    /// Whether this constraint forbids the transition that leaves `from` at
    /// `depart_time` and arrives at `to` at `depart_time + 1`.
    pub(crate) fn forbids(&self, from: GridCoord, to: GridCoord, depart_time: i32) -> bool {
        match self.kind {
            ConstraintKind::Vertex => self.time == depart_time + 1 && self.vertex == to,
            ConstraintKind::Edge => {
                self.time == depart_time && self.vertex == from && self.edge_to == to
            }
        }
    }
}

/// Append-only collection of constraints. Lookups are linear scans; the
/// expected cardinality is the depth of the CBS node.
#[derive(Debug, Clone, Default)]
pub(crate) struct ConstraintSet {
    items: Vec<Constraint>,
}

impl ConstraintSet {
    pub(crate) fn push(&mut self, constraint: Constraint) {
        self.items.push(constraint);
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Constraint> {
        self.items.iter()
    }

    /// The subset applying to `agent_id`, for shipping to a remote planner.
    pub(crate) fn filtered(&self, agent_id: i32) -> ConstraintSet {
        ConstraintSet {
            items: self
                .items
                .iter()
                .filter(|c| c.applies_to(agent_id))
                .copied()
                .collect(),
        }
    }

    pub(crate) fn violates(
        &self,
        agent_id: i32,
        from: GridCoord,
        to: GridCoord,
        depart_time: i32,
    ) -> bool {
        self.items
            .iter()
            .any(|c| c.applies_to(agent_id) && c.forbids(from, to, depart_time))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConflictKind {
    Vertex,
    Edge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Conflict {
    pub(crate) agent_a: usize,
    pub(crate) agent_b: usize,
    pub(crate) time: i32,
    pub(crate) position: GridCoord,
    pub(crate) kind: ConflictKind,
    /// Agent a's arrival cell for edge conflicts; equals `position` otherwise.
    pub(crate) edge_to: GridCoord,
}

/// Position of an agent at `time`, waiting at the last cell past the path end.
pub(crate) fn step_with_wait(path: &Path, time: i32) -> GridCoord {
    debug_assert!(!path.is_empty());
    path.get(time as usize)
        .copied()
        .unwrap_or_else(|| *path.last().unwrap())
}

/// Constraint tree node: a constraint set plus one path per agent satisfying
/// every constraint that applies to it.
#[derive(Debug, Clone)]
pub(crate) struct HighLevelNode {
    pub(crate) id: i32,
    pub(crate) parent_id: i32,
    pub(crate) depth: i32,
    pub(crate) cost: f64,
    pub(crate) constraints: ConstraintSet,
    pub(crate) paths: Vec<Path>,
}

impl HighLevelNode {
    pub(crate) fn new(num_agents: usize) -> Self {
        HighLevelNode {
            id: -1,
            parent_id: -1,
            depth: 0,
            cost: 0.0,
            constraints: ConstraintSet::default(),
            paths: vec![Vec::new(); num_agents],
        }
    }

    pub(crate) fn num_agents(&self) -> usize {
        self.paths.len()
    }

    /// Sum of costs: each agent contributes its path length.
    pub(crate) fn compute_soc(&self) -> f64 {
        self.paths.iter().map(|p| p.len() as f64).sum()
    }

    pub(crate) fn refresh_cost(&mut self) {
        self.cost = self.compute_soc();
    }

    /// First conflict on the longest-path time axis, scanning time steps
    /// outermost, agent pairs inner, vertex before edge. Agents past the end
    /// of their path wait at the last cell.
    pub(crate) fn detect_conflict(&self) -> Option<Conflict> {
        let max_len = self.paths.iter().map(|p| p.len()).max().unwrap_or(0) as i32;

        for t in 0..max_len {
            for a in 0..self.paths.len() {
                let pa_curr = step_with_wait(&self.paths[a], t);
                let pa_next = step_with_wait(&self.paths[a], t + 1);

                for b in (a + 1)..self.paths.len() {
                    let pb_curr = step_with_wait(&self.paths[b], t);
                    let pb_next = step_with_wait(&self.paths[b], t + 1);

                    if pa_curr == pb_curr {
                        let conflict = Conflict {
                            agent_a: a,
                            agent_b: b,
                            time: t,
                            position: pa_curr,
                            kind: ConflictKind::Vertex,
                            edge_to: pa_curr,
                        };
                        debug!("vertex conflict {conflict:?}");
                        return Some(conflict);
                    }

                    if pa_curr == pb_next && pb_curr == pa_next {
                        let conflict = Conflict {
                            agent_a: a,
                            agent_b: b,
                            time: t,
                            position: pa_curr,
                            kind: ConflictKind::Edge,
                            edge_to: pa_next,
                        };
                        debug!("edge conflict {conflict:?}");
                        return Some(conflict);
                    }
                }
            }
        }
        None
    }

    /// Deep copy of this node with one extra constraint appended. The caller
    /// replans the constrained agent and refreshes the cost.
    pub(crate) fn child_with_constraint(&self, constraint: Constraint) -> HighLevelNode {
        let mut child = self.clone();
        child.id = -1;
        child.parent_id = self.id;
        child.depth = self.depth + 1;
        child.constraints.push(constraint);
        child
    }
}

/// The constraint a branching child imposes on `agent` for `conflict`. For
/// edge conflicts each agent is forbidden its own move, so agent b's endpoints
/// come from its own path.
pub(crate) fn constraint_for(node: &HighLevelNode, conflict: &Conflict, agent: usize) -> Constraint {
    match conflict.kind {
        ConflictKind::Vertex => Constraint::vertex(agent as i32, conflict.time, conflict.position),
        ConflictKind::Edge => {
            if agent == conflict.agent_a {
                Constraint::edge(agent as i32, conflict.time, conflict.position, conflict.edge_to)
            } else {
                let from = step_with_wait(&node.paths[agent], conflict.time);
                let to = step_with_wait(&node.paths[agent], conflict.time + 1);
                Constraint::edge(agent as i32, conflict.time, from, to)
            }
        }
    }
}
