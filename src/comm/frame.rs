use crate::common::{Constraint, ConstraintKind, ConstraintSet, GridCoord, HighLevelNode, Path};

/// Flat encoding of a high-level node: an 8-int header, the f64 cost, the
/// per-agent paths as `(L, x0, y0, x1, y1, ...)` and 7 ints per constraint
/// `(agent_id, time, kind, vx, vy, ex, ey)`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct NodeFrame {
    pub(crate) node_id: i32,
    pub(crate) parent_id: i32,
    pub(crate) depth: i32,
    pub(crate) num_agents: i32,
    pub(crate) constraint_count: i32,
    pub(crate) path_int_count: i32,
    pub(crate) constraint_int_count: i32,
    /// Piggybacked side-channel: the incumbent cost on task dispatch, the
    /// parent node id on child hand-back.
    pub(crate) aux_value: i32,
    pub(crate) cost: f64,
    pub(crate) path_data: Vec<i32>,
    pub(crate) constraint_data: Vec<i32>,
}

pub(crate) fn pack_constraints(constraints: &ConstraintSet) -> Vec<i32> {
    let mut data = Vec::with_capacity(constraints.len() * 7);
    for c in constraints.iter() {
        data.push(c.agent_id);
        data.push(c.time);
        data.push(match c.kind {
            ConstraintKind::Vertex => 0,
            ConstraintKind::Edge => 1,
        });
        data.push(c.vertex.x);
        data.push(c.vertex.y);
        data.push(c.edge_to.x);
        data.push(c.edge_to.y);
    }
    data
}

pub(crate) fn unpack_constraints(data: &[i32]) -> ConstraintSet {
    debug_assert_eq!(data.len() % 7, 0, "constraint data is not 7 ints per entry");
    let mut set = ConstraintSet::default();
    for entry in data.chunks_exact(7) {
        set.push(Constraint {
            agent_id: entry[0],
            time: entry[1],
            kind: if entry[2] == 0 {
                ConstraintKind::Vertex
            } else {
                ConstraintKind::Edge
            },
            vertex: GridCoord::new(entry[3], entry[4]),
            edge_to: GridCoord::new(entry[5], entry[6]),
        });
    }
    set
}

fn pack_paths(paths: &[Path]) -> Vec<i32> {
    let total: usize = paths.iter().map(|p| 1 + p.len() * 2).sum();
    let mut data = Vec::with_capacity(total);
    for path in paths {
        data.push(path.len() as i32);
        for coord in path {
            data.push(coord.x);
            data.push(coord.y);
        }
    }
    data
}

fn unpack_paths(data: &[i32], num_agents: usize) -> Vec<Path> {
    let mut paths = Vec::with_capacity(num_agents);
    let mut cursor = 0;
    for _ in 0..num_agents {
        let length = data[cursor] as usize;
        cursor += 1;
        let mut path = Vec::with_capacity(length);
        for _ in 0..length {
            path.push(GridCoord::new(data[cursor], data[cursor + 1]));
            cursor += 2;
        }
        paths.push(path);
    }
    debug_assert_eq!(cursor, data.len(), "trailing bytes in path data");
    paths
}

impl NodeFrame {
    pub(crate) fn encode(node: &HighLevelNode) -> NodeFrame {
        let path_data = pack_paths(&node.paths);
        let constraint_data = pack_constraints(&node.constraints);
        NodeFrame {
            node_id: node.id,
            parent_id: node.parent_id,
            depth: node.depth,
            num_agents: node.num_agents() as i32,
            constraint_count: node.constraints.len() as i32,
            path_int_count: path_data.len() as i32,
            constraint_int_count: constraint_data.len() as i32,
            aux_value: 0,
            cost: node.cost,
            path_data,
            constraint_data,
        }
    }

    pub(crate) fn decode(&self) -> HighLevelNode {
        debug_assert_eq!(self.path_int_count as usize, self.path_data.len());
        debug_assert_eq!(self.constraint_int_count as usize, self.constraint_data.len());
        debug_assert_eq!(self.constraint_int_count, self.constraint_count * 7);

        let mut node = HighLevelNode::new(self.num_agents as usize);
        node.id = self.node_id;
        node.parent_id = self.parent_id;
        node.depth = self.depth;
        node.cost = self.cost;
        node.paths = unpack_paths(&self.path_data, self.num_agents as usize);
        node.constraints = unpack_constraints(&self.constraint_data);
        node
    }
}
