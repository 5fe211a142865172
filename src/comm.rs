mod collective;
mod frame;
mod transport;

pub(crate) use collective::ReduceOp;
pub(crate) use frame::{pack_constraints, unpack_constraints, NodeFrame};
pub(crate) use transport::{Communicator, World};

use crate::algorithm::MAX_NEIGHBORS;
use crate::common::GridCoord;

/// Message tags. The numeric values mirror the wire protocol: 1xx for the
/// high-level coordinator/worker traffic, 2xx for the low-level planner, 3xx
/// for peer-to-peer node hand-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub(crate) enum Tag {
    Task = 100,
    Children = 101,
    Solution = 102,
    /// Reserved.
    #[allow(dead_code)]
    Idle = 103,
    Terminate = 104,
    /// Reserved.
    #[allow(dead_code)]
    Incumbent = 105,
    LowLevelTask = 200,
    LowLevelResult = 201,
    LowLevelTerminate = 202,
    LowLevelRequest = 210,
    LowLevelResponse = 211,
    PeerNode = 300,
}

/// One space-time state handed to an expander rank.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LowLevelTask {
    pub(crate) node_index: i32,
    pub(crate) x: i32,
    pub(crate) y: i32,
    pub(crate) g: i32,
    pub(crate) time: i32,
}

/// Up to five successors of one expanded state, each (x, y, g, t).
#[derive(Debug, Clone, Copy)]
pub(crate) struct LowLevelResult {
    pub(crate) from_node_index: i32,
    pub(crate) count: i32,
    pub(crate) data: [[i32; 4]; MAX_NEIGHBORS],
}

/// Replan request for the manager pool. `agent_id` of -1 requests shutdown.
/// Constraints travel pre-filtered for the agent, 7 ints apiece.
#[derive(Debug, Clone)]
pub(crate) struct PathRequest {
    pub(crate) agent_id: i32,
    pub(crate) start: GridCoord,
    pub(crate) goal: GridCoord,
    pub(crate) constraint_data: Vec<i32>,
}

/// Manager reply: status 1 carries `(x, y)` pairs of the path.
#[derive(Debug, Clone)]
pub(crate) struct PathResponse {
    pub(crate) status: i32,
    pub(crate) path_data: Vec<i32>,
}

/// Typed payloads. Wrapping each frame in a single envelope keeps the
/// header/cost/path/constraint pairing impossible to violate.
#[derive(Debug, Clone)]
pub(crate) enum Body {
    Empty,
    Count(i32),
    Node(NodeFrame),
    LowLevelTask(LowLevelTask),
    LowLevelResult(LowLevelResult),
    PathRequest(PathRequest),
    PathResponse(PathResponse),
}
