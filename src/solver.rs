mod central;
mod decentral;
mod serial;
mod service;
mod worker;

pub use central::CentralCbs;
pub use decentral::DecentralCbs;
pub use serial::SerialCbs;

use crate::common::Solution;
use crate::config::Config;
use crate::stat::RunStats;

#[derive(Debug)]
pub struct SolveOutcome {
    pub stats: RunStats,
    /// The decentralised driver reports cost only and leaves this empty.
    pub solution: Option<Solution>,
}

pub trait Solver {
    fn solve(&mut self, config: &Config) -> SolveOutcome;
}
