use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::info;

use crate::scenario::ProblemInstance;

/// Per-run search statistics. `best_cost` is -1.0 when no solution was found;
/// for the distributed drivers compute time is runtime minus the mean
/// communication time across ranks.
#[derive(Debug, Clone)]
pub struct RunStats {
    pub nodes_expanded: u64,
    pub nodes_generated: u64,
    pub conflicts_detected: u64,
    pub best_cost: f64,
    pub solution_found: bool,
    pub timed_out: bool,
    pub runtime_sec: f64,
    pub comm_time_sec: f64,
    pub compute_time_sec: f64,
}

impl Default for RunStats {
    fn default() -> Self {
        RunStats {
            nodes_expanded: 0,
            nodes_generated: 0,
            conflicts_detected: 0,
            best_cost: -1.0,
            solution_found: false,
            timed_out: false,
            runtime_sec: 0.0,
            comm_time_sec: 0.0,
            compute_time_sec: 0.0,
        }
    }
}

impl RunStats {
    pub fn status(&self) -> &'static str {
        if self.solution_found {
            "success"
        } else if self.timed_out {
            "timeout"
        } else {
            "failure"
        }
    }

    pub fn print(&self, solver: &str) {
        info!(
            "{} finished: status {} cost {:.0} expanded {} generated {} conflicts {} runtime {:.6}s comm {:.6}s compute {:.6}s",
            solver,
            self.status(),
            self.best_cost,
            self.nodes_expanded,
            self.nodes_generated,
            self.conflicts_detected,
            self.runtime_sec,
            self.comm_time_sec,
            self.compute_time_sec
        );
    }

    /// Append one CSV record, writing the header when the file is new.
    pub fn append_csv(
        &self,
        csv_path: &str,
        map_path: &str,
        instance: &ProblemInstance,
        timeout_seconds: f64,
    ) -> Result<()> {
        let map_name = Path::new(map_path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(map_path);
        let need_header = !Path::new(csv_path).exists();

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(csv_path)
            .with_context(|| format!("opening CSV file {csv_path}"))?;

        if need_header {
            writeln!(
                file,
                "map,agents,width,height,nodes_expanded,nodes_generated,conflicts,cost,runtime_sec,comm_time_sec,compute_time_sec,timeout_sec,status"
            )?;
        }
        writeln!(
            file,
            "{},{},{},{},{},{},{},{:.0},{:.6},{:.6},{:.6},{:.2},{}",
            map_name,
            instance.num_agents(),
            instance.grid.width,
            instance.grid.height,
            self.nodes_expanded,
            self.nodes_generated,
            self.conflicts_detected,
            self.best_cost,
            self.runtime_sec,
            self.comm_time_sec,
            self.compute_time_sec,
            timeout_seconds,
            self.status()
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let mut stats = RunStats::default();
        assert_eq!(stats.status(), "failure");
        stats.timed_out = true;
        assert_eq!(stats.status(), "timeout");
        stats.solution_found = true;
        assert_eq!(stats.status(), "success");
    }

    #[test]
    fn test_default_reports_no_cost() {
        let stats = RunStats::default();
        assert_eq!(stats.best_cost, -1.0);
        assert!(!stats.solution_found);
    }
}
