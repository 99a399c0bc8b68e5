//! Worker-count heuristics.
//!
//! Compute-bound jobs gain nothing from more workers than there are cores.
//! I/O-bound jobs spend most of their time suspended, so the pool can keep
//! more of them in flight: the multiplier grows with the ratio of time spent
//! waiting to time spent computing.

/// Character of the work a pool will run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Workload {
    /// Jobs keep a core busy for their whole duration.
    Compute,
    /// Jobs mostly wait. `wait_ratio` is waiting time divided by compute
    /// time (e.g. 9.0 for a job that waits 90 ms and computes 10 ms).
    Io { wait_ratio: f64 },
}

/// Number of parallel execution units available to this process.
pub fn available_parallelism() -> usize {
    num_cpus::get().max(1)
}

/// Suggested worker count for `workload` on this machine. Always at least 1.
pub fn recommended_workers(workload: Workload) -> usize {
    workers_for(workload, available_parallelism())
}

/// Suggested worker count for `workload` given `cores` execution units.
pub fn workers_for(workload: Workload, cores: usize) -> usize {
    let cores = cores.max(1);
    match workload {
        Workload::Compute => cores,
        Workload::Io { wait_ratio } => {
            let ratio = if wait_ratio.is_finite() && wait_ratio > 0.0 {
                wait_ratio
            } else {
                0.0
            };
            let scaled = (cores as f64 * (1.0 + ratio)).round();
            (scaled as usize).max(cores)
        }
    }
}
