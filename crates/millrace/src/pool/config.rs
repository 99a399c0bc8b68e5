use crate::{
    Error, Result,
    sizing::{Workload, recommended_workers},
};
use core::time::Duration;
use tokio_util::sync::CancellationToken;

/// Knobs for a single pool run.
///
/// - `workers`: degree of parallelism. Fixed for the lifetime of the run.
/// - `queue_capacity`: how far the job source may run ahead of the workers.
///   `0` means every job is handed directly to a waiting worker.
/// - `result_capacity`: buffer between workers and the consumer. Defaults to
///   the worker count.
/// - `order_preserving`: yield results in submission order instead of
///   completion order, buffering early finishers.
/// - `cancellation`: caller-owned token for cooperative early shutdown.
/// - `deadline`: cancels the run once this much time has passed.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub result_capacity: Option<usize>,
    pub order_preserving: bool,
    pub cancellation: Option<CancellationToken>,
    pub deadline: Option<Duration>,
}

impl PoolConfig {
    /// A config with `workers` workers and a queue as deep as the pool.
    pub const fn new(workers: usize) -> Self {
        Self {
            workers,
            queue_capacity: workers,
            result_capacity: None,
            order_preserving: false,
            cancellation: None,
            deadline: None,
        }
    }

    /// A config sized for `workload` on the current machine.
    pub fn for_workload(workload: Workload) -> Self {
        Self::new(recommended_workers(workload))
    }

    #[must_use]
    pub const fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    #[must_use]
    pub const fn with_result_capacity(mut self, capacity: usize) -> Self {
        self.result_capacity = Some(capacity);
        self
    }

    #[must_use]
    pub const fn with_order_preserving(mut self, enabled: bool) -> Self {
        self.order_preserving = enabled;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    #[must_use]
    pub const fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// The result buffer size this config resolves to.
    pub fn effective_result_capacity(&self) -> usize {
        self.result_capacity.unwrap_or(self.workers)
    }

    /// Checks the config for values the pool cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if there are no workers or the result
    /// buffer has no room.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::InvalidConfig {
                reason: "workers must be greater than 0".to_string(),
            });
        }

        if self.effective_result_capacity() == 0 {
            return Err(Error::InvalidConfig {
                reason: "result_capacity must be greater than 0".to_string(),
            });
        }

        if self.deadline.is_some_and(|d| d.is_zero()) {
            return Err(Error::InvalidConfig {
                reason: "deadline must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::for_workload(Workload::Compute)
    }
}
