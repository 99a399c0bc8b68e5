use anyhow::bail;
use clap::{Parser, ValueEnum};
use core::time::Duration;
use millrace::{PoolConfig, Workload, recommended_workers};
use tokio_util::sync::CancellationToken;

/// Wait-to-compute ratio assumed for the simulated jobs, which spend almost
/// all of their time sleeping.
const SIMULATED_WAIT_RATIO: f64 = 9.0;

/// Which demonstration to run.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Unordered fan-out/fan-in with wall-clock timing.
    Pool,
    /// Order-preserving run over jobs with random durations.
    Ordered,
    /// Cancellation mid-run, by Ctrl+C or deadline.
    Cancel,
    /// The inline-wait deadlock under a timeout, then the correct pattern.
    Deadlock,
    /// Generate, filter, square.
    Pipeline,
    /// Size-or-timeout batching.
    Batch,
    /// Per-key sequential lanes.
    Keyed,
    /// Direct handoff (capacity 0) against a buffered queue.
    Handoff,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Command line of the `millrace-demo` binary.
///
/// Every option can also be set through the environment (or a `.env` file),
/// which makes it easy to replay a scenario with the same knobs.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "millrace-demo",
    version,
    about = "Runnable scenarios for the millrace bounded worker pool"
)]
pub struct CliArgs {
    /// Scenario to run.
    ///
    /// Environment variable: `MILLRACE_SCENARIO`
    #[arg(value_enum, env = "MILLRACE_SCENARIO", default_value_t = Scenario::Pool)]
    pub scenario: Scenario,

    /// Number of workers in the pool.
    ///
    /// Defaults to the recommendation for I/O bound work on this machine,
    /// since every simulated job mostly sleeps.
    ///
    /// Environment variable: `MILLRACE_WORKERS`
    #[arg(long, env = "MILLRACE_WORKERS")]
    pub workers: Option<usize>,

    /// Number of jobs submitted.
    ///
    /// Environment variable: `MILLRACE_JOBS`
    #[arg(long, env = "MILLRACE_JOBS", default_value_t = 10)]
    pub jobs: usize,

    /// Capacity of the dispatch queue. `0` hands every job directly to a
    /// waiting worker.
    ///
    /// Environment variable: `MILLRACE_QUEUE_CAPACITY`
    #[arg(long, env = "MILLRACE_QUEUE_CAPACITY", default_value_t = 10)]
    pub queue_capacity: usize,

    /// Capacity of the result sink between workers and the consumer.
    ///
    /// Kept small on purpose: it is what makes the inline-wait hazard of the
    /// `deadlock` scenario bite.
    ///
    /// Environment variable: `MILLRACE_RESULT_CAPACITY`
    #[arg(long, env = "MILLRACE_RESULT_CAPACITY", default_value_t = 2)]
    pub result_capacity: usize,

    /// Simulated duration of one job, in milliseconds.
    ///
    /// Environment variable: `MILLRACE_JOB_MILLIS`
    #[arg(long, env = "MILLRACE_JOB_MILLIS", default_value_t = 100)]
    pub job_millis: u64,

    /// Cancels the run after this many milliseconds.
    ///
    /// Environment variable: `MILLRACE_DEADLINE_MILLIS`
    #[arg(long, env = "MILLRACE_DEADLINE_MILLIS")]
    pub deadline_millis: Option<u64>,

    /// Probability in `0.0..=1.0` that a job fails with an injected error.
    ///
    /// Environment variable: `MILLRACE_FAILURE_RATE`
    #[arg(long, env = "MILLRACE_FAILURE_RATE", default_value_t = 0.0)]
    pub failure_rate: f64,

    /// Log output format.
    ///
    /// Environment variable: `MILLRACE_LOG_FORMAT`
    #[arg(long, value_enum, env = "MILLRACE_LOG_FORMAT", default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone)]
pub struct DemoConfig {
    pub scenario: Scenario,
    pub workers: usize,
    pub jobs: usize,
    pub queue_capacity: usize,
    pub result_capacity: usize,
    pub job_duration: Duration,
    pub deadline: Option<Duration>,
    pub failure_rate: f64,
    pub log_format: LogFormat,
}

impl DemoConfig {
    /// Pool settings for this demo run, cancelled by `token`.
    pub fn pool_config(&self, token: CancellationToken) -> PoolConfig {
        let config = PoolConfig::new(self.workers)
            .with_queue_capacity(self.queue_capacity)
            .with_result_capacity(self.result_capacity)
            .with_cancellation(token);

        match self.deadline {
            Some(deadline) => config.with_deadline(deadline),
            None => config,
        }
    }
}

impl TryFrom<CliArgs> for DemoConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let workers = args.workers.unwrap_or_else(|| {
            recommended_workers(Workload::Io {
                wait_ratio: SIMULATED_WAIT_RATIO,
            })
        });

        if workers == 0 {
            bail!("MILLRACE_WORKERS must be greater than 0");
        }

        if args.jobs == 0 {
            bail!("MILLRACE_JOBS must be greater than 0");
        }

        if args.result_capacity == 0 {
            bail!("MILLRACE_RESULT_CAPACITY must be greater than 0");
        }

        if !(0.0..=1.0).contains(&args.failure_rate) {
            bail!(
                "MILLRACE_FAILURE_RATE ({}) must be within 0.0..=1.0",
                args.failure_rate
            );
        }

        if args.deadline_millis == Some(0) {
            bail!("MILLRACE_DEADLINE_MILLIS must be greater than 0");
        }

        Ok(Self {
            scenario: args.scenario,
            workers,
            jobs: args.jobs,
            queue_capacity: args.queue_capacity,
            result_capacity: args.result_capacity,
            job_duration: Duration::from_millis(args.job_millis),
            deadline: args.deadline_millis.map(Duration::from_millis),
            failure_rate: args.failure_rate,
            log_format: args.log_format,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<DemoConfig> {
        let argv = core::iter::once("millrace-demo").chain(args.iter().copied());
        let args = CliArgs::try_parse_from(argv)?;
        DemoConfig::try_from(args)
    }

    #[test]
    fn defaults_describe_the_basic_pool() {
        let config = parse(&["--workers", "3"]).unwrap();
        assert_eq!(config.scenario, Scenario::Pool);
        assert_eq!(config.workers, 3);
        assert_eq!(config.jobs, 10);
        assert_eq!(config.queue_capacity, 10);
        assert_eq!(config.result_capacity, 2);
        assert_eq!(config.job_duration, Duration::from_millis(100));
        assert_eq!(config.deadline, None);
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn scenario_is_positional() {
        let config = parse(&["deadlock", "--workers", "3", "--log-format", "json"]).unwrap();
        assert_eq!(config.scenario, Scenario::Deadlock);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn workers_default_to_the_io_recommendation() {
        let config = parse(&[]).unwrap();
        assert!(config.workers >= recommended_workers(Workload::Compute));
    }

    #[test]
    fn rejects_values_the_pool_cannot_run_with() {
        assert!(parse(&["--workers", "0"]).is_err());
        assert!(parse(&["--workers", "2", "--jobs", "0"]).is_err());
        assert!(parse(&["--workers", "2", "--result-capacity", "0"]).is_err());
        assert!(parse(&["--workers", "2", "--failure-rate", "1.5"]).is_err());
        assert!(parse(&["--workers", "2", "--deadline-millis", "0"]).is_err());
    }

    #[test]
    fn pool_config_carries_the_knobs() {
        let config = parse(&[
            "--workers",
            "2",
            "--queue-capacity",
            "0",
            "--deadline-millis",
            "250",
        ])
        .unwrap();
        let pool = config.pool_config(CancellationToken::new());
        assert_eq!(pool.workers, 2);
        assert_eq!(pool.queue_capacity, 0);
        assert_eq!(pool.effective_result_capacity(), 2);
        assert_eq!(pool.deadline, Some(Duration::from_millis(250)));
        assert_eq!(pool.validate(), Ok(()));
    }
}
