use super::{
    config::{DemoConfig, Scenario},
    work::{Work, WorkError},
};
use anyhow::bail;
use core::time::Duration;
use futures::StreamExt;
use millrace::{
    Completion, Dequeued, DispatchQueue, Job, JobId, LifecycleCoordinator, PoolStats,
    ResultStream, WorkerSet, batch::Batcher, keyed::KeyedDispatcher, pipeline, run_pool,
};
use std::sync::Arc;
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{Instant, sleep, timeout},
};
use tokio_util::sync::CancellationToken;

/// Runs the configured scenario until it finishes or `token` is cancelled.
pub async fn run(config: &DemoConfig, token: CancellationToken) -> anyhow::Result<()> {
    match config.scenario {
        Scenario::Pool => pool(config, token).await,
        Scenario::Ordered => ordered(config, token).await,
        Scenario::Cancel => cancel(config, token).await,
        Scenario::Deadlock => deadlock(config, token).await,
        Scenario::Pipeline => pipeline_stages(config, token).await,
        Scenario::Batch => batch(config, token).await,
        Scenario::Keyed => keyed(config, token).await,
        Scenario::Handoff => handoff(config, token).await,
    }
}

fn fixed_work(config: &DemoConfig) -> Work {
    Work::Fixed {
        duration: config.job_duration,
        failure_rate: config.failure_rate,
    }
}

fn payloads(config: &DemoConfig) -> core::ops::Range<u64> {
    0..config.jobs as u64
}

/// Logs every result as it arrives and returns how the run ended.
async fn consume(
    mut results: ResultStream<u64, WorkError>,
    start: Instant,
) -> anyhow::Result<(Vec<JobId>, Completion)> {
    let mut order = Vec::new();

    while let Some(result) = results.next().await {
        let at = start.elapsed();
        match &result.outcome {
            Ok(out) => tracing::info!(
                "[{at:>8.1?}] {} on worker {} -> {out}",
                result.id,
                result.worker
            ),
            Err(failure) => tracing::warn!(
                "[{at:>8.1?}] {} on worker {} -> {failure}",
                result.id,
                result.worker
            ),
        }
        order.push(result.id);
    }

    let completion = results.completion().await?;
    tracing::info!("Run {completion}: {}", results.stats());
    Ok((order, completion))
}

async fn pool(config: &DemoConfig, token: CancellationToken) -> anyhow::Result<()> {
    let start = Instant::now();
    let results = run_pool(payloads(config), config.pool_config(token), fixed_work(config))?;
    let (order, _) = consume(results, start).await?;

    let rounds = u32::try_from(config.jobs.div_ceil(config.workers)).unwrap_or(u32::MAX);
    tracing::info!(
        "{} results from {} workers in {:?} (about {rounds} rounds of {:?})",
        order.len(),
        config.workers,
        start.elapsed(),
        config.job_duration,
    );
    Ok(())
}

async fn ordered(config: &DemoConfig, token: CancellationToken) -> anyhow::Result<()> {
    let work = Work::Jittered {
        max: config.job_duration * 2,
        failure_rate: config.failure_rate,
    };
    let pool = config.pool_config(token).with_order_preserving(true);

    let start = Instant::now();
    let (order, completion) = consume(run_pool(payloads(config), pool, work)?, start).await?;

    if completion == Completion::Drained && !order.is_sorted() {
        bail!("results left the pool out of submission order: {order:?}");
    }
    tracing::info!("Released {} results in submission order", order.len());
    Ok(())
}

async fn cancel(config: &DemoConfig, token: CancellationToken) -> anyhow::Result<()> {
    let deadline = config.deadline.unwrap_or(config.job_duration * 5 / 2);
    let pool = config.pool_config(token).with_deadline(deadline);
    tracing::info!("Cancelling after {deadline:?}; press Ctrl+C to cancel sooner");

    let start = Instant::now();
    let results = run_pool(payloads(config), pool, fixed_work(config))?;
    let (order, completion) = consume(results, start).await?;

    tracing::info!(
        "{completion} after {:?}: {} of {} jobs reported",
        start.elapsed(),
        order.len(),
        config.jobs
    );
    Ok(())
}

/// Spawns a producer that fills a fresh dispatch queue with the configured
/// jobs and then closes it.
fn fill_queue(
    config: &DemoConfig,
    token: CancellationToken,
) -> (Arc<DispatchQueue<u64>>, JoinHandle<()>) {
    let queue = Arc::new(DispatchQueue::new(config.queue_capacity));
    let producer = {
        let queue = Arc::clone(&queue);
        let jobs = payloads(config);
        tokio::spawn(async move {
            for n in jobs {
                if queue
                    .enqueue_or_cancel(Job::new(JobId::new(n), n), &token)
                    .await
                    .is_err()
                {
                    break;
                }
            }
            queue.close();
        })
    };
    (queue, producer)
}

async fn deadlock(config: &DemoConfig, token: CancellationToken) -> anyhow::Result<()> {
    let work = Arc::new(Work::Fixed {
        duration: config.job_duration,
        failure_rate: 0.0,
    });
    let jobs = u32::try_from(config.jobs).unwrap_or(u32::MAX);
    let hang_after = config.job_duration.saturating_mul(jobs.saturating_add(1));

    // 1. Waiting for the workers before anyone drains the sink.
    let run = token.child_token();
    let (queue, producer) = fill_queue(config, run.clone());
    let (sink, mut rx) = mpsc::channel(config.result_capacity);
    let workers = WorkerSet::spawn(
        config.workers,
        queue,
        &sink,
        Arc::clone(&work),
        run.clone(),
        Arc::new(PoolStats::new()),
    );
    let (coordinator, _report) = LifecycleCoordinator::new(workers, sink, run.clone());

    tracing::info!(
        "Inline wait: {} jobs, {} workers, result capacity {}",
        config.jobs,
        config.workers,
        config.result_capacity
    );
    match timeout(hang_after, coordinator.wait()).await {
        Ok(completion) => {
            tracing::info!("Inline wait returned ({completion}): the sink held every result")
        }
        Err(_) => tracing::warn!(
            "Inline wait still blocked after {hang_after:?}: every worker is parked on a full \
             sink that nobody drains"
        ),
    }

    run.cancel();
    while rx.recv().await.is_some() {}
    producer.await?;

    // 2. The coordinator on its own task while this task drains.
    let run = token.child_token();
    let (queue, producer) = fill_queue(config, run.clone());
    let (sink, mut rx) = mpsc::channel(config.result_capacity);
    let stats = Arc::new(PoolStats::new());
    let workers = WorkerSet::spawn(
        config.workers,
        queue,
        &sink,
        work,
        run.clone(),
        Arc::clone(&stats),
    );
    let (coordinator, report) = LifecycleCoordinator::new(workers, sink, run);
    coordinator.spawn();

    let start = Instant::now();
    let mut received = 0;
    while rx.recv().await.is_some() {
        received += 1;
    }
    producer.await?;

    let completion = report.await?;
    tracing::info!(
        "Spawned coordinator: {received} results in {:?}, run {completion}: {}",
        start.elapsed(),
        stats.snapshot()
    );
    Ok(())
}

async fn pipeline_stages(config: &DemoConfig, token: CancellationToken) -> anyhow::Result<()> {
    let jobs = config.jobs as u64;
    let duration = config.job_duration;

    // Two generators fanned into one stream: odd and even numbers.
    let odds = pipeline::source((1..=jobs).step_by(2), 0, token.clone());
    let evens = pipeline::source((2..=jobs).step_by(2), 0, token.clone());
    let numbers = pipeline::merge(vec![odds, evens], 0, token.clone());

    let even = pipeline::stage(numbers, 0, token.clone(), |n: u64| {
        if n % 2 == 0 {
            tracing::info!("Filter keeps {n}");
            Some(n)
        } else {
            tracing::debug!("Filter drops {n}");
            None
        }
    });

    let mut squared = pipeline::stage_async(even, 0, token, move |n: u64| async move {
        sleep(duration).await;
        tracing::info!("Squaring {n} -> {}", n * n);
        Some(n * n)
    });

    let start = Instant::now();
    let mut total = 0;
    while let Some(n) = squared.recv().await {
        tracing::info!("[{:>8.1?}] Final result {n}", start.elapsed());
        total += 1;
    }
    tracing::info!("Pipeline produced {total} results in {:?}", start.elapsed());
    Ok(())
}

async fn batch(config: &DemoConfig, token: CancellationToken) -> anyhow::Result<()> {
    let (tx, rx) = mpsc::channel(1);
    let interval = config.job_duration / 2;
    let producer = {
        let token = token.clone();
        let jobs = payloads(config);
        tokio::spawn(async move {
            for n in jobs {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    sent = tx.send(n) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
                sleep(interval).await;
            }
        })
    };

    let batcher = Batcher::new(5, config.job_duration * 3);
    tracing::info!(
        "Batching up to {} items or every {:?}",
        batcher.max_size(),
        batcher.flush_after()
    );

    let start = Instant::now();
    let mut batches = batcher.run(rx, token);
    while let Some(batch) = batches.recv().await {
        tracing::info!("[{:>8.1?}] Processing batch {batch:?}", start.elapsed());
        sleep(config.job_duration).await;
    }
    producer.await?;
    Ok(())
}

async fn keyed(config: &DemoConfig, token: CancellationToken) -> anyhow::Result<()> {
    let (dispatcher, mut results) =
        KeyedDispatcher::with_cancellation(config.queue_capacity, fixed_work(config), token);

    let start = Instant::now();
    let collector = tokio::spawn(async move {
        let mut count = 0_usize;
        while let Some(r) = results.recv().await {
            match r.result.outcome {
                Ok(out) => tracing::info!(
                    "[{:>8.1?}] [{}] {} -> {out}",
                    start.elapsed(),
                    r.key,
                    r.result.id
                ),
                Err(failure) => tracing::warn!(
                    "[{:>8.1?}] [{}] {} -> {failure}",
                    start.elapsed(),
                    r.key,
                    r.result.id
                ),
            }
            count += 1;
        }
        count
    });

    for n in payloads(config) {
        let key = format!("user:{}", n % 3);
        match dispatcher.dispatch(key, n).await {
            Ok(_) => {}
            Err(millrace::Error::Cancelled) => {
                tracing::info!("Cancelled before dispatching payload {n}");
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }
    let lanes = dispatcher.lanes();
    dispatcher.finish().await;

    let count = collector.await?;
    tracing::info!("{count} results over {lanes} lanes in {:?}", start.elapsed());
    Ok(())
}

async fn handoff(config: &DemoConfig, token: CancellationToken) -> anyhow::Result<()> {
    let buffered = config.queue_capacity.max(1);

    for capacity in [0, buffered] {
        let queue = Arc::new(DispatchQueue::new(capacity));
        let consumer = {
            let queue = Arc::clone(&queue);
            let duration = config.job_duration;
            tokio::spawn(async move {
                while let Dequeued::Job(_job) = queue.dequeue().await {
                    sleep(duration).await;
                }
            })
        };

        let start = Instant::now();
        let mut fed = Ok(());
        for n in payloads(config) {
            fed = queue
                .enqueue_or_cancel(Job::new(JobId::new(n), n), &token)
                .await;
            if fed.is_err() {
                break;
            }
        }
        let enqueued = start.elapsed();
        queue.close();
        consumer.await?;

        match fed {
            Ok(()) => {}
            Err(millrace::Error::Cancelled) => {
                tracing::info!("Capacity {capacity}: producer cancelled after {enqueued:?}");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            "Capacity {capacity}: producer done after {enqueued:?}, consumer after {:?}",
            start.elapsed()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo::config::LogFormat;

    fn config(scenario: Scenario) -> DemoConfig {
        DemoConfig {
            scenario,
            workers: 3,
            jobs: 10,
            queue_capacity: 10,
            result_capacity: 2,
            job_duration: Duration::from_millis(100),
            deadline: None,
            failure_rate: 0.0,
            log_format: LogFormat::Pretty,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn every_scenario_finishes() {
        for scenario in [
            Scenario::Pool,
            Scenario::Ordered,
            Scenario::Cancel,
            Scenario::Deadlock,
            Scenario::Pipeline,
            Scenario::Batch,
            Scenario::Keyed,
            Scenario::Handoff,
        ] {
            let result = timeout(
                Duration::from_secs(60),
                run(&config(scenario), CancellationToken::new()),
            )
            .await;
            assert!(
                matches!(result, Ok(Ok(()))),
                "{scenario:?} did not finish: {result:?}"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_producers_end_quietly() {
        let token = CancellationToken::new();
        token.cancel();

        for scenario in [Scenario::Keyed, Scenario::Handoff] {
            let result = timeout(
                Duration::from_secs(60),
                run(&config(scenario), token.clone()),
            )
            .await;
            assert!(
                matches!(result, Ok(Ok(()))),
                "{scenario:?} treated cancellation as a failure: {result:?}"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ordered_with_reversed_work_is_still_in_order() {
        let config = config(Scenario::Ordered);
        let work = Work::Reversed {
            span: config.jobs as u64,
            step: Duration::from_millis(10),
        };
        let pool = config
            .pool_config(CancellationToken::new())
            .with_order_preserving(true);

        let results = run_pool(payloads(&config), pool, work).unwrap();
        let (order, completion) = consume(results, Instant::now()).await.unwrap();
        assert_eq!(completion, Completion::Drained);
        assert_eq!(order, (0..10).map(JobId::new).collect::<Vec<_>>());
    }
}
