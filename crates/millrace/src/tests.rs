use crate::{
    Completion, Error, Failure, JobId, PoolConfig, ResultStream, run_pool, run_pool_stream,
};
use core::{convert::Infallible, time::Duration};
use futures::StreamExt;
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;

async fn sleep_then_echo(ms: u64) -> Result<u64, Infallible> {
    sleep(Duration::from_millis(ms)).await;
    Ok(ms)
}

fn ids<O, E>(results: &[crate::JobResult<O, E>]) -> Vec<u64> {
    results.iter().map(|r| r.id.get()).collect()
}

async fn drain<O, E>(stream: ResultStream<O, E>) -> (Vec<crate::JobResult<O, E>>, Completion) {
    timeout(Duration::from_secs(60), stream.collect_all())
        .await
        .expect("pool run must terminate")
        .expect("coordinator must report")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_job_yields_exactly_one_result() {
    let config = PoolConfig::new(3).with_queue_capacity(5);
    let stream = run_pool(0..50_u64, config, |n: u64| async move {
        tokio::task::yield_now().await;
        Ok::<_, Infallible>(n * 2)
    })
    .unwrap();

    let (results, completion) = drain(stream).await;
    assert_eq!(completion, Completion::Drained);

    let mut seen = ids(&results);
    seen.sort_unstable();
    assert_eq!(seen, (0..50).collect::<Vec<_>>());
    for r in results {
        assert_eq!(r.outcome, Ok(r.id.get() * 2));
        assert!(r.worker < 3);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rendezvous_queue_still_processes_everything() {
    let config = PoolConfig::new(4).with_queue_capacity(0);
    let stream = run_pool(0..32_u64, config, |n: u64| async move {
        Ok::<_, Infallible>(n)
    })
    .unwrap();

    let (results, completion) = drain(stream).await;
    assert_eq!(completion, Completion::Drained);
    assert_eq!(results.len(), 32);
}

#[tokio::test(start_paused = true)]
async fn empty_source_drains_without_results() {
    let stream = run_pool(Vec::<u64>::new(), PoolConfig::new(3), sleep_then_echo).unwrap();

    let (results, completion) = drain(stream).await;
    assert!(results.is_empty());
    assert_eq!(completion, Completion::Drained);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn single_worker_preserves_submission_order() {
    let stream = run_pool(0..20_u64, PoolConfig::new(1), |n: u64| async move {
        Ok::<_, Infallible>(n)
    })
    .unwrap();

    let (results, _) = drain(stream).await;
    assert_eq!(ids(&results), (0..20).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn unordered_results_follow_completion_order() {
    // Job i sleeps (4 - i) * 10ms, so the last job finishes first.
    let delays = (0..4_u64).map(|i| (4 - i) * 10);
    let stream = run_pool(delays, PoolConfig::new(4), sleep_then_echo).unwrap();

    let (results, _) = drain(stream).await;
    assert_eq!(ids(&results), vec![3, 2, 1, 0]);
}

#[tokio::test(start_paused = true)]
async fn order_preserving_run_restores_submission_order() {
    let delays: Vec<u64> = (0..8).map(|i| (8 - i) * 10).collect();
    let config = PoolConfig::new(4).with_order_preserving(true);
    let stream = run_pool(delays.clone(), config, sleep_then_echo).unwrap();
    assert!(stream.is_order_preserving());

    let (results, completion) = drain(stream).await;
    assert_eq!(completion, Completion::Drained);
    assert_eq!(ids(&results), (0..8).collect::<Vec<_>>());

    let outputs: Vec<_> = results.into_iter().filter_map(|r| r.ok()).collect();
    assert_eq!(outputs, delays);
}

#[tokio::test(start_paused = true)]
async fn three_workers_ten_jobs_take_four_rounds() {
    let config = PoolConfig::new(3)
        .with_queue_capacity(10)
        .with_result_capacity(2);
    let start = Instant::now();
    let mut stream = run_pool(vec![100_u64; 10], config, sleep_then_echo).unwrap();

    let mut first_at = None;
    let mut received = 0;
    while let Some(result) = stream.next().await {
        assert!(result.is_success());
        first_at.get_or_insert_with(|| start.elapsed());
        received += 1;
    }
    let total = start.elapsed();

    assert_eq!(received, 10);
    assert_eq!(stream.completion().await, Ok(Completion::Drained));

    // ceil(10 / 3) rounds of 100ms each.
    assert!(total >= Duration::from_millis(400), "took {total:?}");
    assert!(total < Duration::from_millis(450), "took {total:?}");

    // Results stream out while later rounds are still running.
    let first_at = first_at.unwrap();
    assert!(first_at < Duration::from_millis(150), "first at {first_at:?}");
    assert!(first_at < total);
}

#[tokio::test(start_paused = true)]
async fn caller_cancellation_stops_the_run_early() {
    let token = CancellationToken::new();
    let config = PoolConfig::new(2).with_cancellation(token.clone());
    let stream = run_pool(vec![10_u64; 20], config, sleep_then_echo).unwrap();

    let canceller = tokio::spawn(async move {
        sleep(Duration::from_millis(35)).await;
        token.cancel();
    });

    let (results, completion) = drain(stream).await;
    canceller.await.unwrap();

    assert_eq!(completion, Completion::Cancelled);
    assert!(!results.is_empty());
    assert!(results.len() < 20, "got {} results", results.len());

    // No id is reported twice, even when cut short.
    let mut seen = ids(&results);
    seen.sort_unstable();
    seen.dedup();
    assert_eq!(seen.len(), results.len());
}

#[tokio::test(start_paused = true)]
async fn consumer_can_cancel_through_the_stream() {
    let mut stream = run_pool(vec![10_u64; 30], PoolConfig::new(3), sleep_then_echo).unwrap();

    let mut received = 0;
    while let Some(_result) = stream.next().await {
        received += 1;
        if received == 3 {
            stream.cancel();
        }
    }

    assert!(received < 30);
    assert_eq!(stream.completion().await, Ok(Completion::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn deadline_is_reported_as_such() {
    let config = PoolConfig::new(1).with_deadline(Duration::from_millis(35));
    let stream = run_pool(vec![10_u64; 10], config, sleep_then_echo).unwrap();

    let (results, completion) = drain(stream).await;
    assert_eq!(completion, Completion::DeadlineExceeded);
    assert!(results.len() < 10);
}

#[tokio::test(start_paused = true)]
async fn run_end_never_cancels_the_callers_token() {
    let token = CancellationToken::new();
    let config = PoolConfig::new(2)
        .with_cancellation(token.clone())
        .with_deadline(Duration::from_millis(5));
    let stream = run_pool(vec![10_u64; 4], config, sleep_then_echo).unwrap();

    let (_, completion) = drain(stream).await;
    assert_eq!(completion, Completion::DeadlineExceeded);
    assert!(!token.is_cancelled());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failures_and_panics_are_isolated_per_job() {
    let mut stream = run_pool(0..20_u32, PoolConfig::new(3), |n: u32| async move {
        match n % 5 {
            0 => panic!("job {n} exploded"),
            1 => Err(format!("job {n} rejected")),
            _ => Ok(n * 10),
        }
    })
    .unwrap();

    let mut panicked = 0;
    let mut failed = 0;
    let mut succeeded = 0;
    while let Some(result) = stream.next().await {
        match result.outcome {
            Ok(out) => {
                assert_eq!(out, result.id.get() as u32 * 10);
                succeeded += 1;
            }
            Err(Failure::Error(e)) => {
                assert_eq!(e, format!("job {} rejected", result.id.get()));
                failed += 1;
            }
            Err(Failure::Panic(msg)) => {
                assert!(msg.contains("exploded"), "{msg}");
                panicked += 1;
            }
        }
    }

    assert_eq!((succeeded, failed, panicked), (12, 4, 4));
    assert_eq!(stream.completion().await, Ok(Completion::Drained));

    let stats = stream.stats();
    assert_eq!(stats.submitted, 20);
    assert_eq!(stats.succeeded, 12);
    assert_eq!(stats.failed, 4);
    assert_eq!(stats.panicked, 4);
    assert_eq!(stats.workers_exited, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn streams_jobs_from_an_async_source() {
    let source = futures::stream::unfold(0_u64, |n| async move {
        tokio::task::yield_now().await;
        Some((n, n + 1))
    })
    .take(25);

    let config = PoolConfig::new(2).with_order_preserving(true);
    let stream = run_pool_stream(source, config, |n: u64| async move {
        Ok::<_, Infallible>(JobId::new(n))
    })
    .unwrap();

    let (results, completion) = drain(stream).await;
    assert_eq!(completion, Completion::Drained);
    for (i, r) in results.into_iter().enumerate() {
        assert_eq!(r.ok(), Some(JobId::new(i as u64)));
    }
}

#[test]
fn invalid_config_is_rejected_before_spawning() {
    // No runtime here: a rejected config must not reach `tokio::spawn`.
    let err = run_pool(0..3_u8, PoolConfig::new(0), |n: u8| async move {
        Ok::<_, Infallible>(n)
    })
    .unwrap_err();
    assert_eq!(
        err,
        Error::InvalidConfig {
            reason: "workers must be greater than 0".to_string()
        }
    );
}
