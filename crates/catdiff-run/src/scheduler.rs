//! Bounded-concurrency scheduler
//!
//! Runs a batch of host workers with a fixed admission gate, publishing a
//! coalesced partial summary whenever the finished count changes. With
//! fail-fast enabled the first failing result cancels everything still in
//! flight; workers acknowledge the signal at their next suspension point
//! and come back as cancelled.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use catdiff_core::HostResult;

use crate::aggregator::StateAggregator;
use crate::error::{Result, RunError};
use crate::ports::Reporter;
use crate::worker::HostWorker;

/// Debounce window between partial index publications.
const TICK_COALESCE: Duration = Duration::from_millis(500);

pub struct Scheduler {
    pool_size: usize,
    fail_fast: bool,
}

impl Scheduler {
    pub fn new(pool_size: usize, fail_fast: bool) -> Self {
        Self {
            pool_size: pool_size.max(1),
            fail_fast,
        }
    }

    /// Run all workers and return their results in input order.
    pub async fn run(
        &self,
        workers: Vec<HostWorker>,
        aggregator: Arc<StateAggregator>,
        reporter: Arc<dyn Reporter>,
    ) -> Result<Vec<HostResult>> {
        let hostnames: Vec<String> = workers
            .iter()
            .map(|worker| worker.hostname().to_string())
            .collect();
        let mut results: Vec<Option<HostResult>> = vec![None; workers.len()];

        let semaphore = Arc::new(Semaphore::new(self.pool_size));
        let cancel = CancellationToken::new();
        let (tick_tx, tick_rx) = watch::channel(0usize);
        let ticker = spawn_ticker(tick_rx, aggregator.clone(), reporter.clone());

        let mut tasks = JoinSet::new();
        for (index, worker) in workers.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let cancellation = cancel.clone();
            let hostname = worker.hostname().to_string();
            tasks.spawn(async move {
                let permit = semaphore.acquire_owned().await;
                if permit.is_err() {
                    return (
                        index,
                        Err(RunError::Scheduler {
                            message: "admission gate closed unexpectedly".to_string(),
                        }),
                    );
                }
                // Workers queued behind the gate observe a cancellation
                // raised while they were waiting.
                if cancellation.is_cancelled() {
                    return (index, Ok(HostResult::cancelled(hostname)));
                }
                (index, worker.run(cancellation).await)
            });
        }

        let mut failed_fast = false;
        while let Some(joined) = tasks.join_next().await {
            let (index, outcome) = joined.map_err(|join_error| RunError::Scheduler {
                message: format!("worker task died: {join_error}"),
            })?;
            let result = match outcome {
                Ok(result) => result,
                Err(run_error) => {
                    error!(host = %hostnames[index], error = %run_error, "unexpected error running host");
                    HostResult::unexpected_failure(hostnames[index].clone())
                }
            };

            aggregator.add(&result);
            tick_tx.send_modify(|count| *count += 1);

            if self.fail_fast && !failed_fast && result.outcome().is_failure() {
                warn!(host = %result.hostname, "failing fast: cancelling outstanding workers");
                failed_fast = true;
                cancel.cancel();
            }
            results[index] = Some(result);
        }

        drop(tick_tx);
        ticker.await.ok();

        Ok(results
            .into_iter()
            .enumerate()
            .map(|(index, result)| {
                result.unwrap_or_else(|| HostResult::cancelled(hostnames[index].clone()))
            })
            .collect())
    }
}

/// Publish a partial summary whenever the finished count changes. The watch
/// channel keeps at most one pending tick; the sleep coalesces bursts.
fn spawn_ticker(
    mut tick_rx: watch::Receiver<usize>,
    aggregator: Arc<StateAggregator>,
    reporter: Arc<dyn Reporter>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while tick_rx.changed().await.is_ok() {
            let states = aggregator.snapshot();
            info!("{}", states.summary(true));
            if let Err(render_error) = reporter.render_index(&states, true).await {
                warn!(error = %render_error, "failed to publish partial index");
            }
            tokio::time::sleep(TICK_COALESCE).await;
        }
    })
}
