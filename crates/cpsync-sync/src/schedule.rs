use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

/// Lets at most one run of a job proceed; overlapping callers return immediately.
#[derive(Debug, Clone, Default)]
pub struct SingleFlight {
    running: Arc<Mutex<()>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `task` unless another run holds the slot, in which case it yields `None`.
    pub async fn run<F>(&self, task: F) -> Option<F::Output>
    where
        F: Future,
    {
        let Ok(_slot) = self.running.try_lock() else {
            warn!("previous sync run still in progress; skipping this tick");
            return None;
        };
        Some(task.await)
    }
}

/// Builds a scheduler that fires `job` on `cron` (six-field, seconds first).
///
/// Ticks that arrive while the previous run is still going are skipped.
pub async fn build_scheduler<F, Fut>(cron: &str, job: F) -> Result<JobScheduler>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let scheduler = JobScheduler::new().await.context("creating scheduler")?;
    let job = Arc::new(job);
    let flight = SingleFlight::new();

    let scheduled = Job::new_async(cron, move |_uuid, _lock| {
        let job = job.clone();
        let flight = flight.clone();
        Box::pin(async move {
            info!("scheduled sync tick");
            flight.run(job()).await;
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;

    scheduler
        .add(scheduled)
        .await
        .context("adding scheduler job")?;
    Ok(scheduler)
}

/// Builds the scheduler only when scheduling is switched on.
pub async fn maybe_build_scheduler<F, Fut>(
    enabled: bool,
    cron: &str,
    job: F,
) -> Result<Option<JobScheduler>>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    if !enabled {
        return Ok(None);
    }
    build_scheduler(cron, job).await.map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn overlapping_run_is_skipped() {
        let flight = SingleFlight::new();
        let (release, wait) = oneshot::channel::<()>();
        let (started_tx, started_rx) = oneshot::channel::<()>();

        let first = {
            let flight = flight.clone();
            tokio::spawn(async move {
                flight
                    .run(async move {
                        started_tx.send(()).ok();
                        wait.await.ok();
                        "first"
                    })
                    .await
            })
        };

        started_rx.await.unwrap();
        assert_eq!(flight.run(async { "second" }).await, None);

        release.send(()).unwrap();
        assert_eq!(first.await.unwrap(), Some("first"));
        assert_eq!(flight.run(async { "third" }).await, Some("third"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn invalid_cron_is_rejected() {
        let err = build_scheduler("every hour", || async {}).await.err().unwrap();
        assert!(err.to_string().contains("every hour"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn hourly_cron_builds() {
        assert!(build_scheduler("0 0 * * * *", || async {}).await.is_ok());
    }

    #[tokio::test]
    async fn disabled_scheduler_is_not_built() {
        let scheduler = maybe_build_scheduler(false, "not a cron", || async {})
            .await
            .unwrap();
        assert!(scheduler.is_none());
    }
}
