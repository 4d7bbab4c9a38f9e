use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::{InvalidConfigurationError, PollInterval};

/// Work the [`Scheduler`] repeats on every tick.
pub trait Job: Send + Sync + 'static {
    /// One complete pass. Implementations should check `cancel` between
    /// units of work and return early once it fires.
    fn run(&self, cancel: &CancellationToken) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Runs a [`Job`] on a fixed cadence until cancelled.
///
/// Runs never overlap: the next tick is awaited only after the current run
/// has finished, and ticks missed while a run was in flight are skipped
/// rather than queued.
pub struct Scheduler<J> {
    job: Arc<J>,
    period: Duration,
}

impl<J: Job> Scheduler<J> {
    pub fn new(job: J, interval: PollInterval) -> Result<Self, InvalidConfigurationError> {
        Ok(Self {
            job: Arc::new(job),
            period: interval.duration()?,
        })
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Loop until `cancel` fires. The first run starts immediately.
    ///
    /// Each run executes in its own task so that an error or a panic is
    /// reported here and the schedule carries on.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(period_secs = self.period.as_secs(), "Scheduler started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("Scheduler cancelled");
                    break;
                }
                _ = ticker.tick() => {}
            }

            let job = Arc::clone(&self.job);
            let token = cancel.clone();
            let handle = tokio::spawn(async move { job.run(&token).await });

            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(error = %format!("{:#}", e), "Scheduled run failed");
                }
                Err(e) if e.is_panic() => {
                    tracing::error!(error = %e, "Scheduled run panicked");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Scheduled run aborted");
                }
            }
        }
    }
}
