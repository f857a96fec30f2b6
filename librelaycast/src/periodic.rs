//! Cancellable fixed-rate task runner
//!
//! A [`PeriodicTask`] fires a [`Job`] every `period`, starting one period
//! after [`PeriodicTask::start`]. Each run is spawned, so a slow run never
//! delays the timer; jobs that must not overlap guard themselves.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use librelaycast::periodic::{Job, PeriodicTask};
//!
//! struct Heartbeat;
//!
//! #[async_trait::async_trait]
//! impl Job for Heartbeat {
//!     fn name(&self) -> &'static str {
//!         "heartbeat"
//!     }
//!
//!     async fn run(&self) {
//!         tracing::info!("still alive");
//!     }
//! }
//!
//! # async fn example() -> librelaycast::Result<()> {
//! let task = PeriodicTask::start(Arc::new(Heartbeat), Duration::from_secs(30))?;
//! // ...
//! task.stop();
//! task.join().await;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::error::{RelaycastError, Result};

/// Work fired on every tick of a [`PeriodicTask`]
#[async_trait]
pub trait Job: Send + Sync + 'static {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    async fn run(&self);
}

pub struct PeriodicTask {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    timer: JoinHandle<JoinSet<()>>,
}

impl PeriodicTask {
    /// Start firing `job` every `period` on the current runtime
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a zero period.
    pub fn start(job: Arc<dyn Job>, period: Duration) -> Result<Self> {
        if period.is_zero() {
            return Err(RelaycastError::InvalidInput(format!(
                "period of '{}' must be greater than zero",
                job.name()
            )));
        }

        let name = job.name();
        let (shutdown, mut stop_rx) = watch::channel(false);

        let timer = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut running = JoinSet::new();

            info!(job = name, period = ?period, "periodic task started");

            loop {
                tokio::select! {
                    biased;

                    changed = stop_rx.changed() => {
                        // A dropped sender also stops the timer
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        reap(name, &mut running);
                        let job = Arc::clone(&job);
                        running.spawn(async move { job.run().await });
                        debug!(job = name, in_flight = running.len(), "tick fired");
                    }
                }
            }

            info!(job = name, in_flight = running.len(), "periodic task stopped");
            running
        });

        Ok(Self {
            name,
            shutdown,
            timer,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stop the timer; runs already in flight keep going
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    /// Wait for the timer to exit and every in-flight run to finish
    ///
    /// Call [`stop`](Self::stop) first, otherwise this waits forever.
    pub async fn join(self) {
        let name = self.name;
        let mut running = match self.timer.await {
            Ok(running) => running,
            Err(e) => {
                error!(job = name, error = %e, "periodic timer crashed");
                return;
            }
        };

        while let Some(result) = running.join_next().await {
            if let Err(e) = result {
                error!(job = name, error = %e, "periodic run failed");
            }
        }
    }

    /// Stop, then wait at most `grace` for in-flight runs
    ///
    /// Returns `false` when the grace period ran out; remaining runs are
    /// aborted.
    pub async fn shutdown(self, grace: Duration) -> bool {
        self.stop();
        let name = self.name;
        match tokio::time::timeout(grace, self.join()).await {
            Ok(()) => true,
            Err(_) => {
                info!(job = name, grace = ?grace, "in-flight runs aborted after grace period");
                false
            }
        }
    }
}

fn reap(name: &'static str, running: &mut JoinSet<()>) {
    while let Some(result) = running.try_join_next() {
        if let Err(e) = result {
            error!(job = name, error = %e, "periodic run failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    #[derive(Default)]
    struct CountingJob {
        started: AtomicUsize,
        finished: AtomicUsize,
        work: Duration,
    }

    impl CountingJob {
        fn taking(work: Duration) -> Arc<Self> {
            Arc::new(Self {
                work,
                ..Self::default()
            })
        }
    }

    #[async_trait]
    impl Job for CountingJob {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn run(&self) {
            self.started.fetch_add(1, Ordering::SeqCst);
            if !self.work.is_zero() {
                sleep(self.work).await;
            }
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_per_period() {
        let job = CountingJob::taking(Duration::ZERO);
        let task = PeriodicTask::start(job.clone(), Duration::from_secs(1)).unwrap();

        sleep(Duration::from_millis(3500)).await;
        assert_eq!(job.finished.load(Ordering::SeqCst), 3);

        task.stop();
        task.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_waits_one_period() {
        let job = CountingJob::taking(Duration::ZERO);
        let task = PeriodicTask::start(job.clone(), Duration::from_secs(10)).unwrap();

        sleep(Duration::from_secs(9)).await;
        assert_eq!(job.started.load(Ordering::SeqCst), 0);

        task.stop();
        task.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_timer() {
        let job = CountingJob::taking(Duration::ZERO);
        let task = PeriodicTask::start(job.clone(), Duration::from_secs(1)).unwrap();

        sleep(Duration::from_millis(1500)).await;
        task.stop();
        sleep(Duration::from_secs(5)).await;

        assert_eq!(job.started.load(Ordering::SeqCst), 1);
        task.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_run_does_not_delay_timer() {
        let job = CountingJob::taking(Duration::from_millis(2500));
        let task = PeriodicTask::start(job.clone(), Duration::from_secs(1)).unwrap();

        sleep(Duration::from_millis(3200)).await;
        assert_eq!(job.started.load(Ordering::SeqCst), 3);
        assert_eq!(job.finished.load(Ordering::SeqCst), 0);

        task.stop();
        task.join().await;
        assert_eq!(job.finished.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_grace_expires() {
        let job = CountingJob::taking(Duration::from_secs(60));
        let task = PeriodicTask::start(job.clone(), Duration::from_secs(1)).unwrap();

        sleep(Duration::from_millis(1100)).await;
        assert!(!task.shutdown(Duration::from_secs(5)).await);
        assert_eq!(job.finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_in_flight_run() {
        let job = CountingJob::taking(Duration::from_secs(2));
        let task = PeriodicTask::start(job.clone(), Duration::from_secs(1)).unwrap();

        sleep(Duration::from_millis(1100)).await;
        assert!(task.shutdown(Duration::from_secs(5)).await);
        assert_eq!(job.finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_period_rejected() {
        let job = CountingJob::taking(Duration::ZERO);
        let result = PeriodicTask::start(job, Duration::ZERO);
        assert!(matches!(result, Err(RelaycastError::InvalidInput(_))));
    }
}
