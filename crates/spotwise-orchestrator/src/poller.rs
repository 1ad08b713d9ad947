//! Completion polling for asynchronous external jobs
//!
//! Backups and restores run asynchronously in the cluster. The poller asks a
//! [`StatusFetcher`] for the job phase on a fixed tick until one of:
//!
//! ```text
//! Pending ──tick──▶ Pending ──tick──▶ Succeeded   → Ok(phase)
//!                                  └─▶ Failed      → Err(JobFailed)
//! deadline elapsed                                  → Err(TimeoutExceeded)
//! cancellation token fired                          → Err(Cancelled)
//! ```
//!
//! A failed fetch only skips its tick; it never shortens the deadline and
//! is never mistaken for success. A fetch already in flight is awaited to
//! completion before cancellation or the deadline is observed.

use crate::classify::Classifier;
use crate::retry::{RetryEngine, RetryPolicy};
use async_trait::async_trait;
use spotwise_core::{JobPhase, PollStatus, Result, SpotwiseError, StatusFetcher};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default polling interval
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

/// Default time to wait for a job
pub const DEFAULT_WAIT_TIMEOUT_SECS: u64 = 900; // 15 minutes

/// Longest wait the poller honours (30 years); longer timeouts are clamped
pub const MAX_WAIT_TIMEOUT_SECS: u64 = 30 * 365 * 24 * 60 * 60;

/// Shortest tick the poller will use
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// State of one wait, owned by the polling loop
#[derive(Debug)]
struct PollTarget {
    name: String,
    interval: Duration,
    deadline: Instant,
    started: Instant,
    ticks: u32,
}

impl PollTarget {
    fn new(name: &str, interval: Duration, timeout: Duration) -> Self {
        let started = Instant::now();
        Self {
            name: name.to_string(),
            interval: interval.max(MIN_POLL_INTERVAL),
            deadline: started + timeout.min(Duration::from_secs(MAX_WAIT_TIMEOUT_SECS)),
            started,
            ticks: 0,
        }
    }
}

/// Waits for asynchronous jobs to reach a terminal phase
#[derive(Debug, Clone)]
pub struct CompletionPoller {
    interval: Duration,
}

impl Default for CompletionPoller {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionPoller {
    /// Create a poller with the default interval (2 seconds)
    pub fn new() -> Self {
        Self::with_interval(Duration::from_millis(DEFAULT_POLL_INTERVAL_MS))
    }

    /// Create a poller with a custom interval
    pub fn with_interval(interval: Duration) -> Self {
        Self { interval }
    }

    /// Get the polling interval
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait for `name` to finish, giving up after `timeout`
    pub async fn wait_for<F>(&self, name: &str, fetcher: &F, timeout: Duration) -> Result<JobPhase>
    where
        F: StatusFetcher + ?Sized,
    {
        self.wait_for_with_cancel(name, fetcher, timeout, &CancellationToken::new())
            .await
    }

    /// Wait for `name` to finish, giving up after `timeout` or when `cancel` fires
    pub async fn wait_for_with_cancel<F>(
        &self,
        name: &str,
        fetcher: &F,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<JobPhase>
    where
        F: StatusFetcher + ?Sized,
    {
        let mut target = PollTarget::new(name, self.interval, timeout);

        info!(
            job = %target.name,
            interval_ms = target.interval.as_millis() as u64,
            timeout_secs = timeout.as_secs_f64(),
            "Waiting for job to complete"
        );

        let mut ticker = tokio::time::interval(target.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let deadline = tokio::time::sleep_until(target.deadline);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(job = %target.name, ticks = target.ticks, "Wait cancelled");
                    return Err(SpotwiseError::Cancelled(target.name));
                }
                _ = &mut deadline => {
                    error!(
                        job = %target.name,
                        ticks = target.ticks,
                        "Timed out waiting for job"
                    );
                    return Err(SpotwiseError::TimeoutExceeded {
                        name: target.name,
                        timeout,
                    });
                }
                _ = ticker.tick() => {}
            }

            target.ticks += 1;

            let phase = match fetcher.get_status(&target.name).await {
                Ok(phase) => phase,
                Err(e) => {
                    debug!(
                        job = %target.name,
                        tick = target.ticks,
                        error = %e,
                        "Status fetch failed, retrying on next tick"
                    );
                    continue;
                }
            };

            match phase.status() {
                PollStatus::Succeeded => {
                    info!(
                        job = %target.name,
                        phase = %phase,
                        ticks = target.ticks,
                        elapsed_secs = target.started.elapsed().as_secs_f64(),
                        "Job completed"
                    );
                    return Ok(phase);
                }
                PollStatus::Failed => {
                    error!(job = %target.name, phase = %phase, "Job failed");
                    return Err(SpotwiseError::JobFailed {
                        name: target.name,
                        phase: phase.to_string(),
                    });
                }
                PollStatus::Pending => {
                    debug!(
                        job = %target.name,
                        phase = %phase,
                        tick = target.ticks,
                        "Job still running"
                    );
                }
            }
        }
    }
}

/// [`StatusFetcher`] that retries its inner fetcher within a single tick
pub struct RetryingFetcher<F, C> {
    inner: F,
    engine: RetryEngine<C>,
}

impl<F, C> RetryingFetcher<F, C> {
    /// Wrap `inner` with `policy`, classifying its errors with `classifier`
    pub fn new(inner: F, policy: RetryPolicy, classifier: C) -> Self {
        Self {
            inner,
            engine: RetryEngine::new(policy, classifier),
        }
    }
}

#[async_trait]
impl<F, C> StatusFetcher for RetryingFetcher<F, C>
where
    F: StatusFetcher,
    C: Classifier<SpotwiseError>,
{
    async fn get_status(&self, job_name: &str) -> Result<JobPhase> {
        self.engine
            .run("job status", || self.inner.get_status(job_name))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ByErrorKind;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_test::assert_ok;

    /// Replays a fixed script, repeating the last entry when exhausted
    struct ScriptedFetcher {
        script: Mutex<VecDeque<Result<JobPhase>>>,
        last: JobPhase,
        calls: AtomicU32,
    }

    impl ScriptedFetcher {
        fn new(script: Vec<Result<JobPhase>>, last: JobPhase) -> Self {
            Self {
                script: Mutex::new(script.into()),
                last,
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StatusFetcher for ScriptedFetcher {
        async fn get_status(&self, _job_name: &str) -> Result<JobPhase> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.script.lock().unwrap().pop_front() {
                Some(next) => next,
                None => Ok(self.last.clone()),
            }
        }
    }

    fn fast_poller() -> CompletionPoller {
        CompletionPoller::with_interval(Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_succeeds_on_third_tick_and_stops() {
        let fetcher = ScriptedFetcher::new(
            vec![Ok(JobPhase::New), Ok(JobPhase::InProgress), Ok(JobPhase::Completed)],
            JobPhase::Failed,
        );

        let phase = fast_poller()
            .wait_for("backup-1", &fetcher, Duration::from_secs(5))
            .await;

        assert_eq!(assert_ok!(phase), JobPhase::Completed);
        assert_eq!(fetcher.calls(), 3);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test]
    async fn test_unbounded_timeout_still_completes() {
        let fetcher = ScriptedFetcher::new(vec![], JobPhase::Completed);

        let phase = fast_poller()
            .wait_for("backup-forever", &fetcher, Duration::MAX)
            .await;

        assert_eq!(assert_ok!(phase), JobPhase::Completed);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_pending_until_deadline_times_out() {
        let fetcher = ScriptedFetcher::new(vec![], JobPhase::InProgress);

        let result = fast_poller()
            .wait_for("restore-1", &fetcher, Duration::from_millis(40))
            .await;

        match result {
            Err(SpotwiseError::TimeoutExceeded { name, timeout }) => {
                assert_eq!(name, "restore-1");
                assert_eq!(timeout, Duration::from_millis(40));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert!(fetcher.calls() >= 1);
    }

    #[tokio::test]
    async fn test_failed_phase_names_job_and_phase() {
        let fetcher = ScriptedFetcher::new(
            vec![Ok(JobPhase::InProgress)],
            JobPhase::PartiallyFailed,
        );

        let err = fast_poller()
            .wait_for("nightly", &fetcher, Duration::from_secs(5))
            .await
            .unwrap_err();

        match err {
            SpotwiseError::JobFailed { name, phase } => {
                assert_eq!(name, "nightly");
                assert_eq!(phase, "PartiallyFailed");
            }
            other => panic!("expected JobFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_errors_skip_ticks() {
        let fetcher = ScriptedFetcher::new(
            vec![
                Err(SpotwiseError::transient("connection refused")),
                Err(SpotwiseError::fatal("unexpected response")),
                Ok(JobPhase::InProgress),
            ],
            JobPhase::Completed,
        );

        let phase = fast_poller()
            .wait_for("backup-2", &fetcher, Duration::from_secs(5))
            .await;

        assert_eq!(assert_ok!(phase), JobPhase::Completed);
        assert_eq!(fetcher.calls(), 4);
    }

    #[tokio::test]
    async fn test_fetch_errors_never_report_success() {
        let always_failing = RetryingFetcher::new(
            FailingFetcher,
            RetryPolicy::no_retry(),
            ByErrorKind,
        );

        let result = fast_poller()
            .wait_for("backup-3", &always_failing, Duration::from_millis(30))
            .await;
        assert!(matches!(result, Err(SpotwiseError::TimeoutExceeded { .. })));
    }

    struct FailingFetcher;

    #[async_trait]
    impl StatusFetcher for FailingFetcher {
        async fn get_status(&self, _job_name: &str) -> Result<JobPhase> {
            Err(SpotwiseError::transient("etcdserver: leader changed"))
        }
    }

    #[tokio::test]
    async fn test_cancellation_aborts_promptly() {
        let fetcher = ScriptedFetcher::new(vec![], JobPhase::InProgress);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let start = std::time::Instant::now();
        let result = fast_poller()
            .wait_for_with_cancel("restore-2", &fetcher, Duration::from_secs(60), &cancel)
            .await;

        assert!(matches!(result, Err(SpotwiseError::Cancelled(ref name)) if name == "restore-2"));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_retrying_fetcher_absorbs_transient_errors() {
        let inner = ScriptedFetcher::new(
            vec![
                Err(SpotwiseError::transient("timeout")),
                Err(SpotwiseError::transient("timeout")),
            ],
            JobPhase::Completed,
        );
        let fetcher = RetryingFetcher::new(
            inner,
            RetryPolicy::with_max_attempts(3)
                .with_delays(Duration::from_millis(1), Duration::from_millis(5))
                .without_jitter(),
            ByErrorKind,
        );

        let phase = fast_poller()
            .wait_for("backup-4", &fetcher, Duration::from_secs(5))
            .await;

        assert_eq!(assert_ok!(phase), JobPhase::Completed);
        assert_eq!(fetcher.inner.calls(), 3);
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        let target = PollTarget::new("job", Duration::ZERO, Duration::from_secs(1));
        assert_eq!(target.interval, MIN_POLL_INTERVAL);
        assert_eq!(target.ticks, 0);
    }
}
