//! Resource Drain Protocol
//!
//! Bounded wait that lets a pooled or connection-oriented resource finish its
//! in-flight work before it is closed.
//!
//! ```text
//! Draining ──acquired == 0──→ IdleDetected ──close()──→ Closed
//!    │
//!    └──deadline passed────→ TimedOut ──warn + close()──→ Closed
//! ```

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

/// Snapshot of a resource's connections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStat {
    pub total: usize,
    pub idle: usize,
    pub acquired: usize,
}

impl PoolStat {
    pub fn new(total: usize, idle: usize, acquired: usize) -> Self {
        Self {
            total,
            idle,
            acquired,
        }
    }
}

/// Anything that owns pooled connections and can be drained.
#[async_trait]
pub trait DrainableResource: Send + Sync {
    fn stat(&self) -> PoolStat;

    /// Release the resource. Called exactly once by [`drain`].
    async fn close(&self);
}

/// Bounds of one drain run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainConfig {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl DrainConfig {
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// 10s, the reference bound for transports.
    pub fn transport() -> Self {
        Self::new(Duration::from_secs(10))
    }

    /// 5s, the reference bound for storage pools.
    pub fn storage() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum DrainOutcome {
    /// Every connection was returned before the deadline.
    Idle,
    /// The deadline passed with `remaining` connections still acquired.
    TimedOut { remaining: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub outcome: DrainOutcome,
    pub initial: PoolStat,
    pub last: PoolStat,
    pub elapsed: Duration,
}

impl DrainReport {
    pub fn timed_out(&self) -> bool {
        matches!(self.outcome, DrainOutcome::TimedOut { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrainState {
    Draining,
    IdleDetected,
    TimedOut { remaining: usize },
    Closed,
}

/// Drain `resource`, then close it.
///
/// Polls [`DrainableResource::stat`] every `poll_interval` and stops waiting
/// as soon as nothing is acquired. If the deadline comes first a warning
/// with the remaining count is logged. `close()` is called exactly once in
/// both cases, and the wait never exceeds `timeout`.
pub async fn drain<R>(resource: &R, name: &str, config: &DrainConfig) -> DrainReport
where
    R: DrainableResource + ?Sized,
{
    let started = Instant::now();
    let deadline = started + config.timeout;
    let initial = resource.stat();
    tracing::info!(
        resource = name,
        total = initial.total,
        idle = initial.idle,
        acquired = initial.acquired,
        timeout_ms = config.timeout.as_millis() as u64,
        "Draining"
    );

    let mut state = DrainState::Draining;
    let mut outcome = DrainOutcome::Idle;
    loop {
        state = match state {
            DrainState::Draining => {
                let stat = resource.stat();
                if stat.acquired == 0 {
                    DrainState::IdleDetected
                } else if Instant::now() >= deadline {
                    DrainState::TimedOut {
                        remaining: stat.acquired,
                    }
                } else {
                    let next_poll = (Instant::now() + config.poll_interval).min(deadline);
                    tracing::trace!(resource = name, acquired = stat.acquired, "Still draining");
                    tokio::time::sleep_until(next_poll).await;
                    DrainState::Draining
                }
            }
            DrainState::IdleDetected => {
                tracing::debug!(resource = name, "All connections returned");
                resource.close().await;
                DrainState::Closed
            }
            DrainState::TimedOut { remaining } => {
                tracing::warn!(
                    resource = name,
                    remaining,
                    timeout_ms = config.timeout.as_millis() as u64,
                    "Drain timed out, closing with connections still in use"
                );
                metrics::counter!("keelson_drain_timeouts_total", "resource" => name.to_string())
                    .increment(1);
                outcome = DrainOutcome::TimedOut { remaining };
                resource.close().await;
                DrainState::Closed
            }
            DrainState::Closed => break,
        };
    }

    let last = resource.stat();
    let elapsed = started.elapsed();
    metrics::histogram!("keelson_drain_seconds", "resource" => name.to_string())
        .record(elapsed.as_secs_f64());
    tracing::info!(
        resource = name,
        total = last.total,
        idle = last.idle,
        acquired = last.acquired,
        elapsed_ms = elapsed.as_millis() as u64,
        "Closed"
    );

    DrainReport {
        outcome,
        initial,
        last,
        elapsed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakePool {
        acquired: AtomicUsize,
        closes: AtomicUsize,
    }

    impl FakePool {
        fn busy(acquired: usize) -> Arc<Self> {
            let pool = Self::default();
            pool.acquired.store(acquired, Ordering::SeqCst);
            Arc::new(pool)
        }
    }

    #[async_trait]
    impl DrainableResource for FakePool {
        fn stat(&self) -> PoolStat {
            let acquired = self.acquired.load(Ordering::SeqCst);
            PoolStat::new(4, 4 - acquired.min(4), acquired)
        }

        async fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn idle_resource_closes_immediately() {
        let pool = FakePool::busy(0);
        let report = drain(pool.as_ref(), "idle", &DrainConfig::storage()).await;

        assert_eq!(report.outcome, DrainOutcome::Idle);
        assert!(report.elapsed < DrainConfig::DEFAULT_POLL_INTERVAL);
        assert_eq!(pool.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn busy_resource_closes_at_the_deadline() {
        let pool = FakePool::busy(3);
        let config = DrainConfig::new(Duration::from_secs(5));
        let report = drain(pool.as_ref(), "stuck", &config).await;

        assert_eq!(report.outcome, DrainOutcome::TimedOut { remaining: 3 });
        assert_eq!(report.elapsed, Duration::from_secs(5));
        assert_eq!(report.initial.acquired, 3);
        assert_eq!(pool.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_stops_waiting_once_connections_return() {
        let pool = FakePool::busy(2);
        let returning = Arc::clone(&pool);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            returning.acquired.store(0, Ordering::SeqCst);
        });

        let report = drain(pool.as_ref(), "transport", &DrainConfig::transport()).await;
        assert_eq!(report.outcome, DrainOutcome::Idle);
        assert!(report.elapsed >= Duration::from_secs(2));
        assert!(report.elapsed <= Duration::from_secs(2) + DrainConfig::DEFAULT_POLL_INTERVAL);
        assert_eq!(report.last.acquired, 0);
        assert_eq!(pool.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_interval_longer_than_timeout_still_honours_the_deadline() {
        let pool = FakePool::busy(1);
        let config = DrainConfig::new(Duration::from_millis(250))
            .with_poll_interval(Duration::from_secs(1));
        let report = drain(pool.as_ref(), "coarse", &config).await;

        assert!(report.timed_out());
        assert_eq!(report.elapsed, Duration::from_millis(250));
    }
}
