use crate::lifecycle::ShutdownSignal;
use async_trait::async_trait;
use serde::Serialize;

/// Result of one health check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub passed: bool,
    pub detail: String,
}

impl ProbeResult {
    pub fn pass(detail: impl Into<String>) -> Self {
        Self {
            passed: true,
            detail: detail.into(),
        }
    }

    pub fn fail(detail: impl Into<String>) -> Self {
        Self {
            passed: false,
            detail: detail.into(),
        }
    }
}

/// A health check a component exposes to an external health-check service.
///
/// The runtime only collects probes; it never evaluates them. A probe is
/// independent of the drain protocol: a component may expose one without
/// being drainable, and the other way round.
#[async_trait]
pub trait HealthProbe: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn check(&self, signal: &ShutdownSignal) -> ProbeResult;
}
