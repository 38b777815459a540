//! Idle route eviction task
//!
//! Dynamic routes keep a backend connection pool alive. When an idle
//! timeout is configured, this task periodically drops routes that have
//! not served a request within it; the next request re-resolves.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::dynamic::DynamicProxyRegistry;

/// Upper bound on the interval between eviction passes.
const MAX_EVICTION_INTERVAL: Duration = Duration::from_secs(60);

/// Interval between passes for a given idle timeout
pub fn eviction_interval(max_idle: Duration) -> Duration {
    (max_idle / 2).clamp(Duration::from_secs(1), MAX_EVICTION_INTERVAL)
}

/// Run the eviction task until `cancel` fires.
pub async fn run_route_eviction(
    registry: Arc<DynamicProxyRegistry>,
    max_idle: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(eviction_interval(max_idle));

    tracing::info!(
        "Starting route eviction task (idle timeout: {:?}, check interval: {:?})",
        max_idle,
        eviction_interval(max_idle)
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let evicted = registry.evict_idle(max_idle);
                if !evicted.is_empty() {
                    tracing::info!("Evicted {} idle routes", evicted.len());
                }
            }
            _ = cancel.cancelled() => {
                tracing::info!("Route eviction task shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eviction_interval_bounds() {
        assert_eq!(eviction_interval(Duration::from_millis(10)), Duration::from_secs(1));
        assert_eq!(eviction_interval(Duration::from_secs(30)), Duration::from_secs(15));
        assert_eq!(eviction_interval(Duration::from_secs(3600)), MAX_EVICTION_INTERVAL);
    }
}
