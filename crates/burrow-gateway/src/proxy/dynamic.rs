//! Dynamic proxy registry
//!
//! Caches one reverse proxy per routing key. Unknown keys are resolved
//! through the job service on first use.
//!
//! # Single-flight
//!
//! Each key owns a `tokio::sync::OnceCell`. The first caller for an unseen
//! key runs the resolution; concurrent callers for the same key wait on the
//! cell and receive the same route. Only one resolution per key is ever in
//! flight.
//!
//! A failed resolution leaves the cell empty, so the key is reported as
//! absent and the next request retries. Empty cells nobody is waiting on are
//! dropped from the map as soon as their last caller returns or is
//! cancelled.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::OnceCell;

use burrow_core::error::ResolutionError;
use burrow_core::traits::JobResolver;
use burrow_core::RoutingKey;

use super::reverse::{parse_target, ReverseProxy, TargetError};

/// Get current time in milliseconds since UNIX epoch.
fn current_time_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A resolved route to one job service
#[derive(Debug)]
pub struct DynamicRoute {
    /// Key this route was resolved for
    pub key: RoutingKey,
    /// Forwarding handler bound to the backend
    pub handler: ReverseProxy,
    /// Backend target as returned by the job service
    pub target: String,
    /// Kind of proxy requested by the job service
    pub proxy_type: String,
    /// When the route was resolved
    pub created_at: Instant,
    /// Last use in milliseconds since UNIX epoch
    last_used: AtomicU64,
}

impl DynamicRoute {
    /// Owning user
    pub fn user_id(&self) -> i64 {
        self.key.user_id
    }

    /// Owning job
    pub fn job_id(&self) -> i64 {
        self.key.job_id
    }

    /// Service prefix
    pub fn service_prefix(&self) -> &str {
        &self.key.service
    }

    /// Mark the route as used now
    pub fn touch(&self) {
        self.last_used.store(current_time_millis(), Ordering::Relaxed);
    }

    /// Time since the route was last used
    pub fn idle_for(&self) -> Duration {
        let last = self.last_used.load(Ordering::Relaxed);
        Duration::from_millis(current_time_millis().saturating_sub(last))
    }
}

type RouteCell = Arc<OnceCell<Arc<DynamicRoute>>>;

/// A caller's hold on a cell; dropping it, on any path, removes the cell if
/// it is still empty and nobody else holds it.
struct PendingCell<'a> {
    routes: &'a DashMap<RoutingKey, RouteCell>,
    key: &'a RoutingKey,
    cell: RouteCell,
}

impl Drop for PendingCell<'_> {
    fn drop(&mut self) {
        // Map entry plus this guard
        self.routes.remove_if(self.key, |_, c| {
            Arc::ptr_eq(c, &self.cell) && !c.initialized() && Arc::strong_count(c) == 2
        });
    }
}

/// Concurrency-safe cache of dynamic routes
pub struct DynamicProxyRegistry {
    routes: DashMap<RoutingKey, RouteCell>,
    resolver: Arc<dyn JobResolver>,
}

impl DynamicProxyRegistry {
    /// Create an empty registry that resolves through `resolver`
    pub fn new(resolver: Arc<dyn JobResolver>) -> Self {
        Self {
            routes: DashMap::new(),
            resolver,
        }
    }

    /// Get the route for `key`, resolving it if this is the first request.
    pub async fn resolve(&self, key: &RoutingKey) -> Result<Arc<DynamicRoute>, ResolutionError> {
        if let Some(route) = self.get(key) {
            route.touch();
            return Ok(route);
        }

        let pending = PendingCell {
            routes: &self.routes,
            key,
            cell: Arc::clone(self.routes.entry(key.clone()).or_default().value()),
        };
        let result = pending
            .cell
            .get_or_try_init(|| self.build_route(key))
            .await
            .map(Arc::clone);
        drop(pending);

        match result {
            Ok(route) => {
                route.touch();
                Ok(route)
            }
            Err(e) => {
                tracing::warn!("Failed to resolve route {}: {}", key, e);
                Err(e)
            }
        }
    }

    async fn build_route(&self, key: &RoutingKey) -> Result<Arc<DynamicRoute>, ResolutionError> {
        tracing::debug!("Resolving route {}", key);
        let resolved = self.resolver.resolve(key).await?;

        if resolved.target.trim().is_empty() {
            return Err(ResolutionError::EmptyTarget(key.to_string()));
        }

        let invalid = |e: TargetError| ResolutionError::InvalidTarget {
            target: resolved.target.clone(),
            reason: e.to_string(),
        };
        let url = parse_target(&resolved.target).map_err(invalid)?;
        let handler = ReverseProxy::new(url).map_err(invalid)?;

        tracing::info!(
            "Resolved route {} -> {} ({})",
            key,
            resolved.target,
            resolved.proxy_type
        );

        Ok(Arc::new(DynamicRoute {
            key: key.clone(),
            handler,
            target: resolved.target,
            proxy_type: resolved.proxy_type,
            created_at: Instant::now(),
            last_used: AtomicU64::new(current_time_millis()),
        }))
    }

    /// Get a cached route without resolving
    pub fn get(&self, key: &RoutingKey) -> Option<Arc<DynamicRoute>> {
        self.routes.get(key).and_then(|cell| cell.get().cloned())
    }

    /// Whether `key` has a cached route
    pub fn contains(&self, key: &RoutingKey) -> bool {
        self.get(key).is_some()
    }

    /// Remove a cached route
    pub fn remove(&self, key: &RoutingKey) -> Option<Arc<DynamicRoute>> {
        self.routes
            .remove_if(key, |_, cell| cell.initialized())
            .and_then(|(_, cell)| cell.get().cloned())
    }

    /// Remove every route idle for at least `max_idle`; returns the evicted keys.
    ///
    /// Empty cells no caller holds are swept as well.
    pub fn evict_idle(&self, max_idle: Duration) -> Vec<RoutingKey> {
        self.routes
            .retain(|_, cell| cell.initialized() || Arc::strong_count(cell) > 1);

        let stale: Vec<RoutingKey> = self
            .routes
            .iter()
            .filter_map(|entry| {
                let route = entry.value().get()?;
                (route.idle_for() >= max_idle).then(|| entry.key().clone())
            })
            .collect();

        let mut evicted = Vec::with_capacity(stale.len());
        for key in stale {
            let removed = self.routes.remove_if(&key, |_, cell| {
                cell.get().map_or(false, |route| route.idle_for() >= max_idle)
            });
            if removed.is_some() {
                tracing::info!("Evicted idle route {}", key);
                evicted.push(key);
            }
        }
        evicted
    }

    /// Snapshot of all cached routes
    pub fn list(&self) -> Vec<Arc<DynamicRoute>> {
        self.routes
            .iter()
            .filter_map(|entry| entry.value().get().cloned())
            .collect()
    }

    /// Number of cached routes
    pub fn len(&self) -> usize {
        self.routes
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    /// Check if no routes are cached
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use burrow_core::traits::ResolvedTarget;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    /// Resolver that counts calls, can be told to fail, and is slow enough
    /// for concurrent callers to pile up.
    struct CountingResolver {
        calls: AtomicUsize,
        fail: AtomicBool,
        target: String,
    }

    impl CountingResolver {
        fn new(target: &str) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                target: target.to_string(),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl JobResolver for CountingResolver {
        async fn resolve(&self, key: &RoutingKey) -> Result<ResolvedTarget, ResolutionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(ResolutionError::Rpc(format!("job {} unavailable", key.job_id)));
            }
            Ok(ResolvedTarget {
                target: self.target.clone(),
                proxy_type: "http".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_concurrent_first_access_resolves_once() {
        let resolver = CountingResolver::new("http://10.0.0.7:8888");
        let registry = Arc::new(DynamicProxyRegistry::new(resolver.clone()));
        let key = RoutingKey::new("jupyter", 1, 42);

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let registry = Arc::clone(&registry);
            let key = key.clone();
            tasks.push(tokio::spawn(async move { registry.resolve(&key).await }));
        }

        let mut routes = Vec::new();
        for task in tasks {
            routes.push(task.await.unwrap().unwrap());
        }

        assert_eq!(resolver.calls(), 1);
        assert_eq!(registry.len(), 1);
        for route in &routes {
            assert!(Arc::ptr_eq(route, &routes[0]));
            assert_eq!(route.handler.target().as_str(), "http://10.0.0.7:8888/");
        }
    }

    #[tokio::test]
    async fn test_cached_route_skips_resolver() {
        let resolver = CountingResolver::new("http://10.0.0.7:8888");
        let registry = DynamicProxyRegistry::new(resolver.clone());
        let key = RoutingKey::new("tb", 2, 7);

        let first = registry.resolve(&key).await.unwrap();
        let second = registry.resolve(&key).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(resolver.calls(), 1);
        assert_eq!(first.user_id(), 2);
        assert_eq!(first.job_id(), 7);
        assert_eq!(first.service_prefix(), "tb");
        assert_eq!(first.proxy_type, "http");
    }

    #[tokio::test]
    async fn test_failure_does_not_poison_cache() {
        let resolver = CountingResolver::new("http://10.0.0.7:8888");
        resolver.fail.store(true, Ordering::SeqCst);
        let registry = DynamicProxyRegistry::new(resolver.clone());
        let key = RoutingKey::new("jupyter", 3, 9);

        assert!(registry.resolve(&key).await.is_err());
        assert!(!registry.contains(&key));
        assert!(registry.is_empty());

        resolver.fail.store(false, Ordering::SeqCst);
        let route = registry.resolve(&key).await.unwrap();
        assert_eq!(route.target, "http://10.0.0.7:8888");
        assert!(registry.contains(&key));
        assert_eq!(resolver.calls(), 2);
    }

    #[tokio::test]
    async fn test_empty_and_invalid_targets_are_rejected() {
        let registry = DynamicProxyRegistry::new(CountingResolver::new("  "));
        let key = RoutingKey::new("jupyter", 1, 1);
        assert!(matches!(
            registry.resolve(&key).await,
            Err(ResolutionError::EmptyTarget(_))
        ));
        assert!(!registry.contains(&key));

        let registry = DynamicProxyRegistry::new(CountingResolver::new("no-scheme-host"));
        assert!(matches!(
            registry.resolve(&key).await,
            Err(ResolutionError::InvalidTarget { .. })
        ));
        assert!(!registry.contains(&key));
    }

    #[tokio::test]
    async fn test_evict_idle_and_remove() {
        let resolver = CountingResolver::new("http://10.0.0.7:8888");
        let registry = DynamicProxyRegistry::new(resolver.clone());
        let a = RoutingKey::new("jupyter", 1, 1);
        let b = RoutingKey::new("jupyter", 1, 2);
        registry.resolve(&a).await.unwrap();
        registry.resolve(&b).await.unwrap();

        assert!(registry.evict_idle(Duration::from_secs(3600)).is_empty());
        assert_eq!(registry.len(), 2);

        assert!(registry.remove(&a).is_some());
        assert_eq!(registry.len(), 1);

        let evicted = registry.evict_idle(Duration::ZERO);
        assert_eq!(evicted, vec![b.clone()]);
        assert!(registry.is_empty());

        registry.resolve(&b).await.unwrap();
        assert_eq!(resolver.calls(), 3);
    }

    #[tokio::test]
    async fn test_abandoned_resolutions_leave_no_entries() {
        let resolver = CountingResolver::new("http://10.0.0.7:8888");
        let registry = Arc::new(DynamicProxyRegistry::new(resolver.clone()));

        let mut tasks = Vec::new();
        for job in 0..100 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                registry.resolve(&RoutingKey::new("jupyter", 1, job)).await
            }));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        for task in tasks {
            task.abort();
            assert!(task.await.unwrap_err().is_cancelled());
        }

        assert_eq!(registry.routes.len(), 0);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_waiter_takes_over_when_first_caller_is_cancelled() {
        let resolver = CountingResolver::new("http://10.0.0.7:8888");
        let registry = Arc::new(DynamicProxyRegistry::new(resolver.clone()));
        let key = RoutingKey::new("jupyter", 4, 4);

        let first = {
            let registry = Arc::clone(&registry);
            let key = key.clone();
            tokio::spawn(async move { registry.resolve(&key).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let second = {
            let registry = Arc::clone(&registry);
            let key = key.clone();
            tokio::spawn(async move { registry.resolve(&key).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        first.abort();
        assert!(first.await.unwrap_err().is_cancelled());

        let route = second.await.unwrap().unwrap();
        assert_eq!(route.key, key);
        assert_eq!(resolver.calls(), 2);
        assert_eq!(registry.routes.len(), 1);
    }

    #[test]
    fn test_evict_idle_sweeps_orphaned_cells() {
        let registry = DynamicProxyRegistry::new(CountingResolver::new("http://10.0.0.7:8888"));
        let key = RoutingKey::new("jupyter", 5, 5);
        registry.routes.insert(key.clone(), RouteCell::default());

        let held = Arc::clone(registry.routes.get(&key).unwrap().value());
        registry.evict_idle(Duration::from_secs(3600));
        assert_eq!(registry.routes.len(), 1);

        drop(held);
        registry.evict_idle(Duration::from_secs(3600));
        assert_eq!(registry.routes.len(), 0);
    }
}
