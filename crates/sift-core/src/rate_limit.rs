//! Sliding-window rate limiting for per-tenant ingestion admission.
//!
//! The counting store is pluggable: an in-process store for tests and
//! single-node deployments, a Redis-backed store (in the db crate) when
//! admission must be coordinated across processes. Atomicity lives inside
//! the store so no check-then-act race exists between callers.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Mutex;

use crate::error::AppError;

/// Result of one atomic consume attempt against the store.
#[derive(Debug, Clone, Copy)]
pub struct ConsumeOutcome {
    /// Whether the attempt was admitted.
    pub allowed: bool,
    /// Units counted inside the window after this decision. A denied
    /// attempt leaves no trace, so for denials this is the standing count.
    pub current: u32,
}

/// Storage backend for sliding-window usage counting.
///
/// Requests carry a cost in units (1 for ordinary admission, more for
/// expensive operations); admission requires `current + cost <= limit`.
/// Implementations must make `consume` atomic: record the cost and
/// decide admission in one step, removing the record again when denied.
pub trait RateLimitStore: Send + Sync + Clone {
    fn consume(
        &self,
        key: &str,
        cost: u32,
        limit: u32,
        window: Duration,
    ) -> impl Future<Output = Result<ConsumeOutcome, AppError>> + Send;

    /// Units currently inside the window, without consuming.
    fn window_count(
        &self,
        key: &str,
        window: Duration,
    ) -> impl Future<Output = Result<u32, AppError>> + Send;

    /// Drop all recorded usage for the key.
    fn clear(&self, key: &str) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// In-process store backed by per-key queues of (timestamp, cost) entries.
#[derive(Clone, Default)]
pub struct MemoryRateLimitStore {
    entries: Arc<Mutex<HashMap<String, VecDeque<(Instant, u32)>>>>,
}

impl MemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn prune(queue: &mut VecDeque<(Instant, u32)>, window: Duration) {
    let now = Instant::now();
    while let Some(&(front, _)) = queue.front() {
        if now.duration_since(front) > window {
            queue.pop_front();
        } else {
            break;
        }
    }
}

fn window_total(queue: &VecDeque<(Instant, u32)>) -> u32 {
    queue.iter().map(|(_, cost)| *cost).sum()
}

impl RateLimitStore for MemoryRateLimitStore {
    async fn consume(
        &self,
        key: &str,
        cost: u32,
        limit: u32,
        window: Duration,
    ) -> Result<ConsumeOutcome, AppError> {
        let mut entries = self.entries.lock().await;
        let queue = entries.entry(key.to_string()).or_default();
        prune(queue, window);
        let current = window_total(queue);

        if current.saturating_add(cost) <= limit {
            queue.push_back((Instant::now(), cost));
            Ok(ConsumeOutcome {
                allowed: true,
                current: current + cost,
            })
        } else {
            Ok(ConsumeOutcome {
                allowed: false,
                current,
            })
        }
    }

    async fn window_count(&self, key: &str, window: Duration) -> Result<u32, AppError> {
        let mut entries = self.entries.lock().await;
        match entries.get_mut(key) {
            Some(queue) => {
                prune(queue, window);
                Ok(window_total(queue))
            }
            None => Ok(0),
        }
    }

    async fn clear(&self, key: &str) -> Result<(), AppError> {
        let mut entries = self.entries.lock().await;
        entries.remove(key);
        Ok(())
    }
}

/// Outcome of an admission check, with everything a caller needs to build
/// rate-limit headers or a helpful rejection message.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub current: u32,
    pub reset_at: DateTime<Utc>,
    /// True when the store was unreachable and the limiter failed open.
    pub disabled: bool,
}

/// Point-in-time usage snapshot for a tenant.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RateLimitUsage {
    pub tenant: String,
    pub current: u32,
    pub limit: u32,
    pub remaining: u32,
    pub window_secs: u64,
}

fn limiter_key(tenant: &str) -> String {
    format!("rate_limit:{tenant}")
}

/// Per-tenant sliding-window rate limiter with a flat limit.
///
/// Fails open: when the store errors, admission is granted with
/// `disabled = true` so ingestion never halts on a counting outage.
#[derive(Clone)]
pub struct TenantRateLimiter<S> {
    store: S,
    limit: u32,
    window: Duration,
}

impl<S: RateLimitStore> TenantRateLimiter<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            limit: 100,
            window: Duration::from_secs(60),
        }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub async fn check(&self, tenant: &str) -> RateLimitDecision {
        self.check_with_limit(tenant, 1, self.limit).await
    }

    /// Admission check consuming more than one unit, for operations
    /// priced above an ordinary request.
    pub async fn check_with_cost(&self, tenant: &str, cost: u32) -> RateLimitDecision {
        self.check_with_limit(tenant, cost, self.limit).await
    }

    async fn check_with_limit(&self, tenant: &str, cost: u32, limit: u32) -> RateLimitDecision {
        let reset_at = Utc::now()
            + TimeDelta::from_std(self.window).unwrap_or_else(|_| TimeDelta::seconds(60));

        match self
            .store
            .consume(&limiter_key(tenant), cost, limit, self.window)
            .await
        {
            Ok(outcome) => RateLimitDecision {
                allowed: outcome.allowed,
                limit,
                remaining: limit.saturating_sub(outcome.current),
                current: outcome.current,
                reset_at,
                disabled: false,
            },
            Err(e) => {
                tracing::warn!(tenant, error = %e, "Rate limit store unavailable, failing open");
                RateLimitDecision {
                    allowed: true,
                    limit,
                    remaining: limit,
                    current: 0,
                    reset_at,
                    disabled: true,
                }
            }
        }
    }

    pub async fn usage(&self, tenant: &str) -> Result<RateLimitUsage, AppError> {
        self.usage_with_limit(tenant, self.limit).await
    }

    async fn usage_with_limit(&self, tenant: &str, limit: u32) -> Result<RateLimitUsage, AppError> {
        let current = self
            .store
            .window_count(&limiter_key(tenant), self.window)
            .await?;
        Ok(RateLimitUsage {
            tenant: tenant.to_string(),
            current,
            limit,
            remaining: limit.saturating_sub(current),
            window_secs: self.window.as_secs(),
        })
    }

    /// Drop the tenant's recorded requests (operator escape hatch).
    pub async fn reset(&self, tenant: &str) -> Result<(), AppError> {
        self.store.clear(&limiter_key(tenant)).await
    }
}

// ---------------------------------------------------------------------------
// Tiered limits
// ---------------------------------------------------------------------------

/// Subscription tier determining a tenant's per-window request budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantTier {
    #[default]
    Free,
    Pro,
    Enterprise,
}

impl TenantTier {
    pub fn limit(&self) -> u32 {
        match self {
            TenantTier::Free => 50,
            TenantTier::Pro => 200,
            TenantTier::Enterprise => 1000,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TenantTier::Free => "free",
            TenantTier::Pro => "pro",
            TenantTier::Enterprise => "enterprise",
        }
    }
}

impl std::str::FromStr for TenantTier {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(TenantTier::Free),
            "pro" => Ok(TenantTier::Pro),
            "enterprise" => Ok(TenantTier::Enterprise),
            other => Err(AppError::ValidationError(format!(
                "unknown tenant tier: {other}"
            ))),
        }
    }
}

/// Resolves a tenant's tier. Unknown tenants resolve to the free tier
/// rather than erroring.
pub trait TierLookup: Send + Sync + Clone {
    fn tier_for(&self, tenant: &str) -> impl Future<Output = Result<TenantTier, AppError>> + Send;
}

/// Static tier table, used in tests and single-node setups.
#[derive(Clone, Default)]
pub struct FixedTierLookup {
    tiers: Arc<HashMap<String, TenantTier>>,
}

impl FixedTierLookup {
    pub fn new(tiers: HashMap<String, TenantTier>) -> Self {
        Self {
            tiers: Arc::new(tiers),
        }
    }
}

impl TierLookup for FixedTierLookup {
    async fn tier_for(&self, tenant: &str) -> Result<TenantTier, AppError> {
        Ok(self.tiers.get(tenant).copied().unwrap_or_default())
    }
}

/// Memoizes tier lookups so hot tenants do not hit the underlying source
/// on every admission check.
#[derive(Clone)]
pub struct CachedTierLookup<L> {
    inner: L,
    cache: moka::future::Cache<String, TenantTier>,
}

impl<L: TierLookup> CachedTierLookup<L> {
    pub fn new(inner: L, ttl: Duration) -> Self {
        Self {
            inner,
            cache: moka::future::Cache::builder()
                .max_capacity(10_000)
                .time_to_live(ttl)
                .build(),
        }
    }
}

impl<L: TierLookup> TierLookup for CachedTierLookup<L> {
    async fn tier_for(&self, tenant: &str) -> Result<TenantTier, AppError> {
        if let Some(tier) = self.cache.get(tenant).await {
            return Ok(tier);
        }
        let tier = self.inner.tier_for(tenant).await?;
        self.cache.insert(tenant.to_string(), tier).await;
        Ok(tier)
    }
}

/// Rate limiter whose per-tenant limit comes from the tenant's tier.
#[derive(Clone)]
pub struct TieredRateLimiter<S, L> {
    limiter: TenantRateLimiter<S>,
    lookup: L,
}

impl<S: RateLimitStore, L: TierLookup> TieredRateLimiter<S, L> {
    pub fn new(store: S, lookup: L) -> Self {
        Self {
            limiter: TenantRateLimiter::new(store),
            lookup,
        }
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.limiter = self.limiter.with_window(window);
        self
    }

    pub async fn check(&self, tenant: &str) -> RateLimitDecision {
        self.check_with_cost(tenant, 1).await
    }

    pub async fn check_with_cost(&self, tenant: &str, cost: u32) -> RateLimitDecision {
        let limit = match self.lookup.tier_for(tenant).await {
            Ok(tier) => tier.limit(),
            Err(e) => {
                tracing::warn!(tenant, error = %e, "Tier lookup failed, using free tier limit");
                TenantTier::Free.limit()
            }
        };
        self.limiter.check_with_limit(tenant, cost, limit).await
    }

    pub async fn usage(&self, tenant: &str) -> Result<RateLimitUsage, AppError> {
        let tier = self.lookup.tier_for(tenant).await.unwrap_or_default();
        self.limiter.usage_with_limit(tenant, tier.limit()).await
    }

    pub async fn reset(&self, tenant: &str) -> Result<(), AppError> {
        self.limiter.reset(tenant).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_limiter(limit: u32) -> TenantRateLimiter<MemoryRateLimitStore> {
        TenantRateLimiter::new(MemoryRateLimitStore::new()).with_limit(limit)
    }

    #[tokio::test]
    async fn test_allows_under_limit_with_decreasing_remaining() {
        let limiter = small_limiter(3);

        for i in 0..3u32 {
            let decision = limiter.check("acme").await;
            assert!(decision.allowed, "request {i} should be allowed");
            assert_eq!(decision.current, i + 1);
            assert_eq!(decision.remaining, 3 - (i + 1));
        }
    }

    #[tokio::test]
    async fn test_denies_over_limit() {
        let limiter = small_limiter(2);

        assert!(limiter.check("acme").await.allowed);
        assert!(limiter.check("acme").await.allowed);
        let denied = limiter.check("acme").await;
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.current, 2);
    }

    #[tokio::test]
    async fn test_cost_counts_against_the_window() {
        let limiter = small_limiter(5);

        let first = limiter.check_with_cost("acme", 3).await;
        assert!(first.allowed);
        assert_eq!(first.current, 3);
        assert_eq!(first.remaining, 2);

        // 3 + 3 would exceed the limit of 5.
        let denied = limiter.check_with_cost("acme", 3).await;
        assert!(!denied.allowed);
        assert_eq!(denied.current, 3);

        let fits = limiter.check_with_cost("acme", 2).await;
        assert!(fits.allowed);
        assert_eq!(fits.current, 5);
        assert_eq!(fits.remaining, 0);
    }

    #[tokio::test]
    async fn test_denied_attempt_leaves_no_trace() {
        let limiter = small_limiter(1);

        assert!(limiter.check("acme").await.allowed);
        for _ in 0..5 {
            assert!(!limiter.check("acme").await.allowed);
        }

        let usage = limiter.usage("acme").await.unwrap();
        assert_eq!(usage.current, 1);
    }

    #[tokio::test]
    async fn test_tenants_are_isolated() {
        let limiter = small_limiter(1);

        assert!(limiter.check("acme").await.allowed);
        assert!(limiter.check("globex").await.allowed);
        assert!(!limiter.check("acme").await.allowed);
    }

    #[tokio::test]
    async fn test_window_expiry_frees_budget() {
        let limiter = small_limiter(1).with_window(Duration::from_millis(30));

        assert!(limiter.check("acme").await.allowed);
        assert!(!limiter.check("acme").await.allowed);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(limiter.check("acme").await.allowed);
    }

    #[tokio::test]
    async fn test_reset_clears_usage() {
        let limiter = small_limiter(1);

        assert!(limiter.check("acme").await.allowed);
        limiter.reset("acme").await.unwrap();
        assert!(limiter.check("acme").await.allowed);
    }

    #[tokio::test]
    async fn test_fail_open_on_store_error() {
        #[derive(Clone)]
        struct BrokenStore;

        impl RateLimitStore for BrokenStore {
            async fn consume(
                &self,
                _key: &str,
                _cost: u32,
                _limit: u32,
                _window: Duration,
            ) -> Result<ConsumeOutcome, AppError> {
                Err(AppError::StoreError("connection refused".into()))
            }

            async fn window_count(&self, _key: &str, _window: Duration) -> Result<u32, AppError> {
                Err(AppError::StoreError("connection refused".into()))
            }

            async fn clear(&self, _key: &str) -> Result<(), AppError> {
                Err(AppError::StoreError("connection refused".into()))
            }
        }

        let limiter = TenantRateLimiter::new(BrokenStore).with_limit(1);

        let decision = limiter.check("acme").await;
        assert!(decision.allowed);
        assert!(decision.disabled);
    }

    #[test]
    fn test_tier_limits() {
        assert_eq!(TenantTier::Free.limit(), 50);
        assert_eq!(TenantTier::Pro.limit(), 200);
        assert_eq!(TenantTier::Enterprise.limit(), 1000);
        assert_eq!("pro".parse::<TenantTier>().unwrap(), TenantTier::Pro);
        assert!("platinum".parse::<TenantTier>().is_err());
    }

    #[tokio::test]
    async fn test_tiered_limiter_uses_tier_limit() {
        let mut tiers = HashMap::new();
        tiers.insert("bigco".to_string(), TenantTier::Enterprise);
        let limiter =
            TieredRateLimiter::new(MemoryRateLimitStore::new(), FixedTierLookup::new(tiers));

        assert_eq!(limiter.check("bigco").await.limit, 1000);
        // Unknown tenants fall back to the free tier.
        assert_eq!(limiter.check("newco").await.limit, 50);
    }

    #[tokio::test]
    async fn test_cached_tier_lookup() {
        let mut tiers = HashMap::new();
        tiers.insert("acme".to_string(), TenantTier::Pro);
        let cached = CachedTierLookup::new(
            FixedTierLookup::new(tiers),
            Duration::from_secs(60),
        );

        assert_eq!(cached.tier_for("acme").await.unwrap(), TenantTier::Pro);
        assert_eq!(cached.tier_for("acme").await.unwrap(), TenantTier::Pro);
    }
}
