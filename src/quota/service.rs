// ============================================
// RXCACHE - Tiered Usage Quotas
// ============================================

use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::tier::{TierName, UserTier};
use super::usage::UsageStats;
use crate::core::{EventLog, Metrics, UsageEvent, UsageEventKind};
use crate::error::QuotaError;
use crate::store::QuotaStore;

/// Which ceiling stopped a query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    Daily,
    Monthly,
}

impl std::fmt::Display for LimitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LimitKind::Daily => write!(f, "daily"),
            LimitKind::Monthly => write!(f, "monthly"),
        }
    }
}

/// Result of a consumption attempt
#[derive(Debug, Clone, PartialEq)]
pub enum QuotaDecision {
    Allowed(UsageStats),
    Denied(LimitKind),
}

impl QuotaDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, QuotaDecision::Allowed(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Remaining {
    pub daily: u32,
    pub monthly: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UsagePercentage {
    pub daily: f64,
    pub monthly: f64,
}

/// A user's tier and today's usage, as last loaded from the store
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaSnapshot {
    pub tier: UserTier,
    pub usage: UsageStats,
}

impl QuotaSnapshot {
    pub fn remaining(&self) -> Remaining {
        Remaining {
            daily: self.tier.daily_limit.saturating_sub(self.usage.queries_today),
            monthly: self
                .tier
                .monthly_limit
                .saturating_sub(self.usage.queries_this_month),
        }
    }

    pub fn usage_percentage(&self) -> UsagePercentage {
        UsagePercentage {
            daily: percentage(self.usage.queries_today, self.tier.daily_limit),
            monthly: percentage(self.usage.queries_this_month, self.tier.monthly_limit),
        }
    }

    pub fn can_use_cache(&self) -> bool {
        self.tier.cache_access
    }

    /// The first ceiling already reached, daily before monthly
    pub fn exceeded(&self) -> Option<LimitKind> {
        if self.usage.queries_today >= self.tier.daily_limit {
            Some(LimitKind::Daily)
        } else if self.usage.queries_this_month >= self.tier.monthly_limit {
            Some(LimitKind::Monthly)
        } else {
            None
        }
    }
}

fn percentage(used: u32, limit: u32) -> f64 {
    if limit == 0 {
        100.0
    } else {
        used as f64 / limit as f64 * 100.0
    }
}

/// Per-user daily/monthly quotas.
///
/// Any store failure on this path is a denial: quota state that cannot be
/// verified is never treated as available.
pub struct QuotaService {
    store: Arc<dyn QuotaStore>,
    events: Arc<EventLog>,
    metrics: Arc<Metrics>,
    default_tier: TierName,
    loaded: RwLock<HashMap<String, QuotaSnapshot>>,
}

impl QuotaService {
    pub fn new(
        store: Arc<dyn QuotaStore>,
        events: Arc<EventLog>,
        metrics: Arc<Metrics>,
        default_tier: TierName,
    ) -> Self {
        Self {
            store,
            events,
            metrics,
            default_tier,
            loaded: RwLock::new(HashMap::new()),
        }
    }

    /// Load (creating on first use) the user's tier and today's usage.
    pub async fn load(&self, user_id: &str) -> Result<QuotaSnapshot, QuotaError> {
        self.load_for(user_id, Utc::now().date_naive()).await
    }

    async fn load_for(&self, user_id: &str, day: NaiveDate) -> Result<QuotaSnapshot, QuotaError> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(QuotaError::InvalidUser);
        }

        let tier = match self.store.load_tier(user_id).await? {
            Some(tier) => tier,
            None => {
                let tier = UserTier::new(user_id, self.default_tier);
                tracing::info!(user_id, tier = %tier.tier_name, "initializing user tier");
                self.store.insert_tier_if_absent(&tier).await?
            }
        };

        let usage = match self.store.load_usage(user_id, day).await? {
            Some(usage) => usage,
            None => {
                let previous = self.store.latest_usage_before(user_id, day).await?;
                let usage = UsageStats::open_day(user_id, day, previous.as_ref());
                self.store.insert_usage_if_absent(&usage).await?
            }
        };

        let snapshot = QuotaSnapshot { tier, usage };
        self.remember(snapshot.clone());
        Ok(snapshot)
    }

    /// Consume one query if both ceilings allow it.
    pub async fn try_consume(&self, user_id: &str) -> Result<QuotaDecision, QuotaError> {
        let day = Utc::now().date_naive();
        let snapshot = self.load_for(user_id, day).await?;
        let user_id = snapshot.tier.user_id.clone();

        if let Some(limit) = snapshot.exceeded() {
            return Ok(self.deny(&snapshot, limit));
        }

        let consumed = self
            .store
            .try_consume(
                &user_id,
                day,
                snapshot.tier.daily_limit,
                snapshot.tier.monthly_limit,
            )
            .await?;

        match consumed {
            Some(usage) => {
                self.metrics.increment("quota.allowed");
                self.events.record(UsageEvent::new(
                    user_id.as_str(),
                    UsageEventKind::QueryConsumed {
                        queries_today: usage.queries_today,
                        queries_this_month: usage.queries_this_month,
                    },
                ));
                self.remember(QuotaSnapshot {
                    tier: snapshot.tier,
                    usage: usage.clone(),
                });
                Ok(QuotaDecision::Allowed(usage))
            }
            None => {
                // Another request took the last slot between our read and the update
                let fresh = self.load_for(&user_id, day).await?;
                let limit = fresh.exceeded().unwrap_or(LimitKind::Daily);
                Ok(self.deny(&fresh, limit))
            }
        }
    }

    /// `true` when the user may make one more billable call. Store failures
    /// deny.
    pub async fn check_and_consume_limit(&self, user_id: &str) -> bool {
        match self.try_consume(user_id).await {
            Ok(decision) => decision.is_allowed(),
            Err(e) => {
                tracing::error!(user_id, error = %e, "quota check failed, denying");
                self.metrics.increment("quota.error");
                false
            }
        }
    }

    /// Replace the user's limits with those of `tier`. Usage is untouched.
    pub async fn upgrade_tier(&self, user_id: &str, tier: TierName) -> Result<UserTier, QuotaError> {
        let snapshot = self.load(user_id).await?;
        let from = snapshot.tier.tier_name;
        let upgraded = snapshot.tier.upgraded(tier);

        if upgraded != snapshot.tier {
            self.store.save_tier(&upgraded).await?;
        }

        tracing::info!(user_id = %upgraded.user_id, %from, to = %tier, "tier upgraded");
        self.events.record(UsageEvent::new(
            upgraded.user_id.as_str(),
            UsageEventKind::TierUpgraded { from, to: tier },
        ));
        self.remember(QuotaSnapshot {
            tier: upgraded.clone(),
            usage: snapshot.usage,
        });
        Ok(upgraded)
    }

    /// Last loaded state for the user; a never-loaded user reads as a fresh
    /// default-tier account. State from an earlier day reads as today's
    /// opened row.
    pub fn snapshot(&self, user_id: &str) -> QuotaSnapshot {
        let user_id = user_id.trim();
        let today = Utc::now().date_naive();
        let cached = self
            .loaded
            .read()
            .ok()
            .and_then(|loaded| loaded.get(user_id).cloned());

        match cached {
            Some(snapshot) if snapshot.usage.day >= today => snapshot,
            Some(stale) => QuotaSnapshot {
                usage: UsageStats::open_day(user_id, today, Some(&stale.usage)),
                tier: stale.tier,
            },
            None => QuotaSnapshot {
                tier: UserTier::new(user_id, self.default_tier),
                usage: UsageStats::open_day(user_id, today, None),
            },
        }
    }

    pub fn get_remaining_queries(&self, user_id: &str) -> Remaining {
        self.snapshot(user_id).remaining()
    }

    pub fn get_usage_percentage(&self, user_id: &str) -> UsagePercentage {
        self.snapshot(user_id).usage_percentage()
    }

    pub fn can_use_cache(&self, user_id: &str) -> bool {
        self.snapshot(user_id).can_use_cache()
    }

    fn deny(&self, snapshot: &QuotaSnapshot, limit: LimitKind) -> QuotaDecision {
        let kind = match limit {
            LimitKind::Daily => UsageEventKind::DailyLimitExceeded {
                limit: snapshot.tier.daily_limit,
            },
            LimitKind::Monthly => UsageEventKind::MonthlyLimitExceeded {
                limit: snapshot.tier.monthly_limit,
            },
        };
        self.metrics.increment("quota.denied");
        self.events
            .record(UsageEvent::new(snapshot.tier.user_id.as_str(), kind));
        QuotaDecision::Denied(limit)
    }

    /// Cache the snapshot. Users last seen on an earlier day are dropped.
    fn remember(&self, snapshot: QuotaSnapshot) {
        if let Ok(mut loaded) = self.loaded.write() {
            let day = snapshot.usage.day;
            loaded.retain(|_, s| s.usage.day >= day);
            loaded.insert(snapshot.tier.user_id.clone(), snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn service(store: Arc<MemoryStore>) -> QuotaService {
        QuotaService::new(
            store,
            Arc::new(EventLog::in_memory()),
            Arc::new(Metrics::new()),
            TierName::Free,
        )
    }

    #[tokio::test]
    async fn test_lazy_initialization() {
        let store = Arc::new(MemoryStore::new());
        let quota = service(store.clone());

        let snapshot = quota.load("u1").await.unwrap();
        assert_eq!(snapshot.tier.tier_name, TierName::Free);
        assert_eq!(snapshot.tier.daily_limit, 10);
        assert_eq!(snapshot.tier.monthly_limit, 200);
        assert!(!snapshot.tier.cache_access);
        assert_eq!(snapshot.usage.queries_today, 0);

        assert!(store.load_tier("u1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_empty_user_denied() {
        let quota = service(Arc::new(MemoryStore::new()));
        assert!(matches!(quota.try_consume("  ").await, Err(QuotaError::InvalidUser)));
        assert!(!quota.check_and_consume_limit("").await);
    }

    #[test]
    fn test_snapshot_derived_values() {
        let day = NaiveDate::from_ymd_opt(2026, 5, 10).unwrap();
        let mut usage = UsageStats::open_day("u1", day, None);
        usage.queries_today = 4;
        usage.queries_this_month = 250;
        let snapshot = QuotaSnapshot {
            tier: UserTier::new("u1", TierName::Free),
            usage,
        };

        assert_eq!(snapshot.remaining(), Remaining { daily: 6, monthly: 0 });
        let pct = snapshot.usage_percentage();
        assert!((pct.daily - 40.0).abs() < 1e-9);
        assert!((pct.monthly - 125.0).abs() < 1e-9);
        assert_eq!(snapshot.exceeded(), Some(LimitKind::Monthly));
    }

    #[tokio::test]
    async fn test_stale_day_reads_as_today() {
        let store = Arc::new(MemoryStore::new());
        let quota = service(store.clone());
        let today = Utc::now().date_naive();
        let yesterday = today.pred_opt().unwrap();

        let mut previous = UsageStats::open_day("u1", yesterday, None);
        previous.queries_today = 7;
        previous.queries_this_month = 30;
        store.insert_usage_if_absent(&previous).await.unwrap();
        quota.load_for("u1", yesterday).await.unwrap();

        let snapshot = quota.snapshot("u1");
        assert_eq!(snapshot.usage.day, today);
        assert_eq!(snapshot.usage.queries_today, 0);
        assert_eq!(quota.get_remaining_queries("u1").daily, 10);

        quota.load("u2").await.unwrap();
        let loaded = quota.loaded.read().unwrap();
        assert!(!loaded.contains_key("u1"));
        assert!(loaded.contains_key("u2"));
    }

    #[test]
    fn test_unloaded_user_reads_as_default() {
        let quota = service(Arc::new(MemoryStore::new()));
        assert_eq!(
            quota.get_remaining_queries("nobody"),
            Remaining {
                daily: 10,
                monthly: 200
            }
        );
        assert!(!quota.can_use_cache("nobody"));
    }
}
