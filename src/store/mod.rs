// ============================================
// RXCACHE - Persistent Store Boundary
// ============================================

mod memory;
mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::cache::{CacheEntry, CacheStats};
use crate::error::StoreError;
use crate::quota::{UsageStats, UserTier};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Storage for `query_cache` rows
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Live entry with this hash, highest quality first
    async fn find_by_hash(
        &self,
        hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheEntry>, StoreError>;

    /// Live entries of a category with at least `min_quality`, best quality first
    async fn find_candidates(
        &self,
        category: &str,
        min_quality: f64,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<CacheEntry>, StoreError>;

    /// Insert or replace the entry keyed by its hash
    async fn upsert(&self, entry: &CacheEntry) -> Result<(), StoreError>;

    /// Best-effort `hit_count + 1, last_hit = at`
    async fn record_hit(&self, hash: &str, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Remove entries whose `expires_at` is before `now`
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Remove never-hit entries created before `cutoff`
    async fn delete_unused(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;

    async fn stats(&self, now: DateTime<Utc>) -> Result<CacheStats, StoreError>;

    async fn clear(&self) -> Result<usize, StoreError>;
}

/// Storage for `user_tiers` and `usage_stats` rows
#[async_trait]
pub trait QuotaStore: Send + Sync {
    async fn load_tier(&self, user_id: &str) -> Result<Option<UserTier>, StoreError>;

    /// Insert unless a row exists; returns whichever row is stored
    async fn insert_tier_if_absent(&self, tier: &UserTier) -> Result<UserTier, StoreError>;

    async fn save_tier(&self, tier: &UserTier) -> Result<(), StoreError>;

    async fn load_usage(
        &self,
        user_id: &str,
        day: NaiveDate,
    ) -> Result<Option<UsageStats>, StoreError>;

    /// The user's most recent row strictly before `day`
    async fn latest_usage_before(
        &self,
        user_id: &str,
        day: NaiveDate,
    ) -> Result<Option<UsageStats>, StoreError>;

    /// Insert unless a row exists; returns whichever row is stored
    async fn insert_usage_if_absent(&self, usage: &UsageStats) -> Result<UsageStats, StoreError>;

    /// Atomically increment both counters if, and only if,
    /// `queries_today < daily_limit` and `queries_this_month < monthly_limit`.
    /// Returns the updated row, or `None` when the condition did not hold.
    async fn try_consume(
        &self,
        user_id: &str,
        day: NaiveDate,
        daily_limit: u32,
        monthly_limit: u32,
    ) -> Result<Option<UsageStats>, StoreError>;
}
