use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use super::{CacheStore, QuotaStore};
use crate::cache::{CacheEntry, CacheStats};
use crate::error::StoreError;
use crate::quota::{UsageStats, UserTier};

/// In-process store. Nothing survives the process; used by tests and
/// `--in-memory` runs.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
    quota: Mutex<QuotaTables>,
}

#[derive(Default)]
struct QuotaTables {
    tiers: HashMap<String, UserTier>,
    usage: HashMap<(String, NaiveDate), UsageStats>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn find_by_hash(
        &self,
        hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheEntry>, StoreError> {
        let entries = self.entries.read().map_err(|_| StoreError::Poisoned)?;
        Ok(entries
            .get(hash)
            .filter(|e| !e.is_expired(now))
            .cloned())
    }

    async fn find_candidates(
        &self,
        category: &str,
        min_quality: f64,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<CacheEntry>, StoreError> {
        let entries = self.entries.read().map_err(|_| StoreError::Poisoned)?;
        let mut found: Vec<CacheEntry> = entries
            .values()
            .filter(|e| e.category == category)
            .filter(|e| e.quality_score >= min_quality)
            .filter(|e| !e.is_expired(now))
            .cloned()
            .collect();

        found.sort_by(|a, b| b.quality_score.total_cmp(&a.quality_score));
        found.truncate(limit);
        Ok(found)
    }

    async fn upsert(&self, entry: &CacheEntry) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        entries.insert(entry.hash.clone(), entry.clone());
        Ok(())
    }

    async fn record_hit(&self, hash: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        if let Some(entry) = entries.get_mut(hash) {
            entry.hit_count = entry.hit_count.saturating_add(1);
            entry.last_hit = at;
        }
        Ok(())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        let before = entries.len();
        entries.retain(|_, e| e.expires_at >= now);
        Ok(before - entries.len())
    }

    async fn delete_unused(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        let before = entries.len();
        entries.retain(|_, e| !(e.hit_count == 0 && e.created_at < cutoff));
        Ok(before - entries.len())
    }

    async fn stats(&self, now: DateTime<Utc>) -> Result<CacheStats, StoreError> {
        let entries = self.entries.read().map_err(|_| StoreError::Poisoned)?;
        let mut stats = CacheStats {
            total_entries: entries.len(),
            ..Default::default()
        };

        let mut quality_sum = 0.0;
        for entry in entries.values() {
            if entry.is_expired(now) {
                stats.expired_entries += 1;
            } else {
                stats.live_entries += 1;
            }
            stats.total_hits += u64::from(entry.hit_count);
            quality_sum += entry.quality_score;
            *stats.by_category.entry(entry.category.clone()).or_insert(0) += 1;
        }
        if stats.total_entries > 0 {
            stats.avg_quality = quality_sum / stats.total_entries as f64;
        }
        Ok(stats)
    }

    async fn clear(&self) -> Result<usize, StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        let removed = entries.len();
        entries.clear();
        Ok(removed)
    }
}

#[async_trait]
impl QuotaStore for MemoryStore {
    async fn load_tier(&self, user_id: &str) -> Result<Option<UserTier>, StoreError> {
        let tables = self.quota.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(tables.tiers.get(user_id).cloned())
    }

    async fn insert_tier_if_absent(&self, tier: &UserTier) -> Result<UserTier, StoreError> {
        let mut tables = self.quota.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(tables
            .tiers
            .entry(tier.user_id.clone())
            .or_insert_with(|| tier.clone())
            .clone())
    }

    async fn save_tier(&self, tier: &UserTier) -> Result<(), StoreError> {
        let mut tables = self.quota.lock().map_err(|_| StoreError::Poisoned)?;
        tables.tiers.insert(tier.user_id.clone(), tier.clone());
        Ok(())
    }

    async fn load_usage(
        &self,
        user_id: &str,
        day: NaiveDate,
    ) -> Result<Option<UsageStats>, StoreError> {
        let tables = self.quota.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(tables.usage.get(&(user_id.to_string(), day)).cloned())
    }

    async fn latest_usage_before(
        &self,
        user_id: &str,
        day: NaiveDate,
    ) -> Result<Option<UsageStats>, StoreError> {
        let tables = self.quota.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(tables
            .usage
            .values()
            .filter(|u| u.user_id == user_id && u.day < day)
            .max_by_key(|u| u.day)
            .cloned())
    }

    async fn insert_usage_if_absent(&self, usage: &UsageStats) -> Result<UsageStats, StoreError> {
        let mut tables = self.quota.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(tables
            .usage
            .entry((usage.user_id.clone(), usage.day))
            .or_insert_with(|| usage.clone())
            .clone())
    }

    async fn try_consume(
        &self,
        user_id: &str,
        day: NaiveDate,
        daily_limit: u32,
        monthly_limit: u32,
    ) -> Result<Option<UsageStats>, StoreError> {
        let mut tables = self.quota.lock().map_err(|_| StoreError::Poisoned)?;
        let Some(usage) = tables.usage.get_mut(&(user_id.to_string(), day)) else {
            return Ok(None);
        };

        if usage.queries_today >= daily_limit || usage.queries_this_month >= monthly_limit {
            return Ok(None);
        }

        *usage = usage.consumed();
        Ok(Some(usage.clone()))
    }
}
