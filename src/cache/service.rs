// ============================================
// RXCACHE - Semantic Response Cache
// ============================================

use chrono::{Duration, Utc};
use std::sync::Arc;
use std::time::Instant;

use super::entry::{CacheEntry, CacheMetadata, CacheStats};
use super::hash::query_hash;
use super::normalize::{classify, normalize, QueryKind};
use super::quality::QualityScorer;
use super::similarity::{rank_candidates, ScoredEntry};
use crate::config::CacheConfig;
use crate::core::Metrics;
use crate::store::CacheStore;

/// What a save did with the response
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    Stored { hash: String, quality_score: f64 },
    Rejected { quality_score: f64 },
    Skipped,
}

/// Cache in front of the AI provider.
///
/// Lookups never fail: storage errors are logged and reported as a miss, so
/// the caller can always fall back to generating a fresh answer.
pub struct CacheService {
    store: Arc<dyn CacheStore>,
    scorer: QualityScorer,
    config: CacheConfig,
    metrics: Arc<Metrics>,
}

impl CacheService {
    pub fn new(store: Arc<dyn CacheStore>, config: CacheConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            scorer: QualityScorer::new(config.premium_providers.clone()),
            config,
            metrics,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Exact-hash lookup, then fuzzy same-category lookup.
    pub async fn find_similar_query(&self, query: &str, category: &str) -> Option<CacheEntry> {
        if query.trim().is_empty() {
            return None;
        }

        let start = Instant::now();
        let normalized = normalize(query, category);
        let hash = query_hash(&normalized);

        let found = match self.store.find_by_hash(&hash, Utc::now()).await {
            Ok(Some(entry)) => {
                tracing::debug!(hash = %hash, "exact cache hit");
                self.metrics.increment("cache.exact_hit");
                Some(self.touch(entry).await)
            }
            Ok(None) => match self.fuzzy_lookup(&normalized, category).await {
                Some(best) => {
                    tracing::debug!(
                        hash = %best.entry.hash,
                        similarity = best.similarity,
                        "fuzzy cache hit"
                    );
                    self.metrics.increment("cache.fuzzy_hit");
                    Some(self.touch(best.entry).await)
                }
                None => {
                    self.metrics.increment("cache.miss");
                    None
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "cache lookup failed, treating as miss");
                self.metrics.increment("cache.error");
                None
            }
        };

        self.metrics.record_time("cache.lookup", start.elapsed());
        found
    }

    /// Ranked fuzzy matches for a query, without touching hit counters.
    pub async fn find_candidates(&self, query: &str, category: &str) -> Vec<ScoredEntry> {
        if query.trim().is_empty() {
            return Vec::new();
        }
        let normalized = normalize(query, category);
        self.ranked(&normalized, category).await
    }

    /// Store a provider response for later reuse.
    ///
    /// Failures are logged and swallowed; a failed save never reaches the user.
    pub async fn save_response(
        &self,
        query: &str,
        category: &str,
        response: &str,
        metadata: CacheMetadata,
    ) -> SaveOutcome {
        if query.trim().is_empty() || response.trim().is_empty() {
            return SaveOutcome::Skipped;
        }

        let normalized = normalize(query, category);
        let hash = query_hash(&normalized);
        let quality_score = self.scorer.score(response, &metadata);

        if quality_score < self.config.min_quality_to_store {
            tracing::debug!(hash = %hash, quality_score, "response below quality floor, not cached");
            self.metrics.increment("cache.rejected");
            return SaveOutcome::Rejected { quality_score };
        }

        let now = Utc::now();
        let Some(expires_at) = self
            .ttl_for(query, category)
            .and_then(|ttl| now.checked_add_signed(ttl))
        else {
            tracing::warn!(hash = %hash, "no usable TTL for entry, not cached");
            return SaveOutcome::Skipped;
        };

        let entry = CacheEntry {
            hash: hash.clone(),
            normalized_query: normalized,
            response: response.to_string(),
            category: category.trim().to_lowercase(),
            hit_count: 0,
            last_hit: now,
            created_at: now,
            expires_at,
            quality_score,
            metadata,
        };

        match self.store.upsert(&entry).await {
            Ok(()) => {
                tracing::info!(hash = %hash, category = %entry.category, quality_score, "response cached");
                self.metrics.increment("cache.saved");
                SaveOutcome::Stored {
                    hash,
                    quality_score,
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, hash = %hash, "failed to save cache entry");
                self.metrics.increment("cache.error");
                SaveOutcome::Skipped
            }
        }
    }

    /// Drop expired entries and entries never reused within the retention
    /// window. Returns the number of rows removed.
    pub async fn cleanup_cache(&self) -> usize {
        let now = Utc::now();
        let mut removed = 0;

        match self.store.delete_expired(now).await {
            Ok(n) => removed += n,
            Err(e) => tracing::warn!(error = %e, "expired-entry cleanup failed"),
        }

        let cutoff = now - Duration::days(self.config.unused_retention_days);
        match self.store.delete_unused(cutoff).await {
            Ok(n) => removed += n,
            Err(e) => tracing::warn!(error = %e, "unused-entry cleanup failed"),
        }

        if removed > 0 {
            tracing::info!(removed, "cache cleanup");
        }
        removed
    }

    /// Run `cleanup_cache` every `every` until the task is dropped.
    pub fn spawn_cleanup(self: Arc<Self>, every: std::time::Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.cleanup_cache().await;
            }
        })
    }

    pub async fn stats(&self) -> CacheStats {
        self.store.stats(Utc::now()).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "cache stats unavailable");
            CacheStats::default()
        })
    }

    pub async fn clear(&self) -> usize {
        self.store.clear().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "cache clear failed");
            0
        })
    }

    /// Lifetime for a new entry: category override, else general vs specific.
    /// `None` when the configured hours are zero or out of range.
    pub fn ttl_for(&self, query: &str, category: &str) -> Option<Duration> {
        let category = category.trim().to_lowercase();
        let hours = match self.config.category_ttl_hours.get(&category) {
            Some(hours) => *hours,
            None => match classify(query) {
                QueryKind::General => self.config.general_ttl_hours,
                QueryKind::Specific => self.config.specific_ttl_hours,
            },
        };
        if hours == 0 {
            return None;
        }
        Duration::try_hours(i64::try_from(hours).ok()?)
    }

    async fn fuzzy_lookup(&self, normalized: &str, category: &str) -> Option<ScoredEntry> {
        self.ranked(normalized, category).await.into_iter().next()
    }

    async fn ranked(&self, normalized: &str, category: &str) -> Vec<ScoredEntry> {
        let category = category.trim().to_lowercase();
        let candidates = match self
            .store
            .find_candidates(
                &category,
                self.config.fuzzy_min_quality,
                self.config.fuzzy_candidate_limit,
                Utc::now(),
            )
            .await
        {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!(error = %e, "fuzzy cache lookup failed");
                return Vec::new();
            }
        };

        rank_candidates(
            normalized,
            candidates,
            self.config.similarity_threshold,
            self.config.top_k,
        )
    }

    /// Bump hit stats. A lost or failed increment is tolerated.
    async fn touch(&self, mut entry: CacheEntry) -> CacheEntry {
        let now = Utc::now();
        if let Err(e) = self.store.record_hit(&entry.hash, now).await {
            tracing::warn!(error = %e, hash = %entry.hash, "failed to record cache hit");
        }
        entry.hit_count = entry.hit_count.saturating_add(1);
        entry.last_hit = now;
        entry
    }
}
