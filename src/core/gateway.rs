// ============================================
// RXCACHE - Query Gateway
// ============================================

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Instant;

use crate::cache::{CacheMetadata, CacheService, SaveOutcome};
use crate::core::Metrics;
use crate::llm::{with_retry, Message, Provider, RetryConfig};
use crate::quota::{LimitKind, QuotaDecision, QuotaService, Remaining};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerSource {
    Cache,
    Provider,
}

#[derive(Debug, Clone)]
pub struct Answer {
    pub content: String,
    pub source: AnswerSource,
    /// Quality score of the cached entry, or of the fresh response when cached
    pub quality_score: Option<f64>,
    pub remaining: Remaining,
}

#[derive(Debug, Clone)]
pub enum GatewayOutcome {
    Answered(Answer),
    LimitReached(LimitKind),
}

/// Quota first, then cache, then the provider; fresh answers are saved back.
pub struct QueryGateway {
    quota: Arc<QuotaService>,
    cache: Arc<CacheService>,
    provider: Arc<dyn Provider>,
    retry: RetryConfig,
    metrics: Arc<Metrics>,
}

impl QueryGateway {
    pub fn new(
        quota: Arc<QuotaService>,
        cache: Arc<CacheService>,
        provider: Arc<dyn Provider>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            quota,
            cache,
            provider,
            retry: RetryConfig::default(),
            metrics,
        }
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub async fn ask(
        &self,
        user_id: &str,
        query: &str,
        category: &str,
        history: &[Message],
    ) -> Result<GatewayOutcome> {
        let decision = self
            .quota
            .try_consume(user_id)
            .await
            .context("Could not verify quota")?;

        if let QuotaDecision::Denied(limit) = decision {
            tracing::info!(user_id, %limit, "query refused, limit reached");
            return Ok(GatewayOutcome::LimitReached(limit));
        }

        let snapshot = self.quota.snapshot(user_id);
        let remaining = snapshot.remaining();

        if snapshot.can_use_cache() {
            if let Some(entry) = self.cache.find_similar_query(query, category).await {
                return Ok(GatewayOutcome::Answered(Answer {
                    content: entry.response,
                    source: AnswerSource::Cache,
                    quality_score: Some(entry.quality_score),
                    remaining,
                }));
            }
        }

        let start = Instant::now();
        let provider = self.provider.clone();
        let generation = with_retry(&self.retry, || {
            let p = provider.clone();
            async move { p.generate(query, history).await }
        })
        .await
        .with_context(|| format!("{} request failed", self.provider.name()))?;
        let elapsed = start.elapsed();
        self.metrics.record_time("provider.generate", elapsed);

        let mut metadata = CacheMetadata::from_provider(generation.model.as_str())
            .with_latency_ms(elapsed.as_millis() as u64);
        if let Some(tokens) = generation.tokens {
            metadata = metadata.with_tokens(tokens);
        }

        let quality_score = match self
            .cache
            .save_response(query, category, &generation.content, metadata)
            .await
        {
            SaveOutcome::Stored { quality_score, .. } => Some(quality_score),
            SaveOutcome::Rejected { quality_score } => Some(quality_score),
            SaveOutcome::Skipped => None,
        };

        Ok(GatewayOutcome::Answered(Answer {
            content: generation.content,
            source: AnswerSource::Provider,
            quality_score,
            remaining,
        }))
    }
}
