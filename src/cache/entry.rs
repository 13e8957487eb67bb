use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A cached provider response, keyed by the hash of its normalized query
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    pub hash: String,
    pub normalized_query: String,
    pub response: String,
    pub category: String,
    pub hit_count: u32,
    pub last_hit: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Write-time quality grade in [0, 1]
    pub quality_score: f64,
    pub metadata: CacheMetadata,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Save-time details about how a response was produced
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CacheMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl CacheMetadata {
    pub fn from_provider(provider: impl Into<String>) -> Self {
        Self {
            provider: Some(provider.into()),
            ..Default::default()
        }
    }

    pub fn with_tokens(mut self, tokens: u32) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }
}

/// Cache table statistics
#[derive(Debug, Default, Clone)]
pub struct CacheStats {
    pub total_entries: usize,
    pub live_entries: usize,
    pub expired_entries: usize,
    pub total_hits: u64,
    pub avg_quality: f64,
    pub by_category: BTreeMap<String, usize>,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Entries: {} ({} live, {} expired)", self.total_entries, self.live_entries, self.expired_entries)?;
        writeln!(f, "Total hits: {}", self.total_hits)?;
        writeln!(f, "Average quality: {:.2}", self.avg_quality)?;
        for (category, count) in &self.by_category {
            writeln!(f, "  {}: {}", category, count)?;
        }
        Ok(())
    }
}
