//! Heuristic grade of a provider response. The score gates cache admission
//! and ranks fuzzy candidates; it is computed once, at save time.

use regex::Regex;

use super::entry::CacheMetadata;

const BASE_SCORE: f64 = 0.5;

const EVIDENCE_MARKERS: &[&str] = &[
    "estudo", "pesquisa", "referência", "referencia", "evidência", "evidencia", "study",
    "research", "reference", "evidence",
];

lazy_static::lazy_static! {
    static ref STRUCTURE: Regex =
        Regex::new(r"(?m)^\s*(?:[-*•]\s|\d+[.)]\s)|\*\*[^*\n]+\*\*").unwrap();
}

pub struct QualityScorer {
    premium_providers: Vec<String>,
}

impl QualityScorer {
    pub fn new(premium_providers: Vec<String>) -> Self {
        Self {
            premium_providers: premium_providers
                .into_iter()
                .map(|p| p.to_lowercase())
                .collect(),
        }
    }

    pub fn score(&self, response: &str, metadata: &CacheMetadata) -> f64 {
        let mut score = BASE_SCORE;
        // UTF-16 code units, the same unit the query hash uses
        let length = response.encode_utf16().count();

        if (500..=3000).contains(&length) {
            score += 0.2;
        } else if length > 3000 {
            score -= 0.1;
        }
        if length < 200 {
            score -= 0.2;
        }

        let lower = response.to_lowercase();
        if EVIDENCE_MARKERS.iter().any(|m| lower.contains(m)) {
            score += 0.2;
        }

        if STRUCTURE.is_match(response) {
            score += 0.1;
        }

        if self.is_premium(metadata) {
            score += 0.1;
        }

        score.clamp(0.0, 1.0)
    }

    fn is_premium(&self, metadata: &CacheMetadata) -> bool {
        metadata
            .provider
            .as_deref()
            .map(|p| self.premium_providers.contains(&p.to_lowercase()))
            .unwrap_or(false)
    }
}
