//! Lexical similarity between canonical queries: keyword sets compared with
//! the Jaccard index.

use std::collections::HashSet;

use super::entry::CacheEntry;
use super::normalize::CATEGORY_SEPARATOR;

/// Function words dropped before comparison. Tokens of three characters or
/// fewer are dropped anyway, so only longer words need to be listed.
const STOP_WORDS: &[&str] = &[
    // pt
    "para", "como", "qual", "quais", "sobre", "entre", "pelo", "pela", "pelos", "pelas", "este",
    "esta", "estes", "estas", "esse", "essa", "esses", "essas", "isso", "isto", "aquele",
    "aquela", "muito", "mais", "menos", "quando", "onde", "porque", "também", "pode", "podem",
    "deve", "seria", "sugerir", "sugira", "uma", "umas", "uns", "nos", "nas", "dos", "das",
    // en
    "the", "with", "from", "that", "this", "what", "which", "about", "into", "should", "could",
    "would", "there", "their",
];

/// Characters trimmed from the edges of each token
const PUNCTUATION: &[char] = &[',', '.', ';', ':', '!', '?', '(', ')', '"', '\''];

/// Extract the comparable keyword set from a text. A trailing `|category`
/// suffix is not part of the comparison.
pub fn extract_keywords(text: &str) -> HashSet<String> {
    let text = text
        .rsplit_once(CATEGORY_SEPARATOR)
        .map_or(text, |(query, _)| query);

    text.split_whitespace()
        .map(|token| token.trim_matches(PUNCTUATION).to_lowercase())
        .filter(|token| token.chars().count() > 3)
        .filter(|token| !STOP_WORDS.contains(&token.as_str()))
        .collect()
}

/// Jaccard index of the keyword sets of `a` and `b`, in [0, 1].
pub fn similarity(a: &str, b: &str) -> f64 {
    let left = extract_keywords(a);
    let right = extract_keywords(b);

    let union = left.union(&right).count();
    if union == 0 {
        return 0.0;
    }

    let intersection = left.intersection(&right).count();
    intersection as f64 / union as f64
}

/// A cache entry paired with its similarity to the lookup query
#[derive(Debug, Clone)]
pub struct ScoredEntry {
    pub entry: CacheEntry,
    pub similarity: f64,
}

/// Score `candidates` against `normalized`, keep those strictly above
/// `threshold`, and return the best `top_k` ordered by similarity, then hit
/// count.
pub fn rank_candidates(
    normalized: &str,
    candidates: Vec<CacheEntry>,
    threshold: f64,
    top_k: usize,
) -> Vec<ScoredEntry> {
    let query_keywords = extract_keywords(normalized);

    let mut scored: Vec<ScoredEntry> = candidates
        .into_iter()
        .filter_map(|entry| {
            let keywords = extract_keywords(&entry.normalized_query);
            let union = query_keywords.union(&keywords).count();
            if union == 0 {
                return None;
            }
            let score = query_keywords.intersection(&keywords).count() as f64 / union as f64;
            (score > threshold).then_some(ScoredEntry {
                entry,
                similarity: score,
            })
        })
        .collect();

    scored.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then_with(|| b.entry.hit_count.cmp(&a.entry.hit_count))
    });
    scored.truncate(top_k);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::{CacheEntry, CacheMetadata};
    use chrono::{Duration, Utc};

    fn entry(normalized: &str, hits: u32) -> CacheEntry {
        let now = Utc::now();
        CacheEntry {
            hash: crate::cache::hash::query_hash(normalized),
            normalized_query: normalized.to_string(),
            response: "resposta".to_string(),
            category: "dor".to_string(),
            hit_count: hits,
            last_hit: now,
            created_at: now,
            expires_at: now + Duration::days(1),
            quality_score: 0.8,
            metadata: CacheMetadata::default(),
        }
    }

    #[test]
    fn test_extract_keywords_filters() {
        let keywords = extract_keywords("Qual a dose de magnésio para insônia, segundo estudos?|sono");
        assert!(keywords.contains("magnésio"));
        assert!(keywords.contains("insônia"));
        assert!(keywords.contains("segundo"));
        assert!(keywords.contains("estudos"));
        assert!(!keywords.contains("qual"));
        assert!(!keywords.contains("para"));
        assert!(!keywords.contains("de"));
        assert!(keywords.contains("dose"));
        assert!(!keywords.contains("sono"));
    }

    #[test]
    fn test_category_suffix_does_not_count() {
        let short = similarity(
            "curcumina artrose joelho idosos|dor",
            "curcumina artrose joelho idosos manipulada|dor",
        );
        let long = similarity(
            "curcumina artrose joelho idosos|pediatria",
            "curcumina artrose joelho idosos manipulada|pediatria",
        );
        assert!((short - 0.8).abs() < 1e-9);
        assert!((long - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_similarity_bounds() {
        assert_eq!(similarity("", ""), 0.0);
        assert_eq!(similarity("curcumina piperina", "curcumina piperina"), 1.0);
        assert_eq!(similarity("curcumina", "melatonina"), 0.0);
    }

    #[test]
    fn test_similarity_partial() {
        // {curcumina, piperina, boswellia} vs {curcumina, piperina, gengibre}
        let s = similarity("curcumina piperina boswellia", "curcumina piperina gengibre");
        assert!((s - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_rank_threshold_and_order() {
        let query = "curcumina piperina boswellia gengibre colágeno magnésio|dor";
        let candidates = vec![
            // 5 of 6 shared, union 6 => 0.833
            entry("curcumina piperina boswellia gengibre colágeno|dor", 1),
            entry("curcumina piperina boswellia gengibre colágeno|dor ", 9),
            // exact keyword set
            entry("magnésio colágeno gengibre boswellia piperina curcumina|dor", 0),
            // 3 of 6
            entry("curcumina piperina boswellia|dor", 50),
        ];

        let ranked = rank_candidates(query, candidates, 0.8, 3);
        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].similarity, 1.0);
        assert_eq!(ranked[1].entry.hit_count, 9, "hit count breaks ties");
        assert_eq!(ranked[2].entry.hit_count, 1);
    }

    #[test]
    fn test_rank_respects_top_k() {
        let query = "curcumina piperina|dor";
        let candidates = (0..5).map(|i| entry("curcumina piperina|dor", i)).collect();
        let ranked = rank_candidates(query, candidates, 0.8, 3);
        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].entry.hit_count, 4);
    }
}
