pub mod entry;
pub mod hash;
pub mod normalize;
pub mod quality;
mod service;
pub mod similarity;

pub use entry::{CacheEntry, CacheMetadata, CacheStats};
pub use hash::query_hash;
pub use normalize::{classify, normalize, QueryKind};
pub use quality::QualityScorer;
pub use service::{CacheService, SaveOutcome};
pub use similarity::{extract_keywords, similarity, ScoredEntry};
