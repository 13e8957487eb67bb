// ============================================
// RXCACHE - Cache Service Tests
// ============================================

#[cfg(test)]
mod cache_tests {
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, Utc};
    use std::sync::Arc;

    use rxcache::cache::{
        normalize, query_hash, CacheEntry, CacheMetadata, CacheService, CacheStats, SaveOutcome,
    };
    use rxcache::config::CacheConfig;
    use rxcache::core::Metrics;
    use rxcache::error::StoreError;
    use rxcache::store::{CacheStore, MemoryStore, SqliteStore};

    fn long_answer() -> String {
        format!(
            "Curcumina 500 mg duas vezes ao dia. Estudo clínico randomizado sugere benefício. {}",
            "Associar piperina para absorção. ".repeat(20)
        )
    }

    fn service(store: Arc<dyn CacheStore>) -> (CacheService, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new());
        (
            CacheService::new(store, CacheConfig::default(), metrics.clone()),
            metrics,
        )
    }

    fn aged_entry(query: &str, category: &str, age: Duration, hit_count: u32) -> CacheEntry {
        let now = Utc::now();
        let normalized = normalize(query, category);
        CacheEntry {
            hash: query_hash(&normalized),
            normalized_query: normalized,
            response: long_answer(),
            category: category.to_string(),
            hit_count,
            last_hit: now - age,
            created_at: now - age,
            expires_at: now + Duration::days(90),
            quality_score: 0.9,
            metadata: CacheMetadata::default(),
        }
    }

    /// Store that fails every call
    struct DownStore;

    #[async_trait]
    impl CacheStore for DownStore {
        async fn find_by_hash(
            &self,
            _: &str,
            _: DateTime<Utc>,
        ) -> Result<Option<CacheEntry>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn find_candidates(
            &self,
            _: &str,
            _: f64,
            _: usize,
            _: DateTime<Utc>,
        ) -> Result<Vec<CacheEntry>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn upsert(&self, _: &CacheEntry) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn record_hit(&self, _: &str, _: DateTime<Utc>) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn delete_expired(&self, _: DateTime<Utc>) -> Result<usize, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn delete_unused(&self, _: DateTime<Utc>) -> Result<usize, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn stats(&self, _: DateTime<Utc>) -> Result<CacheStats, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn clear(&self) -> Result<usize, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
    }

    #[tokio::test]
    async fn test_save_then_exact_hit() {
        let (cache, metrics) = service(Arc::new(MemoryStore::new()));
        let answer = long_answer();

        let outcome = cache
            .save_response(
                "Dose usual de curcumina?",
                "dor",
                &answer,
                CacheMetadata::from_provider("gpt-4o"),
            )
            .await;
        assert!(matches!(outcome, SaveOutcome::Stored { .. }));

        let hit = cache
            .find_similar_query("  DOSE usual de   curcumina? ", "Dor")
            .await
            .expect("exact hit");
        assert_eq!(hit.response, answer);
        assert_eq!(hit.hit_count, 1);
        assert_eq!(metrics.get_counter("cache.exact_hit"), 1);

        let again = cache.find_similar_query("dose usual de curcumina?", "dor").await.unwrap();
        assert_eq!(again.hit_count, 2);
    }

    #[tokio::test]
    async fn test_patient_details_share_an_entry() {
        let (cache, _) = service(Arc::new(MemoryStore::new()));

        cache
            .save_response(
                "Paciente João, 45 anos, masculino, artrose, sugerir 500mg curcumina",
                "dor",
                &long_answer(),
                CacheMetadata::default(),
            )
            .await;

        let hit = cache
            .find_similar_query(
                "Paciente Maria, 60 anos, feminino, artrose, sugerir 250mg curcumina",
                "dor",
            )
            .await;
        assert!(hit.is_some());
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let store = Arc::new(MemoryStore::new());
        let (cache, _) = service(store.clone());

        let mut entry = aged_entry("o que é curcumina", "dor", Duration::days(8), 3);
        entry.expires_at = Utc::now() - Duration::hours(1);
        store.upsert(&entry).await.unwrap();

        assert!(cache.find_similar_query("o que é curcumina", "dor").await.is_none());
        assert!(cache.find_candidates("o que é curcumina", "dor").await.is_empty());
    }

    #[tokio::test]
    async fn test_fuzzy_threshold_is_strict() {
        let store = Arc::new(MemoryStore::new());
        let (cache, metrics) = service(store.clone());

        store
            .upsert(&aged_entry("curcumina artrose joelho idosos", "dor", Duration::hours(1), 0))
            .await
            .unwrap();

        // 4 shared keywords out of 5: exactly 0.8, not enough
        let miss = cache
            .find_similar_query("curcumina artrose joelho idosos manipulada", "dor")
            .await;
        assert!(miss.is_none());

        // Same keywords, different hash
        let hit = cache
            .find_similar_query("curcumina, artrose, joelho, idosos?", "dor")
            .await;
        assert!(hit.is_some());
        assert_eq!(metrics.get_counter("cache.fuzzy_hit"), 1);
    }

    #[tokio::test]
    async fn test_fuzzy_threshold_ignores_category_length() {
        let store = Arc::new(MemoryStore::new());
        let (cache, _) = service(store.clone());

        store
            .upsert(&aged_entry(
                "curcumina artrose joelho idosos",
                "pediatria",
                Duration::hours(1),
                0,
            ))
            .await
            .unwrap();

        let scored = rxcache::cache::similarity(
            &normalize("curcumina artrose joelho idosos", "pediatria"),
            &normalize("curcumina artrose joelho idosos manipulada", "pediatria"),
        );
        assert!((scored - 0.8).abs() < 1e-9);

        let miss = cache
            .find_similar_query("curcumina artrose joelho idosos manipulada", "pediatria")
            .await;
        assert!(miss.is_none());

        let hit = cache
            .find_similar_query("curcumina, artrose, joelho, idosos?", "pediatria")
            .await;
        assert!(hit.is_some());
    }

    #[tokio::test]
    async fn test_fuzzy_stays_in_category() {
        let store = Arc::new(MemoryStore::new());
        let (cache, _) = service(store.clone());

        store
            .upsert(&aged_entry("curcumina artrose joelho idosos", "dor", Duration::hours(1), 0))
            .await
            .unwrap();

        let other = cache
            .find_similar_query("curcumina, artrose, joelho, idosos?", "imuno")
            .await;
        assert!(other.is_none());
    }

    #[tokio::test]
    async fn test_candidates_ranked_by_similarity_then_hits() {
        let store = Arc::new(MemoryStore::new());
        let (cache, _) = service(store.clone());

        let mut popular = aged_entry("curcumina artrose joelho idosos", "dor", Duration::hours(1), 9);
        popular.hash = "popular".into();
        let mut quiet = aged_entry("curcumina artrose joelho idosos", "dor", Duration::hours(1), 1);
        quiet.hash = "quiet".into();
        store.upsert(&quiet).await.unwrap();
        store.upsert(&popular).await.unwrap();

        let ranked = cache
            .find_candidates("curcumina artrose joelho idosos!", "dor")
            .await;
        let hashes: Vec<&str> = ranked.iter().map(|s| s.entry.hash.as_str()).collect();
        assert_eq!(hashes, vec!["popular", "quiet"]);
        assert!(ranked.iter().all(|s| (s.similarity - 1.0).abs() < 1e-9));
    }

    #[tokio::test]
    async fn test_cleanup_evicts_unused_after_retention() {
        let store = Arc::new(MemoryStore::new());
        let (cache, _) = service(store.clone());

        store
            .upsert(&aged_entry("unused old", "dor", Duration::days(31), 0))
            .await
            .unwrap();
        store
            .upsert(&aged_entry("unused recent", "dor", Duration::days(29), 0))
            .await
            .unwrap();
        store
            .upsert(&aged_entry("used old", "dor", Duration::days(31), 4))
            .await
            .unwrap();
        let mut expired = aged_entry("expired", "dor", Duration::days(2), 5);
        expired.expires_at = Utc::now() - Duration::days(1);
        store.upsert(&expired).await.unwrap();

        assert_eq!(cache.cleanup_cache().await, 2);

        let stats = cache.stats().await;
        assert_eq!(stats.total_entries, 2);
        assert!(cache.find_similar_query("unused recent", "dor").await.is_some());
        assert!(cache.find_similar_query("used old", "dor").await.is_some());
        assert!(cache.find_similar_query("unused old", "dor").await.is_none());
    }

    #[tokio::test]
    async fn test_background_cleanup_runs() {
        let store = Arc::new(MemoryStore::new());
        let (cache, _) = service(store.clone());
        let mut expired = aged_entry("expired", "dor", Duration::days(2), 0);
        expired.expires_at = Utc::now() - Duration::days(1);
        store.upsert(&expired).await.unwrap();

        let handle = Arc::new(cache).spawn_cleanup(std::time::Duration::from_millis(10));
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        handle.abort();

        assert_eq!(store.stats(Utc::now()).await.unwrap().total_entries, 0);
    }

    #[tokio::test]
    async fn test_store_failure_is_a_miss() {
        let (cache, metrics) = service(Arc::new(DownStore));

        assert!(cache.find_similar_query("dose de zinco", "imuno").await.is_none());
        assert_eq!(metrics.get_counter("cache.error"), 1);

        let outcome = cache
            .save_response("dose de zinco", "imuno", &long_answer(), CacheMetadata::default())
            .await;
        assert_eq!(outcome, SaveOutcome::Skipped);
        assert_eq!(cache.cleanup_cache().await, 0);
        assert_eq!(cache.stats().await.total_entries, 0);
    }

    #[tokio::test]
    async fn test_sqlite_round_trip_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");

        {
            let (cache, _) = service(Arc::new(SqliteStore::open(&path).unwrap()));
            let outcome = cache
                .save_response(
                    "Para que serve a curcumina?",
                    "dor",
                    &long_answer(),
                    CacheMetadata::from_provider("gpt-4o").with_tokens(321),
                )
                .await;
            assert!(matches!(outcome, SaveOutcome::Stored { .. }));
        }

        let (cache, _) = service(Arc::new(SqliteStore::open(&path).unwrap()));
        let hit = cache
            .find_similar_query("para que serve a curcumina?", "dor")
            .await
            .expect("persisted entry");
        assert_eq!(hit.metadata.provider.as_deref(), Some("gpt-4o"));
        assert_eq!(hit.metadata.tokens, Some(321));
        assert_eq!(hit.category, "dor");
        assert!(hit.expires_at - hit.created_at >= Duration::days(7) - Duration::seconds(1));
    }
}
