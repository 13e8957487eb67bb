//! SQLite-backed store. One connection guarded by a mutex; every call runs on
//! the blocking pool.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::{CacheStore, QuotaStore};
use crate::cache::{CacheEntry, CacheMetadata, CacheStats};
use crate::error::StoreError;
use crate::quota::{TierName, UsageStats, UserTier};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS query_cache (
        hash             TEXT PRIMARY KEY,
        normalized_query TEXT NOT NULL,
        response         TEXT NOT NULL,
        category         TEXT NOT NULL,
        hit_count        INTEGER NOT NULL DEFAULT 0,
        last_hit         INTEGER NOT NULL,
        created_at       INTEGER NOT NULL,
        expires_at       INTEGER NOT NULL,
        quality_score    REAL NOT NULL,
        metadata         TEXT NOT NULL DEFAULT '{}'
    );
    CREATE INDEX IF NOT EXISTS idx_qc_category ON query_cache(category, quality_score);
    CREATE INDEX IF NOT EXISTS idx_qc_expires ON query_cache(expires_at);

    CREATE TABLE IF NOT EXISTS user_tiers (
        user_id        TEXT PRIMARY KEY,
        tier_name      TEXT NOT NULL,
        daily_limit    INTEGER NOT NULL,
        monthly_limit  INTEGER NOT NULL,
        priority_bonus INTEGER NOT NULL DEFAULT 0,
        cache_access   INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS usage_stats (
        user_id            TEXT NOT NULL,
        day                TEXT NOT NULL,
        queries_today      INTEGER NOT NULL DEFAULT 0,
        queries_this_month INTEGER NOT NULL DEFAULT 0,
        streak_days        INTEGER NOT NULL DEFAULT 1,
        avg_daily          REAL NOT NULL DEFAULT 0,
        PRIMARY KEY (user_id, day)
    );";

const ENTRY_COLUMNS: &str = "hash, normalized_query, response, category, hit_count, last_hit, \
                             created_at, expires_at, quality_score, metadata";

const USAGE_COLUMNS: &str =
    "user_id, day, queries_today, queries_this_month, streak_days, avg_daily";

const TIER_COLUMNS: &str =
    "user_id, tier_name, daily_limit, monthly_limit, priority_bonus, cache_access";

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database file and apply the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Unavailable(format!("{}: {}", parent.display(), e)))?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous  = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn call<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
            op(&guard).map_err(StoreError::from)
        })
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?
    }
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let millis: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Integer,
            format!("timestamp out of range: {}", millis).into(),
        )
    })
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<CacheEntry> {
    let metadata: String = row.get(9)?;
    let metadata: CacheMetadata = serde_json::from_str(&metadata)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(9, Type::Text, Box::new(e)))?;

    Ok(CacheEntry {
        hash: row.get(0)?,
        normalized_query: row.get(1)?,
        response: row.get(2)?,
        category: row.get(3)?,
        hit_count: row.get(4)?,
        last_hit: from_millis(row, 5)?,
        created_at: from_millis(row, 6)?,
        expires_at: from_millis(row, 7)?,
        quality_score: row.get(8)?,
        metadata,
    })
}

fn row_to_tier(row: &Row<'_>) -> rusqlite::Result<UserTier> {
    let name: String = row.get(1)?;
    let tier_name: TierName = name
        .parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;

    Ok(UserTier {
        user_id: row.get(0)?,
        tier_name,
        daily_limit: row.get(2)?,
        monthly_limit: row.get(3)?,
        priority_bonus: row.get(4)?,
        cache_access: row.get(5)?,
    })
}

fn row_to_usage(row: &Row<'_>) -> rusqlite::Result<UsageStats> {
    let day: String = row.get(1)?;
    let day: NaiveDate = day
        .parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;

    Ok(UsageStats {
        user_id: row.get(0)?,
        day,
        queries_today: row.get(2)?,
        queries_this_month: row.get(3)?,
        streak_days: row.get(4)?,
        avg_daily: row.get(5)?,
    })
}

#[async_trait]
impl CacheStore for SqliteStore {
    async fn find_by_hash(
        &self,
        hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheEntry>, StoreError> {
        let hash = hash.to_string();
        self.call(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM query_cache
                     WHERE hash = ?1 AND expires_at > ?2
                     ORDER BY quality_score DESC LIMIT 1",
                    ENTRY_COLUMNS
                ),
                params![hash, to_millis(now)],
                row_to_entry,
            )
            .optional()
        })
        .await
    }

    async fn find_candidates(
        &self,
        category: &str,
        min_quality: f64,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<CacheEntry>, StoreError> {
        let category = category.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM query_cache
                 WHERE category = ?1 AND quality_score >= ?2 AND expires_at > ?3
                 ORDER BY quality_score DESC LIMIT ?4",
                ENTRY_COLUMNS
            ))?;
            let rows = stmt.query_map(
                params![category, min_quality, to_millis(now), limit as i64],
                row_to_entry,
            )?;
            rows.collect()
        })
        .await
    }

    async fn upsert(&self, entry: &CacheEntry) -> Result<(), StoreError> {
        let entry = entry.clone();
        let metadata = serde_json::to_string(&entry.metadata)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        self.call(move |conn| {
            conn.execute(
                &format!(
                    "INSERT OR REPLACE INTO query_cache ({})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    ENTRY_COLUMNS
                ),
                params![
                    entry.hash,
                    entry.normalized_query,
                    entry.response,
                    entry.category,
                    entry.hit_count,
                    to_millis(entry.last_hit),
                    to_millis(entry.created_at),
                    to_millis(entry.expires_at),
                    entry.quality_score,
                    metadata,
                ],
            )
            .map(|_| ())
        })
        .await
    }

    async fn record_hit(&self, hash: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let hash = hash.to_string();
        self.call(move |conn| {
            conn.execute(
                "UPDATE query_cache SET hit_count = hit_count + 1, last_hit = ?1 WHERE hash = ?2",
                params![to_millis(at), hash],
            )
            .map(|_| ())
        })
        .await
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        self.call(move |conn| {
            conn.execute(
                "DELETE FROM query_cache WHERE expires_at < ?1",
                params![to_millis(now)],
            )
        })
        .await
    }

    async fn delete_unused(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        self.call(move |conn| {
            conn.execute(
                "DELETE FROM query_cache WHERE hit_count = 0 AND created_at < ?1",
                params![to_millis(cutoff)],
            )
        })
        .await
    }

    async fn stats(&self, now: DateTime<Utc>) -> Result<CacheStats, StoreError> {
        self.call(move |conn| {
            let (total, live, hits, avg_quality): (i64, i64, i64, f64) = conn.query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(CASE WHEN expires_at > ?1 THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(hit_count), 0),
                        COALESCE(AVG(quality_score), 0.0)
                 FROM query_cache",
                params![to_millis(now)],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?;

            let mut stmt =
                conn.prepare("SELECT category, COUNT(*) FROM query_cache GROUP BY category")?;
            let by_category = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
                })?
                .collect::<rusqlite::Result<_>>()?;

            Ok(CacheStats {
                total_entries: total as usize,
                live_entries: live as usize,
                expired_entries: (total - live) as usize,
                total_hits: hits as u64,
                avg_quality,
                by_category,
            })
        })
        .await
    }

    async fn clear(&self) -> Result<usize, StoreError> {
        self.call(|conn| conn.execute("DELETE FROM query_cache", [])).await
    }
}

#[async_trait]
impl QuotaStore for SqliteStore {
    async fn load_tier(&self, user_id: &str) -> Result<Option<UserTier>, StoreError> {
        let user_id = user_id.to_string();
        self.call(move |conn| {
            conn.query_row(
                &format!("SELECT {} FROM user_tiers WHERE user_id = ?1", TIER_COLUMNS),
                params![user_id],
                row_to_tier,
            )
            .optional()
        })
        .await
    }

    async fn insert_tier_if_absent(&self, tier: &UserTier) -> Result<UserTier, StoreError> {
        let tier = tier.clone();
        self.call(move |conn| {
            conn.execute(
                &format!(
                    "INSERT OR IGNORE INTO user_tiers ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    TIER_COLUMNS
                ),
                params![
                    tier.user_id,
                    tier.tier_name.as_str(),
                    tier.daily_limit,
                    tier.monthly_limit,
                    tier.priority_bonus,
                    tier.cache_access,
                ],
            )?;
            conn.query_row(
                &format!("SELECT {} FROM user_tiers WHERE user_id = ?1", TIER_COLUMNS),
                params![tier.user_id],
                row_to_tier,
            )
        })
        .await
    }

    async fn save_tier(&self, tier: &UserTier) -> Result<(), StoreError> {
        let tier = tier.clone();
        self.call(move |conn| {
            conn.execute(
                &format!(
                    "INSERT OR REPLACE INTO user_tiers ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    TIER_COLUMNS
                ),
                params![
                    tier.user_id,
                    tier.tier_name.as_str(),
                    tier.daily_limit,
                    tier.monthly_limit,
                    tier.priority_bonus,
                    tier.cache_access,
                ],
            )
            .map(|_| ())
        })
        .await
    }

    async fn load_usage(
        &self,
        user_id: &str,
        day: NaiveDate,
    ) -> Result<Option<UsageStats>, StoreError> {
        let user_id = user_id.to_string();
        self.call(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM usage_stats WHERE user_id = ?1 AND day = ?2",
                    USAGE_COLUMNS
                ),
                params![user_id, day.to_string()],
                row_to_usage,
            )
            .optional()
        })
        .await
    }

    async fn latest_usage_before(
        &self,
        user_id: &str,
        day: NaiveDate,
    ) -> Result<Option<UsageStats>, StoreError> {
        let user_id = user_id.to_string();
        self.call(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM usage_stats
                     WHERE user_id = ?1 AND day < ?2
                     ORDER BY day DESC LIMIT 1",
                    USAGE_COLUMNS
                ),
                params![user_id, day.to_string()],
                row_to_usage,
            )
            .optional()
        })
        .await
    }

    async fn insert_usage_if_absent(&self, usage: &UsageStats) -> Result<UsageStats, StoreError> {
        let usage = usage.clone();
        self.call(move |conn| {
            conn.execute(
                &format!(
                    "INSERT OR IGNORE INTO usage_stats ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    USAGE_COLUMNS
                ),
                params![
                    usage.user_id,
                    usage.day.to_string(),
                    usage.queries_today,
                    usage.queries_this_month,
                    usage.streak_days,
                    usage.avg_daily,
                ],
            )?;
            conn.query_row(
                &format!(
                    "SELECT {} FROM usage_stats WHERE user_id = ?1 AND day = ?2",
                    USAGE_COLUMNS
                ),
                params![usage.user_id, usage.day.to_string()],
                row_to_usage,
            )
        })
        .await
    }

    async fn try_consume(
        &self,
        user_id: &str,
        day: NaiveDate,
        daily_limit: u32,
        monthly_limit: u32,
    ) -> Result<Option<UsageStats>, StoreError> {
        use chrono::Datelike;

        let user_id = user_id.to_string();
        let day_of_month = f64::from(day.day());
        self.call(move |conn| {
            conn.query_row(
                &format!(
                    "UPDATE usage_stats
                     SET queries_today = queries_today + 1,
                         queries_this_month = queries_this_month + 1,
                         avg_daily = CAST(queries_this_month + 1 AS REAL) / ?5
                     WHERE user_id = ?1 AND day = ?2
                       AND queries_today < ?3 AND queries_this_month < ?4
                     RETURNING {}",
                    USAGE_COLUMNS
                ),
                params![user_id, day.to_string(), daily_limit, monthly_limit, day_of_month],
                row_to_usage,
            )
            .optional()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(hash: &str, category: &str, quality: f64, expires_in: Duration) -> CacheEntry {
        let now = Utc::now();
        CacheEntry {
            hash: hash.to_string(),
            normalized_query: format!("consulta {}|{}", hash, category),
            response: "resposta".to_string(),
            category: category.to_string(),
            hit_count: 0,
            last_hit: now,
            created_at: now,
            expires_at: now + expires_in,
            quality_score: quality,
            metadata: CacheMetadata::from_provider("gpt-4o").with_tokens(42),
        }
    }

    #[tokio::test]
    async fn test_upsert_and_find() {
        let store = SqliteStore::open_in_memory().unwrap();
        let e = entry("abc", "dor", 0.7, Duration::hours(1));
        store.upsert(&e).await.unwrap();

        let found = store.find_by_hash("abc", Utc::now()).await.unwrap().unwrap();
        assert_eq!(found.response, "resposta");
        assert_eq!(found.metadata.tokens, Some(42));
        assert_eq!(found.created_at.timestamp_millis(), e.created_at.timestamp_millis());
    }

    #[tokio::test]
    async fn test_expired_not_found() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .upsert(&entry("old", "dor", 0.9, Duration::hours(-1)))
            .await
            .unwrap();

        assert!(store.find_by_hash("old", Utc::now()).await.unwrap().is_none());
        let candidates = store.find_candidates("dor", 0.0, 50, Utc::now()).await.unwrap();
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn test_candidates_filtered_and_ordered() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert(&entry("a", "dor", 0.75, Duration::hours(1))).await.unwrap();
        store.upsert(&entry("b", "dor", 0.95, Duration::hours(1))).await.unwrap();
        store.upsert(&entry("c", "dor", 0.5, Duration::hours(1))).await.unwrap();
        store.upsert(&entry("d", "sono", 0.9, Duration::hours(1))).await.unwrap();

        let found = store.find_candidates("dor", 0.7, 50, Utc::now()).await.unwrap();
        let hashes: Vec<_> = found.iter().map(|e| e.hash.as_str()).collect();
        assert_eq!(hashes, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_record_hit() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert(&entry("abc", "dor", 0.7, Duration::hours(1))).await.unwrap();
        store.record_hit("abc", Utc::now()).await.unwrap();
        store.record_hit("abc", Utc::now()).await.unwrap();

        let found = store.find_by_hash("abc", Utc::now()).await.unwrap().unwrap();
        assert_eq!(found.hit_count, 2);
    }

    #[tokio::test]
    async fn test_try_consume_is_conditional() {
        let store = SqliteStore::open_in_memory().unwrap();
        let day = Utc::now().date_naive();
        let mut usage = UsageStats::open_day("u1", day, None);
        usage.queries_today = 1;
        store.insert_usage_if_absent(&usage).await.unwrap();

        let updated = store.try_consume("u1", day, 2, 100).await.unwrap().unwrap();
        assert_eq!(updated.queries_today, 2);
        assert_eq!(updated.queries_this_month, 1);

        assert!(store.try_consume("u1", day, 2, 100).await.unwrap().is_none());
        let stored = store.load_usage("u1", day).await.unwrap().unwrap();
        assert_eq!(stored.queries_today, 2);
    }

    #[tokio::test]
    async fn test_tier_insert_if_absent_keeps_existing() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .save_tier(&UserTier::new("u1", TierName::Premium))
            .await
            .unwrap();

        let kept = store
            .insert_tier_if_absent(&UserTier::new("u1", TierName::Free))
            .await
            .unwrap();
        assert_eq!(kept.tier_name, TierName::Premium);
        assert_eq!(kept.daily_limit, 200);
    }

    #[tokio::test]
    async fn test_open_file_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.upsert(&entry("abc", "dor", 0.7, Duration::hours(1))).await.unwrap();
        }

        let reopened = SqliteStore::open(&path).unwrap();
        assert!(reopened.find_by_hash("abc", Utc::now()).await.unwrap().is_some());
    }
}
