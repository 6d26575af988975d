//! [`ResultCache`] backed by the `cache_entries` table, shared by every
//! worker process that opens the same database.

use std::time::Duration;

use cf_core::{OperationType, Result};
use cf_db::pool::{get_conn, DbPool};
use cf_db::queries::cache;
use cf_pipeline::{CacheKey, CachedResult, ResultCache};

pub struct SqliteResultCache {
    db: DbPool,
    ttl: Duration,
}

impl SqliteResultCache {
    pub fn new(db: DbPool, ttl: Duration) -> Self {
        Self { db, ttl }
    }

    /// Delete expired entries, returning how many were removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let conn = get_conn(&self.db)?;
        cache::purge_expired(&conn)
    }
}

impl ResultCache for SqliteResultCache {
    fn get(&self, key: &CacheKey) -> Result<Option<CachedResult>> {
        let conn = get_conn(&self.db)?;
        Ok(cache::get_cache_entry(&conn, key.as_str())?.map(|entry| CachedResult {
            output_files: entry.output_files,
        }))
    }

    fn put(&self, key: &CacheKey, op_type: OperationType, outputs: &[String]) -> Result<()> {
        let conn = get_conn(&self.db)?;
        cache::put_cache_entry(&conn, key.as_str(), op_type, outputs, self.ttl)?;
        Ok(())
    }

    fn invalidate(&self, key: &CacheKey) -> Result<()> {
        let conn = get_conn(&self.db)?;
        cache::delete_cache_entry(&conn, key.as_str())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_db::pool::init_memory_pool;
    use serde_json::json;

    #[test]
    fn put_get_invalidate() {
        let cache = SqliteResultCache::new(init_memory_pool().unwrap(), Duration::from_secs(60));
        let key = CacheKey::compute(OperationType::Join, &["b".into(), "a".into()], &json!({}));

        assert_eq!(cache.get(&key).unwrap(), None);
        cache.put(&key, OperationType::Join, &["out.mp4".into()]).unwrap();
        assert_eq!(
            cache.get(&key).unwrap(),
            Some(CachedResult {
                output_files: vec!["out.mp4".into()]
            })
        );

        cache.invalidate(&key).unwrap();
        assert_eq!(cache.get(&key).unwrap(), None);
    }

    #[test]
    fn zero_ttl_never_hits() {
        let cache = SqliteResultCache::new(init_memory_pool().unwrap(), Duration::ZERO);
        let key = CacheKey::compute(OperationType::Join, &["a".into()], &json!({}));
        cache.put(&key, OperationType::Join, &["out.mp4".into()]).unwrap();
        assert_eq!(cache.get(&key).unwrap(), None);
        assert_eq!(cache.purge_expired().unwrap(), 1);
    }
}
