//! SQLite connection pooling.
//!
//! Task state is shared by every worker process that opens the same file, so
//! file-backed connections run in WAL mode with a busy timeout: a writer
//! waits for another process's `BEGIN IMMEDIATE` instead of failing.

use std::sync::atomic::{AtomicU64, Ordering};

use cf_core::config::DatabaseConfig;
use cf_core::{Error, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::migrations;

pub type DbPool = Pool<SqliteConnectionManager>;

pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Open the database at `config.path`, creating and migrating it as needed.
pub fn init_pool(config: &DatabaseConfig) -> Result<DbPool> {
    let pragmas = format!(
        "PRAGMA foreign_keys = ON;
         PRAGMA journal_mode = WAL;
         PRAGMA busy_timeout = {};",
        config.busy_timeout_ms
    );
    let manager = SqliteConnectionManager::file(&config.path)
        .with_init(move |conn| conn.execute_batch(&pragmas));

    tracing::debug!(
        path = %config.path.display(),
        max_connections = config.max_connections,
        "Opening task database"
    );
    build(manager, config.max_connections)
}

/// A private in-memory database, shared by the connections of one pool.
pub fn init_memory_pool() -> Result<DbPool> {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    let uri = format!(
        "file:clipforge_{}?mode=memory&cache=shared",
        NEXT.fetch_add(1, Ordering::Relaxed)
    );
    let manager = SqliteConnectionManager::file(uri)
        .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
    build(manager, 4)
}

fn build(manager: SqliteConnectionManager, max_size: u32) -> Result<DbPool> {
    if max_size == 0 {
        return Err(Error::Validation("database.max_connections must be at least 1".into()));
    }
    let pool = Pool::builder()
        .max_size(max_size)
        .build(manager)
        .map_err(|e| Error::database(format!("Failed to create connection pool: {e}")))?;
    migrations::run_migrations(&*get_conn(&pool)?)?;
    Ok(pool)
}

pub fn get_conn(pool: &DbPool) -> Result<PooledConnection> {
    pool.get()
        .map_err(|e| Error::database(format!("Failed to get connection from pool: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pragma<T: rusqlite::types::FromSql>(pool: &DbPool, name: &str) -> T {
        get_conn(pool)
            .unwrap()
            .query_row(&format!("PRAGMA {name}"), [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn memory_pools_are_isolated_and_migrated() {
        let a = init_memory_pool().unwrap();
        let b = init_memory_pool().unwrap();
        get_conn(&a)
            .unwrap()
            .execute_batch("DELETE FROM tasks; DROP TABLE cache_entries;")
            .unwrap();

        let tables = |pool: &DbPool| -> i64 {
            get_conn(pool)
                .unwrap()
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master
                     WHERE type = 'table' AND name = 'cache_entries'",
                    [],
                    |row| row.get(0),
                )
                .unwrap()
        };
        assert_eq!(tables(&a), 0);
        assert_eq!(tables(&b), 1);
        assert_eq!(pragma::<i32>(&b, "foreign_keys"), 1);
    }

    #[test]
    fn file_pool_follows_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            path: dir.path().join("clipforge.db"),
            max_connections: 3,
            busy_timeout_ms: 1234,
        };
        let pool = init_pool(&config).unwrap();

        assert_eq!(pool.max_size(), 3);
        assert_eq!(pragma::<String>(&pool, "journal_mode").to_lowercase(), "wal");
        assert_eq!(pragma::<i64>(&pool, "busy_timeout"), 1234);
    }

    #[test]
    fn zero_connections_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            path: dir.path().join("clipforge.db"),
            max_connections: 0,
            ..Default::default()
        };
        assert!(init_pool(&config).unwrap_err().is_validation());
    }
}
