//! Result cache entries keyed by content hash.

use std::time::Duration;

use cf_core::{Error, OperationType, Result};
use rusqlite::Connection;

use crate::models::CacheEntry;
use crate::queries::to_json;
use crate::timestamp;

const COLS: &str = "cache_key, op_type, output_files, created_at, expires_at";

/// Look up an unexpired cache entry.
pub fn get_cache_entry(conn: &Connection, cache_key: &str) -> Result<Option<CacheEntry>> {
    let q = format!("SELECT {COLS} FROM cache_entries WHERE cache_key = ?1 AND expires_at > ?2");
    let result = conn.query_row(
        &q,
        rusqlite::params![cache_key, timestamp::now()],
        CacheEntry::from_row,
    );
    match result {
        Ok(entry) => Ok(Some(entry)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Insert or replace the entry for `cache_key`.
pub fn put_cache_entry(
    conn: &Connection,
    cache_key: &str,
    op_type: OperationType,
    output_files: &[String],
    ttl: Duration,
) -> Result<CacheEntry> {
    let q = format!(
        "INSERT INTO cache_entries (cache_key, op_type, output_files, created_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(cache_key) DO UPDATE SET
            op_type = excluded.op_type,
            output_files = excluded.output_files,
            created_at = excluded.created_at,
            expires_at = excluded.expires_at
         RETURNING {COLS}"
    );
    conn.query_row(
        &q,
        rusqlite::params![
            cache_key,
            op_type.as_str(),
            to_json(output_files)?,
            timestamp::now(),
            timestamp::after(ttl)?
        ],
        CacheEntry::from_row,
    )
    .map_err(|e| Error::database(e.to_string()))
}

/// Remove an entry. Returns `true` if one existed.
pub fn delete_cache_entry(conn: &Connection, cache_key: &str) -> Result<bool> {
    let n = conn
        .execute("DELETE FROM cache_entries WHERE cache_key = ?1", [cache_key])
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Delete expired entries, returning how many were removed.
pub fn purge_expired(conn: &Connection) -> Result<usize> {
    conn.execute(
        "DELETE FROM cache_entries WHERE expires_at <= ?1",
        [timestamp::now()],
    )
    .map_err(|e| Error::database(e.to_string()))
}
