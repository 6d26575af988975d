//! Database query modules.

pub mod cache;
pub mod leases;
pub mod tasks;

use cf_core::{Error, Result};
use rusqlite::Connection;

/// Serialize a value into a JSON TEXT column.
pub(crate) fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::Internal(format!("json encode: {e}")))
}

/// Run `f` inside a `BEGIN IMMEDIATE` transaction.
///
/// Taking the write lock up front makes a select-then-update sequence atomic
/// with respect to other connections, which wait on the busy timeout instead
/// of failing on a stale snapshot.
pub(crate) fn immediate<T>(
    conn: &Connection,
    f: impl FnOnce(&Connection) -> Result<T>,
) -> Result<T> {
    conn.execute_batch("BEGIN IMMEDIATE")
        .map_err(|e| Error::database(e.to_string()))?;

    match f(conn) {
        Ok(value) => {
            conn.execute_batch("COMMIT")
                .map_err(|e| Error::database(e.to_string()))?;
            Ok(value)
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}
