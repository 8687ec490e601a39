//! Connection PRAGMAs applied to every SQLite handle the indexer opens

use rusqlite::Connection;

/// WAL journal, NORMAL sync, in-memory temp store and a busy timeout so the
/// aggregation loop and the ingestion cycles can share one file.
pub fn apply_optimized_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    Ok(())
}
