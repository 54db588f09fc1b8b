//! SQLite-backed caches keyed by file identity.
//!
//! An entry stays valid only while the file's size and modification time
//! match what was recorded when it was stored.

mod analysis;
mod measurement;

use std::fs;
use std::path::Path;
use std::time::{Duration, UNIX_EPOCH};

use rusqlite::types::Value;
use rusqlite::{params, Connection, Result as SqliteResult};
use serde::Serialize;

pub use analysis::AnalysisCache;
pub use measurement::{param_key, Measurement, MeasurementCache};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum host parameters per `IN (...)` query.
const BATCH_CHUNK: usize = 500;

/// Size and modification time of a file at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileIdentity {
    pub size: u64,
    /// Nanoseconds since the Unix epoch.
    pub mtime_ns: i64,
}

impl FileIdentity {
    /// Stat `path`. Returns `None` if it cannot be read.
    pub fn of(path: &Path) -> Option<Self> {
        let metadata = fs::metadata(path).ok()?;
        let modified = metadata.modified().ok()?;
        let mtime_ns = match modified.duration_since(UNIX_EPOCH) {
            Ok(after) => i64::try_from(after.as_nanos()).ok()?,
            Err(before) => -i64::try_from(before.duration().as_nanos()).ok()?,
        };
        Some(Self {
            size: metadata.len(),
            mtime_ns,
        })
    }

    fn matches(&self, size: i64, mtime_ns: i64) -> bool {
        i64::try_from(self.size).is_ok_and(|s| s == size) && self.mtime_ns == mtime_ns
    }
}

/// Entry count and on-disk size of a cache database.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub count: usize,
    pub size_bytes: u64,
}

fn open_connection(path: &Path) -> rusqlite::Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = fs::create_dir_all(parent) {
                log::warn!("Failed to create {}: {}", parent.display(), e);
            }
        }
    }
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;

    // Enable WAL mode for better concurrent access
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

/// Size of a database file together with its `-wal` and `-shm` files.
fn db_size(path: Option<&Path>) -> u64 {
    let Some(path) = path else {
        return 0;
    };
    let mut total = 0;
    for suffix in ["", "-wal", "-shm"] {
        let mut file = path.as_os_str().to_owned();
        file.push(suffix);
        if let Ok(metadata) = fs::metadata(&file) {
            total += metadata.len();
        }
    }
    total
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(",")
}

/// Delete rows of `table` whose file no longer matches its recorded identity.
fn purge_stale_rows(
    conn: &mut Connection,
    table: &str,
    key_column: &str,
) -> SqliteResult<usize> {
    let entries: Vec<(String, Value, i64, i64)> = {
        let mut stmt = conn.prepare(&format!(
            "SELECT file_path, {}, mtime_ns, file_size FROM {}",
            key_column, table
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?;
        rows.collect::<SqliteResult<_>>()?
    };

    let tx = conn.transaction()?;
    let mut removed = 0;
    {
        let mut delete = tx.prepare(&format!(
            "DELETE FROM {} WHERE file_path = ?1 AND {} = ?2",
            table, key_column
        ))?;
        for (path, key, mtime_ns, size) in entries {
            let fresh = FileIdentity::of(Path::new(&path))
                .is_some_and(|identity| identity.matches(size, mtime_ns));
            if !fresh {
                removed += delete.execute(params![path, key])?;
            }
        }
    }
    tx.commit()?;
    Ok(removed)
}
