//! Cache of per-file analysis results (energy, mood, ...).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult};

use super::{db_size, open_connection, purge_stale_rows, CacheStats, FileIdentity};

/// Persistent cache of analysis results keyed by (path, analysis type).
pub struct AnalysisCache {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl AnalysisCache {
    pub fn open<P: AsRef<Path>>(path: P) -> SqliteResult<Self> {
        let path = path.as_ref();
        let cache = Self {
            conn: Mutex::new(open_connection(path)?),
            db_path: Some(path.to_path_buf()),
        };
        cache.create_tables()?;
        Ok(cache)
    }

    pub fn open_in_memory() -> SqliteResult<Self> {
        let cache = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            db_path: None,
        };
        cache.create_tables()?;
        Ok(cache)
    }

    fn create_tables(&self) -> SqliteResult<()> {
        self.conn.lock().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS analysis_results (
                file_path     TEXT    NOT NULL,
                analysis_type TEXT    NOT NULL,
                mtime_ns      INTEGER NOT NULL,
                file_size     INTEGER NOT NULL,
                result_value  TEXT,
                analyzed_at   TEXT    NOT NULL,
                PRIMARY KEY (file_path, analysis_type)
            );
            "#,
        )
    }

    pub fn get(&self, file_path: &str, analysis_type: &str) -> SqliteResult<Option<String>> {
        let Some(identity) = FileIdentity::of(Path::new(file_path)) else {
            return Ok(None);
        };

        let row: Option<(i64, i64, Option<String>)> = self
            .conn
            .lock()
            .query_row(
                "SELECT mtime_ns, file_size, result_value FROM analysis_results \
                 WHERE file_path = ?1 AND analysis_type = ?2",
                params![file_path, analysis_type],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        Ok(row.and_then(|(mtime_ns, size, value)| {
            if identity.matches(size, mtime_ns) {
                value
            } else {
                None
            }
        }))
    }

    pub fn put(&self, file_path: &str, analysis_type: &str, value: &str) -> SqliteResult<()> {
        let Some(identity) = FileIdentity::of(Path::new(file_path)) else {
            return Ok(());
        };

        self.conn.lock().execute(
            r#"
            INSERT OR REPLACE INTO analysis_results (
                file_path, analysis_type, mtime_ns, file_size, result_value, analyzed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                file_path,
                analysis_type,
                identity.mtime_ns,
                identity.size as i64,
                value,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_batch<S: AsRef<str>>(
        &self,
        file_paths: &[S],
        analysis_type: &str,
    ) -> SqliteResult<HashMap<String, String>> {
        let mut hits = HashMap::new();
        for path in file_paths {
            if let Some(value) = self.get(path.as_ref(), analysis_type)? {
                hits.insert(path.as_ref().to_string(), value);
            }
        }
        Ok(hits)
    }

    pub fn invalidate(&self, file_path: &str) -> SqliteResult<usize> {
        self.conn.lock().execute(
            "DELETE FROM analysis_results WHERE file_path = ?1",
            params![file_path],
        )
    }

    pub fn clear(&self) -> SqliteResult<usize> {
        self.conn.lock().execute("DELETE FROM analysis_results", [])
    }

    pub fn stats(&self) -> SqliteResult<CacheStats> {
        let count: i64 = self.conn.lock().query_row(
            "SELECT COUNT(*) FROM analysis_results",
            [],
            |row| row.get(0),
        )?;
        Ok(CacheStats {
            count: count as usize,
            size_bytes: db_size(self.db_path.as_deref()),
        })
    }

    /// Delete results whose file changed or disappeared.
    pub fn purge_stale(&self) -> SqliteResult<usize> {
        let removed =
            purge_stale_rows(&mut self.conn.lock(), "analysis_results", "analysis_type")?;
        if removed > 0 {
            log::info!("Purged {} stale analysis result(s)", removed);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_results_are_keyed_by_type() {
        let dir = TempDir::new().unwrap();
        let audio = dir.path().join("track.flac");
        fs::write(&audio, b"flac").unwrap();
        let path = audio.to_str().unwrap();

        let cache = AnalysisCache::open_in_memory().unwrap();
        cache.put(path, "energy", "7").unwrap();
        cache.put(path, "mood", "happy").unwrap();

        assert_eq!(cache.get(path, "energy").unwrap().as_deref(), Some("7"));
        assert_eq!(cache.get(path, "mood").unwrap().as_deref(), Some("happy"));
        assert!(cache.get(path, "mik").unwrap().is_none());
        assert_eq!(cache.stats().unwrap().count, 2);

        let hits = cache.get_batch(&[path, "/missing.mp3"], "mood").unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_stale_after_rewrite() {
        let dir = TempDir::new().unwrap();
        let audio = dir.path().join("track.flac");
        fs::write(&audio, b"flac").unwrap();
        let path = audio.to_str().unwrap();

        let cache = AnalysisCache::open_in_memory().unwrap();
        cache.put(path, "energy", "5").unwrap();
        fs::write(&audio, b"re-encoded flac").unwrap();
        assert!(cache.get(path, "energy").unwrap().is_none());

        assert_eq!(cache.stats().unwrap().count, 1);
        assert_eq!(cache.purge_stale().unwrap(), 1);
        assert_eq!(cache.invalidate(path).unwrap(), 0);
        cache.put(path, "energy", "6").unwrap();
        assert_eq!(cache.clear().unwrap(), 1);
    }
}
