//! Loudness measurement cache.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Result as SqliteResult};
use serde::{Deserialize, Serialize};

use super::{
    db_size, open_connection, placeholders, purge_stale_rows, CacheStats, FileIdentity,
    BATCH_CHUNK,
};

/// Loudness measurement of one file against one target level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub integrated_lufs: Option<f64>,
    pub true_peak: Option<f64>,
    pub lra: Option<f64>,
    pub threshold: Option<f64>,
    pub gain_db: Option<f64>,
}

/// Cache key for a measurement parameter, rounded to hundredths.
pub fn param_key(param: f64) -> i64 {
    (param * 100.0).round() as i64
}

/// Persistent cache of loudness measurements keyed by (path, parameter).
pub struct MeasurementCache {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl MeasurementCache {
    /// Open or create a cache database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> SqliteResult<Self> {
        let path = path.as_ref();
        let conn = open_connection(path)?;
        let cache = Self {
            conn: Mutex::new(conn),
            db_path: Some(path.to_path_buf()),
        };
        cache.create_tables()?;
        Ok(cache)
    }

    /// Open an in-memory cache (for testing).
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
            CREATE TABLE IF NOT EXISTS measurements (
                file_path       TEXT    NOT NULL,
                param_key       INTEGER NOT NULL,
                mtime_ns        INTEGER NOT NULL,
                file_size       INTEGER NOT NULL,
                integrated_lufs REAL,
                true_peak       REAL,
                lra             REAL,
                threshold       REAL,
                gain_db         REAL,
                measured_at     TEXT    NOT NULL,
                PRIMARY KEY (file_path, param_key)
            );
            "#,
        )
    }

    /// Look up a measurement. Stale or missing entries yield `None`.
    pub fn get(&self, file_path: &str, param: f64) -> SqliteResult<Option<Measurement>> {
        let Some(identity) = FileIdentity::of(Path::new(file_path)) else {
            return Ok(None);
        };

        let conn = self.conn.lock();
        let row = conn
            .query_row(
                r#"
                SELECT mtime_ns, file_size, integrated_lufs, true_peak, lra, threshold, gain_db
                FROM measurements WHERE file_path = ?1 AND param_key = ?2
                "#,
                params![file_path, param_key(param)],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        Measurement {
                            integrated_lufs: row.get(2)?,
                            true_peak: row.get(3)?,
                            lra: row.get(4)?,
                            threshold: row.get(5)?,
                            gain_db: row.get(6)?,
                        },
                    ))
                },
            )
            .optional()?;

        Ok(row.and_then(|(mtime_ns, size, measurement)| {
            identity.matches(size, mtime_ns).then_some(measurement)
        }))
    }

    /// Store a measurement, replacing any previous one.
    ///
    /// Does nothing if the file no longer exists.
    pub fn put(
        &self,
        file_path: &str,
        param: f64,
        measurement: &Measurement,
    ) -> SqliteResult<()> {
        let Some(identity) = FileIdentity::of(Path::new(file_path)) else {
            log::debug!("Not caching measurement for missing file {}", file_path);
            return Ok(());
        };

        self.conn.lock().execute(
            r#"
            INSERT OR REPLACE INTO measurements (
                file_path, param_key, mtime_ns, file_size,
                integrated_lufs, true_peak, lra, threshold, gain_db, measured_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                file_path,
                param_key(param),
                identity.mtime_ns,
                identity.size as i64,
                measurement.integrated_lufs,
                measurement.true_peak,
                measurement.lra,
                measurement.threshold,
                measurement.gain_db,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Look up many files at once. Only valid hits are returned.
    pub fn get_batch<S: AsRef<str>>(
        &self,
        file_paths: &[S],
        param: f64,
    ) -> SqliteResult<HashMap<String, Measurement>> {
        let mut hits = HashMap::new();
        let key = param_key(param);
        let conn = self.conn.lock();

        for chunk in file_paths.chunks(BATCH_CHUNK) {
            let sql = format!(
                "SELECT file_path, mtime_ns, file_size, integrated_lufs, true_peak, lra, threshold, gain_db \
                 FROM measurements WHERE param_key = ? AND file_path IN ({})",
                placeholders(chunk.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let values = std::iter::once(rusqlite::types::Value::Integer(key)).chain(
                chunk
                    .iter()
                    .map(|p| rusqlite::types::Value::Text(p.as_ref().to_string())),
            );
            let rows = stmt.query_map(params_from_iter(values), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    Measurement {
                        integrated_lufs: row.get(3)?,
                        true_peak: row.get(4)?,
                        lra: row.get(5)?,
                        threshold: row.get(6)?,
                        gain_db: row.get(7)?,
                    },
                ))
            })?;

            for row in rows {
                let (path, mtime_ns, size, measurement) = row?;
                let fresh = FileIdentity::of(Path::new(&path))
                    .is_some_and(|identity| identity.matches(size, mtime_ns));
                if fresh {
                    hits.insert(path, measurement);
                }
            }
        }

        Ok(hits)
    }

    /// Remove every entry for a file.
    pub fn invalidate(&self, file_path: &str) -> SqliteResult<usize> {
        self.conn
            .lock()
            .execute("DELETE FROM measurements WHERE file_path = ?1", params![file_path])
    }

    /// Remove all entries.
    pub fn clear(&self) -> SqliteResult<usize> {
        self.conn.lock().execute("DELETE FROM measurements", [])
    }

    pub fn stats(&self) -> SqliteResult<CacheStats> {
        let count: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM measurements", [], |row| row.get(0))?;
        Ok(CacheStats {
            count: count as usize,
            size_bytes: db_size(self.db_path.as_deref()),
        })
    }

    /// Delete entries whose file changed or disappeared.
    pub fn purge_stale(&self) -> SqliteResult<usize> {
        let removed = purge_stale_rows(&mut self.conn.lock(), "measurements", "param_key")?;
        if removed > 0 {
            log::info!("Purged {} stale measurement(s)", removed);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    fn sample() -> Measurement {
        Measurement {
            integrated_lufs: Some(-9.5),
            true_peak: Some(-0.3),
            lra: Some(6.1),
            threshold: Some(-19.8),
            gain_db: Some(-4.5),
        }
    }

    #[test]
    fn test_param_key_rounding() {
        assert_eq!(param_key(-14.0), -1400);
        assert_eq!(param_key(-14.004), -1400);
        assert_eq!(param_key(-13.996), -1400);
        assert_ne!(param_key(-14.0), param_key(-16.0));
    }

    #[test]
    fn test_put_and_get() {
        let dir = TempDir::new().unwrap();
        let audio = dir.path().join("song.mp3");
        fs::write(&audio, b"audio bytes").unwrap();
        let path = audio.to_str().unwrap();

        let cache = MeasurementCache::open_in_memory().unwrap();
        assert!(cache.get(path, -14.0).unwrap().is_none());

        cache.put(path, -14.0, &sample()).unwrap();
        assert_eq!(cache.get(path, -14.0).unwrap(), Some(sample()));
        assert_eq!(cache.get(path, -14.001).unwrap(), Some(sample()));
        assert!(cache.get(path, -16.0).unwrap().is_none());
    }

    #[test]
    fn test_put_missing_file_is_noop() {
        let cache = MeasurementCache::open_in_memory().unwrap();
        cache.put("/no/such/file.mp3", -14.0, &sample()).unwrap();
        assert_eq!(cache.stats().unwrap().count, 0);
    }

    #[test]
    fn test_size_change_invalidates() {
        let dir = TempDir::new().unwrap();
        let audio = dir.path().join("song.mp3");
        fs::write(&audio, b"audio bytes").unwrap();
        let path = audio.to_str().unwrap();

        let cache = MeasurementCache::open_in_memory().unwrap();
        cache.put(path, -14.0, &sample()).unwrap();

        fs::write(&audio, b"different audio bytes").unwrap();
        assert!(cache.get(path, -14.0).unwrap().is_none());
        assert_eq!(cache.purge_stale().unwrap(), 1);
        assert_eq!(cache.stats().unwrap().count, 0);
    }

    #[test]
    fn test_get_batch_and_invalidate() {
        let dir = TempDir::new().unwrap();
        let mut paths = Vec::new();
        for i in 0..3 {
            let audio = dir.path().join(format!("{}.mp3", i));
            fs::write(&audio, format!("audio {}", i)).unwrap();
            paths.push(audio.to_str().unwrap().to_string());
        }

        let cache = MeasurementCache::open_in_memory().unwrap();
        cache.put(&paths[0], -14.0, &sample()).unwrap();
        cache.put(&paths[1], -14.0, &sample()).unwrap();
        cache.put(&paths[1], -16.0, &sample()).unwrap();

        let hits = cache.get_batch(&paths, -14.0).unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.contains_key(&paths[0]));
        assert!(!hits.contains_key(&paths[2]));

        assert_eq!(cache.invalidate(&paths[1]).unwrap(), 2);
        assert_eq!(cache.get_batch(&paths, -14.0).unwrap().len(), 1);

        cache.clear().unwrap();
        assert_eq!(cache.stats().unwrap().count, 0);
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("nested").join("m.db");
        let cache = MeasurementCache::open(&db_path).unwrap();
        assert_eq!(cache.stats().unwrap().count, 0);
        assert!(db_path.exists());
    }
}
