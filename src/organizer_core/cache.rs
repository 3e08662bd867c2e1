//! Persistent metadata cache keyed by absolute path.
//!
//! An entry is only served while the file still exists with the same
//! modification time and size, and while it is younger than the TTL.

use crate::organizer_core::error::{OrganizerError, Result};
use crate::organizer_core::metadata::MetadataMap;
use rusqlite::{Connection, OptionalExtension, params};
use rusqlite_migration::{M, Migrations};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub trait MetadataCache: Send + Sync {
    fn get(&self, path: &Path) -> Option<MetadataMap>;
    fn put(&self, path: &Path, metadata: &MetadataMap) -> Result<()>;
    fn invalidate(&self, path: &Path) -> Result<()>;
    /// Drop every entry, returning how many were removed.
    fn clear(&self) -> Result<usize>;
}

/// Caching disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

impl MetadataCache for NoCache {
    fn get(&self, _path: &Path) -> Option<MetadataMap> {
        None
    }

    fn put(&self, _path: &Path, _metadata: &MetadataMap) -> Result<()> {
        Ok(())
    }

    fn invalidate(&self, _path: &Path) -> Result<()> {
        Ok(())
    }

    fn clear(&self) -> Result<usize> {
        Ok(0)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

pub struct SqliteMetadataCache {
    conn: Mutex<Connection>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Modification time (ns since epoch) and size of a file.
fn fingerprint(path: &Path) -> Option<(i64, i64)> {
    let meta = fs::metadata(path).ok()?;
    if !meta.is_file() {
        return None;
    }
    let mtime = meta.modified().ok()?.duration_since(UNIX_EPOCH).ok()?;
    Some((mtime.as_nanos() as i64, meta.len() as i64))
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn cache_key(path: &Path) -> String {
    std::path::absolute(path)
        .unwrap_or_else(|_| PathBuf::from(path))
        .to_string_lossy()
        .to_string()
}

impl SqliteMetadataCache {
    /// Connect to the cache database at the specified path. Run migrations if necessary.
    pub fn new(path: &Path, ttl: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::with_connection(conn, ttl)
    }

    pub fn in_memory(ttl: Duration) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, ttl)
    }

    fn with_connection(mut conn: Connection, ttl: Duration) -> Result<Self> {
        let migrations = Migrations::new(vec![M::up(
            r#"
            CREATE TABLE IF NOT EXISTS metadata_cache (
                path TEXT PRIMARY KEY,
                file_mtime INTEGER NOT NULL,
                file_size INTEGER NOT NULL,
                cached_at INTEGER NOT NULL,
                metadata TEXT NOT NULL
            );
            "#,
        )]);
        migrations.to_latest(&mut conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| OrganizerError::Other("metadata cache lock poisoned".to_string()))
    }

    fn lookup(&self, path: &Path) -> Result<Option<MetadataMap>> {
        let Some((mtime, size)) = fingerprint(path) else {
            return Ok(None);
        };
        let conn = self.connection()?;
        let row: Option<(i64, i64, i64, String)> = conn
            .query_row(
                "SELECT file_mtime, file_size, cached_at, metadata FROM metadata_cache WHERE path = ?1",
                params![cache_key(path)],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        let Some((cached_mtime, cached_size, cached_at, json)) = row else {
            return Ok(None);
        };
        let age = now_secs().saturating_sub(cached_at);
        if cached_mtime != mtime || cached_size != size || age >= self.ttl.as_secs() as i64 {
            log::debug!("Stale metadata cache entry for {}", path.display());
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&json)?))
    }

    /// Remove entries older than the TTL.
    pub fn purge_expired(&self) -> Result<usize> {
        let cutoff = now_secs() - self.ttl.as_secs() as i64;
        let conn = self.connection()?;
        Ok(conn.execute(
            "DELETE FROM metadata_cache WHERE cached_at <= ?1",
            params![cutoff],
        )?)
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let conn = self.connection()?;
        let entries: i64 =
            conn.query_row("SELECT COUNT(*) FROM metadata_cache", [], |row| row.get(0))?;
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: entries as usize,
        })
    }
}

impl MetadataCache for SqliteMetadataCache {
    fn get(&self, path: &Path) -> Option<MetadataMap> {
        match self.lookup(path) {
            Ok(Some(map)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(map)
            }
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                log::warn!("Metadata cache lookup failed for {}: {}", path.display(), e);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn put(&self, path: &Path, metadata: &MetadataMap) -> Result<()> {
        let Some((mtime, size)) = fingerprint(path) else {
            return Err(OrganizerError::PathNotFound(path.to_path_buf()));
        };
        let json = serde_json::to_string(metadata)?;
        let conn = self.connection()?;
        conn.execute(
            "INSERT OR REPLACE INTO metadata_cache (path, file_mtime, file_size, cached_at, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![cache_key(path), mtime, size, now_secs(), json],
        )?;
        Ok(())
    }

    fn invalidate(&self, path: &Path) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "DELETE FROM metadata_cache WHERE path = ?1",
            params![cache_key(path)],
        )?;
        Ok(())
    }

    fn clear(&self) -> Result<usize> {
        let conn = self.connection()?;
        Ok(conn.execute("DELETE FROM metadata_cache", [])?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::organizer_core::metadata::MetadataValue;
    use assert_fs::TempDir;
    use assert_fs::prelude::*;

    fn sample() -> MetadataMap {
        let mut map = MetadataMap::new();
        map.insert("Make".into(), MetadataValue::text("Canon"));
        map.insert("FileSize".into(), MetadataValue::Integer(5));
        map
    }

    #[test]
    fn test_hit_after_put() {
        let temp = TempDir::new().unwrap();
        let file = temp.child("a.jpg");
        file.write_binary(b"12345").unwrap();

        let cache = SqliteMetadataCache::in_memory(Duration::from_secs(60)).unwrap();
        assert!(cache.get(file.path()).is_none());
        cache.put(file.path(), &sample()).unwrap();
        assert_eq!(cache.get(file.path()), Some(sample()));

        let stats = cache.stats().unwrap();
        assert_eq!(stats, CacheStats { hits: 1, misses: 1, entries: 1 });
    }

    #[test]
    fn test_changed_file_is_a_miss() {
        let temp = TempDir::new().unwrap();
        let file = temp.child("a.jpg");
        file.write_binary(b"12345").unwrap();

        let cache = SqliteMetadataCache::in_memory(Duration::from_secs(60)).unwrap();
        cache.put(file.path(), &sample()).unwrap();
        file.write_binary(b"123456789").unwrap();
        assert!(cache.get(file.path()).is_none());
    }

    #[test]
    fn test_deleted_file_is_a_miss() {
        let temp = TempDir::new().unwrap();
        let file = temp.child("a.jpg");
        file.write_binary(b"12345").unwrap();

        let cache = SqliteMetadataCache::in_memory(Duration::from_secs(60)).unwrap();
        cache.put(file.path(), &sample()).unwrap();
        std::fs::remove_file(file.path()).unwrap();
        assert!(cache.get(file.path()).is_none());
        assert!(cache.put(file.path(), &sample()).is_err());
    }

    #[test]
    fn test_expired_entry_is_a_miss() {
        let temp = TempDir::new().unwrap();
        let file = temp.child("a.jpg");
        file.write_binary(b"12345").unwrap();

        let cache = SqliteMetadataCache::in_memory(Duration::ZERO).unwrap();
        cache.put(file.path(), &sample()).unwrap();
        assert!(cache.get(file.path()).is_none());
        assert_eq!(cache.purge_expired().unwrap(), 1);
    }

    #[test]
    fn test_invalidate_and_clear() {
        let temp = TempDir::new().unwrap();
        let a = temp.child("a.jpg");
        let b = temp.child("b.jpg");
        a.write_binary(b"a").unwrap();
        b.write_binary(b"b").unwrap();

        let cache = SqliteMetadataCache::in_memory(Duration::from_secs(60)).unwrap();
        cache.put(a.path(), &sample()).unwrap();
        cache.put(b.path(), &sample()).unwrap();
        cache.invalidate(a.path()).unwrap();
        assert!(cache.get(a.path()).is_none());
        assert!(cache.get(b.path()).is_some());
        assert_eq!(cache.clear().unwrap(), 1);
    }

    #[test]
    fn test_on_disk_database() {
        let temp = TempDir::new().unwrap();
        let file = temp.child("a.jpg");
        file.write_binary(b"12345").unwrap();
        let db = temp.child("cache").child("metadata.db");

        {
            let cache = SqliteMetadataCache::new(db.path(), Duration::from_secs(60)).unwrap();
            cache.put(file.path(), &sample()).unwrap();
        }
        let cache = SqliteMetadataCache::new(db.path(), Duration::from_secs(60)).unwrap();
        assert_eq!(cache.get(file.path()), Some(sample()));
    }

    #[test]
    fn test_no_cache() {
        let cache = NoCache;
        cache.put(Path::new("x"), &sample()).unwrap();
        assert!(cache.get(Path::new("x")).is_none());
        assert_eq!(cache.clear().unwrap(), 0);
    }
}
