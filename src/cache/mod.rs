//! Keyed response cache with TTL and optional ETag.
//!
//! A deliberately small abstraction: key, serialized body, expiry, optional
//! validator. The gateway owns the caching algorithm; this module only owns
//! durable storage. Every caller treats a read failure as a cache miss and a
//! write failure as non-fatal.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use crate::error::Result;

/// One cached upstream response.
#[derive(Clone, Debug)]
pub struct CachedResponse {
    pub body: String,
    pub etag: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl CachedResponse {
    /// An entry past its expiry is never served as fresh, but still seeds
    /// conditional revalidation via its etag.
    pub fn is_fresh(&self) -> bool {
        self.expires_at > Utc::now()
    }
}

/// SQLite-backed response cache.
pub struct ResponseCache {
    conn: Mutex<Connection>,
}

impl ResponseCache {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS responses (
                cache_key TEXT PRIMARY KEY,
                body TEXT NOT NULL,
                etag TEXT,
                expires_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn get(&self, cache_key: &str) -> Result<Option<CachedResponse>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT body, etag, expires_at FROM responses WHERE cache_key = ?1",
                params![cache_key],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;
        drop(conn);

        let Some((body, etag, expires_at)) = row else {
            return Ok(None);
        };

        Ok(Some(CachedResponse {
            body,
            etag,
            expires_at: DateTime::parse_from_rfc3339(&expires_at)?.with_timezone(&Utc),
        }))
    }

    /// Inserts or overwrites an entry. Stale entries are superseded, never
    /// explicitly deleted.
    pub fn put(
        &self,
        cache_key: &str,
        body: &str,
        etag: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.lock().unwrap().execute(
            r#"
            INSERT INTO responses (cache_key, body, etag, expires_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(cache_key) DO UPDATE SET
                body = excluded.body,
                etag = excluded.etag,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at
            "#,
            params![
                cache_key,
                body,
                etag,
                expires_at.to_rfc3339(),
                Utc::now().to_rfc3339(),
            ],
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_get_missing() {
        let cache = ResponseCache::new(":memory:").unwrap();
        assert!(cache.get("public:/status").unwrap().is_none());
    }

    #[test]
    fn test_put_get_roundtrip() {
        let cache = ResponseCache::new(":memory:").unwrap();
        let expires = Utc::now() + Duration::minutes(5);

        cache
            .put("public:/status", r#"{"players":31337}"#, Some("\"v1\""), expires)
            .unwrap();

        let entry = cache.get("public:/status").unwrap().unwrap();
        assert_eq!(entry.body, r#"{"players":31337}"#);
        assert_eq!(entry.etag.as_deref(), Some("\"v1\""));
        assert!(entry.is_fresh());
    }

    #[test]
    fn test_expired_entry_is_not_fresh() {
        let cache = ResponseCache::new(":memory:").unwrap();
        cache
            .put("k", "body", None, Utc::now() - Duration::seconds(1))
            .unwrap();

        let entry = cache.get("k").unwrap().unwrap();
        assert!(!entry.is_fresh());
    }

    #[test]
    fn test_overwrite_supersedes() {
        let cache = ResponseCache::new(":memory:").unwrap();
        let expires = Utc::now() + Duration::minutes(5);

        cache.put("k", "old", Some("\"v1\""), expires).unwrap();
        cache.put("k", "new", Some("\"v2\""), expires).unwrap();

        let entry = cache.get("k").unwrap().unwrap();
        assert_eq!(entry.body, "new");
        assert_eq!(entry.etag.as_deref(), Some("\"v2\""));
    }

    #[test]
    fn test_key_namespaces_are_distinct() {
        let cache = ResponseCache::new(":memory:").unwrap();
        let expires = Utc::now() + Duration::minutes(5);

        cache.put("public:/route", "anon", None, expires).unwrap();
        cache.put("91000001:/route", "authed", None, expires).unwrap();

        assert_eq!(cache.get("public:/route").unwrap().unwrap().body, "anon");
        assert_eq!(
            cache.get("91000001:/route").unwrap().unwrap().body,
            "authed"
        );
    }
}
