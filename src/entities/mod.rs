//! Bulk bidirectional id↔name resolution with its own cache.
//!
//! Layered on the gateway's batch endpoints: `/universe/names/` accepts a
//! JSON array of ids and returns `[{id, name, category}]`;
//! `/universe/ids/` accepts an array of names and returns an object of typed
//! entity arrays keyed by category. Every successful resolution populates the
//! `entities` table opportunistically; entries are only ever invalidated by
//! expiry.
//!
//! Each resolve call issues at most one upstream request, covering only the
//! ids/names the cache could not answer. Upstream failure degrades to the
//! cached portion — callers get a smaller map, never an error, as long as the
//! inputs themselves were well-formed.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::Result;
use crate::gateway::EsiGateway;

const NAMES_PATH: &str = "/universe/names/";
const IDS_PATH: &str = "/universe/ids/";

/// One resolved entity as returned by the bulk id→name endpoint.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ResolvedEntity {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub category: String,
}

/// Minimal `{id, name}` record inside the typed arrays of the name→id
/// endpoint.
#[derive(Clone, Debug, Deserialize, Serialize)]
struct IdNamePair {
    id: i64,
    name: String,
}

/// SQLite-backed entity cache keyed by `(entity_type, entity_id)` with a
/// secondary lookup path by name.
pub struct EntityCache {
    conn: Mutex<Connection>,
}

impl EntityCache {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS entities (
                entity_type TEXT NOT NULL,
                entity_id INTEGER NOT NULL,
                entity_name TEXT NOT NULL,
                payload TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                PRIMARY KEY (entity_type, entity_id)
            )
            "#,
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_entity_name ON entities(entity_type, entity_name)",
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Unexpired name for an id, whatever its category.
    pub fn name_for_id(&self, entity_id: i64) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT entity_name, expires_at FROM entities WHERE entity_id = ?1",
                params![entity_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        drop(conn);

        filter_unexpired(row)
    }

    /// Unexpired id for a name, whatever its category.
    pub fn id_for_name(&self, entity_name: &str) -> Result<Option<i64>> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(i64, String)> = conn
            .query_row(
                "SELECT entity_id, expires_at FROM entities WHERE entity_name = ?1",
                params![entity_name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        drop(conn);

        filter_unexpired(row)
    }

    pub fn put(
        &self,
        entity_type: &str,
        entity_id: i64,
        entity_name: &str,
        payload: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.lock().unwrap().execute(
            r#"
            INSERT INTO entities (entity_type, entity_id, entity_name, payload, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(entity_type, entity_id) DO UPDATE SET
                entity_name = excluded.entity_name,
                payload = excluded.payload,
                expires_at = excluded.expires_at
            "#,
            params![
                entity_type,
                entity_id,
                entity_name,
                payload,
                expires_at.to_rfc3339(),
            ],
        )?;

        Ok(())
    }
}

fn filter_unexpired<T>(row: Option<(T, String)>) -> Result<Option<T>> {
    let Some((value, expires_at)) = row else {
        return Ok(None);
    };
    let expires_at = DateTime::parse_from_rfc3339(&expires_at)?.with_timezone(&Utc);
    Ok((expires_at > Utc::now()).then_some(value))
}

/// Bulk resolver over the gateway's batch endpoint.
pub struct EntityResolver {
    gateway: Arc<EsiGateway>,
    cache: EntityCache,
    ttl: chrono::Duration,
}

impl EntityResolver {
    pub fn new(config: &Config, gateway: Arc<EsiGateway>) -> Result<Self> {
        Ok(Self {
            gateway,
            cache: EntityCache::new(&config.database_path)?,
            ttl: chrono::Duration::seconds(config.entity_ttl_secs as i64),
        })
    }

    /// Resolves ids to names. Ids that cannot be resolved are absent from the
    /// result map; that is not an error.
    pub async fn resolve_ids(&self, ids: &[i64]) -> Result<HashMap<i64, String>> {
        let mut resolved = HashMap::new();
        if ids.is_empty() {
            return Ok(resolved);
        }

        let mut missing = Vec::new();
        let mut seen = HashSet::new();
        for &id in ids {
            if !seen.insert(id) {
                continue;
            }
            match self.cache.name_for_id(id) {
                Ok(Some(name)) => {
                    resolved.insert(id, name);
                }
                Ok(None) => missing.push(id),
                Err(e) => {
                    warn!(entity_id = id, error = %e, "entity cache read failed, treating as miss");
                    missing.push(id);
                }
            }
        }

        if missing.is_empty() {
            return Ok(resolved);
        }

        debug!(
            hits = resolved.len(),
            misses = missing.len(),
            "resolving ids upstream"
        );

        let payload = serde_json::to_value(&missing)?;
        let response = match self.gateway.post_public(NAMES_PATH, &payload).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "bulk id resolution failed, returning cached entries only");
                return Ok(resolved);
            }
        };

        let entities: Vec<ResolvedEntity> = match serde_json::from_value(response) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "unexpected bulk resolution response shape");
                return Ok(resolved);
            }
        };

        let expires_at = Utc::now() + self.ttl;
        for entity in entities {
            let payload = serde_json::to_string(&entity)?;
            if let Err(e) = self.cache.put(
                &entity.category,
                entity.id,
                &entity.name,
                &payload,
                expires_at,
            ) {
                warn!(entity_id = entity.id, error = %e, "entity cache write failed");
            }
            resolved.insert(entity.id, entity.name);
        }

        Ok(resolved)
    }

    /// Resolves names to ids — the structural mirror of [`resolve_ids`].
    ///
    /// The upstream response is an object of typed entity arrays
    /// (`{"characters": [{id, name}], "corporations": [...], ...}`); all
    /// arrays are merged into one map.
    ///
    /// [`resolve_ids`]: EntityResolver::resolve_ids
    pub async fn resolve_names(&self, names: &[String]) -> Result<HashMap<String, i64>> {
        let mut resolved = HashMap::new();
        if names.is_empty() {
            return Ok(resolved);
        }

        let mut missing = Vec::new();
        let mut seen = HashSet::new();
        for name in names {
            if !seen.insert(name.as_str()) {
                continue;
            }
            match self.cache.id_for_name(name) {
                Ok(Some(id)) => {
                    resolved.insert(name.clone(), id);
                }
                Ok(None) => missing.push(name.clone()),
                Err(e) => {
                    warn!(entity_name = %name, error = %e, "entity cache read failed, treating as miss");
                    missing.push(name.clone());
                }
            }
        }

        if missing.is_empty() {
            return Ok(resolved);
        }

        debug!(
            hits = resolved.len(),
            misses = missing.len(),
            "resolving names upstream"
        );

        let payload = serde_json::to_value(&missing)?;
        let response = match self.gateway.post_public(IDS_PATH, &payload).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "bulk name resolution failed, returning cached entries only");
                return Ok(resolved);
            }
        };

        let Some(categories) = response.as_object() else {
            warn!("unexpected bulk resolution response shape");
            return Ok(resolved);
        };

        let expires_at = Utc::now() + self.ttl;
        for (category, entries) in categories {
            let pairs: Vec<IdNamePair> = match serde_json::from_value(entries.clone()) {
                Ok(v) => v,
                Err(e) => {
                    warn!(category = %category, error = %e, "skipping malformed entity array");
                    continue;
                }
            };

            for pair in pairs {
                let payload = serde_json::to_string(&pair)?;
                if let Err(e) =
                    self.cache
                        .put(category, pair.id, &pair.name, &payload, expires_at)
                {
                    warn!(entity_id = pair.id, error = %e, "entity cache write failed");
                }
                resolved.insert(pair.name, pair.id);
            }
        }

        Ok(resolved)
    }
}
