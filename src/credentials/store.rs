//! SQLite-backed credential store with encryption at rest.
//!
//! # Schema
//! ```sql
//! CREATE TABLE characters (
//!     character_id INTEGER PRIMARY KEY,
//!     character_name TEXT NOT NULL,
//!     owner_hash TEXT NOT NULL,
//!     scopes TEXT NOT NULL,         -- space-joined, order preserved
//!     access_token TEXT NOT NULL,   -- base64(nonce || ciphertext)
//!     refresh_token TEXT,           -- same encoding, nullable
//!     expires_at TEXT NOT NULL,     -- RFC 3339
//!     created_at TEXT NOT NULL,
//!     updated_at TEXT NOT NULL
//! );
//! ```
//!
//! The `scheduler_meta` table holds the refresh scheduler's persisted next
//! fire time (single row) so a process restart resumes the schedule.
//!
//! # Thread safety
//! The connection is wrapped in a Mutex; SQLite itself runs in serialized
//! mode. Callers needing read-modify-write atomicity per character (token
//! rotation) serialize through `AuthManager`'s per-character locks.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use super::{encryption, Credentials, TokenInfo};
use crate::error::Result;

pub struct CredentialStore {
    conn: Mutex<Connection>,
    encryption_key: Vec<u8>,
}

impl CredentialStore {
    /// Creates or opens a credential store.
    ///
    /// `encryption_key` is the base64-encoded 32-byte master key; an invalid
    /// key is rejected up front rather than at first use.
    pub fn new<P: AsRef<Path>>(db_path: P, encryption_key: &str) -> Result<Self> {
        let key_bytes = encryption::validate_key(encryption_key)?;

        let conn = Connection::open(db_path)?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS characters (
                character_id INTEGER PRIMARY KEY,
                character_name TEXT NOT NULL,
                owner_hash TEXT NOT NULL,
                scopes TEXT NOT NULL,
                access_token TEXT NOT NULL,
                refresh_token TEXT,
                expires_at TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS scheduler_meta (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                next_run TEXT NOT NULL
            )
            "#,
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            encryption_key: key_bytes,
        })
    }

    /// Inserts or replaces the credential for a character.
    ///
    /// Idempotent: repeated calls with the same character update the row in
    /// place, refreshing `owner_hash`, `scopes`, and `updated_at`.
    ///
    /// Returns `true` when a previous row existed with a different
    /// `owner_hash` — the signal that the character was transferred to
    /// another account since it last authorized.
    pub fn upsert(
        &self,
        character_id: i64,
        character_name: &str,
        owner_hash: &str,
        scopes: &[String],
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let access_cipher = encryption::encrypt(access_token, &self.encryption_key)?;
        let refresh_cipher = refresh_token
            .map(|t| encryption::encrypt(t, &self.encryption_key))
            .transpose()?;

        let now = Utc::now().to_rfc3339();

        let conn = self.conn.lock().unwrap();

        let previous_owner: Option<String> = conn
            .query_row(
                "SELECT owner_hash FROM characters WHERE character_id = ?1",
                params![character_id],
                |row| row.get(0),
            )
            .optional()?;

        conn.execute(
            r#"
            INSERT INTO characters (
                character_id, character_name, owner_hash, scopes,
                access_token, refresh_token, expires_at, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
            ON CONFLICT(character_id) DO UPDATE SET
                character_name = excluded.character_name,
                owner_hash = excluded.owner_hash,
                scopes = excluded.scopes,
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at
            "#,
            params![
                character_id,
                character_name,
                owner_hash,
                scopes.join(" "),
                access_cipher,
                refresh_cipher,
                expires_at.to_rfc3339(),
                now,
            ],
        )?;

        Ok(matches!(previous_owner, Some(prev) if prev != owner_hash))
    }

    /// Rotates the token columns after a refresh.
    ///
    /// `character_name`, `owner_hash`, and `scopes` are left untouched — a
    /// refresh grants no new permissions and proves no new identity.
    pub fn update_tokens(
        &self,
        character_id: i64,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let access_cipher = encryption::encrypt(access_token, &self.encryption_key)?;
        let refresh_cipher = refresh_token
            .map(|t| encryption::encrypt(t, &self.encryption_key))
            .transpose()?;

        self.conn.lock().unwrap().execute(
            r#"
            UPDATE characters SET
                access_token = ?2,
                refresh_token = ?3,
                expires_at = ?4,
                updated_at = ?5
            WHERE character_id = ?1
            "#,
            params![
                character_id,
                access_cipher,
                refresh_cipher,
                expires_at.to_rfc3339(),
                Utc::now().to_rfc3339(),
            ],
        )?;

        Ok(())
    }

    /// Returns credential metadata for a character. Never decrypts tokens.
    pub fn token_info(&self, character_id: i64) -> Result<Option<TokenInfo>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                r#"
                SELECT character_id, character_name, owner_hash, scopes, expires_at
                FROM characters
                WHERE character_id = ?1
                "#,
                params![character_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        row.map(Self::info_from_row).transpose()
    }

    /// Returns the decrypted token pair for a character.
    ///
    /// Internal read path for callers about to make an outbound request.
    /// Decryption failure is fatal ([`crate::error::Error::Crypto`]).
    pub fn credentials(&self, character_id: i64) -> Result<Option<Credentials>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                r#"
                SELECT access_token, refresh_token, expires_at
                FROM characters
                WHERE character_id = ?1
                "#,
                params![character_id],
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

        let Some((access_cipher, refresh_cipher, expires_at)) = row else {
            return Ok(None);
        };

        let access_token = encryption::decrypt(&access_cipher, &self.encryption_key)?;
        let refresh_token = refresh_cipher
            .map(|c| encryption::decrypt(&c, &self.encryption_key))
            .transpose()?;

        Ok(Some(Credentials {
            access_token,
            refresh_token,
            expires_at: parse_timestamp(&expires_at)?,
        }))
    }

    /// Deletes the credential for a character. Returns whether a row existed.
    ///
    /// Cached responses keyed to the character are not purged; they expire
    /// naturally.
    pub fn revoke(&self, character_id: i64) -> Result<bool> {
        let affected = self.conn.lock().unwrap().execute(
            "DELETE FROM characters WHERE character_id = ?1",
            params![character_id],
        )?;

        Ok(affected > 0)
    }

    /// Lists metadata for every stored credential.
    pub fn list_all(&self) -> Result<Vec<TokenInfo>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT character_id, character_name, owner_hash, scopes, expires_at
            FROM characters
            ORDER BY character_id
            "#,
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        drop(stmt);
        drop(conn);

        rows.into_iter().map(Self::info_from_row).collect()
    }

    /// Returns ids of characters whose token expires within the window and
    /// that hold a refresh token. The refresh scheduler's scan query.
    pub fn expiring_within(&self, window: Duration) -> Result<Vec<i64>> {
        let horizon = Utc::now() + chrono::Duration::seconds(window.as_secs() as i64);

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT character_id, expires_at
            FROM characters
            WHERE refresh_token IS NOT NULL
            ORDER BY character_id
            "#,
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        drop(stmt);
        drop(conn);

        let mut due = Vec::new();
        for (character_id, expires_at) in rows {
            if parse_timestamp(&expires_at)? <= horizon {
                due.push(character_id);
            }
        }

        Ok(due)
    }

    /// Reads the refresh scheduler's persisted next fire time.
    pub fn next_scheduled_refresh(&self) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn.lock().unwrap();
        let next: Option<String> = conn
            .query_row("SELECT next_run FROM scheduler_meta WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        drop(conn);

        next.map(|s| parse_timestamp(&s)).transpose()
    }

    /// Persists the refresh scheduler's next fire time.
    pub fn set_next_scheduled_refresh(&self, next_run: DateTime<Utc>) -> Result<()> {
        self.conn.lock().unwrap().execute(
            r#"
            INSERT INTO scheduler_meta (id, next_run) VALUES (1, ?1)
            ON CONFLICT(id) DO UPDATE SET next_run = excluded.next_run
            "#,
            params![next_run.to_rfc3339()],
        )?;

        Ok(())
    }

    fn info_from_row(
        (character_id, character_name, owner_hash, scopes, expires_at): (
            i64,
            String,
            String,
            String,
            String,
        ),
    ) -> Result<TokenInfo> {
        let expires_at = parse_timestamp(&expires_at)?;
        Ok(TokenInfo {
            character_id,
            character_name,
            owner_hash,
            scopes: scopes.split_whitespace().map(str::to_string).collect(),
            expires_at,
            is_expired: expires_at <= Utc::now(),
        })
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}
