//! SQLite-backed record store.
//!
//! One `records` table holds every collection, discriminated by a
//! `collection` column. The `data` payload is run through the record
//! codec with the server's storage key before it touches disk, so the
//! database file never holds plaintext secrets. Metadata stays readable:
//! it exists for humans to find records, not to hide them.

use std::path::Path;

use anyhow::{bail, Result};
use parking_lot::Mutex;
use serde_json::Value;

use crate::crypto::{decode_record, encode_record};
use crate::model::{CollectionKind, Metadata, Record};

/// SQLite-backed store for user records, encrypted at rest.
pub struct RecordStore {
    conn: Mutex<rusqlite::Connection>,
    storage_key: String,
}

impl RecordStore {
    /// Open (or create) the records table in the database at `db_path`.
    pub fn new(db_path: &Path, storage_key: &str) -> Result<Self> {
        let conn = rusqlite::Connection::open(db_path)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS records (
                id TEXT PRIMARY KEY,
                collection TEXT NOT NULL,
                username TEXT NOT NULL,
                data TEXT NOT NULL,
                metadata TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_records_owner
                ON records(username, collection);",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            storage_key: storage_key.to_string(),
        })
    }

    /// Store a new record. Returns the generated record id.
    pub fn put(
        &self,
        username: &str,
        kind: CollectionKind,
        data: &Value,
        metadata: &Metadata,
    ) -> Result<String> {
        let sealed = encode_record(data, kind, &self.storage_key)?;
        let id = uuid::Uuid::new_v4().to_string();

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO records (id, collection, username, data, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                id,
                kind.as_str(),
                username,
                serde_json::to_string(&sealed)?,
                serde_json::to_string(metadata)?,
            ],
        )?;

        Ok(id)
    }

    /// Fetch every record the user has in one collection, in insertion
    /// order, with payloads decrypted.
    pub fn get_all(&self, username: &str, kind: CollectionKind) -> Result<Vec<Record>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, data, metadata FROM records
             WHERE username = ?1 AND collection = ?2
             ORDER BY rowid",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![username, kind.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);
        drop(conn);

        let mut records = Vec::with_capacity(rows.len());
        for (id, data, metadata) in rows {
            let sealed: Value = serde_json::from_str(&data)?;
            records.push(Record {
                id,
                username: username.to_string(),
                data: decode_record(&sealed, kind, &self.storage_key)?,
                metadata: serde_json::from_str::<Metadata>(&metadata)?,
            });
        }
        Ok(records)
    }

    /// Replace the data and metadata of an existing record. Only the
    /// owner can touch it.
    pub fn update(
        &self,
        username: &str,
        kind: CollectionKind,
        id: &str,
        data: &Value,
        metadata: &Metadata,
    ) -> Result<()> {
        let sealed = encode_record(data, kind, &self.storage_key)?;

        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE records SET data = ?1, metadata = ?2
             WHERE id = ?3 AND username = ?4 AND collection = ?5",
            rusqlite::params![
                serde_json::to_string(&sealed)?,
                serde_json::to_string(metadata)?,
                id,
                username,
                kind.as_str(),
            ],
        )?;
        if changed == 0 {
            bail!("Record '{}' not found", id);
        }
        Ok(())
    }

    /// Delete a record. Only the owner can remove it.
    pub fn delete(&self, username: &str, kind: CollectionKind, id: &str) -> Result<()> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM records
             WHERE id = ?1 AND username = ?2 AND collection = ?3",
            rusqlite::params![id, username, kind.as_str()],
        )?;
        if deleted == 0 {
            bail!("Record '{}' not found", id);
        }
        Ok(())
    }
}
