//! Local flashcard collection stored in a libsql database.
//!
//! Holds note types, decks, notes and media. Nothing here knows about the
//! remote API; the writer maps canonical records onto these primitives.

use anyhow::Result;
use libsql::{Builder, Connection, Database as LibsqlDatabase};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

const SYSTEM_MIGRATIONS: &[(&str, &str)] =
    &[("system/000_migrations_table.sql", include_str!("migrations/system/000_migrations_table.sql"))];

const MIGRATIONS: &[(&str, &str)] = &[("001_collection.sql", include_str!("migrations/001_collection.sql"))];

/// Where a fingerprint must be unique.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupScope {
    /// Only notes in the target deck count as prior imports.
    #[default]
    Deck,
    /// Any note of the importer's note type counts, whatever deck it was moved to.
    Collection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumScope {
    Deck(i64),
    NoteType(i64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    pub qfmt: String,
    pub afmt: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteType {
    pub id: i64,
    pub name: String,
    pub version: i64,
    pub fields: Vec<String>,
    pub templates: Vec<Template>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deck {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct NewNote {
    pub note_type_id: i64,
    pub deck_id: i64,
    pub csum: String,
    pub fields: BTreeMap<String, String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub id: i64,
    pub note_type_id: i64,
    pub deck_id: i64,
    pub csum: String,
    pub fields: BTreeMap<String, String>,
    pub tags: Vec<String>,
}

pub struct Collection {
    _db: LibsqlDatabase,
    conn: Connection,
}

impl Collection {
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Builder::new_local(path).build().await?;
        Self::from_database(db).await
    }

    pub async fn open_in_memory() -> Result<Self> {
        let db = Builder::new_local(":memory:").build().await?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibsqlDatabase) -> Result<Self> {
        let conn = db.connect()?;
        conn.query("SELECT 1", ()).await?;

        for (filename, sql) in SYSTEM_MIGRATIONS.iter().chain(MIGRATIONS) {
            Self::run_migration(&conn, filename, sql).await?;
        }

        Ok(Collection { _db: db, conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    async fn is_migration_applied(conn: &Connection, name: &str) -> Result<bool> {
        let query = "SELECT 1 FROM _migrations WHERE name = ?";
        match conn.query(query, libsql::params![name]).await {
            Ok(mut rows) => Ok(rows.next().await?.is_some()),
            Err(e) => {
                if e.to_string().contains("no such table") {
                    Ok(false)
                } else {
                    Err(e.into())
                }
            }
        }
    }

    async fn record_migration(conn: &Connection, name: &str) -> Result<()> {
        let query = r#"
            INSERT INTO _migrations (name, applied_at)
            VALUES (?, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        "#;
        conn.execute(query, libsql::params![name]).await?;
        Ok(())
    }

    async fn run_migration(conn: &Connection, name: &str, sql: &str) -> Result<()> {
        if Self::is_migration_applied(conn, name).await? {
            tracing::debug!("migration {} already applied, skipping", name);
            return Ok(());
        }

        tracing::info!("applying migration: {}", name);
        conn.execute_batch(sql)
            .await
            .map_err(|e| anyhow::anyhow!("failed to execute migration {name}: {e}"))?;

        Self::record_migration(conn, name).await?;
        Ok(())
    }

    pub async fn begin(&self) -> Result<()> {
        self.conn.execute("BEGIN TRANSACTION", ()).await?;
        Ok(())
    }

    /// Commits everything written since [`Collection::begin`].
    ///
    /// A failed commit is rolled back so the connection leaves the
    /// transaction and later batches can begin again.
    pub async fn flush(&self) -> Result<()> {
        if let Err(e) = self.conn.execute("COMMIT", ()).await {
            if let Err(rollback_err) = self.conn.execute("ROLLBACK", ()).await {
                tracing::warn!("rollback after failed commit also failed: {}", rollback_err);
            }
            return Err(e.into());
        }
        Ok(())
    }

    pub async fn note_type_by_name(&self, name: &str) -> Result<Option<NoteType>> {
        let query = r#"
            SELECT id, name, version, fields, templates
            FROM note_types WHERE name = ?
        "#;

        let mut rows = self.conn.query(query, libsql::params![name]).await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(Self::row_to_note_type(&row)?))
        } else {
            Ok(None)
        }
    }

    pub async fn add_note_type(
        &self,
        name: &str,
        version: i64,
        fields: &[String],
        templates: &[Template],
    ) -> Result<NoteType> {
        let query = r#"
            INSERT INTO note_types (name, version, fields, templates)
            VALUES (?, ?, ?, ?)
            RETURNING id, name, version, fields, templates
        "#;

        let mut rows = self
            .conn
            .query(
                query,
                libsql::params![
                    name,
                    version,
                    serde_json::to_string(fields)?,
                    serde_json::to_string(templates)?
                ],
            )
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(Self::row_to_note_type(&row)?)
        } else {
            anyhow::bail!("Failed to create note type {}", name)
        }
    }

    pub async fn update_note_type(
        &self,
        id: i64,
        version: i64,
        fields: &[String],
        templates: &[Template],
    ) -> Result<()> {
        let query = r#"
            UPDATE note_types
            SET version = ?, fields = ?, templates = ?,
                updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
            WHERE id = ?
        "#;

        let updated = self
            .conn
            .execute(
                query,
                libsql::params![
                    version,
                    serde_json::to_string(fields)?,
                    serde_json::to_string(templates)?,
                    id
                ],
            )
            .await?;

        if updated == 0 {
            anyhow::bail!("note type {} not found", id);
        }
        Ok(())
    }

    fn row_to_note_type(row: &libsql::Row) -> Result<NoteType> {
        let fields: String = row.get(3)?;
        let templates: String = row.get(4)?;

        Ok(NoteType {
            id: row.get(0)?,
            name: row.get(1)?,
            version: row.get(2)?,
            fields: serde_json::from_str(&fields)?,
            templates: serde_json::from_str(&templates)?,
        })
    }

    pub async fn deck_by_name(&self, name: &str) -> Result<Option<Deck>> {
        let mut rows = self
            .conn
            .query("SELECT id, name FROM decks WHERE name = ? LIMIT 1", libsql::params![name])
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(Deck {
                id: row.get(0)?,
                name: row.get(1)?,
            }))
        } else {
            Ok(None)
        }
    }

    pub async fn get_or_create_deck(&self, name: &str) -> Result<Deck> {
        let insert_query = "INSERT OR IGNORE INTO decks (name) VALUES (?)";
        self.conn.execute(insert_query, libsql::params![name]).await?;

        match self.deck_by_name(name).await? {
            Some(deck) => Ok(deck),
            None => anyhow::bail!("Failed to get or create deck: {}", name),
        }
    }

    /// Ids of notes carrying `csum` within `scope`.
    pub async fn find_notes_by_checksum(&self, csum: &str, scope: ChecksumScope) -> Result<Vec<i64>> {
        let mut rows = match scope {
            ChecksumScope::Deck(deck_id) => {
                self.conn
                    .query(
                        "SELECT id FROM notes WHERE csum = ? AND deck_id = ?",
                        libsql::params![csum, deck_id],
                    )
                    .await?
            }
            ChecksumScope::NoteType(note_type_id) => {
                self.conn
                    .query(
                        "SELECT id FROM notes WHERE csum = ? AND note_type_id = ?",
                        libsql::params![csum, note_type_id],
                    )
                    .await?
            }
        };

        let mut ids = Vec::new();
        while let Some(row) = rows.next().await? {
            ids.push(row.get(0)?);
        }
        Ok(ids)
    }

    pub async fn add_note(&self, note: &NewNote) -> Result<i64> {
        let query = r#"
            INSERT INTO notes (note_type_id, deck_id, csum, fields, tags)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id
        "#;

        let mut rows = self
            .conn
            .query(
                query,
                libsql::params![
                    note.note_type_id,
                    note.deck_id,
                    note.csum.as_str(),
                    serde_json::to_string(&note.fields)?,
                    note.tags.join(" ")
                ],
            )
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(row.get(0)?)
        } else {
            anyhow::bail!("Failed to create note")
        }
    }

    pub async fn get_note(&self, id: i64) -> Result<Option<Note>> {
        let query = r#"
            SELECT id, note_type_id, deck_id, csum, fields, tags
            FROM notes WHERE id = ?
        "#;

        let mut rows = self.conn.query(query, libsql::params![id]).await?;

        if let Some(row) = rows.next().await? {
            let fields: String = row.get(4)?;
            let tags: String = row.get(5)?;
            Ok(Some(Note {
                id: row.get(0)?,
                note_type_id: row.get(1)?,
                deck_id: row.get(2)?,
                csum: row.get(3)?,
                fields: serde_json::from_str(&fields)?,
                tags: tags.split_whitespace().map(str::to_string).collect(),
            }))
        } else {
            Ok(None)
        }
    }

    pub async fn count_notes(&self, deck_id: i64) -> Result<i64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM notes WHERE deck_id = ?", libsql::params![deck_id])
            .await?;

        match rows.next().await? {
            Some(row) => Ok(row.get(0)?),
            None => Ok(0),
        }
    }

    pub async fn write_media(&self, filename: &str, data: &[u8]) -> Result<()> {
        let query = "INSERT OR REPLACE INTO media (filename, data) VALUES (?, ?)";
        self.conn
            .execute(query, libsql::params![filename, libsql::Value::Blob(data.to_vec())])
            .await?;
        Ok(())
    }

    pub async fn media(&self, filename: &str) -> Result<Option<Vec<u8>>> {
        let mut rows = self
            .conn
            .query("SELECT data FROM media WHERE filename = ?", libsql::params![filename])
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(row.get(0)?))
        } else {
            Ok(None)
        }
    }
}
