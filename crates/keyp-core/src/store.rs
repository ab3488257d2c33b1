//! SQLite-backed record store
//!
//! A single database file holds vault metadata, secrets, their fields, and
//! an FTS5 index over non-secret metadata (name, tags, notes, field labels).
//! Field values are never indexed. The schema is installed idempotently on
//! every open; the FTS index is rebuilt only when the stored
//! `schema_version` is older than [`SCHEMA_VERSION`].

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Transaction};
use tracing::debug;

use crate::error::{VaultError, VaultResult};
use crate::models::{parse_tags, Field, FieldType, Secret};

/// Current schema generation, stored under `vault_meta.schema_version`.
/// Version 2 added field labels to the FTS index.
pub const SCHEMA_VERSION: i64 = 2;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS vault_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS secrets (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    tags TEXT DEFAULT '[]',
    notes TEXT DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS fields (
    id TEXT PRIMARY KEY,
    secret_id TEXT NOT NULL,
    label TEXT NOT NULL,
    value TEXT NOT NULL,
    sensitive INTEGER DEFAULT 1,
    type TEXT DEFAULT 'text',
    sort_order INTEGER DEFAULT 0,
    FOREIGN KEY (secret_id) REFERENCES secrets(id) ON DELETE CASCADE,
    UNIQUE(secret_id, label)
);

CREATE VIRTUAL TABLE IF NOT EXISTS secrets_fts USING fts5(
    name, tags, notes, field_labels
);

CREATE TRIGGER IF NOT EXISTS secrets_ai AFTER INSERT ON secrets BEGIN
    INSERT INTO secrets_fts(rowid, name, tags, notes, field_labels)
    VALUES (new.rowid, new.name, new.tags, new.notes, '');
END;

CREATE TRIGGER IF NOT EXISTS secrets_ad AFTER DELETE ON secrets BEGIN
    DELETE FROM secrets_fts WHERE rowid = old.rowid;
END;

CREATE TRIGGER IF NOT EXISTS secrets_au AFTER UPDATE ON secrets BEGIN
    DELETE FROM secrets_fts WHERE rowid = old.rowid;
    INSERT INTO secrets_fts(rowid, name, tags, notes, field_labels)
    VALUES (new.rowid, new.name, new.tags, new.notes, '');
END;
"#;

/// Filtering options shared by list and search
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Match records carrying ANY of these tags
    pub tags: Vec<String>,
    /// Cap the result count when positive
    pub limit: usize,
}

/// Handle to the vault database file.
///
/// The connection is treated as externally single-writer: every operation
/// takes the inner mutex, and writes run inside a transaction.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open or create the database at `path` and install the schema.
    pub fn open(path: &Path) -> VaultResult<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "foreign_keys", true)?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Close the underlying connection.
    pub fn close(self) -> VaultResult<()> {
        let conn = self
            .conn
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        conn.close().map_err(|(_, err)| err.into())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn init_schema(&self) -> VaultResult<()> {
        let mut conn = self.lock();
        conn.execute_batch(SCHEMA)?;

        let stored: i64 = conn
            .query_row(
                "SELECT value FROM vault_meta WHERE key = 'schema_version'",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        if stored < SCHEMA_VERSION {
            debug!(from = stored, to = SCHEMA_VERSION, "rebuilding search index");
            let tx = conn.transaction()?;
            rebuild_fts_index(&tx)?;
            tx.execute(
                "INSERT OR REPLACE INTO vault_meta (key, value) VALUES ('schema_version', ?1)",
                params![SCHEMA_VERSION.to_string()],
            )?;
            tx.commit()?;
        }

        Ok(())
    }

    /// Store a metadata key-value pair.
    pub fn set_meta(&self, key: &str, value: &str) -> VaultResult<()> {
        self.lock().execute(
            "INSERT OR REPLACE INTO vault_meta (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    /// Retrieve a metadata value by key.
    pub fn get_meta(&self, key: &str) -> VaultResult<String> {
        self.lock()
            .query_row(
                "SELECT value FROM vault_meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| VaultError::NotFound(format!("metadata key '{key}'")))
    }

    /// Insert a new secret with its fields inside one transaction.
    pub fn create(&self, secret: &Secret) -> VaultResult<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO secrets (id, name, tags, notes, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                secret.id,
                secret.name,
                secret.tags_json(),
                secret.notes,
                secret.created_at.to_rfc3339(),
                secret.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|err| {
            if is_constraint_violation(&err) {
                VaultError::secret_exists(&secret.name)
            } else {
                err.into()
            }
        })?;

        insert_fields(&tx, secret)?;
        sync_fts_row(&tx, secret)?;

        tx.commit()?;
        Ok(())
    }

    /// Fetch one secret by name, with its fields in sort order.
    pub fn get_by_name(&self, name: &str) -> VaultResult<Secret> {
        let conn = self.lock();

        let mut secret = conn
            .query_row(
                "SELECT id, name, tags, notes, created_at, updated_at
                 FROM secrets WHERE name = ?1",
                params![name],
                row_to_secret,
            )
            .optional()?
            .ok_or_else(|| VaultError::secret_not_found(name))?;

        secret.fields = load_fields(&conn, &secret.id)?;
        Ok(secret)
    }

    /// Enumerate secrets sorted by name. Fields are not loaded.
    pub fn list(&self, opts: &SearchOptions) -> VaultResult<Vec<Secret>> {
        let mut sql =
            "SELECT id, name, tags, notes, created_at, updated_at FROM secrets".to_string();
        let mut args: Vec<String> = Vec::new();

        if !opts.tags.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&tag_filter("tags", &opts.tags, &mut args));
        }
        sql.push_str(" ORDER BY name");
        if opts.limit > 0 {
            sql.push_str(&format!(" LIMIT {}", opts.limit));
        }

        let conn = self.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), row_to_secret)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Full-text search over name, tags, notes, and field labels, ordered
    /// by relevance rank. Fields are not loaded.
    ///
    /// The query string is handed to the index as-is; callers escape where
    /// its syntax matters.
    pub fn search(&self, query: &str, opts: &SearchOptions) -> VaultResult<Vec<Secret>> {
        let mut sql = "SELECT s.id, s.name, s.tags, s.notes, s.created_at, s.updated_at
             FROM secrets_fts
             JOIN secrets s ON secrets_fts.rowid = s.rowid
             WHERE secrets_fts MATCH ?1"
            .to_string();
        let mut args: Vec<String> = vec![query.to_string()];

        if !opts.tags.is_empty() {
            sql.push_str(" AND ");
            sql.push_str(&tag_filter("s.tags", &opts.tags, &mut args));
        }
        sql.push_str(" ORDER BY rank");
        if opts.limit > 0 {
            sql.push_str(&format!(" LIMIT {}", opts.limit));
        }

        let conn = self.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), row_to_secret)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Rewrite an existing secret and its fields inside one transaction.
    /// Bumps `updated_at` to the current wall-clock time.
    pub fn update(&self, secret: &mut Secret) -> VaultResult<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        secret.updated_at = Utc::now();
        let affected = tx
            .execute(
                "UPDATE secrets SET name = ?1, tags = ?2, notes = ?3, updated_at = ?4
                 WHERE id = ?5",
                params![
                    secret.name,
                    secret.tags_json(),
                    secret.notes,
                    secret.updated_at.to_rfc3339(),
                    secret.id,
                ],
            )
            .map_err(|err| {
                if is_constraint_violation(&err) {
                    VaultError::secret_exists(&secret.name)
                } else {
                    err.into()
                }
            })?;
        if affected == 0 {
            return Err(VaultError::secret_not_found(&secret.name));
        }

        tx.execute(
            "DELETE FROM fields WHERE secret_id = ?1",
            params![secret.id],
        )?;
        insert_fields(&tx, secret)?;
        sync_fts_row(&tx, secret)?;

        tx.commit()?;
        Ok(())
    }

    /// Remove a secret by name. Fields cascade; the delete trigger drops
    /// the FTS row.
    pub fn delete(&self, name: &str) -> VaultResult<()> {
        let affected = self
            .lock()
            .execute("DELETE FROM secrets WHERE name = ?1", params![name])?;
        if affected == 0 {
            return Err(VaultError::secret_not_found(name));
        }
        Ok(())
    }
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn insert_fields(tx: &Transaction<'_>, secret: &Secret) -> VaultResult<()> {
    for field in &secret.fields {
        tx.execute(
            "INSERT INTO fields (id, secret_id, label, value, sensitive, type, sort_order)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                field.id,
                secret.id,
                field.label,
                field.value,
                field.sensitive as i64,
                field.field_type.as_str(),
                field.sort_order,
            ],
        )?;
    }
    Ok(())
}

/// Replace the FTS row for `secret` with one carrying its field labels.
/// Runs after the insert/update triggers, inside the same transaction, so
/// record rows and FTS rows can never diverge.
fn sync_fts_row(tx: &Transaction<'_>, secret: &Secret) -> VaultResult<()> {
    let rowid: i64 = tx.query_row(
        "SELECT rowid FROM secrets WHERE id = ?1",
        params![secret.id],
        |row| row.get(0),
    )?;

    tx.execute("DELETE FROM secrets_fts WHERE rowid = ?1", params![rowid])?;
    tx.execute(
        "INSERT INTO secrets_fts(rowid, name, tags, notes, field_labels)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            rowid,
            secret.name,
            secret.tags_json(),
            secret.notes,
            field_labels(secret),
        ],
    )?;
    Ok(())
}

/// Space-joined field labels for the FTS row. Values never appear here.
fn field_labels(secret: &Secret) -> String {
    secret
        .fields
        .iter()
        .map(|f| f.label.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Rebuild every FTS row from the record and field tables.
fn rebuild_fts_index(tx: &Transaction<'_>) -> VaultResult<()> {
    tx.execute("DELETE FROM secrets_fts", [])?;

    let mut stmt = tx.prepare(
        "SELECT rowid, id, name, tags, notes FROM secrets",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
        ))
    })?;
    let secrets: Vec<_> = rows.collect::<Result<_, _>>()?;
    drop(stmt);

    for (rowid, id, name, tags, notes) in secrets {
        let labels: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT label FROM fields WHERE secret_id = ?1 ORDER BY sort_order",
            )?;
            let labels = stmt.query_map(params![id], |row| row.get(0))?;
            labels.collect::<Result<_, _>>()?
        };

        tx.execute(
            "INSERT INTO secrets_fts(rowid, name, tags, notes, field_labels)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![rowid, name, tags, notes, labels.join(" ")],
        )?;
    }
    Ok(())
}

/// Build an OR filter matching records whose tag JSON contains any of the
/// supplied tags, appending the bind values to `args`. `column` is the
/// (possibly qualified) tags column to test.
fn tag_filter(column: &str, tags: &[String], args: &mut Vec<String>) -> String {
    let conditions: Vec<String> = tags
        .iter()
        .map(|tag| {
            args.push(format!("%\"{tag}\"%"));
            format!("{column} LIKE ?{}", args.len())
        })
        .collect();

    if conditions.len() == 1 {
        conditions.into_iter().next().unwrap_or_default()
    } else {
        format!("({})", conditions.join(" OR "))
    }
}

fn load_fields(conn: &Connection, secret_id: &str) -> VaultResult<Vec<Field>> {
    let mut stmt = conn.prepare(
        "SELECT id, label, value, sensitive, type, sort_order
         FROM fields WHERE secret_id = ?1 ORDER BY sort_order",
    )?;
    let rows = stmt.query_map(params![secret_id], |row| {
        let sensitive: i64 = row.get(3)?;
        let field_type: String = row.get(4)?;
        Ok(Field {
            id: row.get(0)?,
            label: row.get(1)?,
            value: row.get(2)?,
            sensitive: sensitive == 1,
            field_type: FieldType::from_str_lossy(&field_type),
            sort_order: row.get(5)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn row_to_secret(row: &rusqlite::Row<'_>) -> rusqlite::Result<Secret> {
    let tags: String = row.get(2)?;
    let created: String = row.get(4)?;
    let updated: String = row.get(5)?;
    Ok(Secret {
        id: row.get(0)?,
        name: row.get(1)?,
        tags: parse_tags(&tags),
        fields: Vec::new(),
        notes: row.get(3)?,
        created_at: parse_timestamp(&created, 4)?,
        updated_at: parse_timestamp(&updated, 5)?,
    })
}

fn parse_timestamp(s: &str, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(
                column,
                rusqlite::types::Type::Text,
                Box::new(err),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("vault.db")).unwrap();
        (dir, store)
    }

    fn sample_secret(name: &str, tags: &[&str]) -> Secret {
        let mut secret = Secret::new(name);
        secret.tags = tags.iter().map(|t| t.to_string()).collect();
        secret.add_field(Field::new("password", "hunter2"));
        secret
    }

    #[test]
    fn test_create_and_get() {
        let (_dir, store) = test_store();
        let secret = sample_secret("gh", &["dev"]);

        store.create(&secret).unwrap();
        let loaded = store.get_by_name("gh").unwrap();

        assert_eq!(loaded.id, secret.id);
        assert_eq!(loaded.tags, vec!["dev"]);
        assert_eq!(loaded.fields.len(), 1);
        assert_eq!(loaded.fields[0].label, "password");
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let (_dir, store) = test_store();
        assert!(matches!(
            store.get_by_name("ghost"),
            Err(VaultError::NotFound(_))
        ));
    }

    #[test]
    fn test_create_duplicate_name_conflicts() {
        let (_dir, store) = test_store();
        store.create(&sample_secret("gh", &[])).unwrap();

        let result = store.create(&sample_secret("gh", &[]));
        assert!(matches!(result, Err(VaultError::AlreadyExists(_))));
    }

    #[test]
    fn test_update_name_collision_rejected() {
        let (_dir, store) = test_store();
        store.create(&sample_secret("a", &[])).unwrap();
        store.create(&sample_secret("b", &[])).unwrap();

        let mut b = store.get_by_name("b").unwrap();
        b.name = "a".to_string();
        assert!(matches!(
            store.update(&mut b),
            Err(VaultError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_update_bumps_timestamp_and_replaces_fields() {
        let (_dir, store) = test_store();
        store.create(&sample_secret("gh", &[])).unwrap();

        let mut secret = store.get_by_name("gh").unwrap();
        let before = secret.updated_at;
        secret.fields = vec![Field::new("token", "abc")];
        store.update(&mut secret).unwrap();

        let reloaded = store.get_by_name("gh").unwrap();
        assert!(reloaded.updated_at >= before);
        assert_eq!(reloaded.fields.len(), 1);
        assert_eq!(reloaded.fields[0].label, "token");
    }

    #[test]
    fn test_update_missing_is_not_found() {
        let (_dir, store) = test_store();
        let mut ghost = sample_secret("ghost", &[]);
        assert!(matches!(
            store.update(&mut ghost),
            Err(VaultError::NotFound(_))
        ));
    }

    #[test]
    fn test_delete() {
        let (_dir, store) = test_store();
        store.create(&sample_secret("gh", &[])).unwrap();

        store.delete("gh").unwrap();
        assert!(matches!(
            store.get_by_name("gh"),
            Err(VaultError::NotFound(_))
        ));
        assert!(matches!(
            store.delete("gh"),
            Err(VaultError::NotFound(_))
        ));
    }

    #[test]
    fn test_list_sorted_by_name() {
        let (_dir, store) = test_store();
        for name in ["charlie", "alpha", "bravo"] {
            store.create(&sample_secret(name, &[])).unwrap();
        }

        let names: Vec<_> = store
            .list(&SearchOptions::default())
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, ["alpha", "bravo", "charlie"]);
    }

    #[test]
    fn test_list_tag_filter_matches_any() {
        let (_dir, store) = test_store();
        store.create(&sample_secret("a", &["x", "y"])).unwrap();
        store.create(&sample_secret("b", &["y"])).unwrap();
        store.create(&sample_secret("c", &["z"])).unwrap();

        let names = |tags: &[&str]| -> Vec<String> {
            let opts = SearchOptions {
                tags: tags.iter().map(|t| t.to_string()).collect(),
                limit: 0,
            };
            store
                .list(&opts)
                .unwrap()
                .into_iter()
                .map(|s| s.name)
                .collect()
        };

        assert_eq!(names(&["y"]), ["a", "b"]);
        assert_eq!(names(&["z", "x"]), ["a", "c"]);
        assert_eq!(names(&[]), ["a", "b", "c"]);
    }

    #[test]
    fn test_list_limit() {
        let (_dir, store) = test_store();
        for name in ["a", "b", "c"] {
            store.create(&sample_secret(name, &[])).unwrap();
        }

        let opts = SearchOptions {
            tags: Vec::new(),
            limit: 2,
        };
        assert_eq!(store.list(&opts).unwrap().len(), 2);
    }

    #[test]
    fn test_search_finds_name_and_labels_but_not_values() {
        let (_dir, store) = test_store();
        store.create(&sample_secret("mail", &[])).unwrap();

        let opts = SearchOptions::default();
        assert_eq!(store.search("mail", &opts).unwrap().len(), 1);
        // Field label is indexed
        assert_eq!(store.search("password", &opts).unwrap().len(), 1);
        // Field value must never be
        assert!(store.search("hunter2", &opts).unwrap().is_empty());
    }

    #[test]
    fn test_search_excludes_deleted_and_tracks_updates() {
        let (_dir, store) = test_store();
        store.create(&sample_secret("mail", &[])).unwrap();

        let mut secret = store.get_by_name("mail").unwrap();
        secret.fields = vec![Field::new("pin", "1234")];
        store.update(&mut secret).unwrap();

        let opts = SearchOptions::default();
        assert!(store.search("password", &opts).unwrap().is_empty());
        assert_eq!(store.search("pin", &opts).unwrap().len(), 1);

        store.delete("mail").unwrap();
        assert!(store.search("mail", &opts).unwrap().is_empty());
        assert!(store.search("pin", &opts).unwrap().is_empty());
    }

    #[test]
    fn test_search_notes_and_tags() {
        let (_dir, store) = test_store();
        let mut secret = sample_secret("router", &["home"]);
        secret.notes = "garage wifi box".to_string();
        store.create(&secret).unwrap();

        let opts = SearchOptions::default();
        assert_eq!(store.search("garage", &opts).unwrap().len(), 1);
        assert_eq!(store.search("home", &opts).unwrap().len(), 1);
    }

    #[test]
    fn test_meta_roundtrip() {
        let (_dir, store) = test_store();

        store.set_meta("salt", "abc123").unwrap();
        assert_eq!(store.get_meta("salt").unwrap(), "abc123");

        store.set_meta("salt", "def456").unwrap();
        assert_eq!(store.get_meta("salt").unwrap(), "def456");

        assert!(matches!(
            store.get_meta("absent"),
            Err(VaultError::NotFound(_))
        ));
    }

    #[test]
    fn test_reopen_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vault.db");

        let store = Store::open(&path).unwrap();
        store.create(&sample_secret("gh", &["dev"])).unwrap();
        store.close().unwrap();

        // Second open must leave data and schema intact
        let store = Store::open(&path).unwrap();
        assert_eq!(store.get_meta("schema_version").unwrap(), "2");
        let secret = store.get_by_name("gh").unwrap();
        assert_eq!(secret.fields.len(), 1);

        let opts = SearchOptions::default();
        assert_eq!(store.search("password", &opts).unwrap().len(), 1);
    }

    #[test]
    fn test_fts_rebuild_gated_on_schema_version() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vault.db");

        let store = Store::open(&path).unwrap();
        store.create(&sample_secret("gh", &[])).unwrap();
        // Regress the version marker and blank the index, as a pre-labels
        // database would look.
        store.set_meta("schema_version", "1").unwrap();
        {
            let conn = store.lock();
            conn.execute("UPDATE secrets_fts SET field_labels = ''", [])
                .unwrap();
        }
        store.close().unwrap();

        let store = Store::open(&path).unwrap();
        assert_eq!(store.get_meta("schema_version").unwrap(), "2");
        let opts = SearchOptions::default();
        assert_eq!(store.search("password", &opts).unwrap().len(), 1);
    }
}
