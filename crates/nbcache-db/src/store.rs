use crate::error::StoreError;
use crate::records::{validate_assets, validate_read_recipe, CacheRecord, ProjectRecord};
use crate::now_millis;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// File name of the metadata database under the cache root.
pub const DB_NAME: &str = "global.db";

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS settings (
    pk INTEGER PRIMARY KEY AUTOINCREMENT,
    key TEXT NOT NULL UNIQUE,
    value TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS nbproject (
    pk INTEGER PRIMARY KEY AUTOINCREMENT,
    uri TEXT NOT NULL UNIQUE,
    read_recipe TEXT NOT NULL,
    assets TEXT NOT NULL,
    exec_data TEXT,
    created INTEGER NOT NULL,
    traceback TEXT
);
CREATE TABLE IF NOT EXISTS nbcache (
    pk INTEGER PRIMARY KEY AUTOINCREMENT,
    fingerprint TEXT NOT NULL UNIQUE,
    uri TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    data TEXT,
    created INTEGER NOT NULL,
    accessed INTEGER NOT NULL
);
";

/// A handle to the metadata database.
///
/// The handle owns one SQLite connection and is not shareable across
/// threads; workers each open their own.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (creating if needed) the database in the given directory.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(dir.join(DB_NAME))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    // -- settings ---------------------------------------------------------

    pub fn set_setting(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        let text = serde_json::to_string(value)?;
        self.conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, text],
        )?;
        Ok(())
    }

    /// Return a setting value, or `None` when the key is absent.
    pub fn get_setting(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let text: Option<String> = self
            .conn
            .query_row("SELECT value FROM settings WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        match text {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    pub fn get_all_settings(&self) -> Result<BTreeMap<String, Value>, StoreError> {
        let mut stmt = self.conn.prepare("SELECT key, value FROM settings")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut settings = BTreeMap::new();
        for row in rows {
            let (key, text) = row?;
            settings.insert(key, serde_json::from_str(&text)?);
        }
        Ok(settings)
    }

    // -- project records --------------------------------------------------

    /// Create a project record.
    ///
    /// On a URI-uniqueness violation either raises `UriExists` or, with
    /// `raise_on_exists = false`, returns the existing record.
    pub fn create_project(
        &self,
        uri: &str,
        read_recipe: &Value,
        assets: &[String],
        raise_on_exists: bool,
    ) -> Result<ProjectRecord, StoreError> {
        validate_read_recipe(read_recipe)?;
        validate_assets(uri, assets)?;

        let recipe_text = serde_json::to_string(read_recipe)?;
        let assets_text = serde_json::to_string(assets)?;
        let tx = self.conn.unchecked_transaction()?;
        let inserted = tx.execute(
            "INSERT INTO nbproject (uri, read_recipe, assets, created) VALUES (?1, ?2, ?3, ?4)",
            params![uri, recipe_text, assets_text, now_millis()],
        );
        match inserted {
            Ok(_) => {
                let pk = tx.last_insert_rowid();
                let record = project_by_pk_on(&tx, pk)?;
                tx.commit()?;
                Ok(record)
            }
            Err(err) if is_unique_violation(&err) => {
                drop(tx);
                if raise_on_exists {
                    Err(StoreError::UriExists(uri.to_string()))
                } else {
                    self.project_by_uri(uri)
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn project_by_pk(&self, pk: i64) -> Result<ProjectRecord, StoreError> {
        project_by_pk_on(&self.conn, pk)
    }

    pub fn project_by_uri(&self, uri: &str) -> Result<ProjectRecord, StoreError> {
        let raw = self
            .conn
            .query_row(
                &format!("SELECT {PROJECT_COLUMNS} FROM nbproject WHERE uri = ?1"),
                params![uri],
                read_project_row,
            )
            .optional()?;
        raw.ok_or_else(|| StoreError::ProjectNotFound(format!("URI {uri}")))?
            .try_into()
    }

    pub fn projects_all(&self) -> Result<Vec<ProjectRecord>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {PROJECT_COLUMNS} FROM nbproject ORDER BY pk"))?;
        let rows = stmt.query_map([], read_project_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?.try_into()?);
        }
        Ok(records)
    }

    pub fn remove_projects_by_pks(&self, pks: &[i64]) -> Result<(), StoreError> {
        if pks.is_empty() {
            return Ok(());
        }
        self.conn.execute(
            &format!("DELETE FROM nbproject WHERE pk IN ({})", in_clause(pks.len())),
            params_from_iter(pks),
        )?;
        Ok(())
    }

    pub fn remove_projects_by_uris(&self, uris: &[String]) -> Result<(), StoreError> {
        if uris.is_empty() {
            return Ok(());
        }
        self.conn.execute(
            &format!("DELETE FROM nbproject WHERE uri IN ({})", in_clause(uris.len())),
            params_from_iter(uris),
        )?;
        Ok(())
    }

    /// Record (or clear, with `None`) the traceback of a failed execution.
    pub fn set_traceback(&self, uri: &str, traceback: Option<&str>) -> Result<(), StoreError> {
        let updated = self.conn.execute(
            "UPDATE nbproject SET traceback = ?1 WHERE uri = ?2",
            params![traceback, uri],
        )?;
        if updated == 0 {
            return Err(StoreError::ProjectNotFound(format!("URI {uri}")));
        }
        Ok(())
    }

    pub fn clear_tracebacks(&self, pks: &[i64]) -> Result<(), StoreError> {
        if pks.is_empty() {
            return Ok(());
        }
        self.conn.execute(
            &format!(
                "UPDATE nbproject SET traceback = NULL WHERE pk IN ({})",
                in_clause(pks.len())
            ),
            params_from_iter(pks),
        )?;
        Ok(())
    }

    // -- cache records ----------------------------------------------------

    /// Create a cache record; raises `FingerprintExists` on a duplicate.
    pub fn create_cache(
        &self,
        uri: &str,
        fingerprint: &str,
        data: &Value,
        description: &str,
    ) -> Result<CacheRecord, StoreError> {
        let data_text = serde_json::to_string(data)?;
        let now = now_millis();
        let tx = self.conn.unchecked_transaction()?;
        let inserted = tx.execute(
            "INSERT INTO nbcache (fingerprint, uri, description, data, created, accessed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![fingerprint, uri, description, data_text, now],
        );
        match inserted {
            Ok(_) => {
                let pk = tx.last_insert_rowid();
                let record = cache_by_pk_on(&tx, pk)?;
                tx.commit()?;
                Ok(record)
            }
            Err(err) if is_unique_violation(&err) => {
                Err(StoreError::FingerprintExists(fingerprint.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn cache_by_pk(&self, pk: i64) -> Result<CacheRecord, StoreError> {
        cache_by_pk_on(&self.conn, pk)
    }

    pub fn cache_by_fingerprint(&self, fingerprint: &str) -> Result<CacheRecord, StoreError> {
        let raw = self
            .conn
            .query_row(
                &format!("SELECT {CACHE_COLUMNS} FROM nbcache WHERE fingerprint = ?1"),
                params![fingerprint],
                read_cache_row,
            )
            .optional()?;
        raw.ok_or_else(|| StoreError::CacheNotFound(format!("fingerprint {fingerprint}")))?
            .try_into()
    }

    /// All cache records created from the given origin URI.
    pub fn caches_by_uri(&self, uri: &str) -> Result<Vec<CacheRecord>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {CACHE_COLUMNS} FROM nbcache WHERE uri = ?1"))?;
        let rows = stmt.query_map(params![uri], read_cache_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?.try_into()?);
        }
        Ok(records)
    }

    pub fn caches_all(&self) -> Result<Vec<CacheRecord>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {CACHE_COLUMNS} FROM nbcache ORDER BY pk"))?;
        let rows = stmt.query_map([], read_cache_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?.try_into()?);
        }
        Ok(records)
    }

    /// Update a record's last-accessed time.
    pub fn touch(&self, pk: i64) -> Result<(), StoreError> {
        let updated = self.conn.execute(
            "UPDATE nbcache SET accessed = ?1 WHERE pk = ?2",
            params![now_millis(), pk],
        )?;
        if updated == 0 {
            return Err(StoreError::CacheNotFound(format!("pk {pk}")));
        }
        Ok(())
    }

    pub fn touch_fingerprint(&self, fingerprint: &str) -> Result<(), StoreError> {
        let updated = self.conn.execute(
            "UPDATE nbcache SET accessed = ?1 WHERE fingerprint = ?2",
            params![now_millis(), fingerprint],
        )?;
        if updated == 0 {
            return Err(StoreError::CacheNotFound(format!(
                "fingerprint {fingerprint}"
            )));
        }
        Ok(())
    }

    pub fn remove_caches(&self, pks: &[i64]) -> Result<(), StoreError> {
        if pks.is_empty() {
            return Ok(());
        }
        self.conn.execute(
            &format!("DELETE FROM nbcache WHERE pk IN ({})", in_clause(pks.len())),
            params_from_iter(pks),
        )?;
        Ok(())
    }

    /// Pks of every record not in the `keep` most recently accessed.
    pub fn evictable_pks(&self, keep: i64) -> Result<Vec<i64>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT pk FROM nbcache
             WHERE pk NOT IN (SELECT pk FROM nbcache ORDER BY accessed DESC, pk DESC LIMIT ?1)
             ORDER BY pk",
        )?;
        let rows = stmt.query_map(params![keep], |row| row.get::<_, i64>(0))?;
        let mut pks = Vec::new();
        for row in rows {
            pks.push(row?);
        }
        Ok(pks)
    }
}

fn project_by_pk_on(conn: &Connection, pk: i64) -> Result<ProjectRecord, StoreError> {
    let raw = conn
        .query_row(
            &format!("SELECT {PROJECT_COLUMNS} FROM nbproject WHERE pk = ?1"),
            params![pk],
            read_project_row,
        )
        .optional()?;
    raw.ok_or_else(|| StoreError::ProjectNotFound(format!("pk {pk}")))?
        .try_into()
}

fn cache_by_pk_on(conn: &Connection, pk: i64) -> Result<CacheRecord, StoreError> {
    let raw = conn
        .query_row(
            &format!("SELECT {CACHE_COLUMNS} FROM nbcache WHERE pk = ?1"),
            params![pk],
            read_cache_row,
        )
        .optional()?;
    raw.ok_or_else(|| StoreError::CacheNotFound(format!("pk {pk}")))?
        .try_into()
}

const PROJECT_COLUMNS: &str = "pk, uri, read_recipe, assets, exec_data, created, traceback";
const CACHE_COLUMNS: &str = "pk, fingerprint, uri, description, data, created, accessed";

/// JSON columns come out of SQLite as text; parsing happens in `TryFrom`
/// so query closures only deal with `rusqlite` errors.
struct RawProjectRow {
    pk: i64,
    uri: String,
    read_recipe: String,
    assets: String,
    exec_data: Option<String>,
    created: i64,
    traceback: Option<String>,
}

fn read_project_row(row: &Row<'_>) -> rusqlite::Result<RawProjectRow> {
    Ok(RawProjectRow {
        pk: row.get(0)?,
        uri: row.get(1)?,
        read_recipe: row.get(2)?,
        assets: row.get(3)?,
        exec_data: row.get(4)?,
        created: row.get(5)?,
        traceback: row.get(6)?,
    })
}

impl TryFrom<RawProjectRow> for ProjectRecord {
    type Error = StoreError;

    fn try_from(raw: RawProjectRow) -> Result<Self, StoreError> {
        Ok(ProjectRecord {
            pk: raw.pk,
            uri: raw.uri,
            read_recipe: serde_json::from_str(&raw.read_recipe)?,
            assets: serde_json::from_str(&raw.assets)?,
            exec_data: raw.exec_data.as_deref().map(serde_json::from_str).transpose()?,
            created: raw.created,
            traceback: raw.traceback,
        })
    }
}

struct RawCacheRow {
    pk: i64,
    fingerprint: String,
    uri: String,
    description: String,
    data: Option<String>,
    created: i64,
    accessed: i64,
}

fn read_cache_row(row: &Row<'_>) -> rusqlite::Result<RawCacheRow> {
    Ok(RawCacheRow {
        pk: row.get(0)?,
        fingerprint: row.get(1)?,
        uri: row.get(2)?,
        description: row.get(3)?,
        data: row.get(4)?,
        created: row.get(5)?,
        accessed: row.get(6)?,
    })
}

impl TryFrom<RawCacheRow> for CacheRecord {
    type Error = StoreError;

    fn try_from(raw: RawCacheRow) -> Result<Self, StoreError> {
        Ok(CacheRecord {
            pk: raw.pk,
            fingerprint: raw.fingerprint,
            uri: raw.uri,
            description: raw.description,
            data: match raw.data {
                Some(text) => serde_json::from_str(&text)?,
                None => Value::Object(serde_json::Map::new()),
            },
            created: raw.created,
            accessed: raw.accessed,
        })
    }
}

fn in_clause(n: usize) -> String {
    vec!["?"; n].join(",")
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
