//! Persistence of templates and generated cases.
//!
//! The pipeline talks to storage through the [`Store`] trait; [`SqliteStore`]
//! is the bundled implementation. Every row is written once by its creator.
//! Templates are archived (`is_active = 0`), never deleted, so cases keep a
//! valid owner. Timestamps are RFC 3339 UTC strings with microseconds, which
//! sort chronologically as text.

use crate::error::LexPrepError;
use crate::manifest::Manifest;
use crate::pipeline::context::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// A template about to be inserted.
#[derive(Debug, Clone)]
pub struct NewTemplate {
    pub name: String,
    pub description: Option<String>,
    pub manifest: Manifest,
    pub docx_path: PathBuf,
}

/// A stored template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateRecord {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub manifest: Manifest,
    pub docx_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
}

/// A case about to be inserted. Both artifacts must already exist.
#[derive(Debug, Clone)]
pub struct NewCase {
    pub template_id: i64,
    pub doc_name: Option<String>,
    pub input: Context,
    pub filled_path: PathBuf,
    pub converted_path: PathBuf,
}

/// A stored case, joined with its template's name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub id: i64,
    pub template_id: i64,
    pub template_name: String,
    pub doc_name: Option<String>,
    pub input: Context,
    pub filled_path: Option<PathBuf>,
    pub converted_path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
}

/// Storage operations the pipeline needs.
///
/// Implementations must be `Send + Sync`; single-row atomicity is enough.
pub trait Store: Send + Sync {
    fn create_template(&self, template: &NewTemplate) -> Result<i64, LexPrepError>;

    /// Templates newest first, optionally only active ones.
    fn list_templates(&self, active_only: bool) -> Result<Vec<TemplateRecord>, LexPrepError>;

    /// # Errors
    /// [`LexPrepError::TemplateNotFound`] for an unknown id.
    fn get_template(&self, id: i64) -> Result<TemplateRecord, LexPrepError>;

    /// Mark a template inactive. Archiving twice is not an error.
    fn archive_template(&self, id: i64) -> Result<(), LexPrepError>;

    /// Number of template rows, archived included.
    fn count_templates(&self) -> Result<usize, LexPrepError>;

    fn create_case(&self, case: &NewCase) -> Result<i64, LexPrepError>;

    /// Cases newest first.
    fn list_cases(&self) -> Result<Vec<CaseRecord>, LexPrepError>;

    /// # Errors
    /// [`LexPrepError::CaseNotFound`] for an unknown id.
    fn get_case(&self, id: i64) -> Result<CaseRecord, LexPrepError>;

    /// Remove a case row and return what it held.
    fn delete_case(&self, id: i64) -> Result<CaseRecord, LexPrepError>;
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS templates (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    name          TEXT NOT NULL,
    description   TEXT,
    manifest_json TEXT NOT NULL,
    docx_path     TEXT NOT NULL,
    created_at    TEXT NOT NULL,
    is_active     INTEGER NOT NULL DEFAULT 1
);
CREATE TABLE IF NOT EXISTS cases (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    template_id INTEGER NOT NULL REFERENCES templates(id),
    doc_name    TEXT,
    input_json  TEXT NOT NULL,
    docx_path   TEXT,
    rtf_path    TEXT,
    created_at  TEXT NOT NULL
);
";

/// Columns added after the first schema; applied to older databases.
const MIGRATIONS: &[(&str, &str, &str)] = &[
    ("templates", "is_active", "INTEGER NOT NULL DEFAULT 1"),
    ("cases", "doc_name", "TEXT"),
];

const CASE_SELECT: &str = "
SELECT c.id, c.template_id, t.name, c.doc_name, c.input_json, c.docx_path, c.rtf_path, c.created_at
FROM cases c JOIN templates t ON t.id = c.template_id";

const TEMPLATE_SELECT: &str = "
SELECT id, name, description, manifest_json, docx_path, created_at, is_active FROM templates";

fn storage(operation: &'static str) -> impl Fn(rusqlite::Error) -> LexPrepError {
    move |e| LexPrepError::Storage {
        operation,
        detail: e.to_string(),
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(raw: &str, operation: &'static str) -> Result<DateTime<Utc>, LexPrepError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| LexPrepError::Storage {
            operation,
            detail: format!("bad timestamp '{raw}': {e}"),
        })
}

fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Template row as stored, before JSON decoding.
struct RawTemplate {
    id: i64,
    name: String,
    description: Option<String>,
    manifest_json: String,
    docx_path: String,
    created_at: String,
    is_active: bool,
}

impl RawTemplate {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            manifest_json: row.get(3)?,
            docx_path: row.get(4)?,
            created_at: row.get(5)?,
            is_active: row.get(6)?,
        })
    }

    fn decode(self) -> Result<TemplateRecord, LexPrepError> {
        let manifest = serde_json::from_str(&self.manifest_json).map_err(|e| LexPrepError::Storage {
            operation: "read template",
            detail: format!("template #{} has an unreadable manifest: {e}", self.id),
        })?;
        Ok(TemplateRecord {
            id: self.id,
            name: self.name,
            description: self.description,
            manifest,
            docx_path: PathBuf::from(self.docx_path),
            created_at: parse_time(&self.created_at, "read template")?,
            is_active: self.is_active,
        })
    }
}

/// Case row as stored, before JSON decoding.
struct RawCase {
    id: i64,
    template_id: i64,
    template_name: String,
    doc_name: Option<String>,
    input_json: String,
    docx_path: Option<String>,
    rtf_path: Option<String>,
    created_at: String,
}

impl RawCase {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            template_id: row.get(1)?,
            template_name: row.get(2)?,
            doc_name: row.get(3)?,
            input_json: row.get(4)?,
            docx_path: row.get(5)?,
            rtf_path: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn decode(self) -> Result<CaseRecord, LexPrepError> {
        let input = serde_json::from_str(&self.input_json).map_err(|e| LexPrepError::Storage {
            operation: "read case",
            detail: format!("case #{} has unreadable input: {e}", self.id),
        })?;
        Ok(CaseRecord {
            id: self.id,
            template_id: self.template_id,
            template_name: self.template_name,
            doc_name: self.doc_name,
            input,
            filled_path: self.docx_path.map(PathBuf::from),
            converted_path: self.rtf_path.map(PathBuf::from),
            created_at: parse_time(&self.created_at, "read case")?,
        })
    }
}

/// SQLite-backed [`Store`].
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and bring its schema
    /// up to date.
    pub fn open(path: &Path) -> Result<Self, LexPrepError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| LexPrepError::Storage {
                operation: "open",
                detail: format!("{}: {e}", parent.display()),
            })?;
        }
        let conn = Connection::open(path).map_err(storage("open"))?;
        info!("Opened database '{}'", path.display());
        Self::init(conn)
    }

    /// A private in-memory database.
    pub fn open_in_memory() -> Result<Self, LexPrepError> {
        Self::init(Connection::open_in_memory().map_err(storage("open"))?)
    }

    fn init(conn: Connection) -> Result<Self, LexPrepError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(storage("open"))?;
        conn.execute_batch(SCHEMA).map_err(storage("create schema"))?;
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, LexPrepError> {
        self.conn
            .lock()
            .map_err(|_| LexPrepError::Internal("database connection lock poisoned".into()))
    }
}

/// Add columns that older databases lack.
fn migrate(conn: &Connection) -> Result<(), LexPrepError> {
    for (table, column, decl) in MIGRATIONS {
        let columns: Vec<String> = conn
            .prepare(&format!("PRAGMA table_info({table})"))
            .map_err(storage("migrate"))?
            .query_map([], |row| row.get::<_, String>(1))
            .map_err(storage("migrate"))?
            .collect::<Result<_, _>>()
            .map_err(storage("migrate"))?;
        if !columns.iter().any(|c| c == column) {
            info!("Migrating: adding {table}.{column}");
            conn.execute(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl}"), [])
                .map_err(storage("migrate"))?;
        }
    }
    Ok(())
}

impl Store for SqliteStore {
    fn create_template(&self, template: &NewTemplate) -> Result<i64, LexPrepError> {
        let manifest_json = serde_json::to_string(&template.manifest)
            .map_err(|e| LexPrepError::Internal(format!("manifest serialisation: {e}")))?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO templates (name, description, manifest_json, docx_path, created_at, is_active)
             VALUES (?1, ?2, ?3, ?4, ?5, 1)",
            params![
                template.name,
                template.description,
                manifest_json,
                path_text(&template.docx_path),
                now()
            ],
        )
        .map_err(storage("create template"))?;
        let id = conn.last_insert_rowid();
        debug!("Inserted template #{id} '{}'", template.name);
        Ok(id)
    }

    fn list_templates(&self, active_only: bool) -> Result<Vec<TemplateRecord>, LexPrepError> {
        let sql = format!(
            "{TEMPLATE_SELECT} {} ORDER BY created_at DESC, id DESC",
            if active_only { "WHERE is_active = 1" } else { "" }
        );
        let conn = self.conn()?;
        let raw: Vec<RawTemplate> = conn
            .prepare(&sql)
            .map_err(storage("list templates"))?
            .query_map([], RawTemplate::from_row)
            .map_err(storage("list templates"))?
            .collect::<Result<_, _>>()
            .map_err(storage("list templates"))?;
        raw.into_iter().map(RawTemplate::decode).collect()
    }

    fn get_template(&self, id: i64) -> Result<TemplateRecord, LexPrepError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("{TEMPLATE_SELECT} WHERE id = ?1"),
            params![id],
            RawTemplate::from_row,
        )
        .optional()
        .map_err(storage("get template"))?
        .ok_or(LexPrepError::TemplateNotFound { id })?
        .decode()
    }

    fn archive_template(&self, id: i64) -> Result<(), LexPrepError> {
        let changed = self
            .conn()?
            .execute("UPDATE templates SET is_active = 0 WHERE id = ?1", params![id])
            .map_err(storage("archive template"))?;
        if changed == 0 {
            return Err(LexPrepError::TemplateNotFound { id });
        }
        info!("Archived template #{id}");
        Ok(())
    }

    fn count_templates(&self) -> Result<usize, LexPrepError> {
        let n: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM templates", [], |row| row.get(0))
            .map_err(storage("count templates"))?;
        Ok(n.max(0) as usize)
    }

    fn create_case(&self, case: &NewCase) -> Result<i64, LexPrepError> {
        let input_json = serde_json::to_string(&case.input)
            .map_err(|e| LexPrepError::Internal(format!("context serialisation: {e}")))?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO cases (template_id, doc_name, input_json, docx_path, rtf_path, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                case.template_id,
                case.doc_name,
                input_json,
                path_text(&case.filled_path),
                path_text(&case.converted_path),
                now()
            ],
        )
        .map_err(storage("create case"))?;
        let id = conn.last_insert_rowid();
        debug!("Inserted case #{id} for template #{}", case.template_id);
        Ok(id)
    }

    fn list_cases(&self) -> Result<Vec<CaseRecord>, LexPrepError> {
        let conn = self.conn()?;
        let raw: Vec<RawCase> = conn
            .prepare(&format!("{CASE_SELECT} ORDER BY c.created_at DESC, c.id DESC"))
            .map_err(storage("list cases"))?
            .query_map([], RawCase::from_row)
            .map_err(storage("list cases"))?
            .collect::<Result<_, _>>()
            .map_err(storage("list cases"))?;
        raw.into_iter().map(RawCase::decode).collect()
    }

    fn get_case(&self, id: i64) -> Result<CaseRecord, LexPrepError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("{CASE_SELECT} WHERE c.id = ?1"),
            params![id],
            RawCase::from_row,
        )
        .optional()
        .map_err(storage("get case"))?
        .ok_or(LexPrepError::CaseNotFound { id })?
        .decode()
    }

    fn delete_case(&self, id: i64) -> Result<CaseRecord, LexPrepError> {
        let record = self.get_case(id)?;
        let changed = self
            .conn()?
            .execute("DELETE FROM cases WHERE id = ?1", params![id])
            .map_err(storage("delete case"))?;
        if changed == 0 {
            return Err(LexPrepError::CaseNotFound { id });
        }
        info!("Deleted case #{id}");
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::FieldSpec;
    use crate::pipeline::context::ContextValue;

    fn new_template(name: &str) -> NewTemplate {
        NewTemplate {
            name: name.into(),
            description: Some("desc".into()),
            manifest: Manifest {
                title: name.into(),
                fields: vec![FieldSpec::text("client_name")],
            },
            docx_path: PathBuf::from(format!("data/templates/{name}.docx")),
        }
    }

    fn new_case(template_id: i64, doc: &str) -> NewCase {
        let mut input = Context::new();
        input.insert("client_name".into(), ContextValue::Text("Acme".into()));
        NewCase {
            template_id,
            doc_name: Some(doc.into()),
            input,
            filled_path: PathBuf::from(format!("outputs/{doc}.docx")),
            converted_path: PathBuf::from(format!("outputs/{doc}.rtf")),
        }
    }

    #[test]
    fn template_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store.create_template(&new_template("Lease")).unwrap();
        let t = store.get_template(id).unwrap();
        assert_eq!(t.name, "Lease");
        assert_eq!(t.description.as_deref(), Some("desc"));
        assert_eq!(t.manifest.fields[0].key, "client_name");
        assert!(t.is_active);
        assert_eq!(store.count_templates().unwrap(), 1);
    }

    #[test]
    fn listings_are_newest_first() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = store.create_template(&new_template("A")).unwrap();
        let b = store.create_template(&new_template("B")).unwrap();
        let ids: Vec<i64> = store.list_templates(false).unwrap().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![b, a]);

        let c1 = store.create_case(&new_case(a, "one")).unwrap();
        let c2 = store.create_case(&new_case(b, "two")).unwrap();
        let cases = store.list_cases().unwrap();
        assert_eq!(cases.iter().map(|c| c.id).collect::<Vec<_>>(), vec![c2, c1]);
        assert_eq!(cases[0].template_name, "B");
        assert_eq!(cases[1].template_name, "A");
    }

    #[test]
    fn archive_hides_from_active_listing_only() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store.create_template(&new_template("Old")).unwrap();
        let case = store.create_case(&new_case(id, "kept")).unwrap();
        store.archive_template(id).unwrap();

        assert!(store.list_templates(true).unwrap().is_empty());
        assert_eq!(store.list_templates(false).unwrap().len(), 1);
        assert!(!store.get_template(id).unwrap().is_active);
        assert_eq!(store.get_case(case).unwrap().template_name, "Old");
        store.archive_template(id).unwrap();
    }

    #[test]
    fn unknown_ids() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(matches!(store.get_template(9), Err(LexPrepError::TemplateNotFound { id: 9 })));
        assert!(matches!(store.archive_template(9), Err(LexPrepError::TemplateNotFound { .. })));
        assert!(matches!(store.get_case(4), Err(LexPrepError::CaseNotFound { id: 4 })));
        assert!(matches!(store.delete_case(4), Err(LexPrepError::CaseNotFound { .. })));
    }

    #[test]
    fn case_requires_existing_template() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = store.create_case(&new_case(42, "orphan")).unwrap_err();
        assert!(matches!(err, LexPrepError::Storage { .. }));
    }

    #[test]
    fn delete_case_returns_record() {
        let store = SqliteStore::open_in_memory().unwrap();
        let t = store.create_template(&new_template("T")).unwrap();
        let c = store.create_case(&new_case(t, "gone")).unwrap();
        let removed = store.delete_case(c).unwrap();
        assert_eq!(removed.filled_path, Some(PathBuf::from("outputs/gone.docx")));
        assert_eq!(removed.input["client_name"], ContextValue::Text("Acme".into()));
        assert!(store.list_cases().unwrap().is_empty());
    }

    #[test]
    fn migrates_older_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE templates (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL,
                    description TEXT, manifest_json TEXT NOT NULL, docx_path TEXT NOT NULL,
                    created_at TEXT NOT NULL);
                 CREATE TABLE cases (id INTEGER PRIMARY KEY AUTOINCREMENT, template_id INTEGER NOT NULL,
                    input_json TEXT NOT NULL, docx_path TEXT, rtf_path TEXT, created_at TEXT NOT NULL);",
            )
            .unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        let t = store.create_template(&new_template("Migrated")).unwrap();
        let c = store.create_case(&new_case(t, "named")).unwrap();
        assert_eq!(store.get_case(c).unwrap().doc_name.as_deref(), Some("named"));
        assert!(store.get_template(t).unwrap().is_active);
    }
}
