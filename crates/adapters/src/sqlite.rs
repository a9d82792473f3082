use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use d1v_core::pagination::{inline_select_sql, PageQuery};
use d1v_core::source::{table_names, LocalOpener, ResultSet, Scalar, SourceError, TableSource};
use rusqlite::backup::Progress;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, DatabaseName};
use tracing::{info, warn};

pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["sqlite", "db", "sqlite3"];

const SQLITE_HEADER: &[u8; 16] = b"SQLite format 3\0";

// Same listing as the hosted path, written with a standard string literal.
const LIST_TABLES_SQL: &str = "SELECT name FROM sqlite_master WHERE type='table'";

#[must_use]
pub fn is_supported_database_file(path: &Path) -> bool {
    path.extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|supported| extension.eq_ignore_ascii_case(supported))
        })
}

/// A database file loaded whole into an in-process engine. Later changes to
/// the file on disk are not observed.
#[derive(Debug, Clone)]
pub struct LocalDatabase {
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
    last_error: Arc<Mutex<Option<String>>>,
}

impl LocalDatabase {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SourceError> {
        let path = path.into();
        if !is_supported_database_file(&path) {
            return Err(SourceError::new(format!(
                "unsupported file type: {} (expected .sqlite, .db or .sqlite3)",
                path.display()
            )));
        }
        let mut conn = Connection::open_in_memory().map_err(to_source_error)?;
        if !is_empty_file(&path)? {
            check_header(&path)?;
            conn.restore(DatabaseName::Main, &path, None::<fn(Progress)>)
                .map_err(to_source_error)?;
        }
        info!(path = %path.display(), "loaded local database");

        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
            last_error: Arc::new(Mutex::new(None)),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Message of the most recent failed page query, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn tables_blocking(&self) -> Result<Vec<String>, SourceError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let result = run_query(&conn, LIST_TABLES_SQL).map_err(to_source_error)?;
        Ok(table_names(&result))
    }

    /// Failed statements yield an empty page; the message is kept in [`Self::last_error`].
    pub fn select_blocking(&self, query: &PageQuery) -> ResultSet {
        let sql = inline_select_sql(query);
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let outcome = run_query(&conn, &sql);
        let mut last_error = self
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match outcome {
            Ok(result) => {
                *last_error = None;
                result
            }
            Err(error) => {
                warn!(table = %query.table, error = %error, "local page query failed");
                *last_error = Some(error.to_string());
                ResultSet::empty()
            }
        }
    }
}

#[async_trait]
impl TableSource for LocalDatabase {
    async fn list_tables(&self) -> Result<Vec<String>, SourceError> {
        let database = self.clone();
        tokio::task::spawn_blocking(move || database.tables_blocking())
            .await
            .map_err(|error| SourceError::new(format!("local query task failed: {error}")))?
    }

    async fn select_page(&self, query: &PageQuery) -> Result<ResultSet, SourceError> {
        let database = self.clone();
        let query = query.clone();
        tokio::task::spawn_blocking(move || database.select_blocking(&query))
            .await
            .map_err(|error| SourceError::new(format!("local query task failed: {error}")))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteOpener;

#[async_trait]
impl LocalOpener for SqliteOpener {
    async fn open(&self, path: &Path) -> Result<Arc<dyn TableSource>, SourceError> {
        let path = path.to_path_buf();
        let database = tokio::task::spawn_blocking(move || LocalDatabase::open(path))
            .await
            .map_err(|error| SourceError::new(format!("local open task failed: {error}")))??;
        Ok(Arc::new(database))
    }
}

// A zero-length file is a valid, empty database.
fn is_empty_file(path: &Path) -> Result<bool, SourceError> {
    fs::metadata(path)
        .map(|metadata| metadata.len() == 0)
        .map_err(|error| SourceError::new(format!("failed to read {}: {error}", path.display())))
}

fn check_header(path: &Path) -> Result<(), SourceError> {
    let mut header = [0_u8; 16];
    File::open(path)
        .and_then(|mut file| file.read_exact(&mut header))
        .map_err(|error| {
            SourceError::new(format!("failed to read {}: {error}", path.display()))
        })?;
    if &header == SQLITE_HEADER {
        Ok(())
    } else {
        Err(SourceError::new(format!(
            "{} is not a SQLite database",
            path.display()
        )))
    }
}

fn run_query(conn: &Connection, sql: &str) -> rusqlite::Result<ResultSet> {
    let mut statement = conn.prepare(sql)?;
    let columns = statement
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect::<Vec<_>>();
    let width = columns.len();

    let mut rows = statement.query([])?;
    let mut collected = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(width);
        for index in 0..width {
            values.push(value_to_scalar(row.get_ref(index)?));
        }
        collected.push(values);
    }

    Ok(ResultSet {
        columns,
        rows: collected,
    })
}

fn value_to_scalar(value: ValueRef<'_>) -> Scalar {
    match value {
        ValueRef::Null => Scalar::Null,
        ValueRef::Integer(value) => Scalar::Integer(value),
        ValueRef::Real(value) => Scalar::Real(value),
        ValueRef::Text(bytes) => Scalar::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Scalar::Blob(bytes.to_vec()),
    }
}

fn to_source_error(error: rusqlite::Error) -> SourceError {
    SourceError::new(error.to_string())
}
