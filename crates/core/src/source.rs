use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pagination::PageQuery;
use crate::storage::Token;

pub const LIST_TABLES_SQL: &str = r#"SELECT name FROM sqlite_master WHERE type="table""#;

/// Key/value bookkeeping table the hosted provider creates in every database.
pub const INTERNAL_TABLE: &str = "_cf_KV";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Remote,
    Local,
}

impl Mode {
    #[must_use]
    pub fn storage_value(self) -> &'static str {
        match self {
            Self::Remote => "remote",
            Self::Local => "local",
        }
    }

    #[must_use]
    pub fn from_storage_value(value: &str) -> Option<Self> {
        match value.trim() {
            "remote" => Some(Self::Remote),
            "local" => Some(Self::Local),
            _ => None,
        }
    }

    #[must_use]
    pub fn toggled(self) -> Self {
        match self {
            Self::Remote => Self::Local,
            Self::Local => Self::Remote,
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Remote => "Remote",
            Self::Local => "Local",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Database {
    pub uuid: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Scalar {
    #[must_use]
    pub fn display_text(&self) -> String {
        match self {
            Self::Null => "NULL".to_string(),
            Self::Integer(value) => value.to_string(),
            Self::Real(value) => value.to_string(),
            Self::Text(value) => value.clone(),
            Self::Blob(bytes) => {
                let mut rendered = String::with_capacity(2 + bytes.len() * 2);
                rendered.push_str("0x");
                for byte in bytes {
                    let _ = write!(rendered, "{byte:02x}");
                }
                rendered
            }
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Scalar>>,
}

impl ResultSet {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Flattens an introspection result into table names, dropping the provider's
/// internal table and keeping the original order.
#[must_use]
pub fn table_names(result: &ResultSet) -> Vec<String> {
    result
        .rows
        .iter()
        .flatten()
        .filter_map(Scalar::as_text)
        .filter(|name| *name != INTERNAL_TABLE)
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SourceError {
    message: String,
}

impl SourceError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

#[async_trait]
pub trait TableSource: Send + Sync {
    async fn list_tables(&self) -> Result<Vec<String>, SourceError>;
    async fn select_page(&self, query: &PageQuery) -> Result<ResultSet, SourceError>;
}

#[async_trait]
pub trait RemoteDirectory: Send + Sync {
    async fn list_accounts(&self, token: &Token) -> Result<Vec<Account>, SourceError>;

    async fn list_databases(
        &self,
        token: &Token,
        account_id: &str,
    ) -> Result<Vec<Database>, SourceError>;

    fn table_source(
        &self,
        token: &Token,
        account_id: &str,
        database_id: &str,
    ) -> Arc<dyn TableSource>;
}

#[async_trait]
pub trait LocalOpener: Send + Sync {
    async fn open(&self, path: &Path) -> Result<Arc<dyn TableSource>, SourceError>;
}
