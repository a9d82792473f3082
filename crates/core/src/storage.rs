use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::source::Mode;

pub const TOKEN_KEY: &str = "cf-api-token";
pub const MODE_KEY: &str = "viewer-mode";

/// Bearer token for the hosted provider. Never printed.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Token(String);

impl Token {
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then(|| Self(trimmed.to_string()))
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token(<redacted>)")
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("config directory is unavailable for this platform")]
    ConfigDirUnavailable,
    #[error("failed to read storage file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse storage file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to create config directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize storage: {source}")]
    Serialize {
        #[source]
        source: toml::ser::Error,
    },
    #[error("failed to write storage file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("credential backend failed: {0}")]
    Backend(String),
}

pub trait CredentialStore: Send {
    fn load(&self) -> Result<Option<Token>, StorageError>;
    fn save(&mut self, token: &Token) -> Result<(), StorageError>;
    fn clear(&mut self) -> Result<(), StorageError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StorageDocument {
    #[serde(default)]
    entries: BTreeMap<String, String>,
}

/// Flat key/value document persisted as TOML, scoped to the current user.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl FileStorage {
    pub fn load_default() -> Result<Self, StorageError> {
        Self::load_from_path(default_config_dir()?.join("storage.toml"))
    }

    pub fn load_from_path(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        if !path.exists() {
            return Ok(Self {
                path,
                entries: BTreeMap::new(),
            });
        }

        let raw = fs::read_to_string(&path).map_err(|source| StorageError::Read {
            path: path.clone(),
            source,
        })?;

        if raw.trim().is_empty() {
            return Ok(Self {
                path,
                entries: BTreeMap::new(),
            });
        }

        let doc: StorageDocument = toml::from_str(&raw).map_err(|source| StorageError::Parse {
            path: path.clone(),
            source,
        })?;

        Ok(Self {
            path,
            entries: doc.entries,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn persist(&self) -> Result<(), StorageError> {
        if let Some(parent_dir) = self.path.parent() {
            fs::create_dir_all(parent_dir).map_err(|source| StorageError::CreateDir {
                path: parent_dir.to_path_buf(),
                source,
            })?;
        }

        let doc = StorageDocument {
            entries: self.entries.clone(),
        };
        let rendered =
            toml::to_string_pretty(&doc).map_err(|source| StorageError::Serialize { source })?;

        write_private(&self.path, &rendered).map_err(|source| StorageError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

/// Writes the storage document readable by its owner only, since it holds the token.
fn write_private(path: &Path, contents: &str) -> std::io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(contents.as_bytes())
}

#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load_default() -> Result<Self, StorageError> {
        Ok(Self::new(default_config_dir()?.join("storage.toml")))
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<Token>, StorageError> {
        let storage = FileStorage::load_from_path(&self.path)?;
        Ok(storage.get(TOKEN_KEY).and_then(Token::parse))
    }

    fn save(&mut self, token: &Token) -> Result<(), StorageError> {
        let mut storage = FileStorage::load_from_path(&self.path)?;
        storage.set(TOKEN_KEY, token.expose());
        storage.persist()
    }

    fn clear(&mut self) -> Result<(), StorageError> {
        let mut storage = FileStorage::load_from_path(&self.path)?;
        if storage.remove(TOKEN_KEY) {
            storage.persist()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ModeStore {
    path: PathBuf,
}

impl ModeStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load_default() -> Result<Self, StorageError> {
        Ok(Self::new(default_config_dir()?.join("storage.toml")))
    }

    pub fn load(&self) -> Result<Mode, StorageError> {
        let storage = FileStorage::load_from_path(&self.path)?;
        Ok(storage
            .get(MODE_KEY)
            .and_then(Mode::from_storage_value)
            .unwrap_or_default())
    }

    pub fn save(&self, mode: Mode) -> Result<(), StorageError> {
        let mut storage = FileStorage::load_from_path(&self.path)?;
        storage.set(MODE_KEY, mode.storage_value());
        storage.persist()
    }
}

pub fn default_config_dir() -> Result<PathBuf, StorageError> {
    let base_dir = if let Some(custom) = env::var_os("D1V_CONFIG_DIR") {
        PathBuf::from(custom)
    } else if cfg!(target_os = "windows") {
        env::var_os("APPDATA")
            .map(PathBuf::from)
            .ok_or(StorageError::ConfigDirUnavailable)?
    } else if let Some(xdg_config_home) = env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config_home)
    } else {
        let home = env::var_os("HOME").ok_or(StorageError::ConfigDirUnavailable)?;
        PathBuf::from(home).join(".config")
    };

    Ok(base_dir.join("d1v"))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use tempfile::TempDir;

    use super::{
        CredentialStore, FileCredentialStore, FileStorage, ModeStore, Token, MODE_KEY, TOKEN_KEY,
    };
    use crate::source::Mode;

    fn temp_storage_path(temp_dir: &TempDir) -> PathBuf {
        temp_dir.path().join("nested").join("storage.toml")
    }

    #[test]
    fn token_parse_rejects_blank_input_and_trims() {
        assert!(Token::parse("   ").is_none());
        assert_eq!(
            Token::parse("  abc  ").map(|token| token.expose().to_string()),
            Some("abc".to_string())
        );
    }

    #[test]
    fn token_debug_output_is_redacted() {
        let token = Token::parse("super-secret").expect("token should parse");
        let rendered = format!("{token:?}");
        assert!(!rendered.contains("super-secret"));
    }

    #[test]
    fn missing_storage_file_loads_empty() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let storage =
            FileStorage::load_from_path(temp_storage_path(&temp_dir)).expect("failed to load");
        assert!(storage.get(TOKEN_KEY).is_none());
    }

    #[test]
    fn credential_store_save_load_and_clear() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_storage_path(&temp_dir);
        let mut store = FileCredentialStore::new(&path);

        assert!(store.load().expect("load should succeed").is_none());

        let token = Token::parse("cf-token").expect("token should parse");
        store.save(&token).expect("save should succeed");
        assert_eq!(store.load().expect("reload should succeed"), Some(token));

        store.clear().expect("clear should succeed");
        let reopened = FileCredentialStore::new(&path);
        assert!(reopened.load().expect("load after clear").is_none());
    }

    #[test]
    fn clearing_token_keeps_other_keys() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_storage_path(&temp_dir);
        let mut store = FileCredentialStore::new(&path);
        let modes = ModeStore::new(&path);

        store
            .save(&Token::parse("cf-token").expect("token should parse"))
            .expect("save should succeed");
        modes.save(Mode::Local).expect("mode save should succeed");
        store.clear().expect("clear should succeed");

        let storage = FileStorage::load_from_path(&path).expect("reload should succeed");
        assert!(storage.get(TOKEN_KEY).is_none());
        assert_eq!(storage.get(MODE_KEY), Some("local"));
    }

    #[test]
    fn mode_store_defaults_to_remote() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let modes = ModeStore::new(temp_storage_path(&temp_dir));
        assert_eq!(modes.load().expect("load should succeed"), Mode::Remote);

        modes.save(Mode::Local).expect("save should succeed");
        assert_eq!(modes.load().expect("reload should succeed"), Mode::Local);
    }

    #[cfg(unix)]
    #[test]
    fn saved_token_file_is_private_to_owner() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_storage_path(&temp_dir);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("create dir");
        std::fs::write(&path, "").expect("pre-create storage file");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644))
            .expect("widen permissions");

        let mut store = FileCredentialStore::new(&path);
        store
            .save(&Token::parse("cf-token").expect("token should parse"))
            .expect("save should succeed");

        let mode = std::fs::metadata(&path).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(
            store.load().expect("load should succeed").map(|token| token.expose().to_string()),
            Some("cf-token".to_string())
        );
    }
}
