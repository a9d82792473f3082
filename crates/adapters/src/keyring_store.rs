use d1v_core::storage::{CredentialStore, StorageError, Token, TOKEN_KEY};
use tracing::debug;

pub const KEYRING_SERVICE: &str = "d1v";

/// Keeps the API token in the operating system's credential vault.
#[derive(Debug, Clone)]
pub struct KeyringCredentialStore {
    service: String,
    account: String,
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new(KEYRING_SERVICE, TOKEN_KEY)
    }
}

impl KeyringCredentialStore {
    #[must_use]
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }

    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    #[must_use]
    pub fn account(&self) -> &str {
        &self.account
    }
}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
impl KeyringCredentialStore {
    fn entry(&self) -> Result<keyring::Entry, StorageError> {
        keyring::Entry::new(&self.service, &self.account).map_err(to_storage_error)
    }
}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
impl CredentialStore for KeyringCredentialStore {
    fn load(&self) -> Result<Option<Token>, StorageError> {
        match self.entry()?.get_password() {
            Ok(secret) => Ok(Token::parse(&secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(to_storage_error(error)),
        }
    }

    fn save(&mut self, token: &Token) -> Result<(), StorageError> {
        self.entry()?
            .set_password(token.expose())
            .map_err(to_storage_error)?;
        debug!(service = %self.service, "stored token in keyring");
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StorageError> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(to_storage_error(error)),
        }
    }
}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
fn to_storage_error(error: keyring::Error) -> StorageError {
    StorageError::Backend(error.to_string())
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
impl CredentialStore for KeyringCredentialStore {
    fn load(&self) -> Result<Option<Token>, StorageError> {
        Err(unsupported())
    }

    fn save(&mut self, _token: &Token) -> Result<(), StorageError> {
        Err(unsupported())
    }

    fn clear(&mut self) -> Result<(), StorageError> {
        debug!("keyring unavailable; nothing to clear");
        Ok(())
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn unsupported() -> StorageError {
    StorageError::Backend("keyring is not supported on this platform".to_string())
}
