use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use keyring::Entry;
use thiserror::Error;

use crate::config::{AppConfig, SecretBackend};

/// The fixed keys under which provider credentials are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecretKey {
    WebDavUsername,
    WebDavPassword,
    WebDavUrl,
    DropboxRefreshToken,
}

impl SecretKey {
    pub const ALL: [SecretKey; 4] = [
        SecretKey::WebDavUsername,
        SecretKey::WebDavPassword,
        SecretKey::WebDavUrl,
        SecretKey::DropboxRefreshToken,
    ];

    pub const WEBDAV: [SecretKey; 3] = [
        SecretKey::WebDavUsername,
        SecretKey::WebDavPassword,
        SecretKey::WebDavUrl,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SecretKey::WebDavUsername => "WebDAV-username",
            SecretKey::WebDavPassword => "WebDAV-password",
            SecretKey::WebDavUrl => "WebDAV-url",
            SecretKey::DropboxRefreshToken => "Dropbox-refresh-token",
        }
    }
}

impl fmt::Display for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),
    #[error("secret store lock poisoned")]
    Poisoned,
}

/// Secure key-value storage for provider credentials.
pub trait SecretStore: Send + Sync {
    fn get(&self, key: SecretKey) -> Result<Option<String>, SecretError>;

    fn set(&self, key: SecretKey, value: &str) -> Result<(), SecretError>;

    /// Removing an absent key succeeds.
    fn remove(&self, key: SecretKey) -> Result<(), SecretError>;
}

impl<T: SecretStore + ?Sized> SecretStore for std::sync::Arc<T> {
    fn get(&self, key: SecretKey) -> Result<Option<String>, SecretError> {
        (**self).get(key)
    }

    fn set(&self, key: SecretKey, value: &str) -> Result<(), SecretError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: SecretKey) -> Result<(), SecretError> {
        (**self).remove(key)
    }
}

/// OS keychain, one entry per key under the configured service name.
pub struct KeyringSecretStore {
    service: String,
}

impl KeyringSecretStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: SecretKey) -> Result<Entry, SecretError> {
        Ok(Entry::new(&self.service, key.as_str())?)
    }
}

impl SecretStore for KeyringSecretStore {
    fn get(&self, key: SecretKey) -> Result<Option<String>, SecretError> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(SecretError::Keyring(err)),
        }
    }

    fn set(&self, key: SecretKey, value: &str) -> Result<(), SecretError> {
        self.entry(key)?.set_password(value)?;
        Ok(())
    }

    fn remove(&self, key: SecretKey) -> Result<(), SecretError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(SecretError::Keyring(err)),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemorySecretStore {
    values: Mutex<HashMap<SecretKey, String>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, key: SecretKey, value: impl Into<String>) -> Self {
        if let Ok(mut values) = self.values.lock() {
            values.insert(key, value.into());
        }
        self
    }
}

impl SecretStore for MemorySecretStore {
    fn get(&self, key: SecretKey) -> Result<Option<String>, SecretError> {
        let values = self.values.lock().map_err(|_| SecretError::Poisoned)?;
        Ok(values.get(&key).cloned())
    }

    fn set(&self, key: SecretKey, value: &str) -> Result<(), SecretError> {
        let mut values = self.values.lock().map_err(|_| SecretError::Poisoned)?;
        values.insert(key, value.to_string());
        Ok(())
    }

    fn remove(&self, key: SecretKey) -> Result<(), SecretError> {
        let mut values = self.values.lock().map_err(|_| SecretError::Poisoned)?;
        values.remove(&key);
        Ok(())
    }
}

/// Opens the credential store selected by `config`.
pub fn open_secret_store(config: &AppConfig) -> Box<dyn SecretStore> {
    match config.secret_backend {
        SecretBackend::Keyring => Box::new(KeyringSecretStore::new(config.keyring_service.clone())),
        SecretBackend::Memory => {
            tracing::warn!("credentials are kept in memory and will not persist");
            Box::new(MemorySecretStore::new())
        }
    }
}

/// Reads `key`, treating blank values as absent.
pub(crate) fn read_secret(
    store: &dyn SecretStore,
    key: SecretKey,
) -> Result<Option<String>, SecretError> {
    Ok(store
        .get(key)?
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty()))
}
