use std::path::PathBuf;
use std::time::Duration;

use cloudsync_core::{Backoff, DEFAULT_API_URL, DEFAULT_CONTENT_URL, RetryPolicy};

const DEFAULT_KEYRING_SERVICE: &str = "cloudsync";
const REFS_FILENAME: &str = "cloud-file-refs.json";

/// Where provider credentials are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SecretBackend {
    /// The OS keychain.
    #[default]
    Keyring,
    /// Process memory only; credentials are lost on exit.
    Memory,
}

impl SecretBackend {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "keyring" => Some(SecretBackend::Keyring),
            "memory" => Some(SecretBackend::Memory),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Dropbox app key. Without it Dropbox storages are not initialized.
    pub dropbox_client_id: Option<String>,
    pub dropbox_api_url: String,
    pub dropbox_content_url: String,
    pub refs_file: PathBuf,
    pub http_timeout: Duration,
    pub retry_attempts: u32,
    pub keyring_service: String,
    pub secret_backend: SecretBackend,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            dropbox_client_id: read_string_env("CLOUDSYNC_DROPBOX_CLIENT_ID"),
            dropbox_api_url: read_string_env("CLOUDSYNC_DROPBOX_API_URL")
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            dropbox_content_url: read_string_env("CLOUDSYNC_DROPBOX_CONTENT_URL")
                .unwrap_or_else(|| DEFAULT_CONTENT_URL.to_string()),
            refs_file: read_string_env("CLOUDSYNC_REFS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(default_refs_file),
            http_timeout: Duration::from_secs(read_u64_env("CLOUDSYNC_HTTP_TIMEOUT_SECS", 30)),
            retry_attempts: read_u64_env("CLOUDSYNC_RETRY_ATTEMPTS", 1)
                .try_into()
                .unwrap_or(u32::MAX),
            keyring_service: read_string_env("CLOUDSYNC_KEYRING_SERVICE")
                .unwrap_or_else(|| DEFAULT_KEYRING_SERVICE.to_string()),
            secret_backend: read_secret_backend("CLOUDSYNC_SECRET_BACKEND"),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_attempts, Backoff::default())
    }

    pub fn http_client(&self) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.http_timeout)
            .build()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            dropbox_client_id: None,
            dropbox_api_url: DEFAULT_API_URL.to_string(),
            dropbox_content_url: DEFAULT_CONTENT_URL.to_string(),
            refs_file: default_refs_file(),
            http_timeout: Duration::from_secs(30),
            retry_attempts: 1,
            keyring_service: DEFAULT_KEYRING_SERVICE.to_string(),
            secret_backend: SecretBackend::default(),
        }
    }
}

fn default_refs_file() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cloudsync")
        .join(REFS_FILENAME)
}

fn read_string_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_u64_env(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn read_secret_backend(name: &str) -> SecretBackend {
    let Some(value) = read_string_env(name) else {
        return SecretBackend::default();
    };
    SecretBackend::parse(&value).unwrap_or_else(|| {
        tracing::warn!(%value, "unknown secret backend, using keyring");
        SecretBackend::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_dropbox_and_config_dir() {
        let config = AppConfig::default();
        assert_eq!(config.dropbox_api_url, DEFAULT_API_URL);
        assert!(config.refs_file.ends_with("cloudsync/cloud-file-refs.json"));
        assert_eq!(config.retry_policy().attempts(), 1);
        assert_eq!(config.keyring_service, "cloudsync");
        assert_eq!(config.secret_backend, SecretBackend::Keyring);
    }

    #[test]
    fn secret_backend_names() {
        assert_eq!(SecretBackend::parse("keyring"), Some(SecretBackend::Keyring));
        assert_eq!(SecretBackend::parse(" Memory "), Some(SecretBackend::Memory));
        assert_eq!(SecretBackend::parse("vault"), None);
        assert_eq!(
            read_secret_backend("CLOUDSYNC_TEST_SURELY_UNSET"),
            SecretBackend::Keyring
        );
    }

    #[test]
    fn unset_numeric_env_falls_back_to_default() {
        assert_eq!(read_u64_env("CLOUDSYNC_TEST_SURELY_UNSET", 30), 30);
        assert_eq!(read_string_env("CLOUDSYNC_TEST_SURELY_UNSET"), None);
    }
}
