use std::sync::{Arc, PoisonError, RwLock};

use cloudsync_core::{
    AnyCloudStorage, CloudStorage, CloudStorageError, DropboxClient, DropboxConfig, Provider,
    ProviderClient, WebDavClient, WebDavConfig,
};
use thiserror::Error;

use crate::config::AppConfig;
use crate::credentials::{SecretKey, SecretStore, read_secret};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Storage(#[from] CloudStorageError),
    #[error("CLOUDSYNC_DROPBOX_CLIENT_ID is not set")]
    MissingDropboxClientId,
    #[error("failed to build http client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Immutable view of the connected storages. Replaced as a whole on every change.
#[derive(Debug, Default)]
pub struct RegistryState {
    cloud_storages: Vec<Arc<AnyCloudStorage>>,
    auth_error: bool,
}

impl RegistryState {
    pub fn cloud_storages(&self) -> &[Arc<AnyCloudStorage>] {
        &self.cloud_storages
    }

    pub fn auth_error(&self) -> bool {
        self.auth_error
    }

    pub fn providers(&self) -> Vec<Provider> {
        self.cloud_storages
            .iter()
            .map(|storage| storage.provider())
            .collect()
    }

    pub fn storage(&self, provider: Provider) -> Option<Arc<AnyCloudStorage>> {
        self.cloud_storages
            .iter()
            .find(|storage| storage.provider() == provider)
            .cloned()
    }
}

/// At most one storage per provider, built from credentials and kept for the process lifetime.
pub struct StorageRegistry {
    state: RwLock<Arc<RegistryState>>,
    http: reqwest::Client,
    config: AppConfig,
}

impl StorageRegistry {
    pub fn new(config: AppConfig) -> Result<Self, RegistryError> {
        Ok(Self {
            state: RwLock::new(Arc::new(RegistryState::default())),
            http: config.http_client()?,
            config,
        })
    }

    /// Builds the registry from stored credentials.
    ///
    /// Providers with missing or unreadable credentials are skipped. A provider
    /// rejecting its credentials latches the auth error flag; other failures leave it out.
    pub async fn load(secrets: &dyn SecretStore, config: AppConfig) -> Result<Self, RegistryError> {
        let registry = Self::new(config)?;

        if let Some([base_url, username, password]) = read_credentials(
            secrets,
            Provider::WebDav,
            [
                SecretKey::WebDavUrl,
                SecretKey::WebDavUsername,
                SecretKey::WebDavPassword,
            ],
        ) {
            let result = registry
                .add_webdav_storage(WebDavConfig {
                    base_url,
                    username,
                    password,
                })
                .await;
            registry.note_load_failure(Provider::WebDav, result.err());
        }

        if let Some([refresh_token]) =
            read_credentials(secrets, Provider::Dropbox, [SecretKey::DropboxRefreshToken])
        {
            if registry.config.dropbox_client_id.is_none() {
                tracing::warn!("dropbox credentials stored but no client id configured");
            } else {
                let result = registry.add_dropbox_storage(&refresh_token).await;
                registry.note_load_failure(Provider::Dropbox, result.err());
            }
        }

        let state = registry.snapshot();
        tracing::info!(
            providers = ?state.providers(),
            auth_error = state.auth_error(),
            "storage registry loaded"
        );
        Ok(registry)
    }

    fn note_load_failure(&self, provider: Provider, err: Option<RegistryError>) {
        match err {
            None => {}
            Some(RegistryError::Storage(err)) if err.is_unauthorized() => {
                tracing::warn!(%provider, error = %err, "stored credentials rejected");
                self.set_auth_error(true);
            }
            Some(err) => {
                tracing::warn!(%provider, error = %err, "storage not initialized");
            }
        }
    }

    pub async fn add_webdav_storage(
        &self,
        config: WebDavConfig,
    ) -> Result<Arc<AnyCloudStorage>, RegistryError> {
        if [&config.base_url, &config.username, &config.password]
            .iter()
            .any(|field| field.trim().is_empty())
        {
            return Err(CloudStorageError::unauthorized()
                .with_provider(Provider::WebDav)
                .with_cause("url, username and password are required")
                .into());
        }
        let client = WebDavClient::with_http_client(self.http.clone(), config)?;
        self.connect(client.into()).await
    }

    pub async fn add_dropbox_storage(
        &self,
        refresh_token: &str,
    ) -> Result<Arc<AnyCloudStorage>, RegistryError> {
        if refresh_token.trim().is_empty() {
            return Err(CloudStorageError::unauthorized()
                .with_provider(Provider::Dropbox)
                .with_cause("refresh token is required")
                .into());
        }
        let client_id = self
            .config
            .dropbox_client_id
            .clone()
            .ok_or(RegistryError::MissingDropboxClientId)?;
        let config = DropboxConfig::new(client_id, refresh_token.trim()).with_base_urls(
            self.config.dropbox_api_url.clone(),
            self.config.dropbox_content_url.clone(),
        );
        let client = DropboxClient::with_http_client(self.http.clone(), config)?;
        self.connect(client.into()).await
    }

    async fn connect(&self, client: ProviderClient) -> Result<Arc<AnyCloudStorage>, RegistryError> {
        let storage = Arc::new(
            CloudStorage::connect(client)
                .await?
                .with_retry(self.config.retry_policy()),
        );
        let provider = storage.provider();
        let added = storage.clone();
        self.update(|state| {
            let mut cloud_storages: Vec<_> = state
                .cloud_storages
                .iter()
                .filter(|existing| existing.provider() != provider)
                .cloned()
                .collect();
            cloud_storages.push(added);
            RegistryState {
                cloud_storages,
                auth_error: state.auth_error,
            }
        });
        tracing::info!(%provider, "storage added");
        Ok(storage)
    }

    /// Returns whether a storage was registered for `provider`.
    pub fn remove_storage(&self, provider: Provider) -> bool {
        let mut removed = false;
        self.update(|state| {
            let cloud_storages: Vec<_> = state
                .cloud_storages
                .iter()
                .filter(|existing| existing.provider() != provider)
                .cloned()
                .collect();
            removed = cloud_storages.len() != state.cloud_storages.len();
            RegistryState {
                cloud_storages,
                auth_error: state.auth_error,
            }
        });
        if removed {
            tracing::info!(%provider, "storage removed");
        }
        removed
    }

    pub fn set_auth_error(&self, auth_error: bool) {
        self.update(|state| RegistryState {
            cloud_storages: state.cloud_storages.clone(),
            auth_error,
        });
    }

    pub fn storage(&self, provider: Provider) -> Option<Arc<AnyCloudStorage>> {
        self.snapshot().storage(provider)
    }

    pub fn snapshot(&self) -> Arc<RegistryState> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn update(&self, next: impl FnOnce(&RegistryState) -> RegistryState) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let replacement = Arc::new(next(&state));
        *state = replacement;
    }
}

/// All of `keys`, or `None` when one is missing or the store cannot be read.
fn read_credentials<const N: usize>(
    secrets: &dyn SecretStore,
    provider: Provider,
    keys: [SecretKey; N],
) -> Option<[String; N]> {
    let mut values = Vec::with_capacity(N);
    for key in keys {
        match read_secret(secrets, key) {
            Ok(Some(value)) => values.push(value),
            Ok(None) => return None,
            Err(err) => {
                tracing::warn!(%provider, %key, error = %err, "unable to read stored credentials");
                return None;
            }
        }
    }
    values.try_into().ok()
}
