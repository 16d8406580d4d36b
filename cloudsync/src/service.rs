use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use cloudsync_core::{
    AnyCloudStorage, CloudFile, CloudFileRef, CloudStorageError, ListOptions, ListResult,
    Provider, SyncResult, WebDavConfig, create_checksum, get_archive_file_path, transferred_ref,
};
use thiserror::Error;

use crate::config::AppConfig;
use crate::credentials::{SecretError, SecretKey, SecretStore};
use crate::network::{ConnectivityAlerts, ConnectivityNotice};
use crate::refs::{RefKind, RefStore, RefStoreError};
use crate::registry::{RegistryError, StorageRegistry};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Storage(#[from] CloudStorageError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("secret store error: {0}")]
    Secret(#[from] SecretError),
    #[error(transparent)]
    Refs(#[from] RefStoreError),
    #[error("{0} is not linked to a cloud file")]
    NotLinked(String),
    #[error("{0} has no archive file")]
    NoArchive(String),
    #[error("{0} is not connected")]
    NotConnected(Provider),
    #[error("network connection lost")]
    Offline,
}

impl ServiceError {
    pub fn is_unauthorized(&self) -> bool {
        match self {
            ServiceError::Storage(err) => err.is_unauthorized(),
            ServiceError::Registry(RegistryError::Storage(err)) => err.is_unauthorized(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedFile {
    pub identifier: String,
    pub kind: RefKind,
    pub file_ref: CloudFileRef,
}

/// One local file handed to [`CloudSync::sync_all`].
#[derive(Debug, Clone)]
pub struct SyncTarget {
    pub identifier: String,
    pub kind: RefKind,
    pub content: Bytes,
}

impl SyncTarget {
    pub fn new(identifier: impl Into<String>, kind: RefKind, content: impl Into<Bytes>) -> Self {
        Self {
            identifier: identifier.into(),
            kind,
            content: content.into(),
        }
    }
}

#[derive(Debug)]
pub struct SyncReport {
    pub identifier: String,
    pub kind: RefKind,
    pub result: Result<SyncResult, ServiceError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    pub connected: Vec<Provider>,
    pub auth_error: bool,
    pub linked: Vec<LinkedFile>,
}

/// Ties the storage registry to local files: connecting providers, linking files
/// to remote paths and keeping them in sync.
pub struct CloudSync {
    registry: StorageRegistry,
    secrets: Box<dyn SecretStore>,
    refs: RefStore,
    alerts: Mutex<ConnectivityAlerts>,
}

impl CloudSync {
    pub fn new(registry: StorageRegistry, secrets: Box<dyn SecretStore>, refs: RefStore) -> Self {
        Self {
            registry,
            secrets,
            refs,
            alerts: Mutex::new(ConnectivityAlerts::new()),
        }
    }

    /// Loads the registry from the stored credentials.
    pub async fn bootstrap(
        config: AppConfig,
        secrets: Box<dyn SecretStore>,
    ) -> Result<Self, ServiceError> {
        let refs = RefStore::new(config.refs_file.clone());
        let registry = StorageRegistry::load(secrets.as_ref(), config).await?;
        Ok(Self::new(registry, secrets, refs))
    }

    pub fn registry(&self) -> &StorageRegistry {
        &self.registry
    }

    pub fn refs(&self) -> &RefStore {
        &self.refs
    }

    /// Feeds a connectivity change; returns a notice when the user should be told.
    pub fn set_connected(&self, connected: bool) -> Option<ConnectivityNotice> {
        let notice = self
            .alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set_connected(connected);
        if notice.is_some() {
            tracing::warn!("unable to connect, check network connection");
        }
        notice
    }

    pub async fn connect_webdav(&self, config: WebDavConfig) -> Result<(), ServiceError> {
        self.registry.add_webdav_storage(config.clone()).await?;
        self.secrets.set(SecretKey::WebDavUrl, &config.base_url)?;
        self.secrets
            .set(SecretKey::WebDavUsername, &config.username)?;
        self.secrets
            .set(SecretKey::WebDavPassword, &config.password)?;
        self.registry.set_auth_error(false);
        Ok(())
    }

    pub async fn connect_dropbox(&self, refresh_token: &str) -> Result<(), ServiceError> {
        self.registry.add_dropbox_storage(refresh_token).await?;
        self.secrets
            .set(SecretKey::DropboxRefreshToken, refresh_token.trim())?;
        self.registry.set_auth_error(false);
        Ok(())
    }

    /// Forgets the provider's storage, credentials and links. Remote files stay.
    pub fn disconnect(&self, provider: Provider) -> Result<(), ServiceError> {
        self.registry.remove_storage(provider);
        let keys: &[SecretKey] = match provider {
            Provider::WebDav => &SecretKey::WEBDAV,
            Provider::Dropbox => &[SecretKey::DropboxRefreshToken],
        };
        for key in keys {
            self.secrets.remove(*key)?;
        }
        let removed = self.refs.remove_refs(provider)?;
        tracing::info!(%provider, removed_links = removed, "provider disconnected");
        Ok(())
    }

    pub async fn list(&self, provider: Provider, path: &str) -> Result<ListResult, ServiceError> {
        let storage = self.storage_for(provider)?;
        self.observe(storage.list(&ListOptions::path(path)).await)
    }

    /// Uploads a local file to a new remote path and links the two.
    ///
    /// Existing remote files are not overwritten; Dropbox stores a renamed copy and
    /// the link points at it.
    pub async fn link_upload(
        &self,
        identifier: &str,
        provider: Provider,
        remote_path: &str,
        content: impl Into<Bytes>,
    ) -> Result<CloudFileRef, ServiceError> {
        let storage = self.storage_for(provider)?;
        let content = content.into();
        let checksum = create_checksum(&content);
        let file = self.observe(storage.upload_file(remote_path, content, false).await)?;
        let file_ref = transferred_ref(provider, file.path.clone(), checksum, &file, None);
        self.refs
            .set_ref(RefKind::File, identifier, file_ref.clone())?;
        tracing::info!(identifier, %provider, path = %file.path, "file linked by upload");
        Ok(file_ref)
    }

    /// Downloads a remote file and links it to `identifier`. Writing the content
    /// locally is up to the caller.
    pub async fn link_download(
        &self,
        identifier: &str,
        provider: Provider,
        remote_path: &str,
    ) -> Result<(CloudFileRef, Bytes), ServiceError> {
        let storage = self.storage_for(provider)?;
        let downloaded = self.observe(storage.download_file(remote_path).await)?;
        let content = self.observe(downloaded.response.bytes().await)?;
        let file = downloaded.cloud_file;
        let file_ref = transferred_ref(
            provider,
            file.path.clone(),
            create_checksum(&content),
            &file,
            None,
        );
        self.refs
            .set_ref(RefKind::File, identifier, file_ref.clone())?;
        tracing::info!(identifier, %provider, path = %file.path, "file linked by download");
        Ok((file_ref, content))
    }

    /// Uploads the archive of a linked file next to its remote file.
    pub async fn link_archive_upload(
        &self,
        identifier: &str,
        content: impl Into<Bytes>,
    ) -> Result<CloudFileRef, ServiceError> {
        let (provider, archive_path) = self.archive_target(identifier)?;
        let storage = self.storage_for(provider)?;
        let content = content.into();
        let checksum = create_checksum(&content);
        let file = self.observe(storage.upload_file(&archive_path, content, false).await)?;
        let archive_ref = transferred_ref(provider, file.path.clone(), checksum, &file, None);
        self.refs
            .set_ref(RefKind::Archive, identifier, archive_ref.clone())?;
        tracing::info!(identifier, %provider, path = %file.path, "archive linked by upload");
        Ok(archive_ref)
    }

    /// Downloads the archive that sits next to a linked remote file.
    pub async fn link_archive_download(
        &self,
        identifier: &str,
    ) -> Result<(CloudFileRef, Bytes), ServiceError> {
        let (provider, archive_path) = self.archive_target(identifier)?;
        let storage = self.storage_for(provider)?;
        let downloaded = self.observe(storage.download_file(&archive_path).await)?;
        let content = self.observe(downloaded.response.bytes().await)?;
        let file = downloaded.cloud_file;
        let archive_ref = transferred_ref(
            provider,
            file.path.clone(),
            create_checksum(&content),
            &file,
            None,
        );
        self.refs
            .set_ref(RefKind::Archive, identifier, archive_ref.clone())?;
        tracing::info!(identifier, %provider, path = %file.path, "archive linked by download");
        Ok((archive_ref, content))
    }

    /// Metadata of the remote archive of a linked file, `None` when there is none yet.
    pub async fn archive_meta_data(
        &self,
        identifier: &str,
    ) -> Result<Option<CloudFile>, ServiceError> {
        let (provider, archive_path) = self.archive_target(identifier)?;
        let storage = self.storage_for(provider)?;
        match storage.get_file_meta_data(&archive_path).await {
            Ok(file) => Ok(Some(file)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => self.observe(Err(err)),
        }
    }

    /// Syncs one linked file and stores the updated link after a transfer.
    pub async fn sync(
        &self,
        identifier: &str,
        content: impl Into<Bytes>,
    ) -> Result<SyncResult, ServiceError> {
        self.sync_kind(RefKind::File, identifier, content.into())
            .await
    }

    pub async fn sync_archive(
        &self,
        identifier: &str,
        content: impl Into<Bytes>,
    ) -> Result<SyncResult, ServiceError> {
        self.sync_kind(RefKind::Archive, identifier, content.into())
            .await
    }

    async fn sync_kind(
        &self,
        kind: RefKind,
        identifier: &str,
        content: Bytes,
    ) -> Result<SyncResult, ServiceError> {
        let file_ref = self.linked_ref(kind, identifier)?;
        let storage = self.storage_for(file_ref.provider)?;
        let synced = self.observe(storage.sync_file(&file_ref, content).await)?;
        if let Some(updated) = synced.file_ref {
            self.refs.set_ref(kind, identifier, updated)?;
        }
        Ok(synced.result)
    }

    /// Syncs every given file one after another. Files that are not linked, or whose
    /// provider is not connected, are skipped.
    pub async fn sync_all(&self, files: Vec<SyncTarget>) -> Vec<SyncReport> {
        let mut reports = Vec::with_capacity(files.len());
        for target in files {
            let SyncTarget {
                identifier,
                kind,
                content,
            } = target;
            let result = match self.refs.get_ref(kind, &identifier) {
                Ok(Some(file_ref)) if self.registry.storage(file_ref.provider).is_some() => {
                    self.sync_kind(kind, &identifier, content).await
                }
                Ok(_) => continue,
                Err(err) => Err(err.into()),
            };
            reports.push(SyncReport {
                identifier,
                kind,
                result,
            });
        }
        reports
    }

    /// Forgets the link; the remote file is untouched.
    pub fn unlink(&self, identifier: &str) -> Result<Option<CloudFileRef>, ServiceError> {
        Ok(self.refs.remove_ref(RefKind::File, identifier)?)
    }

    pub fn unlink_archive(&self, identifier: &str) -> Result<Option<CloudFileRef>, ServiceError> {
        Ok(self.refs.remove_ref(RefKind::Archive, identifier)?)
    }

    /// Deletes the linked remote file and its archive, then forgets both links.
    pub async fn delete_remote(&self, identifier: &str) -> Result<CloudFileRef, ServiceError> {
        let file_ref = self.linked_ref(RefKind::File, identifier)?;
        let storage = self.storage_for(file_ref.provider)?;
        self.observe(storage.delete_file(&file_ref.path).await)?;
        if self.refs.get_ref(RefKind::Archive, identifier)?.is_some() {
            self.delete_remote_archive(identifier).await?;
        }
        self.refs.remove_ref(RefKind::File, identifier)?;
        Ok(file_ref)
    }

    /// Deletes only the remote archive and forgets its link.
    pub async fn delete_remote_archive(
        &self,
        identifier: &str,
    ) -> Result<CloudFileRef, ServiceError> {
        let archive_ref = self.linked_ref(RefKind::Archive, identifier)?;
        let storage = self.storage_for(archive_ref.provider)?;
        self.observe(storage.delete_file(&archive_ref.path).await)?;
        self.refs.remove_ref(RefKind::Archive, identifier)?;
        Ok(archive_ref)
    }

    pub fn status(&self) -> Result<ServiceStatus, ServiceError> {
        let state = self.registry.snapshot();
        let mut linked = Vec::new();
        for kind in RefKind::ALL {
            linked.extend(
                self.refs
                    .get_refs(kind)?
                    .into_iter()
                    .map(|(identifier, file_ref)| LinkedFile {
                        identifier,
                        kind,
                        file_ref,
                    }),
            );
        }
        Ok(ServiceStatus {
            connected: state.providers(),
            auth_error: state.auth_error(),
            linked,
        })
    }

    fn linked_ref(&self, kind: RefKind, identifier: &str) -> Result<CloudFileRef, ServiceError> {
        self.refs
            .get_ref(kind, identifier)?
            .ok_or_else(|| ServiceError::NotLinked(identifier.to_string()))
    }

    /// Provider and remote archive path derived from the file's own link.
    fn archive_target(&self, identifier: &str) -> Result<(Provider, String), ServiceError> {
        let file_ref = self.linked_ref(RefKind::File, identifier)?;
        let archive_path = get_archive_file_path(&file_ref.path)
            .ok_or_else(|| ServiceError::NoArchive(file_ref.path.clone()))?;
        Ok((file_ref.provider, archive_path))
    }

    fn storage_for(&self, provider: Provider) -> Result<Arc<AnyCloudStorage>, ServiceError> {
        let connected = self
            .alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_connected();
        if !connected {
            return Err(ServiceError::Offline);
        }
        self.registry
            .storage(provider)
            .ok_or(ServiceError::NotConnected(provider))
    }

    /// Revoked credentials latch the registry's auth error; the first transport
    /// failure after a reconnect is logged as a connection problem.
    fn observe<T>(&self, result: Result<T, CloudStorageError>) -> Result<T, ServiceError> {
        let err = match result {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if err.is_unauthorized() {
            tracing::warn!(provider = ?err.provider(), "session expired, reconnect required");
            self.registry.set_auth_error(true);
        } else if err.is_retryable()
            && self
                .alerts
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .report_connection_error()
        {
            tracing::warn!(error = %err, "unable to reach cloud storage");
        }
        Err(err.into())
    }
}
