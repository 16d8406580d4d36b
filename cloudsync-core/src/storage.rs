use bytes::Bytes;
use time::OffsetDateTime;

use crate::client::{Client, DownloadedFile, ListOptions, ProviderClient};
use crate::error::CloudStorageError;
use crate::retry::RetryPolicy;
use crate::sync::{SyncRequest, SyncResult, create_sync_file_function};
use crate::types::{CloudFile, CloudFileRef, ListResult, Provider};
use crate::utils::create_checksum;

/// A storage over whichever provider the registry holds.
pub type AnyCloudStorage = CloudStorage<ProviderClient>;

/// Outcome of [`CloudStorage::sync_file`]: the engine result and, after a
/// transfer, the ref the caller should persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncedFile {
    pub result: SyncResult,
    pub file_ref: Option<CloudFileRef>,
}

/// Bookkeeping after content was transferred. `last_sync` never moves backwards and
/// is never older than the remote timestamp, so an unchanged remote is not pulled again.
pub fn transferred_ref(
    provider: Provider,
    path: impl Into<String>,
    checksum: impl Into<String>,
    remote: &CloudFile,
    previous_sync: Option<OffsetDateTime>,
) -> CloudFileRef {
    let mut last_sync = OffsetDateTime::now_utc().max(remote.last_modified);
    if let Some(previous) = previous_sync {
        last_sync = last_sync.max(previous);
    }
    CloudFileRef {
        provider,
        path: path.into(),
        local_version: checksum.into(),
        last_sync,
    }
}

/// One authenticated provider session behind the six storage operations.
///
/// Failures come back as [`CloudStorageError`]s tagged with provider and path.
/// Reads can be retried with [`CloudStorage::with_retry`], writes never are.
pub struct CloudStorage<C> {
    client: C,
    retry: RetryPolicy,
}

impl<C: Client> CloudStorage<C> {
    /// Wraps `client` after a cheap listing proves the credentials work.
    pub async fn connect(client: C) -> Result<Self, CloudStorageError> {
        let storage = Self {
            client,
            retry: RetryPolicy::none(),
        };
        storage
            .client
            .list(&ListOptions::path("").with_limit(1))
            .await
            .map_err(|err| storage.failed("connect", "", err))?;
        tracing::info!(provider = %storage.provider(), "cloud storage connected");
        Ok(storage)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn provider(&self) -> Provider {
        self.client.provider()
    }

    pub async fn list(&self, options: &ListOptions) -> Result<ListResult, CloudStorageError> {
        let path = options.path.as_deref().unwrap_or_default();
        self.retry
            .run(|| self.client.list(options))
            .await
            .map_err(|err| self.failed("list", path, err))
    }

    pub async fn get_file_meta_data(&self, path: &str) -> Result<CloudFile, CloudStorageError> {
        self.retry
            .run(|| self.client.get_file_meta_data(path))
            .await
            .map_err(|err| self.failed("get_file_meta_data", path, err))
    }

    pub async fn download_file(&self, path: &str) -> Result<DownloadedFile, CloudStorageError> {
        self.retry
            .run(|| self.client.download_file(path))
            .await
            .map_err(|err| self.failed("download_file", path, err))
    }

    pub async fn upload_file(
        &self,
        path: &str,
        content: impl Into<Bytes>,
        overwrite: bool,
    ) -> Result<CloudFile, CloudStorageError> {
        self.client
            .upload_file(path, content.into(), overwrite)
            .await
            .map_err(|err| self.failed("upload_file", path, err))
    }

    /// Succeeds when the file is already gone.
    pub async fn delete_file(&self, path: &str) -> Result<(), CloudStorageError> {
        match self.client.delete_file(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => {
                tracing::debug!(provider = %self.provider(), path, "file already deleted");
                Ok(())
            }
            Err(err) => Err(self.failed("delete_file", path, err)),
        }
    }

    pub async fn sync_file(
        &self,
        file_ref: &CloudFileRef,
        content: impl Into<Bytes>,
    ) -> Result<SyncedFile, CloudStorageError> {
        if file_ref.provider != self.provider() {
            return Err(CloudStorageError::generic(format!(
                "file is linked to {}, not {}",
                file_ref.provider,
                self.provider()
            ))
            .in_context(self.provider(), &file_ref.path));
        }
        let request = SyncRequest::from_ref(file_ref, content);
        let result = create_sync_file_function(&self.client)
            .sync_file(&request)
            .await
            .map_err(|err| self.failed("sync_file", &request.path, err))?;

        let file_ref = match &result {
            SyncResult::None => None,
            SyncResult::Push { file } => Some(transferred_ref(
                self.provider(),
                &file_ref.path,
                &request.checksum,
                file,
                Some(file_ref.last_sync),
            )),
            SyncResult::Pull { file, content } => Some(transferred_ref(
                self.provider(),
                &file_ref.path,
                create_checksum(content),
                file,
                Some(file_ref.last_sync),
            )),
        };
        tracing::info!(
            provider = %self.provider(),
            path = %request.path,
            direction = result.direction(),
            "file synced"
        );
        Ok(SyncedFile { result, file_ref })
    }

    fn failed(&self, operation: &str, path: &str, err: CloudStorageError) -> CloudStorageError {
        let err = err.in_context(self.provider(), path);
        tracing::warn!(operation, error = %err, "cloud storage operation failed");
        err
    }
}

impl<C: Client> std::fmt::Debug for CloudStorage<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudStorage")
            .field("provider", &self.provider())
            .field("retry", &self.retry)
            .finish()
    }
}
