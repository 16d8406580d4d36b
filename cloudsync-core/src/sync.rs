use bytes::Bytes;
use time::OffsetDateTime;

use crate::client::Client;
use crate::error::CloudStorageError;
use crate::types::{CloudFile, CloudFileRef};
use crate::utils::create_checksum;

/// Local side of a sync: current content plus what was recorded at the last sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    pub path: String,
    pub content: Bytes,
    pub checksum: String,
    /// Checksum stored after the last successful sync, if any.
    pub local_version: Option<String>,
    pub last_sync: Option<OffsetDateTime>,
}

impl SyncRequest {
    /// A file that was never synced before.
    pub fn new(path: impl Into<String>, content: impl Into<Bytes>) -> Self {
        let content = content.into();
        Self {
            path: path.into(),
            checksum: create_checksum(&content),
            content,
            local_version: None,
            last_sync: None,
        }
    }

    pub fn from_ref(file_ref: &CloudFileRef, content: impl Into<Bytes>) -> Self {
        let mut request = Self::new(file_ref.path.clone(), content);
        request.local_version = Some(file_ref.local_version.clone());
        request.last_sync = Some(file_ref.last_sync);
        request
    }

    fn local_changed(&self) -> bool {
        self.local_version.as_deref() != Some(self.checksum.as_str())
    }

    fn remote_changed(&self, remote: &CloudFile) -> bool {
        match self.last_sync {
            Some(last_sync) => remote.last_modified > last_sync,
            None => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncResult {
    None,
    Push { file: CloudFile },
    Pull { file: CloudFile, content: Bytes },
}

impl SyncResult {
    pub fn direction(&self) -> &'static str {
        match self {
            SyncResult::None => "none",
            SyncResult::Push { .. } => "push",
            SyncResult::Pull { .. } => "pull",
        }
    }

    pub fn file(&self) -> Option<&CloudFile> {
        match self {
            SyncResult::None => None,
            SyncResult::Push { file } | SyncResult::Pull { file, .. } => Some(file),
        }
    }
}

/// Decides push, pull or nothing for one file using only the client's primitives.
///
/// When both sides changed since the last sync the remote copy wins and the local
/// edit is overwritten by the pull. Updating the stored [`CloudFileRef`] after a
/// transfer is up to the caller. Errors are returned as the client reported them.
pub struct SyncEngine<'c, C> {
    client: &'c C,
}

pub fn create_sync_file_function<C: Client>(client: &C) -> SyncEngine<'_, C> {
    SyncEngine { client }
}

impl<C: Client> SyncEngine<'_, C> {
    pub async fn sync_file(&self, request: &SyncRequest) -> Result<SyncResult, CloudStorageError> {
        let remote = match self.client.get_file_meta_data(&request.path).await {
            Ok(remote) => remote,
            Err(err) if err.is_not_found() => {
                tracing::debug!(path = %request.path, "remote file missing, pushing");
                return self.push(request).await;
            }
            Err(err) => return Err(err),
        };

        if request.remote_changed(&remote) {
            tracing::debug!(path = %request.path, "remote changed since last sync, pulling");
            let downloaded = self.client.download_file(&request.path).await?;
            let content = downloaded.response.bytes().await?;
            return Ok(SyncResult::Pull {
                file: downloaded.cloud_file,
                content,
            });
        }

        if request.local_changed() {
            tracing::debug!(path = %request.path, "local content changed, pushing");
            return self.push(request).await;
        }

        Ok(SyncResult::None)
    }

    async fn push(&self, request: &SyncRequest) -> Result<SyncResult, CloudStorageError> {
        let file = self
            .client
            .upload_file(&request.path, request.content.clone(), true)
            .await?;
        Ok(SyncResult::Push { file })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{DownloadedFile, FileResponse, ListOptions};
    use crate::types::{ListResult, Provider};
    use std::sync::Mutex;
    use time::macros::datetime;

    const T0: OffsetDateTime = datetime!(2024-01-01 00:00:00 UTC);
    const T1: OffsetDateTime = datetime!(2024-01-02 00:00:00 UTC);

    #[derive(Default)]
    struct FakeClient {
        remote: Mutex<Option<(OffsetDateTime, Bytes)>>,
        fail_meta: Option<CloudStorageError>,
        uploads: Mutex<Vec<(String, Bytes, bool)>>,
        downloads: Mutex<u32>,
    }

    impl FakeClient {
        fn with_remote(modified: OffsetDateTime, content: &'static str) -> Self {
            Self {
                remote: Mutex::new(Some((modified, Bytes::from_static(content.as_bytes())))),
                ..Self::default()
            }
        }

        fn file(path: &str, modified: OffsetDateTime) -> CloudFile {
            CloudFile {
                name: crate::utils::get_filename(path).to_string(),
                path: path.to_string(),
                last_modified: modified,
            }
        }
    }

    impl Client for FakeClient {
        fn provider(&self) -> Provider {
            Provider::WebDav
        }

        async fn list(&self, _options: &ListOptions) -> Result<ListResult, CloudStorageError> {
            Ok(ListResult::default())
        }

        async fn get_file_meta_data(&self, path: &str) -> Result<CloudFile, CloudStorageError> {
            if let Some(err) = &self.fail_meta {
                return Err(err.clone());
            }
            match &*self.remote.lock().unwrap() {
                Some((modified, _)) => Ok(Self::file(path, *modified)),
                None => Err(CloudStorageError::not_found()),
            }
        }

        async fn download_file(&self, path: &str) -> Result<DownloadedFile, CloudStorageError> {
            *self.downloads.lock().unwrap() += 1;
            let (modified, content) = self
                .remote
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(CloudStorageError::not_found)?;
            Ok(DownloadedFile {
                cloud_file: Self::file(path, modified),
                response: FileResponse::from_bytes(content),
            })
        }

        async fn upload_file(
            &self,
            path: &str,
            content: Bytes,
            overwrite: bool,
        ) -> Result<CloudFile, CloudStorageError> {
            self.uploads
                .lock()
                .unwrap()
                .push((path.to_string(), content.clone(), overwrite));
            *self.remote.lock().unwrap() = Some((T1, content));
            Ok(Self::file(path, T1))
        }

        async fn delete_file(&self, _path: &str) -> Result<(), CloudStorageError> {
            Ok(())
        }
    }

    fn synced_request(content: &'static str, version: &str, last_sync: OffsetDateTime) -> SyncRequest {
        let mut request = SyncRequest::new("/todo.txt", content);
        request.local_version = Some(create_checksum(version));
        request.last_sync = Some(last_sync);
        request
    }

    #[tokio::test]
    async fn pushes_when_remote_is_missing() {
        let client = FakeClient::default();
        let result = create_sync_file_function(&client)
            .sync_file(&SyncRequest::new("/todo.txt", "local"))
            .await
            .unwrap();

        assert_eq!(result.direction(), "push");
        let uploads = client.uploads.lock().unwrap();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].1, Bytes::from_static(b"local"));
    }

    #[tokio::test]
    async fn pulls_when_remote_is_newer_even_if_local_changed() {
        let client = FakeClient::with_remote(T1, "remote");
        let request = synced_request("local edit", "original", T0);

        let result = create_sync_file_function(&client)
            .sync_file(&request)
            .await
            .unwrap();

        match result {
            SyncResult::Pull { file, content } => {
                assert_eq!(content, Bytes::from_static(b"remote"));
                assert_eq!(file.last_modified, T1);
            }
            other => panic!("expected pull, got {other:?}"),
        }
        assert!(client.uploads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn pushes_local_change_with_overwrite() {
        let client = FakeClient::with_remote(T0, "remote");
        let request = synced_request("local edit", "original", T1);

        let result = create_sync_file_function(&client)
            .sync_file(&request)
            .await
            .unwrap();

        assert_eq!(result.direction(), "push");
        let uploads = client.uploads.lock().unwrap();
        assert_eq!(uploads.len(), 1);
        assert!(uploads[0].2, "push must overwrite");
    }

    #[tokio::test]
    async fn does_nothing_when_neither_side_changed() {
        let client = FakeClient::with_remote(T0, "same");
        let request = synced_request("same", "same", T0);

        let result = create_sync_file_function(&client)
            .sync_file(&request)
            .await
            .unwrap();

        assert_eq!(result, SyncResult::None);
        assert!(client.uploads.lock().unwrap().is_empty());
        assert_eq!(*client.downloads.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn never_synced_file_pulls_existing_remote() {
        let client = FakeClient::with_remote(T0, "remote");
        let result = create_sync_file_function(&client)
            .sync_file(&SyncRequest::new("/todo.txt", "local"))
            .await
            .unwrap();
        assert_eq!(result.direction(), "pull");
    }

    #[tokio::test]
    async fn propagates_client_errors_unchanged() {
        let client = FakeClient {
            fail_meta: Some(CloudStorageError::unauthorized().with_cause("revoked")),
            ..FakeClient::default()
        };
        let err = create_sync_file_function(&client)
            .sync_file(&SyncRequest::new("/todo.txt", "local"))
            .await
            .unwrap_err();
        assert!(err.is_unauthorized());
        assert_eq!(err.cause(), Some("revoked"));
        assert!(client.uploads.lock().unwrap().is_empty());
    }

    #[test]
    fn request_from_ref_carries_bookkeeping() {
        let file_ref = CloudFileRef {
            provider: Provider::Dropbox,
            path: "/todo.txt".into(),
            local_version: create_checksum("old"),
            last_sync: T0,
        };
        let request = SyncRequest::from_ref(&file_ref, "new");
        assert_eq!(request.path, "/todo.txt");
        assert_eq!(request.checksum, create_checksum("new"));
        assert_eq!(request.last_sync, Some(T0));
        assert!(request.local_changed());
    }
}
