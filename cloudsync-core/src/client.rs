use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt};

use crate::dropbox::DropboxClient;
use crate::error::CloudStorageError;
use crate::types::{CloudFile, ListResult, Provider};
use crate::webdav::WebDavClient;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub path: Option<String>,
    pub cursor: Option<String>,
    /// Page size hint. Providers without paging ignore it.
    pub limit: Option<u32>,
}

impl ListOptions {
    pub fn path(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn cursor(cursor: impl Into<String>) -> Self {
        Self {
            cursor: Some(cursor.into()),
            ..Self::default()
        }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Body of a downloaded file. The caller decides whether to buffer or stream it.
pub struct FileResponse {
    body: Body,
}

enum Body {
    Http(reqwest::Response),
    Buffered(Bytes),
}

impl FileResponse {
    pub(crate) fn from_http(response: reqwest::Response) -> Self {
        Self {
            body: Body::Http(response),
        }
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self {
            body: Body::Buffered(bytes.into()),
        }
    }

    pub async fn bytes(self) -> Result<Bytes, CloudStorageError> {
        match self.body {
            Body::Http(response) => Ok(response.bytes().await?),
            Body::Buffered(bytes) => Ok(bytes),
        }
    }

    pub async fn text(self) -> Result<String, CloudStorageError> {
        let bytes = self.bytes().await?;
        String::from_utf8(bytes.to_vec())
            .map_err(|err| CloudStorageError::generic(format!("file is not valid UTF-8: {err}")))
    }

    pub fn bytes_stream(self) -> BoxStream<'static, Result<Bytes, CloudStorageError>> {
        match self.body {
            Body::Http(response) => response
                .bytes_stream()
                .map(|chunk| chunk.map_err(CloudStorageError::from))
                .boxed(),
            Body::Buffered(bytes) => stream::once(async move { Ok(bytes) }).boxed(),
        }
    }
}

impl std::fmt::Debug for FileResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.body {
            Body::Http(response) => f
                .debug_struct("FileResponse")
                .field("status", &response.status())
                .finish(),
            Body::Buffered(bytes) => f
                .debug_struct("FileResponse")
                .field("buffered", &bytes.len())
                .finish(),
        }
    }
}

#[derive(Debug)]
pub struct DownloadedFile {
    pub cloud_file: CloudFile,
    pub response: FileResponse,
}

/// The five primitive operations every provider adapts to its own wire protocol.
///
/// Failures are always [`CloudStorageError`]s; no provider specific error escapes.
#[allow(async_fn_in_trait)]
pub trait Client {
    fn provider(&self) -> Provider;

    /// Exactly one of `path` / `cursor` is required; the cursor wins if both are set.
    async fn list(&self, options: &ListOptions) -> Result<ListResult, CloudStorageError>;

    async fn get_file_meta_data(&self, path: &str) -> Result<CloudFile, CloudStorageError>;

    async fn download_file(&self, path: &str) -> Result<DownloadedFile, CloudStorageError>;

    async fn upload_file(
        &self,
        path: &str,
        content: Bytes,
        overwrite: bool,
    ) -> Result<CloudFile, CloudStorageError>;

    async fn delete_file(&self, path: &str) -> Result<(), CloudStorageError>;
}

/// The closed set of supported providers.
#[derive(Clone)]
pub enum ProviderClient {
    WebDav(WebDavClient),
    Dropbox(DropboxClient),
}

impl From<WebDavClient> for ProviderClient {
    fn from(client: WebDavClient) -> Self {
        ProviderClient::WebDav(client)
    }
}

impl From<DropboxClient> for ProviderClient {
    fn from(client: DropboxClient) -> Self {
        ProviderClient::Dropbox(client)
    }
}

impl Client for ProviderClient {
    fn provider(&self) -> Provider {
        match self {
            ProviderClient::WebDav(client) => client.provider(),
            ProviderClient::Dropbox(client) => client.provider(),
        }
    }

    async fn list(&self, options: &ListOptions) -> Result<ListResult, CloudStorageError> {
        match self {
            ProviderClient::WebDav(client) => client.list(options).await,
            ProviderClient::Dropbox(client) => client.list(options).await,
        }
    }

    async fn get_file_meta_data(&self, path: &str) -> Result<CloudFile, CloudStorageError> {
        match self {
            ProviderClient::WebDav(client) => client.get_file_meta_data(path).await,
            ProviderClient::Dropbox(client) => client.get_file_meta_data(path).await,
        }
    }

    async fn download_file(&self, path: &str) -> Result<DownloadedFile, CloudStorageError> {
        match self {
            ProviderClient::WebDav(client) => client.download_file(path).await,
            ProviderClient::Dropbox(client) => client.download_file(path).await,
        }
    }

    async fn upload_file(
        &self,
        path: &str,
        content: Bytes,
        overwrite: bool,
    ) -> Result<CloudFile, CloudStorageError> {
        match self {
            ProviderClient::WebDav(client) => client.upload_file(path, content, overwrite).await,
            ProviderClient::Dropbox(client) => client.upload_file(path, content, overwrite).await,
        }
    }

    async fn delete_file(&self, path: &str) -> Result<(), CloudStorageError> {
        match self {
            ProviderClient::WebDav(client) => client.delete_file(path).await,
            ProviderClient::Dropbox(client) => client.delete_file(path).await,
        }
    }
}
