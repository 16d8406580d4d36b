use bytes::Bytes;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client as HttpClient, Method, RequestBuilder, Response};
use url::Url;

use super::multistatus::{DavEntry, parse_multistatus};
use crate::client::{Client, DownloadedFile, FileResponse, ListOptions};
use crate::error::CloudStorageError;
use crate::types::{CloudFile, CloudItem, CloudItemType, ListResult, Provider};
use crate::utils::{
    decode_html_entities, encode_path, get_filename, join_url, normalise_path, parse_http_date,
};

#[derive(Clone, PartialEq, Eq)]
pub struct WebDavConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for WebDavConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebDavConfig")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Clone)]
pub struct WebDavClient {
    http: HttpClient,
    config: WebDavConfig,
    server_base_path: String,
}

impl WebDavClient {
    pub fn new(config: WebDavConfig) -> Result<Self, CloudStorageError> {
        Self::with_http_client(HttpClient::new(), config)
    }

    pub fn with_http_client(
        http: HttpClient,
        config: WebDavConfig,
    ) -> Result<Self, CloudStorageError> {
        let base = Url::parse(&config.base_url)?;
        let server_base_path = normalise_path(base.path());
        Ok(Self {
            http,
            config,
            server_base_path,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = join_url(&self.config.base_url, &encode_path(path));
        self.http
            .request(method, url)
            .basic_auth(&self.config.username, Some(&self.config.password))
    }

    async fn send(request: RequestBuilder) -> Result<Response, CloudStorageError> {
        let response = request.send().await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(CloudStorageError::from_status(status, body))
        }
    }

    /// Lists `path` and its direct children.
    async fn propfind(&self, path: &str) -> Result<Vec<CloudItem>, CloudStorageError> {
        tracing::debug!(path, "webdav PROPFIND");
        let method = Method::from_bytes(b"PROPFIND")
            .map_err(|err| CloudStorageError::generic(err.to_string()))?;
        let request = self
            .request(method, path)
            .header(ACCEPT, "text/plain,application/xml")
            .header("Depth", "1");
        let xml = Self::send(request).await?.text().await?;
        if xml.trim().is_empty() {
            return Err(CloudStorageError::generic(
                "Failed parsing directory contents: Empty response",
            ));
        }
        Ok(parse_multistatus(&xml)?
            .into_iter()
            .map(|entry| self.item_from_entry(entry))
            .collect())
    }

    fn item_from_entry(&self, entry: DavEntry) -> CloudItem {
        let relative = self.relative_to_base(strip_origin(&entry.href));
        let decoded = urlencoding::decode(&relative)
            .map(|value| value.into_owned())
            .unwrap_or(relative);
        let path = decode_html_entities(&decoded);
        CloudItem {
            name: get_filename(&path).to_string(),
            item_type: if entry.is_collection {
                CloudItemType::Directory
            } else {
                CloudItemType::File
            },
            last_modified: entry.last_modified.as_deref().and_then(parse_http_date),
            path,
        }
    }

    fn relative_to_base(&self, href: &str) -> String {
        let base = self.server_base_path.trim_end_matches('/');
        if base.is_empty() {
            return normalise_path(href);
        }
        match href.strip_prefix(base) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => normalise_path(rest),
            _ => normalise_path(href),
        }
    }
}

fn strip_origin(href: &str) -> &str {
    for scheme in ["https://", "http://"] {
        if let Some(rest) = href.strip_prefix(scheme) {
            return rest.find('/').map_or("/", |idx| &rest[idx..]);
        }
    }
    href
}

impl Client for WebDavClient {
    fn provider(&self) -> Provider {
        Provider::WebDav
    }

    async fn list(&self, options: &ListOptions) -> Result<ListResult, CloudStorageError> {
        let Some(path) = options.path.as_deref() else {
            let cause = if options.cursor.is_some() {
                "WebDAV does not support cursor based listing"
            } else {
                "Either path or cursor must be defined"
            };
            return Err(CloudStorageError::generic(cause));
        };
        let directory = normalise_path(path);
        let items = self
            .propfind(&directory)
            .await?
            .into_iter()
            .filter(|item| item.path != directory)
            .collect();
        Ok(ListResult {
            items,
            cursor: None,
            has_more: false,
        })
    }

    async fn get_file_meta_data(&self, path: &str) -> Result<CloudFile, CloudStorageError> {
        let filename = get_filename(path);
        let dirname = &path[..path.len() - filename.len()];
        let directory = normalise_path(dirname);
        // Depth 1 includes the listed directory, which may share the file's name.
        let entry = self
            .propfind(dirname)
            .await?
            .into_iter()
            .filter(|item| item.path != directory)
            .find(|item| item.name == filename)
            .ok_or_else(CloudStorageError::not_found)?;
        if !entry.is_file() {
            return Err(CloudStorageError::generic(format!(
                "Resource with path \"{path}\" is not a file"
            )));
        }
        let last_modified = entry.last_modified.ok_or_else(|| {
            CloudStorageError::generic(format!("File with path \"{path}\" has no last-modified date"))
        })?;
        Ok(CloudFile {
            name: entry.name,
            path: entry.path,
            last_modified,
        })
    }

    async fn download_file(&self, path: &str) -> Result<DownloadedFile, CloudStorageError> {
        tracing::debug!(path, "webdav GET");
        let response = Self::send(self.request(Method::GET, path)).await?;
        let cloud_file = self.get_file_meta_data(path).await?;
        Ok(DownloadedFile {
            cloud_file,
            response: FileResponse::from_http(response),
        })
    }

    async fn upload_file(
        &self,
        path: &str,
        content: Bytes,
        overwrite: bool,
    ) -> Result<CloudFile, CloudStorageError> {
        if !overwrite {
            match self.get_file_meta_data(path).await {
                Ok(_) => return Err(CloudStorageError::conflict().with_path(path)),
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
        }
        tracing::debug!(path, bytes = content.len(), "webdav PUT");
        let request = self
            .request(Method::PUT, path)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(content);
        Self::send(request).await?;
        self.get_file_meta_data(path).await
    }

    async fn delete_file(&self, path: &str) -> Result<(), CloudStorageError> {
        tracing::debug!(path, "webdav DELETE");
        Self::send(self.request(Method::DELETE, path)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base_url: &str) -> WebDavClient {
        WebDavClient::new(WebDavConfig {
            base_url: base_url.into(),
            username: "user".into(),
            password: "pass".into(),
        })
        .unwrap()
    }

    #[test]
    fn strips_scheme_and_host() {
        assert_eq!(strip_origin("https://dav.example/a/b.txt"), "/a/b.txt");
        assert_eq!(strip_origin("http://dav.example"), "/");
        assert_eq!(strip_origin("/a/b.txt"), "/a/b.txt");
    }

    #[test]
    fn hrefs_are_made_relative_to_server_base_path() {
        let dav = client("https://dav.example/remote.php/dav/files/user/");
        assert_eq!(
            dav.relative_to_base("/remote.php/dav/files/user/todo.txt"),
            "/todo.txt"
        );
        assert_eq!(dav.relative_to_base("/remote.php/dav/files/user/"), "/");
        assert_eq!(
            dav.relative_to_base("/remote.php/dav/files/user2/x"),
            "/remote.php/dav/files/user2/x"
        );
    }

    #[test]
    fn items_are_decoded() {
        let dav = client("https://dav.example/dav");
        let item = dav.item_from_entry(DavEntry {
            href: "https://dav.example/dav/Notes/Tom%20&amp;%20Jerry.txt".into(),
            last_modified: Some("Tue, 02 Jan 2024 03:04:05 GMT".into()),
            is_collection: false,
        });
        assert_eq!(item.path, "/Notes/Tom & Jerry.txt");
        assert_eq!(item.name, "Tom & Jerry.txt");
        assert!(item.is_file());
        assert!(item.last_modified.is_some());
    }

    #[test]
    fn debug_redacts_password() {
        let dav = client("https://dav.example");
        assert!(!format!("{:?}", dav.config).contains("pass\""));
    }
}
