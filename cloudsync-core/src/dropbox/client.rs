use std::sync::Arc;

use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client as HttpClient, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use url::Url;

use super::auth::TokenProvider;
use crate::client::{Client, DownloadedFile, FileResponse, ListOptions};
use crate::error::CloudStorageError;
use crate::types::{CloudFile, CloudItem, CloudItemType, ListResult, Provider};
use crate::utils::{join_url, parse_rfc3339};

pub const DEFAULT_API_URL: &str = "https://api.dropboxapi.com";
pub const DEFAULT_CONTENT_URL: &str = "https://content.dropboxapi.com";

const API_ARG_HEADER: &str = "Dropbox-API-Arg";
const API_RESULT_HEADER: &str = "Dropbox-API-Result";

#[derive(Clone, PartialEq, Eq)]
pub struct DropboxConfig {
    /// App key. Apps using PKCE have no secret.
    pub client_id: String,
    pub refresh_token: String,
    pub api_base_url: String,
    pub content_base_url: String,
}

impl DropboxConfig {
    pub fn new(client_id: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            refresh_token: refresh_token.into(),
            api_base_url: DEFAULT_API_URL.to_string(),
            content_base_url: DEFAULT_CONTENT_URL.to_string(),
        }
    }

    pub fn with_base_urls(
        mut self,
        api_base_url: impl Into<String>,
        content_base_url: impl Into<String>,
    ) -> Self {
        self.api_base_url = api_base_url.into();
        self.content_base_url = content_base_url.into();
        self
    }
}

impl std::fmt::Debug for DropboxConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DropboxConfig")
            .field("client_id", &self.client_id)
            .field("refresh_token", &"<redacted>")
            .field("api_base_url", &self.api_base_url)
            .field("content_base_url", &self.content_base_url)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct Metadata {
    #[serde(rename = ".tag", default)]
    tag: Option<String>,
    name: String,
    #[serde(default)]
    path_lower: Option<String>,
    #[serde(default)]
    server_modified: Option<String>,
}

impl Metadata {
    fn is_folder(&self) -> bool {
        self.tag.as_deref() == Some("folder")
    }

    fn into_item(self) -> Option<CloudItem> {
        let item_type = match self.tag.as_deref() {
            Some("file") => CloudItemType::File,
            Some("folder") => CloudItemType::Directory,
            _ => return None,
        };
        let path = self.path_lower?;
        Some(CloudItem {
            name: self.name,
            last_modified: self.server_modified.as_deref().and_then(parse_rfc3339),
            item_type,
            path,
        })
    }

    fn into_file(self, requested: &str) -> Result<CloudFile, CloudStorageError> {
        match self.tag.as_deref() {
            Some("folder") => {
                return Err(CloudStorageError::generic(format!(
                    "Resource with path \"{requested}\" is not a file"
                )));
            }
            Some("deleted") => return Err(CloudStorageError::not_found()),
            _ => {}
        }
        let last_modified = self
            .server_modified
            .as_deref()
            .and_then(parse_rfc3339)
            .ok_or_else(|| {
                CloudStorageError::generic(format!(
                    "File with path \"{requested}\" has no valid server_modified date"
                ))
            })?;
        let path = self
            .path_lower
            .unwrap_or_else(|| dropbox_path(requested).to_lowercase());
        Ok(CloudFile {
            name: self.name,
            path,
            last_modified,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ListFolderResponse {
    entries: Vec<Metadata>,
    cursor: String,
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    error_summary: String,
}

/// Dropbox HTTP API v2 client authenticated with a refresh token.
#[derive(Clone)]
pub struct DropboxClient {
    http: HttpClient,
    api_base_url: String,
    content_base_url: String,
    tokens: Arc<TokenProvider>,
}

impl DropboxClient {
    pub fn new(config: DropboxConfig) -> Result<Self, CloudStorageError> {
        Self::with_http_client(HttpClient::new(), config)
    }

    pub fn with_http_client(
        http: HttpClient,
        config: DropboxConfig,
    ) -> Result<Self, CloudStorageError> {
        Url::parse(&config.api_base_url)?;
        Url::parse(&config.content_base_url)?;
        let tokens = TokenProvider::new(
            http.clone(),
            join_url(&config.api_base_url, "oauth2/token"),
            config.client_id,
            config.refresh_token,
        );
        Ok(Self {
            http,
            api_base_url: config.api_base_url,
            content_base_url: config.content_base_url,
            tokens: Arc::new(tokens),
        })
    }

    /// Sends the request built by `build`; a rejected access token is refreshed and the
    /// request sent once more.
    async fn execute<F>(&self, build: F) -> Result<Response, CloudStorageError>
    where
        F: Fn(&str) -> RequestBuilder,
    {
        let token = self.tokens.valid_access_token().await?;
        let response = build(&token).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return check(response).await;
        }
        tracing::debug!("dropbox rejected access token, retrying with a fresh one");
        let token = self.tokens.refresh_now().await?;
        check(build(&token).send().await?).await
    }

    async fn rpc<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &Value,
    ) -> Result<T, CloudStorageError> {
        tracing::debug!(endpoint, "dropbox rpc");
        let url = join_url(&self.api_base_url, &format!("2/{endpoint}"));
        let response = self
            .execute(|token| {
                self.http
                    .post(&url)
                    .header(AUTHORIZATION, format!("Bearer {token}"))
                    .json(body)
            })
            .await?;
        Ok(response.json().await?)
    }

    fn content_request(&self, endpoint: &str, token: &str, arg: &str) -> RequestBuilder {
        let url = join_url(&self.content_base_url, &format!("2/{endpoint}"));
        self.http
            .post(url)
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .header(API_ARG_HEADER, arg)
    }
}

async fn check(response: Response) -> Result<Response, CloudStorageError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(classify_error(status, &body))
}

/// Maps a failed Dropbox call onto the error taxonomy using its `error_summary`.
pub(crate) fn classify_error(status: StatusCode, body: &str) -> CloudStorageError {
    let summary = serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .map(|parsed| parsed.error_summary)
        .filter(|summary| !summary.is_empty())
        .unwrap_or_else(|| body.to_string());

    if status == StatusCode::UNAUTHORIZED {
        CloudStorageError::unauthorized().with_cause(summary)
    } else if summary.contains("path/not_found") || summary.contains("path_lookup/not_found") {
        CloudStorageError::not_found().with_cause(summary)
    } else if summary.contains("path/conflict") {
        CloudStorageError::conflict().with_cause(summary)
    } else if matches!(status, StatusCode::NOT_FOUND | StatusCode::CONFLICT) {
        CloudStorageError::generic(summary)
    } else {
        CloudStorageError::from_status(status, summary)
    }
}

/// Root is `""`, everything else starts with `/`.
fn dropbox_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

/// JSON for HTTP headers: anything outside ASCII is written as `\uXXXX`.
fn header_json(value: &Value) -> String {
    let raw = value.to_string();
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch.is_ascii() {
            out.push(ch);
        } else {
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{unit:04x}"));
            }
        }
    }
    out
}

impl Client for DropboxClient {
    fn provider(&self) -> Provider {
        Provider::Dropbox
    }

    async fn list(&self, options: &ListOptions) -> Result<ListResult, CloudStorageError> {
        let page: ListFolderResponse = match (&options.cursor, &options.path) {
            (Some(cursor), _) => {
                self.rpc("files/list_folder/continue", &json!({ "cursor": cursor }))
                    .await?
            }
            (None, Some(path)) => {
                let mut body = json!({
                    "path": dropbox_path(path),
                    "recursive": true,
                });
                if let Some(limit) = options.limit {
                    body["limit"] = json!(limit);
                }
                self.rpc("files/list_folder", &body).await?
            }
            (None, None) => {
                return Err(CloudStorageError::generic(
                    "Either path or cursor must be defined",
                ));
            }
        };
        Ok(ListResult {
            items: page
                .entries
                .into_iter()
                .filter_map(Metadata::into_item)
                .collect(),
            cursor: Some(page.cursor),
            has_more: page.has_more,
        })
    }

    async fn get_file_meta_data(&self, path: &str) -> Result<CloudFile, CloudStorageError> {
        let meta: Metadata = self
            .rpc("files/get_metadata", &json!({ "path": dropbox_path(path) }))
            .await?;
        if meta.is_folder() {
            return Err(CloudStorageError::generic(format!(
                "Resource with path \"{path}\" is not a file"
            )));
        }
        meta.into_file(path)
    }

    async fn download_file(&self, path: &str) -> Result<DownloadedFile, CloudStorageError> {
        tracing::debug!(path, "dropbox download");
        let arg = header_json(&json!({ "path": dropbox_path(path) }));
        let response = self
            .execute(|token| self.content_request("files/download", token, &arg))
            .await?;
        let result = response
            .headers()
            .get(API_RESULT_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                CloudStorageError::generic(format!("download response has no {API_RESULT_HEADER}"))
            })?;
        let meta: Metadata = serde_json::from_str(result)?;
        let cloud_file = meta.into_file(path)?;
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
        tracing::debug!(path, bytes = content.len(), overwrite, "dropbox upload");
        let arg = header_json(&json!({
            "path": dropbox_path(path),
            "mode": if overwrite { "overwrite" } else { "add" },
            "autorename": !overwrite,
            "mute": true,
        }));
        let response = self
            .execute(|token| {
                self.content_request("files/upload", token, &arg)
                    .header(CONTENT_TYPE, "application/octet-stream")
                    .body(content.clone())
            })
            .await?;
        let meta: Metadata = response.json().await?;
        meta.into_file(path)
    }

    async fn delete_file(&self, path: &str) -> Result<(), CloudStorageError> {
        tracing::debug!(path, "dropbox delete");
        let _: Value = self
            .rpc("files/delete_v2", &json!({ "path": dropbox_path(path) }))
            .await?;
        Ok(())
    }
}
