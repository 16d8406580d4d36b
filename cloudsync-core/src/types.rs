use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A cloud storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provider {
    #[serde(rename = "WebDAV")]
    WebDav,
    Dropbox,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::WebDav, Provider::Dropbox];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::WebDav => "WebDAV",
            Provider::Dropbox => "Dropbox",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownProvider(pub String);

impl fmt::Display for UnknownProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown provider: {}", self.0)
    }
}

impl std::error::Error for UnknownProvider {}

impl FromStr for Provider {
    type Err = UnknownProvider;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "webdav" => Ok(Provider::WebDav),
            "dropbox" => Ok(Provider::Dropbox),
            _ => Err(UnknownProvider(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudItemType {
    File,
    Directory,
}

/// An entry of a remote listing. `path` identifies the item within one provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudItem {
    pub name: String,
    pub path: String,
    pub item_type: CloudItemType,
    pub last_modified: Option<OffsetDateTime>,
}

impl CloudItem {
    pub fn is_file(&self) -> bool {
        self.item_type == CloudItemType::File
    }
}

/// Metadata of a downloadable file at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudFile {
    pub name: String,
    pub path: String,
    pub last_modified: OffsetDateTime,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListResult {
    pub items: Vec<CloudItem>,
    pub cursor: Option<String>,
    pub has_more: bool,
}

/// Binds a local file to a remote path plus the bookkeeping of its last sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudFileRef {
    pub provider: Provider,
    pub path: String,
    /// Checksum of the content both sides held after the last sync.
    pub local_version: String,
    #[serde(with = "time::serde::rfc3339")]
    pub last_sync: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn provider_parses_case_insensitively() {
        assert_eq!("webdav".parse::<Provider>().unwrap(), Provider::WebDav);
        assert_eq!("Dropbox".parse::<Provider>().unwrap(), Provider::Dropbox);
        assert!("gdrive".parse::<Provider>().is_err());
    }

    #[test]
    fn file_ref_serializes_with_wire_names() {
        let file_ref = CloudFileRef {
            provider: Provider::WebDav,
            path: "/todo.txt".into(),
            local_version: "abc".into(),
            last_sync: datetime!(2024-01-02 03:04:05 UTC),
        };
        let value = serde_json::to_value(&file_ref).unwrap();
        assert_eq!(value["provider"], "WebDAV");
        assert_eq!(value["localVersion"], "abc");
        assert_eq!(value["lastSync"], "2024-01-02T03:04:05Z");

        let back: CloudFileRef = serde_json::from_value(value).unwrap();
        assert_eq!(back, file_ref);
    }
}
