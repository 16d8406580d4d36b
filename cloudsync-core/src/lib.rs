mod client;
mod dropbox;
mod error;
mod retry;
mod storage;
mod sync;
mod types;
mod utils;
mod webdav;

pub use client::{Client, DownloadedFile, FileResponse, ListOptions, ProviderClient};
pub use dropbox::{DEFAULT_API_URL, DEFAULT_CONTENT_URL, DropboxClient, DropboxConfig};
pub use error::{CloudStorageError, ErrorKind};
pub use retry::{Backoff, RetryPolicy};
pub use storage::{AnyCloudStorage, CloudStorage, SyncedFile, transferred_ref};
pub use sync::{SyncEngine, SyncRequest, SyncResult, create_sync_file_function};
pub use types::{
    CloudFile, CloudFileRef, CloudItem, CloudItemType, ListResult, Provider, UnknownProvider,
};
pub use utils::{
    ARCHIVE_FILE_NAME, DEFAULT_FILE_NAME, create_checksum, decode_html_entities,
    get_archive_file_path, get_dirname, get_filename, normalise_path,
};
pub use webdav::{WebDavClient, WebDavConfig};
