use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use cloudsync_core::{CloudFileRef, Provider};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RefStoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to encode ref store {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Which remote file of a local file a ref points at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefKind {
    #[default]
    File,
    /// The companion archive, e.g. `done.txt` next to `todo.txt`.
    Archive,
}

impl RefKind {
    pub const ALL: [RefKind; 2] = [RefKind::File, RefKind::Archive];

    pub fn as_str(&self) -> &'static str {
        match self {
            RefKind::File => "file",
            RefKind::Archive => "archive",
        }
    }

    fn is_file(&self) -> bool {
        *self == RefKind::File
    }
}

impl std::fmt::Display for RefKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StoredRef {
    identifier: String,
    #[serde(default, skip_serializing_if = "RefKind::is_file")]
    kind: RefKind,
    #[serde(flatten)]
    file_ref: CloudFileRef,
}

/// `CloudFileRef`s keyed by local file identifier and kind, persisted as one JSON array.
#[derive(Debug, Clone)]
pub struct RefStore {
    path: PathBuf,
}

impl RefStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get_ref(
        &self,
        kind: RefKind,
        identifier: &str,
    ) -> Result<Option<CloudFileRef>, RefStoreError> {
        Ok(self
            .load()?
            .into_iter()
            .find(|stored| stored.kind == kind && stored.identifier == identifier)
            .map(|stored| stored.file_ref))
    }

    pub fn get_refs(&self, kind: RefKind) -> Result<Vec<(String, CloudFileRef)>, RefStoreError> {
        Ok(self
            .load()?
            .into_iter()
            .filter(|stored| stored.kind == kind)
            .map(|stored| (stored.identifier, stored.file_ref))
            .collect())
    }

    /// Inserts or replaces the `kind` ref of `identifier`.
    ///
    /// Another identifier bound to the same provider and path under the same kind
    /// loses its ref, and an older `last_sync` never replaces a newer one.
    pub fn set_ref(
        &self,
        kind: RefKind,
        identifier: &str,
        file_ref: CloudFileRef,
    ) -> Result<(), RefStoreError> {
        let mut refs = self.load()?;
        let mut file_ref = file_ref;
        if let Some(existing) = refs
            .iter()
            .find(|stored| stored.kind == kind && stored.identifier == identifier)
            && existing.file_ref.provider == file_ref.provider
            && existing.file_ref.path == file_ref.path
            && existing.file_ref.last_sync > file_ref.last_sync
        {
            file_ref.last_sync = existing.file_ref.last_sync;
        }
        refs.retain(|stored| {
            stored.kind != kind
                || (stored.identifier != identifier
                    && !(stored.file_ref.provider == file_ref.provider
                        && stored.file_ref.path == file_ref.path))
        });
        refs.push(StoredRef {
            identifier: identifier.to_string(),
            kind,
            file_ref,
        });
        self.save(&refs)
    }

    pub fn remove_ref(
        &self,
        kind: RefKind,
        identifier: &str,
    ) -> Result<Option<CloudFileRef>, RefStoreError> {
        let mut refs = self.load()?;
        let Some(idx) = refs
            .iter()
            .position(|stored| stored.kind == kind && stored.identifier == identifier)
        else {
            return Ok(None);
        };
        let removed = refs.remove(idx);
        self.save(&refs)?;
        Ok(Some(removed.file_ref))
    }

    /// Drops every ref of `provider` of either kind, returning how many were removed.
    pub fn remove_refs(&self, provider: Provider) -> Result<usize, RefStoreError> {
        let mut refs = self.load()?;
        let before = refs.len();
        refs.retain(|stored| stored.file_ref.provider != provider);
        let removed = before - refs.len();
        if removed > 0 {
            self.save(&refs)?;
        }
        Ok(removed)
    }

    pub fn providers(&self) -> Result<Vec<Provider>, RefStoreError> {
        let refs = self.load()?;
        Ok(Provider::ALL
            .into_iter()
            .filter(|provider| refs.iter().any(|stored| stored.file_ref.provider == *provider))
            .collect())
    }

    /// A file that no longer parses is treated as empty and replaced on the next save.
    fn load(&self) -> Result<Vec<StoredRef>, RefStoreError> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(self.io_error(source)),
        };
        match serde_json::from_slice(&raw) {
            Ok(refs) => Ok(refs),
            Err(err) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %err,
                    "ref store is corrupt, starting over"
                );
                Ok(Vec::new())
            }
        }
    }

    fn save(&self, refs: &[StoredRef]) -> Result<(), RefStoreError> {
        if refs.is_empty() {
            return match fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
                Err(source) => Err(self.io_error(source)),
            };
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| self.io_error(source))?;
        }
        let raw = serde_json::to_vec_pretty(refs).map_err(|source| RefStoreError::Json {
            path: self.path.clone(),
            source,
        })?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, raw).map_err(|source| self.io_error(source))?;
        fs::rename(&tmp, &self.path).map_err(|source| self.io_error(source))
    }

    fn io_error(&self, source: std::io::Error) -> RefStoreError {
        RefStoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;
    use time::macros::datetime;

    const FILE: RefKind = RefKind::File;
    const ARCHIVE: RefKind = RefKind::Archive;

    fn file_ref(provider: Provider, path: &str, last_sync: OffsetDateTime) -> CloudFileRef {
        CloudFileRef {
            provider,
            path: path.into(),
            local_version: "abc".into(),
            last_sync,
        }
    }

    fn store() -> (tempfile::TempDir, RefStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = RefStore::new(dir.path().join("nested").join("refs.json"));
        (dir, store)
    }

    #[test]
    fn missing_file_means_no_refs() {
        let (_dir, store) = store();
        assert!(store.get_refs(FILE).unwrap().is_empty());
        assert_eq!(store.get_ref(FILE, "/home/me/todo.txt").unwrap(), None);
    }

    #[test]
    fn set_and_get_ref_persist_to_disk() {
        let (_dir, store) = store();
        let stored = file_ref(Provider::WebDav, "/todo.txt", datetime!(2024-01-01 0:00 UTC));
        store
            .set_ref(FILE, "/home/me/todo.txt", stored.clone())
            .unwrap();

        let reopened = RefStore::new(store.path());
        assert_eq!(
            reopened.get_ref(FILE, "/home/me/todo.txt").unwrap(),
            Some(stored)
        );
    }

    #[test]
    fn remote_path_stays_unique_per_provider() {
        let (_dir, store) = store();
        let at = datetime!(2024-01-01 0:00 UTC);
        store
            .set_ref(FILE, "/a/todo.txt", file_ref(Provider::Dropbox, "/todo.txt", at))
            .unwrap();
        store
            .set_ref(FILE, "/b/todo.txt", file_ref(Provider::WebDav, "/todo.txt", at))
            .unwrap();
        store
            .set_ref(FILE, "/c/todo.txt", file_ref(Provider::Dropbox, "/todo.txt", at))
            .unwrap();

        let refs = store.get_refs(FILE).unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(store.get_ref(FILE, "/a/todo.txt").unwrap(), None);
        assert!(store.get_ref(FILE, "/c/todo.txt").unwrap().is_some());
    }

    #[test]
    fn last_sync_never_moves_backwards() {
        let (_dir, store) = store();
        let newer = datetime!(2024-02-01 0:00 UTC);
        store
            .set_ref(FILE, "/todo.txt", file_ref(Provider::WebDav, "/todo.txt", newer))
            .unwrap();
        store
            .set_ref(
                FILE,
                "/todo.txt",
                file_ref(Provider::WebDav, "/todo.txt", datetime!(2024-01-01 0:00 UTC)),
            )
            .unwrap();
        assert_eq!(
            store.get_ref(FILE, "/todo.txt").unwrap().unwrap().last_sync,
            newer
        );
    }

    #[test]
    fn archive_refs_live_beside_file_refs() {
        let (_dir, store) = store();
        let at = datetime!(2024-01-01 0:00 UTC);
        store
            .set_ref(FILE, "/todo.txt", file_ref(Provider::WebDav, "/todo.txt", at))
            .unwrap();
        store
            .set_ref(ARCHIVE, "/todo.txt", file_ref(Provider::WebDav, "/done.txt", at))
            .unwrap();

        assert_eq!(
            store.get_ref(FILE, "/todo.txt").unwrap().unwrap().path,
            "/todo.txt"
        );
        assert_eq!(
            store.get_ref(ARCHIVE, "/todo.txt").unwrap().unwrap().path,
            "/done.txt"
        );
        assert_eq!(store.get_refs(ARCHIVE).unwrap().len(), 1);

        assert!(store.remove_ref(ARCHIVE, "/todo.txt").unwrap().is_some());
        assert!(store.get_ref(FILE, "/todo.txt").unwrap().is_some());
    }

    #[test]
    fn file_refs_written_without_kind_still_load() {
        let (_dir, store) = store();
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(
            store.path(),
            r#"[{"identifier":"/todo.txt","provider":"WebDAV","path":"/todo.txt",
                "localVersion":"abc","lastSync":"2024-01-01T00:00:00Z"}]"#,
        )
        .unwrap();

        assert!(store.get_ref(FILE, "/todo.txt").unwrap().is_some());
        assert!(store.get_refs(ARCHIVE).unwrap().is_empty());
    }

    #[test]
    fn corrupt_file_is_reset_on_next_save() {
        let (_dir, store) = store();
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "{ not json").unwrap();

        assert!(store.get_refs(FILE).unwrap().is_empty());
        let stored = file_ref(Provider::WebDav, "/todo.txt", datetime!(2024-01-01 0:00 UTC));
        store.set_ref(FILE, "/todo.txt", stored.clone()).unwrap();
        assert_eq!(store.get_ref(FILE, "/todo.txt").unwrap(), Some(stored));
    }

    #[test]
    fn removing_refs_by_identifier_and_provider() {
        let (_dir, store) = store();
        let at = datetime!(2024-01-01 0:00 UTC);
        store
            .set_ref(FILE, "/a", file_ref(Provider::WebDav, "/a.txt", at))
            .unwrap();
        store
            .set_ref(FILE, "/b", file_ref(Provider::Dropbox, "/b.txt", at))
            .unwrap();
        store
            .set_ref(ARCHIVE, "/b", file_ref(Provider::Dropbox, "/b_done.txt", at))
            .unwrap();
        assert_eq!(
            store.providers().unwrap(),
            vec![Provider::WebDav, Provider::Dropbox]
        );

        assert!(store.remove_ref(FILE, "/a").unwrap().is_some());
        assert!(store.remove_ref(FILE, "/a").unwrap().is_none());
        assert_eq!(store.remove_refs(Provider::Dropbox).unwrap(), 2);
        assert!(!store.path().exists());
    }
}
