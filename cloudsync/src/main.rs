use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use cloudsync::{
    AppConfig, CloudSync, RefKind, RefStore, SyncReport, SyncTarget, open_secret_store,
};
use cloudsync_core::{CloudItemType, Provider, SyncResult, WebDavConfig, get_archive_file_path};
use tracing_subscriber::EnvFilter;

/// Keeps local files in sync with WebDAV or Dropbox.
#[derive(Parser, Debug)]
#[command(name = "cloudsync", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Validate and store WebDAV credentials
    ConnectWebdav {
        #[arg(long)]
        url: String,
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
    },
    /// Validate and store a Dropbox refresh token
    ConnectDropbox {
        #[arg(long)]
        refresh_token: String,
    },
    /// Forget a provider's credentials and links
    Disconnect { provider: Provider },
    /// List a remote directory
    List {
        provider: Provider,
        #[arg(default_value = "/")]
        path: String,
    },
    /// Link a local file to a remote path (uploads unless --download)
    Link {
        local: PathBuf,
        provider: Provider,
        remote: String,
        #[arg(long)]
        download: bool,
    },
    /// Link the archive (e.g. done.txt) of an already linked file
    LinkArchive {
        local: PathBuf,
        #[arg(long)]
        download: bool,
    },
    /// Sync the given linked files and their archives, or every linked file
    Sync { files: Vec<PathBuf> },
    /// Forget the links of a local file and its archive
    Unlink {
        local: PathBuf,
        /// Also delete the remote files
        #[arg(long)]
        delete_remote: bool,
        /// Only touch the archive
        #[arg(long)]
        archive: bool,
    },
    /// Show connected providers and linked files
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env();
    let secrets = open_secret_store(&config);
    let service = CloudSync::bootstrap(config, secrets)
        .await
        .context("failed to load cloud storages")?;
    if service.registry().snapshot().auth_error() {
        eprintln!("a stored session has expired, connect the provider again");
    }
    run(&service, cli.command).await
}

async fn run(service: &CloudSync, command: Command) -> anyhow::Result<()> {
    match command {
        Command::ConnectWebdav {
            url,
            username,
            password,
        } => {
            service
                .connect_webdav(WebDavConfig {
                    base_url: url,
                    username,
                    password,
                })
                .await?;
            println!("WebDAV connected");
        }
        Command::ConnectDropbox { refresh_token } => {
            service.connect_dropbox(&refresh_token).await?;
            println!("Dropbox connected");
        }
        Command::Disconnect { provider } => {
            service.disconnect(provider)?;
            println!("{provider} disconnected");
        }
        Command::List { provider, path } => {
            let listing = service.list(provider, &path).await?;
            for item in listing.items {
                let marker = match item.item_type {
                    CloudItemType::Directory => "d",
                    CloudItemType::File => "-",
                };
                println!("{marker} {}", item.path);
            }
            if listing.has_more {
                println!("(more entries available)");
            }
        }
        Command::Link {
            local,
            provider,
            remote,
            download,
        } => {
            let identifier = identifier(&local)?;
            if download {
                let (file_ref, content) = service
                    .link_download(&identifier, provider, &remote)
                    .await?;
                tokio::fs::write(&local, &content)
                    .await
                    .with_context(|| format!("failed to write {}", local.display()))?;
                println!("{} <- {provider}:{}", local.display(), file_ref.path);
            } else {
                let content = read_local(&local).await?;
                let file_ref = service
                    .link_upload(&identifier, provider, &remote, content)
                    .await?;
                println!("{} -> {provider}:{}", local.display(), file_ref.path);
            }
        }
        Command::LinkArchive { local, download } => {
            let identifier = identifier(&local)?;
            let archive = local_path(&identifier, RefKind::Archive)
                .ok_or_else(|| anyhow!("{} has no archive file", local.display()))?;
            if download {
                let (archive_ref, content) = service.link_archive_download(&identifier).await?;
                tokio::fs::write(&archive, &content)
                    .await
                    .with_context(|| format!("failed to write {}", archive.display()))?;
                println!(
                    "{} <- {}:{}",
                    archive.display(),
                    archive_ref.provider,
                    archive_ref.path
                );
            } else {
                if let Some(existing) = service.archive_meta_data(&identifier).await? {
                    anyhow::bail!(
                        "{} already exists remotely, use --download to link it",
                        existing.path
                    );
                }
                let content = read_local(&archive).await?;
                let archive_ref = service.link_archive_upload(&identifier, content).await?;
                println!(
                    "{} -> {}:{}",
                    archive.display(),
                    archive_ref.provider,
                    archive_ref.path
                );
            }
        }
        Command::Sync { files } => {
            let paths = if files.is_empty() {
                service
                    .refs()
                    .get_refs(RefKind::File)?
                    .into_iter()
                    .map(|(identifier, _)| PathBuf::from(identifier))
                    .collect()
            } else {
                files
            };
            let (targets, unreadable) = collect_targets(service.refs(), &paths).await?;
            let failed = unreadable + apply_reports(service.sync_all(targets).await).await;
            if failed > 0 {
                anyhow::bail!("{failed} file(s) failed to sync");
            }
        }
        Command::Unlink {
            local,
            delete_remote,
            archive,
        } => {
            let identifier = identifier(&local)?;
            match (delete_remote, archive) {
                (true, false) => {
                    let file_ref = service.delete_remote(&identifier).await?;
                    println!("deleted {}:{}", file_ref.provider, file_ref.path);
                }
                (true, true) => {
                    let archive_ref = service.delete_remote_archive(&identifier).await?;
                    println!("deleted {}:{}", archive_ref.provider, archive_ref.path);
                }
                (false, true) => {
                    if service.unlink_archive(&identifier)?.is_none() {
                        println!("{} has no linked archive", local.display());
                    }
                }
                (false, false) => {
                    let file = service.unlink(&identifier)?;
                    let archive = service.unlink_archive(&identifier)?;
                    if file.is_none() && archive.is_none() {
                        println!("{} was not linked", local.display());
                    }
                }
            }
        }
        Command::Status => {
            let status = service.status()?;
            println!("connected: {:?}", status.connected);
            if status.auth_error {
                println!("session expired: reconnect required");
            }
            for linked in status.linked {
                println!(
                    "{} [{}] -> {}:{} (last sync {})",
                    linked.identifier,
                    linked.kind,
                    linked.file_ref.provider,
                    linked.file_ref.path,
                    linked.file_ref.last_sync
                );
            }
        }
    }
    Ok(())
}

fn identifier(path: &Path) -> anyhow::Result<String> {
    let absolute = std::path::absolute(path)
        .with_context(|| format!("invalid path {}", path.display()))?;
    Ok(absolute.to_string_lossy().into_owned())
}

async fn read_local(path: &Path) -> anyhow::Result<Bytes> {
    let content = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(Bytes::from(content))
}

/// Local file a ref of `kind` is synced with.
fn local_path(identifier: &str, kind: RefKind) -> Option<PathBuf> {
    match kind {
        RefKind::File => Some(PathBuf::from(identifier)),
        RefKind::Archive => get_archive_file_path(identifier).map(PathBuf::from),
    }
}

/// Reads `paths` plus any linked archives. Unreadable files are reported and counted.
async fn collect_targets(
    refs: &RefStore,
    paths: &[PathBuf],
) -> anyhow::Result<(Vec<SyncTarget>, usize)> {
    let mut targets = Vec::with_capacity(paths.len());
    let mut failed = 0;
    for path in paths {
        let identifier = match identifier(path) {
            Ok(identifier) => identifier,
            Err(err) => {
                failed += 1;
                eprintln!("error {}: {err:#}", path.display());
                continue;
            }
        };
        for kind in RefKind::ALL {
            if kind == RefKind::Archive && refs.get_ref(kind, &identifier)?.is_none() {
                continue;
            }
            let Some(local) = local_path(&identifier, kind) else {
                continue;
            };
            match read_local(&local).await {
                Ok(content) => targets.push(SyncTarget::new(identifier.clone(), kind, content)),
                Err(err) => {
                    failed += 1;
                    eprintln!("error {}: {err:#}", local.display());
                }
            }
        }
    }
    Ok((targets, failed))
}

/// Writes pulled content and prints one line per file. Returns the number of failures.
async fn apply_reports(reports: Vec<SyncReport>) -> usize {
    let mut failed = 0;
    for report in reports {
        let label = match report.kind {
            RefKind::File => report.identifier.clone(),
            RefKind::Archive => format!("{} (archive)", report.identifier),
        };
        let outcome = match report.result {
            Ok(SyncResult::Pull { content, .. }) => {
                match local_path(&report.identifier, report.kind) {
                    Some(path) => tokio::fs::write(&path, &content)
                        .await
                        .with_context(|| format!("failed to write {}", path.display()))
                        .map(|()| "pull"),
                    None => Err(anyhow!("no local file for {label}")),
                }
            }
            Ok(result) => Ok(result.direction()),
            Err(err) => Err(err.into()),
        };
        match outcome {
            Ok(direction) => println!("{direction} {label}"),
            Err(err) => {
                failed += 1;
                eprintln!("error {label}: {err:#}");
            }
        }
    }
    failed
}

#[cfg(test)]
mod tests {
    use super::*;

    use cloudsync::ServiceError;
    use cloudsync_core::{CloudFile, CloudFileRef};
    use time::OffsetDateTime;

    fn parse(args: &[&str]) -> Command {
        Cli::try_parse_from(args).unwrap().command
    }

    #[test]
    fn parses_connect_webdav() {
        let command = parse(&[
            "cloudsync",
            "connect-webdav",
            "--url",
            "https://dav.example",
            "--username",
            "me",
            "--password",
            "secret",
        ]);
        assert_eq!(
            command,
            Command::ConnectWebdav {
                url: "https://dav.example".into(),
                username: "me".into(),
                password: "secret".into(),
            }
        );
    }

    #[test]
    fn parses_provider_names_case_insensitively() {
        assert_eq!(
            parse(&["cloudsync", "list", "dropbox"]),
            Command::List {
                provider: Provider::Dropbox,
                path: "/".into(),
            }
        );
        assert!(Cli::try_parse_from(["cloudsync", "list", "gdrive"]).is_err());
    }

    #[test]
    fn parses_link_with_download_flag() {
        assert_eq!(
            parse(&["cloudsync", "link", "todo.txt", "WebDAV", "/todo.txt", "--download"]),
            Command::Link {
                local: PathBuf::from("todo.txt"),
                provider: Provider::WebDav,
                remote: "/todo.txt".into(),
                download: true,
            }
        );
    }

    #[test]
    fn sync_without_files_means_all() {
        assert_eq!(
            parse(&["cloudsync", "sync"]),
            Command::Sync { files: Vec::new() }
        );
    }

    #[test]
    fn rejects_unknown_subcommand() {
        assert!(Cli::try_parse_from(["cloudsync", "--logout"]).is_err());
    }

    #[test]
    fn parses_unlink_flags() {
        assert_eq!(
            parse(&["cloudsync", "unlink", "todo.txt", "--delete-remote", "--archive"]),
            Command::Unlink {
                local: PathBuf::from("todo.txt"),
                delete_remote: true,
                archive: true,
            }
        );
        assert_eq!(
            parse(&["cloudsync", "link-archive", "todo.txt"]),
            Command::LinkArchive {
                local: PathBuf::from("todo.txt"),
                download: false,
            }
        );
    }

    #[test]
    fn archive_lives_next_to_local_file() {
        assert_eq!(
            local_path("/home/me/todo.txt", RefKind::Archive),
            Some(PathBuf::from("/home/me/done.txt"))
        );
        assert_eq!(
            local_path("/home/me/todo.txt", RefKind::File),
            Some(PathBuf::from("/home/me/todo.txt"))
        );
        assert_eq!(local_path("/home/me/.todo", RefKind::Archive), None);
    }

    #[tokio::test]
    async fn unreadable_files_are_counted_and_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("todo.txt");
        std::fs::write(&present, "buy milk").unwrap();
        let refs = RefStore::new(dir.path().join("refs.json"));

        let (targets, failed) =
            collect_targets(&refs, &[dir.path().join("missing.txt"), present.clone()])
                .await
                .unwrap();

        assert_eq!(failed, 1);
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].identifier, present.to_string_lossy());
        assert_eq!(&targets[0].content[..], b"buy milk");
    }

    #[tokio::test]
    async fn linked_archive_is_synced_with_its_file() {
        let dir = tempfile::tempdir().unwrap();
        let todo = dir.path().join("todo.txt");
        std::fs::write(&todo, "open").unwrap();
        std::fs::write(dir.path().join("done.txt"), "closed").unwrap();
        let refs = RefStore::new(dir.path().join("refs.json"));
        refs.set_ref(
            RefKind::Archive,
            &todo.to_string_lossy(),
            CloudFileRef {
                provider: Provider::WebDav,
                path: "/done.txt".into(),
                local_version: "abc".into(),
                last_sync: OffsetDateTime::UNIX_EPOCH,
            },
        )
        .unwrap();

        let (targets, failed) = collect_targets(&refs, &[todo]).await.unwrap();

        assert_eq!(failed, 0);
        let kinds: Vec<_> = targets.iter().map(|target| target.kind).collect();
        assert_eq!(kinds, [RefKind::File, RefKind::Archive]);
        assert_eq!(&targets[1].content[..], b"closed");
    }

    #[tokio::test]
    async fn failed_write_does_not_stop_later_files() {
        let dir = tempfile::tempdir().unwrap();
        let blocked = dir.path().join("missing-dir").join("todo.txt");
        let writable = dir.path().join("todo.txt");
        let pull = |identifier: &Path| SyncReport {
            identifier: identifier.to_string_lossy().into_owned(),
            kind: RefKind::File,
            result: Ok(SyncResult::Pull {
                file: CloudFile {
                    name: "todo.txt".into(),
                    path: "/todo.txt".into(),
                    last_modified: OffsetDateTime::UNIX_EPOCH,
                },
                content: Bytes::from_static(b"remote"),
            }),
        };

        let failed = apply_reports(vec![
            pull(&blocked),
            SyncReport {
                identifier: "/elsewhere.txt".into(),
                kind: RefKind::File,
                result: Err(ServiceError::Offline),
            },
            pull(&writable),
        ])
        .await;

        assert_eq!(failed, 2);
        assert_eq!(std::fs::read(&writable).unwrap(), b"remote");
    }
}
