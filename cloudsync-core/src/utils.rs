use sha1::{Digest, Sha1};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

pub const DEFAULT_FILE_NAME: &str = "todo.txt";
pub const ARCHIVE_FILE_NAME: &str = "done.txt";

/// SHA-1 hex digest of `content`. The input is only borrowed.
pub fn create_checksum(content: impl AsRef<[u8]>) -> String {
    let digest = Sha1::digest(content.as_ref());
    format!("{digest:x}")
}

/// Everything after the last `/` or `\`.
pub fn get_filename(path: &str) -> &str {
    match path.rfind(['/', '\\']) {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Parent directory of `path`, always without a trailing slash. Root stays root.
pub fn get_dirname(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let trimmed = unified.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some((parent, _)) if !parent.is_empty() => parent.to_string(),
        _ => "/".to_string(),
    }
}

/// Archive companion of `path`, in the same directory.
///
/// `todo.txt` pairs with `done.txt`, any other `name.ext` with `name_done.txt`.
/// Hidden files have no archive.
pub fn get_archive_file_path(path: &str) -> Option<String> {
    let filename = get_filename(path);
    let dir = &path[..path.len() - filename.len()];
    if filename == DEFAULT_FILE_NAME {
        return Some(format!("{dir}{ARCHIVE_FILE_NAME}"));
    }
    let stem = match filename.rfind('.') {
        Some(idx) if idx > 0 => &filename[..idx],
        _ => filename,
    };
    if stem.is_empty() || stem.starts_with('.') {
        return None;
    }
    Some(format!("{dir}{stem}_done.txt"))
}

/// Leading slash added, a single trailing slash removed (root excepted).
pub fn normalise_path(path: &str) -> String {
    let mut out = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    if out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    out
}

/// Percent-encodes each segment of a slash separated path.
pub fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

pub fn join_url(base: &str, path: &str) -> String {
    let base = base.trim().trim_end_matches('/');
    let path = path.trim().trim_start_matches('/');
    format!("{base}/{path}")
}

/// Decodes the entities WebDAV servers leave in `href`s and display names.
///
/// Single pass, so `&amp;lt;` becomes `&lt;` and not `<`. Unknown or
/// malformed references are kept as they are.
pub fn decode_html_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let candidate = &rest[start..];
        match candidate.find(';').and_then(|end| {
            decode_entity(&candidate[1..end]).map(|decoded| (decoded, end))
        }) {
            Some((decoded, end)) => {
                out.push(decoded);
                rest = &candidate[end + 1..];
            }
            None => {
                out.push('&');
                rest = &candidate[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        _ => {
            let numeric = name.strip_prefix('#')?;
            let code = match numeric.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => numeric.parse::<u32>().ok()?,
            };
            char::from_u32(code)
        }
    }
}

/// RFC 1123 dates as sent in WebDAV `getlastmodified`.
pub fn parse_http_date(value: &str) -> Option<OffsetDateTime> {
    httpdate::parse_http_date(value.trim())
        .ok()
        .map(OffsetDateTime::from)
}

/// RFC 3339 dates as sent by Dropbox in `server_modified`.
pub fn parse_rfc3339(value: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(value, &Rfc3339).ok()
}
