use quick_xml::Reader;
use quick_xml::events::Event;

use crate::error::CloudStorageError;

/// One `<response>` of a PROPFIND multi-status body, still in wire form.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct DavEntry {
    pub href: String,
    pub last_modified: Option<String>,
    pub is_collection: bool,
}

#[derive(Debug, Clone, Copy)]
enum Field {
    Href,
    LastModified,
}

/// Namespace prefixes are ignored, servers disagree on them (`d:`, `D:`, `lp1:`).
pub(crate) fn parse_multistatus(xml: &str) -> Result<Vec<DavEntry>, CloudStorageError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut saw_root = false;
    let mut current: Option<DavEntry> = None;
    let mut field: Option<Field> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"multistatus" => saw_root = true,
                b"response" => current = Some(DavEntry::default()),
                b"href" => field = Some(Field::Href),
                b"getlastmodified" => field = Some(Field::LastModified),
                b"collection" => mark_collection(&mut current),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"multistatus" => saw_root = true,
                b"collection" => mark_collection(&mut current),
                _ => {}
            },
            Ok(Event::Text(text)) => {
                append_text(&mut current, field, &String::from_utf8_lossy(&text))
            }
            Ok(Event::CData(text)) => {
                append_text(&mut current, field, &String::from_utf8_lossy(&text))
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"response" => {
                    if let Some(entry) = current.take()
                        && !entry.href.is_empty()
                    {
                        entries.push(entry);
                    }
                }
                b"href" | b"getlastmodified" => field = None,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => {
                return Err(CloudStorageError::generic(format!(
                    "Failed parsing directory contents: {err}"
                )));
            }
        }
    }

    if !saw_root {
        return Err(CloudStorageError::generic(
            "Invalid response: No root multistatus found",
        ));
    }
    Ok(entries)
}

fn mark_collection(current: &mut Option<DavEntry>) {
    if let Some(entry) = current.as_mut() {
        entry.is_collection = true;
    }
}

fn append_text(current: &mut Option<DavEntry>, field: Option<Field>, text: &str) {
    let (Some(entry), Some(field)) = (current.as_mut(), field) else {
        return;
    };
    match field {
        Field::Href => entry.href.push_str(text),
        Field::LastModified => entry
            .last_modified
            .get_or_insert_with(String::new)
            .push_str(text),
    }
}
