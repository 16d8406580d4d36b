//! WebDAV provider: PROPFIND listings, GET/PUT/DELETE with basic auth.

mod client;
mod multistatus;

pub use client::{WebDavClient, WebDavConfig};
