//! Dropbox provider over the HTTP API v2, authenticated with a refresh token.

mod auth;
mod client;

pub use client::{DEFAULT_API_URL, DEFAULT_CONTENT_URL, DropboxClient, DropboxConfig};
