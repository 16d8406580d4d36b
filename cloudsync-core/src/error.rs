use std::fmt;

use reqwest::StatusCode;
use thiserror::Error;

use crate::types::Provider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Unauthorized,
    NotFound,
    Conflict,
    Generic,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::Unauthorized => "Unauthorized",
            ErrorKind::NotFound => "Not Found",
            ErrorKind::Conflict => "Conflict",
            ErrorKind::Generic => "Generic",
        })
    }
}

/// Every failure a provider client or the storage facade can report.
///
/// Provider specific failures (HTTP statuses, Dropbox `error_summary` values,
/// transport errors) are translated into one of the four [`ErrorKind`]s at the
/// client boundary.
#[derive(Debug, Clone, Error)]
#[error("{kind}{}", describe_context(.provider, .path, .cause))]
pub struct CloudStorageError {
    kind: ErrorKind,
    provider: Option<Provider>,
    path: Option<String>,
    cause: Option<String>,
    retryable: bool,
}

impl CloudStorageError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            provider: None,
            path: None,
            cause: None,
            retryable: false,
        }
    }

    pub fn unauthorized() -> Self {
        Self::new(ErrorKind::Unauthorized)
    }

    pub fn not_found() -> Self {
        Self::new(ErrorKind::NotFound)
    }

    pub fn conflict() -> Self {
        Self::new(ErrorKind::Conflict)
    }

    pub fn generic(cause: impl Into<String>) -> Self {
        Self::new(ErrorKind::Generic).with_cause(cause)
    }

    /// Maps an unsuccessful HTTP status onto the taxonomy. `body` becomes the cause.
    pub fn from_status(status: StatusCode, body: impl Into<String>) -> Self {
        let kind = match status {
            StatusCode::UNAUTHORIZED => ErrorKind::Unauthorized,
            StatusCode::NOT_FOUND => ErrorKind::NotFound,
            StatusCode::CONFLICT => ErrorKind::Conflict,
            _ => ErrorKind::Generic,
        };
        let body = body.into();
        let cause = if body.trim().is_empty() {
            status.to_string()
        } else {
            body
        };
        let mut err = Self::new(kind).with_cause(cause);
        err.retryable = is_transient_status(status);
        err
    }

    pub fn with_provider(mut self, provider: Provider) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Fills in provider and path if the error does not carry them yet.
    pub(crate) fn in_context(mut self, provider: Provider, path: &str) -> Self {
        if self.provider.is_none() {
            self.provider = Some(provider);
        }
        if self.path.is_none() && !path.is_empty() {
            self.path = Some(path.to_string());
        }
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn provider(&self) -> Option<Provider> {
        self.provider
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn cause(&self) -> Option<&str> {
        self.cause.as_deref()
    }

    pub fn is_unauthorized(&self) -> bool {
        self.kind == ErrorKind::Unauthorized
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    pub fn is_conflict(&self) -> bool {
        self.kind == ErrorKind::Conflict
    }

    /// Transport failures and 408/429/5xx responses. Only generic errors qualify.
    pub fn is_retryable(&self) -> bool {
        self.kind == ErrorKind::Generic && self.retryable
    }
}

impl From<reqwest::Error> for CloudStorageError {
    fn from(err: reqwest::Error) -> Self {
        let retryable = err.is_timeout() || err.is_connect() || err.is_request();
        let mut out = Self::generic(format!("request failed: {err}"));
        out.retryable = retryable;
        out
    }
}

impl From<url::ParseError> for CloudStorageError {
    fn from(err: url::ParseError) -> Self {
        Self::generic(format!("invalid url: {err}"))
    }
}

impl From<serde_json::Error> for CloudStorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::generic(format!("invalid json: {err}"))
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS
        )
}

fn describe_context(
    provider: &Option<Provider>,
    path: &Option<String>,
    cause: &Option<String>,
) -> String {
    let mut out = String::new();
    if let Some(provider) = provider {
        out.push_str(&format!(" [{provider}]"));
    }
    if let Some(path) = path {
        out.push_str(&format!(" {path}"));
    }
    if let Some(cause) = cause {
        out.push_str(&format!(": {cause}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_http_statuses_onto_kinds() {
        assert_eq!(
            CloudStorageError::from_status(StatusCode::UNAUTHORIZED, "").kind(),
            ErrorKind::Unauthorized
        );
        assert_eq!(
            CloudStorageError::from_status(StatusCode::NOT_FOUND, "gone").kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            CloudStorageError::from_status(StatusCode::CONFLICT, "").kind(),
            ErrorKind::Conflict
        );
        let err = CloudStorageError::from_status(StatusCode::BAD_GATEWAY, "upstream");
        assert_eq!(err.kind(), ErrorKind::Generic);
        assert_eq!(err.cause(), Some("upstream"));
        assert!(err.is_retryable());
    }

    #[test]
    fn client_errors_are_not_retryable() {
        let err = CloudStorageError::from_status(StatusCode::BAD_REQUEST, "nope");
        assert!(!err.is_retryable());
        let err = CloudStorageError::from_status(StatusCode::SERVICE_UNAVAILABLE, "");
        assert_eq!(err.cause(), Some("503 Service Unavailable"));
    }

    #[test]
    fn display_includes_context() {
        let err = CloudStorageError::not_found()
            .with_provider(Provider::WebDav)
            .with_path("/todo.txt")
            .with_cause("missing");
        assert_eq!(err.to_string(), "Not Found [WebDAV] /todo.txt: missing");
        assert_eq!(CloudStorageError::conflict().to_string(), "Conflict");
    }

    #[test]
    fn in_context_keeps_existing_values() {
        let err = CloudStorageError::unauthorized()
            .with_path("/a.txt")
            .in_context(Provider::Dropbox, "/b.txt");
        assert_eq!(err.provider(), Some(Provider::Dropbox));
        assert_eq!(err.path(), Some("/a.txt"));
    }
}
