use reqwest::Client as HttpClient;
use serde::Deserialize;
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;

use crate::error::CloudStorageError;

const REFRESH_SKEW: Duration = Duration::seconds(60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: Option<OffsetDateTime>,
}

impl AccessToken {
    fn is_fresh(&self, now: OffsetDateTime) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at > now + REFRESH_SKEW,
            None => true,
        }
    }
}

/// Trades the long-lived refresh token for short-lived access tokens.
pub(crate) struct TokenProvider {
    http: HttpClient,
    token_url: String,
    client_id: String,
    refresh_token: String,
    current: Mutex<Option<AccessToken>>,
}

impl TokenProvider {
    pub(crate) fn new(
        http: HttpClient,
        token_url: String,
        client_id: String,
        refresh_token: String,
    ) -> Self {
        Self {
            http,
            token_url,
            client_id,
            refresh_token,
            current: Mutex::new(None),
        }
    }

    pub(crate) async fn valid_access_token(&self) -> Result<String, CloudStorageError> {
        let mut current = self.current.lock().await;
        if let Some(token) = current.as_ref()
            && token.is_fresh(OffsetDateTime::now_utc())
        {
            return Ok(token.value.clone());
        }
        let token = self.request_token().await?;
        let value = token.value.clone();
        *current = Some(token);
        Ok(value)
    }

    /// Drops the cached token (the API rejected it) and fetches a new one.
    pub(crate) async fn refresh_now(&self) -> Result<String, CloudStorageError> {
        let mut current = self.current.lock().await;
        *current = None;
        let token = self.request_token().await?;
        let value = token.value.clone();
        *current = Some(token);
        Ok(value)
    }

    async fn request_token(&self) -> Result<AccessToken, CloudStorageError> {
        tracing::debug!("refreshing dropbox access token");
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", self.refresh_token.as_str()),
            ("client_id", self.client_id.as_str()),
        ];
        let response = self.http.post(&self.token_url).form(&form).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%status, "dropbox token refresh rejected");
            let mut err = CloudStorageError::from_status(status, body);
            if !err.is_retryable() {
                err = CloudStorageError::unauthorized().with_cause(err.cause().unwrap_or_default());
            }
            return Err(err);
        }
        let token: TokenResponse = response.json().await?;
        let expires_at = token
            .expires_in
            .map(|secs| OffsetDateTime::now_utc() + Duration::seconds(secs));
        Ok(AccessToken {
            value: token.access_token,
            expires_at,
        })
    }
}
