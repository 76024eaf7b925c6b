//! HttpChatRemote -- concrete [`ChatRemote`] over the chatsync REST API.
//!
//! Talks to `{base_url}/api/v1/chats` with `Authorization: Bearer <key>` and
//! unwraps the `{data, meta, errors}` envelope. The API key is wrapped in
//! [`SecretString`] and is only exposed when building request headers.

use std::time::Duration;

use chatsync_core::session::remote::ChatRemote;
use chatsync_types::chat::{ChatSnapshot, ChatSummary, SyncChatPayload, SyncChatResult};
use chatsync_types::config::ClientConfig;
use chatsync_types::error::RemoteError;
use reqwest::{RequestBuilder, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;

const API_PREFIX: [&str; 3] = ["api", "v1", "chats"];
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Remote chat API over HTTP.
///
/// Without both a base URL and an API key the remote reports itself as not
/// authenticated and every call fails with [`RemoteError::NotAuthenticated`].
pub struct HttpChatRemote {
    client: reqwest::Client,
    base_url: Option<Url>,
    api_key: Option<SecretString>,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<EnvelopeError>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

impl HttpChatRemote {
    pub fn new(base_url: Option<&str>, api_key: Option<SecretString>) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RemoteError::Transport(format!("failed to create HTTP client: {e}")))?;

        let base_url = base_url
            .filter(|url| !url.trim().is_empty())
            .map(|url| {
                Url::parse(url.trim())
                    .map_err(|e| RemoteError::Transport(format!("invalid remote url '{url}': {e}")))
            })
            .transpose()?;

        let api_key = api_key.filter(|key| !key.expose_secret().is_empty());

        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, RemoteError> {
        Self::new(
            config.remote_url.as_deref(),
            config.api_key.clone().map(SecretString::from),
        )
    }

    /// `{base_url}/api/v1/chats/{segments...}` with each segment percent-encoded.
    fn url(&self, segments: &[&str]) -> Result<Url, RemoteError> {
        let mut url = self.base_url.clone().ok_or(RemoteError::NotAuthenticated)?;
        url.path_segments_mut()
            .map_err(|()| RemoteError::Transport("remote url cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(API_PREFIX)
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder, RemoteError> {
        let key = self.api_key.as_ref().ok_or(RemoteError::NotAuthenticated)?;
        Ok(request.bearer_auth(key.expose_secret()))
    }

    /// Send a request and unwrap the envelope's `data`.
    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<Option<T>, RemoteError> {
        let response = self
            .authorize(request)?
            .send()
            .await
            .map_err(|e| RemoteError::Transport(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RemoteError::Transport(format!("failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(status_error(status, &body));
        }

        let envelope: Envelope<T> = serde_json::from_str(&body)
            .map_err(|e| RemoteError::Decode(format!("failed to parse response: {e}")))?;
        Ok(envelope.data)
    }
}

fn status_error(status: StatusCode, body: &str) -> RemoteError {
    let message = serde_json::from_str::<Envelope<serde_json::Value>>(body)
        .ok()
        .and_then(|envelope| envelope.errors.into_iter().next())
        .map(|error| format!("{}: {}", error.code, error.message))
        .unwrap_or_else(|| body.chars().take(200).collect());

    RemoteError::Status {
        status: status.as_u16(),
        message,
    }
}

impl ChatRemote for HttpChatRemote {
    fn is_authenticated(&self) -> bool {
        self.base_url.is_some() && self.api_key.is_some()
    }

    async fn list_chats(&self, limit: i64) -> Result<Vec<ChatSummary>, RemoteError> {
        let url = self.url(&[])?;
        let request = self.client.get(url).query(&[("limit", limit)]);
        Ok(self.send(request).await?.unwrap_or_default())
    }

    async fn get_snapshot(
        &self,
        chat_id: &str,
        limit: i64,
    ) -> Result<Option<ChatSnapshot>, RemoteError> {
        let url = self.url(&[chat_id, "snapshot"])?;
        let request = self.client.get(url).query(&[("limit", limit)]);
        match self.send(request).await {
            Err(RemoteError::Status { status: 404, .. }) => Ok(None),
            other => other,
        }
    }

    async fn sync_chat(&self, payload: &SyncChatPayload) -> Result<SyncChatResult, RemoteError> {
        let url = self.url(&["sync"])?;
        let request = self.client.post(url).json(payload);
        self.send(request)
            .await?
            .ok_or_else(|| RemoteError::Decode("sync response carried no data".to_string()))
    }
}
