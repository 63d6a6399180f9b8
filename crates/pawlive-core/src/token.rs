use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::LiveError;

/// Credentials for joining a media room.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamCredentials {
    pub token: String,
    #[serde(alias = "serverUrl")]
    pub url: String,
    pub room_name: String,
}

/// Metadata sent when starting a broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamMetadata {
    #[serde(skip)]
    pub stream_id: String,
    pub title: String,
    pub tags: Vec<String>,
}

impl StreamMetadata {
    /// Metadata titled after the stream id, with no tags.
    pub fn new(stream_id: impl Into<String>) -> Self {
        let stream_id = stream_id.into();
        Self {
            title: stream_id.clone(),
            stream_id,
            tags: Vec::new(),
        }
    }
}

/// Exchanges stream identifiers for short-lived media credentials.
#[async_trait]
pub trait TokenBroker: Send + Sync {
    async fn request_publish_token(
        &self,
        metadata: &StreamMetadata,
    ) -> Result<StreamCredentials, LiveError>;

    async fn request_view_token(&self, stream_id: &str) -> Result<StreamCredentials, LiveError>;

    /// Tell the backend a broadcast ended. Callers treat failure as best-effort.
    async fn request_stream_stop(&self, stream_id: &str) -> Result<(), LiveError>;
}

/// The backend either answers with the bare payload or wraps it in
/// `{ "success": true, "data": ... }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ApiResponse<T> {
    Wrapped { data: T },
    Bare(T),
}

impl<T> ApiResponse<T> {
    fn into_inner(self) -> T {
        match self {
            ApiResponse::Wrapped { data } => data,
            ApiResponse::Bare(inner) => inner,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiFailure {
    message: Option<String>,
}

/// [`TokenBroker`] backed by the live REST endpoints.
pub struct HttpTokenBroker {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpTokenBroker {
    /// `base_url` is the API root, e.g. `https://api.example.com/api`.
    pub fn new(
        base_url: &str,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, LiveError> {
        let parsed = url::Url::parse(base_url)
            .map_err(|e| LiveError::Config(format!("invalid api base url '{base_url}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(LiveError::Config(format!(
                "api base url must be http(s), got '{base_url}'"
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LiveError::Config(format!("http client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn watch_endpoint(&self, stream_id: &str) -> String {
        self.endpoint(&format!("/live/{}/watch", urlencoding::encode(stream_id)))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, LiveError> {
        let resp = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| LiveError::TokenRequest(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let detail = resp
            .json::<ApiFailure>()
            .await
            .ok()
            .and_then(|f| f.message)
            .map(|m| format!(": {m}"))
            .unwrap_or_default();
        Err(LiveError::TokenRequest(format!("backend returned status {status}{detail}")))
    }

    async fn credentials(&self, request: reqwest::RequestBuilder) -> Result<StreamCredentials, LiveError> {
        let body = self
            .send(request)
            .await?
            .text()
            .await
            .map_err(|e| LiveError::TokenRequest(e.to_string()))?;
        parse_credentials(&body)
    }
}

pub(crate) fn parse_credentials(body: &str) -> Result<StreamCredentials, LiveError> {
    let mut credentials = serde_json::from_str::<ApiResponse<StreamCredentials>>(body)
        .map_err(|e| LiveError::TokenRequest(format!("invalid credentials response: {e}")))?
        .into_inner();
    credentials.url = to_websocket_url(&credentials.url);
    Ok(credentials)
}

/// Media servers are reached over WebSocket; the backend may hand out http(s) URLs.
fn to_websocket_url(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        url.to_string()
    }
}

#[async_trait]
impl TokenBroker for HttpTokenBroker {
    async fn request_publish_token(
        &self,
        metadata: &StreamMetadata,
    ) -> Result<StreamCredentials, LiveError> {
        tracing::info!(stream = %metadata.stream_id, "requesting publish token");
        let request = self.client.post(self.endpoint("/live/start")).json(metadata);
        self.credentials(request).await
    }

    async fn request_view_token(&self, stream_id: &str) -> Result<StreamCredentials, LiveError> {
        tracing::info!(stream = %stream_id, "requesting view token");
        let request = self.client.get(self.watch_endpoint(stream_id));
        self.credentials(request).await
    }

    async fn request_stream_stop(&self, stream_id: &str) -> Result<(), LiveError> {
        tracing::info!(stream = %stream_id, "notifying backend that stream stopped");
        let request = self
            .client
            .post(self.endpoint("/live/stop"))
            .json(&serde_json::json!({ "streamId": stream_id }));
        self.send(request).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker(base: &str) -> HttpTokenBroker {
        HttpTokenBroker::new(base, Some("jwt".into()), Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn parses_bare_credentials() {
        let creds = parse_credentials(r#"{"token":"t","url":"wss://media.example.com","roomName":"r"}"#)
            .unwrap();
        assert_eq!(
            creds,
            StreamCredentials {
                token: "t".into(),
                url: "wss://media.example.com".into(),
                room_name: "r".into(),
            }
        );
    }

    #[test]
    fn parses_wrapped_credentials_with_server_url() {
        let body = r#"{"success":true,"data":{"token":"t","serverUrl":"https://media.example.com","roomName":"live_1"}}"#;
        let creds = parse_credentials(body).unwrap();
        assert_eq!(creds.url, "wss://media.example.com");
        assert_eq!(creds.room_name, "live_1");
    }

    #[test]
    fn rejects_incomplete_credentials() {
        let err = parse_credentials(r#"{"success":true,"data":{"token":"t"}}"#).unwrap_err();
        assert!(matches!(err, LiveError::TokenRequest(_)));
    }

    #[test]
    fn http_media_url_becomes_ws() {
        assert_eq!(to_websocket_url("http://localhost:7880"), "ws://localhost:7880");
        assert_eq!(to_websocket_url("wss://already"), "wss://already");
    }

    #[test]
    fn endpoints_are_built_from_base() {
        let b = broker("https://api.example.com/api/");
        assert_eq!(b.endpoint("/live/start"), "https://api.example.com/api/live/start");
        assert_eq!(
            b.watch_endpoint("abc 1"),
            "https://api.example.com/api/live/abc%201/watch"
        );
    }

    #[test]
    fn invalid_base_url_is_a_config_error() {
        let err = HttpTokenBroker::new("ftp://x", None, Duration::from_secs(1))
            .err()
            .unwrap();
        assert!(matches!(err, LiveError::Config(_)));
        assert!(HttpTokenBroker::new("not a url", None, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn metadata_serializes_title_and_tags_only() {
        let mut metadata = StreamMetadata::new("s1");
        metadata.tags = vec!["dogs".into()];
        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(json, serde_json::json!({"title": "s1", "tags": ["dogs"]}));
    }

    #[tokio::test]
    async fn unreachable_backend_maps_to_token_error() {
        let b = broker("http://127.0.0.1:1/api");
        let err = b.request_view_token("s1").await.unwrap_err();
        assert!(matches!(err, LiveError::TokenRequest(_)));
    }
}
