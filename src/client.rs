use crate::error::{ClientError, Result};
use crate::protocol::{RunRequest, RunResponse};
use crate::stream::{self, StreamCallbacks, StreamHandle, UpdateStream};
use futures::StreamExt;
use futures::stream as futures_stream;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::{Client as HttpClient, RequestBuilder, Response};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tokio::task::JoinHandle;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:7860";

const API_KEY_HEADER: &str = "x-api-key";

/// How the API key is presented to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthHeader {
    /// `Authorization: Bearer <key>`
    #[default]
    Bearer,
    /// `x-api-key: <key>`
    ApiKey,
}

impl FromStr for AuthHeader {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value {
            "bearer" => Ok(AuthHeader::Bearer),
            "x-api-key" => Ok(AuthHeader::ApiKey),
            other => Err(format!(
                "unknown auth header '{}', expected bearer or x-api-key",
                other
            )),
        }
    }
}

impl fmt::Display for AuthHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthHeader::Bearer => f.write_str("bearer"),
            AuthHeader::ApiKey => f.write_str(API_KEY_HEADER),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub auth_header: AuthHeader,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            auth_header: AuthHeader::default(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_auth_header(mut self, auth_header: AuthHeader) -> Self {
        self.auth_header = auth_header;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

/// Result of starting a flow: the initial response and, when one was announced
/// and requested, the live stream of updates.
#[derive(Debug)]
pub struct FlowRun {
    pub response: RunResponse,
    pub stream: Option<StreamHandle>,
}

/// Client for the flow run API. Holds only immutable configuration, so clones are
/// cheap and every call is independent.
#[derive(Debug, Clone)]
pub struct LangflowClient {
    base_url: String,
    api_key: Option<String>,
    auth_header: AuthHeader,
    http: HttpClient,
}

impl LangflowClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            base_url: normalize_base_url(&config.base_url),
            api_key: config.api_key.filter(|key| !key.is_empty()),
            auth_header: config.auth_header,
            http: HttpClient::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST `body` as JSON to `endpoint` (a path appended to the base URL).
    ///
    /// The body of the response is decoded before the status is checked, so a
    /// failing status surfaces as [`ClientError::Request`] carrying the server's
    /// error payload.
    pub async fn post<B>(
        &self,
        endpoint: &str,
        body: &B,
        headers: Option<HeaderMap>,
    ) -> Result<Value>
    where
        B: Serialize + ?Sized,
    {
        let url = format!("{}{}", self.base_url, endpoint);
        self.send_post(&url, body, headers)
            .await
            .inspect_err(|err| tracing::error!(%url, error = %err, "error during POST request"))
    }

    async fn send_post<B>(&self, url: &str, body: &B, headers: Option<HeaderMap>) -> Result<Value>
    where
        B: Serialize + ?Sized,
    {
        let payload = serde_json::to_vec(body)?;
        let headers = headers.unwrap_or_else(|| {
            let mut headers = HeaderMap::new();
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            headers
        });

        tracing::debug!(%url, "POST");
        let response = self
            .authorize(self.http.post(url).headers(headers))
            .body(payload)
            .send()
            .await?;

        decode_response(response).await
    }

    /// Start `flow_id` with a single POST to `/api/v1/run/{flow_id}?stream={stream}`.
    pub async fn initiate_session(
        &self,
        flow_id: &str,
        request: &RunRequest,
    ) -> Result<RunResponse> {
        let endpoint = format!("/api/v1/run/{}?stream={}", flow_id, request.stream);
        let body = self.post(&endpoint, request, None).await?;
        Ok(RunResponse::new(body))
    }

    /// Upload a local file for `flow_id` and return the path the server stored it
    /// under, ready to be set as a component's `path` tweak.
    pub async fn upload_file(&self, flow_id: &str, path: impl AsRef<Path>) -> Result<String> {
        let path = path.as_ref();
        let url = format!("{}/api/v1/upload/{}", self.base_url, flow_id);
        self.send_upload(&url, path).await.inspect_err(|err| {
            tracing::error!(%url, file = %path.display(), error = %err, "error uploading file")
        })
    }

    async fn send_upload(&self, url: &str, path: &Path) -> Result<String> {
        let contents = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let form = Form::new().part("file", Part::bytes(contents).file_name(file_name));

        tracing::debug!(%url, "POST multipart");
        let response = self
            .authorize(self.http.post(url))
            .multipart(form)
            .send()
            .await?;

        let body = decode_response(response).await?;
        match body.get("file_path").and_then(Value::as_str) {
            Some(file_path) if !file_path.is_empty() => Ok(file_path.to_string()),
            _ => Err(ClientError::SchemaMismatch {
                path: "file_path",
                expected: "non-empty string",
            }),
        }
    }

    /// Lazy event stream for `stream_url`. Nothing is sent until the stream is first
    /// polled; a failure to connect, or a non-success status, yields a single
    /// `Failed` update.
    ///
    /// The API key is only attached when `stream_url` points below the base URL.
    pub fn open_stream(&self, stream_url: &str) -> UpdateStream {
        let request = self.http.get(stream_url);
        let request = if self.is_own_url(stream_url) {
            self.authorize(request)
        } else {
            tracing::debug!(url = %stream_url, "stream on foreign origin, sending no credentials");
            request
        };
        let url = stream_url.to_string();

        futures_stream::once(async move {
            tracing::debug!(%url, "opening stream");
            connect(request).await
        })
        .flat_map(|opened| match opened {
            Ok(response) => {
                stream::decode_updates(Box::pin(response.bytes_stream())).left_stream()
            }
            Err(err) => futures_stream::iter([stream::failed(err)]).right_stream(),
        })
        .boxed()
    }

    /// Consume `stream_url` on a background task.
    pub fn spawn_stream(&self, stream_url: &str) -> StreamHandle {
        StreamHandle::spawn(self.open_stream(stream_url))
    }

    /// Consume `stream_url` on a background task, reporting through callbacks.
    pub fn handle_stream(&self, stream_url: &str, callbacks: StreamCallbacks) -> JoinHandle<()> {
        tokio::spawn(callbacks.drive(self.open_stream(stream_url)))
    }

    /// Start a flow and, if streaming was requested and the response announces a
    /// stream URL, start consuming it in the background.
    ///
    /// Returns as soon as the initial response is in; the stream's outcome is only
    /// observable through the returned handle. A stream URL of the wrong type is
    /// reported as a handle whose only update is `Failed`.
    pub async fn run_flow(&self, flow_id: &str, request: &RunRequest) -> Result<FlowRun> {
        let response = self.initiate_session(flow_id, request).await?;
        let stream = match self.announced_stream(&response, request) {
            Ok(url) => url.map(|url| self.spawn_stream(&url)),
            Err(err) => Some(StreamHandle::spawn(
                futures_stream::iter([stream::failed(err)]).boxed(),
            )),
        };

        Ok(FlowRun { response, stream })
    }

    /// Callback form of [`run_flow`](Self::run_flow). A failure to start the flow
    /// is handed to `on_error` and `None` is returned.
    pub async fn run_flow_with_callbacks(
        &self,
        flow_id: &str,
        request: &RunRequest,
        callbacks: StreamCallbacks,
    ) -> Option<RunResponse> {
        let response = match self.initiate_session(flow_id, request).await {
            Ok(response) => response,
            Err(err) => {
                callbacks.fail(err);
                return None;
            }
        };

        match self.announced_stream(&response, request) {
            Ok(Some(url)) => {
                // Detached; completion is reported through the callbacks.
                drop(self.handle_stream(&url, callbacks));
            }
            Ok(None) => {}
            Err(err) => {
                tracing::error!(error = %err, "stream url unusable");
                callbacks.fail(err);
            }
        }

        Some(response)
    }

    /// Absolute URLs pass through; paths are appended to the base URL.
    pub fn resolve_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }

        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn announced_stream(
        &self,
        response: &RunResponse,
        request: &RunRequest,
    ) -> Result<Option<String>> {
        if !request.stream {
            return Ok(None);
        }

        Ok(response.stream_url()?.map(|path| {
            let url = self.resolve_url(path);
            tracing::info!(%url, "streaming from");
            url
        }))
    }

    /// True when `url` is the base URL itself or lies beneath it.
    fn is_own_url(&self, url: &str) -> bool {
        url.strip_prefix(&self.base_url)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with(['/', '?']))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let Some(key) = &self.api_key else {
            return request;
        };

        match self.auth_header {
            AuthHeader::Bearer => request.header(AUTHORIZATION, format!("Bearer {}", key)),
            AuthHeader::ApiKey => {
                request.header(HeaderName::from_static(API_KEY_HEADER), key.as_str())
            }
        }
    }
}

async fn connect(request: RequestBuilder) -> Result<Response> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        let body = serde_json::from_str(&text).unwrap_or_else(|_| error_body(text));
        return Err(ClientError::request(status, body));
    }

    Ok(response)
}

/// Decode a JSON body before checking the status, so failures carry the server's
/// error payload.
async fn decode_response(response: Response) -> Result<Value> {
    let status = response.status();
    let text = response.text().await?;
    let body = match serde_json::from_str::<Value>(&text) {
        Ok(body) => body,
        Err(err) if status.is_success() => return Err(err.into()),
        Err(_) => error_body(text),
    };

    if !status.is_success() {
        return Err(ClientError::request(status, body));
    }

    Ok(body)
}

/// Non-JSON error payloads are kept as text; an empty one becomes `null`.
fn error_body(text: String) -> Value {
    if text.trim().is_empty() {
        Value::Null
    } else {
        Value::String(text)
    }
}

fn normalize_base_url(value: &str) -> String {
    value.trim_end_matches('/').to_string()
}
