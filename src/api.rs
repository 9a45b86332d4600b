// API module: the small blocking HTTP layer the importer talks through.
// It knows nothing about retries or leads; it sends one request and
// hands back the status and body. Everything above it goes through the
// `Transport` trait so tests can script the server.

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("max retries ({attempts}) exceeded, last status was HTTP {last_status}")]
    RetriesExhausted { attempts: u32, last_status: u16 },

    #[error("invalid URL {url}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("unexpected response body: {0}")]
    Decode(String),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// One HTTP call, fully described. Cloned headers are cheap enough for
/// the handful of requests a run makes.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: json_headers(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            headers: json_headers(),
            body: Some(body),
        }
    }

    /// Add (or replace) headers, typically the resolved credentials.
    pub fn with_headers(mut self, headers: &HeaderMap) -> Self {
        for (name, value) in headers {
            self.headers.insert(name.clone(), value.clone());
        }
        self
    }
}

/// Response body: parsed JSON when the server sent JSON, the raw text
/// otherwise (error pages, proxies, empty bodies).
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
}

impl ResponseBody {
    pub fn parse(text: String) -> Self {
        match serde_json::from_str(&text) {
            Ok(value) => ResponseBody::Json(value),
            Err(_) => ResponseBody::Text(text),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResponseBody::Json(value) => Some(value),
            ResponseBody::Text(_) => None,
        }
    }
}

impl fmt::Display for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Json(value) => write!(f, "{}", value),
            ResponseBody::Text(text) => f.write_str(text),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: ResponseBody,
}

impl ApiResponse {
    pub fn new(status: u16, body: ResponseBody) -> Self {
        Self { status, body }
    }

    pub fn json_body(status: u16, body: Value) -> Self {
        Self::new(status, ResponseBody::Json(body))
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode the body into `T`. Plain-text bodies are a decode error.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        match &self.body {
            ResponseBody::Json(value) => serde_json::from_value(value.clone())
                .map_err(|e| ApiError::Decode(e.to_string())),
            ResponseBody::Text(text) => Err(ApiError::Decode(format!(
                "expected JSON, got text: {}",
                text
            ))),
        }
    }
}

/// Sends a single request. Implementations never retry.
pub trait Transport {
    fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        (**self).send(request)
    }
}

/// `Transport` backed by a reqwest blocking client.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Build the client. Without a timeout, reqwest's own default applies.
    pub fn new(timeout: Option<Duration>) -> Result<Self, ApiError> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| ApiError::Transport {
            url: String::new(),
            message: format!("failed to build HTTP client: {}", e),
        })?;
        Ok(HttpTransport { client })
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let mut req = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            req = req.json(body);
        }

        let res = req.send().map_err(|e| ApiError::Transport {
            url: request.url.clone(),
            message: e.to_string(),
        })?;
        let status = res.status().as_u16();
        let txt = res.text().unwrap_or_else(|_| "".into());
        Ok(ApiResponse::new(status, ResponseBody::parse(txt)))
    }
}

/// Headers every JSON request carries.
pub fn json_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers
}

/// Join the API root and a path, tolerating slashes on either side.
pub fn endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Like `endpoint`, with URL-encoded query parameters appended.
pub fn endpoint_with_query(
    base_url: &str,
    path: &str,
    params: &[(&str, &str)],
) -> Result<String, ApiError> {
    let raw = endpoint(base_url, path);
    Url::parse_with_params(&raw, params)
        .map(|url| url.to_string())
        .map_err(|e| ApiError::InvalidUrl {
            url: raw,
            message: e.to_string(),
        })
}
