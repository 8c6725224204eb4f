//! HTTP plumbing: the backend contract and the reqwest implementation.
//!
//! The core never talks to `reqwest` directly. Requests are described by
//! [`ApiRequest`] values and handed to an [`HttpBackend`], which returns the
//! raw status and parsed JSON body. [`ApiClient`] classifies non-2xx
//! statuses into [`ApiError`] kinds. Authentication is a per-request
//! decoration - a request either carries a token or it does not; there is no
//! global default header to mutate.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::{ApiError, ApiResult};

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// HTTP verbs used by the platform API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

/// One field of a multipart form body.
#[derive(Debug, Clone, PartialEq)]
pub struct MultipartField {
    pub name: String,
    pub value: MultipartValue,
}

/// The value carried by a multipart field.
#[derive(Debug, Clone, PartialEq)]
pub enum MultipartValue {
    Text(String),
    File {
        filename: String,
        bytes: Vec<u8>,
        content_type: String,
    },
}

impl MultipartField {
    /// A plain text field.
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: MultipartValue::Text(value.into()),
        }
    }

    /// A file field.
    pub fn file(
        name: impl Into<String>,
        filename: impl Into<String>,
        bytes: Vec<u8>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            value: MultipartValue::File {
                filename: filename.into(),
                bytes,
                content_type: content_type.into(),
            },
        }
    }
}

/// The request body.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(Value),
    Multipart(Vec<MultipartField>),
}

/// A fully described API request.
///
/// `path` is relative to the backend's base URL (e.g. `accounts/login/`).
/// When `token` is present the backend sends `Authorization: Token <token>`.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub token: Option<String>,
    pub body: RequestBody,
}

impl ApiRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            token: None,
            body: RequestBody::Empty,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Patch, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, path)
    }

    /// Append a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Attach an authentication token, if one is available.
    pub fn token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    /// Set a JSON body.
    pub fn json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    /// Set a multipart form body.
    pub fn multipart(mut self, fields: Vec<MultipartField>) -> Self {
        self.body = RequestBody::Multipart(fields);
        self
    }
}

/// Status and parsed body of a completed HTTP exchange.
///
/// `body` is `Value::Null` when the response had no body (e.g. 204).
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: Value,
}

// ---------------------------------------------------------------------------
// Backend contract
// ---------------------------------------------------------------------------

/// The transport seam.
///
/// Implementations only fail for transport-level problems; any response with
/// a status code - success or not - is returned as a [`RawResponse`] for the
/// [`ApiClient`] to classify.
#[async_trait]
pub trait HttpBackend: Send + Sync {
    async fn send(&self, req: ApiRequest) -> ApiResult<RawResponse>;
}

// ---------------------------------------------------------------------------
// Reqwest implementation
// ---------------------------------------------------------------------------

/// Production [`HttpBackend`] over `reqwest`.
pub struct ReqwestBackend {
    base_url: String,
    client: reqwest::Client,
}

impl ReqwestBackend {
    /// Create a backend rooted at `base_url` (e.g. `http://host:8000/api`).
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("shelftalk/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn build_multipart(fields: Vec<MultipartField>) -> ApiResult<reqwest::multipart::Form> {
        let mut form = reqwest::multipart::Form::new();
        for field in fields {
            form = match field.value {
                MultipartValue::Text(text) => form.text(field.name, text),
                MultipartValue::File {
                    filename,
                    bytes,
                    content_type,
                } => {
                    let part = reqwest::multipart::Part::bytes(bytes)
                        .file_name(filename)
                        .mime_str(&content_type)
                        .map_err(|e| {
                            ApiError::InvalidInput(format!("bad content type: {e}"))
                        })?;
                    form.part(field.name, part)
                }
            };
        }
        Ok(form)
    }
}

#[async_trait]
impl HttpBackend for ReqwestBackend {
    async fn send(&self, req: ApiRequest) -> ApiResult<RawResponse> {
        let url = self.url_for(&req.path);
        debug!(method = req.method.as_str(), url = %url, "sending request");

        let method = match req.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, &url);

        if !req.query.is_empty() {
            builder = builder.query(&req.query);
        }

        if let Some(token) = &req.token {
            builder = builder.header("Authorization", format!("Token {token}"));
        }

        builder = match req.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Multipart(fields) => builder.multipart(Self::build_multipart(fields)?),
        };

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::Timeout {
                    reason: e.to_string(),
                }
            } else {
                ApiError::Transport {
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| ApiError::Transport {
            reason: format!("failed to read response body: {e}"),
        })?;

        // Empty bodies (204, logout) and non-JSON error pages both map to
        // something callers can still classify.
        let body = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text)
                .unwrap_or_else(|_| serde_json::json!({ "message": text }))
        };

        Ok(RawResponse { status, body })
    }
}

// ---------------------------------------------------------------------------
// ApiClient
// ---------------------------------------------------------------------------

/// Sends [`ApiRequest`]s and classifies responses into [`ApiError`] kinds.
#[derive(Clone)]
pub struct ApiClient {
    backend: Arc<dyn HttpBackend>,
}

impl ApiClient {
    pub fn new(backend: Arc<dyn HttpBackend>) -> Self {
        Self { backend }
    }

    /// Send a request; 2xx returns the parsed body, everything else becomes
    /// the matching [`ApiError`] kind.
    pub async fn send(&self, req: ApiRequest) -> ApiResult<Value> {
        let method = req.method.as_str();
        let path = req.path.clone();
        let response = self.backend.send(req).await?;

        match response.status {
            200..=299 => Ok(response.body),
            401 | 403 => {
                debug!(method, path = %path, status = response.status, "auth failure");
                Err(ApiError::Auth {
                    status: response.status,
                })
            }
            400..=499 => Err(ApiError::Validation {
                status: response.status,
                errors: response.body,
            }),
            status => Err(ApiError::Server {
                status,
                message: response
                    .body
                    .get("message")
                    .or_else(|| response.body.get("error"))
                    .and_then(|m| m.as_str())
                    .unwrap_or("unexpected server error")
                    .to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
