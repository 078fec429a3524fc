//! Request, response and event model shared by rules and responders.

use crate::error::{MockError, StatusError};
use crate::path::{split_url, PathParams};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// HTTP methods a rule can be registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            "PATCH" => Ok(HttpMethod::Patch),
            other => anyhow::bail!("Unsupported method: {}", other),
        }
    }
}

/// An outgoing request as seen by the router.
#[derive(Debug, Clone, PartialEq)]
pub struct MockRequest {
    pub method: HttpMethod,
    /// URL as issued, query string included
    pub url: String,
    /// Path without the query string
    pub path: String,
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub body: Option<serde_json::Value>,
}

impl MockRequest {
    /// Build a request from a URL; any query string is split off and decoded.
    pub fn new(method: HttpMethod, url: &str) -> Self {
        let (path, query) = split_url(url);
        Self {
            method,
            url: url.to_string(),
            path,
            query,
            headers: HashMap::new(),
            body: None,
        }
    }

    pub fn get(url: &str) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn post(url: &str, body: serde_json::Value) -> Self {
        Self::new(HttpMethod::Post, url).with_body(body)
    }

    pub fn put(url: &str, body: serde_json::Value) -> Self {
        Self::new(HttpMethod::Put, url).with_body(body)
    }

    pub fn delete(url: &str) -> Self {
        Self::new(HttpMethod::Delete, url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// The URL reported in surfaced errors.
    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Response payload.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(untagged)]
pub enum Body {
    #[default]
    Empty,
    Json(serde_json::Value),
    Text(String),
    Binary(Vec<u8>),
}

impl Body {
    pub fn is_empty(&self) -> bool {
        matches!(self, Body::Empty)
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Body::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Body::Empty => Vec::new(),
            Body::Json(value) => value.to_string().into_bytes(),
            Body::Text(text) => text.as_bytes().to_vec(),
            Body::Binary(bytes) => bytes.clone(),
        }
    }
}

impl From<serde_json::Value> for Body {
    fn from(value: serde_json::Value) -> Self {
        Body::Json(value)
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body::Text(text)
    }
}

impl From<&str> for Body {
    fn from(text: &str) -> Self {
        Body::Text(text.to_string())
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::Binary(bytes)
    }
}

/// A synthetic HTTP response.
#[derive(Debug, Clone, PartialEq)]
pub struct MockResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: HashMap<String, String>,
    pub body: Body,
}

impl MockResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            status_text: reason_phrase(status).to_string(),
            headers: HashMap::new(),
            body: Body::Empty,
        }
    }

    /// `200 OK` with the given body.
    pub fn ok(body: impl Into<Body>) -> Self {
        Self::new(200).with_body(body)
    }

    /// A response with a JSON body and the matching content type.
    pub fn json(status: u16, body: serde_json::Value) -> Self {
        Self::new(status)
            .with_header("Content-Type", "application/json")
            .with_body(body)
    }

    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_status_text(mut self, text: impl Into<String>) -> Self {
        self.status_text = text.into();
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        409 => "Conflict",
        422 => "Unprocessable Entity",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "",
    }
}

/// One item emitted for a request.
#[derive(Debug, Clone, PartialEq)]
pub enum HttpEvent {
    UploadProgress { loaded: u64, total: Option<u64> },
    DownloadProgress { loaded: u64, total: Option<u64> },
    Response(MockResponse),
}

impl HttpEvent {
    pub fn as_response(&self) -> Option<&MockResponse> {
        match self {
            HttpEvent::Response(response) => Some(response),
            _ => None,
        }
    }

    pub fn into_response(self) -> Option<MockResponse> {
        match self {
            HttpEvent::Response(response) => Some(response),
            _ => None,
        }
    }
}

impl From<MockResponse> for HttpEvent {
    fn from(response: MockResponse) -> Self {
        HttpEvent::Response(response)
    }
}

/// Stream of events produced by a resolution.
pub type ResponseStream = BoxStream<'static, Result<HttpEvent, MockError>>;

/// What a responder hands back to the router.
pub enum MockReply {
    /// One event, usually the final response
    Single(HttpEvent),
    /// A finite list emitted with a fixed spacing between items
    Sequence(Vec<HttpEvent>),
    /// A fully asynchronous stream
    Stream(ResponseStream),
}

impl fmt::Debug for MockReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MockReply::Single(event) => f.debug_tuple("Single").field(event).finish(),
            MockReply::Sequence(events) => f.debug_tuple("Sequence").field(events).finish(),
            MockReply::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Conversion from whatever a responder closure returns.
pub trait IntoReply {
    fn into_reply(self) -> anyhow::Result<MockReply>;
}

impl IntoReply for MockReply {
    fn into_reply(self) -> anyhow::Result<MockReply> {
        Ok(self)
    }
}

impl IntoReply for MockResponse {
    fn into_reply(self) -> anyhow::Result<MockReply> {
        Ok(MockReply::Single(HttpEvent::Response(self)))
    }
}

impl IntoReply for HttpEvent {
    fn into_reply(self) -> anyhow::Result<MockReply> {
        Ok(MockReply::Single(self))
    }
}

impl IntoReply for Vec<HttpEvent> {
    fn into_reply(self) -> anyhow::Result<MockReply> {
        Ok(MockReply::Sequence(self))
    }
}

impl IntoReply for ResponseStream {
    fn into_reply(self) -> anyhow::Result<MockReply> {
        Ok(MockReply::Stream(self))
    }
}

impl<T, E> IntoReply for Result<T, E>
where
    T: IntoReply,
    E: Into<anyhow::Error>,
{
    fn into_reply(self) -> anyhow::Result<MockReply> {
        self.map_err(Into::into)?.into_reply()
    }
}

/// Produces the reply for a matched request.
pub trait Responder: Send + Sync {
    fn respond(&self, request: &MockRequest, params: &PathParams) -> anyhow::Result<MockReply>;
}

impl<F, R> Responder for F
where
    F: Fn(&MockRequest, &PathParams) -> R + Send + Sync,
    R: IntoReply,
{
    fn respond(&self, request: &MockRequest, params: &PathParams) -> anyhow::Result<MockReply> {
        self(request, params).into_reply()
    }
}

/// Convert a non-success response into a surfaced error.
pub(crate) fn normalize(event: HttpEvent, url: &str) -> Result<HttpEvent, MockError> {
    match event {
        HttpEvent::Response(response) if !response.is_success() => Err(StatusError {
            status: response.status,
            status_text: response.status_text,
            headers: response.headers,
            body: response.body,
            url: url.to_string(),
        }
        .into()),
        other => Ok(other),
    }
}
