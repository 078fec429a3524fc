//! Declarative router configuration.
//!
//! A thin YAML layer over the builder API: routes, matchers, count-gated
//! responses and delays are described declaratively and compiled into a
//! [`Router`]. Named counters are shared between every route that
//! references them.

use crate::counter::{CountPattern, RouteCounter};
use crate::file::{file_response, FileMockOptions};
use crate::matcher::{BodyMatcher, ValueMatcher};
use crate::path::{PathMatchMode, PathParams, RouteTemplate};
use crate::response::{Body, HttpMethod, IntoReply, MockReply, MockRequest, MockResponse, Responder};
use crate::route::{CountBasedResponse, RouteRule};
use crate::router::{Delay, Router};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Errors raised while loading or compiling a configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{context}: {reason}")]
    Invalid { context: String, reason: String },
}

impl ConfigError {
    fn invalid(context: impl Into<String>, reason: impl ToString) -> Self {
        ConfigError::Invalid {
            context: context.into(),
            reason: reason.to_string(),
        }
    }
}

/// Top-level configuration document.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RouterConfig {
    /// Global settings
    #[serde(default)]
    pub settings: Settings,

    /// Rules, matched in order
    #[serde(default)]
    pub routes: Vec<RouteDefinition>,

    /// Response for requests no route claims; without it they pass through
    #[serde(default)]
    pub on_no_match: Option<ResponseDefinition>,
}

/// Global settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default)]
    pub path_match: PathMatchMode,

    /// Delay for routes that don't set their own
    #[serde(default)]
    pub delay: Option<Delay>,

    /// Bypass every route
    #[serde(default)]
    pub skip_all: bool,

    /// Spacing between events of a sequence reply
    #[serde(default = "default_sequence_spacing")]
    pub sequence_spacing_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            path_match: PathMatchMode::default(),
            delay: None,
            skip_all: false,
            sequence_spacing_ms: default_sequence_spacing(),
        }
    }
}

fn default_sequence_spacing() -> u64 {
    500
}

/// A single route.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteDefinition {
    /// Route template, e.g. `/todo/item/:id`
    pub path: String,

    #[serde(default = "default_method")]
    pub method: HttpMethod,

    #[serde(default)]
    pub query: HashMap<String, ValueMatcherConfig>,

    #[serde(default)]
    pub headers: HashMap<String, ValueMatcherConfig>,

    #[serde(default)]
    pub body: Option<BodyMatcherConfig>,

    #[serde(default)]
    pub delay: Option<Delay>,

    /// Keep the route registered but never match it
    #[serde(default)]
    pub skip: bool,

    /// Name of a counter shared with other routes
    #[serde(default)]
    pub counter: Option<String>,

    /// Default response
    #[serde(default)]
    pub response: ResponseDefinition,

    /// Count-gated alternatives, scanned in order
    #[serde(default)]
    pub responses: Vec<CountResponseDefinition>,
}

fn default_method() -> HttpMethod {
    HttpMethod::Get
}

impl RouteDefinition {
    fn validate(&self) -> Result<(), ConfigError> {
        let context = format!("route {} {}", self.method, self.path);
        let ctx = |reason: &dyn ToString| ConfigError::invalid(context.clone(), reason.to_string());

        RouteTemplate::parse(&self.path).map_err(|e| ctx(&e))?;
        for (name, matcher) in self.query.iter().chain(&self.headers) {
            matcher
                .compile()
                .map_err(|e| ctx(&format!("matcher `{}`: {}", name, e)))?;
        }
        if let Some(body) = &self.body {
            body.validate().map_err(|e| ctx(&e))?;
        }
        if !self.responses.is_empty() && self.counter.is_none() {
            return Err(ctx(&"`responses` requires a `counter`"));
        }

        self.response.validate().map_err(|e| ctx(&e))?;
        for alternative in &self.responses {
            alternative
                .response
                .validate()
                .map_err(|e| ctx(&format!("count {}: {}", alternative.count, e)))?;
        }
        Ok(())
    }
}

/// Query parameter or header matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValueMatcherConfig {
    /// Exact value match
    Exact { value: String },
    /// Regex pattern match
    Regex { pattern: String },
    /// Must be present (any value)
    Present,
}

impl ValueMatcherConfig {
    pub fn compile(&self) -> Result<ValueMatcher, regex::Error> {
        match self {
            ValueMatcherConfig::Exact { value } => Ok(ValueMatcher::exact(value.clone())),
            ValueMatcherConfig::Regex { pattern } => ValueMatcher::regex(pattern),
            ValueMatcherConfig::Present => Ok(ValueMatcher::Present),
        }
    }
}

/// Body matching configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BodyMatcherConfig {
    /// Any JSON body
    Json,
    /// No body
    Empty,
    /// Body must equal this value
    Equals { value: serde_json::Value },
    /// Serialized body must contain substring
    Contains { value: String },
    /// JSON path expressions and expected values (null = must exist)
    JsonPath {
        expressions: HashMap<String, serde_json::Value>,
    },
}

impl BodyMatcherConfig {
    fn validate(&self) -> Result<(), String> {
        if let BodyMatcherConfig::JsonPath { expressions } = self {
            for expr in expressions.keys() {
                jsonpath_rust::JsonPath::<serde_json::Value>::try_from(expr.as_str())
                    .map_err(|e| format!("invalid JSON path `{}`: {}", expr, e))?;
            }
        }
        Ok(())
    }

    pub fn compile(&self) -> BodyMatcher {
        match self {
            BodyMatcherConfig::Json => BodyMatcher::Present,
            BodyMatcherConfig::Empty => BodyMatcher::Empty,
            BodyMatcherConfig::Equals { value } => BodyMatcher::Equals(value.clone()),
            BodyMatcherConfig::Contains { value } => BodyMatcher::Contains(value.clone()),
            BodyMatcherConfig::JsonPath { expressions } => BodyMatcher::JsonPath(
                expressions
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
        }
    }
}

/// A response selected when the route's counter matches `count`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CountResponseDefinition {
    pub count: CountPattern,
    pub response: ResponseDefinition,
}

/// Response definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseDefinition {
    /// HTTP status code
    #[serde(default = "default_status")]
    pub status: u16,

    /// Response headers
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Response body
    #[serde(default)]
    pub body: Option<ResponseBody>,
}

impl Default for ResponseDefinition {
    fn default() -> Self {
        Self {
            status: default_status(),
            headers: HashMap::new(),
            body: None,
        }
    }
}

fn default_status() -> u16 {
    200
}

impl ResponseDefinition {
    /// Validate the response definition.
    pub fn validate(&self) -> Result<(), String> {
        if !(100..=599).contains(&self.status) {
            return Err(format!("invalid status code: {}", self.status));
        }
        if let Some(ResponseBody::Base64 { .. }) = &self.body {
            self.body_bytes()?;
        }
        Ok(())
    }

    fn body_bytes(&self) -> Result<Vec<u8>, String> {
        match &self.body {
            Some(body) => body.to_bytes(),
            None => Ok(Vec::new()),
        }
    }

    fn has_header(&self, name: &str) -> bool {
        self.headers.keys().any(|k| k.eq_ignore_ascii_case(name))
    }
}

/// Response body configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseBody {
    /// Plain text body
    Text { content: String },
    /// JSON body
    Json { content: serde_json::Value },
    /// Base64 encoded binary
    Base64 { content: String },
    /// Stream a file from disk as a download
    File {
        path: PathBuf,
        #[serde(default)]
        filename: Option<String>,
        #[serde(default)]
        chunk_size: Option<usize>,
        #[serde(default)]
        chunk_delay_ms: Option<u64>,
    },
}

impl ResponseBody {
    /// Get the inline body content as bytes. File bodies are streamed instead.
    pub fn to_bytes(&self) -> Result<Vec<u8>, String> {
        match self {
            ResponseBody::Text { content } => Ok(content.as_bytes().to_vec()),
            ResponseBody::Json { content } => Ok(content.to_string().into_bytes()),
            ResponseBody::Base64 { content } => {
                use base64::Engine;
                base64::engine::general_purpose::STANDARD
                    .decode(content)
                    .map_err(|e| format!("invalid base64: {}", e))
            }
            ResponseBody::File { .. } => Ok(Vec::new()),
        }
    }

    /// Get content type for this body.
    pub fn content_type(&self) -> &'static str {
        match self {
            ResponseBody::Text { .. } => "text/plain",
            ResponseBody::Json { .. } => "application/json",
            ResponseBody::Base64 { .. } => "application/octet-stream",
            ResponseBody::File { .. } => "application/octet-stream",
        }
    }
}

impl RouterConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (i, route) in self.routes.iter().enumerate() {
            route.validate().map_err(|e| match e {
                ConfigError::Invalid { context, reason } => {
                    ConfigError::invalid(format!("{} (#{})", context, i), reason)
                }
                other => other,
            })?;
        }
        if let Some(response) = &self.on_no_match {
            response
                .validate()
                .map_err(|e| ConfigError::invalid("on_no_match", e))?;
        }
        Ok(())
    }

    /// Number of named counters referenced by routes.
    pub fn counter_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .routes
            .iter()
            .filter_map(|r| r.counter.as_deref())
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    /// Validate and compile into a router.
    pub fn into_router(self) -> Result<CompiledRouter, ConfigError> {
        self.validate()?;

        let mut counters: HashMap<String, RouteCounter> = HashMap::new();
        let mut rules = Vec::with_capacity(self.routes.len());

        for definition in self.routes {
            let counter = definition
                .counter
                .as_ref()
                .map(|name| counters.entry(name.clone()).or_default().clone());
            rules.push(compile_route(definition, counter)?);
        }

        let mut builder = Router::builder()
            .path_match(self.settings.path_match)
            .skip_all(self.settings.skip_all)
            .sequence_spacing(Duration::from_millis(self.settings.sequence_spacing_ms))
            .routes(rules);
        if let Some(delay) = self.settings.delay {
            builder = builder.delay(delay);
        }
        if let Some(response) = self.on_no_match {
            builder = builder.on_no_match_responder(ConfiguredResponse::prepare(response)?);
        }

        debug!(counters = counters.len(), "Compiled router configuration");
        Ok(CompiledRouter {
            router: builder.build(),
            counters,
        })
    }
}

fn compile_route(
    definition: RouteDefinition,
    counter: Option<RouteCounter>,
) -> Result<RouteRule, ConfigError> {
    let context = format!("route {} {}", definition.method, definition.path);
    let responder = ConfiguredResponse::prepare(definition.response)?;
    let mut rule = RouteRule::new(&definition.path, definition.method, responder)
        .map_err(|e| ConfigError::invalid(context.clone(), e))?
        .skip(definition.skip);

    for (name, matcher) in &definition.query {
        let matcher = matcher
            .compile()
            .map_err(|e| ConfigError::invalid(context.clone(), e))?;
        rule = rule.query(name.clone(), matcher);
    }
    for (name, matcher) in &definition.headers {
        let matcher = matcher
            .compile()
            .map_err(|e| ConfigError::invalid(context.clone(), e))?;
        rule = rule.header(name.clone(), matcher);
    }
    if let Some(body) = &definition.body {
        rule = rule.body(body.compile());
    }
    if let Some(delay) = definition.delay {
        rule = rule.delay(delay);
    }

    if let Some(counter) = counter {
        let alternatives = definition
            .responses
            .into_iter()
            .map(|alt| {
                Ok(CountBasedResponse::from_responder(
                    alt.count,
                    ConfiguredResponse::prepare(alt.response)?,
                ))
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        rule = rule.responses(&counter, alternatives);
    }

    Ok(rule)
}

/// A compiled configuration and its named counters.
pub struct CompiledRouter {
    pub router: Router,
    counters: HashMap<String, RouteCounter>,
}

impl CompiledRouter {
    /// Counter shared by the routes that name it.
    pub fn counter(&self, name: &str) -> Option<&RouteCounter> {
        self.counters.get(name)
    }

    pub fn into_router(self) -> Router {
        self.router
    }
}

/// Body ready to be served.
enum PreparedBody {
    Empty,
    Text(String),
    Json(serde_json::Value),
    Binary(Vec<u8>),
    File(FileMockOptions),
}

/// Responder built from a [`ResponseDefinition`].
struct ConfiguredResponse {
    status: u16,
    headers: HashMap<String, String>,
    body: PreparedBody,
}

impl ConfiguredResponse {
    fn prepare(definition: ResponseDefinition) -> Result<Arc<dyn Responder>, ConfigError> {
        let mut headers = definition.headers.clone();
        if let Some(body) = &definition.body {
            if !definition.has_header("Content-Type") {
                headers.insert("Content-Type".to_string(), body.content_type().to_string());
            }
        }

        let body = match definition.body {
            None => PreparedBody::Empty,
            Some(ResponseBody::Text { content }) => PreparedBody::Text(content),
            Some(ResponseBody::Json { content }) => PreparedBody::Json(content),
            Some(body @ ResponseBody::Base64 { .. }) => PreparedBody::Binary(
                body.to_bytes()
                    .map_err(|e| ConfigError::invalid("response body", e))?,
            ),
            Some(ResponseBody::File {
                path,
                filename,
                chunk_size,
                chunk_delay_ms,
            }) => {
                let mut options = FileMockOptions::new(path);
                options.filename = filename;
                options.content_type = take_header(&mut headers, "Content-Type");
                options.headers = std::mem::take(&mut headers);
                if let Some(size) = chunk_size {
                    options = options.chunk_size(size);
                }
                if let Some(ms) = chunk_delay_ms {
                    options = options.chunk_delay(Duration::from_millis(ms));
                }
                PreparedBody::File(options)
            }
        };

        Ok(Arc::new(Self {
            status: definition.status,
            headers,
            body,
        }))
    }
}

fn take_header(headers: &mut HashMap<String, String>, name: &str) -> Option<String> {
    let key = headers.keys().find(|k| k.eq_ignore_ascii_case(name))?.clone();
    headers.remove(&key)
}

impl Responder for ConfiguredResponse {
    fn respond(&self, _request: &MockRequest, _params: &PathParams) -> anyhow::Result<MockReply> {
        let body = match &self.body {
            PreparedBody::File(options) => return file_response(options.clone()).into_reply(),
            PreparedBody::Empty => Body::Empty,
            PreparedBody::Text(text) => Body::Text(text.clone()),
            PreparedBody::Json(json) => Body::Json(json.clone()),
            PreparedBody::Binary(bytes) => Body::Binary(bytes.clone()),
        };

        let mut response = MockResponse::new(self.status).with_body(body);
        response.headers = self.headers.clone();
        response.into_reply()
    }
}
