//! Route templates and path matching.
//!
//! A template such as `/users/:id/posts/:postId` is split into literal and
//! parameter segments once, then matched against request paths in a single
//! left-to-right pass.

use crate::error::DefinitionError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Marker that starts a parameter segment.
const PARAM_SENTINEL: char = ':';

/// How much of the request path a template has to cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathMatchMode {
    /// Template and path must have the same number of segments
    Full,
    /// Template may be shorter than the path; trailing segments are ignored
    #[default]
    Prefix,
}

/// Parameters bound while matching a template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PathParams(HashMap<String, String>);

impl PathParams {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn as_map(&self) -> &HashMap<String, String> {
        &self.0
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for PathParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Outcome of one match attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathMatch {
    pub is_match: bool,
    pub params: PathParams,
}

impl PathMatch {
    fn miss() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TemplateSegment {
    Literal(String),
    Param(String),
}

/// A parsed route template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTemplate {
    source: String,
    segments: Vec<TemplateSegment>,
}

impl RouteTemplate {
    /// Parse a template. Parameter segments start with `:`.
    pub fn parse(template: &str) -> Result<Self, DefinitionError> {
        let segments = split_segments(template)
            .map(|segment| match segment.strip_prefix(PARAM_SENTINEL) {
                Some("") => Err(DefinitionError::EmptyParamName(template.to_string())),
                Some(name) => Ok(TemplateSegment::Param(name.to_string())),
                None => Ok(TemplateSegment::Literal(segment.to_string())),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            source: template.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Names of the parameters in template order.
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            TemplateSegment::Param(name) => Some(name.as_str()),
            TemplateSegment::Literal(_) => None,
        })
    }

    /// Match a request path.
    ///
    /// A parameter bound twice to different values is a malformed template and
    /// is reported as an error rather than a miss.
    pub fn matches(&self, mode: PathMatchMode, path: &str) -> Result<PathMatch, DefinitionError> {
        let parts: Vec<&str> = split_segments(path).collect();

        match mode {
            PathMatchMode::Full if self.segments.len() != parts.len() => {
                return Ok(PathMatch::miss())
            }
            PathMatchMode::Prefix if self.segments.len() > parts.len() => {
                return Ok(PathMatch::miss())
            }
            _ => {}
        }

        let mut params: HashMap<String, String> = HashMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                TemplateSegment::Literal(lit) => {
                    if lit != part {
                        return Ok(PathMatch::miss());
                    }
                }
                TemplateSegment::Param(name) => {
                    if let Some(existing) = params.get(name) {
                        if existing != part {
                            return Err(DefinitionError::ConflictingParam {
                                name: name.clone(),
                                existing: existing.clone(),
                                conflicting: part.to_string(),
                            });
                        }
                    }
                    params.insert(name.clone(), part.to_string());
                }
            }
        }

        Ok(PathMatch {
            is_match: true,
            params: PathParams(params),
        })
    }
}

impl fmt::Display for RouteTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Parse `template` and match it against `path` in one step.
pub fn match_path(
    mode: PathMatchMode,
    template: &str,
    path: &str,
) -> Result<PathMatch, DefinitionError> {
    RouteTemplate::parse(template)?.matches(mode, path)
}

/// Strip one leading and one trailing separator, then split.
fn split_segments(path: &str) -> impl Iterator<Item = &str> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
    trimmed.split('/')
}

/// Split a URL into its path and decoded query parameters.
pub(crate) fn split_url(url: &str) -> (String, HashMap<String, String>) {
    match url.split_once('?') {
        Some((path, query)) => (path.to_string(), parse_query_string(query)),
        None => (url.to_string(), HashMap::new()),
    }
}

/// Parse a query string into key-value pairs.
fn parse_query_string(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('=') {
            Some((key, value)) => (percent_decode(key), percent_decode(value)),
            None => (percent_decode(part), String::new()),
        })
        .collect()
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let decoded = std::str::from_utf8(&bytes[i + 1..i + 3])
                    .ok()
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok());
                match decoded {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}
