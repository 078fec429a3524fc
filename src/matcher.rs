//! Request predicates beyond method and path.
//!
//! Query and header matchers compare a single request value either literally
//! or against a regular expression. Body matchers look at the JSON body.

use regex::Regex;
use std::fmt;
use std::sync::Arc;

/// Matches one query parameter or header value.
#[derive(Debug, Clone)]
pub enum ValueMatcher {
    /// Value must equal this string
    Exact(String),
    /// Value must match this pattern
    Regex(Regex),
    /// Any value is accepted as long as one is present
    Present,
}

impl ValueMatcher {
    pub fn exact(value: impl Into<String>) -> Self {
        ValueMatcher::Exact(value.into())
    }

    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(ValueMatcher::Regex)
    }

    /// A missing value never matches.
    pub fn matches(&self, value: Option<&str>) -> bool {
        let Some(value) = value else {
            return false;
        };
        match self {
            ValueMatcher::Exact(expected) => value == expected,
            ValueMatcher::Regex(regex) => regex.is_match(value),
            ValueMatcher::Present => true,
        }
    }
}

impl From<&str> for ValueMatcher {
    fn from(value: &str) -> Self {
        ValueMatcher::Exact(value.to_string())
    }
}

impl From<String> for ValueMatcher {
    fn from(value: String) -> Self {
        ValueMatcher::Exact(value)
    }
}

impl From<Regex> for ValueMatcher {
    fn from(regex: Regex) -> Self {
        ValueMatcher::Regex(regex)
    }
}

type BodyPredicate = Arc<dyn Fn(Option<&serde_json::Value>) -> bool + Send + Sync>;

/// Matches the request body.
#[derive(Clone)]
pub enum BodyMatcher {
    /// Caller-supplied predicate
    Predicate(BodyPredicate),
    /// Body must be present
    Present,
    /// Body must be absent or JSON null
    Empty,
    /// Body must equal this value
    Equals(serde_json::Value),
    /// Serialized body must contain this substring
    Contains(String),
    /// Each JSON path must resolve; a non-null expected value must also match
    JsonPath(Vec<(String, serde_json::Value)>),
}

impl BodyMatcher {
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(Option<&serde_json::Value>) -> bool + Send + Sync + 'static,
    {
        BodyMatcher::Predicate(Arc::new(f))
    }

    pub fn matches(&self, body: Option<&serde_json::Value>) -> bool {
        match self {
            BodyMatcher::Predicate(f) => f(body),
            BodyMatcher::Present => body.is_some_and(|b| !b.is_null()),
            BodyMatcher::Empty => body.map_or(true, serde_json::Value::is_null),
            BodyMatcher::Equals(expected) => body == Some(expected),
            BodyMatcher::Contains(needle) => body.is_some_and(|b| match b {
                serde_json::Value::String(s) => s.contains(needle.as_str()),
                other => other.to_string().contains(needle.as_str()),
            }),
            BodyMatcher::JsonPath(expressions) => {
                body.is_some_and(|json| matches_json_paths(json, expressions))
            }
        }
    }
}

impl fmt::Debug for BodyMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BodyMatcher::Predicate(_) => f.write_str("Predicate(..)"),
            BodyMatcher::Present => f.write_str("Present"),
            BodyMatcher::Empty => f.write_str("Empty"),
            BodyMatcher::Equals(v) => f.debug_tuple("Equals").field(v).finish(),
            BodyMatcher::Contains(s) => f.debug_tuple("Contains").field(s).finish(),
            BodyMatcher::JsonPath(e) => f.debug_tuple("JsonPath").field(e).finish(),
        }
    }
}

fn matches_json_paths(json: &serde_json::Value, expressions: &[(String, serde_json::Value)]) -> bool {
    use jsonpath_rust::JsonPath;

    expressions.iter().all(|(path_expr, expected)| {
        let Ok(path) = JsonPath::try_from(path_expr.as_str()) else {
            return false;
        };
        let results = path.find(json);

        if expected.is_null() {
            !results.is_null()
        } else {
            results == *expected
        }
    })
}
