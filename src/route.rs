//! Route rules.
//!
//! A rule binds a template and method to a responder, with optional query,
//! header and body predicates, count-gated alternative responders and a
//! per-rule delay.

use crate::counter::{CountPattern, RouteCounter};
use crate::error::DefinitionError;
use crate::matcher::{BodyMatcher, ValueMatcher};
use crate::path::{PathMatchMode, PathParams, RouteTemplate};
use crate::response::{HttpMethod, IntoReply, MockRequest, Responder};
use crate::router::Delay;
use std::fmt;
use std::sync::Arc;

/// A responder used when the counter matches `pattern`.
#[derive(Clone)]
pub struct CountBasedResponse {
    pattern: CountPattern,
    responder: Arc<dyn Responder>,
}

impl CountBasedResponse {
    pub fn new<F, R>(pattern: CountPattern, responder: F) -> Self
    where
        F: Fn(&MockRequest, &PathParams) -> R + Send + Sync + 'static,
        R: IntoReply,
    {
        Self::from_responder(pattern, Arc::new(responder))
    }

    pub fn from_responder(pattern: CountPattern, responder: Arc<dyn Responder>) -> Self {
        Self { pattern, responder }
    }

    pub fn pattern(&self) -> CountPattern {
        self.pattern
    }
}

impl fmt::Debug for CountBasedResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountBasedResponse")
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

/// A registered rule. Immutable once handed to the router.
#[derive(Clone)]
pub struct RouteRule {
    template: RouteTemplate,
    method: HttpMethod,
    responder: Arc<dyn Responder>,
    responses: Vec<CountBasedResponse>,
    counter: Option<RouteCounter>,
    query: Vec<(String, ValueMatcher)>,
    headers: Vec<(String, ValueMatcher)>,
    body: Option<BodyMatcher>,
    delay: Option<Delay>,
    skip: bool,
}

/// Register `responder` for `method` requests matching `template`.
pub fn route<F, R>(template: &str, method: HttpMethod, responder: F) -> Result<RouteRule, DefinitionError>
where
    F: Fn(&MockRequest, &PathParams) -> R + Send + Sync + 'static,
    R: IntoReply,
{
    RouteRule::new(template, method, Arc::new(responder))
}

impl RouteRule {
    pub fn new(
        template: &str,
        method: HttpMethod,
        responder: Arc<dyn Responder>,
    ) -> Result<Self, DefinitionError> {
        Ok(Self {
            template: RouteTemplate::parse(template)?,
            method,
            responder,
            responses: Vec::new(),
            counter: None,
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            delay: None,
            skip: false,
        })
    }

    pub fn delay(mut self, delay: Delay) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Keep the rule registered but never match it.
    pub fn skip(mut self, skip: bool) -> Self {
        self.skip = skip;
        self
    }

    pub fn query(mut self, name: impl Into<String>, matcher: impl Into<ValueMatcher>) -> Self {
        self.query.push((name.into(), matcher.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, matcher: impl Into<ValueMatcher>) -> Self {
        self.headers.push((name.into(), matcher.into()));
        self
    }

    pub fn body(mut self, matcher: BodyMatcher) -> Self {
        self.body = Some(matcher);
        self
    }

    /// Count this rule's resolutions without alternative responders.
    pub fn counter(mut self, counter: &RouteCounter) -> Self {
        self.counter = Some(counter.clone());
        self
    }

    /// Alternative responders selected by `counter`, scanned in order.
    pub fn responses(mut self, counter: &RouteCounter, responses: Vec<CountBasedResponse>) -> Self {
        self.counter = Some(counter.clone());
        self.responses = responses;
        self
    }

    pub fn template(&self) -> &RouteTemplate {
        &self.template
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn rule_delay(&self) -> Option<Delay> {
        self.delay
    }

    pub fn is_skipped(&self) -> bool {
        self.skip
    }

    /// Evaluate the rule's predicate.
    ///
    /// Returns the bound path parameters on a match. A malformed template
    /// surfaces as an error instead of a miss.
    pub fn match_request(
        &self,
        request: &MockRequest,
        mode: PathMatchMode,
    ) -> Result<Option<PathParams>, DefinitionError> {
        if self.skip || request.method != self.method {
            return Ok(None);
        }

        let path_match = self.template.matches(mode, &request.path)?;
        if !path_match.is_match {
            return Ok(None);
        }

        let query_ok = self
            .query
            .iter()
            .all(|(name, m)| m.matches(request.query_param(name)));
        let headers_ok = self
            .headers
            .iter()
            .all(|(name, m)| m.matches(request.header(name)));
        let body_ok = self
            .body
            .as_ref()
            .map_or(true, |m| m.matches(request.body.as_ref()));

        Ok((query_ok && headers_ok && body_ok).then_some(path_match.params))
    }

    /// Advance the counter and pick the responder for this resolution.
    ///
    /// Returns the responder and the counter value it was selected with.
    pub(crate) fn select_responder(&self) -> (Arc<dyn Responder>, Option<u64>) {
        let Some(counter) = &self.counter else {
            return (self.responder.clone(), None);
        };

        let count = counter.increment() + 1;
        let responder = self
            .responses
            .iter()
            .find(|r| r.pattern.matches(count))
            .map_or_else(|| self.responder.clone(), |r| r.responder.clone());

        (responder, Some(count))
    }
}

impl fmt::Debug for RouteRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteRule")
            .field("template", &self.template.as_str())
            .field("method", &self.method)
            .field("responses", &self.responses)
            .field("counter", &self.counter)
            .field("delay", &self.delay)
            .field("skip", &self.skip)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::{Body, HttpEvent, MockReply, MockResponse};
    use serde_json::json;

    fn ok(body: &'static str) -> impl Fn(&MockRequest, &PathParams) -> MockResponse {
        move |_, _| MockResponse::ok(body)
    }

    fn body_of(rule_responder: Arc<dyn Responder>) -> Body {
        match rule_responder
            .respond(&MockRequest::get("/"), &PathParams::default())
            .unwrap()
        {
            MockReply::Single(HttpEvent::Response(resp)) => resp.body,
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[test]
    fn test_method_must_match() {
        let rule = route("/api/test", HttpMethod::Get, ok("x")).unwrap();
        let post = MockRequest::post("/api/test", json!({}));
        assert!(rule.match_request(&post, PathMatchMode::Full).unwrap().is_none());

        for method in [
            HttpMethod::Get,
            HttpMethod::Post,
            HttpMethod::Put,
            HttpMethod::Delete,
            HttpMethod::Patch,
        ] {
            let rule = route("/api/test", method, ok("x")).unwrap();
            let req = MockRequest::new(method, "/api/test");
            assert!(rule.match_request(&req, PathMatchMode::Full).unwrap().is_some());
        }
    }

    #[test]
    fn test_query_and_header_matchers() {
        let rule = route("/api/test", HttpMethod::Get, ok("x"))
            .unwrap()
            .query("id", ValueMatcher::regex(r"^\d+$").unwrap())
            .header("Authorization", "Bearer token");

        let good = MockRequest::get("/api/test?id=123").with_header("authorization", "Bearer token");
        assert!(rule.match_request(&good, PathMatchMode::Full).unwrap().is_some());

        let bad_query = MockRequest::get("/api/test?id=abc").with_header("Authorization", "Bearer token");
        assert!(rule.match_request(&bad_query, PathMatchMode::Full).unwrap().is_none());

        let missing_header = MockRequest::get("/api/test?id=1");
        assert!(rule.match_request(&missing_header, PathMatchMode::Full).unwrap().is_none());
    }

    #[test]
    fn test_body_matcher() {
        let rule = route("/todos", HttpMethod::Post, ok("created"))
            .unwrap()
            .body(BodyMatcher::predicate(|b| b.and_then(|v| v.get("label")).is_some()));

        let with_label = MockRequest::post("/todos", json!({"label": "milk"}));
        let without = MockRequest::post("/todos", json!({"other": 1}));
        assert!(rule.match_request(&with_label, PathMatchMode::Full).unwrap().is_some());
        assert!(rule.match_request(&without, PathMatchMode::Full).unwrap().is_none());
    }

    #[test]
    fn test_skipped_rule_never_matches() {
        let rule = route("/api/test", HttpMethod::Get, ok("x")).unwrap().skip(true);
        let req = MockRequest::get("/api/test");
        assert!(rule.match_request(&req, PathMatchMode::Full).unwrap().is_none());
    }

    #[test]
    fn test_conflicting_params_surface_as_error() {
        let rule = route("/:id/and/:id", HttpMethod::Get, ok("x")).unwrap();
        let req = MockRequest::get("/1/and/2");
        assert!(rule.match_request(&req, PathMatchMode::Full).is_err());
    }

    #[test]
    fn test_select_without_counter_uses_default() {
        let rule = route("/", HttpMethod::Get, ok("default")).unwrap();
        let (responder, count) = rule.select_responder();
        assert_eq!(count, None);
        assert_eq!(body_of(responder), Body::Text("default".to_string()));
    }

    #[test]
    fn test_select_scans_patterns_in_order() {
        let counter = RouteCounter::new();
        let rule = route("/", HttpMethod::Get, ok("default"))
            .unwrap()
            .responses(
                &counter,
                vec![
                    CountBasedResponse::new(CountPattern::Exact(1), ok("first")),
                    CountBasedResponse::new(CountPattern::Even, ok("even")),
                    CountBasedResponse::new(CountPattern::Exact(2), ok("never")),
                ],
            );

        let bodies: Vec<(Body, Option<u64>)> = (0..3)
            .map(|_| {
                let (responder, count) = rule.select_responder();
                (body_of(responder), count)
            })
            .collect();

        assert_eq!(
            bodies,
            vec![
                (Body::Text("first".to_string()), Some(1)),
                (Body::Text("even".to_string()), Some(2)),
                (Body::Text("default".to_string()), Some(3)),
            ]
        );
        assert_eq!(counter.get(), 3);
    }

    #[test]
    fn test_concurrent_selections_see_distinct_counts() {
        let counter = RouteCounter::new();
        let rule = route("/", HttpMethod::Get, ok("default"))
            .unwrap()
            .responses(&counter, vec![]);

        let mut counts: Vec<u64> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        (0..50)
                            .map(|_| rule.select_responder().1.unwrap())
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            workers
                .into_iter()
                .flat_map(|w| w.join().unwrap())
                .collect()
        });

        counts.sort_unstable();
        assert_eq!(counts, (1..=400).collect::<Vec<u64>>());
        assert_eq!(counter.get(), 400);
    }
}
