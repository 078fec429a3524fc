//! Request dispatch.
//!
//! The router walks its rules in registration order, resolves the first one
//! that matches and turns the responder's reply into a stream of normalized
//! events. Requests no rule claims go to the no-match policy or, without one,
//! to the caller's pass-through handler.

use crate::error::MockError;
use crate::observer::{RouterObserver, RoutingEvent, TracingObserver};
use crate::path::{PathMatchMode, PathParams};
use crate::response::{
    normalize, HttpEvent, IntoReply, MockReply, MockRequest, MockResponse, Responder,
    ResponseStream,
};
use crate::route::RouteRule;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Spacing between events of a [`MockReply::Sequence`].
pub const DEFAULT_SEQUENCE_SPACING: Duration = Duration::from_millis(500);

/// Latency applied before the first emitted item, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Delay {
    Fixed(u64),
    /// Uniform in `[min, max]`
    Range { min: u64, max: u64 },
}

impl Delay {
    /// Calculate the actual delay to apply.
    pub fn calculate(&self) -> Duration {
        let ms = match *self {
            Delay::Fixed(ms) => ms,
            Delay::Range { min, max } if max > min => {
                use rand::Rng;
                rand::thread_rng().gen_range(min..=max)
            }
            Delay::Range { min, .. } => min,
        };
        Duration::from_millis(ms)
    }
}

/// The real handler requests fall through to.
#[async_trait]
pub trait PassThrough: Send + Sync {
    async fn handle(&self, request: MockRequest) -> anyhow::Result<HttpEvent>;
}

/// Pass-through that answers every request with the same response.
#[derive(Debug, Clone)]
pub struct FixedPassThrough(pub MockResponse);

#[async_trait]
impl PassThrough for FixedPassThrough {
    async fn handle(&self, _request: MockRequest) -> anyhow::Result<HttpEvent> {
        Ok(HttpEvent::Response(self.0.clone()))
    }
}

/// Ordered rules plus global options.
pub struct Router {
    routes: Vec<RouteRule>,
    delay: Option<Delay>,
    path_match: PathMatchMode,
    skip_all: bool,
    on_no_match: Option<Arc<dyn Responder>>,
    sequence_spacing: Duration,
    observer: Arc<dyn RouterObserver>,
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::default()
    }

    pub fn routes(&self) -> &[RouteRule] {
        &self.routes
    }

    pub fn path_match(&self) -> PathMatchMode {
        self.path_match
    }

    /// Resolve a request into a stream of events.
    ///
    /// Matching, counter updates, responder selection and the responder call
    /// all happen before this returns; only the delay and emission are left
    /// to the stream. A non-2xx response ends the stream with
    /// [`MockError::Status`].
    pub fn resolve(&self, request: MockRequest, next: Arc<dyn PassThrough>) -> ResponseStream {
        match self.try_resolve(request, next) {
            Ok(events) => events,
            Err(err) => stream::once(async move { Err::<HttpEvent, _>(err) }).boxed(),
        }
    }

    /// Resolve a request and wait for its final response.
    pub async fn send(
        &self,
        request: MockRequest,
        next: Arc<dyn PassThrough>,
    ) -> Result<MockResponse, MockError> {
        let mut events = self.resolve(request, next);
        let mut last = None;
        while let Some(event) = events.next().await {
            if let HttpEvent::Response(response) = event? {
                last = Some(response);
            }
        }
        last.ok_or_else(|| MockError::Stream("no response emitted".to_string()))
    }

    fn try_resolve(
        &self,
        request: MockRequest,
        next: Arc<dyn PassThrough>,
    ) -> Result<ResponseStream, MockError> {
        if !self.skip_all {
            for rule in &self.routes {
                if let Some(params) = rule.match_request(&request, self.path_match)? {
                    return self.resolve_rule(rule, request, params);
                }
            }
        }

        self.resolve_unmatched(request, next)
    }

    fn resolve_rule(
        &self,
        rule: &RouteRule,
        request: MockRequest,
        params: PathParams,
    ) -> Result<ResponseStream, MockError> {
        let (responder, count) = rule.select_responder();
        self.observer.on_event(&RoutingEvent::Matched {
            method: request.method,
            url: request.url().to_string(),
            template: rule.template().to_string(),
            count,
        });

        let delay = rule
            .rule_delay()
            .or(self.delay)
            .map(|d| d.calculate())
            .unwrap_or_default();

        let reply = responder
            .respond(&request, &params)
            .map_err(MockError::Handler)?;

        if !delay.is_zero() {
            self.observer.on_event(&RoutingEvent::Delayed {
                url: request.url().to_string(),
                delay,
            });
        }

        Ok(self.emit(reply, delay, request.url().to_string()))
    }

    fn resolve_unmatched(
        &self,
        request: MockRequest,
        next: Arc<dyn PassThrough>,
    ) -> Result<ResponseStream, MockError> {
        if let Some(policy) = &self.on_no_match {
            self.observer.on_event(&RoutingEvent::NoMatch {
                method: request.method,
                url: request.url().to_string(),
            });
            let reply = policy
                .respond(&request, &PathParams::default())
                .map_err(MockError::Handler)?;
            return Ok(self.emit(reply, Duration::ZERO, request.url().to_string()));
        }

        self.observer.on_event(&RoutingEvent::PassThrough {
            method: request.method,
            url: request.url().to_string(),
        });
        Ok(stream::once(async move {
            next.handle(request).await.map_err(MockError::PassThrough)
        })
        .boxed())
    }

    fn emit(&self, reply: MockReply, delay: Duration, url: String) -> ResponseStream {
        let events: ResponseStream = match reply {
            MockReply::Single(event) => stream::once(async move { Ok::<_, MockError>(event) }).boxed(),
            MockReply::Sequence(events) => {
                let spacing = self.sequence_spacing;
                stream::iter(events)
                    .then(move |event| async move {
                        tokio::time::sleep(spacing).await;
                        Ok::<_, MockError>(event)
                    })
                    .boxed()
            }
            MockReply::Stream(events) => events,
        };

        let wait = stream::once(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        })
        .filter_map(|()| async { None::<Result<HttpEvent, MockError>> });

        normalize_stream(wait.chain(events).boxed(), url)
    }
}

/// Normalize each event and end the stream at the first error.
fn normalize_stream(events: ResponseStream, url: String) -> ResponseStream {
    stream::unfold(Some(events), move |state| {
        let url = url.clone();
        async move {
            let mut events = state?;
            let item = events.next().await?;
            match item.and_then(|event| normalize(event, &url)) {
                Ok(event) => Some((Ok(event), Some(events))),
                Err(err) => Some((Err(err), None)),
            }
        }
    })
    .boxed()
}

/// Builder for [`Router`].
#[derive(Default)]
pub struct RouterBuilder {
    routes: Vec<RouteRule>,
    delay: Option<Delay>,
    path_match: PathMatchMode,
    skip_all: bool,
    on_no_match: Option<Arc<dyn Responder>>,
    sequence_spacing: Option<Duration>,
    observer: Option<Arc<dyn RouterObserver>>,
}

impl RouterBuilder {
    pub fn route(mut self, rule: RouteRule) -> Self {
        self.routes.push(rule);
        self
    }

    pub fn routes(mut self, rules: impl IntoIterator<Item = RouteRule>) -> Self {
        self.routes.extend(rules);
        self
    }

    /// Delay for rules that don't set their own.
    pub fn delay(mut self, delay: Delay) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn path_match(mut self, mode: PathMatchMode) -> Self {
        self.path_match = mode;
        self
    }

    /// Bypass every rule.
    pub fn skip_all(mut self, skip: bool) -> Self {
        self.skip_all = skip;
        self
    }

    pub fn on_no_match<F, R>(self, policy: F) -> Self
    where
        F: Fn(&MockRequest, &PathParams) -> R + Send + Sync + 'static,
        R: IntoReply,
    {
        self.on_no_match_responder(Arc::new(policy))
    }

    pub fn on_no_match_responder(mut self, policy: Arc<dyn Responder>) -> Self {
        self.on_no_match = Some(policy);
        self
    }

    pub fn sequence_spacing(mut self, spacing: Duration) -> Self {
        self.sequence_spacing = Some(spacing);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn RouterObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn build(self) -> Router {
        Router {
            routes: self.routes,
            delay: self.delay,
            path_match: self.path_match,
            skip_all: self.skip_all,
            on_no_match: self.on_no_match,
            sequence_spacing: self.sequence_spacing.unwrap_or(DEFAULT_SEQUENCE_SPACING),
            observer: self.observer.unwrap_or_else(|| Arc::new(TracingObserver)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::{CountPattern, RouteCounter};
    use crate::error::DefinitionError;
    use crate::observer::RecordingObserver;
    use crate::response::{Body, HttpMethod};
    use crate::route::{route, CountBasedResponse};
    use serde_json::json;
    use tokio::time::Instant;

    fn upstream() -> Arc<dyn PassThrough> {
        Arc::new(FixedPassThrough(MockResponse::ok("upstream")))
    }

    fn text(body: &'static str) -> impl Fn(&MockRequest, &PathParams) -> MockResponse {
        move |_, _| MockResponse::ok(body)
    }

    fn status(code: u16) -> impl Fn(&MockRequest, &PathParams) -> MockResponse {
        move |_, _| MockResponse::json(code, json!({ "status": code }))
    }

    #[test]
    fn test_delay_calculation() {
        assert_eq!(Delay::Fixed(100).calculate(), Duration::from_millis(100));

        let delay = Delay::Range { min: 50, max: 150 }.calculate();
        assert!(delay >= Duration::from_millis(50) && delay <= Duration::from_millis(150));

        let degenerate = Delay::Range { min: 70, max: 10 }.calculate();
        assert_eq!(degenerate, Duration::from_millis(70));
    }

    #[tokio::test]
    async fn test_first_registered_rule_wins() {
        let router = Router::builder()
            .route(route("/api", HttpMethod::Get, text("generic")).unwrap())
            .route(route("/api/users/:id", HttpMethod::Get, text("specific")).unwrap())
            .build();

        let response = router
            .send(MockRequest::get("/api/users/1"), upstream())
            .await
            .unwrap();
        assert_eq!(response.body, Body::Text("generic".to_string()));
    }

    #[tokio::test]
    async fn test_path_params_reach_responder() {
        let router = Router::builder()
            .path_match(PathMatchMode::Full)
            .route(
                route("/users/:id/posts/:postId", HttpMethod::Get, |_, params: &PathParams| {
                    MockResponse::ok(json!({
                        "id": params.get("id"),
                        "postId": params.get("postId"),
                    }))
                })
                .unwrap(),
            )
            .build();

        let response = router
            .send(MockRequest::get("/users/123/posts/456"), upstream())
            .await
            .unwrap();
        assert_eq!(response.body, Body::Json(json!({"id": "123", "postId": "456"})));
    }

    #[tokio::test]
    async fn test_full_mode_falls_through_on_longer_path() {
        let router = Router::builder()
            .path_match(PathMatchMode::Full)
            .route(route("/api", HttpMethod::Get, text("mock")).unwrap())
            .build();

        let response = router
            .send(MockRequest::get("/api/users"), upstream())
            .await
            .unwrap();
        assert_eq!(response.body, Body::Text("upstream".to_string()));
    }

    #[tokio::test]
    async fn test_no_match_policy_surfaces_status_error() {
        let router = Router::builder()
            .route(route("/known", HttpMethod::Get, text("ok")).unwrap())
            .on_no_match(|_, _| MockResponse::json(404, json!({"error": "Not Found"})))
            .build();

        let err = router
            .send(MockRequest::get("/unknown?page=2"), upstream())
            .await
            .unwrap_err();
        let status = err.as_status().expect("status error");
        assert_eq!(status.status, 404);
        assert_eq!(status.status_text, "Not Found");
        assert_eq!(status.url, "/unknown?page=2");
        assert_eq!(status.body, Body::Json(json!({"error": "Not Found"})));
    }

    #[tokio::test]
    async fn test_skip_all_goes_to_pass_through() {
        let observer = RecordingObserver::new();
        let router = Router::builder()
            .skip_all(true)
            .observer(Arc::new(observer.clone()))
            .route(route("/api", HttpMethod::Get, text("mock")).unwrap())
            .build();

        let response = router.send(MockRequest::get("/api"), upstream()).await.unwrap();
        assert_eq!(response.body, Body::Text("upstream".to_string()));
        assert_eq!(
            observer.events(),
            vec![RoutingEvent::PassThrough {
                method: HttpMethod::Get,
                url: "/api".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_rate_limit_sequence() {
        let counter = RouteCounter::new();
        let router = Router::builder()
            .route(
                route("/todo/item", HttpMethod::Get, text("items"))
                    .unwrap()
                    .responses(
                        &counter,
                        vec![
                            CountBasedResponse::new(CountPattern::Every(2), status(429)),
                            CountBasedResponse::new(CountPattern::GreaterThan(5), status(503)),
                        ],
                    ),
            )
            .build();

        let mut outcomes = Vec::new();
        for _ in 0..7 {
            let result = router.send(MockRequest::get("/todo/item"), upstream()).await;
            outcomes.push(match result {
                Ok(response) => response.status,
                Err(err) => err.as_status().map(|s| s.status).unwrap_or(0),
            });
        }

        assert_eq!(outcomes, vec![200, 429, 200, 429, 200, 429, 503]);
        assert_eq!(counter.get(), 7);

        counter.reset();
        let response = router.send(MockRequest::get("/todo/item"), upstream()).await;
        assert!(response.is_ok());
    }

    #[tokio::test]
    async fn test_counter_advances_at_resolution_not_emission() {
        let counter = RouteCounter::new();
        let router = Router::builder()
            .route(
                route("/flaky", HttpMethod::Get, text("ok"))
                    .unwrap()
                    .responses(&counter, vec![CountBasedResponse::new(CountPattern::Exact(1), status(500))]),
            )
            .build();

        let first = router.resolve(MockRequest::get("/flaky"), upstream());
        let second = router.resolve(MockRequest::get("/flaky"), upstream());
        assert_eq!(counter.get(), 2);

        // The second stream was resolved later, so it saw count 2 even if drained first.
        let second: Vec<_> = second.collect().await;
        let first: Vec<_> = first.collect().await;
        assert!(second[0].is_ok());
        assert_eq!(first[0].as_ref().unwrap_err().as_status().unwrap().status, 500);
    }

    #[tokio::test]
    async fn test_handler_fault_propagates() {
        let router = Router::builder()
            .route(
                route("/boom", HttpMethod::Get, |_, _| -> anyhow::Result<MockResponse> {
                    anyhow::bail!("database exploded")
                })
                .unwrap(),
            )
            .build();

        let err = router.send(MockRequest::get("/boom"), upstream()).await.unwrap_err();
        match err {
            MockError::Handler(inner) => assert_eq!(inner.to_string(), "database exploded"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_conflicting_template_is_fatal() {
        let router = Router::builder()
            .route(route("/:id/x/:id", HttpMethod::Get, text("never")).unwrap())
            .route(route("/", HttpMethod::Get, text("fallback")).unwrap())
            .build();

        let err = router.send(MockRequest::get("/1/x/2"), upstream()).await.unwrap_err();
        assert!(matches!(
            err,
            MockError::Definition(DefinitionError::ConflictingParam { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rule_delay_overrides_router_delay() {
        let router = Router::builder()
            .delay(Delay::Fixed(1000))
            .route(route("/slow", HttpMethod::Get, text("slow")).unwrap().delay(Delay::Fixed(800)))
            .route(route("/default", HttpMethod::Get, text("default")).unwrap())
            .build();

        let start = Instant::now();
        router.send(MockRequest::get("/slow"), upstream()).await.unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(800));
        assert!(elapsed < Duration::from_millis(1000));

        let start = Instant::now();
        router.send(MockRequest::get("/default"), upstream()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_is_emitted_before_the_delay() {
        let router = Router::builder()
            .route(route("/slow", HttpMethod::Get, text("slow")).unwrap().delay(Delay::Fixed(1000)))
            .build();

        let mut events = router.resolve(MockRequest::get("/slow"), upstream());
        let mut next = tokio_test::task::spawn(events.next());
        tokio_test::assert_pending!(next.poll());

        tokio::time::advance(Duration::from_millis(999)).await;
        tokio_test::assert_pending!(next.poll());

        tokio::time::advance(Duration::from_millis(1)).await;
        let event = tokio_test::assert_ready!(next.poll());
        assert!(matches!(event, Some(Ok(HttpEvent::Response(_)))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_range_delay_stays_in_bounds() {
        let observer = RecordingObserver::new();
        let router = Router::builder()
            .observer(Arc::new(observer.clone()))
            .route(
                route("/todo/item/:id", HttpMethod::Put, text("updated"))
                    .unwrap()
                    .delay(Delay::Range { min: 500, max: 1500 }),
            )
            .build();

        for _ in 0..25 {
            let start = Instant::now();
            router
                .send(MockRequest::put("/todo/item/1", json!({})), upstream())
                .await
                .unwrap();
            let elapsed = start.elapsed();

            let delay = observer
                .events()
                .into_iter()
                .rev()
                .find_map(|event| match event {
                    RoutingEvent::Delayed { delay, .. } => Some(delay),
                    _ => None,
                })
                .expect("delay recorded");
            assert!(delay >= Duration::from_millis(500) && delay <= Duration::from_millis(1500));
            assert!(elapsed >= delay);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequence_is_spaced_and_ordered() {
        let router = Router::builder()
            .sequence_spacing(Duration::from_millis(100))
            .route(
                route("/api/upload", HttpMethod::Post, |_, _| {
                    vec![
                        HttpEvent::UploadProgress { loaded: 0, total: Some(100) },
                        HttpEvent::UploadProgress { loaded: 50, total: Some(100) },
                        HttpEvent::Response(MockResponse::ok(json!({"message": "Upload complete"}))),
                    ]
                })
                .unwrap(),
            )
            .build();

        let start = Instant::now();
        let events: Vec<_> = router
            .resolve(MockRequest::post("/api/upload", json!({})), upstream())
            .collect()
            .await;
        assert!(start.elapsed() >= Duration::from_millis(300));

        let events: Vec<HttpEvent> = events.into_iter().map(Result::unwrap).collect();
        assert_eq!(events.len(), 3);
        assert_eq!(events[1], HttpEvent::UploadProgress { loaded: 50, total: Some(100) });
        assert!(events[2].as_response().unwrap().is_success());
    }

    #[tokio::test]
    async fn test_stream_stops_at_first_error() {
        let router = Router::builder()
            .route(
                route("/stream", HttpMethod::Get, |_, _| -> ResponseStream {
                    stream::iter(vec![
                        Ok(HttpEvent::DownloadProgress { loaded: 10, total: None }),
                        Ok(HttpEvent::Response(MockResponse::new(500))),
                        Ok(HttpEvent::Response(MockResponse::ok("unreachable"))),
                    ])
                    .boxed()
                })
                .unwrap(),
            )
            .build();

        let events: Vec<_> = router.resolve(MockRequest::get("/stream"), upstream()).collect().await;
        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        assert_eq!(events[1].as_ref().unwrap_err().as_status().unwrap().status, 500);
    }

    #[tokio::test]
    async fn test_observer_sees_match_with_count() {
        let observer = RecordingObserver::new();
        let counter = RouteCounter::new();
        let router = Router::builder()
            .observer(Arc::new(observer.clone()))
            .route(route("/items", HttpMethod::Get, text("ok")).unwrap().counter(&counter))
            .build();

        router.send(MockRequest::get("/items"), upstream()).await.unwrap();
        assert_eq!(
            observer.events(),
            vec![RoutingEvent::Matched {
                method: HttpMethod::Get,
                url: "/items".to_string(),
                template: "/items".to_string(),
                count: Some(1),
            }]
        );
    }
}
