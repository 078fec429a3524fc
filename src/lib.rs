//! Mock Router
//!
//! An in-process, deterministic mock HTTP routing engine. Outgoing requests
//! are matched against an ordered list of rules and answered with synthetic
//! responses, sequences or streams, without touching the network.
//!
//! # Features
//!
//! - **Path Templates**: `:name` parameters with full or prefix matching
//! - **Request Predicates**: Match by method, query, headers and JSON body
//! - **Count Patterns**: Pick responses by invocation count (`2n`, `odd`, `>3`, `2-5`)
//! - **Latency Simulation**: Fixed or random delays, global or per rule
//! - **Streaming**: Progress events, fixed-spacing sequences and file downloads
//! - **Mock Data**: Generator trees, a typed factory and in-memory stores
//! - **Declarative Config**: YAML routes compiled onto the builder API
//!
//! # Example
//!
//! ```no_run
//! use mock_router::{route, FixedPassThrough, HttpMethod, MockRequest, MockResponse, Router};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let router = Router::builder()
//!     .route(route("/users/:id", HttpMethod::Get, |_: &MockRequest, params: &mock_router::PathParams| {
//!         MockResponse::json(200, json!({ "id": params.get("id") }))
//!     })?)
//!     .build();
//!
//! let upstream = Arc::new(FixedPassThrough(MockResponse::new(502)));
//! let response = router.send(MockRequest::get("/users/7"), upstream).await?;
//! assert_eq!(response.status, 200);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod counter;
pub mod error;
pub mod factory;
pub mod file;
pub mod generators;
pub mod matcher;
pub mod observer;
pub mod path;
pub mod response;
pub mod route;
pub mod router;
pub mod store;

pub use config::{CompiledRouter, ConfigError, RouterConfig};
pub use counter::{CountPattern, RouteCounter};
pub use error::{DefinitionError, MockError, StatusError};
pub use factory::{ArraySize, Generator, MockDefinition, MockFactory};
pub use file::{file_response, FileDownload, FileMockOptions};
pub use matcher::{BodyMatcher, ValueMatcher};
pub use observer::{RecordingObserver, RouterObserver, RoutingEvent, TracingObserver};
pub use path::{match_path, PathMatch, PathMatchMode, PathParams, RouteTemplate};
pub use response::{
    Body, HttpEvent, HttpMethod, IntoReply, MockReply, MockRequest, MockResponse, Responder,
    ResponseStream,
};
pub use route::{route, CountBasedResponse, RouteRule};
pub use router::{Delay, FixedPassThrough, PassThrough, Router, RouterBuilder};
pub use store::{mock, mocks, Mock, Mocks};
