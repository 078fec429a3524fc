//! Routing event sink.
//!
//! The router reports each decision to a [`RouterObserver`]. The default
//! observer writes them through `tracing`; tests can install a
//! [`RecordingObserver`] and assert on the sequence instead.

use crate::response::HttpMethod;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A routing decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingEvent {
    /// A rule was selected
    Matched {
        method: HttpMethod,
        url: String,
        template: String,
        count: Option<u64>,
    },
    /// Delay scheduled before the first emitted item
    Delayed { url: String, delay: Duration },
    /// No rule matched and the no-match policy answered
    NoMatch { method: HttpMethod, url: String },
    /// No rule matched and the request went to the pass-through handler
    PassThrough { method: HttpMethod, url: String },
}

pub trait RouterObserver: Send + Sync {
    fn on_event(&self, event: &RoutingEvent);
}

/// Logs routing events with `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl RouterObserver for TracingObserver {
    fn on_event(&self, event: &RoutingEvent) {
        match event {
            RoutingEvent::Matched {
                method,
                url,
                template,
                count,
            } => info!(%method, %url, %template, ?count, "Request matched route"),
            RoutingEvent::Delayed { url, delay } => {
                debug!(%url, delay_ms = delay.as_millis() as u64, "Applying delay")
            }
            RoutingEvent::NoMatch { method, url } => {
                warn!(%method, %url, "No matching route, using no-match policy")
            }
            RoutingEvent::PassThrough { method, url } => {
                debug!(%method, %url, "No matching route, passing through")
            }
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default, Clone)]
pub struct RecordingObserver {
    events: Arc<Mutex<Vec<RoutingEvent>>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RoutingEvent> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl RouterObserver for RecordingObserver {
    fn on_event(&self, event: &RoutingEvent) {
        self.events.lock().push(event.clone());
    }
}
