//! Outbound delivery queue for the router path
//!
//! Forwards are kept in process memory in arrival order. Each call to
//! [`OutboundQueue::drain_once`] delivers at most one of them, and only one
//! drain runs at a time, so a [`PeriodicTask`](crate::periodic::PeriodicTask)
//! firing every second caps throughput at one message per second.
//!
//! Failed forwards are logged and discarded. Nothing survives a restart.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::credentials::CredentialResolver;
use crate::destination::DestinationSender;
use crate::events::{EngineEvent, EventBus};
use crate::periodic::Job;
use crate::store::RouteStore;
use crate::types::Route;

/// One formatted message waiting for delivery
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedForward {
    /// Route as it was when the event was matched
    pub route: Route,
    pub text: String,
    pub source_message_id: Option<String>,
}

/// Result of a single drain attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Nothing was queued
    Idle,
    /// Another drain is still in flight
    Busy,
    Delivered { route_id: String },
    Failed { route_id: String, error: String },
}

pub struct OutboundQueue {
    pending: Mutex<VecDeque<QueuedForward>>,
    draining: AtomicBool,
    max_pending: Option<usize>,
    routes: Arc<dyn RouteStore>,
    credentials: Arc<dyn CredentialResolver>,
    sender: Arc<dyn DestinationSender>,
    events: EventBus,
}

/// Clears the single-flight flag even when a drain is cancelled mid-send
struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl OutboundQueue {
    pub fn new(
        routes: Arc<dyn RouteStore>,
        credentials: Arc<dyn CredentialResolver>,
        sender: Arc<dyn DestinationSender>,
    ) -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
            max_pending: None,
            routes,
            credentials,
            sender,
            events: EventBus::default(),
        }
    }

    /// Bound the queue; forwards arriving while it is full are dropped
    pub fn with_max_pending(mut self, max_pending: Option<usize>) -> Self {
        self.max_pending = max_pending;
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Append a forward; returns `false` when it was dropped because the
    /// queue is full
    pub async fn enqueue(&self, forward: QueuedForward) -> bool {
        let route_id = forward.route.id.clone();
        let queue_len = {
            let mut pending = self.pending.lock().await;
            if let Some(max) = self.max_pending {
                if pending.len() >= max {
                    warn!(
                        route_id = %route_id,
                        max_pending = max,
                        "outbound queue full, dropping forward"
                    );
                    drop(pending);
                    self.events.emit(EngineEvent::ForwardDropped { route_id });
                    return false;
                }
            }
            pending.push_back(forward);
            pending.len()
        };

        debug!(route_id = %route_id, queue_len, "forward queued");
        self.events.emit(EngineEvent::ForwardQueued { route_id, queue_len });
        true
    }

    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pending.lock().await.is_empty()
    }

    /// Deliver the oldest queued forward, if no other drain is in flight
    pub async fn drain_once(&self) -> DrainOutcome {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("drain already in flight, skipping");
            return DrainOutcome::Busy;
        }
        let _guard = FlightGuard(&self.draining);

        let Some(forward) = self.pending.lock().await.pop_front() else {
            return DrainOutcome::Idle;
        };
        let route_id = forward.route.id.clone();

        let result = self.deliver(&forward).await;
        self.record_outcome(&forward, result.as_ref().err()).await;

        match result {
            Ok(()) => {
                info!(route_id = %route_id, route = %forward.route.name, "forward delivered");
                self.events.emit(EngineEvent::ForwardDelivered {
                    route_id: route_id.clone(),
                });
                DrainOutcome::Delivered { route_id }
            }
            Err(error) => {
                warn!(route_id = %route_id, route = %forward.route.name, error = %error, "forward failed, discarding");
                self.events.emit(EngineEvent::ForwardFailed {
                    route_id: route_id.clone(),
                    error: error.clone(),
                });
                DrainOutcome::Failed { route_id, error }
            }
        }
    }

    async fn deliver(&self, forward: &QueuedForward) -> Result<(), String> {
        let token = self
            .credentials
            .decrypt(&forward.route.credential)
            .await
            .map_err(|e| e.to_string())?;

        self.sender
            .send(&token, &forward.text)
            .await
            .map_err(|e| e.to_string())
    }

    /// Apply the delivery outcome to the route's current stored state
    async fn record_outcome(&self, forward: &QueuedForward, error: Option<&String>) {
        let route_id = &forward.route.id;
        let mut route = match self.routes.get(route_id).await {
            Ok(Some(route)) => route,
            Ok(None) => {
                debug!(route_id = %route_id, "route deleted since enqueue, skipping bookkeeping");
                return;
            }
            Err(e) => {
                warn!(route_id = %route_id, error = %e, "failed to load route for bookkeeping");
                return;
            }
        };

        let now = Utc::now();
        match error {
            None => route.record_success(now, forward.source_message_id.as_deref()),
            Some(error) => route.record_failure(now, error),
        }

        if let Err(e) = self.routes.update(&route).await {
            warn!(route_id = %route_id, error = %e, "failed to persist route bookkeeping");
        }
    }
}

#[async_trait]
impl Job for OutboundQueue {
    fn name(&self) -> &'static str {
        "outbound-queue"
    }

    async fn run(&self) {
        self.drain_once().await;
    }
}
