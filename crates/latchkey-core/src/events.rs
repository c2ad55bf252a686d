//! Token lifecycle events and the sinks that receive them
//!
//! Events are emitted synchronously, after the registry's indices reflect
//! the change and after the registry lock has been released. The core only
//! emits; subscribers decide what to do with them.

use crate::identifiers::PrincipalId;
use crate::token::Token;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;

/// A lifecycle notification for one token
#[derive(Debug, Clone)]
pub enum TokenEvent {
    /// The token was registered as a fresh claim
    Started {
        /// Token that started
        token: Token,
    },
    /// The token was explicitly ended (not fired for natural expiry)
    Ended {
        /// Token that ended
        token: Token,
    },
    /// A shared lock gained or lost principals
    PrincipalsChanged {
        /// Token whose membership changed
        token: Token,
        /// Membership before the change
        old: BTreeSet<PrincipalId>,
    },
    /// The token's expiration moved
    ExpirationChanged {
        /// Token whose expiration changed
        token: Token,
        /// Expiration before the change
        old: Option<DateTime<Utc>>,
    },
}

impl TokenEvent {
    /// Token the event is about
    pub fn token(&self) -> &Token {
        match self {
            TokenEvent::Started { token }
            | TokenEvent::Ended { token }
            | TokenEvent::PrincipalsChanged { token, .. }
            | TokenEvent::ExpirationChanged { token, .. } => token,
        }
    }

    /// Short stable name, used in logs
    pub fn name(&self) -> &'static str {
        match self {
            TokenEvent::Started { .. } => "token_started",
            TokenEvent::Ended { .. } => "token_ended",
            TokenEvent::PrincipalsChanged { .. } => "principals_changed",
            TokenEvent::ExpirationChanged { .. } => "expiration_changed",
        }
    }
}

/// Receiver of token lifecycle events
pub trait EventSink: Send + Sync + fmt::Debug {
    /// Deliver one event
    fn notify(&self, event: &TokenEvent);
}

impl<T: EventSink + ?Sized> EventSink for Arc<T> {
    fn notify(&self, event: &TokenEvent) {
        (**self).notify(event);
    }
}

/// Sink that drops every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn notify(&self, _event: &TokenEvent) {}
}

/// Sink that records each event as a debug-level trace
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn notify(&self, event: &TokenEvent) {
        let token = event.token();
        tracing::debug!(
            event = event.name(),
            token_id = %token.id(),
            target = %token.target(),
            kind = %token.kind(),
            "Token lifecycle event"
        );
    }
}

/// Sink that fans events out to broadcast subscribers
///
/// Slow subscribers lag and lose the oldest events; the sink itself never
/// blocks the registry.
#[derive(Debug, Clone)]
pub struct BroadcastEventSink {
    sender: broadcast::Sender<TokenEvent>,
}

impl BroadcastEventSink {
    /// Create a sink buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<TokenEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl EventSink for BroadcastEventSink {
    fn notify(&self, event: &TokenEvent) {
        // No subscribers is not an error.
        let _ = self.sender.send(event.clone());
    }
}

/// Sink forwarding every event to several sinks, in order
#[derive(Debug, Clone, Default)]
pub struct FanoutEventSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutEventSink {
    /// Create an empty fan-out
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a downstream sink
    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Number of downstream sinks
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Whether no sinks are attached
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for FanoutEventSink {
    fn notify(&self, event: &TokenEvent) {
        for sink in &self.sinks {
            sink.notify(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Token;
    use parking_lot::Mutex;

    #[derive(Debug, Default)]
    struct Counter(Mutex<Vec<&'static str>>);

    impl EventSink for Counter {
        fn notify(&self, event: &TokenEvent) {
            self.0.lock().push(event.name());
        }
    }

    fn sample_event() -> TokenEvent {
        let token = Token::freeze("vault");
        TokenEvent::Started { token }
    }

    #[test]
    fn fanout_forwards_to_every_sink() {
        let first = Arc::new(Counter::default());
        let second = Arc::new(Counter::default());
        let fanout = FanoutEventSink::new()
            .with(first.clone())
            .with(second.clone());

        fanout.notify(&sample_event());

        assert_eq!(fanout.len(), 2);
        assert_eq!(*first.0.lock(), vec!["token_started"]);
        assert_eq!(*second.0.lock(), vec!["token_started"]);
    }

    #[test]
    fn broadcast_delivers_to_subscribers() {
        let sink = BroadcastEventSink::new(8);
        let mut rx = sink.subscribe();
        assert_eq!(sink.subscriber_count(), 1);

        let event = sample_event();
        sink.notify(&event);

        let received = rx.try_recv().unwrap();
        assert_eq!(received.token(), event.token());
        assert_eq!(received.name(), "token_started");
    }

    #[test]
    fn broadcast_without_subscribers_is_silent() {
        let sink = BroadcastEventSink::new(1);
        sink.notify(&sample_event());
    }
}
