// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Pub/Sub for Aggregator Events
//
// Provides in-memory event streaming using tokio broadcast channels.
// Observers (CLI, tests, accounting) subscribe to request lifecycle events.
// In-memory only: events are dropped when nobody listens.

use crate::domain::command::RequestHandle;
use crate::domain::events::AggregatorEvent;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{trace, warn};

/// Event bus for publishing and subscribing to aggregator events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<AggregatorEvent>>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity
    /// Capacity determines how many events can be buffered before dropping old ones
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create event bus with default capacity (1000)
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: AggregatorEvent) {
        // send() only fails when there are no receivers
        if self.sender.send(event).is_err() {
            trace!("No subscribers listening to event");
        }
    }

    /// Subscribe to all aggregator events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to events of a single request
    pub fn subscribe_request(&self, request_id: RequestHandle) -> RequestEventReceiver {
        RequestEventReceiver {
            receiver: self.sender.subscribe(),
            request_id,
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Receiver for all aggregator events
pub struct EventReceiver {
    receiver: broadcast::Receiver<AggregatorEvent>,
}

impl EventReceiver {
    /// Receive the next event (waits until one is available)
    pub async fn recv(&mut self) -> Result<AggregatorEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<AggregatorEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Receiver for events of one request (filtered)
pub struct RequestEventReceiver {
    receiver: broadcast::Receiver<AggregatorEvent>,
    request_id: RequestHandle,
}

impl RequestEventReceiver {
    /// Receive the next event for the subscribed request,
    /// skipping events from other requests
    pub async fn recv(&mut self) -> Result<AggregatorEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if event.request_id() == self.request_id {
                return Ok(event);
            }
        }
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn received(request_id: RequestHandle) -> AggregatorEvent {
        AggregatorEvent::CommandReceived {
            request_id,
            command: "ten_event".to_string(),
            received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        let request_id = RequestHandle::new();
        event_bus.publish(received(request_id));

        match receiver.recv().await.unwrap() {
            AggregatorEvent::CommandReceived { request_id: id, command, .. } => {
                assert_eq!(id, request_id);
                assert_eq!(command, "ten_event");
            }
            other => panic!("Wrong event type received: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_request_event_filtering() {
        let event_bus = EventBus::new(10);
        let request_id = RequestHandle::new();
        let mut receiver = event_bus.subscribe_request(request_id);

        // Event for a different request is skipped
        event_bus.publish(received(RequestHandle::new()));
        event_bus.publish(received(request_id));

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.request_id(), request_id);
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let event_bus = EventBus::new(10);
        let mut receiver1 = event_bus.subscribe();
        let mut receiver2 = event_bus.subscribe();
        assert_eq!(event_bus.subscriber_count(), 2);

        event_bus.publish(received(RequestHandle::new()));

        assert!(receiver1.recv().await.is_ok());
        assert!(receiver2.recv().await.is_ok());
    }

    #[test]
    fn test_try_recv_empty_and_lagged() {
        let event_bus = EventBus::new(2);
        let mut receiver = event_bus.subscribe();
        assert!(matches!(receiver.try_recv(), Err(EventBusError::Empty)));

        for _ in 0..5 {
            event_bus.publish(received(RequestHandle::new()));
        }
        assert!(matches!(receiver.try_recv(), Err(EventBusError::Lagged(3))));
        assert!(receiver.try_recv().is_ok());
    }

    #[test]
    fn test_publish_without_subscribers() {
        let event_bus = EventBus::default();
        event_bus.publish(received(RequestHandle::new()));
        assert_eq!(event_bus.subscriber_count(), 0);
    }
}
