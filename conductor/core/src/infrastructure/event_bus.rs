// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Pub/Sub for Query Events
//
// Provides in-memory event streaming using tokio broadcast channels.
// Lets the CLI and tests follow a query through the pipeline.
//
// In-memory only: events published while nobody listens are dropped.

use crate::domain::events::QueryEvent;
use crate::domain::query::QueryId;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Event bus for publishing and subscribing to query events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<QueryEvent>>,
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

    /// Publish a query event to all subscribers
    pub fn publish_query_event(&self, event: QueryEvent) {
        debug!("Publishing event: {:?}", event);

        // send() fails only when there are no receivers
        let receiver_count = self.sender.send(event).unwrap_or(0);

        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }

    /// Subscribe to all query events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe and filter for a single query
    pub fn subscribe_query(&self, query_id: QueryId) -> QueryEventReceiver {
        QueryEventReceiver {
            receiver: self.sender.subscribe(),
            query_id,
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
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

/// Receiver for all query events
pub struct EventReceiver {
    receiver: broadcast::Receiver<QueryEvent>,
}

impl EventReceiver {
    /// Receive the next event (waits until one is available)
    pub async fn recv(&mut self) -> Result<QueryEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<QueryEvent, EventBusError> {
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

/// Receiver for the events of one query (filtered)
pub struct QueryEventReceiver {
    receiver: broadcast::Receiver<QueryEvent>,
    query_id: QueryId,
}

impl QueryEventReceiver {
    /// Receive the next event for the watched query, skipping all others
    pub async fn recv(&mut self) -> Result<QueryEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if event.query_id() == &self.query_id {
                return Ok(event);
            }
        }
    }

    /// Wait for the event that closes the query
    pub async fn wait_terminal(&mut self) -> Result<QueryEvent, EventBusError> {
        loop {
            let event = self.recv().await?;
            if event.is_terminal() {
                return Ok(event);
            }
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

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        let query_id = QueryId::new();
        event_bus.publish_query_event(QueryEvent::QueryCreated {
            query_id: query_id.clone(),
            is_encrypted: false,
            created_at: Utc::now(),
        });

        match receiver.recv().await.unwrap() {
            QueryEvent::QueryCreated { query_id: id, .. } => assert_eq!(id, query_id),
            other => panic!("Wrong event type received: {other:?}"),
        }
        assert!(matches!(receiver.try_recv(), Err(EventBusError::Empty)));
    }

    #[tokio::test]
    async fn test_query_event_filtering() {
        let event_bus = EventBus::new(10);
        let query_id = QueryId::new();
        let mut receiver = event_bus.subscribe_query(query_id.clone());

        // Event for another query is filtered out
        event_bus.publish_query_event(QueryEvent::QueryCompleted {
            query_id: QueryId::new(),
            completed_at: Utc::now(),
        });
        event_bus.publish_query_event(QueryEvent::TargetsResolved {
            query_id: query_id.clone(),
            target_count: 3,
            resolved_at: Utc::now(),
        });
        event_bus.publish_query_event(QueryEvent::QueryFailed {
            query_id: query_id.clone(),
            reason: "boom".to_string(),
            failed_at: Utc::now(),
        });

        match receiver.recv().await.unwrap() {
            QueryEvent::TargetsResolved { target_count, .. } => assert_eq!(target_count, 3),
            other => panic!("Wrong event type received: {other:?}"),
        }
        match receiver.wait_terminal().await.unwrap() {
            QueryEvent::QueryFailed { reason, .. } => assert_eq!(reason, "boom"),
            other => panic!("Wrong event type received: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let event_bus = EventBus::new(10);
        let mut receiver1 = event_bus.subscribe();
        let mut receiver2 = event_bus.subscribe();

        assert_eq!(event_bus.subscriber_count(), 2);

        event_bus.publish_query_event(QueryEvent::QueryCancelled {
            query_id: QueryId::new(),
            cancelled_at: Utc::now(),
        });

        // Both receivers should get the event
        let _ = receiver1.recv().await.unwrap();
        let _ = receiver2.recv().await.unwrap();
    }
}
