//! Event bus for the gateway.
//!
//! All decoded traffic fans out through here. Consumers hold independent
//! receivers; dropping one cancels only that subscription and never
//! disturbs the others.

use crate::event::{EventMetadata, GatewayEvent};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Default channel capacity for the event bus.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Event bus for Skyhook.
///
/// The event bus uses a broadcast channel to distribute events to all
/// subscribers. It supports:
/// - Publishing events with automatic metadata generation
/// - Subscribing to all events
/// - Filtered subscriptions for specific event types
#[derive(Clone)]
pub struct EventBus {
    /// Broadcast channel sender
    tx: broadcast::Sender<(GatewayEvent, EventMetadata)>,
    /// Event bus name for identification
    name: String,
}

impl EventBus {
    /// Create a new event bus with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus with the specified capacity.
    ///
    /// The capacity determines how many events are buffered for slow subscribers.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            name: "default".to_string(),
        }
    }

    /// Create a new event bus with a name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            tx: broadcast::channel(DEFAULT_CHANNEL_CAPACITY).0,
            name: name.into(),
        }
    }

    /// Get the name of this event bus.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the number of current subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish an event with default metadata.
    ///
    /// The event is sent to all subscribers. If there are no subscribers,
    /// the event is discarded. Returns `true` if there was at least one
    /// subscriber.
    pub async fn publish(&self, event: GatewayEvent) -> bool {
        self.publish_with_source(event, "gateway").await
    }

    /// Publish an event with a custom source.
    pub async fn publish_with_source(
        &self,
        event: GatewayEvent,
        source: impl Into<String>,
    ) -> bool {
        let metadata = EventMetadata::new(source);
        let kind = event.type_name();
        let delivered = self.tx.send((event, metadata)).is_ok();
        if !delivered {
            trace!(bus = %self.name, event = kind, "event dropped, no subscribers");
        }
        delivered
    }

    /// Subscribe to all events.
    ///
    /// Returns a receiver that will receive all published events.
    /// If the subscriber falls behind, older events may be dropped.
    pub fn subscribe(&self) -> EventBusReceiver {
        EventBusReceiver {
            rx: self.tx.subscribe(),
        }
    }

    /// Subscribe to events matching a filter.
    ///
    /// The filter is a function that returns `true` for events to receive.
    /// Only matching events will be delivered through the returned receiver.
    pub fn subscribe_filtered<F>(&self, filter: F) -> FilteredReceiver<F>
    where
        F: Fn(&GatewayEvent) -> bool + Send + 'static,
    {
        let rx = self.tx.subscribe();
        FilteredReceiver::new(rx, filter)
    }

    /// Create a filtered subscription helper for common patterns.
    pub fn filter(&self) -> FilterBuilder {
        FilterBuilder {
            tx: self.tx.clone(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver for all events from the event bus.
pub struct EventBusReceiver {
    rx: broadcast::Receiver<(GatewayEvent, EventMetadata)>,
}

impl EventBusReceiver {
    /// Receive the next event.
    ///
    /// Returns `None` if the event bus is closed.
    pub async fn recv(&mut self) -> Option<(GatewayEvent, EventMetadata)> {
        match self.rx.recv().await {
            Ok(event) => Some(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                // We missed some events, but can continue receiving
                debug!(skipped, "event receiver lagged, skipping ahead");
                self.rx.try_recv().ok()
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// Try to receive an event without blocking.
    pub fn try_recv(&mut self) -> Option<(GatewayEvent, EventMetadata)> {
        self.rx.try_recv().ok()
    }
}

/// Receiver for filtered events from the event bus.
pub struct FilteredReceiver<F>
where
    F: Fn(&GatewayEvent) -> bool + Send,
{
    rx: broadcast::Receiver<(GatewayEvent, EventMetadata)>,
    filter: F,
}

impl<F> FilteredReceiver<F>
where
    F: Fn(&GatewayEvent) -> bool + Send,
{
    fn new(rx: broadcast::Receiver<(GatewayEvent, EventMetadata)>, filter: F) -> Self {
        Self { rx, filter }
    }

    /// Receive the next event matching the filter.
    ///
    /// Returns `None` if the event bus is closed.
    pub async fn recv(&mut self) -> Option<(GatewayEvent, EventMetadata)> {
        loop {
            match self.rx.recv().await {
                Ok((event, meta)) => {
                    if (self.filter)(&event) {
                        return Some((event, meta));
                    }
                    // Event didn't match filter, continue waiting
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "event receiver lagged, skipping ahead");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to receive a matching event without blocking.
    pub fn try_recv(&mut self) -> Option<(GatewayEvent, EventMetadata)> {
        while let Ok((event, meta)) = self.rx.try_recv() {
            if (self.filter)(&event) {
                return Some((event, meta));
            }
        }
        None
    }
}

/// Builder for creating filtered subscriptions.
pub struct FilterBuilder {
    tx: broadcast::Sender<(GatewayEvent, EventMetadata)>,
}

impl FilterBuilder {
    /// Subscribe to telemetry events only.
    pub fn telemetry_events(&self) -> FilteredReceiver<fn(&GatewayEvent) -> bool> {
        let rx = self.tx.subscribe();
        FilteredReceiver::new(rx, GatewayEvent::is_telemetry)
    }

    /// Subscribe to session status events only.
    pub fn status_events(&self) -> FilteredReceiver<fn(&GatewayEvent) -> bool> {
        let rx = self.tx.subscribe();
        FilteredReceiver::new(rx, GatewayEvent::is_status)
    }

    /// Subscribe to topology events only.
    pub fn topology_events(&self) -> FilteredReceiver<fn(&GatewayEvent) -> bool> {
        let rx = self.tx.subscribe();
        FilteredReceiver::new(rx, GatewayEvent::is_topology)
    }

    /// Subscribe to telemetry from one device.
    pub fn telemetry_for(
        &self,
        serial: impl Into<String>,
    ) -> FilteredReceiver<impl Fn(&GatewayEvent) -> bool + Send + 'static> {
        let target = serial.into();
        let rx = self.tx.subscribe();
        FilteredReceiver::new(rx, move |event| {
            matches!(event, GatewayEvent::Telemetry { serial, .. } if serial == &target)
        })
    }

    /// Subscribe with a custom filter function.
    pub fn custom<F>(&self, filter: F) -> FilteredReceiver<F>
    where
        F: Fn(&GatewayEvent) -> bool + Send + 'static,
    {
        let rx = self.tx.subscribe();
        FilteredReceiver::new(rx, filter)
    }
}

/// Shared event bus handle.
pub type SharedEventBus = Arc<EventBus>;
