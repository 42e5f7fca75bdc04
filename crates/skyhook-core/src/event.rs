//! Unified event types for the gateway.
//!
//! This module defines all events that flow through the event bus.
//! Consumers subscribe to the feeds they care about and stay decoupled
//! from the session machinery.

use crate::session::SessionState;
use crate::telemetry::TelemetrySample;
use serde::{Deserialize, Serialize};

/// Unified event type for Skyhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GatewayEvent {
    /// Session state transition
    SessionStatus {
        state: SessionState,
        timestamp: i64,
    },

    /// Decoded telemetry observation (core event!)
    ///
    /// This is the primary event that drives live maps and downstream
    /// consumers. The same sample is persisted in the telemetry store.
    Telemetry {
        serial: String,
        sample: TelemetrySample,
        timestamp: i64,
    },

    /// Property/state report that carried no telemetry fields
    PropertyReport {
        serial: String,
        values: serde_json::Value,
        timestamp: i64,
    },

    /// Device topology changed
    TopologyChanged {
        #[serde(skip_serializing_if = "Option::is_none")]
        gateway_serial: Option<String>,
        device_serials: Vec<String>,
        timestamp: i64,
    },

    /// Telemetry persistence failed; the sample was still delivered live
    StorageFailure {
        serial: String,
        error: String,
        timestamp: i64,
    },
}

impl GatewayEvent {
    /// Get the event type name as a string.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::SessionStatus { .. } => "SessionStatus",
            Self::Telemetry { .. } => "Telemetry",
            Self::PropertyReport { .. } => "PropertyReport",
            Self::TopologyChanged { .. } => "TopologyChanged",
            Self::StorageFailure { .. } => "StorageFailure",
        }
    }

    /// Get the timestamp of this event.
    pub fn timestamp(&self) -> i64 {
        match self {
            Self::SessionStatus { timestamp, .. }
            | Self::Telemetry { timestamp, .. }
            | Self::PropertyReport { timestamp, .. }
            | Self::TopologyChanged { timestamp, .. }
            | Self::StorageFailure { timestamp, .. } => *timestamp,
        }
    }

    pub fn is_telemetry(&self) -> bool {
        matches!(self, Self::Telemetry { .. })
    }

    pub fn is_status(&self) -> bool {
        matches!(self, Self::SessionStatus { .. })
    }

    pub fn is_topology(&self) -> bool {
        matches!(self, Self::TopologyChanged { .. })
    }
}

/// Event metadata.
///
/// Attached to each event for tracking and correlation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique event ID
    pub event_id: String,
    /// Event source (component that published)
    pub source: String,
    /// Event timestamp
    pub timestamp: i64,
}

impl EventMetadata {
    /// Create new event metadata.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            source: source.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}
