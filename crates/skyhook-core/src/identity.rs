//! Device identity and topic layout.
//!
//! A gateway session talks to one physical bridge (remote controller or
//! dock) which fronts an aircraft. Serial numbers identify the parties and
//! drive the per-device topic layout.

use serde::{Deserialize, Serialize};

/// Serial numbers of the devices behind a session.
///
/// Any field may be absent: a dock without a paired aircraft reports no
/// aircraft serial, a direct aircraft link has no remote controller.
/// Absent fields are back-filled once from the first topology update of
/// the session; values injected via configuration are never overwritten.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Aircraft serial number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aircraft_serial: Option<String>,

    /// Gateway (dock or remote controller bridge) serial number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_serial: Option<String>,

    /// Remote controller serial number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_controller_serial: Option<String>,
}

impl DeviceIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the aircraft serial.
    pub fn with_aircraft(mut self, serial: impl Into<String>) -> Self {
        self.aircraft_serial = Some(serial.into());
        self
    }

    /// Set the gateway serial.
    pub fn with_gateway(mut self, serial: impl Into<String>) -> Self {
        self.gateway_serial = Some(serial.into());
        self
    }

    /// Set the remote controller serial.
    pub fn with_remote_controller(mut self, serial: impl Into<String>) -> Self {
        self.remote_controller_serial = Some(serial.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.aircraft_serial.is_none()
            && self.gateway_serial.is_none()
            && self.remote_controller_serial.is_none()
    }

    /// Serial commands are addressed to. The gateway fronts the aircraft,
    /// so its serial wins when both are known.
    pub fn command_serial(&self) -> Option<&str> {
        self.gateway_serial
            .as_deref()
            .or(self.aircraft_serial.as_deref())
    }

    /// Fill absent fields from `other` without touching present ones.
    pub fn merge_missing(&mut self, other: &DeviceIdentity) {
        if self.aircraft_serial.is_none() {
            self.aircraft_serial = other.aircraft_serial.clone();
        }
        if self.gateway_serial.is_none() {
            self.gateway_serial = other.gateway_serial.clone();
        }
        if self.remote_controller_serial.is_none() {
            self.remote_controller_serial = other.remote_controller_serial.clone();
        }
    }
}

/// Per-device topic layout: `thing/product/{serial}/{channel}`.
pub mod topics {
    pub const PRODUCT_PREFIX: &str = "thing/product";

    /// Telemetry channel for one device.
    pub fn osd(serial: &str) -> String {
        format!("{}/{}/osd", PRODUCT_PREFIX, serial)
    }

    /// Telemetry channel for every device.
    pub fn osd_wildcard() -> String {
        format!("{}/+/osd", PRODUCT_PREFIX)
    }

    /// Property/state report channel for every device.
    pub fn state_wildcard() -> String {
        format!("{}/+/state", PRODUCT_PREFIX)
    }

    /// Topology announcement channel for every device.
    pub fn status_wildcard() -> String {
        format!("{}/+/status", PRODUCT_PREFIX)
    }

    /// Command request channel. `suffix` is the negotiated dialect
    /// (`services`, `commands`, ...).
    pub fn services(serial: &str, suffix: &str) -> String {
        format!("{}/{}/{}", PRODUCT_PREFIX, serial, suffix)
    }

    /// Command reply channel matching [`services`].
    pub fn services_reply(serial: &str, suffix: &str) -> String {
        format!("{}/{}/{}_reply", PRODUCT_PREFIX, serial, suffix)
    }

    /// Command reply channel for every device.
    pub fn services_reply_wildcard(suffix: &str) -> String {
        format!("{}/+/{}_reply", PRODUCT_PREFIX, suffix)
    }

    /// Extract the device serial from a per-device topic.
    pub fn device_serial(topic: &str) -> Option<&str> {
        let rest = topic.strip_prefix(PRODUCT_PREFIX)?.strip_prefix('/')?;
        let serial = rest.split('/').next()?;
        if serial.is_empty() || serial == "+" {
            None
        } else {
            Some(serial)
        }
    }
}
