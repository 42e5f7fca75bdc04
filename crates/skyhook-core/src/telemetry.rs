//! Telemetry data model.

use serde::{Deserialize, Serialize};

/// One decoded telemetry observation from a device.
///
/// `timestamp` is the device-reported time, `received_at` is stamped by
/// the gateway when the frame arrives; both are unix milliseconds. Fields
/// the frame did not carry stay `None`, nothing is invented.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// Device-reported timestamp (milliseconds).
    pub timestamp: i64,

    /// Latitude in degrees.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,

    /// Longitude in degrees.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,

    /// Altitude above takeoff in meters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,

    /// Absolute elevation in meters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elevation: Option<f64>,

    /// Pitch in degrees.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attitude_pitch: Option<f64>,

    /// Roll in degrees.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attitude_roll: Option<f64>,

    /// Heading in degrees.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attitude_heading: Option<f64>,

    /// Ground speed in m/s.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub horizontal_speed: Option<f64>,

    /// Climb rate in m/s.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vertical_speed: Option<f64>,

    /// Gateway receive timestamp (milliseconds).
    pub received_at: i64,
}

impl TelemetrySample {
    /// Create an empty sample with the given timestamps.
    pub fn new(timestamp: i64, received_at: i64) -> Self {
        Self {
            timestamp,
            latitude: None,
            longitude: None,
            altitude: None,
            elevation: None,
            attitude_pitch: None,
            attitude_roll: None,
            attitude_heading: None,
            horizontal_speed: None,
            vertical_speed: None,
            received_at,
        }
    }

    /// True when the sample carries a usable position fix.
    pub fn has_position(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }
}
