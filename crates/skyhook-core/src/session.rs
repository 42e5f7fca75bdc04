//! Session state machine shared across the workspace.

/// Broker session state.
///
/// Transitions are driven by the session manager:
/// `Disconnected -> Connecting` on connect, `Connecting -> Connected` on
/// broker acknowledgement, `Connecting | Connected -> Reconnecting` on
/// transport loss, `Reconnecting -> Connected` on a successful retry and
/// `Reconnecting -> Failed` once the retry budget is exhausted. `Failed`
/// is terminal until the next explicit connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SessionState {
    /// No session established
    Disconnected,
    /// First connection attempt in flight
    Connecting,
    /// Link is up and traffic flows
    Connected,
    /// Link lost, retrying with backoff
    Reconnecting,
    /// Retry budget exhausted
    Failed,
}

impl SessionState {
    /// True while a session driver is alive (connected or trying to be).
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected | Self::Reconnecting)
    }

    /// True only when outbound traffic is accepted.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Session traffic counters.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SessionStats {
    /// Frames received from the broker.
    pub frames_received: u64,

    /// Frames published to the broker.
    pub frames_published: u64,

    /// Number of reconnects.
    pub reconnect_count: u64,

    /// Last activity timestamp (milliseconds).
    pub last_activity: i64,
}

impl Default for SessionStats {
    fn default() -> Self {
        Self {
            frames_received: 0,
            frames_published: 0,
            reconnect_count: 0,
            last_activity: chrono::Utc::now().timestamp_millis(),
        }
    }
}

impl SessionStats {
    pub fn record_received(&mut self) {
        self.frames_received += 1;
        self.touch();
    }

    pub fn record_published(&mut self) {
        self.frames_published += 1;
        self.touch();
    }

    pub fn record_reconnect(&mut self) {
        self.reconnect_count += 1;
        self.touch();
    }

    fn touch(&mut self) {
        self.last_activity = chrono::Utc::now().timestamp_millis();
    }
}
