//! Core types for Skyhook.
//!
//! This crate defines the foundational abstractions used across the project:
//! the shared error type, gateway configuration, device identity, the
//! telemetry data model and the event bus everything fans out on.

pub mod config;
pub mod error;
pub mod event;
pub mod eventbus;
pub mod identity;
pub mod session;
pub mod telemetry;

pub use config::{BrokerConfig, GatewayConfig, ReconnectPolicy, env_vars};
pub use error::{Error, Result};
pub use identity::{DeviceIdentity, topics};
pub use session::{SessionState, SessionStats};
pub use telemetry::TelemetrySample;

// Event exports
pub use event::{EventMetadata, GatewayEvent};

// Event bus exports
pub use eventbus::{
    DEFAULT_CHANNEL_CAPACITY, EventBus, EventBusReceiver, FilterBuilder, FilteredReceiver,
    SharedEventBus,
};

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::config::{BrokerConfig, GatewayConfig, ReconnectPolicy, env_vars};
    pub use crate::error::{Error, Result};
    pub use crate::event::{EventMetadata, GatewayEvent};
    pub use crate::eventbus::{EventBus, SharedEventBus};
    pub use crate::identity::{DeviceIdentity, topics};
    pub use crate::session::{SessionState, SessionStats};
    pub use crate::telemetry::TelemetrySample;
}

/// Version of the core crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
