//! Broker session, wire codec and frame routing for the Skyhook fleet
//! gateway.
//!
//! The [`Gateway`] facade wires everything together: a [`SessionManager`]
//! drives the broker link and its reconnect policy, inbound frames flow
//! through the [`codec`] into the [`TopicRouter`], telemetry lands in the
//! store and on the event bus, and command replies are matched back to
//! their callers by the [`CommandCorrelator`].

pub mod codec;
pub mod correlator;
pub mod dialect;
pub mod gateway;
pub mod router;
pub mod session;
pub mod transport;

pub use codec::{decode, CommandEnvelope, CommandReply, Inbound, TopologyDevice, TopologyUpdate};
pub use correlator::CommandCorrelator;
pub use dialect::{CommandDialect, DialectNegotiator};
pub use gateway::Gateway;
pub use router::{TelemetrySink, TopicRouter};
pub use session::{SessionManager, StatusStream};
pub use transport::{LinkEvent, LinkEvents, LinkHandle, MqttTransport, QosLevel, RumqttcTransport};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
