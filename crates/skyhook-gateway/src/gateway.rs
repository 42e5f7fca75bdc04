//! Gateway facade.
//!
//! Owns the wiring between storage, router, correlator, dialect
//! negotiation and the session manager, and is the only surface outer
//! layers talk to.

use crate::correlator::CommandCorrelator;
use crate::dialect::DialectNegotiator;
use crate::router::{TelemetrySink, TopicRouter};
use crate::session::{SessionManager, StatusStream};
use crate::transport::{MqttTransport, QosLevel, RumqttcTransport};
use serde_json::Value;
use skyhook_core::{
    topics, DeviceIdentity, Error, EventBus, EventBusReceiver, FilteredReceiver, GatewayConfig,
    GatewayEvent, Result, SessionState, SessionStats,
};
use skyhook_storage::TelemetryStore;
use std::sync::Arc;
use tracing::info;

pub struct Gateway {
    config: GatewayConfig,
    bus: EventBus,
    store: Arc<TelemetryStore>,
    correlator: Arc<CommandCorrelator>,
    router: Arc<TopicRouter>,
    session: Arc<SessionManager>,
    negotiator: DialectNegotiator,
}

impl Gateway {
    /// Build a gateway over the real MQTT transport.
    pub fn new(config: GatewayConfig, store: Arc<TelemetryStore>) -> Arc<Self> {
        Self::with_transport(config, store, Arc::new(RumqttcTransport))
    }

    /// Build a gateway over a custom transport. Tests use this to swap
    /// the broker for a scripted double.
    pub fn with_transport(
        config: GatewayConfig,
        store: Arc<TelemetryStore>,
        transport: Arc<dyn MqttTransport>,
    ) -> Arc<Self> {
        let bus = EventBus::with_name("gateway");
        let correlator = Arc::new(CommandCorrelator::new(config.command_timeout()));
        let router = TopicRouter::new(
            Arc::clone(&store) as Arc<dyn TelemetrySink>,
            Arc::clone(&correlator),
            bus.clone(),
        );
        let session = SessionManager::new(
            config.clone(),
            transport,
            Arc::clone(&router),
            bus.clone(),
        );
        let negotiator = DialectNegotiator::new(config.dialect_candidates.clone());

        Arc::new(Self {
            config,
            bus,
            store,
            correlator,
            router,
            session,
            negotiator,
        })
    }

    /// Start the broker session.
    ///
    /// Seeds the configured identity, registers the baseline
    /// subscriptions (topology, state and command-reply channels) and
    /// hands back the stream of state transitions. Configuration problems
    /// surface here, before any connection attempt.
    pub async fn start_session(&self) -> Result<StatusStream> {
        self.router.set_identity(self.config.identity.clone()).await;

        let mut baseline = vec![
            (topics::status_wildcard(), QosLevel::AtLeastOnce),
            (topics::state_wildcard(), QosLevel::AtMostOnce),
        ];
        for suffix in &self.config.dialect_candidates {
            baseline.push((topics::services_reply_wildcard(suffix), QosLevel::AtLeastOnce));
        }
        self.session.seed_subscriptions(&baseline).await;

        let stream = self.session.connect().await?;
        info!("gateway session starting");
        Ok(stream)
    }

    /// Stop the session: cancel in-flight commands, close the link and
    /// drop per-session caches. One teardown sequence, safe in any state.
    pub async fn stop_session(&self) {
        let cancelled = self.correlator.cancel_all().await;
        if cancelled > 0 {
            info!(cancelled, "cancelled in-flight commands");
        }
        self.session.disconnect().await;
        self.negotiator.reset().await;
        self.router.reset().await;
    }

    /// Send one command to the bridge and wait for its correlated reply.
    ///
    /// Needs a known device identity, either configured or discovered
    /// from topology; until then commands are rejected rather than sent
    /// blind.
    pub async fn send_command(&self, method: &str, data: Value) -> Result<Value> {
        let identity = self.router.identity().await.ok_or_else(|| {
            Error::config("device identity not known yet; configure serials or wait for topology")
        })?;
        let serial = identity
            .command_serial()
            .ok_or_else(|| Error::config("device identity carries no usable serial"))?
            .to_string();

        let dialect = self
            .negotiator
            .resolve(&self.correlator, &self.session, &identity)
            .await;
        let topic = topics::services(&serial, &dialect.suffix);
        self.correlator
            .send(&self.session, &topic, method, data, None)
            .await
    }

    /// Subscribe a telemetry topic pattern at QoS 0. The subscription
    /// survives reconnects for as long as the session lives.
    pub async fn subscribe_telemetry(&self, pattern: &str) -> Result<()> {
        self.session.subscribe(pattern, QosLevel::AtMostOnce).await
    }

    /// Decoded telemetry events only.
    pub fn telemetry_events(&self) -> FilteredReceiver<fn(&GatewayEvent) -> bool> {
        self.bus.filter().telemetry_events()
    }

    /// Session status transitions as bus events.
    pub fn status_events(&self) -> FilteredReceiver<fn(&GatewayEvent) -> bool> {
        self.bus.filter().status_events()
    }

    /// The full event feed.
    pub fn events(&self) -> EventBusReceiver {
        self.bus.subscribe()
    }

    pub fn status_stream(&self) -> StatusStream {
        self.session.status_stream()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub async fn stats(&self) -> SessionStats {
        self.session.stats().await
    }

    /// Identity in effect: configured, possibly enriched by discovery.
    pub async fn identity(&self) -> Option<DeviceIdentity> {
        self.router.identity().await
    }

    pub async fn pending_commands(&self) -> usize {
        self.correlator.pending_count().await
    }

    pub fn store(&self) -> &Arc<TelemetryStore> {
        &self.store
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}
