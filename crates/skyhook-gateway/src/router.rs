//! Inbound frame routing.
//!
//! Every frame the session receives lands here exactly once. Telemetry is
//! persisted and fanned out on the bus, replies go to the correlator, and
//! repeated identical topology announcements collapse into one event.

use crate::codec::{self, Inbound, TopologyUpdate};
use crate::correlator::CommandCorrelator;
use async_trait::async_trait;
use chrono::Utc;
use skyhook_core::{topics, DeviceIdentity, EventBus, GatewayEvent, TelemetrySample};
use skyhook_storage::TelemetryStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info};

/// Destination for routed telemetry samples.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn append(&self, serial: &str, sample: &TelemetrySample) -> skyhook_storage::Result<()>;
}

#[async_trait]
impl TelemetrySink for TelemetryStore {
    async fn append(&self, serial: &str, sample: &TelemetrySample) -> skyhook_storage::Result<()> {
        TelemetryStore::append(self, serial, sample).await
    }
}

pub struct TopicRouter {
    store: Arc<dyn TelemetrySink>,
    correlator: Arc<CommandCorrelator>,
    bus: EventBus,
    /// Latest announced topology per gateway serial, for change detection.
    topology: Mutex<HashMap<String, TopologyUpdate>>,
    /// Session identity: injected from config, otherwise discovered from
    /// the first topology announcement and then kept stable.
    identity: RwLock<Option<DeviceIdentity>>,
}

impl TopicRouter {
    pub fn new(
        store: Arc<dyn TelemetrySink>,
        correlator: Arc<CommandCorrelator>,
        bus: EventBus,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            correlator,
            bus,
            topology: Mutex::new(HashMap::new()),
            identity: RwLock::new(None),
        })
    }

    pub async fn identity(&self) -> Option<DeviceIdentity> {
        self.identity.read().await.clone()
    }

    pub async fn set_identity(&self, identity: Option<DeviceIdentity>) {
        *self.identity.write().await = identity;
    }

    /// Forget per-session caches: known topology and discovered identity.
    pub async fn reset(&self) {
        self.topology.lock().await.clear();
        *self.identity.write().await = None;
    }

    /// Route one raw frame.
    ///
    /// Never fails: unclassifiable frames are logged and dropped, storage
    /// errors are logged and reported on the bus, and the pipeline keeps
    /// going either way.
    pub async fn dispatch(&self, topic: &str, payload: &[u8]) {
        let received_at = Utc::now().timestamp_millis();
        match codec::decode(payload, received_at) {
            Inbound::Topology(update) => self.handle_topology(update, received_at).await,
            Inbound::Osd { serial, sample } => {
                let serial = self.frame_serial(topic, serial).await;
                self.handle_sample(serial, sample, received_at).await;
            }
            Inbound::Property {
                serial,
                values,
                timestamp,
            } => {
                let serial = self.frame_serial(topic, serial).await;
                self.bus
                    .publish_with_source(
                        GatewayEvent::PropertyReport {
                            serial,
                            values,
                            timestamp,
                        },
                        "router",
                    )
                    .await;
            }
            Inbound::Reply(reply) => {
                if !self.correlator.resolve(reply.tid, reply.data).await {
                    debug!(tid = %reply.tid, "reply has no waiter, dropping");
                }
            }
            Inbound::Unknown => {
                debug!(topic, len = payload.len(), "dropping unclassified frame");
            }
        }
    }

    /// Serial for a frame: the payload first, then the topic segment,
    /// then the session aircraft as a last resort.
    async fn frame_serial(&self, topic: &str, decoded: Option<String>) -> String {
        if let Some(serial) = decoded {
            return serial;
        }
        if let Some(serial) = topics::device_serial(topic) {
            return serial.to_string();
        }
        let identity = self.identity.read().await;
        identity
            .as_ref()
            .and_then(|i| i.aircraft_serial.clone())
            .unwrap_or_else(|| "unknown".to_string())
    }

    async fn handle_sample(&self, serial: String, sample: TelemetrySample, received_at: i64) {
        if let Err(e) = self.store.append(&serial, &sample).await {
            error!(serial = %serial, error = %e, "failed to persist telemetry sample");
            self.bus
                .publish_with_source(
                    GatewayEvent::StorageFailure {
                        serial: serial.clone(),
                        error: e.to_string(),
                        timestamp: received_at,
                    },
                    "router",
                )
                .await;
        }
        self.bus
            .publish_with_source(
                GatewayEvent::Telemetry {
                    serial,
                    sample,
                    timestamp: received_at,
                },
                "router",
            )
            .await;
    }

    async fn handle_topology(&self, update: TopologyUpdate, received_at: i64) {
        let key = update.gateway_serial.clone().unwrap_or_default();
        {
            let mut known = self.topology.lock().await;
            if known.get(&key) == Some(&update) {
                debug!(gateway = %key, "topology unchanged, coalescing");
                return;
            }
            known.insert(key.clone(), update.clone());
        }

        self.backfill_identity(&update).await;

        let device_serials: Vec<String> =
            update.devices.iter().map(|d| d.serial.clone()).collect();
        info!(
            gateway = %key,
            devices = device_serials.len(),
            "topology changed"
        );
        self.bus
            .publish_with_source(
                GatewayEvent::TopologyChanged {
                    gateway_serial: update.gateway_serial,
                    device_serials,
                    timestamp: received_at,
                },
                "router",
            )
            .await;
    }

    /// Fill identity gaps from a topology announcement. Configured fields
    /// always win; discovery only ever adds what is missing.
    async fn backfill_identity(&self, update: &TopologyUpdate) {
        let mut discovered = DeviceIdentity::new();
        if let Some(gateway) = &update.gateway_serial {
            discovered = discovered.with_gateway(gateway);
        }
        if let Some(first) = update.devices.first() {
            discovered = discovered.with_aircraft(&first.serial);
        }
        if discovered.is_empty() {
            return;
        }

        let mut identity = self.identity.write().await;
        match identity.as_mut() {
            Some(current) => current.merge_missing(&discovered),
            None => {
                info!(
                    gateway = ?discovered.gateway_serial,
                    aircraft = ?discovered.aircraft_serial,
                    "device identity discovered from topology"
                );
                *identity = Some(discovered);
            }
        }
    }
}
