//! Broker transport seam.
//!
//! The session driver never touches rumqttc directly: it drives a
//! [`LinkEvents`] stream and publishes through a [`LinkHandle`], both
//! produced by an [`MqttTransport`]. Tests swap the whole broker for a
//! scripted double behind the same traits.

use async_trait::async_trait;
use skyhook_core::{transport_err, BrokerConfig, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// MQTT delivery guarantee for a publish or subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QosLevel {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl From<QosLevel> for rumqttc::QoS {
    fn from(qos: QosLevel) -> Self {
        match qos {
            QosLevel::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QosLevel::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            QosLevel::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

/// One event surfaced by an open link.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// Broker acknowledged a connection or reconnection.
    ConnAck,
    /// An application frame arrived.
    Frame { topic: String, payload: Vec<u8> },
}

/// Outbound half of an open link.
#[async_trait]
pub trait LinkHandle: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QosLevel, retain: bool)
        -> Result<()>;
    async fn subscribe(&self, pattern: &str, qos: QosLevel) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;
}

/// Inbound half of an open link.
///
/// An error from `next` means the link dropped. Polling again starts a
/// fresh connect attempt, which is how rumqttc's event loop behaves.
#[async_trait]
pub trait LinkEvents: Send {
    async fn next(&mut self) -> Result<LinkEvent>;
}

/// Factory for broker links.
#[async_trait]
pub trait MqttTransport: Send + Sync {
    async fn open(
        &self,
        config: &BrokerConfig,
    ) -> Result<(Arc<dyn LinkHandle>, Box<dyn LinkEvents>)>;
}

/// Production transport backed by rumqttc.
pub struct RumqttcTransport;

#[async_trait]
impl MqttTransport for RumqttcTransport {
    async fn open(
        &self,
        config: &BrokerConfig,
    ) -> Result<(Arc<dyn LinkHandle>, Box<dyn LinkEvents>)> {
        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(|| format!("skyhook-{}", Uuid::new_v4()));

        let mut options = rumqttc::MqttOptions::new(&client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive));
        options.set_clean_session(config.clean_session);
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }
        if config.tls {
            options.set_transport(rumqttc::Transport::tls_with_default_config());
        }

        debug!(
            broker = %config.broker_addr(),
            client_id = %client_id,
            "opening mqtt link"
        );

        let (client, eventloop) = rumqttc::AsyncClient::new(options, 64);
        Ok((
            Arc::new(RumqttcLink { client }),
            Box::new(RumqttcEvents { eventloop }),
        ))
    }
}

struct RumqttcLink {
    client: rumqttc::AsyncClient,
}

#[async_trait]
impl LinkHandle for RumqttcLink {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QosLevel,
        retain: bool,
    ) -> Result<()> {
        self.client
            .publish(topic, qos.into(), retain, payload)
            .await
            .map_err(|e| transport_err!("publish to '{}' failed: {}", topic, e))
    }

    async fn subscribe(&self, pattern: &str, qos: QosLevel) -> Result<()> {
        self.client
            .subscribe(pattern, qos.into())
            .await
            .map_err(|e| transport_err!("subscribe to '{}' failed: {}", pattern, e))
    }

    async fn disconnect(&self) -> Result<()> {
        self.client
            .disconnect()
            .await
            .map_err(|e| transport_err!("disconnect failed: {}", e))
    }
}

struct RumqttcEvents {
    eventloop: rumqttc::EventLoop,
}

#[async_trait]
impl LinkEvents for RumqttcEvents {
    async fn next(&mut self) -> Result<LinkEvent> {
        loop {
            match self.eventloop.poll().await {
                Ok(rumqttc::Event::Incoming(rumqttc::Packet::ConnAck(_))) => {
                    return Ok(LinkEvent::ConnAck);
                }
                Ok(rumqttc::Event::Incoming(rumqttc::Packet::Publish(publish))) => {
                    return Ok(LinkEvent::Frame {
                        topic: publish.topic,
                        payload: publish.payload.to_vec(),
                    });
                }
                // Pings and acks for our own traffic.
                Ok(_) => continue,
                Err(e) => return Err(transport_err!("{}", e)),
            }
        }
    }
}
