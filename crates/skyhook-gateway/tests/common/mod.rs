//! Common test utilities: a scripted broker double behind the transport
//! traits, plus config builders tuned for fast test runs.

use async_trait::async_trait;
use serde_json::json;
use skyhook_core::{BrokerConfig, Error, EventBus, GatewayConfig, ReconnectPolicy, Result};
use skyhook_gateway::{
    CommandCorrelator, LinkEvent, LinkEvents, LinkHandle, MqttTransport, QosLevel, SessionManager,
    TopicRouter,
};
use skyhook_storage::TelemetryStore;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Records everything the session pushes toward the broker.
#[derive(Default)]
pub struct MockLink {
    published: Mutex<Vec<(String, Vec<u8>)>>,
    subscribed: Mutex<Vec<String>>,
    disconnects: AtomicUsize,
}

#[async_trait]
impl LinkHandle for MockLink {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        _qos: QosLevel,
        _retain: bool,
    ) -> Result<()> {
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload));
        Ok(())
    }

    async fn subscribe(&self, pattern: &str, _qos: QosLevel) -> Result<()> {
        self.subscribed.lock().unwrap().push(pattern.to_string());
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MockEvents {
    rx: mpsc::UnboundedReceiver<Result<LinkEvent>>,
}

#[async_trait]
impl LinkEvents for MockEvents {
    async fn next(&mut self) -> Result<LinkEvent> {
        match self.rx.recv().await {
            Some(item) => item,
            None => Err(Error::transport("mock event channel closed")),
        }
    }
}

/// Transport double handing out one scripted link.
pub struct MockTransport {
    link: Arc<MockLink>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<Result<LinkEvent>>>>,
    opens: AtomicUsize,
    fail_first_opens: usize,
}

#[async_trait]
impl MqttTransport for MockTransport {
    async fn open(
        &self,
        _config: &BrokerConfig,
    ) -> Result<(Arc<dyn LinkHandle>, Box<dyn LinkEvents>)> {
        let attempt = self.opens.fetch_add(1, Ordering::SeqCst);
        if attempt < self.fail_first_opens {
            return Err(Error::transport("mock broker unreachable"));
        }
        let rx = self
            .events_rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| Error::transport("mock link already consumed"))?;
        Ok((
            Arc::clone(&self.link) as Arc<dyn LinkHandle>,
            Box::new(MockEvents { rx }),
        ))
    }
}

/// Test-side handle: feed events in, inspect what the session sent out.
pub struct MockBroker {
    tx: mpsc::UnboundedSender<Result<LinkEvent>>,
    transport: Arc<MockTransport>,
}

impl MockBroker {
    /// Acknowledge the connection (or reconnection).
    pub fn connack(&self) {
        let _ = self.tx.send(Ok(LinkEvent::ConnAck));
    }

    /// Deliver one inbound frame.
    pub fn frame(&self, topic: &str, payload: impl Into<Vec<u8>>) {
        let _ = self.tx.send(Ok(LinkEvent::Frame {
            topic: topic.to_string(),
            payload: payload.into(),
        }));
    }

    /// Simulate transport loss. The driver's next poll sees the error.
    pub fn drop_link(&self) {
        let _ = self.tx.send(Err(Error::transport("link reset by test")));
    }

    pub fn opens(&self) -> usize {
        self.transport.opens.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.transport.link.published.lock().unwrap().clone()
    }

    pub fn subscribed(&self) -> Vec<String> {
        self.transport.link.subscribed.lock().unwrap().clone()
    }

    pub fn disconnects(&self) -> usize {
        self.transport.link.disconnects.load(Ordering::SeqCst)
    }

    /// Block until at least `count` frames were published.
    pub async fn wait_for_published(&self, count: usize) -> Vec<(String, Vec<u8>)> {
        for _ in 0..400 {
            let published = self.published();
            if published.len() >= count {
                return published;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {} published frames", count);
    }
}

pub fn mock_transport() -> (Arc<MockTransport>, MockBroker) {
    mock_transport_failing(0)
}

/// Like [`mock_transport`], but the first `fail_first_opens` open calls
/// fail, to exercise the connect retry path.
pub fn mock_transport_failing(fail_first_opens: usize) -> (Arc<MockTransport>, MockBroker) {
    let (tx, rx) = mpsc::unbounded_channel();
    let transport = Arc::new(MockTransport {
        link: Arc::new(MockLink::default()),
        events_rx: Mutex::new(Some(rx)),
        opens: AtomicUsize::new(0),
        fail_first_opens,
    });
    let broker = MockBroker {
        tx,
        transport: Arc::clone(&transport),
    };
    (transport, broker)
}

/// Gateway config pointed at the mock broker, with fast retry and
/// timeout settings.
pub fn test_config() -> GatewayConfig {
    let broker = BrokerConfig::new("mock.broker.invalid").with_client_id("skyhook-test");
    let mut config = GatewayConfig::new(broker);
    config.reconnect = ReconnectPolicy {
        base_delay_ms: 5,
        max_delay_ms: 20,
        max_attempts: 3,
    };
    config.command_timeout_ms = 500;
    config.publish_timeout_ms = 200;
    config
}

/// Session with its own store, router and bus, for lifecycle tests that
/// drive the session manager directly.
pub fn build_session(
    config: GatewayConfig,
    transport: Arc<MockTransport>,
) -> (Arc<SessionManager>, EventBus) {
    let bus = EventBus::with_name("test");
    let store = TelemetryStore::memory().unwrap();
    let correlator = Arc::new(CommandCorrelator::new(Duration::from_millis(500)));
    let router = TopicRouter::new(store, correlator, bus.clone());
    let session = SessionManager::new(config, transport, router, bus.clone());
    (session, bus)
}

/// Build a reply frame for a published command envelope.
pub fn reply_for(published_payload: &[u8], data: serde_json::Value) -> Vec<u8> {
    let envelope: serde_json::Value = serde_json::from_slice(published_payload).unwrap();
    json!({
        "tid": envelope["tid"],
        "bid": envelope["bid"],
        "method": envelope["method"],
        "data": data
    })
    .to_string()
    .into_bytes()
}

/// Method field of a published command envelope.
pub fn published_method(published_payload: &[u8]) -> String {
    let envelope: serde_json::Value = serde_json::from_slice(published_payload).unwrap();
    envelope["method"].as_str().unwrap_or_default().to_string()
}
