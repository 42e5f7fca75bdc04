//! End-to-end pipeline tests through the facade: baseline subscriptions,
//! telemetry flow into store and bus, topology discovery and teardown.

mod common;

use common::{mock_transport, published_method, reply_for, test_config};
use serde_json::json;
use skyhook_core::{GatewayEvent, SessionState};
use skyhook_gateway::Gateway;
use skyhook_storage::TelemetryStore;
use std::sync::Arc;

#[tokio::test]
async fn test_baseline_subscriptions_installed_on_connack() {
    let (transport, broker) = mock_transport();
    let store = TelemetryStore::memory().unwrap();
    let gateway = Gateway::with_transport(test_config(), store, transport);

    let mut stream = gateway.start_session().await.unwrap();
    broker.connack();
    stream.wait_for(SessionState::Connected).await.unwrap();

    let subscribed = broker.subscribed();
    assert_eq!(subscribed.len(), 4);
    assert!(subscribed.contains(&"thing/product/+/status".to_string()));
    assert!(subscribed.contains(&"thing/product/+/state".to_string()));
    assert!(subscribed.contains(&"thing/product/+/services_reply".to_string()));
    assert!(subscribed.contains(&"thing/product/+/commands_reply".to_string()));
}

#[tokio::test]
async fn test_osd_frame_reaches_store_and_bus() {
    let (transport, broker) = mock_transport();
    let store = TelemetryStore::memory().unwrap();
    let gateway = Gateway::with_transport(test_config(), Arc::clone(&store), transport);

    let mut stream = gateway.start_session().await.unwrap();
    broker.connack();
    stream.wait_for(SessionState::Connected).await.unwrap();

    gateway
        .subscribe_telemetry("thing/product/+/osd")
        .await
        .unwrap();

    let mut telemetry = gateway.telemetry_events();
    broker.frame(
        "thing/product/DRONE1/osd",
        json!({"latitude": 1.0, "longitude": 2.0, "altitude": 3.0, "timestamp": 1000})
            .to_string()
            .into_bytes(),
    );

    let (event, meta) = telemetry.recv().await.unwrap();
    match event {
        GatewayEvent::Telemetry { serial, sample, .. } => {
            assert_eq!(serial, "DRONE1");
            assert_eq!(sample.latitude, Some(1.0));
            assert_eq!(sample.altitude, Some(3.0));
            assert!(sample.has_position());
        }
        other => panic!("expected Telemetry, got {:?}", other),
    }
    assert_eq!(meta.source, "router");

    // Range bounds are inclusive, so the exact key finds the sample.
    let stored = store.range("DRONE1", 1000, 1000).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].timestamp, 1000);
    assert_eq!(stored[0].longitude, Some(2.0));
    assert!(stored[0].received_at >= 1000);
}

#[tokio::test]
async fn test_topology_discovery_enables_commands() {
    let (transport, broker) = mock_transport();
    let store = TelemetryStore::memory().unwrap();
    // No identity configured: it must come from topology.
    let gateway = Gateway::with_transport(test_config(), store, transport);

    let mut stream = gateway.start_session().await.unwrap();
    broker.connack();
    stream.wait_for(SessionState::Connected).await.unwrap();
    assert!(gateway.identity().await.is_none());

    let mut events = gateway.events();
    let topology = json!({
        "method": "update_topo",
        "data": {"sn": "GW-1", "sub_devices": [{"sn": "AC-1", "domain": "0"}]}
    })
    .to_string();
    broker.frame("thing/product/GW-1/status", topology.clone().into_bytes());
    broker.frame("thing/product/GW-1/status", topology.into_bytes());

    let (event, _) = events.recv().await.unwrap();
    match event {
        GatewayEvent::TopologyChanged {
            gateway_serial,
            device_serials,
            ..
        } => {
            assert_eq!(gateway_serial.as_deref(), Some("GW-1"));
            assert_eq!(device_serials, vec!["AC-1"]);
        }
        other => panic!("expected TopologyChanged, got {:?}", other),
    }

    let identity = gateway.identity().await.unwrap();
    assert_eq!(identity.gateway_serial.as_deref(), Some("GW-1"));
    assert_eq!(identity.aircraft_serial.as_deref(), Some("AC-1"));

    // Commands now address the discovered gateway serial.
    let gw = Arc::clone(&gateway);
    let command = tokio::spawn(async move { gw.send_command("ping", json!({})).await });
    let published = broker.wait_for_published(1).await;
    assert_eq!(published[0].0, "thing/product/GW-1/services");
    broker.frame(
        "thing/product/GW-1/services_reply",
        reply_for(&published[0].1, json!({"result": 0})),
    );
    // The probe reply settles negotiation; the command reuses its answer.
    let published = broker.wait_for_published(2).await;
    assert_eq!(published_method(&published[1].1), "ping");
    broker.frame(
        "thing/product/GW-1/services_reply",
        reply_for(&published[1].1, json!({"result": 0})),
    );
    command.await.unwrap().unwrap();

    // The duplicate topology announcement produced no second event.
    let mut saw_second_topology = false;
    while let Some((event, _)) = events.try_recv() {
        if event.is_topology() {
            saw_second_topology = true;
        }
    }
    assert!(!saw_second_topology);
}

#[tokio::test]
async fn test_session_status_flows_on_event_bus() {
    let (transport, broker) = mock_transport();
    let store = TelemetryStore::memory().unwrap();
    let gateway = Gateway::with_transport(test_config(), store, transport);

    let mut status = gateway.status_events();
    gateway.start_session().await.unwrap();
    broker.connack();

    let (event, meta) = status.recv().await.unwrap();
    match event {
        GatewayEvent::SessionStatus { state, .. } => assert_eq!(state, SessionState::Connecting),
        other => panic!("expected SessionStatus, got {:?}", other),
    }
    assert_eq!(meta.source, "session");

    let (event, _) = status.recv().await.unwrap();
    match event {
        GatewayEvent::SessionStatus { state, .. } => assert_eq!(state, SessionState::Connected),
        other => panic!("expected SessionStatus, got {:?}", other),
    }
}

#[tokio::test]
async fn test_store_outlives_session_teardown() {
    let (transport, broker) = mock_transport();
    let store = TelemetryStore::memory().unwrap();
    let gateway = Gateway::with_transport(test_config(), Arc::clone(&store), transport);

    let mut stream = gateway.start_session().await.unwrap();
    broker.connack();
    stream.wait_for(SessionState::Connected).await.unwrap();

    let mut telemetry = gateway.telemetry_events();
    broker.frame(
        "thing/product/DRONE1/osd",
        json!({"latitude": 5.0, "timestamp": 42}).to_string().into_bytes(),
    );
    telemetry.recv().await.unwrap();

    let stats = gateway.stats().await;
    assert!(stats.frames_received >= 1);

    gateway.stop_session().await;
    assert_eq!(gateway.state(), SessionState::Disconnected);
    assert!(gateway.identity().await.is_none());

    // Persisted telemetry survives the session.
    let stored = store.range("DRONE1", 0, 100).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].latitude, Some(5.0));
}
