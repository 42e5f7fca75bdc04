//! Wire codec for bridge traffic.
//!
//! Frames are JSON. Some bridge firmware double-encodes the body (a JSON
//! string whose content is itself JSON); [`decode`] unwraps exactly one
//! such layer. Classification is by payload shape, never by topic alone:
//! topology announcements, command replies, OSD telemetry and property
//! reports each have a recognizable outline, and anything else comes back
//! as [`Inbound::Unknown`] instead of an error.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use skyhook_core::{Result, TelemetrySample};
use uuid::Uuid;

/// Numeric fields lifted into [`TelemetrySample`].
const TELEMETRY_FIELDS: [&str; 9] = [
    "latitude",
    "longitude",
    "altitude",
    "elevation",
    "attitude_pitch",
    "attitude_roll",
    "attitude_heading",
    "horizontal_speed",
    "vertical_speed",
];

/// Outbound command envelope.
///
/// Every envelope gets fresh transaction and business ids. Retries build
/// a new envelope; ids are never reused.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub tid: Uuid,
    pub bid: Uuid,
    pub timestamp: i64,
    pub method: String,
    pub data: Value,
}

impl CommandEnvelope {
    pub fn new(method: impl Into<String>, data: Value) -> Self {
        Self {
            tid: Uuid::new_v4(),
            bid: Uuid::new_v4(),
            timestamp: Utc::now().timestamp_millis(),
            method: method.into(),
            data,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Inbound command reply, matched back to a waiter by `tid`.
#[derive(Debug, Clone)]
pub struct CommandReply {
    pub tid: Uuid,
    pub method: Option<String>,
    pub data: Value,
}

/// One device in a topology announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyDevice {
    pub serial: String,
    pub domain: Option<String>,
    pub model: Option<String>,
}

/// Decoded topology announcement.
///
/// `PartialEq` lets the router drop repeated identical announcements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologyUpdate {
    pub gateway_serial: Option<String>,
    pub devices: Vec<TopologyDevice>,
}

/// One classified inbound frame.
#[derive(Debug, Clone)]
pub enum Inbound {
    Topology(TopologyUpdate),
    Osd {
        serial: Option<String>,
        sample: TelemetrySample,
    },
    Property {
        serial: Option<String>,
        values: Value,
        timestamp: i64,
    },
    Reply(CommandReply),
    Unknown,
}

/// Decode and classify one raw frame.
///
/// `received_at` stamps the sample when the frame carries no timestamp of
/// its own. Decoding never fails: frames that cannot be parsed or
/// classified come back as [`Inbound::Unknown`].
pub fn decode(payload: &[u8], received_at: i64) -> Inbound {
    let value: Value = match serde_json::from_slice(payload) {
        Ok(value) => value,
        Err(_) => return Inbound::Unknown,
    };

    // Unwrap a single layer of double encoding.
    let value = match value {
        Value::String(inner) => match serde_json::from_str(&inner) {
            Ok(value) => value,
            Err(_) => return Inbound::Unknown,
        },
        value => value,
    };

    classify(&value, received_at)
}

fn classify(value: &Value, received_at: i64) -> Inbound {
    let Some(obj) = value.as_object() else {
        return Inbound::Unknown;
    };

    // Topology first: those frames also carry a tid.
    if let Some(update) = as_topology(obj) {
        return Inbound::Topology(update);
    }

    if obj.contains_key("tid") {
        return match as_reply(obj) {
            Some(reply) => Inbound::Reply(reply),
            // Reply-shaped but the tid does not parse.
            None => Inbound::Unknown,
        };
    }

    // Telemetry fields sit at the top level or under "data".
    let body = obj.get("data").and_then(Value::as_object).unwrap_or(obj);
    let serial = extract_serial(obj);
    let timestamp = extract_timestamp(obj, body);

    if let Some(sample) = as_sample(body, timestamp, received_at) {
        return Inbound::Osd { serial, sample };
    }

    if let Some(data) = obj.get("data").and_then(Value::as_object) {
        if !data.is_empty() {
            return Inbound::Property {
                serial,
                values: Value::Object(data.clone()),
                timestamp: timestamp.unwrap_or(received_at),
            };
        }
    }

    Inbound::Unknown
}

fn as_topology(obj: &Map<String, Value>) -> Option<TopologyUpdate> {
    let data = obj.get("data").and_then(Value::as_object);
    let is_topology = obj.get("method").and_then(Value::as_str) == Some("update_topo")
        || data.map(|d| d.contains_key("sub_devices")).unwrap_or(false);
    if !is_topology {
        return None;
    }

    let gateway_serial = obj
        .get("gateway_sn")
        .and_then(Value::as_str)
        .or_else(|| data.and_then(|d| d.get("sn")).and_then(Value::as_str))
        .or_else(|| obj.get("sn").and_then(Value::as_str))
        .map(str::to_string);

    let mut devices = Vec::new();
    if let Some(subs) = data.and_then(|d| d.get("sub_devices")).and_then(Value::as_array) {
        for sub in subs {
            let Some(serial) = sub.get("sn").and_then(Value::as_str) else {
                continue;
            };
            devices.push(TopologyDevice {
                serial: serial.to_string(),
                domain: sub.get("domain").and_then(Value::as_str).map(str::to_string),
                model: sub
                    .get("device_model")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            });
        }
    }

    Some(TopologyUpdate {
        gateway_serial,
        devices,
    })
}

fn as_reply(obj: &Map<String, Value>) -> Option<CommandReply> {
    let tid = obj.get("tid").and_then(Value::as_str)?;
    let tid = Uuid::parse_str(tid).ok()?;
    let data = obj
        .get("data")
        .or_else(|| obj.get("result"))
        .cloned()
        .unwrap_or(Value::Null);
    Some(CommandReply {
        tid,
        method: obj.get("method").and_then(Value::as_str).map(str::to_string),
        data,
    })
}

fn as_sample(
    body: &Map<String, Value>,
    timestamp: Option<i64>,
    received_at: i64,
) -> Option<TelemetrySample> {
    let has_telemetry = TELEMETRY_FIELDS.iter().any(|f| body.contains_key(*f))
        || body.contains_key("attitude_head");
    if !has_telemetry {
        return None;
    }

    let mut sample = TelemetrySample::new(timestamp.unwrap_or(received_at), received_at);
    sample.latitude = field_f64(body, "latitude");
    sample.longitude = field_f64(body, "longitude");
    sample.altitude = field_f64(body, "altitude");
    sample.elevation = field_f64(body, "elevation");
    sample.attitude_pitch = field_f64(body, "attitude_pitch");
    sample.attitude_roll = field_f64(body, "attitude_roll");
    // Older firmware reports "attitude_head" instead of "attitude_heading".
    sample.attitude_heading =
        field_f64(body, "attitude_heading").or_else(|| field_f64(body, "attitude_head"));
    sample.horizontal_speed = field_f64(body, "horizontal_speed");
    sample.vertical_speed = field_f64(body, "vertical_speed");
    Some(sample)
}

/// Numeric lookup tolerant of junk: a non-numeric value reads as absent.
fn field_f64(body: &Map<String, Value>, key: &str) -> Option<f64> {
    body.get(key).and_then(Value::as_f64)
}

fn extract_serial(obj: &Map<String, Value>) -> Option<String> {
    obj.get("sn")
        .and_then(Value::as_str)
        .or_else(|| obj.get("gateway_sn").and_then(Value::as_str))
        .or_else(|| obj.get("data").and_then(|d| d.get("sn")).and_then(Value::as_str))
        .map(str::to_string)
}

fn extract_timestamp(obj: &Map<String, Value>, body: &Map<String, Value>) -> Option<i64> {
    obj.get("timestamp")
        .and_then(Value::as_i64)
        .or_else(|| body.get("timestamp").and_then(Value::as_i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_ids_are_fresh() {
        let a = CommandEnvelope::new("flighttask_prepare", json!({}));
        let b = CommandEnvelope::new("flighttask_prepare", json!({}));
        assert_ne!(a.tid, a.bid);
        assert_ne!(a.tid, b.tid);
        assert_ne!(a.bid, b.bid);
    }

    #[test]
    fn test_envelope_serializes_all_fields() {
        let envelope = CommandEnvelope::new("camera_mode_switch", json!({"mode": 1}));
        let bytes = envelope.to_bytes().unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(value.get("tid").is_some());
        assert!(value.get("bid").is_some());
        assert!(value.get("timestamp").is_some());
        assert_eq!(value["method"], "camera_mode_switch");
        assert_eq!(value["data"]["mode"], 1);
    }

    #[test]
    fn test_decode_osd_top_level_fields() {
        let payload = json!({
            "latitude": 1.0,
            "longitude": 2.0,
            "altitude": 3.0,
            "timestamp": 1000
        });
        let decoded = decode(payload.to_string().as_bytes(), 5000);
        match decoded {
            Inbound::Osd { serial, sample } => {
                assert_eq!(serial, None);
                assert_eq!(sample.timestamp, 1000);
                assert_eq!(sample.received_at, 5000);
                assert_eq!(sample.latitude, Some(1.0));
                assert_eq!(sample.longitude, Some(2.0));
                assert_eq!(sample.altitude, Some(3.0));
                assert_eq!(sample.vertical_speed, None);
            }
            other => panic!("expected Osd, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_osd_nested_with_heading_alias() {
        let payload = json!({
            "sn": "1581F5BKD23290100AXXXX",
            "data": {
                "latitude": 22.5,
                "longitude": 113.9,
                "attitude_head": 87.5,
                "timestamp": 1700000000000i64
            }
        });
        let decoded = decode(payload.to_string().as_bytes(), 1700000000500);
        match decoded {
            Inbound::Osd { serial, sample } => {
                assert_eq!(serial.as_deref(), Some("1581F5BKD23290100AXXXX"));
                assert_eq!(sample.timestamp, 1700000000000);
                assert_eq!(sample.attitude_heading, Some(87.5));
            }
            other => panic!("expected Osd, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_osd_without_timestamp_uses_received_at() {
        let payload = json!({"latitude": 9.0, "longitude": 8.0});
        let decoded = decode(payload.to_string().as_bytes(), 4242);
        match decoded {
            Inbound::Osd { sample, .. } => {
                assert_eq!(sample.timestamp, 4242);
                assert_eq!(sample.received_at, 4242);
            }
            other => panic!("expected Osd, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_non_numeric_field_reads_as_absent() {
        let payload = json!({"latitude": "garbage", "longitude": 2.0});
        let decoded = decode(payload.to_string().as_bytes(), 1);
        match decoded {
            Inbound::Osd { sample, .. } => {
                assert_eq!(sample.latitude, None);
                assert_eq!(sample.longitude, Some(2.0));
            }
            other => panic!("expected Osd, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_double_encoded_payload() {
        let inner = json!({"latitude": 10.0, "longitude": 20.0, "timestamp": 7}).to_string();
        let payload = serde_json::to_vec(&inner).unwrap();
        let decoded = decode(&payload, 99);
        match decoded {
            Inbound::Osd { sample, .. } => {
                assert_eq!(sample.latitude, Some(10.0));
                assert_eq!(sample.timestamp, 7);
            }
            other => panic!("expected Osd, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_unwraps_only_one_layer() {
        let inner = json!({"latitude": 10.0}).to_string();
        let once = serde_json::to_string(&inner).unwrap();
        let twice = serde_json::to_vec(&once).unwrap();
        assert!(matches!(decode(&twice, 0), Inbound::Unknown));
    }

    #[test]
    fn test_decode_garbage_is_unknown_not_error() {
        assert!(matches!(decode(b"not json at all", 0), Inbound::Unknown));
        assert!(matches!(decode(&[0xff, 0xfe, 0x00], 0), Inbound::Unknown));
        assert!(matches!(decode(b"[1,2,3]", 0), Inbound::Unknown));
        assert!(matches!(decode(b"{}", 0), Inbound::Unknown));
    }

    #[test]
    fn test_decode_reply_by_tid() {
        let tid = Uuid::new_v4();
        let payload = json!({
            "tid": tid.to_string(),
            "bid": Uuid::new_v4().to_string(),
            "method": "flighttask_prepare",
            "data": {"result": 0}
        });
        let decoded = decode(payload.to_string().as_bytes(), 0);
        match decoded {
            Inbound::Reply(reply) => {
                assert_eq!(reply.tid, tid);
                assert_eq!(reply.method.as_deref(), Some("flighttask_prepare"));
                assert_eq!(reply.data["result"], 0);
            }
            other => panic!("expected Reply, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_reply_falls_back_to_result_field() {
        let tid = Uuid::new_v4();
        let payload = json!({"tid": tid.to_string(), "result": 314});
        let decoded = decode(payload.to_string().as_bytes(), 0);
        match decoded {
            Inbound::Reply(reply) => assert_eq!(reply.data, json!(314)),
            other => panic!("expected Reply, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_unparseable_tid_is_dropped() {
        let payload = json!({"tid": "not-a-uuid", "data": {"result": 0}});
        assert!(matches!(
            decode(payload.to_string().as_bytes(), 0),
            Inbound::Unknown
        ));
    }

    #[test]
    fn test_decode_topology_with_sub_devices() {
        let payload = json!({
            "tid": Uuid::new_v4().to_string(),
            "method": "update_topo",
            "data": {
                "sn": "4LFCLC800B01S7",
                "sub_devices": [
                    {"sn": "1581F5BKD23290100AXXXX", "domain": "0", "device_model": "M350"}
                ]
            }
        });
        let decoded = decode(payload.to_string().as_bytes(), 0);
        match decoded {
            Inbound::Topology(update) => {
                assert_eq!(update.gateway_serial.as_deref(), Some("4LFCLC800B01S7"));
                assert_eq!(update.devices.len(), 1);
                assert_eq!(update.devices[0].serial, "1581F5BKD23290100AXXXX");
                assert_eq!(update.devices[0].model.as_deref(), Some("M350"));
            }
            other => panic!("expected Topology, got {:?}", other),
        }
    }

    #[test]
    fn test_identical_topology_frames_compare_equal() {
        let payload = json!({
            "method": "update_topo",
            "data": {"sn": "GW-1", "sub_devices": [{"sn": "AC-1"}]}
        })
        .to_string();
        let first = decode(payload.as_bytes(), 1);
        let second = decode(payload.as_bytes(), 2);
        match (first, second) {
            (Inbound::Topology(a), Inbound::Topology(b)) => assert_eq!(a, b),
            other => panic!("expected two Topology frames, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_property_report() {
        let payload = json!({
            "sn": "4LFCLC800B01S7",
            "timestamp": 1234,
            "data": {"firmware_version": "10.1.0", "live_capacity": {"available": 2}}
        });
        let decoded = decode(payload.to_string().as_bytes(), 0);
        match decoded {
            Inbound::Property {
                serial,
                values,
                timestamp,
            } => {
                assert_eq!(serial.as_deref(), Some("4LFCLC800B01S7"));
                assert_eq!(timestamp, 1234);
                assert_eq!(values["firmware_version"], "10.1.0");
            }
            other => panic!("expected Property, got {:?}", other),
        }
    }

    #[test]
    fn test_property_with_telemetry_fields_classifies_as_osd() {
        let payload = json!({
            "sn": "AC-1",
            "data": {"latitude": 1.5, "firmware_version": "10.1.0"}
        });
        assert!(matches!(
            decode(payload.to_string().as_bytes(), 0),
            Inbound::Osd { .. }
        ));
    }
}
