//! Wire envelopes exchanged with the control backend.
//!
//! Inbound frames are `{type, payload}` JSON objects, sent either as text or as
//! UTF-8 bytes. Outbound commands add a `request_id`. Payload fields are read
//! leniently: a field of the wrong JSON type is treated as absent instead of
//! failing the whole frame.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::DecodeError;

pub mod kinds {
    pub const DATA_NAV: &str = "DATA_NAV";
    pub const DATA_STATUS: &str = "DATA_STATUS";
    pub const DATA_LOG: &str = "DATA_LOG";
    pub const DATA_MISSION_PROGRESS: &str = "DATA_MISSION_PROGRESS";
    pub const DATA_RELAY_STATUS: &str = "DATA_RELAY_STATUS";
    pub const ACK: &str = "ACK";
}

pub mod commands {
    pub const CONNECT_VEHICLE: &str = "CMD_CONNECT_VEHICLE";
    pub const DOWNLOAD_MISSION: &str = "CMD_DOWNLOAD_MISSION";
    pub const UPLOAD_MISSION: &str = "CMD_UPLOAD_MISSION";
    pub const SET_RELAY: &str = "CMD_SET_RELAY";
    pub const SET_HOME: &str = "CMD_SET_HOME";
    pub const MANUAL_CONTROL: &str = "CMD_MANUAL_CONTROL";
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Nav(NavPayload),
    Status(StatusPayload),
    Log(LogPayload),
    MissionProgress(ProgressPayload),
    RelayStatus(RelayPayload),
    Ack(AckPayload),
    /// A type this client does not know; carried so it can be logged and skipped.
    Unknown(String),
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

pub fn decode_text(text: &str) -> Result<Inbound, DecodeError> {
    let envelope: RawEnvelope = serde_json::from_str(text)?;
    Inbound::from_envelope(envelope)
}

pub fn decode_binary(bytes: Vec<u8>) -> Result<Inbound, DecodeError> {
    let text = String::from_utf8(bytes)?;
    decode_text(&text)
}

impl Inbound {
    fn from_envelope(envelope: RawEnvelope) -> Result<Self, DecodeError> {
        let RawEnvelope { kind, payload } = envelope;
        let message = match kind.as_str() {
            kinds::DATA_NAV => Inbound::Nav(payload_of(&kind, payload)?),
            kinds::DATA_STATUS => Inbound::Status(payload_of(&kind, payload)?),
            kinds::DATA_LOG => Inbound::Log(payload_of(&kind, payload)?),
            kinds::DATA_MISSION_PROGRESS => Inbound::MissionProgress(payload_of(&kind, payload)?),
            kinds::DATA_RELAY_STATUS => Inbound::RelayStatus(payload_of(&kind, payload)?),
            kinds::ACK => Inbound::Ack(payload_of(&kind, payload)?),
            _ => Inbound::Unknown(kind),
        };
        Ok(message)
    }

    pub fn kind(&self) -> &str {
        match self {
            Inbound::Nav(_) => kinds::DATA_NAV,
            Inbound::Status(_) => kinds::DATA_STATUS,
            Inbound::Log(_) => kinds::DATA_LOG,
            Inbound::MissionProgress(_) => kinds::DATA_MISSION_PROGRESS,
            Inbound::RelayStatus(_) => kinds::DATA_RELAY_STATUS,
            Inbound::Ack(_) => kinds::ACK,
            Inbound::Unknown(kind) => kind,
        }
    }
}

fn payload_of<T>(kind: &str, payload: Value) -> Result<T, DecodeError>
where
    T: for<'de> Deserialize<'de>,
{
    // A missing payload decodes like an empty one.
    let payload = match payload {
        Value::Null => Value::Object(Default::default()),
        other => other,
    };
    serde_json::from_value(payload).map_err(|source| DecodeError::Payload {
        kind: kind.to_string(),
        source,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct NavPayload {
    pub position: Option<NavPosition>,
    pub attitude: Option<NavAttitude>,
    pub velocity: Option<NavVelocity>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct NavPosition {
    #[serde(deserialize_with = "lenient::number")]
    pub lat: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub lon: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub rel_alt: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct NavAttitude {
    #[serde(deserialize_with = "lenient::number")]
    pub roll_deg: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub pitch_deg: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub yaw_deg: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct NavVelocity {
    #[serde(deserialize_with = "lenient::number")]
    pub ground_speed_m_s: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct StatusPayload {
    #[serde(deserialize_with = "lenient::flag")]
    pub is_connected: bool,
    #[serde(deserialize_with = "lenient::flag")]
    pub is_armed: bool,
    #[serde(deserialize_with = "lenient::text")]
    pub flight_mode: Option<String>,
    pub battery: Option<BatteryReport>,
    pub gps: Option<GpsReport>,
    pub home: Option<HomeReport>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct BatteryReport {
    #[serde(deserialize_with = "lenient::number_or_zero")]
    pub voltage_v: f64,
    #[serde(deserialize_with = "lenient::number_or_zero")]
    pub remaining_percent: f64,
    #[serde(deserialize_with = "lenient::number_or_zero")]
    pub current_a: f64,
    #[serde(deserialize_with = "lenient::number")]
    pub temperature: Option<f64>,
    #[serde(deserialize_with = "lenient::texts")]
    pub alarms: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct GpsReport {
    #[serde(deserialize_with = "lenient::count")]
    pub sat_count: u32,
    #[serde(deserialize_with = "lenient::text")]
    pub fix_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct HomeReport {
    #[serde(deserialize_with = "lenient::number")]
    pub lat: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub lon: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct LogPayload {
    #[serde(deserialize_with = "lenient::text")]
    pub text: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub level: Option<String>,
}

/// Trusted as sent; `current > total` is possible and only flagged.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProgressPayload {
    #[serde(deserialize_with = "lenient::count")]
    pub current: u32,
    #[serde(deserialize_with = "lenient::count")]
    pub total: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RelayPayload {
    pub state: Value,
}

impl RelayPayload {
    /// Only the numeric value `1` means on.
    pub fn is_on(&self) -> bool {
        self.state.as_f64() == Some(1.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AckPayload {
    #[serde(deserialize_with = "lenient::text")]
    pub command_type: Option<String>,
    #[serde(deserialize_with = "lenient::flag")]
    pub success: bool,
    #[serde(deserialize_with = "lenient::text")]
    pub message: Option<String>,
    #[serde(deserialize_with = "lenient::items")]
    pub mission_items: Option<Vec<RawMissionItem>>,
}

impl AckPayload {
    pub fn command_type(&self) -> &str {
        self.command_type.as_deref().unwrap_or_default()
    }
}

/// A mission item as the backend reports it. Nothing here is validated yet;
/// see [`crate::mission::normalize_mission`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RawMissionItem {
    #[serde(deserialize_with = "lenient::number")]
    pub seq: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub latitude: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub longitude: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub speed_m_s: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub loiter: Option<f64>,
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ConnectVehicle,
    DownloadMission,
    UploadMission(Vec<MissionItem>),
    SetRelay { on: bool },
    SetHome { lat: f64, lon: f64, alt: f64 },
    ManualControl(ManualControl),
    Raw { kind: String, payload: Value },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissionItem {
    pub seq: u32,
    pub latitude: f64,
    pub longitude: f64,
    pub speed_m_s: f64,
    pub loiter: f64,
}

/// Stick axes in the -1000..=1000 range (throttle `z` in 0..=1000).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ManualControl {
    pub x: i16,
    pub y: i16,
    pub z: i16,
    pub r: i16,
}

impl Command {
    pub fn kind(&self) -> &str {
        match self {
            Command::ConnectVehicle => commands::CONNECT_VEHICLE,
            Command::DownloadMission => commands::DOWNLOAD_MISSION,
            Command::UploadMission(_) => commands::UPLOAD_MISSION,
            Command::SetRelay { .. } => commands::SET_RELAY,
            Command::SetHome { .. } => commands::SET_HOME,
            Command::ManualControl(_) => commands::MANUAL_CONTROL,
            Command::Raw { kind, .. } => kind,
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            Command::ConnectVehicle | Command::DownloadMission => json!({}),
            Command::UploadMission(items) => json!({ "mission_items": items }),
            Command::SetRelay { on } => json!({ "state": u8::from(*on) }),
            Command::SetHome { lat, lon, alt } => json!({ "lat": lat, "lon": lon, "alt": alt }),
            Command::ManualControl(sticks) => json!(sticks),
            Command::Raw { payload, .. } => match payload {
                Value::Null => json!({}),
                other => other.clone(),
            },
        }
    }

    /// Streamed continuously while the operator holds the sticks.
    pub fn is_streaming(&self) -> bool {
        self.kind() == commands::MANUAL_CONTROL
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
    pub request_id: String,
}

impl CommandEnvelope {
    pub fn new(command: &Command, request_id: String) -> Self {
        Self {
            kind: command.kind().to_string(),
            payload: command.payload(),
            request_id,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// Lenient field readers
// ---------------------------------------------------------------------------

pub(crate) mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;
    use tracing::warn;

    use super::RawMissionItem;

    /// Finite number from a JSON number or numeric string.
    pub fn as_number(value: &Value) -> Option<f64> {
        let number = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        number.filter(|v| v.is_finite())
    }

    pub fn truthy(value: &Value) -> bool {
        match value {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0 && !v.is_nan()),
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) => true,
        }
    }

    pub fn as_text(value: &Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        Ok(as_number(&Value::deserialize(d)?))
    }

    pub fn number_or_zero<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        Ok(as_number(&Value::deserialize(d)?).unwrap_or(0.0))
    }

    /// Whole, non-negative and within `u32`; anything else changes on read.
    pub fn is_exact_count(value: f64) -> bool {
        value >= 0.0 && value.fract() == 0.0 && value <= u32::MAX as f64
    }

    pub fn count<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
        let Some(value) = as_number(&Value::deserialize(d)?) else {
            return Ok(0);
        };
        let count = value.max(0.0).min(u32::MAX as f64) as u32;
        if !is_exact_count(value) {
            warn!("Backend count {} read as {}", value, count);
        }
        Ok(count)
    }

    pub fn flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
        Ok(truthy(&Value::deserialize(d)?))
    }

    pub fn text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(as_text(&Value::deserialize(d)?))
    }

    pub fn texts<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
        match Value::deserialize(d)? {
            Value::Array(values) => Ok(values.iter().filter_map(as_text).collect()),
            _ => Ok(Vec::new()),
        }
    }

    /// Non-object entries become empty records, which the normalizer rejects.
    pub fn items<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<RawMissionItem>>, D::Error> {
        match Value::deserialize(d)? {
            Value::Array(values) => Ok(Some(
                values
                    .into_iter()
                    .map(|v| serde_json::from_value(v).unwrap_or_default())
                    .collect(),
            )),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_frames_decode_like_text() -> anyhow::Result<()> {
        let text = r#"{"type":"DATA_RELAY_STATUS","payload":{"state":1}}"#;
        let from_text = decode_text(text)?;
        let from_bytes = decode_binary(text.as_bytes().to_vec())?;
        assert_eq!(from_text, from_bytes);
        match from_bytes {
            Inbound::RelayStatus(relay) => assert!(relay.is_on()),
            other => panic!("unexpected message {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn unknown_types_are_carried_not_rejected() -> anyhow::Result<()> {
        let message = decode_text(r#"{"type":"DATA_FUTURE","payload":{"x":1}}"#)?;
        assert_eq!(message, Inbound::Unknown("DATA_FUTURE".to_string()));
        Ok(())
    }

    #[test]
    fn malformed_frames_are_typed_errors() {
        assert!(matches!(decode_text("{not json"), Err(DecodeError::Json(_))));
        assert!(matches!(
            decode_binary(vec![0xff, 0xfe, 0x00]),
            Err(DecodeError::Utf8(_))
        ));
        assert!(matches!(
            decode_text(r#"{"type":"DATA_NAV","payload":{"position":"north"}}"#),
            Err(DecodeError::Payload { .. })
        ));
    }

    #[test]
    fn missing_payload_decodes_as_empty() -> anyhow::Result<()> {
        let message = decode_text(r#"{"type":"DATA_NAV"}"#)?;
        assert_eq!(message, Inbound::Nav(NavPayload::default()));
        Ok(())
    }

    #[test]
    fn relay_state_must_be_numeric_one() -> anyhow::Result<()> {
        for (state, expected) in [("1", true), ("0", false), ("\"1\"", false), ("true", false)] {
            let frame = format!(r#"{{"type":"DATA_RELAY_STATUS","payload":{{"state":{}}}}}"#, state);
            match decode_text(&frame)? {
                Inbound::RelayStatus(relay) => assert_eq!(relay.is_on(), expected, "state {}", state),
                other => panic!("unexpected message {:?}", other),
            }
        }
        Ok(())
    }

    #[test]
    fn status_fields_are_read_leniently() -> anyhow::Result<()> {
        let frame = r#"{"type":"DATA_STATUS","payload":{
            "is_connected":1,"is_armed":null,"flight_mode":"GUIDED",
            "battery":{"voltage_v":"12.4","remaining_percent":80,"current_a":null,"alarms":["LOW",3]},
            "gps":{"sat_count":11,"fix_type":3}}}"#;
        let Inbound::Status(status) = decode_text(frame)? else {
            panic!("expected status");
        };
        assert!(status.is_connected);
        assert!(!status.is_armed);
        let battery = status.battery.expect("battery");
        assert_eq!(battery.voltage_v, 12.4);
        assert_eq!(battery.current_a, 0.0);
        assert_eq!(battery.alarms, vec!["LOW".to_string(), "3".to_string()]);
        let gps = status.gps.expect("gps");
        assert_eq!(gps.sat_count, 11);
        assert_eq!(gps.fix_type.as_deref(), Some("3"));
        Ok(())
    }

    #[test]
    fn ack_mission_items_tolerate_garbage_entries() -> anyhow::Result<()> {
        let frame = r#"{"type":"ACK","payload":{"command_type":"CMD_DOWNLOAD_MISSION","success":true,
            "mission_items":[{"seq":7,"latitude":1.0,"longitude":2.0},null,{"latitude":"x","longitude":3}]}}"#;
        let Inbound::Ack(ack) = decode_text(frame)? else {
            panic!("expected ack");
        };
        assert_eq!(ack.command_type(), "CMD_DOWNLOAD_MISSION");
        let items = ack.mission_items.expect("items");
        assert_eq!(items.len(), 3);
        assert_eq!(items[1], RawMissionItem::default());
        assert_eq!(items[2].latitude, None);
        Ok(())
    }

    #[test]
    fn envelope_carries_type_payload_and_request_id() -> anyhow::Result<()> {
        let command = Command::SetHome {
            lat: 45.0,
            lon: 126.0,
            alt: 10.0,
        };
        let json = CommandEnvelope::new(&command, "req-1".to_string()).to_json()?;
        let value: Value = serde_json::from_str(&json)?;
        assert_eq!(value["type"], "CMD_SET_HOME");
        assert_eq!(value["payload"]["lon"], 126.0);
        assert_eq!(value["request_id"], "req-1");
        Ok(())
    }

    #[test]
    fn inexact_progress_counts_are_flagged() -> anyhow::Result<()> {
        assert!(lenient::is_exact_count(3.0));
        assert!(!lenient::is_exact_count(-2.0));
        assert!(!lenient::is_exact_count(4.9));
        assert!(!lenient::is_exact_count(1e12));

        let frame = r#"{"type":"DATA_MISSION_PROGRESS","payload":{"current":-2,"total":4.9}}"#;
        let Inbound::MissionProgress(progress) = decode_text(frame)? else {
            panic!("expected progress");
        };
        assert_eq!((progress.current, progress.total), (0, 4));
        Ok(())
    }

    #[test]
    fn relay_command_uses_numeric_state() {
        assert_eq!(Command::SetRelay { on: true }.payload(), json!({ "state": 1 }));
        assert_eq!(Command::SetRelay { on: false }.payload(), json!({ "state": 0 }));
        assert!(Command::ManualControl(ManualControl::default()).is_streaming());
        assert!(!Command::DownloadMission.is_streaming());
    }
}
