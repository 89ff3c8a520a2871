//! Wire events exchanged between the host and the daemon.
//!
//! Every message on the wire is one JSON object `{"type": ..., "payload": ...}`.
//! Inbound messages are first read as a raw [`Event`] and then decoded into an
//! [`Inbound`] so that an unrecognised `type` is still a well-formed event the
//! daemon can log and skip. Outbound messages are built as [`Outbound`], whose
//! serde representation is exactly the wire shape.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::document::{Document, Frame};
use crate::error::CoreError;
use crate::types::ProcessorRef;

// ---------------------------------------------------------------------------
// Raw envelope
// ---------------------------------------------------------------------------

/// Untyped `{type, payload}` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "empty_payload")]
    pub payload: Value,
}

fn empty_payload() -> Value {
    Value::Object(Map::new())
}

impl Event {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// Decode one line of wire text.
    pub fn from_json(line: &str) -> Result<Self, CoreError> {
        Ok(serde_json::from_str(line)?)
    }

    /// Encode as a single line of wire text (no trailing newline).
    pub fn to_json(&self) -> Result<String, CoreError> {
        Ok(serde_json::to_string(self)?)
    }
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// `execute` payload. Accepts the batch form `assets` and the single-item
/// form `asset`; both may be present, in which case `asset` comes last.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteRequest {
    pub processor: ProcessorRef,
    pub assets: Vec<Document>,
}

#[derive(Deserialize)]
struct ExecuteWire {
    #[serde(rename = "ref")]
    processor: ProcessorRef,
    #[serde(default)]
    assets: Vec<Document>,
    #[serde(default)]
    asset: Option<Document>,
}

impl From<ExecuteWire> for ExecuteRequest {
    fn from(wire: ExecuteWire) -> Self {
        let mut assets = wire.assets;
        assets.extend(wire.asset);
        Self {
            processor: wire.processor,
            assets,
        }
    }
}

/// Generator settings carried by a `generate` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateSettings {
    #[serde(rename = "fileTypes", default)]
    pub file_types: Vec<String>,
    #[serde(rename = "batchSize", default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GenerateRequest {
    #[serde(rename = "ref")]
    pub processor: ProcessorRef,
    #[serde(default)]
    pub settings: GenerateSettings,
}

/// `preprocess` payload: one batch handed to the processor ahead of
/// `execute`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PreprocessRequest {
    #[serde(rename = "ref")]
    pub processor: ProcessorRef,
    #[serde(default)]
    pub assets: Vec<Document>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TeardownRequest {
    #[serde(rename = "ref")]
    pub processor: ProcessorRef,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StopRequest {
    /// Process exit status; absent or `null` means 0.
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: i32,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A decoded host → daemon event.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Ready,
    Generate(GenerateRequest),
    Execute(ExecuteRequest),
    Preprocess(PreprocessRequest),
    Teardown(TeardownRequest),
    Stop(StopRequest),
    /// A type this daemon does not understand; carries the type name.
    Unknown(String),
}

impl Inbound {
    /// Decode a raw envelope. Unknown types decode successfully; a known type
    /// with a malformed payload is an error.
    pub fn decode(event: Event) -> Result<Self, CoreError> {
        let Event { kind, payload } = event;
        let payload = match payload {
            Value::Null => empty_payload(),
            other => other,
        };
        let decoded = match kind.as_str() {
            "ready" => Inbound::Ready,
            "generate" => Inbound::Generate(payload_as(&kind, payload)?),
            "execute" => {
                let wire: ExecuteWire = payload_as(&kind, payload)?;
                Inbound::Execute(wire.into())
            }
            "preprocess" => Inbound::Preprocess(payload_as(&kind, payload)?),
            "teardown" => Inbound::Teardown(payload_as(&kind, payload)?),
            "stop" => Inbound::Stop(payload_as(&kind, payload)?),
            _ => Inbound::Unknown(kind),
        };
        Ok(decoded)
    }

    pub fn kind(&self) -> &str {
        match self {
            Inbound::Ready => "ready",
            Inbound::Generate(_) => "generate",
            Inbound::Execute(_) => "execute",
            Inbound::Preprocess(_) => "preprocess",
            Inbound::Teardown(_) => "teardown",
            Inbound::Stop(_) => "stop",
            Inbound::Unknown(kind) => kind,
        }
    }
}

fn payload_as<T: serde::de::DeserializeOwned>(kind: &str, payload: Value) -> Result<T, CoreError> {
    serde_json::from_value(payload).map_err(|source| CoreError::Payload {
        event: kind.to_string(),
        source,
    })
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Lifecycle phase a processor error happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Initialize,
    Execute,
    Generate,
    Preprocess,
    Teardown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Initialize => write!(f, "initialize"),
            Phase::Execute => write!(f, "execute"),
            Phase::Generate => write!(f, "generate"),
            Phase::Preprocess => write!(f, "preprocess"),
            Phase::Teardown => write!(f, "teardown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetPayload {
    pub object: Document,
    pub skip: bool,
}

impl From<&Frame> for AssetPayload {
    fn from(frame: &Frame) -> Self {
        Self {
            object: frame.document.clone(),
            skip: frame.skip,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpandPayload {
    #[serde(rename = "ref")]
    pub processor: ProcessorRef,
    pub assets: Vec<Document>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub processor: String,
    pub fatal: bool,
    pub phase: Phase,
    pub message: String,
    #[serde(rename = "assetId", default, skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trace: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub message: String,
}

/// Accumulated counters for one cached processor instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessorStats {
    pub processor: String,
    pub image: String,
    pub error_count: u64,
    pub unrecoverable_error_count: u64,
    pub process_count: u64,
    #[serde(default)]
    pub generate_count: u64,
    /// Seconds spent in successful `process` / `generate` calls.
    pub total_time: f64,
}

impl ProcessorStats {
    pub fn for_ref(processor_ref: &ProcessorRef) -> Self {
        Self {
            processor: processor_ref.class_id.clone(),
            image: processor_ref.image.clone(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusPayload {
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressPayload {
    pub progress: u8,
}

/// A daemon → host event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum Outbound {
    Ok {},
    Asset(AssetPayload),
    Expand(ExpandPayload),
    Error(ErrorPayload),
    Warning(MessagePayload),
    Stats(ProcessorStats),
    #[serde(rename = "hardfailure")]
    HardFailure(MessagePayload),
    Finished {},
    /// Ends the reply stream of a `preprocess` request.
    Preprocess {},
    Status(StatusPayload),
    Progress(ProgressPayload),
}

impl Outbound {
    pub fn kind(&self) -> &'static str {
        match self {
            Outbound::Ok {} => "ok",
            Outbound::Asset(_) => "asset",
            Outbound::Expand(_) => "expand",
            Outbound::Error(_) => "error",
            Outbound::Warning(_) => "warning",
            Outbound::Stats(_) => "stats",
            Outbound::HardFailure(_) => "hardfailure",
            Outbound::Finished {} => "finished",
            Outbound::Preprocess {} => "preprocess",
            Outbound::Status(_) => "status",
            Outbound::Progress(_) => "progress",
        }
    }

    /// Encode as a single line of wire text (no trailing newline).
    pub fn to_json(&self) -> Result<String, CoreError> {
        Ok(serde_json::to_string(self)?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(value: Value) -> Result<Inbound, CoreError> {
        Inbound::decode(serde_json::from_value(value).expect("envelope"))
    }

    #[test]
    fn ready_without_payload_decodes() {
        assert_eq!(decode(json!({"type": "ready"})).unwrap(), Inbound::Ready);
        assert_eq!(
            decode(json!({"type": "ready", "payload": null})).unwrap(),
            Inbound::Ready
        );
    }

    #[test]
    fn execute_accepts_batch_and_single_forms() {
        let batch = decode(json!({
            "type": "execute",
            "payload": {"ref": {"className": "a.B"}, "assets": [{"id": "1"}, {"id": "2"}]}
        }))
        .unwrap();
        let Inbound::Execute(req) = batch else {
            panic!("expected execute")
        };
        assert_eq!(req.assets.len(), 2);
        assert_eq!(req.assets[1].id(), Some("2"));

        let single = decode(json!({
            "type": "execute",
            "payload": {"ref": {"className": "a.B"}, "asset": {"id": "9"}}
        }))
        .unwrap();
        let Inbound::Execute(req) = single else {
            panic!("expected execute")
        };
        assert_eq!(req.assets.len(), 1);
        assert_eq!(req.assets[0].id(), Some("9"));
    }

    #[test]
    fn generate_reads_settings() {
        let event = decode(json!({
            "type": "generate",
            "payload": {"ref": {"className": "g.G"}, "settings": {"fileTypes": ["jpg"], "batchSize": 5}}
        }))
        .unwrap();
        let Inbound::Generate(req) = event else {
            panic!("expected generate")
        };
        assert_eq!(req.settings.file_types, vec!["jpg".to_string()]);
        assert_eq!(req.settings.batch_size, Some(5));
    }

    #[test]
    fn stop_status_defaults_to_zero() {
        assert_eq!(
            decode(json!({"type": "stop", "payload": {}})).unwrap(),
            Inbound::Stop(StopRequest { status: 0 })
        );
        assert_eq!(
            decode(json!({"type": "stop", "payload": {"status": null}})).unwrap(),
            Inbound::Stop(StopRequest { status: 0 })
        );
        assert_eq!(
            decode(json!({"type": "stop", "payload": {"status": 7}})).unwrap(),
            Inbound::Stop(StopRequest { status: 7 })
        );
    }

    #[test]
    fn preprocess_decodes_batch_and_answers_with_terminator() {
        let event = decode(json!({
            "type": "preprocess",
            "payload": {"ref": {"className": "a.B"}, "assets": [{"id": "1"}, {"id": "2"}]}
        }))
        .unwrap();
        assert_eq!(event.kind(), "preprocess");
        let Inbound::Preprocess(req) = event else {
            panic!("expected preprocess")
        };
        assert_eq!(req.processor.class_id, "a.B");
        assert_eq!(req.assets.len(), 2);

        let reply = serde_json::to_value(Outbound::Preprocess {}).unwrap();
        assert_eq!(reply, json!({"type": "preprocess", "payload": {}}));
        assert_eq!(Phase::Preprocess.to_string(), "preprocess");
    }

    #[test]
    fn unknown_type_is_not_an_error() {
        let event = decode(json!({"type": "reload", "payload": {}})).unwrap();
        assert_eq!(event, Inbound::Unknown("reload".into()));
        assert_eq!(event.kind(), "reload");
    }

    #[test]
    fn known_type_with_bad_payload_is_payload_error() {
        let err = decode(json!({"type": "teardown", "payload": {"nope": 1}})).unwrap_err();
        assert!(matches!(err, CoreError::Payload { .. }), "got: {err}");
        assert!(err.to_string().contains("teardown"));
    }

    #[test]
    fn outbound_serializes_to_wire_shape() {
        let ok = serde_json::to_value(Outbound::Ok {}).unwrap();
        assert_eq!(ok, json!({"type": "ok", "payload": {}}));

        let hard = serde_json::to_value(Outbound::HardFailure(MessagePayload {
            message: "boom".into(),
        }))
        .unwrap();
        assert_eq!(hard, json!({"type": "hardfailure", "payload": {"message": "boom"}}));

        let err = serde_json::to_value(Outbound::Error(ErrorPayload {
            processor: "a.B".into(),
            fatal: true,
            phase: Phase::Initialize,
            message: "missing".into(),
            asset_id: None,
            path: None,
            trace: vec![],
        }))
        .unwrap();
        assert_eq!(
            err,
            json!({"type": "error", "payload": {
                "processor": "a.B", "fatal": true, "phase": "initialize", "message": "missing"
            }})
        );
    }

    #[test]
    fn asset_payload_round_trips_document() {
        let document: Document = serde_json::from_value(json!({
            "id": "abc",
            "source": {"path": "/x/y.jpg", "filesize": 1024},
            "analysis": {"labels": ["cat", "dog"], "score": 0.75},
            "empty": {},
            "nothing": null
        }))
        .unwrap();
        let mut frame = Frame::new(document.clone());
        frame.skip = true;

        let line = Outbound::Asset(AssetPayload::from(&frame)).to_json().unwrap();
        let back: Outbound = serde_json::from_str(&line).unwrap();
        let Outbound::Asset(payload) = back else {
            panic!("expected asset")
        };
        assert_eq!(payload.object, document);
        assert!(payload.skip);
    }
}
