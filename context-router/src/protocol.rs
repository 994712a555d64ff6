//! Versioned envelope codec for browser bridge backends.
//!
//! Every message exchanged with a browser bridge is a JSON object of the form
//! `{id, type, timestamp, payload}` where `payload.protocolVersion` must equal
//! [`PROTOCOL_VERSION`]. The version gate runs before any other validation so
//! that version skew is reported as such even when the rest of the message is
//! garbage.

use crate::types::{ErrorCode, Heading, Link, TriggerMode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Pinned protocol version. Any other value is rejected outright.
pub const PROTOCOL_VERSION: &str = "1";

/// Maximum `fullText` length (in characters) accepted from a backend
pub const MAX_FULL_TEXT_CHARS: usize = 200_000;

/// Declared envelope type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    #[serde(rename = "host-capture-request")]
    HostCaptureRequest,
    #[serde(rename = "extension-capture-result")]
    ExtensionCaptureResult,
    #[serde(rename = "extension-error")]
    ExtensionError,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::HostCaptureRequest => "host-capture-request",
            MessageType::ExtensionCaptureResult => "extension-capture-result",
            MessageType::ExtensionError => "extension-error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "host-capture-request" => Some(MessageType::HostCaptureRequest),
            "extension-capture-result" => Some(MessageType::ExtensionCaptureResult),
            "extension-error" => Some(MessageType::ExtensionError),
            _ => None,
        }
    }
}

/// Request sent by the host to a browser bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostCaptureRequest {
    pub protocol_version: String,
    pub request_id: String,
    pub mode: TriggerMode,
    pub requested_at: String,
    pub timeout_ms: u64,
    pub include_selection_text: bool,
}

/// Page content reported by a browser bridge
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserCapture {
    pub url: String,
    pub title: String,
    pub full_text: String,
    #[serde(default)]
    pub headings: Vec<Heading>,
    #[serde(default)]
    pub links: Vec<Link>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection_text: Option<String>,
    #[serde(default)]
    pub extraction_warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionCaptureResult {
    pub protocol_version: String,
    pub capture: BrowserCapture,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionErrorPayload {
    pub protocol_version: String,
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub recoverable: bool,
}

/// Type-specific envelope payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    CaptureRequest(HostCaptureRequest),
    CaptureResult(ExtensionCaptureResult),
    Error(ExtensionErrorPayload),
}

impl Payload {
    pub fn message_type(&self) -> MessageType {
        match self {
            Payload::CaptureRequest(_) => MessageType::HostCaptureRequest,
            Payload::CaptureResult(_) => MessageType::ExtensionCaptureResult,
            Payload::Error(_) => MessageType::ExtensionError,
        }
    }

    pub fn protocol_version(&self) -> &str {
        match self {
            Payload::CaptureRequest(p) => &p.protocol_version,
            Payload::CaptureResult(p) => &p.protocol_version,
            Payload::Error(p) => &p.protocol_version,
        }
    }

    fn set_protocol_version(&mut self, version: &str) {
        let slot = match self {
            Payload::CaptureRequest(p) => &mut p.protocol_version,
            Payload::CaptureResult(p) => &mut p.protocol_version,
            Payload::Error(p) => &mut p.protocol_version,
        };
        *slot = version.to_string();
    }
}

/// A decoded wire message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub id: String,
    pub timestamp: String,
    pub payload: Payload,
}

#[derive(Serialize)]
struct WireEnvelope<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    message_type: MessageType,
    timestamp: &'a str,
    payload: &'a Payload,
}

impl Envelope {
    pub fn message_type(&self) -> MessageType {
        self.payload.message_type()
    }

    /// Serialize to the canonical single-line wire form
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        let wire = WireEnvelope {
            id: &self.id,
            message_type: self.message_type(),
            timestamp: &self.timestamp,
            payload: &self.payload,
        };
        serde_json::to_string(&wire)
            .map_err(|e| ProtocolError::invalid(format!("failed to serialize envelope: {}", e)))
    }
}

/// Codec rejection carrying a canonical code
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ProtocolError {
    pub code: ErrorCode,
    pub message: String,
}

impl ProtocolError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PayloadInvalid, message)
    }
}

/// Build a canonical envelope around `payload`, stamping the pinned version.
///
/// `timestamp` must be RFC 3339 with an offset (`2026-03-01T10:00:00Z`);
/// `decode` rejects anything else with `ERR_PAYLOAD_INVALID`.
pub fn encode(id: impl Into<String>, timestamp: impl Into<String>, mut payload: Payload) -> Envelope {
    payload.set_protocol_version(PROTOCOL_VERSION);
    Envelope {
        id: id.into(),
        timestamp: timestamp.into(),
        payload,
    }
}

/// Decode and validate a raw wire message
pub fn decode(raw: &str) -> Result<Envelope, ProtocolError> {
    let value: Value = serde_json::from_str(raw.trim())
        .map_err(|e| ProtocolError::invalid(format!("envelope is not valid JSON: {}", e)))?;
    let object = value
        .as_object()
        .ok_or_else(|| ProtocolError::invalid("envelope must be a JSON object"))?;

    check_version_gate(object)?;

    let id = required_str(object, "id")?;
    let type_name = required_str(object, "type")?;
    let message_type = MessageType::parse(type_name)
        .ok_or_else(|| ProtocolError::invalid(format!("unknown envelope type '{}'", type_name)))?;
    let timestamp = required_str(object, "timestamp")?;
    chrono::DateTime::parse_from_rfc3339(timestamp).map_err(|e| {
        ProtocolError::invalid(format!("timestamp '{}' is not ISO-8601: {}", timestamp, e))
    })?;

    let payload_value = object
        .get("payload")
        .filter(|p| p.is_object())
        .ok_or_else(|| ProtocolError::invalid("envelope payload must be an object"))?;
    if payload_value.get("protocolVersion").is_none() {
        return Err(ProtocolError::invalid("payload.protocolVersion is required"));
    }

    let payload = match message_type {
        MessageType::HostCaptureRequest => {
            Payload::CaptureRequest(parse_payload(payload_value, message_type)?)
        }
        MessageType::ExtensionCaptureResult => {
            Payload::CaptureResult(parse_payload(payload_value, message_type)?)
        }
        MessageType::ExtensionError => Payload::Error(parse_payload(payload_value, message_type)?),
    };
    check_payload(&payload)?;

    Ok(Envelope {
        id: id.to_string(),
        timestamp: timestamp.to_string(),
        payload,
    })
}

/// Validate an already-typed envelope against the type the caller expects
pub fn validate(envelope: &Envelope, expected: MessageType) -> Result<(), ProtocolError> {
    if envelope.payload.protocol_version() != PROTOCOL_VERSION {
        return Err(version_mismatch(Some(envelope.payload.protocol_version())));
    }
    if envelope.message_type() != expected {
        return Err(ProtocolError::invalid(format!(
            "expected '{}' envelope, got '{}'",
            expected.as_str(),
            envelope.message_type().as_str()
        )));
    }
    check_payload(&envelope.payload)
}

fn check_version_gate(object: &Map<String, Value>) -> Result<(), ProtocolError> {
    let version = object
        .get("payload")
        .and_then(Value::as_object)
        .and_then(|payload| payload.get("protocolVersion"));
    match version {
        None => Ok(()),
        Some(Value::String(v)) if v == PROTOCOL_VERSION => Ok(()),
        Some(Value::String(v)) => Err(version_mismatch(Some(v))),
        Some(_) => Err(version_mismatch(None)),
    }
}

fn version_mismatch(found: Option<&str>) -> ProtocolError {
    ProtocolError::new(
        ErrorCode::ProtocolVersion,
        format!(
            "protocol version mismatch: expected '{}', got {}",
            PROTOCOL_VERSION,
            found.map(|v| format!("'{}'", v)).unwrap_or_else(|| "a non-string value".to_string())
        ),
    )
}

fn required_str<'a>(object: &'a Map<String, Value>, key: &str) -> Result<&'a str, ProtocolError> {
    match object.get(key).and_then(Value::as_str) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ProtocolError::invalid(format!(
            "envelope field '{}' is missing or empty",
            key
        ))),
    }
}

fn parse_payload<T: serde::de::DeserializeOwned>(
    value: &Value,
    message_type: MessageType,
) -> Result<T, ProtocolError> {
    T::deserialize(value).map_err(|e| {
        ProtocolError::invalid(format!("invalid '{}' payload: {}", message_type.as_str(), e))
    })
}

fn check_payload(payload: &Payload) -> Result<(), ProtocolError> {
    if let Payload::CaptureResult(result) = payload {
        if let Some(heading) = result
            .capture
            .headings
            .iter()
            .find(|h| !(1..=6).contains(&h.level))
        {
            return Err(ProtocolError::invalid(format!(
                "heading level {} is outside 1-6",
                heading.level
            )));
        }

        let chars = result.capture.full_text.chars().count();
        if chars > MAX_FULL_TEXT_CHARS {
            return Err(ProtocolError::new(
                ErrorCode::PayloadTooLarge,
                format!(
                    "fullText has {} characters, limit is {}",
                    chars, MAX_FULL_TEXT_CHARS
                ),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const TS: &str = "2026-03-01T10:00:00Z";

    fn capture_result(full_text: &str) -> Payload {
        Payload::CaptureResult(ExtensionCaptureResult {
            protocol_version: String::new(),
            capture: BrowserCapture {
                url: "https://example.com/article".to_string(),
                title: "Example".to_string(),
                full_text: full_text.to_string(),
                headings: vec![Heading { level: 2, text: "Intro".to_string() }],
                ..Default::default()
            },
        })
    }

    fn raw(payload: serde_json::Value) -> String {
        serde_json::json!({
            "id": "msg-1",
            "type": "extension-capture-result",
            "timestamp": TS,
            "payload": payload,
        })
        .to_string()
    }

    #[test]
    fn test_encode_stamps_pinned_version() {
        let envelope = encode("msg-1", TS, capture_result("hello"));
        assert_eq!(envelope.payload.protocol_version(), PROTOCOL_VERSION);
        assert_eq!(envelope.message_type(), MessageType::ExtensionCaptureResult);

        let json: serde_json::Value =
            serde_json::from_str(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "extension-capture-result");
        assert_eq!(json["payload"]["protocolVersion"], "1");
        assert_eq!(json["payload"]["capture"]["fullText"], "hello");
    }

    #[test]
    fn test_roundtrip_error_payload() {
        let envelope = encode(
            "err-1",
            TS,
            Payload::Error(ExtensionErrorPayload {
                protocol_version: String::new(),
                code: "ERR_TIMEOUT".to_string(),
                message: "tab did not respond".to_string(),
                recoverable: true,
            }),
        );
        let decoded = decode(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_timestamp_needs_offset() {
        let naive = encode("m", "2026-03-01T10:00:00", capture_result("text"));
        assert_eq!(
            decode(&naive.to_json().unwrap()).unwrap_err().code,
            ErrorCode::PayloadInvalid
        );

        let offset = encode("m", "2026-03-01T10:00:00+02:00", capture_result("text"));
        assert_eq!(decode(&offset.to_json().unwrap()).unwrap(), offset);
    }

    #[test]
    fn test_rejects_non_object() {
        let err = decode("[1, 2, 3]").unwrap_err();
        assert_eq!(err.code, ErrorCode::PayloadInvalid);
        let err = decode("not json at all").unwrap_err();
        assert_eq!(err.code, ErrorCode::PayloadInvalid);
    }

    #[test]
    fn test_rejects_missing_fields_and_unknown_type() {
        let missing_id = serde_json::json!({
            "type": "extension-error",
            "timestamp": TS,
            "payload": {"protocolVersion": "1", "code": "ERR_TIMEOUT", "message": "x"}
        });
        assert_eq!(
            decode(&missing_id.to_string()).unwrap_err().code,
            ErrorCode::PayloadInvalid
        );

        let unknown_type = serde_json::json!({
            "id": "a",
            "type": "extension-telemetry",
            "timestamp": TS,
            "payload": {"protocolVersion": "1"}
        });
        assert_eq!(
            decode(&unknown_type.to_string()).unwrap_err().code,
            ErrorCode::PayloadInvalid
        );

        let missing_version = raw(serde_json::json!({"capture": {}}));
        assert_eq!(decode(&missing_version).unwrap_err().code, ErrorCode::PayloadInvalid);
    }

    #[test]
    fn test_version_checked_before_shape() {
        // Everything except the version is garbage
        let garbage = serde_json::json!({
            "id": 42,
            "type": "nonsense",
            "payload": {"protocolVersion": "2", "capture": "nope"}
        });
        assert_eq!(
            decode(&garbage.to_string()).unwrap_err().code,
            ErrorCode::ProtocolVersion
        );

        let numeric = raw(serde_json::json!({"protocolVersion": 1}));
        assert_eq!(decode(&numeric).unwrap_err().code, ErrorCode::ProtocolVersion);
    }

    #[test]
    fn test_rejects_bad_heading_level() {
        let payload = serde_json::json!({
            "protocolVersion": "1",
            "capture": {
                "url": "https://example.com",
                "title": "t",
                "fullText": "body",
                "headings": [{"level": 7, "text": "too deep"}]
            }
        });
        assert_eq!(decode(&raw(payload)).unwrap_err().code, ErrorCode::PayloadInvalid);
    }

    #[test]
    fn test_full_text_size_limit_boundary() {
        let at_limit = "a".repeat(MAX_FULL_TEXT_CHARS);
        let envelope = encode("m", TS, capture_result(&at_limit));
        assert!(decode(&envelope.to_json().unwrap()).is_ok());

        let over_limit = "a".repeat(MAX_FULL_TEXT_CHARS + 1);
        let envelope = encode("m", TS, capture_result(&over_limit));
        let err = decode(&envelope.to_json().unwrap()).unwrap_err();
        assert_eq!(err.code, ErrorCode::PayloadTooLarge);
        assert_eq!(
            validate(&envelope, MessageType::ExtensionCaptureResult).unwrap_err().code,
            ErrorCode::PayloadTooLarge
        );
    }

    #[test]
    fn test_validate_checks_expected_type_and_version() {
        let envelope = encode("m", TS, capture_result("text"));
        assert!(validate(&envelope, MessageType::ExtensionCaptureResult).is_ok());
        assert_eq!(
            validate(&envelope, MessageType::ExtensionError).unwrap_err().code,
            ErrorCode::PayloadInvalid
        );

        let mut skewed = envelope;
        skewed.payload.set_protocol_version("0.9");
        assert_eq!(
            validate(&skewed, MessageType::ExtensionCaptureResult).unwrap_err().code,
            ErrorCode::ProtocolVersion
        );
    }

    proptest! {
        #[test]
        fn prop_capture_result_roundtrip(
            id in "[a-zA-Z0-9-]{1,36}",
            url in "https://[a-z]{1,12}\\.com/[a-z0-9/]{0,20}",
            title in ".{0,60}",
            full_text in ".{0,400}",
            site_name in proptest::option::of("[A-Za-z ]{1,20}"),
            level in 1u8..=6,
        ) {
            let payload = Payload::CaptureResult(ExtensionCaptureResult {
                protocol_version: String::new(),
                capture: BrowserCapture {
                    url,
                    title,
                    full_text,
                    headings: vec![Heading { level, text: "h".to_string() }],
                    site_name,
                    ..Default::default()
                },
            });
            let envelope = encode(id, TS, payload);
            let decoded = decode(&envelope.to_json().unwrap()).unwrap();
            prop_assert_eq!(decoded, envelope);
        }

        #[test]
        fn prop_request_roundtrip(
            request_id in "[a-f0-9-]{1,36}",
            timeout_ms in 1u64..60_000,
            include in any::<bool>(),
        ) {
            let payload = Payload::CaptureRequest(HostCaptureRequest {
                protocol_version: String::new(),
                request_id,
                mode: TriggerMode::ManualMenu,
                requested_at: TS.to_string(),
                timeout_ms,
                include_selection_text: include,
            });
            let envelope = encode("req", TS, payload);
            let decoded = decode(&envelope.to_json().unwrap()).unwrap();
            prop_assert_eq!(decoded, envelope);
        }

        #[test]
        fn prop_foreign_version_always_rejected(
            version in "[0-9a-z.]{0,8}",
            junk_type in ".{0,12}",
            junk_text in proptest::option::of(".{0,40}"),
        ) {
            prop_assume!(version != PROTOCOL_VERSION);
            let message = serde_json::json!({
                "id": "x",
                "type": junk_type,
                "payload": {"protocolVersion": version, "capture": {"fullText": junk_text}},
            });
            let err = decode(&message.to_string()).unwrap_err();
            prop_assert_eq!(err.code, ErrorCode::ProtocolVersion);
        }
    }
}
