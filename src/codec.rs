//! Wire encoding of transaction events
//!
//! Every event is framed as an ordered tuple
//! `global:local:parent:method:TAG[:field...]`. Only Started events carry the
//! business payload fields. The field order and presence per event type is the
//! compatibility contract; [`WireFormat`] decides whether the tuple travels as
//! colon-delimited text or as an `rkyv` archive.

use crate::{CodecError, EventType, Payload, TxEvent};
use serde::{Deserialize, Serialize};

const SEPARATOR: char = ':';

/// Decoded form of any event on the wire
#[derive(Clone, Debug, PartialEq, Eq, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct WireRecord {
    /// Global transaction
    pub global_tx_id: String,
    /// Sub-transaction
    pub local_tx_id: String,
    /// Caller's sub-transaction
    pub parent_tx_id: String,
    /// Undo action key
    pub compensation_method: String,
    /// Which lifecycle event this is
    pub event_type: EventType,
    /// Business payload fields, flattened; empty for terminal events
    pub fields: Vec<String>,
}

impl WireRecord {
    /// Flatten an event into its wire tuple
    pub fn from_event(event: &TxEvent) -> Self {
        let fields = match event.event_type() {
            EventType::Started => payload_fields(event.payloads()),
            EventType::Ended | EventType::Aborted => Vec::new(),
        };
        Self {
            global_tx_id: event.global_tx_id().to_string(),
            local_tx_id: event.local_tx_id().to_string(),
            parent_tx_id: event.parent_tx_id().to_string(),
            compensation_method: event.compensation_method().to_string(),
            event_type: event.event_type(),
            fields,
        }
    }

    /// Colon-delimited text frame
    pub fn to_text(&self) -> String {
        let mut frame = String::new();
        let keys = [
            self.global_tx_id.as_str(),
            self.local_tx_id.as_str(),
            self.parent_tx_id.as_str(),
            self.compensation_method.as_str(),
        ];
        for key in keys {
            frame.push_str(&escape(key));
            frame.push(SEPARATOR);
        }
        frame.push_str(self.event_type.tag());
        for field in &self.fields {
            frame.push(SEPARATOR);
            frame.push_str(&escape(field));
        }
        frame
    }

    /// Parse a colon-delimited text frame
    pub fn from_text(frame: &str) -> Result<Self, CodecError> {
        let mut parts = frame.split(SEPARATOR);
        let mut next = |name: &'static str| {
            parts
                .next()
                .filter(|part| !part.is_empty())
                .ok_or(CodecError::MissingField(name))
        };

        let global_tx_id = unescape(next("global_tx_id")?)?;
        let local_tx_id = unescape(next("local_tx_id")?)?;
        let parent_tx_id = unescape(next("parent_tx_id")?)?;
        let compensation_method = unescape(next("compensation_method")?)?;
        let tag = next("event_type")?;
        let event_type =
            EventType::from_tag(tag).ok_or_else(|| CodecError::UnknownEventType(tag.into()))?;
        let fields = parts.map(unescape).collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            global_tx_id,
            local_tx_id,
            parent_tx_id,
            compensation_method,
            event_type,
            fields,
        })
    }

    /// `rkyv` archive of the record
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|bytes| bytes.to_vec())
            .map_err(|e| CodecError::Archive(e.to_string().into()))
    }

    /// Validate and deserialize an `rkyv` archive
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        // archives must be read from aligned memory
        let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(bytes.len());
        aligned.extend_from_slice(bytes);
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned)
            .map_err(|e| CodecError::Archive(e.to_string().into()))
    }
}

/// Physical representation of the wire tuple
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    /// UTF-8 colon-delimited text
    #[default]
    Text,
    /// `rkyv` archive
    Binary,
}

impl WireFormat {
    /// Encode an event
    pub fn encode(&self, event: &TxEvent) -> Result<Vec<u8>, CodecError> {
        let record = WireRecord::from_event(event);
        match self {
            Self::Text => Ok(record.to_text().into_bytes()),
            Self::Binary => record.to_bytes(),
        }
    }

    /// Decode a frame produced by [`encode`](Self::encode)
    pub fn decode(&self, frame: &[u8]) -> Result<WireRecord, CodecError> {
        match self {
            Self::Text => WireRecord::from_text(std::str::from_utf8(frame)?),
            Self::Binary => WireRecord::from_bytes(frame),
        }
    }
}

/// Object payloads contribute their values in declaration order, strings are
/// written verbatim and every other value as JSON text.
fn payload_fields(payloads: &[Payload]) -> Vec<String> {
    let mut fields = Vec::new();
    for payload in payloads {
        match payload {
            Payload::Object(map) => fields.extend(map.values().map(field_text)),
            other => fields.push(field_text(other)),
        }
    }
    fields
}

fn field_text(value: &Payload) -> String {
    match value {
        Payload::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn escape(field: &str) -> String {
    if !field.contains(['%', SEPARATOR]) {
        return field.to_owned();
    }
    field.replace('%', "%25").replace(SEPARATOR, "%3A")
}

fn unescape(field: &str) -> Result<String, CodecError> {
    if !field.contains('%') {
        return Ok(field.to_owned());
    }
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let code: String = chars.by_ref().take(2).collect();
        match code.as_str() {
            "25" => out.push('%'),
            "3A" | "3a" => out.push(SEPARATOR),
            _ => return Err(CodecError::InvalidEscape(field.into())),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn started() -> TxEvent {
        TxEvent::started(
            "G1".into(),
            "L1".into(),
            "P1".into(),
            "delete(User)".into(),
            vec![json!({"username": "alice", "email": "a@x.com"})],
        )
    }

    #[test]
    fn test_started_frame_layout() {
        let frame = WireFormat::Text.encode(&started()).unwrap();
        assert_eq!(
            String::from_utf8(frame).unwrap(),
            "G1:L1:P1:delete(User):TxStartedEvent:alice:a@x.com"
        );
    }

    #[test]
    fn test_terminal_frames_carry_no_fields() {
        let ended = TxEvent::ended("G1".into(), "L1".into(), "P1".into(), "delete(User)".into());
        let aborted = TxEvent::aborted("G1".into(), "L1".into(), "P1".into(), "delete(User)".into());

        assert_eq!(
            WireRecord::from_event(&ended).to_text(),
            "G1:L1:P1:delete(User):TxEndedEvent"
        );
        assert_eq!(
            WireRecord::from_event(&aborted).to_text(),
            "G1:L1:P1:delete(User):TxAbortedEvent"
        );
    }

    #[test]
    fn test_text_round_trip_recovers_all_fields() {
        let frame = WireFormat::Text.encode(&started()).unwrap();
        let record = WireFormat::Text.decode(&frame).unwrap();

        assert_eq!(record.global_tx_id, "G1");
        assert_eq!(record.local_tx_id, "L1");
        assert_eq!(record.parent_tx_id, "P1");
        assert_eq!(record.compensation_method, "delete(User)");
        assert_eq!(record.event_type, EventType::Started);
        assert_eq!(record.fields, vec!["alice".to_string(), "a@x.com".to_string()]);
    }

    #[test]
    fn test_binary_round_trip_matches_text_record() {
        let event = started();
        let from_binary = WireFormat::Binary
            .decode(&WireFormat::Binary.encode(&event).unwrap())
            .unwrap();
        assert_eq!(from_binary, WireRecord::from_event(&event));
    }

    #[test]
    fn test_separator_inside_fields_is_escaped() {
        let event = TxEvent::started(
            "G1".into(),
            "L1".into(),
            "G1".into(),
            "UserService::delete(User)".into(),
            vec![json!("50%:off"), json!(7), json!({"nested": {"a": 1}})],
        );
        let text = WireRecord::from_event(&event).to_text();
        assert_eq!(text.matches(':').count(), 7);

        let record = WireRecord::from_text(&text).unwrap();
        assert_eq!(record.compensation_method, "UserService::delete(User)");
        assert_eq!(record.fields, vec!["50%:off", "7", r#"{"a":1}"#]);
    }

    #[test]
    fn test_decode_rejects_malformed_frames() {
        assert!(matches!(
            WireRecord::from_text("G1:L1:P1"),
            Err(CodecError::MissingField("compensation_method"))
        ));
        assert!(matches!(
            WireRecord::from_text("G1:L1:P1:m:TxUnknown"),
            Err(CodecError::UnknownEventType(_))
        ));
        assert!(matches!(
            WireRecord::from_text("G1:L1:P1:m:TxEndedEvent:bad%zz"),
            Err(CodecError::InvalidEscape(_))
        ));
        assert!(WireFormat::Binary.decode(b"not an archive").is_err());
    }
}
