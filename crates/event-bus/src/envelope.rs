//! Wire envelope and two-phase codec.
//!
//! One stream carries heterogeneous event shapes that are told apart only by
//! their `event_type` string. Decoding therefore happens in two steps:
//!
//! 1. [`Envelope::decode`] reads just the discriminator (and the timestamp when
//!    present) and keeps a borrow of the raw bytes. Unknown fields are ignored.
//! 2. [`Envelope::decode_typed`] deserializes the raw bytes into the shape
//!    selected from the discriminator.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::{EventBusError, Result};

/// Events that can be published on the bus.
pub trait BusEvent: Serialize + Send + Sync {
    /// Returns the wire discriminator (the `event_type` field).
    fn event_type(&self) -> &str;

    /// Returns the partition key; all events sharing a key stay ordered.
    fn partition_key(&self) -> String;
}

#[derive(Deserialize)]
struct Header {
    event_type: serde_json::Value,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    timestamp: Option<DateTime<Utc>>,
}

/// A timestamp that cannot be parsed is treated as absent rather than
/// rejecting the whole envelope.
fn lenient_timestamp<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| serde_json::from_value(v).ok()))
}

/// First-phase view of a record: the discriminator plus the untouched bytes.
#[derive(Debug, Clone)]
pub struct Envelope<'a> {
    event_type: String,
    timestamp: Option<DateTime<Utc>>,
    raw: &'a [u8],
}

impl<'a> Envelope<'a> {
    /// Reads the discriminator from raw bytes.
    ///
    /// Fails only when the bytes are not a JSON object or carry no string
    /// `event_type`.
    pub fn decode(raw: &'a [u8]) -> Result<Self> {
        let header: Header = serde_json::from_slice(raw)
            .map_err(|e| EventBusError::malformed(None, e.to_string()))?;

        let event_type = match header.event_type {
            serde_json::Value::String(s) if !s.is_empty() => s,
            serde_json::Value::String(_) => {
                return Err(EventBusError::malformed(None, "event_type is empty"));
            }
            other => {
                return Err(EventBusError::malformed(
                    None,
                    format!("event_type must be a string, got {other}"),
                ));
            }
        };

        Ok(Self {
            event_type,
            timestamp: header.timestamp,
            raw,
        })
    }

    /// Returns the discriminator.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Returns the envelope timestamp, if present and well-formed.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    /// Returns the raw encoded bytes.
    pub fn raw(&self) -> &'a [u8] {
        self.raw
    }

    /// Decodes the full payload into the shape selected for this event type.
    pub fn decode_typed<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(self.raw)
            .map_err(|e| EventBusError::malformed(Some(&self.event_type), e.to_string()))
    }
}

/// First decoding phase as a free function.
pub fn decode_envelope(raw: &[u8]) -> Result<Envelope<'_>> {
    Envelope::decode(raw)
}

/// Encodes an event for the wire.
pub fn encode<E: Serialize + ?Sized>(event: &E) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(event)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Shipped {
        event_type: String,
        order_id: i64,
    }

    #[test]
    fn decode_reads_discriminator_and_ignores_unknown_fields() {
        let raw = br#"{"event_type":"order_shipped","order_id":3,"carrier":"x","nested":{"a":1},
            "timestamp":"2024-05-01T10:00:00Z"}"#;
        let envelope = Envelope::decode(raw).unwrap();
        assert_eq!(envelope.event_type(), "order_shipped");
        assert_eq!(
            envelope.timestamp().unwrap().to_rfc3339(),
            "2024-05-01T10:00:00+00:00"
        );
        assert_eq!(envelope.raw(), raw);
    }

    #[test]
    fn decode_tolerates_bad_or_missing_timestamp() {
        let envelope = Envelope::decode(br#"{"event_type":"a","timestamp":"yesterday"}"#).unwrap();
        assert!(envelope.timestamp().is_none());

        let envelope = Envelope::decode(br#"{"event_type":"a"}"#).unwrap();
        assert!(envelope.timestamp().is_none());
    }

    #[test]
    fn decode_rejects_non_json() {
        let err = Envelope::decode(b"not json").unwrap_err();
        assert!(matches!(
            err,
            EventBusError::MalformedPayload {
                event_type: None,
                ..
            }
        ));
    }

    #[test]
    fn decode_rejects_missing_or_non_string_discriminator() {
        assert!(Envelope::decode(br#"{"order_id":1}"#).is_err());
        assert!(Envelope::decode(br#"{"event_type":7}"#).is_err());
        assert!(Envelope::decode(br#"{"event_type":""}"#).is_err());
        assert!(Envelope::decode(br#"[1,2,3]"#).is_err());
    }

    #[test]
    fn decode_typed_succeeds_on_matching_shape() {
        let envelope = Envelope::decode(br#"{"event_type":"order_shipped","order_id":3}"#).unwrap();
        let typed: Shipped = envelope.decode_typed().unwrap();
        assert_eq!(
            typed,
            Shipped {
                event_type: "order_shipped".into(),
                order_id: 3
            }
        );
    }

    #[test]
    fn decode_typed_reports_type_on_missing_field() {
        let envelope = Envelope::decode(br#"{"event_type":"order_shipped"}"#).unwrap();
        let err = envelope.decode_typed::<Shipped>().unwrap_err();
        match err {
            EventBusError::MalformedPayload { event_type, reason } => {
                assert_eq!(event_type.as_deref(), Some("order_shipped"));
                assert!(reason.contains("order_id"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn decode_typed_reports_mistyped_field() {
        let envelope =
            Envelope::decode(br#"{"event_type":"order_shipped","order_id":"three"}"#).unwrap();
        assert!(envelope.decode_typed::<Shipped>().is_err());
    }

    #[test]
    fn encode_produces_decodable_envelope() {
        let bytes = encode(&serde_json::json!({"event_type": "ping", "n": 1})).unwrap();
        assert_eq!(Envelope::decode(&bytes).unwrap().event_type(), "ping");
    }
}
