use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ─── Topic ────────────────────────────────────────────────────────

/// Stream the demo subscribes to when no topic is configured.
pub const DEFAULT_TOPIC: &str = "streams.dimo.eth/firehose/weather";

/// Named logical stream in the pub/sub network.
///
/// Immutable once constructed; the process subscribes to exactly one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Topic(String);

impl Topic {
    pub fn new(id: impl Into<String>) -> Result<Self, CoreError> {
        let id = id.into();
        // Surrounding whitespace would silently address a different stream.
        if id.is_empty() || id.trim().len() != id.len() {
            return Err(CoreError::InvalidTopic(id));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Topic {
    fn default() -> Self {
        Self(DEFAULT_TOPIC.to_owned())
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Topic {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Topic {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.0
    }
}

// ─── Partition ────────────────────────────────────────────────────

/// One parallel delivery channel within a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionId(u32);

impl PartitionId {
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    pub const fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for PartitionId {
    fn from(index: u32) -> Self {
        Self(index)
    }
}

// ─── Message ──────────────────────────────────────────────────────

/// One weather reading as published on the stream.
///
/// Values pass through unvalidated: non-finite or out-of-range coordinates
/// are accepted and left for the consumer to interpret.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Ambient temperature in degrees Celsius.
    pub ambient_temp: f64,
    pub latitude: f64,
    pub longitude: f64,
}

impl Message {
    pub fn new(ambient_temp: f64, latitude: f64, longitude: f64) -> Self {
        Self {
            ambient_temp,
            latitude,
            longitude,
        }
    }
}

/// Wire envelope `{ "data": { ... } }`. Unknown sibling fields are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub data: Message,
}

impl Envelope {
    pub fn new(data: Message) -> Self {
        Self { data }
    }

    /// Decode a JSON text frame.
    pub fn decode(text: &str) -> Result<Self, CoreError> {
        serde_json::from_str(text).map_err(|e| CoreError::Decode(e.to_string()))
    }

    /// Decode an already-parsed JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self, CoreError> {
        serde_json::from_value(value).map_err(|e| CoreError::Decode(e.to_string()))
    }

    pub fn encode(&self) -> Result<String, CoreError> {
        serde_json::to_string(self).map_err(|e| CoreError::Encode(e.to_string()))
    }

    pub fn into_message(self) -> Message {
        self.data
    }
}

impl From<Message> for Envelope {
    fn from(data: Message) -> Self {
        Self { data }
    }
}

// ─── Error ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("invalid topic identifier: {0:?}")]
    InvalidTopic(String),

    #[error("undecodable payload: {0}")]
    Decode(String),

    #[error("unencodable payload: {0}")]
    Encode(String),
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_topic_is_weather_firehose() {
        assert_eq!(Topic::default().as_str(), DEFAULT_TOPIC);
    }

    #[test]
    fn topic_rejects_empty_and_padded() {
        assert!(Topic::new("").is_err());
        assert!(Topic::new("   ").is_err());
        assert!(Topic::new(" a/b ").is_err());
        assert_eq!(Topic::new("a/b").expect("valid").as_str(), "a/b");
    }

    #[test]
    fn topic_parse_and_display() {
        let topic: Topic = "streams.example.eth/feed".parse().expect("parse");
        assert_eq!(topic.to_string(), "streams.example.eth/feed");
    }

    #[test]
    fn topic_deserialize_validates() {
        let err = serde_json::from_str::<Topic>("\"\"");
        assert!(err.is_err());
        let ok: Topic = serde_json::from_str("\"x/y\"").expect("deserialize");
        assert_eq!(ok.as_str(), "x/y");
    }

    #[test]
    fn partition_ordering_and_display() {
        let a = PartitionId::new(0);
        let b = PartitionId::from(2);
        assert!(a < b);
        assert_eq!(b.to_string(), "2");
        assert_eq!(b.index(), 2);
    }

    #[test]
    fn envelope_decodes_camel_case_fields() {
        let env = Envelope::decode(
            r#"{"data":{"ambientTemp":21.5,"latitude":52.52,"longitude":13.405}}"#,
        )
        .expect("decode");
        assert_eq!(env.data, Message::new(21.5, 52.52, 13.405));
    }

    #[test]
    fn envelope_ignores_extra_fields() {
        let env = Envelope::decode(
            r#"{"data":{"ambientTemp":-3,"latitude":1,"longitude":2,"speed":40},"meta":{"v":1}}"#,
        )
        .expect("decode");
        assert_eq!(env.data.ambient_temp, -3.0);
    }

    #[test]
    fn envelope_accepts_out_of_range_values() {
        let env = Envelope::decode(
            r#"{"data":{"ambientTemp":9999,"latitude":-400,"longitude":720}}"#,
        )
        .expect("decode");
        assert_eq!(env.data.latitude, -400.0);
        assert_eq!(env.data.longitude, 720.0);
    }

    #[test]
    fn envelope_missing_field_is_decode_error() {
        let err = Envelope::decode(r#"{"data":{"ambientTemp":1,"latitude":2}}"#)
            .expect_err("missing longitude");
        assert!(matches!(err, CoreError::Decode(_)));
    }

    #[test]
    fn envelope_encode_uses_wire_names() {
        let text = Envelope::new(Message::new(1.0, 2.0, 3.0))
            .encode()
            .expect("encode");
        assert!(text.contains("\"ambientTemp\""));
        assert!(text.starts_with("{\"data\""));
    }

    #[test]
    fn encode_and_decode_errors_are_distinct() {
        let decode = CoreError::Decode("eof".into());
        let encode = CoreError::Encode("eof".into());
        assert_ne!(decode, encode);
        assert!(encode.to_string().starts_with("unencodable payload"));
        assert!(decode.to_string().starts_with("undecodable payload"));
    }
}
