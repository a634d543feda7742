//! Payload definitions
//!
//! Typed JSON bodies per command type, and the decoded `Message`.
//!
//! Only the `dps` map is open-ended; every other field is part of a fixed
//! schema for its command.

use serde::{Deserialize, Serialize};

use super::CommandType;
use crate::error::{Result, StubError};
use crate::state::Dps;

/// Sequence number used for unsolicited frames
pub const UNSOLICITED: u32 = 0;

/// A decoded frame: command, correlation number and typed body
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub command: CommandType,
    pub sequence: u32,
    pub payload: Payload,
}

impl Message {
    pub fn new(command: CommandType, sequence: u32, payload: Payload) -> Self {
        Self {
            command,
            sequence,
            payload,
        }
    }

    /// A message that answers nothing in particular
    pub fn unsolicited(command: CommandType, payload: Payload) -> Self {
        Self::new(command, UNSOLICITED, payload)
    }

    /// Whether this message carries no correlating sequence number
    pub fn is_unsolicited(&self) -> bool {
        self.sequence == UNSOLICITED
    }
}

/// Typed message body
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Heartbeats and acknowledgements
    Empty,
    Query(QueryPayload),
    Control(ControlPayload),
    Status(StatusPayload),
    Discovery(DiscoveryPayload),
    /// Body of a command this emulator does not interpret
    Raw(Vec<u8>),
}

/// Body of a DP_QUERY request or report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gw_id: Option<String>,

    pub dev_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "timestamp::optional"
    )]
    pub t: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dps: Option<Dps>,
}

impl QueryPayload {
    /// Request as a client sends it
    pub fn request(dev_id: impl Into<String>) -> Self {
        let dev_id = dev_id.into();
        Self {
            gw_id: Some(dev_id.clone()),
            dev_id,
            uid: None,
            t: None,
            dps: None,
        }
    }

    /// Report as the device answers it
    pub fn report(dev_id: impl Into<String>, dps: Dps) -> Self {
        let mut payload = Self::request(dev_id);
        payload.dps = Some(dps);
        payload
    }
}

/// Body of a CONTROL request or host-triggered push
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlPayload {
    pub dev_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    #[serde(with = "timestamp")]
    pub t: i64,

    pub dps: Dps,
}

impl ControlPayload {
    pub fn new(dev_id: impl Into<String>, t: i64, dps: Dps) -> Self {
        Self {
            dev_id: dev_id.into(),
            uid: None,
            t,
            dps,
        }
    }
}

/// Body of a STATUS push
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload {
    pub dev_id: String,

    pub dps: Dps,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "timestamp::optional"
    )]
    pub t: Option<i64>,
}

/// Body of a discovery announcement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryPayload {
    pub ip: String,
    pub gw_id: String,
    pub active: u8,
    pub ability: u8,
    pub mode: u8,
    pub encrypt: bool,
    pub product_key: String,
    pub version: String,
}

/// DP_QUERY frames carry either a device query/report or an announcement
#[derive(Deserialize)]
#[serde(untagged)]
enum QueryBody {
    Device(QueryPayload),
    Announcement(DiscoveryPayload),
}

impl Payload {
    /// Serialize to the JSON bytes that go on the wire (before encryption)
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let bytes = match self {
            Payload::Empty => Vec::new(),
            Payload::Query(p) => serde_json::to_vec(p).map_err(to_serialization)?,
            Payload::Control(p) => serde_json::to_vec(p).map_err(to_serialization)?,
            Payload::Status(p) => serde_json::to_vec(p).map_err(to_serialization)?,
            Payload::Discovery(p) => serde_json::to_vec(p).map_err(to_serialization)?,
            Payload::Raw(bytes) => bytes.clone(),
        };
        Ok(bytes)
    }

    /// Parse plaintext bytes into the schema for `command`
    pub fn parse(command: CommandType, bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Ok(Payload::Empty);
        }

        let payload = match command {
            CommandType::Query => match from_json::<QueryBody>(command, bytes)? {
                QueryBody::Device(p) => Payload::Query(p),
                QueryBody::Announcement(p) => Payload::Discovery(p),
            },
            CommandType::Control => Payload::Control(from_json(command, bytes)?),
            CommandType::Status => Payload::Status(from_json(command, bytes)?),
            CommandType::Heartbeat | CommandType::Unknown(_) => Payload::Raw(bytes.to_vec()),
        };
        Ok(payload)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Payload::Empty)
    }
}

fn from_json<'a, T: Deserialize<'a>>(command: CommandType, bytes: &'a [u8]) -> Result<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| StubError::MalformedFrame(format!("{} payload: {}", command, e)))
}

fn to_serialization(e: serde_json::Error) -> StubError {
    StubError::Serialization(e.to_string())
}

/// Unix timestamps that clients send either as numbers or as decimal strings
mod timestamp {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Text(String),
    }

    impl Raw {
        fn into_secs<E: serde::de::Error>(self) -> Result<i64, E> {
            match self {
                Raw::Int(t) => Ok(t),
                Raw::Text(s) => s
                    .trim()
                    .parse()
                    .map_err(|_| E::custom(format!("invalid timestamp {:?}", s))),
            }
        }
    }

    pub fn serialize<S: Serializer>(t: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(*t)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        Raw::deserialize(deserializer)?.into_secs()
    }

    pub mod optional {
        use super::Raw;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(t: &Option<i64>, serializer: S) -> Result<S::Ok, S::Error> {
            match t {
                Some(t) => serializer.serialize_some(t),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<i64>, D::Error> {
            Option::<Raw>::deserialize(deserializer)?
                .map(Raw::into_secs)
                .transpose()
        }
    }
}
