//! Messages and their wire representation.

use std::net;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::Reliability;

/// Peer identifier meaning "not known".
pub const UNKNOWN_PEER: i64 = -1;

/// A kind of message which can be carried by an endpoint.
///
/// The value itself is the payload: it is serialized into the `payload` object of the wire
/// document, and must therefore serialize to a JSON object.
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use tether::{Message, Reliability};
///
/// #[derive(Serialize, Deserialize)]
/// struct EndTurn {
///     player: u32,
/// }
///
/// impl Message for EndTurn {
///     const KIND: &'static str = "game.EndTurn";
///     const RELIABILITY: Reliability = Reliability::OrderedAndReliable;
/// }
/// ```
pub trait Message: Serialize + DeserializeOwned + Send + 'static {
    /// Type tag written to the `type` field. Must be unique within a registry.
    const KIND: &'static str;

    /// How messages of this kind are acknowledged and ordered.
    const RELIABILITY: Reliability;

    /// If true, [`Message::process`] is handed to the application's
    /// [`Scheduler`](crate::Scheduler) instead of running on the handler thread.
    const MAIN_THREAD: bool = false;

    /// Side effect run after the application's receive hook accepted the message.
    fn process(self) {}
}

/// A message together with its addressing and protocol metadata.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    /// Assigned by the sending endpoint when first serialized; -1 before that.
    pub id: i64,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub reliability: Reliability,
    pub kind: String,
    pub payload: Map<String, Value>,
    /// Source of a received message.
    pub sender_addr: Option<net::SocketAddr>,
    /// Destination of a message to be sent.
    pub receiver_addr: Option<net::SocketAddr>,
}

// Field names are part of the wire format
#[derive(Serialize, Deserialize)]
struct WireMessage {
    id: i64,
    #[serde(rename = "senderId", default = "unknown_peer")]
    sender_id: i64,
    #[serde(rename = "receiverId", default = "unknown_peer")]
    receiver_id: i64,
    #[serde(rename = "type")]
    kind: String,
    payload: Map<String, Value>,
}

fn unknown_peer() -> i64 {
    UNKNOWN_PEER
}

impl Envelope {
    /// Serializes `message` into a new envelope with no id and no address.
    pub fn new<M: Message>(message: &M) -> Result<Self> {
        let payload = match serde_json::to_value(message)? {
            Value::Object(map) => map,
            // Unit structs serialize to null
            Value::Null => Map::new(),
            other => {
                return Err(Error::Decode(serde::de::Error::custom(format!(
                    "payload of `{}` must be an object, found {}",
                    M::KIND,
                    other
                ))));
            }
        };

        Ok(Self {
            id: -1,
            sender_id: UNKNOWN_PEER,
            receiver_id: UNKNOWN_PEER,
            reliability: M::RELIABILITY,
            kind: M::KIND.to_owned(),
            payload,
            sender_addr: None,
            receiver_addr: None,
        })
    }

    pub fn with_receiver(mut self, addr: net::SocketAddr) -> Self {
        self.receiver_addr = Some(addr);
        self
    }

    pub fn with_sender_id(mut self, sender_id: i64) -> Self {
        self.sender_id = sender_id;
        self
    }

    pub fn with_receiver_id(mut self, receiver_id: i64) -> Self {
        self.receiver_id = receiver_id;
        self
    }

    /// Returns true if this envelope carries a message of kind `M`.
    pub fn is<M: Message>(&self) -> bool {
        self.kind == M::KIND
    }

    /// Deserializes the payload as a message of kind `M`.
    pub fn decode<M: Message>(&self) -> Result<M> {
        if !self.is::<M>() {
            return Err(Error::KindMismatch {
                expected: M::KIND.to_owned(),
                found: self.kind.clone(),
            });
        }

        if self.payload.is_empty() {
            // Unit structs only deserialize from null
            if let Ok(message) = M::deserialize(Value::Null) {
                return Ok(message);
            }
        }

        Ok(M::deserialize(Value::Object(self.payload.clone()))?)
    }

    /// Produces the canonical, whitespace-free wire encoding.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let wire = WireMessage {
            id: self.id,
            sender_id: self.sender_id,
            receiver_id: self.receiver_id,
            kind: self.kind.clone(),
            payload: self.payload.clone(),
        };

        Ok(serde_json::to_vec(&wire)?)
    }
}

/// A message decoded from the wire whose kind has not been resolved yet.
#[derive(Debug)]
pub struct Decoded {
    pub id: i64,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub kind: String,
    pub payload: Map<String, Value>,
}

impl Decoded {
    /// Completes the envelope once the registry has supplied the kind's reliability.
    pub fn into_envelope(self, reliability: Reliability, sender_addr: net::SocketAddr) -> Envelope {
        Envelope {
            id: self.id,
            sender_id: self.sender_id,
            receiver_id: self.receiver_id,
            reliability,
            kind: self.kind,
            payload: self.payload,
            sender_addr: Some(sender_addr),
            receiver_addr: None,
        }
    }
}

/// Attempts a canonical decode of `bytes`.
pub fn decode(bytes: &[u8]) -> Result<Decoded> {
    let wire: WireMessage = serde_json::from_slice(bytes)?;

    Ok(Decoded {
        id: wire.id,
        sender_id: wire.sender_id,
        receiver_id: wire.receiver_id,
        kind: wire.kind,
        payload: wire.payload,
    })
}
