/*

Tether makes a distinction between messages and datagrams.

# Messages

A message is a JSON document with an id, the optional ids of its sender and receiver, a type tag
and an arbitrary object payload:

  {"id":3,"senderId":-1,"receiverId":-1,"type":"chat.Say","payload":{"text":"hi"}}

The id is assigned by the sending endpoint at the moment the message is serialized for the wire,
and increases monotonically from zero for as long as the endpoint is running. A resend reuses the
id of the original transmission.

The type tag selects an entry in the message registry, which knows how the kind should be treated
on arrival: whether it must be acknowledged, and where its processing hook runs.

# Reliability

Each kind declares one of three reliability classes:

  Unreliable          sent once, never acknowledged
  Reliable            acknowledged by the receiver, resent until acknowledged
  OrderedAndReliable  as Reliable, and no other message leaves the endpoint until acknowledged

The receiver of a Reliable or OrderedAndReliable message immediately answers with a Received
message naming its id. The sender keeps the message in its pending table until that answer
arrives. Every 10ms the pending table is scanned, and any message which has waited for 1000ms is
resent under its original id. There is no retry ceiling.

Heartbeats (Alive messages) are tracked like any reliable message, but are never resent. Instead,
the application is notified that the remote end has stopped answering.

The ordering barrier is global to the endpoint: while any OrderedAndReliable message remains
unacknowledged, the sender holds every queued message, regardless of destination. Forced sends
(acknowledgments, pack announcements and resends) bypass the barrier.

# Fragmentation

A message whose encoding exceeds the maximum datagram size (65507 bytes) is sent as a pack. A
Pack message announcing the number of fragments goes out first, followed by the fragments
themselves. Each fragment is a raw datagram made of the marker byte 'P' and the next (max - 1)
bytes of the encoded message:

  {"id":7,...,"type":"tether.Pack","payload":{"numberOfParts":4}}
  P{"id":6,"senderId":-1,...
  P...
  P...
  P...}}

A fragment can never be mistaken for a message, because no JSON document starts with 'P'. The
receiver collects fragments in arrival order until the announced count is reached, then strips
the markers and decodes the result. Fragments carry no index, so only one pack may be in flight
between two endpoints, and reordered fragments produce a corrupt pack which is discarded.

# Threads

A running endpoint owns four threads:

  receiver  reads datagrams from the socket into the inbound channel
  sender    drains the outbound channels, encodes, fragments and writes datagrams
  handler   decodes inbound datagrams, acknowledges, reassembles and runs application callbacks
  retry     scans the pending table and schedules resends

Stopping the endpoint marks it closed and wakes the receiver; the other threads notice within one
tick. The socket is released when the receiver exits.

*/

mod correlator;
pub mod endpoint;
mod epoch;
mod error;
mod fragment;
pub mod message;
mod pending;
pub mod protocol;
pub mod registry;
mod socket;

pub use endpoint::{Config, Endpoint, Handler, Outbox, Scheduler, ShutdownReport};
pub use error::{Error, Result};
pub use message::{Envelope, Message, UNKNOWN_PEER};
pub use registry::Registry;

/// Well-known port bound by server endpoints.
pub const DEFAULT_PORT: u16 = 8533;

/// Largest payload of a single UDP datagram over IPv4.
pub const DATAGRAM_SIZE_MAX: usize = 65507;

/// Determines how a message kind is acknowledged, resent and ordered.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Reliability {
    /// Sent once, never acknowledged.
    Unreliable,
    /// Resent until acknowledged by the receiver.
    Reliable,
    /// Resent until acknowledged, and holds back every other non-forced send until then.
    OrderedAndReliable,
}

impl Reliability {
    /// Returns true if the receiver must answer with a `Received` message.
    pub fn requires_ack(self) -> bool {
        self != Reliability::Unreliable
    }

    /// Returns true if the message blocks the ordering barrier until acknowledged.
    pub fn is_ordered(self) -> bool {
        self == Reliability::OrderedAndReliable
    }
}

/// Which side of the transport an endpoint plays.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Role {
    /// Binds [`Config::server_port`].
    Server,
    /// Binds an ephemeral port.
    Client,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Server => "server",
            Role::Client => "client",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
