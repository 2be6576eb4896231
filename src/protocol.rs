//! Message kinds used by the transport itself.

use serde::{Deserialize, Serialize};

use crate::message::Message;
use crate::Reliability;

/// Announces that the next `number_of_parts` raw datagrams from the same peer are fragments of
/// one message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pack {
    pub number_of_parts: usize,
}

impl Message for Pack {
    const KIND: &'static str = "tether.Pack";
    const RELIABILITY: Reliability = Reliability::Unreliable;
}

/// Acknowledges the message whose id is `received_id`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Received {
    pub received_id: i64,
}

impl Message for Received {
    const KIND: &'static str = "tether.Received";
    const RELIABILITY: Reliability = Reliability::Unreliable;
}

/// Heartbeat. Tracked until acknowledged like any reliable message, but never resent: an
/// unanswered heartbeat raises [`Handler::connectivity_changed`](crate::Handler) instead.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alive {}

impl Message for Alive {
    const KIND: &'static str = "tether.Alive";
    const RELIABILITY: Reliability = Reliability::Reliable;
}

