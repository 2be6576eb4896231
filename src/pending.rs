use std::collections::{BTreeMap, BTreeSet};
use std::time;

use parking_lot::{Condvar, Mutex};

use crate::message::{Envelope, Message};
use crate::protocol;

#[derive(Debug)]
struct PendingEntry {
    envelope: Envelope,
    elapsed_ms: u64,
}

#[derive(Debug, Default)]
struct PendingState {
    // Messages awaiting a Received, by id
    entries: BTreeMap<i64, PendingEntry>,
    // Subset of entries which hold the ordering barrier
    ordered: BTreeSet<i64>,
}

/// Action owed for a pending message whose retry timeout elapsed.
#[derive(Debug, PartialEq)]
pub enum Expired {
    /// Resend this message as-is.
    Resend(Envelope),
    /// A heartbeat went unanswered.
    Heartbeat(i64),
}

/// Reliable messages awaiting acknowledgment, and the ordering barrier they hold.
#[derive(Debug, Default)]
pub struct PendingTable {
    state: Mutex<PendingState>,
    // Signaled whenever the ordered set may have become empty
    barrier: Condvar,
}

impl PendingTable {
    pub fn new() -> Self {
        Default::default()
    }

    /// Starts tracking `envelope` if it requires acknowledgment and is not already tracked.
    /// Returns true if a new entry was created.
    pub fn register(&self, envelope: &Envelope) -> bool {
        if !envelope.reliability.requires_ack() {
            return false;
        }

        let mut state = self.state.lock();

        if state.entries.contains_key(&envelope.id) {
            return false;
        }

        state.entries.insert(
            envelope.id,
            PendingEntry {
                envelope: envelope.clone(),
                elapsed_ms: 0,
            },
        );

        if envelope.reliability.is_ordered() {
            state.ordered.insert(envelope.id);
        }

        true
    }

    /// Stops tracking the message with the given id. Returns true if it was being tracked.
    pub fn acknowledge(&self, id: i64) -> bool {
        let mut state = self.state.lock();

        let removed = state.entries.remove(&id).is_some();

        if state.ordered.remove(&id) && state.ordered.is_empty() {
            self.barrier.notify_all();
        }

        removed
    }

    /// Adds `delta_ms` to the waiting time of every entry, and returns the entries which reached
    /// `timeout_ms`. The waiting time of a resent message starts over; that of a heartbeat does
    /// not.
    pub fn advance(&self, delta_ms: u64, timeout_ms: u64) -> Vec<Expired> {
        let mut state = self.state.lock();

        let mut expired = Vec::new();

        for (&id, entry) in state.entries.iter_mut() {
            entry.elapsed_ms += delta_ms;

            if entry.elapsed_ms >= timeout_ms {
                if entry.envelope.kind == protocol::Alive::KIND {
                    // Stays expired, and is reported on every call until acknowledged
                    expired.push(Expired::Heartbeat(id));
                } else {
                    entry.elapsed_ms = 0;
                    expired.push(Expired::Resend(entry.envelope.clone()));
                }
            }
        }

        expired
    }

    /// Blocks for up to `timeout` until no ordered message awaits acknowledgment. Returns true if
    /// the barrier is open.
    pub fn wait_ordered_clear(&self, timeout: time::Duration) -> bool {
        let mut state = self.state.lock();

        if !state.ordered.is_empty() {
            self.barrier.wait_for(&mut state, timeout);
        }

        state.ordered.is_empty()
    }

    /// Wakes every thread blocked in [`PendingTable::wait_ordered_clear`].
    pub fn wake(&self) {
        self.barrier.notify_all();
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();

        state.entries.clear();
        state.ordered.clear();

        self.barrier.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn ordered_len(&self) -> usize {
        self.state.lock().ordered.len()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.state.lock().entries.contains_key(&id)
    }
}
