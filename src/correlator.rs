use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};
use crate::message::Envelope;

#[derive(Debug)]
enum Slot {
    Idle,
    Waiting(String),
    Answered(Envelope),
}

#[derive(Debug)]
struct CorrelatorState {
    slot: Slot,
    closed: bool,
}

/// Single-slot rendezvous between a blocked request and the handler loop.
#[derive(Debug)]
pub struct Correlator {
    state: Mutex<CorrelatorState>,
    answered: Condvar,
}

impl Correlator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CorrelatorState {
                slot: Slot::Idle,
                closed: false,
            }),
            answered: Condvar::new(),
        }
    }

    /// Claims the slot for a reply of the given kind.
    pub fn arm(&self, kind: &str) -> Result<()> {
        let mut state = self.state.lock();

        if state.closed {
            return Err(Error::Closed);
        }

        match state.slot {
            Slot::Idle => {
                state.slot = Slot::Waiting(kind.to_owned());
                Ok(())
            }
            _ => Err(Error::RequestInFlight),
        }
    }

    /// Releases the slot without an answer.
    pub fn disarm(&self) {
        self.state.lock().slot = Slot::Idle;
    }

    /// Hands `envelope` to the waiting request if it is of the expected kind. Returns true if it
    /// was taken.
    pub fn offer(&self, envelope: &Envelope) -> bool {
        let mut state = self.state.lock();

        let expected = matches!(&state.slot, Slot::Waiting(kind) if *kind == envelope.kind);

        if expected {
            state.slot = Slot::Answered(envelope.clone());
            self.answered.notify_all();
        }

        expected
    }

    /// Blocks until the armed request is answered, or until the correlator is closed. Releases the
    /// slot either way.
    pub fn wait(&self) -> Option<Envelope> {
        let mut state = self.state.lock();

        loop {
            if let Slot::Answered(_) = state.slot {
                break;
            }

            if state.closed {
                state.slot = Slot::Idle;
                return None;
            }

            self.answered.wait(&mut state);
        }

        match std::mem::replace(&mut state.slot, Slot::Idle) {
            Slot::Answered(envelope) => Some(envelope),
            _ => None,
        }
    }

    /// Permanently unblocks any waiting request with no answer.
    pub fn close(&self) {
        let mut state = self.state.lock();

        state.closed = true;
        state.slot = Slot::Idle;

        self.answered.notify_all();
    }
}
