use std::net;
use std::sync::Arc;
use std::thread;
use std::time;

use crossbeam_channel::{select, Receiver};
use tracing::{debug, info, warn};

use super::{Outgoing, Shared};
use crate::error::{Error, Result};
use crate::fragment;
use crate::message::Envelope;
use crate::protocol::Pack;
use crate::socket::SocketTx;

// State owned by the sender loop. The write half of the socket lives here, so that the socket
// closes once the sender and receiver loops have exited, regardless of any outboxes still held.
struct Sender {
    shared: Arc<Shared>,
    socket_tx: SocketTx,
}

/// Serializes and transmits outbound messages until the endpoint closes.
///
/// Forced messages are always taken first. A queued message is held back while any ordered
/// message awaits acknowledgment, but forced messages keep flowing in the meantime, so that the
/// acknowledgments which open the barrier can still be sent.
pub(super) fn run(
    shared: Arc<Shared>,
    socket_tx: SocketTx,
    queue: Receiver<Outgoing>,
    forced: Receiver<Outgoing>,
) {
    let sender = Sender { shared, socket_tx };

    info!(role = %sender.shared.role, "sender loop started");

    let tick = sender.shared.tick();

    while !sender.shared.is_closed() {
        if let Ok(outgoing) = forced.try_recv() {
            sender.send_logged(outgoing);
            continue;
        }

        select! {
            recv(forced) -> outgoing => match outgoing {
                Ok(outgoing) => sender.send_logged(outgoing),
                Err(_) => break,
            },
            recv(queue) -> outgoing => match outgoing {
                Ok(outgoing) => {
                    if sender.await_barrier(&forced) {
                        sender.send_logged(outgoing);
                    }
                }
                Err(_) => break,
            },
            default(tick) => {}
        }
    }

    info!(role = %sender.shared.role, "sender loop ended");
}

impl Sender {
    // Waits for the ordering barrier to open while servicing forced traffic. Returns false if the
    // endpoint closed first.
    fn await_barrier(&self, forced: &Receiver<Outgoing>) -> bool {
        loop {
            if self.shared.is_closed() {
                return false;
            }

            while let Ok(outgoing) = forced.try_recv() {
                self.send_logged(outgoing);
            }

            if self.shared.pending.wait_ordered_clear(self.shared.tick()) {
                return true;
            }
        }
    }

    fn send_logged(&self, outgoing: Outgoing) {
        let kind = outgoing.envelope.kind.clone();

        if let Err(err) = self.send(outgoing) {
            warn!(role = %self.shared.role, %kind, %err, "error while sending message");
        }
    }

    fn send(&self, outgoing: Outgoing) -> Result<()> {
        let shared = &self.shared;

        let Outgoing {
            mut envelope,
            resend,
        } = outgoing;

        if shared.is_closed() {
            return Err(Error::Closed);
        }

        if resend && !shared.pending.contains(envelope.id) {
            debug!(role = %shared.role, id = envelope.id, "resend skipped, already acknowledged");
            return Ok(());
        }

        let addr = envelope
            .receiver_addr
            .or(shared.config.default_remote)
            .ok_or(Error::NoRecipient)?;

        if !resend {
            envelope.id = shared.next_id();
            envelope.receiver_addr = Some(addr);
        }

        let bytes = envelope.encode()?;

        // Registered before transmission, so that an acknowledgment cannot arrive for an
        // untracked id
        let registered = !resend && shared.pending.register(&envelope);

        if let Err(err) = self.transmit(&envelope, &bytes, &addr) {
            if registered {
                shared.pending.acknowledge(envelope.id);
            }
            return Err(err);
        }

        debug!(
            role = %shared.role,
            id = envelope.id,
            kind = %envelope.kind,
            len = bytes.len(),
            %addr,
            resend,
            "message sent"
        );

        Ok(())
    }

    // Writes the encoded message as one datagram, or as a pack announcement followed by fragments
    fn transmit(&self, envelope: &Envelope, bytes: &[u8], addr: &net::SocketAddr) -> Result<()> {
        let shared = &self.shared;
        let datagram_size_max = shared.config.datagram_size_max;

        if bytes.len() <= datagram_size_max {
            return self.socket_tx.send(bytes, addr).map_err(Error::Send);
        }

        let fragments = fragment::split(bytes, datagram_size_max);

        let mut pack = Envelope::new(&Pack {
            number_of_parts: fragments.len(),
        })?
        .with_sender_id(envelope.sender_id)
        .with_receiver_id(envelope.receiver_id);

        pack.id = shared.next_id();

        let pack_bytes = pack.encode()?;

        self.socket_tx
            .send(&pack_bytes, addr)
            .map_err(Error::Send)?;

        debug!(
            role = %shared.role,
            id = pack.id,
            packed_id = envelope.id,
            parts = fragments.len(),
            "pack announced"
        );

        let spacing = time::Duration::from_millis(shared.config.fragment_spacing_ms);

        for fragment in fragments.iter() {
            if shared.is_closed() {
                return Err(Error::Closed);
            }

            self.socket_tx.send(fragment, addr).map_err(Error::Send)?;

            thread::sleep(spacing);
        }

        Ok(())
    }
}
