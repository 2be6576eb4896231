use std::net;
use std::sync::Arc;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, info, warn};

use super::{guarded, Datagram, Handler, Outbox, Scheduler};
use crate::error::{Error, Result};
use crate::fragment::Reassembly;
use crate::message::{self, Decoded, Envelope};
use crate::protocol::{Pack, Received};

/// Owns the inbound side of one run: reassembly state, acknowledgments and delivery.
pub(super) struct Dispatcher {
    outbox: Outbox,
    handler: Arc<dyn Handler>,
    scheduler: Option<Arc<dyn Scheduler>>,
    reassembly: Reassembly,
}

/// Decodes and delivers inbound datagrams until the endpoint closes. Errors are logged and the
/// offending datagram dropped.
pub(super) fn run(mut dispatcher: Dispatcher, inbound: Receiver<Datagram>) {
    let shared = Arc::clone(&dispatcher.outbox.shared);

    info!(role = %shared.role, "handler loop started");

    let tick = shared.tick();

    while !shared.is_closed() {
        match inbound.recv_timeout(tick) {
            Ok(datagram) => dispatcher.handle_datagram(datagram),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    info!(role = %shared.role, "handler loop ended");
}

impl Dispatcher {
    pub fn new(
        outbox: Outbox,
        handler: Arc<dyn Handler>,
        scheduler: Option<Arc<dyn Scheduler>>,
    ) -> Self {
        Self {
            outbox,
            handler,
            scheduler,
            reassembly: Reassembly::new(),
        }
    }

    pub fn handler(&self) -> Arc<dyn Handler> {
        Arc::clone(&self.handler)
    }

    fn handle_datagram(&mut self, datagram: Datagram) {
        let sender_addr = datagram.sender_addr;

        // While a pack is announced, anything which does not decode as a message is taken as a
        // fragment
        let result = match message::decode(&datagram.bytes) {
            Ok(decoded) => self.dispatch(decoded, sender_addr),
            Err(_) if self.reassembly.is_pending() => {
                self.handle_fragment(datagram.bytes, sender_addr)
            }
            Err(err) => Err(err),
        };

        if let Err(err) = result {
            warn!(
                role = %self.outbox.shared.role,
                %sender_addr,
                %err,
                "dropped inbound datagram"
            );
        }
    }

    fn handle_fragment(&mut self, bytes: Box<[u8]>, sender_addr: net::SocketAddr) -> Result<()> {
        let part = self.reassembly.fragments_received() + 1;

        match self.reassembly.push(bytes)? {
            None => {
                debug!(role = %self.outbox.shared.role, part, "fragment received");
                Ok(())
            }
            Some(bytes) => {
                debug!(
                    role = %self.outbox.shared.role,
                    parts = part,
                    len = bytes.len(),
                    "pack reassembled"
                );

                let decoded = message::decode(&bytes)
                    .map_err(|err| Error::reassembly(format!("pack does not decode: {}", err)))?;

                self.dispatch(decoded, sender_addr)
            }
        }
    }

    fn dispatch(&mut self, decoded: Decoded, sender_addr: net::SocketAddr) -> Result<()> {
        let reliability = self
            .outbox
            .registry
            .reliability(&decoded.kind)
            .ok_or_else(|| Error::UnknownKind(decoded.kind.clone()))?;

        let envelope = decoded.into_envelope(reliability, sender_addr);

        if envelope.is::<Pack>() {
            let pack: Pack = envelope.decode()?;

            if pack.number_of_parts == 0 {
                return Err(Error::reassembly("pack announces no fragments"));
            }

            debug!(
                role = %self.outbox.shared.role,
                parts = pack.number_of_parts,
                "pack announced"
            );

            self.reassembly.announce(pack.number_of_parts);

            return Ok(());
        }

        if envelope.is::<Received>() {
            let received: Received = envelope.decode()?;

            let tracked = self.outbox.shared.pending.acknowledge(received.received_id);

            debug!(
                role = %self.outbox.shared.role,
                id = received.received_id,
                tracked,
                "acknowledgment received"
            );

            return Ok(());
        }

        self.deliver(envelope);

        Ok(())
    }

    fn deliver(&mut self, envelope: Envelope) {
        let role = self.outbox.shared.role;

        if envelope.reliability.requires_ack() {
            if let Err(err) = self.acknowledge(&envelope) {
                warn!(role = %role, id = envelope.id, %err, "failed to queue acknowledgment");
            }
        }

        debug!(
            role = %role,
            id = envelope.id,
            kind = %envelope.kind,
            sender_id = envelope.sender_id,
            "message received"
        );

        let accepted = guarded(role, "receive", || {
            self.handler.receive(&self.outbox, &envelope)
        });

        if accepted == Some(true) {
            if let Err(err) = self.process(&envelope) {
                warn!(role = %role, id = envelope.id, %err, "failed to process message");
            }
        }

        if self.outbox.shared.correlator.offer(&envelope) {
            debug!(role = %role, id = envelope.id, "request answered");
        }
    }

    fn acknowledge(&self, envelope: &Envelope) -> Result<()> {
        let mut ack = Envelope::new(&Received {
            received_id: envelope.id,
        })?
        .with_receiver_id(envelope.sender_id);

        ack.receiver_addr = envelope.sender_addr;

        self.outbox.send_forced(ack)
    }

    // Runs the message's own processing hook, on the main thread if its kind asks for it and a
    // scheduler was provided
    fn process(&self, envelope: &Envelope) -> Result<()> {
        let job = self.outbox.registry.prepare(envelope)?;

        match &self.scheduler {
            Some(scheduler) if self.outbox.registry.main_thread(&envelope.kind) => {
                scheduler.schedule(job);
            }
            _ => {
                guarded(self.outbox.shared.role, "process", job);
            }
        }

        Ok(())
    }
}
