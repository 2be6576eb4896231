use std::sync::Arc;

use crossbeam_channel::Sender;
use tracing::{debug, info, warn};

use super::{Datagram, Shared};
use crate::socket::SocketRx;

// Copies the datagram out of the receive buffer and hands it to the handler loop
fn forward(
    inbound: &Sender<Datagram>,
    bytes: &[u8],
    sender_addr: std::net::SocketAddr,
) -> bool {
    let datagram = Datagram {
        bytes: bytes.into(),
        sender_addr,
    };

    inbound.send(datagram).is_ok()
}

/// Blocks on the socket and forwards every datagram, until the endpoint closes.
pub(super) fn run(shared: Arc<Shared>, mut socket_rx: SocketRx, inbound: Sender<Datagram>) {
    info!(role = %shared.role, "receiver loop started");

    'outer: while !shared.is_closed() {
        match socket_rx.wait_for_datagram(None) {
            Ok(Some((bytes, sender_addr))) => {
                debug!(role = %shared.role, len = bytes.len(), %sender_addr, "datagram received");

                if !forward(&inbound, bytes, sender_addr) {
                    break;
                }

                // Drain whatever else has arrived before waiting again
                loop {
                    match socket_rx.try_read_datagram() {
                        Ok(Some((bytes, sender_addr))) => {
                            debug!(role = %shared.role, len = bytes.len(), %sender_addr, "datagram received");

                            if !forward(&inbound, bytes, sender_addr) {
                                break 'outer;
                            }
                        }
                        Ok(None) => break,
                        Err(err) => {
                            warn!(role = %shared.role, %err, "error while receiving datagram");
                            break;
                        }
                    }
                }
            }
            Ok(None) => {}
            Err(err) => {
                if !shared.is_closed() {
                    warn!(role = %shared.role, %err, "error while receiving datagram");
                    std::thread::sleep(shared.tick());
                }
            }
        }
    }

    info!(role = %shared.role, "receiver loop ended");
}
