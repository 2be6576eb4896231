use std::io;
use std::net;
use std::sync::Arc;
use std::thread;
use std::time;

use tracing::debug;

const SOCKET_POLLING_KEY: usize = 0;

// How many times a send is retried while the socket buffer is full
const SEND_RETRY_LIMIT: u32 = 100;
const SEND_RETRY_DELAY: time::Duration = time::Duration::from_millis(1);

pub struct SocketTx {
    // Reference to non-blocking socket
    socket: Arc<net::UdpSocket>,
    // Probability of silently dropping an outbound datagram
    loss: f64,
}

pub struct SocketRx {
    // Reference to non-blocking socket
    socket: Arc<net::UdpSocket>,
    // Polling objects
    poller: Arc<polling::Poller>,
    poller_events: polling::Events,
    // Always-allocated receive buffer
    recv_buffer: Box<[u8]>,
}

/// Interrupts a [`SocketRx::wait_for_datagram`] call in progress on another thread.
#[derive(Clone)]
pub struct Waker {
    poller: Arc<polling::Poller>,
}

impl SocketTx {
    /// Writes a whole datagram to `addr`, waiting briefly if the socket buffer is full.
    pub fn send(&self, datagram: &[u8], addr: &net::SocketAddr) -> io::Result<()> {
        if self.loss > 0.0 && rand::random::<f64>() < self.loss {
            debug!(len = datagram.len(), %addr, "simulated loss");
            return Ok(());
        }

        let mut attempts = 0;

        loop {
            match self.socket.send_to(datagram, addr) {
                Ok(len) if len == datagram.len() => return Ok(()),
                Ok(len) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        format!("datagram truncated to {} of {} bytes", len, datagram.len()),
                    ));
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    attempts += 1;

                    if attempts > SEND_RETRY_LIMIT {
                        return Err(err);
                    }

                    thread::sleep(SEND_RETRY_DELAY);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl SocketRx {
    /// If a datagram can be read from the socket, returns it. Returns Ok(None) otherwise.
    pub fn try_read_datagram(&mut self) -> io::Result<Option<(&[u8], net::SocketAddr)>> {
        match self.socket.recv_from(&mut self.recv_buffer) {
            Ok((len, sender_addr)) => Ok(Some((&self.recv_buffer[..len], sender_addr))),
            Err(err) => match err.kind() {
                // The only acceptable error is WouldBlock, indicating no datagram
                io::ErrorKind::WouldBlock => Ok(None),
                _ => Err(err),
            },
        }
    }

    /// Blocks for a duration of up to `timeout` for an incoming datagram and returns it. Returns
    /// Ok(None) if nothing arrived in the alloted time, if polling awoke spuriously, or if a
    /// [`Waker`] interrupted the wait.
    pub fn wait_for_datagram(
        &mut self,
        timeout: Option<time::Duration>,
    ) -> io::Result<Option<(&[u8], net::SocketAddr)>> {
        // Interest must be renewed prior to each wait() call
        self.poller
            .modify(&*self.socket, polling::Event::readable(SOCKET_POLLING_KEY))?;

        self.poller_events.clear();

        let n = self.poller.wait(&mut self.poller_events, timeout)?;

        if n > 0 {
            self.try_read_datagram()
        } else {
            Ok(None)
        }
    }
}

impl Drop for SocketRx {
    fn drop(&mut self) {
        let _ = self.poller.delete(&*self.socket);
    }
}

impl Waker {
    pub fn wake(&self) {
        let _ = self.poller.notify();
    }
}

/// Creates a UDP socket bound to `bind_addr`, with send and receive buffers sized to
/// `datagram_size_max`.
pub fn new(
    bind_addr: net::SocketAddr,
    datagram_size_max: usize,
    loss: f64,
) -> io::Result<(SocketTx, SocketRx, Waker, net::SocketAddr)> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(bind_addr),
        socket2::Type::DGRAM,
        Some(socket2::Protocol::UDP),
    )?;
    socket.set_send_buffer_size(datagram_size_max)?;
    socket.set_recv_buffer_size(datagram_size_max)?;
    socket.bind(&bind_addr.into())?;
    socket.set_nonblocking(true)?;

    let socket: net::UdpSocket = socket.into();

    let local_addr = socket.local_addr()?;

    let poller = polling::Poller::new()?;

    unsafe {
        poller.add(&socket, polling::Event::readable(SOCKET_POLLING_KEY))?;
    }

    let socket_rc = Arc::new(socket);
    let poller_rc = Arc::new(poller);

    let tx = SocketTx {
        socket: Arc::clone(&socket_rc),
        loss,
    };

    let rx = SocketRx {
        socket: socket_rc,
        poller: Arc::clone(&poller_rc),
        poller_events: polling::Events::new(),
        recv_buffer: vec![0; datagram_size_max].into_boxed_slice(),
    };

    let waker = Waker { poller: poller_rc };

    Ok((tx, rx, waker, local_addr))
}
