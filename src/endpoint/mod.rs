use std::io;
use std::net;
use std::panic;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time;

use crossbeam_channel::{Receiver, Sender};
use tracing::{info, warn};

use crate::correlator::Correlator;
use crate::epoch::Epoch;
use crate::error::{Error, Result};
use crate::message::{Envelope, Message};
use crate::pending::PendingTable;
use crate::protocol;
use crate::registry::{Job, Registry};
use crate::socket;
use crate::{Role, DATAGRAM_SIZE_MAX, DEFAULT_PORT};

mod dispatch;
mod receiver;
mod retry;
mod sender;

const DATAGRAM_SIZE_MIN: usize = 2;

const RETRY_TIMEOUT_DEFAULT_MS: u64 = 1_000;

const TICK_DEFAULT_MS: u64 = 10;

const FRAGMENT_SPACING_DEFAULT_MS: u64 = 5;

const JOIN_TIMEOUT_DEFAULT_MS: u64 = 1_000;

/// Configuration for an [`Endpoint`] object.
#[derive(Clone, Debug)]
pub struct Config {
    /// Port bound by a server endpoint. Client endpoints always bind an ephemeral port.
    ///
    /// Default value: 8533
    pub server_port: u16,

    /// Local address to bind.
    ///
    /// Default value: 0.0.0.0
    pub bind_ip: net::IpAddr,

    /// Destination of messages sent without a receiver address. A client typically sets this to
    /// the address of its server.
    ///
    /// Default value: None
    pub default_remote: Option<net::SocketAddr>,

    /// Largest datagram written to the socket, also used as the socket's buffer size. Larger
    /// messages are fragmented.
    ///
    /// Minimum value: 2 \
    /// Maximum value: 65,507 \
    /// Default value: 65,507
    pub datagram_size_max: usize,

    /// Time a reliable message waits for its acknowledgment before being resent, in milliseconds.
    ///
    /// Default value: 1,000
    pub retry_timeout_ms: u64,

    /// Period of the handler and retry loops, in milliseconds.
    ///
    /// Minimum value: 1 \
    /// Default value: 10
    pub tick_ms: u64,

    /// Delay between two fragments of the same message, in milliseconds.
    ///
    /// Default value: 5
    pub fragment_spacing_ms: u64,

    /// Time [`Endpoint::stop`] waits for the duty loops to exit, in milliseconds.
    ///
    /// Default value: 1,000
    pub join_timeout_ms: u64,

    /// Probability of silently dropping each outbound datagram, for testing.
    ///
    /// Minimum value: 0.0 \
    /// Maximum value: < 1.0 \
    /// Default value: 0.0
    pub simulated_loss: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: DEFAULT_PORT,
            bind_ip: net::Ipv4Addr::UNSPECIFIED.into(),
            default_remote: None,
            datagram_size_max: DATAGRAM_SIZE_MAX,
            retry_timeout_ms: RETRY_TIMEOUT_DEFAULT_MS,
            tick_ms: TICK_DEFAULT_MS,
            fragment_spacing_ms: FRAGMENT_SPACING_DEFAULT_MS,
            join_timeout_ms: JOIN_TIMEOUT_DEFAULT_MS,
            simulated_loss: 0.0,
        }
    }
}

impl Config {
    fn validate(&self) {
        assert!(
            self.datagram_size_max >= DATAGRAM_SIZE_MIN,
            "invalid endpoint configuration: datagram_size_max < {}",
            DATAGRAM_SIZE_MIN
        );
        assert!(
            self.datagram_size_max <= DATAGRAM_SIZE_MAX,
            "invalid endpoint configuration: datagram_size_max > {}",
            DATAGRAM_SIZE_MAX
        );
        assert!(
            self.tick_ms > 0,
            "invalid endpoint configuration: tick_ms == 0"
        );
        assert!(
            (0.0..1.0).contains(&self.simulated_loss),
            "invalid endpoint configuration: simulated_loss outside [0, 1)"
        );
    }

    fn tick(&self) -> time::Duration {
        time::Duration::from_millis(self.tick_ms)
    }
}

/// Application side of an endpoint. Both methods run on one of the endpoint's own threads, and
/// must not block on the endpoint (e.g. by calling [`Outbox::request`]).
pub trait Handler: Send + Sync + 'static {
    /// Called once for every message delivered to the application. Returning true lets the
    /// message's own [`Message::process`] hook run.
    fn receive(&self, outbox: &Outbox, message: &Envelope) -> bool;

    /// Called when a heartbeat went unacknowledged for the retry timeout.
    fn connectivity_changed(&self, _outbox: &Outbox) {}
}

/// Runs processing hooks of kinds declaring [`Message::MAIN_THREAD`] on the application's main
/// thread.
pub trait Scheduler: Send + Sync + 'static {
    fn schedule(&self, job: Job);
}

/// Result of [`Endpoint::stop`].
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// Loops which exited in time.
    pub joined: Vec<&'static str>,
    /// Loops which did not exit within the join timeout, and were left running.
    pub abandoned: Vec<&'static str>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.abandoned.is_empty()
    }
}

// A raw datagram captured by the receiver loop
struct Datagram {
    bytes: Box<[u8]>,
    sender_addr: net::SocketAddr,
}

// A message on its way to the sender loop
struct Outgoing {
    envelope: Envelope,
    // Resends keep their id, and are dropped if acknowledged in the meantime
    resend: bool,
}

// State shared by the duty loops of one run
struct Shared {
    role: Role,
    config: Config,
    epoch: Epoch,
    closed: AtomicBool,
    // Id of the last message serialized; -1 before the first
    last_id: AtomicI64,
    pending: PendingTable,
    correlator: Correlator,
    waker: socket::Waker,
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn next_id(&self) -> i64 {
        self.last_id.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn tick(&self) -> time::Duration {
        self.config.tick()
    }

    /// Signals every loop to exit, and unblocks anything waiting on the endpoint.
    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.waker.wake();
        self.pending.wake();
        self.correlator.close();
    }
}

/// A handle for sending through a running endpoint.
///
/// Outboxes are cheap to clone and may be moved to other threads. An outbox belongs to one run of
/// its endpoint: once the endpoint stops, every operation fails with [`Error::Closed`], even if the
/// endpoint is started again.
#[derive(Clone)]
pub struct Outbox {
    shared: Arc<Shared>,
    registry: Arc<Registry>,
    local_addr: net::SocketAddr,
    queue_tx: Sender<Outgoing>,
    forced_tx: Sender<Outgoing>,
}

impl Outbox {
    fn enqueue(&self, envelope: Envelope, force: bool) -> Result<()> {
        if self.shared.is_closed() {
            return Err(Error::Closed);
        }

        if !self.registry.contains(&envelope.kind) {
            return Err(Error::UnknownKind(envelope.kind));
        }

        let outgoing = Outgoing {
            envelope,
            resend: false,
        };

        let channel = if force { &self.forced_tx } else { &self.queue_tx };

        channel.send(outgoing).map_err(|_| Error::Closed)
    }

    /// Queues a message. It will not leave the endpoint while an ordered message awaits its
    /// acknowledgment.
    pub fn send(&self, envelope: Envelope) -> Result<()> {
        self.enqueue(envelope, false)
    }

    /// Queues a message which bypasses the ordering barrier and every non-forced message.
    pub fn send_forced(&self, envelope: Envelope) -> Result<()> {
        self.enqueue(envelope, true)
    }

    /// Convenience for sending `message` to `addr`.
    pub fn send_to<M: Message>(&self, message: &M, addr: net::SocketAddr) -> Result<()> {
        self.send(Envelope::new(message)?.with_receiver(addr))
    }

    /// Sends `reply` back to wherever `request` came from.
    pub fn respond(&self, mut reply: Envelope, request: &Envelope) -> Result<()> {
        reply.receiver_id = request.sender_id;
        reply.receiver_addr = request.sender_addr;

        self.send(reply)
    }

    /// Sends `envelope`, then blocks until a message of kind `expected_kind` is delivered. Returns
    /// None if the endpoint stopped first.
    ///
    /// Only one request may be in flight per endpoint; a concurrent second request fails with
    /// [`Error::RequestInFlight`]. There is no timeout.
    pub fn request(&self, envelope: Envelope, expected_kind: &str) -> Result<Option<Envelope>> {
        self.shared.correlator.arm(expected_kind)?;

        if let Err(err) = self.send(envelope) {
            self.shared.correlator.disarm();
            return Err(err);
        }

        Ok(self.shared.correlator.wait())
    }

    /// Typed form of [`Outbox::request`].
    pub fn request_as<R: Message>(&self, envelope: Envelope) -> Result<Option<R>> {
        match self.request(envelope, R::KIND)? {
            Some(reply) => Ok(Some(reply.decode()?)),
            None => Ok(None),
        }
    }

    /// Sends a heartbeat to `addr`.
    pub fn heartbeat(&self, addr: net::SocketAddr) -> Result<()> {
        self.send_to(&protocol::Alive {}, addr)
    }

    pub fn role(&self) -> Role {
        self.shared.role
    }

    pub fn local_addr(&self) -> net::SocketAddr {
        self.local_addr
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

// Sends the name of a duty loop when its thread exits, even by panic
struct ExitGuard {
    name: &'static str,
    exit_tx: Sender<&'static str>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let _ = self.exit_tx.send(self.name);
    }
}

struct Running {
    outbox: Outbox,
    threads: Vec<(&'static str, thread::JoinHandle<()>)>,
    exit_tx: Sender<&'static str>,
    exit_rx: Receiver<&'static str>,
}

impl Running {
    fn spawn<F>(&mut self, name: &'static str, f: F) -> io::Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = ExitGuard {
            name,
            exit_tx: self.exit_tx.clone(),
        };

        let handle = thread::Builder::new()
            .name(format!("{}-{}", self.outbox.shared.role, name))
            .spawn(move || {
                let _guard = guard;
                f();
            })?;

        self.threads.push((name, handle));

        Ok(())
    }

    fn shutdown(mut self, join_timeout: time::Duration) -> ShutdownReport {
        let shared = Arc::clone(&self.outbox.shared);

        shared.close();

        let deadline = time::Instant::now() + join_timeout;

        let mut exited = Vec::new();

        while exited.len() < self.threads.len() {
            match self.exit_rx.recv_deadline(deadline) {
                Ok(name) => exited.push(name),
                Err(_) => break,
            }
        }

        let mut report = ShutdownReport::default();

        for (name, handle) in self.threads.drain(..) {
            if exited.contains(&name) {
                if handle.join().is_err() {
                    warn!(role = %shared.role, loop_name = name, "duty loop panicked");
                }
                report.joined.push(name);
            } else {
                // Dropping the handle detaches the thread
                warn!(role = %shared.role, loop_name = name, "abandoning duty loop");
                report.abandoned.push(name);
            }
        }

        shared.pending.clear();

        report
    }
}

/// One side of the transport: a UDP socket and the four threads serving it.
///
/// ```no_run
/// use tether::{Config, Endpoint, Envelope, Handler, Outbox, Registry};
///
/// struct Log;
///
/// impl Handler for Log {
///     fn receive(&self, _outbox: &Outbox, message: &Envelope) -> bool {
///         println!("{} #{}", message.kind, message.id);
///         true
///     }
/// }
///
/// let mut server = Endpoint::server(Config::default(), Registry::new(), Log);
/// server.start().expect("failed to start server");
/// ```
pub struct Endpoint {
    role: Role,
    config: Config,
    registry: Arc<Registry>,
    handler: Arc<dyn Handler>,
    scheduler: Option<Arc<dyn Scheduler>>,
    running: Option<Running>,
}

impl Endpoint {
    /// Creates an inert endpoint. Nothing is bound until [`Endpoint::start`].
    pub fn new<H>(role: Role, config: Config, registry: Registry, handler: H) -> Self
    where
        H: Handler,
    {
        config.validate();

        Self {
            role,
            config,
            registry: Arc::new(registry),
            handler: Arc::new(handler),
            scheduler: None,
            running: None,
        }
    }

    /// Equivalent to calling [`Endpoint::new`] with [`Role::Server`].
    pub fn server<H: Handler>(config: Config, registry: Registry, handler: H) -> Self {
        Self::new(Role::Server, config, registry, handler)
    }

    /// Equivalent to calling [`Endpoint::new`] with [`Role::Client`].
    pub fn client<H: Handler>(config: Config, registry: Registry, handler: H) -> Self {
        Self::new(Role::Client, config, registry, handler)
    }

    /// Routes processing hooks of main-thread kinds to `scheduler`. Without a scheduler, they run
    /// on the handler thread like any other.
    pub fn with_scheduler<S: Scheduler>(mut self, scheduler: S) -> Self {
        self.scheduler = Some(Arc::new(scheduler));
        self
    }

    /// Stops the endpoint if running, then binds a fresh socket and spawns the duty loops. Returns
    /// the bound address. On failure, the endpoint is left stopped.
    pub fn start(&mut self) -> Result<net::SocketAddr> {
        self.stop();

        let bind_port = match self.role {
            Role::Server => self.config.server_port,
            Role::Client => 0,
        };

        let bind_addr = net::SocketAddr::new(self.config.bind_ip, bind_port);

        let (socket_tx, socket_rx, waker, local_addr) = socket::new(
            bind_addr,
            self.config.datagram_size_max,
            self.config.simulated_loss,
        )
        .map_err(|err| {
            warn!(role = %self.role, %bind_addr, %err, "failed to create socket");
            Error::Setup(err)
        })?;

        let shared = Arc::new(Shared {
            role: self.role,
            config: self.config.clone(),
            epoch: Epoch::new(),
            closed: AtomicBool::new(false),
            last_id: AtomicI64::new(-1),
            pending: PendingTable::new(),
            correlator: Correlator::new(),
            waker,
        });

        let (queue_tx, queue_rx) = crossbeam_channel::unbounded();
        let (forced_tx, forced_rx) = crossbeam_channel::unbounded();
        let (exit_tx, exit_rx) = crossbeam_channel::unbounded();

        let outbox = Outbox {
            shared: Arc::clone(&shared),
            registry: Arc::clone(&self.registry),
            local_addr,
            queue_tx,
            forced_tx,
        };

        let mut running = Running {
            outbox: outbox.clone(),
            threads: Vec::new(),
            exit_tx,
            exit_rx,
        };

        let dispatcher =
            dispatch::Dispatcher::new(outbox, Arc::clone(&self.handler), self.scheduler.clone());

        if let Err(err) = spawn_loops(
            &mut running,
            socket_tx,
            socket_rx,
            queue_rx,
            forced_rx,
            dispatcher,
        ) {
            warn!(role = %self.role, %err, "failed to spawn duty loops");
            running.shutdown(self.config.tick() * 10);
            return Err(Error::Setup(err));
        }

        info!(role = %self.role, %local_addr, "endpoint started");

        self.running = Some(running);

        Ok(local_addr)
    }

    /// Closes the socket, waits up to [`Config::join_timeout_ms`] for the duty loops to exit, and
    /// clears all protocol state. A request blocked on this endpoint returns with no answer.
    pub fn stop(&mut self) -> ShutdownReport {
        match self.running.take() {
            Some(running) => {
                let join_timeout = time::Duration::from_millis(self.config.join_timeout_ms);

                let report = running.shutdown(join_timeout);

                info!(
                    role = %self.role,
                    joined = report.joined.len(),
                    abandoned = report.abandoned.len(),
                    "endpoint stopped"
                );

                report
            }
            None => ShutdownReport::default(),
        }
    }

    /// Returns a handle to the current run.
    pub fn outbox(&self) -> Result<Outbox> {
        self.running
            .as_ref()
            .map(|running| running.outbox.clone())
            .ok_or(Error::Closed)
    }

    fn with_outbox<T>(&self, f: impl FnOnce(&Outbox) -> Result<T>) -> Result<T> {
        match &self.running {
            Some(running) => f(&running.outbox),
            None => Err(Error::Closed),
        }
    }

    /// See [`Outbox::send`].
    pub fn send(&self, envelope: Envelope) -> Result<()> {
        self.with_outbox(|outbox| outbox.send(envelope))
    }

    /// See [`Outbox::send_forced`].
    pub fn send_forced(&self, envelope: Envelope) -> Result<()> {
        self.with_outbox(|outbox| outbox.send_forced(envelope))
    }

    /// See [`Outbox::send_to`].
    pub fn send_to<M: Message>(&self, message: &M, addr: net::SocketAddr) -> Result<()> {
        self.with_outbox(|outbox| outbox.send_to(message, addr))
    }

    /// See [`Outbox::respond`].
    pub fn respond(&self, reply: Envelope, request: &Envelope) -> Result<()> {
        self.with_outbox(|outbox| outbox.respond(reply, request))
    }

    /// See [`Outbox::request`]. To stop the endpoint while a request is blocked, issue the request
    /// from another thread through an [`Outbox`].
    pub fn request(&self, envelope: Envelope, expected_kind: &str) -> Result<Option<Envelope>> {
        self.with_outbox(|outbox| outbox.request(envelope, expected_kind))
    }

    /// See [`Outbox::request_as`].
    pub fn request_as<R: Message>(&self, envelope: Envelope) -> Result<Option<R>> {
        self.with_outbox(|outbox| outbox.request_as(envelope))
    }

    /// See [`Outbox::heartbeat`].
    pub fn heartbeat(&self, addr: net::SocketAddr) -> Result<()> {
        self.with_outbox(|outbox| outbox.heartbeat(addr))
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Returns the address of the bound socket, if running.
    pub fn local_addr(&self) -> Option<net::SocketAddr> {
        self.running
            .as_ref()
            .map(|running| running.outbox.local_addr)
    }

    /// Returns the number of sent messages awaiting acknowledgment.
    pub fn pending_count(&self) -> usize {
        self.running
            .as_ref()
            .map_or(0, |running| running.outbox.shared.pending.len())
    }

    /// Returns the number of ordered messages currently holding the ordering barrier.
    pub fn ordered_count(&self) -> usize {
        self.running
            .as_ref()
            .map_or(0, |running| running.outbox.shared.pending.ordered_len())
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_loops(
    running: &mut Running,
    socket_tx: socket::SocketTx,
    socket_rx: socket::SocketRx,
    queue_rx: Receiver<Outgoing>,
    forced_rx: Receiver<Outgoing>,
    dispatcher: dispatch::Dispatcher,
) -> io::Result<()> {
    let (inbound_tx, inbound_rx) = crossbeam_channel::unbounded();

    let shared = Arc::clone(&running.outbox.shared);
    running.spawn("receiver", move || receiver::run(shared, socket_rx, inbound_tx))?;

    let shared = Arc::clone(&running.outbox.shared);
    running.spawn("sender", move || {
        sender::run(shared, socket_tx, queue_rx, forced_rx)
    })?;

    let outbox = running.outbox.clone();
    let handler = dispatcher.handler();
    running.spawn("retry", move || retry::run(outbox, handler))?;

    running.spawn("handler", move || dispatch::run(dispatcher, inbound_rx))?;

    Ok(())
}

// Runs an application callback, converting a panic into a logged error
fn guarded<T>(role: Role, what: &'static str, f: impl FnOnce() -> T) -> Option<T> {
    match panic::catch_unwind(panic::AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(role = %role, callback = what, "application callback panicked");
            None
        }
    }
}
