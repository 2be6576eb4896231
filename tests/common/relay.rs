//! A UDP relay standing between one client and one server, able to drop, delay and record
//! datagrams in either direction.

use std::io;
use std::net;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time;

use parking_lot::Mutex;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    ToServer,
    ToClient,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Forward,
    Drop,
    Delay(time::Duration),
}

#[derive(Clone, Debug)]
pub struct Record {
    pub direction: Direction,
    pub bytes: Vec<u8>,
    pub arrived: time::Instant,
    pub verdict: Verdict,
}

impl Record {
    fn document(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.bytes).ok()
    }

    /// Type tag of the message carried, or None for a fragment.
    pub fn kind(&self) -> Option<String> {
        self.document()?
            .get("type")?
            .as_str()
            .map(|kind| kind.to_owned())
    }

    pub fn id(&self) -> Option<i64> {
        self.document()?.get("id")?.as_i64()
    }

    pub fn payload(&self) -> Option<serde_json::Value> {
        self.document()?.get("payload").cloned()
    }

    pub fn is_fragment(&self) -> bool {
        self.bytes.first() == Some(&b'P')
    }
}

pub type Filter = Box<dyn FnMut(Direction, &[u8]) -> Verdict + Send>;

pub struct Relay {
    addr: net::SocketAddr,
    log: Arc<Mutex<Vec<Record>>>,
    stop: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Relay {
    /// Forwards datagrams from any client to `server_addr`, and answers from the server to the
    /// last client seen.
    pub fn new(server_addr: net::SocketAddr, filter: Filter) -> io::Result<Self> {
        let socket = net::UdpSocket::bind((net::Ipv4Addr::LOCALHOST, 0))?;
        socket.set_read_timeout(Some(time::Duration::from_millis(10)))?;

        let addr = socket.local_addr()?;

        let log = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));

        let thread = {
            let log = Arc::clone(&log);
            let stop = Arc::clone(&stop);

            thread::spawn(move || run(socket, server_addr, filter, log, stop))
        };

        Ok(Self {
            addr,
            log,
            stop,
            thread: Some(thread),
        })
    }

    /// Relays everything untouched.
    pub fn transparent(server_addr: net::SocketAddr) -> io::Result<Self> {
        Self::new(server_addr, Box::new(|_, _| Verdict::Forward))
    }

    pub fn addr(&self) -> net::SocketAddr {
        self.addr
    }

    pub fn records(&self) -> Vec<Record> {
        self.log.lock().clone()
    }

    pub fn records_of(&self, direction: Direction) -> Vec<Record> {
        self.records()
            .into_iter()
            .filter(|record| record.direction == direction)
            .collect()
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);

        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn run(
    socket: net::UdpSocket,
    server_addr: net::SocketAddr,
    mut filter: Filter,
    log: Arc<Mutex<Vec<Record>>>,
    stop: Arc<AtomicBool>,
) {
    let mut client_addr = None;
    let mut buffer = vec![0; 65536];

    while !stop.load(Ordering::Relaxed) {
        let (len, from) = match socket.recv_from(&mut buffer) {
            Ok(received) => received,
            Err(_) => continue,
        };

        let arrived = time::Instant::now();
        let bytes = buffer[..len].to_vec();

        let (direction, to) = if from == server_addr {
            match client_addr {
                Some(client_addr) => (Direction::ToClient, client_addr),
                None => continue,
            }
        } else {
            client_addr = Some(from);
            (Direction::ToServer, server_addr)
        };

        let verdict = filter(direction, &bytes);

        log.lock().push(Record {
            direction,
            bytes: bytes.clone(),
            arrived,
            verdict,
        });

        match verdict {
            Verdict::Forward => {
                let _ = socket.send_to(&bytes, to);
            }
            Verdict::Drop => {}
            Verdict::Delay(delay) => {
                if let Ok(socket) = socket.try_clone() {
                    thread::spawn(move || {
                        thread::sleep(delay);
                        let _ = socket.send_to(&bytes, to);
                    });
                }
            }
        }
    }
}

/// Type tag of an encoded message, or None for a fragment.
pub fn kind_of(bytes: &[u8]) -> Option<String> {
    let document: serde_json::Value = serde_json::from_slice(bytes).ok()?;

    document.get("type")?.as_str().map(|kind| kind.to_owned())
}
