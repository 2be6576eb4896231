use std::time;

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use tether::{Config, Endpoint, Envelope, Handler, Message, Outbox, Registry, Reliability};

static PING_INTERVAL: time::Duration = time::Duration::from_millis(1000);

#[derive(Serialize, Deserialize)]
struct Ping {
    seq: u64,
}

impl Message for Ping {
    const KIND: &'static str = "demo.Ping";
    const RELIABILITY: Reliability = Reliability::Reliable;
}

#[derive(Serialize, Deserialize)]
struct Pong {
    seq: u64,
}

impl Message for Pong {
    const KIND: &'static str = "demo.Pong";
    const RELIABILITY: Reliability = Reliability::OrderedAndReliable;
}

struct Quiet;

impl Handler for Quiet {
    fn receive(&self, _outbox: &Outbox, _message: &Envelope) -> bool {
        true
    }

    fn connectivity_changed(&self, _outbox: &Outbox) {
        println!("server stopped answering heartbeats");
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut registry = Registry::new();
    registry
        .register::<Ping>()
        .and_then(|registry| registry.register::<Pong>())
        .expect("failed to register demo kinds");

    let server_addr = ([127, 0, 0, 1], tether::DEFAULT_PORT).into();

    let config = Config {
        bind_ip: [127, 0, 0, 1].into(),
        default_remote: Some(server_addr),
        ..Default::default()
    };

    let mut client = Endpoint::client(config, registry, Quiet);

    client.start().expect("failed to start tether client");

    let outbox = client.outbox().expect("client not running");

    for seq in 0.. {
        let ping = Envelope::new(&Ping { seq }).expect("failed to encode ping");

        match outbox.request_as::<Pong>(ping) {
            Ok(Some(pong)) => println!("pong #{}", pong.seq),
            Ok(None) => break,
            Err(err) => {
                eprintln!("request failed: {}", err);
                break;
            }
        }

        if let Err(err) = outbox.heartbeat(server_addr) {
            eprintln!("heartbeat failed: {}", err);
        }

        std::thread::sleep(PING_INTERVAL);
    }
}
