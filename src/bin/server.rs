use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use tether::{Config, Endpoint, Envelope, Handler, Message, Outbox, Registry, Reliability};

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

struct Echo;

impl Handler for Echo {
    fn receive(&self, outbox: &Outbox, message: &Envelope) -> bool {
        if let Ok(ping) = message.decode::<Ping>() {
            println!("ping #{} from {:?}", ping.seq, message.sender_addr);

            let reply = Envelope::new(&Pong { seq: ping.seq })
                .and_then(|pong| outbox.respond(pong, message));

            if let Err(err) = reply {
                eprintln!("failed to answer ping: {}", err);
            }
        }

        true
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

    let config = Config {
        bind_ip: [127, 0, 0, 1].into(),
        ..Default::default()
    };

    let mut server = Endpoint::server(config, registry, Echo);

    let addr = server.start().expect("failed to start tether server");

    println!("listening on {}", addr);

    loop {
        std::thread::sleep(std::time::Duration::from_secs(1));
    }
}
